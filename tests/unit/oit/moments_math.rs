use super::*;

fn accumulate(
    basis: MomentBasis,
    count: MomentCount,
    fragments: &[(f32, f32)],
) -> (f32, [f32; 8]) {
    let mut b0 = 0.0;
    let mut b = [0.0f32; 8];
    for &(z, alpha) in fragments {
        let a = absorbance(alpha);
        b0 += a;
        for (acc, t) in b.iter_mut().zip(moment_terms(basis, count, z)) {
            *acc += a * t;
        }
    }
    (b0, b)
}

#[test]
fn depth_warp_is_logarithmic() {
    let range = DepthRange::new(1.0, 100.0).unwrap();
    assert_eq!(warp_depth(1.0, &range), -1.0);
    assert!((warp_depth(100.0, &range) - 1.0).abs() < 1e-6);
    assert!(warp_depth(10.0, &range).abs() < 1e-6);
    assert_eq!(warp_depth(0.01, &range), -1.0);
    assert_eq!(warp_depth(1e6, &range), 1.0);
}

#[test]
fn absorbance_is_bounded_for_opaque_fragments() {
    assert_eq!(absorbance(0.0), 0.0);
    assert!((absorbance(0.5) - std::f32::consts::LN_2).abs() < 1e-6);
    let opaque = absorbance(1.0);
    assert!(opaque.is_finite());
    assert!((opaque - 9.2103).abs() < 1e-3);
}

#[test]
fn trig_phase_avoids_wrapping_zone() {
    assert_eq!(trig_phase(-1.0), 0.0);
    assert!((trig_phase(1.0) - (TAU - WRAPPING_ZONE)).abs() < 1e-9);
}

#[test]
fn three_points_are_reconstructed_by_four_moments() {
    let fragments = [(-0.6, 0.5), (-0.1, 0.5), (0.4, 0.5)];
    for basis in [MomentBasis::Power, MomentBasis::Trigonometric] {
        let (b0, b) = accumulate(basis, MomentCount::Four, &fragments);
        let rec = Reconstruction::new(MomentCount::Four, basis, StorageBitDepth::Bits32, 0.25);
        // Everything in front plus a quarter of the own absorbance.
        let nearest = rec.transmittance(b0, &b, -0.6);
        let farthest = rec.transmittance(b0, &b, 0.4);
        assert!((nearest - 0.5f32.powf(0.25)).abs() < 1e-3, "{basis:?}: {nearest}");
        assert!((farthest - 0.5f32.powf(2.25)).abs() < 1e-3, "{basis:?}: {farthest}");
    }
}

#[test]
fn single_fragment_splits_transmittance() {
    let fragments = [(0.0, 0.5)];
    for count in [MomentCount::Four, MomentCount::Six, MomentCount::Eight] {
        let (b0, b) = accumulate(MomentBasis::Power, count, &fragments);
        let rec = Reconstruction::new(count, MomentBasis::Power, StorageBitDepth::Bits32, 0.25);
        let front = rec.transmittance(b0, &b, -0.8);
        let behind = rec.transmittance(b0, &b, 0.8);
        assert!(front > 0.95, "{count:?}: {front}");
        assert!((behind - 0.5).abs() < 0.05, "{count:?}: {behind}");
    }
}

#[test]
fn empty_pixel_is_fully_transparent() {
    let rec = Reconstruction::new(
        MomentCount::Four,
        MomentBasis::Power,
        StorageBitDepth::Bits32,
        0.25,
    );
    assert_eq!(rec.transmittance(0.0, &[0.0; 8], 0.3), 1.0);
}

#[test]
fn durand_kerner_finds_cubic_roots() {
    let coeffs = [
        Complex::real(-6.0),
        Complex::real(11.0),
        Complex::real(-6.0),
        Complex::real(1.0),
    ];
    let mut roots: Vec<f64> = durand_kerner(&coeffs)
        .unwrap()
        .iter()
        .map(|r| {
            assert!(r.im.abs() < 1e-9);
            r.re
        })
        .collect();
    roots.sort_by(f64::total_cmp);
    for (r, expected) in roots.iter().zip([1.0, 2.0, 3.0]) {
        assert!((r - expected).abs() < 1e-9);
    }
}

#[test]
fn quadratic_handles_complex_roots() {
    // x² + 1
    let roots = solve_quadratic(&[Complex::ONE, Complex::ZERO, Complex::ONE]).unwrap();
    let mut ims: Vec<f64> = roots.iter().map(|r| r.im).collect();
    ims.sort_by(f64::total_cmp);
    assert!((ims[0] + 1.0).abs() < 1e-12);
    assert!((ims[1] - 1.0).abs() < 1e-12);
    assert!(roots.iter().all(|r| r.re.abs() < 1e-12));
}

#[test]
fn singular_system_is_detected() {
    let zero = [[Complex::ZERO; MAX_DIM]; MAX_DIM];
    assert!(invert(&zero, 3).is_none());
}
