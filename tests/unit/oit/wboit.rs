use super::*;
use crate::foundation::core::Rgba;
use crate::foundation::metrics::MemoryMetrics;
use crate::gpu::caps::DeviceCaps;
use crate::raster::pass::GatherPass;

fn wboit(weight: WboitWeight, metrics: &mut MemoryMetrics) -> Wboit {
    let settings = OitSettings {
        method: OitMethod::Wboit,
        wboit_weight: weight,
        stencil_mask: false,
        ..OitSettings::default()
    };
    let mut backend = Wboit::new();
    backend.create(&settings).unwrap();
    let caps = DeviceCaps::host().without_pixel_interlock();
    let mut alloc = ResourceAllocator::new(&caps, metrics);
    backend
        .resolution_changed(Resolution::new(1, 1).unwrap(), &mut alloc)
        .unwrap();
    backend
}

fn resolve(backend: &mut Wboit, fragments: &[Fragment]) -> PremulRgba {
    {
        let program = backend.gather_program().unwrap();
        fragments.iter().for_each(|f| program.invoke(f));
    }
    let mut target = FrameTarget::new(Resolution::new(1, 1).unwrap());
    let mut state = RenderState::default();
    let mut scene = |_: &mut GatherPass<'_>| Ok::<(), OitError>(());
    backend
        .render_to_screen(&mut scene, &mut target, &mut state)
        .unwrap();
    target.pixel(0, 0)
}

#[test]
fn weights_fall_off_with_depth_and_stay_clamped() {
    let range = DepthRange::default();
    for weight in [WboitWeight::Eq7, WboitWeight::Eq8, WboitWeight::Eq9, WboitWeight::Eq10] {
        let mut prev = f32::INFINITY;
        for depth in [0.1, 1.0, 5.0, 20.0, 99.0] {
            let w = weight.depth_factor(depth, &range);
            assert!((MIN_WEIGHT..=MAX_WEIGHT).contains(&w), "{weight:?} {depth}: {w}");
            assert!(w <= prev, "{weight:?} {depth}: {w} > {prev}");
            prev = w;
        }
    }
    assert_eq!(WboitWeight::Eq7.depth_factor(1e6, &range), MIN_WEIGHT);
    assert_eq!(WboitWeight::Eq10.depth_factor(range.near, &range), MAX_WEIGHT);
}

#[test]
fn alpha_is_exact_and_nearer_layers_dominate() {
    let mut metrics = MemoryMetrics::new();
    let mut backend = wboit(WboitWeight::Eq7, &mut metrics);
    let out = resolve(
        &mut backend,
        &[
            Fragment::new(0, 0, 3.0, Rgba::new(0.0, 0.0, 1.0, 0.5)),
            Fragment::new(0, 0, 1.0, Rgba::new(1.0, 0.0, 0.0, 0.5)),
            Fragment::new(0, 0, 2.0, Rgba::new(0.0, 1.0, 0.0, 0.5)),
        ],
    );
    assert!((out.a - 0.875).abs() < 1e-5);
    assert!(out.r > out.g && out.g > out.b, "{out:?}");
}

#[test]
fn every_permutation_agrees() {
    let fragments = [
        Fragment::new(0, 0, 1.5, Rgba::new(0.9, 0.1, 0.2, 0.3)),
        Fragment::new(0, 0, 4.0, Rgba::new(0.1, 0.8, 0.3, 0.5)),
        Fragment::new(0, 0, 9.0, Rgba::new(0.2, 0.3, 0.7, 0.8)),
    ];
    let orders = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];
    let mut metrics = MemoryMetrics::new();
    let mut backend = wboit(WboitWeight::Eq8, &mut metrics);
    let results: Vec<PremulRgba> = orders
        .iter()
        .map(|order| {
            let permuted: Vec<Fragment> = order.iter().map(|&i| fragments[i]).collect();
            resolve(&mut backend, &permuted)
        })
        .collect();
    for r in &results[1..] {
        assert!(r.max_abs_diff(results[0]) < 1e-5);
    }
}

#[test]
fn untouched_pixel_is_skipped() {
    let mut metrics = MemoryMetrics::new();
    let mut backend = wboit(WboitWeight::Eq7, &mut metrics);
    assert_eq!(resolve(&mut backend, &[]), PremulRgba::TRANSPARENT);
}

#[test]
fn resolve_restores_cleared_state() {
    let mut metrics = MemoryMetrics::new();
    let mut backend = wboit(WboitWeight::Eq7, &mut metrics);
    resolve(
        &mut backend,
        &[Fragment::new(0, 0, 1.0, Rgba::new(1.0, 1.0, 1.0, 0.5))],
    );
    let storage = backend.storage().unwrap();
    assert_eq!(storage.revealage.load_f32(0), 1.0);
    assert!(storage.accum.snapshot().iter().all(|&w| w == 0));
}

#[test]
fn faint_pixels_do_not_carry_into_the_next_frame() {
    let faint = [Fragment::new(0, 0, 2.0, Rgba::new(1.0, 1.0, 1.0, 6e-6))];

    let mut metrics = MemoryMetrics::new();
    let mut isolated = wboit(WboitWeight::Eq7, &mut metrics);
    let single = resolve(&mut isolated, &faint);

    let mut metrics = MemoryMetrics::new();
    let mut backend = wboit(WboitWeight::Eq7, &mut metrics);
    let first = resolve(&mut backend, &faint);
    let second = resolve(&mut backend, &faint);

    assert_eq!(single, PremulRgba::TRANSPARENT);
    assert_eq!(first, single);
    assert_eq!(second, single);
    let storage = backend.storage().unwrap();
    assert_eq!(storage.revealage.load_f32(0), 1.0);
    assert!(storage.accum.snapshot().iter().all(|&w| w == 0));
}
