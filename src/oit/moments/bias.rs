use crate::config::{MomentBasis, MomentCount, StorageBitDepth};

use super::math::WRAPPING_ZONE;

/// Blend weight toward the bias vector, tuned per storage precision.
pub(crate) fn moment_bias(count: MomentCount, basis: MomentBasis, bits: StorageBitDepth) -> f32 {
    let (full, half) = match (basis, count) {
        (MomentBasis::Power, MomentCount::Four) => (5e-7, 6e-5),
        (MomentBasis::Power, MomentCount::Six) => (5e-6, 6e-4),
        (MomentBasis::Power, MomentCount::Eight) => (5e-5, 2.5e-3),
        (MomentBasis::Trigonometric, MomentCount::Four) => (4e-7, 4e-4),
        (MomentBasis::Trigonometric, MomentCount::Six) => (8e-7, 6.5e-4),
        (MomentBasis::Trigonometric, MomentCount::Eight) => (1.5e-6, 8.5e-4),
    };
    match bits {
        StorageBitDepth::Bits32 => full,
        StorageBitDepth::Bits16 => half,
    }
}

/// Normalized moments the biased reconstruction is pulled toward.
///
/// Power moments use tabulated vectors of a well-conditioned symmetric distribution. Trigonometric
/// moments use a point mass in the middle of the wrapping zone, where no fragment ever lands.
pub(crate) fn bias_vector(count: MomentCount, basis: MomentBasis) -> [f64; 8] {
    match basis {
        MomentBasis::Power => match count {
            MomentCount::Four => [0.0, 0.375, 0.0, 0.375, 0.0, 0.0, 0.0, 0.0],
            MomentCount::Six => [0.0, 0.48, 0.0, 0.451, 0.0, 0.45, 0.0, 0.0],
            MomentCount::Eight => [
                0.0,
                0.75,
                0.0,
                0.676_666_666_666_666_6,
                0.0,
                0.63,
                0.0,
                0.600_303_030_303_030_3,
            ],
        },
        MomentBasis::Trigonometric => {
            let theta = std::f64::consts::TAU - WRAPPING_ZONE * 0.5;
            let mut v = [0.0; 8];
            for k in 1..=count.get() / 2 {
                let angle = k as f64 * theta;
                v[2 * k - 2] = angle.cos();
                v[2 * k - 1] = angle.sin();
            }
            v
        }
    }
}
