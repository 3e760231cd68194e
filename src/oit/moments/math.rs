//! Moment accumulation terms and transmittance reconstruction.
//!
//! Reconstruction follows the canonical-representation bound: the biased moments are explained
//! by the smallest discrete distribution that has a support point at the query depth, and the
//! absorbance in front of that depth is read off its weights.

use std::f64::consts::{PI, TAU};

use smallvec::SmallVec;

use crate::config::{DepthRange, MomentBasis, MomentCount, StorageBitDepth};

use super::bias::{bias_vector, moment_bias};
use super::complex::Complex;

/// Angular band at the end of the circle kept free of fragments.
pub(crate) const WRAPPING_ZONE: f64 = 0.1 * TAU;

/// Pixels whose total absorbance is below this are treated as empty.
pub(crate) const MIN_TOTAL_ABSORBANCE: f32 = 0.001_000_500_33;

const MAX_DIM: usize = 5;
const PIVOT_EPSILON: f64 = 1e-15;
const ROOT_ITERATIONS: usize = 128;
const ROOT_TOLERANCE: f64 = 1e-12;

type Matrix = [[Complex; MAX_DIM]; MAX_DIM];
type Vector = [Complex; MAX_DIM];
pub(crate) type Roots = SmallVec<[Complex; 4]>;

pub(crate) fn absorbance(alpha: f32) -> f32 {
    -(1.0 - alpha.clamp(0.0, 0.9999)).ln()
}

/// Logarithmic warp of view depth onto `[-1, 1]`.
pub(crate) fn warp_depth(depth: f32, range: &DepthRange) -> f32 {
    let d = depth.clamp(range.near, range.far);
    let t = (d / range.near).ln() / (range.far / range.near).ln();
    (2.0 * t - 1.0).clamp(-1.0, 1.0)
}

pub(crate) fn trig_phase(z: f32) -> f64 {
    (f64::from(z) + 1.0) * (PI - WRAPPING_ZONE * 0.5)
}

/// Unweighted contributions of a fragment at warped depth `z` to `b_1 ..= b_n`.
pub(crate) fn moment_terms(basis: MomentBasis, count: MomentCount, z: f32) -> [f32; 8] {
    let n = count.get();
    let mut terms = [0.0f32; 8];
    match basis {
        MomentBasis::Power => {
            let mut p = 1.0f32;
            for t in terms.iter_mut().take(n) {
                p *= z;
                *t = p;
            }
        }
        MomentBasis::Trigonometric => {
            let phi = trig_phase(z);
            for k in 1..=n / 2 {
                let angle = k as f64 * phi;
                terms[2 * k - 2] = angle.cos() as f32;
                terms[2 * k - 1] = angle.sin() as f32;
            }
        }
    }
    terms
}

/// Transmittance reconstruction for one moment configuration.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Reconstruction {
    basis: MomentBasis,
    count: MomentCount,
    bias: [f64; 8],
    beta: f64,
    overestimation: f64,
}

impl Reconstruction {
    pub(crate) fn new(
        count: MomentCount,
        basis: MomentBasis,
        bits: StorageBitDepth,
        overestimation: f32,
    ) -> Self {
        Self {
            basis,
            count,
            bias: bias_vector(count, basis),
            beta: f64::from(moment_bias(count, basis, bits)),
            overestimation: f64::from(overestimation),
        }
    }

    /// Transmittance in front of warped depth `z`, given the zeroth moment and raw `b_1 ..= b_n`.
    pub(crate) fn transmittance(&self, b0: f32, moments: &[f32], z: f32) -> f32 {
        if b0 <= 0.0 {
            return 1.0;
        }
        let n = self.count.get();
        let b0 = f64::from(b0);
        let mut biased = [0.0f64; 8];
        for (k, b) in biased.iter_mut().enumerate().take(n) {
            let normalized = f64::from(moments[k]) / b0;
            *b = (1.0 - self.beta) * normalized + self.beta * self.bias[k];
        }
        let absorbance = self
            .bounded_absorbance(&biased[..n], z)
            .unwrap_or(self.overestimation);
        (-b0 * absorbance).exp().clamp(0.0, 1.0) as f32
    }

    /// Normalized absorbance in front of `z`, or `None` for a singular moment system.
    fn bounded_absorbance(&self, b: &[f64], z: f32) -> Option<f64> {
        let dim = b.len() / 2 + 1;
        let matrix = self.moment_matrix(b, dim);
        let inverse = invert(&matrix, dim)?;

        let point = match self.basis {
            MomentBasis::Power => f64::from(z),
            MomentBasis::Trigonometric => trig_phase(z),
        };
        let v0 = self.basis_vector(point, dim);
        let kernel = mul_vector(&inverse, &v0, dim);
        let w0 = 1.0 / dot(&v0, &kernel, dim).re;
        if !w0.is_finite() || w0 < 0.0 {
            return None;
        }

        // Kernel polynomial in ascending powers.
        let mut coeffs: Roots = SmallVec::from_elem(Complex::ZERO, dim);
        for j in 0..dim {
            let slot = match self.basis {
                MomentBasis::Power => j,
                MomentBasis::Trigonometric => dim - 1 - j,
            };
            coeffs[slot] = kernel[j];
        }
        let roots = if dim == 3 {
            solve_quadratic(&coeffs)?
        } else {
            durand_kerner(&coeffs)?
        };

        let mut absorbance = self.overestimation * w0;
        for root in roots {
            let x = match self.basis {
                MomentBasis::Power => root.re,
                MomentBasis::Trigonometric => root.arg().rem_euclid(TAU),
            };
            if x >= point {
                continue;
            }
            let v = self.basis_vector(x, dim);
            let w = 1.0 / dot(&v, &mul_vector(&inverse, &v, dim), dim).re;
            if w.is_finite() && w > 0.0 {
                absorbance += w;
            }
        }
        Some(absorbance.clamp(0.0, 1.0))
    }

    fn moment_matrix(&self, b: &[f64], dim: usize) -> Matrix {
        let mut m = [[Complex::ZERO; MAX_DIM]; MAX_DIM];
        match self.basis {
            MomentBasis::Power => {
                let moment = |k: usize| if k == 0 { 1.0 } else { b[k - 1] };
                for (i, row) in m.iter_mut().enumerate().take(dim) {
                    for (j, cell) in row.iter_mut().enumerate().take(dim) {
                        *cell = Complex::real(moment(i + j));
                    }
                }
            }
            MomentBasis::Trigonometric => {
                let moment = |k: usize| {
                    if k == 0 {
                        Complex::ONE
                    } else {
                        Complex::new(b[2 * k - 2], b[2 * k - 1])
                    }
                };
                for (i, row) in m.iter_mut().enumerate().take(dim) {
                    for (j, cell) in row.iter_mut().enumerate().take(dim) {
                        *cell = if i >= j {
                            moment(i - j)
                        } else {
                            moment(j - i).conj()
                        };
                    }
                }
            }
        }
        m
    }

    fn basis_vector(&self, x: f64, dim: usize) -> Vector {
        let mut v = [Complex::ZERO; MAX_DIM];
        for (j, c) in v.iter_mut().enumerate().take(dim) {
            *c = match self.basis {
                MomentBasis::Power => Complex::real(x.powi(j as i32)),
                MomentBasis::Trigonometric => Complex::cis(j as f64 * x),
            };
        }
        v
    }
}

/// Gauss-Jordan inverse with partial pivoting.
fn invert(matrix: &Matrix, dim: usize) -> Option<Matrix> {
    let mut a = *matrix;
    let mut inv = [[Complex::ZERO; MAX_DIM]; MAX_DIM];
    for (i, row) in inv.iter_mut().enumerate().take(dim) {
        row[i] = Complex::ONE;
    }

    for col in 0..dim {
        let pivot = (col..dim).max_by(|&x, &y| a[x][col].abs().total_cmp(&a[y][col].abs()))?;
        if a[pivot][col].abs() < PIVOT_EPSILON {
            return None;
        }
        a.swap(col, pivot);
        inv.swap(col, pivot);

        let p = a[col][col];
        for j in 0..dim {
            a[col][j] = a[col][j] / p;
            inv[col][j] = inv[col][j] / p;
        }
        for row in 0..dim {
            if row == col {
                continue;
            }
            let f = a[row][col];
            if f == Complex::ZERO {
                continue;
            }
            for j in 0..dim {
                a[row][j] = a[row][j] - f * a[col][j];
                inv[row][j] = inv[row][j] - f * inv[col][j];
            }
        }
    }
    Some(inv)
}

fn mul_vector(m: &Matrix, v: &Vector, dim: usize) -> Vector {
    let mut out = [Complex::ZERO; MAX_DIM];
    for (i, o) in out.iter_mut().enumerate().take(dim) {
        *o = (0..dim).fold(Complex::ZERO, |acc, j| acc + m[i][j] * v[j]);
    }
    out
}

/// `uᴴ v`
fn dot(u: &Vector, v: &Vector, dim: usize) -> Complex {
    (0..dim).fold(Complex::ZERO, |acc, i| acc + u[i].conj() * v[i])
}

/// Roots of `c0 + c1·x + c2·x²`.
pub(crate) fn solve_quadratic(coeffs: &[Complex]) -> Option<Roots> {
    let (c, b, a) = (coeffs[0], coeffs[1], coeffs[2]);
    if a.abs() < PIVOT_EPSILON {
        if b.abs() < PIVOT_EPSILON {
            return None;
        }
        return Some(SmallVec::from_slice(&[-(c / b)]));
    }
    let mut s = (b * b - a * c.scale(4.0)).sqrt();
    if (b.conj() * s).re < 0.0 {
        s = -s;
    }
    let q = (b + s).scale(-0.5);
    let first = q / a;
    let second = if q.abs() < PIVOT_EPSILON {
        first
    } else {
        c / q
    };
    Some(SmallVec::from_slice(&[first, second]))
}

/// Roots of the polynomial with ascending coefficients `coeffs` (Weierstrass iteration).
pub(crate) fn durand_kerner(coeffs: &[Complex]) -> Option<Roots> {
    let degree = coeffs.len() - 1;
    let lead = coeffs[degree];
    if lead.abs() < PIVOT_EPSILON {
        return None;
    }
    let monic: SmallVec<[Complex; 5]> = coeffs.iter().map(|&c| c / lead).collect();
    let eval = |x: Complex| monic.iter().rev().fold(Complex::ZERO, |acc, &c| acc * x + c);

    let seed = Complex::new(0.4, 0.9);
    let mut roots: Roots = SmallVec::new();
    let mut r = Complex::ONE;
    for _ in 0..degree {
        roots.push(r);
        r = r * seed;
    }

    for _ in 0..ROOT_ITERATIONS {
        let mut delta = 0.0f64;
        for i in 0..degree {
            let xi = roots[i];
            let denom = (0..degree)
                .filter(|&j| j != i)
                .fold(Complex::ONE, |acc, j| acc * (xi - roots[j]));
            if denom.abs() < f64::MIN_POSITIVE {
                continue;
            }
            let step = eval(xi) / denom;
            roots[i] = xi - step;
            delta = delta.max(step.abs());
        }
        if delta < ROOT_TOLERANCE {
            break;
        }
    }
    roots
        .iter()
        .all(|r| r.re.is_finite() && r.im.is_finite())
        .then_some(roots)
}

#[cfg(test)]
#[path = "../../../tests/unit/oit/moments_math.rs"]
mod tests;
