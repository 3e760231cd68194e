//! Screen-space quad scenes for demos, tests and the CLI.
//!
//! A [`QuadScene`] is a list of [`TransparentQuad`]s drawn in one draw call per pass. It also
//! knows how to produce the exact reference image: every pixel's covering fragments sorted by
//! depth and composited back-to-front.

use std::path::Path;

use anyhow::Context as _;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;

use crate::config::DepthRange;
use crate::foundation::core::{Fragment, Rect, Resolution, Rgba};
use crate::foundation::error::{OitError, OitResult};
use crate::oit::composite::reference_composite;
use crate::oit::record::FragmentRecord;
use crate::raster::pass::{GatherPass, Scene};
use crate::raster::primitive::TransparentQuad;
use crate::raster::state::RenderState;
use crate::raster::target::FrameTarget;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuadScene {
    pub width: u32,
    pub height: u32,
    pub quads: Vec<TransparentQuad>,
}

impl QuadScene {
    pub fn new(width: u32, height: u32, quads: Vec<TransparentQuad>) -> Self {
        Self {
            width,
            height,
            quads,
        }
    }

    /// Red, green and blue quads at depths 1, 2 and 3 with alpha 0.5, overlapping in the middle
    /// of the frame. Submitted back-to-front.
    pub fn three_quads(width: u32, height: u32) -> Self {
        let (w, h) = (f64::from(width), f64::from(height));
        let quad = |fx: f64, fy: f64, depth: f32, color: Rgba| {
            TransparentQuad::new(
                Rect::new(w * fx, h * fy, w * (fx + 0.5), h * (fy + 0.5)),
                depth,
                color,
            )
        };
        Self::new(
            width,
            height,
            vec![
                quad(0.375, 0.25, 3.0, Rgba::new(0.0, 0.0, 1.0, 0.5)),
                quad(0.25, 0.375, 2.0, Rgba::new(0.0, 1.0, 0.0, 0.5)),
                quad(0.125, 0.125, 1.0, Rgba::new(1.0, 0.0, 0.0, 0.5)),
            ],
        )
    }

    /// `count` quads with random placement, color and depth inside `depth_range`.
    ///
    /// The same `seed` always yields the same scene. Fails when `depth_range` is empty.
    pub fn random(
        resolution: Resolution,
        count: usize,
        depth_range: DepthRange,
        seed: u64,
    ) -> OitResult<Self> {
        depth_range.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let (w, h) = (f64::from(resolution.width), f64::from(resolution.height));
        let quads = (0..count)
            .map(|_| {
                let x0 = rng.gen_range(0.0..w);
                let y0 = rng.gen_range(0.0..h);
                let x1 = (x0 + rng.gen_range(1.0..=w.max(2.0) * 0.5)).min(w);
                let y1 = (y0 + rng.gen_range(1.0..=h.max(2.0) * 0.5)).min(h);
                let depth = rng.gen_range(depth_range.near..depth_range.far);
                let color = Rgba::new(
                    rng.gen_range(0.0..=1.0),
                    rng.gen_range(0.0..=1.0),
                    rng.gen_range(0.0..=1.0),
                    rng.gen_range(0.1..=0.9),
                );
                TransparentQuad::new(Rect::new(x0, y0, x1, y1), depth, color)
            })
            .collect();
        Ok(Self::new(resolution.width, resolution.height, quads))
    }

    pub fn from_json_str(json: &str) -> OitResult<Self> {
        let scene: Self =
            serde_json::from_str(json).map_err(|e| OitError::config(format!("scene: {e}")))?;
        scene.resolution()?;
        Ok(scene)
    }

    pub fn from_json_path(path: &Path) -> OitResult<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("read scene '{}'", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> OitResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| OitError::config(e.to_string()))
    }

    pub fn resolution(&self) -> OitResult<Resolution> {
        Resolution::new(self.width, self.height)
    }

    /// Every fragment the quads produce, in submission order.
    pub fn fragments(&self) -> OitResult<Vec<Fragment>> {
        let resolution = self.resolution()?;
        let mut out = Vec::new();
        for quad in &self.quads {
            quad.rasterize(resolution, &mut out);
        }
        Ok(out)
    }

    /// Same quads, submitted in reverse order.
    pub fn reversed(&self) -> Self {
        let mut quads = self.quads.clone();
        quads.reverse();
        Self::new(self.width, self.height, quads)
    }

    /// Exact sorted composite of the scene over a transparent background.
    pub fn reference_image(&self) -> OitResult<FrameTarget> {
        let resolution = self.resolution()?;
        let mut per_pixel: Vec<SmallVec<[FragmentRecord; 8]>> =
            vec![SmallVec::new(); resolution.pixel_count()];
        for f in self.fragments()? {
            per_pixel[resolution.linear_index(f.x, f.y)].push(FragmentRecord::from_fragment(&f));
        }

        let mut target = FrameTarget::new(resolution);
        let state = RenderState::resolve(false);
        target.resolve_with(&state, |x, y| {
            let mut records = per_pixel[resolution.linear_index(x, y)].clone();
            (!records.is_empty()).then(|| reference_composite(&mut records))
        });
        Ok(target)
    }
}

impl Scene for QuadScene {
    fn render(&mut self, pass: &mut GatherPass<'_>) -> OitResult<()> {
        let shader = pass.gather_shader();
        pass.draw_quads(shader, &self.quads)
    }
}

/// Largest per-channel difference between two equally sized images.
pub fn max_abs_diff(a: &FrameTarget, b: &FrameTarget) -> OitResult<f32> {
    if a.resolution() != b.resolution() {
        return Err(OitError::validation("cannot compare images of different sizes"));
    }
    Ok(a.pixels()
        .iter()
        .zip(b.pixels())
        .map(|(p, q)| p.max_abs_diff(*q))
        .fold(0.0, f32::max))
}

#[cfg(test)]
#[path = "../tests/unit/scene.rs"]
mod tests;
