use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::Context as _;
use rayon::prelude::*;
use xxhash_rust::xxh3::xxh3_64;

use crate::foundation::core::{PremulRgba, Resolution};
use crate::foundation::error::{OitError, OitResult};
use crate::raster::state::{BlendMode, RenderState, StencilMode};

/// Destination image of a frame: premultiplied color, opaque depth and a stencil mask.
pub struct FrameTarget {
    resolution: Resolution,
    color: Vec<PremulRgba>,
    depth: Vec<f32>,
    stencil: Box<[AtomicU8]>,
}

impl FrameTarget {
    /// Transparent target with an empty depth buffer.
    pub fn new(resolution: Resolution) -> Self {
        Self::with_clear(resolution, PremulRgba::TRANSPARENT)
    }

    pub fn with_clear(resolution: Resolution, clear: PremulRgba) -> Self {
        let n = resolution.pixel_count();
        Self {
            resolution,
            color: vec![clear; n],
            depth: vec![f32::INFINITY; n],
            stencil: (0..n).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Reset color, depth and stencil.
    pub fn clear(&mut self, color: PremulRgba) {
        self.color.fill(color);
        self.depth.fill(f32::INFINITY);
        self.clear_stencil();
    }

    pub fn pixel(&self, x: u32, y: u32) -> PremulRgba {
        self.color[self.resolution.linear_index(x, y)]
    }

    pub fn pixels(&self) -> &[PremulRgba] {
        &self.color
    }

    /// Depth of opaque geometry already drawn at `(x, y)`; transparent fragments at or behind it
    /// are rejected while depth testing is on.
    pub fn set_opaque_depth(&mut self, x: u32, y: u32, depth: f32) {
        let i = self.resolution.linear_index(x, y);
        self.depth[i] = depth;
    }

    pub fn opaque_depth(&self, x: u32, y: u32) -> f32 {
        self.depth[self.resolution.linear_index(x, y)]
    }

    pub(crate) fn opaque_depth_at(&self, index: usize) -> f32 {
        self.depth[index]
    }

    pub(crate) fn mark_touched(&self, index: usize) {
        self.stencil[index].store(1, Ordering::Relaxed);
    }

    pub fn is_touched(&self, x: u32, y: u32) -> bool {
        self.stencil[self.resolution.linear_index(x, y)].load(Ordering::Relaxed) != 0
    }

    /// Number of pixels currently marked in the stencil.
    pub fn touched_count(&self) -> usize {
        self.stencil
            .par_iter()
            .filter(|s| s.load(Ordering::Relaxed) != 0)
            .count()
    }

    pub(crate) fn clear_stencil(&self) {
        self.stencil
            .par_iter()
            .for_each(|s| s.store(0, Ordering::Relaxed));
    }

    /// Full-screen pass: `shade(x, y)` produces the source color of each pixel, blended per
    /// `state`. Pixels for which `shade` returns `None` are left untouched.
    pub(crate) fn resolve_with<F>(&mut self, state: &RenderState, shade: F)
    where
        F: Fn(u32, u32) -> Option<PremulRgba> + Sync,
    {
        let width = self.resolution.width as usize;
        let stencil = &self.stencil;
        let test_stencil = state.stencil == StencilMode::TestTouched;
        let color_write = state.color_write;
        let blend = state.blend;

        self.color
            .par_chunks_mut(width)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, dst) in row.iter_mut().enumerate() {
                    if test_stencil && stencil[y * width + x].load(Ordering::Relaxed) == 0 {
                        continue;
                    }
                    let Some(src) = shade(x as u32, y as u32) else {
                        continue;
                    };
                    if !color_write {
                        continue;
                    }
                    *dst = match blend {
                        BlendMode::Replace => src,
                        BlendMode::PremultipliedOver => src.over(*dst),
                    };
                }
            });

        if test_stencil {
            self.clear_stencil();
        }
    }

    /// Premultiplied RGBA8 bytes, row-major.
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.color.iter().flat_map(|c| c.to_rgba8()).collect()
    }

    /// Hash of the exact color bits, for pixel-identity checks.
    pub fn fingerprint(&self) -> u64 {
        let bytes: Vec<u8> = self
            .color
            .iter()
            .flat_map(|c| [c.r, c.g, c.b, c.a])
            .flat_map(f32::to_le_bytes)
            .collect();
        xxh3_64(&bytes)
    }

    /// Write the target as an 8-bit PNG (straight alpha, as PNG expects).
    pub fn save_png(&self, path: &Path) -> OitResult<()> {
        let mut bytes = Vec::with_capacity(self.color.len() * 4);
        for c in &self.color {
            let straight = if c.a > 0.0 {
                PremulRgba::new(c.r / c.a, c.g / c.a, c.b / c.a, c.a)
            } else {
                PremulRgba::TRANSPARENT
            };
            bytes.extend_from_slice(&straight.to_rgba8());
        }
        let img = image::RgbaImage::from_raw(self.resolution.width, self.resolution.height, bytes)
            .ok_or_else(|| OitError::validation("frame buffer size does not match resolution"))?;
        img.save(path)
            .with_context(|| format!("write png '{}'", path.display()))?;
        Ok(())
    }
}

impl std::fmt::Debug for FrameTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameTarget")
            .field("resolution", &self.resolution)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/raster/target.rs"]
mod tests;
