//! Pixel → buffer-address remapping.
//!
//! Per-pixel storage can be laid out row-major, in rectangular tiles, or in 8×8 tiles with a
//! Morton (Z-order) curve inside each tile. Tiled layouts pad the buffer dimensions up to whole
//! tiles, so every address computed here is below [`PixelAddressing::slot_count`].

use crate::foundation::core::Resolution;
use crate::foundation::error::{OitError, OitResult};

const MORTON_TILE: u32 = 8;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TileAddressing {
    #[default]
    Linear,
    Tiled {
        tile_width: u32,
        tile_height: u32,
    },
    Morton8x8,
}

impl TileAddressing {
    /// Tile footprint in pixels; `(1, 1)` for linear addressing.
    pub fn tile_size(self) -> (u32, u32) {
        match self {
            Self::Linear => (1, 1),
            Self::Tiled {
                tile_width,
                tile_height,
            } => (tile_width, tile_height),
            Self::Morton8x8 => (MORTON_TILE, MORTON_TILE),
        }
    }

    pub fn validate(self) -> OitResult<()> {
        let (w, h) = self.tile_size();
        for (name, v) in [("tile_width", w), ("tile_height", h)] {
            if !(1..=64).contains(&v) || !v.is_power_of_two() {
                return Err(OitError::config(format!(
                    "{name} must be a power of two in 1..=64, got {v}"
                )));
            }
        }
        Ok(())
    }

    /// Value of the `TILING_MODE` shader define.
    pub(crate) fn define_value(self) -> String {
        match self {
            Self::Linear => "linear".to_owned(),
            Self::Tiled {
                tile_width,
                tile_height,
            } => format!("tiled_{tile_width}x{tile_height}"),
            Self::Morton8x8 => "morton_8x8".to_owned(),
        }
    }
}

/// Address mapping for one resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelAddressing {
    mode: TileAddressing,
    resolution: Resolution,
    padded_width: u32,
    padded_height: u32,
}

impl PixelAddressing {
    pub fn new(mode: TileAddressing, resolution: Resolution) -> Self {
        let (tw, th) = mode.tile_size();
        Self {
            mode,
            resolution,
            padded_width: resolution.width.div_ceil(tw) * tw,
            padded_height: resolution.height.div_ceil(th) * th,
        }
    }

    pub fn mode(&self) -> TileAddressing {
        self.mode
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn padded_size(&self) -> (u32, u32) {
        (self.padded_width, self.padded_height)
    }

    /// Number of per-pixel slots the buffers must hold.
    pub fn slot_count(&self) -> usize {
        (self.padded_width as usize) * (self.padded_height as usize)
    }

    #[inline]
    pub fn address(&self, x: u32, y: u32) -> usize {
        match self.mode {
            TileAddressing::Linear => (y as usize) * (self.padded_width as usize) + x as usize,
            TileAddressing::Tiled {
                tile_width,
                tile_height,
            } => {
                let tiles_x = (self.padded_width / tile_width) as usize;
                let tile = (y / tile_height) as usize * tiles_x + (x / tile_width) as usize;
                let inner = (y % tile_height) * tile_width + (x % tile_width);
                tile * (tile_width * tile_height) as usize + inner as usize
            }
            TileAddressing::Morton8x8 => {
                let tiles_x = (self.padded_width / MORTON_TILE) as usize;
                let tile = (y / MORTON_TILE) as usize * tiles_x + (x / MORTON_TILE) as usize;
                let inner = morton_encode2(x % MORTON_TILE, y % MORTON_TILE);
                tile * (MORTON_TILE * MORTON_TILE) as usize + inner as usize
            }
        }
    }

    /// Inverse of [`PixelAddressing::address`]. Padding slots map to coordinates outside the
    /// resolution.
    pub fn coords(&self, address: usize) -> (u32, u32) {
        match self.mode {
            TileAddressing::Linear => {
                let w = self.padded_width as usize;
                ((address % w) as u32, (address / w) as u32)
            }
            TileAddressing::Tiled {
                tile_width,
                tile_height,
            } => {
                let tiles_x = (self.padded_width / tile_width) as usize;
                let tile_area = (tile_width * tile_height) as usize;
                let (tile, inner) = (address / tile_area, (address % tile_area) as u32);
                let tx = (tile % tiles_x) as u32;
                let ty = (tile / tiles_x) as u32;
                (
                    tx * tile_width + inner % tile_width,
                    ty * tile_height + inner / tile_width,
                )
            }
            TileAddressing::Morton8x8 => {
                let tiles_x = (self.padded_width / MORTON_TILE) as usize;
                let tile_area = (MORTON_TILE * MORTON_TILE) as usize;
                let (tile, inner) = (address / tile_area, (address % tile_area) as u32);
                let (ix, iy) = morton_decode2(inner);
                (
                    (tile % tiles_x) as u32 * MORTON_TILE + ix,
                    (tile / tiles_x) as u32 * MORTON_TILE + iy,
                )
            }
        }
    }
}

/// Interleave the low 8 bits of `x` (even bits) and `y` (odd bits).
fn morton_encode2(x: u32, y: u32) -> u32 {
    let mut code = 0u32;
    for i in 0..8 {
        code |= ((x >> i) & 1) << (i * 2);
        code |= ((y >> i) & 1) << (i * 2 + 1);
    }
    code
}

fn morton_decode2(code: u32) -> (u32, u32) {
    let (mut x, mut y) = (0u32, 0u32);
    for i in 0..8 {
        x |= ((code >> (i * 2)) & 1) << i;
        y |= ((code >> (i * 2 + 1)) & 1) << i;
    }
    (x, y)
}

#[cfg(test)]
#[path = "../../tests/unit/gpu/tiling.rs"]
mod tests;
