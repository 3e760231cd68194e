//! Weighted blended OIT.
//!
//! Fragments are never stored. Every fragment adds its depth-weighted color to an accumulator and
//! attenuates the revealage, both through single-word atomic read-modify-write, so this is the
//! one backend that runs without the pixel critical section.

use tracing::{debug, info};

use crate::config::{DepthRange, OitSettings, StorageBitDepth, WboitWeight};
use crate::foundation::core::{Fragment, PremulRgba, Resolution};
use crate::foundation::error::{OitError, OitResult};
use crate::foundation::math::round_to_f16;
use crate::foundation::sync::memory_barrier;
use crate::gpu::allocator::{BufferRequest, ResourceAllocator};
use crate::gpu::buffer::StorageBuffer;
use crate::gpu::tiling::{PixelAddressing, TileAddressing};
use crate::oit::{GatherCounters, GatherStats, OitBackend, OitMethod};
use crate::raster::pass::Scene;
use crate::raster::shader::{FragmentProgram, ShaderId, ShaderVariant};
use crate::raster::state::RenderState;
use crate::raster::target::FrameTarget;

const MIN_WEIGHT: f32 = 1e-2;
const MAX_WEIGHT: f32 = 3e3;
/// Revealage this close to one means nothing was drawn.
const OPAQUE_EPSILON: f32 = 1e-5;

impl WboitWeight {
    /// Depth falloff `f(z)`; the fragment weight is `α · f(z)`.
    pub fn depth_factor(self, depth: f32, range: &DepthRange) -> f32 {
        let z = depth.abs();
        let f = match self {
            Self::Eq7 => 10.0 / (1e-5 + (z / 5.0).powi(2) + (z / 200.0).powi(6)),
            Self::Eq8 => 10.0 / (1e-5 + (z / 10.0).powi(3) + (z / 200.0).powi(6)),
            Self::Eq9 => 0.03 / (1e-5 + (z / 200.0).powi(4)),
            Self::Eq10 => {
                let z = z.max(range.near);
                let d = range.far * (z - range.near) / (z * (range.far - range.near));
                3e3 * (1.0 - d.clamp(0.0, 1.0)).powi(3)
            }
        };
        f.clamp(MIN_WEIGHT, MAX_WEIGHT)
    }

    fn define_value(self) -> &'static str {
        match self {
            Self::Eq7 => "7",
            Self::Eq8 => "8",
            Self::Eq9 => "9",
            Self::Eq10 => "10",
        }
    }
}

pub struct Wboit {
    weight: WboitWeight,
    depth_range: DepthRange,
    tiling: TileAddressing,
    bit_depth: StorageBitDepth,
    stencil_mask: bool,
    shader: ShaderId,
    storage: Option<WboitStorage>,
    needs_clear: bool,
}

struct WboitStorage {
    addressing: PixelAddressing,
    weight: WboitWeight,
    depth_range: DepthRange,
    half: bool,
    accum: StorageBuffer,
    revealage: StorageBuffer,
    counters: GatherCounters,
}

impl Wboit {
    pub fn new() -> Self {
        let defaults = OitSettings::default();
        Self {
            weight: defaults.wboit_weight,
            depth_range: defaults.depth_range,
            tiling: defaults.tile_addressing,
            bit_depth: defaults.bit_depth,
            stencil_mask: defaults.stencil_mask,
            shader: ShaderVariant::new("WboitGather").id(),
            storage: None,
            needs_clear: true,
        }
    }

    fn variant(&self) -> ShaderVariant {
        ShaderVariant::new("WboitGather")
            .define("WEIGHT_FUNCTION", self.weight.define_value())
            .define("TILING_MODE", self.tiling.define_value())
            .define("STORAGE_BITS", self.bit_depth.bits())
    }

    fn storage(&self) -> OitResult<&WboitStorage> {
        self.storage
            .as_ref()
            .ok_or_else(|| OitError::not_allocated("wboit"))
    }
}

impl Default for Wboit {
    fn default() -> Self {
        Self::new()
    }
}

impl WboitStorage {
    fn round(&self, v: f32) -> f32 {
        if self.half {
            round_to_f16(v)
        } else {
            v
        }
    }

    fn clear_pixel(&self, pixel: usize) {
        for c in 0..4 {
            self.accum.store_f32(pixel * 4 + c, 0.0);
        }
        self.revealage.store_f32(pixel, 1.0);
    }

    fn clear_all(&self) {
        self.accum.fill(0);
        self.revealage.fill(1.0f32.to_bits());
    }

    fn resolve_pixel(&self, pixel: usize) -> Option<PremulRgba> {
        let revealage = self.revealage.load_f32(pixel);
        let base = pixel * 4;
        if (1.0 - revealage).abs() < OPAQUE_EPSILON {
            // faint fragments still leave state behind
            if revealage != 1.0 || self.accum.load_f32(base + 3) != 0.0 {
                self.clear_pixel(pixel);
            }
            return None;
        }
        let [r, g, b, weight] = std::array::from_fn(|c| self.accum.load_f32(base + c));
        self.clear_pixel(pixel);
        let coverage = 1.0 - revealage;
        let scale = coverage / weight.max(1e-5);
        Some(PremulRgba::new(r * scale, g * scale, b * scale, coverage))
    }
}

impl FragmentProgram for WboitStorage {
    fn invoke(&self, fragment: &Fragment) {
        let pixel = self.addressing.address(fragment.x, fragment.y);
        let c = fragment.color;
        let w = c.a * self.weight.depth_factor(fragment.depth, &self.depth_range);
        let base = pixel * 4;
        self.accum.update_f32(base, |v| self.round(v + w * c.a * c.r));
        self.accum.update_f32(base + 1, |v| self.round(v + w * c.a * c.g));
        self.accum.update_f32(base + 2, |v| self.round(v + w * c.a * c.b));
        self.accum.update_f32(base + 3, |v| self.round(v + w * c.a));
        self.revealage
            .update_f32(pixel, |v| self.round(v * (1.0 - c.a)));
        self.counters.merged();
    }
}

impl OitBackend for Wboit {
    fn method(&self) -> OitMethod {
        OitMethod::Wboit
    }

    fn create(&mut self, settings: &OitSettings) -> OitResult<()> {
        self.weight = settings.wboit_weight;
        self.depth_range = settings.depth_range;
        self.tiling = settings.tile_addressing;
        self.bit_depth = settings.bit_depth;
        self.stencil_mask = settings.stencil_mask;
        self.shader = self.variant().id();
        if let Some(storage) = self.storage.as_mut() {
            storage.weight = self.weight;
            storage.depth_range = self.depth_range;
        }
        debug!(shader = %self.variant(), "wboit gather shader selected");
        Ok(())
    }

    fn resolution_changed(
        &mut self,
        resolution: Resolution,
        alloc: &mut ResourceAllocator<'_>,
    ) -> OitResult<()> {
        let addressing = PixelAddressing::new(self.tiling, resolution);
        let slots = addressing.slot_count();
        let requests = [
            BufferRequest::new("wboit.accum", slots * 4, 0),
            BufferRequest::new("wboit.revealage", slots, 1.0f32.to_bits()),
        ];
        alloc.validate(&requests)?;
        let [accum, revealage] = requests.map(|r| alloc.allocate(r));
        let next = WboitStorage {
            addressing,
            weight: self.weight,
            depth_range: self.depth_range,
            half: self.bit_depth == StorageBitDepth::Bits16,
            accum,
            revealage,
            counters: GatherCounters::default(),
        };
        if let Some(prev) = self.storage.replace(next) {
            alloc.release(prev.accum);
            alloc.release(prev.revealage);
        }
        self.needs_clear = true;
        info!(
            width = resolution.width,
            height = resolution.height,
            "wboit storage allocated"
        );
        Ok(())
    }

    fn gather_shader(&self) -> ShaderId {
        self.shader
    }

    fn gather_begin(
        &mut self,
        state: &mut RenderState,
        _alloc: &mut ResourceAllocator<'_>,
    ) -> OitResult<()> {
        let storage = self.storage()?;
        if self.needs_clear {
            storage.clear_all();
        }
        self.needs_clear = true;
        *state = RenderState::gather(self.stencil_mask);
        memory_barrier();
        Ok(())
    }

    fn gather_program(&self) -> OitResult<&dyn FragmentProgram> {
        let program: &dyn FragmentProgram = self.storage()?;
        Ok(program)
    }

    fn gather_end(&mut self, _state: &mut RenderState) -> OitResult<()> {
        memory_barrier();
        Ok(())
    }

    fn render_to_screen(
        &mut self,
        _scene: &mut dyn Scene,
        target: &mut FrameTarget,
        state: &mut RenderState,
    ) -> OitResult<()> {
        let storage = self.storage()?;
        *state = RenderState::resolve(self.stencil_mask);
        target.resolve_with(state, |x, y| {
            storage.resolve_pixel(storage.addressing.address(x, y))
        });
        self.needs_clear = false;
        *state = RenderState::default();
        Ok(())
    }

    fn take_stats(&mut self) -> GatherStats {
        let Some(storage) = self.storage.as_ref() else {
            return GatherStats::default();
        };
        GatherStats {
            geometry_passes: 1,
            ..storage.counters.take()
        }
    }

    fn release_resources(&mut self, alloc: &mut ResourceAllocator<'_>) {
        if let Some(storage) = self.storage.take() {
            alloc.release(storage.accum);
            alloc.release(storage.revealage);
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/oit/wboit.rs"]
mod tests;
