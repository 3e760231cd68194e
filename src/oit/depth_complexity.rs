//! Per-pixel fragment counting.
//!
//! Used on its own as a diagnostic heat map and by depth peeling to size its iteration count.

use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::OitSettings;
use crate::foundation::core::{Fragment, PremulRgba, Resolution};
use crate::foundation::error::{OitError, OitResult};
use crate::foundation::sync::memory_barrier;
use crate::gpu::allocator::{BufferRequest, ResourceAllocator};
use crate::gpu::buffer::StorageBuffer;
use crate::gpu::tiling::{PixelAddressing, TileAddressing};
use crate::oit::{GatherCounters, GatherStats, OitBackend, OitMethod};
use crate::raster::pass::Scene;
use crate::raster::shader::{FragmentProgram, ShaderId, ShaderVariant};
use crate::raster::state::RenderState;
use crate::raster::target::FrameTarget;

/// Summary of one frame's per-pixel fragment counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize)]
pub struct DepthComplexityStats {
    pub max: u32,
    pub total_fragments: u64,
    pub touched_pixels: u64,
    /// Mean fragments per touched pixel.
    pub mean: f32,
}

/// Atomic per-pixel counter.
pub(crate) struct DepthComplexityCounter {
    counts: StorageBuffer,
}

impl DepthComplexityCounter {
    pub(crate) fn request(label: &'static str, slots: usize) -> BufferRequest {
        BufferRequest::new(label, slots, 0)
    }

    pub(crate) fn new(counts: StorageBuffer) -> Self {
        Self { counts }
    }

    pub(crate) fn count(&self, pixel: usize) {
        self.counts.fetch_add(pixel, 1);
    }

    pub(crate) fn load(&self, pixel: usize) -> u32 {
        self.counts.load(pixel)
    }

    /// Read and zero one pixel.
    pub(crate) fn take(&self, pixel: usize) -> u32 {
        self.counts.swap(pixel, 0)
    }

    pub(crate) fn stats(&self) -> DepthComplexityStats {
        let (max, total, touched) = (0..self.counts.len_words())
            .into_par_iter()
            .map(|i| self.counts.load(i))
            .filter(|&c| c > 0)
            .fold(
                || (0u32, 0u64, 0u64),
                |(max, total, touched), c| (max.max(c), total + u64::from(c), touched + 1),
            )
            .reduce(
                || (0, 0, 0),
                |a, b| (a.0.max(b.0), a.1 + b.1, a.2 + b.2),
            );
        DepthComplexityStats {
            max,
            total_fragments: total,
            touched_pixels: touched,
            mean: if touched == 0 {
                0.0
            } else {
                total as f32 / touched as f32
            },
        }
    }

    pub(crate) fn clear(&self) {
        self.counts.fill(0);
    }

    pub(crate) fn release(self, alloc: &mut ResourceAllocator<'_>) {
        alloc.release(self.counts);
    }
}

/// Blue for the fewest fragments, red for `max`.
pub(crate) fn heat_color(count: u32, max: u32) -> PremulRgba {
    let t = if max == 0 {
        0.0
    } else {
        (count as f32 / max as f32).clamp(0.0, 1.0)
    };
    PremulRgba::new(t, 0.0, 1.0 - t, 1.0)
}

pub struct DepthComplexity {
    tiling: TileAddressing,
    stencil_mask: bool,
    shader: ShaderId,
    storage: Option<ComplexityStorage>,
    needs_clear: bool,
    last: Option<DepthComplexityStats>,
}

struct ComplexityStorage {
    addressing: PixelAddressing,
    counter: DepthComplexityCounter,
    counters: GatherCounters,
}

impl DepthComplexity {
    pub fn new() -> Self {
        let defaults = OitSettings::default();
        Self {
            tiling: defaults.tile_addressing,
            stencil_mask: defaults.stencil_mask,
            shader: ShaderVariant::new("DepthComplexityGather").id(),
            storage: None,
            needs_clear: true,
            last: None,
        }
    }

    fn variant(&self) -> ShaderVariant {
        ShaderVariant::new("DepthComplexityGather").define("TILING_MODE", self.tiling.define_value())
    }

    fn storage(&self) -> OitResult<&ComplexityStorage> {
        self.storage
            .as_ref()
            .ok_or_else(|| OitError::not_allocated("depth_complexity"))
    }
}

impl Default for DepthComplexity {
    fn default() -> Self {
        Self::new()
    }
}

impl FragmentProgram for ComplexityStorage {
    fn invoke(&self, fragment: &Fragment) {
        self.counter
            .count(self.addressing.address(fragment.x, fragment.y));
        self.counters.stored();
    }
}

impl OitBackend for DepthComplexity {
    fn method(&self) -> OitMethod {
        OitMethod::DepthComplexity
    }

    fn create(&mut self, settings: &OitSettings) -> OitResult<()> {
        self.tiling = settings.tile_addressing;
        self.stencil_mask = settings.stencil_mask;
        self.shader = self.variant().id();
        debug!(shader = %self.variant(), "depth complexity shader selected");
        Ok(())
    }

    fn resolution_changed(
        &mut self,
        resolution: Resolution,
        alloc: &mut ResourceAllocator<'_>,
    ) -> OitResult<()> {
        let addressing = PixelAddressing::new(self.tiling, resolution);
        let requests = [DepthComplexityCounter::request(
            "depth_complexity.counts",
            addressing.slot_count(),
        )];
        alloc.validate(&requests)?;
        let [counts] = requests.map(|r| alloc.allocate(r));
        let next = ComplexityStorage {
            addressing,
            counter: DepthComplexityCounter::new(counts),
            counters: GatherCounters::default(),
        };
        if let Some(prev) = self.storage.replace(next) {
            prev.counter.release(alloc);
        }
        self.needs_clear = true;
        info!(
            width = resolution.width,
            height = resolution.height,
            "depth complexity counters allocated"
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
            storage.counter.clear();
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
        let stats = storage.counter.stats();
        *state = RenderState::resolve(self.stencil_mask);
        target.resolve_with(state, |x, y| {
            let count = storage.counter.take(storage.addressing.address(x, y));
            (count > 0).then(|| heat_color(count, stats.max))
        });
        debug!(
            max = stats.max,
            mean = stats.mean,
            touched = stats.touched_pixels,
            "depth complexity measured"
        );
        self.last = Some(stats);
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
            max_depth_complexity: self.last.map_or(0, |s| s.max),
            ..storage.counters.take()
        }
    }

    fn depth_complexity(&self) -> Option<DepthComplexityStats> {
        self.last
    }

    fn release_resources(&mut self, alloc: &mut ResourceAllocator<'_>) {
        if let Some(storage) = self.storage.take() {
            storage.counter.release(alloc);
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/oit/depth_complexity.rs"]
mod tests;
