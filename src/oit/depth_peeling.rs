//! Depth peeling.
//!
//! Every geometry pass extracts, per pixel, the nearest fragment strictly behind the one peeled
//! by the previous pass, and blends it front-to-back into an accumulator. The pass count is the
//! scene's depth complexity, measured during the first frame after creation or a resize.

use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::{OitSettings, StorageBitDepth};
use crate::foundation::core::{Fragment, PremulRgba, Resolution, Rgba};
use crate::foundation::error::{OitError, OitResult};
use crate::foundation::sync::{PixelCriticalSection, memory_barrier};
use crate::gpu::allocator::{BufferRequest, ResourceAllocator};
use crate::gpu::buffer::StorageBuffer;
use crate::gpu::tiling::{PixelAddressing, TileAddressing};
use crate::oit::depth_complexity::{DepthComplexityCounter, DepthComplexityStats};
use crate::oit::record::{FragmentRecord, RecordLayout};
use crate::oit::{GatherCounters, GatherStats, OitBackend, OitMethod, run_geometry_pass};
use crate::raster::pass::Scene;
use crate::raster::shader::{FragmentProgram, ShaderId, ShaderVariant};
use crate::raster::state::RenderState;
use crate::raster::target::FrameTarget;

const NOTHING_PEELED: FragmentRecord =
    FragmentRecord { color: Rgba::new(0.0, 0.0, 0.0, 0.0), depth: f32::NEG_INFINITY };
const NO_CANDIDATE: FragmentRecord =
    FragmentRecord { color: Rgba::new(0.0, 0.0, 0.0, 0.0), depth: f32::INFINITY };

pub struct DepthPeeling {
    max_layers: u32,
    tiling: TileAddressing,
    bit_depth: StorageBitDepth,
    stencil_mask: bool,
    shader: ShaderId,
    storage: Option<PeelStorage>,
    /// Passes per frame; `None` until measured.
    layers: Option<u32>,
    complexity: Option<DepthComplexityStats>,
    needs_clear: bool,
    last_stats: GatherStats,
}

struct PeelStorage {
    addressing: PixelAddressing,
    layout: RecordLayout,
    /// Layer peeled by the previous pass.
    peeled: StorageBuffer,
    /// Nearest fragment behind `peeled` seen in the current pass.
    candidate: StorageBuffer,
    /// Premultiplied rgb and transmittance, front-to-back.
    accum: StorageBuffer,
    section: PixelCriticalSection,
    counter: DepthComplexityCounter,
    measuring: AtomicBool,
    counters: GatherCounters,
}

impl DepthPeeling {
    pub fn new() -> Self {
        let defaults = OitSettings::default();
        Self {
            max_layers: defaults.max_peel_layers,
            tiling: defaults.tile_addressing,
            bit_depth: defaults.bit_depth,
            stencil_mask: defaults.stencil_mask,
            shader: ShaderVariant::new("DepthPeelingGather").id(),
            storage: None,
            layers: None,
            complexity: None,
            needs_clear: true,
            last_stats: GatherStats::default(),
        }
    }

    fn variant(&self) -> ShaderVariant {
        ShaderVariant::new("DepthPeelingGather")
            .define("TILING_MODE", self.tiling.define_value())
            .define("STORAGE_BITS", self.bit_depth.bits())
    }

    fn storage(&self) -> OitResult<&PeelStorage> {
        self.storage
            .as_ref()
            .ok_or_else(|| OitError::not_allocated("depth_peeling"))
    }

    /// Passes the last measurement settled on.
    pub fn layers(&self) -> Option<u32> {
        self.layers
    }
}

impl Default for DepthPeeling {
    fn default() -> Self {
        Self::new()
    }
}

impl PeelStorage {
    fn base(&self, pixel: usize) -> usize {
        pixel * self.layout.words()
    }

    fn reset_pixel(&self, pixel: usize) {
        let base = self.base(pixel);
        self.layout.write(&self.peeled, base, &NOTHING_PEELED);
        self.layout.write(&self.candidate, base, &NO_CANDIDATE);
        for c in 0..3 {
            self.accum.store_f32(pixel * 4 + c, 0.0);
        }
        self.accum.store_f32(pixel * 4 + 3, 1.0);
    }

    fn reset_all(&self) {
        (0..self.section.len())
            .into_par_iter()
            .for_each(|pixel| self.reset_pixel(pixel));
    }

    /// Blend this pass's candidates and make them the new peeled layer. Returns pixels peeled.
    fn finish_layer(&self) -> u64 {
        (0..self.section.len())
            .into_par_iter()
            .map(|pixel| {
                let base = self.base(pixel);
                let rec = self.layout.read(&self.candidate, base);
                if rec.depth == f32::INFINITY {
                    return 0;
                }
                let p = rec.premultiplied();
                let a = pixel * 4;
                let t = self.accum.load_f32(a + 3);
                self.accum.store_f32(a, self.accum.load_f32(a) + t * p.r);
                self.accum.store_f32(a + 1, self.accum.load_f32(a + 1) + t * p.g);
                self.accum.store_f32(a + 2, self.accum.load_f32(a + 2) + t * p.b);
                self.accum.store_f32(a + 3, t * (1.0 - p.a));
                self.layout.write(&self.peeled, base, &rec);
                self.layout.write(&self.candidate, base, &NO_CANDIDATE);
                self.counters.stored();
                1
            })
            .sum()
    }

    fn resolve_pixel(&self, pixel: usize) -> Option<PremulRgba> {
        let a = pixel * 4;
        let [r, g, b, t] = std::array::from_fn(|c| self.accum.load_f32(a + c));
        self.reset_pixel(pixel);
        (t < 1.0).then(|| PremulRgba::new(r, g, b, 1.0 - t))
    }
}

impl FragmentProgram for PeelStorage {
    fn invoke(&self, fragment: &Fragment) {
        let pixel = self.addressing.address(fragment.x, fragment.y);
        if self.measuring.load(Ordering::Relaxed) {
            self.counter.count(pixel);
        }
        let rec = self.layout.quantize(FragmentRecord::from_fragment(fragment));
        let base = self.base(pixel);

        let _guard = self.section.enter(pixel);
        let peeled = self.layout.read(&self.peeled, base);
        if !rec.total_cmp(&peeled).is_gt() {
            return;
        }
        let candidate = self.layout.read(&self.candidate, base);
        if rec.total_cmp(&candidate).is_lt() {
            self.layout.write(&self.candidate, base, &rec);
        }
    }
}

impl OitBackend for DepthPeeling {
    fn method(&self) -> OitMethod {
        OitMethod::DepthPeeling
    }

    fn create(&mut self, settings: &OitSettings) -> OitResult<()> {
        self.max_layers = settings.max_peel_layers;
        self.tiling = settings.tile_addressing;
        self.bit_depth = settings.bit_depth;
        self.stencil_mask = settings.stencil_mask;
        self.shader = self.variant().id();
        self.layers = None;
        debug!(shader = %self.variant(), "depth peeling shader selected");
        Ok(())
    }

    fn resolution_changed(
        &mut self,
        resolution: Resolution,
        alloc: &mut ResourceAllocator<'_>,
    ) -> OitResult<()> {
        let addressing = PixelAddressing::new(self.tiling, resolution);
        let layout = RecordLayout::new(self.bit_depth);
        let slots = addressing.slot_count();
        let requests = [
            BufferRequest::new("depth_peeling.peeled", slots * layout.words(), 0),
            BufferRequest::new("depth_peeling.candidate", slots * layout.words(), 0),
            BufferRequest::new("depth_peeling.accum", slots * 4, 0),
            DepthComplexityCounter::request("depth_peeling.complexity", slots),
        ];
        alloc.validate(&requests)?;
        let [peeled, candidate, accum, counts] = requests.map(|r| alloc.allocate(r));
        let next = PeelStorage {
            addressing,
            layout,
            peeled,
            candidate,
            accum,
            section: PixelCriticalSection::new(slots),
            counter: DepthComplexityCounter::new(counts),
            measuring: AtomicBool::new(false),
            counters: GatherCounters::default(),
        };
        if let Some(prev) = self.storage.replace(next) {
            alloc.release(prev.peeled);
            alloc.release(prev.candidate);
            alloc.release(prev.accum);
            prev.counter.release(alloc);
        }
        self.layers = None;
        self.needs_clear = true;
        info!(
            width = resolution.width,
            height = resolution.height,
            "depth peeling storage allocated"
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
            storage.reset_all();
        }
        let measure = self.layers.is_none();
        if measure {
            storage.counter.clear();
        }
        storage.measuring.store(measure, Ordering::Relaxed);
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
        scene: &mut dyn Scene,
        target: &mut FrameTarget,
        state: &mut RenderState,
    ) -> OitResult<()> {
        let storage = self.storage()?;
        let mut peeled = storage.finish_layer();

        let layers = match self.layers {
            Some(layers) => layers,
            None => {
                let stats = storage.counter.stats();
                storage.measuring.store(false, Ordering::Relaxed);
                let layers = stats.max.clamp(1, self.max_layers);
                if stats.max > self.max_layers {
                    info!(
                        complexity = stats.max,
                        cap = self.max_layers,
                        "depth complexity exceeds peel layer cap"
                    );
                }
                debug!(layers, mean = stats.mean, "peel layer count measured");
                self.complexity = Some(stats);
                layers
            }
        };
        let storage = self.storage()?;

        let mut passes = 1;
        *state = RenderState::gather(false);
        while passes < layers && peeled > 0 {
            run_geometry_pass(scene, self.shader, storage, target, state)?;
            peeled = storage.finish_layer();
            passes += 1;
        }

        *state = RenderState::resolve(self.stencil_mask);
        target.resolve_with(state, |x, y| {
            storage.resolve_pixel(storage.addressing.address(x, y))
        });
        let stats = GatherStats {
            geometry_passes: passes,
            max_depth_complexity: self.complexity.map_or(0, |s| s.max),
            ..storage.counters.take()
        };
        self.layers = Some(layers);
        self.last_stats = stats;
        self.needs_clear = false;
        *state = RenderState::default();
        Ok(())
    }

    fn take_stats(&mut self) -> GatherStats {
        std::mem::take(&mut self.last_stats)
    }

    fn depth_complexity(&self) -> Option<DepthComplexityStats> {
        self.complexity
    }

    fn release_resources(&mut self, alloc: &mut ResourceAllocator<'_>) {
        if let Some(storage) = self.storage.take() {
            alloc.release(storage.peeled);
            alloc.release(storage.candidate);
            alloc.release(storage.accum);
            storage.counter.release(alloc);
        }
        self.layers = None;
    }
}

#[cfg(test)]
#[path = "../../tests/unit/oit/depth_peeling.rs"]
mod tests;
