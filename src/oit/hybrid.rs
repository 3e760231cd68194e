//! Hybrid transparency: the nearest `K` fragments of a pixel are kept exactly, everything behind
//! them is folded into one weighted-average tail layer.

use smallvec::SmallVec;
use tracing::{debug, info};

use crate::config::{OitSettings, StorageBitDepth};
use crate::foundation::core::{Fragment, PremulRgba, Resolution};
use crate::foundation::error::{OitError, OitResult};
use crate::foundation::math::round_to_f16;
use crate::foundation::sync::{PixelCriticalSection, memory_barrier};
use crate::gpu::allocator::{BufferRequest, ResourceAllocator};
use crate::gpu::buffer::StorageBuffer;
use crate::gpu::tiling::{PixelAddressing, TileAddressing};
use crate::oit::record::{FragmentRecord, RecordLayout};
use crate::oit::sort::{SortAlgorithm, farthest_index, sort_records};
use crate::oit::{GatherCounters, GatherStats, OitBackend, OitMethod};
use crate::raster::pass::Scene;
use crate::raster::shader::{FragmentProgram, ShaderId, ShaderVariant};
use crate::raster::state::RenderState;
use crate::raster::target::FrameTarget;

/// count, Σα·r, Σα·g, Σα·b, Σα, Π(1 − α)
const TAIL_WORDS: usize = 6;
const TAIL_TRANSMITTANCE: usize = 5;

pub struct Hybrid {
    head: usize,
    sort_algorithm: SortAlgorithm,
    tiling: TileAddressing,
    bit_depth: StorageBitDepth,
    stencil_mask: bool,
    shader: ShaderId,
    storage: Option<HybridStorage>,
    needs_clear: bool,
}

struct HybridStorage {
    addressing: PixelAddressing,
    layout: RecordLayout,
    half_tail: bool,
    head: usize,
    sort_algorithm: SortAlgorithm,
    counts: StorageBuffer,
    records: StorageBuffer,
    tail: StorageBuffer,
    section: PixelCriticalSection,
    counters: GatherCounters,
}

impl Hybrid {
    pub fn new() -> Self {
        let defaults = OitSettings::default();
        Self {
            head: defaults.layer_count as usize,
            sort_algorithm: defaults.sort_algorithm,
            tiling: defaults.tile_addressing,
            bit_depth: defaults.bit_depth,
            stencil_mask: defaults.stencil_mask,
            shader: ShaderVariant::new("HybridGather").id(),
            storage: None,
            needs_clear: true,
        }
    }

    fn variant(&self) -> ShaderVariant {
        ShaderVariant::new("HybridGather")
            .define("MAX_NUM_NODES", self.head)
            .define("TILING_MODE", self.tiling.define_value())
            .define("STORAGE_BITS", self.bit_depth.bits())
    }

    fn storage(&self) -> OitResult<&HybridStorage> {
        self.storage
            .as_ref()
            .ok_or_else(|| OitError::not_allocated("hybrid"))
    }
}

impl Default for Hybrid {
    fn default() -> Self {
        Self::new()
    }
}

impl HybridStorage {
    fn base(&self, pixel: usize, slot: usize) -> usize {
        (pixel * self.head + slot) * self.layout.words()
    }

    fn read_head(&self, pixel: usize) -> SmallVec<[FragmentRecord; 16]> {
        let count = (self.counts.load(pixel) as usize).min(self.head);
        (0..count)
            .map(|slot| self.layout.read(&self.records, self.base(pixel, slot)))
            .collect()
    }

    fn store_tail(&self, index: usize, value: f32) {
        let value = if self.half_tail {
            round_to_f16(value)
        } else {
            value
        };
        self.tail.store_f32(index, value);
    }

    fn accumulate_tail(&self, pixel: usize, rec: &FragmentRecord) {
        let base = pixel * TAIL_WORDS;
        let a = rec.color.a;
        self.tail.store(base, self.tail.load(base) + 1);
        let weighted = [rec.color.r * a, rec.color.g * a, rec.color.b * a, a];
        for (i, w) in weighted.into_iter().enumerate() {
            self.store_tail(base + 1 + i, self.tail.load_f32(base + 1 + i) + w);
        }
        let t = base + TAIL_TRANSMITTANCE;
        self.store_tail(t, self.tail.load_f32(t) * (1.0 - a));
    }

    fn tail_color(&self, pixel: usize) -> PremulRgba {
        let base = pixel * TAIL_WORDS;
        let sum_a = self.tail.load_f32(base + 4);
        if self.tail.load(base) == 0 || sum_a <= 0.0 {
            return PremulRgba::TRANSPARENT;
        }
        let alpha = 1.0 - self.tail.load_f32(base + TAIL_TRANSMITTANCE);
        let scale = alpha / sum_a;
        PremulRgba::new(
            self.tail.load_f32(base + 1) * scale,
            self.tail.load_f32(base + 2) * scale,
            self.tail.load_f32(base + 3) * scale,
            alpha,
        )
    }

    fn clear_tail(&self, pixel: usize) {
        let base = pixel * TAIL_WORDS;
        for i in 0..TAIL_TRANSMITTANCE {
            self.tail.store(base + i, 0);
        }
        self.tail.store_f32(base + TAIL_TRANSMITTANCE, 1.0);
    }

    fn clear_all(&self) {
        self.counts.fill(0);
        for pixel in 0..self.counts.len_words() {
            self.clear_tail(pixel);
        }
    }

    fn resolve_pixel(&self, pixel: usize) -> Option<PremulRgba> {
        let mut head = self.read_head(pixel);
        let tail = self.tail_color(pixel);
        if head.is_empty() && tail.a <= 0.0 {
            return None;
        }
        sort_records(self.sort_algorithm, &mut head);
        let color = head
            .iter()
            .rev()
            .fold(tail, |acc, r| r.premultiplied().over(acc));
        self.counts.store(pixel, 0);
        self.clear_tail(pixel);
        Some(color)
    }
}

impl FragmentProgram for HybridStorage {
    fn invoke(&self, fragment: &Fragment) {
        let pixel = self.addressing.address(fragment.x, fragment.y);
        let rec = self.layout.quantize(FragmentRecord::from_fragment(fragment));
        let _guard = self.section.enter(pixel);

        let count = self.counts.load(pixel) as usize;
        if count < self.head {
            self.layout.write(&self.records, self.base(pixel, count), &rec);
            self.counts.store(pixel, count as u32 + 1);
            self.counters.stored();
            return;
        }

        let head = self.read_head(pixel);
        let evicted = match farthest_index(&head) {
            Some(far) if rec.total_cmp(&head[far]).is_lt() => {
                self.layout.write(&self.records, self.base(pixel, far), &rec);
                head[far]
            }
            _ => rec,
        };
        self.accumulate_tail(pixel, &evicted);
        self.counters.merged();
    }
}

impl OitBackend for Hybrid {
    fn method(&self) -> OitMethod {
        OitMethod::Hybrid
    }

    fn create(&mut self, settings: &OitSettings) -> OitResult<()> {
        self.head = settings.layer_count as usize;
        self.sort_algorithm = settings.sort_algorithm;
        self.tiling = settings.tile_addressing;
        self.bit_depth = settings.bit_depth;
        self.stencil_mask = settings.stencil_mask;
        self.shader = self.variant().id();
        if let Some(storage) = self.storage.as_mut() {
            storage.sort_algorithm = self.sort_algorithm;
        }
        debug!(shader = %self.variant(), "hybrid gather shader selected");
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
            BufferRequest::new("hybrid.counts", slots, 0),
            BufferRequest::new("hybrid.records", slots * self.head * layout.words(), 0),
            BufferRequest::new("hybrid.tail", slots * TAIL_WORDS, 0),
        ];
        alloc.validate(&requests)?;
        let [counts, records, tail] = requests.map(|r| alloc.allocate(r));
        let next = HybridStorage {
            addressing,
            layout,
            half_tail: self.bit_depth == StorageBitDepth::Bits16,
            head: self.head,
            sort_algorithm: self.sort_algorithm,
            counts,
            records,
            tail,
            section: PixelCriticalSection::new(slots),
            counters: GatherCounters::default(),
        };
        if let Some(prev) = self.storage.replace(next) {
            alloc.release(prev.counts);
            alloc.release(prev.records);
            alloc.release(prev.tail);
        }
        self.needs_clear = true;
        info!(
            width = resolution.width,
            height = resolution.height,
            head = self.head,
            "hybrid storage allocated"
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
            alloc.release(storage.counts);
            alloc.release(storage.records);
            alloc.release(storage.tail);
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/oit/hybrid.rs"]
mod tests;
