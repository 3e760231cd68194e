//! Fixed-capacity per-pixel fragment arrays.
//!
//! Each pixel owns `capacity` record slots and a counter. Writes happen under the pixel critical
//! section; once the array is full the configured [`OverflowPolicy`] decides which fragments
//! survive. Resolve sorts the survivors and blends them back-to-front.

use smallvec::SmallVec;
use tracing::{debug, info};

use crate::config::{OitSettings, OverflowPolicy, StorageBitDepth};
use crate::foundation::core::{Fragment, PremulRgba, Resolution};
use crate::foundation::error::{OitError, OitResult};
use crate::foundation::sync::{PixelCriticalSection, memory_barrier};
use crate::gpu::allocator::{BufferRequest, ResourceAllocator};
use crate::gpu::buffer::StorageBuffer;
use crate::gpu::tiling::{PixelAddressing, TileAddressing};
use crate::oit::composite::composite_back_to_front;
use crate::oit::record::{FragmentRecord, RecordLayout};
use crate::oit::sort::{SortAlgorithm, farthest_index, sort_records};
use crate::oit::{GatherCounters, GatherStats, OitBackend, OitMethod};
use crate::raster::pass::Scene;
use crate::raster::shader::{FragmentProgram, ShaderId, ShaderVariant};
use crate::raster::state::RenderState;
use crate::raster::target::FrameTarget;

pub struct KBuffer {
    capacity: usize,
    policy: OverflowPolicy,
    sort: SortAlgorithm,
    tiling: TileAddressing,
    bit_depth: StorageBitDepth,
    stencil_mask: bool,
    shader: ShaderId,
    storage: Option<KBufferStorage>,
    needs_clear: bool,
}

struct KBufferStorage {
    addressing: PixelAddressing,
    layout: RecordLayout,
    capacity: usize,
    policy: OverflowPolicy,
    counts: StorageBuffer,
    records: StorageBuffer,
    section: PixelCriticalSection,
    counters: GatherCounters,
}

impl KBuffer {
    pub fn new() -> Self {
        let defaults = OitSettings::default();
        Self {
            capacity: defaults.layer_count as usize,
            policy: defaults.overflow_policy,
            sort: defaults.sort_algorithm,
            tiling: defaults.tile_addressing,
            bit_depth: defaults.bit_depth,
            stencil_mask: defaults.stencil_mask,
            shader: ShaderVariant::new("KBufferGather").id(),
            storage: None,
            needs_clear: true,
        }
    }

    fn variant(&self) -> ShaderVariant {
        ShaderVariant::new("KBufferGather")
            .define("MAX_NUM_NODES", self.capacity)
            .define(
                "OVERFLOW_POLICY",
                match self.policy {
                    OverflowPolicy::ReplaceFarthest => "replace_farthest",
                    OverflowPolicy::RejectNew => "reject_new",
                },
            )
            .define("TILING_MODE", self.tiling.define_value())
            .define("STORAGE_BITS", self.bit_depth.bits())
    }

    fn storage(&self) -> OitResult<&KBufferStorage> {
        self.storage
            .as_ref()
            .ok_or_else(|| OitError::not_allocated("k-buffer"))
    }
}

impl Default for KBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl KBufferStorage {
    fn base(&self, pixel: usize, slot: usize) -> usize {
        (pixel * self.capacity + slot) * self.layout.words()
    }

    fn resolve_pixel(&self, pixel: usize, sort: SortAlgorithm) -> Option<PremulRgba> {
        let count = (self.counts.load(pixel) as usize).min(self.capacity);
        if count == 0 {
            return None;
        }
        let mut local: SmallVec<[FragmentRecord; 16]> = (0..count)
            .map(|slot| self.layout.read(&self.records, self.base(pixel, slot)))
            .collect();
        sort_records(sort, &mut local);
        self.counts.store(pixel, 0);
        Some(composite_back_to_front(&local))
    }

    fn release(self, alloc: &mut ResourceAllocator<'_>) {
        alloc.release(self.counts);
        alloc.release(self.records);
    }
}

impl FragmentProgram for KBufferStorage {
    fn invoke(&self, fragment: &Fragment) {
        let pixel = self.addressing.address(fragment.x, fragment.y);
        let record = self.layout.quantize(FragmentRecord::from_fragment(fragment));

        let _guard = self.section.enter(pixel);
        let count = self.counts.load(pixel) as usize;
        if count < self.capacity {
            self.layout
                .write(&self.records, self.base(pixel, count), &record);
            self.counts.store(pixel, count as u32 + 1);
            self.counters.stored();
            return;
        }

        match self.policy {
            OverflowPolicy::RejectNew => self.counters.discarded(),
            OverflowPolicy::ReplaceFarthest => {
                let stored: SmallVec<[FragmentRecord; 16]> = (0..self.capacity)
                    .map(|slot| self.layout.read(&self.records, self.base(pixel, slot)))
                    .collect();
                if let Some(far) = farthest_index(&stored)
                    && record.total_cmp(&stored[far]).is_lt()
                {
                    self.layout.write(&self.records, self.base(pixel, far), &record);
                    self.counters.stored();
                }
                // either the newcomer or the evicted record is lost
                self.counters.discarded();
            }
        }
    }
}

impl OitBackend for KBuffer {
    fn method(&self) -> OitMethod {
        OitMethod::KBuffer
    }

    fn create(&mut self, settings: &OitSettings) -> OitResult<()> {
        self.capacity = settings.layer_count as usize;
        self.policy = settings.overflow_policy;
        self.sort = settings.sort_algorithm;
        self.tiling = settings.tile_addressing;
        self.bit_depth = settings.bit_depth;
        self.stencil_mask = settings.stencil_mask;
        self.shader = self.variant().id();
        if let Some(storage) = self.storage.as_mut() {
            storage.policy = self.policy;
        }
        debug!(shader = %self.variant(), "k-buffer gather shader selected");
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
            BufferRequest::new("kbuffer.counts", slots, 0),
            BufferRequest::new(
                "kbuffer.records",
                slots * self.capacity * layout.words(),
                0,
            ),
        ];
        alloc.validate(&requests)?;
        let [counts, records] = requests.map(|r| alloc.allocate(r));

        let next = KBufferStorage {
            addressing,
            layout,
            capacity: self.capacity,
            policy: self.policy,
            counts,
            records,
            section: PixelCriticalSection::new(slots),
            counters: GatherCounters::default(),
        };
        if let Some(prev) = self.storage.replace(next) {
            prev.release(alloc);
        }
        self.needs_clear = true;
        info!(
            width = resolution.width,
            height = resolution.height,
            capacity = self.capacity,
            "k-buffer storage allocated"
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
            storage.counts.fill(0);
        }
        // stays set until a resolve has consumed this frame's fragments
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
        let storage = self.storage()?;
        let discarded = storage.counters.discarded_so_far();
        if discarded > 0 {
            debug!(
                discarded,
                capacity = self.capacity,
                "k-buffer overflow handled by policy"
            );
        }
        Ok(())
    }

    fn render_to_screen(
        &mut self,
        _scene: &mut dyn Scene,
        target: &mut FrameTarget,
        state: &mut RenderState,
    ) -> OitResult<()> {
        let storage = self.storage()?;
        let sort = self.sort;
        *state = RenderState::resolve(self.stencil_mask);
        target.resolve_with(state, |x, y| {
            storage.resolve_pixel(storage.addressing.address(x, y), sort)
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
            storage.release(alloc);
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/oit/kbuffer.rs"]
mod tests;
