//! Per-pixel linked lists over one shared fragment pool.
//!
//! A global bump counter hands out pool nodes; each pixel keeps the index of its most recent
//! node. The pool is sized from the expected depth complexity and can grow after a frame that
//! exhausted it. Resolve walks the list into a bounded local buffer that keeps the nearest
//! fragments, sorts it and blends back-to-front.

use rayon::prelude::*;
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::config::{OitSettings, StorageBitDepth};
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

/// Head / next value of an empty list.
pub const END_OF_LIST: u32 = u32::MAX;

pub struct LinkedList {
    expected_depth_complexity: u32,
    grow_on_overflow: bool,
    max_fragments_sorting: usize,
    sort: SortAlgorithm,
    tiling: TileAddressing,
    bit_depth: StorageBitDepth,
    stencil_mask: bool,
    shader: ShaderId,
    storage: Option<ListStorage>,
    resolution: Option<Resolution>,
    /// Nodes per pixel requested by the last exhausted frame.
    pending_growth: Option<u32>,
    needs_clear: bool,
    max_list_length: u32,
}

struct ListStorage {
    addressing: PixelAddressing,
    layout: RecordLayout,
    pool_nodes: u32,
    heads: StorageBuffer,
    counts: StorageBuffer,
    pool: StorageBuffer,
    next_free: StorageBuffer,
    section: PixelCriticalSection,
    counters: GatherCounters,
}

impl LinkedList {
    pub fn new() -> Self {
        let defaults = OitSettings::default();
        Self {
            expected_depth_complexity: defaults.expected_depth_complexity,
            grow_on_overflow: defaults.grow_pool_on_overflow,
            max_fragments_sorting: defaults.max_fragments_sorting as usize,
            sort: defaults.sort_algorithm,
            tiling: defaults.tile_addressing,
            bit_depth: defaults.bit_depth,
            stencil_mask: defaults.stencil_mask,
            shader: ShaderVariant::new("LinkedListGather").id(),
            storage: None,
            resolution: None,
            pending_growth: None,
            needs_clear: true,
            max_list_length: 0,
        }
    }

    fn variant(&self) -> ShaderVariant {
        ShaderVariant::new("LinkedListGather")
            .define("TILING_MODE", self.tiling.define_value())
            .define("STORAGE_BITS", self.bit_depth.bits())
    }

    fn storage(&self) -> OitResult<&ListStorage> {
        self.storage
            .as_ref()
            .ok_or_else(|| OitError::not_allocated("linked list"))
    }

    /// Pool nodes currently allocated, 0 before the first resolution.
    pub fn pool_nodes(&self) -> u32 {
        self.storage.as_ref().map_or(0, |s| s.pool_nodes)
    }

    fn build_storage(
        &self,
        resolution: Resolution,
        alloc: &mut ResourceAllocator<'_>,
    ) -> OitResult<ListStorage> {
        let addressing = PixelAddressing::new(self.tiling, resolution);
        let layout = RecordLayout::new(self.bit_depth);
        let slots = addressing.slot_count();
        let pool_nodes = u32::try_from(
            slots.saturating_mul(self.expected_depth_complexity as usize),
        )
        .unwrap_or(END_OF_LIST - 1)
        .min(END_OF_LIST - 1);
        let requests = [
            BufferRequest::new("linked_list.heads", slots, END_OF_LIST),
            BufferRequest::new("linked_list.counts", slots, 0),
            BufferRequest::new(
                "linked_list.pool",
                pool_nodes as usize * (layout.words() + 1),
                0,
            ),
            BufferRequest::new("linked_list.next_free", 1, 0),
        ];
        alloc.validate(&requests)?;
        let [heads, counts, pool, next_free] = requests.map(|r| alloc.allocate(r));
        Ok(ListStorage {
            addressing,
            layout,
            pool_nodes,
            heads,
            counts,
            pool,
            next_free,
            section: PixelCriticalSection::new(slots),
            counters: GatherCounters::default(),
        })
    }

    fn install(&mut self, next: ListStorage, alloc: &mut ResourceAllocator<'_>) {
        if let Some(prev) = self.storage.replace(next) {
            prev.release(alloc);
        }
        self.needs_clear = true;
    }
}

impl Default for LinkedList {
    fn default() -> Self {
        Self::new()
    }
}

impl ListStorage {
    fn node_words(&self) -> usize {
        self.layout.words() + 1
    }

    fn node_base(&self, node: u32) -> usize {
        node as usize * self.node_words()
    }

    fn next_of(&self, node: u32) -> u32 {
        self.pool.load(self.node_base(node) + self.layout.words())
    }

    /// Total nodes requested this frame, including the ones that did not fit.
    fn requested_nodes(&self) -> u32 {
        self.next_free.load(0)
    }

    fn resolve_pixel(
        &self,
        pixel: usize,
        cap: usize,
        sort: SortAlgorithm,
    ) -> Option<PremulRgba> {
        let mut node = self.heads.load(pixel);
        if node == END_OF_LIST {
            return None;
        }
        let mut local: SmallVec<[FragmentRecord; 32]> = SmallVec::new();
        let mut steps = 0u32;
        while node != END_OF_LIST && node < self.pool_nodes && steps < self.pool_nodes {
            let record = self.layout.read(&self.pool, self.node_base(node));
            if local.len() < cap {
                local.push(record);
            } else {
                // bounded buffer keeps the nearest `cap` fragments
                if let Some(far) = farthest_index(&local)
                    && record.total_cmp(&local[far]).is_lt()
                {
                    local[far] = record;
                }
                self.counters.truncated();
            }
            node = self.next_of(node);
            steps += 1;
        }
        self.heads.store(pixel, END_OF_LIST);
        self.counts.store(pixel, 0);
        sort_records(sort, &mut local);
        Some(composite_back_to_front(&local))
    }

    fn max_count(&self) -> u32 {
        (0..self.addressing.slot_count())
            .into_par_iter()
            .map(|p| self.counts.load(p))
            .max()
            .unwrap_or(0)
    }

    fn release(self, alloc: &mut ResourceAllocator<'_>) {
        alloc.release(self.heads);
        alloc.release(self.counts);
        alloc.release(self.pool);
        alloc.release(self.next_free);
    }
}

impl FragmentProgram for ListStorage {
    fn invoke(&self, fragment: &Fragment) {
        let node = self.next_free.fetch_add(0, 1);
        if node >= self.pool_nodes {
            self.counters.discarded();
            return;
        }
        let pixel = self.addressing.address(fragment.x, fragment.y);
        let base = self.node_base(node);
        self.layout
            .write(&self.pool, base, &FragmentRecord::from_fragment(fragment));

        let _guard = self.section.enter(pixel);
        let prev = self.heads.swap(pixel, node);
        self.pool.store(base + self.layout.words(), prev);
        self.counts.store(pixel, self.counts.load(pixel) + 1);
        self.counters.stored();
    }
}

impl OitBackend for LinkedList {
    fn method(&self) -> OitMethod {
        OitMethod::LinkedList
    }

    fn create(&mut self, settings: &OitSettings) -> OitResult<()> {
        self.expected_depth_complexity = settings.expected_depth_complexity;
        self.grow_on_overflow = settings.grow_pool_on_overflow;
        self.max_fragments_sorting = settings.max_fragments_sorting as usize;
        self.sort = settings.sort_algorithm;
        self.tiling = settings.tile_addressing;
        self.bit_depth = settings.bit_depth;
        self.stencil_mask = settings.stencil_mask;
        self.shader = self.variant().id();
        self.pending_growth = None;
        debug!(shader = %self.variant(), "linked-list gather shader selected");
        Ok(())
    }

    fn resolution_changed(
        &mut self,
        resolution: Resolution,
        alloc: &mut ResourceAllocator<'_>,
    ) -> OitResult<()> {
        let next = self.build_storage(resolution, alloc)?;
        let pool_nodes = next.pool_nodes;
        self.install(next, alloc);
        self.resolution = Some(resolution);
        info!(
            width = resolution.width,
            height = resolution.height,
            pool_nodes,
            "linked-list storage allocated"
        );
        Ok(())
    }

    fn gather_shader(&self) -> ShaderId {
        self.shader
    }

    fn gather_begin(
        &mut self,
        state: &mut RenderState,
        alloc: &mut ResourceAllocator<'_>,
    ) -> OitResult<()> {
        if let (Some(per_pixel), Some(resolution)) = (self.pending_growth.take(), self.resolution)
        {
            let previous = self.expected_depth_complexity;
            self.expected_depth_complexity = per_pixel;
            match self.build_storage(resolution, alloc) {
                Ok(next) => {
                    info!(
                        from = previous,
                        to = per_pixel,
                        pool_nodes = next.pool_nodes,
                        "linked-list pool grown"
                    );
                    self.install(next, alloc);
                }
                Err(err) => {
                    self.expected_depth_complexity = previous;
                    warn!(error = %err, "linked-list pool growth failed, keeping current pool");
                }
            }
        }

        let storage = self.storage()?;
        if self.needs_clear {
            storage.heads.fill(END_OF_LIST);
            storage.counts.fill(0);
        }
        storage.next_free.store(0, 0);
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
        let requested = storage.requested_nodes();
        let pool_nodes = storage.pool_nodes;
        let slots = storage.addressing.slot_count();
        self.max_list_length = storage.max_count();

        if requested > pool_nodes {
            warn!(
                requested,
                pool_nodes,
                dropped = requested - pool_nodes,
                "linked-list fragment pool exhausted"
            );
            if self.grow_on_overflow {
                let per_pixel = (requested as usize).div_ceil(slots.max(1)) as u32;
                self.pending_growth = Some(per_pixel.max(self.expected_depth_complexity + 1));
            }
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
        let (cap, sort) = (self.max_fragments_sorting, self.sort);
        *state = RenderState::resolve(self.stencil_mask);
        target.resolve_with(state, |x, y| {
            storage.resolve_pixel(storage.addressing.address(x, y), cap, sort)
        });
        self.needs_clear = false;
        *state = RenderState::default();
        Ok(())
    }

    fn take_stats(&mut self) -> GatherStats {
        let Some(storage) = self.storage.as_ref() else {
            return GatherStats::default();
        };
        let stats = storage.counters.take();
        if stats.fragments_truncated > 0 {
            warn!(
                truncated = stats.fragments_truncated,
                cap = self.max_fragments_sorting,
                "fragments beyond the sort buffer were dropped"
            );
        }
        GatherStats {
            geometry_passes: 1,
            max_depth_complexity: self.max_list_length,
            ..stats
        }
    }

    fn release_resources(&mut self, alloc: &mut ResourceAllocator<'_>) {
        if let Some(storage) = self.storage.take() {
            storage.release(alloc);
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/oit/linked_list.rs"]
mod tests;
