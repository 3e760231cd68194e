//! Multi-layer alpha blending.
//!
//! Each pixel keeps a short depth-ordered list of layers. When a new fragment does not fit, the
//! two adjacent layers closest in depth are merged with the "over" operator, so memory stays
//! bounded and the error lands where it is least visible.

use smallvec::SmallVec;
use tracing::{debug, info};

use crate::config::{OitSettings, StorageBitDepth};
use crate::foundation::core::{Fragment, PremulRgba, Resolution};
use crate::foundation::error::{OitError, OitResult};
use crate::foundation::sync::{PixelCriticalSection, memory_barrier};
use crate::gpu::allocator::{BufferRequest, ResourceAllocator};
use crate::gpu::buffer::StorageBuffer;
use crate::gpu::tiling::{PixelAddressing, TileAddressing};
use crate::oit::composite::{Layer, composite_front_to_back};
use crate::oit::record::{FragmentRecord, RecordLayout};
use crate::oit::{GatherCounters, GatherStats, OitBackend, OitMethod};
use crate::raster::pass::Scene;
use crate::raster::shader::{FragmentProgram, ShaderId, ShaderVariant};
use crate::raster::state::RenderState;
use crate::raster::target::FrameTarget;

pub(crate) type LayerVec = SmallVec<[Layer; 16]>;

/// Insert `layer` in depth order. Past `capacity`, merge the adjacent pair with the smallest depth
/// gap. Returns `true` when a merge happened.
pub(crate) fn insert_layer(layers: &mut LayerVec, layer: Layer, capacity: usize) -> bool {
    let pos = layers
        .iter()
        .position(|l| l.total_cmp(&layer).is_gt())
        .unwrap_or(layers.len());
    layers.insert(pos, layer);
    if layers.len() <= capacity {
        return false;
    }

    let mut best = 0;
    let mut best_gap = f32::INFINITY;
    for i in 0..layers.len() - 1 {
        let gap = layers[i + 1].depth - layers[i].depth;
        if gap < best_gap {
            best_gap = gap;
            best = i;
        }
    }
    let back = layers.remove(best + 1);
    layers[best] = layers[best].merge(back);
    true
}

/// Fixed-size layer lists in storage, `lists_per_pixel` lists of `capacity` layers per pixel.
pub(crate) struct LayerStore {
    layout: RecordLayout,
    lists_per_pixel: usize,
    capacity: usize,
    counts: StorageBuffer,
    layers: StorageBuffer,
}

impl LayerStore {
    pub(crate) fn requests(
        label_counts: &'static str,
        label_layers: &'static str,
        slots: usize,
        lists_per_pixel: usize,
        capacity: usize,
        layout: RecordLayout,
    ) -> [BufferRequest; 2] {
        [
            BufferRequest::new(label_counts, slots * lists_per_pixel, 0),
            BufferRequest::new(
                label_layers,
                slots * lists_per_pixel * capacity * layout.words(),
                0,
            ),
        ]
    }

    pub(crate) fn new(
        layout: RecordLayout,
        lists_per_pixel: usize,
        capacity: usize,
        counts: StorageBuffer,
        layers: StorageBuffer,
    ) -> Self {
        Self {
            layout,
            lists_per_pixel,
            capacity,
            counts,
            layers,
        }
    }

    pub(crate) fn lists_per_pixel(&self) -> usize {
        self.lists_per_pixel
    }

    fn list(&self, pixel: usize, list: usize) -> usize {
        pixel * self.lists_per_pixel + list
    }

    fn base(&self, list: usize, slot: usize) -> usize {
        (list * self.capacity + slot) * self.layout.words()
    }

    pub(crate) fn read(&self, pixel: usize, list: usize) -> LayerVec {
        let list = self.list(pixel, list);
        let count = (self.counts.load(list) as usize).min(self.capacity);
        (0..count)
            .map(|slot| {
                let (ch, depth) = self.layout.read_channels(&self.layers, self.base(list, slot));
                Layer::from_channels(ch, depth)
            })
            .collect()
    }

    /// Read, insert, write back. Caller holds the pixel critical section.
    pub(crate) fn insert(&self, pixel: usize, list: usize, layer: Layer) -> bool {
        let mut layers = self.read(pixel, list);
        let merged = insert_layer(&mut layers, layer, self.capacity);
        let list = self.list(pixel, list);
        for (slot, l) in layers.iter().enumerate() {
            self.layout
                .write_channels(&self.layers, self.base(list, slot), l.channels(), l.depth);
        }
        self.counts.store(list, layers.len() as u32);
        merged
    }

    pub(crate) fn clear_pixel(&self, pixel: usize) {
        for list in 0..self.lists_per_pixel {
            self.counts.store(self.list(pixel, list), 0);
        }
    }

    pub(crate) fn clear_all(&self) {
        self.counts.fill(0);
    }

    pub(crate) fn release(self, alloc: &mut ResourceAllocator<'_>) {
        alloc.release(self.counts);
        alloc.release(self.layers);
    }
}

pub struct Mlab {
    capacity: usize,
    tiling: TileAddressing,
    bit_depth: StorageBitDepth,
    stencil_mask: bool,
    shader: ShaderId,
    storage: Option<MlabStorage>,
    needs_clear: bool,
}

struct MlabStorage {
    addressing: PixelAddressing,
    layout: RecordLayout,
    store: LayerStore,
    section: PixelCriticalSection,
    counters: GatherCounters,
}

impl Mlab {
    pub fn new() -> Self {
        let defaults = OitSettings::default();
        Self {
            capacity: defaults.layer_count as usize,
            tiling: defaults.tile_addressing,
            bit_depth: defaults.bit_depth,
            stencil_mask: defaults.stencil_mask,
            shader: ShaderVariant::new("MlabGather").id(),
            storage: None,
            needs_clear: true,
        }
    }

    fn variant(&self) -> ShaderVariant {
        ShaderVariant::new("MlabGather")
            .define("MAX_NUM_NODES", self.capacity)
            .define("TILING_MODE", self.tiling.define_value())
            .define("STORAGE_BITS", self.bit_depth.bits())
    }

    fn storage(&self) -> OitResult<&MlabStorage> {
        self.storage
            .as_ref()
            .ok_or_else(|| OitError::not_allocated("mlab"))
    }
}

impl Default for Mlab {
    fn default() -> Self {
        Self::new()
    }
}

impl FragmentProgram for MlabStorage {
    fn invoke(&self, fragment: &Fragment) {
        let pixel = self.addressing.address(fragment.x, fragment.y);
        let layer = Layer::from_record(&self.layout.quantize(FragmentRecord::from_fragment(fragment)));
        let _guard = self.section.enter(pixel);
        if self.store.insert(pixel, 0, layer) {
            self.counters.merged();
        } else {
            self.counters.stored();
        }
    }
}

impl MlabStorage {
    fn resolve_pixel(&self, pixel: usize) -> Option<PremulRgba> {
        let layers = self.store.read(pixel, 0);
        if layers.is_empty() {
            return None;
        }
        self.store.clear_pixel(pixel);
        Some(composite_front_to_back(&layers))
    }
}

impl OitBackend for Mlab {
    fn method(&self) -> OitMethod {
        OitMethod::Mlab
    }

    fn create(&mut self, settings: &OitSettings) -> OitResult<()> {
        self.capacity = settings.layer_count as usize;
        self.tiling = settings.tile_addressing;
        self.bit_depth = settings.bit_depth;
        self.stencil_mask = settings.stencil_mask;
        self.shader = self.variant().id();
        debug!(shader = %self.variant(), "mlab gather shader selected");
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
        let requests = LayerStore::requests(
            "mlab.counts",
            "mlab.layers",
            slots,
            1,
            self.capacity,
            layout,
        );
        alloc.validate(&requests)?;
        let [counts, layers] = requests.map(|r| alloc.allocate(r));
        let next = MlabStorage {
            addressing,
            layout,
            store: LayerStore::new(layout, 1, self.capacity, counts, layers),
            section: PixelCriticalSection::new(slots),
            counters: GatherCounters::default(),
        };
        if let Some(prev) = self.storage.replace(next) {
            prev.store.release(alloc);
        }
        self.needs_clear = true;
        info!(
            width = resolution.width,
            height = resolution.height,
            layers = self.capacity,
            "mlab storage allocated"
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
            storage.store.clear_all();
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
            storage.store.release(alloc);
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/oit/mlab.rs"]
mod tests;
