//! MLAB with the depth range split into buckets.
//!
//! Each bucket is an independent MLAB list over its slice of `[near, far]`, so merges never
//! combine layers from distant parts of the scene.

use tracing::{debug, info};

use crate::config::{DepthRange, OitSettings, StorageBitDepth};
use crate::foundation::core::{Fragment, PremulRgba, Resolution};
use crate::foundation::error::{OitError, OitResult};
use crate::foundation::sync::{PixelCriticalSection, memory_barrier};
use crate::gpu::allocator::ResourceAllocator;
use crate::gpu::tiling::{PixelAddressing, TileAddressing};
use crate::oit::composite::{Layer, composite_front_to_back};
use crate::oit::mlab::{LayerStore, LayerVec};
use crate::oit::record::{FragmentRecord, RecordLayout};
use crate::oit::{GatherCounters, GatherStats, OitBackend, OitMethod};
use crate::raster::pass::Scene;
use crate::raster::shader::{FragmentProgram, ShaderId, ShaderVariant};
use crate::raster::state::RenderState;
use crate::raster::target::FrameTarget;

/// Bucket of `depth` among `buckets` equal slices of `range`.
pub(crate) fn bucket_index(range: &DepthRange, depth: f32, buckets: usize) -> usize {
    let slice = (range.normalize(depth) * buckets as f32).floor() as usize;
    slice.min(buckets - 1)
}

pub struct MlabBucket {
    buckets: usize,
    nodes_per_bucket: usize,
    depth_range: DepthRange,
    tiling: TileAddressing,
    bit_depth: StorageBitDepth,
    stencil_mask: bool,
    shader: ShaderId,
    storage: Option<BucketStorage>,
    needs_clear: bool,
}

struct BucketStorage {
    addressing: PixelAddressing,
    layout: RecordLayout,
    depth_range: DepthRange,
    store: LayerStore,
    section: PixelCriticalSection,
    counters: GatherCounters,
}

impl MlabBucket {
    pub fn new() -> Self {
        let defaults = OitSettings::default();
        Self {
            buckets: defaults.num_buckets as usize,
            nodes_per_bucket: defaults.nodes_per_bucket as usize,
            depth_range: defaults.depth_range,
            tiling: defaults.tile_addressing,
            bit_depth: defaults.bit_depth,
            stencil_mask: defaults.stencil_mask,
            shader: ShaderVariant::new("MlabBucketGather").id(),
            storage: None,
            needs_clear: true,
        }
    }

    fn variant(&self) -> ShaderVariant {
        ShaderVariant::new("MlabBucketGather")
            .define("NUM_BUCKETS", self.buckets)
            .define("NODES_PER_BUCKET", self.nodes_per_bucket)
            .define("TILING_MODE", self.tiling.define_value())
            .define("STORAGE_BITS", self.bit_depth.bits())
    }

    fn storage(&self) -> OitResult<&BucketStorage> {
        self.storage
            .as_ref()
            .ok_or_else(|| OitError::not_allocated("mlab_bucket"))
    }
}

impl Default for MlabBucket {
    fn default() -> Self {
        Self::new()
    }
}

impl FragmentProgram for BucketStorage {
    fn invoke(&self, fragment: &Fragment) {
        let pixel = self.addressing.address(fragment.x, fragment.y);
        let bucket = bucket_index(
            &self.depth_range,
            fragment.depth,
            self.store.lists_per_pixel(),
        );
        let layer = Layer::from_record(&self.layout.quantize(FragmentRecord::from_fragment(fragment)));
        let _guard = self.section.enter(pixel);
        if self.store.insert(pixel, bucket, layer) {
            self.counters.merged();
        } else {
            self.counters.stored();
        }
    }
}

impl BucketStorage {
    fn resolve_pixel(&self, pixel: usize) -> Option<PremulRgba> {
        let layers: LayerVec = (0..self.store.lists_per_pixel())
            .flat_map(|bucket| self.store.read(pixel, bucket))
            .collect();
        if layers.is_empty() {
            return None;
        }
        self.store.clear_pixel(pixel);
        Some(composite_front_to_back(&layers))
    }
}

impl OitBackend for MlabBucket {
    fn method(&self) -> OitMethod {
        OitMethod::MlabBucket
    }

    fn create(&mut self, settings: &OitSettings) -> OitResult<()> {
        self.buckets = settings.num_buckets as usize;
        self.nodes_per_bucket = settings.nodes_per_bucket as usize;
        self.depth_range = settings.depth_range;
        self.tiling = settings.tile_addressing;
        self.bit_depth = settings.bit_depth;
        self.stencil_mask = settings.stencil_mask;
        self.shader = self.variant().id();
        // The range is a uniform, not a layout parameter.
        if let Some(storage) = self.storage.as_mut() {
            storage.depth_range = self.depth_range;
        }
        debug!(shader = %self.variant(), "mlab bucket gather shader selected");
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
            "mlab_bucket.counts",
            "mlab_bucket.layers",
            slots,
            self.buckets,
            self.nodes_per_bucket,
            layout,
        );
        alloc.validate(&requests)?;
        let [counts, layers] = requests.map(|r| alloc.allocate(r));
        let next = BucketStorage {
            addressing,
            layout,
            depth_range: self.depth_range,
            store: LayerStore::new(layout, self.buckets, self.nodes_per_bucket, counts, layers),
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
            buckets = self.buckets,
            nodes_per_bucket = self.nodes_per_bucket,
            "mlab bucket storage allocated"
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
#[path = "../../tests/unit/oit/mlab_bucket.rs"]
mod tests;
