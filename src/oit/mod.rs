//! Order-independent transparency backends.
//!
//! Every backend implements [`OitBackend`], the lifecycle the renderer drives once per frame:
//! `gather_begin`, the scene's gather pass, `gather_end`, then `render_to_screen`. Storage is
//! sized in `resolution_changed` and always replaced wholesale.

pub mod composite;
pub mod depth_complexity;
pub mod depth_peeling;
pub mod hybrid;
pub mod kbuffer;
pub mod linked_list;
pub mod mlab;
pub mod mlab_bucket;
pub mod moments;
pub mod record;
pub mod sort;
pub mod wboit;

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use crate::config::OitSettings;
use crate::foundation::core::Resolution;
use crate::foundation::error::OitResult;
use crate::foundation::sync::memory_barrier;
use crate::gpu::allocator::ResourceAllocator;
use crate::gpu::caps::DeviceCaps;
use crate::raster::pass::{GatherPass, PassStats, Scene};
use crate::raster::shader::{FragmentProgram, ShaderId};
use crate::raster::state::RenderState;
use crate::raster::target::FrameTarget;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OitMethod {
    /// Fixed-capacity per-pixel array.
    #[default]
    KBuffer,
    /// Per-pixel linked lists in a shared fragment pool.
    LinkedList,
    /// Multi-layer alpha blending.
    Mlab,
    /// Multi-layer alpha blending with depth buckets.
    MlabBucket,
    /// Exact head plus one accumulated tail layer.
    Hybrid,
    /// Moment-based OIT.
    Moments,
    /// Weighted blended OIT.
    Wboit,
    DepthPeeling,
    /// Diagnostic per-pixel fragment counter.
    DepthComplexity,
}

impl OitMethod {
    pub const ALL: [Self; 9] = [
        Self::KBuffer,
        Self::LinkedList,
        Self::Mlab,
        Self::MlabBucket,
        Self::Hybrid,
        Self::Moments,
        Self::Wboit,
        Self::DepthPeeling,
        Self::DepthComplexity,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::KBuffer => "k_buffer",
            Self::LinkedList => "linked_list",
            Self::Mlab => "mlab",
            Self::MlabBucket => "mlab_bucket",
            Self::Hybrid => "hybrid",
            Self::Moments => "moments",
            Self::Wboit => "wboit",
            Self::DepthPeeling => "depth_peeling",
            Self::DepthComplexity => "depth_complexity",
        }
    }

    /// Weighted blending only uses single-word blend atomics.
    pub fn requires_pixel_interlock(self) -> bool {
        !matches!(self, Self::Wboit)
    }

    /// Produces the sorted composite exactly while per-pixel capacity is not exceeded.
    pub fn is_exact(self) -> bool {
        matches!(
            self,
            Self::KBuffer
                | Self::LinkedList
                | Self::Mlab
                | Self::MlabBucket
                | Self::Hybrid
                | Self::DepthPeeling
        )
    }
}

/// What a backend did with the fragments of one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct GatherStats {
    pub fragments_stored: u64,
    /// Dropped by an overflow rule (full array, exhausted pool, rejected arrival).
    pub fragments_discarded: u64,
    /// Folded into another layer or a tail accumulator.
    pub fragments_merged: u64,
    /// Cut by the bounded resolve buffer.
    pub fragments_truncated: u64,
    /// Geometry passes run this frame, including the gather pass.
    pub geometry_passes: u32,
    /// Largest per-pixel fragment count seen, for backends that measure it.
    pub max_depth_complexity: u32,
}

/// Atomic counters bumped by fragment programs and resolve passes.
#[derive(Debug, Default)]
pub(crate) struct GatherCounters {
    stored: AtomicU64,
    discarded: AtomicU64,
    merged: AtomicU64,
    truncated: AtomicU64,
}

impl GatherCounters {
    pub(crate) fn stored(&self) {
        self.stored.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn merged(&self) {
        self.merged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn truncated(&self) {
        self.truncated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn discarded_so_far(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Read and reset.
    pub(crate) fn take(&self) -> GatherStats {
        GatherStats {
            fragments_stored: self.stored.swap(0, Ordering::Relaxed),
            fragments_discarded: self.discarded.swap(0, Ordering::Relaxed),
            fragments_merged: self.merged.swap(0, Ordering::Relaxed),
            fragments_truncated: self.truncated.swap(0, Ordering::Relaxed),
            geometry_passes: 0,
            max_depth_complexity: 0,
        }
    }
}

/// Lifecycle shared by all OIT backends.
pub trait OitBackend: Send {
    fn method(&self) -> OitMethod;

    /// (Re)select the gather shader variant and resolve configuration from `settings`.
    ///
    /// Layout-affecting settings take effect at the next `resolution_changed`.
    fn create(&mut self, settings: &OitSettings) -> OitResult<()>;

    /// Build a complete replacement storage set for `resolution`, then release the old one.
    fn resolution_changed(
        &mut self,
        resolution: Resolution,
        alloc: &mut ResourceAllocator<'_>,
    ) -> OitResult<()>;

    /// The only shader the scene may draw with during gather passes.
    fn gather_shader(&self) -> ShaderId;

    fn gather_begin(
        &mut self,
        state: &mut RenderState,
        alloc: &mut ResourceAllocator<'_>,
    ) -> OitResult<()>;

    fn gather_program(&self) -> OitResult<&dyn FragmentProgram>;

    fn gather_end(&mut self, state: &mut RenderState) -> OitResult<()>;

    /// Resolve into `target`. Multi-pass backends render `scene` again from here.
    fn render_to_screen(
        &mut self,
        scene: &mut dyn Scene,
        target: &mut FrameTarget,
        state: &mut RenderState,
    ) -> OitResult<()>;

    /// Statistics of the last frame; resets the counters.
    fn take_stats(&mut self) -> GatherStats;

    /// Per-pixel fragment count summary, for backends that measure it.
    fn depth_complexity(&self) -> Option<depth_complexity::DepthComplexityStats> {
        None
    }

    /// Hand every storage buffer back to the allocator.
    fn release_resources(&mut self, alloc: &mut ResourceAllocator<'_>);
}

/// Create the backend `settings.method` selects.
///
/// Fails with a missing-capability error when the device cannot run it.
pub fn create_backend(
    settings: &OitSettings,
    caps: &DeviceCaps,
) -> OitResult<Box<dyn OitBackend>> {
    caps.check(settings.method)?;
    settings.validate()?;
    let mut backend: Box<dyn OitBackend> = match settings.method {
        OitMethod::KBuffer => Box::new(kbuffer::KBuffer::new()),
        OitMethod::LinkedList => Box::new(linked_list::LinkedList::new()),
        OitMethod::Mlab => Box::new(mlab::Mlab::new()),
        OitMethod::MlabBucket => Box::new(mlab_bucket::MlabBucket::new()),
        OitMethod::Hybrid => Box::new(hybrid::Hybrid::new()),
        OitMethod::Moments => Box::new(moments::Moments::new()),
        OitMethod::Wboit => Box::new(wboit::Wboit::new()),
        OitMethod::DepthPeeling => Box::new(depth_peeling::DepthPeeling::new()),
        OitMethod::DepthComplexity => Box::new(depth_complexity::DepthComplexity::new()),
    };
    backend.create(settings)?;
    info!(method = settings.method.name(), "oit backend created");
    Ok(backend)
}

/// Run one extra geometry pass of `scene` with `program`, followed by a barrier.
pub(crate) fn run_geometry_pass(
    scene: &mut dyn Scene,
    shader: ShaderId,
    program: &dyn FragmentProgram,
    target: &FrameTarget,
    state: &RenderState,
) -> OitResult<PassStats> {
    let mut pass = GatherPass::new(shader, program, target, state);
    scene.render(&mut pass)?;
    let stats = pass.stats();
    memory_barrier();
    Ok(stats)
}
