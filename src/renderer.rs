use tracing::{debug, error, info, warn};

use crate::config::{OitSettings, SettingChange};
use crate::foundation::core::Resolution;
use crate::foundation::error::{OitError, OitResult};
use crate::foundation::metrics::{MemoryMetrics, MemorySnapshot};
use crate::gpu::allocator::ResourceAllocator;
use crate::gpu::caps::DeviceCaps;
use crate::oit::depth_complexity::DepthComplexityStats;
use crate::oit::{GatherStats, OitBackend, OitMethod, create_backend};
use crate::raster::pass::{GatherPass, PassStats, Scene};
use crate::raster::shader::ShaderId;
use crate::raster::state::RenderState;
use crate::raster::target::FrameTarget;

/// What one [`OitRenderer::render_frame`] call did.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize)]
pub struct FrameReport {
    pub frame_index: u64,
    pub method: OitMethod,
    /// The host-driven gather pass. Extra passes a backend runs itself are counted in
    /// `backend.geometry_passes`.
    pub gather: PassStats,
    pub backend: GatherStats,
    pub complexity: Option<DepthComplexityStats>,
    pub memory: MemorySnapshot,
}

/// Owns the active backend and drives its per-frame lifecycle.
///
/// Switching methods or changing a layout-affecting setting rebuilds storage in place; the host
/// keeps drawing with whatever [`OitRenderer::gather_shader`] reports.
pub struct OitRenderer {
    caps: DeviceCaps,
    settings: OitSettings,
    backend: Box<dyn OitBackend>,
    metrics: MemoryMetrics,
    resolution: Option<Resolution>,
    state: RenderState,
    frame_index: u64,
    totals: PassStats,
}

impl OitRenderer {
    pub fn new(caps: DeviceCaps, settings: OitSettings) -> OitResult<Self> {
        Self::with_metrics(caps, settings, MemoryMetrics::new())
    }

    pub fn with_metrics(
        caps: DeviceCaps,
        settings: OitSettings,
        metrics: MemoryMetrics,
    ) -> OitResult<Self> {
        let backend = create_backend(&settings, &caps).inspect_err(|e| {
            error!(method = settings.method.name(), error = %e, "cannot create oit backend");
        })?;
        Ok(Self {
            caps,
            settings,
            backend,
            metrics,
            resolution: None,
            state: RenderState::default(),
            frame_index: 0,
            totals: PassStats::default(),
        })
    }

    pub fn settings(&self) -> &OitSettings {
        &self.settings
    }

    pub fn method(&self) -> OitMethod {
        self.backend.method()
    }

    pub fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    pub fn metrics(&self) -> &MemoryMetrics {
        &self.metrics
    }

    /// Fixed-function state left behind by the last lifecycle step.
    pub fn render_state(&self) -> RenderState {
        self.state
    }

    /// The shader the scene must draw transparent geometry with.
    pub fn gather_shader(&self) -> ShaderId {
        self.backend.gather_shader()
    }

    /// Gather-pass counters summed over every rendered frame.
    pub fn total_gather_stats(&self) -> PassStats {
        self.totals
    }

    /// Size storage for a `width × height` target, replacing any previous storage.
    #[tracing::instrument(skip(self), fields(method = self.settings.method.name()))]
    pub fn resolution_changed(&mut self, width: u32, height: u32) -> OitResult<()> {
        let resolution = Resolution::new(width, height)?;
        let mut alloc = ResourceAllocator::new(&self.caps, &mut self.metrics);
        self.backend.resolution_changed(resolution, &mut alloc)?;
        self.resolution = Some(resolution);
        info!(
            width,
            height,
            live_bytes = self.metrics.live_bytes(),
            "oit resolution changed"
        );
        Ok(())
    }

    /// Change one setting. Method switches build the new backend before releasing the old one;
    /// on error the renderer keeps running with its previous configuration.
    pub fn apply(&mut self, change: SettingChange) -> OitResult<()> {
        let mut next = self.settings.clone();
        next.apply(change)?;

        if next.method != self.settings.method {
            let mut backend = create_backend(&next, &self.caps)?;
            let mut alloc = ResourceAllocator::new(&self.caps, &mut self.metrics);
            if let Some(resolution) = self.resolution {
                backend.resolution_changed(resolution, &mut alloc)?;
            }
            self.backend.release_resources(&mut alloc);
            self.backend = backend;
            info!(
                from = self.settings.method.name(),
                to = next.method.name(),
                "oit method switched"
            );
        } else {
            self.backend.create(&next)?;
            if change.requires_reallocation()
                && let Some(resolution) = self.resolution
            {
                let mut alloc = ResourceAllocator::new(&self.caps, &mut self.metrics);
                if let Err(e) = self.backend.resolution_changed(resolution, &mut alloc) {
                    warn!(error = %e, "reallocation failed, restoring previous settings");
                    self.backend.create(&self.settings)?;
                    return Err(e);
                }
            }
        }
        self.settings = next;
        Ok(())
    }

    /// Run the full gather/resolve lifecycle for one frame.
    ///
    /// `scene` may be invoked more than once; it must submit the same geometry every time.
    #[tracing::instrument(
        skip_all,
        fields(frame = self.frame_index, method = self.settings.method.name())
    )]
    pub fn render_frame(
        &mut self,
        scene: &mut dyn Scene,
        target: &mut FrameTarget,
    ) -> OitResult<FrameReport> {
        let resolution = self
            .resolution
            .ok_or_else(|| OitError::validation("render_frame called before resolution_changed"))?;
        if target.resolution() != resolution {
            return Err(OitError::validation(format!(
                "target is {}x{}, storage is sized for {}x{}",
                target.resolution().width,
                target.resolution().height,
                resolution.width,
                resolution.height
            )));
        }

        match self.run_frame(scene, target) {
            Ok(report) => {
                debug!(
                    shaded = report.gather.fragments_shaded,
                    stored = report.backend.fragments_stored,
                    discarded = report.backend.fragments_discarded,
                    merged = report.backend.fragments_merged,
                    passes = report.backend.geometry_passes,
                    "frame resolved"
                );
                self.frame_index += 1;
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "frame aborted");
                self.backend.take_stats();
                self.state = RenderState::default();
                Err(e)
            }
        }
    }

    fn run_frame(
        &mut self,
        scene: &mut dyn Scene,
        target: &mut FrameTarget,
    ) -> OitResult<FrameReport> {
        {
            let mut alloc = ResourceAllocator::new(&self.caps, &mut self.metrics);
            self.backend.gather_begin(&mut self.state, &mut alloc)?;
        }

        let gather = {
            let program = self.backend.gather_program()?;
            let mut pass =
                GatherPass::new(self.backend.gather_shader(), program, target, &self.state);
            scene.render(&mut pass)?;
            pass.stats()
        };
        self.totals.accumulate(gather);

        self.backend.gather_end(&mut self.state)?;
        self.backend.render_to_screen(scene, target, &mut self.state)?;

        Ok(FrameReport {
            frame_index: self.frame_index,
            method: self.backend.method(),
            gather,
            backend: self.backend.take_stats(),
            complexity: self.backend.depth_complexity(),
            memory: self.metrics.snapshot(),
        })
    }

    /// Release every storage buffer. The next frame needs a new `resolution_changed`.
    pub fn release_all(&mut self) {
        let mut alloc = ResourceAllocator::new(&self.caps, &mut self.metrics);
        self.backend.release_resources(&mut alloc);
        self.resolution = None;
    }
}

impl Drop for OitRenderer {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
#[path = "../tests/unit/renderer.rs"]
mod tests;
