//! Moment-based OIT.
//!
//! Two geometry passes. The gather pass sums per-pixel absorbance moments of the warped fragment
//! depths. The second pass, run from `render_to_screen`, reconstructs each fragment's
//! transmittance from those moments and accumulates the weighted colors; the resolve then
//! normalizes them by the total coverage `1 − exp(−b0)`.

mod bias;
mod complex;
pub(crate) mod math;

use tracing::{debug, info};

use crate::config::{DepthRange, MomentBasis, MomentCount, OitSettings, StorageBitDepth};
use crate::foundation::core::{Fragment, PremulRgba, Resolution};
use crate::foundation::error::{OitError, OitResult};
use crate::foundation::math::round_to_f16;
use crate::foundation::sync::{PixelCriticalSection, memory_barrier};
use crate::gpu::allocator::{BufferRequest, ResourceAllocator};
use crate::gpu::buffer::StorageBuffer;
use crate::gpu::tiling::{PixelAddressing, TileAddressing};
use crate::oit::{GatherCounters, GatherStats, OitBackend, OitMethod, run_geometry_pass};
use crate::raster::pass::Scene;
use crate::raster::shader::{FragmentProgram, ShaderId, ShaderVariant};
use crate::raster::state::RenderState;
use crate::raster::target::FrameTarget;

use self::math::{MIN_TOTAL_ABSORBANCE, Reconstruction, absorbance, moment_terms, warp_depth};

pub struct Moments {
    count: MomentCount,
    basis: MomentBasis,
    overestimation: f32,
    depth_range: DepthRange,
    tiling: TileAddressing,
    bit_depth: StorageBitDepth,
    stencil_mask: bool,
    gather_shader: ShaderId,
    resolve_shader: ShaderId,
    storage: Option<MomentStorage>,
    needs_clear: bool,
    last_stats: GatherStats,
}

struct MomentStorage {
    addressing: PixelAddressing,
    count: MomentCount,
    basis: MomentBasis,
    half: bool,
    depth_range: DepthRange,
    reconstruction: Reconstruction,
    b0: StorageBuffer,
    moments: StorageBuffer,
    accum: StorageBuffer,
    section: PixelCriticalSection,
    counters: GatherCounters,
}

/// Second-pass program: transmittance-weighted color accumulation.
struct ResolveWeighting<'a> {
    storage: &'a MomentStorage,
}

impl Moments {
    pub fn new() -> Self {
        let defaults = OitSettings::default();
        Self {
            count: defaults.moment_count,
            basis: defaults.moment_basis,
            overestimation: defaults.moment_overestimation,
            depth_range: defaults.depth_range,
            tiling: defaults.tile_addressing,
            bit_depth: defaults.bit_depth,
            stencil_mask: defaults.stencil_mask,
            gather_shader: ShaderVariant::new("MboitGather").id(),
            resolve_shader: ShaderVariant::new("MboitResolveWeighting").id(),
            storage: None,
            needs_clear: true,
            last_stats: GatherStats::default(),
        }
    }

    fn variant(&self, name: &'static str) -> ShaderVariant {
        ShaderVariant::new(name)
            .define("NUM_MOMENTS", self.count.get())
            .define(
                "MOMENT_BASIS",
                match self.basis {
                    MomentBasis::Power => "POWER",
                    MomentBasis::Trigonometric => "TRIGONOMETRIC",
                },
            )
            .define("TILING_MODE", self.tiling.define_value())
            .define("STORAGE_BITS", self.bit_depth.bits())
    }

    fn reconstruction(&self, count: MomentCount, bits: StorageBitDepth) -> Reconstruction {
        Reconstruction::new(count, self.basis, bits, self.overestimation)
    }

    fn storage(&self) -> OitResult<&MomentStorage> {
        self.storage
            .as_ref()
            .ok_or_else(|| OitError::not_allocated("moments"))
    }
}

impl Default for Moments {
    fn default() -> Self {
        Self::new()
    }
}

impl MomentStorage {
    fn n(&self) -> usize {
        self.count.get()
    }

    fn store(&self, buf: &StorageBuffer, index: usize, value: f32) {
        let value = if self.half {
            round_to_f16(value)
        } else {
            value
        };
        buf.store_f32(index, value);
    }

    fn clear_pixel(&self, pixel: usize) {
        self.b0.store_f32(pixel, 0.0);
        let n = self.n();
        for k in 0..n {
            self.moments.store_f32(pixel * n + k, 0.0);
        }
        for c in 0..4 {
            self.accum.store_f32(pixel * 4 + c, 0.0);
        }
    }

    fn clear_all(&self) {
        self.b0.fill(0);
        self.moments.fill(0);
        self.accum.fill(0);
    }

    fn resolve_pixel(&self, pixel: usize) -> Option<PremulRgba> {
        let b0 = self.b0.load_f32(pixel);
        if b0 < MIN_TOTAL_ABSORBANCE {
            if b0 != 0.0 {
                self.clear_pixel(pixel);
            }
            return None;
        }
        let base = pixel * 4;
        let [r, g, b, weight] = std::array::from_fn(|c| self.accum.load_f32(base + c));
        self.clear_pixel(pixel);
        if weight <= 0.0 {
            return None;
        }
        let coverage = 1.0 - (-b0).exp();
        let scale = coverage / weight;
        Some(PremulRgba::new(r * scale, g * scale, b * scale, coverage))
    }
}

impl FragmentProgram for MomentStorage {
    fn invoke(&self, fragment: &Fragment) {
        let a = absorbance(fragment.color.a);
        if a <= 0.0 {
            self.counters.discarded();
            return;
        }
        let pixel = self.addressing.address(fragment.x, fragment.y);
        let z = warp_depth(fragment.depth, &self.depth_range);
        let terms = moment_terms(self.basis, self.count, z);
        let n = self.n();

        let _guard = self.section.enter(pixel);
        self.store(&self.b0, pixel, self.b0.load_f32(pixel) + a);
        for (k, t) in terms.iter().take(n).enumerate() {
            let i = pixel * n + k;
            self.store(&self.moments, i, self.moments.load_f32(i) + a * t);
        }
        self.counters.stored();
    }
}

impl FragmentProgram for ResolveWeighting<'_> {
    fn invoke(&self, fragment: &Fragment) {
        let s = self.storage;
        let pixel = s.addressing.address(fragment.x, fragment.y);
        let b0 = s.b0.load_f32(pixel);
        if b0 < MIN_TOTAL_ABSORBANCE {
            return;
        }
        let n = s.n();
        let mut moments = [0.0f32; 8];
        for (k, m) in moments.iter_mut().take(n).enumerate() {
            *m = s.moments.load_f32(pixel * n + k);
        }
        let z = warp_depth(fragment.depth, &s.depth_range);
        let t = s.reconstruction.transmittance(b0, &moments[..n], z);

        let c = fragment.color;
        let w = t * c.a;
        let base = pixel * 4;
        s.accum.update_f32(base, |v| v + w * c.r);
        s.accum.update_f32(base + 1, |v| v + w * c.g);
        s.accum.update_f32(base + 2, |v| v + w * c.b);
        s.accum.update_f32(base + 3, |v| v + w);
    }
}

impl OitBackend for Moments {
    fn method(&self) -> OitMethod {
        OitMethod::Moments
    }

    fn create(&mut self, settings: &OitSettings) -> OitResult<()> {
        self.count = settings.moment_count;
        self.basis = settings.moment_basis;
        self.overestimation = settings.moment_overestimation;
        self.depth_range = settings.depth_range;
        self.tiling = settings.tile_addressing;
        self.bit_depth = settings.bit_depth;
        self.stencil_mask = settings.stencil_mask;
        self.gather_shader = self.variant("MboitGather").id();
        self.resolve_shader = self.variant("MboitResolveWeighting").id();

        // Uniform-only changes reach existing storage directly; its count and precision stay
        // until the next reallocation.
        let (basis, range) = (self.basis, self.depth_range);
        if let Some((count, half)) = self.storage.as_ref().map(|s| (s.count, s.half)) {
            let bits = if half {
                StorageBitDepth::Bits16
            } else {
                StorageBitDepth::Bits32
            };
            let reconstruction = self.reconstruction(count, bits);
            if let Some(storage) = self.storage.as_mut() {
                storage.basis = basis;
                storage.depth_range = range;
                storage.reconstruction = reconstruction;
            }
            self.needs_clear = true;
        }
        debug!(shader = %self.variant("MboitGather"), "moment gather shader selected");
        Ok(())
    }

    fn resolution_changed(
        &mut self,
        resolution: Resolution,
        alloc: &mut ResourceAllocator<'_>,
    ) -> OitResult<()> {
        let addressing = PixelAddressing::new(self.tiling, resolution);
        let slots = addressing.slot_count();
        let n = self.count.get();
        let requests = [
            BufferRequest::new("moments.b0", slots, 0),
            BufferRequest::new("moments.moments", slots * n, 0),
            BufferRequest::new("moments.accum", slots * 4, 0),
        ];
        alloc.validate(&requests)?;
        let [b0, moments, accum] = requests.map(|r| alloc.allocate(r));
        let next = MomentStorage {
            addressing,
            count: self.count,
            basis: self.basis,
            half: self.bit_depth == StorageBitDepth::Bits16,
            depth_range: self.depth_range,
            reconstruction: self.reconstruction(self.count, self.bit_depth),
            b0,
            moments,
            accum,
            section: PixelCriticalSection::new(slots),
            counters: GatherCounters::default(),
        };
        if let Some(prev) = self.storage.replace(next) {
            alloc.release(prev.b0);
            alloc.release(prev.moments);
            alloc.release(prev.accum);
        }
        self.needs_clear = true;
        info!(
            width = resolution.width,
            height = resolution.height,
            moments = n,
            "moment storage allocated"
        );
        Ok(())
    }

    fn gather_shader(&self) -> ShaderId {
        self.gather_shader
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
        scene: &mut dyn Scene,
        target: &mut FrameTarget,
        state: &mut RenderState,
    ) -> OitResult<()> {
        let storage = self.storage()?;
        let program = ResolveWeighting { storage };
        *state = RenderState::gather(false);
        run_geometry_pass(scene, self.resolve_shader, &program, target, state)?;

        *state = RenderState::resolve(self.stencil_mask);
        target.resolve_with(state, |x, y| {
            storage.resolve_pixel(storage.addressing.address(x, y))
        });
        let stats = GatherStats {
            geometry_passes: 2,
            ..storage.counters.take()
        };
        self.last_stats = stats;
        self.needs_clear = false;
        *state = RenderState::default();
        Ok(())
    }

    fn take_stats(&mut self) -> GatherStats {
        if let Some(storage) = self.storage.as_ref() {
            let pending = storage.counters.take();
            if pending != GatherStats::default() {
                // Gather ran without a resolve.
                return GatherStats {
                    geometry_passes: 1,
                    ..pending
                };
            }
        }
        std::mem::take(&mut self.last_stats)
    }

    fn release_resources(&mut self, alloc: &mut ResourceAllocator<'_>) {
        if let Some(storage) = self.storage.take() {
            alloc.release(storage.b0);
            alloc.release(storage.moments);
            alloc.release(storage.accum);
        }
    }
}

#[cfg(test)]
#[path = "../../../tests/unit/oit/moments.rs"]
mod tests;
