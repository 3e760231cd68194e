use rayon::prelude::*;

use crate::foundation::core::Fragment;
use crate::foundation::error::{OitError, OitResult};
use crate::raster::primitive::TransparentQuad;
use crate::raster::shader::{FragmentProgram, ShaderId};
use crate::raster::state::{RenderState, StencilMode};
use crate::raster::target::FrameTarget;

/// Counters of one geometry pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct PassStats {
    pub draw_calls: u32,
    /// Fragments handed to the gather program.
    pub fragments_shaded: u64,
    /// Fragments dropped before shading (outside the target, behind opaque depth, NaN depth).
    pub fragments_rejected: u64,
}

impl PassStats {
    pub(crate) fn accumulate(&mut self, other: PassStats) {
        self.draw_calls = self.draw_calls.saturating_add(other.draw_calls);
        self.fragments_shaded = self.fragments_shaded.saturating_add(other.fragments_shaded);
        self.fragments_rejected = self
            .fragments_rejected
            .saturating_add(other.fragments_rejected);
    }
}

/// Host-side handle to one geometry pass of the transparent scene.
///
/// Draw calls execute in submission order; the fragments inside one draw call run in parallel.
pub struct GatherPass<'a> {
    shader: ShaderId,
    program: &'a dyn FragmentProgram,
    target: &'a FrameTarget,
    state: RenderState,
    scratch: Vec<Fragment>,
    stats: PassStats,
}

impl<'a> GatherPass<'a> {
    pub(crate) fn new(
        shader: ShaderId,
        program: &'a dyn FragmentProgram,
        target: &'a FrameTarget,
        state: &RenderState,
    ) -> Self {
        Self {
            shader,
            program,
            target,
            state: *state,
            scratch: Vec::new(),
            stats: PassStats::default(),
        }
    }

    /// The shader every draw of this pass must use.
    pub fn gather_shader(&self) -> ShaderId {
        self.shader
    }

    pub fn resolution(&self) -> crate::foundation::core::Resolution {
        self.target.resolution()
    }

    pub fn draw_quads(&mut self, shader: ShaderId, quads: &[TransparentQuad]) -> OitResult<()> {
        self.check_shader(shader)?;
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        let resolution = self.target.resolution();
        for quad in quads {
            quad.rasterize(resolution, &mut scratch);
        }
        self.dispatch(&scratch);
        self.scratch = scratch;
        Ok(())
    }

    /// Submit pre-rasterized fragments. Colors are clamped to `[0, 1]` before shading.
    pub fn draw_fragments(&mut self, shader: ShaderId, fragments: &[Fragment]) -> OitResult<()> {
        self.check_shader(shader)?;
        self.dispatch(fragments);
        Ok(())
    }

    pub fn stats(&self) -> PassStats {
        self.stats
    }

    fn check_shader(&self, used: ShaderId) -> OitResult<()> {
        if used != self.shader {
            return Err(OitError::ShaderMismatch {
                active: self.shader.to_string(),
                used: used.to_string(),
            });
        }
        Ok(())
    }

    fn dispatch(&mut self, fragments: &[Fragment]) {
        let target = self.target;
        let program = self.program;
        let resolution = target.resolution();
        let depth_test = self.state.depth_test;
        let mark = self.state.stencil == StencilMode::MarkTouched;

        let shaded: u64 = fragments
            .par_iter()
            .map(|f| {
                if !resolution.contains(f.x, f.y) || f.depth.is_nan() {
                    return 0;
                }
                let index = resolution.linear_index(f.x, f.y);
                if depth_test && f.depth >= target.opaque_depth_at(index) {
                    return 0;
                }
                if mark {
                    target.mark_touched(index);
                }
                program.invoke(&Fragment {
                    color: f.color.clamped(),
                    ..*f
                });
                1
            })
            .sum();

        self.stats.draw_calls += 1;
        self.stats.fragments_shaded += shaded;
        self.stats.fragments_rejected += fragments.len() as u64 - shaded;
    }
}

/// Host callback that submits the transparent geometry.
///
/// Multi-pass backends invoke it more than once per frame; every invocation must submit the same
/// geometry using [`GatherPass::gather_shader`].
pub trait Scene {
    fn render(&mut self, pass: &mut GatherPass<'_>) -> OitResult<()>;
}

impl<F> Scene for F
where
    F: FnMut(&mut GatherPass<'_>) -> OitResult<()>,
{
    fn render(&mut self, pass: &mut GatherPass<'_>) -> OitResult<()> {
        self(pass)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/raster/pass.rs"]
mod tests;
