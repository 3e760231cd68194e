/// Stencil usage of a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum StencilMode {
    #[default]
    Disabled,
    /// Gather: mark every pixel a transparent fragment reached.
    MarkTouched,
    /// Resolve: only run on marked pixels, then clear the marks.
    TestTouched,
}

/// How resolved colors reach the render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Replace,
    /// Premultiplied `src over dst`.
    PremultipliedOver,
}

/// Fixed-function state the passes toggle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderState {
    pub color_write: bool,
    pub depth_write: bool,
    pub depth_test: bool,
    pub stencil: StencilMode,
    pub blend: BlendMode,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            color_write: true,
            depth_write: true,
            depth_test: true,
            stencil: StencilMode::Disabled,
            blend: BlendMode::Replace,
        }
    }
}

impl RenderState {
    /// Gather passes write only to backend storage, tested against opaque depth.
    pub fn gather(stencil_mask: bool) -> Self {
        Self {
            color_write: false,
            depth_write: false,
            depth_test: true,
            stencil: if stencil_mask {
                StencilMode::MarkTouched
            } else {
                StencilMode::Disabled
            },
            blend: BlendMode::Replace,
        }
    }

    /// Full-screen resolve blended over the target.
    pub fn resolve(stencil_mask: bool) -> Self {
        Self {
            color_write: true,
            depth_write: false,
            depth_test: false,
            stencil: if stencil_mask {
                StencilMode::TestTouched
            } else {
                StencilMode::Disabled
            },
            blend: BlendMode::PremultipliedOver,
        }
    }
}
