use crate::foundation::error::{OitError, OitResult};

pub use kurbo::Rect;

/// Render-target dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Create a validated resolution with both dimensions non-zero.
    pub fn new(width: u32, height: u32) -> OitResult<Self> {
        if width == 0 || height == 0 {
            return Err(OitError::validation(format!(
                "resolution must be non-zero, got {width}x{height}"
            )));
        }
        Ok(Self { width, height })
    }

    /// Number of pixels covered.
    pub fn pixel_count(self) -> usize {
        (self.width as usize).saturating_mul(self.height as usize)
    }

    /// Return `true` when `(x, y)` lies inside the target.
    pub fn contains(self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height
    }

    /// Row-major index of `(x, y)`.
    pub fn linear_index(self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + (x as usize)
    }
}

/// Straight-alpha linear RGBA color.
#[derive(Clone, Copy, Debug, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Clamp every channel into `[0, 1]`. NaN channels become 0.
    pub fn clamped(self) -> Self {
        fn c(v: f32) -> f32 {
            if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
        }
        Self::new(c(self.r), c(self.g), c(self.b), c(self.a))
    }

    pub fn premultiplied(self) -> PremulRgba {
        PremulRgba {
            r: self.r * self.a,
            g: self.g * self.a,
            b: self.b * self.a,
            a: self.a,
        }
    }

    pub(crate) fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub(crate) fn from_array(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

/// Premultiplied linear RGBA color, the format of every render target.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct PremulRgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl PremulRgba {
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Porter-Duff `self over dst`.
    pub fn over(self, dst: Self) -> Self {
        let inv = 1.0 - self.a;
        Self {
            r: self.r + dst.r * inv,
            g: self.g + dst.g * inv,
            b: self.b + dst.b * inv,
            a: self.a + dst.a * inv,
        }
    }

    /// Largest absolute per-channel difference.
    pub fn max_abs_diff(self, other: Self) -> f32 {
        (self.r - other.r)
            .abs()
            .max((self.g - other.g).abs())
            .max((self.b - other.b).abs())
            .max((self.a - other.a).abs())
    }

    /// Quantize to premultiplied RGBA8.
    pub fn to_rgba8(self) -> [u8; 4] {
        fn q(v: f32) -> u8 {
            (v.clamp(0.0, 1.0) * 255.0).round() as u8
        }
        [q(self.r), q(self.g), q(self.b), q(self.a)]
    }
}

/// One rasterized transparent fragment as seen by a gather shader.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fragment {
    pub x: u32,
    pub y: u32,
    /// Linear view-space depth, larger is farther.
    pub depth: f32,
    /// Shaded straight-alpha color.
    pub color: Rgba,
}

impl Fragment {
    pub fn new(x: u32, y: u32, depth: f32, color: Rgba) -> Self {
        Self { x, y, depth, color }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
