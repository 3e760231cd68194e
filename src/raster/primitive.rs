use crate::foundation::core::{Fragment, Rect, Resolution, Rgba};

/// Axis-aligned screen-space quad of one shaded color at one view depth.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TransparentQuad {
    /// Pixel-space rectangle.
    pub rect: Rect,
    /// Linear view-space depth.
    pub depth: f32,
    /// Straight-alpha color.
    pub color: Rgba,
}

impl TransparentQuad {
    pub fn new(rect: Rect, depth: f32, color: Rgba) -> Self {
        Self { rect, depth, color }
    }

    /// Return `true` when the center of pixel `(x, y)` lies inside the quad.
    pub fn covers(&self, x: u32, y: u32) -> bool {
        let r = self.rect.abs();
        let (cx, cy) = (f64::from(x) + 0.5, f64::from(y) + 0.5);
        r.x0 <= cx && cx < r.x1 && r.y0 <= cy && cy < r.y1
    }

    /// Append one fragment per covered pixel center, clipped to `resolution`.
    pub fn rasterize(&self, resolution: Resolution, out: &mut Vec<Fragment>) {
        let r = self.rect.abs();
        let span = |lo: f64, hi: f64, max: u32| -> (u32, u32) {
            let start = (lo - 0.5).ceil().clamp(0.0, f64::from(max)) as u32;
            let end = (hi - 0.5).ceil().clamp(0.0, f64::from(max)) as u32;
            (start, end.max(start))
        };
        let (x0, x1) = span(r.x0, r.x1, resolution.width);
        let (y0, y1) = span(r.y0, r.y1, resolution.height);
        let color = self.color.clamped();
        out.reserve(((x1 - x0) as usize) * ((y1 - y0) as usize));
        for y in y0..y1 {
            for x in x0..x1 {
                out.push(Fragment::new(x, y, self.depth, color));
            }
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/raster/primitive.rs"]
mod tests;
