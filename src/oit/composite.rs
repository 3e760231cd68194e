use crate::foundation::core::PremulRgba;
use crate::oit::record::FragmentRecord;
use crate::oit::sort::{SortAlgorithm, sort_records};

/// Blend nearest-first `records` back-to-front: `out = src·srcA + out·(1 − srcA)`.
pub fn composite_back_to_front(records: &[FragmentRecord]) -> PremulRgba {
    records
        .iter()
        .rev()
        .fold(PremulRgba::TRANSPARENT, |acc, r| r.premultiplied().over(acc))
}

/// Exact reference: sort by the record total order, then composite back-to-front.
pub fn reference_composite(records: &mut [FragmentRecord]) -> PremulRgba {
    sort_records(SortAlgorithm::Insertion, records);
    composite_back_to_front(records)
}

/// A merged slab of transparency: premultiplied color, transmittance and front depth.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Layer {
    pub(crate) color: [f32; 3],
    pub(crate) transmittance: f32,
    pub(crate) depth: f32,
}

impl Layer {
    pub(crate) fn from_record(r: &FragmentRecord) -> Self {
        let p = r.premultiplied();
        Self {
            color: [p.r, p.g, p.b],
            transmittance: 1.0 - p.a,
            depth: r.depth,
        }
    }

    /// `self` in front of `back`.
    pub(crate) fn merge(self, back: Layer) -> Layer {
        let t = self.transmittance;
        Layer {
            color: [
                self.color[0] + back.color[0] * t,
                self.color[1] + back.color[1] * t,
                self.color[2] + back.color[2] * t,
            ],
            transmittance: t * back.transmittance,
            depth: self.depth,
        }
    }

    pub(crate) fn channels(&self) -> [f32; 4] {
        [
            self.color[0],
            self.color[1],
            self.color[2],
            self.transmittance,
        ]
    }

    pub(crate) fn from_channels(ch: [f32; 4], depth: f32) -> Self {
        Self {
            color: [ch[0], ch[1], ch[2]],
            transmittance: ch[3],
            depth,
        }
    }

    /// Depth first, then payload, so equal-depth layers insert in one fixed order.
    pub(crate) fn total_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.depth
            .total_cmp(&other.depth)
            .then_with(|| self.transmittance.total_cmp(&other.transmittance))
            .then_with(|| self.color[0].total_cmp(&other.color[0]))
            .then_with(|| self.color[1].total_cmp(&other.color[1]))
            .then_with(|| self.color[2].total_cmp(&other.color[2]))
    }
}

/// Composite depth-ordered layers front-to-back into one premultiplied color.
pub(crate) fn composite_front_to_back<'a>(layers: impl IntoIterator<Item = &'a Layer>) -> PremulRgba {
    let mut color = [0.0f32; 3];
    let mut transmittance = 1.0f32;
    for layer in layers {
        for (c, l) in color.iter_mut().zip(layer.color) {
            *c += transmittance * l;
        }
        transmittance *= layer.transmittance;
    }
    PremulRgba::new(color[0], color[1], color[2], 1.0 - transmittance)
}

#[cfg(test)]
#[path = "../../tests/unit/oit/composite.rs"]
mod tests;
