use std::cmp::Ordering;

use crate::config::StorageBitDepth;
use crate::foundation::core::{Fragment, PremulRgba, Rgba};
use crate::foundation::math::{pack_unorm16x2, unpack_unorm16x2};
use crate::gpu::buffer::StorageBuffer;

/// One stored transparent fragment: straight-alpha color and linear view depth.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FragmentRecord {
    pub color: Rgba,
    pub depth: f32,
}

impl FragmentRecord {
    pub fn new(depth: f32, color: Rgba) -> Self {
        Self { color, depth }
    }

    pub fn from_fragment(fragment: &Fragment) -> Self {
        Self::new(fragment.depth, fragment.color)
    }

    /// Depth first, then color channels. Equal fragments compare equal; everything else has one
    /// fixed order, so sort algorithms and arrival orders cannot disagree on ties.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        self.depth
            .total_cmp(&other.depth)
            .then_with(|| self.color.r.total_cmp(&other.color.r))
            .then_with(|| self.color.g.total_cmp(&other.color.g))
            .then_with(|| self.color.b.total_cmp(&other.color.b))
            .then_with(|| self.color.a.total_cmp(&other.color.a))
    }

    pub fn premultiplied(&self) -> PremulRgba {
        self.color.premultiplied()
    }
}

/// Encoding of four `[0, 1]` channels plus a depth into storage words.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RecordLayout {
    bit_depth: StorageBitDepth,
}

impl RecordLayout {
    pub(crate) fn new(bit_depth: StorageBitDepth) -> Self {
        Self { bit_depth }
    }

    /// Words per record.
    pub(crate) const fn words(self) -> usize {
        match self.bit_depth {
            StorageBitDepth::Bits16 => 3,
            StorageBitDepth::Bits32 => 5,
        }
    }

    pub(crate) fn write_channels(self, buf: &StorageBuffer, base: usize, ch: [f32; 4], depth: f32) {
        match self.bit_depth {
            StorageBitDepth::Bits16 => {
                buf.store(base, pack_unorm16x2(ch[0], ch[1]));
                buf.store(base + 1, pack_unorm16x2(ch[2], ch[3]));
                buf.store_f32(base + 2, depth);
            }
            StorageBitDepth::Bits32 => {
                for (i, c) in ch.into_iter().enumerate() {
                    buf.store_f32(base + i, c);
                }
                buf.store_f32(base + 4, depth);
            }
        }
    }

    pub(crate) fn read_channels(self, buf: &StorageBuffer, base: usize) -> ([f32; 4], f32) {
        match self.bit_depth {
            StorageBitDepth::Bits16 => {
                let (r, g) = unpack_unorm16x2(buf.load(base));
                let (b, a) = unpack_unorm16x2(buf.load(base + 1));
                ([r, g, b, a], buf.load_f32(base + 2))
            }
            StorageBitDepth::Bits32 => (
                [
                    buf.load_f32(base),
                    buf.load_f32(base + 1),
                    buf.load_f32(base + 2),
                    buf.load_f32(base + 3),
                ],
                buf.load_f32(base + 4),
            ),
        }
    }

    pub(crate) fn depth(self, buf: &StorageBuffer, base: usize) -> f32 {
        buf.load_f32(base + self.words() - 1)
    }

    pub(crate) fn write(self, buf: &StorageBuffer, base: usize, rec: &FragmentRecord) {
        self.write_channels(buf, base, rec.color.to_array(), rec.depth);
    }

    pub(crate) fn read(self, buf: &StorageBuffer, base: usize) -> FragmentRecord {
        let (ch, depth) = self.read_channels(buf, base);
        FragmentRecord::new(depth, Rgba::from_array(ch))
    }

    /// The record as it reads back after storage, for comparisons against stored records.
    pub(crate) fn quantize(self, rec: FragmentRecord) -> FragmentRecord {
        match self.bit_depth {
            StorageBitDepth::Bits32 => rec,
            StorageBitDepth::Bits16 => {
                let c = rec.color;
                let (r, g) = unpack_unorm16x2(pack_unorm16x2(c.r, c.g));
                let (b, a) = unpack_unorm16x2(pack_unorm16x2(c.b, c.a));
                FragmentRecord::new(rec.depth, Rgba::new(r, g, b, a))
            }
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/oit/record.rs"]
mod tests;
