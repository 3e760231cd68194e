use half::f16;

pub(crate) fn quantize_unorm16(v: f32) -> u16 {
    if v.is_nan() {
        return 0;
    }
    (v.clamp(0.0, 1.0) * 65535.0).round() as u16
}

pub(crate) fn dequantize_unorm16(v: u16) -> f32 {
    f32::from(v) / 65535.0
}

/// Pack two `[0, 1]` values into one word, `lo` in the low half.
pub(crate) fn pack_unorm16x2(lo: f32, hi: f32) -> u32 {
    u32::from(quantize_unorm16(lo)) | (u32::from(quantize_unorm16(hi)) << 16)
}

pub(crate) fn unpack_unorm16x2(word: u32) -> (f32, f32) {
    (
        dequantize_unorm16((word & 0xFFFF) as u16),
        dequantize_unorm16((word >> 16) as u16),
    )
}

/// Store `v` as an IEEE half float and read it back.
///
/// Magnitudes above 65504 become infinite and values below the smallest subnormal flush to zero.
pub(crate) fn round_to_f16(v: f32) -> f32 {
    f16::from_f32(v).to_f32()
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/math.rs"]
mod tests;
