#[inline(always)]
pub(crate) fn swap_bgra_to_rgba(pixel: u32) -> u32 {
    ((pixel & 0x0000_00FF) << 16)
        | (pixel & 0x0000_FF00)
        | ((pixel & 0x00FF_0000) >> 16)
        | (pixel & 0xFF00_0000)
}

/// Swap the red and blue channels of every whole pixel in `bytes`.
/// Trailing bytes that do not form a full pixel are left untouched.
pub(crate) fn swizzle_in_place(bytes: &mut [u8]) {
    for chunk in bytes.chunks_exact_mut(4) {
        let pixel = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        chunk.copy_from_slice(&swap_bgra_to_rgba(pixel).to_le_bytes());
    }
}
