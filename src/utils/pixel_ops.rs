/// Interleaves a packed BGR buffer with its standalone alpha plane into BGRA.
///
/// The fourth channel of the result is the opacity mask, not the alpha byte
/// the tile data carries next to its BGR samples.
pub fn interleave_alpha(bgr: &[u8], alpha: &[u8]) -> Vec<u8> {
    bgr.chunks_exact(3)
        .zip(alpha)
        .flat_map(|(bgr, alpha)| [bgr[0], bgr[1], bgr[2], *alpha])
        .collect()
}

/// Swaps the blue and red channels of a packed 3- or 4-channel buffer.
pub fn swap_blue_red(pixels: &[u8], channels: usize) -> Vec<u8> {
    debug_assert!(channels >= 3);

    let mut out = pixels.to_vec();
    out.chunks_exact_mut(channels).for_each(|px| px.swap(0, 2));

    out
}
