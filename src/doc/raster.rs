use super::{FormatError, Result};
use itertools::Itertools;
use std::borrow::Cow;

/// Tiles are always 256×256, whatever the canvas dimensions.
pub(crate) const TILE_DIM: usize = 256;
/// One 8-bit alpha plane per tile.
pub(crate) const ALPHA_PLANE: usize = TILE_DIM * TILE_DIM;
/// One interleaved BGRA plane per tile, stored after the alpha plane.
pub(crate) const BGRA_PLANE: usize = ALPHA_PLANE * 4;
pub(crate) const TILE_STRIDE: usize = ALPHA_PLANE + BGRA_PLANE;

/// A tightly packed 8-bits-per-channel image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    /// 1 (alpha), 3 (BGR) or 4 (BGRA).
    pub channels: u8,
    pub pixels: Vec<u8>,
}

impl Image {
    /// Saves the image to the provided path, swapping to the RGB channel
    /// order PNG expects.
    #[cfg(feature = "png")]
    pub fn to_png<P>(&self, path: P) -> Result<()>
    where
        P: AsRef<std::path::Path>,
    {
        use crate::utils::{image::PngImage, pixel_ops::swap_blue_red};

        let (color, pixels) = match self.channels {
            1 => (png::ColorType::Grayscale, Cow::Borrowed(&self.pixels)),
            3 => (
                png::ColorType::Rgb,
                Cow::Owned(swap_blue_red(&self.pixels, 3)),
            ),
            4 => (
                png::ColorType::Rgba,
                Cow::Owned(swap_blue_red(&self.pixels, 4)),
            ),
            channels => panic!("cannot encode a {channels}-channel image"),
        };

        let png = PngImage {
            color,
            width: self.width,
            height: self.height,
        };

        Ok(png.save(&pixels, path)?)
    }
}

/// Reshapes a concatenated tile payload into full-canvas BGR and alpha
/// images.
///
/// The payload is a row-major grid of `⌈height/256⌉ × ⌈width/256⌉` tiles,
/// each an alpha plane followed by a BGRA plane. The BGRA plane carries its
/// own fourth channel, but the standalone alpha plane is the authoritative
/// opacity mask; the returned BGR image simply drops the BGRA alpha byte.
pub fn reassemble(data: &[u8], width: usize, height: usize) -> Result<(Image, Image)> {
    let cols = (width + TILE_DIM - 1) / TILE_DIM;
    let rows = (height + TILE_DIM - 1) / TILE_DIM;
    let padded_w = cols * TILE_DIM;
    let padded_h = rows * TILE_DIM;

    let grayscale_len = padded_w * padded_h;
    let expected_len = grayscale_len * 5;

    if data.len() == grayscale_len {
        return Err(FormatError::UnsupportedGrayscale.into());
    }

    let data = if data.len() == expected_len {
        Cow::Borrowed(data)
    } else {
        log::error!(
            "tile payload holds {} bytes, layout needs {expected_len}",
            data.len()
        );

        let mut padded = data.to_vec();
        padded.resize(expected_len, 0);
        Cow::Owned(padded)
    };

    let mut alpha = vec![0; grayscale_len];
    let mut bgra = vec![0; grayscale_len * 4];

    for (tile_y, tile_x) in (0..rows).cartesian_product(0..cols) {
        let base = (tile_y * cols + tile_x) * TILE_STRIDE;
        let alpha_tile = &data[base..base + ALPHA_PLANE];
        let bgra_tile = &data[base + ALPHA_PLANE..base + TILE_STRIDE];

        for dy in 0..TILE_DIM {
            let row = (tile_y * TILE_DIM + dy) * padded_w + tile_x * TILE_DIM;

            alpha[row..row + TILE_DIM]
                .copy_from_slice(&alpha_tile[dy * TILE_DIM..(dy + 1) * TILE_DIM]);
            bgra[row * 4..(row + TILE_DIM) * 4]
                .copy_from_slice(&bgra_tile[dy * TILE_DIM * 4..(dy + 1) * TILE_DIM * 4]);
        }
    }

    // Crop the padded planes down to the canvas and split the channels.
    let mut bgr_pixels = Vec::with_capacity(width * height * 3);
    let mut alpha_pixels = Vec::with_capacity(width * height);

    for y in 0..height {
        let row = y * padded_w;

        alpha_pixels.extend_from_slice(&alpha[row..row + width]);
        for x in 0..width {
            let px = (row + x) * 4;
            bgr_pixels.extend_from_slice(&bgra[px..px + 3]);
        }
    }

    Ok((
        Image {
            width: width as u32,
            height: height as u32,
            channels: 3,
            pixels: bgr_pixels,
        },
        Image {
            width: width as u32,
            height: height as u32,
            channels: 1,
            pixels: alpha_pixels,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::Error;
    use eyre::Result;

    /// Builds a payload whose tile `(x, y)` has alpha `x + y` and BGRA
    /// `(x, y, x + y, 255)`.
    fn gradient_tiles(cols: usize, rows: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(cols * rows * TILE_STRIDE);

        for (y, x) in (0..rows).cartesian_product(0..cols) {
            let (x, y) = (x as u8, y as u8);

            data.resize(data.len() + ALPHA_PLANE, x + y);
            for _ in 0..ALPHA_PLANE {
                data.extend_from_slice(&[x, y, x + y, 255]);
            }
        }

        data
    }

    #[test]
    fn tiles_land_at_their_grid_position() -> Result<()> {
        let (cols, rows) = (2, 2);
        let (bgr, alpha) = reassemble(&gradient_tiles(cols, rows), 512, 512)?;

        for (tile_y, tile_x) in (0..rows).cartesian_product(0..cols) {
            for (dy, dx) in [(0, 0), (17, 211), (255, 255)] {
                let px = (TILE_DIM * tile_y + dy) * 512 + TILE_DIM * tile_x + dx;
                let value = (tile_x + tile_y) as u8;

                assert_eq!(alpha.pixels[px], value);
                assert_eq!(
                    &bgr.pixels[px * 3..px * 3 + 3],
                    &[tile_x as u8, tile_y as u8, value]
                );
            }
        }

        Ok(())
    }

    #[test]
    fn padding_is_cropped() -> Result<()> {
        // S4: a 300×200 canvas occupies a 2×1 tile grid.
        let (bgr, alpha) = reassemble(&gradient_tiles(2, 1), 300, 200)?;

        assert_eq!((bgr.width, bgr.height, bgr.channels), (300, 200, 3));
        assert_eq!(bgr.pixels.len(), 300 * 200 * 3);
        assert_eq!((alpha.width, alpha.height, alpha.channels), (300, 200, 1));
        assert_eq!(alpha.pixels.len(), 300 * 200);

        // Rightmost in-canvas column comes from the second tile.
        assert_eq!(&bgr.pixels[299 * 3..300 * 3], &[1, 0, 1]);

        Ok(())
    }

    #[test]
    fn grayscale_payload_is_rejected() {
        // S5: one byte per padded pixel is the single-plane layout.
        let data = vec![0; 512 * 512];

        assert!(matches!(
            reassemble(&data, 512, 512),
            Err(Error::Format(FormatError::UnsupportedGrayscale))
        ));
    }

    #[test]
    fn short_payload_is_zero_padded() -> Result<()> {
        // Half the tile missing: the alpha plane survives intact, the BGRA
        // plane runs dry and decoding continues over zeroes.
        let data = vec![0x55; TILE_STRIDE / 2];
        let (bgr, alpha) = reassemble(&data, 256, 256)?;

        assert!(alpha.pixels.iter().all(|px| *px == 0x55));
        assert_eq!(&bgr.pixels[..3], &[0x55, 0x55, 0x55]);
        assert_eq!(&bgr.pixels[bgr.pixels.len() - 3..], &[0, 0, 0]);

        Ok(())
    }

    #[test]
    fn bgra_alpha_byte_is_not_the_mask() -> Result<()> {
        // Alpha plane says transparent, BGRA plane says opaque; the BGR
        // output must keep only B, G, R and the mask must stay transparent.
        let mut data = vec![0; TILE_STRIDE];
        for px in data[ALPHA_PLANE..].chunks_exact_mut(4) {
            px.copy_from_slice(&[10, 20, 30, 255]);
        }

        let (bgr, alpha) = reassemble(&data, 256, 256)?;

        assert_eq!(&bgr.pixels[..3], &[10, 20, 30]);
        assert_eq!(alpha.pixels[0], 0);

        Ok(())
    }
}
