pub mod pixel_ops;

#[cfg(feature = "png")]
pub(crate) mod image {
    use png::{BitDepth, ColorType, Encoder};
    use std::{fs, io, path::Path};

    /// New type to create 8bpc images.
    pub(crate) struct PngImage {
        pub(crate) color: ColorType,
        pub(crate) width: u32,
        pub(crate) height: u32,
    }

    impl PngImage {
        /// Saves bytes to the provided path.
        pub(crate) fn save<P>(self, bytes: &[u8], path: P) -> io::Result<()>
        where
            P: AsRef<Path>,
        {
            let file = fs::File::create(path)?;

            let mut encoder = Encoder::new(file, self.width, self.height);
            encoder.set_color(self.color);
            encoder.set_depth(BitDepth::Eight);

            Ok(encoder.write_header()?.write_image_data(bytes)?)
        }
    }
}
