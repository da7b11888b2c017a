pub mod raster;

pub use self::raster::Image;
// The flat record lists of the embedded database, as loaded.
pub use crate::db::{CanvasPreview, Layer, LayerThumbnail, Mipmap, MipmapInfo, Offscreen};

use crate::{
    chunk::{external, Envelope},
    db::Database,
    utils::pixel_ops,
};
use std::{
    fmt::{Display, Formatter},
    fs, io,
    path::Path,
    time::Instant,
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Db(rusqlite::Error),
    Format(FormatError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormatError {
    NotClipFile,
    InvalidMagic,
    TruncatedChunk { offset: usize },
    MissingSqliteChunk,
    UnsupportedGrayscale,
    Decompression,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use Error as E;

        match self {
            E::Io(io) => write!(f, "{io}"),
            E::Db(db) => write!(f, "{db}"),
            E::Format(format) => write!(f, "{format}"),
        }
    }
}

impl Display for FormatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use FormatError as E;

        match self {
            E::NotClipFile => {
                write!(f, "Not a Clip Studio Paint file (extension is not 'clip').")
            }
            E::InvalidMagic => write!(f, "Invalid magic number; expected 'CSFCHUNK'."),
            E::TruncatedChunk { offset } => {
                write!(f, "Chunk at offset '{offset}' extends past its container.")
            }
            E::MissingSqliteChunk => write!(f, "'CHNKSQLi' chunk is missing."),
            E::UnsupportedGrayscale => write!(f, "Grayscale layer data is not supported."),
            E::Decompression => write!(f, "Corrupted zlib stream inside a tile block."),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Db(err)
    }
}

impl From<FormatError> for Error {
    fn from(err: FormatError) -> Self {
        Self::Format(err)
    }
}

impl std::error::Error for Error {}
impl std::error::Error for FormatError {}

/// A layer as listed in the document, without its pixels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayerSummary {
    pub canvas_id: i64,
    pub layer_id: i64,
    pub name: String,
    pub uuid: String,
}

/// Pixel data of one raster layer.
///
/// Every field is [`None`] when the layer holds no raster data (vector and
/// text layers, folders); `bgra` is the BGR samples interleaved with the
/// standalone alpha plane.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RasterData {
    pub bgr: Option<Image>,
    pub alpha: Option<Image>,
    pub bgra: Option<Image>,
}

/// An opened `.clip` document.
///
/// The file is loaded into memory once; layer listings and raster extraction
/// work off that buffer and the record lists read from the embedded database.
pub struct ClipDocument {
    data: Vec<u8>,
    envelope: Envelope,
    db: Database,
}

impl ClipDocument {
    /// Opens a `.clip` file from disk.
    ///
    /// # Errors
    ///
    /// [`FormatError::NotClipFile`] when the path has a different extension;
    /// otherwise anything [`ClipDocument::from_bytes`] can return.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if path.extension().map_or(true, |ext| ext != "clip") {
            return Err(FormatError::NotClipFile.into());
        }

        Self::from_bytes(fs::read(path)?)
    }

    /// Opens a document from bytes already in memory, skipping the extension
    /// check.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let envelope = Envelope::scan(&data)?;
        let db = Database::read(&data[envelope.sqlite_offset()..])?;

        Ok(Self { data, envelope, db })
    }

    /// Every layer of the document, in record order.
    pub fn layers(&self) -> Vec<LayerSummary> {
        self.db
            .layers()
            .iter()
            .map(|layer| LayerSummary {
                canvas_id: layer.canvas_id,
                layer_id: layer.main_id,
                name: layer.layer_name.clone(),
                uuid: layer.layer_uuid.clone(),
            })
            .collect()
    }

    /// Canvas preview bitmaps, as stored (PNG-encoded by the editor).
    pub fn canvas_previews(&self) -> &[CanvasPreview] {
        self.db.canvas_previews()
    }

    /// Extracts the pixels of one layer.
    ///
    /// Layers without raster data yield a [`RasterData`] with every field
    /// [`None`]; that includes unknown `(canvas_id, layer_id)` pairs.
    ///
    /// # Errors
    ///
    /// [`FormatError::UnsupportedGrayscale`] for single-plane layers, or a
    /// decode failure inside the layer's external data chunk. Neither
    /// invalidates the document.
    pub fn raster(&self, canvas_id: i64, layer_id: i64) -> Result<RasterData> {
        let start = Instant::now();

        let Some(resolved) = self.db.resolve(canvas_id, layer_id) else {
            return Ok(RasterData::default());
        };

        let (Some(width), Some(height)) = (
            canvas_dimension(resolved.width),
            canvas_dimension(resolved.height),
        ) else {
            log::warn!("layer ({canvas_id}, {layer_id}) has unusable canvas dimensions");
            return Ok(RasterData::default());
        };

        let Some(external) = external::find(&self.data, &self.envelope, resolved.external_id)?
        else {
            return Ok(RasterData::default());
        };

        if !external.checksums.is_empty() {
            log::debug!(
                "{} checksum blocks parsed, none verified",
                external.checksums.len()
            );
        }

        let (bgr, alpha) = raster::reassemble(&external.data, width, height)?;
        let bgra = Image {
            width: bgr.width,
            height: bgr.height,
            channels: 4,
            pixels: pixel_ops::interleave_alpha(&bgr.pixels, &alpha.pixels),
        };

        log::debug!(
            "raster({canvas_id}, {layer_id}): {:.2}ms",
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(RasterData {
            bgr: Some(bgr),
            alpha: Some(alpha),
            bgra: Some(bgra),
        })
    }
}

fn canvas_dimension(value: i64) -> Option<usize> {
    usize::try_from(value).ok().filter(|dim| *dim > 0)
}
