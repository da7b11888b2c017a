use crate::doc::Result;
use linked_hash_map::LinkedHashMap;
use rusqlite::{types::ValueRef, Connection, OpenFlags, Row};
use std::{hash::Hash, io::Write};
use tempfile::NamedTempFile;

/// Preview bitmap of a whole canvas, as stored by the editor.
#[derive(Clone, Debug, PartialEq)]
pub struct CanvasPreview {
    pub main_id: i64,
    pub canvas_id: i64,
    pub image_data: Vec<u8>,
    pub image_width: i64,
    pub image_height: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    pub main_id: i64,
    pub canvas_id: i64,
    pub layer_name: String,
    pub layer_uuid: String,
    /// Entry point of the render chain; `None` for layers that own no raster
    /// data (vector, text, folders).
    pub layer_render_mipmap: Option<i64>,
    pub layer_render_thumbnail: Option<i64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LayerThumbnail {
    pub main_id: i64,
    pub canvas_id: i64,
    pub layer_id: Option<i64>,
    /// Full canvas dimensions, despite the name.
    pub thumbnail_canvas_width: i64,
    pub thumbnail_canvas_height: i64,
    pub thumbnail_offscreen: Option<i64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Offscreen {
    pub main_id: i64,
    pub canvas_id: i64,
    pub layer_id: Option<i64>,
    /// The external-data identifier; joins this record with a `CHNKExta`
    /// chunk of the envelope.
    pub block_data: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Mipmap {
    pub main_id: i64,
    pub canvas_id: i64,
    pub layer_id: Option<i64>,
    pub mipmap_count: i64,
    pub base_mipmap_info: Option<i64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MipmapInfo {
    pub main_id: i64,
    pub canvas_id: i64,
    pub layer_id: Option<i64>,
    pub this_scale: f64,
    pub offscreen: Option<i64>,
    pub next_index: Option<i64>,
}

pub(crate) trait Record: Sized {
    const SELECT: &'static str;

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

impl Record for CanvasPreview {
    const SELECT: &'static str =
        "SELECT MainId, CanvasId, ImageData, ImageWidth, ImageHeight FROM CanvasPreview;";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            main_id: row.get(0)?,
            canvas_id: row.get(1)?,
            image_data: row.get::<_, Option<Vec<u8>>>(2)?.unwrap_or_default(),
            image_width: row.get(3)?,
            image_height: row.get(4)?,
        })
    }
}

impl Record for Layer {
    const SELECT: &'static str =
        "SELECT MainId, CanvasId, LayerName, LayerUuid, LayerRenderMipmap, LayerRenderThumbnail \
         FROM Layer;";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            main_id: row.get(0)?,
            canvas_id: row.get(1)?,
            layer_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            layer_uuid: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            layer_render_mipmap: row.get(4)?,
            layer_render_thumbnail: row.get(5)?,
        })
    }
}

impl Record for LayerThumbnail {
    const SELECT: &'static str =
        "SELECT MainId, CanvasId, LayerId, ThumbnailCanvasWidth, ThumbnailCanvasHeight, \
         ThumbnailOffscreen FROM LayerThumbnail;";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            main_id: row.get(0)?,
            canvas_id: row.get(1)?,
            layer_id: row.get(2)?,
            thumbnail_canvas_width: row.get(3)?,
            thumbnail_canvas_height: row.get(4)?,
            thumbnail_offscreen: row.get(5)?,
        })
    }
}

impl Record for Offscreen {
    const SELECT: &'static str = "SELECT MainId, CanvasId, LayerId, BlockData FROM Offscreen;";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            main_id: row.get(0)?,
            canvas_id: row.get(1)?,
            layer_id: row.get(2)?,
            block_data: text_or_blob(row, 3)?,
        })
    }
}

impl Record for Mipmap {
    const SELECT: &'static str =
        "SELECT MainId, CanvasId, LayerId, MipmapCount, BaseMipmapInfo FROM Mipmap;";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            main_id: row.get(0)?,
            canvas_id: row.get(1)?,
            layer_id: row.get(2)?,
            mipmap_count: row.get(3)?,
            base_mipmap_info: row.get(4)?,
        })
    }
}

impl Record for MipmapInfo {
    const SELECT: &'static str =
        "SELECT MainId, CanvasId, LayerId, ThisScale, Offscreen, NextIndex FROM MipmapInfo;";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            main_id: row.get(0)?,
            canvas_id: row.get(1)?,
            layer_id: row.get(2)?,
            this_scale: row.get::<_, Option<f64>>(3)?.unwrap_or_default(),
            offscreen: row.get(4)?,
            next_index: row.get(5)?,
        })
    }
}

/// `BlockData` carries blob affinity in files written by the editor, but the
/// column type is declared TEXT; accept either.
fn text_or_blob(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        _ => String::new(),
    })
}

/// The six record lists of the embedded database, plus first-match indexes
/// built once at load time. Linear rescans on every lookup would be quadratic
/// over documents with many layers.
pub(crate) struct Database {
    canvas_previews: Vec<CanvasPreview>,
    layers: Vec<Layer>,
    thumbnails: Vec<LayerThumbnail>,
    offscreens: Vec<Offscreen>,
    mipmaps: Vec<Mipmap>,
    mipmap_infos: Vec<MipmapInfo>,

    layer_index: LinkedHashMap<(i64, i64), usize>,
    thumbnail_index: LinkedHashMap<(i64, i64), usize>,
    offscreen_index: LinkedHashMap<i64, usize>,
    mipmap_index: LinkedHashMap<i64, usize>,
    mipmap_info_index: LinkedHashMap<i64, usize>,
}

/// Everything needed to fetch and reshape a layer's pixels.
pub(crate) struct Resolved<'db> {
    pub(crate) external_id: &'db str,
    pub(crate) width: i64,
    pub(crate) height: i64,
}

impl Database {
    /// Opens the embedded database blob and materialises every record list.
    ///
    /// The blob is staged into a named temporary file for the SQLite driver;
    /// the file is removed before returning, on the error paths too (the
    /// guard deletes it on drop).
    pub(crate) fn read(blob: &[u8]) -> Result<Self> {
        let mut tmp = NamedTempFile::new()?;
        tmp.write_all(blob)?;
        tmp.flush()?;

        let conn = Connection::open_with_flags(
            tmp.path(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let canvas_previews = read_all::<CanvasPreview>(&conn)?;
        let layers = read_all::<Layer>(&conn)?;
        let thumbnails = read_all::<LayerThumbnail>(&conn)?;
        let offscreens = read_all::<Offscreen>(&conn)?;
        let mipmaps = read_all::<Mipmap>(&conn)?;
        let mipmap_infos = read_all::<MipmapInfo>(&conn)?;

        drop(conn);
        tmp.close()?;

        Ok(Self {
            layer_index: index_by(&layers, |layer| (layer.canvas_id, layer.main_id)),
            thumbnail_index: index_by(&thumbnails, |thumb| (thumb.canvas_id, thumb.main_id)),
            offscreen_index: index_by(&offscreens, |offscreen| offscreen.main_id),
            mipmap_index: index_by(&mipmaps, |mipmap| mipmap.main_id),
            mipmap_info_index: index_by(&mipmap_infos, |info| info.main_id),
            canvas_previews,
            layers,
            thumbnails,
            offscreens,
            mipmaps,
            mipmap_infos,
        })
    }

    pub(crate) fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub(crate) fn canvas_previews(&self) -> &[CanvasPreview] {
        &self.canvas_previews
    }

    /// Joins Layer → Mipmap → MipmapInfo → Offscreen down to the external
    /// data identifier, picking up the canvas dimensions from the layer's
    /// thumbnail record on the way.
    ///
    /// `None` anywhere along the chain means the layer has no raster data;
    /// that is a normal outcome, not an error.
    pub(crate) fn resolve(&self, canvas_id: i64, layer_id: i64) -> Option<Resolved<'_>> {
        let layer = &self.layers[*self.layer_index.get(&(canvas_id, layer_id))?];
        let thumbnail = &self.thumbnails[*self.thumbnail_index.get(&(canvas_id, layer_id))?];

        let mipmap = &self.mipmaps[*self.mipmap_index.get(&layer.layer_render_mipmap?)?];
        let info = &self.mipmap_infos[*self.mipmap_info_index.get(&mipmap.base_mipmap_info?)?];
        let offscreen = &self.offscreens[*self.offscreen_index.get(&info.offscreen?)?];

        Some(Resolved {
            external_id: &offscreen.block_data,
            width: thumbnail.thumbnail_canvas_width,
            height: thumbnail.thumbnail_canvas_height,
        })
    }
}

fn read_all<R: Record>(conn: &Connection) -> rusqlite::Result<Vec<R>> {
    let mut stmt = conn.prepare(R::SELECT)?;
    let rows = stmt.query_map([], |row| R::from_row(row))?;

    rows.collect()
}

/// First record wins on duplicate keys; later duplicates stay in the list but
/// never resolve.
fn index_by<R, K, F>(records: &[R], key: F) -> LinkedHashMap<K, usize>
where
    K: Eq + Hash,
    F: Fn(&R) -> K,
{
    let mut index = LinkedHashMap::new();
    for (at, record) in records.iter().enumerate() {
        index.entry(key(record)).or_insert(at);
    }

    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::tests::{raster_layer, sqlite_blob};
    use eyre::Result;
    use rusqlite::params;

    #[test]
    fn record_lists_are_materialised() -> Result<()> {
        let blob = sqlite_blob(|conn| {
            raster_layer(conn, 1, 3, "Background", "extrnlid001", 640, 480);
        });
        let db = Database::read(&blob)?;

        assert_eq!(db.layers().len(), 1);
        assert_eq!(db.layers()[0].layer_name, "Background");
        assert_eq!(db.layers()[0].layer_uuid, "uuid-3");

        Ok(())
    }

    #[test]
    fn resolve_walks_the_whole_chain() -> Result<()> {
        let blob = sqlite_blob(|conn| {
            raster_layer(conn, 1, 3, "Background", "extrnlid001", 640, 480);
        });
        let db = Database::read(&blob)?;

        let resolved = db.resolve(1, 3).unwrap();
        assert_eq!(resolved.external_id, "extrnlid001");
        assert_eq!((resolved.width, resolved.height), (640, 480));

        Ok(())
    }

    #[test]
    fn resolve_is_deterministic() -> Result<()> {
        let blob = sqlite_blob(|conn| {
            raster_layer(conn, 1, 3, "a", "first", 10, 10);
            raster_layer(conn, 1, 4, "b", "second", 10, 10);
        });
        let db = Database::read(&blob)?;

        let one = db.resolve(1, 4).unwrap().external_id.to_owned();
        let two = db.resolve(1, 4).unwrap().external_id.to_owned();
        assert_eq!(one, two);
        assert_eq!(one, "second");

        Ok(())
    }

    #[test]
    fn missing_mipmap_row_resolves_to_none() -> Result<()> {
        let blob = sqlite_blob(|conn| {
            // The render-mipmap id points at nothing.
            conn.execute(
                "INSERT INTO Layer VALUES (3, 1, 'Text', 'uuid-3', 999, NULL)",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO LayerThumbnail VALUES (3, 1, 3, 100, 100, NULL)",
                [],
            )
            .unwrap();
        });
        let db = Database::read(&blob)?;

        assert!(db.resolve(1, 3).is_none());

        Ok(())
    }

    #[test]
    fn null_render_mipmap_resolves_to_none() -> Result<()> {
        let blob = sqlite_blob(|conn| {
            conn.execute(
                "INSERT INTO Layer VALUES (3, 1, 'Folder', 'uuid-3', NULL, NULL)",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO LayerThumbnail VALUES (3, 1, 3, 100, 100, NULL)",
                [],
            )
            .unwrap();
        });
        let db = Database::read(&blob)?;

        assert!(db.resolve(1, 3).is_none());

        Ok(())
    }

    #[test]
    fn unknown_layer_resolves_to_none() -> Result<()> {
        let blob = sqlite_blob(|_| {});
        let db = Database::read(&blob)?;

        assert!(db.resolve(1, 1).is_none());

        Ok(())
    }

    #[test]
    fn first_duplicate_wins() -> Result<()> {
        let blob = sqlite_blob(|conn| {
            raster_layer(conn, 1, 3, "first", "extrnlid001", 10, 10);
            // Same (canvas, layer) key, different chain.
            conn.execute(
                "INSERT INTO Layer VALUES (3, 1, 'second', 'uuid-dup', 9103, NULL)",
                [],
            )
            .unwrap();
        });
        let db = Database::read(&blob)?;

        assert_eq!(db.layers().len(), 2);
        assert_eq!(db.resolve(1, 3).unwrap().external_id, "extrnlid001");

        Ok(())
    }

    #[test]
    fn block_data_blob_affinity_is_accepted() -> Result<()> {
        let blob = sqlite_blob(|conn| {
            conn.execute(
                "INSERT INTO Offscreen VALUES (1, 1, 1, ?1)",
                params![b"as-blob".to_vec()],
            )
            .unwrap();
            conn.execute("INSERT INTO Offscreen VALUES (2, 1, 1, 'as-text')", [])
                .unwrap();
        });
        let db = Database::read(&blob)?;

        assert_eq!(db.offscreens[0].block_data, "as-blob");
        assert_eq!(db.offscreens[1].block_data, "as-text");

        Ok(())
    }

    #[test]
    fn garbage_blob_is_a_db_error() {
        assert!(Database::read(&[0xDE; 128]).is_err());
    }
}
