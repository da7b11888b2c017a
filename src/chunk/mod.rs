pub(crate) mod external;

use crate::{doc::FormatError, internals::binreader::ByteReader};

type Result<T> = std::result::Result<T, FormatError>;

pub(crate) const MAGIC: &[u8; 8] = b"CSFCHUNK";

/// Bytes between the magic number and the first chunk.
pub(crate) const RESERVED_LEN: usize = 16;
/// Tag plus big-endian payload size.
pub(crate) const CHUNK_HEADER_LEN: usize = 16;

pub(crate) const TAG_HEAD: &[u8; 8] = b"CHNKHead";
pub(crate) const TAG_EXTERNAL: &[u8; 8] = b"CHNKExta";
pub(crate) const TAG_SQLITE: &[u8; 8] = b"CHNKSQLi";
pub(crate) const TAG_FOOT: &[u8; 8] = b"CHNKFoot";

/// A type-tagged, length-prefixed segment of the outer file envelope.
///
/// `start` is the absolute offset of the tag, `end` one past the payload.
/// Descriptors are recorded once during the envelope scan and never change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Chunk {
    pub(crate) tag: [u8; 8],
    pub(crate) size: u64,
    pub(crate) start: usize,
    pub(crate) end: usize,
}

/// The chunk table of a `.clip` file, plus the location of the embedded
/// SQLite blob.
pub(crate) struct Envelope {
    chunks: Vec<Chunk>,
    sqlite_offset: usize,
}

impl Envelope {
    /// Enumerates every chunk of the file.
    ///
    /// The embedded database blob runs from byte 16 of the `CHNKSQLi` chunk
    /// through end-of-file, not through the chunk's declared end; writers pad
    /// the database past the chunk boundary and readers are expected to
    /// follow.
    pub(crate) fn scan(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);

        if reader.read_array::<8>()? != *MAGIC {
            return Err(FormatError::InvalidMagic);
        }
        reader.skip(RESERVED_LEN)?;

        let mut chunks = Vec::new();
        while reader.remaining() > 0 {
            let start = reader.position();
            let tag = reader.read_array::<8>()?;
            let size = reader.read_u64()?;

            let end = reader
                .position()
                .checked_add(size as usize)
                .filter(|end| *end <= bytes.len())
                .ok_or(FormatError::TruncatedChunk { offset: start })?;
            reader.set_position(end);

            let chunk = Chunk { tag, size, start, end };
            log::debug!("{chunk:?}");
            chunks.push(chunk);
        }

        if !matches!(chunks.first(), Some(chunk) if chunk.tag == *TAG_HEAD) {
            log::warn!("file does not start with a 'CHNKHead' chunk");
        }
        if !matches!(chunks.last(), Some(chunk) if chunk.tag == *TAG_FOOT) {
            log::warn!("file does not end with a 'CHNKFoot' chunk");
        }

        let mut sqlite_offset = None;
        for chunk in chunks.iter().filter(|chunk| chunk.tag == *TAG_SQLITE) {
            if sqlite_offset.is_some() {
                log::warn!("multiple 'CHNKSQLi' chunks; keeping the last one");
            }
            sqlite_offset = Some(chunk.start + CHUNK_HEADER_LEN);
        }

        Ok(Self {
            chunks,
            sqlite_offset: sqlite_offset.ok_or(FormatError::MissingSqliteChunk)?,
        })
    }

    pub(crate) fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Offset of the first byte of the embedded database blob.
    pub(crate) fn sqlite_offset(&self) -> usize {
        self.sqlite_offset
    }

    /// External-data chunks, in file order.
    pub(crate) fn externals(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks
            .iter()
            .filter(|chunk| chunk.tag == *TAG_EXTERNAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::tests::{chunk, envelope};
    use eyre::Result;

    #[test]
    fn magic_is_validated() {
        let mut bytes = envelope(&[chunk(TAG_SQLITE, &[])]);
        bytes[..8].copy_from_slice(b"NOTACSF!");

        assert_eq!(
            Envelope::scan(&bytes).err(),
            Some(FormatError::InvalidMagic)
        );
    }

    #[test]
    fn chunk_enumeration_accounts_for_every_byte() -> Result<()> {
        let bytes = envelope(&[
            chunk(TAG_HEAD, &[0; 40]),
            chunk(TAG_EXTERNAL, &[1; 17]),
            chunk(TAG_SQLITE, &[2; 33]),
            chunk(TAG_FOOT, &[]),
        ]);
        let envelope = Envelope::scan(&bytes)?;

        let payloads: u64 = envelope.chunks().iter().map(|chunk| chunk.size).sum();
        let headers = (CHUNK_HEADER_LEN * envelope.chunks().len()) as u64;

        assert_eq!(envelope.chunks().len(), 4);
        assert_eq!(
            payloads + headers + (MAGIC.len() + RESERVED_LEN) as u64,
            bytes.len() as u64
        );

        Ok(())
    }

    #[test]
    fn truncated_chunk_is_rejected() {
        let mut bytes = envelope(&[chunk(TAG_SQLITE, &[0; 8])]);
        // Declare more payload than the file holds.
        let start = MAGIC.len() + RESERVED_LEN;
        bytes[start + 8..start + 16].copy_from_slice(&u64::MAX.to_be_bytes());

        assert_eq!(
            Envelope::scan(&bytes).err(),
            Some(FormatError::TruncatedChunk { offset: start })
        );
    }

    #[test]
    fn missing_sqlite_chunk_is_rejected() {
        let bytes = envelope(&[chunk(TAG_HEAD, &[]), chunk(TAG_FOOT, &[])]);

        assert_eq!(
            Envelope::scan(&bytes).err(),
            Some(FormatError::MissingSqliteChunk)
        );
    }

    #[test]
    fn duplicate_sqlite_chunk_keeps_the_last() -> Result<()> {
        let bytes = envelope(&[chunk(TAG_SQLITE, &[0; 4]), chunk(TAG_SQLITE, &[0; 4])]);
        let envelope = Envelope::scan(&bytes)?;

        let last = envelope
            .chunks()
            .iter()
            .rev()
            .find(|chunk| chunk.tag == *TAG_SQLITE)
            .unwrap();

        assert_eq!(envelope.sqlite_offset(), last.start + CHUNK_HEADER_LEN);

        Ok(())
    }

    #[test]
    fn externals_are_listed_in_file_order() -> Result<()> {
        let bytes = envelope(&[
            chunk(TAG_EXTERNAL, &[0; 4]),
            chunk(TAG_SQLITE, &[]),
            chunk(TAG_EXTERNAL, &[0; 2]),
        ]);
        let envelope = Envelope::scan(&bytes)?;

        let sizes: Vec<u64> = envelope.externals().map(|chunk| chunk.size).collect();
        assert_eq!(sizes, [4, 2]);

        Ok(())
    }
}
