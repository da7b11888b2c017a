use super::{Chunk, Envelope, CHUNK_HEADER_LEN};
use crate::{doc::FormatError, internals::binreader::ByteReader};
use flate2::read::ZlibDecoder;
use std::{borrow::Cow, io::Read};

type Result<T> = std::result::Result<T, FormatError>;

/// UTF-16-BE `"Bl"`. When the second header field holds this value the
/// sub-block starts directly with its name; otherwise the first field is a
/// data length and the second the name length.
const NAME_SENTINEL: u32 = 0x0042_006C;

/// Names are short ASCII identifiers; anything longer means the framing has
/// been lost.
const MAX_NAME_LEN: u32 = 256;

/// Concatenated tile payload of one external-data chunk.
pub(crate) struct ExternalData {
    pub(crate) data: Vec<u8>,
    /// Raw `BlockCheckSum` fields, in encounter order. Kept opaque; nothing
    /// validates them yet.
    pub(crate) checksums: Vec<[u32; 6]>,
}

/// Decodes the first external-data chunk whose leading identifier equals
/// `id`, or `None` when no chunk carries that identifier.
pub(crate) fn find(bytes: &[u8], envelope: &Envelope, id: &str) -> Result<Option<ExternalData>> {
    for chunk in envelope.externals() {
        if identifier(bytes, chunk)? == id {
            return decode(bytes, chunk).map(Some);
        }
    }

    Ok(None)
}

/// Reads the UTF-8 identifier string at the head of an external-data chunk.
fn identifier<'a>(bytes: &'a [u8], chunk: &Chunk) -> Result<Cow<'a, str>> {
    let mut reader = ByteReader::with_position(&bytes[..chunk.end], chunk.start + CHUNK_HEADER_LEN);

    let len = reader.read_u64()? as usize;
    reader.read_slice(len).map(String::from_utf8_lossy)
}

/// Walks the named sub-blocks of an external-data chunk and concatenates the
/// inflated tile payloads in encounter order.
pub(crate) fn decode(bytes: &[u8], chunk: &Chunk) -> Result<ExternalData> {
    // Capping the reader at the chunk boundary turns any sub-block that
    // claims bytes past it into a `TruncatedChunk` instead of a silent read
    // into the next chunk.
    let mut reader = ByteReader::with_position(&bytes[..chunk.end], chunk.start + CHUNK_HEADER_LEN);

    let id_len = reader.read_u64()? as usize;
    reader.skip(id_len)?;

    // Declared external-data size. Not authoritative: observed files disagree
    // with it without consequence, so it is only cross-checked.
    let declared = reader.read_u64()?;
    if declared as usize != chunk.end - reader.position() {
        log::warn!(
            "external data declares {declared} bytes, chunk holds {}",
            chunk.end - reader.position()
        );
    }

    let mut data = Vec::new();
    let mut checksums = Vec::new();

    while reader.position() < chunk.end {
        let header_start = reader.position();
        let first = reader.read_u32()?;
        let second = reader.read_u32()?;

        let (name_len, data_len) = if second == NAME_SENTINEL {
            // `first` was the name length and `second` the first two name
            // characters; rewind so the name read below starts at them.
            reader.set_position(header_start + 4);
            (first, 0)
        } else {
            (second, first)
        };

        if name_len >= MAX_NAME_LEN {
            return Err(FormatError::TruncatedChunk {
                offset: header_start,
            });
        }

        let name = read_utf16_be(&mut reader, name_len as usize)?;
        let block_start = reader.position();

        match name.as_str() {
            "BlockDataBeginChunk" => {
                reader.skip(4)?; // block index
                let uncompressed_size = reader.read_u32()? as usize;
                reader.skip(8)?; // block width, block height
                let exist_flag = reader.read_u32()?;

                if exist_flag > 0 {
                    let block_len = reader.read_u32()?;
                    let block_len_2 = reader.read_u32_le()?;

                    if u64::from(block_len_2) < u64::from(block_len).saturating_sub(4) {
                        log::error!("block length mismatch: {block_len_2} < {block_len} - 4");
                    }

                    let tile = inflate(reader.read_slice(block_len_2 as usize)?)?;
                    if tile.len() != uncompressed_size {
                        log::error!(
                            "uncompressed size mismatch: got {}, header says {uncompressed_size}",
                            tile.len()
                        );
                    }

                    data.extend_from_slice(&tile);
                    reader.set_position(block_start + 24 + block_len as usize);
                } else {
                    // Absent tile: fully transparent, fully black.
                    data.resize(data.len() + uncompressed_size, 0);
                    reader.set_position(block_start + 20);
                }
            }
            "BlockCheckSum" => {
                let mut fields = [0u32; 6];
                for field in &mut fields {
                    *field = reader.read_u32()?;
                }

                checksums.push(fields);
                reader.set_position(block_start + 24);
            }
            "BlockStatus" => {
                reader.skip(24)?; // six bookkeeping fields
                reader.set_position(block_start + 24);
            }
            "BlockDataEndChunk" => {}
            _ => reader.set_position(block_start + data_len as usize),
        }
    }

    Ok(ExternalData { data, checksums })
}

fn read_utf16_be(reader: &mut ByteReader<'_>, len: usize) -> Result<String> {
    let bytes = reader.read_slice(len * 2)?;
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]));

    Ok(char::decode_utf16(units)
        .map(|unit| unit.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect())
}

fn inflate(compressed: &[u8]) -> Result<Vec<u8>> {
    let mut tile = Vec::new();

    ZlibDecoder::new(compressed)
        .read_to_end(&mut tile)
        .map_err(|_| FormatError::Decompression)?;

    Ok(tile)
}
