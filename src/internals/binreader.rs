use crate::doc::FormatError;

type Result<T> = std::result::Result<T, FormatError>;

macro_rules! read_int {
    ($fn:ident, $Ty:ty) => {
        #[inline]
        pub(crate) fn $fn(&mut self) -> Result<$Ty> {
            self.read_array().map(<$Ty>::from_be_bytes)
        }
    };
}

/// Bounds-checked cursor over an in-memory byte slice.
///
/// All multi-byte fields of the chunked envelope are big-endian; the single
/// little-endian field gets its own method. Reading past the end of the slice
/// yields [`FormatError::TruncatedChunk`] with the cursor position at the time
/// of the failed read.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    #[inline]
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub(crate) fn with_position(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    #[inline]
    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    /// Absolute seek. The position may point past the end of the buffer; the
    /// next read will fail instead.
    #[inline]
    pub(crate) fn set_position(&mut self, pos: usize) {
        self.pos = pos;
    }

    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub(crate) fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(FormatError::TruncatedChunk { offset: self.pos })?;

        let bytes = &self.buf[self.pos..end];
        self.pos = end;

        Ok(bytes)
    }

    #[inline]
    pub(crate) fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.read_slice(N)
            .map(|bytes| bytes.try_into().expect("read_slice(N)"))
    }

    #[inline]
    pub(crate) fn skip(&mut self, len: usize) -> Result<()> {
        self.read_slice(len).map(|_| ())
    }

    read_int! { read_u32, u32 }
    read_int! { read_u64, u64 }

    /// The one multi-byte field in the whole format that is stored
    /// little-endian (`block_len_2` inside a tile sub-block).
    #[inline]
    pub(crate) fn read_u32_le(&mut self) -> Result<u32> {
        self.read_array().map(u32::from_le_bytes)
    }
}
