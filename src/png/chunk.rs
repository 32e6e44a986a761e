//! PNG chunk framing.
//!
//! Every chunk on the wire is `[length: u32 BE][tag: 4 bytes][payload][crc: u32 BE]`
//! where the CRC covers the tag and the payload.

use std::fmt;
use std::io::{self, Read, Write};

use crc32fast::Hasher;

use crate::error::{Error, Result};

/// Largest payload length a chunk may declare.
pub const MAX_CHUNK_LEN: u32 = (1 << 31) - 1;

/// Four-letter chunk tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkType(pub [u8; 4]);

#[allow(non_upper_case_globals)]
impl ChunkType {
    /// Image header.
    pub const IHDR: ChunkType = ChunkType(*b"IHDR");
    /// Palette.
    pub const PLTE: ChunkType = ChunkType(*b"PLTE");
    /// Image data.
    pub const IDAT: ChunkType = ChunkType(*b"IDAT");
    /// Image trailer.
    pub const IEND: ChunkType = ChunkType(*b"IEND");
    /// Primary chromaticities.
    pub const cHRM: ChunkType = ChunkType(*b"cHRM");
    /// Image gamma.
    pub const gAMA: ChunkType = ChunkType(*b"gAMA");
    /// Embedded ICC profile.
    pub const iCCP: ChunkType = ChunkType(*b"iCCP");
    /// Significant bits.
    pub const sBIT: ChunkType = ChunkType(*b"sBIT");
    /// Standard RGB colour space.
    pub const sRGB: ChunkType = ChunkType(*b"sRGB");
    /// Background colour.
    pub const bKGD: ChunkType = ChunkType(*b"bKGD");
    /// Palette histogram.
    pub const hIST: ChunkType = ChunkType(*b"hIST");
    /// Transparency.
    pub const tRNS: ChunkType = ChunkType(*b"tRNS");
    /// Physical pixel dimensions.
    pub const pHYs: ChunkType = ChunkType(*b"pHYs");
    /// Suggested palette.
    pub const sPLT: ChunkType = ChunkType(*b"sPLT");
    /// Last modification time.
    pub const tIME: ChunkType = ChunkType(*b"tIME");
    /// Latin-1 text.
    pub const tEXt: ChunkType = ChunkType(*b"tEXt");
    /// Compressed Latin-1 text.
    pub const zTXt: ChunkType = ChunkType(*b"zTXt");
    /// International (UTF-8) text.
    pub const iTXt: ChunkType = ChunkType(*b"iTXt");
    /// Image offset.
    pub const oFFs: ChunkType = ChunkType(*b"oFFs");
    /// Stereo layout.
    pub const sTER: ChunkType = ChunkType(*b"sTER");
    /// Animation frame data.
    pub const fdAT: ChunkType = ChunkType(*b"fdAT");

    /// Builds a tag from a 4-character ASCII string.
    pub fn from_ascii(tag: &str) -> Result<Self> {
        let bytes: [u8; 4] = tag
            .as_bytes()
            .try_into()
            .map_err(|_| Error::InvalidChunk(format!("chunk tag {tag:?} is not 4 bytes")))?;
        if !bytes.iter().all(u8::is_ascii_alphabetic) {
            return Err(Error::InvalidChunk(format!("chunk tag {tag:?} is not alphabetic")));
        }
        Ok(ChunkType(bytes))
    }

    /// Critical chunks have an uppercase first letter.
    #[inline]
    pub const fn is_critical(self) -> bool {
        self.0[0] & 0x20 == 0
    }

    /// Public chunks have an uppercase second letter.
    #[inline]
    pub const fn is_public(self) -> bool {
        self.0[1] & 0x20 == 0
    }

    /// Chunks with a lowercase fourth letter may be copied by editors
    /// that do not understand them.
    #[inline]
    pub const fn is_safe_to_copy(self) -> bool {
        self.0[3] & 0x20 != 0
    }

    /// Tag bytes as ASCII text.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkType({})", self.as_str())
    }
}

/// Length and tag of a chunk whose payload has not been read yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Payload length in bytes.
    pub length: u32,
    /// Chunk tag.
    pub chunk_type: ChunkType,
    /// Byte offset of the length field in the stream.
    pub offset: u64,
}

/// One chunk as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    /// Chunk tag.
    pub chunk_type: ChunkType,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// CRC stored after the payload.
    pub crc: u32,
    /// Byte offset of the length field in the stream.
    pub offset: u64,
}

/// Pulls chunks off a byte stream, tracking the offset and total bytes read.
///
/// The reader owns its CRC engine and resets it for every chunk.
pub struct ChunkReader<R> {
    inner: R,
    offset: u64,
    max_total_bytes: u64,
    hasher: Hasher,
}

impl<R: Read> ChunkReader<R> {
    /// Wraps a stream. `max_total_bytes == 0` disables the total ceiling.
    pub fn new(inner: R, max_total_bytes: u64) -> Self {
        Self {
            inner,
            offset: 0,
            max_total_bytes,
            hasher: Hasher::new(),
        }
    }

    /// Bytes consumed so far.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Unwraps the underlying stream.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner.read_exact(buf)?;
        self.advance(buf.len() as u64)
    }

    fn advance(&mut self, n: u64) -> Result<()> {
        self.offset += n;
        if self.max_total_bytes > 0 && self.offset > self.max_total_bytes {
            return Err(Error::ResourceLimitExceeded {
                what: "total bytes read",
                limit: self.max_total_bytes,
            });
        }
        Ok(())
    }

    /// Consumes and checks the 8-byte file signature.
    pub fn read_signature(&mut self) -> Result<()> {
        let mut sig = [0u8; 8];
        self.fill(&mut sig).map_err(|err| match err {
            Error::UnexpectedEnd => Error::Malformed("stream too short for PNG signature".into()),
            other => other,
        })?;
        if sig != super::PNG_SIGNATURE {
            return Err(Error::Malformed("bad PNG signature".into()));
        }
        Ok(())
    }

    /// Reads the length and tag of the next chunk.
    ///
    /// Leaves the CRC engine primed with the tag so the payload can be
    /// streamed through [`ChunkReader::read_partial`].
    pub fn read_header(&mut self) -> Result<ChunkHeader> {
        let offset = self.offset;
        let mut head = [0u8; 8];
        self.fill(&mut head)?;
        let length = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
        let chunk_type = ChunkType([head[4], head[5], head[6], head[7]]);
        if length > MAX_CHUNK_LEN {
            return Err(Error::Malformed(format!(
                "{chunk_type} chunk declares length {length}"
            )));
        }
        self.hasher.reset();
        self.hasher.update(&chunk_type.0);
        log::trace!("chunk {chunk_type} len={length} at offset {offset}");
        Ok(ChunkHeader {
            length,
            chunk_type,
            offset,
        })
    }

    /// Reads exactly `buf.len()` payload bytes of the current chunk.
    pub fn read_partial(&mut self, buf: &mut [u8]) -> Result<()> {
        self.fill(buf)?;
        self.hasher.update(buf);
        Ok(())
    }

    /// Reads the trailing CRC and compares it with the running checksum.
    pub fn read_crc(&mut self, chunk_type: ChunkType, verify: bool) -> Result<u32> {
        let mut crc = [0u8; 4];
        self.fill(&mut crc)?;
        let expected = u32::from_be_bytes(crc);
        if verify {
            let actual = self.hasher.clone().finalize();
            if actual != expected {
                return Err(Error::Integrity {
                    chunk: chunk_type,
                    expected,
                    actual,
                });
            }
        }
        Ok(expected)
    }

    /// Reads a whole payload plus CRC for a header already consumed.
    pub fn read_body(&mut self, header: &ChunkHeader, verify: bool) -> Result<RawChunk> {
        let mut data = vec![0u8; header.length as usize];
        self.read_partial(&mut data)?;
        let crc = self.read_crc(header.chunk_type, verify)?;
        Ok(RawChunk {
            chunk_type: header.chunk_type,
            data,
            crc,
            offset: header.offset,
        })
    }

    /// Discards the payload and CRC of a header already consumed.
    pub fn skip_body(&mut self, header: &ChunkHeader) -> Result<()> {
        let total = header.length as u64 + 4;
        let copied = io::copy(&mut (&mut self.inner).take(total), &mut io::sink())?;
        if copied < total {
            return Err(Error::UnexpectedEnd);
        }
        self.advance(total)
    }

    /// Reads one complete chunk.
    pub fn read_chunk(&mut self, verify: bool) -> Result<RawChunk> {
        let header = self.read_header()?;
        self.read_body(&header, verify)
    }
}

/// Frames chunks onto a byte sink with a CRC engine owned by the stream.
pub struct ChunkWriter<W> {
    inner: W,
    hasher: Hasher,
}

impl<W: Write> ChunkWriter<W> {
    /// Wraps a sink.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
        }
    }

    /// Writes the 8-byte file signature.
    pub fn write_signature(&mut self) -> Result<()> {
        self.inner.write_all(&super::PNG_SIGNATURE)?;
        Ok(())
    }

    /// Write a chunk (length, type, data, CRC32).
    pub fn write_chunk(&mut self, chunk_type: ChunkType, data: &[u8]) -> Result<()> {
        if data.len() > MAX_CHUNK_LEN as usize {
            return Err(Error::InvalidChunk(format!(
                "{chunk_type} payload of {} bytes is too long",
                data.len()
            )));
        }
        self.hasher.reset();
        self.hasher.update(&chunk_type.0);
        self.hasher.update(data);
        let crc = self.hasher.clone().finalize();

        self.inner.write_all(&(data.len() as u32).to_be_bytes())?;
        self.inner.write_all(&chunk_type.0)?;
        self.inner.write_all(data)?;
        self.inner.write_all(&crc.to_be_bytes())?;
        Ok(())
    }

    /// Mutable access to the sink.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Flushes and unwraps the sink.
    pub fn into_inner(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Write a single chunk to `output` with a fresh CRC engine.
pub fn write_chunk<W: Write>(output: &mut W, chunk_type: ChunkType, data: &[u8]) -> Result<()> {
    ChunkWriter::new(output).write_chunk(chunk_type, data)
}
