//! Pixel data streams spanning consecutive IDAT chunks.
//!
//! [`IdatReader`] presents the payloads of a run of IDAT chunks as one
//! contiguous byte stream for the decompressor. [`IdatWriter`] does the
//! reverse, cutting the compressor output into IDAT chunks of a fixed size.

use std::io::{self, Read, Write};

use super::chunk::{ChunkHeader, ChunkReader, ChunkType, ChunkWriter};
use crate::error::Result;

/// Default payload size of emitted IDAT chunks.
pub const DEFAULT_IDAT_SIZE: usize = 32 * 1024;

/// Reads the concatenated payloads of consecutive IDAT chunks.
///
/// Each chunk's CRC is checked as its end is reached. Zero-length IDAT
/// chunks are passed over. The stream ends at the first non-IDAT chunk,
/// whose header is kept for the caller.
pub struct IdatReader<R> {
    chunks: ChunkReader<R>,
    current: ChunkHeader,
    remaining: u32,
    verify_crc: bool,
    next: Option<ChunkHeader>,
    chunk_count: u32,
}

impl<R: Read> IdatReader<R> {
    /// Starts streaming from an IDAT chunk whose header was just read.
    pub fn new(chunks: ChunkReader<R>, first: ChunkHeader, verify_crc: bool) -> Self {
        debug_assert_eq!(first.chunk_type, ChunkType::IDAT);
        Self {
            chunks,
            current: first,
            remaining: first.length,
            verify_crc,
            next: None,
            chunk_count: 1,
        }
    }

    /// Turns CRC checking of the remaining IDAT chunks on or off.
    pub fn set_verify_crc(&mut self, verify: bool) {
        self.verify_crc = verify;
    }

    /// IDAT chunks entered so far.
    pub fn chunk_count(&self) -> u32 {
        self.chunk_count
    }

    /// Bytes consumed from the underlying stream.
    pub fn offset(&self) -> u64 {
        self.chunks.offset()
    }

    /// True once the header after the last IDAT chunk has been read.
    pub fn is_done(&self) -> bool {
        self.next.is_some()
    }

    /// Finishes the current chunk and opens the next one.
    fn next_chunk(&mut self) -> Result<()> {
        self.chunks.read_crc(self.current.chunk_type, self.verify_crc)?;
        let header = self.chunks.read_header()?;
        if header.chunk_type == ChunkType::IDAT {
            self.current = header;
            self.remaining = header.length;
            self.chunk_count += 1;
        } else {
            log::debug!(
                "pixel data spans {} IDAT chunks, next chunk {}",
                self.chunk_count,
                header.chunk_type
            );
            self.next = Some(header);
        }
        Ok(())
    }

    /// Discards whatever pixel data is left, up to the next non-IDAT chunk.
    pub fn force_end(&mut self) -> Result<()> {
        io::copy(self, &mut io::sink())?;
        Ok(())
    }

    /// Returns the chunk reader and the header of the chunk following the
    /// pixel data, if it was reached.
    pub fn into_parts(self) -> (ChunkReader<R>, Option<ChunkHeader>) {
        (self.chunks, self.next)
    }
}

impl<R: Read> Read for IdatReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.next.is_none() {
            if self.remaining > 0 {
                let n = buf.len().min(self.remaining as usize);
                self.chunks.read_partial(&mut buf[..n])?;
                self.remaining -= n as u32;
                return Ok(n);
            }
            self.next_chunk()?;
        }
        Ok(0)
    }
}

/// Splits a byte stream into IDAT chunks of at most `max_size` bytes.
pub struct IdatWriter<W: Write> {
    chunks: ChunkWriter<W>,
    buf: Vec<u8>,
    max_size: usize,
    chunk_count: u32,
}

impl<W: Write> IdatWriter<W> {
    /// Wraps a chunk writer positioned where pixel data belongs.
    pub fn new(chunks: ChunkWriter<W>, max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            chunks,
            buf: Vec::with_capacity(max_size.min(DEFAULT_IDAT_SIZE)),
            max_size,
            chunk_count: 0,
        }
    }

    fn emit(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.chunks.write_chunk(ChunkType::IDAT, &self.buf)?;
        self.chunk_count += 1;
        self.buf.clear();
        Ok(())
    }

    /// Writes out the last partial chunk and returns the chunk writer.
    pub fn finish(mut self) -> Result<(ChunkWriter<W>, u32)> {
        self.emit()?;
        log::debug!("wrote {} IDAT chunks", self.chunk_count);
        Ok((self.chunks, self.chunk_count))
    }
}

impl<W: Write> Write for IdatWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = self.max_size - self.buf.len();
        let n = room.min(data.len());
        self.buf.extend_from_slice(&data[..n]);
        if self.buf.len() == self.max_size {
            self.emit()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.chunks.get_mut().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::png::chunk::write_chunk;

    fn stream(parts: &[(&[u8; 4], &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (tag, data) in parts {
            write_chunk(&mut out, ChunkType(**tag), data).unwrap();
        }
        out
    }

    #[test]
    fn reads_across_chunks_and_stops_at_trailer() {
        let bytes = stream(&[
            (b"IDAT", b"abc"),
            (b"IDAT", b""),
            (b"IDAT", b"defg"),
            (b"IEND", b""),
        ]);
        let mut chunks = ChunkReader::new(bytes.as_slice(), 0);
        let first = chunks.read_header().unwrap();
        let mut idat = IdatReader::new(chunks, first, true);
        let mut out = Vec::new();
        idat.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcdefg");
        assert_eq!(idat.chunk_count(), 3);
        let (_, next) = idat.into_parts();
        assert_eq!(next.unwrap().chunk_type, ChunkType::IEND);
    }

    #[test]
    fn corrupt_idat_crc_surfaces_as_integrity_error() {
        let mut bytes = stream(&[(b"IDAT", b"abc"), (b"IEND", b"")]);
        bytes[9] ^= 0xFF;
        let mut chunks = ChunkReader::new(bytes.as_slice(), 0);
        let first = chunks.read_header().unwrap();
        let mut idat = IdatReader::new(chunks, first, true);
        let err: Error = idat.read_to_end(&mut Vec::new()).unwrap_err().into();
        assert!(matches!(err, Error::Integrity { chunk: ChunkType::IDAT, .. }));

        let mut chunks = ChunkReader::new(bytes.as_slice(), 0);
        let first = chunks.read_header().unwrap();
        let mut idat = IdatReader::new(chunks, first, false);
        assert!(idat.force_end().is_ok());
        assert!(idat.is_done());
    }

    #[test]
    fn writer_splits_at_max_size() {
        let mut out = Vec::new();
        let mut idat = IdatWriter::new(ChunkWriter::new(&mut out), 4);
        idat.write_all(b"0123456789").unwrap();
        let (_, count) = idat.finish().unwrap();
        assert_eq!(count, 3);

        let mut chunks = ChunkReader::new(out.as_slice(), 0);
        let sizes: Vec<usize> = (0..3).map(|_| chunks.read_chunk(true).unwrap().data.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }
}
