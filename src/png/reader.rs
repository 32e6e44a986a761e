//! Row-by-row PNG decoding.
//!
//! The reader loads every chunk up to the pixel data when opened, then
//! inflates and unfilters rows on demand. Once the last row is decoded, or
//! on [`PngReader::finish`], the chunks following the pixel data are read
//! up to the end chunk.

use std::io::Read;

use flate2::read::ZlibDecoder;

use super::bit_depth;
use super::chunk::{ChunkHeader, ChunkReader, ChunkType};
use super::chunks::{Chunk, ChunkGroup};
use super::filter::{self, FilterType};
use super::idat::IdatReader;
use super::interlace::{scatter_row, InterlaceScheduler};
use super::line::{ImageLine, ImageLines};
use super::metadata::{ChunkData, PngMetadata};
use super::{Header, ReaderOptions};
use crate::error::{Error, Result};
use crate::info::ImageInfo;

enum Source<R> {
    /// Inside the pixel data.
    Pixels(Box<ZlibDecoder<IdatReader<R>>>),
    /// End chunk read.
    Finished,
    /// A previous call failed half way.
    Poisoned,
}

impl<R> Default for Source<R> {
    fn default() -> Self {
        Source::Poisoned
    }
}

/// Fully decoded interlaced image, unfiltered raw bytes.
struct Deinterlaced {
    raw: Vec<u8>,
    filters: Vec<FilterType>,
}

/// Streaming PNG decoder.
///
/// Non-interlaced rows must be requested in strictly increasing order.
/// Interlaced images are decoded whole on the first row request and then
/// served in any order.
pub struct PngReader<R: Read> {
    info: ImageInfo,
    header: Header,
    options: ReaderOptions,
    source: Source<R>,
    group: ChunkGroup,
    metadata: PngMetadata,
    metadata_bytes: u64,
    // Current and previous filtered rows, tag byte first.
    rows: [Vec<u8>; 2],
    cur: usize,
    last_row: Option<u32>,
    last_filter: FilterType,
    unpacked: bool,
    deinterlaced: Option<Deinterlaced>,
}

impl<R: Read> PngReader<R> {
    /// Opens a stream with default options.
    pub fn new(inner: R) -> Result<Self> {
        Self::with_options(inner, ReaderOptions::default())
    }

    /// Opens a stream, reading the signature, the header and every chunk
    /// before the pixel data.
    pub fn with_options(inner: R, options: ReaderOptions) -> Result<Self> {
        let mut chunks = ChunkReader::new(inner, options.max_total_bytes);
        chunks.read_signature()?;
        let first = chunks.read_header()?;
        if first.chunk_type != ChunkType::IHDR {
            return Err(Error::Malformed(format!(
                "first chunk is {}, expected IHDR",
                first.chunk_type
            )));
        }
        let raw = chunks.read_body(&first, true)?;
        let header = Header::parse(&raw.data)?;
        let info = ImageInfo::from_header(&header)?;
        log::debug!(
            "opened {}x{} png, depth {}, color {}, interlaced {}",
            info.cols(),
            info.rows(),
            info.bit_depth(),
            info.color_model(),
            header.interlaced
        );

        let mut metadata = PngMetadata::new();
        metadata.push(Chunk::from_raw(raw, ChunkGroup::Header));
        let row_len = info.bytes_per_row() + 1;
        let mut reader = Self {
            info,
            header,
            options,
            source: Source::Poisoned,
            group: ChunkGroup::PreData,
            metadata,
            metadata_bytes: 0,
            rows: [vec![0; row_len], vec![0; row_len]],
            cur: 0,
            last_row: None,
            last_filter: FilterType::None,
            unpacked: false,
            deinterlaced: None,
        };
        reader.read_leading_chunks(chunks)?;
        Ok(reader)
    }

    /// Image description.
    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    /// Parsed header chunk.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Whether rows are Adam7 interlaced.
    pub fn is_interlaced(&self) -> bool {
        self.header.interlaced
    }

    /// Returns sub-byte samples one per slot instead of packed.
    pub fn set_unpacked(&mut self, unpacked: bool) {
        self.unpacked = unpacked;
    }

    /// Chunks loaded so far, with their typed accessors.
    pub fn metadata(&self) -> &PngMetadata {
        &self.metadata
    }

    /// Chunks loaded so far, in stream order.
    pub fn chunks(&self) -> &[Chunk] {
        self.metadata.chunks()
    }

    /// Group of the last chunk read.
    pub fn chunk_group(&self) -> ChunkGroup {
        self.group
    }

    /// Reads chunks until the first IDAT and opens the pixel data stream.
    fn read_leading_chunks(&mut self, mut chunks: ChunkReader<R>) -> Result<()> {
        loop {
            let header = chunks.read_header()?;
            match header.chunk_type {
                ChunkType::IDAT => break self.start_pixel_data(chunks, header),
                ChunkType::IEND => {
                    return Err(Error::Malformed(format!(
                        "IEND before pixel data at offset {}",
                        header.offset
                    )))
                }
                ChunkType::PLTE => {
                    self.group = ChunkGroup::PaletteSection;
                    self.load_chunk(&mut chunks, header, false)?;
                    self.group = ChunkGroup::PostPalette;
                }
                _ => self.load_chunk(&mut chunks, header, false)?,
            }
        }
    }

    fn start_pixel_data(&mut self, chunks: ChunkReader<R>, first: ChunkHeader) -> Result<()> {
        if self.info.indexed() && self.metadata.get(ChunkType::PLTE).is_none() {
            return Err(Error::Malformed("indexed image without PLTE".into()));
        }
        self.group = ChunkGroup::PixelData;
        let mut marker = Chunk::new(ChunkType::IDAT, Vec::new());
        marker.offset = Some(first.offset);
        marker.group = Some(ChunkGroup::PixelData);
        self.metadata.push(marker);

        let idat = IdatReader::new(chunks, first, self.options.crc_check);
        self.source = Source::Pixels(Box::new(ZlibDecoder::new(idat)));
        Ok(())
    }

    /// Loads or skips the chunk whose header was just read.
    fn load_chunk(
        &mut self,
        chunks: &mut ChunkReader<R>,
        header: ChunkHeader,
        force_skip: bool,
    ) -> Result<()> {
        let chunk_type = header.chunk_type;
        let len = header.length as u64;
        let opts = &self.options;
        if opts.max_total_bytes > 0 && chunks.offset() + len + 4 > opts.max_total_bytes {
            return Err(Error::ResourceLimitExceeded {
                what: "total bytes read",
                limit: opts.max_total_bytes,
            });
        }

        let critical = chunk_type.is_critical();
        if critical && !matches!(chunk_type, ChunkType::PLTE | ChunkType::IEND) && !force_skip {
            return Err(Error::Malformed(format!(
                "unexpected critical chunk {chunk_type} at offset {}",
                header.offset
            )));
        }
        let known = opts.registry.is_known(chunk_type);
        let skip = force_skip
            || (!critical
                && (opts.skip_chunk_ids.contains(&chunk_type)
                    || !opts.chunk_load.should_load(chunk_type, known)));
        if skip {
            log::debug!("skipping {chunk_type} ({len} bytes) at offset {}", header.offset);
            return chunks.skip_body(&header);
        }

        if !critical {
            if let Some(err) = self.check_ceilings(len) {
                if !self.options.skip_oversized {
                    return Err(err);
                }
                log::debug!("skipping {chunk_type} at offset {}: {err}", header.offset);
                return chunks.skip_body(&header);
            }
        }

        let raw = chunks.read_body(&header, self.options.crc_check || critical)?;
        if let Err(err) = self.validate(chunk_type, &raw.data) {
            let tolerated = match err {
                Error::ResourceLimitExceeded { .. } => self.options.skip_oversized,
                _ => self.options.lenient,
            };
            if critical || !tolerated {
                return Err(err);
            }
            log::warn!("ignoring {chunk_type} at offset {}: {err}", header.offset);
            return Ok(());
        }
        if !critical {
            self.metadata_bytes += len;
        }
        log::debug!("loaded {chunk_type} ({len} bytes) in {:?}", self.group);
        self.metadata.push(Chunk::from_raw(raw, self.group));
        Ok(())
    }

    /// Room left in the metadata budget, `None` when unbounded.
    fn metadata_room(&self) -> Option<u64> {
        let limit = self.options.max_metadata_bytes;
        (limit > 0).then(|| limit.saturating_sub(self.metadata_bytes))
    }

    /// The ceiling an ancillary chunk of `len` bytes would break, if any.
    fn check_ceilings(&self, len: u64) -> Option<Error> {
        let opts = &self.options;
        if opts.max_chunk_bytes > 0 && len > opts.max_chunk_bytes {
            return Some(Error::ResourceLimitExceeded {
                what: "ancillary chunk size",
                limit: opts.max_chunk_bytes,
            });
        }
        match self.metadata_room() {
            Some(room) if len > room => Some(Error::ResourceLimitExceeded {
                what: "metadata bytes",
                limit: opts.max_metadata_bytes,
            }),
            _ => None,
        }
    }

    fn validate(&self, chunk_type: ChunkType, data: &[u8]) -> Result<()> {
        if let Some(result) = self.options.registry.validate(chunk_type, data) {
            return result;
        }
        let inflate_limit = self.metadata_room().unwrap_or(u64::MAX);
        ChunkData::parse_limited(chunk_type, data, inflate_limit).map(|_| ())
    }

    /// Inflates the next `len + 1` filtered bytes into a fresh slot and
    /// unfilters them against the other slot.
    fn decode_next_row(&mut self, len: usize, bpp: usize) -> Result<FilterType> {
        let Source::Pixels(decoder) = &mut self.source else {
            return Err(Error::Malformed("pixel data already consumed".into()));
        };
        self.cur ^= 1;
        let (first, second) = self.rows.split_at_mut(1);
        let (row, prev) = if self.cur == 0 {
            (&mut first[0], &second[0])
        } else {
            (&mut second[0], &first[0])
        };
        decoder.read_exact(&mut row[..=len]).map_err(|err| match Error::from(err) {
            Error::Io(inner) => Error::Malformed(format!("corrupt pixel data: {inner}")),
            other => other,
        })?;
        let filter = FilterType::from_tag(row[0])?;
        filter::unfilter_row(filter, &mut row[1..=len], &prev[1..=len], bpp);
        self.last_filter = filter;
        Ok(filter)
    }

    fn current_row(&self) -> &[u8] {
        &self.rows[self.cur][1..]
    }

    /// Advances the non-interlaced stream up to `row`.
    fn seek_row(&mut self, row: u32) -> Result<()> {
        if row >= self.info.rows() {
            return Err(Error::InvalidRowRange {
                offset: row,
                count: 1,
                step: 1,
            });
        }
        let next = self.last_row.map_or(0, |r| r + 1);
        if row < next {
            return Err(Error::OutOfOrderAccess {
                requested: row,
                next,
            });
        }
        let (len, bpp) = (self.info.bytes_per_row(), self.info.bytes_per_pixel());
        while self.last_row.map_or(true, |r| r < row) {
            self.decode_next_row(len, bpp)?;
            let current = self.last_row.map_or(0, |r| r + 1);
            self.last_row = Some(current);
            if current + 1 == self.info.rows() {
                self.read_trailer(false)?;
            }
        }
        Ok(())
    }

    /// Decodes every pass of an interlaced image into one raw buffer.
    fn deinterlace(&mut self) -> Result<()> {
        let info = self.info;
        let bpr = info.bytes_per_row();
        let mut raw = vec![0u8; bpr * info.rows() as usize];
        let mut filters = vec![FilterType::None; info.rows() as usize];
        let mut scheduler = InterlaceScheduler::new(info.cols(), info.rows());
        let mut pass_start = true;
        while !scheduler.is_finished() {
            let geometry = *scheduler.geometry();
            let sub = info.with_dimensions(geometry.cols, geometry.rows)?;
            let len = sub.bytes_per_row();
            if pass_start {
                // The slot about to become "previous" starts the pass empty.
                self.rows[self.cur].fill(0);
            }
            let filter = self.decode_next_row(len, info.bytes_per_pixel())?;
            let y = scheduler.image_row() as usize;
            scatter_row(
                &info,
                &geometry,
                &self.current_row()[..len],
                &mut raw[y * bpr..(y + 1) * bpr],
            );
            filters[y] = filter;
            if scheduler.at_last_row() {
                break;
            }
            pass_start = scheduler.advance();
        }
        self.last_row = Some(info.rows() - 1);
        self.deinterlaced = Some(Deinterlaced { raw, filters });
        self.read_trailer(false)
    }

    /// Unfiltered raw bytes and filter of `row`.
    fn raw_row(&mut self, row: u32) -> Result<(&[u8], FilterType)> {
        if self.header.interlaced {
            if row >= self.info.rows() {
                return Err(Error::InvalidRowRange {
                    offset: row,
                    count: 1,
                    step: 1,
                });
            }
            if self.deinterlaced.is_none() {
                if self.last_row.is_some() {
                    // Pixel data was skipped.
                    return Err(Error::OutOfOrderAccess {
                        requested: row,
                        next: self.info.rows(),
                    });
                }
                self.deinterlace()?;
            }
            let bpr = self.info.bytes_per_row();
            let Some(image) = &self.deinterlaced else {
                return Err(Error::Malformed("interlaced image not decoded".into()));
            };
            let y = row as usize;
            Ok((&image.raw[y * bpr..(y + 1) * bpr], image.filters[y]))
        } else {
            self.seek_row(row)?;
            let filter = self.last_filter;
            Ok((self.current_row(), filter))
        }
    }

    fn fill_line<S: bit_depth::Sample>(&mut self, row: u32, line: &mut ImageLine<S>) -> Result<()> {
        let (raw, filter) = self.raw_row(row)?;
        line.load_raw(raw, row, filter);
        Ok(())
    }

    /// Reads one row as 16-bit slots.
    pub fn read_row(&mut self, row: u32) -> Result<ImageLine<u16>> {
        let mut line = ImageLine::new(self.info, !self.unpacked);
        self.fill_line(row, &mut line)?;
        Ok(line)
    }

    /// Reads one row as byte slots; 16-bit samples keep their high byte.
    pub fn read_row_bytes(&mut self, row: u32) -> Result<ImageLine<u8>> {
        let mut line = ImageLine::new(self.info, !self.unpacked);
        self.fill_line(row, &mut line)?;
        Ok(line)
    }

    /// Reads one row into an existing line, reusing its storage.
    pub fn read_line<S: bit_depth::Sample>(&mut self, row: u32, line: &mut ImageLine<S>) -> Result<()> {
        self.fill_line(row, line)
    }

    /// Reads one row into a caller buffer of at least
    /// `samples_per_row` slots, or `samples_per_row_packed` when packed.
    pub fn read_row_into(&mut self, row: u32, buf: &mut [u16]) -> Result<()> {
        let info = self.info;
        let needed = if self.unpacked {
            info.samples_per_row()
        } else {
            info.samples_per_row_packed()
        };
        if buf.len() < needed {
            return Err(Error::Malformed(format!(
                "row buffer holds {} slots, {needed} needed",
                buf.len()
            )));
        }
        let unpack = self.unpacked;
        let (raw, _) = self.raw_row(row)?;
        bit_depth::bytes_to_row(&info, raw, buf, unpack);
        Ok(())
    }

    fn fill_lines<S: bit_depth::Sample>(&mut self, lines: &mut ImageLines<S>) -> Result<()> {
        for index in 0..lines.len() {
            let row = lines.matrix_row_to_image_row(index);
            if let Some(line) = lines.get_mut(index) {
                self.fill_line(row, line)?;
            }
        }
        Ok(())
    }

    /// Reads rows `offset`, `offset + step`, ... as 16-bit slots.
    pub fn read_rows(&mut self, offset: u32, count: u32, step: u32) -> Result<ImageLines<u16>> {
        let mut lines = ImageLines::new(self.info, !self.unpacked, offset, count, step)?;
        self.fill_lines(&mut lines)?;
        Ok(lines)
    }

    /// Reads rows `offset`, `offset + step`, ... as byte slots.
    pub fn read_rows_bytes(&mut self, offset: u32, count: u32, step: u32) -> Result<ImageLines<u8>> {
        let mut lines = ImageLines::new(self.info, !self.unpacked, offset, count, step)?;
        self.fill_lines(&mut lines)?;
        Ok(lines)
    }

    /// Reads every row.
    pub fn read_all(&mut self) -> Result<ImageLines<u16>> {
        self.read_rows(0, self.info.rows(), 1)
    }

    /// Passes over the remaining pixel data without inflating it, then
    /// reads the trailing chunks. Pixel data CRCs are not checked and no
    /// row can be read afterwards.
    pub fn skip_all_rows(&mut self) -> Result<()> {
        self.last_row = Some(self.info.rows() - 1);
        self.read_trailer(true)
    }

    /// Reads the chunks after the pixel data up to IEND.
    fn read_trailer(&mut self, raw_skip: bool) -> Result<()> {
        let (mut chunks, mut pending) = match std::mem::take(&mut self.source) {
            Source::Pixels(decoder) => {
                let mut idat = (*decoder).into_inner();
                if raw_skip {
                    idat.set_verify_crc(false);
                }
                idat.force_end()?;
                log::debug!("pixel data ended after {} IDAT chunks", idat.chunk_count());
                idat.into_parts()
            }
            Source::Finished => {
                self.source = Source::Finished;
                return Ok(());
            }
            Source::Poisoned => {
                return Err(Error::Malformed("reader is in a failed state".into()));
            }
        };

        self.group = ChunkGroup::PostData;
        loop {
            let header = match pending.take() {
                Some(header) => header,
                None => chunks.read_header()?,
            };
            match header.chunk_type {
                ChunkType::IDAT => {
                    log::warn!("extra IDAT chunk after pixel data at offset {}", header.offset);
                    self.load_chunk(&mut chunks, header, true)?;
                }
                ChunkType::IEND => {
                    self.group = ChunkGroup::Terminal;
                    self.load_chunk(&mut chunks, header, false)?;
                    break;
                }
                _ => self.load_chunk(&mut chunks, header, false)?,
            }
        }

        let mut inner = chunks.into_inner();
        let mut probe = [0u8; 1];
        if matches!(inner.read(&mut probe), Ok(n) if n > 0) {
            log::warn!("ignoring data after IEND");
        }
        self.source = Source::Finished;
        Ok(())
    }

    /// Reads whatever is left up to IEND, checking pixel data CRCs, and
    /// returns every loaded chunk.
    pub fn finish(mut self) -> Result<PngMetadata> {
        self.read_trailer(false)?;
        Ok(self.metadata)
    }
}
