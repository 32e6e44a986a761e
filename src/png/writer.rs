//! Row-by-row PNG encoding.
//!
//! Rows are filtered as they arrive and pushed through a zlib stream that
//! is cut into IDAT chunks. Queued chunks are written in the first group
//! their ordering allows, around the palette and the pixel data.

use std::collections::HashSet;
use std::io::Write;
use std::ops::{BitOr, BitOrAssign};

use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::bit_depth::{self, Sample};
use super::chunk::{ChunkType, ChunkWriter};
use super::chunks::{should_write, Chunk, ChunkGroup};
use super::filter::FilterType;
use super::idat::IdatWriter;
use super::interlace::{gather_row, InterlaceScheduler};
use super::line::{ImageLine, ImageLines};
use super::metadata::{ChunkData, PngMetadata};
use super::strategy::FilterSelector;
use super::{Header, WriterOptions};
use crate::error::{Error, Result};
use crate::info::ImageInfo;

/// Selects which chunks [`PngWriter::copy_chunks_from`] takes over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkCopy(u32);

impl ChunkCopy {
    /// Nothing.
    pub const NONE: Self = Self(0);
    /// The palette, when the target image is indexed.
    pub const PALETTE: Self = Self(1);
    /// Every safe-to-copy ancillary chunk.
    pub const ALL_SAFE: Self = Self(1 << 2);
    /// Every ancillary chunk, plus the palette for indexed targets.
    pub const ALL: Self = Self(1 << 3);
    /// pHYs.
    pub const PHYSICAL: Self = Self(1 << 4);
    /// tEXt, zTXt and iTXt.
    pub const TEXTUAL: Self = Self(1 << 5);
    /// tRNS.
    pub const TRANSPARENCY: Self = Self(1 << 6);
    /// Known ancillary chunks except text, hIST and tIME.
    pub const ALMOST_ALL: Self = Self(1 << 8);

    /// True when every flag of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

impl BitOr for ChunkCopy {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ChunkCopy {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

fn is_text(chunk_type: ChunkType) -> bool {
    matches!(chunk_type, ChunkType::tEXt | ChunkType::zTXt | ChunkType::iTXt)
}

enum Sink<W: Write> {
    Chunks(ChunkWriter<W>),
    Pixels(Box<ZlibEncoder<IdatWriter<W>>>),
    Poisoned,
}

impl<W: Write> Default for Sink<W> {
    fn default() -> Self {
        Sink::Poisoned
    }
}

/// Streaming PNG encoder.
///
/// Signature and header are written with the first row. Rows must be
/// supplied in order, each exactly once.
pub struct PngWriter<W: Write> {
    info: ImageInfo,
    options: WriterOptions,
    sink: Sink<W>,
    group: ChunkGroup,
    queue: PngMetadata,
    written: HashSet<ChunkType>,
    selector: FilterSelector,
    // Current and previous raw rows.
    rows: [Vec<u8>; 2],
    cur: usize,
    filtered: Vec<u8>,
    next_row: u32,
    rows_filtered: u64,
    interlace_buffer: Option<Vec<u8>>,
}

impl<W: Write> PngWriter<W> {
    /// Writer with default options.
    pub fn new(inner: W, info: ImageInfo) -> Self {
        Self::with_options(inner, info, WriterOptions::default())
    }

    /// Writer with explicit options.
    pub fn with_options(inner: W, info: ImageInfo, options: WriterOptions) -> Self {
        let selector = FilterSelector::new(&info, options.filter_strategy, options.score)
            .with_preference(options.preference);
        let bpr = info.bytes_per_row();
        let interlace_buffer = options
            .interlaced
            .then(|| Vec::with_capacity(bpr * info.rows() as usize));
        Self {
            info,
            options,
            sink: Sink::Chunks(ChunkWriter::new(inner)),
            group: ChunkGroup::Header,
            queue: PngMetadata::new(),
            written: HashSet::new(),
            selector,
            rows: [vec![0; bpr], vec![0; bpr]],
            cur: 0,
            filtered: vec![0; bpr + 1],
            next_row: 0,
            rows_filtered: 0,
            interlace_buffer,
        }
    }

    /// Image description.
    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    /// Group of the last chunk written.
    pub fn chunk_group(&self) -> ChunkGroup {
        self.group
    }

    /// Chunks waiting to be written. Changes made here are not checked
    /// until they are flushed.
    pub fn metadata_mut(&mut self) -> &mut PngMetadata {
        &mut self.queue
    }

    /// Chunks waiting to be written.
    pub fn pending(&self) -> &PngMetadata {
        &self.queue
    }

    /// Rows the filter selector assigned to each filter type.
    pub fn filter_counts(&self) -> [u64; 5] {
        self.selector.filter_counts()
    }

    /// Queues a chunk for writing.
    ///
    /// Only ancillary chunks and the palette can be queued. A second
    /// instance of a single-instance tag is rejected.
    pub fn queue_chunk(&mut self, chunk: Chunk) -> Result<()> {
        let chunk_type = chunk.chunk_type;
        if chunk_type.is_critical() && chunk_type != ChunkType::PLTE {
            return Err(Error::InvalidChunk(format!("cannot queue critical chunk {chunk_type}")));
        }
        if chunk_type == ChunkType::PLTE && self.info.greyscale() {
            return Err(Error::InvalidChunk("palette not allowed for grayscale images".into()));
        }
        let kind = self.options.registry.kind(chunk_type);
        if !kind.allows_multiple
            && (self.written.contains(&chunk_type) || self.queue.get(chunk_type).is_some())
        {
            return Err(Error::DuplicateChunk(chunk_type));
        }
        match self.options.registry.validate(chunk_type, &chunk.data) {
            Some(result) => result?,
            None => {
                ChunkData::parse(chunk_type, &chunk.data)?;
            }
        }
        self.queue.push(chunk);
        Ok(())
    }

    /// Queues chunks read from another stream, as selected by `mask`.
    ///
    /// Header, pixel data and end chunks are never copied. Once pixel
    /// data has been written only chunks that followed it are taken.
    /// Returns how many chunks were queued.
    pub fn copy_chunks_from(&mut self, chunks: &[Chunk], mask: ChunkCopy) -> Result<usize> {
        let after_data = self.group >= ChunkGroup::PixelData;
        let mut copied = 0;
        for chunk in chunks {
            let chunk_type = chunk.chunk_type;
            if matches!(chunk_type, ChunkType::IHDR | ChunkType::IDAT | ChunkType::IEND) {
                continue;
            }
            if after_data && chunk.group.is_some_and(|g| g < ChunkGroup::PixelData) {
                continue;
            }
            let copy = if chunk_type == ChunkType::PLTE {
                self.info.indexed()
                    && (mask.contains(ChunkCopy::PALETTE) || mask.contains(ChunkCopy::ALL))
            } else {
                let known = self.options.registry.is_known(chunk_type);
                mask.contains(ChunkCopy::ALL)
                    || (mask.contains(ChunkCopy::ALL_SAFE) && chunk_type.is_safe_to_copy())
                    || (mask.contains(ChunkCopy::TRANSPARENCY) && chunk_type == ChunkType::tRNS)
                    || (mask.contains(ChunkCopy::PHYSICAL) && chunk_type == ChunkType::pHYs)
                    || (mask.contains(ChunkCopy::TEXTUAL) && is_text(chunk_type))
                    || (mask.contains(ChunkCopy::ALMOST_ALL)
                        && known
                        && !is_text(chunk_type)
                        && !matches!(chunk_type, ChunkType::hIST | ChunkType::tIME))
            };
            if !copy {
                continue;
            }
            let mut fresh = Chunk::new(chunk_type, chunk.data.clone());
            fresh.priority = chunk.priority;
            match self.queue_chunk(fresh) {
                Ok(()) => copied += 1,
                Err(Error::DuplicateChunk(t)) => log::debug!("not copying second {t}"),
                Err(err) => return Err(err),
            }
        }
        Ok(copied)
    }

    /// Writes queued chunks that belong in `group`.
    fn flush_group(&mut self, chunks: &mut ChunkWriter<W>, group: ChunkGroup) -> Result<()> {
        self.group = group;
        let registry = &self.options.registry;
        let (ready, waiting): (Vec<Chunk>, Vec<Chunk>) =
            self.queue.take_all().into_iter().partition(|c| {
                should_write(c.chunk_type, registry.kind(c.chunk_type), c.priority, group)
            });
        for chunk in waiting {
            self.queue.push(chunk);
        }
        for chunk in ready {
            chunks.write_chunk(chunk.chunk_type, &chunk.data)?;
            log::debug!("wrote {} ({} bytes) in {group:?}", chunk.chunk_type, chunk.data.len());
            self.written.insert(chunk.chunk_type);
        }
        Ok(())
    }

    /// Writes signature, header and leading chunks, then opens the pixel
    /// data stream.
    fn begin(&mut self) -> Result<()> {
        let Sink::Chunks(mut chunks) = std::mem::take(&mut self.sink) else {
            return Err(Error::Malformed("writer is in a failed state".into()));
        };
        let has_palette = self.queue.get(ChunkType::PLTE).is_some();
        if self.info.indexed() && !has_palette {
            return Err(Error::InvalidChunk("indexed image requires a palette".into()));
        }
        if self.info.greyscale() && has_palette {
            return Err(Error::InvalidChunk("palette not allowed for grayscale images".into()));
        }

        chunks.write_signature()?;
        let header = Header::from_info(&self.info, self.options.interlaced);
        chunks.write_chunk(ChunkType::IHDR, &header.to_bytes())?;
        for group in [
            ChunkGroup::PreData,
            ChunkGroup::PaletteSection,
            ChunkGroup::PostPalette,
        ] {
            self.flush_group(&mut chunks, group)?;
        }
        self.group = ChunkGroup::PixelData;

        let idat = IdatWriter::new(chunks, self.options.idat_max_size);
        let level = Compression::new(self.options.compression_level.min(9) as u32);
        self.sink = Sink::Pixels(Box::new(ZlibEncoder::new(idat, level)));
        Ok(())
    }

    /// Filters the current raw row slot against the other one and pushes it
    /// into the compressor.
    fn emit_row(&mut self, len: usize) -> Result<FilterType> {
        let Sink::Pixels(encoder) = &mut self.sink else {
            return Err(Error::Malformed("pixel data already closed".into()));
        };
        let (first, second) = self.rows.split_at_mut(1);
        let (row, prev) = if self.cur == 0 {
            (&first[0], &second[0])
        } else {
            (&second[0], &first[0])
        };
        let filter = self.selector.filter_row(
            self.rows_filtered,
            &row[..len],
            &prev[..len],
            self.info.bytes_per_pixel(),
            &mut self.filtered[..=len],
        );
        encoder.write_all(&self.filtered[..=len])?;
        self.rows_filtered += 1;
        Ok(filter)
    }

    /// Filters and compresses every pass of the buffered image.
    fn emit_interlaced(&mut self, image: &[u8]) -> Result<()> {
        let info = self.info;
        let bpr = info.bytes_per_row();
        let mut scheduler = InterlaceScheduler::new(info.cols(), info.rows());
        let mut pass_start = true;
        while !scheduler.is_finished() {
            let geometry = *scheduler.geometry();
            let len = info.with_dimensions(geometry.cols, geometry.rows)?.bytes_per_row();
            if pass_start {
                self.rows[self.cur].fill(0);
            }
            self.cur ^= 1;
            let y = scheduler.image_row() as usize;
            gather_row(
                &info,
                &geometry,
                &image[y * bpr..(y + 1) * bpr],
                &mut self.rows[self.cur][..len],
            );
            self.emit_row(len)?;
            pass_start = scheduler.advance();
        }
        Ok(())
    }

    /// Checks that another row may be written and opens the pixel data on
    /// the first one.
    fn next_slot(&mut self) -> Result<u32> {
        let row = self.next_row;
        if row >= self.info.rows() {
            return Err(Error::InvalidRowRange {
                offset: row,
                count: 1,
                step: 1,
            });
        }
        if self.group == ChunkGroup::Header {
            self.begin()?;
        }
        self.cur ^= 1;
        Ok(row)
    }

    /// Filters the row just stored in the current slot. Returns `None` for
    /// interlaced output, where rows are filtered once the image is complete.
    fn commit_row(&mut self) -> Result<Option<FilterType>> {
        self.next_row += 1;
        let complete = self.next_row == self.info.rows();
        match &mut self.interlace_buffer {
            Some(buffer) => {
                buffer.extend_from_slice(&self.rows[self.cur]);
                if complete {
                    let image = std::mem::take(buffer);
                    self.emit_interlaced(&image)?;
                }
                Ok(None)
            }
            None => self.emit_row(self.info.bytes_per_row()).map(Some),
        }
    }

    fn push_samples<S: Sample>(&mut self, samples: &[S]) -> Result<()> {
        let info = self.info;
        if samples.len() < info.samples_per_row() {
            return Err(Error::Malformed(format!(
                "row {} has {} samples, expected {}",
                self.next_row,
                samples.len(),
                info.samples_per_row()
            )));
        }
        self.next_slot()?;
        bit_depth::row_to_bytes(&info, samples, &mut self.rows[self.cur], false);
        self.commit_row().map(|_| ())
    }

    fn push_line<S: Sample>(&mut self, line: &ImageLine<S>) -> Result<Option<FilterType>> {
        if line.info() != &self.info {
            return Err(Error::Malformed("line belongs to a different image".into()));
        }
        self.next_slot()?;
        line.store_raw(&mut self.rows[self.cur]);
        self.commit_row()
    }

    /// Writes the next row from unpacked 16-bit slots.
    pub fn write_row(&mut self, samples: &[u16]) -> Result<()> {
        self.push_samples(samples)
    }

    /// Writes the next row from unpacked byte slots. For 16-bit images
    /// each byte becomes the high byte of its sample.
    pub fn write_row_bytes(&mut self, samples: &[u8]) -> Result<()> {
        self.push_samples(samples)
    }

    /// Writes a line, which must hold the next row when it has a row
    /// number. Its filter is updated for non-interlaced output.
    pub fn write_line<S: Sample>(&mut self, line: &mut ImageLine<S>) -> Result<()> {
        let row = self.next_row;
        if let Some(requested) = line.row() {
            if requested != row {
                return Err(Error::OutOfOrderAccess {
                    requested,
                    next: row,
                });
            }
        }
        if let Some(filter) = self.push_line(line)? {
            line.set_written(row, filter);
        }
        Ok(())
    }

    /// Writes a set of lines, which must start at the next row and be
    /// contiguous.
    pub fn write_rows<S: Sample>(&mut self, lines: &ImageLines<S>) -> Result<()> {
        if lines.step() != 1 || lines.offset() != self.next_row {
            return Err(Error::OutOfOrderAccess {
                requested: lines.offset(),
                next: self.next_row,
            });
        }
        for line in lines {
            self.push_line(line)?;
        }
        Ok(())
    }

    /// Closes the pixel data, writes trailing chunks and IEND, and returns
    /// the sink.
    pub fn finish(mut self) -> Result<W> {
        if self.next_row != self.info.rows() {
            return Err(Error::Malformed(format!(
                "only {} of {} rows written",
                self.next_row,
                self.info.rows()
            )));
        }
        let Sink::Pixels(encoder) = std::mem::take(&mut self.sink) else {
            return Err(Error::Malformed("writer is in a failed state".into()));
        };
        let idat = (*encoder).finish()?;
        let (mut chunks, idat_count) = idat.finish()?;
        self.flush_group(&mut chunks, ChunkGroup::PostData)?;
        if let Some(left) = self.queue.chunks().first() {
            return Err(Error::UnflushedChunk(left.chunk_type));
        }
        chunks.write_chunk(ChunkType::IEND, &[])?;
        self.group = ChunkGroup::Terminal;
        log::debug!(
            "finished png: {} rows, {idat_count} IDAT chunks, filters {:?}",
            self.rows_filtered,
            self.selector.filter_counts()
        );
        chunks.into_inner()
    }
}
