//! Streaming PNG reading and writing.
//!
//! A stream is a signature followed by length-prefixed chunks. The header
//! chunk describes the image, IDAT chunks carry the zlib-compressed
//! filtered rows and IEND closes the stream. Everything else is metadata.

pub mod bit_depth;
pub mod chunk;
pub mod chunks;
pub mod filter;
pub mod idat;
pub mod interlace;
pub mod line;
pub mod metadata;
pub mod reader;
pub mod strategy;
pub mod writer;

pub use chunk::ChunkType;
pub use chunks::{Chunk, ChunkGroup, ChunkOrdering, ChunkRegistry};
pub use filter::FilterType;
pub use line::{ImageLine, ImageLines};
pub use metadata::{ChunkData, Physical, PngMetadata, PngTime};
pub use reader::PngReader;
pub use strategy::{FilterScore, FilterStrategy};
pub use writer::{ChunkCopy, PngWriter};

use crate::color::ColorType;
use crate::error::{Error, Result};
use crate::info::ImageInfo;

/// PNG file signature (magic bytes).
pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Payload size of the header chunk.
const HEADER_LEN: usize = 13;

/// Contents of the IHDR chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Bits per sample.
    pub bit_depth: u8,
    /// Colour model byte.
    pub color_type: u8,
    /// Adam7 interlacing.
    pub interlaced: bool,
}

impl Header {
    /// Parses and checks a header payload.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let data: &[u8; HEADER_LEN] = data.try_into().map_err(|_| {
            Error::Malformed(format!("IHDR length must be {HEADER_LEN}, got {}", data.len()))
        })?;
        let width = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let height = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let [bit_depth, color_type, compression, filter, interlace] =
            [data[8], data[9], data[10], data[11], data[12]];

        if compression != 0 {
            return Err(Error::Malformed(format!(
                "unsupported compression method {compression}"
            )));
        }
        if filter != 0 {
            return Err(Error::Malformed(format!("unsupported filter method {filter}")));
        }
        let interlaced = match interlace {
            0 => false,
            1 => true,
            other => {
                return Err(Error::Malformed(format!("unsupported interlace method {other}")))
            }
        };
        let header = Self {
            width,
            height,
            bit_depth,
            color_type,
            interlaced,
        };
        // Validates colour model, depth and dimensions.
        ImageInfo::from_header(&header)?;
        Ok(header)
    }

    /// Header describing `info`.
    pub fn from_info(info: &ImageInfo, interlaced: bool) -> Self {
        Self {
            width: info.cols(),
            height: info.rows(),
            bit_depth: info.bit_depth(),
            color_type: info.color_model(),
            interlaced,
        }
    }

    /// Serialises the 13-byte payload.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.width.to_be_bytes());
        out[4..8].copy_from_slice(&self.height.to_be_bytes());
        out[8] = self.bit_depth;
        out[9] = self.color_type;
        // Compression and filter method are always 0.
        out[12] = self.interlaced as u8;
        out
    }
}

impl ImageInfo {
    /// Image description carried by a header.
    pub fn from_header(header: &Header) -> Result<Self> {
        let color =
            ColorType::try_from(header.color_type).map_err(Error::UnsupportedColorMode)?;
        Self::with_color(header.width, header.height, header.bit_depth, color)
    }
}

/// Which ancillary chunks the reader keeps. Critical chunks are always kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkLoad {
    /// Skip every ancillary chunk.
    Never,
    /// Keep chunks whose tag is built in or registered.
    Known,
    /// Keep known chunks and unknown safe-to-copy ones.
    IfSafe,
    /// Keep every ancillary chunk.
    #[default]
    Always,
}

impl ChunkLoad {
    pub(crate) fn should_load(self, chunk_type: ChunkType, known: bool) -> bool {
        if chunk_type.is_critical() {
            return true;
        }
        match self {
            ChunkLoad::Always => true,
            ChunkLoad::IfSafe => known || chunk_type.is_safe_to_copy(),
            ChunkLoad::Known => known,
            ChunkLoad::Never => false,
        }
    }
}

/// Reader configuration.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Verify CRCs of ancillary and pixel data chunks. Other critical
    /// chunks are always verified.
    pub crc_check: bool,
    /// Ancillary chunk loading policy.
    pub chunk_load: ChunkLoad,
    /// Ancillary tags skipped without loading.
    pub skip_chunk_ids: Vec<ChunkType>,
    /// Ceiling on bytes read from the stream, 0 for none.
    pub max_total_bytes: u64,
    /// Budget for loaded ancillary payloads, 0 for none.
    pub max_metadata_bytes: u64,
    /// Largest ancillary chunk accepted, 0 for no limit.
    pub max_chunk_bytes: u64,
    /// Skip ancillary chunks that break `max_metadata_bytes` or
    /// `max_chunk_bytes` instead of failing with
    /// [`Error::ResourceLimitExceeded`].
    pub skip_oversized: bool,
    /// Keep going when an ancillary chunk fails validation.
    pub lenient: bool,
    /// Extra chunk kinds.
    pub registry: ChunkRegistry,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            crc_check: true,
            chunk_load: ChunkLoad::Always,
            skip_chunk_ids: vec![ChunkType::fdAT],
            max_total_bytes: 200 * 1024 * 1024,
            max_metadata_bytes: 5 * 1024 * 1024,
            max_chunk_bytes: 2 * 1024 * 1024,
            skip_oversized: false,
            lenient: false,
            registry: ChunkRegistry::new(),
        }
    }
}

impl ReaderOptions {
    /// Sets CRC verification.
    pub fn with_crc_check(mut self, crc_check: bool) -> Self {
        self.crc_check = crc_check;
        self
    }

    /// Sets the loading policy.
    pub fn with_chunk_load(mut self, chunk_load: ChunkLoad) -> Self {
        self.chunk_load = chunk_load;
        self
    }

    /// Sets the skipped tags.
    pub fn with_skip_chunk_ids(mut self, ids: Vec<ChunkType>) -> Self {
        self.skip_chunk_ids = ids;
        self
    }

    /// Sets the total read ceiling.
    pub fn with_max_total_bytes(mut self, limit: u64) -> Self {
        self.max_total_bytes = limit;
        self
    }

    /// Sets the metadata budget.
    pub fn with_max_metadata_bytes(mut self, limit: u64) -> Self {
        self.max_metadata_bytes = limit;
        self
    }

    /// Sets the per-chunk ceiling.
    pub fn with_max_chunk_bytes(mut self, limit: u64) -> Self {
        self.max_chunk_bytes = limit;
        self
    }

    /// Skips oversized ancillary chunks instead of failing.
    pub fn with_skip_oversized(mut self, skip: bool) -> Self {
        self.skip_oversized = skip;
        self
    }

    /// Sets lenient mode.
    pub fn with_lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    /// Sets the chunk registry.
    pub fn with_registry(mut self, registry: ChunkRegistry) -> Self {
        self.registry = registry;
        self
    }
}

/// Writer configuration.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// zlib level, 0 to 9.
    pub compression_level: u8,
    /// Row filter selection.
    pub filter_strategy: FilterStrategy,
    /// Scoring used by adaptive strategies.
    pub score: FilterScore,
    /// Per-filter weights scores are divided by, None to Paeth.
    pub preference: [f64; 5],
    /// Largest IDAT payload.
    pub idat_max_size: usize,
    /// Write Adam7 interlaced rows.
    pub interlaced: bool,
    /// Extra chunk kinds.
    pub registry: ChunkRegistry,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compression_level: 6,
            filter_strategy: FilterStrategy::Default,
            score: FilterScore::Entropy,
            preference: strategy::DEFAULT_PREFERENCE,
            idat_max_size: idat::DEFAULT_IDAT_SIZE,
            interlaced: false,
            registry: ChunkRegistry::new(),
        }
    }
}

impl WriterOptions {
    /// Speed-focused preset.
    pub fn fast() -> Self {
        Self {
            compression_level: 2,
            filter_strategy: FilterStrategy::Default,
            ..Self::default()
        }
    }

    /// Balanced preset.
    pub fn balanced() -> Self {
        Self {
            compression_level: 6,
            filter_strategy: FilterStrategy::aggressive(),
            ..Self::default()
        }
    }

    /// Highest compression preset; slowest.
    pub fn max_compression() -> Self {
        Self {
            compression_level: 9,
            filter_strategy: FilterStrategy::Adaptive,
            ..Self::default()
        }
    }

    /// Sets the zlib level, clamped to 9.
    pub fn with_compression_level(mut self, level: u8) -> Self {
        self.compression_level = level.min(9);
        self
    }

    /// Sets the filter strategy.
    pub fn with_filter_strategy(mut self, strategy: FilterStrategy) -> Self {
        self.filter_strategy = strategy;
        self
    }

    /// Sets the trial scoring.
    pub fn with_score(mut self, score: FilterScore) -> Self {
        self.score = score;
        self
    }

    /// Sets the per-filter preference weights.
    pub fn with_preference(mut self, preference: [f64; 5]) -> Self {
        self.preference = preference;
        self
    }

    /// Sets the largest IDAT payload.
    pub fn with_idat_max_size(mut self, size: usize) -> Self {
        self.idat_max_size = size;
        self
    }

    /// Sets interlaced output.
    pub fn with_interlaced(mut self, interlaced: bool) -> Self {
        self.interlaced = interlaced;
        self
    }

    /// Sets the chunk registry.
    pub fn with_registry(mut self, registry: ChunkRegistry) -> Self {
        self.registry = registry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let info = ImageInfo::rgb(640, 480, 8, true).unwrap();
        let header = Header::from_info(&info, true);
        let bytes = header.to_bytes();
        assert_eq!(&bytes[..8], &[0, 0, 2, 0x80, 0, 0, 1, 0xE0]);
        assert_eq!(&bytes[8..], &[8, 6, 0, 0, 1]);
        let parsed = Header::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(ImageInfo::from_header(&parsed).unwrap(), info);
    }

    #[test]
    fn header_rejects_bad_fields() {
        let good = Header::from_info(&ImageInfo::gray(4, 4, 8, false).unwrap(), false).to_bytes();

        assert!(matches!(Header::parse(&good[..12]), Err(Error::Malformed(_))));

        let mut bad = good;
        bad[10] = 1;
        assert!(matches!(Header::parse(&bad), Err(Error::Malformed(_))));

        let mut bad = good;
        bad[12] = 2;
        assert!(matches!(Header::parse(&bad), Err(Error::Malformed(_))));

        let mut bad = good;
        bad[9] = 5;
        assert!(matches!(Header::parse(&bad), Err(Error::UnsupportedColorMode(5))));

        let mut bad = good;
        bad[8] = 3;
        assert!(matches!(Header::parse(&bad), Err(Error::InvalidBitDepth { .. })));

        let mut bad = good;
        bad[0..4].copy_from_slice(&0u32.to_be_bytes());
        assert!(matches!(Header::parse(&bad), Err(Error::InvalidDimensions { .. })));
    }

    #[test]
    fn load_policy() {
        let private_unsafe = ChunkType::from_ascii("prVT").unwrap();
        let private_safe = ChunkType::from_ascii("prVt").unwrap();
        assert!(ChunkLoad::Never.should_load(ChunkType::PLTE, false));
        assert!(!ChunkLoad::Never.should_load(ChunkType::gAMA, true));
        assert!(ChunkLoad::Known.should_load(ChunkType::gAMA, true));
        assert!(!ChunkLoad::Known.should_load(private_safe, false));
        assert!(ChunkLoad::IfSafe.should_load(private_safe, false));
        assert!(!ChunkLoad::IfSafe.should_load(private_unsafe, false));
        assert!(ChunkLoad::Always.should_load(private_unsafe, false));
    }

    #[test]
    fn presets() {
        assert_eq!(WriterOptions::default().compression_level, 6);
        assert_eq!(WriterOptions::max_compression().compression_level, 9);
        assert_eq!(
            WriterOptions::balanced().filter_strategy,
            FilterStrategy::AdaptiveSampled { interval: 8 }
        );
        assert_eq!(WriterOptions::default().with_compression_level(12).compression_level, 9);
        assert_eq!(ReaderOptions::default().skip_chunk_ids, vec![ChunkType::fdAT]);
    }
}
