//! Typed views over ancillary chunk payloads and a metadata container.
//!
//! Only the framing of these chunks matters to the pixel pipeline; the
//! typed forms here are conveniences for callers.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use super::chunk::ChunkType;
use super::chunks::Chunk;
use crate::error::{Error, Result};

/// Longest keyword allowed in text chunks.
const MAX_KEYWORD_LEN: usize = 79;

/// Ceiling on inflated zTXt and iTXt text when no other limit applies.
pub const DEFAULT_INFLATE_LIMIT: u64 = 5 * 1024 * 1024;

/// Last-modification time (tIME), UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PngTime {
    /// Full year, e.g. 2024.
    pub year: u16,
    /// 1 to 12.
    pub month: u8,
    /// 1 to 31.
    pub day: u8,
    /// 0 to 23.
    pub hour: u8,
    /// 0 to 59.
    pub minute: u8,
    /// 0 to 60, leap seconds included.
    pub second: u8,
}

/// Physical pixel dimensions (pHYs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Physical {
    /// Pixels per unit along x.
    pub ppu_x: u32,
    /// Pixels per unit along y.
    pub ppu_y: u32,
    /// 1 when the unit is the metre, 0 when only the aspect ratio is known.
    pub unit: u8,
}

impl Physical {
    /// Resolution in dots per inch, when the unit is the metre.
    pub fn dpi(&self) -> Option<(f64, f64)> {
        (self.unit == 1).then(|| (self.ppu_x as f64 * 0.0254, self.ppu_y as f64 * 0.0254))
    }

    /// Metre-based resolution from dots per inch.
    pub fn from_dpi(dpi: f64) -> Self {
        let ppu = (dpi / 0.0254 + 0.5) as u32;
        Self {
            ppu_x: ppu,
            ppu_y: ppu,
            unit: 1,
        }
    }
}

/// Parsed payload of a chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkData {
    /// PLTE: RGB entries.
    Palette(Vec<[u8; 3]>),
    /// tRNS, kept raw: its layout depends on the colour model.
    Transparency(Vec<u8>),
    /// bKGD, kept raw for the same reason.
    Background(Vec<u8>),
    /// gAMA: gamma times 100000.
    Gamma(u32),
    /// sRGB: rendering intent 0 to 3.
    Srgb(u8),
    /// pHYs.
    Physical(Physical),
    /// tIME.
    Time(PngTime),
    /// tEXt.
    Text {
        /// Latin-1 keyword.
        keyword: String,
        /// Latin-1 text.
        text: String,
    },
    /// zTXt.
    CompressedText {
        /// Latin-1 keyword.
        keyword: String,
        /// Latin-1 text, stored compressed.
        text: String,
    },
    /// iTXt.
    InternationalText {
        /// Latin-1 keyword.
        keyword: String,
        /// Whether the text is stored compressed.
        compressed: bool,
        /// RFC 3066 language tag, possibly empty.
        language: String,
        /// Keyword translated into `language`, UTF-8.
        translated_keyword: String,
        /// UTF-8 text.
        text: String,
    },
    /// Every other chunk, raw.
    Other(ChunkType, Vec<u8>),
}

fn invalid(chunk_type: ChunkType, what: &str) -> Error {
    Error::InvalidChunk(format!("{chunk_type}: {what}"))
}

fn latin1_to_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn string_to_latin1(chunk_type: ChunkType, s: &str) -> Result<Vec<u8>> {
    s.chars()
        .map(|c| u8::try_from(c as u32).map_err(|_| invalid(chunk_type, "text is not Latin-1")))
        .collect()
}

fn check_keyword(chunk_type: ChunkType, keyword: &[u8]) -> Result<()> {
    if keyword.is_empty() || keyword.len() > MAX_KEYWORD_LEN {
        return Err(invalid(chunk_type, "keyword must be 1 to 79 bytes"));
    }
    Ok(())
}

/// Splits at the first NUL, failing when there is none.
fn split_nul(chunk_type: ChunkType, data: &[u8]) -> Result<(&[u8], &[u8])> {
    let pos = data
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| invalid(chunk_type, "missing NUL separator"))?;
    Ok((&data[..pos], &data[pos + 1..]))
}

/// Inflates compressed text, giving up once it passes `limit` bytes.
fn inflate(chunk_type: ChunkType, data: &[u8], limit: u64) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .take(limit.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| invalid(chunk_type, &format!("bad compressed text: {e}")))?;
    if out.len() as u64 > limit {
        return Err(Error::ResourceLimitExceeded {
            what: "inflated text",
            limit,
        });
    }
    Ok(out)
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data)?;
    Ok(enc.finish()?)
}

impl ChunkData {
    /// Parses a payload according to its tag. Compressed text may inflate
    /// to at most [`DEFAULT_INFLATE_LIMIT`] bytes.
    pub fn parse(chunk_type: ChunkType, data: &[u8]) -> Result<Self> {
        Self::parse_limited(chunk_type, data, DEFAULT_INFLATE_LIMIT)
    }

    /// Same as [`ChunkData::parse`] with an explicit ceiling on inflated
    /// text, failing with [`Error::ResourceLimitExceeded`] above it.
    pub fn parse_limited(chunk_type: ChunkType, data: &[u8], inflate_limit: u64) -> Result<Self> {
        let parsed = match chunk_type {
            ChunkType::PLTE => {
                if data.is_empty() || data.len() % 3 != 0 || data.len() > 256 * 3 {
                    return Err(invalid(chunk_type, "palette must hold 1 to 256 RGB entries"));
                }
                ChunkData::Palette(data.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect())
            }
            ChunkType::tRNS => ChunkData::Transparency(data.to_vec()),
            ChunkType::bKGD => ChunkData::Background(data.to_vec()),
            ChunkType::gAMA => {
                let bytes: [u8; 4] = data
                    .try_into()
                    .map_err(|_| invalid(chunk_type, "expected 4 bytes"))?;
                ChunkData::Gamma(u32::from_be_bytes(bytes))
            }
            ChunkType::sRGB => match data {
                [intent @ 0..=3] => ChunkData::Srgb(*intent),
                _ => return Err(invalid(chunk_type, "expected one intent byte 0 to 3")),
            },
            ChunkType::pHYs => {
                if data.len() != 9 {
                    return Err(invalid(chunk_type, "expected 9 bytes"));
                }
                ChunkData::Physical(Physical {
                    ppu_x: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
                    ppu_y: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
                    unit: data[8],
                })
            }
            ChunkType::tIME => {
                if data.len() != 7 {
                    return Err(invalid(chunk_type, "expected 7 bytes"));
                }
                ChunkData::Time(PngTime {
                    year: u16::from_be_bytes([data[0], data[1]]),
                    month: data[2],
                    day: data[3],
                    hour: data[4],
                    minute: data[5],
                    second: data[6],
                })
            }
            ChunkType::tEXt => {
                let (keyword, text) = split_nul(chunk_type, data)?;
                check_keyword(chunk_type, keyword)?;
                ChunkData::Text {
                    keyword: latin1_to_string(keyword),
                    text: latin1_to_string(text),
                }
            }
            ChunkType::zTXt => {
                let (keyword, rest) = split_nul(chunk_type, data)?;
                check_keyword(chunk_type, keyword)?;
                match rest.split_first() {
                    Some((0, compressed)) => ChunkData::CompressedText {
                        keyword: latin1_to_string(keyword),
                        text: latin1_to_string(&inflate(chunk_type, compressed, inflate_limit)?),
                    },
                    _ => return Err(invalid(chunk_type, "unknown compression method")),
                }
            }
            ChunkType::iTXt => {
                let (keyword, rest) = split_nul(chunk_type, data)?;
                check_keyword(chunk_type, keyword)?;
                let (&flag, rest) = rest
                    .split_first()
                    .ok_or_else(|| invalid(chunk_type, "truncated"))?;
                let (&method, rest) = rest
                    .split_first()
                    .ok_or_else(|| invalid(chunk_type, "truncated"))?;
                if flag > 1 || method != 0 {
                    return Err(invalid(chunk_type, "unknown compression"));
                }
                let (language, rest) = split_nul(chunk_type, rest)?;
                let (translated, text) = split_nul(chunk_type, rest)?;
                let text = if flag == 1 {
                    inflate(chunk_type, text, inflate_limit)?
                } else {
                    text.to_vec()
                };
                let utf8 = |b: &[u8]| {
                    String::from_utf8(b.to_vec()).map_err(|_| invalid(chunk_type, "text is not UTF-8"))
                };
                ChunkData::InternationalText {
                    keyword: latin1_to_string(keyword),
                    compressed: flag == 1,
                    language: latin1_to_string(language),
                    translated_keyword: utf8(translated)?,
                    text: utf8(&text)?,
                }
            }
            other => ChunkData::Other(other, data.to_vec()),
        };
        Ok(parsed)
    }

    /// Tag of the chunk this payload belongs to.
    pub fn chunk_type(&self) -> ChunkType {
        match self {
            ChunkData::Palette(_) => ChunkType::PLTE,
            ChunkData::Transparency(_) => ChunkType::tRNS,
            ChunkData::Background(_) => ChunkType::bKGD,
            ChunkData::Gamma(_) => ChunkType::gAMA,
            ChunkData::Srgb(_) => ChunkType::sRGB,
            ChunkData::Physical(_) => ChunkType::pHYs,
            ChunkData::Time(_) => ChunkType::tIME,
            ChunkData::Text { .. } => ChunkType::tEXt,
            ChunkData::CompressedText { .. } => ChunkType::zTXt,
            ChunkData::InternationalText { .. } => ChunkType::iTXt,
            ChunkData::Other(t, _) => *t,
        }
    }

    /// Serialises the payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let chunk_type = self.chunk_type();
        let bytes = match self {
            ChunkData::Palette(entries) => {
                if entries.is_empty() || entries.len() > 256 {
                    return Err(invalid(chunk_type, "palette must hold 1 to 256 entries"));
                }
                entries.iter().flatten().copied().collect()
            }
            ChunkData::Transparency(raw) | ChunkData::Background(raw) | ChunkData::Other(_, raw) => {
                raw.clone()
            }
            ChunkData::Gamma(g) => g.to_be_bytes().to_vec(),
            ChunkData::Srgb(intent) => {
                if *intent > 3 {
                    return Err(invalid(chunk_type, "rendering intent must be 0 to 3"));
                }
                vec![*intent]
            }
            ChunkData::Physical(p) => {
                let mut out = Vec::with_capacity(9);
                out.extend_from_slice(&p.ppu_x.to_be_bytes());
                out.extend_from_slice(&p.ppu_y.to_be_bytes());
                out.push(p.unit);
                out
            }
            ChunkData::Time(t) => {
                let mut out = t.year.to_be_bytes().to_vec();
                out.extend_from_slice(&[t.month, t.day, t.hour, t.minute, t.second]);
                out
            }
            ChunkData::Text { keyword, text } => {
                let mut out = string_to_latin1(chunk_type, keyword)?;
                check_keyword(chunk_type, &out)?;
                out.push(0);
                out.extend(string_to_latin1(chunk_type, text)?);
                out
            }
            ChunkData::CompressedText { keyword, text } => {
                let mut out = string_to_latin1(chunk_type, keyword)?;
                check_keyword(chunk_type, &out)?;
                out.extend_from_slice(&[0, 0]);
                out.extend(deflate(&string_to_latin1(chunk_type, text)?)?);
                out
            }
            ChunkData::InternationalText {
                keyword,
                compressed,
                language,
                translated_keyword,
                text,
            } => {
                let mut out = string_to_latin1(chunk_type, keyword)?;
                check_keyword(chunk_type, &out)?;
                out.extend_from_slice(&[0, *compressed as u8, 0]);
                out.extend(string_to_latin1(chunk_type, language)?);
                out.push(0);
                out.extend_from_slice(translated_keyword.as_bytes());
                out.push(0);
                if *compressed {
                    out.extend(deflate(text.as_bytes())?);
                } else {
                    out.extend_from_slice(text.as_bytes());
                }
                out
            }
        };
        Ok(bytes)
    }

    /// Serialises into a chunk ready to queue.
    pub fn to_chunk(&self) -> Result<Chunk> {
        Ok(Chunk::new(self.chunk_type(), self.to_bytes()?))
    }
}

/// An ordered set of chunks with typed accessors.
///
/// On a reader it holds the chunks loaded so far; on a writer it is the
/// queue of chunks still to be written.
#[derive(Debug, Clone, Default)]
pub struct PngMetadata {
    chunks: Vec<Chunk>,
}

impl PngMetadata {
    /// Empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// All chunks, in order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// First chunk with the given tag.
    pub fn get(&self, chunk_type: ChunkType) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.chunk_type == chunk_type)
    }

    /// Every chunk with the given tag.
    pub fn get_all(&self, chunk_type: ChunkType) -> impl Iterator<Item = &Chunk> + '_ {
        self.chunks.iter().filter(move |c| c.chunk_type == chunk_type)
    }

    pub(crate) fn push(&mut self, chunk: Chunk) {
        self.chunks.push(chunk);
    }

    pub(crate) fn take_all(&mut self) -> Vec<Chunk> {
        std::mem::take(&mut self.chunks)
    }

    /// Number of chunks held.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True when no chunk is held.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Replaces any chunk with the same tag.
    fn replace(&mut self, data: ChunkData) -> Result<()> {
        let chunk = data.to_chunk()?;
        self.chunks.retain(|c| c.chunk_type != chunk.chunk_type);
        self.chunks.push(chunk);
        Ok(())
    }

    fn typed(&self, chunk_type: ChunkType) -> Option<ChunkData> {
        let chunk = self.get(chunk_type)?;
        match ChunkData::parse(chunk_type, &chunk.data) {
            Ok(data) => Some(data),
            Err(err) => {
                log::debug!("ignoring unreadable {chunk_type}: {err}");
                None
            }
        }
    }

    /// Palette entries.
    pub fn palette(&self) -> Option<Vec<[u8; 3]>> {
        match self.typed(ChunkType::PLTE)? {
            ChunkData::Palette(p) => Some(p),
            _ => None,
        }
    }

    /// Raw tRNS payload.
    pub fn transparency(&self) -> Option<&[u8]> {
        self.get(ChunkType::tRNS).map(|c| c.data.as_slice())
    }

    /// Image gamma.
    pub fn gamma(&self) -> Option<f64> {
        match self.typed(ChunkType::gAMA)? {
            ChunkData::Gamma(g) => Some(g as f64 / 100_000.0),
            _ => None,
        }
    }

    /// sRGB rendering intent.
    pub fn srgb(&self) -> Option<u8> {
        match self.typed(ChunkType::sRGB)? {
            ChunkData::Srgb(intent) => Some(intent),
            _ => None,
        }
    }

    /// Physical pixel dimensions.
    pub fn physical(&self) -> Option<Physical> {
        match self.typed(ChunkType::pHYs)? {
            ChunkData::Physical(p) => Some(p),
            _ => None,
        }
    }

    /// Modification time.
    pub fn time(&self) -> Option<PngTime> {
        match self.typed(ChunkType::tIME)? {
            ChunkData::Time(t) => Some(t),
            _ => None,
        }
    }

    /// Keyword and text of every tEXt, zTXt and iTXt chunk, in stream order.
    pub fn texts(&self) -> Vec<(String, String)> {
        self.chunks
            .iter()
            .filter(|c| matches!(c.chunk_type, ChunkType::tEXt | ChunkType::zTXt | ChunkType::iTXt))
            .filter_map(|c| match ChunkData::parse(c.chunk_type, &c.data) {
                Ok(ChunkData::Text { keyword, text })
                | Ok(ChunkData::CompressedText { keyword, text })
                | Ok(ChunkData::InternationalText { keyword, text, .. }) => Some((keyword, text)),
                _ => None,
            })
            .collect()
    }

    /// Text stored under `keyword`, first match.
    pub fn text(&self, keyword: &str) -> Option<String> {
        self.texts()
            .into_iter()
            .find(|(k, _)| k == keyword)
            .map(|(_, v)| v)
    }

    /// Sets the palette.
    pub fn set_palette(&mut self, entries: &[[u8; 3]]) -> Result<()> {
        self.replace(ChunkData::Palette(entries.to_vec()))
    }

    /// Sets the raw tRNS payload.
    pub fn set_transparency(&mut self, raw: Vec<u8>) -> Result<()> {
        self.replace(ChunkData::Transparency(raw))
    }

    /// Sets the image gamma.
    pub fn set_gamma(&mut self, gamma: f64) -> Result<()> {
        self.replace(ChunkData::Gamma((gamma * 100_000.0 + 0.5) as u32))
    }

    /// Sets the sRGB rendering intent.
    pub fn set_srgb(&mut self, intent: u8) -> Result<()> {
        self.replace(ChunkData::Srgb(intent))
    }

    /// Sets the physical pixel dimensions.
    pub fn set_physical(&mut self, physical: Physical) -> Result<()> {
        self.replace(ChunkData::Physical(physical))
    }

    /// Sets the modification time.
    pub fn set_time(&mut self, time: PngTime) -> Result<()> {
        self.replace(ChunkData::Time(time))
    }

    /// Adds a text chunk: tEXt, zTXt when `compressed`, or iTXt when the
    /// text does not fit Latin-1.
    pub fn add_text(&mut self, keyword: &str, text: &str, compressed: bool) -> Result<()> {
        let latin1 = text.chars().all(|c| (c as u32) < 0x100);
        let data = match (latin1, compressed) {
            (true, false) => ChunkData::Text {
                keyword: keyword.to_owned(),
                text: text.to_owned(),
            },
            (true, true) => ChunkData::CompressedText {
                keyword: keyword.to_owned(),
                text: text.to_owned(),
            },
            (false, _) => ChunkData::InternationalText {
                keyword: keyword.to_owned(),
                compressed,
                language: String::new(),
                translated_keyword: String::new(),
                text: text.to_owned(),
            },
        };
        self.chunks.push(data.to_chunk()?);
        Ok(())
    }
}
