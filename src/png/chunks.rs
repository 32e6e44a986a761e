//! Chunk placement rules and the per-stream chunk registry.
//!
//! Ancillary chunks carry an ordering constraint relative to the palette and
//! the pixel data. The reader tags every chunk with the group it was found
//! in; the writer uses the same groups to decide when a queued chunk is
//! flushed.

use std::collections::HashMap;
use std::fmt;

use super::chunk::{ChunkType, RawChunk};
use crate::error::{Error, Result};

/// Position of a chunk relative to the structural chunks, in stream order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChunkGroup {
    /// Signature and header.
    Header = 0,
    /// After the header, before any palette.
    PreData = 1,
    /// The palette itself.
    PaletteSection = 2,
    /// After the palette, before the pixel data.
    PostPalette = 3,
    /// Inside the pixel data.
    PixelData = 4,
    /// After the pixel data, before the end chunk.
    PostData = 5,
    /// End chunk seen or written.
    Terminal = 6,
}

/// Where an ancillary chunk may appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkOrdering {
    /// Anywhere between header and end chunk.
    None,
    /// Before the palette (and so before the pixel data).
    BeforePalette,
    /// After the palette, before the pixel data.
    AfterPaletteBeforeData,
    /// Before the pixel data, either side of the palette.
    BeforeData,
}

impl ChunkOrdering {
    /// Whether the chunk has to precede the pixel data.
    pub const fn before_data(self) -> bool {
        !matches!(self, ChunkOrdering::None)
    }
}

/// Ordering and multiplicity of a chunk tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkKind {
    /// Placement constraint.
    pub ordering: ChunkOrdering,
    /// Whether several instances may appear.
    pub allows_multiple: bool,
}

impl ChunkKind {
    const fn new(ordering: ChunkOrdering, allows_multiple: bool) -> Self {
        Self {
            ordering,
            allows_multiple,
        }
    }
}

/// Kind of the built-in tags, `None` for tags this crate does not know.
pub fn known_kind(chunk_type: ChunkType) -> Option<ChunkKind> {
    use ChunkOrdering as O;
    let kind = match chunk_type {
        ChunkType::IHDR | ChunkType::PLTE | ChunkType::IEND => ChunkKind::new(O::None, false),
        ChunkType::IDAT => ChunkKind::new(O::None, true),
        ChunkType::cHRM
        | ChunkType::gAMA
        | ChunkType::iCCP
        | ChunkType::sBIT
        | ChunkType::sRGB => ChunkKind::new(O::BeforePalette, false),
        ChunkType::bKGD | ChunkType::hIST | ChunkType::tRNS => {
            ChunkKind::new(O::AfterPaletteBeforeData, false)
        }
        ChunkType::pHYs | ChunkType::oFFs | ChunkType::sTER => ChunkKind::new(O::BeforeData, false),
        ChunkType::sPLT => ChunkKind::new(O::BeforeData, true),
        ChunkType::tIME => ChunkKind::new(O::None, false),
        ChunkType::tEXt | ChunkType::zTXt | ChunkType::iTXt => ChunkKind::new(O::None, true),
        _ => return None,
    };
    Some(kind)
}

/// Payload check run on registered chunks as they are loaded or queued.
pub type ChunkValidator = fn(&[u8]) -> Result<()>;

#[derive(Clone, Copy)]
struct Registration {
    kind: ChunkKind,
    validate: Option<ChunkValidator>,
}

/// Extra chunk kinds known to one reader or writer.
///
/// Registrations override the built-in table for the same tag. Tags that
/// are neither built in nor registered are treated as unconstrained and
/// repeatable.
#[derive(Clone, Default)]
pub struct ChunkRegistry {
    entries: HashMap<ChunkType, Registration>,
}

impl ChunkRegistry {
    /// Empty registry; only the built-in tags are known.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an ancillary tag.
    pub fn register(
        &mut self,
        chunk_type: ChunkType,
        ordering: ChunkOrdering,
        allows_multiple: bool,
        validate: Option<ChunkValidator>,
    ) -> Result<()> {
        if chunk_type.is_critical() {
            return Err(Error::InvalidChunk(format!(
                "cannot register critical chunk {chunk_type}"
            )));
        }
        self.entries.insert(
            chunk_type,
            Registration {
                kind: ChunkKind::new(ordering, allows_multiple),
                validate,
            },
        );
        Ok(())
    }

    /// True for built-in and registered tags.
    pub fn is_known(&self, chunk_type: ChunkType) -> bool {
        self.entries.contains_key(&chunk_type) || known_kind(chunk_type).is_some()
    }

    /// Kind of any tag.
    pub fn kind(&self, chunk_type: ChunkType) -> ChunkKind {
        self.entries
            .get(&chunk_type)
            .map(|r| r.kind)
            .or_else(|| known_kind(chunk_type))
            .unwrap_or(ChunkKind::new(ChunkOrdering::None, true))
    }

    /// Runs the registered validator for `chunk_type`, if any.
    pub fn validate(&self, chunk_type: ChunkType, data: &[u8]) -> Option<Result<()>> {
        self.entries
            .get(&chunk_type)
            .and_then(|r| r.validate)
            .map(|validate| validate(data))
    }
}

impl fmt::Debug for ChunkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// A loaded or queued chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk tag.
    pub chunk_type: ChunkType,
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Byte offset in the source stream, for chunks that were read.
    pub offset: Option<u64>,
    /// Group the chunk was read from or written into.
    pub group: Option<ChunkGroup>,
    /// Writer hint: place the chunk as early as its ordering allows.
    pub priority: bool,
}

impl Chunk {
    /// A fresh chunk to be queued on a writer.
    pub fn new(chunk_type: ChunkType, data: Vec<u8>) -> Self {
        Self {
            chunk_type,
            data,
            offset: None,
            group: None,
            priority: false,
        }
    }

    /// Sets the early-placement hint.
    pub fn with_priority(mut self, priority: bool) -> Self {
        self.priority = priority;
        self
    }

    pub(crate) fn from_raw(raw: RawChunk, group: ChunkGroup) -> Self {
        Self {
            chunk_type: raw.chunk_type,
            data: raw.data,
            offset: Some(raw.offset),
            group: Some(group),
            priority: false,
        }
    }
}

/// Whether a queued chunk of `kind` is written when the writer reaches `current`.
///
/// The palette only goes into its own group. A chunk that must precede the
/// palette is written right after the header; one that must follow it waits
/// for the post-palette group. Others default to the latest group their
/// ordering allows, or the earliest with `priority` set, and are also
/// accepted by any later group still inside their window.
pub fn should_write(
    chunk_type: ChunkType,
    kind: ChunkKind,
    priority: bool,
    current: ChunkGroup,
) -> bool {
    use ChunkGroup::*;
    if current == PaletteSection {
        return chunk_type == ChunkType::PLTE;
    }
    if chunk_type == ChunkType::PLTE {
        return false;
    }
    let (min, max) = match kind.ordering {
        ChunkOrdering::BeforePalette => (PreData, PreData),
        ChunkOrdering::AfterPaletteBeforeData => (PostPalette, PostPalette),
        ChunkOrdering::BeforeData => (PreData, PostPalette),
        ChunkOrdering::None => (PreData, PostData),
    };
    let preferred = if priority { min } else { max };
    current == preferred || (current > preferred && current <= max)
}
