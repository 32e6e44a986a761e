//! # pngline
//!
//! Streaming, row-oriented PNG reading and writing.
//!
//! Images are processed one scanline at a time: the reader inflates and
//! unfilters rows on demand, the writer filters and deflates rows as they
//! arrive. Neither holds the whole image except for interlaced streams.
//!
//! ## Features
//!
//! - **All colour models and bit depths** (1, 2, 4, 8 and 16 bits)
//! - **Adam7 interlacing** on both sides
//! - **Per-row filter selection**: fixed, cyclic or adaptive with entropy scoring
//! - **Chunk placement rules** for queued metadata, plus typed accessors
//! - Configurable CRC checking and read ceilings
//!
//! ## Example
//!
//! ```rust
//! use pngline::png::{PngReader, PngWriter};
//! use pngline::ImageInfo;
//!
//! let info = ImageInfo::rgb(2, 1, 8, false).unwrap();
//! let mut writer = PngWriter::new(Vec::new(), info);
//! writer.write_row_bytes(&[255, 0, 0, 0, 0, 255]).unwrap();
//! let bytes = writer.finish().unwrap();
//!
//! let mut reader = PngReader::new(bytes.as_slice()).unwrap();
//! let row = reader.read_row_bytes(0).unwrap();
//! assert_eq!(row.samples(), &[255, 0, 0, 0, 0, 255]);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod color;
pub mod error;
pub mod info;
pub mod png;

pub use color::ColorType;
pub use error::{Error, Result};
pub use info::ImageInfo;
