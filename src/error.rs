//! Error types for the pngline library.

use std::io;

use crate::png::chunk::ChunkType;

/// Result type alias for pngline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reading or writing a PNG stream.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The stream is not structurally valid (bad signature, bad header, short row data).
    #[error("malformed stream: {0}")]
    Malformed(String),
    /// A chunk checksum did not match its contents.
    #[error("CRC mismatch in {chunk} chunk: expected {expected:#010x}, computed {actual:#010x}")]
    Integrity {
        /// Chunk whose checksum failed.
        chunk: ChunkType,
        /// CRC stored in the stream.
        expected: u32,
        /// CRC computed over the chunk tag and payload.
        actual: u32,
    },
    /// End of stream reached in the middle of a chunk or row.
    #[error("unexpected end of stream")]
    UnexpectedEnd,
    /// A configured read ceiling was passed.
    #[error("resource limit exceeded: {what} over {limit} bytes")]
    ResourceLimitExceeded {
        /// Which ceiling was hit.
        what: &'static str,
        /// The configured ceiling in bytes.
        limit: u64,
    },
    /// Rows were requested or supplied out of sequence.
    #[error("row {requested} accessed out of order, next available row is {next}")]
    OutOfOrderAccess {
        /// Row that was asked for.
        requested: u32,
        /// First row that can still be served.
        next: u32,
    },
    /// Unknown filter tag at the start of a row.
    #[error("unsupported filter type {0}")]
    UnsupportedFilter(u8),
    /// Colour model byte is not one of 0, 2, 3, 4, 6.
    #[error("unsupported color mode {0}")]
    UnsupportedColorMode(u8),
    /// Bit depth not allowed for the colour model.
    #[error("bit depth {bit_depth} is not valid for color mode {color}")]
    InvalidBitDepth {
        /// Requested bit depth.
        bit_depth: u8,
        /// Colour model byte.
        color: u8,
    },
    /// Invalid image dimensions (zero or above 2^31-1).
    #[error("invalid image dimensions: {width}x{height}")]
    InvalidDimensions {
        /// Image width.
        width: u32,
        /// Image height.
        height: u32,
    },
    /// A queued chunk could not be placed anywhere in the output.
    #[error("chunk {0} was queued but never written")]
    UnflushedChunk(ChunkType),
    /// A second instance of a single-instance chunk.
    #[error("duplicate {0} chunk")]
    DuplicateChunk(ChunkType),
    /// Chunk not acceptable at this point or with this payload.
    #[error("invalid chunk: {0}")]
    InvalidChunk(String),
    /// Row subset that does not fit inside the image.
    #[error("rows {offset} + n*{step} for {count} rows do not fit the image")]
    InvalidRowRange {
        /// First row.
        offset: u32,
        /// Number of rows.
        count: u32,
        /// Distance between rows.
        step: u32,
    },
    /// Underlying I/O failure.
    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            return Error::UnexpectedEnd;
        }
        // Errors raised under the decompressor come back wrapped.
        if err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            if let Some(inner) = err.into_inner() {
                if let Ok(original) = inner.downcast::<Error>() {
                    return *original;
                }
            }
            return Error::Malformed("corrupt pixel data stream".into());
        }
        Error::Io(err)
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(inner) => inner,
            Error::UnexpectedEnd => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eof_maps_to_unexpected_end() {
        let err: Error = io::Error::new(io::ErrorKind::UnexpectedEof, "short").into();
        assert!(matches!(err, Error::UnexpectedEnd));
    }

    #[test]
    fn wrapped_error_is_recovered() {
        let io_err: io::Error = Error::Integrity {
            chunk: ChunkType::IDAT,
            expected: 1,
            actual: 2,
        }
        .into();
        let back: Error = io_err.into();
        assert!(matches!(back, Error::Integrity { expected: 1, actual: 2, .. }));
    }

    #[test]
    fn display_messages() {
        let err = Error::UnsupportedFilter(7);
        assert_eq!(err.to_string(), "unsupported filter type 7");
        let err = Error::InvalidDimensions { width: 0, height: 3 };
        assert_eq!(err.to_string(), "invalid image dimensions: 0x3");
    }
}
