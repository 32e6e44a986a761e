//! Immutable image description shared by the reader, writer and row helpers.

use crate::color::ColorType;
use crate::error::{Error, Result};

/// Largest width or height accepted in the header.
pub const MAX_DIMENSION: u32 = (1 << 31) - 1;

/// Geometry and sample layout of one image.
///
/// Built once when a stream is opened and never changed afterwards. All
/// derived sizes are computed up front so row code can read them directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    cols: u32,
    rows: u32,
    bit_depth: u8,
    color: ColorType,
    channels: usize,
    bits_per_pixel: usize,
    bytes_per_pixel: usize,
    bytes_per_row: usize,
    samples_per_row: usize,
}

impl ImageInfo {
    /// Describes an image from its dimensions and colour flags.
    ///
    /// Fails with [`Error::UnsupportedColorMode`] for indexed images with
    /// alpha, [`Error::InvalidBitDepth`] when the depth does not suit the
    /// colour model and [`Error::InvalidDimensions`] for zero or oversized
    /// dimensions.
    pub fn new(
        cols: u32,
        rows: u32,
        bit_depth: u8,
        alpha: bool,
        gray: bool,
        indexed: bool,
    ) -> Result<Self> {
        let color = ColorType::from_flags(alpha, gray, indexed).ok_or_else(|| {
            Error::UnsupportedColorMode(4 * alpha as u8 + indexed as u8 + 2 * !gray as u8)
        })?;
        Self::with_color(cols, rows, bit_depth, color)
    }

    /// Describes an image from an already decoded colour model.
    pub fn with_color(cols: u32, rows: u32, bit_depth: u8, color: ColorType) -> Result<Self> {
        if cols == 0 || rows == 0 || cols > MAX_DIMENSION || rows > MAX_DIMENSION {
            return Err(Error::InvalidDimensions {
                width: cols,
                height: rows,
            });
        }
        if !color.allowed_bit_depths().contains(&bit_depth) {
            return Err(Error::InvalidBitDepth {
                bit_depth,
                color: color.into(),
            });
        }

        let channels = color.channels();
        let bits_per_pixel = channels * bit_depth as usize;
        let bytes_per_row = (bits_per_pixel * cols as usize).div_ceil(8);
        Ok(Self {
            cols,
            rows,
            bit_depth,
            color,
            channels,
            bits_per_pixel,
            bytes_per_pixel: bits_per_pixel.div_ceil(8),
            bytes_per_row,
            samples_per_row: channels * cols as usize,
        })
    }

    /// Convenience constructor for 8 or 16 bit RGB(A).
    pub fn rgb(cols: u32, rows: u32, bit_depth: u8, alpha: bool) -> Result<Self> {
        Self::new(cols, rows, bit_depth, alpha, false, false)
    }

    /// Convenience constructor for grayscale, any depth.
    pub fn gray(cols: u32, rows: u32, bit_depth: u8, alpha: bool) -> Result<Self> {
        Self::new(cols, rows, bit_depth, alpha, true, false)
    }

    /// Convenience constructor for palette images.
    pub fn palette(cols: u32, rows: u32, bit_depth: u8) -> Result<Self> {
        Self::new(cols, rows, bit_depth, false, false, true)
    }

    /// Returns a copy with other dimensions, used for interlace sub-images.
    pub(crate) fn with_dimensions(&self, cols: u32, rows: u32) -> Result<Self> {
        Self::with_color(cols, rows, self.bit_depth, self.color)
    }

    /// Image width in pixels.
    #[inline]
    pub const fn cols(&self) -> u32 {
        self.cols
    }

    /// Image height in pixels.
    #[inline]
    pub const fn rows(&self) -> u32 {
        self.rows
    }

    /// Bits per sample: 1, 2, 4, 8 or 16.
    #[inline]
    pub const fn bit_depth(&self) -> u8 {
        self.bit_depth
    }

    /// Colour model.
    #[inline]
    pub const fn color_type(&self) -> ColorType {
        self.color
    }

    /// Header byte for the colour model.
    #[inline]
    pub const fn color_model(&self) -> u8 {
        self.color as u8
    }

    /// Whether an alpha channel is present.
    #[inline]
    pub const fn alpha(&self) -> bool {
        self.color.has_alpha()
    }

    /// Whether the image is grayscale.
    #[inline]
    pub const fn greyscale(&self) -> bool {
        self.color.is_gray()
    }

    /// Whether samples are palette indices.
    #[inline]
    pub const fn indexed(&self) -> bool {
        self.color.is_indexed()
    }

    /// True when several samples share one byte (depth below 8).
    #[inline]
    pub const fn packed(&self) -> bool {
        self.bit_depth < 8
    }

    /// Samples per pixel.
    #[inline]
    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Bits per complete pixel.
    #[inline]
    pub const fn bits_per_pixel(&self) -> usize {
        self.bits_per_pixel
    }

    /// Bytes per complete pixel, rounded up. This is the filter stride.
    #[inline]
    pub const fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_pixel
    }

    /// Bytes in one raw row, without the filter tag.
    #[inline]
    pub const fn bytes_per_row(&self) -> usize {
        self.bytes_per_row
    }

    /// Samples in one logical row.
    #[inline]
    pub const fn samples_per_row(&self) -> usize {
        self.samples_per_row
    }

    /// Slots needed to hold a row when it is kept packed.
    #[inline]
    pub const fn samples_per_row_packed(&self) -> usize {
        if self.packed() {
            self.bytes_per_row
        } else {
            self.samples_per_row
        }
    }

    /// Total raw size of the image, one filter byte per row included.
    pub fn total_raw_len(&self) -> u64 {
        (self.bytes_per_row as u64 + 1) * self.rows as u64
    }
}
