//! Colour model definitions.
//!
//! The header stores the colour model as a single byte built from three
//! flags: 1 = palette used, 2 = colour used, 4 = alpha channel present.

/// Colour models allowed in the image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ColorType {
    /// Grayscale, one channel.
    Gray = 0,
    /// RGB, three channels.
    Rgb = 2,
    /// Palette indices, one channel.
    Indexed = 3,
    /// Grayscale with alpha, two channels.
    GrayAlpha = 4,
    /// RGBA, four channels.
    Rgba = 6,
}

impl ColorType {
    /// Builds the colour model from its flags.
    ///
    /// Indexed images never carry alpha; that combination yields `None`.
    pub const fn from_flags(alpha: bool, gray: bool, indexed: bool) -> Option<Self> {
        match (indexed, gray, alpha) {
            (true, _, true) => None,
            (true, _, false) => Some(ColorType::Indexed),
            (false, true, false) => Some(ColorType::Gray),
            (false, true, true) => Some(ColorType::GrayAlpha),
            (false, false, false) => Some(ColorType::Rgb),
            (false, false, true) => Some(ColorType::Rgba),
        }
    }

    /// Number of samples per pixel.
    #[inline]
    pub const fn channels(self) -> usize {
        match self {
            ColorType::Gray | ColorType::Indexed => 1,
            ColorType::GrayAlpha => 2,
            ColorType::Rgb => 3,
            ColorType::Rgba => 4,
        }
    }

    /// Whether the model carries an alpha channel.
    #[inline]
    pub const fn has_alpha(self) -> bool {
        matches!(self, ColorType::GrayAlpha | ColorType::Rgba)
    }

    /// Whether the model is grayscale.
    #[inline]
    pub const fn is_gray(self) -> bool {
        matches!(self, ColorType::Gray | ColorType::GrayAlpha)
    }

    /// Whether samples are palette indices.
    #[inline]
    pub const fn is_indexed(self) -> bool {
        matches!(self, ColorType::Indexed)
    }

    /// Bit depths the header may pair with this model.
    pub const fn allowed_bit_depths(self) -> &'static [u8] {
        match self {
            ColorType::Gray => &[1, 2, 4, 8, 16],
            ColorType::Indexed => &[1, 2, 4, 8],
            ColorType::Rgb | ColorType::GrayAlpha | ColorType::Rgba => &[8, 16],
        }
    }
}

impl TryFrom<u8> for ColorType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ColorType::Gray),
            2 => Ok(ColorType::Rgb),
            3 => Ok(ColorType::Indexed),
            4 => Ok(ColorType::GrayAlpha),
            6 => Ok(ColorType::Rgba),
            other => Err(other),
        }
    }
}

impl From<ColorType> for u8 {
    fn from(color: ColorType) -> Self {
        color as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels() {
        assert_eq!(ColorType::Gray.channels(), 1);
        assert_eq!(ColorType::Indexed.channels(), 1);
        assert_eq!(ColorType::GrayAlpha.channels(), 2);
        assert_eq!(ColorType::Rgb.channels(), 3);
        assert_eq!(ColorType::Rgba.channels(), 4);
    }

    #[test]
    fn test_from_flags_matches_header_byte() {
        for alpha in [false, true] {
            for gray in [false, true] {
                let expected = (alpha as u8) * 4 + (!gray as u8) * 2;
                let color = ColorType::from_flags(alpha, gray, false).unwrap();
                assert_eq!(u8::from(color), expected);
            }
        }
        assert_eq!(ColorType::from_flags(false, false, true), Some(ColorType::Indexed));
        assert_eq!(ColorType::from_flags(true, false, true), None);
    }

    #[test]
    fn test_try_from_rejects_unknown_models() {
        for byte in [1u8, 5, 7, 8, 255] {
            assert_eq!(ColorType::try_from(byte), Err(byte));
        }
        assert_eq!(ColorType::try_from(6), Ok(ColorType::Rgba));
    }
}
