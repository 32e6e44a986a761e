//! PNG row filters.
//!
//! PNG uses filtering to improve compression by exploiting correlations
//! between adjacent pixels. Each filtered row starts with a tag byte naming
//! the filter; the remaining bytes are `raw - predictor` modulo 256.

use crate::error::{Error, Result};

/// Filter type bytes as defined by the PNG specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum FilterType {
    /// Raw bytes.
    None = 0,
    /// Difference from the byte one pixel to the left.
    Sub = 1,
    /// Difference from the byte above.
    Up = 2,
    /// Difference from the mean of left and above.
    Average = 3,
    /// Difference from the Paeth predictor.
    Paeth = 4,
}

impl FilterType {
    /// All filters in tag order.
    pub const ALL: [FilterType; 5] = [
        FilterType::None,
        FilterType::Sub,
        FilterType::Up,
        FilterType::Average,
        FilterType::Paeth,
    ];

    /// Tag byte written in front of the row.
    #[inline]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Decodes a row tag, failing with [`Error::UnsupportedFilter`].
    #[inline]
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(FilterType::None),
            1 => Ok(FilterType::Sub),
            2 => Ok(FilterType::Up),
            3 => Ok(FilterType::Average),
            4 => Ok(FilterType::Paeth),
            other => Err(Error::UnsupportedFilter(other)),
        }
    }
}

/// Paeth predictor function.
///
/// Selects the value (a, b, or c) closest to p = a + b - c, preferring
/// a, then b, then c on ties.
#[inline]
pub fn paeth_predictor(a: u8, b: u8, c: u8) -> u8 {
    let a_i = a as i16;
    let b_i = b as i16;
    let c_i = c as i16;

    let p = a_i + b_i - c_i;
    let pa = (p - a_i).abs();
    let pb = (p - b_i).abs();
    let pc = (p - c_i).abs();

    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Filters `row` against `prev` into `out`.
///
/// All three slices have the raw row length; `prev` is all zeros for the
/// first row of an image or interlace pass.
pub fn filter_row(filter: FilterType, row: &[u8], prev: &[u8], bpp: usize, out: &mut [u8]) {
    debug_assert_eq!(row.len(), prev.len());
    debug_assert_eq!(row.len(), out.len());
    match filter {
        FilterType::None => out.copy_from_slice(row),
        FilterType::Sub => {
            let head = bpp.min(row.len());
            out[..head].copy_from_slice(&row[..head]);
            for i in head..row.len() {
                out[i] = row[i].wrapping_sub(row[i - bpp]);
            }
        }
        FilterType::Up => {
            for ((o, &x), &above) in out.iter_mut().zip(row).zip(prev) {
                *o = x.wrapping_sub(above);
            }
        }
        FilterType::Average => {
            for i in 0..row.len() {
                let left = if i >= bpp { row[i - bpp] as u16 } else { 0 };
                let above = prev[i] as u16;
                out[i] = row[i].wrapping_sub(((left + above) / 2) as u8);
            }
        }
        FilterType::Paeth => {
            for i in 0..row.len() {
                let (left, upper_left) = if i >= bpp {
                    (row[i - bpp], prev[i - bpp])
                } else {
                    (0, 0)
                };
                out[i] = row[i].wrapping_sub(paeth_predictor(left, prev[i], upper_left));
            }
        }
    }
}

/// Reconstructs a row in place by reversing `filter` against `prev`.
///
/// Bytes are processed left to right since each one depends on the already
/// reconstructed bytes to its left.
pub fn unfilter_row(filter: FilterType, row: &mut [u8], prev: &[u8], bpp: usize) {
    debug_assert_eq!(row.len(), prev.len());
    match filter {
        FilterType::None => {}
        FilterType::Sub => {
            for i in bpp..row.len() {
                row[i] = row[i].wrapping_add(row[i - bpp]);
            }
        }
        FilterType::Up => {
            for (x, &above) in row.iter_mut().zip(prev) {
                *x = x.wrapping_add(above);
            }
        }
        FilterType::Average => {
            for i in 0..row.len() {
                let left = if i >= bpp { row[i - bpp] as u16 } else { 0 };
                let above = prev[i] as u16;
                row[i] = row[i].wrapping_add(((left + above) / 2) as u8);
            }
        }
        FilterType::Paeth => {
            for i in 0..row.len() {
                let (left, upper_left) = if i >= bpp {
                    (row[i - bpp], prev[i - bpp])
                } else {
                    (0, 0)
                };
                row[i] = row[i].wrapping_add(paeth_predictor(left, prev[i], upper_left));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paeth_predictor() {
        // When all are equal, should return that value
        assert_eq!(paeth_predictor(100, 100, 100), 100);
        assert_eq!(paeth_predictor(0, 0, 0), 0);

        // p = 10 + 20 - 15 = 15, pc = 0 is smallest
        assert_eq!(paeth_predictor(10, 20, 15), 15);
    }

    #[test]
    fn test_paeth_predictor_tie_break() {
        // a closest
        assert_eq!(paeth_predictor(100, 50, 50), 100);
        // b closest
        assert_eq!(paeth_predictor(50, 100, 50), 100);
        // pa == pb: a wins
        assert_eq!(paeth_predictor(50, 50, 100), 50);
        // pb == pc with pa larger: b wins
        assert_eq!(paeth_predictor(12, 6, 10), 6);
    }

    #[test]
    fn test_filter_sub() {
        let row = [10, 20, 30, 40, 50, 60];
        let mut out = [0u8; 6];
        filter_row(FilterType::Sub, &row, &[0; 6], 3, &mut out);
        assert_eq!(out, [10, 20, 30, 30, 30, 30]);
    }

    #[test]
    fn test_filter_up() {
        let mut out = [0u8; 3];
        filter_row(FilterType::Up, &[50, 60, 70], &[10, 20, 30], 1, &mut out);
        assert_eq!(out, [40, 40, 40]);
    }

    #[test]
    fn test_unfilter_sub_wrapping() {
        let mut row = [200, 100, 100, 100];
        unfilter_row(FilterType::Sub, &mut row, &[0; 4], 1);
        // 200, 200+100=44 (wraps), 44+100=144, 144+100=244
        assert_eq!(row, [200, 44, 144, 244]);
    }

    #[test]
    fn test_unfilter_average() {
        let mut row = [10, 10, 10, 10];
        unfilter_row(FilterType::Average, &mut row, &[20; 4], 1);
        // 10 + avg(0, 20) = 20, then 10 + avg(20, 20) = 30
        assert_eq!(row[0], 20);
        assert_eq!(row[1], 30);
    }

    #[test]
    fn test_every_filter_inverts() {
        let row: Vec<u8> = (0..24u32).map(|i| (i * 37 % 251) as u8).collect();
        let prev: Vec<u8> = (0..24u32).map(|i| (255 - i * 11 % 256) as u8).collect();
        for filter in FilterType::ALL {
            for bpp in [1, 2, 3, 4, 6, 8] {
                let mut filtered = vec![0u8; row.len()];
                filter_row(filter, &row, &prev, bpp, &mut filtered);
                unfilter_row(filter, &mut filtered, &prev, bpp);
                assert_eq!(filtered, row, "{filter:?} bpp={bpp}");
            }
        }
    }

    #[test]
    fn test_bpp_wider_than_row() {
        let mut out = [0u8; 2];
        filter_row(FilterType::Sub, &[9, 8], &[0, 0], 8, &mut out);
        assert_eq!(out, [9, 8]);
    }

    #[test]
    fn test_unknown_tag() {
        assert!(matches!(FilterType::from_tag(5), Err(Error::UnsupportedFilter(5))));
        assert_eq!(FilterType::from_tag(4).unwrap(), FilterType::Paeth);
    }
}
