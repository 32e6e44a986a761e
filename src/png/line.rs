//! Row containers handed to and from the reader and writer.

use super::bit_depth::{self, Sample};
use super::filter::FilterType;
use crate::error::{Error, Result};
use crate::info::ImageInfo;

/// One image row of samples.
///
/// Rows of depth below 8 are held either packed (one raw byte per slot) or
/// unpacked (one sample per slot). 16-bit samples in a `u8` line keep only
/// their high byte.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageLine<S> {
    info: ImageInfo,
    samples: Vec<S>,
    packed: bool,
    row: Option<u32>,
    filter: Option<FilterType>,
}

impl<S: Sample> ImageLine<S> {
    /// Zeroed line. `packed` only matters for depths below 8.
    pub fn new(info: ImageInfo, packed: bool) -> Self {
        Self {
            info,
            samples: vec![S::default(); info.samples_per_row()],
            packed: packed && info.packed(),
            row: None,
            filter: None,
        }
    }

    /// Line holding unpacked `samples`, which must be one row long.
    pub fn from_samples(info: ImageInfo, samples: &[S]) -> Result<Self> {
        let expected = info.samples_per_row();
        if samples.len() != expected {
            return Err(Error::Malformed(format!(
                "row has {} samples, expected {expected}",
                samples.len()
            )));
        }
        let mut line = Self::new(info, false);
        line.samples.copy_from_slice(samples);
        Ok(line)
    }

    /// Image the line belongs to.
    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    /// Image row last stored in the line.
    pub fn row(&self) -> Option<u32> {
        self.row
    }

    /// Filter the row was stored with, once read or written.
    pub fn filter(&self) -> Option<FilterType> {
        self.filter
    }

    /// Whether sub-byte samples are held packed.
    pub fn is_packed(&self) -> bool {
        self.packed
    }

    /// Number of meaningful slots.
    pub fn len(&self) -> usize {
        if self.packed {
            self.info.bytes_per_row()
        } else {
            self.info.samples_per_row()
        }
    }

    /// Always false; a line covers at least one pixel.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Meaningful slots.
    pub fn samples(&self) -> &[S] {
        &self.samples[..self.len()]
    }

    /// Meaningful slots, mutable.
    pub fn samples_mut(&mut self) -> &mut [S] {
        let len = self.len();
        &mut self.samples[..len]
    }

    /// Largest value a slot holds in the current mode.
    pub fn max_sample(&self) -> u16 {
        match self.info.bit_depth() {
            16 => S::MAX,
            _ if self.packed => 0xFF,
            depth => (1 << depth) - 1,
        }
    }

    /// Unpacks sub-byte samples in place.
    pub fn unpack(&mut self, scale: bool) {
        if self.packed {
            bit_depth::unpack_in_place(&self.info, &mut self.samples, scale);
            self.packed = false;
        }
    }

    /// Packs sub-byte samples in place.
    pub fn pack(&mut self, scale: bool) {
        if !self.packed && self.info.packed() {
            bit_depth::pack_in_place(&self.info, &mut self.samples, scale);
            self.packed = true;
        }
    }

    /// Copy with another slot type. 16-bit values are narrowed to their
    /// high byte, or widened with a zero low byte.
    pub fn convert<T: Sample>(&self) -> ImageLine<T> {
        let samples = if self.info.bit_depth() == 16 {
            self.samples
                .iter()
                .map(|s| {
                    let [msb, lsb] = s.to_be_pair();
                    T::from_be_pair(msb, lsb)
                })
                .collect()
        } else {
            self.samples.iter().map(|s| T::from_u16(s.to_u16())).collect()
        };
        ImageLine {
            info: self.info,
            samples,
            packed: self.packed,
            row: self.row,
            filter: self.filter,
        }
    }

    /// Loads unfiltered raw bytes.
    pub(crate) fn load_raw(&mut self, raw: &[u8], row: u32, filter: FilterType) {
        bit_depth::bytes_to_row(&self.info, raw, &mut self.samples, !self.packed);
        self.row = Some(row);
        self.filter = Some(filter);
    }

    /// Stores the line as unfiltered raw bytes.
    pub(crate) fn store_raw(&self, raw: &mut [u8]) {
        bit_depth::row_to_bytes(&self.info, &self.samples, raw, self.packed);
    }

    pub(crate) fn set_written(&mut self, row: u32, filter: FilterType) {
        self.row = Some(row);
        self.filter = Some(filter);
    }
}

/// A strided subset of image rows: `offset`, `offset + step`, ...
#[derive(Debug, Clone, PartialEq)]
pub struct ImageLines<S> {
    info: ImageInfo,
    offset: u32,
    step: u32,
    lines: Vec<ImageLine<S>>,
}

impl<S: Sample> ImageLines<S> {
    /// Zeroed rows. Fails when the last requested row lies outside the image.
    pub fn new(info: ImageInfo, packed: bool, offset: u32, count: u32, step: u32) -> Result<Self> {
        let last = (count as u64).saturating_sub(1) * step as u64 + offset as u64;
        if step == 0 || count == 0 || last >= info.rows() as u64 {
            return Err(Error::InvalidRowRange {
                offset,
                count,
                step,
            });
        }
        Ok(Self {
            info,
            offset,
            step,
            lines: (0..count).map(|_| ImageLine::new(info, packed)).collect(),
        })
    }

    /// First image row.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Distance between image rows.
    pub fn step(&self) -> u32 {
        self.step
    }

    /// Number of rows held.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// True when no row is held.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Image the rows belong to.
    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    /// Index of image row `row`, or `None` when the subset skips it.
    pub fn image_row_to_matrix_row(&self, row: u32) -> Option<usize> {
        let rel = row.checked_sub(self.offset)?;
        if rel % self.step != 0 {
            return None;
        }
        let index = (rel / self.step) as usize;
        (index < self.lines.len()).then_some(index)
    }

    /// Image row stored at `index`.
    pub fn matrix_row_to_image_row(&self, index: usize) -> u32 {
        self.offset + index as u32 * self.step
    }

    /// Line at matrix index `index`.
    pub fn get(&self, index: usize) -> Option<&ImageLine<S>> {
        self.lines.get(index)
    }

    /// Line for image row `row`.
    pub fn by_image_row(&self, row: u32) -> Option<&ImageLine<S>> {
        self.image_row_to_matrix_row(row).map(|i| &self.lines[i])
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut ImageLine<S>> {
        self.lines.get_mut(index)
    }

    /// All lines in row order.
    pub fn iter(&self) -> std::slice::Iter<'_, ImageLine<S>> {
        self.lines.iter()
    }
}

impl<'a, S> IntoIterator for &'a ImageLines<S> {
    type Item = &'a ImageLine<S>;
    type IntoIter = std::slice::Iter<'a, ImageLine<S>>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.iter()
    }
}
