//! Adam7 interlacing.
//!
//! Seven passes sub-sample the image on an 8x8 grid. Each pass is a small
//! image of its own whose rows are filtered independently, starting from an
//! all-zero previous row.

use crate::info::ImageInfo;

/// `(row_step, col_step, row_offset, col_offset)` for passes 1 to 7.
pub const ADAM7_PASSES: [(u32, u32, u32, u32); 7] = [
    (8, 8, 0, 0),
    (8, 8, 0, 4),
    (8, 4, 4, 0),
    (4, 4, 0, 2),
    (4, 2, 2, 0),
    (2, 2, 0, 1),
    (2, 1, 1, 0),
];

/// Geometry of one interlace pass over a given image size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassGeometry {
    /// Pass number, 1 to 7.
    pub pass: u8,
    /// Distance between sampled image rows.
    pub row_step: u32,
    /// Distance between sampled image columns.
    pub col_step: u32,
    /// First sampled image row.
    pub row_offset: u32,
    /// First sampled image column.
    pub col_offset: u32,
    /// Rows in the pass sub-image.
    pub rows: u32,
    /// Columns in the pass sub-image.
    pub cols: u32,
}

impl PassGeometry {
    /// Computes the sub-image size of `pass` (1-based) for a `width` x `height` image.
    pub fn new(pass: u8, width: u32, height: u32) -> Self {
        let (row_step, col_step, row_offset, col_offset) = ADAM7_PASSES[(pass - 1) as usize];
        let cols = sampled_count(width, col_step, col_offset);
        let rows = if cols == 0 {
            0
        } else {
            sampled_count(height, row_step, row_offset)
        };
        Self {
            pass,
            row_step,
            col_step,
            row_offset,
            col_offset,
            rows,
            cols,
        }
    }

    /// True when the pass holds no pixels.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    /// Image row sampled by sub-image row `sub_row`.
    #[inline]
    pub const fn image_row(&self, sub_row: u32) -> u32 {
        self.row_offset + sub_row * self.row_step
    }

    /// Image column sampled by sub-image column `sub_col`.
    #[inline]
    pub const fn image_col(&self, sub_col: u32) -> u32 {
        self.col_offset + sub_col * self.col_step
    }
}

/// `floor((n - offset) / step) + 1`, minus one when the last sample would
/// fall at or past `n`.
fn sampled_count(n: u32, step: u32, offset: u32) -> u32 {
    if offset >= n {
        return 0;
    }
    let mut count = (n - offset) / step + 1;
    if (count - 1) * step + offset >= n {
        count -= 1;
    }
    count
}

/// Walks the (pass, sub-row) sequence of an interlaced image, skipping
/// empty passes.
#[derive(Debug, Clone)]
pub struct InterlaceScheduler {
    width: u32,
    height: u32,
    geometry: PassGeometry,
    sub_row: u32,
    finished: bool,
}

impl InterlaceScheduler {
    /// Positions the scheduler on the first row of the first non-empty pass.
    pub fn new(width: u32, height: u32) -> Self {
        let mut scheduler = Self {
            width,
            height,
            geometry: PassGeometry::new(1, width, height),
            sub_row: 0,
            finished: false,
        };
        if scheduler.geometry.is_empty() {
            scheduler.next_pass();
        }
        scheduler
    }

    /// Current pass geometry.
    #[inline]
    pub fn geometry(&self) -> &PassGeometry {
        &self.geometry
    }

    /// Current pass number, 1 to 7.
    #[inline]
    pub fn pass(&self) -> u8 {
        self.geometry.pass
    }

    /// Current row inside the pass sub-image.
    #[inline]
    pub fn sub_row(&self) -> u32 {
        self.sub_row
    }

    /// Image row the current sub-row samples.
    #[inline]
    pub fn image_row(&self) -> u32 {
        self.geometry.image_row(self.sub_row)
    }

    /// True once every row of every pass has been visited.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// True on the final row of the last non-empty pass, after which the
    /// trailer follows. For images two or more rows high that is pass 7.
    pub fn at_last_row(&self) -> bool {
        !self.finished
            && self.sub_row + 1 == self.geometry.rows
            && (self.geometry.pass + 1..=7)
                .all(|p| PassGeometry::new(p, self.width, self.height).is_empty())
    }

    /// Moves to the next row. Returns `true` when that row opens a new pass,
    /// in which case the previous-row buffer must be reset.
    pub fn advance(&mut self) -> bool {
        if self.finished {
            return false;
        }
        self.sub_row += 1;
        if self.sub_row < self.geometry.rows {
            return false;
        }
        self.next_pass();
        !self.finished
    }

    fn next_pass(&mut self) {
        loop {
            if self.geometry.pass == 7 {
                self.finished = true;
                return;
            }
            self.geometry = PassGeometry::new(self.geometry.pass + 1, self.width, self.height);
            self.sub_row = 0;
            if !self.geometry.is_empty() {
                log::trace!(
                    "interlace pass {} ({}x{})",
                    self.geometry.pass,
                    self.geometry.cols,
                    self.geometry.rows
                );
                return;
            }
        }
    }
}

#[inline]
fn packed_value(row: &[u8], index: usize, bits: usize, mask: u8) -> u8 {
    let bit = index * bits;
    (row[bit / 8] >> (8 - bits - bit % 8)) & mask
}

#[inline]
fn put_packed_value(row: &mut [u8], index: usize, bits: usize, mask: u8, value: u8) {
    let bit = index * bits;
    let shift = 8 - bits - bit % 8;
    let byte = &mut row[bit / 8];
    *byte = (*byte & !(mask << shift)) | ((value & mask) << shift);
}

/// Writes the raw bytes of a pass sub-row into its slots of a full raw image row.
///
/// Works on unfiltered raw bytes. Sub-byte pixels are moved bit group by
/// bit group, leaving pixels of other passes untouched.
pub fn scatter_row(info: &ImageInfo, geometry: &PassGeometry, sub: &[u8], full: &mut [u8]) {
    let cols = geometry.cols as usize;
    if info.packed() {
        let bits = info.bits_per_pixel();
        let mask = ((1u16 << bits) - 1) as u8;
        for j in 0..cols {
            let value = packed_value(sub, j, bits, mask);
            put_packed_value(full, geometry.image_col(j as u32) as usize, bits, mask, value);
        }
    } else {
        let bpp = info.bytes_per_pixel();
        for (j, pixel) in sub.chunks_exact(bpp).take(cols).enumerate() {
            let x = geometry.image_col(j as u32) as usize * bpp;
            full[x..x + bpp].copy_from_slice(pixel);
        }
    }
}

/// Reads the pixels a pass samples from a full raw image row into a sub-row.
///
/// Unused low bits of the sub-row's last byte are left zero.
pub fn gather_row(info: &ImageInfo, geometry: &PassGeometry, full: &[u8], sub: &mut [u8]) {
    let cols = geometry.cols as usize;
    if info.packed() {
        let bits = info.bits_per_pixel();
        let mask = ((1u16 << bits) - 1) as u8;
        sub.fill(0);
        for j in 0..cols {
            let value = packed_value(full, geometry.image_col(j as u32) as usize, bits, mask);
            put_packed_value(sub, j, bits, mask, value);
        }
    } else {
        let bpp = info.bytes_per_pixel();
        for (j, pixel) in sub.chunks_exact_mut(bpp).take(cols).enumerate() {
            let x = geometry.image_col(j as u32) as usize * bpp;
            pixel.copy_from_slice(&full[x..x + bpp]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_sizes_8x8() {
        let sizes: Vec<(u32, u32)> = (1..=7)
            .map(|p| {
                let g = PassGeometry::new(p, 8, 8);
                (g.cols, g.rows)
            })
            .collect();
        assert_eq!(
            sizes,
            vec![(1, 1), (1, 1), (2, 1), (2, 2), (4, 2), (4, 4), (8, 4)]
        );
    }

    #[test]
    fn degenerate_images_have_empty_passes() {
        let one: Vec<bool> = (1..=7).map(|p| PassGeometry::new(p, 1, 1).is_empty()).collect();
        assert_eq!(one, vec![false, true, true, true, true, true, true]);

        let three: Vec<(u32, u32)> = (1..=7)
            .map(|p| {
                let g = PassGeometry::new(p, 3, 3);
                (g.cols, g.rows)
            })
            .collect();
        assert_eq!(
            three,
            vec![(1, 1), (0, 0), (1, 0), (1, 1), (2, 1), (1, 2), (3, 1)]
        );
    }

    #[test]
    fn every_pixel_visited_exactly_once() {
        for (w, h) in [(1, 1), (3, 3), (5, 2), (8, 8), (13, 7), (1, 17), (33, 1)] {
            let mut seen = vec![0u8; (w * h) as usize];
            let mut scheduler = InterlaceScheduler::new(w, h);
            while !scheduler.is_finished() {
                let g = *scheduler.geometry();
                let y = scheduler.image_row();
                for j in 0..g.cols {
                    seen[(y * w + g.image_col(j)) as usize] += 1;
                }
                scheduler.advance();
            }
            assert!(seen.iter().all(|&n| n == 1), "{w}x{h}");
        }
    }

    #[test]
    fn scheduler_reports_last_row_and_pass_starts() {
        let mut scheduler = InterlaceScheduler::new(1, 1);
        assert_eq!(scheduler.pass(), 1);
        assert!(scheduler.at_last_row());
        assert!(!scheduler.advance());
        assert!(scheduler.is_finished());

        let mut scheduler = InterlaceScheduler::new(4, 4);
        let mut starts = 0;
        let mut last_rows = 0;
        while !scheduler.is_finished() {
            if scheduler.at_last_row() {
                last_rows += 1;
                assert_eq!(scheduler.pass(), 7);
                assert_eq!(scheduler.image_row(), 3);
            }
            if scheduler.advance() {
                starts += 1;
            }
        }
        assert_eq!(last_rows, 1);
        // Passes 2 and 3 are empty at 4x4.
        assert_eq!(starts, 4);
    }

    #[test]
    fn scatter_gather_packed_roundtrip() {
        let info = ImageInfo::gray(11, 1, 2, false).unwrap();
        let full: Vec<u8> = vec![0b00_01_10_11, 0b11_10_01_00, 0b01_01_10_00];
        let mut rebuilt = vec![0u8; info.bytes_per_row()];
        for pass in [1u8, 2, 4, 6] {
            let g = PassGeometry::new(pass, 11, 1);
            if g.is_empty() {
                continue;
            }
            let sub_info = info.with_dimensions(g.cols, 1).unwrap();
            let mut sub = vec![0u8; sub_info.bytes_per_row()];
            gather_row(&info, &g, &full, &mut sub);
            scatter_row(&info, &g, &sub, &mut rebuilt);
        }
        // Row 0 is covered by passes 1, 2, 4 and 6.
        assert_eq!(rebuilt, full);
    }

    #[test]
    fn scatter_bytes_rgb() {
        let info = ImageInfo::rgb(8, 1, 8, false).unwrap();
        let g = PassGeometry::new(2, 8, 1);
        let mut full = vec![0u8; 24];
        scatter_row(&info, &g, &[1, 2, 3], &mut full);
        assert_eq!(&full[12..15], &[1, 2, 3]);
        assert!(full[..12].iter().all(|&b| b == 0));
    }
}
