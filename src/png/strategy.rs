//! Per-row filter selection for the writer.
//!
//! The selector either applies a fixed filter, rotates through all five, or
//! periodically tries every filter on a row and keeps the one with the best
//! score until the next trial.

use super::filter::{self, FilterType};
use crate::info::ImageInfo;

/// A-priori weights for None, Sub, Up, Average and Paeth. Scores are divided
/// by these before comparison.
pub const DEFAULT_PREFERENCE: [f64; 5] = [1.1, 1.1, 1.1, 1.1, 1.2];

/// Rows between trials for [`FilterStrategy::aggressive`].
const AGGRESSIVE_INTERVAL: u32 = 8;

/// Smoothing weight given to the running histogram after the first row.
const HISTOGRAM_SMOOTHING: f64 = 0.3;

/// PNG filter selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterStrategy {
    /// Always use no filter (fastest encoding).
    None,
    /// Always use Sub filter.
    Sub,
    /// Always use Up filter.
    Up,
    /// Always use Average filter.
    Average,
    /// Always use Paeth filter.
    Paeth,
    /// One filter picked from the image layout: None for tiny, indexed or
    /// packed images, Paeth otherwise.
    #[default]
    Default,
    /// Rotate None, Sub, Up, Average, Paeth row after row.
    Cyclic,
    /// Try every filter on every row.
    Adaptive,
    /// Try every filter every `interval` rows and reuse the winner in between.
    AdaptiveSampled {
        /// Rows between full trials (minimum 1).
        interval: u32,
    },
}

impl FilterStrategy {
    /// Trial every 8 rows.
    pub const fn aggressive() -> Self {
        FilterStrategy::AdaptiveSampled {
            interval: AGGRESSIVE_INTERVAL,
        }
    }

    /// Fixed strategy for a single filter type.
    pub const fn fixed(filter: FilterType) -> Self {
        match filter {
            FilterType::None => FilterStrategy::None,
            FilterType::Sub => FilterStrategy::Sub,
            FilterType::Up => FilterStrategy::Up,
            FilterType::Average => FilterStrategy::Average,
            FilterType::Paeth => FilterStrategy::Paeth,
        }
    }

    fn trial_interval(self) -> Option<u64> {
        match self {
            FilterStrategy::Adaptive => Some(1),
            FilterStrategy::AdaptiveSampled { interval } => Some(interval.max(1) as u64),
            _ => None,
        }
    }
}

/// How trial rows are scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterScore {
    /// Smoothed Shannon entropy of the filtered byte histogram.
    #[default]
    Entropy,
    /// Sum of filtered bytes read as signed magnitudes.
    SumAbs,
}

/// Stateful filter chooser owned by one writer.
#[derive(Debug, Clone)]
pub struct FilterSelector {
    strategy: FilterStrategy,
    score: FilterScore,
    interval: Option<u64>,
    current: FilterType,
    retest: bool,
    last_tested: Option<u64>,
    last_sums: [f64; 5],
    last_entropies: [f64; 5],
    preference: [f64; 5],
    histogram: Box<[f64; 256]>,
    cols: f64,
    counts: [u64; 5],
}

impl FilterSelector {
    /// Creates a selector for rows of `info`.
    pub fn new(info: &ImageInfo, strategy: FilterStrategy, score: FilterScore) -> Self {
        let current = match strategy {
            FilterStrategy::None | FilterStrategy::Cyclic => FilterType::None,
            FilterStrategy::Sub => FilterType::Sub,
            FilterStrategy::Up => FilterType::Up,
            FilterStrategy::Average => FilterType::Average,
            FilterStrategy::Paeth => FilterType::Paeth,
            FilterStrategy::Default
            | FilterStrategy::Adaptive
            | FilterStrategy::AdaptiveSampled { .. } => first_guess(info),
        };
        Self {
            strategy,
            score,
            interval: strategy.trial_interval(),
            current,
            retest: false,
            last_tested: None,
            last_sums: [0.0; 5],
            last_entropies: [0.0; 5],
            preference: DEFAULT_PREFERENCE,
            histogram: Box::new([0.0; 256]),
            cols: info.cols() as f64,
            counts: [0; 5],
        }
    }

    /// Replaces the per-filter preference weights.
    pub fn with_preference(mut self, preference: [f64; 5]) -> Self {
        self.preference = preference;
        self
    }

    /// Configured strategy.
    pub fn strategy(&self) -> FilterStrategy {
        self.strategy
    }

    /// How many rows each filter has been used for.
    pub fn filter_counts(&self) -> [u64; 5] {
        self.counts
    }

    /// Whether trials gather statistics at all.
    pub fn computes_statistics(&self) -> bool {
        self.interval.is_some()
    }

    fn should_test_all(&mut self, row: u64) -> bool {
        let Some(interval) = self.interval else {
            return false;
        };
        let due = match self.last_tested {
            None => true,
            Some(last) => last + interval <= row,
        };
        if due {
            self.retest = true;
            self.last_tested = Some(row);
        }
        due
    }

    /// Filters `row` into `out`, writing the chosen tag in `out[0]`.
    ///
    /// `row_index` counts rows handed to this selector, starting at 0; the
    /// first row always uses Sub when trials are enabled. `out` must be one
    /// byte longer than `row`.
    pub fn filter_row(
        &mut self,
        row_index: u64,
        row: &[u8],
        prev: &[u8],
        bpp: usize,
        out: &mut [u8],
    ) -> FilterType {
        let (tag, body) = out.split_at_mut(1);
        if self.should_test_all(row_index) {
            for candidate in FilterType::ALL {
                filter::filter_row(candidate, row, prev, bpp, body);
                self.record(row_index, candidate, body, true);
            }
        }

        let chosen = self.pick(row_index);
        filter::filter_row(chosen, row, prev, bpp, body);
        if self.computes_statistics() {
            self.record(row_index, chosen, body, false);
        }
        tag[0] = chosen.tag();
        self.counts[chosen as usize] += 1;
        chosen
    }

    fn pick(&mut self, row_index: u64) -> FilterType {
        if self.retest {
            self.retest = false;
            self.current = if row_index == 0 {
                FilterType::Sub
            } else {
                let scores = match self.score {
                    FilterScore::Entropy => &self.last_entropies,
                    FilterScore::SumAbs => &self.last_sums,
                };
                let mut best = FilterType::None;
                let mut best_val = f64::MAX;
                for filter in FilterType::ALL {
                    let val = scores[filter as usize] / self.preference[filter as usize];
                    if val < best_val {
                        best_val = val;
                        best = filter;
                    }
                }
                best
            };
        }

        let chosen = self.current;
        if self.strategy == FilterStrategy::Cyclic {
            self.current = FilterType::ALL[(chosen as usize + 1) % 5];
        }
        chosen
    }

    /// Stores the score of `filtered` for `filter`.
    ///
    /// Tentative results only compute the entropy; the final result of a row
    /// is folded into the running histogram.
    fn record(&mut self, row_index: u64, filter: FilterType, filtered: &[u8], tentative: bool) {
        let mut counts = [0u32; 256];
        let mut sum = 0u64;
        for &b in filtered {
            counts[b as usize] += 1;
            sum += (b as i8).unsigned_abs() as u64;
        }
        self.last_sums[filter as usize] = sum as f64;

        let alpha = if row_index == 0 { 0.0 } else { HISTOGRAM_SMOOTHING };
        let beta = 1.0 - alpha;
        let mut entropy = 0.0;
        for (slot, &count) in self.histogram.iter_mut().zip(counts.iter()) {
            let v = *slot * alpha + (count as f64 / self.cols) * beta;
            if tentative {
                if v > 1e-8 {
                    entropy += v * v.ln();
                }
            } else {
                *slot = v;
            }
        }
        if tentative {
            self.last_entropies[filter as usize] = -entropy;
        }
    }
}

/// Layout-based guess used before any statistics exist.
fn first_guess(info: &ImageInfo) -> FilterType {
    if (info.rows() < 8 && info.cols() < 8) || info.indexed() || info.bit_depth() < 8 {
        FilterType::None
    } else {
        FilterType::Paeth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb(cols: u32, rows: u32) -> ImageInfo {
        ImageInfo::rgb(cols, rows, 8, false).unwrap()
    }

    fn run(selector: &mut FilterSelector, rows: &[Vec<u8>], bpp: usize) -> Vec<FilterType> {
        let zero = vec![0u8; rows[0].len()];
        let mut out = vec![0u8; rows[0].len() + 1];
        let mut chosen = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            let prev = if i == 0 { &zero } else { &rows[i - 1] };
            let f = selector.filter_row(i as u64, row, prev, bpp, &mut out);
            assert_eq!(out[0], f.tag());
            chosen.push(f);
        }
        chosen
    }

    fn gradient_rows(cols: usize, rows: usize) -> Vec<Vec<u8>> {
        (0..rows)
            .map(|y| (0..cols * 3).map(|x| (x + y * 2) as u8).collect())
            .collect()
    }

    #[test]
    fn fixed_strategy_always_uses_its_filter() {
        let info = rgb(16, 4);
        let mut selector = FilterSelector::new(&info, FilterStrategy::Up, FilterScore::Entropy);
        let chosen = run(&mut selector, &gradient_rows(16, 4), 3);
        assert!(chosen.iter().all(|&f| f == FilterType::Up));
        assert_eq!(selector.filter_counts(), [0, 0, 4, 0, 0]);
        assert!(!selector.computes_statistics());
    }

    #[test]
    fn cyclic_rotates_in_row_order() {
        let info = rgb(4, 7);
        let mut selector = FilterSelector::new(&info, FilterStrategy::Cyclic, FilterScore::Entropy);
        let chosen = run(&mut selector, &gradient_rows(4, 7), 3);
        assert_eq!(
            chosen,
            vec![
                FilterType::None,
                FilterType::Sub,
                FilterType::Up,
                FilterType::Average,
                FilterType::Paeth,
                FilterType::None,
                FilterType::Sub,
            ]
        );
    }

    #[test]
    fn default_guess_depends_on_layout() {
        let small = rgb(4, 4);
        let sel = FilterSelector::new(&small, FilterStrategy::Default, FilterScore::Entropy);
        assert_eq!(sel.current, FilterType::None);

        let large = rgb(64, 64);
        let sel = FilterSelector::new(&large, FilterStrategy::Default, FilterScore::Entropy);
        assert_eq!(sel.current, FilterType::Paeth);

        let indexed = ImageInfo::palette(64, 64, 8).unwrap();
        let sel = FilterSelector::new(&indexed, FilterStrategy::Default, FilterScore::Entropy);
        assert_eq!(sel.current, FilterType::None);
    }

    #[test]
    fn adaptive_starts_with_sub_then_prefers_up_on_repeated_rows() {
        let info = rgb(32, 6);
        let noisy: Vec<u8> = (0..96u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8).collect();
        let rows = vec![noisy; 6];
        for score in [FilterScore::Entropy, FilterScore::SumAbs] {
            let mut selector = FilterSelector::new(&info, FilterStrategy::Adaptive, score);
            let chosen = run(&mut selector, &rows, 3);
            assert_eq!(chosen[0], FilterType::Sub);
            // Identical rows filter to all zeros under Up.
            assert!(chosen[1..].iter().all(|&f| f == FilterType::Up), "{score:?}: {chosen:?}");
        }
    }

    #[test]
    fn sampled_reuses_winner_between_trials() {
        let info = rgb(16, 12);
        let rows = gradient_rows(16, 12);
        let mut selector =
            FilterSelector::new(&info, FilterStrategy::AdaptiveSampled { interval: 4 }, FilterScore::Entropy);
        let chosen = run(&mut selector, &rows, 3);
        assert_eq!(chosen[0], FilterType::Sub);
        assert!(chosen[1..4].iter().all(|&f| f == FilterType::Sub));
        assert_eq!(chosen[5], chosen[4]);
        assert_eq!(chosen[7], chosen[4]);
        assert_eq!(chosen[9], chosen[8]);
    }

    #[test]
    fn ties_go_to_lowest_ordinal() {
        let info = rgb(8, 2);
        let mut selector = FilterSelector::new(&info, FilterStrategy::Adaptive, FilterScore::SumAbs)
            .with_preference([1.0; 5]);
        // All-zero rows score zero under every filter.
        let rows = vec![vec![0u8; 24]; 2];
        let chosen = run(&mut selector, &rows, 3);
        assert_eq!(chosen[1], FilterType::None);
    }
}
