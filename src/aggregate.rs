//! Running per-bin mean over every sample folded in so far.
//!
//! The update is the batch form of an online mean:
//!
//! ```text
//! new_count = old_count + n
//! new_mean  = (old_count * old_mean + sum(values)) / new_count
//! ```
//!
//! Only cumulative sums and counts matter, so the result does not depend on
//! which bins are updated first or how samples are split across days.

use std::collections::HashMap;

use serde::Serialize;

use crate::align::Sample;
use crate::error::StateError;
use crate::grid::BinGrid;

/// Mean and sample count per bin, stored row-major with shape `(nx, ny)`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateState {
    nx: usize,
    ny: usize,
    mean: Vec<f64>,
    count: Vec<f64>,
}

/// What one [`AggregateState::fold`] call did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FoldSummary {
    pub binned: usize,
    pub unbinned: usize,
    /// Samples whose value was NaN or infinite.
    pub rejected: usize,
    pub bins_touched: usize,
}

/// Raw `(x_bounds, y_bounds, values)` triple, untransformed, for plotting.
#[derive(Debug, Clone, Copy)]
pub struct MapView<'a> {
    pub x_bounds: &'a [f64],
    pub y_bounds: &'a [f64],
    /// Row-major `(nx, ny)`.
    pub values: &'a [f64],
}

impl MapView<'_> {
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * (self.y_bounds.len() - 1) + j]
    }
}

impl AggregateState {
    /// Zeroed state for a `(nx, ny)` grid.
    pub fn zeros(nx: usize, ny: usize) -> Self {
        Self {
            nx,
            ny,
            mean: vec![0.0; nx * ny],
            count: vec![0.0; nx * ny],
        }
    }

    pub fn for_grid(grid: &BinGrid) -> Self {
        Self::zeros(grid.nx(), grid.ny())
    }

    /// Rebuilds a state from persisted row-major arrays, checking the
    /// `count == 0 => mean == 0` invariant and non-negative integral counts.
    pub fn from_parts(nx: usize, ny: usize, mean: Vec<f64>, count: Vec<f64>) -> Result<Self, StateError> {
        if mean.len() != nx * ny || count.len() != nx * ny {
            return Err(StateError::CellCount {
                expected: nx * ny,
                mean: mean.len(),
                count: count.len(),
            });
        }
        for (cell, (&m, &c)) in mean.iter().zip(&count).enumerate() {
            if !c.is_finite() || c < 0.0 || c.fract() != 0.0 {
                return Err(StateError::InvalidCount { cell, count: c });
            }
            if !m.is_finite() {
                return Err(StateError::NonFiniteMean { cell, mean: m });
            }
            if c == 0.0 && m != 0.0 {
                return Err(StateError::MeanWithoutSamples { cell, mean: m });
            }
        }
        Ok(Self { nx, ny, mean, count })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }

    pub fn mean_at(&self, i: usize, j: usize) -> f64 {
        self.mean[self.offset(i, j)]
    }

    pub fn count_at(&self, i: usize, j: usize) -> f64 {
        self.count[self.offset(i, j)]
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn count(&self) -> &[f64] {
        &self.count
    }

    /// Total number of samples folded into any bin.
    pub fn total_samples(&self) -> f64 {
        self.count.iter().sum()
    }

    pub fn mean_view<'a>(&'a self, grid: &'a BinGrid) -> MapView<'a> {
        MapView {
            x_bounds: grid.x_bounds(),
            y_bounds: grid.y_bounds(),
            values: &self.mean,
        }
    }

    pub fn count_view<'a>(&'a self, grid: &'a BinGrid) -> MapView<'a> {
        MapView {
            x_bounds: grid.x_bounds(),
            y_bounds: grid.y_bounds(),
            values: &self.count,
        }
    }

    /// Folds `values` into `bin`. Non-finite values are ignored, so a slice
    /// that is empty after filtering leaves the state unchanged.
    ///
    /// # Panics
    ///
    /// Panics if `bin` lies outside the `(nx, ny)` shape.
    pub fn update(&mut self, bin: (usize, usize), values: &[f64]) {
        let k = self.offset(bin.0, bin.1);
        let (n, sum) = values
            .iter()
            .filter(|v| v.is_finite())
            .fold((0usize, 0.0), |(n, sum), v| (n + 1, sum + v));
        if n == 0 {
            return;
        }
        let old_count = self.count[k];
        let new_count = old_count + n as f64;
        // old_count * old_mean is 0 for an empty bin, no branch needed
        self.mean[k] = (old_count * self.mean[k] + sum) / new_count;
        self.count[k] = new_count;
    }

    /// Groups `samples` by bin and calls [`update`](Self::update) once per
    /// non-empty bucket. Samples outside the grid and samples with a
    /// non-finite value are counted, not folded.
    pub fn fold(&mut self, grid: &BinGrid, samples: &[Sample]) -> FoldSummary {
        let mut buckets: HashMap<(usize, usize), Vec<f64>> = HashMap::new();
        let mut summary = FoldSummary::default();

        for s in samples {
            if !s.value.is_finite() {
                summary.rejected += 1;
                continue;
            }
            match grid.locate(s.x, s.y) {
                Some(bin) => {
                    buckets.entry(bin).or_default().push(s.value);
                    summary.binned += 1;
                }
                None => summary.unbinned += 1,
            }
        }

        summary.bins_touched = buckets.len();
        for (bin, values) in buckets {
            self.update(bin, &values);
        }
        summary
    }

    fn offset(&self, i: usize, j: usize) -> usize {
        assert!(i < self.nx && j < self.ny, "bin ({i}, {j}) outside {}x{}", self.nx, self.ny);
        i * self.ny + j
    }
}
