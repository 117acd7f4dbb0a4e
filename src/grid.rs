//! Two-axis bin grid with lower-exclusive, upper-inclusive bins.

use serde::{Deserialize, Serialize};

use crate::error::GridError;

/// Immutable pair of boundary arrays.
///
/// Bin `(i, j)` covers `x ∈ (x[i], x[i+1]]` and `y ∈ (y[j], y[j+1]]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinGrid {
    x_bounds: Vec<f64>,
    y_bounds: Vec<f64>,
}

impl BinGrid {
    pub fn new(x_bounds: Vec<f64>, y_bounds: Vec<f64>) -> Result<Self, GridError> {
        validate("x", &x_bounds)?;
        validate("y", &y_bounds)?;
        Ok(Self { x_bounds, y_bounds })
    }

    pub fn x_bounds(&self) -> &[f64] {
        &self.x_bounds
    }

    pub fn y_bounds(&self) -> &[f64] {
        &self.y_bounds
    }

    pub fn nx(&self) -> usize {
        self.x_bounds.len() - 1
    }

    pub fn ny(&self) -> usize {
        self.y_bounds.len() - 1
    }

    /// `(nx, ny)`
    pub fn shape(&self) -> (usize, usize) {
        (self.nx(), self.ny())
    }

    /// Returns the bin holding `(x, y)`, or `None` when either coordinate
    /// falls outside the grid (NaN included).
    pub fn locate(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        Some((axis_index(&self.x_bounds, x)?, axis_index(&self.y_bounds, y)?))
    }
}

/// Index of the half-open interval `(edges[k], edges[k+1]]` containing `value`.
fn axis_index(edges: &[f64], value: f64) -> Option<usize> {
    // First edge that is >= value; comparisons with NaN are false so NaN lands on 0.
    let upper = edges.partition_point(|&e| e < value);
    if upper == 0 || upper == edges.len() {
        None
    } else {
        Some(upper - 1)
    }
}

fn validate(axis: &'static str, edges: &[f64]) -> Result<(), GridError> {
    if edges.len() < 2 {
        return Err(GridError::TooFewEdges { axis, len: edges.len() });
    }
    if let Some(index) = edges.iter().position(|e| !e.is_finite()) {
        return Err(GridError::NonFinite { axis, index });
    }
    if let Some(index) = edges.windows(2).position(|w| w[0] >= w[1]) {
        return Err(GridError::NotIncreasing { axis, index: index + 1 });
    }
    Ok(())
}

/// Evenly spaced edges on `[start, stop)`, the same values `numpy.arange`
/// produces. `arange(0.0, 24.1, 1.0)` yields `0, 1, ..., 24`.
pub fn arange(axis: &'static str, start: f64, stop: f64, step: f64) -> Result<Vec<f64>, GridError> {
    if !(step.is_finite() && step > 0.0) {
        return Err(GridError::InvalidRange {
            axis,
            reason: format!("step must be positive, got {step}"),
        });
    }
    if !(start.is_finite() && stop.is_finite()) || stop <= start {
        return Err(GridError::InvalidRange {
            axis,
            reason: format!("need start < stop, got {start}..{stop}"),
        });
    }
    let n = ((stop - start) / step).ceil() as usize;
    Ok((0..n).map(|i| start + i as f64 * step).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> BinGrid {
        BinGrid::new(vec![2.0, 5.0, 11.0], vec![0.0, 12.0, 24.0]).unwrap()
    }

    #[test]
    fn test_shape() {
        assert_eq!(grid().shape(), (2, 2));
    }

    #[test]
    fn test_interior_boundary_goes_to_lower_bin() {
        let g = grid();
        assert_eq!(g.locate(5.0, 12.0), Some((0, 0)));
        assert_eq!(g.locate(5.000001, 12.000001), Some((1, 1)));
    }

    #[test]
    fn test_outer_edges() {
        let g = grid();
        // lower outer edge is open
        assert_eq!(g.locate(2.0, 1.0), None);
        assert_eq!(g.locate(3.0, 0.0), None);
        // upper outer edge is closed
        assert_eq!(g.locate(11.0, 24.0), Some((1, 1)));
        assert_eq!(g.locate(11.5, 1.0), None);
        assert_eq!(g.locate(3.0, 24.5), None);
    }

    #[test]
    fn test_nan_is_unbinned() {
        assert_eq!(grid().locate(f64::NAN, 1.0), None);
        assert_eq!(grid().locate(3.0, f64::NAN), None);
    }

    #[test]
    fn test_every_interior_boundary_has_exactly_one_bin() {
        let edges: Vec<f64> = (0..=10).map(|v| v as f64).collect();
        let g = BinGrid::new(edges.clone(), edges.clone()).unwrap();
        for (k, &e) in edges.iter().enumerate().skip(1) {
            assert_eq!(g.locate(e, e), Some((k - 1, k - 1)));
        }
    }

    #[test]
    fn test_rejects_bad_bounds() {
        assert_eq!(
            BinGrid::new(vec![1.0], vec![0.0, 1.0]),
            Err(GridError::TooFewEdges { axis: "x", len: 1 })
        );
        assert_eq!(
            BinGrid::new(vec![0.0, 1.0], vec![0.0, 2.0, 2.0]),
            Err(GridError::NotIncreasing { axis: "y", index: 2 })
        );
        assert_eq!(
            BinGrid::new(vec![0.0, f64::INFINITY], vec![0.0, 1.0]),
            Err(GridError::NonFinite { axis: "x", index: 1 })
        );
    }

    #[test]
    fn test_arange_matches_default_bins() {
        let l = arange("x", 2.0, 11.0, 1.0).unwrap();
        assert_eq!(l, vec![2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);

        let mlt = arange("y", 0.0, 24.1, 1.0).unwrap();
        assert_eq!(mlt.len(), 25);
        assert_eq!(mlt[24], 24.0);
    }

    #[test]
    fn test_arange_rejects_zero_step() {
        assert!(arange("x", 0.0, 1.0, 0.0).is_err());
        assert!(arange("x", 1.0, 0.0, 1.0).is_err());
    }
}
