//! Regular elevation grid: sample axes, height matrix and base altitude.
//!
//! # Layout
//!
//! The height matrix has `ny` rows and `nx` columns. Columns run west to
//! east along X, rows run north to south along Y (row 0 is the `+Y` edge):
//!
//! ```text
//!           x_grid[0]          x_grid[nx-1]
//!  y_grid[0]    NW ───────────── NE     (+y_dim/2)
//!               │                │
//!               │    heights     │
//!               │                │
//! y_grid[ny-1]  SW ───────────── SE     (-y_dim/2)
//!          (-x_dim/2)       (+x_dim/2)
//! ```
//!
//! Cell `(row, col)` is the quad between samples `row..=row+1` and
//! `col..=col+1`, so a grid of `ny x nx` samples has `(ny-1) x (nx-1)` cells.

use nalgebra::{DMatrix, Point3};

use crate::error::{HeightFieldError, HeightFieldResult};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Validated elevation grid.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GridModel {
    x_dim: f64,
    y_dim: f64,
    heights: DMatrix<f64>,
    min_altitude: f64,
    /// Cached maximum sample.
    max_altitude: f64,
    x_grid: Vec<f64>,
    y_grid: Vec<f64>,
}

/// Geometry of one grid cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellFootprint {
    /// Row of the cell (north edge sample row).
    pub row: usize,
    /// Column of the cell (west edge sample column).
    pub col: usize,
    /// X coordinate of the west edge.
    pub west: f64,
    /// X coordinate of the east edge.
    pub east: f64,
    /// Y coordinate of the north edge.
    pub north: f64,
    /// Y coordinate of the south edge.
    pub south: f64,
    /// Corner heights `[nw, ne, sw, se]`.
    pub heights: [f64; 4],
}

impl CellFootprint {
    /// North-west top corner.
    #[must_use]
    pub fn nw(&self) -> Point3<f64> {
        Point3::new(self.west, self.north, self.heights[0])
    }

    /// North-east top corner.
    #[must_use]
    pub fn ne(&self) -> Point3<f64> {
        Point3::new(self.east, self.north, self.heights[1])
    }

    /// South-west top corner.
    #[must_use]
    pub fn sw(&self) -> Point3<f64> {
        Point3::new(self.west, self.south, self.heights[2])
    }

    /// South-east top corner.
    #[must_use]
    pub fn se(&self) -> Point3<f64> {
        Point3::new(self.east, self.south, self.heights[3])
    }

    /// Highest corner.
    #[must_use]
    pub fn max_height(&self) -> f64 {
        self.heights.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }
}

/// `n` evenly spaced samples from `start` to `end`, both ends exact.
fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    #[allow(clippy::cast_precision_loss)]
    let step = (end - start) / (n - 1) as f64;
    #[allow(clippy::cast_precision_loss)]
    let mut samples: Vec<f64> = (0..n).map(|i| start + step * i as f64).collect();
    if let Some(last) = samples.last_mut() {
        *last = end;
    }
    samples
}

/// Check sample values; returns the maximum sample.
fn validate_heights(heights: &DMatrix<f64>, min_altitude: f64) -> HeightFieldResult<f64> {
    if !min_altitude.is_finite() {
        return Err(HeightFieldError::NonFiniteAltitude(min_altitude));
    }

    let mut max_altitude = f64::NEG_INFINITY;
    for row in 0..heights.nrows() {
        for col in 0..heights.ncols() {
            let value = heights[(row, col)];
            if !value.is_finite() {
                return Err(HeightFieldError::NonFiniteHeight { row, col, value });
            }
            if value < min_altitude {
                return Err(HeightFieldError::BelowBaseAltitude {
                    row,
                    col,
                    value,
                    min_altitude,
                });
            }
            max_altitude = max_altitude.max(value);
        }
    }
    Ok(max_altitude)
}

fn validate_shape(rows: usize, cols: usize) -> HeightFieldResult<()> {
    if rows == 0 || cols == 0 {
        return Err(HeightFieldError::EmptyGrid { rows, cols });
    }
    if rows < 2 || cols < 2 {
        return Err(HeightFieldError::DegenerateFootprint { rows, cols });
    }
    Ok(())
}

impl GridModel {
    /// Build a grid centered on the local origin.
    ///
    /// # Errors
    ///
    /// Fails without building anything if the matrix is empty or has a single
    /// row or column, the extent is not positive and finite, the base
    /// altitude is not finite, or a sample is non-finite or below the base.
    pub fn new(
        x_dim: f64,
        y_dim: f64,
        heights: DMatrix<f64>,
        min_altitude: f64,
    ) -> HeightFieldResult<Self> {
        validate_shape(heights.nrows(), heights.ncols())?;
        if !(x_dim.is_finite() && y_dim.is_finite() && x_dim > 0.0 && y_dim > 0.0) {
            return Err(HeightFieldError::InvalidExtent { x_dim, y_dim });
        }
        let max_altitude = validate_heights(&heights, min_altitude)?;

        let x_grid = linspace(-0.5 * x_dim, 0.5 * x_dim, heights.ncols());
        let y_grid = linspace(0.5 * y_dim, -0.5 * y_dim, heights.nrows());

        Ok(Self {
            x_dim,
            y_dim,
            heights,
            min_altitude,
            max_altitude,
            x_grid,
            y_grid,
        })
    }

    /// Replace samples and base altitude, keeping the dimensions.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`new`](Self::new), plus
    /// [`HeightFieldError::DimensionMismatch`]. The grid is unchanged on error.
    pub fn set_heights(
        &mut self,
        heights: DMatrix<f64>,
        min_altitude: f64,
    ) -> HeightFieldResult<()> {
        if heights.shape() != self.heights.shape() {
            return Err(HeightFieldError::DimensionMismatch {
                expected_rows: self.rows(),
                expected_cols: self.cols(),
                rows: heights.nrows(),
                cols: heights.ncols(),
            });
        }
        let max_altitude = validate_heights(&heights, min_altitude)?;

        self.heights = heights;
        self.min_altitude = min_altitude;
        self.max_altitude = max_altitude;
        Ok(())
    }

    /// Extent along X.
    #[must_use]
    pub fn x_dim(&self) -> f64 {
        self.x_dim
    }

    /// Extent along Y.
    #[must_use]
    pub fn y_dim(&self) -> f64 {
        self.y_dim
    }

    /// X coordinate of each column, west to east.
    #[must_use]
    pub fn x_grid(&self) -> &[f64] {
        &self.x_grid
    }

    /// Y coordinate of each row, north to south.
    #[must_use]
    pub fn y_grid(&self) -> &[f64] {
        &self.y_grid
    }

    /// Raw height matrix (`rows x cols`).
    #[must_use]
    pub fn heights(&self) -> &DMatrix<f64> {
        &self.heights
    }

    /// Base altitude: the flat bottom of every cell.
    #[must_use]
    pub fn min_altitude(&self) -> f64 {
        self.min_altitude
    }

    /// Highest sample.
    #[must_use]
    pub fn max_altitude(&self) -> f64 {
        self.max_altitude
    }

    /// Number of sample rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.heights.nrows()
    }

    /// Number of sample columns.
    #[must_use]
    pub fn cols(&self) -> usize {
        self.heights.ncols()
    }

    /// Number of cell rows.
    #[must_use]
    pub fn cell_rows(&self) -> usize {
        self.rows() - 1
    }

    /// Number of cell columns.
    #[must_use]
    pub fn cell_cols(&self) -> usize {
        self.cols() - 1
    }

    /// Total number of cells.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.cell_rows() * self.cell_cols()
    }

    /// Footprint and corner heights of a cell, or `None` out of range.
    #[must_use]
    pub fn cell(&self, row: usize, col: usize) -> Option<CellFootprint> {
        (row < self.cell_rows() && col < self.cell_cols()).then(|| self.footprint(row, col))
    }

    /// Highest corner of a cell, or `None` out of range.
    #[must_use]
    pub fn cell_max_height(&self, row: usize, col: usize) -> Option<f64> {
        self.cell(row, col).map(|c| c.max_height())
    }

    /// Cell lookup for indices known to be in range.
    pub(crate) fn footprint(&self, row: usize, col: usize) -> CellFootprint {
        let h = &self.heights;
        CellFootprint {
            row,
            col,
            west: self.x_grid[col],
            east: self.x_grid[col + 1],
            north: self.y_grid[row],
            south: self.y_grid[row + 1],
            heights: [
                h[(row, col)],
                h[(row, col + 1)],
                h[(row + 1, col)],
                h[(row + 1, col + 1)],
            ],
        }
    }
}
