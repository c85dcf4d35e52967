//! Error types for height field construction, update and queries.

use thiserror::Error;

/// Errors that can occur when building, updating or querying a height field.
///
/// Every error is reported synchronously before any state changes: a failed
/// construction returns no object, and a failed update leaves the height
/// field exactly as it was.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum HeightFieldError {
    /// The height matrix has no rows or no columns.
    #[error("height matrix is empty: {rows}x{cols}")]
    EmptyGrid {
        /// Number of rows.
        rows: usize,
        /// Number of columns.
        cols: usize,
    },

    /// The grid has a single row or column, so every cell has zero area.
    #[error("degenerate cell footprint: a {rows}x{cols} grid has no cell of positive area")]
    DegenerateFootprint {
        /// Number of rows.
        rows: usize,
        /// Number of columns.
        cols: usize,
    },

    /// Replacement heights do not match the existing grid dimensions.
    #[error("height matrix dimension mismatch: expected {expected_rows}x{expected_cols}, got {rows}x{cols}")]
    DimensionMismatch {
        /// Rows of the existing grid.
        expected_rows: usize,
        /// Columns of the existing grid.
        expected_cols: usize,
        /// Rows of the supplied matrix.
        rows: usize,
        /// Columns of the supplied matrix.
        cols: usize,
    },

    /// A height sample lies below the base altitude.
    #[error("height {value} at ({row}, {col}) is below the base altitude {min_altitude}")]
    BelowBaseAltitude {
        /// Row of the offending sample.
        row: usize,
        /// Column of the offending sample.
        col: usize,
        /// The offending height.
        value: f64,
        /// The base altitude.
        min_altitude: f64,
    },

    /// A height sample is NaN or infinite.
    #[error("non-finite height {value} at ({row}, {col})")]
    NonFiniteHeight {
        /// Row of the offending sample.
        row: usize,
        /// Column of the offending sample.
        col: usize,
        /// The offending height.
        value: f64,
    },

    /// The base altitude is NaN or infinite.
    #[error("non-finite base altitude: {0}")]
    NonFiniteAltitude(f64),

    /// The grid extent is not strictly positive and finite.
    #[error("invalid grid extent {x_dim} x {y_dim} (must be positive and finite)")]
    InvalidExtent {
        /// Extent along X.
        x_dim: f64,
        /// Extent along Y.
        y_dim: f64,
    },

    /// A placement contains NaN or infinite components.
    #[error("non-finite pose: {which}")]
    NonFinitePose {
        /// Which placement was rejected.
        which: &'static str,
    },

    /// The collision request is malformed.
    #[error("invalid collision request: {reason}")]
    InvalidRequest {
        /// Description of the problem.
        reason: String,
    },

    /// The query shape parameters are invalid.
    #[error("invalid query shape: {reason}")]
    InvalidShape {
        /// Description of the problem.
        reason: String,
    },
}

impl HeightFieldError {
    /// Returns true for configuration errors (bad dimensions, ordering or parameters).
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::EmptyGrid { .. }
                | Self::DimensionMismatch { .. }
                | Self::BelowBaseAltitude { .. }
                | Self::InvalidExtent { .. }
                | Self::InvalidRequest { .. }
                | Self::InvalidShape { .. }
        )
    }

    /// Returns true for numerical degeneracies (zero-area cells, NaN or Inf input).
    #[must_use]
    pub fn is_numerical(&self) -> bool {
        matches!(
            self,
            Self::DegenerateFootprint { .. }
                | Self::NonFiniteHeight { .. }
                | Self::NonFiniteAltitude(_)
                | Self::NonFinitePose { .. }
        )
    }
}

/// Result type for height field operations.
pub type HeightFieldResult<T> = std::result::Result<T, HeightFieldError>;
