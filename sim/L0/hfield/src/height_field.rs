//! Height field collision object: grid, bounding hierarchy and cached bound.
//!
//! A height field is a terrain described by a regular grid of altitude
//! samples over a flat base at `min_altitude`. It is centered on its local
//! origin with heights along `+Z`:
//!
//! ```text
//!    Z (up)
//!    │    ╱╲      ╱╲
//!    │ ╱╲╱  ╲╱╲╱╲╱  ╲
//!    │ │            │  heights
//!    │ │            │
//!    │ └────────────┘  min_altitude
//!    └──────────────────→ X
//!     -x_dim/2    +x_dim/2
//! ```
//!
//! Heights are changed in place with [`HeightField::update_heights`], which
//! validates the new samples first and then refits the whole hierarchy.
//! Cloning copies everything; a clone never shares state with its source.

use nalgebra::DMatrix;
use tracing::debug;

use crate::bounding_volume::{Aabb, BoundingVolume};
use crate::bvh::{BvNode, Bvh};
use crate::cell::{active_faces, build_cell_solids, ActiveFaces, ConvexPolyhedron};
use crate::error::HeightFieldResult;
use crate::grid::GridModel;
use crate::pose::Pose;
use crate::request::{CollisionRequest, CollisionResult};
use crate::shape::ConvexShape;
use crate::traversal;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Height field with a bounding volume hierarchy over its cells.
///
/// The bound type is chosen with the type parameter; [`Aabb`] is the
/// default and the only type certified for pruning cell geometry.
///
/// # Example
///
/// ```
/// use nalgebra::DMatrix;
/// use sim_hfield::HeightField;
///
/// let hf: HeightField = HeightField::new(1.0, 2.0, DMatrix::from_element(2, 2, 1.0), 0.0)?;
/// assert_eq!(hf.x_grid(), &[-0.5, 0.5]);
/// assert_eq!(hf.y_grid(), &[1.0, -1.0]);
/// # Ok::<(), sim_hfield::HeightFieldError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HeightField<BV = Aabb> {
    grid: GridModel,
    bvh: Bvh<BV>,
    /// Whole-object bound, as of the last build, update or recompute.
    local_aabb: Aabb,
}

impl<BV: BoundingVolume> HeightField<BV> {
    /// Create a height field from a `rows x cols` height matrix.
    ///
    /// Row 0 lies on the `+Y` edge and column 0 on the `-X` edge.
    ///
    /// # Errors
    ///
    /// Fails without building anything on an empty or single-row/column
    /// matrix, a non-positive extent, or samples that are non-finite or
    /// below `min_altitude`.
    pub fn new(
        x_dim: f64,
        y_dim: f64,
        heights: DMatrix<f64>,
        min_altitude: f64,
    ) -> HeightFieldResult<Self> {
        Ok(Self::from_grid(GridModel::new(
            x_dim,
            y_dim,
            heights,
            min_altitude,
        )?))
    }

    /// Create a height field by sampling `f(x, y)` at every grid point.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn from_fn<F>(
        x_dim: f64,
        y_dim: f64,
        rows: usize,
        cols: usize,
        min_altitude: f64,
        f: F,
    ) -> HeightFieldResult<Self>
    where
        F: Fn(f64, f64) -> f64,
    {
        let mut grid = GridModel::new(
            x_dim,
            y_dim,
            DMatrix::from_element(rows, cols, min_altitude),
            min_altitude,
        )?;
        let heights = DMatrix::from_fn(rows, cols, |r, c| f(grid.x_grid()[c], grid.y_grid()[r]));
        grid.set_heights(heights, min_altitude)?;
        Ok(Self::from_grid(grid))
    }

    /// Create a flat height field at a constant altitude.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn flat(
        x_dim: f64,
        y_dim: f64,
        rows: usize,
        cols: usize,
        height: f64,
        min_altitude: f64,
    ) -> HeightFieldResult<Self> {
        Self::new(
            x_dim,
            y_dim,
            DMatrix::from_element(rows, cols, height),
            min_altitude,
        )
    }

    fn from_grid(grid: GridModel) -> Self {
        let bvh = Bvh::build(&grid);
        let local_aabb = bvh.local_aabb();
        debug!(
            rows = grid.rows(),
            cols = grid.cols(),
            min_altitude = grid.min_altitude(),
            max_altitude = grid.max_altitude(),
            "created height field"
        );
        Self {
            grid,
            bvh,
            local_aabb,
        }
    }

    /// Replace the height samples, keeping the base altitude.
    ///
    /// # Errors
    ///
    /// See [`update_heights_with_base`](Self::update_heights_with_base).
    pub fn update_heights(&mut self, heights: DMatrix<f64>) -> HeightFieldResult<()> {
        let min_altitude = self.grid.min_altitude();
        self.update_heights_with_base(heights, min_altitude)
    }

    /// Replace the height samples and the base altitude, then refit every
    /// bound of the hierarchy.
    ///
    /// # Errors
    ///
    /// Returns [`HeightFieldError::DimensionMismatch`](crate::HeightFieldError::DimensionMismatch)
    /// if the matrix shape differs from the current grid, and the
    /// construction errors for invalid samples or base. On error the height
    /// field is left untouched.
    pub fn update_heights_with_base(
        &mut self,
        heights: DMatrix<f64>,
        min_altitude: f64,
    ) -> HeightFieldResult<()> {
        self.grid.set_heights(heights, min_altitude)?;
        self.bvh.refit(&self.grid);
        self.local_aabb = self.bvh.local_aabb();
        debug!(
            min_altitude,
            max_altitude = self.grid.max_altitude(),
            nodes = self.bvh.node_count(),
            "refitted height field"
        );
        Ok(())
    }

    /// Recompute the whole-object bound from the hierarchy root.
    pub fn compute_local_aabb(&mut self) -> Aabb {
        self.local_aabb = self.bvh.local_aabb();
        self.local_aabb
    }

    /// The two convex solids of a cell, or `None` out of range.
    #[must_use]
    pub fn cell_solids(&self, row: usize, col: usize) -> Option<[ConvexPolyhedron; 2]> {
        self.grid
            .cell(row, col)
            .map(|cell| build_cell_solids(&cell, self.grid.min_altitude()))
    }

    /// Exposed faces of the two solids of a cell, or `None` out of range.
    #[must_use]
    pub fn active_faces(&self, row: usize, col: usize) -> Option<[ActiveFaces; 2]> {
        active_faces(&self.grid, row, col)
    }

    /// Collide a convex shape with this height field. See [`traversal::collide`].
    ///
    /// # Errors
    ///
    /// Rejects an invalid request, shape or pose.
    pub fn collide(
        &self,
        hf_pose: &Pose,
        shape: &ConvexShape,
        shape_pose: &Pose,
        request: &CollisionRequest,
    ) -> HeightFieldResult<CollisionResult> {
        traversal::collide(self, hf_pose, shape, shape_pose, request)
    }
}

impl<BV> HeightField<BV> {
    /// Extent along X.
    #[must_use]
    pub fn x_dim(&self) -> f64 {
        self.grid.x_dim()
    }

    /// Extent along Y.
    #[must_use]
    pub fn y_dim(&self) -> f64 {
        self.grid.y_dim()
    }

    /// X coordinate of each column, west to east.
    #[must_use]
    pub fn x_grid(&self) -> &[f64] {
        self.grid.x_grid()
    }

    /// Y coordinate of each row, north to south.
    #[must_use]
    pub fn y_grid(&self) -> &[f64] {
        self.grid.y_grid()
    }

    /// Raw height matrix.
    #[must_use]
    pub fn heights(&self) -> &DMatrix<f64> {
        self.grid.heights()
    }

    /// Base altitude.
    #[must_use]
    pub fn min_altitude(&self) -> f64 {
        self.grid.min_altitude()
    }

    /// Highest sample.
    #[must_use]
    pub fn max_altitude(&self) -> f64 {
        self.grid.max_altitude()
    }

    /// The grid model.
    #[must_use]
    pub fn grid(&self) -> &GridModel {
        &self.grid
    }

    /// The bounding hierarchy.
    #[must_use]
    pub fn bvh(&self) -> &Bvh<BV> {
        &self.bvh
    }

    /// Node arena of the hierarchy, root first.
    #[must_use]
    pub fn nodes(&self) -> &[BvNode<BV>] {
        self.bvh.nodes()
    }

    /// Whole-object bound as of the last build, update or recompute.
    #[must_use]
    pub fn local_aabb(&self) -> Aabb {
        self.local_aabb
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::bounding_volume::Obb;
    use crate::error::HeightFieldError;
    use nalgebra::Point3;

    fn ramp() -> HeightField {
        HeightField::from_fn(4.0, 2.0, 5, 9, 0.0, |x, y| 1.0 + 0.25 * x + 0.1 * y).unwrap()
    }

    #[test]
    fn test_from_fn_samples_grid_points() {
        let hf = ramp();
        assert_eq!(hf.heights().shape(), (5, 9));
        // Row 0 is the +Y edge, column 0 the -X edge.
        assert_eq!(hf.heights()[(0, 0)], 1.0 - 0.5 + 0.1);
        assert_eq!(hf.heights()[(4, 8)], 1.0 + 0.5 - 0.1);
        assert_eq!(hf.nodes().len(), 2 * 4 * 8 - 1);
    }

    #[test]
    fn test_local_aabb() {
        let mut hf = ramp();
        let aabb = hf.compute_local_aabb();
        assert_eq!(aabb, hf.local_aabb());
        assert_eq!(aabb.min, Point3::new(-2.0, -1.0, 0.0));
        assert_eq!(aabb.max.z, hf.max_altitude());
    }

    #[test]
    fn test_update_rejects_and_preserves() {
        let mut hf = ramp();
        let before = hf.clone();

        let err = hf.update_heights(DMatrix::zeros(4, 9)).unwrap_err();
        assert!(matches!(err, HeightFieldError::DimensionMismatch { .. }));

        let err = hf.update_heights(DMatrix::from_element(5, 9, -0.5)).unwrap_err();
        assert!(matches!(err, HeightFieldError::BelowBaseAltitude { .. }));

        let mut nan = DMatrix::from_element(5, 9, 1.0);
        nan[(2, 3)] = f64::NAN;
        let err = hf.update_heights(nan).unwrap_err();
        assert!(matches!(err, HeightFieldError::NonFiniteHeight { row: 2, col: 3, .. }));

        assert_eq!(hf, before);
    }

    #[test]
    fn test_update_refits() {
        let mut hf = ramp();
        hf.update_heights_with_base(DMatrix::from_element(5, 9, 3.0), -2.0)
            .unwrap();
        assert_eq!(hf.local_aabb().min.z, -2.0);
        assert_eq!(hf.local_aabb().max.z, 3.0);
        assert_eq!(hf.nodes()[0].bv.max.z, 3.0);
        assert_eq!(hf.min_altitude(), -2.0);
    }

    #[test]
    fn test_clone_is_independent() {
        let original = ramp();
        let mut copy = original.clone();
        assert_eq!(copy, original);

        copy.update_heights(DMatrix::from_element(5, 9, 0.5)).unwrap();
        assert_ne!(copy, original);
        assert_eq!(original.heights()[(0, 0)], 1.0 - 0.5 + 0.1);
    }

    #[test]
    fn test_cell_solids_access() {
        let hf: HeightField<Obb> =
            HeightField::flat(1.0, 1.0, 3, 3, 2.0, 0.0).unwrap();
        let solids = hf.cell_solids(1, 1).unwrap();
        assert_eq!(solids[0].face_count(), 8);
        assert!(hf.cell_solids(2, 0).is_none());
    }
}
