//! Bounding volumes used by the height field hierarchy.
//!
//! The hierarchy is generic over a [`BoundingVolume`] so the bound type is
//! chosen when the height field is constructed. Two bound types are provided:
//!
//! - [`Aabb`]: axis-aligned box, the reference bound for height fields.
//! - [`Obb`]: oriented box fitted by principal component analysis.
//!
//! # Margins
//!
//! Overlap tests take a signed margin. A positive margin dilates the test
//! (boxes closer than the margin count as overlapping); a negative margin
//! erodes it (boxes must interpenetrate by more than `|margin|`). Both
//! directions stay conservative for pruning: if two boxes are reported
//! disjoint at margin `m`, every pair of shapes they enclose is further than
//! `m` apart.
//!
//! # Certification
//!
//! The overlap test of a bound type against height field cell geometry is
//! only trusted when [`BoundingVolume::CERTIFIED_FOR_HEIGHT_FIELD`] is set.
//! [`Obb`] is not certified: the traversal prunes with its axis-aligned
//! [`envelope`](BoundingVolume::envelope) instead of its native test.

use nalgebra::{Matrix3, Point3, Rotation3, Vector3};
use std::fmt;

use crate::pose::Pose;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Absolute tolerance for point containment checks.
const CONTAINMENT_TOL: f64 = 1e-9;

/// Capability required from a bound type stored in the hierarchy.
pub trait BoundingVolume: Clone + fmt::Debug + PartialEq + Send + Sync {
    /// Human readable name, used in log output.
    const NAME: &'static str;

    /// Whether [`overlaps`](Self::overlaps) is trusted for pruning height
    /// field cells. When false the traversal falls back to
    /// [`envelope`](Self::envelope) overlap tests.
    const CERTIFIED_FOR_HEIGHT_FIELD: bool;

    /// Smallest bound of this type (as fitted by the implementation) that
    /// contains all points.
    fn from_points(points: &[Point3<f64>]) -> Self;

    /// Bound containing both `self` and `other`.
    #[must_use]
    fn merge(&self, other: &Self) -> Self;

    /// Point containment, with a small absolute tolerance.
    fn contains(&self, point: &Point3<f64>) -> bool;

    /// Overlap test under a signed margin.
    fn overlaps(&self, other: &Self, margin: f64) -> bool;

    /// Axis-aligned box containing this bound.
    fn envelope(&self) -> Aabb;

    /// Bound of a local box placed by `pose`.
    fn from_posed_box(local: &Aabb, pose: &Pose) -> Self;
}

// =============================================================================
// Aabb
// =============================================================================

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Aabb {
    /// Minimum corner of the bounding box.
    pub min: Point3<f64>,
    /// Maximum corner of the bounding box.
    pub max: Point3<f64>,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    /// Create a new AABB from minimum and maximum corners.
    #[must_use]
    pub const fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    /// An inverted box that contains nothing; the identity for [`merged`](Self::merged).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    /// Create an AABB centered at a point with the given half-extents.
    #[must_use]
    pub fn from_center(center: Point3<f64>, half_extents: Vector3<f64>) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Whether the box is inverted (contains nothing).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Grow the box to include a point.
    pub fn expand_point(&mut self, point: &Point3<f64>) {
        self.min = self.min.inf(point);
        self.max = self.max.sup(point);
    }

    /// Box containing both boxes.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        Self {
            min: self.min.inf(&other.min),
            max: self.max.sup(&other.max),
        }
    }

    /// Center point.
    #[must_use]
    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    /// Half of the extents along each axis.
    #[must_use]
    pub fn half_extents(&self) -> Vector3<f64> {
        (self.max - self.min) * 0.5
    }

    /// The eight corners, bottom face first.
    #[must_use]
    pub fn corners(&self) -> [Point3<f64>; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            Point3::new(lo.x, lo.y, lo.z),
            Point3::new(hi.x, lo.y, lo.z),
            Point3::new(hi.x, hi.y, lo.z),
            Point3::new(lo.x, hi.y, lo.z),
            Point3::new(lo.x, lo.y, hi.z),
            Point3::new(hi.x, lo.y, hi.z),
            Point3::new(hi.x, hi.y, hi.z),
            Point3::new(lo.x, hi.y, hi.z),
        ]
    }

    /// Point containment (inclusive, with a small tolerance).
    #[must_use]
    pub fn contains_point(&self, point: &Point3<f64>) -> bool {
        (0..3).all(|i| {
            point[i] >= self.min[i] - CONTAINMENT_TOL && point[i] <= self.max[i] + CONTAINMENT_TOL
        })
    }

    /// Signed separation between two boxes.
    ///
    /// Positive: Euclidean distance between disjoint boxes. Zero or negative:
    /// minus the smallest overlap depth along a coordinate axis, i.e. the
    /// shortest axis-aligned translation that separates them. Both cases are
    /// lower bounds of the signed separation of any shapes the boxes enclose.
    #[must_use]
    pub fn signed_separation(&self, other: &Self) -> f64 {
        let gaps = Vector3::from_fn(|i, _| {
            (other.min[i] - self.max[i]).max(self.min[i] - other.max[i])
        });
        if gaps.iter().all(|g| *g <= 0.0) {
            gaps.max()
        } else {
            gaps.map(|g| g.max(0.0)).norm()
        }
    }

    /// Overlap test under a signed margin.
    #[must_use]
    pub fn overlaps_with_margin(&self, other: &Self, margin: f64) -> bool {
        self.signed_separation(other) <= margin
    }

    /// Box of this box placed by `pose`.
    #[must_use]
    pub fn transformed(&self, pose: &Pose) -> Self {
        let rot = pose.rotation.to_rotation_matrix();
        let abs = rot.matrix().abs();
        let center = pose.transform_point(&self.center());
        Self::from_center(center, abs * self.half_extents())
    }
}

impl BoundingVolume for Aabb {
    const NAME: &'static str = "AABB";
    const CERTIFIED_FOR_HEIGHT_FIELD: bool = true;

    fn from_points(points: &[Point3<f64>]) -> Self {
        let mut aabb = Self::empty();
        for p in points {
            aabb.expand_point(p);
        }
        aabb
    }

    fn merge(&self, other: &Self) -> Self {
        self.merged(other)
    }

    fn contains(&self, point: &Point3<f64>) -> bool {
        self.contains_point(point)
    }

    fn overlaps(&self, other: &Self, margin: f64) -> bool {
        self.overlaps_with_margin(other, margin)
    }

    fn envelope(&self) -> Aabb {
        *self
    }

    fn from_posed_box(local: &Aabb, pose: &Pose) -> Self {
        local.transformed(pose)
    }
}

// =============================================================================
// Obb
// =============================================================================

/// Oriented bounding box fitted to its points by principal component analysis.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Obb {
    /// Center of the box.
    pub center: Point3<f64>,
    /// Half-extents along each local axis.
    pub half_extents: Vector3<f64>,
    /// Local axes of the box.
    pub rotation: Rotation3<f64>,
}

impl Default for Obb {
    fn default() -> Self {
        Self {
            center: Point3::origin(),
            half_extents: Vector3::zeros(),
            rotation: Rotation3::identity(),
        }
    }
}

impl Obb {
    /// The eight corners of the box.
    #[must_use]
    pub fn corners(&self) -> [Point3<f64>; 8] {
        let h = self.half_extents;
        let local = Aabb::from_center(Point3::origin(), h).corners();
        local.map(|c| self.center + self.rotation * c.coords)
    }

    /// Local axis `i` in parent coordinates.
    #[must_use]
    pub fn axis(&self, i: usize) -> Vector3<f64> {
        self.rotation.matrix().column(i).into_owned()
    }

    /// Projection radius of the box onto a unit axis.
    fn projected_radius(&self, axis: &Vector3<f64>) -> f64 {
        (0..3)
            .map(|i| self.half_extents[i] * self.axis(i).dot(axis).abs())
            .sum()
    }
}

fn principal_axes(points: &[Point3<f64>]) -> Rotation3<f64> {
    #[allow(clippy::cast_precision_loss)]
    let n = points.len() as f64;
    let centroid: Vector3<f64> = points.iter().map(|p| p.coords).sum::<Vector3<f64>>() / n;

    let mut cov = Matrix3::zeros();
    for p in points {
        let d = p.coords - centroid;
        cov += d * d.transpose();
    }
    cov /= n;

    let mut axes = cov.symmetric_eigen().eigenvectors;
    if !axes.iter().all(|x| x.is_finite()) {
        return Rotation3::identity();
    }
    // Keep a right-handed frame.
    if axes.determinant() < 0.0 {
        axes.set_column(2, &(-axes.column(2)));
    }
    Rotation3::from_matrix_unchecked(axes)
}

impl BoundingVolume for Obb {
    const NAME: &'static str = "OBB";
    const CERTIFIED_FOR_HEIGHT_FIELD: bool = false;

    fn from_points(points: &[Point3<f64>]) -> Self {
        if points.is_empty() {
            return Self::default();
        }
        let rotation = principal_axes(points);
        let inv = rotation.inverse();

        let mut local = Aabb::empty();
        for p in points {
            local.expand_point(&(inv * p));
        }

        Self {
            center: rotation * local.center(),
            half_extents: local.half_extents(),
            rotation,
        }
    }

    fn merge(&self, other: &Self) -> Self {
        let mut points = [Point3::origin(); 16];
        points[..8].copy_from_slice(&self.corners());
        points[8..].copy_from_slice(&other.corners());
        Self::from_points(&points)
    }

    fn contains(&self, point: &Point3<f64>) -> bool {
        let local = self.rotation.inverse() * (point - self.center);
        (0..3).all(|i| local[i].abs() <= self.half_extents[i] + CONTAINMENT_TOL)
    }

    fn overlaps(&self, other: &Self, margin: f64) -> bool {
        let t = other.center - self.center;
        let mut axes: Vec<Vector3<f64>> = Vec::with_capacity(15);
        for i in 0..3 {
            axes.push(self.axis(i));
            axes.push(other.axis(i));
        }
        for i in 0..3 {
            for j in 0..3 {
                let cross = self.axis(i).cross(&other.axis(j));
                let norm = cross.norm();
                if norm > 1e-9 {
                    axes.push(cross / norm);
                }
            }
        }

        axes.iter().all(|axis| {
            let gap = t.dot(axis).abs() - self.projected_radius(axis) - other.projected_radius(axis);
            gap <= margin
        })
    }

    fn envelope(&self) -> Aabb {
        let abs = self.rotation.matrix().abs();
        Aabb::from_center(self.center, abs * self.half_extents)
    }

    fn from_posed_box(local: &Aabb, pose: &Pose) -> Self {
        Self {
            center: pose.transform_point(&local.center()),
            half_extents: local.half_extents(),
            rotation: pose.rotation.to_rotation_matrix(),
        }
    }
}
