//! Convex query shapes tested against a height field.
//!
//! Every shape is described in its local frame and placed by a [`Pose`].
//! Rounded shapes (sphere, capsule) are represented for the narrow phase as
//! a core (point or segment) plus an inflation radius, which keeps tangency
//! exact instead of sampling a curved surface.

use nalgebra::{Point3, Vector3};

use crate::bounding_volume::Aabb;
use crate::error::{HeightFieldError, HeightFieldResult};
use crate::narrow_phase::SupportMap;
use crate::pose::Pose;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Directions shorter than this are treated as zero.
const DIRECTION_EPSILON: f64 = 1e-12;

/// Convex shape usable as a height field query.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConvexShape {
    /// Sphere centered at the local origin.
    Sphere {
        /// Sphere radius.
        radius: f64,
    },
    /// Box centered at the local origin.
    Box {
        /// Half-extents of the box along each local axis.
        half_extents: Vector3<f64>,
    },
    /// Capsule (cylinder with hemispherical caps) along the local Z-axis.
    Capsule {
        /// Half-length of the cylindrical portion along the Z-axis.
        half_length: f64,
        /// Radius of the capsule.
        radius: f64,
    },
    /// Cylinder (flat caps) along the local Z-axis.
    Cylinder {
        /// Half-length of the cylinder along the Z-axis.
        half_length: f64,
        /// Radius of the cylinder.
        radius: f64,
    },
    /// Ellipsoid (scaled sphere).
    Ellipsoid {
        /// Radii along each local axis (X, Y, Z).
        radii: Vector3<f64>,
    },
    /// Convex hull of a point cloud.
    ConvexMesh {
        /// Vertices in local coordinates. Interior points are allowed.
        vertices: Vec<Point3<f64>>,
    },
}

impl ConvexShape {
    /// Create a sphere.
    #[must_use]
    pub fn sphere(radius: f64) -> Self {
        Self::Sphere { radius }
    }

    /// Create a box from half-extents.
    #[must_use]
    pub fn box_shape(half_extents: Vector3<f64>) -> Self {
        Self::Box { half_extents }
    }

    /// Create a capsule along Z.
    #[must_use]
    pub fn capsule(half_length: f64, radius: f64) -> Self {
        Self::Capsule {
            half_length,
            radius,
        }
    }

    /// Create a cylinder along Z.
    #[must_use]
    pub fn cylinder(half_length: f64, radius: f64) -> Self {
        Self::Cylinder {
            half_length,
            radius,
        }
    }

    /// Create an ellipsoid.
    #[must_use]
    pub fn ellipsoid(radii: Vector3<f64>) -> Self {
        Self::Ellipsoid { radii }
    }

    /// Create a convex hull from vertices.
    #[must_use]
    pub fn convex_mesh(vertices: Vec<Point3<f64>>) -> Self {
        Self::ConvexMesh { vertices }
    }

    /// Check the shape parameters.
    ///
    /// # Errors
    ///
    /// Returns [`HeightFieldError::InvalidShape`] if a dimension is not
    /// strictly positive and finite, or a hull has no (finite) vertices.
    pub fn validate(&self) -> HeightFieldResult<()> {
        fn positive(name: &str, value: f64) -> HeightFieldResult<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(HeightFieldError::InvalidShape {
                    reason: format!("{name} must be positive and finite, got {value}"),
                })
            }
        }

        match self {
            Self::Sphere { radius } => positive("sphere radius", *radius),
            Self::Box { half_extents } => half_extents
                .iter()
                .try_for_each(|h| positive("box half-extent", *h)),
            Self::Capsule {
                half_length,
                radius,
            } => {
                // A zero-length capsule is a sphere.
                if !(half_length.is_finite() && *half_length >= 0.0) {
                    return Err(HeightFieldError::InvalidShape {
                        reason: format!(
                            "capsule half-length must be non-negative and finite, got {half_length}"
                        ),
                    });
                }
                positive("capsule radius", *radius)
            }
            Self::Cylinder {
                half_length,
                radius,
            } => {
                positive("cylinder half-length", *half_length)?;
                positive("cylinder radius", *radius)
            }
            Self::Ellipsoid { radii } => radii
                .iter()
                .try_for_each(|r| positive("ellipsoid radius", *r)),
            Self::ConvexMesh { vertices } => {
                if vertices.is_empty() {
                    return Err(HeightFieldError::InvalidShape {
                        reason: "convex mesh has no vertices".to_string(),
                    });
                }
                if let Some(idx) = vertices
                    .iter()
                    .position(|v| !v.coords.iter().all(|x| x.is_finite()))
                {
                    return Err(HeightFieldError::InvalidShape {
                        reason: format!("convex mesh vertex {idx} is not finite"),
                    });
                }
                Ok(())
            }
        }
    }

    /// Bounding box in the local frame.
    #[must_use]
    pub fn local_aabb(&self) -> Aabb {
        match self {
            Self::Sphere { radius } => {
                Aabb::from_center(Point3::origin(), Vector3::repeat(*radius))
            }
            Self::Box { half_extents } => Aabb::from_center(Point3::origin(), *half_extents),
            Self::Capsule {
                half_length,
                radius,
            } => Aabb::from_center(
                Point3::origin(),
                Vector3::new(*radius, *radius, half_length + radius),
            ),
            Self::Cylinder {
                half_length,
                radius,
            } => Aabb::from_center(
                Point3::origin(),
                Vector3::new(*radius, *radius, *half_length),
            ),
            Self::Ellipsoid { radii } => Aabb::from_center(Point3::origin(), *radii),
            Self::ConvexMesh { vertices } => {
                let mut aabb = Aabb::empty();
                for v in vertices {
                    aabb.expand_point(v);
                }
                aabb
            }
        }
    }

    /// Tight axis-aligned box of the shape placed by `pose`.
    ///
    /// Evaluated from the support mapping along the six parent axes, so it is
    /// exact for every shape (not the box of a rotated local box).
    #[must_use]
    pub fn aabb(&self, pose: &Pose) -> Aabb {
        let inflation = self.inflation();
        let mut min = Point3::origin();
        let mut max = Point3::origin();
        for i in 0..3 {
            let axis = Vector3::ith(i, 1.0);
            let hi = pose.transform_point(&self.local_support(&pose.inverse_transform_vector(&axis)));
            let lo =
                pose.transform_point(&self.local_support(&pose.inverse_transform_vector(&-axis)));
            max[i] = hi[i] + inflation;
            min[i] = lo[i] - inflation;
        }
        Aabb::new(min, max)
    }

    /// Maximum distance from the local origin to any point of the shape.
    #[must_use]
    pub fn bounding_radius(&self) -> f64 {
        match self {
            Self::Sphere { radius } => *radius,
            Self::Box { half_extents } => half_extents.norm(),
            Self::Capsule {
                half_length,
                radius,
            } => half_length + radius,
            Self::Cylinder {
                half_length,
                radius,
            } => half_length.hypot(*radius),
            Self::Ellipsoid { radii } => radii.max(),
            Self::ConvexMesh { vertices } => {
                vertices.iter().map(|v| v.coords.norm()).fold(0.0, f64::max)
            }
        }
    }
}

impl SupportMap for ConvexShape {
    fn local_support(&self, direction: &Vector3<f64>) -> Point3<f64> {
        match self {
            // Point core; the radius is carried by the inflation.
            Self::Sphere { .. } => Point3::origin(),
            Self::Box { half_extents } => Point3::new(
                if direction.x >= 0.0 { half_extents.x } else { -half_extents.x },
                if direction.y >= 0.0 { half_extents.y } else { -half_extents.y },
                if direction.z >= 0.0 { half_extents.z } else { -half_extents.z },
            ),
            // Segment core.
            Self::Capsule { half_length, .. } => {
                if direction.z >= 0.0 {
                    Point3::new(0.0, 0.0, *half_length)
                } else {
                    Point3::new(0.0, 0.0, -half_length)
                }
            }
            Self::Cylinder {
                half_length,
                radius,
            } => {
                let z = if direction.z >= 0.0 {
                    *half_length
                } else {
                    -half_length
                };
                let radial = Vector3::new(direction.x, direction.y, 0.0);
                let norm = radial.norm();
                if norm > DIRECTION_EPSILON {
                    let r = radial * (radius / norm);
                    Point3::new(r.x, r.y, z)
                } else {
                    Point3::new(*radius, 0.0, z)
                }
            }
            Self::Ellipsoid { radii } => {
                let scaled = direction.component_mul(radii);
                let norm = scaled.norm();
                if norm < DIRECTION_EPSILON {
                    return Point3::new(radii.x, 0.0, 0.0);
                }
                Point3::from(radii.component_mul(&scaled) / norm)
            }
            Self::ConvexMesh { vertices } => {
                let mut best = Point3::origin();
                let mut max_dot = f64::NEG_INFINITY;
                for v in vertices {
                    let dot = v.coords.dot(direction);
                    if dot > max_dot {
                        max_dot = dot;
                        best = *v;
                    }
                }
                best
            }
        }
    }

    fn inflation(&self) -> f64 {
        match self {
            Self::Sphere { radius } | Self::Capsule { radius, .. } => *radius,
            _ => 0.0,
        }
    }

    fn local_center(&self) -> Point3<f64> {
        match self {
            Self::ConvexMesh { vertices } if !vertices.is_empty() => {
                #[allow(clippy::cast_precision_loss)]
                let n = vertices.len() as f64;
                Point3::from(vertices.iter().map(|v| v.coords).sum::<Vector3<f64>>() / n)
            }
            _ => Point3::origin(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    #[test]
    fn test_validate() {
        assert!(ConvexShape::sphere(1.0).validate().is_ok());
        assert!(ConvexShape::sphere(0.0).validate().is_err());
        assert!(ConvexShape::sphere(f64::NAN).validate().is_err());
        assert!(ConvexShape::capsule(0.0, 0.5).validate().is_ok());
        assert!(ConvexShape::capsule(-1.0, 0.5).validate().is_err());
        assert!(ConvexShape::box_shape(Vector3::new(1.0, 0.0, 1.0))
            .validate()
            .is_err());
        assert!(ConvexShape::convex_mesh(vec![]).validate().is_err());
        assert!(
            ConvexShape::convex_mesh(vec![Point3::new(0.0, f64::INFINITY, 0.0)])
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_sphere_support_is_core_plus_inflation() {
        let s = ConvexShape::sphere(0.75);
        assert_eq!(s.local_support(&Vector3::x()), Point3::origin());
        assert_eq!(s.inflation(), 0.75);
    }

    #[test]
    fn test_box_support() {
        let b = ConvexShape::box_shape(Vector3::new(1.0, 2.0, 3.0));
        let p = b.local_support(&Vector3::new(1.0, -1.0, 0.5));
        assert_eq!(p, Point3::new(1.0, -2.0, 3.0));
        assert_eq!(b.inflation(), 0.0);
    }

    #[test]
    fn test_cylinder_and_ellipsoid_support() {
        let c = ConvexShape::cylinder(1.0, 0.5);
        let p = c.local_support(&Vector3::new(1.0, 0.0, 1.0));
        assert_relative_eq!(p, Point3::new(0.5, 0.0, 1.0));

        let e = ConvexShape::ellipsoid(Vector3::new(2.0, 1.0, 0.5));
        assert_relative_eq!(e.local_support(&Vector3::x()), Point3::new(2.0, 0.0, 0.0));
        assert_relative_eq!(
            e.local_support(&-Vector3::z()),
            Point3::new(0.0, 0.0, -0.5)
        );
    }

    #[test]
    fn test_world_aabb_rotated_capsule() {
        let capsule = ConvexShape::capsule(1.0, 0.25);
        // Lay the capsule along world X.
        let pose = Pose::from_position_rotation(
            Point3::new(0.0, 0.0, 2.0),
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), std::f64::consts::FRAC_PI_2),
        );
        let aabb = capsule.aabb(&pose);
        assert_relative_eq!(aabb.min, Point3::new(-1.25, -0.25, 1.75), epsilon = 1e-12);
        assert_relative_eq!(aabb.max, Point3::new(1.25, 0.25, 2.25), epsilon = 1e-12);
    }

    #[test]
    fn test_world_aabb_within_local_transformed() {
        let shape = ConvexShape::cylinder(0.5, 0.3);
        let pose = Pose::from_position_rotation(
            Point3::new(1.0, -1.0, 0.0),
            UnitQuaternion::from_euler_angles(0.3, 0.7, 0.1),
        );
        let tight = shape.aabb(&pose);
        let loose = shape.local_aabb().transformed(&pose);
        assert!(loose.contains_point(&tight.min));
        assert!(loose.contains_point(&tight.max));
    }

    #[test]
    fn test_bounding_radius() {
        assert_eq!(ConvexShape::sphere(2.0).bounding_radius(), 2.0);
        assert_eq!(ConvexShape::capsule(1.0, 0.5).bounding_radius(), 1.5);
        assert_relative_eq!(ConvexShape::cylinder(3.0, 4.0).bounding_radius(), 5.0);
    }
}
