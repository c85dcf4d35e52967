//! Branch-and-bound collision traversal of a height field hierarchy.
//!
//! The query shape is placed in the height field frame once. Descending from
//! the root, each node bound is tested against the query bound under the
//! security margin:
//!
//! - disjoint: the subtree is pruned. The box separation is a certified lower
//!   bound of every cell separation below, so it feeds the running distance
//!   bound as `max(0, box_separation - margin)`. Under a negative margin only
//!   boxes that do not overlap at all are pruned, since a cell re-measured
//!   through an interior wall can be deeper than its box overlap;
//! - overlapping leaf: both cell solids go through the narrow phase. The
//!   closer one decides: it collides when `separation - margin` is at most the
//!   request threshold, otherwise it contributes `separation - margin` to the
//!   running distance bound.
//!
//! Walls shared with neighbouring cells are inside the terrain, so a
//! penetrating pair is re-measured against the planes bounding the terrain
//! around its solid (exposed faces, base and grid borders), keeping the
//! shallowest. Only a pair leaving through an exposed side wall keeps its
//! narrow phase answer. Each of these half-spaces contains the solid, so the
//! re-measured separation never exceeds the narrow phase one.
//!
//! Contacts are reported in the world frame. The traversal stops as soon as
//! `num_max_contacts` contacts are collected.
//!
//! Bound types whose overlap test is not certified against cell geometry
//! ([`BoundingVolume::CERTIFIED_FOR_HEIGHT_FIELD`]) are pruned with their
//! axis-aligned envelope only.

use tracing::trace;

use crate::bounding_volume::{Aabb, BoundingVolume};
use crate::cell::{
    active_faces, build_cell_solids, terrain_planes, ActiveFaces, ConvexPolyhedron, SupportPlane,
};
use crate::error::{HeightFieldError, HeightFieldResult};
use crate::height_field::HeightField;
use crate::narrow_phase::{query_convex_pair, PairQuery};
use crate::pose::Pose;
use crate::request::{CellSolid, CollisionRequest, CollisionResult, Contact};
use crate::shape::ConvexShape;

/// Per-query state. Nothing here is shared between queries.
struct Traversal<'a, BV> {
    hf: &'a HeightField<BV>,
    hf_pose: &'a Pose,
    shape: &'a ConvexShape,
    request: &'a CollisionRequest,
    /// Shape placement in the height field frame.
    relative: Pose,
    query_bv: BV,
    query_aabb: Aabb,
    terrain_planes: [SupportPlane; 5],
    /// Margin used for pruning, never below zero and widened by the
    /// collision threshold so no colliding leaf is ever pruned.
    prune_margin: f64,
    lower_bound: f64,
    result: CollisionResult,
}

impl<BV: BoundingVolume> Traversal<'_, BV> {
    /// Returns true when the contact cap stopped the traversal.
    fn visit(&mut self, node_idx: usize) -> bool {
        let hf = self.hf;
        let Some(node) = hf.bvh().node(node_idx) else {
            return false;
        };

        self.result.stats.bv_tests += 1;
        let envelope_separation = node.bv.envelope().signed_separation(&self.query_aabb);
        let disjoint = envelope_separation > self.prune_margin
            || (BV::CERTIFIED_FOR_HEIGHT_FIELD
                && !node.bv.overlaps(&self.query_bv, self.prune_margin));
        if disjoint {
            self.result.stats.pruned_nodes += 1;
            let contribution = self.request.margin_distance(envelope_separation).max(0.0);
            self.lower_bound = self.lower_bound.min(contribution);
            return false;
        }

        match node.cell() {
            Some((row, col)) => self.visit_leaf(row, col),
            None => match node.children() {
                Some((left, right)) => self.visit(left) || self.visit(right),
                None => false,
            },
        }
    }

    fn visit_leaf(&mut self, row: usize, col: usize) -> bool {
        self.result.stats.leaf_tests += 1;
        let hf = self.hf;
        let grid = hf.grid();
        let (Some(cell), Some(exposed)) = (grid.cell(row, col), active_faces(grid, row, col)) else {
            return false;
        };

        let mut closest: Option<(usize, PairQuery)> = None;
        for (solid_idx, (solid, active)) in build_cell_solids(&cell, grid.min_altitude())
            .iter()
            .zip(exposed)
            .enumerate()
        {
            self.result.stats.narrow_phase_calls += 1;
            let raw = query_convex_pair(solid, &Pose::identity(), self.shape, &self.relative);
            let query = self.through_exposed_face(solid, active, raw);
            if closest
                .as_ref()
                .map_or(true, |(_, best)| query.separation < best.separation)
            {
                closest = Some((solid_idx, query));
            }
        }
        let Some((solid, query)) = closest else {
            return false;
        };

        if !self.request.is_collision(query.separation) {
            self.lower_bound = self
                .lower_bound
                .min(self.request.margin_distance(query.separation));
            return false;
        }

        self.result.contacts.push(Contact {
            position: self.hf_pose.transform_point(&query.midpoint()),
            normal: self.hf_pose.transform_vector(&query.normal),
            penetration_depth: -query.separation,
            cell: Some(CellSolid { row, col, solid }),
        });

        if self.result.contacts.len() >= self.request.num_max_contacts {
            self.result.truncated = true;
            return true;
        }
        false
    }

    /// Re-measure a penetrating pair against the planes bounding the
    /// terrain around `solid`, unless it already leaves through an exposed
    /// side wall.
    fn through_exposed_face(
        &self,
        solid: &ConvexPolyhedron,
        active: ActiveFaces,
        query: PairQuery,
    ) -> PairQuery {
        if !query.is_penetrating()
            || solid
                .facing(&query.normal)
                .is_some_and(|face| active.is_exposed_wall(face))
        {
            return query;
        }

        active
            .exposed_planes(solid)
            .chain(self.terrain_planes.iter().copied())
            .map(|plane| {
                let (separation, deepest) = plane.separation(self.shape, &self.relative);
                (plane.normal, separation, deepest)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map_or(query, |(normal, separation, deepest)| PairQuery {
                separation,
                normal,
                witness_a: deepest - normal * separation,
                witness_b: deepest,
            })
    }
}

fn validate_inputs(
    shape: &ConvexShape,
    hf_pose: &Pose,
    shape_pose: &Pose,
    request: &CollisionRequest,
) -> HeightFieldResult<()> {
    request.validate()?;
    shape.validate()?;
    if !hf_pose.is_finite() {
        return Err(HeightFieldError::NonFinitePose {
            which: "height field",
        });
    }
    if !shape_pose.is_finite() {
        return Err(HeightFieldError::NonFinitePose {
            which: "query shape",
        });
    }
    Ok(())
}

/// Collide a convex shape with a height field.
///
/// `hf_pose` places the height field and `shape_pose` the shape, both in the
/// world frame. Contacts are reported in the world frame with normals
/// pointing from the height field toward the shape.
///
/// # Errors
///
/// Rejects an invalid request, invalid shape parameters, or non-finite poses
/// before any traversal.
///
/// # Example
///
/// ```
/// use nalgebra::DMatrix;
/// use sim_hfield::{collide, CollisionRequest, ConvexShape, HeightField, Pose};
///
/// let hf: HeightField = HeightField::new(1.0, 1.0, DMatrix::from_element(2, 2, 1.0), 0.0)?;
/// let ball = ConvexShape::sphere(1.0);
///
/// let result = collide(
///     &hf,
///     &Pose::identity(),
///     &ball,
///     &Pose::from_xyz(0.0, 0.0, 2.0),
///     &CollisionRequest::with_margin(-0.005),
/// )?;
/// assert!(!result.is_collision());
/// assert!((result.distance_lower_bound.unwrap_or_default() - 0.005).abs() < 1e-6);
/// # Ok::<(), sim_hfield::HeightFieldError>(())
/// ```
pub fn collide<BV: BoundingVolume>(
    hf: &HeightField<BV>,
    hf_pose: &Pose,
    shape: &ConvexShape,
    shape_pose: &Pose,
    request: &CollisionRequest,
) -> HeightFieldResult<CollisionResult> {
    validate_inputs(shape, hf_pose, shape_pose, request)?;

    let relative = hf_pose.relative(shape_pose);
    let mut traversal = Traversal {
        hf,
        hf_pose,
        shape,
        request,
        query_bv: BV::from_posed_box(&shape.local_aabb(), &relative),
        query_aabb: shape.aabb(&relative),
        terrain_planes: terrain_planes(hf.grid()),
        relative,
        prune_margin: request.security_margin.max(0.0) + request.collision_distance_threshold,
        lower_bound: f64::INFINITY,
        result: CollisionResult::default(),
    };
    traversal.visit(0);

    let mut result = traversal.result;
    if result.contacts.is_empty() && request.compute_distance_lower_bound {
        result.distance_lower_bound = Some(traversal.lower_bound);
    }

    trace!(
        contacts = result.contacts.len(),
        bv_tests = result.stats.bv_tests,
        pruned = result.stats.pruned_nodes,
        leaves = result.stats.leaf_tests,
        narrow_phase = result.stats.narrow_phase_calls,
        "height field query done"
    );
    Ok(result)
}

/// Run [`collide`] for many placements of the same shape.
///
/// With the `parallel` feature the queries run on the rayon thread pool;
/// otherwise they run sequentially. Results are identical and in input order.
///
/// # Errors
///
/// Returns the first error encountered, if any placement is invalid.
pub fn collide_batch<BV: BoundingVolume>(
    hf: &HeightField<BV>,
    hf_pose: &Pose,
    shape: &ConvexShape,
    shape_poses: &[Pose],
    request: &CollisionRequest,
) -> HeightFieldResult<Vec<CollisionResult>> {
    #[cfg(feature = "parallel")]
    {
        use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
        shape_poses
            .par_iter()
            .map(|pose| collide(hf, hf_pose, shape, pose, request))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        shape_poses
            .iter()
            .map(|pose| collide(hf, hf_pose, shape, pose, request))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::bounding_volume::Obb;
    use approx::assert_relative_eq;
    use nalgebra::{DMatrix, Point3, UnitQuaternion, Vector3};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn single_cell() -> HeightField {
        HeightField::new(1.0, 1.0, DMatrix::from_element(2, 2, 1.0), 0.0).unwrap()
    }

    fn wavy(rows: usize, cols: usize) -> HeightField {
        HeightField::from_fn(2.0, 2.0, rows, cols, -1.0, |x, y| {
            0.2 * (3.0 * x).sin() * (2.0 * y).cos()
        })
        .unwrap()
    }

    #[test]
    fn test_far_query_pruned_at_root() {
        let hf = wavy(20, 20);
        let result = collide(
            &hf,
            &Pose::identity(),
            &ConvexShape::sphere(0.5),
            &Pose::from_xyz(0.0, 0.0, 5.0),
            &CollisionRequest::default(),
        )
        .unwrap();
        assert!(!result.is_collision());
        assert_eq!(result.stats.bv_tests, 1);
        assert_eq!(result.stats.pruned_nodes, 1);
        assert_eq!(result.stats.narrow_phase_calls, 0);
        assert!(result.distance_lower_bound.unwrap() > 4.0);
    }

    #[test]
    fn test_contact_cap_truncates() {
        let hf = wavy(20, 20);
        let slab = ConvexShape::box_shape(Vector3::new(0.5, 0.5, 0.1));
        let pose = Pose::from_xyz(0.0, 0.0, 0.0);

        let one = collide(&hf, &Pose::identity(), &slab, &pose, &CollisionRequest::default()).unwrap();
        assert_eq!(one.num_contacts(), 1);
        assert!(one.is_truncated());
        assert!(one.distance_lower_bound.is_none());

        let many = collide(
            &hf,
            &Pose::identity(),
            &slab,
            &pose,
            &CollisionRequest::default().with_max_contacts(10_000),
        )
        .unwrap();
        assert!(many.num_contacts() > 1);
        assert!(!many.is_truncated());
        for c in &many.contacts {
            let cell = c.cell.unwrap();
            assert!(cell.solid < 2);
            assert_relative_eq!(c.normal.norm(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_contacts_in_world_frame() {
        let hf = single_cell();
        let hf_pose = Pose::from_position_rotation(
            Point3::new(10.0, 0.0, 0.0),
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI),
        );
        // The field is upside down: its top face now looks toward -Z, at z = -1.
        let ball_pose = Pose::from_xyz(10.0, 0.0, -1.9);
        let result = collide(
            &hf,
            &hf_pose,
            &ConvexShape::sphere(1.0),
            &ball_pose,
            &CollisionRequest::default(),
        )
        .unwrap();
        assert!(result.is_collision());
        let contact = result.contact(0).unwrap();
        assert_relative_eq!(contact.normal, -Vector3::z(), epsilon = 1e-9);
        assert_relative_eq!(contact.penetration_depth, 0.1, epsilon = 1e-9);
        assert_relative_eq!(contact.position, Point3::new(10.0, 0.0, -0.95), epsilon = 1e-9);
    }

    #[test]
    fn test_obb_matches_aabb() {
        let heights = DMatrix::from_fn(12, 9, |r, c| {
            #[allow(clippy::cast_precision_loss)]
            let v = (r as f64 * 0.4).sin() + (c as f64 * 0.9).cos();
            v + 2.0
        });
        let aabb_hf: HeightField = HeightField::new(3.0, 2.0, heights.clone(), 0.0).unwrap();
        let obb_hf: HeightField<Obb> = HeightField::new(3.0, 2.0, heights, 0.0).unwrap();
        let shape = ConvexShape::capsule(0.4, 0.2);

        for z in [2.0, 2.6, 3.2, 4.0] {
            let pose = Pose::from_position_rotation(
                Point3::new(0.3, -0.2, z),
                UnitQuaternion::from_euler_angles(0.5, 0.2, 0.0),
            );
            let request = CollisionRequest::with_margin(0.05);
            let a = collide(&aabb_hf, &Pose::identity(), &shape, &pose, &request).unwrap();
            let b = collide(&obb_hf, &Pose::identity(), &shape, &pose, &request).unwrap();
            assert_eq!(a.is_collision(), b.is_collision(), "z = {z}");
        }
    }

    #[test]
    fn test_contact_near_interior_wall_leaves_through_top() {
        let hf: HeightField = HeightField::flat(2.0, 2.0, 7, 7, 1.0, 0.0).unwrap();
        let ball = ConvexShape::sphere(0.3);
        // Center 0.05 under the top, 0.01 east of the wall between two cells.
        let pose = Pose::from_xyz(1.0 / 3.0 + 0.01, 0.1, 0.95);

        let all = collide(
            &hf,
            &Pose::identity(),
            &ball,
            &pose,
            &CollisionRequest::default().with_max_contacts(64),
        )
        .unwrap();
        assert!(all.num_contacts() > 1);
        for contact in &all.contacts {
            assert_relative_eq!(contact.normal, Vector3::z(), epsilon = 1e-6);
        }
        let deepest = all.deepest_contact().copied().unwrap();
        assert_relative_eq!(deepest.penetration_depth, 0.35, epsilon = 1e-6);

        assert!(collide(&hf, &Pose::identity(), &ball, &pose, &CollisionRequest::with_margin(-0.34))
            .unwrap()
            .is_collision());
        let eroded =
            collide(&hf, &Pose::identity(), &ball, &pose, &CollisionRequest::with_margin(-0.36)).unwrap();
        assert!(!eroded.is_collision());
        assert_relative_eq!(eroded.distance_lower_bound.unwrap(), 0.01, epsilon = 1e-6);
    }

    #[test]
    fn test_border_wall_keeps_side_normal() {
        let hf: HeightField = HeightField::flat(2.0, 2.0, 7, 7, 1.0, 0.0).unwrap();
        let ball = ConvexShape::sphere(0.3);
        // Center 0.5 under the top and 0.05 inside the east border.
        let pose = Pose::from_xyz(0.95, 0.1, 0.5);

        let all = collide(
            &hf,
            &Pose::identity(),
            &ball,
            &pose,
            &CollisionRequest::default().with_max_contacts(64),
        )
        .unwrap();
        let deepest = all.deepest_contact().copied().unwrap();
        assert_relative_eq!(deepest.penetration_depth, 0.35, epsilon = 1e-6);
        assert_relative_eq!(deepest.normal, Vector3::x(), epsilon = 1e-6);
        assert!(!collide(&hf, &Pose::identity(), &ball, &pose, &CollisionRequest::with_margin(-0.36))
            .unwrap()
            .is_collision());
    }

    /// Counts events whose message mentions uncertified bounds.
    struct UncertifiedNoticeCounter(Arc<AtomicUsize>);

    struct MessageVisitor(String);

    impl tracing::field::Visit for MessageVisitor {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{value:?}");
            }
        }
    }

    impl tracing::Subscriber for UncertifiedNoticeCounter {
        fn enabled(&self, _: &tracing::Metadata<'_>) -> bool {
            true
        }
        fn new_span(&self, _: &tracing::span::Attributes<'_>) -> tracing::span::Id {
            tracing::span::Id::from_u64(1)
        }
        fn record(&self, _: &tracing::span::Id, _: &tracing::span::Record<'_>) {}
        fn record_follows_from(&self, _: &tracing::span::Id, _: &tracing::span::Id) {}
        fn event(&self, event: &tracing::Event<'_>) {
            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            if visitor.0.contains("not certified") {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }
        fn enter(&self, _: &tracing::span::Id) {}
        fn exit(&self, _: &tracing::span::Id) {}
    }

    #[test]
    fn test_uncertified_notice_once_per_build() {
        let count = Arc::new(AtomicUsize::new(0));
        tracing::subscriber::with_default(UncertifiedNoticeCounter(Arc::clone(&count)), || {
            let aabb_hf: HeightField = HeightField::flat(2.0, 2.0, 8, 8, 1.0, 0.0).unwrap();
            let obb_hf: HeightField<Obb> = HeightField::flat(2.0, 2.0, 8, 8, 1.0, 0.0).unwrap();
            let ball = ConvexShape::sphere(0.2);
            let poses: Vec<Pose> = [-0.5, -0.2, 0.1, 0.4]
                .iter()
                .map(|&x| Pose::from_xyz(x, 0.0, 1.1))
                .collect();
            let request = CollisionRequest::with_margin(0.01);
            for pose in &poses {
                let a = collide(&aabb_hf, &Pose::identity(), &ball, pose, &request).unwrap();
                let b = collide(&obb_hf, &Pose::identity(), &ball, pose, &request).unwrap();
                assert_eq!(a.is_collision(), b.is_collision());
            }
        });
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_rejects_bad_input() {
        let hf = single_cell();
        let ball = ConvexShape::sphere(1.0);
        let err = collide(
            &hf,
            &Pose::from_xyz(f64::INFINITY, 0.0, 0.0),
            &ball,
            &Pose::identity(),
            &CollisionRequest::default(),
        )
        .unwrap_err();
        assert!(matches!(err, HeightFieldError::NonFinitePose { .. }));

        let err = collide(
            &hf,
            &Pose::identity(),
            &ball,
            &Pose::identity(),
            &CollisionRequest::default().with_max_contacts(0),
        )
        .unwrap_err();
        assert!(matches!(err, HeightFieldError::InvalidRequest { .. }));
    }

    #[test]
    fn test_batch_matches_single_queries() {
        let hf = wavy(16, 16);
        let ball = ConvexShape::sphere(0.3);
        #[allow(clippy::cast_precision_loss)]
        let poses: Vec<Pose> = (0..12)
            .map(|i| Pose::from_xyz(-0.9 + 0.15 * i as f64, 0.1, 0.35))
            .collect();
        let request = CollisionRequest::with_margin(0.01);

        let batch = collide_batch(&hf, &Pose::identity(), &ball, &poses, &request).unwrap();
        assert_eq!(batch.len(), poses.len());
        for (pose, result) in poses.iter().zip(&batch) {
            let single = collide(&hf, &Pose::identity(), &ball, pose, &request).unwrap();
            assert_eq!(&single, result);
        }
    }
}
