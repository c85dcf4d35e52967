//! Narrow-phase signed separation between two convex shapes.
//!
//! # Algorithm Overview
//!
//! ## GJK distance
//!
//! GJK works on the Minkowski difference `A - B`. The shapes are disjoint
//! exactly when the difference does not contain the origin, and their
//! distance is the distance from the origin to the difference. Each iteration
//! adds the support point in the direction of the origin and reduces the
//! simplex to the sub-simplex holding the closest point (Ericson's closest
//! point on segment, triangle and tetrahedron). Barycentric weights of that
//! closest point give the witness points on both shapes.
//!
//! ## EPA
//!
//! When the simplex encloses the origin, EPA expands it toward the boundary
//! of the Minkowski difference until the face closest to the origin is found.
//! Its distance is the penetration depth and its normal the direction that
//! separates the shapes fastest.
//!
//! # Rounded shapes
//!
//! Shapes report a core through [`SupportMap::local_support`] and a radius
//! through [`SupportMap::inflation`]. GJK and EPA run on the cores only and
//! the radii are subtracted afterwards, so a sphere is handled as a point and
//! its tangency with a face is resolved exactly.
//!
//! # Sign convention
//!
//! [`PairQuery::separation`] is positive when the shapes are apart and
//! negative when they interpenetrate. [`PairQuery::normal`] points from A
//! toward B in both cases: translating B along it by `-separation` brings the
//! shapes into touching contact.
//!
//! # References
//!
//! - Gilbert, Johnson, Keerthi: "A Fast Procedure for Computing the Distance
//!   Between Complex Objects in Three-Dimensional Space" (1988)
//! - Ericson: "Real-Time Collision Detection" (2004), chapter 5
//! - van den Bergen: "Collision Detection in Interactive 3D Environments" (2003)

use nalgebra::{Point3, Vector3};

use crate::error::{HeightFieldError, HeightFieldResult};
use crate::pose::Pose;
use crate::request::{CollisionRequest, CollisionResult, Contact};
use crate::shape::ConvexShape;

/// Tolerance for degenerate directions and faces.
const EPSILON: f64 = 1e-12;

/// Maximum iterations for GJK before giving up.
const GJK_MAX_ITERATIONS: usize = 128;

/// Relative convergence tolerance of the GJK distance.
const GJK_RELATIVE_TOLERANCE: f64 = 1e-12;

/// Squared distance under which the cores are considered touching.
const GJK_TOUCH_TOLERANCE: f64 = 1e-20;

/// Maximum iterations for EPA before giving up.
const EPA_MAX_ITERATIONS: usize = 128;

/// Maximum faces in EPA polytope.
const EPA_MAX_FACES: usize = 512;

/// EPA convergence tolerance.
const EPA_TOLERANCE: f64 = 1e-9;

/// Support mapping of a convex shape in its local frame.
pub trait SupportMap {
    /// Point of the core furthest along `direction` (need not be normalized).
    fn local_support(&self, direction: &Vector3<f64>) -> Point3<f64>;

    /// Radius added around the core.
    fn inflation(&self) -> f64 {
        0.0
    }

    /// A point inside the core, used to seed the search.
    fn local_center(&self) -> Point3<f64> {
        Point3::origin()
    }
}

/// Signed separation between two convex shapes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairQuery {
    /// Surface distance, negative when the shapes interpenetrate.
    pub separation: f64,
    /// Unit direction from A toward B.
    pub normal: Vector3<f64>,
    /// Surface point of A closest to (or deepest inside) B.
    pub witness_a: Point3<f64>,
    /// Surface point of B closest to (or deepest inside) A.
    pub witness_b: Point3<f64>,
}

impl PairQuery {
    /// Whether the shapes interpenetrate.
    #[must_use]
    pub fn is_penetrating(&self) -> bool {
        self.separation < 0.0
    }

    /// Midpoint between the witnesses.
    #[must_use]
    pub fn midpoint(&self) -> Point3<f64> {
        nalgebra::center(&self.witness_a, &self.witness_b)
    }
}

/// A point in Minkowski space, with support points from both shapes.
#[derive(Debug, Clone, Copy, Default)]
struct MinkowskiPoint {
    /// `support_a - support_b`.
    point: Vector3<f64>,
    support_a: Point3<f64>,
    support_b: Point3<f64>,
}

impl MinkowskiPoint {
    fn new(support_a: Point3<f64>, support_b: Point3<f64>) -> Self {
        Self {
            point: support_a - support_b,
            support_a,
            support_b,
        }
    }
}

/// GJK simplex with the barycentric weights of its closest point.
#[derive(Debug, Clone, Copy, Default)]
struct Simplex {
    points: [MinkowskiPoint; 4],
    weights: [f64; 4],
    size: usize,
}

impl Simplex {
    fn single(point: MinkowskiPoint) -> Self {
        let mut simplex = Self::default();
        simplex.points[0] = point;
        simplex.weights[0] = 1.0;
        simplex.size = 1;
        simplex
    }

    fn weighted(entries: &[(MinkowskiPoint, f64)]) -> Self {
        let mut simplex = Self::default();
        for (i, (p, w)) in entries.iter().enumerate().take(4) {
            simplex.points[i] = *p;
            simplex.weights[i] = *w;
        }
        simplex.size = entries.len().min(4);
        simplex
    }

    fn points(&self) -> &[MinkowskiPoint] {
        &self.points[..self.size]
    }

    fn push(&mut self, point: MinkowskiPoint) {
        if self.size < 4 {
            self.points[self.size] = point;
            self.size += 1;
        }
    }

    fn contains(&self, point: &MinkowskiPoint) -> bool {
        self.points()
            .iter()
            .any(|p| (p.point - point.point).norm_squared() <= EPSILON * EPSILON)
    }

    /// Closest point of the simplex to the origin.
    fn closest(&self) -> Vector3<f64> {
        self.points()
            .iter()
            .zip(&self.weights)
            .map(|(p, w)| p.point * *w)
            .sum()
    }

    /// Witness points on A and B.
    fn witnesses(&self) -> (Point3<f64>, Point3<f64>) {
        let mut a = Vector3::zeros();
        let mut b = Vector3::zeros();
        for (p, w) in self.points().iter().zip(&self.weights) {
            a += p.support_a.coords * *w;
            b += p.support_b.coords * *w;
        }
        (Point3::from(a), Point3::from(b))
    }
}

/// Support point of a shape placed by `pose`, world frame.
fn world_support<S: SupportMap + ?Sized>(
    shape: &S,
    pose: &Pose,
    direction: &Vector3<f64>,
) -> Point3<f64> {
    pose.transform_point(&shape.local_support(&pose.inverse_transform_vector(direction)))
}

/// Support point of the Minkowski difference `A - B`.
fn support_minkowski<A: SupportMap + ?Sized, B: SupportMap + ?Sized>(
    shape_a: &A,
    pose_a: &Pose,
    shape_b: &B,
    pose_b: &Pose,
    direction: &Vector3<f64>,
) -> MinkowskiPoint {
    MinkowskiPoint::new(
        world_support(shape_a, pose_a, direction),
        world_support(shape_b, pose_b, &-direction),
    )
}

// =============================================================================
// Closest point on simplex
// =============================================================================

fn closest_on_segment(a: MinkowskiPoint, b: MinkowskiPoint) -> Simplex {
    let ab = b.point - a.point;
    let denom = ab.norm_squared();
    if denom <= f64::MIN_POSITIVE {
        return Simplex::single(a);
    }
    let t = -a.point.dot(&ab) / denom;
    if t <= 0.0 {
        Simplex::single(a)
    } else if t >= 1.0 {
        Simplex::single(b)
    } else {
        Simplex::weighted(&[(a, 1.0 - t), (b, t)])
    }
}

fn closest_on_triangle(a: MinkowskiPoint, b: MinkowskiPoint, c: MinkowskiPoint) -> Simplex {
    let ab = b.point - a.point;
    let ac = c.point - a.point;

    let ap = -a.point;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return Simplex::single(a);
    }

    let bp = -b.point;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return Simplex::single(b);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return Simplex::weighted(&[(a, 1.0 - v), (b, v)]);
    }

    let cp = -c.point;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return Simplex::single(c);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return Simplex::weighted(&[(a, 1.0 - w), (c, w)]);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return Simplex::weighted(&[(b, 1.0 - w), (c, w)]);
    }

    let sum = va + vb + vc;
    if !(sum.is_finite() && sum > f64::MIN_POSITIVE) {
        // Collinear vertices: the closest point lies on one of the edges.
        return [
            closest_on_segment(a, b),
            closest_on_segment(a, c),
            closest_on_segment(b, c),
        ]
        .into_iter()
        .min_by(|x, y| {
            x.closest()
                .norm_squared()
                .partial_cmp(&y.closest().norm_squared())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or_else(|| Simplex::single(a));
    }
    let v = vb / sum;
    let w = vc / sum;
    Simplex::weighted(&[(a, 1.0 - v - w), (b, v), (c, w)])
}

/// Whether the origin and `opposite` lie on different sides of plane `pqr`.
fn origin_outside_face(
    p: &Vector3<f64>,
    q: &Vector3<f64>,
    r: &Vector3<f64>,
    opposite: &Vector3<f64>,
) -> bool {
    let n = (q - p).cross(&(r - p));
    let sign_origin = (-p).dot(&n);
    let sign_opposite = (opposite - p).dot(&n);
    // A flat tetrahedron has no inside; every face must be checked.
    let degenerate = sign_opposite.abs() <= EPSILON * n.norm() * (opposite - p).norm();
    degenerate || sign_origin * sign_opposite < 0.0
}

/// Closest point of a tetrahedron, or `None` when it encloses the origin.
fn closest_on_tetrahedron(
    a: MinkowskiPoint,
    b: MinkowskiPoint,
    c: MinkowskiPoint,
    d: MinkowskiPoint,
) -> Option<Simplex> {
    let faces = [(a, b, c, d), (a, c, d, b), (a, d, b, c), (b, d, c, a)];

    let mut best: Option<(f64, Simplex)> = None;
    for (p, q, r, opposite) in faces {
        if !origin_outside_face(&p.point, &q.point, &r.point, &opposite.point) {
            continue;
        }
        let candidate = closest_on_triangle(p, q, r);
        let dist = candidate.closest().norm_squared();
        if best.as_ref().map_or(true, |(d, _)| dist < *d) {
            best = Some((dist, candidate));
        }
    }
    best.map(|(_, simplex)| simplex)
}

/// Reduce the simplex to the feature closest to the origin.
fn solve_simplex(simplex: &Simplex) -> Option<Simplex> {
    let p = simplex.points;
    match simplex.size {
        1 => Some(Simplex::single(p[0])),
        2 => Some(closest_on_segment(p[0], p[1])),
        3 => Some(closest_on_triangle(p[0], p[1], p[2])),
        _ => closest_on_tetrahedron(p[0], p[1], p[2], p[3]),
    }
}

// =============================================================================
// GJK Algorithm
// =============================================================================

/// Final state of a GJK run.
struct GjkOutcome {
    simplex: Simplex,
    /// The cores touch or overlap.
    overlapping: bool,
}

fn gjk<A: SupportMap + ?Sized, B: SupportMap + ?Sized>(
    shape_a: &A,
    pose_a: &Pose,
    shape_b: &B,
    pose_b: &Pose,
) -> GjkOutcome {
    let center_a = pose_a.transform_point(&shape_a.local_center());
    let center_b = pose_b.transform_point(&shape_b.local_center());
    let mut direction = center_b - center_a;
    if direction.norm_squared() < EPSILON * EPSILON {
        direction = Vector3::x();
    }

    let mut simplex = Simplex::single(support_minkowski(
        shape_a, pose_a, shape_b, pose_b, &direction,
    ));
    let mut v = simplex.closest();

    for _ in 0..GJK_MAX_ITERATIONS {
        let vv = v.norm_squared();
        if vv <= GJK_TOUCH_TOLERANCE {
            return GjkOutcome {
                simplex,
                overlapping: true,
            };
        }

        let w = support_minkowski(shape_a, pose_a, shape_b, pose_b, &-v);

        // No support point is closer than the current estimate.
        if vv - v.dot(&w.point) <= GJK_RELATIVE_TOLERANCE * vv || simplex.contains(&w) {
            break;
        }

        let mut candidate = simplex;
        candidate.push(w);
        let Some(reduced) = solve_simplex(&candidate) else {
            return GjkOutcome {
                simplex: candidate,
                overlapping: true,
            };
        };

        let next = reduced.closest();
        if next.norm_squared() >= vv {
            break;
        }
        simplex = reduced;
        v = next;
    }

    GjkOutcome {
        simplex,
        overlapping: false,
    }
}

// =============================================================================
// EPA Algorithm
// =============================================================================

/// A face in the EPA polytope.
#[derive(Debug, Clone)]
struct EpaFace {
    vertices: [usize; 3],
    /// Outward-facing normal of the face.
    normal: Vector3<f64>,
    /// Distance from origin to the face (along normal).
    distance: f64,
}

/// Penetration found by EPA on the cores.
struct EpaOutcome {
    depth: f64,
    normal: Vector3<f64>,
    witness_a: Point3<f64>,
    witness_b: Point3<f64>,
}

/// Create a face oriented away from `interior`.
fn create_face(
    vertices: &[MinkowskiPoint],
    indices: [usize; 3],
    interior: &Vector3<f64>,
) -> Option<EpaFace> {
    let a = vertices[indices[0]].point;
    let b = vertices[indices[1]].point;
    let c = vertices[indices[2]].point;

    let normal = (b - a).cross(&(c - a));
    let norm = normal.norm();
    if norm < EPSILON {
        return None;
    }
    let mut normal = normal / norm;
    let mut indices = indices;
    if normal.dot(&(interior - a)) > 0.0 {
        normal = -normal;
        indices.swap(1, 2);
    }

    Some(EpaFace {
        vertices: indices,
        normal,
        distance: a.dot(&normal),
    })
}

/// Find the face closest to the origin.
fn find_closest_face(faces: &[EpaFace]) -> Option<usize> {
    faces
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            a.distance
                .abs()
                .partial_cmp(&b.distance.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
}

/// Add an edge to the horizon, removing it if it already exists (shared edge).
fn add_edge(edges: &mut Vec<(usize, usize)>, v1: usize, v2: usize) {
    let existing = edges
        .iter()
        .position(|&(a, b)| (a == v2 && b == v1) || (a == v1 && b == v2));

    if let Some(idx) = existing {
        edges.swap_remove(idx);
    } else {
        edges.push((v1, v2));
    }
}

/// Whether `candidate` raises the affine dimension of `vertices`.
fn is_independent(vertices: &[MinkowskiPoint], candidate: &Vector3<f64>) -> bool {
    let Some(first) = vertices.first() else {
        return true;
    };
    let d0 = candidate - first.point;
    match vertices.len() {
        1 => d0.norm() > EPSILON,
        2 => {
            let e1 = vertices[1].point - first.point;
            e1.cross(&d0).norm() > EPSILON * e1.norm().max(1.0)
        }
        3 => {
            let e1 = vertices[1].point - first.point;
            let e2 = vertices[2].point - first.point;
            let n = e1.cross(&e2);
            n.dot(&d0).abs() > EPSILON * n.norm().max(1.0)
        }
        _ => false,
    }
}

/// Grow a GJK simplex into a full-dimensional tetrahedron.
fn expand_to_tetrahedron<A: SupportMap + ?Sized, B: SupportMap + ?Sized>(
    shape_a: &A,
    pose_a: &Pose,
    shape_b: &B,
    pose_b: &Pose,
    vertices: &mut Vec<MinkowskiPoint>,
) -> bool {
    let mut directions = vec![
        Vector3::x(),
        Vector3::y(),
        Vector3::z(),
        -Vector3::x(),
        -Vector3::y(),
        -Vector3::z(),
    ];
    if vertices.len() == 3 {
        let n = (vertices[1].point - vertices[0].point)
            .cross(&(vertices[2].point - vertices[0].point));
        if let Some(n) = n.try_normalize(EPSILON) {
            directions.insert(0, -n);
            directions.insert(0, n);
        }
    }

    for dir in &directions {
        if vertices.len() >= 4 {
            break;
        }
        let candidate = support_minkowski(shape_a, pose_a, shape_b, pose_b, dir);
        if is_independent(vertices, &candidate.point) {
            vertices.push(candidate);
        }
    }
    vertices.len() >= 4
}

/// Barycentric coordinates of `p` in triangle `abc`.
fn barycentric(
    p: &Vector3<f64>,
    a: &Vector3<f64>,
    b: &Vector3<f64>,
    c: &Vector3<f64>,
) -> [f64; 3] {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let d00 = v0.dot(&v0);
    let d01 = v0.dot(&v1);
    let d11 = v1.dot(&v1);
    let d20 = v2.dot(&v0);
    let d21 = v2.dot(&v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() <= f64::MIN_POSITIVE {
        return [1.0 / 3.0; 3];
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    [1.0 - v - w, v, w]
}

fn epa<A: SupportMap + ?Sized, B: SupportMap + ?Sized>(
    shape_a: &A,
    pose_a: &Pose,
    shape_b: &B,
    pose_b: &Pose,
    simplex: &Simplex,
) -> Option<EpaOutcome> {
    let mut vertices: Vec<MinkowskiPoint> = Vec::with_capacity(EPA_MAX_ITERATIONS + 4);
    for p in simplex.points() {
        if is_independent(&vertices, &p.point) {
            vertices.push(*p);
        }
    }
    if !expand_to_tetrahedron(shape_a, pose_a, shape_b, pose_b, &mut vertices) {
        return None;
    }

    let interior: Vector3<f64> = vertices.iter().map(|v| v.point).sum::<Vector3<f64>>() / 4.0;
    let mut faces: Vec<EpaFace> = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]]
        .into_iter()
        .filter_map(|indices| create_face(&vertices, indices, &interior))
        .collect();

    for _ in 0..EPA_MAX_ITERATIONS {
        let closest = &faces[find_closest_face(&faces)?];
        let new_point = support_minkowski(shape_a, pose_a, shape_b, pose_b, &closest.normal);

        let new_distance = new_point.point.dot(&closest.normal);
        if new_distance - closest.distance < EPA_TOLERANCE
            || vertices
                .iter()
                .any(|v| (v.point - new_point.point).norm_squared() <= EPSILON * EPSILON)
        {
            break;
        }

        let new_index = vertices.len();
        vertices.push(new_point);

        // Remove faces that can see the new point; their outline is the horizon.
        let mut edges: Vec<(usize, usize)> = Vec::new();
        let mut i = 0;
        while i < faces.len() {
            let face = &faces[i];
            let to_new = new_point.point - vertices[face.vertices[0]].point;
            if face.normal.dot(&to_new) > 0.0 {
                let v = face.vertices;
                add_edge(&mut edges, v[0], v[1]);
                add_edge(&mut edges, v[1], v[2]);
                add_edge(&mut edges, v[2], v[0]);
                faces.swap_remove(i);
            } else {
                i += 1;
            }
        }

        for (v1, v2) in edges {
            if let Some(face) = create_face(&vertices, [new_index, v1, v2], &interior) {
                faces.push(face);
            }
        }

        if faces.is_empty() || faces.len() > EPA_MAX_FACES {
            break;
        }
    }

    let closest = &faces[find_closest_face(&faces)?];
    let [i, j, k] = closest.vertices;
    let projected = closest.normal * closest.distance;
    let lambda = barycentric(
        &projected,
        &vertices[i].point,
        &vertices[j].point,
        &vertices[k].point,
    );
    let weighted = |f: fn(&MinkowskiPoint) -> Vector3<f64>| {
        f(&vertices[i]) * lambda[0] + f(&vertices[j]) * lambda[1] + f(&vertices[k]) * lambda[2]
    };

    Some(EpaOutcome {
        depth: closest.distance.max(0.0),
        normal: closest.normal,
        witness_a: Point3::from(weighted(|m| m.support_a.coords)),
        witness_b: Point3::from(weighted(|m| m.support_b.coords)),
    })
}

// =============================================================================
// High-Level API
// =============================================================================

/// Signed separation, normal and witness points of two convex shapes.
///
/// The separation is computed once, without any margin; margin tests compare
/// against it, which makes them monotone in the margin.
#[must_use]
pub fn query_convex_pair<A: SupportMap + ?Sized, B: SupportMap + ?Sized>(
    shape_a: &A,
    pose_a: &Pose,
    shape_b: &B,
    pose_b: &Pose,
) -> PairQuery {
    let inflation_a = shape_a.inflation();
    let inflation_b = shape_b.inflation();
    let center_a = pose_a.transform_point(&shape_a.local_center());
    let center_b = pose_b.transform_point(&shape_b.local_center());
    let fallback_normal = (center_b - center_a)
        .try_normalize(EPSILON)
        .unwrap_or_else(Vector3::z);

    let outcome = gjk(shape_a, pose_a, shape_b, pose_b);

    let (core_separation, normal, core_a, core_b) = if outcome.overlapping {
        match epa(shape_a, pose_a, shape_b, pose_b, &outcome.simplex) {
            Some(epa) => (-epa.depth, epa.normal, epa.witness_a, epa.witness_b),
            None => {
                let (a, b) = outcome.simplex.witnesses();
                (0.0, fallback_normal, a, b)
            }
        }
    } else {
        let v = outcome.simplex.closest();
        let distance = v.norm();
        let normal = (-v).try_normalize(EPSILON).unwrap_or(fallback_normal);
        let (a, b) = outcome.simplex.witnesses();
        (distance, normal, a, b)
    };

    PairQuery {
        separation: core_separation - inflation_a - inflation_b,
        normal,
        witness_a: core_a + normal * inflation_a,
        witness_b: core_b - normal * inflation_b,
    }
}

/// Collision test between two plain convex shapes with the margin semantics
/// of a height field query.
///
/// Reports at most one contact, whose normal points from `shape_a` toward
/// `shape_b`.
///
/// # Errors
///
/// Returns an error for an invalid request, invalid shape parameters, or a
/// non-finite pose.
pub fn collide_shapes(
    shape_a: &ConvexShape,
    pose_a: &Pose,
    shape_b: &ConvexShape,
    pose_b: &Pose,
    request: &CollisionRequest,
) -> HeightFieldResult<CollisionResult> {
    request.validate()?;
    shape_a.validate()?;
    shape_b.validate()?;
    if !pose_a.is_finite() {
        return Err(HeightFieldError::NonFinitePose { which: "shape A" });
    }
    if !pose_b.is_finite() {
        return Err(HeightFieldError::NonFinitePose { which: "shape B" });
    }

    let query = query_convex_pair(shape_a, pose_a, shape_b, pose_b);
    let mut result = CollisionResult::default();
    result.stats.narrow_phase_calls = 1;

    if request.is_collision(query.separation) {
        result.contacts.push(Contact {
            position: query.midpoint(),
            normal: query.normal,
            penetration_depth: -query.separation,
            cell: None,
        });
    } else if request.compute_distance_lower_bound {
        result.distance_lower_bound = Some(request.margin_distance(query.separation));
    }
    Ok(result)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::UnitQuaternion;

    fn pose_at(x: f64, y: f64, z: f64) -> Pose {
        Pose::from_xyz(x, y, z)
    }

    fn unit_cube() -> ConvexShape {
        ConvexShape::box_shape(Vector3::new(0.5, 0.5, 0.5))
    }

    #[test]
    fn test_spheres_separated() {
        let a = ConvexShape::sphere(1.0);
        let b = ConvexShape::sphere(0.5);
        let q = query_convex_pair(&a, &pose_at(0.0, 0.0, 0.0), &b, &pose_at(3.0, 0.0, 0.0));
        assert_relative_eq!(q.separation, 1.5, epsilon = 1e-12);
        assert_relative_eq!(q.normal, Vector3::x(), epsilon = 1e-12);
        assert_relative_eq!(q.witness_a, Point3::new(1.0, 0.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(q.witness_b, Point3::new(2.5, 0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_spheres_overlapping_use_cores() {
        let a = ConvexShape::sphere(1.0);
        let q = query_convex_pair(&a, &pose_at(0.0, 0.0, 0.0), &a, &pose_at(0.0, 1.5, 0.0));
        assert_relative_eq!(q.separation, -0.5, epsilon = 1e-12);
        assert_relative_eq!(q.normal, Vector3::y(), epsilon = 1e-12);
        assert!(q.is_penetrating());
    }

    #[test]
    fn test_sphere_tangent_to_box() {
        let q = query_convex_pair(
            &unit_cube(),
            &Pose::identity(),
            &ConvexShape::sphere(1.0),
            &pose_at(0.0, 0.0, 1.5),
        );
        assert_relative_eq!(q.separation, 0.0, epsilon = 1e-12);
        assert_relative_eq!(q.normal, Vector3::z(), epsilon = 1e-12);
        assert_relative_eq!(q.midpoint(), Point3::new(0.0, 0.0, 0.5), epsilon = 1e-12);
    }

    #[test]
    fn test_boxes_penetrating_epa() {
        let q = query_convex_pair(
            &unit_cube(),
            &Pose::identity(),
            &unit_cube(),
            &pose_at(0.1, 0.0, 0.8),
        );
        assert_relative_eq!(q.separation, -0.2, epsilon = 1e-6);
        assert_relative_eq!(q.normal, Vector3::z(), epsilon = 1e-6);
    }

    #[test]
    fn test_boxes_separated_edge_to_edge() {
        let rotated = Pose::from_position_rotation(
            Point3::new(2.0, 0.0, 0.0),
            UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_4),
        );
        let q = query_convex_pair(&unit_cube(), &Pose::identity(), &unit_cube(), &rotated);
        let expected = 2.0 - 0.5 - 0.5 * 2.0_f64.sqrt();
        assert_relative_eq!(q.separation, expected, epsilon = 1e-9);
    }

    #[test]
    fn test_capsule_and_cylinder() {
        let capsule = ConvexShape::capsule(1.0, 0.25);
        let lying = Pose::from_position_rotation(
            Point3::new(0.0, 0.0, 1.0),
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), std::f64::consts::FRAC_PI_2),
        );
        let q = query_convex_pair(&unit_cube(), &Pose::identity(), &capsule, &lying);
        assert_relative_eq!(q.separation, 0.25, epsilon = 1e-9);

        let cylinder = ConvexShape::cylinder(0.5, 0.5);
        let q = query_convex_pair(&unit_cube(), &Pose::identity(), &cylinder, &pose_at(0.0, 0.0, 1.25));
        assert_relative_eq!(q.separation, 0.25, epsilon = 1e-9);
        assert_relative_eq!(q.normal, Vector3::z(), epsilon = 1e-6);
    }

    #[test]
    fn test_collide_shapes_margin_semantics() {
        let cube = unit_cube();
        let ball = ConvexShape::sphere(0.5);
        let pose_b = pose_at(0.0, 0.0, 1.05);

        let miss = collide_shapes(&cube, &Pose::identity(), &ball, &pose_b, &CollisionRequest::default())
            .unwrap();
        assert!(!miss.is_collision());
        assert_relative_eq!(miss.distance_lower_bound.unwrap(), 0.05, epsilon = 1e-9);

        let near = collide_shapes(
            &cube,
            &Pose::identity(),
            &ball,
            &pose_b,
            &CollisionRequest::with_margin(0.06),
        )
        .unwrap();
        assert!(near.is_collision());
        assert_relative_eq!(near.contacts[0].penetration_depth, -0.05, epsilon = 1e-9);
        assert!(near.distance_lower_bound.is_none());
    }

    #[test]
    fn test_collide_shapes_rejects_bad_input() {
        let cube = unit_cube();
        let bad_pose = pose_at(f64::NAN, 0.0, 0.0);
        let err = collide_shapes(&cube, &Pose::identity(), &cube, &bad_pose, &CollisionRequest::default())
            .unwrap_err();
        assert!(matches!(err, HeightFieldError::NonFinitePose { .. }));

        let err = collide_shapes(
            &cube,
            &Pose::identity(),
            &ConvexShape::sphere(-1.0),
            &Pose::identity(),
            &CollisionRequest::default(),
        )
        .unwrap_err();
        assert!(matches!(err, HeightFieldError::InvalidShape { .. }));
    }

    #[test]
    fn test_closest_on_triangle_regions() {
        let mk = |x: f64, y: f64, z: f64| {
            MinkowskiPoint::new(Point3::new(x, y, z), Point3::origin())
        };
        // Origin projects inside the face.
        let s = closest_on_triangle(mk(-1.0, -1.0, 1.0), mk(1.0, -1.0, 1.0), mk(0.0, 1.0, 1.0));
        assert_eq!(s.size, 3);
        assert_relative_eq!(s.closest(), Vector3::new(0.0, 0.0, 1.0), epsilon = 1e-12);

        // Origin closest to a vertex.
        let s = closest_on_triangle(mk(1.0, 1.0, 0.0), mk(2.0, 1.0, 0.0), mk(1.0, 2.0, 0.0));
        assert_eq!(s.size, 1);
        assert_relative_eq!(s.closest(), Vector3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_tetrahedron_encloses_origin() {
        let mk = |x: f64, y: f64, z: f64| {
            MinkowskiPoint::new(Point3::new(x, y, z), Point3::origin())
        };
        let inside = closest_on_tetrahedron(
            mk(1.0, 1.0, 1.0),
            mk(1.0, -1.0, -1.0),
            mk(-1.0, 1.0, -1.0),
            mk(-1.0, -1.0, 1.0),
        );
        assert!(inside.is_none());

        let outside = closest_on_tetrahedron(
            mk(3.0, 1.0, 1.0),
            mk(3.0, -1.0, -1.0),
            mk(1.0, 1.0, -1.0),
            mk(1.0, -1.0, 1.0),
        )
        .unwrap();
        assert!(outside.closest().norm() > 0.5);
    }
}
