//! Decomposition of one grid cell into two convex solids.
//!
//! The footprint is split along its NE-SW diagonal. Each footprint triangle
//! is extruded from the base altitude up to its three corner heights,
//! giving a triangular prism with a flat bottom and a generally slanted top:
//!
//! ```text
//!   NW ─────── NE        solid 0: NW, NE, SW
//!   │ 0     ╱  │         solid 1: SW, SE, NE
//!   │     ╱    │
//!   │   ╱    1 │
//!   SW ─────── SE
//! ```
//!
//! Both solids list 6 vertices (bottom triangle, then top triangle) and
//! exactly 8 triangular faces wound counter-clockwise seen from outside:
//!
//! | face | solid 0          | solid 1          |
//! |------|------------------|------------------|
//! | 0    | bottom (`-z`)    | bottom (`-z`)    |
//! | 1    | top              | top              |
//! | 2-3  | west (`-x`)      | south (`-y`)     |
//! | 4-5  | diagonal (SE)    | diagonal (NW)    |
//! | 6-7  | north (`+y`)     | east (`+x`)      |
//!
//! The solids are rebuilt on demand from the cell data; nothing is cached.
//!
//! Walls shared with a neighbouring cell are interior to the terrain. A
//! solid records which of its faces are exposed ([`ActiveFaces`]) so that a
//! contact pushed out through an interior wall can be re-derived against the
//! planes bounding the terrain instead ([`SupportPlane`]).

use nalgebra::{Point3, Vector3};

use crate::bounding_volume::Aabb;
use crate::grid::{CellFootprint, GridModel};
use crate::narrow_phase::SupportMap;
use crate::pose::Pose;

/// Number of triangular faces of every cell solid.
pub const FACES_PER_SOLID: usize = 8;

/// Number of vertices of every cell solid.
pub const VERTICES_PER_SOLID: usize = 6;

/// Index of the bottom face of every cell solid.
pub const BOTTOM_FACE: usize = 0;

/// Index of the top face of every cell solid.
pub const TOP_FACE: usize = 1;

/// First face of the wall pairs: west/south, diagonal, north/east.
const FIRST_WALL: usize = 2;
const LAST_WALL: usize = 6;

/// One face per plane: bottom, top, then the first face of each wall pair.
const DISTINCT_PLANES: [usize; 5] = [BOTTOM_FACE, TOP_FACE, FIRST_WALL, 4, LAST_WALL];

/// Face list of solid 0 over `[NW_b, NE_b, SW_b, NW_t, NE_t, SW_t]`.
const SOLID0_FACES: [[usize; 3]; FACES_PER_SOLID] = [
    [0, 1, 2],
    [3, 5, 4],
    [0, 2, 5],
    [0, 5, 3],
    [1, 4, 2],
    [2, 4, 5],
    [0, 3, 1],
    [1, 3, 4],
];

/// Face list of solid 1 over `[SW_b, SE_b, NE_b, SW_t, SE_t, NE_t]`.
const SOLID1_FACES: [[usize; 3]; FACES_PER_SOLID] = [
    [0, 2, 1],
    [3, 4, 5],
    [0, 1, 3],
    [1, 4, 3],
    [0, 3, 2],
    [2, 3, 5],
    [1, 2, 4],
    [2, 5, 4],
];

/// Convex polyhedron given by its vertices and triangular faces.
///
/// Face winding is counter-clockwise seen from outside, so
/// `(b - a) x (c - a)` points outward for face `[a, b, c]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvexPolyhedron {
    /// Vertex positions.
    pub points: Vec<Point3<f64>>,
    /// Triangles as indices into `points`.
    pub faces: Vec<[usize; 3]>,
}

impl ConvexPolyhedron {
    /// Unit outward normal of face `index`.
    ///
    /// Returns `None` for an out-of-range index or a zero-area face (a wall
    /// whose top corners sit exactly on the base altitude).
    #[must_use]
    pub fn face_normal(&self, index: usize) -> Option<Vector3<f64>> {
        let [a, b, c] = *self.faces.get(index)?;
        let (pa, pb, pc) = (
            self.points.get(a)?,
            self.points.get(b)?,
            self.points.get(c)?,
        );
        (pb - pa).cross(&(pc - pa)).try_normalize(f64::EPSILON)
    }

    /// Bounding box of the vertices.
    #[must_use]
    pub fn local_aabb(&self) -> Aabb {
        let mut aabb = Aabb::empty();
        for p in &self.points {
            aabb.expand_point(p);
        }
        aabb
    }

    /// Number of faces.
    #[must_use]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Supporting plane of face `index`, or `None` for a degenerate face.
    #[must_use]
    pub fn face_plane(&self, index: usize) -> Option<SupportPlane> {
        let normal = self.face_normal(index)?;
        let point = *self.points.get(self.faces.get(index)?[0])?;
        Some(SupportPlane { point, normal })
    }

    /// Face whose outward normal is closest to `direction`.
    #[must_use]
    pub fn facing(&self, direction: &Vector3<f64>) -> Option<usize> {
        (0..self.faces.len())
            .filter_map(|i| self.face_normal(i).map(|n| (i, n.dot(direction))))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }
}

/// Plane bounding a half-space that contains a solid; the normal points out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupportPlane {
    /// A point of the plane.
    pub point: Point3<f64>,
    /// Unit outward normal.
    pub normal: Vector3<f64>,
}

impl SupportPlane {
    /// Signed separation between the half-space and a placed shape, with the
    /// point of the shape furthest into the half-space.
    ///
    /// Never larger than the separation between the shape and any solid the
    /// half-space contains.
    #[must_use]
    pub fn separation<S: SupportMap + ?Sized>(&self, shape: &S, pose: &Pose) -> (f64, Point3<f64>) {
        let inward = -self.normal;
        let core = pose.transform_point(&shape.local_support(&pose.inverse_transform_vector(&inward)));
        let deepest = core + inward * shape.inflation();
        ((deepest - self.point).dot(&self.normal), deepest)
    }
}

/// Planes bounding the whole terrain: the base, then the west, east, north
/// and south borders of the grid.
#[must_use]
pub fn terrain_planes(grid: &GridModel) -> [SupportPlane; 5] {
    let half_x = 0.5 * grid.x_dim();
    let half_y = 0.5 * grid.y_dim();
    let base = grid.min_altitude();
    let plane = |x: f64, y: f64, normal: Vector3<f64>| SupportPlane {
        point: Point3::new(x, y, base),
        normal,
    };
    [
        plane(0.0, 0.0, -Vector3::z()),
        plane(-half_x, 0.0, -Vector3::x()),
        plane(half_x, 0.0, Vector3::x()),
        plane(0.0, half_y, Vector3::y()),
        plane(0.0, -half_y, -Vector3::y()),
    ]
}

/// Faces of a cell solid where the terrain surface is exposed.
///
/// Bottom and top are always exposed and the diagonal never is. A side wall
/// is exposed on the grid border, or when the neighbouring cell across it is
/// lower than this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveFaces(u8);

impl ActiveFaces {
    const TOP_AND_BOTTOM: Self = Self((1 << BOTTOM_FACE) | (1 << TOP_FACE));

    fn with_wall(self, first_face: usize, exposed: bool) -> Self {
        if exposed {
            Self(self.0 | (0b11 << first_face))
        } else {
            self
        }
    }

    /// Whether face `index` is exposed.
    #[must_use]
    pub fn contains(self, index: usize) -> bool {
        index < FACES_PER_SOLID && self.0 & (1 << index) != 0
    }

    /// Whether face `index` is an exposed side wall.
    #[must_use]
    pub fn is_exposed_wall(self, index: usize) -> bool {
        index >= FIRST_WALL && self.contains(index)
    }

    /// Supporting planes of the exposed faces of `solid`.
    pub fn exposed_planes(self, solid: &ConvexPolyhedron) -> impl Iterator<Item = SupportPlane> + '_ {
        DISTINCT_PLANES
            .into_iter()
            .filter(move |&face| self.contains(face))
            .filter_map(move |face| solid.face_plane(face))
    }
}

/// Exposed faces of both solids of cell `(row, col)`, or `None` out of range.
#[must_use]
pub fn active_faces(grid: &GridModel, row: usize, col: usize) -> Option<[ActiveFaces; 2]> {
    let height = grid.cell_max_height(row, col)?;
    let exposed_toward = |neighbour: Option<(usize, usize)>| {
        neighbour
            .and_then(|(r, c)| grid.cell_max_height(r, c))
            .map_or(true, |h| h < height)
    };
    let north = exposed_toward(row.checked_sub(1).map(|r| (r, col)));
    let west = exposed_toward(col.checked_sub(1).map(|c| (row, c)));
    let south = exposed_toward(Some((row + 1, col)));
    let east = exposed_toward(Some((row, col + 1)));

    let open = ActiveFaces::TOP_AND_BOTTOM;
    Some([
        open.with_wall(FIRST_WALL, west).with_wall(LAST_WALL, north),
        open.with_wall(FIRST_WALL, south).with_wall(LAST_WALL, east),
    ])
}

impl SupportMap for ConvexPolyhedron {
    fn local_support(&self, direction: &Vector3<f64>) -> Point3<f64> {
        let mut best = Point3::origin();
        let mut max_dot = f64::NEG_INFINITY;
        for p in &self.points {
            let dot = p.coords.dot(direction);
            if dot > max_dot {
                max_dot = dot;
                best = *p;
            }
        }
        best
    }

    fn local_center(&self) -> Point3<f64> {
        if self.points.is_empty() {
            return Point3::origin();
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.points.len() as f64;
        Point3::from(self.points.iter().map(|p| p.coords).sum::<Vector3<f64>>() / n)
    }
}

fn on_base(top: Point3<f64>, min_altitude: f64) -> Point3<f64> {
    Point3::new(top.x, top.y, min_altitude)
}

fn prism(tops: [Point3<f64>; 3], min_altitude: f64, faces: &[[usize; 3]]) -> ConvexPolyhedron {
    let mut points = Vec::with_capacity(VERTICES_PER_SOLID);
    points.extend(tops.iter().map(|t| on_base(*t, min_altitude)));
    points.extend_from_slice(&tops);
    ConvexPolyhedron {
        points,
        faces: faces.to_vec(),
    }
}

/// Build the two convex solids of a cell.
///
/// Deterministic: the result depends only on the footprint and the base
/// altitude.
#[must_use]
pub fn build_cell_solids(cell: &CellFootprint, min_altitude: f64) -> [ConvexPolyhedron; 2] {
    [
        prism([cell.nw(), cell.ne(), cell.sw()], min_altitude, &SOLID0_FACES),
        prism([cell.sw(), cell.se(), cell.ne()], min_altitude, &SOLID1_FACES),
    ]
}
