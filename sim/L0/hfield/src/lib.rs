//! Height field collision detection.
//!
//! This crate answers, for a terrain given as a regular grid of altitudes and
//! a rigid convex query shape, whether the two intersect under a signed
//! security margin. When they intersect it reports contacts (position,
//! normal, penetration depth); when they don't it reports a certified lower
//! bound of their separation.
//!
//! Each grid cell is split into two convex prisms reaching down to a common
//! base altitude. A bounding volume hierarchy over the cells prunes most of
//! them before the narrow phase (GJK/EPA) runs on the rest.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       HeightField<BV>                       │
//! │  GridModel: x/y axes, heights, min_altitude                 │
//! │  Bvh<BV>:   arena of nodes, one leaf per cell               │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           │ collide(hf, pose, shape, pose, request)
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         traversal                           │
//! │  prune nodes by BV overlap under the margin                 │
//! │  leaf → cell::build_cell_solids → narrow_phase (GJK/EPA)    │
//! └─────────────────────────┬───────────────────────────────────┘
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      CollisionResult                        │
//! │  contacts | distance_lower_bound | stats                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Layer 0 Crate
//!
//! This is a Layer 0 crate with **zero Bevy dependencies**. Queries are
//! synchronous and allocation-light; a [`HeightField`] is `Send + Sync` and
//! may serve concurrent queries while nothing updates it.
//!
//! # Quick Start
//!
//! ```
//! use nalgebra::DMatrix;
//! use sim_hfield::{CollisionRequest, ConvexShape, HeightField, Pose};
//!
//! // 2x2 samples: one cell, 1 x 2 footprint, flat top at 1.0 over a base at 0.0
//! let hf: HeightField = HeightField::new(1.0, 2.0, DMatrix::from_element(2, 2, 1.0), 0.0)?;
//! let ball = ConvexShape::sphere(1.0);
//!
//! let touching = hf.collide(
//!     &Pose::identity(),
//!     &ball,
//!     &Pose::from_xyz(0.0, 0.0, 1.9),
//!     &CollisionRequest::default(),
//! )?;
//! assert!(touching.is_collision());
//!
//! let apart = hf.collide(
//!     &Pose::identity(),
//!     &ball,
//!     &Pose::from_xyz(0.0, 0.0, 2.1),
//!     &CollisionRequest::default(),
//! )?;
//! assert!(!apart.is_collision());
//! # Ok::<(), sim_hfield::HeightFieldError>(())
//! ```
//!
//! # Features
//!
//! - `serde`: `Serialize`/`Deserialize` for the data types.
//! - `parallel`: [`collide_batch`] runs its queries on the rayon thread pool.

#![doc(html_root_url = "https://docs.rs/sim-hfield/0.7.0")]
#![deny(clippy::unwrap_used, clippy::expect_used)]
#![warn(missing_docs)]
#![allow(
    clippy::missing_const_for_fn,       // Many methods can't be const due to nalgebra
    clippy::suboptimal_flops,           // mul_add style changes aren't always clearer
    clippy::neg_cmp_op_on_partial_ord,  // !(x > 0.0) is intentional for NaN rejection
    clippy::many_single_char_names,     // Geometry formulas use a, b, c, p, q, r
    clippy::doc_markdown,               // Not all technical terms need backticks
)]

pub mod bounding_volume;
pub mod bvh;
pub mod cell;
pub mod error;
pub mod grid;
pub mod height_field;
pub mod narrow_phase;
pub mod pose;
pub mod request;
pub mod shape;
pub mod traversal;

pub use bounding_volume::{Aabb, BoundingVolume, Obb};
pub use bvh::{BvNode, Bvh, NodeKind};
pub use cell::{
    active_faces, build_cell_solids, terrain_planes, ActiveFaces, ConvexPolyhedron, SupportPlane,
};
pub use error::{HeightFieldError, HeightFieldResult};
pub use grid::{CellFootprint, GridModel};
pub use height_field::HeightField;
pub use narrow_phase::{collide_shapes, query_convex_pair, PairQuery, SupportMap};
pub use pose::Pose;
pub use request::{CellSolid, CollisionRequest, CollisionResult, Contact, TraversalStats};
pub use shape::ConvexShape;
pub use traversal::{collide, collide_batch};
