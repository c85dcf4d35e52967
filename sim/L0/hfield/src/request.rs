//! Collision request parameters and query results.

use nalgebra::{Point3, Vector3};

use crate::error::{HeightFieldError, HeightFieldResult};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default tolerance added to the margin test.
pub const DEFAULT_COLLISION_DISTANCE_THRESHOLD: f64 = 1e-9;

/// Parameters of a collision query.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CollisionRequest {
    /// Signed offset of the collision boundary. Positive values report
    /// collision while the surfaces are still up to this far apart; negative
    /// values require at least `|security_margin|` of interpenetration.
    /// Default: 0.0
    pub security_margin: f64,

    /// Maximum number of contacts to collect before the traversal stops.
    /// Must be at least 1. Default: 1
    pub num_max_contacts: usize,

    /// Whether to report a distance lower bound when nothing collides.
    /// Default: true
    pub compute_distance_lower_bound: bool,

    /// Round-off tolerance of the margin test: a pair collides when
    /// `separation - security_margin <= collision_distance_threshold`.
    /// Default: 1e-9
    pub collision_distance_threshold: f64,
}

impl Default for CollisionRequest {
    fn default() -> Self {
        Self {
            security_margin: 0.0,
            num_max_contacts: 1,
            compute_distance_lower_bound: true,
            collision_distance_threshold: DEFAULT_COLLISION_DISTANCE_THRESHOLD,
        }
    }
}

impl CollisionRequest {
    /// Request with the given security margin and default settings.
    #[must_use]
    pub fn with_margin(security_margin: f64) -> Self {
        Self {
            security_margin,
            ..Default::default()
        }
    }

    /// Set the security margin.
    #[must_use]
    pub const fn with_security_margin(mut self, security_margin: f64) -> Self {
        self.security_margin = security_margin;
        self
    }

    /// Set the contact cap.
    #[must_use]
    pub const fn with_max_contacts(mut self, num_max_contacts: usize) -> Self {
        self.num_max_contacts = num_max_contacts;
        self
    }

    /// Enable or disable the distance lower bound.
    #[must_use]
    pub const fn with_distance_lower_bound(mut self, enabled: bool) -> Self {
        self.compute_distance_lower_bound = enabled;
        self
    }

    /// Set the round-off tolerance of the margin test.
    #[must_use]
    pub const fn with_collision_distance_threshold(mut self, threshold: f64) -> Self {
        self.collision_distance_threshold = threshold;
        self
    }

    /// Check the request before a traversal.
    ///
    /// # Errors
    ///
    /// Returns [`HeightFieldError::InvalidRequest`] for a non-finite margin,
    /// a zero contact cap, or a negative or non-finite threshold.
    pub fn validate(&self) -> HeightFieldResult<()> {
        if !self.security_margin.is_finite() {
            return Err(HeightFieldError::InvalidRequest {
                reason: format!("security margin must be finite, got {}", self.security_margin),
            });
        }
        if self.num_max_contacts == 0 {
            return Err(HeightFieldError::InvalidRequest {
                reason: "num_max_contacts must be at least 1".to_string(),
            });
        }
        if !(self.collision_distance_threshold.is_finite()
            && self.collision_distance_threshold >= 0.0)
        {
            return Err(HeightFieldError::InvalidRequest {
                reason: format!(
                    "collision distance threshold must be non-negative and finite, got {}",
                    self.collision_distance_threshold
                ),
            });
        }
        Ok(())
    }

    /// Margin test on a raw (margin-free) surface separation.
    #[must_use]
    pub fn is_collision(&self, separation: f64) -> bool {
        separation - self.security_margin <= self.collision_distance_threshold
    }

    /// Lower-bound contribution of a non-colliding separation.
    #[must_use]
    pub fn margin_distance(&self, separation: f64) -> f64 {
        separation - self.security_margin
    }
}

/// Cell solid a contact was found on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CellSolid {
    /// Cell row.
    pub row: usize,
    /// Cell column.
    pub col: usize,
    /// Solid index inside the cell (0 or 1).
    pub solid: usize,
}

/// One contact between the height field and the query shape.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Contact {
    /// Midpoint between the two surface witnesses, world frame.
    pub position: Point3<f64>,
    /// Unit normal pointing from the height field toward the query shape,
    /// world frame.
    pub normal: Vector3<f64>,
    /// Interpenetration of the unmargined geometry (`-separation`). Positive
    /// when overlapping, about zero when the margin alone triggered the
    /// contact, negative for a near miss inside a positive margin.
    pub penetration_depth: f64,
    /// Cell solid that produced the contact, if any.
    pub cell: Option<CellSolid>,
}

/// Counters gathered during one traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TraversalStats {
    /// Bounding-volume overlap tests performed.
    pub bv_tests: usize,
    /// Subtrees discarded by a bounding-volume test.
    pub pruned_nodes: usize,
    /// Leaves whose solids reached the narrow phase.
    pub leaf_tests: usize,
    /// Narrow-phase pair queries run.
    pub narrow_phase_calls: usize,
}

/// Outcome of a collision query.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CollisionResult {
    /// Contacts in discovery order.
    pub contacts: Vec<Contact>,
    /// Certified lower bound of `separation - security_margin`; only set when
    /// nothing collides and the request asked for it.
    pub distance_lower_bound: Option<f64>,
    /// Traversal counters.
    pub stats: TraversalStats,
    /// Whether the contact cap stopped the traversal early.
    pub truncated: bool,
}

impl CollisionResult {
    /// Whether at least one contact was found.
    #[must_use]
    pub fn is_collision(&self) -> bool {
        !self.contacts.is_empty()
    }

    /// Number of contacts.
    #[must_use]
    pub fn num_contacts(&self) -> usize {
        self.contacts.len()
    }

    /// Contact by index.
    #[must_use]
    pub fn contact(&self, index: usize) -> Option<&Contact> {
        self.contacts.get(index)
    }

    /// Whether the contact cap was reached, so the contact list may be
    /// incomplete. The collision flag itself is always reliable.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Deepest contact.
    #[must_use]
    pub fn deepest_contact(&self) -> Option<&Contact> {
        self.contacts.iter().max_by(|a, b| {
            a.penetration_depth
                .partial_cmp(&b.penetration_depth)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }
}
