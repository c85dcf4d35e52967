//! Bounding volume hierarchy over the cells of a grid.
//!
//! Nodes live in a flat arena with the root at index 0. Children are always
//! stored after their parent, so a reverse sweep over the arena visits every
//! child before its parent; refitting uses that order.
//!
//! The tree is built by recursive balanced splitting of the cell range: the
//! longer of the row and column ranges is cut at its middle until a single
//! cell remains. Leaves map 1:1 to cells.

use nalgebra::Point3;
use tracing::debug;

use crate::bounding_volume::{Aabb, BoundingVolume};
use crate::grid::GridModel;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Shape of a hierarchy node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NodeKind {
    /// Internal node with two children.
    Internal {
        /// Index of the left child.
        left: usize,
        /// Index of the right child.
        right: usize,
    },
    /// Leaf node holding one cell.
    Leaf {
        /// Cell row.
        row: usize,
        /// Cell column.
        col: usize,
    },
}

/// Node of the hierarchy: a bound and its children or cell.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BvNode<BV> {
    /// Bound containing every cell solid below this node.
    pub bv: BV,
    /// Children or cell.
    pub kind: NodeKind,
}

impl<BV> BvNode<BV> {
    /// Whether the node is a leaf.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    /// Child indices of an internal node.
    #[must_use]
    pub fn children(&self) -> Option<(usize, usize)> {
        match self.kind {
            NodeKind::Internal { left, right } => Some((left, right)),
            NodeKind::Leaf { .. } => None,
        }
    }

    /// Cell of a leaf node.
    #[must_use]
    pub fn cell(&self) -> Option<(usize, usize)> {
        match self.kind {
            NodeKind::Leaf { row, col } => Some((row, col)),
            NodeKind::Internal { .. } => None,
        }
    }
}

/// Half-open cell range `[rows.0, rows.1) x [cols.0, cols.1)`.
#[derive(Debug, Clone, Copy)]
struct CellRange {
    rows: (usize, usize),
    cols: (usize, usize),
}

impl CellRange {
    fn row_count(&self) -> usize {
        self.rows.1 - self.rows.0
    }

    fn col_count(&self) -> usize {
        self.cols.1 - self.cols.0
    }

    /// Split the longer range at its middle; columns win ties.
    fn split(&self) -> (Self, Self) {
        if self.col_count() >= self.row_count() {
            let mid = self.cols.0 + self.col_count() / 2;
            (
                Self {
                    cols: (self.cols.0, mid),
                    ..*self
                },
                Self {
                    cols: (mid, self.cols.1),
                    ..*self
                },
            )
        } else {
            let mid = self.rows.0 + self.row_count() / 2;
            (
                Self {
                    rows: (self.rows.0, mid),
                    ..*self
                },
                Self {
                    rows: (mid, self.rows.1),
                    ..*self
                },
            )
        }
    }
}

/// Hierarchy of bounds over the cells of a grid.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Bvh<BV = Aabb> {
    nodes: Vec<BvNode<BV>>,
}

impl<BV: BoundingVolume> Bvh<BV> {
    /// Build the hierarchy for a grid.
    #[must_use]
    pub fn build(grid: &GridModel) -> Self {
        let mut bvh = Self {
            nodes: Vec::with_capacity(2 * grid.cell_count()),
        };
        let all = CellRange {
            rows: (0, grid.cell_rows()),
            cols: (0, grid.cell_cols()),
        };
        bvh.build_recursive(grid, all);
        bvh.refit(grid);

        debug!(
            bound = BV::NAME,
            cells = grid.cell_count(),
            nodes = bvh.nodes.len(),
            depth = bvh.depth(),
            "built height field hierarchy"
        );
        if !BV::CERTIFIED_FOR_HEIGHT_FIELD {
            debug!(
                bound = BV::NAME,
                "bound type not certified for height fields, queries prune with axis-aligned envelopes"
            );
        }
        bvh
    }

    fn build_recursive(&mut self, grid: &GridModel, range: CellRange) -> usize {
        let node_idx = self.nodes.len();

        // Leaf bounds here are placeholders; refit fills in every bound.
        let placeholder = Self::leaf_bound(grid, range.rows.0, range.cols.0);

        if range.row_count() * range.col_count() == 1 {
            self.nodes.push(BvNode {
                bv: placeholder,
                kind: NodeKind::Leaf {
                    row: range.rows.0,
                    col: range.cols.0,
                },
            });
            return node_idx;
        }

        self.nodes.push(BvNode {
            bv: placeholder,
            kind: NodeKind::Internal { left: 0, right: 0 },
        });

        let (lo, hi) = range.split();
        let left_idx = self.build_recursive(grid, lo);
        let right_idx = self.build_recursive(grid, hi);

        if let NodeKind::Internal { left, right } = &mut self.nodes[node_idx].kind {
            *left = left_idx;
            *right = right_idx;
        }

        node_idx
    }

    /// Bound of one cell: its footprint from the base altitude up to its
    /// highest corner.
    #[must_use]
    pub fn leaf_bound(grid: &GridModel, row: usize, col: usize) -> BV {
        let cell = grid.footprint(row, col);
        let bottom = grid.min_altitude();
        let top = cell.max_height();
        let corners = Aabb::new(
            Point3::new(cell.west, cell.south, bottom),
            Point3::new(cell.east, cell.north, top),
        )
        .corners();
        BV::from_points(&corners)
    }

    /// Recompute every bound bottom-up from the current grid samples.
    ///
    /// The topology is unchanged; the grid must have the dimensions the
    /// hierarchy was built for.
    pub fn refit(&mut self, grid: &GridModel) {
        for idx in (0..self.nodes.len()).rev() {
            let bv = match self.nodes[idx].kind {
                NodeKind::Leaf { row, col } => Self::leaf_bound(grid, row, col),
                NodeKind::Internal { left, right } => {
                    self.nodes[left].bv.merge(&self.nodes[right].bv)
                }
            };
            self.nodes[idx].bv = bv;
        }
    }

    /// Axis-aligned box of the whole hierarchy.
    #[must_use]
    pub fn local_aabb(&self) -> Aabb {
        self.root().map_or_else(Aabb::empty, |root| root.bv.envelope())
    }
}

impl<BV> Bvh<BV> {
    /// Node arena, root first.
    #[must_use]
    pub fn nodes(&self) -> &[BvNode<BV>] {
        &self.nodes
    }

    /// The root node.
    #[must_use]
    pub fn root(&self) -> Option<&BvNode<BV>> {
        self.nodes.first()
    }

    /// Node by index.
    #[must_use]
    pub fn node(&self, index: usize) -> Option<&BvNode<BV>> {
        self.nodes.get(index)
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of leaves (equal to the number of cells).
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Number of nodes on the longest root-to-leaf path.
    #[must_use]
    pub fn depth(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }
        let mut max_depth = 0;
        let mut stack = vec![(0_usize, 1_usize)];
        while let Some((idx, depth)) = stack.pop() {
            max_depth = max_depth.max(depth);
            if let Some((left, right)) = self.nodes[idx].children() {
                stack.push((left, depth + 1));
                stack.push((right, depth + 1));
            }
        }
        max_depth
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::bounding_volume::Obb;
    use crate::cell::build_cell_solids;
    use nalgebra::DMatrix;

    fn bumpy_grid(rows: usize, cols: usize) -> GridModel {
        #[allow(clippy::cast_precision_loss)]
        let heights = DMatrix::from_fn(rows, cols, |r, c| {
            1.0 + (r as f64 * 0.7).sin() * 0.5 + (c as f64 * 0.3).cos() * 0.25
        });
        GridModel::new(3.0, 2.0, heights, 0.0).unwrap()
    }

    fn assert_contains_subtree<BV: BoundingVolume>(bvh: &Bvh<BV>, grid: &GridModel) {
        // Every node bound contains every vertex of every solid below it.
        for (idx, node) in bvh.nodes().iter().enumerate() {
            let mut stack = vec![idx];
            while let Some(i) = stack.pop() {
                match bvh.nodes()[i].kind {
                    NodeKind::Internal { left, right } => {
                        assert!(left > i && right > i);
                        stack.push(left);
                        stack.push(right);
                    }
                    NodeKind::Leaf { row, col } => {
                        let cell = grid.cell(row, col).unwrap();
                        for solid in build_cell_solids(&cell, grid.min_altitude()) {
                            for p in &solid.points {
                                assert!(node.bv.contains(p), "node {idx} misses cell ({row}, {col})");
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_single_cell() {
        let grid = GridModel::new(1.0, 1.0, DMatrix::from_element(2, 2, 1.0), 0.0).unwrap();
        let bvh: Bvh = Bvh::build(&grid);
        assert_eq!(bvh.node_count(), 1);
        assert_eq!(bvh.root().unwrap().cell(), Some((0, 0)));
        assert_eq!(bvh.local_aabb().min, Point3::new(-0.5, -0.5, 0.0));
        assert_eq!(bvh.local_aabb().max, Point3::new(0.5, 0.5, 1.0));
    }

    #[test]
    fn test_leaves_cover_every_cell_once() {
        let grid = bumpy_grid(7, 12);
        let bvh: Bvh = Bvh::build(&grid);
        assert_eq!(bvh.leaf_count(), grid.cell_count());
        assert_eq!(bvh.node_count(), 2 * grid.cell_count() - 1);

        let mut seen = vec![false; grid.cell_count()];
        for node in bvh.nodes() {
            if let Some((row, col)) = node.cell() {
                let k = row * grid.cell_cols() + col;
                assert!(!seen[k]);
                seen[k] = true;
            }
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_balanced_depth() {
        let grid = bumpy_grid(33, 33);
        let bvh: Bvh = Bvh::build(&grid);
        // 1024 cells split evenly: 10 levels of internal nodes plus the leaves.
        assert_eq!(bvh.depth(), 11);
    }

    #[test]
    fn test_containment_aabb_and_obb() {
        let grid = bumpy_grid(6, 9);
        assert_contains_subtree(&Bvh::<Aabb>::build(&grid), &grid);
        assert_contains_subtree(&Bvh::<Obb>::build(&grid), &grid);
    }

    #[test]
    fn test_refit_matches_rebuild() {
        let mut grid = bumpy_grid(5, 8);
        let mut bvh: Bvh = Bvh::build(&grid);

        let raised = grid.heights().map(|h| h * 2.0 + 0.5);
        grid.set_heights(raised, -1.0).unwrap();
        bvh.refit(&grid);

        assert_eq!(bvh, Bvh::build(&grid));
        assert_contains_subtree(&bvh, &grid);
        assert_eq!(bvh.local_aabb().min.z, -1.0);
    }
}
