//! Generic sparse occupancy octree.
//!
//! [`OccupancyTree`] owns the root node and supplies the structural
//! operations every payload-bearing tree variant builds on: checked
//! coordinate↔key conversion, node lookup by key, node creation along a key
//! path with log-odds occupancy integration, depth-first leaf iteration and
//! occupancy-only pruning.
//!
//! Every operation is a synchronous, single-threaded read-modify-write; the
//! tree provides no internal locking.  A caller that shares a tree across
//! threads must guarantee one writer at a time externally.
//!
//! # Example
//!
//! ```rust
//! use voxmap_core::key::Point3;
//! use voxmap_core::node::{NodeData, OccupancyData};
//! use voxmap_core::tree::OccupancyTree;
//!
//! let mut tree: OccupancyTree<OccupancyData> = OccupancyTree::new(0.1);
//!
//! // Integrate a hit; the node (and its ancestors) are created on demand.
//! let p = Point3::new(1.0, 0.5, -0.25);
//! tree.update_node_at(p, true).unwrap();
//!
//! let key = tree.coord_to_key_checked(p).unwrap();
//! let node = tree.search(key).unwrap();
//! assert!(node.data.log_odds() > 0.0);
//! ```

use tracing::debug;

use crate::key::{self, Point3, TREE_DEPTH, VoxelKey};
use crate::node::{NodeData, TreeNode};

/// Log-odds added for an occupied observation (≈ p = 0.7).
const LOG_ODDS_HIT: f32 = 0.85;
/// Log-odds added for a free observation (≈ p = 0.4).
const LOG_ODDS_MISS: f32 = -0.41;
/// Lower clamping bound (≈ p = 0.12).
const LOG_ODDS_MIN: f32 = -2.0;
/// Upper clamping bound (≈ p = 0.97).
const LOG_ODDS_MAX: f32 = 3.5;
/// Occupancy decision threshold (p = 0.5).
const OCCUPANCY_THRESHOLD: f32 = 0.0;

/// Sparse, recursively subdivided occupancy octree with payload `D`.
#[derive(Debug)]
pub struct OccupancyTree<D: NodeData> {
    root: Option<TreeNode<D>>,
    resolution: f64,
    hit_log_odds: f32,
    miss_log_odds: f32,
    clamp_min: f32,
    clamp_max: f32,
    occupancy_threshold: f32,
}

impl<D: NodeData> OccupancyTree<D> {
    /// Create an empty tree with the given leaf resolution (metres).
    pub fn new(resolution: f64) -> Self {
        Self {
            root: None,
            resolution,
            hit_log_odds: LOG_ODDS_HIT,
            miss_log_odds: LOG_ODDS_MISS,
            clamp_min: LOG_ODDS_MIN,
            clamp_max: LOG_ODDS_MAX,
            occupancy_threshold: OCCUPANCY_THRESHOLD,
        }
    }

    pub(crate) fn from_parts(resolution: f64, root: Option<TreeNode<D>>) -> Self {
        let mut tree = Self::new(resolution);
        tree.root = root;
        tree
    }

    /// Leaf edge length in metres.
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Maximum subdivision depth (fixed at 16 levels).
    pub fn max_depth(&self) -> u8 {
        TREE_DEPTH
    }

    pub fn root(&self) -> Option<&TreeNode<D>> {
        self.root.as_ref()
    }

    pub fn root_mut(&mut self) -> Option<&mut TreeNode<D>> {
        self.root.as_mut()
    }

    // ────────────────────────────────────────────────────────────────────
    // Addressing
    // ────────────────────────────────────────────────────────────────────

    /// Checked coordinate→key conversion; `None` when out of tree bounds.
    pub fn coord_to_key_checked(&self, p: Point3) -> Option<VoxelKey> {
        key::coord_to_key_checked(p, self.resolution)
    }

    /// Centre coordinate of the voxel addressed by `key`.
    pub fn key_to_coord(&self, k: VoxelKey) -> Point3 {
        key::key_to_coord(k, self.resolution)
    }

    // ────────────────────────────────────────────────────────────────────
    // Lookup
    // ────────────────────────────────────────────────────────────────────

    /// Find the node covering `key`.
    ///
    /// Returns the deepest existing node on the key's path: a pruned
    /// shallow leaf covers the whole cube below it.  `None` when the path
    /// dead-ends in a missing child of an inner node.
    pub fn search(&self, key: VoxelKey) -> Option<&TreeNode<D>> {
        let mut node = self.root.as_ref()?;
        let mut depth = 0;
        while depth < TREE_DEPTH && node.has_children() {
            node = node.child(key.child_index(depth))?;
            depth += 1;
        }
        Some(node)
    }

    /// Mutable variant of [`search`][Self::search].
    pub fn search_mut(&mut self, key: VoxelKey) -> Option<&mut TreeNode<D>> {
        let mut node = self.root.as_mut()?;
        let mut depth = 0;
        while depth < TREE_DEPTH && node.has_children() {
            node = node.child_mut(key.child_index(depth))?;
            depth += 1;
        }
        Some(node)
    }

    /// Find the node covering the given coordinate; `None` when the
    /// coordinate is out of bounds or no node exists there.
    pub fn search_at(&self, p: Point3) -> Option<&TreeNode<D>> {
        let key = self.coord_to_key_checked(p)?;
        self.search(key)
    }

    // ────────────────────────────────────────────────────────────────────
    // Occupancy integration
    // ────────────────────────────────────────────────────────────────────

    /// Integrate one occupancy observation at `key`, creating the leaf (and
    /// any missing ancestors) on demand.  Returns the affected leaf.
    ///
    /// Descending through a previously collapsed covering leaf expands it
    /// first ([`TreeNode::expand`]), so the other voxels under it keep the
    /// covering payload instead of reverting to defaults.
    pub fn update_node(&mut self, key: VoxelKey, occupied: bool) -> &mut TreeNode<D> {
        let delta = if occupied {
            self.hit_log_odds
        } else {
            self.miss_log_odds
        };
        let (lo, hi) = (self.clamp_min, self.clamp_max);

        let mut created = self.root.is_none();
        let mut node = self
            .root
            .get_or_insert_with(|| TreeNode::new(D::default()));
        for depth in 0..TREE_DEPTH {
            let idx = key.child_index(depth);
            if node.child(idx).is_none() {
                if !created && node.is_leaf() {
                    // Existing childless node above max depth: a collapsed
                    // covering leaf.  Its payload must survive in the seven
                    // siblings not on the key path.
                    node.expand();
                } else {
                    created = true;
                }
            }
            node = node.child_or_create(idx);
        }
        let value = (node.data.log_odds() + delta).clamp(lo, hi);
        node.data.set_log_odds(value);
        node
    }

    /// Coordinate form of [`update_node`][Self::update_node]; `None` when
    /// the coordinate is out of tree bounds (nothing is created).
    pub fn update_node_at(&mut self, p: Point3, occupied: bool) -> Option<&mut TreeNode<D>> {
        let key = self.coord_to_key_checked(p)?;
        Some(self.update_node(key, occupied))
    }

    /// Occupancy decision for a node of this tree.
    pub fn is_occupied(&self, node: &TreeNode<D>) -> bool {
        node.data.log_odds() > self.occupancy_threshold
    }

    // ────────────────────────────────────────────────────────────────────
    // Statistics & iteration
    // ────────────────────────────────────────────────────────────────────

    /// Total number of nodes (inner and leaf).
    pub fn num_nodes(&self) -> usize {
        self.root.as_ref().map_or(0, TreeNode::count_nodes)
    }

    /// Number of leaf nodes.
    pub fn num_leaves(&self) -> usize {
        self.root.as_ref().map_or(0, TreeNode::count_leaves)
    }

    /// Depth-first iterator over all leaves, yielding `(node, depth)`.
    pub fn leaves(&self) -> LeafIter<'_, D> {
        LeafIter {
            stack: self.root.iter().map(|r| (r, 0u8)).collect(),
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Pruning
    // ────────────────────────────────────────────────────────────────────

    /// Collapse every collapsible subtree (bottom-up, whole tree).
    ///
    /// Collapsibility is decided on occupancy alone; see
    /// [`TreeNode::is_collapsible`].  Returns the number of collapsed nodes.
    pub fn prune(&mut self) -> usize {
        let mut pruned = 0;
        if let Some(root) = self.root.as_mut() {
            prune_recurs(root, &mut pruned);
        }
        if pruned > 0 {
            debug!(pruned, "collapsed subtrees during prune");
        }
        pruned
    }
}

fn prune_recurs<D: NodeData>(node: &mut TreeNode<D>, pruned: &mut usize) {
    if !node.has_children() {
        return;
    }
    for i in 0..8 {
        if let Some(child) = node.child_mut(i) {
            prune_recurs(child, pruned);
        }
    }
    if node.prune() {
        *pruned += 1;
    }
}

/// Depth-first leaf iterator with an explicit stack.
pub struct LeafIter<'a, D: NodeData> {
    stack: Vec<(&'a TreeNode<D>, u8)>,
}

impl<'a, D: NodeData> Iterator for LeafIter<'a, D> {
    type Item = (&'a TreeNode<D>, u8);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((node, depth)) = self.stack.pop() {
            if node.is_leaf() {
                return Some((node, depth));
            }
            // Reverse push so octant 0 is visited first.
            for i in (0..8).rev() {
                if let Some(child) = node.child(i) {
                    self.stack.push((child, depth + 1));
                }
            }
        }
        None
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
