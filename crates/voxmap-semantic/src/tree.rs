//! Semantic-labeled occupancy tree.
//!
//! [`LabelTree`] attaches a [`Label`] to every node of an occupancy octree
//! and defines how repeated, possibly conflicting per-voxel observations are
//! fused over time:
//!
//! | Policy | Rule |
//! |--------|------|
//! | [`set_node_label`][LabelTree::set_node_label] | overwrite with the new observation (authoritative writes) |
//! | [`average_node_label`][LabelTree::average_node_label] | pairwise arithmetic mean with the prior value |
//! | [`integrate_node_label`][LabelTree::integrate_node_label] | occupancy-weighted blend `old·p + new·(gain − p)` |
//!
//! All three resolve the target through the base tree's key search and are
//! no-ops returning `None` when the node does not exist — creation is the
//! base tree's responsibility (see
//! [`update_node`][LabelTree::update_node]).  Inner-node labels are never
//! written by callers; [`update_inner_occupancy`][LabelTree::update_inner_occupancy]
//! derives them bottom-up from the leaves, in the same pass that aggregates
//! occupancy, so a node's occupancy and label always reflect the same child
//! snapshot.
//!
//! # Example
//!
//! ```rust
//! use voxmap_core::Point3;
//! use voxmap_semantic::{LabelObservation, LabelTree};
//!
//! let mut tree = LabelTree::new(0.1);
//! let p = Point3::new(1.0, 0.5, -0.25);
//!
//! // Geometry first: the occupancy update creates the voxel.
//! tree.update_node_at(p, true).unwrap();
//!
//! // Then fuse a semantic observation into it.
//! let obs = LabelObservation {
//!     r: 120.0, g: 30.0, b: 30.0,
//!     interest: 5.0,
//!     resolution: 0.1,
//!     visits: 1,
//! };
//! let node = tree.average_node_label_at(p, &obs).unwrap();
//! assert_eq!(node.label().interest, Some(5.0));
//! ```

use std::any::Any;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use tracing::debug;
use voxmap_core::io::{self, FileHeader};
use voxmap_core::key::TREE_DEPTH;
use voxmap_core::tree::LeafIter;
use voxmap_core::{MapError, OccupancyTree, Point3, TreeNode, VoxelKey, registry};

use crate::label::{Label, VoxelClass};
use crate::node::LabelNode;

/// Tree type name written to persisted map headers.
pub const TREE_TYPE_ID: &str = "LabelTree";

/// Default weight constant of the integrate policy.
///
/// Deliberately slightly below 1: even a fully confident voxel keeps
/// admitting a sliver of each new observation.  Tunable per tree via
/// [`LabelTree::set_fusion_gain`].
pub const DEFAULT_FUSION_GAIN: f64 = 0.99;

/// One semantic observation of a voxel, as delivered by a sensor pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabelObservation {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    /// Exploration-priority score of this observation.
    pub interest: f64,
    /// Spatial resolution the observation was made at (metres).
    pub resolution: f64,
    /// Visit count carried by this observation.
    pub visits: u32,
}

// ────────────────────────────────────────────────────────────────────────────
// LabelTree
// ────────────────────────────────────────────────────────────────────────────

/// Occupancy octree whose nodes carry semantic [`Label`]s.
#[derive(Debug)]
pub struct LabelTree {
    tree: OccupancyTree<LabelNode>,
    fusion_gain: f64,
}

impl LabelTree {
    /// Create an empty tree with the given leaf resolution (metres).
    pub fn new(resolution: f64) -> Self {
        Self {
            tree: OccupancyTree::new(resolution),
            fusion_gain: DEFAULT_FUSION_GAIN,
        }
    }

    /// Leaf edge length in metres.
    pub fn resolution(&self) -> f64 {
        self.tree.resolution()
    }

    /// Total number of nodes (inner and leaf).
    pub fn num_nodes(&self) -> usize {
        self.tree.num_nodes()
    }

    /// Number of leaf nodes.
    pub fn num_leaves(&self) -> usize {
        self.tree.num_leaves()
    }

    /// Weight constant of the integrate policy.
    pub fn fusion_gain(&self) -> f64 {
        self.fusion_gain
    }

    /// Set the integrate-policy weight constant (clamped to `[0, 1]`).
    pub fn set_fusion_gain(&mut self, gain: f64) {
        self.fusion_gain = gain.clamp(0.0, 1.0);
    }

    /// The underlying occupancy tree.
    pub fn base(&self) -> &OccupancyTree<LabelNode> {
        &self.tree
    }

    // ────────────────────────────────────────────────────────────────────
    // Base-tree delegation
    // ────────────────────────────────────────────────────────────────────

    /// Checked coordinate→key conversion; `None` when out of tree bounds.
    pub fn coord_to_key_checked(&self, p: Point3) -> Option<VoxelKey> {
        self.tree.coord_to_key_checked(p)
    }

    /// Find the node covering `key`.
    pub fn search(&self, key: VoxelKey) -> Option<&TreeNode<LabelNode>> {
        self.tree.search(key)
    }

    /// Integrate one occupancy observation, creating the voxel on demand.
    pub fn update_node(&mut self, key: VoxelKey, occupied: bool) -> &mut TreeNode<LabelNode> {
        self.tree.update_node(key, occupied)
    }

    /// Coordinate form of [`update_node`][Self::update_node]; `None` when
    /// out of bounds.
    pub fn update_node_at(&mut self, p: Point3, occupied: bool) -> Option<&mut TreeNode<LabelNode>> {
        self.tree.update_node_at(p, occupied)
    }

    /// Occupancy decision for a node of this tree.
    pub fn is_occupied(&self, node: &TreeNode<LabelNode>) -> bool {
        self.tree.is_occupied(node)
    }

    /// Depth-first iterator over all leaves, yielding `(node, depth)`.
    pub fn leaves(&self) -> LeafIter<'_, LabelNode> {
        self.tree.leaves()
    }

    // ────────────────────────────────────────────────────────────────────
    // Fusion policies
    // ────────────────────────────────────────────────────────────────────

    /// Overwrite the label of the node at `key` with the observation,
    /// discarding any prior fused value.  Used for authoritative writes.
    ///
    /// Returns the affected node's payload, or `None` when no node exists at
    /// `key` (nothing is created or mutated).
    pub fn set_node_label(
        &mut self,
        key: VoxelKey,
        obs: &LabelObservation,
    ) -> Option<&mut LabelNode> {
        let data = &mut self.tree.search_mut(key)?.data;
        apply_observation(data.label_mut(), obs);
        Some(data)
    }

    /// Coordinate form of [`set_node_label`][Self::set_node_label]; `None`
    /// when the coordinate is out of tree bounds.
    pub fn set_node_label_at(
        &mut self,
        p: Point3,
        obs: &LabelObservation,
    ) -> Option<&mut LabelNode> {
        let key = self.coord_to_key_checked(p)?;
        self.set_node_label(key, obs)
    }

    /// Fuse the observation into the node at `key` by pairwise arithmetic
    /// mean: each numeric field becomes the unweighted mean of the prior
    /// value and the observation.  A prior without an interest score
    /// contributes zero to the mean.  Behaves like
    /// [`set_node_label`][Self::set_node_label] when the label is unset.
    ///
    /// Repeated calls bias toward recent observations: this is a pairwise
    /// average, not a running mean over the full history.
    pub fn average_node_label(
        &mut self,
        key: VoxelKey,
        obs: &LabelObservation,
    ) -> Option<&mut LabelNode> {
        let data = &mut self.tree.search_mut(key)?.data;
        if data.is_label_set() {
            let prev = data.label().clone();
            let label = data.label_mut();
            label.r = (prev.r + obs.r) / 2.0;
            label.g = (prev.g + obs.g) / 2.0;
            label.b = (prev.b + obs.b) / 2.0;
            label.interest = Some((prev.interest.unwrap_or(0.0) + obs.interest) / 2.0);
            label.num_visits = (prev.num_visits + obs.visits) / 2;
            label.observation_resolution = obs.resolution;
        } else {
            apply_observation(data.label_mut(), obs);
        }
        Some(data)
    }

    /// Coordinate form of [`average_node_label`][Self::average_node_label].
    pub fn average_node_label_at(
        &mut self,
        p: Point3,
        obs: &LabelObservation,
    ) -> Option<&mut LabelNode> {
        let key = self.coord_to_key_checked(p)?;
        self.average_node_label(key, obs)
    }

    /// Fuse the observation into the node at `key` weighted by the node's
    /// occupancy probability `p`: each numeric field becomes
    /// `old·p + new·(gain − p)` with `gain` = [`fusion_gain`][Self::fusion_gain].
    ///
    /// The fused value leans on the prior estimate as occupancy confidence
    /// grows and on the new observation while confidence is low.  Behaves
    /// like [`set_node_label`][Self::set_node_label] when the label is unset.
    pub fn integrate_node_label(
        &mut self,
        key: VoxelKey,
        obs: &LabelObservation,
    ) -> Option<&mut LabelNode> {
        let gain = self.fusion_gain;
        let data = &mut self.tree.search_mut(key)?.data;
        if data.is_label_set() {
            let p = data.occupancy();
            let w = gain - p;
            let prev = data.label().clone();
            let label = data.label_mut();
            label.r = prev.r * p + obs.r * w;
            label.g = prev.g * p + obs.g * w;
            label.b = prev.b * p + obs.b * w;
            label.interest = Some(prev.interest.unwrap_or(0.0) * p + obs.interest * w);
            label.num_visits = (prev.num_visits as f64 * p + obs.visits as f64 * w) as u32;
            label.observation_resolution = obs.resolution;
        } else {
            apply_observation(data.label_mut(), obs);
        }
        Some(data)
    }

    /// Coordinate form of [`integrate_node_label`][Self::integrate_node_label].
    pub fn integrate_node_label_at(
        &mut self,
        p: Point3,
        obs: &LabelObservation,
    ) -> Option<&mut LabelNode> {
        let key = self.coord_to_key_checked(p)?;
        self.integrate_node_label(key, obs)
    }

    // ────────────────────────────────────────────────────────────────────
    // Bottom-up aggregation
    // ────────────────────────────────────────────────────────────────────

    /// Re-derive every inner node's occupancy and label from its children.
    ///
    /// Post-order depth-first over the whole tree: children first, then the
    /// node's occupancy (maximum over children) and label (unweighted mean
    /// of the set-label children's color, interest and visit count; class
    /// by majority vote) are recomputed in the same step.  Inner nodes with
    /// no set-label child revert to the default label.  Leaves are never
    /// touched — their labels come only from the fusion policies.
    pub fn update_inner_occupancy(&mut self) {
        if let Some(root) = self.tree.root_mut() {
            update_inner_recurs(root, 0);
        }
    }

    // ────────────────────────────────────────────────────────────────────
    // Pruning
    // ────────────────────────────────────────────────────────────────────

    /// Collapse every collapsible subtree, bottom-up.
    ///
    /// Collapsibility is decided on occupancy alone — label divergence
    /// across children never blocks a collapse, so pruning may discard
    /// semantic detail once geometry has converged.  Returns the number of
    /// collapsed nodes.
    pub fn prune(&mut self) -> usize {
        let mut pruned = 0;
        if let Some(root) = self.tree.root_mut() {
            prune_recurs(root, &mut pruned);
        }
        if pruned > 0 {
            debug!(pruned, "collapsed labeled subtrees during prune");
        }
        pruned
    }

    /// Collapse one node when its children satisfy the occupancy-only
    /// criterion.  The surviving node takes child 0's payload; when that
    /// label is set it is replaced by the pre-collapse aggregate of all
    /// children, otherwise the raw copied value stands.
    pub fn prune_node(node: &mut TreeNode<LabelNode>) -> bool {
        if !node.is_collapsible() {
            return false;
        }
        let aggregate = mean_child_label(node);
        let first = match node.child(0) {
            Some(c) => c.data.clone(),
            None => return false,
        };
        node.data = first;
        if node.data.is_label_set() {
            node.data.set_label(aggregate);
        }
        node.remove_children();
        true
    }

    // ────────────────────────────────────────────────────────────────────
    // Persistence
    // ────────────────────────────────────────────────────────────────────

    /// Write the tree (header + node blocks) to `w`.
    pub fn write_to<W: std::io::Write>(&self, w: &mut W) -> Result<(), MapError> {
        io::write_tree(w, TREE_TYPE_ID, &self.tree)
    }

    /// Write the tree to a map file at `path`.
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<(), MapError> {
        io::write_tree_file(path, TREE_TYPE_ID, &self.tree)
    }

    /// Read a tree from `r`, rejecting files of a different tree type.
    pub fn read_from<R: BufRead>(r: &mut R) -> Result<Self, MapError> {
        let header = io::read_header(r)?;
        if header.type_id != TREE_TYPE_ID {
            return Err(MapError::UnknownTreeType(header.type_id));
        }
        let tree = io::read_tree_data(&header, r)?;
        Ok(Self {
            tree,
            fusion_gain: DEFAULT_FUSION_GAIN,
        })
    }

    /// Read a tree from a map file at `path`.
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self, MapError> {
        let mut r = BufReader::new(std::fs::File::open(path)?);
        Self::read_from(&mut r)
    }
}

/// Register the label tree with the process-wide tree-type registry.
///
/// Call once at process start before using
/// [`read_any`][voxmap_core::io::read_any] on label maps.
pub fn register_tree_types() {
    registry::register_tree_type(TREE_TYPE_ID, read_boxed);
}

fn read_boxed(header: &FileHeader, r: &mut dyn Read) -> Result<Box<dyn Any + Send>, MapError> {
    let tree: OccupancyTree<LabelNode> = io::read_tree_data(header, r)?;
    Ok(Box::new(LabelTree {
        tree,
        fusion_gain: DEFAULT_FUSION_GAIN,
    }))
}

// ────────────────────────────────────────────────────────────────────────────
// Internals
// ────────────────────────────────────────────────────────────────────────────

/// Authoritative write of the observation-carried fields; classification,
/// identity and certainty are not part of an observation and stay untouched.
fn apply_observation(label: &mut Label, obs: &LabelObservation) {
    label.r = obs.r;
    label.g = obs.g;
    label.b = obs.b;
    label.interest = Some(obs.interest);
    label.observation_resolution = obs.resolution;
    label.num_visits = obs.visits;
}

fn update_inner_recurs(node: &mut TreeNode<LabelNode>, depth: u8) {
    if !node.has_children() {
        return;
    }
    if depth < TREE_DEPTH {
        for i in 0..8 {
            if let Some(child) = node.child_mut(i) {
                update_inner_recurs(child, depth + 1);
            }
        }
    }
    // Occupancy and label are derived from the same child snapshot.
    node.update_occupancy_from_children();
    let aggregate = mean_child_label(node);
    node.data.set_label(aggregate);
}

fn prune_recurs(node: &mut TreeNode<LabelNode>, pruned: &mut usize) {
    if !node.has_children() {
        return;
    }
    for i in 0..8 {
        if let Some(child) = node.child_mut(i) {
            prune_recurs(child, pruned);
        }
    }
    if LabelTree::prune_node(node) {
        *pruned += 1;
    }
}

/// Unweighted mean over the existing children whose labels are set.
///
/// Color, interest and visit count are averaged; a missing interest score
/// contributes zero.  Classification has no meaningful mean and is decided
/// by majority vote (ties fall back to `NotLabeled`); object identity and
/// certainty are per-instance observations and reset to their defaults.
/// With no set-label child the default (unset) label is returned.
fn mean_child_label(node: &TreeNode<LabelNode>) -> Label {
    let mut r = 0.0;
    let mut g = 0.0;
    let mut b = 0.0;
    let mut interest = 0.0;
    let mut visits: u64 = 0;
    let mut class_votes = [0u32; 5];
    let mut count: u32 = 0;

    for i in 0..8 {
        let Some(child) = node.child(i) else { continue };
        let label = child.data.label();
        if !label.is_set() {
            continue;
        }
        r += label.r;
        g += label.g;
        b += label.b;
        interest += label.interest.unwrap_or(0.0);
        visits += label.num_visits as u64;
        class_votes[label.voxel_class.as_u8() as usize] += 1;
        count += 1;
    }

    if count == 0 {
        return Label::default();
    }

    let n = count as f64;
    Label {
        r: r / n,
        g: g / n,
        b: b / n,
        voxel_class: majority_class(&class_votes),
        interest: Some(interest / n),
        num_visits: (visits / count as u64) as u32,
        ..Label::default()
    }
}

fn majority_class(votes: &[u32; 5]) -> VoxelClass {
    let max = votes.iter().copied().max().unwrap_or(0);
    if max == 0 || votes.iter().filter(|&&v| v == max).count() > 1 {
        return VoxelClass::NotLabeled;
    }
    let winner = votes.iter().position(|&v| v == max).unwrap_or(4) as u8;
    VoxelClass::from_u8(winner).unwrap_or(VoxelClass::NotLabeled)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::VoxelType;
    use voxmap_core::NodeData;

    fn obs(rgb: f64, interest: f64, visits: u32) -> LabelObservation {
        LabelObservation {
            r: rgb,
            g: rgb,
            b: rgb,
            interest,
            resolution: 0.1,
            visits,
        }
    }

    /// Empty tree plus an in-bounds key (no node created yet).
    fn empty_tree_key() -> (LabelTree, VoxelKey) {
        let tree = LabelTree::new(0.1);
        let key = tree
            .coord_to_key_checked(Point3::new(0.55, 0.55, 0.55))
            .unwrap();
        (tree, key)
    }

    /// Tree with one existing node at the returned key.
    fn tree_with_node() -> (LabelTree, VoxelKey) {
        let (mut tree, key) = empty_tree_key();
        tree.update_node(key, true);
        (tree, key)
    }

    /// Walk to the direct parent of the leaf addressed by `key`.
    fn parent_of(tree: &LabelTree, key: VoxelKey) -> &TreeNode<LabelNode> {
        let mut node = tree.base().root().unwrap();
        for depth in 0..TREE_DEPTH - 1 {
            node = node.child(key.child_index(depth)).unwrap();
        }
        node
    }

    /// Key of the sibling voxel in octant `i` of `key`'s parent.
    fn sibling(key: VoxelKey, i: u16) -> VoxelKey {
        VoxelKey([
            (key.0[0] & !1) | (i & 1),
            (key.0[1] & !1) | ((i >> 1) & 1),
            (key.0[2] & !1) | ((i >> 2) & 1),
        ])
    }

    // ── Set ──────────────────────────────────────────────────────────────

    #[test]
    fn set_overwrites_prior_label() {
        let (mut tree, key) = tree_with_node();
        tree.set_node_label(key, &obs(100.0, 10.0, 4)).unwrap();
        tree.set_node_label(key, &obs(200.0, 20.0, 2)).unwrap();

        let label = tree.search(key).unwrap().data.label();
        assert_eq!(label.r, 200.0);
        assert_eq!(label.interest, Some(20.0));
        assert_eq!(label.num_visits, 2);
    }

    #[test]
    fn set_is_idempotent() {
        let (mut tree, key) = tree_with_node();
        let o = obs(100.0, 10.0, 4);
        tree.set_node_label(key, &o).unwrap();
        let once = tree.search(key).unwrap().data.label().clone();
        tree.set_node_label(key, &o).unwrap();
        let twice = tree.search(key).unwrap().data.label().clone();
        assert_eq!(once, twice);
    }

    #[test]
    fn set_preserves_classification_fields() {
        let (mut tree, key) = tree_with_node();
        {
            let node = tree.set_node_label(key, &obs(1.0, 1.0, 1)).unwrap();
            node.label_mut().voxel_class = VoxelClass::Table;
            node.label_mut().voxel_type = VoxelType::OccupiedInterestVisited;
            node.label_mut().object_id = Some(9);
        }
        tree.set_node_label(key, &obs(2.0, 2.0, 2)).unwrap();
        let label = tree.search(key).unwrap().data.label();
        assert_eq!(label.voxel_class, VoxelClass::Table);
        assert_eq!(label.voxel_type, VoxelType::OccupiedInterestVisited);
        assert_eq!(label.object_id, Some(9));
    }

    #[test]
    fn fusion_is_noop_on_missing_node() {
        let mut tree = LabelTree::new(0.1);
        let key = tree
            .coord_to_key_checked(Point3::new(1.0, 1.0, 1.0))
            .unwrap();
        let o = obs(10.0, 1.0, 1);
        assert!(tree.set_node_label(key, &o).is_none());
        assert!(tree.average_node_label(key, &o).is_none());
        assert!(tree.integrate_node_label(key, &o).is_none());
        assert_eq!(tree.num_nodes(), 0, "fusion must never create nodes");
    }

    // ── Average ──────────────────────────────────────────────────────────

    #[test]
    fn average_is_pairwise_mean_of_numeric_fields() {
        let (mut tree, key) = tree_with_node();
        tree.set_node_label(key, &obs(100.0, 10.0, 4)).unwrap();
        tree.average_node_label(key, &obs(200.0, 20.0, 2)).unwrap();

        let label = tree.search(key).unwrap().data.label();
        assert_eq!((label.r, label.g, label.b), (150.0, 150.0, 150.0));
        assert_eq!(label.interest, Some(15.0));
        assert_eq!(label.num_visits, 3);
    }

    #[test]
    fn average_on_unset_label_behaves_like_set() {
        let (mut tree, key) = tree_with_node();
        tree.average_node_label(key, &obs(80.0, 8.0, 2)).unwrap();
        let label = tree.search(key).unwrap().data.label();
        assert_eq!(label.r, 80.0);
        assert_eq!(label.interest, Some(8.0));
        assert_eq!(label.num_visits, 2);
    }

    #[test]
    fn average_truncates_visit_count() {
        let (mut tree, key) = tree_with_node();
        tree.set_node_label(key, &obs(0.0, 0.0, 3)).unwrap();
        tree.average_node_label(key, &obs(0.0, 0.0, 2)).unwrap();
        // (3 + 2) / 2 truncates to 2.
        assert_eq!(tree.search(key).unwrap().data.label().num_visits, 2);
    }

    // ── Integrate ────────────────────────────────────────────────────────

    #[test]
    fn integrate_weights_by_occupancy() {
        let (mut tree, key) = tree_with_node();
        // Pin the occupancy at p = 0.8.
        {
            let node = tree.set_node_label(key, &obs(100.0, 10.0, 4)).unwrap();
            node.set_log_odds((0.8f32 / 0.2).ln());
        }

        tree.integrate_node_label(key, &obs(200.0, 20.0, 2)).unwrap();

        let label = tree.search(key).unwrap().data.label();
        // old·0.8 + new·(0.99 − 0.8): interest 10·0.8 + 20·0.19 = 11.8.
        assert!((label.interest.unwrap() - 11.8).abs() < 1e-4);
        assert!((label.r - (100.0 * 0.8 + 200.0 * 0.19)).abs() < 1e-3);
        // visits: 4·0.8 + 2·0.19 = 3.58, truncated.
        assert_eq!(label.num_visits, 3);
    }

    #[test]
    fn integrate_on_unset_label_behaves_like_set() {
        let (mut tree, key) = tree_with_node();
        tree.integrate_node_label(key, &obs(60.0, 6.0, 1)).unwrap();
        let label = tree.search(key).unwrap().data.label();
        assert_eq!(label.r, 60.0);
        assert_eq!(label.interest, Some(6.0));
    }

    #[test]
    fn fusion_gain_is_configurable_and_clamped() {
        let mut tree = LabelTree::new(0.1);
        assert_eq!(tree.fusion_gain(), DEFAULT_FUSION_GAIN);
        tree.set_fusion_gain(0.5);
        assert_eq!(tree.fusion_gain(), 0.5);
        tree.set_fusion_gain(7.0);
        assert_eq!(tree.fusion_gain(), 1.0);

        // gain = 1 makes the blend the exact occupancy complement.
        let key = tree
            .coord_to_key_checked(Point3::new(0.55, 0.55, 0.55))
            .unwrap();
        tree.update_node(key, true);
        {
            let node = tree.set_node_label(key, &obs(0.0, 10.0, 1)).unwrap();
            node.set_log_odds(0.0); // p = 0.5
        }
        tree.integrate_node_label(key, &obs(0.0, 30.0, 1)).unwrap();
        let label = tree.search(key).unwrap().data.label();
        assert!((label.interest.unwrap() - 20.0).abs() < 1e-6);
    }

    // ── Coordinate forms & bounds ────────────────────────────────────────

    #[test]
    fn out_of_bounds_coordinate_is_noop_for_every_policy() {
        let (mut tree, _) = tree_with_node();
        let before = tree.num_nodes();
        let far = Point3::new(1e7, 0.0, 0.0);
        let o = obs(10.0, 1.0, 1);

        assert!(tree.set_node_label_at(far, &o).is_none());
        assert!(tree.average_node_label_at(far, &o).is_none());
        assert!(tree.integrate_node_label_at(far, &o).is_none());
        assert_eq!(tree.num_nodes(), before);
    }

    // ── Aggregation ──────────────────────────────────────────────────────

    #[test]
    fn aggregate_averages_set_children_only() {
        let mut parent: TreeNode<LabelNode> = TreeNode::new(LabelNode::default());
        for (i, interest) in [(0usize, 10.0), (1, 20.0), (2, 30.0)] {
            let child = parent.child_or_create(i);
            let label = child.data.label_mut();
            label.interest = Some(interest);
            label.r = interest;
            label.num_visits = 2;
        }
        parent.child_or_create(3); // exists, label unset

        let agg = mean_child_label(&parent);
        assert_eq!(agg.interest, Some(20.0));
        assert_eq!(agg.r, 20.0);
        assert_eq!(agg.num_visits, 2);
        assert!(agg.is_set());
    }

    #[test]
    fn aggregate_with_no_set_children_is_default() {
        let mut parent: TreeNode<LabelNode> = TreeNode::new(LabelNode::default());
        parent.child_or_create(0);
        parent.child_or_create(5);
        assert_eq!(mean_child_label(&parent), Label::default());
    }

    #[test]
    fn aggregate_class_is_majority_vote_with_tie_fallback() {
        let mut parent: TreeNode<LabelNode> = TreeNode::new(LabelNode::default());
        for (i, class) in [
            (0usize, VoxelClass::Wall),
            (1, VoxelClass::Wall),
            (2, VoxelClass::Floor),
        ] {
            let child = parent.child_or_create(i);
            child.data.label_mut().voxel_class = class;
            child.data.label_mut().num_visits = 1;
        }
        assert_eq!(mean_child_label(&parent).voxel_class, VoxelClass::Wall);

        // Tie between Wall and Floor falls back to NotLabeled.
        parent.child_or_create(2).data.label_mut().voxel_class = VoxelClass::Floor;
        let child = parent.child_or_create(3);
        child.data.label_mut().voxel_class = VoxelClass::Floor;
        child.data.label_mut().num_visits = 1;
        assert_eq!(mean_child_label(&parent).voxel_class, VoxelClass::NotLabeled);
    }

    #[test]
    fn update_inner_occupancy_derives_parent_label_and_occupancy() {
        let (mut tree, key) = tree_with_node();
        for (i, interest) in [(0u16, 10.0), (1, 20.0), (2, 30.0)] {
            let k = sibling(key, i);
            tree.update_node(k, true);
            tree.set_node_label(k, &obs(interest, interest, 2)).unwrap();
        }
        // A fourth sibling exists but carries no label.
        tree.update_node(sibling(key, 3), false);

        tree.update_inner_occupancy();

        let parent = parent_of(&tree, key);
        assert_eq!(parent.data.label().interest, Some(20.0));
        assert_eq!(parent.data.label().num_visits, 2);
        // Occupancy aggregates in the same pass: max child log-odds.
        let max_child = parent.max_child_log_odds().unwrap();
        assert_eq!(parent.data.log_odds(), max_child);
        assert!(max_child > 0.0);
    }

    #[test]
    fn update_inner_occupancy_leaves_leaf_labels_alone() {
        let (mut tree, key) = tree_with_node();
        tree.set_node_label(key, &obs(42.0, 7.0, 1)).unwrap();
        let before = tree.search(key).unwrap().data.label().clone();
        tree.update_inner_occupancy();
        assert_eq!(tree.search(key).unwrap().data.label(), &before);
    }

    #[test]
    fn aggregation_reverts_to_default_when_labels_vanish() {
        let (mut tree, key) = tree_with_node();
        tree.set_node_label(key, &obs(42.0, 7.0, 1)).unwrap();
        tree.update_inner_occupancy();
        assert!(parent_of(&tree, key).data.is_label_set());

        // Clear the only labeled leaf; the parent must revert to unset.
        if let Some(node) = tree.set_node_label(key, &obs(0.0, 0.0, 0)) {
            node.set_label(Label::default());
        }
        tree.update_inner_occupancy();
        assert!(!parent_of(&tree, key).data.is_label_set());
    }

    // ── Pruning ──────────────────────────────────────────────────────────

    #[test]
    fn label_divergence_never_blocks_collapse() {
        let (mut tree, key) = empty_tree_key();
        // Eight siblings, identical occupancy, wildly different labels.
        for i in 0..8u16 {
            let k = sibling(key, i);
            tree.update_node(k, true);
            tree.set_node_label(k, &obs(i as f64 * 30.0, i as f64, 1)).unwrap();
        }
        let before = tree.num_nodes();
        let pruned = tree.prune();
        assert!(pruned >= 1);
        assert_eq!(tree.num_nodes(), before - 8);
    }

    #[test]
    fn collapse_keeps_pre_collapse_aggregate_when_label_was_set() {
        let (mut tree, key) = empty_tree_key();
        for i in 0..8u16 {
            let k = sibling(key, i);
            tree.update_node(k, true);
            // Interests 0, 10, …, 70 → aggregate mean 35.
            tree.set_node_label(k, &obs(100.0, i as f64 * 10.0, 1)).unwrap();
        }
        tree.prune();

        // The collapsed parent survives as a leaf carrying the aggregate.
        let node = tree.search(key).unwrap();
        assert!(node.is_leaf());
        assert_eq!(node.data.label().interest, Some(35.0));
        assert_eq!(node.data.label().r, 100.0);
    }

    #[test]
    fn collapse_keeps_raw_child_value_when_label_was_unset() {
        let (mut tree, key) = empty_tree_key();
        for i in 0..8u16 {
            tree.update_node(sibling(key, i), true);
        }
        // No labels anywhere: child 0's (unset) payload survives untouched.
        tree.prune();
        let node = tree.search(key).unwrap();
        assert!(node.is_leaf());
        assert_eq!(node.data.label(), &Label::default());
    }

    #[test]
    fn update_after_collapse_keeps_sibling_labels() {
        let (mut tree, key) = empty_tree_key();
        for i in 0..8u16 {
            let k = sibling(key, i);
            tree.update_node(k, true);
            tree.set_node_label(k, &obs(100.0, 10.0, 1)).unwrap();
        }
        assert!(tree.prune() >= 1);

        // A new observation inside the collapsed region re-expands the
        // covering leaf; its label survives in the untouched siblings.
        tree.update_node(sibling(key, 0), true);

        let kept = tree.search(sibling(key, 1)).unwrap();
        assert!((kept.data.log_odds() - 0.85).abs() < 1e-6);
        assert_eq!(kept.data.label().interest, Some(10.0));
        assert_eq!(kept.data.label().r, 100.0);
    }

    #[test]
    fn incomplete_sibling_set_is_not_pruned() {
        let (mut tree, key) = empty_tree_key();
        for i in 0..7u16 {
            tree.update_node(sibling(key, i), true);
        }
        assert_eq!(tree.prune(), 0);
    }

    // ── Persistence ──────────────────────────────────────────────────────

    fn labeled_sample() -> LabelTree {
        let mut tree = LabelTree::new(0.05);
        for (p, interest) in [
            (Point3::new(0.1, 0.2, 0.3), 5.0),
            (Point3::new(-1.0, 0.5, 2.0), 9.5),
            (Point3::new(3.0, -2.0, 0.0), 0.0),
        ] {
            tree.update_node_at(p, true).unwrap();
            tree.set_node_label_at(p, &obs(interest * 10.0, interest, 1)).unwrap();
        }
        tree.update_inner_occupancy();
        tree
    }

    #[test]
    fn file_roundtrip_reproduces_every_label_bit() {
        let tree = labeled_sample();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("semantic.vm");
        tree.write_file(&path).unwrap();

        let back = LabelTree::read_file(&path).unwrap();
        assert_eq!(back.num_nodes(), tree.num_nodes());
        assert!((back.resolution() - tree.resolution()).abs() < 1e-12);
        assert_eq!(back.base().root(), tree.base().root());
    }

    #[test]
    fn read_rejects_foreign_tree_type() {
        let tree = labeled_sample();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foreign.vm");
        io::write_tree_file(&path, "SomeOtherTree", tree.base()).unwrap();
        assert!(matches!(
            LabelTree::read_file(&path),
            Err(MapError::UnknownTreeType(_))
        ));
    }

    #[test]
    fn registry_dispatches_label_maps() {
        register_tree_types();
        assert!(registry::is_registered(TREE_TYPE_ID));

        let tree = labeled_sample();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispatch.vm");
        tree.write_file(&path).unwrap();

        let boxed = io::read_any(&path).unwrap();
        let back = boxed
            .downcast::<LabelTree>()
            .expect("label map must decode to a LabelTree");
        assert_eq!(back.num_nodes(), tree.num_nodes());
    }
}
