//! Tree nodes and the node payload capability interface.
//!
//! [`TreeNode`] is generic over its payload so the same child-management,
//! occupancy-aggregation and persistence machinery serves any node variant.
//! A payload implements [`NodeData`]: occupancy read/write plus a
//! fixed-layout binary encoding of itself.  [`OccupancyData`] is the plain
//! occupancy-only payload; richer payloads (semantic labels, colors) live in
//! their own crates.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::MapError;

// ────────────────────────────────────────────────────────────────────────────
// NodeData
// ────────────────────────────────────────────────────────────────────────────

/// Capability interface every node payload must provide.
///
/// Occupancy is stored as log-odds; the tree only ever compares and
/// aggregates it through this interface, so payload-bearing node variants
/// reuse the generic tree machinery unchanged.
pub trait NodeData: Clone + Default + PartialEq {
    /// Occupancy log-odds of this voxel.
    fn log_odds(&self) -> f32;

    /// Overwrite the occupancy log-odds.
    fn set_log_odds(&mut self, value: f32);

    /// Write the payload as a fixed-layout binary block.
    fn write_payload<W: Write>(&self, w: &mut W) -> std::io::Result<()>;

    /// Read a payload block previously written by [`write_payload`].
    ///
    /// `R` is `?Sized` so type-erased readers (`&mut dyn Read`, as handed
    /// out by the tree-type registry) decode through the same path.
    ///
    /// [`write_payload`]: NodeData::write_payload
    fn read_payload<R: Read + ?Sized>(r: &mut R) -> Result<Self, MapError>;
}

/// Occupancy-only node payload (a bare log-odds value).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OccupancyData {
    log_odds: f32,
}

impl NodeData for OccupancyData {
    fn log_odds(&self) -> f32 {
        self.log_odds
    }

    fn set_log_odds(&mut self, value: f32) {
        self.log_odds = value;
    }

    fn write_payload<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_f32::<LittleEndian>(self.log_odds)
    }

    fn read_payload<R: Read + ?Sized>(r: &mut R) -> Result<Self, MapError> {
        Ok(Self {
            log_odds: r.read_f32::<LittleEndian>()?,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TreeNode
// ────────────────────────────────────────────────────────────────────────────

/// One node of the octree: a payload plus up to eight owned children.
///
/// A node exclusively owns its children; dropping a node drops its entire
/// subtree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode<D> {
    pub data: D,
    children: Option<Box<[Option<TreeNode<D>>; 8]>>,
}

impl<D: NodeData> TreeNode<D> {
    pub fn new(data: D) -> Self {
        Self {
            data,
            children: None,
        }
    }

    /// True when this node has no allocated children.
    pub fn is_leaf(&self) -> bool {
        !self.has_children()
    }

    /// True when at least one child exists.
    pub fn has_children(&self) -> bool {
        match &self.children {
            Some(children) => children.iter().any(|c| c.is_some()),
            None => false,
        }
    }

    /// Child at octant `idx` (0–7), if it exists.
    pub fn child(&self, idx: usize) -> Option<&TreeNode<D>> {
        self.children.as_ref()?.get(idx)?.as_ref()
    }

    /// Mutable child at octant `idx` (0–7), if it exists.
    pub fn child_mut(&mut self, idx: usize) -> Option<&mut TreeNode<D>> {
        self.children.as_mut()?.get_mut(idx)?.as_mut()
    }

    /// Child at octant `idx`, created with a default payload when absent.
    pub fn child_or_create(&mut self, idx: usize) -> &mut TreeNode<D> {
        let children = self
            .children
            .get_or_insert_with(|| Box::new(std::array::from_fn(|_| None)));
        children[idx].get_or_insert_with(|| TreeNode::new(D::default()))
    }

    /// Push this node's payload down into all eight children, each created
    /// with a clone of it.  Inverse of [`prune`][Self::prune]: a collapsed
    /// covering leaf is expanded before anything below it is written, so no
    /// voxel under it falls back to a default payload.  Must only be called
    /// on a leaf; existing children would be dropped.
    pub fn expand(&mut self) {
        let data = self.data.clone();
        self.children = Some(Box::new(std::array::from_fn(|_| {
            Some(TreeNode::new(data.clone()))
        })));
    }

    /// Delete the child at octant `idx` and its whole subtree.
    pub fn delete_child(&mut self, idx: usize) {
        if let Some(children) = self.children.as_mut() {
            children[idx] = None;
        }
    }

    /// Drop all children (and their subtrees), turning this node into a leaf.
    pub fn remove_children(&mut self) {
        self.children = None;
    }

    /// Number of existing children (0–8).
    pub fn child_count(&self) -> usize {
        match &self.children {
            Some(children) => children.iter().filter(|c| c.is_some()).count(),
            None => 0,
        }
    }

    /// Bitmask of existing children; bit `i` set ⇔ octant `i` exists.
    pub fn child_mask(&self) -> u8 {
        let mut mask = 0u8;
        for i in 0..8 {
            if self.child(i).is_some() {
                mask |= 1 << i;
            }
        }
        mask
    }

    /// Maximum occupancy log-odds over the existing children.
    pub fn max_child_log_odds(&self) -> Option<f32> {
        let children = self.children.as_ref()?;
        children
            .iter()
            .flatten()
            .map(|c| c.data.log_odds())
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f32| a.max(v))))
    }

    /// Set this node's occupancy to the maximum of its children's.
    ///
    /// This is the standard occupancy aggregate for inner nodes: a parent is
    /// at least as occupied as its most occupied child.
    pub fn update_occupancy_from_children(&mut self) {
        if let Some(max) = self.max_child_log_odds() {
            self.data.set_log_odds(max);
        }
    }

    /// Occupancy-only collapsibility test: all eight children exist, none
    /// has children of its own, and all carry the same occupancy value.
    /// Payload divergence across children never blocks a collapse.
    pub fn is_collapsible(&self) -> bool {
        let Some(first) = self.child(0) else {
            return false;
        };
        if first.has_children() {
            return false;
        }
        for i in 1..8 {
            match self.child(i) {
                Some(c) if c.is_leaf() && c.data.log_odds() == first.data.log_odds() => {}
                _ => return false,
            }
        }
        true
    }

    /// Collapse this node when [`is_collapsible`][Self::is_collapsible]:
    /// take child 0's payload (all children carry equal occupancy) and drop
    /// the children.  Returns whether a collapse happened.
    pub fn prune(&mut self) -> bool {
        if !self.is_collapsible() {
            return false;
        }
        let first = match self.child(0) {
            Some(c) => c.data.clone(),
            None => return false,
        };
        self.data = first;
        self.children = None;
        true
    }

    /// Total number of nodes in this subtree, including this node.
    pub fn count_nodes(&self) -> usize {
        let mut n = 1;
        if let Some(children) = &self.children {
            for child in children.iter().flatten() {
                n += child.count_nodes();
            }
        }
        n
    }

    /// Number of leaves in this subtree.
    pub fn count_leaves(&self) -> usize {
        if self.is_leaf() {
            return 1;
        }
        let mut n = 0;
        if let Some(children) = &self.children {
            for child in children.iter().flatten() {
                n += child.count_leaves();
            }
        }
        n
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
