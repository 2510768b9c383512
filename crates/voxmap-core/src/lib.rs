//! `voxmap-core` – generic sparse occupancy octree.
//!
//! The structural base every payload-bearing map variant builds on: discrete
//! voxel addressing, generic tree nodes with a payload capability interface,
//! log-odds occupancy integration, persistence framing and the process-wide
//! tree-type registry.
//!
//! # Modules
//!
//! - [`key`] – [`Point3`][key::Point3] / [`VoxelKey`][key::VoxelKey]: checked
//!   coordinate↔key conversion for the 16-level key space.
//! - [`node`] – [`TreeNode`][node::TreeNode] and the
//!   [`NodeData`][node::NodeData] capability trait; child management,
//!   occupancy aggregation, occupancy-only collapsibility.
//! - [`tree`] – [`OccupancyTree`][tree::OccupancyTree]: search, log-odds
//!   occupancy updates, leaf iteration, pruning.
//! - [`io`] – binary map persistence framing and type-dispatched reading.
//! - [`registry`] – explicit tree-type registry, initialised once at
//!   process start.
//! - [`error`] – [`MapError`][error::MapError] persistence error taxonomy.

pub mod error;
pub mod io;
pub mod key;
pub mod node;
pub mod registry;
pub mod tree;

pub use error::MapError;
pub use key::{Point3, VoxelKey};
pub use node::{NodeData, OccupancyData, TreeNode};
pub use tree::OccupancyTree;
