//! `voxmap-semantic` – semantic label layer for the occupancy octree.
//!
//! Attaches a per-voxel semantic [`Label`] (color, class, interest score,
//! certainty, visit count, observation resolution) to the generic occupancy
//! tree from `voxmap-core` and defines how repeated, noisy observations are
//! fused over time and propagated from leaves to ancestors.
//!
//! # Modules
//!
//! - [`label`] – [`Label`]: the per-voxel value type, its set/unset
//!   semantics and fixed-layout binary block.
//! - [`node`] – [`LabelNode`]: occupancy log-odds plus one label, plugged
//!   into the base tree's payload interface.
//! - [`tree`] – [`LabelTree`]: fusion policies (set / average / integrate),
//!   bottom-up label aggregation, label-aware pruning and map persistence.
//! - [`histogram`] – diagnostic per-channel histograms over occupied
//!   leaves, rendered via an external `gnuplot` process.

pub mod histogram;
pub mod label;
pub mod node;
pub mod tree;

pub use label::{Label, VoxelClass, VoxelType};
pub use node::LabelNode;
pub use tree::{DEFAULT_FUSION_GAIN, LabelObservation, LabelTree, TREE_TYPE_ID, register_tree_types};
