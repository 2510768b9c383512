//! Discrete voxel addressing.
//!
//! Maps continuous world coordinates onto the discrete key space of a
//! 16-level octree.  A [`VoxelKey`] addresses one voxel at the finest
//! resolution; truncating the low bits addresses the covering voxel at any
//! coarser depth.
//!
//! The key space is `[0, 65536)` per axis, centred on the world origin, so a
//! tree with resolution `r` covers the cube `[-32768·r, 32768·r)` on each
//! axis.  Conversions are *checked*: a coordinate outside that cube has no
//! key and the conversion reports the failure instead of wrapping.
//!
//! # Example
//!
//! ```rust
//! use voxmap_core::key::{coord_to_key_checked, key_to_coord, Point3};
//!
//! let res = 0.05;
//! let key = coord_to_key_checked(Point3::new(1.0, -2.0, 0.3), res).unwrap();
//!
//! // The voxel centre is within half a voxel of the query point.
//! let centre = key_to_coord(key, res);
//! assert!((centre.x - 1.0).abs() <= res as f32 / 2.0 + 1e-6);
//!
//! // Coordinates outside the mapped cube have no key.
//! assert!(coord_to_key_checked(Point3::new(1e7, 0.0, 0.0), res).is_none());
//! ```

/// Number of subdivision levels of the tree; keys carry one bit per level.
pub const TREE_DEPTH: u8 = 16;

/// Key value of the world origin (centre of the key space).
pub const KEY_OFFSET: i64 = 32768;

/// Exclusive upper bound of the per-axis key space.
const KEY_SPAN: i64 = 65536;

// ────────────────────────────────────────────────────────────────────────────
// Point3
// ────────────────────────────────────────────────────────────────────────────

/// A point in 3-D world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    /// Create a new point.
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// VoxelKey
// ────────────────────────────────────────────────────────────────────────────

/// Discrete address of one voxel at the finest tree resolution.
///
/// One `u16` per axis; bit `15 − depth` of each axis selects the octant at
/// that depth, so walking from the root to a leaf reads the key from the
/// most significant bit downwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoxelKey(pub [u16; 3]);

impl VoxelKey {
    /// Octant index (0–7) taken by this key at the given depth below the
    /// root (`depth` 0 selects the root's child).
    pub fn child_index(&self, depth: u8) -> usize {
        let bit = TREE_DEPTH - 1 - depth;
        let x = (self.0[0] >> bit) & 1;
        let y = (self.0[1] >> bit) & 1;
        let z = (self.0[2] >> bit) & 1;
        (x | (y << 1) | (z << 2)) as usize
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Checked conversions
// ────────────────────────────────────────────────────────────────────────────

fn coord_to_key_axis(v: f32, resolution: f64) -> Option<u16> {
    let cell = (v as f64 / resolution).floor() as i64 + KEY_OFFSET;
    if (0..KEY_SPAN).contains(&cell) {
        Some(cell as u16)
    } else {
        None
    }
}

/// Convert a world coordinate to its voxel key.
///
/// Returns `None` when any axis falls outside the cube covered by the tree.
pub fn coord_to_key_checked(p: Point3, resolution: f64) -> Option<VoxelKey> {
    Some(VoxelKey([
        coord_to_key_axis(p.x, resolution)?,
        coord_to_key_axis(p.y, resolution)?,
        coord_to_key_axis(p.z, resolution)?,
    ]))
}

/// Centre coordinate of the voxel addressed by `key`.
pub fn key_to_coord(key: VoxelKey, resolution: f64) -> Point3 {
    let axis = |k: u16| (((k as i64 - KEY_OFFSET) as f64 + 0.5) * resolution) as f32;
    Point3::new(axis(key.0[0]), axis(key.0[1]), axis(key.0[2]))
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
