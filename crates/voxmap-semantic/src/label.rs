//! Per-voxel semantic label.
//!
//! A [`Label`] is the value attached to each node of a [`LabelTree`]: color,
//! exploration state, semantic class, tracked-object identity and the
//! bookkeeping of how the value was observed (certainty, interest score,
//! observation resolution, visit count).  Labels have value semantics and no
//! identity beyond their owning node.
//!
//! Equality is exact and field-wise: labels are written, not measured, at
//! bit-identical granularity within one update, so no epsilon comparison is
//! applied.
//!
//! [`LabelTree`]: crate::tree::LabelTree

use std::fmt;
use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use voxmap_core::MapError;

/// Serialized marker for an unassigned [`Label::object_id`].
const OBJECT_ID_UNASSIGNED: u8 = 0xFF;

// ────────────────────────────────────────────────────────────────────────────
// Enums
// ────────────────────────────────────────────────────────────────────────────

/// Occupancy/interest state of a voxel as seen by the exploration planner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum VoxelType {
    Free = 0,
    #[default]
    Unknown = 1,
    OccupiedInterestNotVisited = 2,
    OccupiedInterestVisited = 3,
    OccupiedNotInterest = 4,
}

impl VoxelType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Free),
            1 => Some(Self::Unknown),
            2 => Some(Self::OccupiedInterestNotVisited),
            3 => Some(Self::OccupiedInterestVisited),
            4 => Some(Self::OccupiedNotInterest),
            _ => None,
        }
    }
}

/// Semantic category of a voxel.  `NotLabeled` is the default for voxels no
/// classifier has touched yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum VoxelClass {
    Floor = 0,
    Wall = 1,
    Table = 2,
    Chair = 3,
    #[default]
    NotLabeled = 4,
}

impl VoxelClass {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Floor),
            1 => Some(Self::Wall),
            2 => Some(Self::Table),
            3 => Some(Self::Chair),
            4 => Some(Self::NotLabeled),
            _ => None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Label
// ────────────────────────────────────────────────────────────────────────────

/// Semantic payload of one voxel.
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    /// Red channel (0–255 range, stored as floating point so fused averages
    /// keep sub-integer precision).
    pub r: f64,
    /// Green channel.
    pub g: f64,
    /// Blue channel.
    pub b: f64,
    /// Exploration state.
    pub voxel_type: VoxelType,
    /// Semantic category.
    pub voxel_class: VoxelClass,
    /// Tracked-object instance, `None` when unassigned.  Ids 0–254 are
    /// valid; 255 is reserved as the serialized unassigned marker.
    pub object_id: Option<u8>,
    /// Classification confidence in `[0, 1]`.
    pub object_certainty: f64,
    /// Exploration-priority score; `None` until the first observation is
    /// fused.  The explicit option makes "unset" unambiguous instead of
    /// overloading a magic score value.
    pub interest: Option<f64>,
    /// Spatial resolution of the most recently fused observation (metres).
    pub observation_resolution: f64,
    /// Number of fused observations contributing to the current value.
    pub num_visits: u32,
}

impl Default for Label {
    fn default() -> Self {
        Self {
            r: 255.0,
            g: 255.0,
            b: 255.0,
            voxel_type: VoxelType::default(),
            voxel_class: VoxelClass::default(),
            object_id: None,
            object_certainty: 0.0,
            interest: None,
            observation_resolution: 0.0,
            num_visits: 0,
        }
    }
}

impl Label {
    /// Has any observation been fused into this label?
    ///
    /// Pure-white defaults are indistinguishable from an unlabeled voxel by
    /// color alone, so "set" is defined by the observation bookkeeping: an
    /// interest score exists or at least one visit was recorded.
    pub fn is_set(&self) -> bool {
        self.interest.is_some() || self.num_visits > 0
    }

    // ────────────────────────────────────────────────────────────────────
    // Fixed-layout binary block
    // ────────────────────────────────────────────────────────────────────

    /// Write the label as its fixed-layout little-endian block.
    ///
    /// Field order: r, g, b (f64 each), voxel type (u8), voxel class (u8),
    /// object id (u8, 0xFF = unassigned), certainty (f64), interest-set
    /// flag (u8), interest (f64, zero when unset), observation resolution
    /// (f64), visit count (u32).  All fields are written, consulted by the
    /// public API or not, so read-back is bit-identical.
    pub fn write_block<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_f64::<LittleEndian>(self.r)?;
        w.write_f64::<LittleEndian>(self.g)?;
        w.write_f64::<LittleEndian>(self.b)?;
        w.write_u8(self.voxel_type.as_u8())?;
        w.write_u8(self.voxel_class.as_u8())?;
        w.write_u8(self.object_id.unwrap_or(OBJECT_ID_UNASSIGNED))?;
        w.write_f64::<LittleEndian>(self.object_certainty)?;
        w.write_u8(self.interest.is_some() as u8)?;
        w.write_f64::<LittleEndian>(self.interest.unwrap_or(0.0))?;
        w.write_f64::<LittleEndian>(self.observation_resolution)?;
        w.write_u32::<LittleEndian>(self.num_visits)?;
        Ok(())
    }

    /// Read a block previously written by [`write_block`][Self::write_block].
    ///
    /// Out-of-range enum discriminants and flag bytes are rejected as
    /// [`MapError::CorruptNode`]; numeric fields are taken as-is without
    /// range validation.
    pub fn read_block<R: Read + ?Sized>(r: &mut R) -> Result<Self, MapError> {
        let red = r.read_f64::<LittleEndian>()?;
        let green = r.read_f64::<LittleEndian>()?;
        let blue = r.read_f64::<LittleEndian>()?;
        let voxel_type = r.read_u8()?;
        let voxel_type = VoxelType::from_u8(voxel_type)
            .ok_or_else(|| MapError::CorruptNode(format!("bad voxel type {voxel_type}")))?;
        let voxel_class = r.read_u8()?;
        let voxel_class = VoxelClass::from_u8(voxel_class)
            .ok_or_else(|| MapError::CorruptNode(format!("bad voxel class {voxel_class}")))?;
        let object_id = match r.read_u8()? {
            OBJECT_ID_UNASSIGNED => None,
            id => Some(id),
        };
        let object_certainty = r.read_f64::<LittleEndian>()?;
        let interest_set = match r.read_u8()? {
            0 => false,
            1 => true,
            v => return Err(MapError::CorruptNode(format!("bad interest flag {v}"))),
        };
        let interest_value = r.read_f64::<LittleEndian>()?;
        let observation_resolution = r.read_f64::<LittleEndian>()?;
        let num_visits = r.read_u32::<LittleEndian>()?;

        Ok(Self {
            r: red,
            g: green,
            b: blue,
            voxel_type,
            voxel_class,
            object_id,
            object_certainty,
            interest: interest_set.then_some(interest_value),
            observation_resolution,
            num_visits,
        })
    }
}

/// User-friendly `(interest r g b visits)` rendering.
impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.interest {
            Some(i) => write!(f, "({i} {} {} {} {})", self.r, self.g, self.b, self.num_visits),
            None => write!(f, "(unset {} {} {} {})", self.r, self.g, self.b, self.num_visits),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
