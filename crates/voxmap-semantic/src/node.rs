//! Label-bearing node payload.
//!
//! [`LabelNode`] pairs the occupancy log-odds with exactly one [`Label`] and
//! plugs into the generic tree machinery through the
//! [`NodeData`][voxmap_core::NodeData] capability interface.  Persistence
//! writes the occupancy value first, then the whole label block, so
//! read-back reproduces both bit-identically.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use voxmap_core::{MapError, NodeData};

use crate::label::Label;

/// Node payload of a [`LabelTree`][crate::tree::LabelTree]: occupancy
/// log-odds plus one semantic label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelNode {
    log_odds: f32,
    label: Label,
}

impl LabelNode {
    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn label_mut(&mut self) -> &mut Label {
        &mut self.label
    }

    pub fn set_label(&mut self, label: Label) {
        self.label = label;
    }

    /// See [`Label::is_set`].
    pub fn is_label_set(&self) -> bool {
        self.label.is_set()
    }

    /// Occupancy probability (logistic of the stored log-odds).
    pub fn occupancy(&self) -> f64 {
        1.0 / (1.0 + (-self.log_odds as f64).exp())
    }
}

impl NodeData for LabelNode {
    fn log_odds(&self) -> f32 {
        self.log_odds
    }

    fn set_log_odds(&mut self, value: f32) {
        self.log_odds = value;
    }

    fn write_payload<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_f32::<LittleEndian>(self.log_odds)?;
        self.label.write_block(w)
    }

    fn read_payload<R: Read + ?Sized>(r: &mut R) -> Result<Self, MapError> {
        let log_odds = r.read_f32::<LittleEndian>()?;
        let label = Label::read_block(r)?;
        Ok(Self { log_odds, label })
    }
}
