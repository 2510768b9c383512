//! Binary map persistence framing.
//!
//! A persisted map is a short text header followed by the tree's nodes as
//! fixed-layout binary blocks:
//!
//! ```text
//! # voxmap octree file
//! id <tree type name>
//! res <leaf resolution, metres>
//! size <node count>
//! data
//! <node blocks…>
//! ```
//!
//! Each node block is the payload's own encoding (see
//! [`NodeData`][crate::node::NodeData]) followed by one child-mask byte;
//! children present in the mask follow recursively in octant order.  The
//! payload layout carries no version tag, so changing it is a breaking
//! change to persisted maps.
//!
//! [`read_any`] dispatches a file to the typed reader registered for its
//! header id (see [`registry`][crate::registry]).

use std::any::Any;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{ReadBytesExt, WriteBytesExt};
use tracing::warn;

use crate::error::MapError;
use crate::node::{NodeData, TreeNode};
use crate::registry;
use crate::tree::OccupancyTree;

/// First line of every persisted map.
pub const FILE_MAGIC: &str = "# voxmap octree file";

/// Parsed map file header.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHeader {
    pub type_id: String,
    pub resolution: f64,
    pub node_count: usize,
}

// ────────────────────────────────────────────────────────────────────────────
// Writing
// ────────────────────────────────────────────────────────────────────────────

/// Write a whole tree (header + node blocks) to `w`.
pub fn write_tree<D: NodeData, W: Write>(
    w: &mut W,
    type_id: &str,
    tree: &OccupancyTree<D>,
) -> Result<(), MapError> {
    writeln!(w, "{FILE_MAGIC}")?;
    writeln!(w, "id {type_id}")?;
    writeln!(w, "res {}", tree.resolution())?;
    writeln!(w, "size {}", tree.num_nodes())?;
    writeln!(w, "data")?;
    if let Some(root) = tree.root() {
        write_node(w, root)?;
    }
    Ok(())
}

/// Write a whole tree to a file at `path`.
pub fn write_tree_file<D: NodeData>(
    path: impl AsRef<Path>,
    type_id: &str,
    tree: &OccupancyTree<D>,
) -> Result<(), MapError> {
    let mut w = BufWriter::new(File::create(path)?);
    write_tree(&mut w, type_id, tree)?;
    w.flush()?;
    Ok(())
}

/// Write one node block: payload, child mask, then existing children in
/// octant order.
pub fn write_node<D: NodeData, W: Write>(w: &mut W, node: &TreeNode<D>) -> Result<(), MapError> {
    node.data.write_payload(w)?;
    w.write_u8(node.child_mask())?;
    for i in 0..8 {
        if let Some(child) = node.child(i) {
            write_node(w, child)?;
        }
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Reading
// ────────────────────────────────────────────────────────────────────────────

/// Parse the text header, leaving `r` positioned at the first node block.
pub fn read_header<R: BufRead>(r: &mut R) -> Result<FileHeader, MapError> {
    let magic = read_line(r)?;
    if magic.trim() != FILE_MAGIC {
        return Err(MapError::MalformedHeader(format!(
            "bad magic line '{}'",
            magic.trim()
        )));
    }

    let mut type_id = None;
    let mut resolution = None;
    let mut node_count = None;
    loop {
        let line = read_line(r)?;
        let line = line.trim();
        if line == "data" {
            break;
        }
        match line.split_once(' ') {
            Some(("id", v)) => type_id = Some(v.to_string()),
            Some(("res", v)) => {
                resolution = Some(v.parse::<f64>().map_err(|_| {
                    MapError::MalformedHeader(format!("bad resolution '{v}'"))
                })?);
            }
            Some(("size", v)) => {
                node_count = Some(v.parse::<usize>().map_err(|_| {
                    MapError::MalformedHeader(format!("bad node count '{v}'"))
                })?);
            }
            _ => {
                return Err(MapError::MalformedHeader(format!(
                    "unrecognised header line '{line}'"
                )));
            }
        }
    }

    Ok(FileHeader {
        type_id: type_id
            .ok_or_else(|| MapError::MalformedHeader("missing 'id' line".into()))?,
        resolution: resolution
            .ok_or_else(|| MapError::MalformedHeader("missing 'res' line".into()))?,
        node_count: node_count
            .ok_or_else(|| MapError::MalformedHeader("missing 'size' line".into()))?,
    })
}

fn read_line<R: BufRead>(r: &mut R) -> Result<String, MapError> {
    let mut line = String::new();
    if r.read_line(&mut line)? == 0 {
        return Err(MapError::MalformedHeader(
            "unexpected end of file in header".into(),
        ));
    }
    Ok(line)
}

/// Read the node blocks following a parsed header into a typed tree.
pub fn read_tree_data<D: NodeData, R: Read + ?Sized>(
    header: &FileHeader,
    r: &mut R,
) -> Result<OccupancyTree<D>, MapError> {
    let root = if header.node_count > 0 {
        Some(read_node(r)?)
    } else {
        None
    };
    let tree = OccupancyTree::from_parts(header.resolution, root);
    let read = tree.num_nodes();
    if read != header.node_count {
        warn!(
            expected = header.node_count,
            read, "node count in header does not match data"
        );
    }
    Ok(tree)
}

/// Read one node block (payload, child mask, children) recursively.
pub fn read_node<D: NodeData, R: Read + ?Sized>(r: &mut R) -> Result<TreeNode<D>, MapError> {
    let data = D::read_payload(r)?;
    let mask = r.read_u8()?;
    let mut node = TreeNode::new(data);
    for i in 0..8 {
        if mask & (1 << i) != 0 {
            *node.child_or_create(i) = read_node(r)?;
        }
    }
    Ok(node)
}

/// Read a map file of any registered tree type.
///
/// The header's `id` selects the reader from the process-wide
/// [`registry`][crate::registry]; the result is returned type-erased and can
/// be downcast to the concrete tree type.
pub fn read_any(path: impl AsRef<Path>) -> Result<Box<dyn Any + Send>, MapError> {
    let mut r = BufReader::new(File::open(path)?);
    let header = read_header(&mut r)?;
    let read = registry::reader_for(&header.type_id)
        .ok_or_else(|| MapError::UnknownTreeType(header.type_id.clone()))?;
    read(&header, &mut r)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
