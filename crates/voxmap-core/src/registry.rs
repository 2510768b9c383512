//! Process-wide tree-type registry.
//!
//! Persisted map files name their tree type in the header; the registry
//! maps that name to the reader that can decode the node blocks.  Callers
//! register their tree types explicitly once at process start (each tree
//! crate ships a `register_tree_types()` helper), rather than relying on
//! static-initialisation side effects.
//!
//! Registering the same name twice replaces the previous reader, matching
//! replace-on-register semantics throughout the stack.

use std::any::Any;
use std::collections::HashMap;
use std::io::Read;
use std::sync::{OnceLock, RwLock};

use crate::error::MapError;
use crate::io::FileHeader;

/// Typed reader for one tree type: decodes the node blocks following a
/// parsed header and returns the concrete tree, type-erased.
pub type ReadFn = fn(&FileHeader, &mut dyn Read) -> Result<Box<dyn Any + Send>, MapError>;

fn table() -> &'static RwLock<HashMap<String, ReadFn>> {
    static TABLE: OnceLock<RwLock<HashMap<String, ReadFn>>> = OnceLock::new();
    TABLE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a reader for the given tree type name.  Any previously
/// registered reader with the same name is replaced.
pub fn register_tree_type(type_id: &str, read: ReadFn) {
    let mut table = table().write().unwrap_or_else(|e| e.into_inner());
    table.insert(type_id.to_string(), read);
}

/// True when a reader is registered for the given tree type name.
pub fn is_registered(type_id: &str) -> bool {
    let table = table().read().unwrap_or_else(|e| e.into_inner());
    table.contains_key(type_id)
}

/// Look up the reader for the given tree type name.
pub fn reader_for(type_id: &str) -> Option<ReadFn> {
    let table = table().read().unwrap_or_else(|e| e.into_inner());
    table.get(type_id).copied()
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{self, read_tree_data};
    use crate::key::Point3;
    use crate::node::OccupancyData;
    use crate::tree::OccupancyTree;

    fn read_occupancy(
        header: &FileHeader,
        r: &mut dyn Read,
    ) -> Result<Box<dyn Any + Send>, MapError> {
        let tree: OccupancyTree<OccupancyData> = read_tree_data(header, r)?;
        Ok(Box::new(tree))
    }

    #[test]
    fn unregistered_type_is_unknown() {
        assert!(!is_registered("NeverRegistered"));
        assert!(reader_for("NeverRegistered").is_none());
    }

    #[test]
    fn registered_reader_decodes_through_read_any() {
        register_tree_type("OccupancyTree", read_occupancy);
        assert!(is_registered("OccupancyTree"));

        let mut tree: OccupancyTree<OccupancyData> = OccupancyTree::new(0.1);
        tree.update_node_at(Point3::new(0.5, 0.5, 0.5), true).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.vm");
        io::write_tree_file(&path, "OccupancyTree", &tree).unwrap();

        let boxed = io::read_any(&path).unwrap();
        let back = boxed
            .downcast::<OccupancyTree<OccupancyData>>()
            .expect("registered reader must yield its own tree type");
        assert_eq!(back.num_nodes(), tree.num_nodes());
    }
}
