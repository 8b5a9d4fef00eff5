//! BTreeMap-backed index

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::data::RecordPos;
use crate::error::Result;

use super::{IndexIterator, Indexer, SnapshotIterator};

/// In-memory ordered index
///
/// ## Concurrency:
/// - `RwLock`: concurrent lookups, exclusive updates
pub struct BTree {
    tree: RwLock<BTreeMap<Vec<u8>, RecordPos>>,
}

impl BTree {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for BTree {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer for BTree {
    fn put(&self, key: Vec<u8>, pos: RecordPos) -> Result<Option<RecordPos>> {
        Ok(self.tree.write().insert(key, pos))
    }

    fn get(&self, key: &[u8]) -> Result<Option<RecordPos>> {
        Ok(self.tree.read().get(key).copied())
    }

    fn delete(&self, key: &[u8]) -> Result<Option<RecordPos>> {
        Ok(self.tree.write().remove(key))
    }

    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>> {
        let items = self
            .tree
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        Ok(Box::new(SnapshotIterator::new(items, reverse)))
    }

    fn size(&self) -> Result<usize> {
        Ok(self.tree.read().len())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
