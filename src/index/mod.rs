//! Index Module
//!
//! Key → position maps. The engine keeps one per shard and picks the shard
//! for a key through the consistent-hash ring in [`router`].
//!
//! ## Backends
//! - `BTree`: `BTreeMap` behind a `RwLock`, general purpose
//! - `AdaptiveRadixTree`: ART behind a `RwLock`, compact for string-like keys
//! - `BPlusTree`: sled tree on disk, survives restarts without log replay
//!
//! All backends return the previous position on overwrite and delete so the
//! engine can account reclaimable space.

mod art;
mod bptree;
mod btree;
mod router;

use std::path::Path;

use crate::config::IndexType;
use crate::data::RecordPos;
use crate::error::Result;

pub use art::{AdaptiveRadixTree, ArtTree};
pub use bptree::{BPlusTree, BPTREE_INDEX_DIR};
pub use btree::BTree;
pub use router::HashRing;

/// Contract shared by every index backend
pub trait Indexer: Send + Sync {
    /// Insert or overwrite, returning the previous position
    fn put(&self, key: Vec<u8>, pos: RecordPos) -> Result<Option<RecordPos>>;

    /// Look up a key
    fn get(&self, key: &[u8]) -> Result<Option<RecordPos>>;

    /// Remove a key, returning the position it had
    fn delete(&self, key: &[u8]) -> Result<Option<RecordPos>>;

    /// Ordered iterator over a snapshot of the index
    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>>;

    /// Number of keys
    fn size(&self) -> Result<usize>;

    /// Make every update so far durable. A no-op for in-memory backends.
    fn flush(&self) -> Result<()>;

    /// Release resources; flushes first where the backend persists
    fn close(&self) -> Result<()>;
}

/// Cursor over one index shard
pub trait IndexIterator: Send {
    /// Go back to the first entry
    fn rewind(&mut self);

    /// Position at the first key `>= key` (or `<= key` when reversed)
    fn seek(&mut self, key: &[u8]);

    /// Advance to the next entry
    fn next(&mut self);

    /// Whether the cursor points at an entry
    fn valid(&self) -> bool;

    /// Key at the cursor. Only call while `valid()`.
    fn key(&self) -> &[u8];

    /// Position at the cursor. Only call while `valid()`.
    fn value(&self) -> RecordPos;

    /// Drop the snapshot
    fn close(&mut self);
}

/// Build one index per shard
///
/// `sync_writes` makes the durable backend flush on every update.
pub fn new_indexers(
    index_type: IndexType,
    dir: &Path,
    shards: usize,
    sync_writes: bool,
) -> Result<Vec<Box<dyn Indexer>>> {
    let mut indexes: Vec<Box<dyn Indexer>> = Vec::with_capacity(shards);
    match index_type {
        IndexType::BTree => {
            for _ in 0..shards {
                indexes.push(Box::new(BTree::new()));
            }
        }
        IndexType::Art => {
            for _ in 0..shards {
                indexes.push(Box::new(AdaptiveRadixTree::new()));
            }
        }
        IndexType::BPlusTree => {
            let db = sled::open(dir.join(BPTREE_INDEX_DIR))?;
            for shard in 0..shards {
                indexes.push(Box::new(BPlusTree::open(&db, shard, sync_writes)?));
            }
        }
    }
    Ok(indexes)
}

// =============================================================================
// Snapshot Iterator
// =============================================================================

/// Iterator over a sorted copy of a shard's entries
///
/// Every backend hands out one of these, so iteration never holds a shard lock.
pub struct SnapshotIterator {
    items: Vec<(Vec<u8>, RecordPos)>,
    current: usize,
    reverse: bool,
}

impl SnapshotIterator {
    /// `items` must be in ascending key order
    pub fn new(mut items: Vec<(Vec<u8>, RecordPos)>, reverse: bool) -> Self {
        if reverse {
            items.reverse();
        }
        Self {
            items,
            current: 0,
            reverse,
        }
    }
}

impl IndexIterator for SnapshotIterator {
    fn rewind(&mut self) {
        self.current = 0;
    }

    fn seek(&mut self, key: &[u8]) {
        self.current = if self.reverse {
            self.items.partition_point(|(k, _)| k.as_slice() > key)
        } else {
            self.items.partition_point(|(k, _)| k.as_slice() < key)
        };
    }

    fn next(&mut self) {
        self.current += 1;
    }

    fn valid(&self) -> bool {
        self.current < self.items.len()
    }

    fn key(&self) -> &[u8] {
        &self.items[self.current].0
    }

    fn value(&self) -> RecordPos {
        self.items[self.current].1
    }

    fn close(&mut self) {
        self.items.clear();
        self.current = 0;
    }
}
