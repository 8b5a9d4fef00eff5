//! Disk-resident index backed by sled
//!
//! Each shard is a separate sled tree inside one database at
//! `{dir_path}/bptree-index`. Values are bincode-encoded positions.

use crate::data::{decode_record_pos, encode_record_pos, RecordPos};
use crate::error::Result;

use super::{IndexIterator, Indexer, SnapshotIterator};

/// Directory holding the sled database
pub const BPTREE_INDEX_DIR: &str = "bptree-index";

/// Durable ordered index; sled serializes its own updates
///
/// With `sync_writes` every put and delete is flushed before it returns.
/// Otherwise sled flushes in the background and on `flush`/`close`.
pub struct BPlusTree {
    db: sled::Db,
    tree: sled::Tree,
    sync_writes: bool,
}

impl BPlusTree {
    /// Open the tree for `shard` inside an already opened database
    pub fn open(db: &sled::Db, shard: usize, sync_writes: bool) -> Result<Self> {
        let tree = db.open_tree(format!("shard-{:03}", shard))?;
        Ok(Self {
            db: db.clone(),
            tree,
            sync_writes,
        })
    }

    fn flush_if_synced(&self) -> Result<()> {
        if self.sync_writes {
            self.tree.flush()?;
        }
        Ok(())
    }
}

impl Indexer for BPlusTree {
    fn put(&self, key: Vec<u8>, pos: RecordPos) -> Result<Option<RecordPos>> {
        let old = self.tree.insert(key, encode_record_pos(&pos)?)?;
        self.flush_if_synced()?;
        old.map(|v| decode_record_pos(&v)).transpose()
    }

    fn get(&self, key: &[u8]) -> Result<Option<RecordPos>> {
        self.tree
            .get(key)?
            .map(|v| decode_record_pos(&v))
            .transpose()
    }

    fn delete(&self, key: &[u8]) -> Result<Option<RecordPos>> {
        let old = self.tree.remove(key)?;
        self.flush_if_synced()?;
        old.map(|v| decode_record_pos(&v)).transpose()
    }

    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>> {
        let mut items = Vec::with_capacity(self.tree.len());
        for entry in self.tree.iter() {
            let (key, value) = entry?;
            items.push((key.to_vec(), decode_record_pos(&value)?));
        }
        Ok(Box::new(SnapshotIterator::new(items, reverse)))
    }

    fn size(&self) -> Result<usize> {
        Ok(self.tree.len())
    }

    fn flush(&self) -> Result<()> {
        self.tree.flush()?;
        self.db.flush()?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.flush()
    }
}
