//! Ordered iteration across index shards
//!
//! Each shard yields its keys in order; a binary heap holding every shard's
//! current head merges them into one sequence.
//!
//! ```text
//! shard 0: a  d  g          heap (forward = min first)
//! shard 1: b  e      ──►    [a, b, c] → pop a, push d → [b, c, d] → ...
//! shard 2: c  f
//! ```
//!
//! The router sends a key to exactly one shard, so the merged sequence has
//! no duplicates.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::config::IteratorOptions;
use crate::engine::Core;
use crate::error::{CaskError, Result};
use crate::index::IndexIterator;

/// Head of one shard iterator
#[derive(Debug, PartialEq, Eq)]
struct HeapItem {
    key: Vec<u8>,
    shard: usize,
    reverse: bool,
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the greatest item
        let by_key = if self.reverse {
            self.key.cmp(&other.key)
        } else {
            other.key.cmp(&self.key)
        };
        by_key.then_with(|| other.shard.cmp(&self.shard))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Iterator over the whole key space
///
/// Each shard's iterator works on a snapshot taken at creation; values are
/// read from the segments when asked for.
pub struct DbIterator<'a> {
    core: &'a Core,
    shards: Vec<Box<dyn IndexIterator>>,
    heap: BinaryHeap<HeapItem>,
    options: IteratorOptions,
}

impl<'a> DbIterator<'a> {
    pub(crate) fn new(core: &'a Core, options: IteratorOptions) -> Result<Self> {
        let mut shards = Vec::with_capacity(core.indexes.len());
        for index in &core.indexes {
            shards.push(index.iterator(options.reverse)?);
        }
        let mut iter = Self {
            core,
            shards,
            heap: BinaryHeap::new(),
            options,
        };
        iter.rewind();
        Ok(iter)
    }

    /// Back to the first key
    pub fn rewind(&mut self) {
        for shard in &mut self.shards {
            shard.rewind();
        }
        self.rebuild_heap();
    }

    /// Position at the first key `>= key` (`<= key` when reversed)
    pub fn seek(&mut self, key: &[u8]) {
        for shard in &mut self.shards {
            shard.seek(key);
        }
        self.rebuild_heap();
    }

    /// Step to the next key
    pub fn next(&mut self) {
        self.advance_top();
        self.skip_to_prefix();
    }

    pub fn valid(&self) -> bool {
        !self.heap.is_empty()
    }

    /// Current key; empty once the iterator is exhausted
    pub fn key(&self) -> &[u8] {
        self.heap.peek().map(|item| item.key.as_slice()).unwrap_or(&[])
    }

    /// Value of the current key, read from its segment
    pub fn value(&self) -> Result<Vec<u8>> {
        let item = self.heap.peek().ok_or(CaskError::KeyNotFound)?;
        let pos = self.shards[item.shard].value();
        let files = self.core.files.read();
        self.core.value_at(&files, pos)
    }

    /// Release the shard snapshots
    pub fn close(&mut self) {
        for shard in &mut self.shards {
            shard.close();
        }
        self.heap.clear();
    }

    fn rebuild_heap(&mut self) {
        self.heap.clear();
        for (i, shard) in self.shards.iter().enumerate() {
            if shard.valid() {
                self.heap.push(HeapItem {
                    key: shard.key().to_vec(),
                    shard: i,
                    reverse: self.options.reverse,
                });
            }
        }
        self.skip_to_prefix();
    }

    fn advance_top(&mut self) {
        let Some(item) = self.heap.pop() else { return };
        let shard = &mut self.shards[item.shard];
        shard.next();
        if shard.valid() {
            self.heap.push(HeapItem {
                key: shard.key().to_vec(),
                shard: item.shard,
                reverse: self.options.reverse,
            });
        }
    }

    fn skip_to_prefix(&mut self) {
        if self.options.prefix.is_empty() {
            return;
        }
        while let Some(top) = self.heap.peek() {
            if top.key.starts_with(&self.options.prefix) {
                break;
            }
            self.advance_top();
        }
    }
}
