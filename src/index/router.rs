//! Consistent-hash routing of keys to index shards

use std::collections::BTreeMap;

/// Virtual nodes placed on the ring per shard
const VIRTUAL_NODES_PER_SHARD: usize = 20;

/// Hash ring mapping keys to shard numbers
///
/// The shard count is fixed when the ring is built, so a key always lands
/// on the same shard for the life of a database.
#[derive(Debug, Clone)]
pub struct HashRing {
    ring: BTreeMap<u32, usize>,
    shards: usize,
}

impl HashRing {
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        let mut ring = BTreeMap::new();
        for shard in 0..shards {
            for vnode in 0..VIRTUAL_NODES_PER_SHARD {
                let label = format!("shard-{}-vnode-{}", shard, vnode);
                ring.insert(crc32fast::hash(label.as_bytes()), shard);
            }
        }
        Self { ring, shards }
    }

    /// Shard that owns `key`: first ring point at or after the key's hash,
    /// wrapping to the start
    pub fn route(&self, key: &[u8]) -> usize {
        if self.shards == 1 {
            return 0;
        }
        let hash = crc32fast::hash(key);
        self.ring
            .range(hash..)
            .next()
            .or_else(|| self.ring.iter().next())
            .map(|(_, &shard)| shard)
            .unwrap_or(0)
    }

    pub fn shards(&self) -> usize {
        self.shards
    }
}
