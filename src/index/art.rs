//! Adaptive radix tree index
//!
//! Inner nodes grow through four layouts as children are added
//! (4 → 16 → 48 → 256) and shrink back on removal. Each inner node keeps a
//! compressed path prefix, and a `terminal` slot for a key that ends exactly
//! at that node, so a key may be a prefix of another key.
//!
//! ```text
//!            [prefix "k"]
//!            /    |     \
//!   terminal "k"  '1'    '2'
//!                 |       |
//!              "k1"     "k2..."
//! ```

use parking_lot::RwLock;

use crate::data::RecordPos;
use crate::error::Result;

use super::{IndexIterator, Indexer, SnapshotIterator};

// =============================================================================
// Indexer wrapper
// =============================================================================

/// ART index with a read-write lock around the tree
pub struct AdaptiveRadixTree {
    tree: RwLock<ArtTree>,
}

impl AdaptiveRadixTree {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(ArtTree::new()),
        }
    }
}

impl Default for AdaptiveRadixTree {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer for AdaptiveRadixTree {
    fn put(&self, key: Vec<u8>, pos: RecordPos) -> Result<Option<RecordPos>> {
        Ok(self.tree.write().insert(key, pos))
    }

    fn get(&self, key: &[u8]) -> Result<Option<RecordPos>> {
        Ok(self.tree.read().get(key))
    }

    fn delete(&self, key: &[u8]) -> Result<Option<RecordPos>> {
        Ok(self.tree.write().remove(key))
    }

    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>> {
        let items = self.tree.read().entries();
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

// =============================================================================
// Tree
// =============================================================================

/// The radix tree itself (not synchronized)
#[derive(Default)]
pub struct ArtTree {
    root: Option<Node>,
    len: usize,
}

impl ArtTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert or overwrite, returning the previous position
    pub fn insert(&mut self, key: Vec<u8>, pos: RecordPos) -> Option<RecordPos> {
        let old = match self.root.as_mut() {
            None => {
                self.root = Some(Node::Leaf(Leaf { key, pos }));
                None
            }
            Some(root) => insert_rec(root, Leaf { key, pos }, 0),
        };
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    pub fn get(&self, key: &[u8]) -> Option<RecordPos> {
        let mut node = self.root.as_ref()?;
        let mut depth = 0;
        loop {
            match node {
                Node::Leaf(leaf) => {
                    return (leaf.key == key).then_some(leaf.pos);
                }
                Node::Inner(inner) => {
                    if !key[depth..].starts_with(&inner.prefix) {
                        return None;
                    }
                    depth += inner.prefix.len();
                    if depth == key.len() {
                        return inner.terminal.as_ref().map(|leaf| leaf.pos);
                    }
                    node = inner.children.find(key[depth])?;
                    depth += 1;
                }
            }
        }
    }

    /// Remove a key, returning the position it had
    pub fn remove(&mut self, key: &[u8]) -> Option<RecordPos> {
        let root = self.root.as_mut()?;
        let (old, remove_root) = remove_rec(root, key, 0);
        if remove_root {
            self.root = None;
        }
        if old.is_some() {
            self.len -= 1;
        }
        old
    }

    /// All entries in ascending key order
    pub fn entries(&self) -> Vec<(Vec<u8>, RecordPos)> {
        let mut out = Vec::with_capacity(self.len);
        if let Some(root) = &self.root {
            collect(root, &mut out);
        }
        out
    }
}

// =============================================================================
// Nodes
// =============================================================================

struct Leaf {
    key: Vec<u8>,
    pos: RecordPos,
}

struct Inner {
    /// Compressed path shared by everything below this node
    prefix: Vec<u8>,
    /// Entry whose key ends exactly at this node
    terminal: Option<Leaf>,
    children: Children,
}

enum Node {
    Leaf(Leaf),
    Inner(Box<Inner>),
}

impl Node {
    /// Cheap stand-in used while a slot is being rebuilt
    fn placeholder() -> Self {
        Node::Leaf(Leaf {
            key: Vec::new(),
            pos: RecordPos::default(),
        })
    }
}

impl Inner {
    fn new(prefix: Vec<u8>) -> Self {
        Self {
            prefix,
            terminal: None,
            children: Children::Node4 {
                keys: Vec::with_capacity(4),
                nodes: Vec::with_capacity(4),
            },
        }
    }

    /// Hang a leaf below this node, whose prefix ends at `depth`
    fn place_leaf(&mut self, leaf: Leaf, depth: usize) {
        if leaf.key.len() == depth {
            self.terminal = Some(leaf);
        } else {
            let byte = leaf.key[depth];
            self.children.add(byte, Node::Leaf(leaf));
        }
    }

    fn entry_count(&self) -> usize {
        self.children.len() + usize::from(self.terminal.is_some())
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn insert_rec(slot: &mut Node, leaf: Leaf, depth: usize) -> Option<RecordPos> {
    match slot {
        Node::Leaf(existing) => {
            if existing.key == leaf.key {
                return Some(std::mem::replace(&mut existing.pos, leaf.pos));
            }

            // Split the leaf into an inner node holding both keys
            let lcp = common_prefix_len(&existing.key[depth..], &leaf.key[depth..]);
            let mut inner = Inner::new(leaf.key[depth..depth + lcp].to_vec());
            let split_depth = depth + lcp;

            let old = match std::mem::replace(slot, Node::placeholder()) {
                Node::Leaf(old) => old,
                Node::Inner(_) => unreachable!("slot matched as leaf"),
            };
            inner.place_leaf(old, split_depth);
            inner.place_leaf(leaf, split_depth);
            *slot = Node::Inner(Box::new(inner));
            None
        }
        Node::Inner(inner) => {
            let matched = common_prefix_len(&inner.prefix, &leaf.key[depth..]);

            if matched < inner.prefix.len() {
                // Prefix mismatch: new parent takes the shared part
                let mut parent = Inner::new(inner.prefix[..matched].to_vec());
                let branch = inner.prefix[matched];
                inner.prefix.drain(..=matched);

                let old = std::mem::replace(slot, Node::placeholder());
                parent.children.add(branch, old);
                parent.place_leaf(leaf, depth + matched);
                *slot = Node::Inner(Box::new(parent));
                return None;
            }

            let depth = depth + inner.prefix.len();
            if depth == leaf.key.len() {
                return match inner.terminal.as_mut() {
                    Some(terminal) => Some(std::mem::replace(&mut terminal.pos, leaf.pos)),
                    None => {
                        inner.terminal = Some(leaf);
                        None
                    }
                };
            }

            let byte = leaf.key[depth];
            match inner.children.find_mut(byte) {
                Some(child) => insert_rec(child, leaf, depth + 1),
                None => {
                    inner.children.add(byte, Node::Leaf(leaf));
                    None
                }
            }
        }
    }
}

/// Returns the removed position and whether `slot` itself became empty
fn remove_rec(slot: &mut Node, key: &[u8], depth: usize) -> (Option<RecordPos>, bool) {
    let inner = match slot {
        Node::Leaf(leaf) => {
            return if leaf.key == key {
                (Some(leaf.pos), true)
            } else {
                (None, false)
            };
        }
        Node::Inner(inner) => inner,
    };

    if !key[depth..].starts_with(&inner.prefix) {
        return (None, false);
    }
    let depth = depth + inner.prefix.len();

    let old = if depth == key.len() {
        inner.terminal.take().map(|leaf| leaf.pos)
    } else {
        let byte = key[depth];
        let (old, remove_child) = match inner.children.find_mut(byte) {
            Some(child) => remove_rec(child, key, depth + 1),
            None => (None, false),
        };
        if remove_child {
            inner.children.remove(byte);
        }
        old
    };

    if old.is_none() {
        return (None, false);
    }

    // Collapse nodes left with a single entry
    match inner.entry_count() {
        0 => (old, true),
        1 => {
            let inner = match std::mem::replace(slot, Node::placeholder()) {
                Node::Inner(inner) => inner,
                Node::Leaf(_) => unreachable!("slot matched as inner"),
            };
            *slot = collapse(*inner);
            (old, false)
        }
        _ => (old, false),
    }
}

/// Replace an inner node that has exactly one entry by that entry
fn collapse(mut inner: Inner) -> Node {
    if let Some(terminal) = inner.terminal.take() {
        return Node::Leaf(terminal);
    }
    let (byte, child) = match inner.children.take_only() {
        Some(only) => only,
        None => return Node::Inner(Box::new(inner)),
    };
    match child {
        Node::Leaf(leaf) => Node::Leaf(leaf),
        Node::Inner(mut grandchild) => {
            let mut prefix = std::mem::take(&mut inner.prefix);
            prefix.push(byte);
            prefix.extend_from_slice(&grandchild.prefix);
            grandchild.prefix = prefix;
            Node::Inner(grandchild)
        }
    }
}

fn collect(node: &Node, out: &mut Vec<(Vec<u8>, RecordPos)>) {
    match node {
        Node::Leaf(leaf) => out.push((leaf.key.clone(), leaf.pos)),
        Node::Inner(inner) => {
            // A key ending here sorts before every longer key below it
            if let Some(terminal) = &inner.terminal {
                out.push((terminal.key.clone(), terminal.pos));
            }
            inner.children.for_each(|child| collect(child, out));
        }
    }
}

// =============================================================================
// Child layouts
// =============================================================================

const NODE4_MAX: usize = 4;
const NODE16_MAX: usize = 16;
const NODE48_MAX: usize = 48;

/// Shrink thresholds (one below the smaller layout's capacity)
const NODE16_MIN: usize = 3;
const NODE48_MIN: usize = 12;
const NODE256_MIN: usize = 37;

enum Children {
    /// Up to 4 children, keys sorted
    Node4 { keys: Vec<u8>, nodes: Vec<Node> },
    /// Up to 16 children, keys sorted
    Node16 { keys: Vec<u8>, nodes: Vec<Node> },
    /// Byte → slot+1 table over 48 child slots (0 = empty)
    Node48 {
        index: Box<[u8; 256]>,
        nodes: Vec<Option<Node>>,
        count: usize,
    },
    /// One slot per byte
    Node256 { nodes: Vec<Option<Node>>, count: usize },
}

impl Children {
    fn len(&self) -> usize {
        match self {
            Children::Node4 { keys, .. } | Children::Node16 { keys, .. } => keys.len(),
            Children::Node48 { count, .. } | Children::Node256 { count, .. } => *count,
        }
    }

    fn find(&self, byte: u8) -> Option<&Node> {
        match self {
            Children::Node4 { keys, nodes } => {
                keys.iter().position(|&k| k == byte).map(|i| &nodes[i])
            }
            Children::Node16 { keys, nodes } => {
                keys.binary_search(&byte).ok().map(|i| &nodes[i])
            }
            Children::Node48 { index, nodes, .. } => match index[byte as usize] {
                0 => None,
                slot => nodes[slot as usize - 1].as_ref(),
            },
            Children::Node256 { nodes, .. } => nodes[byte as usize].as_ref(),
        }
    }

    fn find_mut(&mut self, byte: u8) -> Option<&mut Node> {
        match self {
            Children::Node4 { keys, nodes } => keys
                .iter()
                .position(|&k| k == byte)
                .map(move |i| &mut nodes[i]),
            Children::Node16 { keys, nodes } => keys
                .binary_search(&byte)
                .ok()
                .map(move |i| &mut nodes[i]),
            Children::Node48 { index, nodes, .. } => match index[byte as usize] {
                0 => None,
                slot => nodes[slot as usize - 1].as_mut(),
            },
            Children::Node256 { nodes, .. } => nodes[byte as usize].as_mut(),
        }
    }

    /// Add a child for a byte that is not present yet, growing if full
    fn add(&mut self, byte: u8, node: Node) {
        match self {
            Children::Node4 { keys, nodes } if keys.len() < NODE4_MAX => {
                insert_sorted(keys, nodes, byte, node);
            }
            Children::Node16 { keys, nodes } if keys.len() < NODE16_MAX => {
                insert_sorted(keys, nodes, byte, node);
            }
            Children::Node48 {
                index,
                nodes,
                count,
            } if *count < NODE48_MAX => {
                let slot = nodes
                    .iter()
                    .position(Option::is_none)
                    .unwrap_or(nodes.len());
                if slot == nodes.len() {
                    nodes.push(None);
                }
                nodes[slot] = Some(node);
                index[byte as usize] = slot as u8 + 1;
                *count += 1;
            }
            Children::Node256 { nodes, count } => {
                nodes[byte as usize] = Some(node);
                *count += 1;
            }
            _ => {
                self.grow();
                self.add(byte, node);
            }
        }
    }

    fn remove(&mut self, byte: u8) -> Option<Node> {
        let removed = match self {
            Children::Node4 { keys, nodes } | Children::Node16 { keys, nodes } => {
                let i = keys.iter().position(|&k| k == byte)?;
                keys.remove(i);
                Some(nodes.remove(i))
            }
            Children::Node48 {
                index,
                nodes,
                count,
            } => match index[byte as usize] {
                0 => None,
                slot => {
                    index[byte as usize] = 0;
                    *count -= 1;
                    nodes[slot as usize - 1].take()
                }
            },
            Children::Node256 { nodes, count } => {
                let node = nodes[byte as usize].take();
                if node.is_some() {
                    *count -= 1;
                }
                node
            }
        };
        self.shrink();
        removed
    }

    /// Remove and return the only child
    fn take_only(&mut self) -> Option<(u8, Node)> {
        if self.len() != 1 {
            return None;
        }
        let mut byte = None;
        self.for_each_key(|b| byte = Some(b));
        let byte = byte?;
        self.remove(byte).map(|node| (byte, node))
    }

    /// Visit children in ascending byte order
    fn for_each<'a>(&'a self, mut f: impl FnMut(&'a Node)) {
        match self {
            Children::Node4 { nodes, .. } | Children::Node16 { nodes, .. } => {
                nodes.iter().for_each(f);
            }
            Children::Node48 { index, nodes, .. } => {
                for &slot in index.iter() {
                    if slot != 0 {
                        if let Some(node) = &nodes[slot as usize - 1] {
                            f(node);
                        }
                    }
                }
            }
            Children::Node256 { nodes, .. } => {
                nodes.iter().flatten().for_each(f);
            }
        }
    }

    fn for_each_key(&self, mut f: impl FnMut(u8)) {
        match self {
            Children::Node4 { keys, .. } | Children::Node16 { keys, .. } => {
                keys.iter().for_each(|&k| f(k));
            }
            Children::Node48 { index, .. } => {
                for (byte, &slot) in index.iter().enumerate() {
                    if slot != 0 {
                        f(byte as u8);
                    }
                }
            }
            Children::Node256 { nodes, .. } => {
                for (byte, node) in nodes.iter().enumerate() {
                    if node.is_some() {
                        f(byte as u8);
                    }
                }
            }
        }
    }

    fn grow(&mut self) {
        let grown = match std::mem::replace(self, Children::empty256()) {
            Children::Node4 { keys, nodes } => {
                let mut keys16 = Vec::with_capacity(NODE16_MAX);
                let mut nodes16 = Vec::with_capacity(NODE16_MAX);
                keys16.extend(keys);
                nodes16.extend(nodes);
                Children::Node16 {
                    keys: keys16,
                    nodes: nodes16,
                }
            }
            Children::Node16 { keys, nodes } => {
                let mut index = Box::new([0u8; 256]);
                let mut slots = Vec::with_capacity(NODE48_MAX);
                for (i, (byte, node)) in keys.into_iter().zip(nodes).enumerate() {
                    index[byte as usize] = i as u8 + 1;
                    slots.push(Some(node));
                }
                let count = slots.len();
                Children::Node48 {
                    index,
                    nodes: slots,
                    count,
                }
            }
            Children::Node48 {
                index,
                mut nodes,
                count,
            } => {
                let mut slots: Vec<Option<Node>> = (0..256).map(|_| None).collect();
                for (byte, &slot) in index.iter().enumerate() {
                    if slot != 0 {
                        slots[byte] = nodes[slot as usize - 1].take();
                    }
                }
                Children::Node256 {
                    nodes: slots,
                    count,
                }
            }
            full @ Children::Node256 { .. } => full,
        };
        *self = grown;
    }

    fn shrink(&mut self) {
        let should_shrink = match self {
            Children::Node4 { .. } => false,
            Children::Node16 { keys, .. } => keys.len() <= NODE16_MIN,
            Children::Node48 { count, .. } => *count <= NODE48_MIN,
            Children::Node256 { count, .. } => *count <= NODE256_MIN,
        };
        if !should_shrink {
            return;
        }

        let shrunk = match std::mem::replace(self, Children::empty256()) {
            Children::Node16 { keys, nodes } => Children::Node4 { keys, nodes },
            Children::Node48 {
                index, mut nodes, ..
            } => {
                let mut keys = Vec::with_capacity(NODE16_MAX);
                let mut children = Vec::with_capacity(NODE16_MAX);
                for (byte, &slot) in index.iter().enumerate() {
                    if slot != 0 {
                        if let Some(node) = nodes[slot as usize - 1].take() {
                            keys.push(byte as u8);
                            children.push(node);
                        }
                    }
                }
                Children::Node16 {
                    keys,
                    nodes: children,
                }
            }
            Children::Node256 { mut nodes, count } => {
                let mut index = Box::new([0u8; 256]);
                let mut slots = Vec::with_capacity(NODE48_MAX);
                for (byte, node) in nodes.iter_mut().enumerate() {
                    if let Some(node) = node.take() {
                        slots.push(Some(node));
                        index[byte] = slots.len() as u8;
                    }
                }
                Children::Node48 {
                    index,
                    nodes: slots,
                    count,
                }
            }
            other => other,
        };
        *self = shrunk;
    }

    fn empty256() -> Self {
        Children::Node256 {
            nodes: Vec::new(),
            count: 0,
        }
    }
}

fn insert_sorted(keys: &mut Vec<u8>, nodes: &mut Vec<Node>, byte: u8, node: Node) {
    let i = keys.partition_point(|&k| k < byte);
    keys.insert(i, byte);
    nodes.insert(i, node);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(n: u64) -> RecordPos {
        RecordPos {
            file_id: 0,
            offset: n,
            size: 1,
        }
    }

    #[test]
    fn test_prefix_keys_coexist() {
        let mut tree = ArtTree::new();
        tree.insert(b"k".to_vec(), pos(1));
        tree.insert(b"k1".to_vec(), pos(2));
        tree.insert(b"k12".to_vec(), pos(3));

        assert_eq!(tree.get(b"k"), Some(pos(1)));
        assert_eq!(tree.get(b"k1"), Some(pos(2)));
        assert_eq!(tree.get(b"k12"), Some(pos(3)));
        assert_eq!(tree.get(b"k123"), None);

        assert_eq!(tree.remove(b"k1"), Some(pos(2)));
        assert_eq!(tree.get(b"k"), Some(pos(1)));
        assert_eq!(tree.get(b"k12"), Some(pos(3)));
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_grow_and_shrink_through_every_layout() {
        let mut tree = ArtTree::new();
        for b in 0..=255u8 {
            tree.insert(vec![b'x', b], pos(b as u64));
        }
        assert_eq!(tree.len(), 256);
        for b in 0..=255u8 {
            assert_eq!(tree.get(&[b'x', b]), Some(pos(b as u64)));
        }

        for b in 0..=250u8 {
            assert_eq!(tree.remove(&[b'x', b]), Some(pos(b as u64)));
        }
        let keys: Vec<Vec<u8>> = tree.entries().into_iter().map(|(k, _)| k).collect();
        let expected: Vec<Vec<u8>> = (251..=255u8).map(|b| vec![b'x', b]).collect();
        assert_eq!(keys, expected);
    }
}
