//! Writable trie (WT): a single-language bit-sliced arena trie storing
//! one `u32` frequency and a stop-gram flag per leaf.
//!
//! Node storage is index-based rather than pointer-based: the node pool is
//! a `Vec` that grows geometrically, and every reference a caller holds
//! across an insert is an index, never a borrow, so reallocation never
//! invalidates anything. Index 0 is both the root and the "no such child"
//! sentinel — no node ever points back to the root, so the overload is
//! safe.

use crate::error::{Result, TrieError};
use crate::freq::Smoothing;
use crate::keys::{self, BitsPerLevel};

/// Sentinel for "no child"/root. Never a valid non-root node index.
pub const NULL: u32 = 0;

#[derive(Debug, Clone)]
struct WtNode {
    children: Vec<u32>,
    frequency: u32,
    is_leaf: bool,
    is_stopgram: bool,
}

impl WtNode {
    fn new(fanout: usize) -> Self {
        Self {
            children: vec![NULL; fanout],
            frequency: 0,
            is_leaf: false,
            is_stopgram: false,
        }
    }
}

/// A single-language writable n-gram trie.
#[derive(Debug, Clone)]
pub struct WritableTrie {
    bits: BitsPerLevel,
    ignore_whitespace: bool,
    nodes: Vec<WtNode>,
    max_nodes: usize,
}

impl WritableTrie {
    pub fn new(bits: BitsPerLevel, ignore_whitespace: bool, capacity: usize) -> Self {
        let mut nodes = Vec::with_capacity(capacity.max(1));
        nodes.push(WtNode::new(bits.fanout())); // root, index 0
        Self {
            bits,
            ignore_whitespace,
            nodes,
            max_nodes: usize::MAX,
        }
    }

    /// Cap the node pool so allocation exhaustion becomes observable via
    /// [`TrieError::CapacityExceeded`] instead of an unbounded `Vec` grow.
    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes.max(1);
        self
    }

    pub fn bits(&self) -> BitsPerLevel {
        self.bits
    }

    fn filtered_key<'a>(&self, key: &'a [u8]) -> Vec<u8> {
        if self.ignore_whitespace {
            key.iter().copied().filter(|&b| b != keys::ASCII_SPACE).collect()
        } else {
            key.to_vec()
        }
    }

    fn alloc_node(&mut self) -> Result<u32> {
        if self.nodes.len() >= self.max_nodes {
            return Err(TrieError::CapacityExceeded(self.max_nodes));
        }
        let idx = self.nodes.len() as u32;
        self.nodes.push(WtNode::new(self.bits.fanout()));
        Ok(idx)
    }

    /// Walk to `key[..length]`, creating nodes as needed. Returns the node
    /// index at the end of the walk.
    fn navigate_create(&mut self, key: &[u8], length: usize) -> Result<u32> {
        let key = self.filtered_key(&key[..length.min(key.len())]);
        let nybbles = keys::key_to_nybbles(&key, self.bits);
        let mut cur = 0u32;
        for nybble in nybbles {
            let next = self.nodes[cur as usize].children[nybble as usize];
            cur = if next == NULL {
                let new_idx = self.alloc_node()?;
                self.nodes[cur as usize].children[nybble as usize] = new_idx;
                new_idx
            } else {
                next
            };
        }
        Ok(cur)
    }

    /// Walk to `key[..length]` without creating nodes. `None` if absent.
    fn navigate_lookup(&self, key: &[u8], length: usize) -> Option<u32> {
        let key = self.filtered_key(&key[..length.min(key.len())]);
        let nybbles = keys::key_to_nybbles(&key, self.bits);
        let mut cur = 0u32;
        for nybble in nybbles {
            let next = self.nodes[cur as usize].children[nybble as usize];
            if next == NULL {
                return None;
            }
            cur = next;
        }
        Some(cur)
    }

    pub fn insert(&mut self, key: &[u8], length: usize, frequency: u32, stopgram: bool) -> Result<()> {
        let idx = self.navigate_create(key, length)?;
        let node = &mut self.nodes[idx as usize];
        node.frequency = frequency;
        node.is_leaf = true;
        node.is_stopgram = stopgram;
        Ok(())
    }

    pub fn increment(&mut self, key: &[u8], length: usize, delta: u32, stopgram: bool) -> Result<()> {
        let idx = self.navigate_create(key, length)?;
        let node = &mut self.nodes[idx as usize];
        node.frequency = node.frequency.saturating_add(delta);
        node.is_leaf = true;
        node.is_stopgram = node.is_stopgram || stopgram;
        Ok(())
    }

    /// Extend a known `prefix` by one more byte and increment the resulting
    /// n-gram's count. A no-op if `prefix` is not already present — the
    /// builder only calls this for prefixes it already knows survived
    /// pruning at the previous length step.
    pub fn increment_extension(&mut self, prefix: &[u8], next_byte: u8, delta: u32) -> Result<()> {
        let Some(prefix_node) = self.navigate_lookup(prefix, prefix.len()) else {
            return Ok(());
        };
        if self.ignore_whitespace && next_byte == keys::ASCII_SPACE {
            return Ok(());
        }
        let mut cur = prefix_node;
        for nybble in keys::byte_to_nybbles(next_byte, self.bits) {
            let next = self.nodes[cur as usize].children[nybble as usize];
            cur = if next == NULL {
                let new_idx = self.alloc_node()?;
                self.nodes[cur as usize].children[nybble as usize] = new_idx;
                new_idx
            } else {
                next
            };
        }
        let node = &mut self.nodes[cur as usize];
        node.frequency = node.frequency.saturating_add(delta);
        node.is_leaf = true;
        Ok(())
    }

    pub fn lookup(&self, key: &[u8], length: usize) -> u32 {
        match self.navigate_lookup(key, length) {
            Some(idx) if self.nodes[idx as usize].is_leaf => self.nodes[idx as usize].frequency,
            _ => 0,
        }
    }

    pub fn is_stopgram(&self, key: &[u8], length: usize) -> bool {
        match self.navigate_lookup(key, length) {
            Some(idx) => self.nodes[idx as usize].is_stopgram,
            None => false,
        }
    }

    /// Start a fresh walk cursor at the root, for incrementally extending
    /// a trie pointer one byte at a time, as the coverage pass does when
    /// sliding a window across training text.
    pub fn walk(&self) -> WalkCursor<'_> {
        WalkCursor {
            trie: self,
            node: 0,
            depth: 0,
        }
    }

    /// Depth-first enumeration of all leaves whose key is no longer than
    /// `max_len` bytes. The visitor is called only at leaves; returning
    /// `false` aborts the walk early. The key buffer passed to the visitor
    /// is reconstructed fresh for each call (no aliasing surprises), but
    /// callers should still treat it as borrowed-for-the-call only.
    pub fn enumerate<F>(&self, max_len: usize, mut visit: F)
    where
        F: FnMut(&Self, u32, &[u8], usize) -> bool,
    {
        struct Frame {
            node: u32,
            next_child: usize,
            visited: bool,
        }

        let levels_per_byte = self.bits.levels_per_byte();
        let max_depth = max_len * levels_per_byte;
        let fanout = self.bits.fanout();

        let mut stack = vec![Frame {
            node: 0,
            next_child: 0,
            visited: false,
        }];
        let mut path: Vec<u8> = Vec::new();

        loop {
            let fi = stack.len() - 1;
            if !stack[fi].visited {
                stack[fi].visited = true;
                let depth = path.len();
                let node = stack[fi].node;
                let n = &self.nodes[node as usize];
                if depth > 0 && n.is_leaf && keys::is_byte_aligned(depth, self.bits) && depth <= max_depth
                {
                    let key = keys::nybbles_to_key(&path, self.bits);
                    if !visit(self, node, &key, key.len()) {
                        return;
                    }
                }
            }

            let depth = path.len();
            if depth >= max_depth {
                stack.pop();
                if stack.is_empty() {
                    break;
                }
                path.pop();
                continue;
            }

            let node = stack[stack.len() - 1].node;
            let start = stack[stack.len() - 1].next_child;
            let mut found = None;
            for c in start..fanout {
                let child = self.nodes[node as usize].children[c];
                if child != NULL {
                    found = Some((c, child));
                    break;
                }
            }
            match found {
                Some((c, child)) => {
                    let fi = stack.len() - 1;
                    stack[fi].next_child = c + 1;
                    stack.push(Frame {
                        node: child,
                        next_child: 0,
                        visited: false,
                    });
                    path.push(c as u8);
                }
                None => {
                    stack.pop();
                    if stack.is_empty() {
                        break;
                    }
                    path.pop();
                }
            }
        }
    }

    /// Number of nodes with at least one present child.
    pub fn num_full_nodes(&self) -> usize {
        self.nodes.iter().filter(|n| n.children.iter().any(|&c| c != NULL)).count()
    }

    /// Number of leaf nodes with no children at all.
    pub fn num_terminal_nodes(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.is_leaf && n.children.iter().all(|&c| c == NULL))
            .count()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of present children at `node`.
    pub fn fanout_at(&self, node: u32) -> usize {
        self.nodes[node as usize].children.iter().filter(|&&c| c != NULL).count()
    }

    /// Whether every present child of `node` is itself a terminal (leaf
    /// with no children).
    pub fn all_children_terminal(&self, node: u32) -> bool {
        self.nodes[node as usize].children.iter().all(|&c| {
            c == NULL || {
                let child = &self.nodes[c as usize];
                child.is_leaf && child.children.iter().all(|&cc| cc == NULL)
            }
        })
    }

    /// Single-child chain redundancy elimination: for every leaf found by
    /// following a chain of single-child nodes down
    /// from a shorter leaf to a longer one, if the longer leaf's frequency
    /// `f'` satisfies `ratio * f <= f' <= f` (where `f` is the shorter
    /// leaf's own frequency), the shorter leaf is demoted — its count is
    /// judged redundant with the longer gram that contains it. Idempotent:
    /// once demoted, a leaf is no longer visited as a leaf on a second pass.
    pub fn affix_suppress_chains(&mut self, ratio: f64, max_len: usize) -> usize {
        let mut to_demote = Vec::new();
        self.enumerate(max_len, |trie, node, _key, _len| {
            let f = trie.nodes[node as usize].frequency;
            if f == 0 {
                return true;
            }
            // Follow the single-child chain forward from `node`.
            let mut cur = node;
            loop {
                let present: Vec<u32> = trie.nodes[cur as usize]
                    .children
                    .iter()
                    .copied()
                    .filter(|&c| c != NULL)
                    .collect();
                if present.len() != 1 {
                    break;
                }
                cur = present[0];
                let child = &trie.nodes[cur as usize];
                if child.is_leaf {
                    let fp = child.frequency;
                    if fp as f64 >= ratio * f as f64 && fp <= f {
                        to_demote.push(node);
                    }
                    break;
                }
            }
            true
        });
        for node in &to_demote {
            let n = &mut self.nodes[*node as usize];
            n.is_leaf = false;
            n.frequency = 0;
        }
        to_demote.len()
    }

    /// Alignment-based affix suppression: for every leaf of
    /// length exactly `max_len`, strip `alignment` leading bytes and look up
    /// that shorter comparison n-gram's frequency. If the comparison
    /// n-gram's frequency is at most `current / ratio`, the current n-gram
    /// adds negligible information beyond its shorter context and is zeroed.
    pub fn affix_suppress_alignment(&mut self, alignment: usize, ratio: f64, max_len: usize) -> usize {
        let mut to_zero = Vec::new();
        self.enumerate(max_len, |trie, node, key, len| {
            if len <= alignment {
                return true;
            }
            let comparison = &key[alignment..];
            let comp_freq = trie.lookup(comparison, comparison.len());
            let f = trie.nodes[node as usize].frequency;
            if f > 0 && (comp_freq as f64) <= f as f64 / ratio {
                to_zero.push(node);
            }
            true
        });
        for node in &to_zero {
            let n = &mut self.nodes[*node as usize];
            n.is_leaf = false;
            n.frequency = 0;
        }
        to_zero.len()
    }

    /// Demote a leaf back to non-leaf with zero frequency, if present. Used
    /// by the builder's top-K cutoff to drop n-grams whose frequency falls
    /// below the length's survival threshold.
    pub fn demote(&mut self, key: &[u8], length: usize) {
        if let Some(idx) = self.navigate_lookup(key, length) {
            let n = &mut self.nodes[idx as usize];
            n.is_leaf = false;
            n.frequency = 0;
        }
    }

    /// Scale every leaf's frequency in place per [`Smoothing`].
    pub fn scale_frequencies(&mut self, total: u64, smoothing: Smoothing) {
        for node in &mut self.nodes {
            if node.is_leaf {
                node.frequency = smoothing.apply(node.frequency as u64, total).round().clamp(0.0, u32::MAX as f64) as u32;
            }
        }
    }
}

/// Incremental byte-at-a-time walk over a [`WritableTrie`], used by the
/// coverage-statistics pass: extend one byte, check whether the current
/// position is a leaf (a matched n-gram), repeat until the extension fails
/// or `max_len` bytes have been consumed.
pub struct WalkCursor<'a> {
    trie: &'a WritableTrie,
    node: u32,
    depth: usize,
}

impl<'a> WalkCursor<'a> {
    /// Attempt to extend the walk by one more byte. Returns `false` (and
    /// leaves the cursor unchanged) if no such extension exists.
    pub fn step(&mut self, byte: u8) -> bool {
        if self.trie.ignore_whitespace && byte == keys::ASCII_SPACE {
            return true;
        }
        let mut cur = self.node;
        for nybble in keys::byte_to_nybbles(byte, self.trie.bits) {
            let next = self.trie.nodes[cur as usize].children[nybble as usize];
            if next == NULL {
                return false;
            }
            cur = next;
        }
        self.node = cur;
        self.depth += 1;
        true
    }

    /// `Some((frequency, stopgram))` if the current position is a leaf.
    pub fn current_leaf(&self) -> Option<(u32, bool)> {
        let n = &self.trie.nodes[self.node as usize];
        if n.is_leaf {
            Some((n.frequency, n.is_stopgram))
        } else {
            None
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }
}
