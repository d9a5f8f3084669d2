//! Multi-language writable trie (MWT): same node shape as [`crate::wt`],
//! but each leaf owns a singly-linked list of `(languageID, frequency,
//! stop-gram)` records held in a second, parallel arena.
//!
//! The frequency arena is owned by the `MultiWritableTrie` instance rather
//! than held as shared or global state, so ownership is explicit and
//! borrowing rules enforce that only one trie can mutate its records at a
//! time.

use crate::error::{Result, TrieError};
use crate::freq::Smoothing;
use crate::keys::{self, BitsPerLevel};

pub const NULL: u32 = 0;
/// Sentinel meaning "no such record" in the frequency arena.
pub const INVALID_RECORD: u32 = 0xFFFF_FFFF;

const STOPGRAM_BIT: u32 = 0x0800_0000;
const LANG_MASK: u32 = 0x07FF_FFFF;

#[derive(Debug, Clone, Copy)]
struct FreqRecord {
    next: u32,
    frequency: u32,
    lang_and_flag: u32,
}

impl FreqRecord {
    fn lang(&self) -> u32 {
        self.lang_and_flag & LANG_MASK
    }
    fn is_stopgram(&self) -> bool {
        self.lang_and_flag & STOPGRAM_BIT != 0
    }
}

/// The instance-owned frequency record arena for a single
/// [`MultiWritableTrie`]. Reallocates by doubling; every reference into it
/// is a `u32` index, so reallocation never invalidates a caller's saved
/// index.
#[derive(Debug, Clone, Default)]
struct FrequencyArena {
    records: Vec<FreqRecord>,
    max_records: usize,
}

impl FrequencyArena {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            max_records: usize::MAX,
        }
    }

    fn alloc(&mut self, next: u32, frequency: u32, lang: u32, stopgram: bool) -> Result<u32> {
        if self.records.len() >= self.max_records {
            return Err(TrieError::ArenaExhausted(self.max_records));
        }
        let lang_and_flag = (lang & LANG_MASK) | if stopgram { STOPGRAM_BIT } else { 0 };
        let idx = self.records.len() as u32;
        self.records.push(FreqRecord {
            next,
            frequency,
            lang_and_flag,
        });
        Ok(idx)
    }
}

#[derive(Debug, Clone)]
struct MwtNode {
    children: Vec<u32>,
    freq_head: u32,
    is_leaf: bool,
}

impl MwtNode {
    fn new(fanout: usize) -> Self {
        Self {
            children: vec![NULL; fanout],
            freq_head: INVALID_RECORD,
            is_leaf: false,
        }
    }
}

/// A multi-language n-gram trie: one trie over byte keys, many frequency
/// values per leaf (one per language).
#[derive(Debug, Clone)]
pub struct MultiWritableTrie {
    bits: BitsPerLevel,
    ignore_whitespace: bool,
    nodes: Vec<MwtNode>,
    arena: FrequencyArena,
    max_nodes: usize,
}

impl MultiWritableTrie {
    pub fn new(bits: BitsPerLevel, ignore_whitespace: bool, capacity: usize) -> Self {
        let mut nodes = Vec::with_capacity(capacity.max(1));
        nodes.push(MwtNode::new(bits.fanout()));
        Self {
            bits,
            ignore_whitespace,
            nodes,
            arena: FrequencyArena::new(),
            max_nodes: usize::MAX,
        }
    }

    pub fn bits(&self) -> BitsPerLevel {
        self.bits
    }

    fn filtered_key(&self, key: &[u8]) -> Vec<u8> {
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
        self.nodes.push(MwtNode::new(self.bits.fanout()));
        Ok(idx)
    }

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

    /// Set a leaf's per-language frequency, updating in place if the
    /// language already has a record, otherwise splicing a new record at
    /// the head of the leaf's list. Because allocation may reallocate the
    /// arena, callers must not hold a raw record reference across this
    /// call — only the node index, which remains valid.
    pub fn set_frequency(&mut self, key: &[u8], length: usize, lang: u32, freq: u32, stopgram: bool) -> Result<()> {
        let node_idx = self.navigate_create(key, length)?;
        self.nodes[node_idx as usize].is_leaf = true;
        self.set_frequency_at(node_idx, lang, freq, stopgram)
    }

    fn set_frequency_at(&mut self, node_idx: u32, lang: u32, freq: u32, stopgram: bool) -> Result<()> {
        let mut cur = self.nodes[node_idx as usize].freq_head;
        while cur != INVALID_RECORD {
            if self.arena.records[cur as usize].lang() == lang {
                let rec = &mut self.arena.records[cur as usize];
                rec.frequency = freq;
                rec.lang_and_flag = (lang & LANG_MASK) | if stopgram { STOPGRAM_BIT } else { 0 };
                return Ok(());
            }
            cur = self.arena.records[cur as usize].next;
        }
        let head = self.nodes[node_idx as usize].freq_head;
        let new_head = self.arena.alloc(head, freq, lang, stopgram)?;
        self.nodes[node_idx as usize].freq_head = new_head;
        Ok(())
    }

    /// Additive counterpart to [`Self::set_frequency`].
    pub fn increment(&mut self, key: &[u8], length: usize, lang: u32, delta: u32, stopgram: bool) -> Result<()> {
        let node_idx = self.navigate_create(key, length)?;
        self.nodes[node_idx as usize].is_leaf = true;
        let mut cur = self.nodes[node_idx as usize].freq_head;
        while cur != INVALID_RECORD {
            if self.arena.records[cur as usize].lang() == lang {
                let rec = &mut self.arena.records[cur as usize];
                rec.frequency = rec.frequency.saturating_add(delta);
                rec.lang_and_flag |= if stopgram { STOPGRAM_BIT } else { 0 };
                return Ok(());
            }
            cur = self.arena.records[cur as usize].next;
        }
        let head = self.nodes[node_idx as usize].freq_head;
        let new_head = self.arena.alloc(head, delta, lang, stopgram)?;
        self.nodes[node_idx as usize].freq_head = new_head;
        Ok(())
    }

    /// Frequency of `key` for `lang`, or 0 if the language has no record or
    /// the key is absent.
    pub fn frequency(&self, key: &[u8], length: usize, lang: u32) -> u32 {
        let Some(node_idx) = self.navigate_lookup(key, length) else {
            return 0;
        };
        let mut cur = self.nodes[node_idx as usize].freq_head;
        while cur != INVALID_RECORD {
            let rec = &self.arena.records[cur as usize];
            if rec.lang() == lang {
                return rec.frequency;
            }
            cur = rec.next;
        }
        0
    }

    pub fn is_stopgram(&self, key: &[u8], length: usize, lang: u32) -> bool {
        let Some(node_idx) = self.navigate_lookup(key, length) else {
            return false;
        };
        let mut cur = self.nodes[node_idx as usize].freq_head;
        while cur != INVALID_RECORD {
            let rec = &self.arena.records[cur as usize];
            if rec.lang() == lang {
                return rec.is_stopgram();
            }
            cur = rec.next;
        }
        false
    }

    /// All `(lang, frequency, stopgram)` records for a key, in arbitrary
    /// order (matches the invariant that per-leaf record order is
    /// unspecified).
    pub fn records(&self, key: &[u8], length: usize) -> Vec<(u32, u32, bool)> {
        let Some(node_idx) = self.navigate_lookup(key, length) else {
            return Vec::new();
        };
        self.records_at(node_idx)
    }

    fn records_at(&self, node_idx: u32) -> Vec<(u32, u32, bool)> {
        let mut out = Vec::new();
        let mut cur = self.nodes[node_idx as usize].freq_head;
        while cur != INVALID_RECORD {
            let rec = &self.arena.records[cur as usize];
            out.push((rec.lang(), rec.frequency, rec.is_stopgram()));
            cur = rec.next;
        }
        out
    }

    /// Number of per-language frequency records stored at `key`, i.e. how
    /// many distinct languages have contributed a frequency for this exact
    /// key. A key with no node at all, or a node with no records, counts
    /// as zero.
    pub fn num_records(&self, key: &[u8], length: usize) -> usize {
        let Some(node_idx) = self.navigate_lookup(key, length) else {
            return 0;
        };
        let mut count = 0;
        let mut cur = self.nodes[node_idx as usize].freq_head;
        while cur != INVALID_RECORD {
            count += 1;
            cur = self.arena.records[cur as usize].next;
        }
        count
    }

    /// Number of distinct leaves that carry at least one frequency record
    /// for `lang` (or, with `lang = None`, for any language at all).
    pub fn num_frequencies(&self, lang: Option<u32>) -> usize {
        let mut count = 0;
        for node in &self.nodes {
            if !node.is_leaf {
                continue;
            }
            match lang {
                None => {
                    if node.freq_head != INVALID_RECORD {
                        count += 1;
                    }
                }
                Some(l) => {
                    let mut cur = node.freq_head;
                    while cur != INVALID_RECORD {
                        if self.arena.records[cur as usize].lang() == l {
                            count += 1;
                            break;
                        }
                        cur = self.arena.records[cur as usize].next;
                    }
                }
            }
        }
        count
    }

    /// Total number of frequency records across the whole trie.
    pub fn num_frequency_records(&self) -> usize {
        self.arena.records.len()
    }

    /// Raw `(children, freqHead, isLeaf)` for on-disk writing in the legacy
    /// writable-trie format.
    pub fn node_raw(&self, idx: u32) -> (&[u32], u32, bool) {
        let n = &self.nodes[idx as usize];
        (&n.children, n.freq_head, n.is_leaf)
    }

    /// Raw `(next, frequency, langAndFlag)` for on-disk writing.
    pub fn freq_record_raw(&self, idx: u32) -> (u32, u32, u32) {
        let r = &self.arena.records[idx as usize];
        (r.next, r.frequency, r.lang_and_flag)
    }

    /// Rebuild a trie from on-disk raw node/record arrays, as read by the
    /// legacy writable-trie format reader.
    pub fn from_raw_parts(
        bits: BitsPerLevel,
        ignore_whitespace: bool,
        nodes_raw: Vec<(Vec<u32>, u32, bool)>,
        records_raw: Vec<(u32, u32, u32)>,
    ) -> Self {
        let nodes = nodes_raw
            .into_iter()
            .map(|(children, freq_head, is_leaf)| MwtNode {
                children,
                freq_head,
                is_leaf,
            })
            .collect();
        let records = records_raw
            .into_iter()
            .map(|(next, frequency, lang_and_flag)| FreqRecord {
                next,
                frequency,
                lang_and_flag,
            })
            .collect();
        Self {
            bits,
            ignore_whitespace,
            nodes,
            arena: FrequencyArena {
                records,
                max_records: usize::MAX,
            },
            max_nodes: usize::MAX,
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the node at `key` has any outgoing edge at all (nybble-level,
    /// not necessarily byte-aligned). Used by the packed-trie builder to
    /// decide whether a node's children need their own full-node records or
    /// can be compacted into terminal-node records: a child counts as
    /// terminal only if it has no children of its own, checked directly
    /// against the node's child-link array rather than by probing keys.
    pub fn has_children(&self, key: &[u8], length: usize) -> bool {
        let Some(node_idx) = self.navigate_lookup(key, length) else {
            return false;
        };
        self.nodes[node_idx as usize].children.iter().any(|&c| c != NULL)
    }

    /// Depth-first enumeration of leaves, like [`crate::wt::WritableTrie::enumerate`]
    /// but the visitor additionally receives all per-language records at
    /// that leaf.
    pub fn enumerate<F>(&self, max_len: usize, mut visit: F)
    where
        F: FnMut(u32, &[u8], usize, &[(u32, u32, bool)]) -> bool,
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
                if depth > 0
                    && self.nodes[node as usize].is_leaf
                    && keys::is_byte_aligned(depth, self.bits)
                    && depth <= max_depth
                {
                    let key = keys::nybbles_to_key(&path, self.bits);
                    let records = self.records_at(node);
                    if !visit(node, &key, key.len(), &records) {
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

    /// Scale every record's frequency for `lang` in place per [`Smoothing`].
    pub fn scale_frequencies(&mut self, lang: u32, total: u64, smoothing: Smoothing) {
        let arena_len = self.arena.records.len();
        for i in 0..arena_len {
            if self.arena.records[i].lang() == lang {
                let r = self.arena.records[i].frequency as u64;
                let scaled = smoothing.apply(r, total).round().clamp(0.0, u32::MAX as f64) as u32;
                self.arena.records[i].frequency = scaled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_2() -> MultiWritableTrie {
        let mut mwt = MultiWritableTrie::new(BitsPerLevel::Two, false, 64);
        mwt.set_frequency(b"cat", 3, 1, 10, false).unwrap(); // en
        mwt.set_frequency(b"dog", 3, 1, 5, false).unwrap(); // en
        mwt.set_frequency(b"cat", 3, 2, 8, false).unwrap(); // fr
        mwt
    }

    #[test]
    fn scenario_2_frequencies_and_counts() {
        let mwt = scenario_2();
        assert_eq!(mwt.frequency(b"cat", 3, 1), 10);
        assert_eq!(mwt.frequency(b"cat", 3, 2), 8);
        assert_eq!(mwt.frequency(b"dog", 3, 1), 5);
        assert_eq!(mwt.frequency(b"dog", 3, 2), 0);
        // Two leaves ("cat", "dog") carry at least one record.
        assert_eq!(mwt.num_frequencies(None), 2);
        // "cat" itself carries two per-language records (en, fr).
        assert_eq!(mwt.num_records(b"cat", 3), 2);
        assert_eq!(mwt.num_records(b"dog", 3), 1);
    }

    #[test]
    fn set_frequency_updates_in_place() {
        let mut mwt = scenario_2();
        mwt.set_frequency(b"cat", 3, 1, 99, false).unwrap();
        assert_eq!(mwt.frequency(b"cat", 3, 1), 99);
        assert_eq!(mwt.frequency(b"cat", 3, 2), 8);
        assert_eq!(mwt.records(b"cat", 3).len(), 2);
    }

    #[test]
    fn increment_is_additive() {
        let mut mwt = MultiWritableTrie::new(BitsPerLevel::Two, false, 16);
        mwt.increment(b"ab", 2, 1, 3, false).unwrap();
        mwt.increment(b"ab", 2, 1, 4, false).unwrap();
        assert_eq!(mwt.frequency(b"ab", 2, 1), 7);
    }

    #[test]
    fn missing_language_reports_zero() {
        let mwt = scenario_2();
        assert_eq!(mwt.frequency(b"cat", 3, 999), 0);
        assert!(!mwt.is_stopgram(b"cat", 3, 999));
    }

    #[test]
    fn enumerate_visits_all_leaves_with_records() {
        let mwt = scenario_2();
        let mut total_records = 0;
        mwt.enumerate(3, |_node, _key, _len, records| {
            total_records += records.len();
            true
        });
        assert_eq!(total_records, 3);
    }

    #[test]
    fn stopgram_flag_round_trips() {
        let mut mwt = MultiWritableTrie::new(BitsPerLevel::Two, false, 16);
        mwt.set_frequency(b"xx", 2, 7, 0, true).unwrap();
        assert!(mwt.is_stopgram(b"xx", 2, 7));
        assert_eq!(mwt.frequency(b"xx", 2, 7), 0);
    }
}
