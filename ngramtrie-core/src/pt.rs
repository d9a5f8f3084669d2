//! Packed read-only trie (PT): the compact, memory-mappable form of an
//! [`crate::mwt::MultiWritableTrie`]. One contiguous array for full nodes,
//! one for terminal nodes, one for frequency records; children are found
//! by bitmap + popcount in O(1), and frequencies are quantised to a
//! 15-bit mantissa + 2-bit exponent so the hot scoring path never touches
//! a float until the final table lookup.
//!
//! A [`PackedTrie`] is always byte-granular: every level branches on a
//! full byte value (fan-out 256), independent of whatever nybble width
//! the source MWT used internally for its own storage. Its bits-per-level
//! is therefore always [`BitsPerLevel::Eight`], not `mwt.bits()`.

use std::collections::VecDeque;

use crate::error::Result;
use crate::keys::BitsPerLevel;
use crate::mwt::MultiWritableTrie;

/// Bits-per-level this build of the reader is compiled for. A packed-trie
/// file whose header byte disagrees is rejected at load time, mirroring
/// the "must match the reader's compile-time setting" rule without
/// requiring const-generic node layouts.
pub const DEFAULT_BITS_PER_LEVEL: u8 = 8;

pub const EXPONENT_SCALE: u32 = 2;
pub const MAX_EXPONENT: u8 = 3;
pub const MANTISSA_BITS: u32 = 15;

/// High bit of a child index: set when the index names a slot in the
/// terminal-node array rather than the full-node array.
const TERMINAL_BIT: u32 = 0x8000_0000;
/// Sentinel "no frequency list" value for a node's `freq_index`.
const NO_FREQ: u32 = u32::MAX;

const LANG_BITS: u32 = 13;
const LANG_MASK: u32 = (1 << LANG_BITS) - 1;

/// Quantise a raw (already percentage-scaled) frequency into a 15-bit
/// mantissa + 2-bit exponent. Shifts left by [`EXPONENT_SCALE`] bits per
/// exponent step while the top two bits are clear and the exponent is
/// below [`MAX_EXPONENT`]; the mantissa is the upper 15 bits of the result.
/// Forces the mantissa to its smallest nonzero value if masking would
/// otherwise produce zero from a nonzero input.
pub fn quantise(f: u32) -> (u16, u8) {
    if f == 0 {
        return (0, 0);
    }
    let mut v = f;
    let mut exponent: u32 = 0;
    while (v & 0xC000_0000) == 0 && exponent < MAX_EXPONENT as u32 {
        v <<= EXPONENT_SCALE;
        exponent += 1;
    }
    let mantissa = ((v >> 17) & 0x7FFF) as u16;
    let mantissa = if mantissa == 0 { 1 } else { mantissa };
    (mantissa, exponent as u8)
}

/// Reconstruct an approximate frequency from a quantised mantissa/exponent
/// pair: `mantissa >> (2 * exponent)`... inverted, i.e.
/// `mantissa << 17 >> (EXPONENT_SCALE * exponent)`.
pub fn dequantise(mantissa: u16, exponent: u8) -> u32 {
    let v = (mantissa as u32) << 17;
    v >> (EXPONENT_SCALE * exponent as u32)
}

/// Smallest nonzero value a quantised record can reconstruct to: mantissa
/// 1 at the maximum exponent. Stop-gram candidates below
/// `2 * MIN_REPRESENTABLE` are not worth keeping.
pub fn min_representable() -> u32 {
    dequantise(1, MAX_EXPONENT)
}

fn pack_record(lang: u32, last: bool, stopgram: bool, exponent: u8, mantissa: u16) -> u32 {
    (mantissa as u32 & 0x7FFF)
        | ((exponent as u32 & 0x3) << MANTISSA_BITS)
        | ((stopgram as u32) << (MANTISSA_BITS + 2))
        | ((last as u32) << (MANTISSA_BITS + 3))
        | ((lang & LANG_MASK) << (MANTISSA_BITS + 4))
}

fn unpack_record(word: u32) -> (u32, bool, bool, u8, u16) {
    let mantissa = (word & 0x7FFF) as u16;
    let exponent = ((word >> MANTISSA_BITS) & 0x3) as u8;
    let stopgram = ((word >> (MANTISSA_BITS + 2)) & 0x1) != 0;
    let last = ((word >> (MANTISSA_BITS + 3)) & 0x1) != 0;
    let lang = (word >> (MANTISSA_BITS + 4)) & LANG_MASK;
    (lang, last, stopgram, exponent, mantissa)
}

fn is_terminal_index(idx: u32) -> bool {
    idx & TERMINAL_BIT != 0
}

fn strip_terminal_bit(idx: u32) -> u32 {
    idx & !TERMINAL_BIT
}

/// Precomputed `(mantissa, exponent, stop-gram) -> score` lookup so the
/// scoring hot path never repeats the dequantisation arithmetic.
#[derive(Debug, Clone)]
pub struct ValueMap {
    table: Vec<f32>,
}

impl ValueMap {
    /// Build a value map from a user-supplied mapping function.
    pub fn build<F: Fn(u16, u8, bool) -> f32>(f: F) -> Self {
        let size = 1usize << 18; // 15-bit mantissa + 2-bit exponent + 1-bit stopgram
        let mut table = vec![0f32; size];
        for idx in 0..size {
            let mantissa = ((idx >> 3) & 0x7FFF) as u16;
            let exponent = ((idx >> 1) & 0x3) as u8;
            let stopgram = (idx & 1) != 0;
            table[idx] = f(mantissa, exponent, stopgram);
        }
        Self { table }
    }

    /// Default mapping: the dequantised scaled percentage, negated for
    /// stop-grams so they act as negative evidence in a downstream scorer.
    pub fn default_map() -> Self {
        Self::build(|m, e, stopgram| {
            let v = dequantise(m, e) as f32;
            if stopgram {
                -v
            } else {
                v
            }
        })
    }

    pub fn lookup(&self, mantissa: u16, exponent: u8, stopgram: bool) -> f32 {
        let idx = ((mantissa as usize & 0x7FFF) << 3) | ((exponent as usize & 0x3) << 1) | (stopgram as usize);
        self.table[idx]
    }
}

#[derive(Debug, Clone)]
struct FullNode {
    first_child: u32,
    bitmap: Vec<u32>,
    popcount_prefix: Vec<u32>,
    freq_index: u32,
}

#[derive(Debug, Clone)]
struct TerminalNode {
    freq_index: u32,
}

/// A fully built, read-only packed trie.
#[derive(Debug, Clone)]
pub struct PackedTrie {
    bits: BitsPerLevel,
    ignore_whitespace: bool,
    case_sensitivity: u8,
    longest_key: u32,
    full_nodes: Vec<FullNode>,
    terminal_nodes: Vec<TerminalNode>,
    freq_records: Vec<u32>,
    value_map: ValueMap,
}

enum ChildKind {
    Full,
    Terminal,
}

impl PackedTrie {
    pub fn bits(&self) -> BitsPerLevel {
        self.bits
    }
    pub fn ignore_whitespace(&self) -> bool {
        self.ignore_whitespace
    }
    pub fn case_sensitivity(&self) -> u8 {
        self.case_sensitivity
    }
    pub fn longest_key(&self) -> u32 {
        self.longest_key
    }
    pub fn num_full_nodes(&self) -> usize {
        self.full_nodes.len()
    }
    pub fn num_terminal_nodes(&self) -> usize {
        self.terminal_nodes.len()
    }
    pub fn num_frequency_records(&self) -> usize {
        self.freq_records.len()
    }

    /// Words per bitmap at this trie's bits-per-level setting. Fixed stride
    /// for the whole trie, used by [`crate::format`] to size full-node
    /// records on disk.
    pub fn bitmap_words(&self) -> usize {
        self.bits.fanout().div_ceil(32)
    }

    /// Raw `(firstChild, bitmap words, freqIndex)` for on-disk writing. The
    /// popcount-prefix table is an in-memory acceleration structure only —
    /// it is cheap to recompute from the bitmap and is not persisted.
    pub fn full_node_raw(&self, i: usize) -> (u32, &[u32], u32) {
        let n = &self.full_nodes[i];
        (n.first_child, &n.bitmap, n.freq_index)
    }

    pub fn terminal_node_raw(&self, i: usize) -> u32 {
        self.terminal_nodes[i].freq_index
    }

    pub fn freq_record_raw(&self, i: usize) -> u32 {
        self.freq_records[i]
    }

    /// Rebuild a `PackedTrie` from on-disk arrays. Recomputes every full
    /// node's popcount-prefix table from its bitmap.
    #[allow(clippy::too_many_arguments)]
    pub fn from_raw_parts(
        bits: BitsPerLevel,
        ignore_whitespace: bool,
        case_sensitivity: u8,
        longest_key: u32,
        full_nodes_raw: Vec<(u32, Vec<u32>, u32)>,
        terminal_freq_indices: Vec<u32>,
        freq_records: Vec<u32>,
        value_map: ValueMap,
    ) -> Self {
        let full_nodes = full_nodes_raw
            .into_iter()
            .map(|(first_child, bitmap, freq_index)| {
                let mut popcount_prefix = vec![0u32; bitmap.len()];
                let mut running = 0u32;
                for (w, word) in bitmap.iter().enumerate() {
                    popcount_prefix[w] = running;
                    running += word.count_ones();
                }
                FullNode {
                    first_child,
                    bitmap,
                    popcount_prefix,
                    freq_index,
                }
            })
            .collect();
        let terminal_nodes = terminal_freq_indices
            .into_iter()
            .map(|freq_index| TerminalNode { freq_index })
            .collect();
        Self {
            bits,
            ignore_whitespace,
            case_sensitivity,
            longest_key,
            full_nodes,
            terminal_nodes,
            freq_records,
            value_map,
        }
    }

    /// Build a packed trie from a multi-language writable trie. `value_map`
    /// supplies the scoring-value table; pass [`ValueMap::default_map`] for
    /// the stock behaviour.
    pub fn from_mwt(
        mwt: &MultiWritableTrie,
        ignore_whitespace: bool,
        case_sensitivity: u8,
        value_map: ValueMap,
    ) -> Result<Self> {
        // The construction loop below always walks children by full byte
        // value (0..=255), so the bitmap must be sized for a 256-wide
        // fan-out regardless of the source MWT's own nybble width.
        let bits = BitsPerLevel::Eight;
        let fanout = bits.fanout();
        let words = fanout.div_ceil(32);

        let mut full_nodes: Vec<FullNode> = vec![FullNode {
            first_child: 0,
            bitmap: vec![0u32; words],
            popcount_prefix: vec![0u32; words],
            freq_index: NO_FREQ,
        }];
        let mut terminal_nodes: Vec<TerminalNode> = Vec::new();
        let mut freq_records: Vec<u32> = Vec::new();
        let mut longest_key: u32 = 0;

        struct Pending {
            mwt_key: Vec<u8>,
            out_index: usize,
        }
        let mut queue: VecDeque<Pending> = VecDeque::new();
        queue.push_back(Pending {
            mwt_key: Vec::new(),
            out_index: 0,
        });

        let alloc_freq_list = |records: &[(u32, u32, bool)], out: &mut Vec<u32>| -> u32 {
            if records.is_empty() {
                return NO_FREQ;
            }
            let start = out.len() as u32;
            let n = records.len();
            for (i, &(lang, freq, stopgram)) in records.iter().enumerate() {
                let (mantissa, exponent) = quantise(freq);
                let last = i + 1 == n;
                out.push(pack_record(lang, last, stopgram, exponent, mantissa));
            }
            start
        };

        while let Some(Pending { mwt_key, out_index }) = queue.pop_front() {
            longest_key = longest_key.max(mwt_key.len() as u32);

            // own frequency list (the node may terminate a key even if it
            // also has children).
            let own_records = mwt.records(&mwt_key, mwt_key.len());
            full_nodes[out_index].freq_index = alloc_freq_list(&own_records, &mut freq_records);

            // enumerate this node's immediate children by extending the key
            // one byte at a time and checking which extensions exist.
            let mut present: Vec<(usize, Vec<u8>, bool)> = Vec::new();
            for b in 0..=255u16 {
                let byte = b as u8;
                let mut child_key = mwt_key.clone();
                child_key.push(byte);
                if mwt_node_present(mwt, &child_key) {
                    let has_children = mwt.has_children(&child_key, child_key.len());
                    present.push((byte as usize, child_key, has_children));
                }
                if b == 255 {
                    break;
                }
            }

            if present.is_empty() {
                continue;
            }

            let all_terminal = present.iter().all(|(_, _, has_children)| !has_children);

            let mut bitmap = vec![0u32; words];
            for (bit, _, _) in &present {
                bitmap[bit / 32] |= 1 << (bit % 32);
            }
            let mut popcount_prefix = vec![0u32; words];
            let mut running = 0u32;
            for w in 0..words {
                popcount_prefix[w] = running;
                running += bitmap[w].count_ones();
            }

            if all_terminal {
                let first = terminal_nodes.len() as u32;
                full_nodes[out_index].first_child = first | TERMINAL_BIT;
                for (_, child_key, _) in &present {
                    let recs = mwt.records(child_key, child_key.len());
                    let freq_index = alloc_freq_list(&recs, &mut freq_records);
                    terminal_nodes.push(TerminalNode { freq_index });
                }
            } else {
                let first = full_nodes.len() as u32;
                full_nodes[out_index].first_child = first;
                for (_, child_key, _) in &present {
                    let idx = full_nodes.len();
                    full_nodes.push(FullNode {
                        first_child: 0,
                        bitmap: vec![0u32; words],
                        popcount_prefix: vec![0u32; words],
                        freq_index: NO_FREQ,
                    });
                    queue.push_back(Pending {
                        mwt_key: child_key.clone(),
                        out_index: idx,
                    });
                }
            }
            full_nodes[out_index].bitmap = bitmap;
            full_nodes[out_index].popcount_prefix = popcount_prefix;
        }

        Ok(Self {
            bits,
            ignore_whitespace,
            case_sensitivity,
            longest_key,
            full_nodes,
            terminal_nodes,
            freq_records,
            value_map,
        })
    }

    fn child_index(&self, node: &FullNode, i: usize) -> Option<u32> {
        let word = i / 32;
        let bit = i % 32;
        if word >= node.bitmap.len() || (node.bitmap[word] & (1 << bit)) == 0 {
            return None;
        }
        let before_this_word = node.bitmap[word] & ((1u32 << bit).wrapping_sub(1));
        let offset = node.popcount_prefix[word] + before_this_word.count_ones();
        Some(node.first_child + offset)
    }

    fn resolve(&self, idx: u32) -> (ChildKind, usize) {
        if is_terminal_index(idx) {
            (ChildKind::Terminal, strip_terminal_bit(idx) as usize)
        } else {
            (ChildKind::Full, idx as usize)
        }
    }

    fn records_for(&self, freq_index: u32) -> Vec<(u32, u32, bool)> {
        if freq_index == NO_FREQ {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut i = freq_index as usize;
        loop {
            let word = self.freq_records[i];
            let (lang, last, stopgram, exponent, mantissa) = unpack_record(word);
            out.push((lang, dequantise(mantissa, exponent), stopgram));
            if last {
                break;
            }
            i += 1;
        }
        out
    }

    /// All `(lang, dequantised-frequency, stopgram)` records stored at `key`.
    pub fn records(&self, key: &[u8]) -> Vec<(u32, u32, bool)> {
        let mut node_idx = 0usize;
        let mut kind = ChildKind::Full;
        for &byte in key {
            match kind {
                ChildKind::Full => {
                    let node = &self.full_nodes[node_idx];
                    match self.child_index(node, byte as usize) {
                        Some(idx) => {
                            let (k, i) = self.resolve(idx);
                            kind = k;
                            node_idx = i;
                        }
                        None => return Vec::new(),
                    }
                }
                ChildKind::Terminal => return Vec::new(),
            }
        }
        match kind {
            ChildKind::Full => self.records_for(self.full_nodes[node_idx].freq_index),
            ChildKind::Terminal => self.records_for(self.terminal_nodes[node_idx].freq_index),
        }
    }

    /// Scoring value for `key` under `lang`, via the value map. `0.0` if
    /// absent.
    pub fn value(&self, key: &[u8], lang: u32) -> f32 {
        for (l, freq, stopgram) in self.records(key) {
            if l == lang {
                let (m, e) = quantise(freq);
                return self.value_map.lookup(m, e, stopgram);
            }
        }
        0.0
    }

    /// Depth-first enumeration over children in bitmap order. The visitor
    /// is called once per leaf (terminal node, or full node carrying its
    /// own frequency list); descent stops at terminal nodes.
    pub fn enumerate<F>(&self, mut visit: F)
    where
        F: FnMut(&[u8], &[(u32, u32, bool)]) -> bool,
    {
        fn walk(
            pt: &PackedTrie,
            kind: ChildKind,
            idx: usize,
            path: &mut Vec<u8>,
            visit: &mut dyn FnMut(&[u8], &[(u32, u32, bool)]) -> bool,
        ) -> bool {
            match kind {
                ChildKind::Terminal => {
                    let freq_index = pt.terminal_nodes[idx].freq_index;
                    let recs = pt.records_for(freq_index);
                    if !recs.is_empty() && !visit(path, &recs) {
                        return false;
                    }
                    true
                }
                ChildKind::Full => {
                    let node = &pt.full_nodes[idx];
                    let recs = pt.records_for(node.freq_index);
                    if !recs.is_empty() && !visit(path, &recs) {
                        return false;
                    }
                    let fanout = pt.bits.fanout();
                    for i in 0..fanout {
                        if let Some(child_idx) = pt.child_index(node, i) {
                            let (k, ci) = pt.resolve(child_idx);
                            path.push(i as u8);
                            let cont = walk(pt, k, ci, path, visit);
                            path.pop();
                            if !cont {
                                return false;
                            }
                        }
                    }
                    true
                }
            }
        }
        let mut path = Vec::new();
        walk(self, ChildKind::Full, 0, &mut path, &mut visit);
    }

    /// Recover a (lossy, through quantisation) [`MultiWritableTrie`] by
    /// re-inserting every enumerated `(key, lang, freq, stopgram)` triple.
    pub fn compact_to_mwt(&self) -> Result<MultiWritableTrie> {
        let mut mwt = MultiWritableTrie::new(self.bits, self.ignore_whitespace, self.full_nodes.len());
        let mut err = None;
        self.enumerate(|key, records| {
            for &(lang, freq, stopgram) in records {
                if let Err(e) = mwt.set_frequency(key, key.len(), lang, freq, stopgram) {
                    err = Some(e);
                    return false;
                }
            }
            true
        });
        if let Some(e) = err {
            return Err(e);
        }
        Ok(mwt)
    }
}

fn mwt_node_present(mwt: &MultiWritableTrie, key: &[u8]) -> bool {
    !mwt.records(key, key.len()).is_empty() || mwt.has_children(key, key.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::BitsPerLevel;

    fn scenario_2() -> MultiWritableTrie {
        let mut mwt = MultiWritableTrie::new(BitsPerLevel::Eight, false, 64);
        mwt.set_frequency(b"cat", 3, 1, 10, false).unwrap();
        mwt.set_frequency(b"dog", 3, 1, 5, false).unwrap();
        mwt.set_frequency(b"cat", 3, 2, 8, false).unwrap();
        mwt
    }

    #[test]
    fn quantise_monotonic_within_one_lsb() {
        let (m1, e1) = quantise(100);
        let (m2, e2) = quantise(1000);
        assert!(dequantise(m1, e1) <= dequantise(m2, e2));
    }

    #[test]
    fn quantise_never_zero_for_nonzero_input() {
        for f in [1u32, 2, 100, 1 << 20, u32::MAX] {
            let (m, _e) = quantise(f);
            assert_ne!(m, 0);
        }
        let (m, e) = quantise(0);
        assert_eq!((m, e), (0, 0));
    }

    #[test]
    fn scenario_3_build_pt_and_roundtrip() {
        let mwt = scenario_2();
        let pt = PackedTrie::from_mwt(&mwt, false, 0, ValueMap::default_map()).unwrap();
        let cat = pt.records(b"cat");
        let mut langs: Vec<u32> = cat.iter().map(|r| r.0).collect();
        langs.sort();
        assert_eq!(langs, vec![1, 2]);
        let dog = pt.records(b"dog");
        assert_eq!(dog.len(), 1);
        assert_eq!(dog[0].0, 1);

        // dequantised frequencies round-trip within one mantissa LSB
        for (lang, freq, _) in &cat {
            let orig = mwt.frequency(b"cat", 3, *lang);
            let (m, e) = quantise(orig);
            assert_eq!(dequantise(m, e), *freq);
        }
    }

    #[test]
    fn popcount_child_indices_strictly_increase() {
        let mwt = scenario_2();
        let pt = PackedTrie::from_mwt(&mwt, false, 0, ValueMap::default_map()).unwrap();
        let root = &pt.full_nodes[0];
        let mut indices = Vec::new();
        for i in 0..pt.bits.fanout() {
            if let Some(idx) = pt.child_index(root, i) {
                indices.push(idx);
            }
        }
        for w in indices.windows(2) {
            assert!(w[1] > w[0]);
        }
        if let Some(&first) = indices.first() {
            assert_eq!(strip_terminal_bit(first), root.first_child & !TERMINAL_BIT);
        }
    }

    #[test]
    fn compaction_recovers_frequencies() {
        let mwt = scenario_2();
        let pt = PackedTrie::from_mwt(&mwt, false, 0, ValueMap::default_map()).unwrap();
        let recovered = pt.compact_to_mwt().unwrap();
        assert_eq!(recovered.frequency(b"cat", 3, 1), mwt.frequency(b"cat", 3, 1));
        assert_eq!(recovered.frequency(b"dog", 3, 1), mwt.frequency(b"dog", 3, 1));
    }

    #[test]
    fn idempotent_pack_is_byte_identical_structurally() {
        let mwt = scenario_2();
        let a = PackedTrie::from_mwt(&mwt, false, 0, ValueMap::default_map()).unwrap();
        let b = PackedTrie::from_mwt(&mwt, false, 0, ValueMap::default_map()).unwrap();
        assert_eq!(a.full_nodes.len(), b.full_nodes.len());
        assert_eq!(a.terminal_nodes.len(), b.terminal_nodes.len());
        assert_eq!(a.freq_records, b.freq_records);
    }

    proptest::proptest! {
        #[test]
        fn quantise_dequantise_monotonic(a in 1u32..1_000_000_000u32, b in 1u32..1_000_000_000u32) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let (m1, e1) = quantise(lo);
            let (m2, e2) = quantise(hi);
            proptest::prop_assert!(dequantise(m1, e1) <= dequantise(m2, e2) + (1u32 << (EXPONENT_SCALE * MAX_EXPONENT as u32)));
        }
    }
}
