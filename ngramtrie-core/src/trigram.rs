//! Trigram counting: the builder's seed statistics.
//!
//! A dense `256^3` count array, updated by one pass over the preprocessed
//! byte stream, optionally alongside a `256^2` bigram table. Kept as its
//! own module because both the seed step and the stop-gram "unique to this
//! model" boost want a plain trigram/bigram histogram without dragging in
//! the trie machinery.

use crate::preprocessing::ByteSource;

const TRIGRAM_SPACE: usize = 256 * 256 * 256;
const BIGRAM_SPACE: usize = 256 * 256;

/// Dense trigram (and optional bigram) histogram over a byte stream.
///
/// The count array is intentionally dense (not a hash map): training
/// corpora of arbitrary size stream through a fixed `256^3` array exactly
/// once, and a dense array keeps that pass allocation-free after
/// construction.
pub struct TrigramCounter {
    trigrams: Vec<u64>,
    bigrams: Option<Vec<u64>>,
}

fn trigram_index(a: u8, b: u8, c: u8) -> usize {
    (a as usize) << 16 | (b as usize) << 8 | (c as usize)
}

fn bigram_index(a: u8, b: u8) -> usize {
    (a as usize) << 8 | (b as usize)
}

impl TrigramCounter {
    /// Construct an empty counter. `with_bigrams` also accumulates a
    /// `256^2` bigram table alongside the trigram one.
    pub fn new(with_bigrams: bool) -> Self {
        Self {
            trigrams: vec![0u64; TRIGRAM_SPACE],
            bigrams: if with_bigrams {
                Some(vec![0u64; BIGRAM_SPACE])
            } else {
                None
            },
        }
    }

    /// Stream `source`'s bytes once, incrementing every trigram (and
    /// bigram, if enabled) position, then zero any trigram position that
    /// the source's [`BigramMode`](crate::preprocessing::BigramMode) says
    /// crosses a two-byte frame boundary.
    pub fn count<S: ByteSource>(&mut self, source: &S) {
        let bytes = source.bytes();
        let mode = source.bigram_mode();
        if bytes.len() >= 2 {
            if let Some(bigrams) = &mut self.bigrams {
                for i in 0..bytes.len() - 1 {
                    bigrams[bigram_index(bytes[i], bytes[i + 1])] += 1;
                }
            }
        }
        if bytes.len() < 3 {
            return;
        }
        for pos in 0..bytes.len() - 2 {
            if mode.crosses_frame_boundary(pos) {
                continue;
            }
            let idx = trigram_index(bytes[pos], bytes[pos + 1], bytes[pos + 2]);
            self.trigrams[idx] += 1;
        }
    }

    pub fn trigram_count(&self, a: u8, b: u8, c: u8) -> u64 {
        self.trigrams[trigram_index(a, b, c)]
    }

    pub fn bigram_count(&self, a: u8, b: u8) -> Option<u64> {
        self.bigrams.as_ref().map(|t| t[bigram_index(a, b)])
    }

    /// The top `k` trigrams by count, descending, ties broken by byte
    /// value for determinism. Zero-count trigrams are never returned.
    pub fn top_k(&self, k: usize) -> Vec<([u8; 3], u64)> {
        let mut entries: Vec<([u8; 3], u64)> = Vec::new();
        for a in 0..=255u16 {
            for b in 0..=255u16 {
                for c in 0..=255u16 {
                    let idx = trigram_index(a as u8, b as u8, c as u8);
                    let count = self.trigrams[idx];
                    if count > 0 {
                        entries.push(([a as u8, b as u8, c as u8], count));
                    }
                    if c == 255 {
                        break;
                    }
                }
                if b == 255 {
                    break;
                }
            }
            if a == 255 {
                break;
            }
        }
        entries.sort_by(|x, y| y.1.cmp(&x.1).then(x.0.cmp(&y.0)));
        entries.truncate(k);
        entries
    }

    pub fn total_bytes(&self) -> u64 {
        self.trigrams.iter().sum()
    }
}
