//! Builder & maintenance: the phase pipeline that turns raw training text
//! into a packed frequency store. Each phase is its own method so a
//! trainer front-end can interleave per-file-group error handling between
//! phases rather than only at the end of a monolithic call — a failed
//! phase aborts without corrupting the partially built trie, leaving the
//! prior state valid for retry.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::freq::Smoothing;
use crate::keys::BitsPerLevel;
use crate::mwt::MultiWritableTrie;
use crate::preprocessing::{BigramMode, ByteSource};
use crate::pt::{self, PackedTrie};
use crate::trigram::TrigramCounter;
use crate::wt::WritableTrie;

/// Tunable parameters for a single language's training run, gathered into
/// one serde struct so a trainer invocation can be driven by a config file
/// as well as by flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Target vocabulary size (`-k`).
    pub top_k: usize,
    /// Minimum n-gram length (`-m`).
    pub min_len: usize,
    /// Maximum n-gram length (`-M`).
    pub max_len: usize,
    /// Affix-suppression ratio (`-a`).
    pub affix_ratio: f64,
    /// Stricter affix ratio applied at the minimum length.
    pub min_length_affix_ratio: f64,
    /// Alignment offset for affix suppression (`-A`).
    pub alignment: usize,
    /// Smoothing power (`-S`).
    pub smoothing_power: i32,
    /// Bigram-padding mode (`-2`/`-8`).
    pub bigram_mode: BigramMode,
    /// Unique-n-gram frequency boost (`-B`), default 1 (no boost).
    pub unique_boost: u32,
    /// Cross-model similarity threshold for automatic confusable-language
    /// selection (`-R @threshold`).
    pub related_language_threshold: Option<f64>,
    /// Whitespace-skipping policy, shared by the WT and MWT this config
    /// drives (`-i`).
    pub ignore_whitespace: bool,
    /// Bits-per-level for the writable tries built during training.
    pub wt_bits: BitsPerLevel,
    /// Oversampling factor applied to `top_k` when seeding.
    pub seed_oversample: f64,
}

impl BuilderConfig {
    /// Load a trainer configuration from a TOML file.
    pub fn load_toml<P: AsRef<std::path::Path>>(path: P) -> std::result::Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save a trainer configuration to a TOML file.
    pub fn save_toml<P: AsRef<std::path::Path>>(&self, path: P) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            top_k: 2000,
            min_len: 1,
            max_len: 6,
            affix_ratio: 0.9,
            min_length_affix_ratio: 0.995,
            alignment: 0,
            smoothing_power: 0,
            bigram_mode: BigramMode::None,
            unique_boost: 1,
            related_language_threshold: None,
            ignore_whitespace: false,
            wt_bits: BitsPerLevel::Two,
            seed_oversample: 2.5,
        }
    }
}

/// Per-language metadata accumulated by the coverage pass, persisted
/// alongside the packed model so a downstream identifier can report
/// confidence.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CoverageStats {
    /// Fraction of training bytes that participate in at least one
    /// n-gram match.
    pub raw_coverage: f64,
    /// Count-of-matches per byte.
    pub weighted_coverage: f64,
    /// Square root of the sum of matched frequencies.
    pub freq_weighted_coverage: f64,
    /// Total number of leaf matches encountered.
    pub match_count: u64,
}

impl CoverageStats {
    /// Render as JSON, for the trainer's `-D` dump flag.
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Persist per-language coverage metadata as a bincode sidecar next to
    /// the packed model file, so a retrain can skip re-streaming the
    /// training text just to recover these numbers.
    pub fn save_bincode<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        bincode::serialize_into(writer, self).map_err(crate::error::TrieError::from)
    }

    /// Load coverage metadata previously written by [`Self::save_bincode`].
    pub fn load_bincode<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        bincode::deserialize_from(reader).map_err(crate::error::TrieError::from)
    }
}

struct CoverageAccumulator {
    bytes_with_match: u64,
    total_bytes: u64,
    match_weight_sum: f64,
    freq_weight_sum: f64,
    match_count: u64,
}

impl CoverageAccumulator {
    fn new() -> Self {
        Self {
            bytes_with_match: 0,
            total_bytes: 0,
            match_weight_sum: 0.0,
            freq_weight_sum: 0.0,
            match_count: 0,
        }
    }

    fn finish(self) -> CoverageStats {
        let total = self.total_bytes.max(1) as f64;
        CoverageStats {
            raw_coverage: self.bytes_with_match as f64 / total,
            weighted_coverage: self.match_weight_sum / total,
            freq_weighted_coverage: self.freq_weight_sum.sqrt(),
            match_count: self.match_count,
        }
    }
}

/// Drives the phase pipeline for a single language's training run.
pub struct Builder {
    config: BuilderConfig,
}

impl Builder {
    pub fn new(config: BuilderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Phase 1: trigram counting, delegated to [`TrigramCounter`], which
    /// already applies the bigram-mode frame-boundary zeroing.
    pub fn count_trigrams<S: ByteSource>(&self, source: &S) -> TrigramCounter {
        info!(bytes = source.bytes().len(), "counting trigrams");
        let mut counter = TrigramCounter::new(self.config.bigram_mode.is_16bit_padded());
        counter.count(source);
        counter
    }

    /// Phase 2: seed the writable trie with the top-K trigrams, oversampled
    /// by [`BuilderConfig::seed_oversample`] to leave room for subsequent
    /// pruning.
    pub fn seed_wt(&self, counter: &TrigramCounter) -> Result<WritableTrie> {
        let oversampled_k = ((self.config.top_k as f64) * self.config.seed_oversample).ceil() as usize;
        let top = counter.top_k(oversampled_k);
        debug!(requested = self.config.top_k, oversampled = oversampled_k, found = top.len(), "seeding writable trie");
        let mut wt = WritableTrie::new(self.config.wt_bits, self.config.ignore_whitespace, top.len().max(16));
        for (trigram, count) in &top {
            wt.insert(trigram, 3, (*count).min(u32::MAX as u64) as u32, false)?;
        }
        Ok(wt)
    }

    /// Length-extension step multiplier for the current configuration: the
    /// bigram mode's expansion factor, further doubled when the training
    /// corpus is judged "small" relative to the target
    /// vocabulary (`bytes * K < 10^11`).
    fn expansion_step(&self, total_bytes: u64) -> usize {
        let base = self.config.bigram_mode.expansion_factor();
        let small = (total_bytes as u128) * (self.config.top_k as u128) < 100_000_000_000u128;
        if small {
            base * 2
        } else {
            base
        }
    }

    /// Phases 3-4: iterative length extension with top-K pruning.
    /// Streams `source` once per length step, extending every
    /// surviving `(L-1)`-gram by one byte, then prunes by affix
    /// suppression and a top-K cutoff sized to `K / (maxLen - L + 3)`.
    /// Stops once a length step survives with nothing to extend.
    pub fn extend_lengths<S: ByteSource>(&self, wt: &mut WritableTrie, source: &S) -> Result<()> {
        let bytes = source.bytes();
        let total_bytes = bytes.len() as u64;
        let step = self.expansion_step(total_bytes).max(1);

        let mut current_len = 3usize;
        self.prune(wt, current_len, total_bytes)?;

        while current_len < self.config.max_len {
            let next_len = (current_len + step).min(self.config.max_len);
            info!(from = current_len, to = next_len, "length extension step");

            // Extend every surviving (current_len)-gram that appears as a
            // prefix at this stream position by the following byte.
            for pos in 0..bytes.len() {
                let end = (pos + current_len).min(bytes.len());
                if end - pos < current_len || pos + current_len >= bytes.len() {
                    continue;
                }
                let prefix = &bytes[pos..pos + current_len];
                if wt.lookup(prefix, current_len) == 0 && !wt.is_stopgram(prefix, current_len) {
                    continue;
                }
                let next_byte = bytes[pos + current_len];
                wt.increment_extension(prefix, next_byte, 1)?;
            }

            let survived = self.prune(wt, next_len, total_bytes)?;
            if survived == 0 {
                debug!(length = next_len, "no n-grams survived pruning, stopping extension");
                break;
            }
            current_len = next_len;
        }
        Ok(())
    }

    /// Apply affix suppression then a top-K cutoff at `length`, returning
    /// the number of leaves of exactly `length` bytes that survive.
    fn prune(&self, wt: &mut WritableTrie, length: usize, total_bytes: u64) -> Result<usize> {
        let ratio = if length <= self.config.min_len {
            self.config.min_length_affix_ratio
        } else {
            self.config.affix_ratio
        };
        if self.config.alignment > 0 {
            wt.affix_suppress_alignment(self.config.alignment, ratio, length);
        }
        wt.affix_suppress_chains(ratio, length);

        let denom = (self.config.max_len.saturating_sub(length) + 3).max(1);
        let target_count = self.config.top_k / denom;

        let mut freqs: Vec<(Vec<u8>, u32)> = Vec::new();
        wt.enumerate(length, |trie, _, key, len| {
            if len == length {
                freqs.push((key.to_vec(), trie.lookup(key, len)));
            }
            true
        });
        let _ = total_bytes;

        if freqs.len() <= target_count || target_count == 0 {
            return Ok(freqs.len());
        }
        freqs.sort_by(|a, b| b.1.cmp(&a.1));
        let threshold = freqs[target_count.saturating_sub(1)].1;
        let mut kept = 0usize;
        for (key, f) in &freqs {
            if *f < threshold {
                wt.demote(key, key.len());
            } else {
                kept += 1;
            }
        }
        debug!(length, target_count, kept, "top-K cutoff applied");
        Ok(kept)
    }

    /// Phase 5: coverage statistics. Streams `source` once,
    /// advancing a trie pointer at every position and accumulating the
    /// four coverage quantities over every leaf reached.
    pub fn coverage_stats<S: ByteSource>(&self, wt: &WritableTrie, source: &S) -> CoverageStats {
        let bytes = source.bytes();
        let mut acc = CoverageAccumulator::new();
        acc.total_bytes = bytes.len() as u64;

        for start in 0..bytes.len() {
            let mut cursor = wt.walk();
            let mut matched_here = false;
            for &b in &bytes[start..bytes.len().min(start + self.config.max_len)] {
                if !cursor.step(b) {
                    break;
                }
                if let Some((freq, stopgram)) = cursor.current_leaf() {
                    if !stopgram {
                        matched_here = true;
                        acc.match_weight_sum += 1.0;
                        acc.freq_weight_sum += freq as f64;
                        acc.match_count += 1;
                    }
                }
            }
            if matched_here {
                acc.bytes_with_match += 1;
            }
        }
        acc.finish()
    }

    /// Phase 6: stop-gram selection. For every record in a
    /// confusable language's packed trie that is (a) not itself a
    /// stop-gram there, (b) above the quantisation cutoff, inserts a
    /// zero-frequency stop-gram candidate into `wt` and accumulates its
    /// similarity-weighted score into the returned weight trie. Callers
    /// must follow with [`Self::finalize_stopgrams`] after re-streaming
    /// the training text to count candidate occurrences.
    pub fn collect_stopgram_candidates(
        &self,
        wt: &mut WritableTrie,
        confusables: &[(u32, f64, &PackedTrie)],
    ) -> Result<WritableTrie> {
        let cutoff = 2 * pt::min_representable();
        let mut weight_trie = WritableTrie::new(self.config.wt_bits, self.config.ignore_whitespace, 256);
        let mut err = None;
        for (lang, weight, model) in confusables {
            model.enumerate(|key, records| {
                for &(l, freq, stopgram) in records {
                    if l == *lang && !stopgram && freq > cutoff {
                        let scaled_weight = (*weight * freq as f64).round().clamp(0.0, u32::MAX as f64) as u32;
                        if let Err(e) = weight_trie.increment(key, key.len(), scaled_weight, false) {
                            err = Some(e);
                            return false;
                        }
                        if let Err(e) = wt.insert(key, key.len(), 0, true) {
                            err = Some(e);
                            return false;
                        }
                    }
                }
                true
            });
            if err.is_some() {
                break;
            }
        }
        if let Some(e) = err {
            return Err(e);
        }
        info!(candidates = weight_trie.num_nodes(), "collected stop-gram candidates");
        Ok(weight_trie)
    }

    /// Second half of phase 6: streams `source` once more, counting every
    /// candidate stop-gram's raw occurrence count in the current
    /// language's own text. Candidates at or below `survival_count` keep
    /// their stop-gram marking; candidates above it are demoted (they are
    /// common enough in this language to not serve as negative evidence).
    pub fn finalize_stopgrams<S: ByteSource>(
        &self,
        wt: &mut WritableTrie,
        weight_trie: &WritableTrie,
        source: &S,
        survival_count: u32,
    ) {
        let mut candidates: Vec<Vec<u8>> = Vec::new();
        weight_trie.enumerate(self.config.max_len, |_, _, key, len| {
            candidates.push(key[..len].to_vec());
            true
        });

        let bytes = source.bytes();
        for candidate in &candidates {
            let count = count_occurrences(bytes, candidate);
            if count > survival_count {
                wt.demote(candidate, candidate.len());
            }
        }
        debug!(checked = candidates.len(), "stop-gram candidates finalized");
    }

    /// Multiply the frequency of every n-gram in `wt` that has no record
    /// under any language in `confusables` by [`BuilderConfig::unique_boost`],
    /// rewarding n-grams unique to the current model.
    pub fn apply_unique_boost(&self, wt: &mut WritableTrie, confusables: &[(u32, &PackedTrie)]) {
        if self.config.unique_boost <= 1 {
            return;
        }
        let mut to_boost: Vec<Vec<u8>> = Vec::new();
        wt.enumerate(self.config.max_len, |trie, _, key, len| {
            if trie.is_stopgram(key, len) {
                return true;
            }
            let unique = confusables.iter().all(|(lang, model)| {
                !model.records(key).iter().any(|r| r.0 == *lang)
            });
            if unique {
                to_boost.push(key[..len].to_vec());
            }
            true
        });
        for key in &to_boost {
            let current = wt.lookup(key, key.len());
            let boosted = current.saturating_mul(self.config.unique_boost);
            let _ = wt.insert(key, key.len(), boosted, false);
        }
        debug!(boosted = to_boost.len(), "unique n-gram boost applied");
    }

    /// Phase 7 (first half): scale every surviving leaf's frequency using
    /// the configured smoothing power.
    pub fn scale(&self, wt: &mut WritableTrie, total_bytes: u64) {
        wt.scale_frequencies(total_bytes, Smoothing::new(self.config.smoothing_power));
    }

    /// Merges a single language's scaled [`WritableTrie`] into a
    /// multi-language trie.
    pub fn merge_into_mwt(&self, lang: u32, wt: &WritableTrie, mwt: &mut MultiWritableTrie) -> Result<()> {
        let mut err = None;
        wt.enumerate(self.config.max_len, |trie, _, key, len| {
            let freq = trie.lookup(key, len);
            let stopgram = trie.is_stopgram(key, len);
            if let Err(e) = mwt.set_frequency(key, len, lang, freq, stopgram) {
                err = Some(e);
                return false;
            }
            true
        });
        if let Some(e) = err {
            return Err(e);
        }
        Ok(())
    }

    /// Phase 7 (second half) + packing: builds the read-only [`PackedTrie`]
    /// from the assembled multi-language trie.
    pub fn pack(
        &self,
        mwt: &MultiWritableTrie,
        case_sensitivity: u8,
        value_map: crate::pt::ValueMap,
    ) -> Result<PackedTrie> {
        info!("packing multi-language trie");
        PackedTrie::from_mwt(mwt, self.config.ignore_whitespace, case_sensitivity, value_map)
    }
}

fn count_occurrences(haystack: &[u8], needle: &[u8]) -> u32 {
    if needle.is_empty() || haystack.len() < needle.len() {
        return 0;
    }
    let mut count = 0u32;
    for window in haystack.windows(needle.len()) {
        if window == needle {
            count += 1;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pt::ValueMap;

    fn tiny_corpus() -> Vec<u8> {
        b"the the the them them then banana banana apple".to_vec()
    }

    #[test]
    fn coverage_stats_bincode_round_trips() {
        let stats = CoverageStats {
            raw_coverage: 0.75,
            weighted_coverage: 1.5,
            freq_weighted_coverage: 12.25,
            match_count: 42,
        };
        let path = std::env::temp_dir().join("ngramtrie_coverage_stats_test.bincode");
        stats.save_bincode(&path).unwrap();
        let loaded = CoverageStats::load_bincode(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded.raw_coverage, stats.raw_coverage);
        assert_eq!(loaded.match_count, stats.match_count);
    }

    #[test]
    fn phase_pipeline_produces_nonempty_model() {
        let config = BuilderConfig {
            top_k: 50,
            min_len: 1,
            max_len: 4,
            ..BuilderConfig::default()
        };
        let builder = Builder::new(config);
        let source = tiny_corpus();

        let counter = builder.count_trigrams(&source);
        assert!(counter.total_bytes() > 0);

        let mut wt = builder.seed_wt(&counter).unwrap();
        assert!(wt.num_nodes() > 1);

        builder.extend_lengths(&mut wt, &source).unwrap();
        builder.scale(&mut wt, source.len() as u64);

        let mut mwt = MultiWritableTrie::new(builder.config().wt_bits, false, 64);
        builder.merge_into_mwt(1, &wt, &mut mwt).unwrap();
        assert!(mwt.num_frequency_records() > 0);

        let pt = builder.pack(&mwt, 0, ValueMap::default_map()).unwrap();
        assert!(pt.num_frequency_records() > 0);
    }

    #[test]
    fn coverage_stats_reports_full_coverage_for_repeated_ngram() {
        let config = BuilderConfig {
            max_len: 3,
            ..BuilderConfig::default()
        };
        let builder = Builder::new(config);
        let mut wt = WritableTrie::new(builder.config().wt_bits, false, 16);
        wt.insert(b"ab", 2, 10, false).unwrap();
        let source = b"ababab".to_vec();
        let stats = builder.coverage_stats(&wt, &source);
        assert!(stats.match_count > 0);
        assert!(stats.raw_coverage > 0.0);
        assert!(stats.freq_weighted_coverage >= 0.0);
    }

    #[test]
    fn stopgram_candidates_are_demoted_when_common_locally() {
        let config = BuilderConfig {
            max_len: 3,
            ..BuilderConfig::default()
        };
        let builder = Builder::new(config);

        let mut other_mwt = MultiWritableTrie::new(builder.config().wt_bits, false, 16);
        other_mwt.set_frequency(b"xyz", 3, 9, 500, false).unwrap();
        let other_pt = PackedTrie::from_mwt(&other_mwt, false, 0, ValueMap::default_map()).unwrap();

        let mut wt = WritableTrie::new(builder.config().wt_bits, false, 16);
        let confusables: Vec<(u32, f64, &PackedTrie)> = vec![(9, 1.0, &other_pt)];
        let weight_trie = builder.collect_stopgram_candidates(&mut wt, &confusables).unwrap();
        assert!(wt.is_stopgram(b"xyz", 3));

        // "xyz" appears often in this language's own text -> should be
        // demoted rather than kept as a stop-gram.
        let source = b"xyzxyzxyzxyzxyz".to_vec();
        builder.finalize_stopgrams(&mut wt, &weight_trie, &source, 1);
        assert!(!wt.is_stopgram(b"xyz", 3));
    }

    #[test]
    fn rare_stopgram_candidate_survives() {
        let config = BuilderConfig {
            max_len: 3,
            ..BuilderConfig::default()
        };
        let builder = Builder::new(config);

        let mut other_mwt = MultiWritableTrie::new(builder.config().wt_bits, false, 16);
        other_mwt.set_frequency(b"zzq", 3, 9, 500, false).unwrap();
        let other_pt = PackedTrie::from_mwt(&other_mwt, false, 0, ValueMap::default_map()).unwrap();

        let mut wt = WritableTrie::new(builder.config().wt_bits, false, 16);
        let confusables: Vec<(u32, f64, &PackedTrie)> = vec![(9, 1.0, &other_pt)];
        let weight_trie = builder.collect_stopgram_candidates(&mut wt, &confusables).unwrap();

        let source = b"nothing relevant here".to_vec();
        builder.finalize_stopgrams(&mut wt, &weight_trie, &source, 1);
        assert!(wt.is_stopgram(b"zzq", 3));
    }
}
