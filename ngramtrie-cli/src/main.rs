//! Trainer front-end. Owns no trie logic of its own — it parses the
//! command-line flag surface, builds a `BuilderConfig` per file group, and
//! drives `ngramtrie_core::Builder` through the phase pipeline, writing
//! one packed-trie file per invocation.

mod group;

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use ngramtrie_core::builder::{Builder, BuilderConfig, CoverageStats};
use ngramtrie_core::format;
use ngramtrie_core::mwt::MultiWritableTrie;
use ngramtrie_core::pt::{PackedTrie, ValueMap};
use ngramtrie_core::preprocessing::{BigramMode, TaggedBytes};

use group::FileGroup;

/// One entry of an explicit `-R` confusable-language list: the language id
/// and similarity weight to use when pulling stop-gram candidates out of an
/// already-trained packed trie at `path`.
struct RelatedModel {
    lang: u32,
    weight: f64,
    path: PathBuf,
}

/// Parsed form of `-R`: either an explicit list of confusable models, or an
/// automatic-selection threshold (`@N`). Automatic cross-corpus similarity
/// scoring has no data source at the CLI layer, so the threshold form is
/// accepted and logged but does not itself load any models.
enum RelatedSpec {
    Explicit(Vec<RelatedModel>),
    Threshold(f64),
}

fn parse_related(raw: &str) -> Result<RelatedSpec> {
    if let Some(rest) = raw.strip_prefix('@') {
        let threshold: f64 = rest
            .parse()
            .with_context(|| format!("invalid -R threshold {rest:?}"))?;
        return Ok(RelatedSpec::Threshold(threshold));
    }
    let mut models = Vec::new();
    for entry in raw.split(';') {
        let mut lang = None;
        let mut weight = 1.0f64;
        let mut path = None;
        for field in entry.split(',') {
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("malformed -R field {field:?}"))?;
            match key {
                "lang" => lang = Some(value.parse::<u32>().context("lang= must be a u32")?),
                "weight" => weight = value.parse().context("weight= must be a float")?,
                "path" => path = Some(PathBuf::from(value)),
                other => return Err(anyhow::anyhow!("unknown -R field {other:?}")),
            }
        }
        models.push(RelatedModel {
            lang: lang.ok_or_else(|| anyhow::anyhow!("-R entry {entry:?} missing lang="))?,
            weight,
            path: path.ok_or_else(|| anyhow::anyhow!("-R entry {entry:?} missing path="))?,
        });
    }
    Ok(RelatedSpec::Explicit(models))
}

/// Trains a packed multi-language n-gram frequency store from raw
/// training text. Each `--group` flag adds one language's training file
/// group; the database is written once, after every group has trained.
#[derive(Parser, Debug)]
#[command(name = "ngramtrie-train", version)]
struct Args {
    /// Output database path. Prefix with `=` to open for read-write
    /// (default), `==` to require the database already exist read-only
    /// (rejects training, only useful combined with `-R` against an
    /// existing model).
    #[arg(long = "db")]
    db: String,

    /// One training file group: `lang=XX,encoding=YY,path=FILE[,region=RR,script=SS]`.
    /// Repeatable, one per language.
    #[arg(long = "group", value_name = "SPEC")]
    groups: Vec<String>,

    /// Target vocabulary size per language.
    #[arg(short = 'k', long, default_value_t = 2000)]
    top_k: usize,

    /// Minimum n-gram length.
    #[arg(short = 'm', long, default_value_t = 1)]
    min_len: usize,

    /// Maximum n-gram length.
    #[arg(short = 'M', long, default_value_t = 6)]
    max_len: usize,

    /// Affix-suppression ratio.
    #[arg(short = 'a', long, default_value_t = 0.9)]
    affix_ratio: f64,

    /// Affix-suppression alignment offset (0 disables alignment-based
    /// suppression).
    #[arg(short = 'A', long, default_value_t = 0)]
    alignment: usize,

    /// Smoothing power (0 = linear, >0 = power, <0 = logarithmic).
    #[arg(short = 'S', long, default_value_t = 0)]
    smoothing_power: i32,

    /// Byte budget per file group; files longer than this are truncated.
    #[arg(short = 'L', long)]
    byte_limit: Option<u64>,

    /// Subsample uniformly to the byte limit instead of truncating
    /// (`-L@`).
    #[arg(long = "subsample")]
    subsample: bool,

    /// Bigram-padding mode.
    #[arg(long = "bigram-mode", value_enum, default_value_t = BigramModeArg::None)]
    bigram_mode: BigramModeArg,

    /// Skip ASCII space bytes on insert/lookup.
    #[arg(short = 'i', long)]
    ignore_whitespace: bool,

    /// Skip newline-delimited records once (`-n`) or twice (`-nn`, pass
    /// twice).
    #[arg(short = 'n', action = clap::ArgAction::Count)]
    newline_skip: u8,

    /// Related-language stop-gram source: explicit `name,name,...` or
    /// `@threshold` for automatic cross-model similarity selection.
    #[arg(short = 'R', long)]
    related: Option<String>,

    /// Unique-n-gram frequency boost.
    #[arg(short = 'B', long, default_value_t = 1)]
    unique_boost: u32,

    /// Increase log verbosity; repeatable.
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Dump coverage statistics as JSON after training.
    #[arg(short = 'D', long)]
    dump: bool,

    /// Write the final text vocabulary (one n-gram per line) to this file.
    #[arg(short = 'w', long = "vocab-out")]
    vocab_out: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum BigramModeArg {
    None,
    AsciiLe,
    AsciiBe,
    Utf8Le,
    Utf8Be,
}

impl From<BigramModeArg> for BigramMode {
    fn from(v: BigramModeArg) -> Self {
        match v {
            BigramModeArg::None => BigramMode::None,
            BigramModeArg::AsciiLe => BigramMode::AsciiLe,
            BigramModeArg::AsciiBe => BigramMode::AsciiBe,
            BigramModeArg::Utf8Le => BigramMode::Utf8Le,
            BigramModeArg::Utf8Be => BigramMode::Utf8Be,
        }
    }
}

/// `=file` / `==file` database path convention: one leading `=` opens for
/// read-write (the default, so a bare path also works); two leading `=`
/// require read-only.
struct DbPath {
    path: PathBuf,
    read_only: bool,
}

fn parse_db_path(raw: &str) -> DbPath {
    if let Some(rest) = raw.strip_prefix("==") {
        DbPath {
            path: PathBuf::from(rest),
            read_only: true,
        }
    } else if let Some(rest) = raw.strip_prefix('=') {
        DbPath {
            path: PathBuf::from(rest),
            read_only: false,
        }
    } else {
        DbPath {
            path: PathBuf::from(raw),
            read_only: false,
        }
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ngramtrie-train: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let db = parse_db_path(&args.db);
    if db.read_only {
        anyhow::bail!(
            "database {:?} opened read-only (==); training requires read-write (=)",
            db.path
        );
    }
    if args.groups.is_empty() {
        anyhow::bail!("no --group file groups given; nothing to train");
    }

    let base_config = BuilderConfig {
        top_k: args.top_k,
        min_len: args.min_len,
        max_len: args.max_len,
        affix_ratio: args.affix_ratio,
        alignment: args.alignment,
        smoothing_power: args.smoothing_power,
        bigram_mode: args.bigram_mode.into(),
        unique_boost: args.unique_boost,
        ignore_whitespace: args.ignore_whitespace,
        ..BuilderConfig::default()
    };

    let related = match &args.related {
        Some(raw) => Some(parse_related(raw)?),
        None => None,
    };
    let confusables: Vec<(u32, f64, PackedTrie)> = match &related {
        Some(RelatedSpec::Explicit(models)) => {
            let mut loaded = Vec::new();
            for m in models {
                let mut f = fs::File::open(&m.path)
                    .with_context(|| format!("opening confusable model {:?}", m.path))?;
                // Packed-trie files are always byte-granular, independent
                // of whatever bits-per-level the trainer uses internally.
                let pt = format::read_packed_trie(&mut f, ngramtrie_core::BitsPerLevel::Eight, ValueMap::default_map())
                    .with_context(|| format!("reading confusable model {:?}", m.path))?;
                loaded.push((m.lang, m.weight, pt));
            }
            loaded
        }
        Some(RelatedSpec::Threshold(t)) => {
            warn!(threshold = t, "automatic confusable-language selection requires explicit -R models; skipping stop-gram phase");
            Vec::new()
        }
        None => Vec::new(),
    };
    let confusable_refs: Vec<(u32, f64, &PackedTrie)> =
        confusables.iter().map(|(l, w, pt)| (*l, *w, pt)).collect();

    let mut lang_ids: HashMap<String, u32> = HashMap::new();
    let mut next_lang_id: u32 = 1;
    let mut mwt = MultiWritableTrie::new(base_config.wt_bits, args.ignore_whitespace, 4096);
    let mut vocab: Vec<Vec<u8>> = Vec::new();
    let mut coverage: Vec<(String, CoverageStats)> = Vec::new();

    for spec in &args.groups {
        let fg = match FileGroup::parse(spec) {
            Ok(g) => g,
            Err(e) => {
                error!(spec = spec.as_str(), error = %e, "malformed --group spec, skipping");
                continue;
            }
        };
        match train_group(&fg, &base_config, &confusable_refs, &mut lang_ids, &mut next_lang_id, &mut mwt, &mut vocab, args.newline_skip, args.byte_limit, args.subsample) {
            Ok(stats) => {
                info!(lang = fg.lang.as_str(), "trained group");
                coverage.push((fg.lang.clone(), stats));
            }
            Err(e) => {
                // A recoverable per-group failure is reported and
                // training continues with the next group.
                error!(lang = fg.lang.as_str(), error = %e, "failed to train group, continuing");
                warn!("see --db output may be missing this language's model");
            }
        }
    }

    let pt = Builder::new(base_config).pack(&mwt, 0, ValueMap::default_map())?;

    let tmp_path = db.path.with_extension("tmp");
    {
        let mut f = fs::File::create(&tmp_path)
            .with_context(|| format!("creating temporary output {:?}", tmp_path))?;
        format::write_packed_trie(&mut f, &pt).context("writing packed trie")?;
    }
    fs::rename(&tmp_path, &db.path)
        .with_context(|| format!("replacing {:?}", db.path))?;
    info!(path = ?db.path, "wrote packed trie");

    if let Some(vocab_path) = &args.vocab_out {
        let mut f = fs::File::create(vocab_path)
            .with_context(|| format!("creating vocabulary output {:?}", vocab_path))?;
        for key in &vocab {
            f.write_all(key)?;
            f.write_all(b"\n")?;
        }
    }

    if args.dump {
        println!("{{\"numFullNodes\": {}, \"numTerminalNodes\": {}, \"numFrequencyRecords\": {}}}",
            pt.num_full_nodes(), pt.num_terminal_nodes(), pt.num_frequency_records());
        for (lang, stats) in &coverage {
            match stats.to_json_string() {
                Ok(json) => println!("{lang}: {json}"),
                Err(e) => warn!(lang = lang.as_str(), error = %e, "failed to serialize coverage stats"),
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn train_group(
    group: &FileGroup,
    base_config: &BuilderConfig,
    confusables: &[(u32, f64, &PackedTrie)],
    lang_ids: &mut HashMap<String, u32>,
    next_lang_id: &mut u32,
    mwt: &mut MultiWritableTrie,
    vocab: &mut Vec<Vec<u8>>,
    newline_skip: u8,
    byte_limit: Option<u64>,
    subsample: bool,
) -> Result<CoverageStats> {
    let lang_id = *lang_ids.entry(group.lang.clone()).or_insert_with(|| {
        let id = *next_lang_id;
        *next_lang_id += 1;
        id
    });

    let mut bytes = fs::read(&group.path)
        .with_context(|| format!("reading training file {:?}", group.path))?;

    if newline_skip > 0 {
        bytes = strip_blank_lines(&bytes, newline_skip);
    }
    if let Some(limit) = byte_limit {
        bytes = apply_byte_limit(bytes, limit, subsample);
    }

    let mode: BigramMode = base_config.bigram_mode;
    let source = TaggedBytes { bytes: &bytes, mode };

    let config = base_config.clone();
    let builder = Builder::new(config);

    let counter = builder.count_trigrams(&source);
    let mut wt = builder.seed_wt(&counter)?;
    builder.extend_lengths(&mut wt, &source)?;

    if !confusables.is_empty() {
        let weight_trie = builder.collect_stopgram_candidates(&mut wt, confusables)?;
        builder.finalize_stopgrams(&mut wt, &weight_trie, &source, 1);
        let boost_confusables: Vec<(u32, &PackedTrie)> =
            confusables.iter().map(|(l, _, pt)| (*l, *pt)).collect();
        builder.apply_unique_boost(&mut wt, &boost_confusables);
    }

    let stats = builder.coverage_stats(&wt, &source);
    builder.scale(&mut wt, bytes.len().max(1) as u64);

    wt.enumerate(builder.config().max_len, |trie, _, key, len| {
        if trie.lookup(key, len) > 0 {
            vocab.push(key.to_vec());
        }
        true
    });

    builder.merge_into_mwt(lang_id, &wt, mwt)?;
    Ok(stats)
}

fn strip_blank_lines(bytes: &[u8], passes: u8) -> Vec<u8> {
    let mut out = bytes.to_vec();
    for _ in 0..passes {
        out = out
            .split(|&b| b == b'\n')
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(&b'\n');
    }
    out
}

fn apply_byte_limit(bytes: Vec<u8>, limit: u64, subsample: bool) -> Vec<u8> {
    let limit = limit as usize;
    if bytes.len() <= limit {
        return bytes;
    }
    if !subsample {
        return bytes[..limit].to_vec();
    }
    // Uniform subsampling (`-L@`): keep every `stride`-th byte run so the
    // whole file contributes rather than just its prefix.
    let stride = (bytes.len() as f64 / limit as f64).ceil() as usize;
    bytes.into_iter().step_by(stride.max(1)).take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_path_prefix_convention() {
        let rw = parse_db_path("model.bin");
        assert!(!rw.read_only);
        let rw2 = parse_db_path("=model.bin");
        assert!(!rw2.read_only);
        let ro = parse_db_path("==model.bin");
        assert!(ro.read_only);
        assert_eq!(ro.path, PathBuf::from("model.bin"));
    }

    #[test]
    fn byte_limit_truncates_without_subsample() {
        let bytes = vec![1u8, 2, 3, 4, 5];
        let out = apply_byte_limit(bytes, 3, false);
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn byte_limit_subsamples_across_whole_input() {
        let bytes: Vec<u8> = (0..100).collect();
        let out = apply_byte_limit(bytes, 10, true);
        assert!(out.len() <= 10);
    }

    #[test]
    fn strip_blank_lines_removes_empty_records() {
        let bytes = b"a\n\nb\n\n\nc".to_vec();
        let out = strip_blank_lines(&bytes, 1);
        assert_eq!(out, b"a\nb\nc".to_vec());
    }
}
