use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use interfaces::state::{load_ocr_map, load_raw_words};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vocab_pipeline::dump::BuildOutcome;
use vocab_pipeline::reassess::write_assessment_table;
use vocab_pipeline::utils::time::default_pageview_window;
use vocab_pipeline::report::{read_table_words, write_signal_table, write_word_list};
use vocab_pipeline::{
    build_dictionary, AssessmentRecord, CollapseConfig, DefinitionCache, DictionaryOptions,
    FilterConfiguration, GeminiOracle, KvStore, LoopConfig, NormalizationPolicy, OracleConfig, PageviewConfig,
    PageviewResolver, ReassessmentLoop, ReferencePaths, References, SignalAggregator, SignalKind,
    WikimediaPageviews,
};

const RAW_WORDS: &str = "scrapedwords.txt";
const OCR_MAP: &str = "ocr_word_map.json";
const KEPT_TABLE: &str = "wordfreqs.txt";
const KEPT_WORDS: &str = "words.txt";
const DISCARD_TABLE: &str = "discarded_words.txt";
const PAGEVIEW_CACHE: &str = "pageviews_cache.jsonl";
const DEFINITION_CACHE: &str = "definitions.jsonl";
const DICTIONARY: &str = "worddefs.txt";
const DICTIONARY_WORDS: &str = "worddefswordsonly.txt";
const ASSESSMENTS: &str = "assessments.jsonl";
const ASSESSMENT_TABLE: &str = "discarded_words_assessed.txt";
const DEFAULT_DUMP: &str = "enwiktionary-latest-pages-articles.xml.bz2";

#[derive(Parser)]
#[command(name = "vocab-pipeline")]
#[command(about = "Filter, define and reassess a scraped vocabulary", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding reference lists, caches and outputs
    #[arg(long, global = true, default_value = ".", env = "VOCAB_DATA_DIR")]
    data_dir: PathBuf,

    /// Log at debug level regardless of RUST_LOG
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Split raw words into kept and discarded lists
    Filter {
        /// Raw word list (defaults to scrapedwords.txt in the data directory)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Signal source to consult; repeat for several, omit for all
        #[arg(long = "source", value_parser = parse_signal)]
        sources: Vec<SignalKind>,

        /// Only look up pageviews for words that are wiktionary titles
        #[arg(long)]
        strict: bool,

        /// Keep every word, still reporting its signals
        #[arg(long)]
        all: bool,

        /// Count pageviews over the last N complete months (0 = since 2015-07)
        #[arg(long, default_value_t = 0)]
        pageview_months: u32,

        #[command(flatten)]
        normalization: NormalizationArgs,
    },

    /// Fill the pageview cache for every wiktionary title
    WarmPageviews {
        /// Fetch again even when a count is cached
        #[arg(long)]
        force: bool,

        /// Count pageviews over the last N complete months (0 = since 2015-07)
        #[arg(long, default_value_t = 0)]
        pageview_months: u32,
    },

    /// Collapse a wiktionary dump into the definition cache
    BuildDefinitions {
        /// Path to the pages-articles dump (.xml or .xml.bz2)
        #[arg(long)]
        dump: Option<PathBuf>,

        /// Rebuild even when a cache exists
        #[arg(long)]
        force: bool,

        /// Language section to keep; repeat for several
        #[arg(long = "language")]
        languages: Vec<String>,
    },

    /// Write the dictionary for the kept words
    Define {
        /// Word table or list (defaults to wordfreqs.txt)
        #[arg(long)]
        words: Option<PathBuf>,

        /// Fold inflected forms into their lemma's line
        #[arg(long)]
        fold_inflections: bool,

        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long)]
        word_list: Option<PathBuf>,
    },

    /// Ask the oracle about discarded words
    Reassess {
        /// Discard table or list (defaults to discarded_words.txt)
        #[arg(long)]
        input: Option<PathBuf>,

        #[arg(long, default_value_t = 20)]
        batch_size: usize,

        /// Keep running passes until every word is assessed
        #[arg(long)]
        auto_loop: bool,

        #[arg(long)]
        model: Option<String>,

        #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Review table (defaults to discarded_words_assessed.txt)
        #[arg(long)]
        table: Option<PathBuf>,
    },

    /// Rewrite a store file without superseded lines
    Compact {
        #[arg(value_enum)]
        store: StoreKind,

        /// Store file (defaults to the store's usual name in the data directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreKind {
    Pageviews,
    Assessments,
}

fn parse_signal(value: &str) -> std::result::Result<SignalKind, String> {
    value.parse().map_err(|e: vocab_pipeline::PipelineError| e.to_string())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn data_path(data_dir: &Path, explicit: Option<PathBuf>, default: &str) -> PathBuf {
    explicit.unwrap_or_else(|| data_dir.join(default))
}

/// How raw tokens are turned into words before any signal is consulted.
#[derive(Args, Debug)]
struct NormalizationArgs {
    /// Keep the original letter case instead of lower-casing
    #[arg(long)]
    keep_case: bool,

    /// Reject words containing an apostrophe
    #[arg(long)]
    no_apostrophes: bool,

    /// Accept digits inside words
    #[arg(long)]
    allow_digits: bool,

    /// Accept non-ASCII letters
    #[arg(long)]
    unicode: bool,

    /// Shortest word kept, in characters
    #[arg(long, default_value_t = 1)]
    min_len: usize,
}

impl NormalizationArgs {
    fn policy(&self) -> NormalizationPolicy {
        NormalizationPolicy {
            lowercase: !self.keep_case,
            allow_apostrophe: !self.no_apostrophes,
            allow_digits: self.allow_digits,
            ascii_only: !self.unicode,
            min_len: self.min_len,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    match until_interrupted(run(cli), interrupt).await? {
        Completion::Finished => Ok(()),
        Completion::Interrupted => {
            warn!("Interrupted; everything committed so far is kept for the next run");
            std::process::exit(130);
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Completion {
    Finished,
    Interrupted,
}

/// Run `work` until it ends or `interrupt` fires. Either way `work` has
/// been dropped, and its stores flushed, by the time this returns.
async fn until_interrupted<W, I>(work: W, interrupt: I) -> Result<Completion>
where
    W: Future<Output = Result<()>>,
    I: Future<Output = ()>,
{
    tokio::select! {
        biased;
        result = work => result.map(|()| Completion::Finished),
        _ = interrupt => Ok(Completion::Interrupted),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let data_dir = cli.data_dir;
    match cli.command {
        Command::Filter {
            input,
            sources,
            strict,
            all,
            pageview_months,
            normalization,
        } => {
            let filter = sources
                .into_iter()
                .fold(FilterConfiguration::new(), FilterConfiguration::with_source)
                .with_strict(strict)
                .with_keep_all(all);
            let input = data_path(&data_dir, input, RAW_WORDS);
            filter_words(&data_dir, input, filter, normalization.policy(), pageview_months).await
        }
        Command::WarmPageviews {
            force,
            pageview_months,
        } => warm_pageviews(&data_dir, force, pageview_months).await,
        Command::BuildDefinitions {
            dump,
            force,
            languages,
        } => {
            let mut config = CollapseConfig::default();
            if !languages.is_empty() {
                config.languages = languages.iter().map(|l| l.trim().to_lowercase()).collect();
            }
            let cache = DefinitionCache::new(data_dir.join(DEFINITION_CACHE));
            let dump = data_path(&data_dir, dump, DEFAULT_DUMP);
            match cache.build(&dump, &config, force)? {
                BuildOutcome::Built(stats) => info!(
                    "Collapsed {} pages into {} entries",
                    stats.pages, stats.entries
                ),
                BuildOutcome::Skipped { .. } => info!("Kept existing definition cache"),
            }
            Ok(())
        }
        Command::Define {
            words,
            fold_inflections,
            output,
            word_list,
        } => {
            let words = read_table_words(&data_path(&data_dir, words, KEPT_TABLE))?;
            let cache = DefinitionCache::new(data_dir.join(DEFINITION_CACHE));
            let dictionary = build_dictionary(&cache, &words, &DictionaryOptions { fold_inflections })?;
            dictionary.write(&data_path(&data_dir, output, DICTIONARY))?;
            dictionary.write_word_list(&data_path(&data_dir, word_list, DICTIONARY_WORDS))?;
            info!(
                "{} words defined, {} without a definition",
                dictionary.defined_words().len(),
                dictionary.undefined_words().len()
            );
            Ok(())
        }
        Command::Reassess {
            input,
            batch_size,
            auto_loop,
            model,
            api_key,
            table,
        } => {
            let mut oracle_config = OracleConfig {
                api_key,
                ..Default::default()
            };
            if let Some(model) = model {
                oracle_config.model = if model.starts_with("models/") {
                    model
                } else {
                    format!("models/{}", model)
                };
            }
            let oracle = Arc::new(GeminiOracle::new(oracle_config)?);
            let loop_config = LoopConfig {
                batch_size,
                auto_loop,
                ..Default::default()
            };

            let words = read_table_words(&data_path(&data_dir, input, DISCARD_TABLE))?;
            let mut reassessment =
                ReassessmentLoop::open(data_dir.join(ASSESSMENTS), oracle, loop_config)?;
            let summary = reassessment.run(&words).await?;
            write_assessment_table(
                &data_path(&data_dir, table, ASSESSMENT_TABLE),
                reassessment.store(),
                &words,
            )?;
            if summary.remaining > 0 {
                info!("{} words still unassessed; run again to continue", summary.remaining);
            }
            Ok(())
        }
        Command::Compact { store, path } => {
            let (default, flush_every) = match store {
                StoreKind::Pageviews => (PAGEVIEW_CACHE, PageviewConfig::default().flush_every),
                StoreKind::Assessments => (ASSESSMENTS, 1),
            };
            let path = data_path(&data_dir, path, default);
            match store {
                StoreKind::Pageviews => KvStore::<u64>::open(&path, flush_every)?.compact()?,
                StoreKind::Assessments => {
                    KvStore::<AssessmentRecord>::open(&path, flush_every)?.compact()?
                }
            };
            Ok(())
        }
    }
}

fn pageview_resolver(data_dir: &Path, months: u32) -> Result<PageviewResolver> {
    let (start, end) = default_pageview_window(months);
    let config = PageviewConfig {
        start,
        end,
        ..Default::default()
    };
    let flush_every = config.flush_every;
    // One cache file per window
    let cache = match months {
        0 => data_dir.join(PAGEVIEW_CACHE),
        n => data_dir.join(format!("pageviews_cache_{}m.jsonl", n)),
    };
    let lookup = Arc::new(WikimediaPageviews::new(config)?);
    Ok(PageviewResolver::open(cache, flush_every, lookup)?)
}

async fn filter_words(
    data_dir: &Path,
    input: PathBuf,
    filter: FilterConfiguration,
    policy: NormalizationPolicy,
    pageview_months: u32,
) -> Result<()> {
    let references = References::load(&ReferencePaths::in_dir(data_dir), &filter)?;
    let raw = load_raw_words(&input)?;
    let ocr = load_ocr_map(&data_dir.join(OCR_MAP))?;
    info!("Loaded {} raw words from {}", raw.len(), input.display());

    let resolver = pageview_resolver(data_dir, pageview_months)?;
    let mut aggregator = SignalAggregator::new(references, filter)
        .with_policy(policy)
        .with_resolver(resolver);
    let report = aggregator.run(raw.iter().map(String::as_str)).await?;

    write_signal_table(&data_dir.join(KEPT_TABLE), &report.kept, None)?;
    let ocr = (!ocr.is_empty()).then_some(&ocr);
    write_signal_table(&data_dir.join(DISCARD_TABLE), &report.discarded, ocr)?;
    write_word_list(&data_dir.join(KEPT_WORDS), &report.kept_words())
        .context("writing kept word list")?;

    info!(
        "Kept {} and discarded {} of {} words",
        report.stats.kept, report.stats.discarded, report.stats.input
    );
    Ok(())
}

async fn warm_pageviews(data_dir: &Path, force: bool, pageview_months: u32) -> Result<()> {
    let paths = ReferencePaths::in_dir(data_dir);
    let filter = FilterConfiguration::new().with_source(SignalKind::WiktionaryTitle);
    let references = References::load(&paths, &filter)?;
    let titles = references.titles.sorted();

    let mut resolver = pageview_resolver(data_dir, pageview_months)?;
    resolver.warm(titles.iter().copied(), force).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_flags_set_the_normalization_policy() {
        let cli = Cli::try_parse_from([
            "vocab-pipeline",
            "filter",
            "--keep-case",
            "--allow-digits",
            "--min-len",
            "2",
        ])
        .unwrap();
        let Command::Filter { normalization, .. } = cli.command else {
            panic!("expected the filter subcommand");
        };
        let policy = normalization.policy();
        assert!(!policy.lowercase);
        assert!(policy.allow_digits);
        assert!(policy.allow_apostrophe);
        assert!(policy.ascii_only);
        assert_eq!(policy.min_len, 2);
    }

    #[tokio::test]
    async fn interrupted_command_still_commits_pending_entries() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pv.jsonl");
        let work = {
            let path = path.clone();
            async move {
                let mut store: KvStore<u64> = KvStore::open(&path, 100)?;
                store.insert("cat", 7)?;
                std::future::pending::<Result<()>>().await
            }
        };

        let completion = until_interrupted(work, async {}).await?;
        assert_eq!(completion, Completion::Interrupted);
        let store: KvStore<u64> = KvStore::open(&path, 1)?;
        assert_eq!(store.get("cat"), Some(&7));
        Ok(())
    }

    #[tokio::test]
    async fn finished_command_is_not_an_interruption() -> Result<()> {
        let completion = until_interrupted(async { Ok(()) }, std::future::pending()).await?;
        assert_eq!(completion, Completion::Finished);

        let failed = until_interrupted(async { Err(anyhow::anyhow!("boom")) }, std::future::pending()).await;
        assert!(failed.is_err());
        Ok(())
    }

    #[test]
    fn default_flags_keep_the_default_policy() {
        let cli = Cli::try_parse_from(["vocab-pipeline", "filter"]).unwrap();
        let Command::Filter { normalization, .. } = cli.command else {
            panic!("expected the filter subcommand");
        };
        assert_eq!(normalization.policy(), NormalizationPolicy::default());
    }
}
