use crate::types::{FilterConfiguration, PipelineError, Result, SignalKind};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Immutable word set loaded from a one-word-per-line file.
#[derive(Debug, Default)]
pub struct WordSet {
    words: HashSet<String>,
    loaded: bool,
}

impl WordSet {
    pub fn load(path: &Path) -> Result<Self> {
        let reader = open_reference(path)?;
        let mut words = HashSet::new();
        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            words.insert(trimmed.to_lowercase());
        }
        info!("Loaded {} words from {}", words.len(), path.display());
        Ok(Self { words, loaded: true })
    }

    pub fn from_words<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            words: words.into_iter().map(|w| w.as_ref().to_lowercase()).collect(),
            loaded: true,
        }
    }

    /// Stand-in for a source that was neither enabled nor present on disk.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    /// Membership, or `None` when the set was never loaded.
    pub fn membership(&self, word: &str) -> Option<bool> {
        self.loaded.then(|| self.contains(word))
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Words in sorted order, for deterministic bulk walks.
    pub fn sorted(&self) -> Vec<&str> {
        let mut words: Vec<&str> = self.words.iter().map(String::as_str).collect();
        words.sort_unstable();
        words
    }
}

/// Immutable word → frequency mapping (Google n-gram counts, Zipf values).
#[derive(Debug, Default)]
pub struct FrequencyTable {
    values: HashMap<String, f64>,
    loaded: bool,
}

impl FrequencyTable {
    /// Lines are `word... value`; the last token is the number so multi-word
    /// entries survive. Unparsable lines are skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let reader = open_reference(path)?;
        let mut values = HashMap::new();
        let mut skipped = 0usize;
        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let parsed = trimmed
                .rsplit_once(char::is_whitespace)
                .and_then(|(word, value)| Some((word.trim(), value.parse::<f64>().ok()?)));
            match parsed {
                Some((word, value)) if !word.is_empty() && value.is_finite() => {
                    values.insert(word.to_lowercase(), value);
                }
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!("Skipped {} unparsable lines in {}", skipped, path.display());
        }
        info!("Loaded {} frequencies from {}", values.len(), path.display());
        Ok(Self { values, loaded: true })
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: AsRef<str>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(w, v)| (w.as_ref().to_lowercase(), v))
                .collect(),
            loaded: true,
        }
    }

    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Frequency (0 when absent), or `None` when the table was never loaded.
    pub fn frequency(&self, word: &str) -> Option<f64> {
        self.loaded
            .then(|| self.values.get(word).copied().unwrap_or(0.0))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn open_reference(path: &Path) -> Result<BufReader<File>> {
    if !path.is_file() {
        return Err(PipelineError::MissingReference {
            path: path.to_path_buf(),
        });
    }
    Ok(BufReader::new(File::open(path)?))
}

/// Where the static reference files live.
#[derive(Debug, Clone)]
pub struct ReferencePaths {
    pub titles: PathBuf,
    pub wordnet: PathBuf,
    pub zipf: PathBuf,
    pub ngram: PathBuf,
}

impl ReferencePaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            titles: dir.join("wiktionary_english_words.txt"),
            wordnet: dir.join("wordnet.txt"),
            zipf: dir.join("zipf_freqs.txt"),
            ngram: dir.join("google_master_freqs.txt"),
        }
    }
}

/// Read-only handles to every reference source, shared by the components of one run.
#[derive(Debug, Clone)]
pub struct References {
    pub titles: Arc<WordSet>,
    pub wordnet: Arc<WordSet>,
    pub zipf: Arc<FrequencyTable>,
    pub ngram: Arc<FrequencyTable>,
}

impl References {
    pub fn new(titles: WordSet, wordnet: WordSet, zipf: FrequencyTable, ngram: FrequencyTable) -> Self {
        Self {
            titles: Arc::new(titles),
            wordnet: Arc::new(wordnet),
            zipf: Arc::new(zipf),
            ngram: Arc::new(ngram),
        }
    }

    /// Load every source the filter needs; a missing required file is fatal.
    ///
    /// Sources that are not active are still loaded when present so the
    /// discard report can show them, and left unavailable otherwise. The
    /// title set is also required in strict mode, which gates fetches on it.
    pub fn load(paths: &ReferencePaths, filter: &FilterConfiguration) -> Result<Self> {
        let titles_required = filter.is_active(SignalKind::WiktionaryTitle)
            || (filter.strict && filter.is_active(SignalKind::Pageviews));

        let titles = load_optional(&paths.titles, titles_required, WordSet::load, WordSet::unavailable)?;
        let wordnet = load_optional(
            &paths.wordnet,
            filter.is_active(SignalKind::WordNet),
            WordSet::load,
            WordSet::unavailable,
        )?;
        let zipf = load_optional(
            &paths.zipf,
            filter.is_active(SignalKind::Zipf),
            FrequencyTable::load,
            FrequencyTable::unavailable,
        )?;
        let ngram = load_optional(
            &paths.ngram,
            filter.is_active(SignalKind::Ngram),
            FrequencyTable::load,
            FrequencyTable::unavailable,
        )?;

        Ok(Self::new(titles, wordnet, zipf, ngram))
    }
}

fn load_optional<T>(
    path: &Path,
    required: bool,
    load: impl Fn(&Path) -> Result<T>,
    unavailable: impl Fn() -> T,
) -> Result<T> {
    if required || path.is_file() {
        load(path)
    } else {
        debug!("Optional reference {} not present", path.display());
        Ok(unavailable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn frequency_lines_keep_multiword_entries() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("freqs.txt");
        fs::write(&path, "New York 1200\ncat 5000\nbroken line\n\n# comment\nzero 0\n")?;

        let table = FrequencyTable::load(&path)?;
        assert_eq!(table.frequency("new york"), Some(1200.0));
        assert_eq!(table.frequency("cat"), Some(5000.0));
        assert_eq!(table.frequency("zero"), Some(0.0));
        assert_eq!(table.frequency("absent"), Some(0.0));
        assert_eq!(table.len(), 3);
        Ok(())
    }

    #[test]
    fn unavailable_sources_report_nothing() {
        assert_eq!(WordSet::unavailable().membership("cat"), None);
        assert_eq!(FrequencyTable::unavailable().frequency("cat"), None);
    }

    #[test]
    fn missing_required_reference_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ReferencePaths::in_dir(dir.path());
        let filter = FilterConfiguration::new().with_source(SignalKind::WordNet);

        match References::load(&paths, &filter) {
            Err(PipelineError::MissingReference { path }) => assert_eq!(path, paths.wordnet),
            other => panic!("expected MissingReference, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn inactive_sources_may_be_absent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = ReferencePaths::in_dir(dir.path());
        fs::write(&paths.titles, "cat\nSerendipity\n")?;
        let filter = FilterConfiguration::new().with_source(SignalKind::WiktionaryTitle);

        let refs = References::load(&paths, &filter)?;
        assert_eq!(refs.titles.membership("serendipity"), Some(true));
        assert!(!refs.wordnet.is_loaded());
        assert!(!refs.ngram.is_loaded());
        Ok(())
    }
}
