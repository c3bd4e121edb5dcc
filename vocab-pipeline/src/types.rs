use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub use interfaces::defs::{
    AssessmentRecord, DefinitionRecord, DumpManifest, Judgment, OcrSourceMap, Sense,
};

use crate::utils::time::default_pageview_window;

/// One reference source that can vouch for a word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    #[serde(rename = "wiktionary")]
    WiktionaryTitle,
    #[serde(rename = "wordnet")]
    WordNet,
    #[serde(rename = "zipf")]
    Zipf,
    #[serde(rename = "ngram")]
    Ngram,
    #[serde(rename = "pageviews")]
    Pageviews,
}

impl SignalKind {
    pub const ALL: [SignalKind; 5] = [
        SignalKind::WiktionaryTitle,
        SignalKind::WordNet,
        SignalKind::Zipf,
        SignalKind::Ngram,
        SignalKind::Pageviews,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SignalKind::WiktionaryTitle => "wiktionary",
            SignalKind::WordNet => "wordnet",
            SignalKind::Zipf => "zipf",
            SignalKind::Ngram => "ngram",
            SignalKind::Pageviews => "pageviews",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SignalKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "wiktionary" | "wiktionary-title" | "title" => Ok(SignalKind::WiktionaryTitle),
            "wordnet" => Ok(SignalKind::WordNet),
            "zipf" => Ok(SignalKind::Zipf),
            "ngram" | "google-ngram" => Ok(SignalKind::Ngram),
            "pageviews" => Ok(SignalKind::Pageviews),
            other => Err(PipelineError::Config(format!("unknown signal source: {}", other))),
        }
    }
}

/// Which sources the aggregator consults and how strictly.
///
/// Fixed for the duration of one aggregator run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterConfiguration {
    pub enabled: BTreeSet<SignalKind>,
    /// Never send words outside the title set to the pageview endpoint.
    pub strict: bool,
    /// Keep every word, still computing signals for the report.
    pub keep_all: bool,
}

impl FilterConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, kind: SignalKind) -> Self {
        self.enabled.insert(kind);
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_keep_all(mut self, keep_all: bool) -> Self {
        self.keep_all = keep_all;
        self
    }

    /// Enabled sources, or all of them when none were named.
    pub fn active(&self) -> BTreeSet<SignalKind> {
        if self.enabled.is_empty() {
            SignalKind::ALL.into_iter().collect()
        } else {
            self.enabled.clone()
        }
    }

    pub fn is_active(&self, kind: SignalKind) -> bool {
        self.enabled.is_empty() || self.enabled.contains(&kind)
    }
}

/// How raw tokens become pipeline words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizationPolicy {
    pub lowercase: bool,
    pub allow_apostrophe: bool,
    pub allow_digits: bool,
    pub ascii_only: bool,
    pub min_len: usize,
}

impl Default for NormalizationPolicy {
    fn default() -> Self {
        Self {
            lowercase: true,
            allow_apostrophe: true,
            allow_digits: false,
            ascii_only: true,
            min_len: 1,
        }
    }
}

impl NormalizationPolicy {
    /// Normalize a raw token, or reject it.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let unified = raw.trim().replace(['\u{2019}', '\u{2018}'], "'");
        let trimmed = unified.trim_matches(|c: char| !c.is_alphanumeric());
        if trimmed.is_empty() {
            return None;
        }

        let word = if self.lowercase {
            trimmed.to_lowercase()
        } else {
            trimmed.to_string()
        };

        let mut previous_apostrophe = false;
        for c in word.chars() {
            let allowed = if c == '\'' {
                // Internal only, never doubled
                self.allow_apostrophe && !previous_apostrophe
            } else if c.is_ascii_digit() {
                self.allow_digits
            } else if self.ascii_only {
                c.is_ascii_alphabetic()
            } else {
                c.is_alphabetic()
            };
            if !allowed {
                return None;
            }
            previous_apostrophe = c == '\'';
        }

        if word.chars().count() < self.min_len {
            return None;
        }
        Some(word)
    }
}

/// Wikimedia per-article pageview endpoint settings.
#[derive(Debug, Clone)]
pub struct PageviewConfig {
    pub api_base: String,
    pub project: String,
    pub access: String,
    pub agent: String,
    pub granularity: String,
    pub start: String,
    pub end: String,
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub min_request_interval_ms: u64,
    /// Cache entries buffered before an append to disk.
    pub flush_every: usize,
}

impl Default for PageviewConfig {
    fn default() -> Self {
        let (start, end) = default_pageview_window(0);
        Self {
            api_base: "https://wikimedia.org/api/rest_v1/metrics/pageviews/per-article".to_string(),
            project: "en.wiktionary".to_string(),
            access: "all-access".to_string(),
            agent: "user".to_string(),
            granularity: "monthly".to_string(),
            start,
            end,
            user_agent: "vocab-pipeline/0.1 (pageview lookups)".to_string(),
            timeout_seconds: 10,
            max_retries: 3,
            retry_delay_ms: 500,
            min_request_interval_ms: 20,
            flush_every: 200,
        }
    }
}

/// Judgment oracle (Gemini `generateContent`) settings.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub api_base: String,
    pub model: String,
    pub api_key: Option<String>,
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub temperature: f32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "models/gemini-2.0-flash".to_string(),
            api_key: None,
            user_agent: "vocab-pipeline/0.1 (reassessment)".to_string(),
            timeout_seconds: 60,
            temperature: 0.0,
        }
    }
}

/// Reassessment loop pacing.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Words judged per pass.
    pub batch_size: usize,
    /// Keep running passes until nothing is left.
    pub auto_loop: bool,
    pub pause_between_passes: Duration,
    /// Backoff retries for one oracle call that is rate limited or hits a
    /// transient failure.
    pub max_rate_limit_retries: u32,
    pub rate_limit_base_delay: Duration,
    /// How many times one invocation takes up a word that keeps failing
    /// before leaving it for the next invocation. Only `auto_loop` takes a
    /// failed word up again.
    pub max_attempts_per_run: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            auto_loop: false,
            pause_between_passes: Duration::from_secs(2),
            max_rate_limit_retries: 5,
            rate_limit_base_delay: Duration::from_secs(5),
            max_attempts_per_run: 3,
        }
    }
}

/// Dump collapse settings.
#[derive(Debug, Clone)]
pub struct CollapseConfig {
    /// Level-2 language sections to keep, lower-cased.
    pub languages: BTreeSet<String>,
    pub progress_every: u64,
}

impl Default for CollapseConfig {
    fn default() -> Self {
        Self {
            languages: ["english", "translingual"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            progress_every: 100_000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Required reference file not found: {}", .path.display())]
    MissingReference { path: PathBuf },

    #[error("Cache file {} is corrupt at line {line}: {reason}", .path.display())]
    CacheCorrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Rate limited{}", retry_suffix(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Dump parse error: {0}")]
    DumpParse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn retry_suffix(retry_after_secs: &Option<u64>) -> String {
    match retry_after_secs {
        Some(secs) => format!(" for {} seconds", secs),
        None => String::new(),
    }
}

impl PipelineError {
    /// Worth retrying after a pause.
    pub fn is_transient(&self) -> bool {
        match self {
            PipelineError::RateLimited { .. } | PipelineError::Transient(_) => true,
            PipelineError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Must stop the component rather than skip the current item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::MissingReference { .. }
                | PipelineError::CacheCorrupt { .. }
                | PipelineError::Config(_)
                | PipelineError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_activates_every_source() {
        let config = FilterConfiguration::new();
        assert_eq!(config.active().len(), SignalKind::ALL.len());
        assert!(config.is_active(SignalKind::Pageviews));

        let only_titles = FilterConfiguration::new().with_source(SignalKind::WiktionaryTitle);
        assert!(only_titles.is_active(SignalKind::WiktionaryTitle));
        assert!(!only_titles.is_active(SignalKind::Ngram));
    }

    #[test]
    fn signal_names_round_trip() {
        for kind in SignalKind::ALL {
            assert_eq!(kind.name().parse::<SignalKind>().ok(), Some(kind));
        }
        assert!("bogus".parse::<SignalKind>().is_err());
    }

    #[test]
    fn normalization_policy() {
        let policy = NormalizationPolicy::default();
        assert_eq!(policy.normalize("Hello,"), Some("hello".to_string()));
        assert_eq!(policy.normalize("don\u{2019}t"), Some("don't".to_string()));
        assert_eq!(policy.normalize("'quoted'"), Some("quoted".to_string()));
        assert_eq!(policy.normalize("r2d2"), None);
        assert_eq!(policy.normalize("rock''n"), None);
        assert_eq!(policy.normalize("café"), None);
        assert_eq!(policy.normalize("..."), None);

        let digits = NormalizationPolicy {
            allow_digits: true,
            ..Default::default()
        };
        assert_eq!(digits.normalize("R2D2"), Some("r2d2".to_string()));
    }

    #[test]
    fn fatal_and_transient_are_disjoint() {
        let limited = PipelineError::RateLimited { retry_after_secs: Some(3) };
        assert!(limited.is_transient());
        assert!(!limited.is_fatal());
        assert_eq!(limited.to_string(), "Rate limited for 3 seconds");

        let missing = PipelineError::MissingReference { path: PathBuf::from("titles.txt") };
        assert!(missing.is_fatal());
        assert!(!missing.is_transient());
    }
}
