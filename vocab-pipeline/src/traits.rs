use crate::types::{Judgment, Result};
use async_trait::async_trait;

/// What a popularity endpoint said about one title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
    /// Total views over the configured window.
    Views(u64),
    /// The endpoint has no article by that title.
    NotFound,
}

impl LookupOutcome {
    /// Views as a cacheable number; an unknown title counts as zero.
    pub fn views(&self) -> u64 {
        match self {
            LookupOutcome::Views(v) => *v,
            LookupOutcome::NotFound => 0,
        }
    }
}

/// Trait for remote popularity lookups (pageview counts per title)
#[async_trait]
pub trait PopularityLookup: Send + Sync {
    /// Name used in logs
    fn lookup_name(&self) -> String;

    /// Fetch the popularity of one word.
    ///
    /// Retries and pacing are the implementation's business; an `Err` means
    /// the value is unknown for now and must not be cached.
    async fn fetch_views(&self, word: &str) -> Result<LookupOutcome>;
}

/// Trait for judgment oracles that decide whether a word is real
#[async_trait]
pub trait JudgmentOracle: Send + Sync {
    /// Name used in logs and recorded next to each assessment
    fn oracle_name(&self) -> String;

    /// Judge one word. `RateLimited` errors are retried by the caller.
    async fn assess(&self, word: &str) -> Result<Judgment>;
}
