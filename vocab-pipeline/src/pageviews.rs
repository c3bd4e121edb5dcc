use crate::store::KvStore;
use crate::traits::{LookupOutcome, PopularityLookup};
use crate::types::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters for one resolver's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub cache_hits: usize,
    pub fetched: usize,
    pub not_found: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Outcome of a bulk pre-population pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmStats {
    pub total: usize,
    pub already_cached: usize,
    pub fetched: usize,
    pub not_found: usize,
    pub failed: usize,
}

/// Cache-or-fetch popularity counts backed by a resumable pageview cache.
pub struct PageviewResolver {
    cache: KvStore<u64>,
    lookup: Arc<dyn PopularityLookup>,
    stats: ResolverStats,
}

impl PageviewResolver {
    pub fn new(cache: KvStore<u64>, lookup: Arc<dyn PopularityLookup>) -> Self {
        Self {
            cache,
            lookup,
            stats: ResolverStats::default(),
        }
    }

    /// Open the cache file at `path`, appending every `flush_every` new entries.
    pub fn open(
        path: impl Into<PathBuf>,
        flush_every: usize,
        lookup: Arc<dyn PopularityLookup>,
    ) -> Result<Self> {
        Ok(Self::new(KvStore::open(path, flush_every)?, lookup))
    }

    pub fn cached(&self, word: &str) -> Option<u64> {
        self.cache.get(word).copied()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn stats(&self) -> &ResolverStats {
        &self.stats
    }

    /// Popularity count for `word`.
    ///
    /// A cached value is returned without touching the network. On a miss,
    /// `allow_fetch == false` yields `None`; otherwise the lookup runs and a
    /// definite answer (including not-found as 0) is cached. A failed lookup
    /// is logged and yields `None` without caching, so the next run retries it.
    pub async fn resolve(&mut self, word: &str, allow_fetch: bool) -> Result<Option<u64>> {
        if let Some(views) = self.cached(word) {
            self.stats.cache_hits += 1;
            return Ok(Some(views));
        }
        if !allow_fetch {
            self.stats.skipped += 1;
            return Ok(None);
        }
        self.fetch_and_store(word).await
    }

    /// Fetch `word` even if cached, replacing the stored count.
    pub async fn refresh(&mut self, word: &str) -> Result<Option<u64>> {
        self.fetch_and_store(word).await
    }

    async fn fetch_and_store(&mut self, word: &str) -> Result<Option<u64>> {
        match self.lookup.fetch_views(word).await {
            Ok(outcome) => {
                if outcome == LookupOutcome::NotFound {
                    debug!("No article for {}, caching 0", word);
                    self.stats.not_found += 1;
                } else {
                    self.stats.fetched += 1;
                }
                let views = outcome.views();
                self.cache.insert(word, views)?;
                Ok(Some(views))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("Pageview lookup for {} via {} failed: {}", word, self.lookup.lookup_name(), e);
                self.stats.failed += 1;
                Ok(None)
            }
        }
    }

    /// Walk every title, fetching the ones not cached yet (all of them when
    /// `force`). Commits in bounded batches so an interrupted warm resumes
    /// where it stopped.
    pub async fn warm<'a, I>(&mut self, titles: I, force: bool) -> Result<WarmStats>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut stats = WarmStats::default();

        for title in titles {
            stats.total += 1;
            if !force && self.cache.contains(title) {
                stats.already_cached += 1;
                continue;
            }

            let before_not_found = self.stats.not_found;
            match self.refresh(title).await? {
                Some(_) if self.stats.not_found > before_not_found => stats.not_found += 1,
                Some(_) => stats.fetched += 1,
                None => stats.failed += 1,
            }

            let done = stats.fetched + stats.not_found + stats.failed;
            if done > 0 && done % 1000 == 0 {
                info!(
                    "Warmed {} titles ({} cached before, {} failed), cache size {}",
                    done,
                    stats.already_cached,
                    stats.failed,
                    self.cache.len()
                );
            }
        }

        self.flush()?;
        info!(
            "Warm complete: {} titles, {} already cached, {} fetched, {} not found, {} failed",
            stats.total, stats.already_cached, stats.fetched, stats.not_found, stats.failed
        );
        Ok(stats)
    }

    /// Commit every pending cache entry.
    pub fn flush(&mut self) -> Result<usize> {
        self.cache.flush()
    }
}
