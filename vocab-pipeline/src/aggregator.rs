use crate::pageviews::PageviewResolver;
use crate::reference::References;
use crate::types::{FilterConfiguration, NormalizationPolicy, Result, SignalKind};
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Every signal computed for one word. `None` means not computed or unavailable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignalBundle {
    pub wiktionary: Option<bool>,
    pub wordnet: Option<bool>,
    pub zipf: Option<f64>,
    pub ngram: Option<f64>,
    pub pageviews: Option<u64>,
}

impl SignalBundle {
    /// Whether the signal for `kind` vouches for the word. Missing values fail.
    pub fn passes(&self, kind: SignalKind) -> bool {
        match kind {
            SignalKind::WiktionaryTitle => self.wiktionary == Some(true),
            SignalKind::WordNet => self.wordnet == Some(true),
            SignalKind::Zipf => self.zipf.is_some_and(|z| z > 0.0),
            SignalKind::Ngram => self.ngram.is_some_and(|n| n > 0.0),
            SignalKind::Pageviews => self.pageviews.is_some_and(|p| p > 0),
        }
    }

    /// Sources that passed, in canonical order.
    pub fn passed(&self) -> Vec<SignalKind> {
        SignalKind::ALL
            .into_iter()
            .filter(|kind| self.passes(*kind))
            .collect()
    }

    fn rank_key(&self) -> (f64, u64) {
        (self.ngram.unwrap_or(0.0), self.pageviews.unwrap_or(0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Kept,
    Discarded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WordRecord {
    pub word: String,
    pub signals: SignalBundle,
    pub decision: Decision,
}

impl WordRecord {
    pub fn is_kept(&self) -> bool {
        self.decision == Decision::Kept
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationStats {
    pub input: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub kept: usize,
    pub discarded: usize,
    pub pageview_lookups: usize,
    pub pageview_failures: usize,
}

/// Result of one aggregator run: kept words rarest first, discards in input order.
#[derive(Debug, Clone, Default)]
pub struct AggregationReport {
    pub kept: Vec<WordRecord>,
    pub discarded: Vec<WordRecord>,
    pub stats: AggregationStats,
}

impl AggregationReport {
    pub fn kept_words(&self) -> Vec<&str> {
        self.kept.iter().map(|r| r.word.as_str()).collect()
    }

    pub fn discarded_words(&self) -> Vec<&str> {
        self.discarded.iter().map(|r| r.word.as_str()).collect()
    }
}

/// Ascending popularity: n-gram count, then pageviews, then the word itself.
pub fn rank_order(a: &WordRecord, b: &WordRecord) -> Ordering {
    let (a_ngram, a_views) = a.signals.rank_key();
    let (b_ngram, b_views) = b.signals.rank_key();
    a_ngram
        .total_cmp(&b_ngram)
        .then(a_views.cmp(&b_views))
        .then_with(|| a.word.cmp(&b.word))
}

/// Fuses the reference signals into a keep/discard decision per word.
pub struct SignalAggregator {
    references: References,
    filter: FilterConfiguration,
    policy: NormalizationPolicy,
    resolver: Option<PageviewResolver>,
}

impl SignalAggregator {
    pub fn new(references: References, filter: FilterConfiguration) -> Self {
        Self {
            references,
            filter,
            policy: NormalizationPolicy::default(),
            resolver: None,
        }
    }

    pub fn with_policy(mut self, policy: NormalizationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_resolver(mut self, resolver: PageviewResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Classify every word of `raw` in input order.
    ///
    /// Newly fetched pageview counts are committed to the cache before this
    /// returns, whether or not the run succeeded.
    pub async fn run<'a, I>(&mut self, raw: I) -> Result<AggregationReport>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let result = self.classify_all(raw).await;
        let flushed = match self.resolver.as_mut() {
            Some(resolver) => resolver.flush(),
            None => Ok(0),
        };
        let mut report = result?;
        let flushed = flushed?;
        if flushed > 0 {
            debug!("Committed {} new pageview counts", flushed);
        }

        report.kept.sort_by(rank_order);
        report.stats.kept = report.kept.len();
        report.stats.discarded = report.discarded.len();
        info!(
            "Aggregation complete: {} kept, {} discarded ({} rejected, {} duplicates)",
            report.stats.kept, report.stats.discarded, report.stats.rejected, report.stats.duplicates
        );
        Ok(report)
    }

    async fn classify_all<'a, I>(&mut self, raw: I) -> Result<AggregationReport>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let active = self.filter.active();
        if active.contains(&SignalKind::Pageviews) && self.resolver.is_none() {
            warn!("Pageview signal enabled without a resolver; every pageview signal will fail");
        }
        info!(
            "Aggregating with sources [{}]{}{}",
            active.iter().map(|k| k.name()).collect::<Vec<_>>().join(", "),
            if self.filter.strict { ", strict" } else { "" },
            if self.filter.keep_all { ", keeping all" } else { "" }
        );

        let mut report = AggregationReport::default();
        let mut seen = HashSet::new();

        for token in raw {
            report.stats.input += 1;
            let Some(word) = self.policy.normalize(token) else {
                debug!("Rejected token {:?}", token);
                report.stats.rejected += 1;
                continue;
            };
            if !seen.insert(word.clone()) {
                report.stats.duplicates += 1;
                continue;
            }

            let record = self.classify(word, &mut report.stats).await?;
            if record.is_kept() {
                report.kept.push(record);
            } else {
                report.discarded.push(record);
            }

            let processed = report.kept.len() + report.discarded.len();
            if processed % 10_000 == 0 {
                info!(
                    "Processed {} words ({} kept, {} discarded)",
                    processed,
                    report.kept.len(),
                    report.discarded.len()
                );
            }
        }

        Ok(report)
    }

    async fn classify(&mut self, word: String, stats: &mut AggregationStats) -> Result<WordRecord> {
        let refs = &self.references;
        let mut signals = SignalBundle {
            wiktionary: refs.titles.membership(&word),
            wordnet: refs.wordnet.membership(&word),
            zipf: refs.zipf.frequency(&word),
            ngram: refs.ngram.frequency(&word),
            pageviews: None,
        };

        let pageviews_active = self.filter.is_active(SignalKind::Pageviews);
        let kept_without_pageviews = self.filter.keep_all
            || self
                .filter
                .active()
                .into_iter()
                .filter(|kind| *kind != SignalKind::Pageviews)
                .any(|kind| signals.passes(kind));

        if let Some(resolver) = self.resolver.as_mut() {
            // Counts are wanted for the decision, or for ranking a kept word
            let wanted = pageviews_active || kept_without_pageviews;
            let in_titles = signals.wiktionary == Some(true);
            let allow_fetch = wanted && (!self.filter.strict || in_titles);

            let before = resolver.stats().clone();
            signals.pageviews = resolver.resolve(&word, allow_fetch).await?;
            let after = resolver.stats();
            stats.pageview_lookups += (after.fetched + after.not_found + after.failed)
                - (before.fetched + before.not_found + before.failed);
            stats.pageview_failures += after.failed - before.failed;
        }

        let kept = kept_without_pageviews
            || (pageviews_active && signals.passes(SignalKind::Pageviews));

        Ok(WordRecord {
            word,
            signals,
            decision: if kept { Decision::Kept } else { Decision::Discarded },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(word: &str, ngram: Option<f64>, pageviews: Option<u64>) -> WordRecord {
        WordRecord {
            word: word.to_string(),
            signals: SignalBundle {
                ngram,
                pageviews,
                ..Default::default()
            },
            decision: Decision::Kept,
        }
    }

    #[test]
    fn missing_values_fail_their_signal() {
        let bundle = SignalBundle::default();
        for kind in SignalKind::ALL {
            assert!(!bundle.passes(kind));
        }

        let zero = SignalBundle {
            zipf: Some(0.0),
            ngram: Some(0.0),
            pageviews: Some(0),
            wiktionary: Some(false),
            wordnet: Some(false),
        };
        assert!(zero.passed().is_empty());
    }

    #[test]
    fn ranking_is_rarest_first_then_alphabetical() {
        let mut records = vec![
            record("zebra", Some(10.0), Some(5)),
            record("apple", Some(10.0), Some(5)),
            record("common", Some(900.0), None),
            record("rare", None, Some(3)),
        ];
        records.sort_by(rank_order);
        let words: Vec<&str> = records.iter().map(|r| r.word.as_str()).collect();
        assert_eq!(words, vec!["rare", "apple", "zebra", "common"]);
    }
}
