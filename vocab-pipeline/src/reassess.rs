use crate::store::KvStore;
use crate::traits::JudgmentOracle;
use crate::types::{AssessmentRecord, LoopConfig, PipelineError, Result};
use crate::utils::fs as fs_utils;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Where a discarded word stands within the current invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssessmentState {
    Unassessed,
    InFlight,
    Assessed,
    /// Gave up for now. A later `auto_loop` pass or the next invocation
    /// takes it up again.
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub total: usize,
    pub already_assessed: usize,
    pub oracle_calls: usize,
    pub assessed: usize,
    pub failed: usize,
    pub rate_limited: usize,
    /// Transient oracle failures (5xx, timeouts) that were retried.
    pub transient: usize,
    pub passes: usize,
    pub remaining: usize,
}

/// Asks the oracle about every discarded word that has no verdict yet.
pub struct ReassessmentLoop {
    store: KvStore<AssessmentRecord>,
    oracle: Arc<dyn JudgmentOracle>,
    config: LoopConfig,
    states: HashMap<String, AssessmentState>,
    attempts: HashMap<String, u32>,
}

impl ReassessmentLoop {
    pub fn new(store: KvStore<AssessmentRecord>, oracle: Arc<dyn JudgmentOracle>, config: LoopConfig) -> Self {
        Self {
            store,
            oracle,
            config,
            states: HashMap::new(),
            attempts: HashMap::new(),
        }
    }

    /// Open the assessment store at `path`; every verdict is committed as soon as it arrives.
    pub fn open(path: impl Into<PathBuf>, oracle: Arc<dyn JudgmentOracle>, config: LoopConfig) -> Result<Self> {
        Ok(Self::new(KvStore::open(path, 1)?, oracle, config))
    }

    pub fn store(&self) -> &KvStore<AssessmentRecord> {
        &self.store
    }

    pub fn state_of(&self, word: &str) -> AssessmentState {
        if self.store.contains(word) {
            return AssessmentState::Assessed;
        }
        self.states
            .get(word)
            .copied()
            .unwrap_or(AssessmentState::Unassessed)
    }

    /// Words still to ask about, in list order, without repeats.
    pub fn pending<'a, S: AsRef<str>>(&self, words: &'a [S]) -> Vec<&'a str> {
        let mut seen = HashSet::new();
        words
            .iter()
            .map(|w| w.as_ref().trim())
            .filter(|w| !w.is_empty() && seen.insert(*w))
            .filter(|w| self.state_of(w) == AssessmentState::Unassessed)
            .collect()
    }

    fn can_retry(&self, word: &str) -> bool {
        self.attempts.get(word).copied().unwrap_or(0) < self.config.max_attempts_per_run.max(1)
    }

    /// Failed words with attempts left in this invocation.
    fn retryable_failures(&self) -> Vec<String> {
        self.states
            .iter()
            .filter(|(word, state)| **state == AssessmentState::Failed && self.can_retry(word))
            .map(|(word, _)| word.clone())
            .collect()
    }

    fn rate_limit_backoff(&self) -> ExponentialBackoff<backoff::SystemClock> {
        let base = self.config.rate_limit_base_delay;
        ExponentialBackoff {
            current_interval: base,
            initial_interval: base,
            randomization_factor: 0.0,
            multiplier: 2.0,
            max_interval: base * 16,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Judge pending words in passes of `batch_size`.
    ///
    /// Without `auto_loop` a single pass runs. With it, passes continue until
    /// every word has a record, failed words being taken up again after the
    /// pause until `max_attempts_per_run` is spent. Words that already have
    /// a record are never sent to the oracle again.
    pub async fn run<S: AsRef<str>>(&mut self, words: &[S]) -> Result<LoopSummary> {
        let unique: HashSet<&str> = words
            .iter()
            .map(|w| w.as_ref().trim())
            .filter(|w| !w.is_empty())
            .collect();
        let mut summary = LoopSummary {
            total: unique.len(),
            already_assessed: unique.iter().filter(|w| self.store.contains(w)).count(),
            ..Default::default()
        };
        info!(
            "{} discarded words, {} already assessed by a previous run",
            summary.total, summary.already_assessed
        );

        loop {
            let batch: Vec<String> = self
                .pending(words)
                .into_iter()
                .take(self.config.batch_size.max(1))
                .map(str::to_string)
                .collect();
            if batch.is_empty() {
                info!("Every discarded word has been assessed");
                break;
            }

            summary.passes += 1;
            info!("Pass {}: assessing {} words", summary.passes, batch.len());
            for word in &batch {
                self.assess_one(word, &mut summary).await?;
            }

            if !self.config.auto_loop {
                break;
            }
            let retry = self.retryable_failures();
            if retry.is_empty() && self.pending(words).is_empty() {
                break;
            }
            tokio::time::sleep(self.config.pause_between_passes).await;
            if !retry.is_empty() {
                info!("Taking up {} failed words again", retry.len());
            }
            for word in retry {
                self.states.insert(word, AssessmentState::Unassessed);
            }
        }

        summary.remaining = unique.iter().filter(|w| !self.store.contains(w)).count();
        info!(
            "Reassessment finished: {} assessed, {} failed, {} remaining after {} oracle calls",
            summary.assessed, summary.failed, summary.remaining, summary.oracle_calls
        );
        Ok(summary)
    }

    async fn assess_one(&mut self, word: &str, summary: &mut LoopSummary) -> Result<()> {
        self.states.insert(word.to_string(), AssessmentState::InFlight);
        *self.attempts.entry(word.to_string()).or_default() += 1;
        let mut backoff = self.rate_limit_backoff();
        let mut retries = 0;

        loop {
            summary.oracle_calls += 1;
            match self.oracle.assess(word).await {
                Ok(judgment) => {
                    let record = AssessmentRecord::from_judgment(judgment, Some(self.oracle.oracle_name()));
                    info!("{}: score {} ({})", word, record.score, record.reasoning);
                    self.store.insert_and_flush(word, record)?;
                    self.states.insert(word.to_string(), AssessmentState::Assessed);
                    summary.assessed += 1;
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    let retry_after_secs = match &e {
                        PipelineError::RateLimited { retry_after_secs } => {
                            summary.rate_limited += 1;
                            *retry_after_secs
                        }
                        _ => {
                            summary.transient += 1;
                            None
                        }
                    };
                    if retries >= self.config.max_rate_limit_retries {
                        warn!("Giving up on {} for now after {} retries: {}", word, retries, e);
                        break;
                    }
                    retries += 1;
                    let mut delay = backoff.next_backoff().unwrap_or(self.config.rate_limit_base_delay);
                    if let Some(secs) = retry_after_secs {
                        delay = delay.max(Duration::from_secs(secs));
                    }
                    warn!("{} on {}, retrying in {:?}", e, word, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_fatal() => {
                    error!("Stopping reassessment at {}: {}", word, e);
                    self.states.remove(word);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Could not assess {}: {}", word, e);
                    break;
                }
            }
        }

        self.states.insert(word.to_string(), AssessmentState::Failed);
        summary.failed += 1;
        Ok(())
    }
}

/// `WORD SCORE REASONING` for every word in list order; `-` where not assessed yet.
pub fn render_assessment_table<S: AsRef<str>>(store: &KvStore<AssessmentRecord>, words: &[S]) -> String {
    let width = words
        .iter()
        .map(|w| w.as_ref().chars().count())
        .chain(std::iter::once(4))
        .max()
        .unwrap_or(4);

    let mut out = String::new();
    let _ = writeln!(out, "{:<width$}  {:>5}  REASONING", "WORD", "SCORE");
    let _ = writeln!(out, "{}  {}  {}", "-".repeat(width), "-".repeat(5), "-".repeat(20));
    for word in words {
        let word = word.as_ref();
        match store.get(word) {
            Some(record) => {
                let _ = writeln!(out, "{:<width$}  {:>5.1}  {}", word, record.score, record.reasoning);
            }
            None => {
                let _ = writeln!(out, "{:<width$}  {:>5}  -", word, "-");
            }
        }
    }
    out
}

pub fn write_assessment_table<S: AsRef<str>>(
    path: &Path,
    store: &KvStore<AssessmentRecord>,
    words: &[S],
) -> Result<()> {
    fs_utils::write_atomic(path, &render_assessment_table(store, words))?;
    info!("Wrote assessment table for {} words to {}", words.len(), path.display());
    Ok(())
}
