mod common;

use common::{Reply, ScriptedOracle};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use vocab_pipeline::reassess::render_assessment_table;
use vocab_pipeline::{
    AssessmentRecord, AssessmentState, Judgment, KvStore, LoopConfig, PipelineError,
    ReassessmentLoop, Result,
};

const WORDS: [&str; 5] = ["blorp", "quixotic", "zyzzyva", "glimmerous", "frobnicate"];

fn quick(batch_size: usize, auto_loop: bool) -> LoopConfig {
    LoopConfig {
        batch_size,
        auto_loop,
        pause_between_passes: Duration::from_millis(1),
        max_rate_limit_retries: 3,
        rate_limit_base_delay: Duration::from_millis(1),
        max_attempts_per_run: 3,
    }
}

fn seed(path: &Path, words: &[&str]) -> Result<()> {
    let mut store: KvStore<AssessmentRecord> = KvStore::open(path, 1)?;
    for word in words {
        let judgment = Judgment {
            word: word.to_string(),
            score: 0.0,
            reasoning: "seeded".to_string(),
        };
        store.insert(word, AssessmentRecord::from_judgment(judgment, None))?;
    }
    Ok(())
}

#[tokio::test]
async fn only_unassessed_words_reach_the_oracle() -> Result<()> {
    common::init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("assessments.jsonl");
    seed(&path, &["quixotic", "glimmerous"])?;

    let oracle = Arc::new(ScriptedOracle::new());
    let mut reassessment = ReassessmentLoop::open(&path, oracle.clone(), quick(10, false))?;
    let summary = reassessment.run(&WORDS).await?;

    assert_eq!(oracle.calls(), 3);
    assert_eq!(oracle.asked(), vec!["blorp", "zyzzyva", "frobnicate"]);
    assert_eq!(summary.total, 5);
    assert_eq!(summary.already_assessed, 2);
    assert_eq!(summary.remaining, 0);
    assert_eq!(reassessment.store().get("quixotic").map(|r| r.reasoning.as_str()), Some("seeded"));
    Ok(())
}

#[tokio::test]
async fn interrupted_runs_resume_without_repeats() -> Result<()> {
    common::init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("assessments.jsonl");
    let oracle = Arc::new(ScriptedOracle::new());

    let mut remaining = Vec::new();
    for _ in 0..3 {
        let mut reassessment = ReassessmentLoop::open(&path, oracle.clone(), quick(2, false))?;
        let summary = reassessment.run(&WORDS).await?;
        assert_eq!(summary.passes, 1);
        remaining.push(summary.remaining);
    }

    assert_eq!(remaining, vec![3, 1, 0]);
    assert_eq!(oracle.calls(), WORDS.len());
    let asked: HashSet<String> = oracle.asked().into_iter().collect();
    assert_eq!(asked.len(), WORDS.len());
    Ok(())
}

#[tokio::test]
async fn auto_loop_runs_until_everything_is_assessed() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let oracle = Arc::new(ScriptedOracle::new().script("zyzzyva", [Reply::Score(0.0)]));
    let mut reassessment =
        ReassessmentLoop::open(dir.path().join("a.jsonl"), oracle.clone(), quick(2, true))?;

    let summary = reassessment.run(&WORDS).await?;
    assert_eq!(summary.passes, 3);
    assert_eq!(summary.assessed, 5);
    assert_eq!(summary.remaining, 0);
    assert_eq!(oracle.calls(), 5);
    assert_eq!(reassessment.store().get("zyzzyva").map(|r| r.score), Some(0.0));
    assert_eq!(reassessment.state_of("zyzzyva"), AssessmentState::Assessed);
    Ok(())
}

#[tokio::test]
async fn malformed_reply_is_retried_next_invocation() -> Result<()> {
    common::init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("assessments.jsonl");
    let oracle = Arc::new(ScriptedOracle::new().script("blorp", [Reply::Malformed]));

    let mut first = ReassessmentLoop::open(&path, oracle.clone(), quick(10, false))?;
    let summary = first.run(&WORDS).await?;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.remaining, 1);
    assert_eq!(first.state_of("blorp"), AssessmentState::Failed);
    assert!(!first.store().contains("blorp"));
    assert_eq!(oracle.calls(), 5);
    drop(first);

    let mut second = ReassessmentLoop::open(&path, oracle.clone(), quick(10, false))?;
    let summary = second.run(&WORDS).await?;
    assert_eq!(summary.already_assessed, 4);
    assert_eq!(summary.remaining, 0);
    assert_eq!(oracle.calls(), 6);
    Ok(())
}

#[tokio::test]
async fn auto_loop_takes_failed_words_up_again() -> Result<()> {
    common::init_tracing();
    let dir = tempfile::tempdir()?;
    let oracle = Arc::new(ScriptedOracle::new().script("blorp", [Reply::Malformed]));
    let mut reassessment =
        ReassessmentLoop::open(dir.path().join("a.jsonl"), oracle.clone(), quick(2, true))?;

    let summary = reassessment.run(&WORDS).await?;
    // blorp rejoins the queue ahead of the words not yet asked
    assert_eq!(summary.passes, 3);
    assert_eq!(oracle.asked(), vec!["blorp", "quixotic", "blorp", "zyzzyva", "glimmerous", "frobnicate"]);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.remaining, 0);
    assert_eq!(oracle.calls(), 6);
    assert_eq!(reassessment.state_of("blorp"), AssessmentState::Assessed);
    Ok(())
}

#[tokio::test]
async fn auto_loop_gives_up_after_the_attempt_cap() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let oracle = Arc::new(ScriptedOracle::new().script("blorp", [Reply::Malformed; 5]));
    let mut reassessment =
        ReassessmentLoop::open(dir.path().join("a.jsonl"), oracle.clone(), quick(1, true))?;

    let summary = reassessment.run(&["blorp"]).await?;
    assert_eq!(summary.passes, 3);
    assert_eq!(oracle.calls(), 3);
    assert_eq!(summary.remaining, 1);
    assert_eq!(reassessment.state_of("blorp"), AssessmentState::Failed);
    Ok(())
}

#[tokio::test]
async fn transient_failures_back_off_and_retry() -> Result<()> {
    common::init_tracing();
    let dir = tempfile::tempdir()?;
    let oracle = Arc::new(ScriptedOracle::new().script("blorp", [Reply::Unavailable]));
    let mut reassessment =
        ReassessmentLoop::open(dir.path().join("a.jsonl"), oracle.clone(), quick(10, false))?;

    let summary = reassessment.run(&["blorp"]).await?;
    assert_eq!(oracle.calls(), 2);
    assert_eq!(summary.transient, 1);
    assert_eq!(summary.rate_limited, 0);
    assert_eq!(summary.assessed, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.remaining, 0);
    Ok(())
}

#[tokio::test]
async fn rate_limits_back_off_and_retry_the_same_word() -> Result<()> {
    common::init_tracing();
    let dir = tempfile::tempdir()?;
    let oracle = Arc::new(
        ScriptedOracle::new()
            .script("blorp", [Reply::RateLimited, Reply::RateLimited, Reply::Score(1.0)])
            .script("quixotic", [Reply::RateLimited; 4]),
    );
    let mut reassessment =
        ReassessmentLoop::open(dir.path().join("a.jsonl"), oracle.clone(), quick(2, false))?;

    let summary = reassessment.run(&WORDS).await?;
    assert_eq!(summary.rate_limited, 6);
    assert_eq!(summary.assessed, 1);
    assert_eq!(summary.failed, 1);
    // Three calls for blorp, four for quixotic before giving up
    assert_eq!(oracle.calls(), 7);
    assert!(reassessment.store().contains("blorp"));
    assert_eq!(reassessment.state_of("quixotic"), AssessmentState::Failed);
    Ok(())
}

#[tokio::test]
async fn rejected_key_stops_the_loop_but_keeps_verdicts() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("assessments.jsonl");
    let oracle = Arc::new(ScriptedOracle::new().script("zyzzyva", [Reply::BadKey]));

    let mut reassessment = ReassessmentLoop::open(&path, oracle.clone(), quick(10, false))?;
    let err = reassessment.run(&WORDS).await.err();
    assert!(matches!(err, Some(PipelineError::Config(_))));
    drop(reassessment);

    let store: KvStore<AssessmentRecord> = KvStore::open(&path, 1)?;
    assert_eq!(store.len(), 2);
    assert!(store.contains("blorp") && store.contains("quixotic"));
    Ok(())
}

#[tokio::test]
async fn review_table_lists_every_word() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("assessments.jsonl");
    seed(&path, &["blorp"])?;

    let store: KvStore<AssessmentRecord> = KvStore::open(&path, 1)?;
    let table = render_assessment_table(&store, &["blorp", "quixotic"]);
    let rows: Vec<&str> = table.lines().skip(2).collect();
    assert_eq!(rows.len(), 2);
    assert!(rows[0].starts_with("blorp") && rows[0].contains("0.0") && rows[0].ends_with("seeded"));
    assert!(rows[1].starts_with("quixotic") && rows[1].ends_with('-'));
    Ok(())
}
