mod common;

use std::fs;
use vocab_pipeline::{AssessmentRecord, KvStore, PipelineError, Result};

#[test]
fn committed_entries_survive_every_reopen() -> Result<()> {
    common::init_tracing();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("pageviews.jsonl");

    let mut previous = 0;
    for round in 0..4u64 {
        let mut store: KvStore<u64> = KvStore::open(&path, 2)?;
        assert!(store.len() >= previous, "store shrank between runs");
        for i in 0..3 {
            store.insert(&format!("word{}-{}", round, i), round * 10 + i)?;
        }
        store.flush()?;
        previous = store.len();
    }

    let store: KvStore<u64> = KvStore::open(&path, 2)?;
    assert_eq!(store.len(), 12);
    assert_eq!(store.get("word3-2"), Some(&32));
    Ok(())
}

#[test]
fn interrupted_append_keeps_every_complete_line() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("assessments.jsonl");
    fs::write(
        &path,
        concat!(
            "{\"key\":\"blorp\",\"value\":{\"score\":0.0,\"reasoning\":\"none\",\"assessed_at\":\"2024-05-01T00:00:00Z\",\"model\":null}}\n",
            "{\"key\":\"quix",
        ),
    )?;

    let mut store: KvStore<AssessmentRecord> = KvStore::open(&path, 1)?;
    assert_eq!(store.len(), 1);
    assert!(store.contains("blorp"));
    assert!(!store.contains("quix"));

    let record = store.get("blorp").cloned().expect("replayed record");
    store.insert_and_flush("quixotic", record)?;
    drop(store);

    let reopened: KvStore<AssessmentRecord> = KvStore::open(&path, 1)?;
    assert_eq!(reopened.len(), 2);
    assert!(fs::read_to_string(&path)?.ends_with("}\n"));
    Ok(())
}

#[test]
fn corrupt_middle_line_is_reported_not_wiped() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("pageviews.jsonl");
    let contents = "{\"key\":\"cat\",\"value\":1}\n{oops}\n{\"key\":\"dog\",\"value\":2}\n";
    fs::write(&path, contents)?;

    match KvStore::<u64>::open(&path, 10) {
        Err(PipelineError::CacheCorrupt { line, .. }) => assert_eq!(line, 2),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("corrupt store opened"),
    }
    assert_eq!(fs::read_to_string(&path)?, contents);
    Ok(())
}

#[test]
fn compact_keeps_latest_values_only() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("pageviews.jsonl");
    {
        let mut store: KvStore<u64> = KvStore::open(&path, 1)?;
        store.insert("cat", 1)?;
        store.insert("cat", 5)?;
        store.insert("ant", 2)?;
        store.insert("cat", 9)?;
    }
    assert_eq!(fs::read_to_string(&path)?.lines().count(), 4);

    let mut store: KvStore<u64> = KvStore::open(&path, 1)?;
    tokio_test::assert_ok!(store.compact());
    assert_eq!(
        fs::read_to_string(&path)?,
        "{\"key\":\"ant\",\"value\":2}\n{\"key\":\"cat\",\"value\":9}\n"
    );

    let reopened: KvStore<u64> = KvStore::open(&path, 1)?;
    assert_eq!(reopened.get("cat"), Some(&9));
    Ok(())
}
