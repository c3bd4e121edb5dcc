#![allow(dead_code)]

use async_trait::async_trait;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use vocab_pipeline::{
    Judgment, JudgmentOracle, LookupOutcome, PipelineError, PopularityLookup, Result,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// What the scripted lookup answers for one word.
#[derive(Debug, Clone, Copy)]
pub enum Views {
    Count(u64),
    Missing,
    Fail,
}

/// Popularity lookup answering from a fixed table. Unscripted words have no article.
pub struct ScriptedLookup {
    answers: HashMap<String, Views>,
    calls: AtomicUsize,
    asked: Mutex<Vec<String>>,
}

impl ScriptedLookup {
    pub fn new<'a>(answers: impl IntoIterator<Item = (&'a str, Views)>) -> Self {
        Self {
            answers: answers
                .into_iter()
                .map(|(word, views)| (word.to_string(), views))
                .collect(),
            calls: AtomicUsize::new(0),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl PopularityLookup for ScriptedLookup {
    fn lookup_name(&self) -> String {
        "scripted".to_string()
    }

    async fn fetch_views(&self, word: &str) -> Result<LookupOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.asked.lock().unwrap().push(word.to_string());
        match self.answers.get(word).copied().unwrap_or(Views::Missing) {
            Views::Count(n) => Ok(LookupOutcome::Views(n)),
            Views::Missing => Ok(LookupOutcome::NotFound),
            Views::Fail => Err(PipelineError::Transient(format!("scripted failure for {}", word))),
        }
    }
}

/// One scripted oracle reply.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    Score(f64),
    RateLimited,
    Unavailable,
    Malformed,
    BadKey,
}

/// Oracle replying from per-word queues; an empty queue scores 1.0.
pub struct ScriptedOracle {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: AtomicUsize,
    asked: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn script(self, word: &str, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(word.to_string())
            .or_default()
            .extend(replies);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl JudgmentOracle for ScriptedOracle {
    fn oracle_name(&self) -> String {
        "scripted-oracle".to_string()
    }

    async fn assess(&self, word: &str) -> Result<Judgment> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.asked.lock().unwrap().push(word.to_string());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(word)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Reply::Score(1.0));
        match reply {
            Reply::Score(score) => Ok(Judgment {
                word: word.to_string(),
                score,
                reasoning: format!("scripted verdict for {}", word),
            }),
            Reply::RateLimited => Err(PipelineError::RateLimited { retry_after_secs: None }),
            Reply::Unavailable => Err(PipelineError::Transient("HTTP 503".to_string())),
            Reply::Malformed => Err(PipelineError::MalformedResponse("not json".to_string())),
            Reply::BadKey => Err(PipelineError::Config("key rejected".to_string())),
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// MediaWiki export XML for `(title, namespace, wikitext)` pages.
pub fn dump_xml(pages: &[(&str, i64, &str)]) -> String {
    let mut xml = String::from("<mediawiki xmlns=\"http://www.mediawiki.org/xml/export-0.11/\">\n");
    xml.push_str("  <siteinfo><sitename>Wiktionary</sitename></siteinfo>\n");
    for (title, ns, text) in pages {
        xml.push_str(&format!(
            "  <page>\n    <title>{}</title>\n    <ns>{}</ns>\n    <revision>\n      <text xml:space=\"preserve\">{}</text>\n    </revision>\n  </page>\n",
            escape(title),
            ns,
            escape(text)
        ));
    }
    xml.push_str("</mediawiki>\n");
    xml
}

/// Write `pages` as a bz2 compressed dump in `dir`.
pub fn write_bz2_dump(dir: &Path, pages: &[(&str, i64, &str)]) -> std::io::Result<PathBuf> {
    let path = dir.join("dump.xml.bz2");
    let mut encoder = BzEncoder::new(File::create(&path)?, Compression::default());
    encoder.write_all(dump_xml(pages).as_bytes())?;
    encoder.finish()?;
    Ok(path)
}

pub fn write_lines(path: &Path, lines: &[&str]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    for line in lines {
        writeln!(file, "{}", line)?;
    }
    Ok(())
}
