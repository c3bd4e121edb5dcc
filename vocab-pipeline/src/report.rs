//! Fixed-width text tables for kept and discarded words.

use crate::aggregator::WordRecord;
use crate::types::{OcrSourceMap, Result, SignalKind};
use crate::utils::{fs as fs_utils, text};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::info;

const NOT_COMPUTED: &str = "-";

fn flag(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "YES",
        Some(false) => "NO",
        None => NOT_COMPUTED,
    }
}

fn passed_column(record: &WordRecord) -> String {
    let passed = record.signals.passed();
    if passed.is_empty() {
        NOT_COMPUTED.to_string()
    } else {
        passed.iter().map(SignalKind::name).collect::<Vec<_>>().join(",")
    }
}

/// Render the signal table. Every signal is always shown; `-` marks one that
/// was not computed (source not loaded, pageviews not fetched).
pub fn render_signal_table(records: &[WordRecord], ocr: Option<&OcrSourceMap>) -> String {
    let width = records
        .iter()
        .map(|r| r.word.chars().count())
        .chain(std::iter::once(4))
        .max()
        .unwrap_or(4);

    let mut out = String::new();
    let _ = write!(
        out,
        "{:<width$}  {:>4}  {:>7}  {:>15}  {:>10}  {:>10}",
        "WORD", "WIKI", "WORDNET", "G_MASTER", "PAGEVIEWS", "ZIPF"
    );
    if ocr.is_some() {
        let _ = write!(out, "  {:>4}", "OCR");
    }
    let _ = writeln!(out, "  PASSED");

    let _ = write!(
        out,
        "{}  {}  {}  {}  {}  {}",
        "-".repeat(width),
        "-".repeat(4),
        "-".repeat(7),
        "-".repeat(15),
        "-".repeat(10),
        "-".repeat(10)
    );
    if ocr.is_some() {
        let _ = write!(out, "  {}", "-".repeat(4));
    }
    let _ = writeln!(out, "  {}", "-".repeat(6));

    for record in records {
        let s = &record.signals;
        let ngram = s.ngram.map(|n| format!("{:.0}", n)).unwrap_or_else(|| NOT_COMPUTED.to_string());
        let views = s.pageviews.map(|p| p.to_string()).unwrap_or_else(|| NOT_COMPUTED.to_string());
        let zipf = s.zipf.map(|z| format!("{:.6}", z)).unwrap_or_else(|| NOT_COMPUTED.to_string());

        let _ = write!(
            out,
            "{:<width$}  {:>4}  {:>7}  {:>15}  {:>10}  {:>10}",
            record.word,
            flag(s.wiktionary),
            flag(s.wordnet),
            ngram,
            views,
            zipf
        );
        if let Some(map) = ocr {
            let count = map.get(&record.word).map(Vec::len).unwrap_or(0);
            let _ = write!(out, "  {:>4}", count);
        }
        let _ = writeln!(out, "  {}", passed_column(record));
    }

    out
}

pub fn write_signal_table(path: &Path, records: &[WordRecord], ocr: Option<&OcrSourceMap>) -> Result<()> {
    fs_utils::write_atomic(path, &render_signal_table(records, ocr))?;
    info!("Wrote {} rows to {}", records.len(), path.display());
    Ok(())
}

/// One word per line.
pub fn write_word_list<S: AsRef<str>>(path: &Path, words: &[S]) -> Result<()> {
    let mut contents = String::new();
    for word in words {
        contents.push_str(word.as_ref());
        contents.push('\n');
    }
    fs_utils::write_atomic(path, &contents)?;
    info!("Wrote {} words to {}", words.len(), path.display());
    Ok(())
}

/// First column of a table written here, or the lines of a plain word list.
pub fn read_table_words(path: &Path) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .filter(|line| !line.trim().is_empty() && !text::is_table_chrome(line))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect())
}
