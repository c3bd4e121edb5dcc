use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::defs::OcrSourceMap;

/// Load the raw unique-word list written by the extraction step.
///
/// One token per line; blank lines and `#` comments are skipped. Order is
/// preserved, since downstream stages process words in input order.
pub fn load_raw_words(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading raw word list {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Load the OCR word → image map. A missing file means no OCR ran.
pub fn load_ocr_map(path: &Path) -> Result<OcrSourceMap> {
    if !path.is_file() {
        return Ok(OcrSourceMap::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading OCR source map {}", path.display()))?;
    let map: OcrSourceMap = serde_json::from_str(&content)
        .with_context(|| format!("parsing OCR source map {}", path.display()))?;
    Ok(map
        .into_iter()
        .map(|(word, sources)| (word.to_lowercase(), sources))
        .collect())
}
