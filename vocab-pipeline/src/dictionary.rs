//! Final dictionary assembled from the definition cache.
//!
//! Every requested word gets exactly one line. Words the cache knows nothing
//! about are written as `word | (no definition found)` and left out of the
//! plain word list.

use crate::dump::{normalize_title, DefinitionCache};
use crate::types::{DefinitionRecord, Result};
use crate::utils::fs as fs_utils;
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info};

pub const NO_DEFINITION_MARKER: &str = "(no definition found)";

static LEADING_LABELS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:\([^)]*\)\s*)+").expect("valid regex"));
static LEADING_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\(([^)]*)\)").expect("valid regex"));
static FORM_OF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(plural|present participle|gerund|inflection|infl|past tense|past participle|simple past|simple past and past participle|third-person singular|third person singular) of (.+?)(?:[.;]|$)",
    )
    .expect("valid regex")
});
static ALT_VARIANT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:alternate|alternative) (?:spelling|form) of (.+?)(?:[.;]|$)")
        .expect("valid regex")
});
static LEMMA_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*[(,;:]").expect("valid regex"));

#[derive(Debug, Clone, Default)]
pub struct DictionaryOptions {
    /// Replace regular inflections and alternative spellings by their lemma.
    pub fold_inflections: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionaryLine {
    pub word: String,
    pub record: Option<DefinitionRecord>,
    pub alternate_spellings: Vec<String>,
}

impl DictionaryLine {
    pub fn is_defined(&self) -> bool {
        self.record.as_ref().is_some_and(|r| !r.is_empty())
    }

    pub fn render(&self) -> String {
        let mut line = match self.record.as_ref().filter(|r| !r.is_empty()) {
            Some(record) => render_line(&self.word, record),
            None => format!("{} | {}", self.word, NO_DEFINITION_MARKER),
        };
        if !self.alternate_spellings.is_empty() {
            line.push_str(&format!(
                " (alternate spellings: {})",
                self.alternate_spellings.join(", ")
            ));
        }
        line
    }
}

#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    pub lines: Vec<DictionaryLine>,
}

impl Dictionary {
    pub fn defined_words(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| l.is_defined())
            .map(|l| l.word.as_str())
            .collect()
    }

    pub fn undefined_words(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter(|l| !l.is_defined())
            .map(|l| l.word.as_str())
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.render());
            out.push('\n');
        }
        out
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs_utils::write_atomic(path, &self.render())?;
        info!(
            "Wrote {} dictionary lines ({} undefined) to {}",
            self.lines.len(),
            self.undefined_words().len(),
            path.display()
        );
        Ok(())
    }

    /// Defined words only, one per line.
    pub fn write_word_list(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        for word in self.defined_words() {
            out.push_str(word);
            out.push('\n');
        }
        fs_utils::write_atomic(path, &out)
    }
}

fn sanitize(gloss: &str) -> String {
    gloss.replace('|', "/")
}

/// `(transitive)`-style flags from a gloss's leading label.
pub fn transitivity(gloss: &str) -> Option<String> {
    let label = LEADING_LABEL.captures(gloss)?.get(1)?.as_str().to_lowercase();
    // "intransitive" contains "transitive", so match whole label items
    let flags: Vec<&str> = ["transitive", "intransitive", "ditransitive"]
        .into_iter()
        .filter(|flag| {
            label
                .split(|c: char| c == ',' || c == ';')
                .any(|item| item.trim() == *flag)
        })
        .collect();
    (!flags.is_empty()).then(|| flags.join(", "))
}

/// `word | pos1: gloss1; gloss2 || pos2: gloss1`
///
/// Non-English blocks are prefixed with their language; verb glosses are
/// grouped by transitivity.
pub fn render_line(word: &str, record: &DefinitionRecord) -> String {
    let mut blocks: Vec<(String, Vec<String>)> = Vec::new();
    for sense in &record.senses {
        for gloss in &sense.glosses {
            let mut label = sense.pos.clone();
            if sense.pos == "verb" {
                if let Some(flags) = transitivity(gloss) {
                    label = format!("verb ({})", flags);
                }
            }
            if sense.language != "english" {
                label = format!("{} {}", sense.language, label);
            }
            match blocks.iter_mut().find(|(l, _)| *l == label) {
                Some((_, glosses)) => glosses.push(sanitize(gloss)),
                None => blocks.push((label, vec![sanitize(gloss)])),
            }
        }
    }

    let rendered: Vec<String> = blocks
        .into_iter()
        .map(|(label, glosses)| format!("{}: {}", label, glosses.join("; ")))
        .collect();
    format!("{} | {}", word, rendered.join(" || "))
}

fn extract_lemma(raw: &str) -> Option<String> {
    let lemma = LEMMA_END.split(raw).next().unwrap_or_default();
    let lemma = lemma.trim().trim_matches(|c: char| c == ' ' || c == '.');
    (!lemma.is_empty()).then(|| lemma.to_lowercase())
}

/// Lemma of a regular inflection gloss ("Plural of cat" for "cats").
///
/// Irregular past forms are kept as words of their own; a generic
/// "inflection of" is only trusted when the word's ending agrees.
pub fn inflection_base(word: &str, gloss: &str) -> Option<String> {
    let stripped = LEADING_LABELS.replace(gloss, "");
    let caps = FORM_OF.captures(&stripped)?;
    let mut form = caps.get(1)?.as_str().to_lowercase();
    let lemma = extract_lemma(caps.get(2)?.as_str())?;

    if form == "inflection" || form == "infl" {
        form = if word.ends_with("ing") {
            "present participle".to_string()
        } else if word.ends_with("ed") {
            "past tense".to_string()
        } else if word.ends_with('s') {
            "third-person singular".to_string()
        } else {
            return None;
        };
    }
    if matches!(form.as_str(), "past tense" | "past participle" | "simple past") && !word.ends_with("ed") {
        return None;
    }
    if form.starts_with("third") && !word.ends_with('s') {
        return None;
    }
    Some(lemma)
}

/// Base of an "Alternative spelling of X" gloss.
pub fn alternative_base(gloss: &str) -> Option<String> {
    let stripped = LEADING_LABELS.replace(gloss, "");
    let caps = ALT_VARIANT.captures(&stripped)?;
    extract_lemma(caps.get(1)?.as_str())
}

/// The single lemma every gloss of `record` points at, if there is one.
fn common_base(record: &DefinitionRecord, base_of: impl Fn(&str) -> Option<String>) -> Option<String> {
    let mut bases = BTreeSet::new();
    for gloss in record.glosses() {
        bases.insert(base_of(gloss)?);
    }
    let mut bases = bases.into_iter();
    match (bases.next(), bases.next()) {
        (Some(base), None) => Some(base),
        _ => None,
    }
}

/// Look up `words` in the cache and assemble the dictionary in input order.
pub fn build_dictionary<S: AsRef<str>>(
    cache: &DefinitionCache,
    words: &[S],
    options: &DictionaryOptions,
) -> Result<Dictionary> {
    let keys: Vec<String> = words.iter().map(|w| normalize_title(w.as_ref())).collect();
    let mut entries = cache.lookup(keys.iter().map(String::as_str))?;

    // word -> (lemma, is alternative spelling)
    let mut folds: HashMap<String, (String, bool)> = HashMap::new();
    if options.fold_inflections {
        for key in &keys {
            let Some(record) = entries.get(key) else { continue };
            if let Some(lemma) = common_base(record, |g| inflection_base(key, g)) {
                folds.insert(key.clone(), (lemma, false));
            } else if let Some(lemma) = common_base(record, alternative_base) {
                folds.insert(key.clone(), (lemma, true));
            }
        }
        folds.retain(|word, (lemma, _)| *lemma != *word);

        let missing: Vec<&str> = folds
            .values()
            .map(|(lemma, _)| lemma.as_str())
            .filter(|lemma| !entries.contains_key(*lemma))
            .collect();
        if !missing.is_empty() {
            let lemmas = cache.lookup(missing)?;
            entries.extend(lemmas);
        }
        folds.retain(|_, (lemma, _)| entries.contains_key(lemma.as_str()));
        debug!("Folding {} inflected or variant words into their lemmas", folds.len());
    }

    let mut alternates: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for (word, (lemma, is_alternative)) in &folds {
        if *is_alternative {
            alternates.entry(lemma.as_str()).or_default().insert(word.as_str());
        }
    }

    let mut seen = HashSet::new();
    let mut dictionary = Dictionary::default();
    for key in &keys {
        let output = folds.get(key).map(|(lemma, _)| lemma).unwrap_or(key);
        if !seen.insert(output.clone()) {
            continue;
        }
        dictionary.lines.push(DictionaryLine {
            word: output.clone(),
            record: entries.get(output).cloned(),
            alternate_spellings: alternates
                .get(output.as_str())
                .map(|set| set.iter().map(|s| s.to_string()).collect())
                .unwrap_or_default(),
        });
    }

    info!(
        "Dictionary has {} words, {} without a definition",
        dictionary.lines.len(),
        dictionary.undefined_words().len()
    );
    Ok(dictionary)
}
