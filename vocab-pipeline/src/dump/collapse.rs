use super::wikitext::extract_senses;
use crate::types::{DefinitionRecord, Sense};
use std::collections::BTreeSet;

/// One gloss line as found on a page, before grouping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSense {
    pub language: String,
    pub pos: String,
    pub gloss: String,
}

/// Cache key for a page title.
pub fn normalize_title(title: &str) -> String {
    title.trim().replace('_', " ").to_lowercase()
}

fn push_gloss(senses: &mut Vec<Sense>, language: &str, pos: &str, gloss: String) {
    match senses
        .iter_mut()
        .find(|s| s.language == language && s.pos == pos)
    {
        Some(sense) => {
            if !sense.glosses.contains(&gloss) {
                sense.glosses.push(gloss);
            }
        }
        None => senses.push(Sense {
            language: language.to_string(),
            pos: pos.to_string(),
            glosses: vec![gloss],
        }),
    }
}

/// Group glosses by (language, part of speech) in order of first appearance,
/// dropping repeats of the same gloss within a group.
pub fn collapse_senses<I>(raw: I) -> Vec<Sense>
where
    I: IntoIterator<Item = RawSense>,
{
    let mut senses = Vec::new();
    for sense in raw {
        push_gloss(&mut senses, &sense.language, &sense.pos, sense.gloss);
    }
    senses
}

/// Fold `other` into `into`, keeping `into`'s order and appending what is new.
pub fn merge_records(into: &mut DefinitionRecord, other: DefinitionRecord) {
    for sense in other.senses {
        for gloss in sense.glosses {
            push_gloss(&mut into.senses, &sense.language, &sense.pos, gloss);
        }
    }
}

/// Collapse one page into a record, or `None` when it has nothing in the wanted languages.
pub fn collapse_page(title: &str, text: &str, languages: &BTreeSet<String>) -> Option<DefinitionRecord> {
    let senses = collapse_senses(extract_senses(text, languages));
    if senses.is_empty() {
        return None;
    }
    Some(DefinitionRecord {
        title: normalize_title(title),
        senses,
    })
}
