use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Words found by the extraction step, mapped to the image files OCR read them from.
pub type OcrSourceMap = BTreeMap<String, Vec<String>>;

/// One part-of-speech block of a collapsed definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sense {
    pub language: String,
    pub pos: String,
    pub glosses: Vec<String>,
}

/// Every sense the dump holds for one normalized title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionRecord {
    pub title: String,
    pub senses: Vec<Sense>,
}

impl DefinitionRecord {
    pub fn is_empty(&self) -> bool {
        self.senses.iter().all(|sense| sense.glosses.is_empty())
    }

    pub fn glosses(&self) -> impl Iterator<Item = &str> {
        self.senses
            .iter()
            .flat_map(|sense| sense.glosses.iter().map(String::as_str))
    }
}

/// Identifies the dump a definition cache was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpManifest {
    pub dump_name: String,
    pub dump_size: u64,
    pub dump_modified: Option<DateTime<Utc>>,
    pub languages: Vec<String>,
    pub built_at: DateTime<Utc>,
}

impl DumpManifest {
    /// Same dump file and language filter, ignoring when the cache was built.
    pub fn same_source(&self, other: &DumpManifest) -> bool {
        self.dump_name == other.dump_name
            && self.dump_size == other.dump_size
            && self.dump_modified == other.dump_modified
            && self.languages == other.languages
    }
}

/// What the judgment oracle said about one word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub word: String,
    pub score: f64,
    pub reasoning: String,
}

/// Persisted verdict for a discarded word. Never overwritten once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
    pub score: f64,
    pub reasoning: String,
    pub assessed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl AssessmentRecord {
    pub fn from_judgment(judgment: Judgment, model: Option<String>) -> Self {
        Self {
            score: judgment.score,
            reasoning: judgment.reasoning,
            assessed_at: Utc::now(),
            model,
        }
    }
}
