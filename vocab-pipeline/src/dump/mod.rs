//! Single-pass collapse of a Wiktionary XML dump into a definition cache.
//!
//! `reader` streams pages, `wikitext` and `templates` turn one page's markup
//! into glosses, `collapse` groups them per title, and `cache` persists the
//! result so later dictionary builds never touch the dump again.

pub mod cache;
pub mod collapse;
pub mod reader;
pub mod templates;
pub mod wikitext;

pub use cache::{BuildOutcome, BuildStats, DefinitionCache};
pub use collapse::{collapse_page, collapse_senses, merge_records, normalize_title, RawSense};
pub use reader::{DumpPage, DumpReader};
