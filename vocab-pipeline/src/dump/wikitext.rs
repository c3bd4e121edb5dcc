use super::collapse::RawSense;
use super::templates::{expand_templates, strip_templates};
use crate::utils::text::squash_whitespace;
use quick_xml::escape::unescape_with;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(=+)\s*(.+?)\s*(=+)\s*$").expect("valid regex"));
static DEFINITION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#+)\s*(.*)").expect("valid regex"));
static HTML_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
static EXTERNAL_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(https?://[^\s\]]+)\s+([^\]]+)\]").expect("valid regex"));
static EXTERNAL_LINK_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(https?://[^\s\]]+)\]").expect("valid regex"));
static WIKILINK_PIPED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^|\]]+)\|([^\]]+)\]\]").expect("valid regex"));
static WIKILINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]]+)\]\]").expect("valid regex"));
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
static SPACE_BEFORE_PUNCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+([.,;:!?])").expect("valid regex"));

/// Section headings that open a part-of-speech block.
const PARTS_OF_SPEECH: &[&str] = &[
    "noun",
    "proper noun",
    "verb",
    "adjective",
    "adverb",
    "pronoun",
    "determiner",
    "article",
    "preposition",
    "postposition",
    "conjunction",
    "interjection",
    "particle",
    "numeral",
    "symbol",
    "letter",
    "prefix",
    "suffix",
    "infix",
    "circumfix",
    "abbreviation",
    "acronym",
    "initialism",
    "contraction",
    "phrase",
    "prepositional phrase",
    "proverb",
    "idiom",
];

pub const UNKNOWN_POS: &str = "unknown";

/// `(level, heading)` for a `== Heading ==` line with balanced markers.
pub fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let caps = HEADING.captures(line)?;
    let open = caps.get(1)?.as_str().len();
    let close = caps.get(3)?.as_str().len();
    if open != close {
        return None;
    }
    Some((open, caps.get(2)?.as_str().trim()))
}

pub fn normalize_heading(heading: &str) -> String {
    squash_whitespace(heading).to_lowercase()
}

pub fn part_of_speech(heading: &str) -> Option<&'static str> {
    let key = normalize_heading(heading);
    PARTS_OF_SPEECH.iter().copied().find(|pos| *pos == key)
}

fn resolve_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" | "thinsp" | "ensp" | "emsp" => " ",
        "ndash" => "–",
        "mdash" => "—",
        "minus" => "−",
        "hellip" => "…",
        "times" => "×",
        "deg" => "°",
        "lsquo" | "rsquo" => "'",
        "ldquo" | "rdquo" => "\"",
        "middot" => "·",
        "zwj" | "zwnj" | "shy" => "",
        _ => return None,
    })
}

fn unescape_html(text: &str) -> String {
    match unescape_with(text, resolve_entity) {
        Ok(unescaped) => unescaped.into_owned(),
        // Unknown entity: keep the text rather than lose the gloss
        Err(_) => text.to_string(),
    }
}

/// Turn one definition line's wikitext into plain text.
pub fn clean_wikitext(text: &str) -> String {
    let text = HTML_COMMENT.replace_all(text, "");
    let text = strip_templates(&expand_templates(&text));
    let text = EXTERNAL_LINK.replace_all(&text, "${2}");
    let text = EXTERNAL_LINK_BARE.replace_all(&text, "${1}");
    let text = WIKILINK_PIPED.replace_all(&text, "${2}");
    let text = WIKILINK.replace_all(&text, "${1}");
    let text = text.replace("'''", "").replace("''", "");
    let text = TAG.replace_all(&text, "");
    let text = unescape_html(&text);
    let text = squash_whitespace(&text);
    SPACE_BEFORE_PUNCT.replace_all(&text, "${1}").into_owned()
}

/// Every gloss of a page in the wanted languages, in page order, deduplicated.
///
/// A gloss is a `#` line inside a level-2 language section; example (`#:`)
/// and quotation (`#*`) lines are skipped. Glosses before any recognised
/// part-of-speech heading are filed under [`UNKNOWN_POS`].
pub fn extract_senses(text: &str, languages: &BTreeSet<String>) -> Vec<RawSense> {
    let mut senses: Vec<RawSense> = Vec::new();
    let mut language: Option<String> = None;
    let mut pos: Option<&'static str> = None;

    for line in text.lines() {
        if let Some((level, heading)) = parse_heading(line) {
            if level == 2 {
                language = Some(normalize_heading(heading));
                pos = None;
            } else if level >= 3 && language.as_ref().is_some_and(|l| languages.contains(l)) {
                if let Some(found) = part_of_speech(heading) {
                    pos = Some(found);
                }
            }
            continue;
        }

        let Some(current_language) = language.as_ref().filter(|l| languages.contains(*l)) else {
            continue;
        };
        let Some(caps) = DEFINITION_LINE.captures(line) else {
            continue;
        };
        let content = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
        if content.is_empty() || content.starts_with('*') || content.starts_with(':') {
            continue;
        }

        let gloss = clean_wikitext(content);
        if !gloss.chars().any(|c| c.is_ascii_alphanumeric()) {
            continue;
        }

        let sense = RawSense {
            language: current_language.clone(),
            pos: pos.unwrap_or(UNKNOWN_POS).to_string(),
            gloss,
        };
        if !senses.contains(&sense) {
            senses.push(sense);
        }
    }

    senses
}

#[cfg(test)]
mod tests {
    use super::*;

    fn english() -> BTreeSet<String> {
        ["english", "translingual"].into_iter().map(str::to_string).collect()
    }

    #[test]
    fn headings_need_balanced_markers() {
        assert_eq!(parse_heading("==English=="), Some((2, "English")));
        assert_eq!(parse_heading("=== Proper  noun ===  "), Some((3, "Proper  noun")));
        assert_eq!(parse_heading("==Broken==="), None);
        assert_eq!(parse_heading("# not a heading"), None);
        assert_eq!(part_of_speech("Proper  noun"), Some("proper noun"));
        assert_eq!(part_of_speech("Etymology 1"), None);
    }

    #[test]
    fn cleaning_removes_markup() {
        assert_eq!(
            clean_wikitext("{{lb|en|informal}} A [[domestic]] [[feline|cat]]<!-- note -->, ''especially'' a '''pet''' ."),
            "(informal) A domestic cat, especially a pet."
        );
        assert_eq!(
            clean_wikitext("See [https://example.org the site] &amp; [https://example.org]"),
            "See the site & https://example.org"
        );
        assert_eq!(clean_wikitext("one&nbsp;two <sup>3</sup>"), "one two 3");
    }

    #[test]
    fn glosses_built_on_code_and_unit_templates_survive() {
        let text = "\
==English==
===Noun===
# {{SI-unit|kilo|metre|length}}
===Symbol===
# {{ISO 4217|USD}}
===Proper noun===
# {{name translit|en|ru|Иван|type=male given name}}
";
        let glosses: Vec<String> = extract_senses(text, &english())
            .into_iter()
            .map(|s| s.gloss)
            .collect();
        assert_eq!(
            glosses,
            vec![
                "SI unit kilometre (length).",
                "ISO 4217 currency code USD.",
                "Transliteration of Иван (male given name)",
            ]
        );
    }

    #[test]
    fn extracts_only_wanted_languages() {
        let text = "\
==English==
===Etymology 1===
====Noun====
# A small [[feline]].
#: ''The cat sat.''
#* 1900, quote
# A small [[feline]].
===Verb===
# {{lb|en|transitive}} To hoist.
==French==
===Noun===
# chat
==Translingual==
===Symbol===
# {{taxon|genus|family|Felidae}}
";
        let senses = extract_senses(text, &english());
        let rendered: Vec<(&str, &str, &str)> = senses
            .iter()
            .map(|s| (s.language.as_str(), s.pos.as_str(), s.gloss.as_str()))
            .collect();
        assert_eq!(
            rendered,
            vec![
                ("english", "noun", "A small feline."),
                ("english", "verb", "(transitive) To hoist."),
                ("translingual", "symbol", "A taxonomic genus within the family Felidae."),
            ]
        );
    }
}
