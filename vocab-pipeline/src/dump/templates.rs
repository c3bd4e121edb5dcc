//! Rendering of the `{{...}}` templates that show up inside definition lines.
//!
//! Known templates are turned into readable text; anything unrecognised
//! renders as nothing. Templates nest, so expansion is recursive.

use crate::utils::text::{capitalize_first, squash_whitespace};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

const LABEL_TEMPLATES: &[&str] = &["lb", "lbl", "label", "labels", "tag", "tags"];
const LINK_TEMPLATES: &[&str] = &["l", "link", "m", "mention", "w", "wp", "wikipedia"];
const QUALIFIER_TEMPLATES: &[&str] = &["q", "qual", "qualifier", "i", "qf"];
const NON_GLOSS_TEMPLATES: &[&str] = &["non-gloss", "ng", "ngd", "n-g", "non-gloss definition"];
const USAGE_TEMPLATES: &[&str] = &["ux", "uxi", "uxa"];
const EMPTY_TEMPLATES: &[&str] = &["senseid", "sid", "anchor", "attn", "rfdef", "rfex"];
const RELATION_TEMPLATES: &[(&str, &str, &str)] = &[
    ("syn", "Synonym", "Synonyms"),
    ("ant", "Antonym", "Antonyms"),
    ("hol", "Holonym", "Holonyms"),
    ("mer", "Meronym", "Meronyms"),
];
const PLACE_PREFIXES: &[&str] = &["c", "r", "s", "co", "par", "dist", "cc"];
const PLACE_NAMED_FIELDS: &[(&str, &str)] = &[
    ("capital", "capital"),
    ("caplc", "capital"),
    ("official", "official name"),
    ("full", "full name"),
    ("short", "short name"),
    ("abbr", "abbreviation"),
    ("seat", "seat"),
];
const WIKI_PREFIXES: &[&str] = &["w", "wikipedia", "wiktionary", "s", "quote", "commons"];
const LANGUAGE_CODES: &[&str] = &["en", "eng", "english"];

/// Definition templates: name to the phrase placed before the target term.
const DEFINITION_TEMPLATES: &[(&str, &str)] = &[
    ("abbreviation of", "Abbreviation of"),
    ("abbr of", "Abbreviation of"),
    ("acronym of", "Acronym of"),
    ("initialism of", "Initialism of"),
    ("init of", "Initialism of"),
    ("alternative form of", "Alternative form of"),
    ("alt form", "Alternative form of"),
    ("alt form of", "Alternative form of"),
    ("altform", "Alternative form of"),
    ("alternative spelling of", "Alternative spelling of"),
    ("alt spelling of", "Alternative spelling of"),
    ("alt sp", "Alternative spelling of"),
    ("alt sp of", "Alternative spelling of"),
    ("altsp", "Alternative spelling of"),
    ("alternative case form of", "Alternative case form of"),
    ("alt case", "Alternative case form of"),
    ("alternative capitalization of", "Alternative capitalization of"),
    ("contraction of", "Contraction of"),
    ("clipping of", "Clipping of"),
    ("ellipsis of", "Ellipsis of"),
    ("short for", "Short for"),
    ("comparative of", "Comparative of"),
    ("superlative of", "Superlative of"),
    ("misspelling of", "Misspelling of"),
    ("obs form", "Obsolete form of"),
    ("obs sp", "Obsolete spelling of"),
    ("obs sp of", "Obsolete spelling of"),
    ("standard sp", "Standard spelling of"),
    ("stand sp", "Standard spelling of"),
    ("pron sp", "Pronunciation spelling of"),
    ("only used in", "Only used in"),
    ("cap", "Capitalized form of"),
    ("plural of", "Plural of"),
    ("plural form of", "Plural of"),
    ("past tense of", "Past tense of"),
    ("past participle of", "Past participle of"),
    ("present participle of", "Present participle of"),
    ("simple past of", "Simple past of"),
    ("simple past and past participle of", "Simple past and past participle of"),
    ("third-person singular of", "Third-person singular of"),
    ("third person singular of", "Third-person singular of"),
    ("inflection of", "Inflection of"),
    ("infl of", "Inflection of"),
    ("form of", "Form of"),
];

static WIKILINK_PIPED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^|\]]+)\|([^\]]+)\]\]").expect("valid regex"));
static WIKILINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]]+)\]\]").expect("valid regex"));
static INLINE_MODIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

/// A parsed template call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    pub name: String,
    pub positional: Vec<String>,
    pub named: HashMap<String, String>,
}

impl Template {
    fn named(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .find_map(|key| self.named.get(*key))
            .map(String::as_str)
    }
}

/// Byte offset just past the `}}` closing the template opened at `start`.
fn template_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut i = start;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"{{") {
            depth += 1;
            i += 2;
        } else if depth > 0 && bytes[i..].starts_with(b"}}") {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return Some(i);
            }
        } else {
            i += 1;
        }
    }
    None
}

/// Split template content on `|` outside nested templates and links.
fn split_parts(content: &str) -> Vec<&str> {
    let bytes = content.as_bytes();
    let mut parts = Vec::new();
    let (mut depth, mut link_depth) = (0usize, 0usize);
    let mut segment_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let rest = &bytes[i..];
        if rest.starts_with(b"{{") {
            depth += 1;
            i += 2;
        } else if depth > 0 && rest.starts_with(b"}}") {
            depth -= 1;
            i += 2;
        } else if rest.starts_with(b"[[") {
            link_depth += 1;
            i += 2;
        } else if link_depth > 0 && rest.starts_with(b"]]") {
            link_depth -= 1;
            i += 2;
        } else {
            if bytes[i] == b'|' && depth == 0 && link_depth == 0 {
                parts.push(content[segment_start..i].trim());
                segment_start = i + 1;
            }
            i += 1;
        }
    }
    parts.push(content[segment_start..].trim());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

fn strip_wiki_prefix(value: &str) -> String {
    match value.split_once(':') {
        Some((prefix, rest)) if WIKI_PREFIXES.contains(&prefix.to_lowercase().as_str()) => {
            rest.to_string()
        }
        _ => value.to_string(),
    }
}

pub fn parse_template(content: &str) -> Option<Template> {
    let parts = split_parts(content);
    let (name, params) = parts.split_first()?;
    let mut template = Template {
        name: name.trim().to_lowercase(),
        ..Default::default()
    };

    for param in params {
        match param.split_once('=') {
            Some((key, value)) => {
                let value = expand_templates(value);
                let value = value.trim();
                if !value.is_empty() {
                    template
                        .named
                        .insert(key.trim().to_lowercase(), strip_wiki_prefix(value));
                }
            }
            None => {
                let value = expand_templates(param);
                let value = value.trim();
                if !value.is_empty() && !LANGUAGE_CODES.contains(&value.to_lowercase().as_str()) {
                    template.positional.push(strip_wiki_prefix(value));
                }
            }
        }
    }

    Some(template)
}

/// Replace every template in `text` with its rendering.
///
/// An unclosed `{{` is left in place for [`strip_templates`] to drop.
pub fn expand_templates(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut idx = 0;
    while let Some(offset) = text[idx..].find("{{") {
        let start = idx + offset;
        out.push_str(&text[idx..start]);
        match template_end(text, start) {
            Some(end) => {
                out.push_str(&render_template(&text[start + 2..end - 2]));
                idx = end;
            }
            None => {
                out.push_str(&text[start..]);
                return out;
            }
        }
    }
    out.push_str(&text[idx..]);
    out
}

/// Drop anything still inside `{{ }}`, including an unclosed tail.
pub fn strip_templates(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    let mut copy_from = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i..].starts_with(b"{{") {
            if depth == 0 {
                out.push_str(&text[copy_from..i]);
            }
            depth += 1;
            i += 2;
        } else if depth > 0 && bytes[i..].starts_with(b"}}") {
            depth -= 1;
            i += 2;
            if depth == 0 {
                copy_from = i;
            }
        } else {
            i += 1;
        }
    }
    if depth == 0 {
        out.push_str(&text[copy_from..]);
    }
    out
}

/// Render one template body (the text between `{{` and `}}`).
pub fn render_template(content: &str) -> String {
    let Some(t) = parse_template(content) else {
        return String::new();
    };
    let name = t.name.as_str();
    let params = &t.positional;

    if name == "u" {
        return render_usage_label(params);
    }
    if LABEL_TEMPLATES.contains(&name) {
        return render_label(params);
    }
    if LINK_TEMPLATES.contains(&name) || NON_GLOSS_TEMPLATES.contains(&name) {
        return params.first().cloned().unwrap_or_default();
    }
    if name == "lang" {
        if !params.is_empty() {
            return params.join(" ");
        }
        return t.named(&["text", "passage"]).unwrap_or_default().to_string();
    }
    if EMPTY_TEMPLATES.contains(&name) {
        return String::new();
    }
    if QUALIFIER_TEMPLATES.contains(&name) {
        return if params.is_empty() {
            String::new()
        } else {
            format!("({})", params.join(", "))
        };
    }
    match name {
        "surname" => return render_name("Surname", &t),
        "given name" => return render_name("Given name", &t),
        "place" => return render_place(&t),
        "taxon" => return render_taxon(params),
        "taxlink" | "taxfmt" => return render_taxlink(params),
        "iso 639" => return render_iso_639(params),
        "iso 3166" => return render_iso_3166(params),
        "iso 4217" => return render_iso_4217(params),
        "si-unit" => return render_si_unit("SI unit", params),
        "si-unit-abb" => return render_si_unit("SI unit symbol for", params),
        "alti" => return render_alternative_forms(params),
        "name translit" => return render_name_translit(&t),
        _ => {}
    }
    if let Some((_, singular, plural)) = RELATION_TEMPLATES.iter().find(|(n, _, _)| *n == name) {
        return render_relation(singular, plural, params);
    }
    if USAGE_TEMPLATES.contains(&name) {
        return params
            .first()
            .map(String::as_str)
            .or_else(|| t.named(&["text", "passage", "quote"]))
            .unwrap_or_default()
            .to_string();
    }
    if name.starts_with("quote-") {
        return render_quote(&t);
    }
    if let Some((_, phrase)) = DEFINITION_TEMPLATES.iter().find(|(n, _)| *n == name) {
        return render_definition(phrase, params);
    }
    if name.ends_with(" of") {
        if let Some(term) = params.first() {
            return format!("{} {}", capitalize_first(name), term);
        }
    }
    String::new()
}

fn render_definition(phrase: &str, params: &[String]) -> String {
    let Some((term, extras)) = params.split_first() else {
        return String::new();
    };
    let mut text = format!("{} {}", phrase, term);
    if !extras.is_empty() {
        text.push_str(&format!(" ({})", extras.join("; ")));
    }
    text
}

/// `{{lb|en|informal|_|chiefly|UK}}` renders `(informal; chiefly, UK)`.
fn render_label(params: &[String]) -> String {
    let mut groups = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for param in params {
        if param == "_" {
            if !current.is_empty() {
                groups.push(current.join(", "));
                current.clear();
            }
            continue;
        }
        current.push(param);
    }
    if !current.is_empty() {
        groups.push(current.join(", "));
    }
    if groups.is_empty() {
        return String::new();
    }
    format!("({})", groups.join("; "))
}

fn render_usage_label(params: &[String]) -> String {
    let label = render_label(params);
    let label = label.trim_start_matches('(').trim_end_matches(')');
    if label.is_empty() {
        String::new()
    } else {
        format!("Used {}.", label)
    }
}

fn render_name(label: &str, t: &Template) -> String {
    let mut details: Vec<String> = t.positional.clone();
    if let Some(origin) = t.named(&["from", "origin"]) {
        details.push(format!("from {}", origin));
    }
    if let Some(meaning) = t.named(&["meaning"]) {
        details.push(format!("meaning {}", meaning));
    }
    if details.is_empty() {
        label.to_string()
    } else {
        format!("{} ({})", label, details.join(", "))
    }
}

fn place_param(param: &str) -> String {
    let param = param.replace("<<", "").replace(">>", "");
    let param = param.trim().trim_start_matches('@').trim();
    if let Some((prefix, value)) = param.split_once('/') {
        if PLACE_PREFIXES.contains(&prefix.to_lowercase().as_str()) && !value.trim().is_empty() {
            return format!("in {}", value.trim().replace('_', " "));
        }
    }
    let words: Vec<String> = param
        .split_whitespace()
        .map(|word| match word.split_once('/') {
            Some((prefix, value)) if PLACE_PREFIXES.contains(&prefix.to_lowercase().as_str()) => {
                value.to_string()
            }
            _ => word.to_string(),
        })
        .collect();
    squash_whitespace(&words.join(" ").replace(['/', '_'], " "))
}

/// `{{place|en|city|s/Ohio|;|county seat}}` renders `city in Ohio; county seat`.
fn render_place(t: &Template) -> String {
    let mut text = String::new();
    for param in &t.positional {
        if param.trim() == ";" {
            let trimmed = text.trim_end().len();
            text.truncate(trimmed);
            text.push(';');
            continue;
        }
        let part = place_param(param);
        if part.is_empty() {
            continue;
        }
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(&part);
    }

    let details: Vec<String> = PLACE_NAMED_FIELDS
        .iter()
        .filter_map(|(key, label)| {
            let value = t.named.get(*key)?;
            let cleaned = value.replace('_', " ").replace("<<", "").replace(">>", "");
            let cleaned = cleaned.trim();
            (!cleaned.is_empty()).then(|| format!("{}: {}", label, cleaned))
        })
        .collect();
    if !details.is_empty() {
        if !text.is_empty() {
            text.push_str("; ");
        }
        text.push_str(&details.join("; "));
    }
    squash_whitespace(&text)
}

fn render_taxon(params: &[String]) -> String {
    let Some(rank) = params.first() else {
        return "A taxonomic entity.".to_string();
    };
    let mut text = format!("A taxonomic {}", rank);
    if let (Some(parent_rank), Some(parent_name)) = (params.get(1), params.get(2)) {
        text.push_str(&format!(" within the {} {}", parent_rank, parent_name));
    }
    if let Some(description) = params.get(3) {
        let description = description.trim_start_matches(['–', '-', ' ']).trim();
        if !description.is_empty() {
            text.push_str(&format!(" – {}", description));
        }
    }
    text.push('.');
    text
}

fn render_taxlink(params: &[String]) -> String {
    let Some(name) = params.first() else {
        return "Taxon.".to_string();
    };
    match params.get(1).map(|r| clean_term(r)).filter(|r| !r.is_empty()) {
        Some(rank) => format!("Taxon {} ({}).", clean_term(name), rank),
        None => format!("Taxon {}.", clean_term(name)),
    }
}

/// Term from a relation or taxon template, without link markup or a language prefix.
fn clean_term(term: &str) -> String {
    let term = INLINE_MODIFIER.replace_all(term, "");
    let term = match term.split_once(':') {
        Some((prefix, rest)) if prefix.len() <= 4 => rest.to_string(),
        _ => term.to_string(),
    };
    let term = WIKILINK_PIPED.replace_all(&term, "${2}");
    let term = WIKILINK.replace_all(&term, "${1}");
    let term = term.split('#').next().unwrap_or_default().replace('_', " ");
    let term = match term.split_once(':') {
        Some((prefix, rest)) if prefix.eq_ignore_ascii_case("thesaurus") => rest.to_string(),
        _ => term,
    };
    term.trim().to_string()
}

fn render_relation(singular: &str, plural: &str, params: &[String]) -> String {
    let terms: Vec<String> = params
        .iter()
        .filter(|p| !matches!(p.as_str(), ";" | "<" | ">" | "|" | ","))
        .map(|p| clean_term(p))
        .filter(|p| !p.is_empty())
        .collect();
    match terms.len() {
        0 => String::new(),
        1 => format!("{}: {}", singular, terms[0]),
        _ => format!("{}: {}", plural, terms.join(", ")),
    }
}

fn render_iso_639(params: &[String]) -> String {
    match params.first() {
        Some(part) => format!("ISO 639-{} language code.", clean_term(part)),
        None => "ISO 639 language code.".to_string(),
    }
}

/// `{{ISO 3166|1|2|France}}` renders `ISO 3166-1 alpha-2 code for France.`
fn render_iso_3166(params: &[String]) -> String {
    let terms: Vec<String> = params.iter().take(3).map(|p| clean_term(p)).collect();
    match terms.as_slice() {
        [part, alpha, country] => format!("ISO 3166-{} alpha-{} code for {}.", part, alpha, country),
        [part, alpha] => format!("ISO 3166-{} alpha-{} code.", part, alpha),
        _ => "ISO 3166 country code.".to_string(),
    }
}

fn render_iso_4217(params: &[String]) -> String {
    match params.first() {
        Some(code) => format!("ISO 4217 currency code {}.", clean_term(code)),
        None => "ISO 4217 currency code.".to_string(),
    }
}

/// `{{SI-unit|kilo|metre|length}}` renders `SI unit kilometre (length).`
///
/// A single parameter is the unit itself, with no prefix.
fn render_si_unit(label: &str, params: &[String]) -> String {
    let unit = match params {
        [] => String::new(),
        [unit] => clean_term(unit),
        [prefix, base, ..] => format!("{}{}", clean_term(prefix), clean_term(base)),
    };
    let mut text = if unit.is_empty() {
        label.trim_end_matches(" for").to_string()
    } else {
        format!("{} {}", label, unit)
    };
    if let Some(quantity) = params.get(2).map(|q| clean_term(q)).filter(|q| !q.is_empty()) {
        text.push_str(&format!(" ({})", quantity));
    }
    text.push('.');
    text
}

fn render_alternative_forms(params: &[String]) -> String {
    let forms: Vec<String> = params
        .iter()
        .filter(|p| !matches!(p.as_str(), ";" | "<" | ">" | "|" | ","))
        .map(|p| clean_term(p).replace(' ', ""))
        .filter(|p| !p.is_empty())
        .collect();
    if forms.is_empty() {
        "Alternative forms.".to_string()
    } else {
        format!("Alternative forms: {}", forms.join(", "))
    }
}

/// The transliterated name is the last positional parameter; the source
/// language codes before it are ignored.
fn render_name_translit(t: &Template) -> String {
    let name = t.positional.last().map(|n| clean_term(n)).unwrap_or_default();
    let mut text = if name.is_empty() {
        "Transliteration".to_string()
    } else {
        format!("Transliteration of {}", name)
    };
    let details: Vec<String> = ["type", "addl"]
        .iter()
        .filter_map(|key| t.named.get(*key))
        .map(|value| clean_term(value))
        .filter(|value| !value.is_empty())
        .collect();
    if !details.is_empty() {
        text.push_str(&format!(" ({})", details.join("; ")));
    }
    text
}

fn render_quote(t: &Template) -> String {
    if let Some(text) = t.named(&["text", "passage", "quote"]) {
        return text.to_string();
    }
    match (t.named(&["title"]), t.named(&["author"])) {
        (Some(title), Some(author)) => format!("Quotation from {} by {}.", title, author),
        (Some(title), None) => format!("Quotation from {}.", title),
        _ => "Quotation.".to_string(),
    }
}
