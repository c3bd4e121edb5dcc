mod common;

use std::fs;
use std::path::Path;
use vocab_pipeline::dump::{BuildOutcome, DumpReader};
use vocab_pipeline::{
    build_dictionary, CollapseConfig, DefinitionCache, DictionaryOptions, PipelineError, Result,
};

const PAGES: &[(&str, i64, &str)] = &[
    (
        "cat",
        0,
        "==English==\n===Etymology===\nFrom Old English.\n===Noun===\n# A small [[feline]].\n#: ''The cat sat.''\n===Verb===\n# {{lb|en|transitive}} To hoist.\n==French==\n===Noun===\n# chat\n",
    ),
    ("Talk:cat", 1, "==English==\n===Noun===\n# Not a definition.\n"),
    ("Cat", 0, "==English==\n===Noun===\n# {{lb|en|slang}} A jazz enthusiast.\n"),
    ("cats", 0, "==English==\n===Noun===\n# {{plural of|en|cat}}\n"),
    ("colour", 0, "==English==\n===Noun===\n# A hue.\n"),
    ("color", 0, "==English==\n===Noun===\n# {{alt sp|en|colour}}\n"),
    ("chat", 0, "==French==\n===Noun===\n# cat\n"),
];

fn build_cache(dir: &Path) -> Result<DefinitionCache> {
    let dump = common::write_bz2_dump(dir, PAGES)?;
    let cache = DefinitionCache::new(dir.join("definitions.jsonl"));
    match cache.build(&dump, &CollapseConfig::default(), false)? {
        BuildOutcome::Built(stats) => {
            assert_eq!(stats.pages, 6);
            assert_eq!(stats.entries, 5);
            assert_eq!(stats.other_namespaces, 1);
        }
        other => panic!("expected a fresh build, got {:?}", other),
    }
    Ok(cache)
}

#[test]
fn bz2_dump_streams_main_namespace_pages() -> Result<()> {
    common::init_tracing();
    let dir = tempfile::tempdir()?;
    let dump = common::write_bz2_dump(dir.path(), PAGES)?;

    let titles: Vec<String> = DumpReader::open(&dump)?
        .map(|page| page.map(|p| p.title))
        .collect::<Result<_>>()?;
    assert_eq!(titles, vec!["cat", "Cat", "cats", "colour", "color", "chat"]);
    Ok(())
}

#[test]
fn dictionary_lines_merge_case_variants() -> Result<()> {
    common::init_tracing();
    let dir = tempfile::tempdir()?;
    let cache = build_cache(dir.path())?;

    let words = ["cat", "cats", "qzxvvv", "cat"];
    let dictionary = build_dictionary(&cache, &words, &DictionaryOptions::default())?;
    assert_eq!(
        dictionary.render(),
        "cat | noun: A small feline.; (slang) A jazz enthusiast. || verb (transitive): (transitive) To hoist.\n\
         cats | noun: Plural of cat\n\
         qzxvvv | (no definition found)\n"
    );
    assert_eq!(dictionary.undefined_words(), vec!["qzxvvv"]);

    let list = dir.path().join("worddefswordsonly.txt");
    dictionary.write_word_list(&list)?;
    assert_eq!(fs::read_to_string(&list)?, "cat\ncats\n");
    Ok(())
}

#[test]
fn folding_moves_inflections_onto_their_lemma() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = build_cache(dir.path())?;

    let options = DictionaryOptions {
        fold_inflections: true,
    };
    let dictionary = build_dictionary(&cache, &["cats", "color", "zzz"], &options)?;
    let lines: Vec<String> = dictionary.lines.iter().map(|l| l.render()).collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("cat | noun: A small feline."));
    assert_eq!(lines[1], "colour | noun: A hue. (alternate spellings: color)");
    assert_eq!(lines[2], "zzz | (no definition found)");
    Ok(())
}

#[test]
fn existing_cache_is_kept_unless_forced() -> Result<()> {
    common::init_tracing();
    let dir = tempfile::tempdir()?;
    let cache = build_cache(dir.path())?;
    let dump = dir.path().join("dump.xml.bz2");
    let before = fs::read_to_string(cache.path())?;

    let outcome = cache.build(&dump, &CollapseConfig::default(), false)?;
    assert_eq!(outcome, BuildOutcome::Skipped { manifest_matches: true });
    assert_eq!(fs::read_to_string(cache.path())?, before);

    let mut french = CollapseConfig::default();
    french.languages.insert("french".to_string());
    let outcome = cache.build(&dump, &french, false)?;
    assert_eq!(outcome, BuildOutcome::Skipped { manifest_matches: false });

    match cache.build(&dump, &french, true)? {
        BuildOutcome::Built(stats) => assert_eq!(stats.entries, 6),
        other => panic!("forced build skipped: {:?}", other),
    }
    let manifest = cache.manifest()?.expect("manifest line");
    assert!(manifest.languages.contains(&"french".to_string()));
    Ok(())
}

#[test]
fn rebuilding_from_the_same_dump_is_deterministic() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let dump = common::write_bz2_dump(dir.path(), PAGES)?;
    let plain = dir.path().join("dump.xml");
    fs::write(&plain, common::dump_xml(PAGES))?;

    let first = DefinitionCache::new(dir.path().join("first.jsonl"));
    let second = DefinitionCache::new(dir.path().join("second.jsonl"));
    first.build(&dump, &CollapseConfig::default(), true)?;
    second.build(&plain, &CollapseConfig::default(), true)?;

    // Manifest lines differ in name and build time; entries must not
    let entries = |cache: &DefinitionCache| -> Result<Vec<String>> {
        Ok(fs::read_to_string(cache.path())?
            .lines()
            .skip(1)
            .map(str::to_string)
            .collect())
    };
    assert_eq!(entries(&first)?, entries(&second)?);
    Ok(())
}

#[test]
fn lookup_without_a_cache_is_a_missing_reference() {
    let dir = tempfile::tempdir().unwrap();
    let cache = DefinitionCache::new(dir.path().join("absent.jsonl"));
    assert!(matches!(
        cache.lookup(["cat"]),
        Err(PipelineError::MissingReference { .. })
    ));
}

#[test]
fn corrupt_cache_line_is_fatal() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = build_cache(dir.path())?;
    let mut contents = fs::read_to_string(cache.path())?;
    contents.push_str("{\"entry\": 42}\n");
    fs::write(cache.path(), contents)?;

    let err = cache.lookup(["cat"]).err();
    assert!(matches!(err, Some(PipelineError::CacheCorrupt { line: 7, .. })));
    Ok(())
}
