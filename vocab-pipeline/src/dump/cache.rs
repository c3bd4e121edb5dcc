use super::collapse::{collapse_page, merge_records, normalize_title};
use super::reader::DumpReader;
use crate::types::{CollapseConfig, DefinitionRecord, DumpManifest, PipelineError, Result};
use crate::utils::fs as fs_utils;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// One line of the cache file: the manifest first, then one entry per page.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum CacheLine {
    Manifest(DumpManifest),
    Entry(DefinitionRecord),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub pages: u64,
    pub entries: u64,
    pub other_namespaces: u64,
    pub malformed: u64,
    pub elapsed_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Built(BuildStats),
    /// A cache already existed and no rebuild was forced.
    Skipped { manifest_matches: bool },
}

/// Describe `dump` as it is on disk now.
pub fn manifest_for(dump: &Path, config: &CollapseConfig) -> Result<DumpManifest> {
    let metadata = fs::metadata(dump)?;
    Ok(DumpManifest {
        dump_name: dump
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dump.display().to_string()),
        dump_size: metadata.len(),
        dump_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        languages: config.languages.iter().cloned().collect(),
        built_at: Utc::now(),
    })
}

/// Title-keyed definitions collapsed from one dump.
pub struct DefinitionCache {
    path: PathBuf,
}

impl DefinitionCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn open_lines(&self) -> Result<std::io::Lines<BufReader<File>>> {
        if !self.exists() {
            return Err(PipelineError::MissingReference {
                path: self.path.clone(),
            });
        }
        Ok(BufReader::new(File::open(&self.path)?).lines())
    }

    fn parse_line(&self, line: &str, number: usize) -> Result<CacheLine> {
        serde_json::from_str(line).map_err(|e| PipelineError::CacheCorrupt {
            path: self.path.clone(),
            line: number,
            reason: e.to_string(),
        })
    }

    /// The manifest the cache was built with.
    pub fn manifest(&self) -> Result<Option<DumpManifest>> {
        let mut lines = self.open_lines()?;
        match lines.next() {
            Some(line) => match self.parse_line(&line?, 1)? {
                CacheLine::Manifest(manifest) => Ok(Some(manifest)),
                CacheLine::Entry(_) => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// Stream the dump once and replace the cache with what it holds.
    ///
    /// An existing cache is kept unless `force` is set; rebuilding is a full
    /// pass over the dump. The new cache is written beside the old one and
    /// moved into place only when complete, so an interrupted build leaves
    /// the previous cache untouched.
    pub fn build(&self, dump: &Path, config: &CollapseConfig, force: bool) -> Result<BuildOutcome> {
        if !dump.is_file() {
            return Err(PipelineError::MissingReference {
                path: dump.to_path_buf(),
            });
        }
        let manifest = manifest_for(dump, config)?;

        if self.exists() && !force {
            let manifest_matches = self
                .manifest()?
                .is_some_and(|existing| existing.same_source(&manifest));
            if manifest_matches {
                info!("Definition cache {} is current, skipping build", self.path.display());
            } else {
                warn!(
                    "Definition cache {} was built from a different dump or language set; \
                     rebuild with --force to refresh it",
                    self.path.display()
                );
            }
            return Ok(BuildOutcome::Skipped { manifest_matches });
        }

        info!(
            "Building definition cache from {} ({} bytes, languages: {})",
            dump.display(),
            manifest.dump_size,
            manifest.languages.join(", ")
        );
        let start = Instant::now();
        let temp = fs_utils::temp_beside(&self.path)?;
        let mut stats = BuildStats::default();
        let mut reader = DumpReader::open(dump)?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            serde_json::to_writer(&mut writer, &CacheLine::Manifest(manifest))?;
            writer.write_all(b"\n")?;

            while let Some(page) = reader.next_page()? {
                stats.pages += 1;
                if let Some(record) = collapse_page(&page.title, &page.text, &config.languages) {
                    serde_json::to_writer(&mut writer, &CacheLine::Entry(record))?;
                    writer.write_all(b"\n")?;
                    stats.entries += 1;
                }
                if config.progress_every > 0 && stats.pages % config.progress_every == 0 {
                    info!(
                        "Scanned {} pages, {} with definitions ({:.0}s)",
                        stats.pages,
                        stats.entries,
                        start.elapsed().as_secs_f64()
                    );
                }
            }
            writer.flush()?;
        }
        fs_utils::persist(temp, &self.path)?;

        stats.other_namespaces = reader.stats().other_namespaces;
        stats.malformed = reader.stats().malformed;
        stats.elapsed_secs = start.elapsed().as_secs();
        info!(
            "Definition cache {} built: {} pages, {} entries, {} malformed records in {}s",
            self.path.display(),
            stats.pages,
            stats.entries,
            stats.malformed,
            stats.elapsed_secs
        );
        Ok(BuildOutcome::Built(stats))
    }

    /// Collapsed entries for the requested words, keyed by normalized title.
    ///
    /// Titles differing only in case share a key; their entries are merged in
    /// cache order. Words without an entry are simply absent from the result.
    pub fn lookup<'a, I>(&self, words: I) -> Result<HashMap<String, DefinitionRecord>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let wanted: HashSet<String> = words.into_iter().map(normalize_title).collect();
        let mut found: HashMap<String, DefinitionRecord> = HashMap::new();
        if wanted.is_empty() {
            return Ok(found);
        }

        for (index, line) in self.open_lines()?.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let CacheLine::Entry(record) = self.parse_line(&line, index + 1)? else {
                continue;
            };
            let key = normalize_title(&record.title);
            if !wanted.contains(&key) {
                continue;
            }
            match found.get_mut(&key) {
                Some(existing) => merge_records(existing, record),
                None => {
                    found.insert(key.clone(), DefinitionRecord { title: key, ..record });
                }
            }
        }

        info!("Found cached definitions for {} of {} words", found.len(), wanted.len());
        Ok(found)
    }
}
