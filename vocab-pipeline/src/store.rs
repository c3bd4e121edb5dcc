//! Resumable append-only key-value files.
//!
//! A store is a JSON Lines file where every line is `{"key": .., "value": ..}`.
//! Replaying the file front to back rebuilds the map; a later line for the
//! same key wins. New values are buffered and appended in bounded batches, so
//! an interrupted run loses at most the unflushed batch and never an entry
//! that was already committed.

use crate::types::{PipelineError, Result};
use crate::utils::fs as fs_utils;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Serialize)]
struct LineRef<'a, V> {
    key: &'a str,
    value: &'a V,
}

#[derive(Deserialize)]
struct Line<V> {
    key: String,
    value: V,
}

pub struct KvStore<V: Serialize> {
    path: PathBuf,
    entries: HashMap<String, V>,
    pending: Vec<String>,
    pending_keys: HashSet<String>,
    flush_every: usize,
    /// Byte length of the committed prefix when the file ended in a torn line.
    truncate_to: Option<u64>,
    /// The last committed line is missing its newline.
    needs_newline: bool,
}

impl<V> KvStore<V>
where
    V: Serialize + DeserializeOwned + PartialEq + Clone,
{
    /// Open (or start) a store at `path`, replaying every committed line.
    pub fn open(path: impl Into<PathBuf>, flush_every: usize) -> Result<Self> {
        let path = path.into();
        let mut store = Self {
            path,
            entries: HashMap::new(),
            pending: Vec::new(),
            pending_keys: HashSet::new(),
            flush_every: flush_every.max(1),
            truncate_to: None,
            needs_newline: false,
        };

        if store.path.is_file() {
            store.replay()?;
            info!("Loaded {} entries from {}", store.entries.len(), store.path.display());
        } else {
            debug!("No store at {}, starting empty", store.path.display());
        }

        Ok(store)
    }

    fn replay(&mut self) -> Result<()> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut line = String::new();
        let mut offset: u64 = 0;
        let mut line_number = 0;

        loop {
            line.clear();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                break;
            }
            line_number += 1;
            let complete = line.ends_with('\n');
            let content = line.trim();

            if content.is_empty() {
                offset += read as u64;
                continue;
            }

            match serde_json::from_str::<Line<V>>(content) {
                Ok(parsed) => {
                    self.entries.insert(parsed.key, parsed.value);
                    self.needs_newline = !complete;
                }
                Err(e) if !complete => {
                    // Interrupted mid-write; the fragment was never committed
                    warn!(
                        "Ignoring torn final line {} of {}: {}",
                        line_number,
                        self.path.display(),
                        e
                    );
                    self.truncate_to = Some(offset);
                    break;
                }
                Err(e) => {
                    return Err(PipelineError::CacheCorrupt {
                        path: self.path.clone(),
                        line: line_number,
                        reason: e.to_string(),
                    });
                }
            }
            offset += read as u64;
        }

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.entries.iter()
    }

    /// Record a value. Returns false when the stored value was already equal.
    ///
    /// Appends to disk once `flush_every` records are pending.
    pub fn insert(&mut self, key: &str, value: V) -> Result<bool> {
        if self.entries.get(key) == Some(&value) {
            return Ok(false);
        }
        self.entries.insert(key.to_string(), value);
        if self.pending_keys.insert(key.to_string()) {
            self.pending.push(key.to_string());
        }
        if self.pending.len() >= self.flush_every {
            self.flush()?;
        }
        Ok(true)
    }

    /// Record a value and commit it immediately.
    pub fn insert_and_flush(&mut self, key: &str, value: V) -> Result<bool> {
        let changed = self.insert(key, value)?;
        self.flush()?;
        Ok(changed)
    }

    /// Rewrite the file with one line per key, sorted, replacing it atomically.
    pub fn compact(&mut self) -> Result<usize> {
        let mut keys: Vec<&String> = self.entries.keys().collect();
        keys.sort();

        let temp = fs_utils::temp_beside(&self.path)?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            for key in &keys {
                let value = &self.entries[key.as_str()];
                serde_json::to_writer(&mut writer, &LineRef { key: key.as_str(), value })?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        fs_utils::persist(temp, &self.path)?;

        let count = keys.len();
        self.pending.clear();
        self.pending_keys.clear();
        self.truncate_to = None;
        self.needs_newline = false;
        info!("Compacted {} to {} entries", self.path.display(), count);
        Ok(count)
    }
}

impl<V: Serialize> KvStore<V> {
    /// Append pending records and sync them to disk. Returns how many were written.
    pub fn flush(&mut self) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        if let Some(len) = self.truncate_to.take() {
            let file = OpenOptions::new().write(true).open(&self.path)?;
            file.set_len(len)?;
            debug!("Truncated torn tail of {} to {} bytes", self.path.display(), len);
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(&file);

        if self.needs_newline {
            writer.write_all(b"\n")?;
            self.needs_newline = false;
        }

        let mut written = 0;
        for key in &self.pending {
            if let Some(value) = self.entries.get(key) {
                serde_json::to_writer(&mut writer, &LineRef { key: key.as_str(), value })?;
                writer.write_all(b"\n")?;
                written += 1;
            }
        }
        writer.flush()?;
        drop(writer);
        file.sync_data()?;

        self.pending.clear();
        self.pending_keys.clear();
        debug!("Flushed {} entries to {}", written, self.path.display());
        Ok(written)
    }
}

impl<V: Serialize> Drop for KvStore<V> {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let pending = self.pending.len();
        match self.flush() {
            Ok(written) => debug!("Flushed {} entries to {} on drop", written, self.path.display()),
            Err(e) => warn!(
                "{} unflushed entries for {} lost: {}",
                pending,
                self.path.display(),
                e
            ),
        }
    }
}
