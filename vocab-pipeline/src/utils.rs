/// Text processing utilities
pub mod text {
    /// Collapse runs of whitespace into single spaces and trim the ends
    pub fn squash_whitespace(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Upper-case the first character only
    pub fn capitalize_first(text: &str) -> String {
        let mut chars = text.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    /// True for header and separator rows of the fixed-width tables we write
    pub fn is_table_chrome(line: &str) -> bool {
        let trimmed = line.trim();
        trimmed.starts_with("WORD ")
            || trimmed == "WORD"
            || (!trimmed.is_empty() && trimmed.chars().all(|c| c == '-' || c == ' '))
    }

    /// Strip a Markdown code fence wrapped around a model reply
    pub fn strip_code_fence(text: &str) -> &str {
        let mut body = text.trim();
        if let Some(rest) = body.strip_prefix("```") {
            // Drop the language tag on the opening fence
            body = match rest.find('\n') {
                Some(newline) => &rest[newline + 1..],
                None => rest.trim_start_matches("json"),
            };
        }
        if let Some(rest) = body.trim_end().strip_suffix("```") {
            body = rest;
        }
        body.trim()
    }
}

/// Time utilities
pub mod time {
    use chrono::{Datelike, Duration, NaiveDate, Utc};

    /// Earliest date the Wikimedia pageview API has data for.
    pub const PAGEVIEWS_EARLIEST: &str = "20150701";

    /// Last day of the month before `today`
    pub fn last_complete_month_end(today: NaiveDate) -> NaiveDate {
        let first_of_month = today.with_day(1).unwrap_or(today);
        first_of_month - Duration::days(1)
    }

    /// Pageview query window `(start, end)` as `YYYYMMDD`.
    ///
    /// `months == 0` spans the whole history; otherwise the last `months`
    /// complete months.
    pub fn pageview_window(today: NaiveDate, months: u32) -> (String, String) {
        let end = last_complete_month_end(today);
        if months == 0 {
            return (PAGEVIEWS_EARLIEST.to_string(), end.format("%Y%m%d").to_string());
        }

        let mut year = end.year();
        let mut month = end.month();
        for _ in 1..months {
            if month == 1 {
                month = 12;
                year -= 1;
            } else {
                month -= 1;
            }
        }
        let start = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(end);
        (start.format("%Y%m%d").to_string(), end.format("%Y%m%d").to_string())
    }

    pub fn default_pageview_window(months: u32) -> (String, String) {
        pageview_window(Utc::now().date_naive(), months)
    }

    /// Accepts `YYYYMMDD` only
    pub fn is_valid_yyyymmdd(value: &str) -> bool {
        value.len() == 8
            && value.chars().all(|c| c.is_ascii_digit())
            && NaiveDate::parse_from_str(value, "%Y%m%d").is_ok()
    }
}

/// File utilities
pub mod fs {
    use crate::types::{PipelineError, Result};
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use tempfile::NamedTempFile;

    fn parent_dir(path: &Path) -> PathBuf {
        match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        }
    }

    /// Temp file next to `path`, so the final rename stays on one filesystem
    pub fn temp_beside(path: &Path) -> Result<NamedTempFile> {
        let parent = parent_dir(path);
        std::fs::create_dir_all(&parent)?;
        Ok(NamedTempFile::new_in(parent)?)
    }

    /// Sync a finished temp file and move it over `path`
    pub fn persist(temp: NamedTempFile, path: &Path) -> Result<()> {
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| PipelineError::Io(e.error))?;
        Ok(())
    }

    /// Replace `path` with `contents`; readers see the old file or the new one
    pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
        let mut temp = temp_beside(path)?;
        temp.write_all(contents.as_bytes())?;
        persist(temp, path)
    }
}
