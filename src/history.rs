// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Input-history file handling.
//!
//! Connectors may supply an input-history file path at handshake. Every
//! accepted prompt is appended in the conventional format:
//!
//! ```text
//! # 2026-02-01 12:30:05
//! +fix the failing test
//! +and update the docs
//! ```
//!
//! Adjacent duplicate entries are suppressed.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

/// Append a prompt to the history file, skipping it when it equals the
/// previous entry. Returns `true` if the entry was written.
pub fn append_prompt(path: &Path, text: &str) -> io::Result<bool> {
    let text = text.trim_end();
    if text.is_empty() {
        return Ok(false);
    }

    if last_entry(path)?.as_deref() == Some(text) {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    writeln!(file, "# {}", timestamp)?;
    for line in text.lines() {
        writeln!(file, "+{}", line)?;
    }
    Ok(true)
}

/// Read back the most recent entry, joined across its `+` lines.
pub fn last_entry(path: &Path) -> io::Result<Option<String>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };

    let mut current: Vec<String> = Vec::new();
    let mut last: Option<String> = None;

    for line in BufReader::new(file).lines() {
        let line = line?;
        if let Some(rest) = line.strip_prefix('+') {
            current.push(rest.to_string());
        } else if line.starts_with('#') && !current.is_empty() {
            last = Some(current.join("\n"));
            current.clear();
        }
    }

    if !current.is_empty() {
        last = Some(current.join("\n"));
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("input-history");

        assert!(append_prompt(&path, "first prompt").unwrap());
        assert!(append_prompt(&path, "second prompt").unwrap());

        assert_eq!(last_entry(&path).unwrap().as_deref(), Some("second prompt"));
    }

    #[test]
    fn test_adjacent_duplicates_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("input-history");

        assert!(append_prompt(&path, "same").unwrap());
        assert!(!append_prompt(&path, "same").unwrap());
        assert!(append_prompt(&path, "different").unwrap());
        // Not adjacent anymore, so it is written again.
        assert!(append_prompt(&path, "same").unwrap());

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("+same").count(), 2);
    }

    #[test]
    fn test_multiline_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("input-history");

        append_prompt(&path, "line one\nline two").unwrap();
        assert_eq!(
            last_entry(&path).unwrap().as_deref(),
            Some("line one\nline two")
        );
        assert!(!append_prompt(&path, "line one\nline two").unwrap());
    }

    #[test]
    fn test_empty_prompt_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("input-history");
        assert!(!append_prompt(&path, "   \n").unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_file_has_no_last_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent");
        assert!(last_entry(&path).unwrap().is_none());
    }
}
