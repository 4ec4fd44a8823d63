//! Reading batches from local files.
//!
//! A source is either a single file or a directory. Files hold JSON objects,
//! one per line (`.jsonl`) or as a JSON array (`.json`). Directories are read
//! file by file in name order, ignoring anything that is not `.jsonl`/`.json`.

use crate::model::{Batch, Row};
use crate::{Error, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Load every row under `path` into one batch.
pub fn read_batch(path: &Path) -> Result<Batch> {
    let files = if path.is_dir() {
        list_source_files(path)?
    } else {
        vec![path.to_path_buf()]
    };

    let mut rows = Vec::new();
    for file in &files {
        let before = rows.len();
        read_file(file, &mut rows)?;
        debug!(file = %file.display(), rows = rows.len() - before, "Read source file");
    }

    Ok(Batch::new(rows))
}

fn list_source_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| Error::Source(format!("Failed to read {}: {}", dir.display(), e)))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_source_file(p))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(Error::Source(format!(
            "No .jsonl or .json files in {}",
            dir.display()
        )));
    }
    Ok(files)
}

fn is_source_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("jsonl") | Some("json")
    )
}

fn read_file(path: &Path, rows: &mut Vec<Row>) -> Result<()> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Source(format!("Failed to read {}: {}", path.display(), e)))?;

    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        let values: Vec<Value> = serde_json::from_str(trimmed)
            .map_err(|e| Error::Source(format!("{}: {}", path.display(), e)))?;
        for (index, value) in values.into_iter().enumerate() {
            rows.push(into_row(value, path, index + 1)?);
        }
        return Ok(());
    }

    for (line_num, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line).map_err(|e| {
            Error::Source(format!("{}:{}: {}", path.display(), line_num + 1, e))
        })?;
        rows.push(into_row(value, path, line_num + 1)?);
    }
    Ok(())
}

fn into_row(value: Value, path: &Path, position: usize) -> Result<Row> {
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(Error::Source(format!(
            "{}:{}: expected a JSON object, found {}",
            path.display(),
            position,
            other
        ))),
    }
}
