//! Append-only run journal.

use super::entries::JournalEntry;
use crate::error::JournalError;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

const FILE_PREFIX: &str = "runs-";
const FILE_EXTENSION: &str = "jsonl";

/// Append-only JSON-lines journal.
///
/// Every process writes its own `runs-<uuid>.jsonl` file in the journal
/// directory; readers merge all files. The file is created on the first
/// append, so a handle that never writes leaves nothing behind.
pub struct RunJournal {
    dir: PathBuf,
    current: Mutex<Option<OpenFile>>,
    entries_written: AtomicU64,
}

struct OpenFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl OpenFile {
    fn create(dir: &Path) -> Result<Self> {
        let path = dir.join(format!(
            "{}{}.{}",
            FILE_PREFIX,
            Uuid::new_v4(),
            FILE_EXTENSION
        ));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| JournalError::WriteFailed(format!("Failed to open journal file: {}", e)))?;

        debug!(path = %path.display(), "Journal file created");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    fn write(&mut self, entry: &JournalEntry) -> Result<()> {
        let json = serde_json::to_string(entry).map_err(|e| Error::Serialization(e.to_string()))?;
        writeln!(self.writer, "{}", json).map_err(|e| JournalError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| JournalError::WriteFailed(format!("Failed to flush: {}", e)))?;
        self.writer
            .get_ref()
            .sync_all()
            .map_err(|e| JournalError::WriteFailed(format!("Failed to sync: {}", e)))?;
        Ok(())
    }
}

impl RunJournal {
    /// Open a journal in `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            JournalError::WriteFailed(format!(
                "Failed to create journal directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        info!(dir = %dir.display(), "Run journal opened");

        Ok(Self {
            dir,
            current: Mutex::new(None),
            entries_written: AtomicU64::new(0),
        })
    }

    /// Append an entry and flush it.
    pub fn append(&self, entry: JournalEntry) -> Result<()> {
        let mut current = self.current.lock();
        if current.is_none() {
            *current = Some(OpenFile::create(&self.dir)?);
        }
        if let Some(file) = current.as_mut() {
            file.write(&entry)?;
            file.writer
                .flush()
                .map_err(|e| JournalError::WriteFailed(e.to_string()))?;
        }

        self.entries_written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Read all entries from every journal file in the directory.
    ///
    /// Files are read oldest first; entries keep their order within a file.
    pub fn read_all_entries(&self) -> Result<Vec<JournalEntry>> {
        read_dir_entries(&self.dir)
    }

    /// Flush buffered writes and fsync the current file.
    pub fn sync(&self) -> Result<()> {
        if let Some(file) = self.current.lock().as_mut() {
            file.sync()?;
            debug!("Run journal synced to disk");
        }
        Ok(())
    }

    /// Replace the whole journal with `carry`.
    ///
    /// The current file is synced and retired, `carry` is written to a fresh
    /// file (none when it is empty) and every other journal file in the
    /// directory is removed. Returns the number of files removed.
    ///
    /// Must not run while other processes are appending to the same
    /// directory: their files are removed too.
    pub fn checkpoint(&self, carry: &[JournalEntry]) -> Result<usize> {
        let mut current = self.current.lock();
        if let Some(file) = current.as_mut() {
            file.sync()?;
        }

        let kept = if carry.is_empty() {
            None
        } else {
            let mut file = OpenFile::create(&self.dir)?;
            for entry in carry {
                file.write(entry)?;
            }
            file.sync()?;
            Some(file)
        };
        let kept_path = kept.as_ref().map(|file| file.path.clone());
        *current = kept;

        let mut removed = 0;
        for path in journal_files(&self.dir)? {
            if Some(&path) == kept_path.as_ref() {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "Removed settled journal file");
                    removed += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove journal file");
                }
            }
        }

        info!(
            carried = carry.len(),
            removed_files = removed,
            "Run journal checkpoint created"
        );

        Ok(removed)
    }

    /// Directory holding the journal files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file this journal writes to, once the first entry is
    /// appended.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.current.lock().as_ref().map(|file| file.path.clone())
    }

    /// Entries appended through this handle.
    pub fn entries_written(&self) -> u64 {
        self.entries_written.load(Ordering::SeqCst)
    }
}

/// Journal files in `dir`, oldest first.
fn journal_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<_> = fs::read_dir(dir)
        .map_err(|e| JournalError::ReadFailed(format!("Failed to read journal directory: {}", e)))?
        .filter_map(|e| e.ok())
        .filter(|e| {
            let path = e.path();
            path.extension().map_or(false, |ext| ext == FILE_EXTENSION)
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.starts_with(FILE_PREFIX))
        })
        .collect();

    files.sort_by_key(|e| {
        let modified = e
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        (modified, e.file_name())
    });

    Ok(files.into_iter().map(|e| e.path()).collect())
}

fn read_dir_entries(dir: &Path) -> Result<Vec<JournalEntry>> {
    let files = journal_files(dir)?;

    let mut entries = Vec::new();
    for path in files {
        let file = File::open(&path)
            .map_err(|e| JournalError::ReadFailed(format!("Failed to open journal file: {}", e)))?;

        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| JournalError::Corrupted {
                line: line_num as u64 + 1,
                message: e.to_string(),
            })?;
            if line.trim().is_empty() {
                continue;
            }

            let entry: JournalEntry =
                serde_json::from_str(&line).map_err(|e| JournalError::Corrupted {
                    line: line_num as u64 + 1,
                    message: format!("{}: {}", path.display(), e),
                })?;
            entries.push(entry);
        }
    }

    debug!(entries = entries.len(), dir = %dir.display(), "Read run journal entries");
    Ok(entries)
}
