//! Cold tier: rotating append-only log.
//!
//! Last-resort durability when both hot and warm refuse a record. The log is
//! never drained programmatically; operators collect rotated files offline.

use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Error type for cold log operations.
#[derive(Debug, Error)]
pub enum ColdError {
    #[error("cold log io: {0}")]
    Io(#[from] std::io::Error),
}

struct ColdInner {
    writer: BufWriter<File>,
    size: u64,
}

/// Append-only buffered log that rotates by rename-then-reopen.
pub struct ColdBuffer {
    path: PathBuf,
    max_size: u64,
    inner: Mutex<ColdInner>,
}

impl ColdBuffer {
    /// Opens or creates the log at `path`, rotating once `max_size` bytes are
    /// reached.
    pub fn open(path: &Path, max_size: u64) -> Result<Self, ColdError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            max_size,
            inner: Mutex::new(ColdInner {
                writer: BufWriter::new(file),
                size,
            }),
        })
    }

    /// Appends one framed record, rotating first if the write would cross the
    /// size threshold.
    pub fn append(&self, frame: &[u8]) -> Result<(), ColdError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.size > 0 && inner.size + frame.len() as u64 > self.max_size {
            self.rotate(&mut inner)?;
        }

        inner.writer.write_all(frame)?;
        inner.size += frame.len() as u64;
        Ok(())
    }

    /// Flushes buffered bytes to the file.
    pub fn flush(&self) -> Result<(), ColdError> {
        self.inner.lock().unwrap().writer.flush()?;
        Ok(())
    }

    /// Current size of the active log file in bytes.
    pub fn size(&self) -> u64 {
        self.inner.lock().unwrap().size
    }

    /// Rename-then-reopen: the active file moves to a timestamp-suffixed
    /// sibling and a fresh log takes its place.
    fn rotate(&self, inner: &mut ColdInner) -> Result<(), ColdError> {
        inner.writer.flush()?;

        let rotated = self.rotated_path();
        fs::rename(&self.path, &rotated)?;

        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;
        inner.writer = BufWriter::new(file);
        inner.size = 0;

        tracing::info!(rotated = %rotated.display(), "cold log rotated");
        Ok(())
    }

    fn rotated_path(&self) -> PathBuf {
        let suffix = Utc::now().format("%Y%m%d-%H%M%S");
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{suffix}"));
        PathBuf::from(name)
    }
}

impl Drop for ColdBuffer {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            let _ = inner.writer.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_accumulates() {
        let dir = TempDir::new().unwrap();
        let cold = ColdBuffer::open(&dir.path().join("cold.log"), 1024).unwrap();

        cold.append(&[1u8; 100]).unwrap();
        cold.append(&[2u8; 100]).unwrap();
        assert_eq!(cold.size(), 200);
    }

    #[test]
    fn test_rotation_triggers_before_crossing_threshold() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cold.log");
        let cold = ColdBuffer::open(&path, 256).unwrap();

        // Fill to exactly the threshold: no rotation yet.
        cold.append(&[0u8; 128]).unwrap();
        cold.append(&[0u8; 128]).unwrap();
        assert_eq!(cold.size(), 256);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        // The write that would cross the threshold rotates first.
        cold.append(&[0u8; 16]).unwrap();
        assert_eq!(cold.size(), 16);
        cold.flush().unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|name| name == "cold.log"));
        assert!(entries
            .iter()
            .any(|name| name.starts_with("cold.log.") && name.len() > "cold.log.".len()));

        // Rotated content is intact.
        let rotated = entries.iter().find(|name| name != &"cold.log").unwrap();
        assert_eq!(fs::read(dir.path().join(rotated)).unwrap().len(), 256);
    }

    #[test]
    fn test_reopen_resumes_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cold.log");

        {
            let cold = ColdBuffer::open(&path, 1024).unwrap();
            cold.append(&[7u8; 64]).unwrap();
        }

        let cold = ColdBuffer::open(&path, 1024).unwrap();
        assert_eq!(cold.size(), 64);
    }

    #[test]
    fn test_append_fails_when_directory_vanishes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub").join("cold.log");
        let cold = ColdBuffer::open(&path, 64).unwrap();
        cold.append(&[0u8; 60]).unwrap();

        // Removing the directory makes the next rotation rename fail.
        fs::remove_dir_all(dir.path().join("sub")).unwrap();
        assert!(cold.append(&[0u8; 60]).is_err());
    }
}
