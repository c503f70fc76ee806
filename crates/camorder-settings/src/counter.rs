//! Program counter store
//!
//! A single persisted integer that names output programs. It survives
//! across runs, only ever moves forward, and a number is never handed out
//! twice.
//!
//! The file-backed store keeps the *next* number to hand out. [`next`]
//! reads it, durably replaces the file with `value + 1`, and only then
//! returns `value`. A crash between read and replace can at worst reuse the
//! most recent unconsumed number.
//!
//! [`next`]: ProgramCounterStore::next

use crate::config::DEFAULT_INITIAL_PROGRAM_NUMBER;
use crate::error::{CounterError, CounterResult};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Source of program numbers
pub trait ProgramCounterStore {
    /// Hand out the next program number, persisting the advance first
    fn next(&mut self) -> CounterResult<u64>;

    /// The number [`next`](Self::next) would return, without consuming it
    fn peek(&self) -> CounterResult<u64>;
}

/// Counter persisted in a single text file
#[derive(Debug, Clone)]
pub struct FileCounterStore {
    path: PathBuf,
    initial_value: u64,
}

impl FileCounterStore {
    /// Store at `path` starting at 1001
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_initial_value(path, DEFAULT_INITIAL_PROGRAM_NUMBER)
    }

    pub fn with_initial_value(path: impl Into<PathBuf>, initial_value: u64) -> Self {
        Self {
            path: path.into(),
            initial_value,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_next(&self) -> CounterResult<u64> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(
                    "No counter at {}, starting at {}",
                    self.path.display(),
                    self.initial_value
                );
                return Ok(self.initial_value);
            }
            Err(source) => {
                return Err(CounterError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        match content.trim().parse::<u64>() {
            Ok(value) if value > 0 => Ok(value),
            _ => {
                tracing::warn!(
                    "Counter file {} is corrupt ({:?}), reinitializing at {}",
                    self.path.display(),
                    content.trim(),
                    self.initial_value
                );
                Ok(self.initial_value)
            }
        }
    }

    fn write_atomic(&self, value: u64) -> CounterResult<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let io_err = |source| CounterError::Io {
            path: self.path.clone(),
            source,
        };

        std::fs::create_dir_all(parent).map_err(io_err)?;

        // Temp file in the same directory so the rename stays on one filesystem.
        let mut temp_file = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
        writeln!(temp_file, "{}", value).map_err(io_err)?;
        temp_file.as_file().sync_all().map_err(io_err)?;

        temp_file
            .persist(&self.path)
            .map_err(|e| CounterError::Persist {
                path: self.path.clone(),
                message: e.error.to_string(),
            })?;

        Ok(())
    }
}

impl ProgramCounterStore for FileCounterStore {
    fn next(&mut self) -> CounterResult<u64> {
        let value = self.read_next()?;
        let following = value
            .checked_add(1)
            .ok_or(CounterError::Exhausted(value))?;
        self.write_atomic(following)?;
        tracing::debug!("Issued program number {}", value);
        Ok(value)
    }

    fn peek(&self) -> CounterResult<u64> {
        self.read_next()
    }
}

/// Counter kept in memory, for tests and dry runs
#[derive(Debug, Clone)]
pub struct MemoryCounterStore {
    next: u64,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::starting_at(DEFAULT_INITIAL_PROGRAM_NUMBER)
    }

    pub fn starting_at(next: u64) -> Self {
        Self { next }
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramCounterStore for MemoryCounterStore {
    fn next(&mut self) -> CounterResult<u64> {
        let value = self.next;
        self.next = value
            .checked_add(1)
            .ok_or(CounterError::Exhausted(value))?;
        Ok(value)
    }

    fn peek(&self) -> CounterResult<u64> {
        Ok(self.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_store_starts_at_1001() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCounterStore::new(dir.path().join("counter.txt"));

        assert_eq!(store.peek().unwrap(), 1001);
        assert_eq!(store.next().unwrap(), 1001);
        assert_eq!(store.next().unwrap(), 1002);
        assert_eq!(store.peek().unwrap(), 1003);
    }

    #[test]
    fn test_state_survives_new_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counter.txt");

        let mut first = FileCounterStore::new(&path);
        first.next().unwrap();
        first.next().unwrap();

        let mut second = FileCounterStore::new(&path);
        assert_eq!(second.next().unwrap(), 1003);
        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "1004");
    }

    #[test]
    fn test_corrupt_content_reinitializes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counter.txt");
        std::fs::write(&path, "not a number").unwrap();

        let mut store = FileCounterStore::new(&path);
        assert_eq!(store.next().unwrap(), 1001);
        assert_eq!(store.next().unwrap(), 1002);
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("counter.txt");

        let mut store = FileCounterStore::with_initial_value(&path, 5000);
        assert_eq!(store.next().unwrap(), 5000);
        assert!(path.exists());
    }

    #[test]
    fn test_exhausted_counter() {
        let mut store = MemoryCounterStore::starting_at(u64::MAX);
        assert!(matches!(store.next(), Err(CounterError::Exhausted(_))));
        assert_eq!(store.peek().unwrap(), u64::MAX);
    }
}
