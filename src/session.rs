use std::num::NonZeroUsize;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::data::{FileInfo, ReadError, ReadOptions, RowWindow, TabularFile};

/// The file currently selected for viewing. Selecting a new file replaces it
/// wholesale; a failed selection leaves nothing open.
#[derive(Debug, Default)]
pub struct Session {
    file: Option<TabularFile>,
    options: ReadOptions,
}

impl Session {
    pub fn new(options: ReadOptions) -> Self {
        Session {
            file: None,
            options,
        }
    }

    pub fn current(&self) -> Option<&TabularFile> {
        self.file.as_ref()
    }

    pub fn open(&mut self, path: impl Into<PathBuf>) -> Result<FileInfo, ReadError> {
        self.file = None;

        let file = TabularFile::new(path)?;
        let info = file.describe(&self.options).map_err(|err| {
            warn!("Could not open {:?}: {}", file.path(), err);
            err
        })?;
        info!(
            "Opened {:?} as {}: {} columns",
            file.path(),
            file.format(),
            info.columns.len()
        );

        self.file = Some(file);
        Ok(info)
    }

    pub fn head(&self, n: NonZeroUsize) -> Result<RowWindow, ReadError> {
        self.current()
            .ok_or(ReadError::NoFileOpen)?
            .head(n, &self.options)
    }

    pub fn tail(&self, n: NonZeroUsize) -> Result<RowWindow, ReadError> {
        self.current()
            .ok_or(ReadError::NoFileOpen)?
            .tail(n, &self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use speculoos::prelude::*;
    use tempfile::TempDir;

    fn rows(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn reads_need_an_open_file() {
        let session = Session::default();
        assert!(matches!(session.head(rows(1)), Err(ReadError::NoFileOpen)));
        assert!(matches!(session.tail(rows(1)), Err(ReadError::NoFileOpen)));
    }

    #[test]
    fn open_then_read_both_ends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("people.csv");
        std::fs::write(&path, "name,age\nAlice,30\nBob,25\nCarol,41\n").unwrap();

        let mut session = Session::default();
        let info = session.open(&path).unwrap();

        assert_eq!(info.columns, vec!["name", "age"]);
        assert_eq!(info.total_rows, None);
        let head = session.head(rows(1)).unwrap();
        let tail = session.tail(rows(1)).unwrap();
        assert_eq!(head.columns, tail.columns);
        assert_eq!(head.rows, vec![vec!["Alice", "30"]]);
        assert_eq!(tail.rows, vec![vec!["Carol", "41"]]);
    }

    #[test]
    fn failed_open_clears_previous_file() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.csv");
        std::fs::write(&good, "a\n1\n").unwrap();

        let mut session = Session::default();
        session.open(&good).unwrap();
        assert_that(&session.current()).is_some();

        let result = session.open(dir.path().join("notes.txt"));
        assert!(matches!(result, Err(ReadError::UnsupportedFormat(_))));
        assert_that(&session.current()).is_none();

        let result = session.open(dir.path().join("missing.csv"));
        assert!(matches!(result, Err(ReadError::Io { .. })));
        assert_that(&session.current()).is_none();
    }

    #[test]
    fn options_apply_to_every_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("raw.csv");
        std::fs::write(&path, "1\t2\n3\t4\n").unwrap();

        let mut session = Session::new(ReadOptions {
            delimiter: b'\t',
            has_header: false,
        });
        session.open(&path).unwrap();

        let tail = session.tail(rows(5)).unwrap();
        assert_eq!(tail.columns, vec!["0", "1"]);
        assert_eq!(tail.rows, vec![vec!["1", "2"], vec!["3", "4"]]);
    }
}
