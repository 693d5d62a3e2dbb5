use std::ffi::OsStr;
use std::fmt;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

pub mod delimited;
pub mod excel;
pub mod output;
pub mod stata;

/// Column names plus rows of rendered cell values, as returned by a head or
/// tail read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowWindow {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Csv,
    Excel,
    /// Stata `.dta`, the columnar-binary statistical format.
    Stata,
}

impl FileFormat {
    /// Infers the format from the file extension alone; the file is not opened.
    pub fn from_path(path: &Path) -> Result<Self, ReadError> {
        let extension = path
            .extension()
            .and_then(OsStr::to_str)
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("csv") => Ok(FileFormat::Csv),
            Some("xls") | Some("xlsx") => Ok(FileFormat::Excel),
            Some("dta") => Ok(FileFormat::Stata),
            _ => Err(ReadError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileFormat::Csv => write!(f, "CSV"),
            FileFormat::Excel => write!(f, "Excel"),
            FileFormat::Stata => write!(f, "Stata"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Field delimiter for CSV input.
    pub delimiter: u8,
    /// Whether the first CSV record holds column names.
    pub has_header: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            delimiter: b',',
            has_header: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("unsupported file type: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("{} is not a readable {format} file: {reason}", .path.display())]
    FormatMismatch {
        path: PathBuf,
        format: FileFormat,
        reason: String,
    },

    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no file is open")]
    NoFileOpen,
}

impl ReadError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        ReadError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn mismatch(path: &Path, format: FileFormat, reason: impl Into<String>) -> Self {
        ReadError::FormatMismatch {
            path: path.to_path_buf(),
            format,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub path: PathBuf,
    pub format: FileFormat,
    pub size: u64,
    pub columns: Vec<String>,
    /// `None` when counting would take a full scan of the file.
    pub total_rows: Option<u64>,
}

impl fmt::Display for FileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "File Path: {}", self.path.display())?;
        writeln!(f, "File Type: {}", self.format)?;
        writeln!(f, "Size: {} bytes", self.size)?;
        writeln!(f, "Columns: {}", self.columns.join(", "))?;
        match self.total_rows {
            Some(rows) => writeln!(f, "Rows: {rows}"),
            None => writeln!(f, "Rows: unknown"),
        }
    }
}

/// A file on disk paired with the format its extension declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabularFile {
    path: PathBuf,
    format: FileFormat,
}

impl TabularFile {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, ReadError> {
        let path = path.into();
        let format = FileFormat::from_path(&path)?;
        Ok(TabularFile { path, format })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Returns the first `n` data rows.
    pub fn head(&self, n: NonZeroUsize, options: &ReadOptions) -> Result<RowWindow, ReadError> {
        info!("Reading first {} rows of {:?}", n, self.path);
        let window = match self.format {
            FileFormat::Csv => delimited::read_head(&self.path, n, options),
            FileFormat::Excel => excel::read_head(&self.path, n),
            FileFormat::Stata => stata::read_head(&self.path, n),
        }?;
        debug!(
            "Head read returned {} rows, {} columns",
            window.rows.len(),
            window.columns.len()
        );
        Ok(window)
    }

    /// Returns the last `n` data rows in file order.
    pub fn tail(&self, n: NonZeroUsize, options: &ReadOptions) -> Result<RowWindow, ReadError> {
        info!("Reading last {} rows of {:?}", n, self.path);
        let window = match self.format {
            FileFormat::Csv => delimited::read_tail(&self.path, n, options),
            FileFormat::Excel => excel::read_tail(&self.path, n),
            FileFormat::Stata => stata::read_tail(&self.path, n),
        }?;
        debug!(
            "Tail read returned {} rows, {} columns",
            window.rows.len(),
            window.columns.len()
        );
        Ok(window)
    }

    pub fn describe(&self, options: &ReadOptions) -> Result<FileInfo, ReadError> {
        let size = std::fs::metadata(&self.path)
            .map_err(|err| ReadError::io(&self.path, err))?
            .len();

        let (columns, total_rows) = match self.format {
            FileFormat::Csv => (delimited::read_columns(&self.path, options)?, None),
            FileFormat::Excel => excel::describe(&self.path)?,
            FileFormat::Stata => stata::describe(&self.path)?,
        };

        Ok(FileInfo {
            path: self.path.clone(),
            format: self.format,
            size,
            columns,
            total_rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use speculoos::prelude::*;

    #[test]
    fn infers_format_from_extension() {
        assert_eq!(
            FileFormat::from_path(Path::new("data/sales.csv")).unwrap(),
            FileFormat::Csv
        );
        assert_eq!(
            FileFormat::from_path(Path::new("book.xlsx")).unwrap(),
            FileFormat::Excel
        );
        assert_eq!(
            FileFormat::from_path(Path::new("legacy.XLS")).unwrap(),
            FileFormat::Excel
        );
        assert_eq!(
            FileFormat::from_path(Path::new("survey.dta")).unwrap(),
            FileFormat::Stata
        );
    }

    #[test]
    fn txt_is_unsupported_before_any_read() {
        // The file does not exist, so any read attempt would be an Io error.
        let result = TabularFile::new("/nonexistent/notes.txt");
        assert!(matches!(result, Err(ReadError::UnsupportedFormat(_))));
    }

    #[test]
    fn missing_extension_is_unsupported() {
        let result = FileFormat::from_path(Path::new("Makefile"));
        assert_that(&result).is_err();
    }

    #[test]
    fn info_display_lists_metadata() {
        let info = FileInfo {
            path: PathBuf::from("/tmp/people.csv"),
            format: FileFormat::Csv,
            size: 42,
            columns: vec!["name".to_string(), "age".to_string()],
            total_rows: None,
        };
        assert_eq!(
            info.to_string(),
            "File Path: /tmp/people.csv\nFile Type: CSV\nSize: 42 bytes\nColumns: name, age\nRows: unknown\n"
        );
    }

    #[test]
    fn error_messages_name_the_path() {
        let err = ReadError::mismatch(Path::new("a.dta"), FileFormat::Stata, "bad header");
        assert_eq!(err.to_string(), "a.dta is not a readable Stata file: bad header");
    }
}
