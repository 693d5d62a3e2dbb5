//! Stata `.dta` files, releases 113 to 119.
//!
//! Data rows are fixed width but the format is read as a plain record stream:
//! rows are pulled in chunks and only the chunks a request needs are kept.
//! Long strings and value labels live in sections after the data and are
//! looked up only for the rows that survive.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use self::header::Layout;
use self::value::RawValue;
use super::{FileFormat, ReadError, RowWindow};

mod header;
mod labels;
mod value;

#[derive(Debug, Error)]
pub(crate) enum DtaError {
    #[error(transparent)]
    Io(io::Error),

    #[error("{0}")]
    Malformed(String),
}

impl From<io::Error> for DtaError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            DtaError::Malformed("unexpected end of file".to_string())
        } else {
            DtaError::Io(err)
        }
    }
}

impl DtaError {
    fn into_read_error(self, path: &Path) -> ReadError {
        match self {
            DtaError::Io(source) => ReadError::io(path, source),
            DtaError::Malformed(reason) => ReadError::mismatch(path, FileFormat::Stata, reason),
        }
    }
}

type Row = Vec<RawValue>;

struct DtaReader {
    input: BufReader<File>,
    layout: Layout,
    remaining: u64,
    buf: Vec<u8>,
}

impl DtaReader {
    fn open(path: &Path) -> Result<Self, DtaError> {
        let mut input = BufReader::new(File::open(path)?);
        let layout = Layout::read(&mut input)?;
        debug!(
            "Stata release {} with {} variables and {} observations",
            layout.release,
            layout.variables.len(),
            layout.nobs
        );
        input.seek(SeekFrom::Start(layout.data_offset))?;

        Ok(DtaReader {
            input,
            remaining: layout.nobs,
            buf: vec![0u8; layout.row_len()],
            layout,
        })
    }

    /// Reads up to `size` rows, or `None` once the data section is exhausted.
    fn next_chunk(&mut self, size: usize) -> Result<Option<Vec<Row>>, DtaError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let take = self.remaining.min(size as u64) as usize;
        let mut chunk = Vec::with_capacity(take);
        for _ in 0..take {
            self.input.read_exact(&mut self.buf)?;
            chunk.push(value::decode_row(&self.layout, &self.buf));
        }
        self.remaining -= take as u64;
        Ok(Some(chunk))
    }

    /// Resolves long strings and value labels for `rows` and renders them.
    fn finish(mut self, rows: Vec<Row>) -> Result<RowWindow, DtaError> {
        let wanted_strls: HashSet<(u64, u64)> = rows
            .iter()
            .flatten()
            .filter_map(|value| match value {
                RawValue::StrL(v, o) if (*v, *o) != (0, 0) => Some((*v, *o)),
                _ => None,
            })
            .collect();
        let strls = labels::read_strls(&mut self.input, &self.layout, &wanted_strls)?;

        let wanted_labels: HashSet<&str> = self
            .layout
            .variables
            .iter()
            .filter(|var| !var.value_label.is_empty())
            .map(|var| var.value_label.as_str())
            .collect();
        let tables = if rows.is_empty() {
            Default::default()
        } else {
            labels::read_value_labels(&mut self.input, &self.layout, &wanted_labels)?
        };

        let variables = &self.layout.variables;
        let rows = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(variables)
                    .map(|(value, var)| match &value {
                        RawValue::StrL(v, o) => strls.get(&(*v, *o)).cloned().unwrap_or_default(),
                        RawValue::Integer(i) => tables
                            .get(&var.value_label)
                            .and_then(|table| table.get(i))
                            .cloned()
                            .unwrap_or_else(|| value.render(&var.format)),
                        _ => value.render(&var.format),
                    })
                    .collect()
            })
            .collect();

        Ok(RowWindow {
            columns: self.layout.names(),
            rows,
        })
    }
}

pub fn read_head(path: &Path, n: NonZeroUsize) -> Result<RowWindow, ReadError> {
    head(path, n.get()).map_err(|err| err.into_read_error(path))
}

fn head(path: &Path, n: usize) -> Result<RowWindow, DtaError> {
    let mut reader = DtaReader::open(path)?;
    let rows = reader.next_chunk(n)?.unwrap_or_default();
    reader.finish(rows)
}

/// Scans every row; at most two chunks of `n` rows are held at once.
pub fn read_tail(path: &Path, n: NonZeroUsize) -> Result<RowWindow, ReadError> {
    tail(path, n.get()).map_err(|err| err.into_read_error(path))
}

fn tail(path: &Path, n: usize) -> Result<RowWindow, DtaError> {
    let mut reader = DtaReader::open(path)?;
    let mut previous = Vec::new();
    let mut last = Vec::new();
    while let Some(chunk) = reader.next_chunk(n)? {
        previous = std::mem::replace(&mut last, chunk);
    }

    // The final chunk is short unless the row count divides evenly.
    let keep_from = previous.len().saturating_sub(n - last.len());
    let mut rows: Vec<Row> = previous.split_off(keep_from);
    rows.extend(last);
    reader.finish(rows)
}

/// Column names and observation count, from the header alone.
pub fn describe(path: &Path) -> Result<(Vec<String>, Option<u64>), ReadError> {
    let reader = DtaReader::open(path).map_err(|err| err.into_read_error(path))?;
    Ok((reader.layout.names(), Some(reader.layout.nobs)))
}
