use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::Path;

use tracing::debug;

use super::{FileFormat, ReadError, ReadOptions, RowWindow};

/// Size of each backward read when looking for the start of the tail.
const BLOCK_SIZE: usize = 1024;

fn reader_builder(options: &ReadOptions) -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .delimiter(options.delimiter)
        .has_headers(options.has_header)
        .flexible(true);
    builder
}

fn csv_error(path: &Path, err: csv::Error) -> ReadError {
    let reason = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(source) => ReadError::io(path, source),
        _ => ReadError::mismatch(path, FileFormat::Csv, reason),
    }
}

fn open(path: &Path) -> Result<File, ReadError> {
    File::open(path).map_err(|err| ReadError::io(path, err))
}

fn to_row(record: &csv::StringRecord) -> Vec<String> {
    record.iter().map(|field| field.to_string()).collect()
}

fn column_names<R: Read>(
    reader: &mut csv::Reader<R>,
    path: &Path,
    options: &ReadOptions,
) -> Result<Vec<String>, ReadError> {
    // Without a header this is the first data record, which is still yielded
    // by `records()` afterwards.
    let first = reader.headers().map_err(|err| csv_error(path, err))?;
    if options.has_header {
        Ok(to_row(first))
    } else {
        Ok((0..first.len()).map(|i| i.to_string()).collect())
    }
}

/// Reads only the first record to name the columns.
pub fn read_columns(path: &Path, options: &ReadOptions) -> Result<Vec<String>, ReadError> {
    let mut reader = reader_builder(options).from_reader(open(path)?);
    column_names(&mut reader, path, options)
}

pub fn read_head(
    path: &Path,
    n: NonZeroUsize,
    options: &ReadOptions,
) -> Result<RowWindow, ReadError> {
    let mut reader = reader_builder(options).from_reader(open(path)?);
    let columns = column_names(&mut reader, path, options)?;

    let mut rows = Vec::with_capacity(n.get().min(1024));
    for record in reader.records().take(n.get()) {
        let record = record.map_err(|err| csv_error(path, err))?;
        rows.push(to_row(&record));
    }

    Ok(RowWindow { columns, rows })
}

pub fn read_tail(
    path: &Path,
    n: NonZeroUsize,
    options: &ReadOptions,
) -> Result<RowWindow, ReadError> {
    let columns = read_columns(path, options)?;

    let mut file = open(path)?;
    let offset = tail_offset(&mut file, n.get()).map_err(|err| ReadError::io(path, err))?;
    debug!("CSV tail of {} lines starts at byte {}", n, offset);
    file.seek(SeekFrom::Start(offset))
        .map_err(|err| ReadError::io(path, err))?;

    let mut reader = reader_builder(options)
        .has_headers(false)
        .from_reader(file);
    let mut records = reader.records();

    // Reaching the start of the file brings the header line into the window.
    if offset == 0 && options.has_header {
        if let Some(header) = records.next() {
            header.map_err(|err| csv_error(path, err))?;
        }
    }

    let mut rows = VecDeque::with_capacity(n.get().min(1024));
    for record in records {
        let record = record.map_err(|err| csv_error(path, err))?;
        if rows.len() == n.get() {
            rows.pop_front();
        }
        rows.push_back(to_row(&record));
    }

    Ok(RowWindow {
        columns,
        rows: rows.into_iter().collect(),
    })
}

/// Scans backward from the end of `input` and returns the byte offset where
/// the last `lines` non-blank records begin, or 0 when the input holds fewer.
///
/// A line break only ends a record when an even number of quote bytes follow
/// it, so breaks inside quoted fields are skipped. Escaped `""` pairs keep the
/// count even.
fn tail_offset<R: Read + Seek>(input: &mut R, lines: usize) -> io::Result<u64> {
    let len = input.seek(SeekFrom::End(0))?;
    let mut block = [0u8; BLOCK_SIZE];
    let mut pos = len;
    let mut seen = 0;
    let mut quotes = 0u64;
    // Whether the line after the most recent terminator has any content.
    let mut has_content = false;

    while pos > 0 {
        let size = BLOCK_SIZE.min(pos as usize);
        pos -= size as u64;
        input.seek(SeekFrom::Start(pos))?;
        input.read_exact(&mut block[..size])?;

        for (i, &byte) in block[..size].iter().enumerate().rev() {
            match byte {
                b'"' => {
                    quotes += 1;
                    has_content = true;
                }
                b'\n' if quotes % 2 == 0 => {
                    if has_content {
                        seen += 1;
                        if seen == lines {
                            return Ok(pos + i as u64 + 1);
                        }
                    }
                    has_content = false;
                }
                b'\r' => {}
                _ => has_content = true,
            }
        }
    }

    Ok(0)
}
