use std::ffi::OsStr;
use std::fs::File;
use std::io::BufReader;
use std::num::NonZeroUsize;
use std::path::Path;

use calamine::{open_workbook, open_workbook_auto, Data, DataRef, Dimensions, Range, Reader, Xlsx, XlsxError};
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use tracing::debug;

use super::{FileFormat, ReadError, RowWindow};

type Workbook = Xlsx<BufReader<File>>;

/// Where the table sits on the first worksheet. The first non-empty row is
/// the header; every row below it up to the last used row is data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Extent {
    header_row: u32,
    first_col: u32,
    width: usize,
    data_rows: usize,
}

impl Extent {
    /// `None` when the sheet carries no usable dimension record.
    fn from_dimensions(dims: &Dimensions) -> Option<Self> {
        if dims.start == dims.end {
            return None;
        }
        Some(Self::from_bounds(dims.start, dims.end))
    }

    fn from_bounds(start: (u32, u32), end: (u32, u32)) -> Self {
        Extent {
            header_row: start.0,
            first_col: start.1,
            width: (end.1 - start.1) as usize + 1,
            data_rows: (end.0 - start.0) as usize,
        }
    }

    /// Returns `(skip, len)` for the last `n` data rows.
    fn tail_band(&self, n: usize) -> (usize, usize) {
        let skip = self.data_rows.saturating_sub(n);
        (skip, self.data_rows - skip)
    }
}

/// Collects the header row and a contiguous band of data rows.
struct Band {
    extent: Extent,
    first_row: u32,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Band {
    fn new(extent: Extent, skip: usize, len: usize) -> Self {
        Band {
            extent,
            first_row: extent.header_row + 1 + skip as u32,
            header: vec![String::new(); extent.width],
            rows: vec![vec![String::new(); extent.width]; len],
        }
    }

    /// Whether `row` lies below the band, so no later cell can land in it.
    fn is_past(&self, row: u32) -> bool {
        row >= self.first_row + self.rows.len() as u32
    }

    fn slot(&mut self, row: u32, col: u32) -> Option<&mut String> {
        let col = col.checked_sub(self.extent.first_col)? as usize;
        if row == self.extent.header_row {
            self.header.get_mut(col)
        } else {
            let idx = row.checked_sub(self.first_row)? as usize;
            self.rows.get_mut(idx)?.get_mut(col)
        }
    }

    fn into_window(self) -> RowWindow {
        let columns = self
            .header
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                if name.is_empty() {
                    format!("Unnamed: {i}")
                } else {
                    name
                }
            })
            .collect();
        RowWindow {
            columns,
            rows: self.rows,
        }
    }
}

/// Date cells print as `YYYY-MM-DD`, with the time appended when it is not
/// midnight. Durations keep their raw serial.
fn render(value: &Data) -> String {
    match value {
        Data::String(s) => s.clone(),
        Data::Empty => String::new(),
        Data::DateTime(stamp) if stamp.is_datetime() => stamp
            .as_datetime()
            .map(format_datetime)
            .unwrap_or_else(|| stamp.to_string()),
        Data::DateTimeIso(text) => text
            .parse::<NaiveDateTime>()
            .map(format_datetime)
            .or_else(|_| text.parse::<NaiveDate>().map(|date| date.to_string()))
            .unwrap_or_else(|_| text.clone()),
        other => other.to_string(),
    }
}

fn format_datetime(stamp: NaiveDateTime) -> String {
    if stamp.num_seconds_from_midnight() == 0 {
        stamp.format("%Y-%m-%d").to_string()
    } else {
        stamp.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

fn render_ref(value: &DataRef<'_>) -> String {
    render(&Data::from(value.clone()))
}

fn xlsx_error(path: &Path, err: XlsxError) -> ReadError {
    match err {
        XlsxError::Io(source) => ReadError::io(path, source),
        other => ReadError::mismatch(path, FileFormat::Excel, other.to_string()),
    }
}

fn calamine_error(path: &Path, err: calamine::Error) -> ReadError {
    match err {
        calamine::Error::Io(source) => ReadError::io(path, source),
        other => ReadError::mismatch(path, FileFormat::Excel, other.to_string()),
    }
}

/// Open XML workbooks can be streamed cell by cell; older containers cannot.
fn is_streamable(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map_or(false, |ext| ext.eq_ignore_ascii_case("xlsx"))
}

fn open_xlsx(path: &Path) -> Result<(Workbook, String), ReadError> {
    let workbook: Workbook = open_workbook(path).map_err(|err| xlsx_error(path, err))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| ReadError::mismatch(path, FileFormat::Excel, "workbook has no worksheets"))?;
    Ok((workbook, sheet))
}

/// Streams every cell once, tracking only the bounds of the non-empty ones.
fn scan_extent(path: &Path) -> Result<Option<Extent>, ReadError> {
    let (mut workbook, sheet) = open_xlsx(path)?;
    let mut cells = workbook
        .worksheet_cells_reader(&sheet)
        .map_err(|err| xlsx_error(path, err))?;

    let mut bounds: Option<((u32, u32), (u32, u32))> = None;
    while let Some(cell) = cells.next_cell().map_err(|err| xlsx_error(path, err))? {
        if let DataRef::Empty = cell.get_value() {
            continue;
        }
        let (row, col) = cell.get_position();
        bounds = Some(match bounds {
            None => ((row, col), (row, col)),
            Some((start, end)) => (
                (start.0.min(row), start.1.min(col)),
                (end.0.max(row), end.1.max(col)),
            ),
        });
    }

    Ok(bounds.map(|(start, end)| Extent::from_bounds(start, end)))
}

/// First pass of a tail read: the sheet extent, without materializing rows.
fn sheet_extent(path: &Path) -> Result<Option<Extent>, ReadError> {
    let dims = {
        let (mut workbook, sheet) = open_xlsx(path)?;
        let cells = workbook
            .worksheet_cells_reader(&sheet)
            .map_err(|err| xlsx_error(path, err))?;
        let dims = cells.dimensions();
        dims
    };

    match Extent::from_dimensions(&dims) {
        Some(extent) => Ok(Some(extent)),
        None => scan_extent(path),
    }
}

/// Streams the first worksheet, keeping the header and the band picked by
/// `select` from the sheet extent.
fn stream_band(
    path: &Path,
    known: Option<Extent>,
    select: impl FnOnce(&Extent) -> (usize, usize),
) -> Result<RowWindow, ReadError> {
    let (mut workbook, sheet) = open_xlsx(path)?;
    let mut cells = workbook
        .worksheet_cells_reader(&sheet)
        .map_err(|err| xlsx_error(path, err))?;

    let extent = match known.or_else(|| Extent::from_dimensions(&cells.dimensions())) {
        Some(extent) => extent,
        None => match scan_extent(path)? {
            Some(extent) => extent,
            None => return Ok(RowWindow::default()),
        },
    };
    let (skip, len) = select(&extent);
    debug!("Sheet {:?} extent {:?}, reading {} rows after {}", sheet, extent, len, skip);

    let mut band = Band::new(extent, skip, len);
    while let Some(cell) = cells.next_cell().map_err(|err| xlsx_error(path, err))? {
        let (row, col) = cell.get_position();
        if band.is_past(row) {
            break;
        }
        if let Some(slot) = band.slot(row, col) {
            *slot = render_ref(cell.get_value());
        }
    }

    Ok(band.into_window())
}

fn load_range(path: &Path) -> Result<Range<Data>, ReadError> {
    let mut workbook = open_workbook_auto(path).map_err(|err| calamine_error(path, err))?;
    workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ReadError::mismatch(path, FileFormat::Excel, "workbook has no worksheets"))?
        .map_err(|err| calamine_error(path, err))
}

fn range_extent(range: &Range<Data>) -> Option<Extent> {
    if range.is_empty() {
        return None;
    }
    Some(Extent {
        header_row: 0,
        first_col: 0,
        width: range.width(),
        data_rows: range.height() - 1,
    })
}

fn slice_range(range: &Range<Data>, select: impl FnOnce(&Extent) -> (usize, usize)) -> RowWindow {
    let extent = match range_extent(range) {
        Some(extent) => extent,
        None => return RowWindow::default(),
    };
    let (skip, len) = select(&extent);

    let mut band = Band::new(extent, skip, len);
    for (row, cells) in range.rows().enumerate() {
        let row = row as u32;
        if band.is_past(row) {
            break;
        }
        for (col, value) in cells.iter().enumerate() {
            if let Some(slot) = band.slot(row, col as u32) {
                *slot = render(value);
            }
        }
    }

    band.into_window()
}

pub fn read_head(path: &Path, n: NonZeroUsize) -> Result<RowWindow, ReadError> {
    let n = n.get();
    if is_streamable(path) {
        stream_band(path, None, |extent| (0, extent.data_rows.min(n)))
    } else {
        let range = load_range(path)?;
        Ok(slice_range(&range, |extent| (0, extent.data_rows.min(n))))
    }
}

/// Two passes for xlsx: one for the extent, one for the tail band.
pub fn read_tail(path: &Path, n: NonZeroUsize) -> Result<RowWindow, ReadError> {
    let n = n.get();
    if is_streamable(path) {
        let extent = match sheet_extent(path)? {
            Some(extent) => extent,
            None => return Ok(RowWindow::default()),
        };
        stream_band(path, Some(extent), |extent| extent.tail_band(n))
    } else {
        let range = load_range(path)?;
        Ok(slice_range(&range, |extent| extent.tail_band(n)))
    }
}

/// Column names and data row count of the first worksheet.
pub fn describe(path: &Path) -> Result<(Vec<String>, Option<u64>), ReadError> {
    if is_streamable(path) {
        let extent = sheet_extent(path)?;
        let window = stream_band(path, extent, |_| (0, 0))?;
        let rows = extent.map_or(0, |extent| extent.data_rows as u64);
        Ok((window.columns, Some(rows)))
    } else {
        let range = load_range(path)?;
        let rows = range_extent(&range).map_or(0, |extent| extent.data_rows as u64);
        Ok((slice_range(&range, |_| (0, 0)).columns, Some(rows)))
    }
}
