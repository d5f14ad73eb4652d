//! Streaming `.xlsx` reader.
//!
//! Cells are pulled one at a time from the worksheet XML through calamine's
//! cell reader, so a sheet is never materialized as a whole range. Rows are
//! assembled from consecutive cells sharing a row index. Rows the sheet XML
//! leaves out (blank rows) are yielded as empty rows, so row positions match
//! the document up to its last non-blank row.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use calamine::{open_workbook, DataRef, Reader, Xlsx};
use sheetfind_common::{Result, SheetFindError};
use tracing::debug;

use crate::source::{RowIter, RowSource};

/// [`RowSource`] over an `.xlsx` workbook on disk.
pub struct XlsxRowStream {
    workbook: Xlsx<BufReader<File>>,
    sheet_names: Vec<String>,
}

impl std::fmt::Debug for XlsxRowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XlsxRowStream")
            .field("sheet_names", &self.sheet_names)
            .finish()
    }
}

impl XlsxRowStream {
    /// Opens the workbook and reads its sheet list.
    ///
    /// # Errors
    ///
    /// Returns [`SheetFindError::Parse`] if the file is missing or is not a
    /// readable `.xlsx` container.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let workbook: Xlsx<_> = open_workbook(path).map_err(|e| {
            SheetFindError::Parse(format!("Cannot open '{}': {}", path.display(), e))
        })?;
        let sheet_names = workbook.sheet_names();
        debug!(path = %path.display(), sheets = sheet_names.len(), "Opened workbook");
        Ok(Self {
            workbook,
            sheet_names,
        })
    }
}

impl RowSource for XlsxRowStream {
    fn sheet_names(&self) -> Vec<String> {
        self.sheet_names.clone()
    }

    fn rows(&mut self, sheet: &str) -> Result<RowIter<'_>> {
        let mut reader = self
            .workbook
            .worksheet_cells_reader(sheet)
            .map_err(|e| SheetFindError::Parse(format!("Cannot read sheet '{}': {}", sheet, e)))?;

        let sheet = sheet.to_string();
        // First cell of the next row, read while finishing the current one.
        let mut pending: Option<(u32, u32, String)> = None;
        // Index of the next row to yield.
        let mut next_row: u32 = 0;
        // Set once the reader is exhausted or has failed; it is not polled again.
        let mut done = false;

        let rows = std::iter::from_fn(move || {
            if done {
                return None;
            }

            let (row, col, value) = match pending.take() {
                Some(cell) => cell,
                None => match reader.next_cell() {
                    Ok(Some(cell)) => {
                        let (row, col) = cell.get_position();
                        (row, col, render_cell(cell.get_value()))
                    }
                    Ok(None) => {
                        done = true;
                        return None;
                    }
                    Err(e) => {
                        done = true;
                        return Some(Err(read_error(&sheet, e)));
                    }
                },
            };

            if row > next_row {
                next_row += 1;
                pending = Some((row, col, value));
                return Some(Ok(Vec::new()));
            }
            next_row = row + 1;

            let mut cells = Vec::new();
            place_cell(&mut cells, col, value);

            loop {
                match reader.next_cell() {
                    Ok(Some(cell)) => {
                        let (cell_row, cell_col) = cell.get_position();
                        let value = render_cell(cell.get_value());
                        if cell_row != row {
                            pending = Some((cell_row, cell_col, value));
                            break;
                        }
                        place_cell(&mut cells, cell_col, value);
                    }
                    Ok(None) => {
                        done = true;
                        break;
                    }
                    Err(e) => {
                        done = true;
                        return Some(Err(read_error(&sheet, e)));
                    }
                }
            }

            Some(Ok(cells))
        });

        Ok(Box::new(rows))
    }
}

fn read_error(sheet: &str, err: calamine::XlsxError) -> SheetFindError {
    SheetFindError::Parse(format!("Cell read failed in sheet '{}': {}", sheet, err))
}

/// Puts `value` at column `col`, padding skipped columns with empty cells.
fn place_cell(cells: &mut Vec<String>, col: u32, value: String) {
    let col = col as usize;
    if cells.len() < col {
        cells.resize(col, String::new());
    }
    if cells.len() == col {
        cells.push(value);
    } else {
        cells[col] = value;
    }
}

/// Renders a cell the way it reads in a spreadsheet application.
pub(crate) fn render_cell(value: &DataRef<'_>) -> String {
    match value {
        DataRef::Int(i) => i.to_string(),
        DataRef::Float(f) => render_float(*f),
        DataRef::String(s) => s.clone(),
        DataRef::SharedString(s) => (*s).to_string(),
        DataRef::Bool(true) => "TRUE".to_string(),
        DataRef::Bool(false) => "FALSE".to_string(),
        DataRef::DateTime(dt) => {
            if dt.is_duration() {
                render_float(dt.as_f64())
            } else {
                match dt.as_datetime() {
                    Some(datetime) if datetime.time() == chrono::NaiveTime::MIN => {
                        datetime.format("%Y-%m-%d").to_string()
                    }
                    Some(datetime) => datetime.format("%Y-%m-%dT%H:%M:%S").to_string(),
                    None => render_float(dt.as_f64()),
                }
            }
        }
        DataRef::DateTimeIso(s) | DataRef::DurationIso(s) => s.clone(),
        DataRef::Error(e) => e.to_string(),
        DataRef::Empty => String::new(),
    }
}

fn render_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}
