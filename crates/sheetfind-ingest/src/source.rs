//! Row sources: sheet-by-sheet, forward-only row iteration.
//!
//! A source is a faithful projection of the document. Blank rows are yielded
//! like any other row; deciding what is worth storing belongs to the pipeline.

use sheetfind_common::Result;

/// Lazy sequence of rows for one sheet. Each row is its cells in column order.
///
/// The iterator borrows its source, so whatever it holds open for the sheet
/// is released when it is dropped, including when consumption stops early.
pub type RowIter<'a> = Box<dyn Iterator<Item = Result<Vec<String>>> + 'a>;

/// A spreadsheet document that can be read one sheet at a time.
pub trait RowSource {
    /// Sheet names in document order.
    fn sheet_names(&self) -> Vec<String>;

    /// Opens `sheet` for reading.
    ///
    /// # Errors
    ///
    /// Returns [`sheetfind_common::SheetFindError::Parse`] when the sheet
    /// cannot be enumerated. An `Err` item from the iterator is also a parse
    /// failure: the reader cannot resume after it.
    fn rows(&mut self, sheet: &str) -> Result<RowIter<'_>>;
}

/// An in-memory workbook, used for tests and for callers that already hold
/// their rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryWorkbook {
    sheets: Vec<(String, Vec<Vec<String>>)>,
}

impl MemoryWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sheet after the existing ones.
    pub fn with_sheet<R, C>(mut self, name: impl Into<String>, rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(Into::into).collect())
            .collect();
        self.sheets.push((name.into(), rows));
        self
    }

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }
}

impl RowSource for MemoryWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.clone()).collect()
    }

    fn rows(&mut self, sheet: &str) -> Result<RowIter<'_>> {
        let rows = self
            .sheets
            .iter()
            .find(|(name, _)| name == sheet)
            .map(|(_, rows)| rows)
            .ok_or_else(|| {
                sheetfind_common::SheetFindError::Parse(format!("Sheet '{}' not found", sheet))
            })?;
        Ok(Box::new(rows.iter().cloned().map(Ok)))
    }
}
