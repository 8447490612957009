//! In-process spreadsheet backend.
//!
//! Mirrors the behaviour of the real service closely enough for the pipeline: new
//! spreadsheets start with a 1000x26 `Sheet1`, writes outside the grid are refused,
//! worksheet titles must be unique. Faults can be injected per operation to exercise
//! retries and partial failures.

use crate::remote::CellStyle;
use crate::remote::RemoteError;
use crate::remote::SheetService;
use crate::remote::SpreadsheetHandle;
use crate::remote::WorksheetHandle;
use crate::table::range::Range;
use std::collections::BTreeMap;
use tracing::debug;

const DEFAULT_ROWS: usize = 1000;
const DEFAULT_COLS: usize = 26;

/// Remote operations, used to log calls and to target injected faults
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateSpreadsheet,
    OpenSpreadsheet,
    ListWorksheets,
    AddWorksheet,
    RenameWorksheet,
    ResizeWorksheet,
    Clear,
    UpdateRange,
    FreezeRows,
    FormatRange,
    AutoResizeColumns,
    Share,
}

/// One recorded call
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub operation: Operation,
    pub worksheet: Option<String>,
    pub range: Option<String>,
    /// Number of rows carried by an `UpdateRange`
    pub rows: usize,
}

struct Fault {
    operation: Operation,
    worksheet: Option<String>,
    remaining: usize,
    error: RemoteError,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryWorksheet {
    pub sheet_id: i64,
    pub title: String,
    pub rows: usize,
    pub cols: usize,
    /// Non-empty cells keyed by 0-based `(row, col)`
    pub cells: BTreeMap<(usize, usize), String>,
    pub frozen_rows: usize,
    pub bold_ranges: Vec<String>,
    pub auto_resized: Option<(usize, usize)>,
}

impl MemoryWorksheet {
    /// Cell values from `A1` to the last non-empty row and column.
    pub fn values(&self) -> Vec<Vec<String>> {
        let Some(last_row) = self.cells.keys().map(|(row, _)| *row).max() else {
            return Vec::new();
        };
        let last_col = self.cells.keys().map(|(_, col)| *col).max().unwrap_or(0);
        (0..=last_row)
            .map(|row| {
                (0..=last_col)
                    .map(|col| self.cells.get(&(row, col)).cloned().unwrap_or_default())
                    .collect()
            })
            .collect()
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.cells.get(&(row, col)).map(String::as_str)
    }
}

#[derive(Clone, Debug)]
pub struct MemorySpreadsheet {
    pub handle: SpreadsheetHandle,
    pub worksheets: Vec<MemoryWorksheet>,
    /// `(email, role, notify)` per share call
    pub permissions: Vec<(String, String, bool)>,
}

impl MemorySpreadsheet {
    pub fn worksheet(&self, title: &str) -> Option<&MemoryWorksheet> {
        self.worksheets.iter().find(|worksheet| worksheet.title == title)
    }
}

#[derive(Default)]
pub struct MemorySheetClient {
    spreadsheets: Vec<MemorySpreadsheet>,
    faults: Vec<Fault>,
    calls: Vec<Call>,
    next_id: usize,
}

impl MemorySheetClient {
    pub fn new() -> MemorySheetClient {
        MemorySheetClient::default()
    }

    /// Makes the next `times` calls of `operation` fail with `error`, optionally only
    /// for the worksheet titled `worksheet`.
    pub fn fail(&mut self, operation: Operation, worksheet: Option<&str>, times: usize, error: RemoteError) -> &mut Self {
        self.faults.push(Fault {
            operation,
            worksheet: worksheet.map(str::to_owned),
            remaining: times,
            error,
        });
        self
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    /// Ranges written to a worksheet, in call order.
    pub fn writes(&self, worksheet: &str) -> Vec<(String, usize)> {
        self.calls
            .iter()
            .filter(|call| call.operation == Operation::UpdateRange && call.worksheet.as_deref() == Some(worksheet))
            .filter_map(|call| call.range.clone().map(|range| (range, call.rows)))
            .collect()
    }

    pub fn spreadsheets(&self) -> &[MemorySpreadsheet] {
        &self.spreadsheets
    }

    pub fn spreadsheet(&self, title: &str) -> Option<&MemorySpreadsheet> {
        self.spreadsheets.iter().find(|spreadsheet| spreadsheet.handle.title == title)
    }

    fn record(&mut self, operation: Operation, worksheet: Option<&str>, range: Option<&str>, rows: usize) -> Result<(), RemoteError> {
        debug!(?operation, worksheet, range, rows, "Memory sheet call");
        self.calls.push(Call {
            operation,
            worksheet: worksheet.map(str::to_owned),
            range: range.map(str::to_owned),
            rows,
        });
        let fault = self.faults.iter_mut().find(|fault| {
            fault.remaining > 0
                && fault.operation == operation
                && fault.worksheet.as_deref().map(|title| Some(title) == worksheet).unwrap_or(true)
        });
        match fault {
            Some(fault) => {
                fault.remaining -= 1;
                Err(fault.error.clone())
            }
            None => Ok(()),
        }
    }

    fn book_mut(&mut self, id: &str) -> Result<&mut MemorySpreadsheet, RemoteError> {
        self.spreadsheets
            .iter_mut()
            .find(|spreadsheet| spreadsheet.handle.id == id)
            .ok_or_else(|| RemoteError::NotFound(format!("spreadsheet '{id}'")))
    }

    fn sheet_mut(&mut self, worksheet: &WorksheetHandle) -> Result<&mut MemoryWorksheet, RemoteError> {
        self.book_mut(&worksheet.spreadsheet_id)?
            .worksheets
            .iter_mut()
            .find(|sheet| sheet.sheet_id == worksheet.sheet_id)
            .ok_or_else(|| RemoteError::NotFound(format!("worksheet '{}'", worksheet.title)))
    }
}

fn handle(spreadsheet_id: &str, sheet: &MemoryWorksheet) -> WorksheetHandle {
    WorksheetHandle {
        spreadsheet_id: spreadsheet_id.to_owned(),
        sheet_id: sheet.sheet_id,
        title: sheet.title.clone(),
        rows: sheet.rows,
        cols: sheet.cols,
    }
}

fn bad_request(message: String) -> RemoteError {
    RemoteError::Permanent {
        status: Some(400),
        message,
    }
}

/// Resolves an A1 range against a grid, refusing anything outside it.
fn bounds(sheet: &MemoryWorksheet, range: &str) -> Result<Range, RemoteError> {
    let parsed = Range::try_from(range).map_err(|e| bad_request(e.to_string()))?;
    let resolved = Range {
        row_lower_bound: Some(parsed.row_lower_bound.unwrap_or(0)),
        row_upper_bound: Some(parsed.row_upper_bound.unwrap_or(sheet.rows.saturating_sub(1))),
        col_lower_bound: Some(parsed.col_lower_bound.unwrap_or(0)),
        col_upper_bound: Some(parsed.col_upper_bound.unwrap_or(sheet.cols.saturating_sub(1))),
    };
    let outside = resolved.row_upper_bound.map(|row| row >= sheet.rows).unwrap_or(false)
        || resolved.col_upper_bound.map(|col| col >= sheet.cols).unwrap_or(false);
    if outside {
        Err(bad_request(format!(
            "Range ('{}'!{range}) exceeds grid limits. Max rows: {}, max columns: {}",
            sheet.title, sheet.rows, sheet.cols
        )))
    } else {
        Ok(resolved)
    }
}

impl SheetService for MemorySheetClient {
    fn create_spreadsheet(&mut self, title: &str) -> Result<SpreadsheetHandle, RemoteError> {
        self.record(Operation::CreateSpreadsheet, None, None, 0)?;
        self.next_id += 1;
        let id = format!("memory-{}", self.next_id);
        let handle = SpreadsheetHandle {
            url: format!("memory://spreadsheets/{id}"),
            id,
            title: title.to_owned(),
        };
        self.spreadsheets.push(MemorySpreadsheet {
            handle: handle.clone(),
            worksheets: vec![MemoryWorksheet {
                sheet_id: 0,
                title: "Sheet1".to_owned(),
                rows: DEFAULT_ROWS,
                cols: DEFAULT_COLS,
                ..MemoryWorksheet::default()
            }],
            permissions: Vec::new(),
        });
        Ok(handle)
    }

    fn open_spreadsheet(&mut self, title: &str) -> Result<SpreadsheetHandle, RemoteError> {
        self.record(Operation::OpenSpreadsheet, None, None, 0)?;
        self.spreadsheet(title)
            .map(|spreadsheet| spreadsheet.handle.clone())
            .ok_or_else(|| RemoteError::NotFound(format!("spreadsheet titled '{title}'")))
    }

    fn worksheets(&mut self, spreadsheet: &SpreadsheetHandle) -> Result<Vec<WorksheetHandle>, RemoteError> {
        self.record(Operation::ListWorksheets, None, None, 0)?;
        let book = self.book_mut(&spreadsheet.id)?;
        Ok(book.worksheets.iter().map(|sheet| handle(&spreadsheet.id, sheet)).collect())
    }

    fn add_worksheet(&mut self, spreadsheet: &SpreadsheetHandle, title: &str, rows: usize, cols: usize) -> Result<WorksheetHandle, RemoteError> {
        self.record(Operation::AddWorksheet, Some(title), None, 0)?;
        let book = self.book_mut(&spreadsheet.id)?;
        if book.worksheet(title).is_some() {
            return Err(bad_request(format!("A sheet with the name \"{title}\" already exists")));
        }
        let sheet_id = book.worksheets.iter().map(|sheet| sheet.sheet_id).max().unwrap_or(0) + 1;
        let sheet = MemoryWorksheet {
            sheet_id,
            title: title.to_owned(),
            rows,
            cols,
            ..MemoryWorksheet::default()
        };
        let created = handle(&spreadsheet.id, &sheet);
        book.worksheets.push(sheet);
        Ok(created)
    }

    fn rename_worksheet(&mut self, worksheet: &WorksheetHandle, title: &str) -> Result<WorksheetHandle, RemoteError> {
        self.record(Operation::RenameWorksheet, Some(&worksheet.title), None, 0)?;
        let book = self.book_mut(&worksheet.spreadsheet_id)?;
        if worksheet.title != title && book.worksheet(title).is_some() {
            return Err(bad_request(format!("A sheet with the name \"{title}\" already exists")));
        }
        let sheet = self.sheet_mut(worksheet)?;
        sheet.title = title.to_owned();
        Ok(handle(&worksheet.spreadsheet_id, sheet))
    }

    fn resize_worksheet(&mut self, worksheet: &WorksheetHandle, rows: usize, cols: usize) -> Result<WorksheetHandle, RemoteError> {
        self.record(Operation::ResizeWorksheet, Some(&worksheet.title), None, 0)?;
        let sheet = self.sheet_mut(worksheet)?;
        sheet.rows = rows;
        sheet.cols = cols;
        sheet.cells.retain(|(row, col), _| *row < rows && *col < cols);
        Ok(handle(&worksheet.spreadsheet_id, sheet))
    }

    fn clear(&mut self, worksheet: &WorksheetHandle) -> Result<(), RemoteError> {
        self.record(Operation::Clear, Some(&worksheet.title), None, 0)?;
        self.sheet_mut(worksheet)?.cells.clear();
        Ok(())
    }

    fn update_range(&mut self, worksheet: &WorksheetHandle, range: &str, values: &[Vec<String>]) -> Result<(), RemoteError> {
        self.record(Operation::UpdateRange, Some(&worksheet.title), Some(range), values.len())?;
        let sheet = self.sheet_mut(worksheet)?;
        let bounds = bounds(sheet, range)?;
        let top = bounds.row_lower_bound.unwrap_or(0);
        let left = bounds.col_lower_bound.unwrap_or(0);
        let height = bounds.row_upper_bound.unwrap_or(top) + 1 - top;
        let width = bounds.col_upper_bound.unwrap_or(left) + 1 - left;
        if values.len() > height || values.iter().any(|row| row.len() > width) {
            return Err(bad_request(format!("Values do not fit range {range}")));
        }
        for (row_offset, row) in values.iter().enumerate() {
            for (col_offset, value) in row.iter().enumerate() {
                let key = (top + row_offset, left + col_offset);
                if value.is_empty() {
                    sheet.cells.remove(&key);
                } else {
                    sheet.cells.insert(key, value.clone());
                }
            }
        }
        Ok(())
    }

    fn freeze_rows(&mut self, worksheet: &WorksheetHandle, rows: usize) -> Result<(), RemoteError> {
        self.record(Operation::FreezeRows, Some(&worksheet.title), None, 0)?;
        self.sheet_mut(worksheet)?.frozen_rows = rows;
        Ok(())
    }

    fn format_range(&mut self, worksheet: &WorksheetHandle, range: &str, style: &CellStyle) -> Result<(), RemoteError> {
        self.record(Operation::FormatRange, Some(&worksheet.title), Some(range), 0)?;
        let sheet = self.sheet_mut(worksheet)?;
        bounds(sheet, range)?;
        if style.bold {
            sheet.bold_ranges.push(range.to_owned());
        }
        Ok(())
    }

    fn auto_resize_columns(&mut self, worksheet: &WorksheetHandle, from: usize, to: usize) -> Result<(), RemoteError> {
        self.record(Operation::AutoResizeColumns, Some(&worksheet.title), None, 0)?;
        self.sheet_mut(worksheet)?.auto_resized = Some((from, to));
        Ok(())
    }

    fn share(&mut self, spreadsheet: &SpreadsheetHandle, email: &str, role: &str, notify: bool) -> Result<(), RemoteError> {
        self.record(Operation::Share, None, None, 0)?;
        self.book_mut(&spreadsheet.id)?
            .permissions
            .push((email.to_owned(), role.to_owned(), notify));
        Ok(())
    }
}
