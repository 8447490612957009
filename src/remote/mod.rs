//! The remote spreadsheet service the upload pipeline talks to.
//!
//! [`SheetService`] is the seam between the pipeline and a backend. The HTTP client for
//! Google Sheets and Drive lives in [`google`]; [`memory`] keeps everything in process for
//! dry runs and tests.

pub mod credential;
pub mod google;
pub mod memory;

use serde::Serialize;
use thiserror::Error;

/// Failures reported by a spreadsheet backend
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Rate limits, server errors and transport failures
    #[error("Transient remote error{}: {message}", status_suffix(.status))]
    Transient { status: Option<u16>, message: String },

    /// Bad requests, permission or quota refusals
    #[error("Remote error{}: {message}", status_suffix(.status))]
    Permanent { status: Option<u16>, message: String },

    #[error("Not found: {0}")]
    NotFound(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|status| format!(" (HTTP {status})")).unwrap_or_default()
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient { .. })
    }
}

/// A destination spreadsheet
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SpreadsheetHandle {
    pub id: String,
    pub url: String,
    pub title: String,
}

/// A worksheet (tab) inside a spreadsheet, with its grid size when last seen
#[derive(Clone, Debug, PartialEq)]
pub struct WorksheetHandle {
    pub spreadsheet_id: String,
    pub sheet_id: i64,
    pub title: String,
    pub rows: usize,
    pub cols: usize,
}

/// Text formatting applied to a range
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CellStyle {
    pub bold: bool,
}

/// Operations the pipeline needs from a spreadsheet backend.
/// Ranges are A1 strings relative to the given worksheet (`A1`, `A2:C11`).
pub trait SheetService {
    fn create_spreadsheet(&mut self, title: &str) -> Result<SpreadsheetHandle, RemoteError>;

    /// Finds a spreadsheet visible to the account by exact title.
    fn open_spreadsheet(&mut self, title: &str) -> Result<SpreadsheetHandle, RemoteError>;

    fn worksheets(&mut self, spreadsheet: &SpreadsheetHandle) -> Result<Vec<WorksheetHandle>, RemoteError>;

    fn worksheet(&mut self, spreadsheet: &SpreadsheetHandle, title: &str) -> Result<Option<WorksheetHandle>, RemoteError> {
        Ok(self
            .worksheets(spreadsheet)?
            .into_iter()
            .find(|worksheet| worksheet.title == title))
    }

    fn add_worksheet(
        &mut self,
        spreadsheet: &SpreadsheetHandle,
        title: &str,
        rows: usize,
        cols: usize,
    ) -> Result<WorksheetHandle, RemoteError>;

    fn rename_worksheet(&mut self, worksheet: &WorksheetHandle, title: &str) -> Result<WorksheetHandle, RemoteError>;

    fn resize_worksheet(&mut self, worksheet: &WorksheetHandle, rows: usize, cols: usize) -> Result<WorksheetHandle, RemoteError>;

    /// Removes every value from the worksheet.
    fn clear(&mut self, worksheet: &WorksheetHandle) -> Result<(), RemoteError>;

    /// Writes a block of values (raw, not parsed as formulas) into `range`.
    fn update_range(&mut self, worksheet: &WorksheetHandle, range: &str, values: &[Vec<String>]) -> Result<(), RemoteError>;

    fn freeze_rows(&mut self, worksheet: &WorksheetHandle, rows: usize) -> Result<(), RemoteError>;

    fn format_range(&mut self, worksheet: &WorksheetHandle, range: &str, style: &CellStyle) -> Result<(), RemoteError>;

    /// Fits the widths of the 0-based columns `[from, to)` to their content.
    fn auto_resize_columns(&mut self, worksheet: &WorksheetHandle, from: usize, to: usize) -> Result<(), RemoteError>;

    fn share(&mut self, spreadsheet: &SpreadsheetHandle, email: &str, role: &str, notify: bool) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_status_codes() {
        let error = RemoteError::Transient {
            status: Some(503),
            message: "backend unavailable".to_owned(),
        };
        assert_eq!(error.to_string(), "Transient remote error (HTTP 503): backend unavailable");
        let error = RemoteError::Permanent {
            status: None,
            message: "invalid range".to_owned(),
        };
        assert_eq!(error.to_string(), "Remote error: invalid range");
        assert!(!error.is_transient());
    }
}
