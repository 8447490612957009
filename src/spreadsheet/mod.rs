//! # Spreadsheet Ingestion Module
//!
//! Turns the bytes of an uploaded file into named tables. Delimited text yields a single
//! table named after the file; workbooks (`.xlsx`, `.xlsm`, `.xls`) yield one table per
//! tab. A workbook fails only when none of its tabs produced a table: empty or broken
//! tabs are skipped with a warning.

pub(crate) mod cell;
pub(crate) mod criteria;
pub(crate) mod delimited;
pub(crate) mod excel;
pub(crate) mod reference;
pub(crate) mod sheet;
pub mod xls;
pub(crate) mod xlsx;

use crate::error::SheetPushError;
use crate::helpers::reader::SourceFile;
use crate::spreadsheet::criteria::Criteria;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::xls::XlsSpreadsheet;
use crate::spreadsheet::xlsx::XlsxSpreadsheet;
use crate::table::Table;
use crate::upload::naming::sanitize_sheet_name;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Custom error types for spreadsheet operations.
#[derive(Error, Debug)]
pub enum SpreadsheetError {
    /// Workbook is encrypted and cannot be read without its password
    #[error("Workbook '{0}' is password protected")]
    PasswordProtected(String),

    /// Workbook declares no worksheet
    #[error("Workbook '{0}' contains no worksheet")]
    Empty(String),

    /// A part or stream the workbook refers to is missing
    #[error("Missing workbook part '{0}'")]
    FileError(String),

    /// Every tab was empty, filtered out or unreadable
    #[error("No table could be read from '{0}'")]
    NoTables(String),

    /// A cell reference that is not of the `A1` form
    #[error("Invalid cell reference '{0}'")]
    InvalidReference(String),

    /// A cell placed beyond the last row or column of a worksheet
    #[error("Cell at {0} lies outside the worksheet grid")]
    CellOutOfRange(String),

    /// Used area of a tab larger than a spreadsheet can hold
    #[error("Tab spans {0} cells, more than a spreadsheet holds")]
    TooManyCells(usize),
}

/// Cells a destination spreadsheet holds across all of its worksheets.
pub(crate) const MAX_GRID_CELLS: usize = 10_000_000;

/// Supported input formats, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Csv,
    Xlsx,
    Xls,
}

impl FileFormat {
    /// Detects the format from a file name's extension, case-insensitively.
    pub fn from_file_name(file_name: &str) -> Option<FileFormat> {
        let extension = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "csv" => Some(FileFormat::Csv),
            "xlsx" | "xlsm" => Some(FileFormat::Xlsx),
            "xls" => Some(FileFormat::Xls),
            _ => None,
        }
    }
}

/// Tables extracted from one source file, in tab order.
#[derive(Debug, Default)]
pub struct Workbook {
    pub tables: Vec<Table>,
    /// Tabs that were skipped and why
    pub warnings: Vec<String>,
}

/// Common interface of the workbook readers.
pub(crate) trait Spreadsheet {
    fn name(&self) -> &str;

    /// Tab names in workbook order
    fn sheet_names(&self) -> Vec<String>;

    /// Shared string table the cells of `read_sheet` index into
    fn shared_strings(&self) -> &[String];

    fn read_sheet(&mut self, index: usize) -> Result<Sheet, SheetPushError>;
}

/// Reads every accepted tab of a workbook into a table named after the sanitized tab name.
pub(crate) fn read_workbook(spreadsheet: &mut dyn Spreadsheet, criteria: &Criteria) -> Result<Workbook, SheetPushError> {
    let mut workbook = Workbook::default();
    for (index, sheet_name) in spreadsheet.sheet_names().into_iter().enumerate() {
        if !criteria.accept(&sheet_name) {
            debug!(file = spreadsheet.name(), sheet = sheet_name.as_str(), "Tab filtered out");
            continue;
        }
        let table = spreadsheet
            .read_sheet(index)
            .and_then(|sheet| sheet.into_table(&sanitize_sheet_name(&sheet_name), spreadsheet.shared_strings()));
        match table {
            Ok(Some(table)) => {
                debug!(sheet = sheet_name.as_str(), rows = table.row_count(), columns = table.column_count(), "Read tab");
                workbook.tables.push(table);
            }
            Ok(None) => {
                warn!(file = spreadsheet.name(), sheet = sheet_name.as_str(), "Skipping empty tab");
                workbook.warnings.push(format!("Tab '{sheet_name}' is empty"));
            }
            Err(e) => {
                warn!(file = spreadsheet.name(), sheet = sheet_name.as_str(), error = %e, "Skipping unreadable tab");
                workbook.warnings.push(format!("Tab '{sheet_name}' could not be read: {e}"));
            }
        }
    }
    if workbook.tables.is_empty() {
        Err(SpreadsheetError::NoTables(spreadsheet.name().to_owned()))?
    }
    Ok(workbook)
}

/// Extracts the tables of a source file.
///
/// `sheet_patterns` are glob patterns selecting workbook tabs; they do not apply to CSV.
/// Every failure is reported as `UnreadableFile` naming the file.
pub fn ingest(source: &SourceFile, sheet_patterns: &[String]) -> Result<Workbook, SheetPushError> {
    let criteria = Criteria::new(sheet_patterns)?;
    let result = match source.format {
        FileFormat::Csv => delimited::read_table(&source.bytes, source.stem()).map(|table| Workbook {
            tables: vec![table],
            warnings: Vec::new(),
        }),
        FileFormat::Xlsx => XlsxSpreadsheet::open(&source.file_name, &source.bytes)
            .and_then(|mut spreadsheet| read_workbook(&mut spreadsheet, &criteria)),
        FileFormat::Xls => XlsSpreadsheet::open(&source.file_name, &source.bytes)
            .and_then(|mut spreadsheet| read_workbook(&mut spreadsheet, &criteria)),
    };
    match result {
        Ok(workbook) => {
            info!(file = source.file_name.as_str(), tables = workbook.tables.len(), "Ingested file");
            Ok(workbook)
        }
        Err(SheetPushError::UnreadableFile(_, message)) => Err(SheetPushError::UnreadableFile(source.file_name.clone(), message)),
        Err(e) => Err(SheetPushError::UnreadableFile(source.file_name.clone(), e.to_string())),
    }
}
