//! # sheet_push
//!
//! Uploads tabular files into Google Sheets.
//!
//! ## Features
//!
//! - **Input formats**: delimited text (`.csv`, with encoding and delimiter detection),
//!   Excel 2007+ (`.xlsx`, `.xlsm`) and Excel 97-2003 (`.xls`) workbooks, one table per tab
//! - **Cleaning**: null markers, empty rows and columns, unique and bounded column names,
//!   optional numeric and date normalization
//! - **Batched writes**: rows are written in fixed-size batches with a pause between them,
//!   and every table upload is retried with exponential backoff on transient errors
//! - **Large tables**: split over several worksheets named `<name>_Part_<i>_of_<n>`
//! - **Formatting and sharing**: frozen and bold header, auto-sized columns, processing
//!   timestamp, sharing with one email address
//!
//! ## Pipeline
//!
//! [`SourceFile`] loads and validates a file, [`spreadsheet::ingest`] extracts its tables,
//! [`table::cleaner::clean`] normalizes each one and [`upload::orchestrator::run`] sends them
//! to one destination spreadsheet through a [`SheetService`]. [`session::run`] chains these
//! for several files.

pub mod error;
pub(crate) mod helpers;
pub mod remote;
pub mod session;
pub mod spreadsheet;
pub mod table;
pub mod upload;
pub mod validation;

pub use crate::error::SheetPushError;
pub use crate::helpers::reader::SourceFile;
pub use crate::remote::credential::CredentialFile;
pub use crate::remote::google::GoogleSheetsClient;
pub use crate::remote::memory::MemorySheetClient;
pub use crate::remote::RemoteError;
pub use crate::remote::SheetService;
pub use crate::session::SessionReport;
pub use crate::spreadsheet::FileFormat;
pub use crate::spreadsheet::Workbook;
pub use crate::table::Table;
pub use crate::table::Value;
pub use crate::upload::Pacing;
pub use crate::upload::UploadOptions;
pub use crate::upload::UploadResult;
pub use crate::upload::WorkbookReport;
