//! Pushing cleaned tables into remote worksheets.

pub mod batch;
pub mod naming;
pub mod orchestrator;
pub mod retry;

use crate::upload::retry::RetryPolicy;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;

/// Access level granted when sharing a spreadsheet
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    #[default]
    Writer,
    Reader,
    Commenter,
}

impl Permission {
    /// Drive API role name
    pub fn role(&self) -> &'static str {
        match self {
            Permission::Writer => "writer",
            Permission::Reader => "reader",
            Permission::Commenter => "commenter",
        }
    }
}

/// How the destination spreadsheet is titled
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NamingConvention {
    /// The base name unchanged
    #[default]
    Original,
    /// `<base>_YYYYMMDD_HHMMSS` in local time
    Timestamped,
    /// `<base>_<first 8 hex digits of the source SHA-256>`
    Hashed,
    /// `<prefix>_<base>`
    Prefixed,
}

/// Settings chosen once per run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadOptions {
    pub share_email: Option<String>,
    pub permission: Permission,
    pub notify: bool,
    /// Data rows per write call
    pub batch_size: usize,
    pub auto_resize_columns: bool,
    pub freeze_header: bool,
    pub bold_header: bool,
    pub append_timestamp: bool,
    pub remove_empty_rows: bool,
    pub remove_empty_cols: bool,
    pub convert_data_types: bool,
    pub naming: NamingConvention,
    pub name_prefix: Option<String>,
    /// Base for the spreadsheet title instead of the file stem
    pub spreadsheet_name: Option<String>,
    /// Existing spreadsheet to write into, found by title
    pub target_spreadsheet: Option<String>,
    /// Larger tables are split over several worksheets
    pub max_rows_per_sheet: usize,
    /// Glob patterns selecting workbook tabs; empty means all
    pub sheet_patterns: Vec<String>,
    pub null_markers: Vec<String>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        UploadOptions {
            share_email: None,
            permission: Permission::Writer,
            notify: true,
            batch_size: 1000,
            auto_resize_columns: true,
            freeze_header: true,
            bold_header: true,
            append_timestamp: false,
            remove_empty_rows: true,
            remove_empty_cols: false,
            convert_data_types: false,
            naming: NamingConvention::Original,
            name_prefix: None,
            spreadsheet_name: None,
            target_spreadsheet: None,
            max_rows_per_sheet: 100_000,
            sheet_patterns: Vec::new(),
            null_markers: ["NA", "N/A", "NaN", "nan", "NULL", "null", "None", "#N/A"]
                .map(str::to_owned)
                .to_vec(),
        }
    }
}

/// Delays between remote calls.
#[derive(Clone, Debug, PartialEq)]
pub struct Pacing {
    pub retry: RetryPolicy,
    /// Pause between two batch writes
    pub throttle: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing {
            retry: RetryPolicy::default(),
            throttle: Duration::from_secs(1),
        }
    }
}

impl Pacing {
    /// No waiting at all, for dry runs and tests
    pub fn immediate() -> Self {
        Pacing {
            retry: RetryPolicy::immediate(),
            throttle: Duration::ZERO,
        }
    }
}

/// Reported once per batch written.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchProgress {
    pub worksheet: String,
    /// 1-based batch number
    pub batch: usize,
    pub batches: usize,
    pub rows_written: usize,
    pub total_rows: usize,
    pub attempt: u32,
}

/// Outcome of uploading one table (or one part of a split table).
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UploadResult {
    pub table_name: String,
    pub worksheet_title: String,
    pub success: bool,
    pub remote_url: Option<String>,
    pub rows_written: usize,
    pub attempts: u32,
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

/// Outcome of uploading every table of one source file.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct WorkbookReport {
    pub source: String,
    pub spreadsheet_title: String,
    pub spreadsheet_url: Option<String>,
    pub results: Vec<UploadResult>,
    pub warnings: Vec<String>,
}

impl WorkbookReport {
    pub fn success(&self) -> bool {
        self.spreadsheet_url.is_some() && self.results.iter().all(|result| result.success)
    }

    pub fn rows_written(&self) -> usize {
        self.results.iter().map(|result| result.rows_written).sum()
    }
}
