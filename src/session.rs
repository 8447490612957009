//! One run over several input files: load, ingest, clean and upload each in turn.
//!
//! A file that cannot be loaded or parsed is recorded as failed and the run moves on to
//! the next one. Only invalid options stop a run before it starts.

use crate::error::SheetPushError;
use crate::helpers::reader::SourceFile;
use crate::remote::SheetService;
use crate::spreadsheet;
use crate::table::cleaner;
use crate::table::Table;
use crate::upload::orchestrator;
use crate::upload::BatchProgress;
use crate::upload::Pacing;
use crate::upload::UploadOptions;
use crate::upload::WorkbookReport;
use crate::validation;
use serde::Serialize;
use tracing::error;
use tracing::info;
use tracing::info_span;

/// Outcome for one input file
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FileReport {
    pub source: String,
    /// Present once the file reached the upload stage
    pub workbook: Option<WorkbookReport>,
    /// Why the file never reached the upload stage
    pub error: Option<String>,
    /// Tabs skipped during ingestion
    pub warnings: Vec<String>,
}

impl FileReport {
    pub fn success(&self) -> bool {
        self.error.is_none() && self.workbook.as_ref().is_some_and(WorkbookReport::success)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SessionReport {
    pub files: Vec<FileReport>,
}

impl SessionReport {
    /// True when every file and every table went through
    pub fn success(&self) -> bool {
        !self.files.is_empty() && self.files.iter().all(FileReport::success)
    }

    pub fn spreadsheet_urls(&self) -> Vec<&str> {
        self.files
            .iter()
            .filter_map(|file| file.workbook.as_ref()?.spreadsheet_url.as_deref())
            .collect()
    }
}

/// First rows of a cleaned table
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TablePreview {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub total_rows: usize,
}

/// Uploads every file in `locations` (paths or URLs) in order.
pub fn run<S: SheetService + ?Sized>(
    client: &mut S,
    locations: &[String],
    options: &UploadOptions,
    pacing: &Pacing,
    progress: &mut dyn FnMut(&BatchProgress),
) -> Result<SessionReport, SheetPushError> {
    validation::validate_options(options)?;
    let mut report = SessionReport::default();
    for location in locations {
        let _span = info_span!("file", source = location.as_str()).entered();
        let mut file = FileReport {
            source: location.clone(),
            ..FileReport::default()
        };
        match load(location, options) {
            Ok((source, tables, warnings)) => {
                file.warnings = warnings;
                let workbook = orchestrator::run(client, &source, tables, options, pacing, progress);
                info!(
                    spreadsheet = workbook.spreadsheet_title.as_str(),
                    rows = workbook.rows_written(),
                    success = workbook.success(),
                    "Finished file"
                );
                file.workbook = Some(workbook);
            }
            Err(e) => {
                error!("Skipping file: {}", e);
                file.error = Some(e.to_string());
            }
        }
        report.files.push(file);
    }
    Ok(report)
}

/// Cleans every table of a file and returns its first `limit` rows, without any remote call.
pub fn preview(location: &str, options: &UploadOptions, limit: usize) -> Result<Vec<TablePreview>, SheetPushError> {
    validation::validate_options(options)?;
    let (_, tables, _) = load(location, options)?;
    Ok(tables
        .into_iter()
        .map(|table| TablePreview {
            name: table.name.clone(),
            total_rows: table.row_count(),
            rows: table.text_rows().take(limit).collect(),
            columns: table.columns,
        })
        .collect())
}

fn load(location: &str, options: &UploadOptions) -> Result<(SourceFile, Vec<Table>, Vec<String>), SheetPushError> {
    let source = SourceFile::open(location)?;
    let workbook = spreadsheet::ingest(&source, &options.sheet_patterns)?;
    let tables = workbook
        .tables
        .into_iter()
        .map(|table| cleaner::clean(table, options))
        .collect();
    Ok((source, tables, workbook.warnings))
}
