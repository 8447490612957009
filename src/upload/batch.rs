//! Writes one cleaned table into one worksheet.
//!
//! The worksheet is created, or cleared and resized when it already exists, then the
//! header goes to row 1 and the data rows follow in batches of `batch_size`, strictly in
//! order with a fixed pause between writes. A transient failure anywhere restarts the
//! whole upload under the retry policy; a permanent one ends it. Formatting, the
//! timestamp cell and sharing run only after the data is in place and can only add
//! warnings.

use crate::error::SheetPushError;
use crate::remote::CellStyle;
use crate::remote::SheetService;
use crate::remote::SpreadsheetHandle;
use crate::remote::WorksheetHandle;
use crate::table::range::Range;
use crate::table::Table;
use crate::upload::BatchProgress;
use crate::upload::Pacing;
use crate::upload::UploadOptions;
use crate::upload::UploadResult;
use chrono::Local;
use tracing::debug;
use tracing::info;
use tracing::warn;

/// Grids smaller than this cannot keep a frozen header row
const MIN_GRID_ROWS: usize = 2;

/// Where a table goes
#[derive(Clone, Debug, PartialEq)]
pub enum WorksheetTarget {
    /// A worksheet already resolved by the caller; it is cleared before writing
    Existing(WorksheetHandle),
    /// A worksheet looked up by title and created when missing
    Named(String),
}

impl WorksheetTarget {
    pub fn title(&self) -> &str {
        match self {
            WorksheetTarget::Existing(worksheet) => &worksheet.title,
            WorksheetTarget::Named(title) => title,
        }
    }
}

pub struct BatchUploader<'a> {
    options: &'a UploadOptions,
    pacing: &'a Pacing,
}

impl<'a> BatchUploader<'a> {
    pub fn new(options: &'a UploadOptions, pacing: &'a Pacing) -> BatchUploader<'a> {
        BatchUploader { options, pacing }
    }

    /// Uploads `table` and reports the outcome; errors end up in the result, never in a panic.
    /// With `share` set, the spreadsheet is shared with the configured address afterwards.
    pub fn upload<S: SheetService + ?Sized>(
        &self,
        client: &mut S,
        spreadsheet: &SpreadsheetHandle,
        table: &Table,
        target: WorksheetTarget,
        share: bool,
        progress: &mut dyn FnMut(&BatchProgress),
    ) -> UploadResult {
        let title = target.title().to_owned();
        let rows: Vec<Vec<String>> = table.text_rows().collect();
        info!(
            table = table.name.as_str(),
            worksheet = title.as_str(),
            rows = rows.len(),
            columns = table.column_count(),
            "Uploading table"
        );

        let mut rows_written = 0usize;
        let retried = self.pacing.retry.run(&format!("Upload of '{title}'"), |attempt| {
            rows_written = 0;
            self.write_table(client, spreadsheet, table, &rows, &target, attempt, &mut rows_written, progress)
        });

        let mut result = UploadResult {
            table_name: table.name.clone(),
            worksheet_title: title,
            attempts: retried.attempts,
            rows_written,
            ..UploadResult::default()
        };
        match retried.result {
            Ok(worksheet) => {
                result.success = true;
                result.remote_url = Some(format!("{}#gid={}", spreadsheet.url, worksheet.sheet_id));
                result.warnings = self.post_process(client, &worksheet, table);
                if share {
                    result.warnings.extend(share_spreadsheet(client, spreadsheet, self.options));
                }
                info!(
                    worksheet = result.worksheet_title.as_str(),
                    rows = result.rows_written,
                    attempts = result.attempts,
                    "Uploaded table"
                );
            }
            Err(error) => {
                warn!(
                    worksheet = result.worksheet_title.as_str(),
                    attempts = result.attempts,
                    "Upload failed: {}",
                    error
                );
                result.error = Some(error.to_string());
            }
        }
        result
    }

    /// One complete attempt: resolve the worksheet, write the header, then every batch.
    #[allow(clippy::too_many_arguments)]
    fn write_table<S: SheetService + ?Sized>(
        &self,
        client: &mut S,
        spreadsheet: &SpreadsheetHandle,
        table: &Table,
        rows: &[Vec<String>],
        target: &WorksheetTarget,
        attempt: u32,
        rows_written: &mut usize,
        progress: &mut dyn FnMut(&BatchProgress),
    ) -> Result<WorksheetHandle, SheetPushError> {
        let (grid_rows, grid_cols) = grid_size(table, self.options.append_timestamp);
        let worksheet = resolve_worksheet(client, spreadsheet, target, grid_rows, grid_cols)?;
        let cols = table.column_count();
        if cols == 0 {
            return Ok(worksheet);
        }

        client.update_range(&worksheet, &header_range(cols).to_string(), &[table.columns.clone()])?;

        let batch_size = self.options.batch_size.max(1);
        let batches = rows.len().div_ceil(batch_size);
        for (index, batch) in rows.chunks(batch_size).enumerate() {
            if index > 0 && !self.pacing.throttle.is_zero() {
                std::thread::sleep(self.pacing.throttle);
            }
            let range = batch_range(index * batch_size, batch.len(), cols);
            client.update_range(&worksheet, &range.to_string(), batch)?;
            *rows_written += batch.len();
            debug!(worksheet = worksheet.title.as_str(), range = %range, batch = index + 1, batches, "Wrote batch");
            progress(&BatchProgress {
                worksheet: worksheet.title.clone(),
                batch: index + 1,
                batches,
                rows_written: *rows_written,
                total_rows: rows.len(),
                attempt,
            });
        }
        Ok(worksheet)
    }

    /// Optional formatting after a successful write; each failure becomes a warning.
    fn post_process<S: SheetService + ?Sized>(&self, client: &mut S, worksheet: &WorksheetHandle, table: &Table) -> Vec<String> {
        let mut warnings = Vec::new();
        let cols = table.column_count();
        let mut note = |step: &str, outcome: Result<(), crate::remote::RemoteError>| {
            if let Err(error) = outcome {
                warn!(worksheet = worksheet.title.as_str(), "Could not {}: {}", step, error);
                warnings.push(format!("Could not {step}: {error}"));
            }
        };
        if self.options.freeze_header {
            note("freeze the header row", client.freeze_rows(worksheet, 1));
        }
        if self.options.bold_header && cols > 0 {
            let style = CellStyle { bold: true };
            note("bold the header row", client.format_range(worksheet, &header_range(cols).to_string(), &style));
        }
        if self.options.auto_resize_columns && cols > 0 {
            note("auto-resize columns", client.auto_resize_columns(worksheet, 0, cols));
        }
        if self.options.append_timestamp {
            let stamp = format!("Processed at {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
            let cell = Range::cell(timestamp_row(table), 0).to_string();
            note("append the timestamp", client.update_range(worksheet, &cell, &[vec![stamp]]));
        }
        warnings
    }
}

/// Shares a spreadsheet with the configured address, if any; returns warnings.
pub fn share_spreadsheet<S: SheetService + ?Sized>(
    client: &mut S,
    spreadsheet: &SpreadsheetHandle,
    options: &UploadOptions,
) -> Vec<String> {
    let Some(email) = options.share_email.as_deref().filter(|email| !email.trim().is_empty()) else {
        return Vec::new();
    };
    match client.share(spreadsheet, email, options.permission.role(), options.notify) {
        Ok(()) => Vec::new(),
        Err(error) => {
            warn!(spreadsheet = spreadsheet.title.as_str(), email, "Sharing failed: {}", error);
            vec![format!("Could not share with {email}: {error}")]
        }
    }
}

fn resolve_worksheet<S: SheetService + ?Sized>(
    client: &mut S,
    spreadsheet: &SpreadsheetHandle,
    target: &WorksheetTarget,
    rows: usize,
    cols: usize,
) -> Result<WorksheetHandle, SheetPushError> {
    let existing = match target {
        WorksheetTarget::Existing(worksheet) => Some(worksheet.clone()),
        WorksheetTarget::Named(title) => client.worksheet(spreadsheet, title)?,
    };
    match existing {
        Some(worksheet) => {
            debug!(worksheet = worksheet.title.as_str(), "Overwriting worksheet");
            client.clear(&worksheet)?;
            Ok(client.resize_worksheet(&worksheet, rows, cols)?)
        }
        None => Ok(client.add_worksheet(spreadsheet, target.title(), rows, cols)?),
    }
}

/// Header plus data rows, plus a blank row and the timestamp row when requested.
fn grid_size(table: &Table, append_timestamp: bool) -> (usize, usize) {
    let extra = if append_timestamp { 2 } else { 0 };
    let rows = (table.row_count() + 1 + extra).max(MIN_GRID_ROWS);
    (rows, table.column_count().max(1))
}

fn header_range(cols: usize) -> Range {
    Range::block((0, 0), (0, cols - 1))
}

/// Rows `[start + 2, start + 1 + len]` in 1-based sheet coordinates
fn batch_range(start: usize, len: usize, cols: usize) -> Range {
    Range::block((start + 1, start + len), (0, cols - 1))
}

/// Two rows below the last data row (0-based)
fn timestamp_row(table: &Table) -> usize {
    table.row_count() + 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::MemorySheetClient;
    use crate::remote::memory::Operation;
    use crate::remote::RemoteError;
    use crate::table::Value;
    use proptest::prelude::*;

    fn table(rows: usize, cols: usize) -> Table {
        Table::new(
            "data",
            (0..cols).map(|col| format!("c{col}")).collect(),
            (0..rows)
                .map(|row| (0..cols).map(|col| Value::Text(format!("r{row}c{col}"))).collect())
                .collect(),
        )
    }

    fn options(batch_size: usize) -> UploadOptions {
        UploadOptions {
            batch_size,
            ..UploadOptions::default()
        }
    }

    fn transient() -> RemoteError {
        RemoteError::Transient {
            status: Some(503),
            message: "unavailable".to_owned(),
        }
    }

    fn upload(client: &mut MemorySheetClient, table: &Table, options: &UploadOptions) -> (UploadResult, Vec<BatchProgress>) {
        let spreadsheet = client.create_spreadsheet("book").unwrap();
        let pacing = Pacing::immediate();
        let mut events = Vec::new();
        let result = BatchUploader::new(options, &pacing).upload(
            client,
            &spreadsheet,
            table,
            WorksheetTarget::Named("data".to_owned()),
            false,
            &mut |event| events.push(event.clone()),
        );
        (result, events)
    }

    #[test]
    fn ranges_follow_table_rows() {
        assert_eq!(header_range(3).to_string(), "A1:C1");
        assert_eq!(batch_range(0, 10, 3).to_string(), "A2:C11");
        assert_eq!(batch_range(20, 5, 28).to_string(), "A22:AB26");
    }

    #[test]
    fn writes_header_then_batches_in_order() {
        let mut client = MemorySheetClient::new();
        let (result, events) = upload(&mut client, &table(25, 3), &options(10));
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.rows_written, 25);
        assert_eq!(result.attempts, 1);
        assert!(result.remote_url.unwrap().ends_with("#gid=1"));
        let writes: Vec<String> = client.writes("data").into_iter().map(|(range, _)| range).collect();
        assert_eq!(writes, vec!["A1:C1", "A2:C11", "A12:C21", "A22:C26"]);
        let batches: Vec<(usize, usize, usize)> = events.iter().map(|e| (e.batch, e.batches, e.rows_written)).collect();
        assert_eq!(batches, vec![(1, 3, 10), (2, 3, 20), (3, 3, 25)]);

        let sheet = client.spreadsheet("book").unwrap().worksheet("data").unwrap();
        assert_eq!((sheet.rows, sheet.cols), (26, 3));
        assert_eq!(sheet.frozen_rows, 1);
        assert_eq!(sheet.bold_ranges, vec!["A1:C1"]);
        assert_eq!(sheet.auto_resized, Some((0, 3)));
    }

    #[test]
    fn exact_multiple_of_batch_size_has_no_short_batch() {
        let mut client = MemorySheetClient::new();
        let (result, events) = upload(&mut client, &table(20, 2), &options(10));
        assert!(result.success);
        assert_eq!(events.len(), 2);
        assert_eq!(client.writes("data").last().unwrap(), &("A12:B21".to_owned(), 10));
    }

    #[test]
    fn empty_table_writes_only_the_header() {
        let mut client = MemorySheetClient::new();
        let (result, events) = upload(&mut client, &table(0, 2), &options(10));
        assert!(result.success);
        assert_eq!(result.rows_written, 0);
        assert!(events.is_empty());
        let sheet = client.spreadsheet("book").unwrap().worksheet("data").unwrap();
        assert_eq!(sheet.values(), vec![vec!["c0".to_owned(), "c1".to_owned()]]);
    }

    #[test]
    fn transient_failures_restart_the_upload() {
        let mut client = MemorySheetClient::new();
        client.fail(Operation::UpdateRange, Some("data"), 4, transient());
        let (result, events) = upload(&mut client, &table(5, 2), &options(2));
        assert!(result.success);
        assert_eq!(result.attempts, 5);
        assert_eq!(result.rows_written, 5);
        assert!(events.iter().all(|event| event.attempt == 5));
        let sheet = client.spreadsheet("book").unwrap().worksheet("data").unwrap();
        assert_eq!(sheet.values().len(), 6);
    }

    #[test]
    fn exhausted_retries_report_failure() {
        let mut client = MemorySheetClient::new();
        client.fail(Operation::UpdateRange, Some("data"), 5, transient());
        let (result, _) = upload(&mut client, &table(5, 2), &options(2));
        assert!(!result.success);
        assert_eq!(result.attempts, 5);
        assert!(result.error.unwrap().contains("503"));
        assert_eq!(client.writes("data").len(), 5);
    }

    #[test]
    fn permanent_failure_stops_at_once() {
        let mut client = MemorySheetClient::new();
        let denied = RemoteError::Permanent {
            status: Some(403),
            message: "denied".to_owned(),
        };
        client.fail(Operation::UpdateRange, Some("data"), 1, denied);
        let (result, _) = upload(&mut client, &table(5, 2), &options(2));
        assert!(!result.success);
        assert_eq!(result.attempts, 1);
        assert_eq!(client.writes("data").len(), 1);
    }

    #[test]
    fn failure_mid_table_reports_rows_already_written() {
        let mut client = MemorySheetClient::new();
        let spreadsheet = client.create_spreadsheet("book").unwrap();
        let options = options(2);
        let pacing = Pacing::immediate();
        let uploader = BatchUploader::new(&options, &pacing);
        let result = uploader.upload(
            &mut FailingAfter { inner: &mut client, remaining: 2, calls: 0 },
            &spreadsheet,
            &table(5, 2),
            WorksheetTarget::Named("data".to_owned()),
            false,
            &mut |_| {},
        );
        assert!(!result.success);
        assert_eq!(result.rows_written, 2);
    }

    /// Lets the first `remaining` range writes through, then refuses permanently.
    struct FailingAfter<'a> {
        inner: &'a mut MemorySheetClient,
        remaining: usize,
        calls: usize,
    }

    impl SheetService for FailingAfter<'_> {
        fn create_spreadsheet(&mut self, title: &str) -> Result<SpreadsheetHandle, RemoteError> {
            self.inner.create_spreadsheet(title)
        }
        fn open_spreadsheet(&mut self, title: &str) -> Result<SpreadsheetHandle, RemoteError> {
            self.inner.open_spreadsheet(title)
        }
        fn worksheets(&mut self, spreadsheet: &SpreadsheetHandle) -> Result<Vec<WorksheetHandle>, RemoteError> {
            self.inner.worksheets(spreadsheet)
        }
        fn add_worksheet(&mut self, spreadsheet: &SpreadsheetHandle, title: &str, rows: usize, cols: usize) -> Result<WorksheetHandle, RemoteError> {
            self.inner.add_worksheet(spreadsheet, title, rows, cols)
        }
        fn rename_worksheet(&mut self, worksheet: &WorksheetHandle, title: &str) -> Result<WorksheetHandle, RemoteError> {
            self.inner.rename_worksheet(worksheet, title)
        }
        fn resize_worksheet(&mut self, worksheet: &WorksheetHandle, rows: usize, cols: usize) -> Result<WorksheetHandle, RemoteError> {
            self.inner.resize_worksheet(worksheet, rows, cols)
        }
        fn clear(&mut self, worksheet: &WorksheetHandle) -> Result<(), RemoteError> {
            self.inner.clear(worksheet)
        }
        fn update_range(&mut self, worksheet: &WorksheetHandle, range: &str, values: &[Vec<String>]) -> Result<(), RemoteError> {
            self.calls += 1;
            if self.calls > self.remaining {
                return Err(RemoteError::Permanent { status: Some(400), message: "quota".to_owned() });
            }
            self.inner.update_range(worksheet, range, values)
        }
        fn freeze_rows(&mut self, worksheet: &WorksheetHandle, rows: usize) -> Result<(), RemoteError> {
            self.inner.freeze_rows(worksheet, rows)
        }
        fn format_range(&mut self, worksheet: &WorksheetHandle, range: &str, style: &CellStyle) -> Result<(), RemoteError> {
            self.inner.format_range(worksheet, range, style)
        }
        fn auto_resize_columns(&mut self, worksheet: &WorksheetHandle, from: usize, to: usize) -> Result<(), RemoteError> {
            self.inner.auto_resize_columns(worksheet, from, to)
        }
        fn share(&mut self, spreadsheet: &SpreadsheetHandle, email: &str, role: &str, notify: bool) -> Result<(), RemoteError> {
            self.inner.share(spreadsheet, email, role, notify)
        }
    }

    #[test]
    fn existing_worksheet_is_overwritten() {
        let mut client = MemorySheetClient::new();
        upload(&mut client, &table(8, 4), &options(100));
        let spreadsheet = client.spreadsheets()[0].handle.clone();
        let pacing = Pacing::immediate();
        let options = options(100);
        let result = BatchUploader::new(&options, &pacing).upload(
            &mut client,
            &spreadsheet,
            &table(2, 1),
            WorksheetTarget::Named("data".to_owned()),
            false,
            &mut |_| {},
        );
        assert!(result.success);
        let sheet = client.spreadsheet("book").unwrap().worksheet("data").unwrap();
        assert_eq!(sheet.values(), vec![vec!["c0"], vec!["r0c0"], vec!["r1c0"]]);
        assert_eq!(client.spreadsheet("book").unwrap().worksheets.len(), 2);
    }

    #[test]
    fn formatting_failures_become_warnings() {
        let mut client = MemorySheetClient::new();
        client.fail(Operation::FreezeRows, None, 1, transient());
        client.fail(Operation::AutoResizeColumns, None, 1, transient());
        let (result, _) = upload(&mut client, &table(3, 2), &options(10));
        assert!(result.success);
        assert_eq!(result.warnings.len(), 2);
        assert!(result.warnings[0].starts_with("Could not freeze the header row"));
    }

    #[test]
    fn appends_timestamp_two_rows_below_data() {
        let mut client = MemorySheetClient::new();
        let options = UploadOptions {
            append_timestamp: true,
            ..options(10)
        };
        let (result, _) = upload(&mut client, &table(3, 2), &options);
        assert!(result.success);
        let sheet = client.spreadsheet("book").unwrap().worksheet("data").unwrap();
        assert_eq!(sheet.rows, 6);
        assert!(sheet.cell(5, 0).unwrap().starts_with("Processed at "));
        assert_eq!(sheet.cell(4, 0), None);
    }

    #[test]
    fn shares_when_asked_and_tolerates_sharing_failure() {
        let mut client = MemorySheetClient::new();
        let spreadsheet = client.create_spreadsheet("book").unwrap();
        let options = UploadOptions {
            share_email: Some("team@example.com".to_owned()),
            ..options(10)
        };
        let pacing = Pacing::immediate();
        let uploader = BatchUploader::new(&options, &pacing);
        let result = uploader.upload(&mut client, &spreadsheet, &table(1, 1), WorksheetTarget::Named("a".to_owned()), true, &mut |_| {});
        assert!(result.warnings.is_empty());
        assert_eq!(
            client.spreadsheet("book").unwrap().permissions,
            vec![("team@example.com".to_owned(), "writer".to_owned(), true)]
        );

        client.fail(Operation::Share, None, 1, RemoteError::NotFound("user".to_owned()));
        let result = uploader.upload(&mut client, &spreadsheet, &table(1, 1), WorksheetTarget::Named("b".to_owned()), true, &mut |_| {});
        assert!(result.success);
        assert_eq!(result.warnings.len(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_batches_reconstruct_the_table(
            cells in prop::collection::vec(prop::collection::vec("[a-z0-9]{1,4}", 3), 0..60),
            batch_size in 1usize..15,
        ) {
            let table = Table::new(
                "data",
                vec!["a".into(), "b".into(), "c".into()],
                cells.iter().map(|row| row.iter().map(|cell| Value::Text(cell.clone())).collect()).collect(),
            );
            let mut client = MemorySheetClient::new();
            let (result, events) = upload(&mut client, &table, &options(batch_size));
            prop_assert!(result.success);
            prop_assert_eq!(result.rows_written, cells.len());
            prop_assert_eq!(events.len(), cells.len().div_ceil(batch_size));

            let sheet = client.spreadsheet("book").unwrap().worksheet("data").unwrap();
            let mut expected = vec![table.columns.clone()];
            expected.extend(cells);
            prop_assert_eq!(sheet.values(), expected);
        }
    }
}
