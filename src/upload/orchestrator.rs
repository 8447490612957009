//! Sends every table of one source file into one destination spreadsheet.

use crate::error::SheetPushError;
use crate::helpers::reader::SourceFile;
use crate::remote::SheetService;
use crate::remote::SpreadsheetHandle;
use crate::remote::WorksheetHandle;
use crate::table::Table;
use crate::upload::batch::share_spreadsheet;
use crate::upload::batch::BatchUploader;
use crate::upload::batch::WorksheetTarget;
use crate::upload::naming;
use crate::upload::naming::TitleRegistry;
use crate::upload::BatchProgress;
use crate::upload::Pacing;
use crate::upload::UploadOptions;
use crate::upload::UploadResult;
use crate::upload::WorkbookReport;
use chrono::Local;
use tracing::error;
use tracing::info;
use tracing::warn;

/// Uploads `tables` (already cleaned) from `source`. Every table, or every part of a split
/// table, is attempted once even when earlier ones failed; nothing here returns an error.
pub fn run<S: SheetService + ?Sized>(
    client: &mut S,
    source: &SourceFile,
    tables: Vec<Table>,
    options: &UploadOptions,
    pacing: &Pacing,
    progress: &mut dyn FnMut(&BatchProgress),
) -> WorkbookReport {
    let base = options
        .spreadsheet_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(source.stem());
    let title = match options.target_spreadsheet.as_deref() {
        Some(target) => target.to_owned(),
        None => naming::spreadsheet_title(base, options, &source.bytes, Local::now().naive_local()),
    };
    let mut report = WorkbookReport {
        source: source.location.clone(),
        spreadsheet_title: title.clone(),
        ..WorkbookReport::default()
    };

    let parts = split_tables(tables, options.max_rows_per_sheet);
    let (spreadsheet, mut first_worksheet) = match open_destination(client, &title, options, pacing) {
        Ok(destination) => destination,
        Err(e) => {
            error!(spreadsheet = title.as_str(), "Could not open the destination spreadsheet: {}", e);
            report.results = parts
                .into_iter()
                .map(|(worksheet_title, table)| UploadResult {
                    table_name: table.name,
                    worksheet_title,
                    error: Some(e.to_string()),
                    ..UploadResult::default()
                })
                .collect();
            return report;
        }
    };
    info!(spreadsheet = spreadsheet.title.as_str(), url = spreadsheet.url.as_str(), tables = parts.len(), "Uploading workbook");
    report.spreadsheet_url = Some(spreadsheet.url.clone());

    let uploader = BatchUploader::new(options, pacing);
    for (worksheet_title, table) in parts {
        let target = match first_worksheet.take() {
            Some(default) => reuse_default(client, default, &worksheet_title, &mut report.warnings),
            None => WorksheetTarget::Named(worksheet_title),
        };
        let result = uploader.upload(client, &spreadsheet, &table, target, false, progress);
        report.results.push(result);
    }

    report.warnings.extend(share_spreadsheet(client, &spreadsheet, options));
    let failed = report.results.iter().filter(|result| !result.success).count();
    if failed > 0 {
        warn!(spreadsheet = spreadsheet.title.as_str(), failed, total = report.results.len(), "Some tables failed to upload");
    } else {
        info!(spreadsheet = spreadsheet.title.as_str(), rows = report.rows_written(), "Workbook uploaded");
    }
    report
}

/// Splits oversize tables into parts and assigns each a worksheet title unique within the run.
fn split_tables(tables: Vec<Table>, max_rows: usize) -> Vec<(String, Table)> {
    let mut registry = TitleRegistry::new();
    let mut parts = Vec::new();
    for table in tables {
        let base = naming::sanitize_sheet_name(&table.name);
        let pieces = table.split(max_rows);
        let count = pieces.len();
        if count > 1 {
            info!(table = base.as_str(), parts = count, max_rows, "Splitting large table");
        }
        for (index, piece) in pieces.into_iter().enumerate() {
            let title = if count > 1 {
                naming::part_title(&base, index + 1, count)
            } else {
                base.clone()
            };
            parts.push((registry.claim(&title), piece));
        }
    }
    parts
}

/// Creates the spreadsheet, or opens `target_spreadsheet`. A new spreadsheet also yields
/// its default worksheet so the first table can take it over.
fn open_destination<S: SheetService + ?Sized>(
    client: &mut S,
    title: &str,
    options: &UploadOptions,
    pacing: &Pacing,
) -> Result<(SpreadsheetHandle, Option<WorksheetHandle>), SheetPushError> {
    if options.target_spreadsheet.is_some() {
        let opened = pacing
            .retry
            .run(&format!("Opening spreadsheet '{title}'"), |_| Ok(client.open_spreadsheet(title)?));
        return Ok((opened.result?, None));
    }
    let created = pacing
        .retry
        .run(&format!("Creating spreadsheet '{title}'"), |_| Ok(client.create_spreadsheet(title)?));
    let spreadsheet = created.result?;
    let default = match client.worksheets(&spreadsheet) {
        Ok(worksheets) => worksheets.into_iter().next(),
        Err(e) => {
            warn!(spreadsheet = title, "Could not list worksheets: {}", e);
            None
        }
    };
    Ok((spreadsheet, default))
}

/// Renames the default worksheet for the first table, falling back to a fresh worksheet.
fn reuse_default<S: SheetService + ?Sized>(
    client: &mut S,
    default: WorksheetHandle,
    title: &str,
    warnings: &mut Vec<String>,
) -> WorksheetTarget {
    if default.title == title {
        return WorksheetTarget::Existing(default);
    }
    match client.rename_worksheet(&default, title) {
        Ok(renamed) => WorksheetTarget::Existing(renamed),
        Err(e) => {
            warn!(worksheet = default.title.as_str(), title, "Could not rename the default worksheet: {}", e);
            warnings.push(format!("Could not rename worksheet '{}' to '{title}': {e}", default.title));
            WorksheetTarget::Named(title.to_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::MemorySheetClient;
    use crate::remote::memory::Operation;
    use crate::remote::RemoteError;
    use crate::table::Value;
    use crate::upload::NamingConvention;

    fn source() -> SourceFile {
        SourceFile::from_bytes("in/sales.csv", "sales.csv", b"a,b\n1,2\n".to_vec()).unwrap()
    }

    fn table(name: &str, rows: usize) -> Table {
        Table::new(
            name,
            vec!["id".to_owned(), "name".to_owned()],
            (0..rows)
                .map(|row| vec![Value::Text(row.to_string()), Value::Text(format!("n{row}"))])
                .collect(),
        )
    }

    fn transient() -> RemoteError {
        RemoteError::Transient {
            status: Some(429),
            message: "rate limited".to_owned(),
        }
    }

    fn upload(client: &mut MemorySheetClient, tables: Vec<Table>, options: &UploadOptions) -> WorkbookReport {
        run(client, &source(), tables, options, &Pacing::immediate(), &mut |_| {})
    }

    #[test]
    fn first_table_takes_over_the_default_worksheet() {
        let mut client = MemorySheetClient::new();
        let report = upload(&mut client, vec![table("North", 2), table("South", 3)], &UploadOptions::default());
        assert!(report.success());
        assert_eq!(report.spreadsheet_title, "sales");
        assert_eq!(report.rows_written(), 5);

        let book = client.spreadsheet("sales").unwrap();
        let titles: Vec<&str> = book.worksheets.iter().map(|sheet| sheet.title.as_str()).collect();
        assert_eq!(titles, vec!["North", "South"]);
        assert_eq!(book.worksheets[0].sheet_id, 0);
        assert_eq!(report.results[0].remote_url.as_deref(), Some("memory://spreadsheets/memory-1#gid=0"));
    }

    #[test]
    fn failing_table_does_not_stop_the_others() {
        let mut client = MemorySheetClient::new();
        client.fail(Operation::UpdateRange, Some("second"), 5, transient());
        let tables = vec![table("first", 3), table("second", 3), table("third", 3)];
        let report = upload(&mut client, tables, &UploadOptions::default());
        let outcomes: Vec<bool> = report.results.iter().map(|result| result.success).collect();
        assert_eq!(outcomes, vec![true, false, true]);
        assert_eq!(report.results[1].attempts, 5);
        assert!(!report.success());
    }

    #[test]
    fn large_tables_are_split_into_parts() {
        let mut client = MemorySheetClient::new();
        let options = UploadOptions {
            max_rows_per_sheet: 4,
            batch_size: 3,
            ..UploadOptions::default()
        };
        let report = upload(&mut client, vec![table("data", 10)], &options);
        let parts: Vec<(&str, usize)> = report
            .results
            .iter()
            .map(|result| (result.worksheet_title.as_str(), result.rows_written))
            .collect();
        assert_eq!(parts, vec![("data_Part_1_of_3", 4), ("data_Part_2_of_3", 4), ("data_Part_3_of_3", 2)]);
        let book = client.spreadsheet("sales").unwrap();
        assert_eq!(book.worksheet("data_Part_3_of_3").unwrap().cell(2, 1), Some("n9"));
    }

    #[test]
    fn colliding_names_get_suffixes() {
        let mut client = MemorySheetClient::new();
        let report = upload(&mut client, vec![table("a/b", 1), table("ab", 1), table("", 1)], &UploadOptions::default());
        let titles: Vec<&str> = report.results.iter().map(|result| result.worksheet_title.as_str()).collect();
        assert_eq!(titles, vec!["ab", "ab_1", "Sheet"]);
        assert!(report.success());
    }

    #[test]
    fn unavailable_spreadsheet_fails_every_table() {
        let mut client = MemorySheetClient::new();
        let denied = RemoteError::Permanent {
            status: Some(403),
            message: "quota exceeded".to_owned(),
        };
        client.fail(Operation::CreateSpreadsheet, None, 1, denied);
        let report = upload(&mut client, vec![table("a", 1), table("b", 1)], &UploadOptions::default());
        assert_eq!(report.results.len(), 2);
        assert!(report.results.iter().all(|result| !result.success && result.error.is_some()));
        assert!(report.spreadsheet_url.is_none());
    }

    #[test]
    fn shares_once_after_all_tables() {
        let mut client = MemorySheetClient::new();
        let options = UploadOptions {
            share_email: Some("team@example.com".to_owned()),
            notify: false,
            ..UploadOptions::default()
        };
        let report = upload(&mut client, vec![table("a", 1), table("b", 1)], &options);
        assert!(report.warnings.is_empty());
        let shares = client.calls().iter().filter(|call| call.operation == Operation::Share).count();
        assert_eq!(shares, 1);
        assert_eq!(
            client.spreadsheet("sales").unwrap().permissions,
            vec![("team@example.com".to_owned(), "writer".to_owned(), false)]
        );
    }

    #[test]
    fn sharing_failure_is_a_warning() {
        let mut client = MemorySheetClient::new();
        client.fail(Operation::Share, None, 1, RemoteError::NotFound("principal".to_owned()));
        let options = UploadOptions {
            share_email: Some("nobody@example.com".to_owned()),
            ..UploadOptions::default()
        };
        let report = upload(&mut client, vec![table("a", 1)], &options);
        assert!(report.success());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn writes_into_an_existing_spreadsheet() {
        let mut client = MemorySheetClient::new();
        upload(&mut client, vec![table("a", 5)], &UploadOptions::default());
        let options = UploadOptions {
            target_spreadsheet: Some("sales".to_owned()),
            ..UploadOptions::default()
        };
        let report = upload(&mut client, vec![table("a", 1), table("b", 1)], &options);
        assert!(report.success());
        assert_eq!(client.spreadsheets().len(), 1);
        let book = client.spreadsheet("sales").unwrap();
        assert_eq!(book.worksheet("a").unwrap().values().len(), 2);
        assert!(book.worksheet("b").is_some());
    }

    #[test]
    fn spreadsheet_title_follows_naming_options() {
        let mut client = MemorySheetClient::new();
        let options = UploadOptions {
            naming: NamingConvention::Prefixed,
            name_prefix: Some("q3".to_owned()),
            spreadsheet_name: Some("Revenue".to_owned()),
            ..UploadOptions::default()
        };
        let report = upload(&mut client, vec![table("a", 1)], &options);
        assert_eq!(report.spreadsheet_title, "q3_Revenue");
        assert!(client.spreadsheet("q3_Revenue").is_some());
    }
}
