mod cli;

use crate::cli::Cli;
use crate::cli::Commands;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use sheet_push::session;
use sheet_push::session::SessionReport;
use sheet_push::upload::BatchProgress;
use sheet_push::CredentialFile;
use sheet_push::GoogleSheetsClient;
use sheet_push::MemorySheetClient;
use sheet_push::Pacing;
use sheet_push::UploadOptions;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match execute(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// Returns whether every file and table went through.
fn execute(command: Commands) -> Result<bool> {
    match command {
        Commands::Upload {
            files,
            credential,
            dry_run,
            report,
            options,
        } => {
            let options = options.resolve()?;
            let session = if dry_run {
                info!("Dry run: nothing leaves this machine");
                let mut client = MemorySheetClient::new();
                session::run(&mut client, &files, &options, &Pacing::immediate(), &mut log_progress)?
            } else {
                let mut client = authenticate(credential)?;
                session::run(&mut client, &files, &options, &Pacing::default(), &mut log_progress)?
            };
            print_summary(&session);
            if let Some(path) = report {
                write_report(&path, &session)?;
            }
            Ok(session.success())
        }
        Commands::Preview { file, rows, options } => {
            let options: UploadOptions = options.resolve()?;
            for table in session::preview(&file, &options, rows).with_context(|| format!("Cannot preview '{file}'"))? {
                println!("== {} ({} rows, {} columns)", table.name, table.total_rows, table.columns.len());
                println!("{}", table.columns.join("\t"));
                for row in &table.rows {
                    println!("{}", row.join("\t"));
                }
            }
            Ok(true)
        }
    }
}

/// Reads and stages the credential only for as long as authentication needs it.
fn authenticate(path: Option<PathBuf>) -> Result<GoogleSheetsClient> {
    let path = path.context("A service account credential is required (--credential), or use --dry-run")?;
    let credential = CredentialFile::from_path(&path)?;
    let client = GoogleSheetsClient::authenticate(&credential)?;
    drop(credential);
    Ok(client)
}

fn log_progress(progress: &BatchProgress) {
    info!(
        worksheet = progress.worksheet.as_str(),
        attempt = progress.attempt,
        "Batch {}/{}: {}/{} rows",
        progress.batch,
        progress.batches,
        progress.rows_written,
        progress.total_rows
    );
}

fn print_summary(session: &SessionReport) {
    for file in &session.files {
        if let Some(error) = &file.error {
            println!("FAILED  {}: {}", file.source, error);
            continue;
        }
        for warning in &file.warnings {
            warn!(source = file.source.as_str(), "{}", warning);
        }
        let Some(workbook) = &file.workbook else {
            continue;
        };
        let status = if workbook.success() { "OK" } else { "PARTIAL" };
        println!(
            "{status:<7} {} -> {} ({} rows)",
            file.source,
            workbook.spreadsheet_url.as_deref().unwrap_or("no spreadsheet"),
            workbook.rows_written()
        );
        for result in workbook.results.iter().filter(|result| !result.success) {
            println!("        {}: {}", result.worksheet_title, result.error.as_deref().unwrap_or("failed"));
        }
    }
}

fn write_report(path: &Path, session: &SessionReport) -> Result<()> {
    let json = serde_json::to_string_pretty(session)?;
    std::fs::write(path, json).with_context(|| format!("Cannot write report '{}'", path.display()))?;
    info!(path = %path.display(), "Wrote session report");
    Ok(())
}
