use clap::Args;
use clap::Parser;
use clap::Subcommand;
use sheet_push::upload::NamingConvention;
use sheet_push::upload::Permission;
use sheet_push::UploadOptions;
use std::path::Path;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sheet-push")]
#[command(version, about = "Upload CSV and Excel files into Google Sheets", long_about = None)]
pub struct Cli {
    /// Log debug messages (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload files, one destination spreadsheet per file
    Upload {
        /// Input files (.csv, .xlsx, .xlsm, .xls) or http(s) URLs
        #[arg(required = true)]
        files: Vec<String>,

        /// Service account key JSON
        #[arg(short, long)]
        credential: Option<PathBuf>,

        /// Run against an in-memory service without network calls or delays
        #[arg(long)]
        dry_run: bool,

        /// Write the session report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,

        #[command(flatten)]
        options: OptionArgs,
    },

    /// Print the first cleaned rows of every table without uploading
    Preview {
        /// Input file (.csv, .xlsx, .xlsm, .xls) or http(s) URL
        file: String,

        /// Rows shown per table
        #[arg(short = 'n', long, default_value_t = 10)]
        rows: usize,

        #[command(flatten)]
        options: OptionArgs,
    },
}

/// Upload settings. Flags given here override the `--config` file.
#[derive(Args)]
pub struct OptionArgs {
    /// JSON file with upload options
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Share each spreadsheet with this email address
    #[arg(long)]
    pub share: Option<String>,

    #[arg(long, value_enum)]
    pub permission: Option<Permission>,

    /// Do not email the person the spreadsheet is shared with
    #[arg(long)]
    pub no_notify: bool,

    /// Data rows per write call
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Split larger tables over several worksheets
    #[arg(long)]
    pub max_rows: Option<usize>,

    #[arg(long, value_enum)]
    pub naming: Option<NamingConvention>,

    /// Prefix for `--naming prefixed`
    #[arg(long)]
    pub prefix: Option<String>,

    /// Base spreadsheet title instead of the file name
    #[arg(long)]
    pub name: Option<String>,

    /// Write into an existing spreadsheet with this title
    #[arg(long)]
    pub target: Option<String>,

    /// Glob patterns selecting workbook tabs
    #[arg(long = "sheets", value_delimiter = ',')]
    pub sheets: Vec<String>,

    /// Extra cell values treated as empty
    #[arg(long = "null-marker")]
    pub null_markers: Vec<String>,

    #[arg(long)]
    pub no_freeze_header: bool,

    #[arg(long)]
    pub no_bold_header: bool,

    #[arg(long)]
    pub no_auto_resize: bool,

    /// Append a "Processed at" line below the data
    #[arg(long)]
    pub timestamp: bool,

    #[arg(long)]
    pub keep_empty_rows: bool,

    #[arg(long)]
    pub remove_empty_cols: bool,

    /// Normalize numeric and date columns
    #[arg(long)]
    pub convert_types: bool,
}

impl OptionArgs {
    /// Loads the config file (or the defaults) and applies the flags on top.
    pub fn resolve(&self) -> anyhow::Result<UploadOptions> {
        let mut options = match &self.config {
            Some(path) => load_config(path)?,
            None => UploadOptions::default(),
        };
        if let Some(email) = &self.share {
            options.share_email = Some(email.clone());
        }
        if let Some(permission) = self.permission {
            options.permission = permission;
        }
        if let Some(batch_size) = self.batch_size {
            options.batch_size = batch_size;
        }
        if let Some(max_rows) = self.max_rows {
            options.max_rows_per_sheet = max_rows;
        }
        if let Some(naming) = self.naming {
            options.naming = naming;
        }
        if let Some(prefix) = &self.prefix {
            options.name_prefix = Some(prefix.clone());
        }
        if let Some(name) = &self.name {
            options.spreadsheet_name = Some(name.clone());
        }
        if let Some(target) = &self.target {
            options.target_spreadsheet = Some(target.clone());
        }
        if !self.sheets.is_empty() {
            options.sheet_patterns = self.sheets.clone();
        }
        options.null_markers.extend(self.null_markers.iter().cloned());
        options.notify &= !self.no_notify;
        options.freeze_header &= !self.no_freeze_header;
        options.bold_header &= !self.no_bold_header;
        options.auto_resize_columns &= !self.no_auto_resize;
        options.append_timestamp |= self.timestamp;
        options.remove_empty_rows &= !self.keep_empty_rows;
        options.remove_empty_cols |= self.remove_empty_cols;
        options.convert_data_types |= self.convert_types;
        Ok(options)
    }
}

fn load_config(path: &Path) -> anyhow::Result<UploadOptions> {
    use anyhow::Context;
    let text = std::fs::read_to_string(path).with_context(|| format!("Cannot read config '{}'", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid config '{}'", path.display()))
}
