//! Checks applied before anything is parsed or sent.

use crate::error::SheetPushError;
use crate::spreadsheet::FileFormat;
use crate::upload::NamingConvention;
use crate::upload::UploadOptions;
use regex::Regex;
use std::sync::LazyLock;

/// Largest accepted input file: 50 MiB
pub const MAX_FILE_BYTES: u64 = 50 * 1024 * 1024;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$").expect("Hardcode regex pattern")
});

/// Rejects empty, oversized and unsupported files and returns the detected format.
pub fn validate_file(file_name: &str, size: u64) -> Result<FileFormat, SheetPushError> {
    if size == 0 {
        Err(SheetPushError::Validation(format!("'{file_name}' is empty")))?;
    }
    if size > MAX_FILE_BYTES {
        Err(SheetPushError::Validation(format!(
            "'{file_name}' is {:.1} MiB, larger than the {} MiB limit",
            size as f64 / (1024.0 * 1024.0),
            MAX_FILE_BYTES / (1024 * 1024)
        )))?;
    }
    FileFormat::from_file_name(file_name).ok_or_else(|| {
        SheetPushError::Validation(format!("'{file_name}' is not a .csv, .xlsx, .xlsm or .xls file"))
    })
}

pub fn validate_email(email: &str) -> Result<(), SheetPushError> {
    if EMAIL_PATTERN.is_match(email.trim()) {
        Ok(())
    } else {
        Err(SheetPushError::Validation(format!("'{email}' is not a valid email address")))
    }
}

/// Checks option combinations that would otherwise only fail halfway through an upload.
pub fn validate_options(options: &UploadOptions) -> Result<(), SheetPushError> {
    if options.batch_size == 0 {
        Err(SheetPushError::Validation("batch size must be at least 1".to_owned()))?;
    }
    if options.max_rows_per_sheet == 0 {
        Err(SheetPushError::Validation("max rows per sheet must be at least 1".to_owned()))?;
    }
    if options.naming == NamingConvention::Prefixed
        && options.name_prefix.as_deref().map(str::trim).unwrap_or_default().is_empty()
    {
        Err(SheetPushError::Validation("prefixed naming requires a name prefix".to_owned()))?;
    }
    if let Some(email) = &options.share_email {
        validate_email(email)?;
    }
    for pattern in &options.sheet_patterns {
        glob::Pattern::new(pattern)
            .map_err(|e| SheetPushError::Validation(format!("invalid sheet pattern '{pattern}': {e}")))?;
    }
    Ok(())
}
