//! Titles for destination spreadsheets, worksheets and split parts.

use crate::upload::NamingConvention;
use crate::upload::UploadOptions;
use chrono::NaiveDateTime;
use sha2::Digest;
use sha2::Sha256;
use std::collections::HashSet;

/// Longest worksheet title accepted
pub const MAX_TITLE_LENGTH: usize = 100;

const FORBIDDEN_SHEET_CHARACTERS: [char; 7] = ['[', ']', ':', '*', '?', '/', '\\'];

/// Spreadsheet title for a source file per the configured naming convention.
/// `base` is the configured spreadsheet name or else the file stem.
pub fn spreadsheet_title(base: &str, options: &UploadOptions, source: &[u8], now: NaiveDateTime) -> String {
    match options.naming {
        NamingConvention::Original => base.to_owned(),
        NamingConvention::Timestamped => format!("{base}_{}", now.format("%Y%m%d_%H%M%S")),
        NamingConvention::Hashed => format!("{base}_{}", content_hash(source)),
        NamingConvention::Prefixed => match options.name_prefix.as_deref().map(str::trim) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}_{base}"),
            _ => base.to_owned(),
        },
    }
}

/// First 8 hex digits of the SHA-256 of the source bytes
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().take(4).map(|byte| format!("{byte:02x}")).collect()
}

/// Makes a workbook tab name usable as a worksheet title:
/// drops `[ ] : * ? / \`, trims, cuts to 100 characters, falls back to `Sheet`.
pub fn sanitize_sheet_name(name: &str) -> String {
    let stripped: String = name
        .chars()
        .filter(|c| !FORBIDDEN_SHEET_CHARACTERS.contains(c))
        .collect();
    let cut: String = stripped.trim().chars().take(MAX_TITLE_LENGTH).collect();
    let cut = cut.trim_end();
    if cut.is_empty() {
        "Sheet".to_owned()
    } else {
        cut.to_owned()
    }
}

/// `<base>_Part_<index>_of_<count>`, with the base shortened so the title fits.
pub fn part_title(base: &str, index: usize, count: usize) -> String {
    with_suffix(base, &format!("_Part_{index}_of_{count}"))
}

fn with_suffix(base: &str, suffix: &str) -> String {
    let room = MAX_TITLE_LENGTH.saturating_sub(suffix.chars().count());
    let base: String = base.chars().take(room).collect();
    format!("{base}{suffix}")
}

/// Hands out worksheet titles that are unique within one spreadsheet.
#[derive(Debug, Default)]
pub struct TitleRegistry {
    used: HashSet<String>,
}

impl TitleRegistry {
    pub fn new() -> TitleRegistry {
        TitleRegistry::default()
    }

    /// Returns `title`, or `title_<n>` with the smallest free `n` when it is taken.
    pub fn claim(&mut self, title: &str) -> String {
        if self.used.insert(title.to_owned()) {
            return title.to_owned();
        }
        (1..)
            .map(|n| with_suffix(title, &format!("_{n}")))
            .find(|candidate| self.used.insert(candidate.clone()))
            .unwrap_or_else(|| title.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 31)
            .unwrap()
            .and_hms_opt(14, 5, 9)
            .unwrap()
    }

    fn options(naming: NamingConvention, prefix: Option<&str>) -> UploadOptions {
        UploadOptions {
            naming,
            name_prefix: prefix.map(str::to_owned),
            ..UploadOptions::default()
        }
    }

    #[test]
    fn applies_naming_conventions() {
        let bytes = b"abc";
        assert_eq!(spreadsheet_title("sales", &options(NamingConvention::Original, None), bytes, now()), "sales");
        assert_eq!(
            spreadsheet_title("sales", &options(NamingConvention::Timestamped, None), bytes, now()),
            "sales_20250131_140509"
        );
        assert_eq!(
            spreadsheet_title("sales", &options(NamingConvention::Hashed, None), bytes, now()),
            "sales_ba7816bf"
        );
        assert_eq!(
            spreadsheet_title("sales", &options(NamingConvention::Prefixed, Some("team")), bytes, now()),
            "team_sales"
        );
    }

    #[test]
    fn sanitizes_tab_names() {
        assert_eq!(sanitize_sheet_name(" Q1 [draft]: a/b "), "Q1 draft ab");
        assert_eq!(sanitize_sheet_name("*?"), "Sheet");
        assert_eq!(sanitize_sheet_name(&"y".repeat(120)).chars().count(), 100);
    }

    #[test]
    fn part_titles_fit_limit() {
        assert_eq!(part_title("orders", 2, 3), "orders_Part_2_of_3");
        let long = part_title(&"z".repeat(100), 1, 12);
        assert_eq!(long.chars().count(), 100);
        assert!(long.ends_with("_Part_1_of_12"));
    }

    #[test]
    fn registry_suffixes_collisions() {
        let mut registry = TitleRegistry::new();
        assert_eq!(registry.claim("Data"), "Data");
        assert_eq!(registry.claim("Data"), "Data_1");
        assert_eq!(registry.claim("Data_1"), "Data_1_1");
        assert_eq!(registry.claim("Data"), "Data_2");
    }
}
