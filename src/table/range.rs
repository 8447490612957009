use crate::error::SheetPushError;
use crate::spreadsheet::reference::col_to_index;
use crate::spreadsheet::reference::index_to_col;
use crate::spreadsheet::reference::row_to_index;
use regex::Regex;
use std::fmt::Display;
use std::sync::LazyLock;
use thiserror::Error;

static RANGE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z]*)(\d*)(:([A-Z]*)(\d*))?$").expect("Hardcode regex pattern"));

#[derive(Error, Debug)]
pub enum RangeError {
    #[error("Invalid range format '{0}'")]
    FormatError(String),
}

/// An A1-style block of cells with optional (0-based, inclusive) bounds.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub(crate) struct Range {
    pub(crate) row_lower_bound: Option<usize>,
    pub(crate) row_upper_bound: Option<usize>,
    pub(crate) col_lower_bound: Option<usize>,
    pub(crate) col_upper_bound: Option<usize>,
}

impl Range {
    /// A fully bounded block.
    pub(crate) fn block(rows: (usize, usize), cols: (usize, usize)) -> Range {
        Range {
            row_lower_bound: Some(rows.0),
            row_upper_bound: Some(rows.1),
            col_lower_bound: Some(cols.0),
            col_upper_bound: Some(cols.1),
        }
    }

    /// A single cell.
    pub(crate) fn cell(row: usize, col: usize) -> Range {
        Range::block((row, row), (col, col))
    }
}

impl TryFrom<&str> for Range {
    type Error = SheetPushError;

    /// Parses `A1`, `B2:C5`, `A:C` or `1:10`.
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let value = value.trim().to_ascii_uppercase();
        let captures = RANGE_PATTERN
            .captures(&value)
            .filter(|_| !value.is_empty() && value != ":")
            .ok_or_else(|| RangeError::FormatError(value.to_owned()))?;
        let part = |index: usize| captures.get(index).map(|matcher| matcher.as_str());
        let range = Range {
            col_lower_bound: part(1).and_then(col_to_index),
            row_lower_bound: part(2).and_then(row_to_index),
            col_upper_bound: part(4).and_then(col_to_index),
            row_upper_bound: part(5).and_then(row_to_index),
        };
        if captures.get(3).is_none() {
            // A single reference names one cell
            Ok(Range {
                row_upper_bound: range.row_lower_bound,
                col_upper_bound: range.col_lower_bound,
                ..range
            })
        } else {
            Ok(range)
        }
    }
}

impl Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let corner = |col: Option<usize>, row: Option<usize>| {
            format!(
                "{}{}",
                col.map(index_to_col).unwrap_or_default(),
                row.map(|row| (row + 1).to_string()).unwrap_or_default()
            )
        };
        let lower = corner(self.col_lower_bound, self.row_lower_bound);
        let upper = corner(self.col_upper_bound, self.row_upper_bound);
        if lower == upper {
            write!(f, "{lower}")
        } else {
            write!(f, "{lower}:{upper}")
        }
    }
}
