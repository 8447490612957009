//! Conversions between A1-style references and 0-based grid indexes.

use crate::spreadsheet::SpreadsheetError;

/// Rows in an Excel worksheet (`1..=1048576`)
pub(crate) const MAX_ROWS: usize = 1_048_576;
/// Columns in an Excel worksheet (`A..=XFD`)
pub(crate) const MAX_COLS: usize = 16_384;

/// Converts column letters to a 0-based index (`A` -> 0, `AA` -> 26).
/// Letters past `XFD` are rejected.
pub(crate) fn col_to_index(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    letters
        .chars()
        .try_fold(0usize, |index, letter| {
            if !letter.is_ascii_alphabetic() {
                return None;
            }
            let digit = letter.to_ascii_uppercase() as usize - 'A' as usize + 1;
            index.checked_mul(26)?.checked_add(digit)
        })
        .map(|index| index - 1)
        .filter(|col| *col < MAX_COLS)
}

/// Converts a 1-based row number to a 0-based index. Rows past 1048576 are rejected.
pub(crate) fn row_to_index(digits: &str) -> Option<usize> {
    digits
        .parse::<usize>()
        .ok()
        .filter(|row| (1..=MAX_ROWS).contains(row))
        .map(|row| row - 1)
}

/// Converts a 0-based column index to letters (26 -> `AA`).
pub(crate) fn index_to_col(mut col: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'A' + (col % 26) as u8) as char);
        if col < 26 {
            break;
        }
        col = col / 26 - 1;
    }
    letters.iter().rev().collect()
}

/// Parses a cell reference such as `B3` into a 0-based `(row, col)` pair.
pub(crate) fn reference_to_index(reference: &str) -> Option<(usize, usize)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    Some((row_to_index(digits)?, col_to_index(letters)?))
}

/// Accepts a 0-based position only when it lies on the worksheet grid.
pub(crate) fn check_position(row: usize, col: usize) -> Result<(usize, usize), SpreadsheetError> {
    if row < MAX_ROWS && col < MAX_COLS {
        Ok((row, col))
    } else {
        Err(SpreadsheetError::CellOutOfRange(format!("row {}, column {}", row.saturating_add(1), col.saturating_add(1))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns() {
        assert_eq!(col_to_index("A"), Some(0));
        assert_eq!(col_to_index("z"), Some(25));
        assert_eq!(col_to_index("AA"), Some(26));
        assert_eq!(col_to_index("XFD"), Some(16_383));
        assert_eq!(col_to_index(""), None);
        assert_eq!(col_to_index("A1"), None);
        assert_eq!(index_to_col(0), "A");
        assert_eq!(index_to_col(25), "Z");
        assert_eq!(index_to_col(26), "AA");
        assert_eq!(index_to_col(701), "ZZ");
        assert_eq!(index_to_col(702), "AAA");
    }

    #[test]
    fn columns_past_the_grid_are_rejected() {
        assert_eq!(col_to_index("XFE"), None);
        assert_eq!(col_to_index("ZZZZ"), None);
        assert_eq!(col_to_index("ZZZZZZZZZZZZZZZ"), None);
        assert_eq!(col_to_index(&"Z".repeat(64)), None);
    }

    #[test]
    fn references() {
        assert_eq!(reference_to_index("A1"), Some((0, 0)));
        assert_eq!(reference_to_index("C12"), Some((11, 2)));
        assert_eq!(reference_to_index("XFD1048576"), Some((1_048_575, 16_383)));
        assert_eq!(reference_to_index("A0"), None);
        assert_eq!(reference_to_index("12"), None);
    }

    #[test]
    fn references_past_the_grid_are_rejected() {
        assert_eq!(reference_to_index("A1048577"), None);
        assert_eq!(reference_to_index("XFE1"), None);
        assert_eq!(reference_to_index("A99999999999999999"), None);
        assert_eq!(reference_to_index("A999999999999999999999999"), None);
        assert_eq!(reference_to_index("ZZZZZZZZZZZZZZZ1"), None);
    }

    #[test]
    fn positions_are_checked_against_the_grid() {
        assert_eq!(check_position(0, 0).ok(), Some((0, 0)));
        assert_eq!(check_position(MAX_ROWS - 1, MAX_COLS - 1).ok(), Some((MAX_ROWS - 1, MAX_COLS - 1)));
        assert!(matches!(check_position(MAX_ROWS, 0), Err(SpreadsheetError::CellOutOfRange(_))));
        assert!(matches!(check_position(0, MAX_COLS), Err(SpreadsheetError::CellOutOfRange(_))));
        assert!(check_position(usize::MAX, usize::MAX).is_err());
    }
}
