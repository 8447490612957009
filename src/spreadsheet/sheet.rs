use crate::error::SheetPushError;
use crate::spreadsheet::cell::Cell;
use crate::spreadsheet::SpreadsheetError;
use crate::spreadsheet::MAX_GRID_CELLS;
use crate::table::Table;
use crate::table::Value;

/// Cells collected from one worksheet, with the bounds of the used area.
#[derive(Default)]
pub(crate) struct Sheet {
    pub(crate) cells: Vec<Cell>,
    pub(crate) row_lower_bound: Option<usize>,
    pub(crate) row_upper_bound: Option<usize>,
    pub(crate) col_lower_bound: Option<usize>,
    pub(crate) col_upper_bound: Option<usize>,
}

impl Sheet {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Adds a non-empty cell and widens the used area.
    pub(super) fn push(&mut self, cell: Cell) {
        self.update_bound(cell.row, cell.col);
        self.cells.push(cell);
    }

    fn update_bound(&mut self, row: usize, col: usize) {
        let widen = |bound: &mut Option<usize>, value: usize, keep: fn(usize, usize) -> usize| {
            *bound = Some(bound.map_or(value, |current| keep(current, value)));
        };
        widen(&mut self.row_lower_bound, row, usize::min);
        widen(&mut self.row_upper_bound, row, usize::max);
        widen(&mut self.col_lower_bound, col, usize::min);
        widen(&mut self.col_upper_bound, col, usize::max);
    }

    /// Lays the used area out as a table: its first row is the header, every later row
    /// (blank ones included) is data. Returns `None` for a sheet without cells, and fails
    /// before allocating when the used area exceeds what a spreadsheet holds.
    pub(crate) fn into_table(self, name: &str, shared_strings: &[String]) -> Result<Option<Table>, SheetPushError> {
        let Some((row_lower, row_upper)) = self.row_lower_bound.zip(self.row_upper_bound) else {
            return Ok(None);
        };
        let Some((col_lower, col_upper)) = self.col_lower_bound.zip(self.col_upper_bound) else {
            return Ok(None);
        };
        let width = col_upper - col_lower + 1;
        let height = row_upper - row_lower + 1;
        match width.checked_mul(height) {
            Some(cells) if cells <= MAX_GRID_CELLS => (),
            cells => Err(SpreadsheetError::TooManyCells(cells.unwrap_or(usize::MAX)))?,
        }
        let mut grid = vec![vec![Value::Null; width]; height];
        for cell in &self.cells {
            grid[cell.row - row_lower][cell.col - col_lower] = cell.to_value(shared_strings);
        }
        let mut rows = grid.into_iter();
        let columns = rows
            .next()
            .map(|header| header.iter().map(Value::to_string).collect())
            .unwrap_or_default();
        Ok(Some(Table::new(name, columns, rows.collect())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::cell::CellType;

    fn push(sheet: &mut Sheet, row: usize, col: usize, value: &str) {
        sheet.push(Cell {
            row,
            col,
            kind: CellType::InlineString,
            value: value.to_owned(),
        });
    }

    #[test]
    fn sheet_initial() -> Result<(), SheetPushError> {
        let sheet = Sheet::new();
        assert!(sheet.cells.is_empty());
        assert_eq!(sheet.row_lower_bound, None);
        assert_eq!(sheet.col_upper_bound, None);
        assert!(sheet.into_table("s", &[])?.is_none());
        Ok(())
    }

    #[test]
    fn sheet_update() {
        let mut sheet = Sheet::new();
        push(&mut sheet, 1, 3, "b");
        push(&mut sheet, 1, 1, "a");
        push(&mut sheet, 3, 1, "x");
        push(&mut sheet, 3, 3, "y");

        assert_eq!(sheet.cells.len(), 4);
        assert_eq!(sheet.row_lower_bound, Some(1));
        assert_eq!(sheet.row_upper_bound, Some(3));
        assert_eq!(sheet.col_lower_bound, Some(1));
        assert_eq!(sheet.col_upper_bound, Some(3));
    }

    #[test]
    fn table_starts_at_the_used_area() -> Result<(), SheetPushError> {
        let mut sheet = Sheet::new();
        push(&mut sheet, 1, 1, "a");
        push(&mut sheet, 1, 3, "b");
        push(&mut sheet, 3, 1, "x");
        push(&mut sheet, 3, 3, "y");
        let table = sheet.into_table("Data", &[])?.unwrap();

        assert_eq!(table.name, "Data");
        assert_eq!(table.columns, vec!["a", "", "b"]);
        assert_eq!(
            table.rows,
            vec![
                vec![Value::Null, Value::Null, Value::Null],
                vec![Value::from("x"), Value::Null, Value::from("y")],
            ]
        );
        Ok(())
    }

    #[test]
    fn header_only_sheet_has_no_rows() -> Result<(), SheetPushError> {
        let mut sheet = Sheet::new();
        push(&mut sheet, 0, 0, "only");
        let table = sheet.into_table("s", &[])?.unwrap();
        assert_eq!(table.columns, vec!["only"]);
        assert_eq!(table.row_count(), 0);
        Ok(())
    }

    #[test]
    fn sparse_corners_exceeding_the_cell_limit_fail_before_allocating() {
        let mut sheet = Sheet::new();
        push(&mut sheet, 0, 0, "a");
        push(&mut sheet, 1_048_575, 16_383, "z");
        assert!(matches!(
            sheet.into_table("s", &[]),
            Err(SheetPushError::SpreadsheetError(SpreadsheetError::TooManyCells(17_179_869_184)))
        ));
    }
}
