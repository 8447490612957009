//! In-memory tables: the unit that flows from ingestion through cleaning to upload.

pub mod cleaner;
pub(crate) mod column;
pub(crate) mod range;

use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::NaiveTime;
use std::fmt::Display;

/// Integral floats below this magnitude are printed without a fractional part
const INTEGER_DISPLAY_LIMIT: f64 = 1e15;

/// A raw cell value as produced by a reader.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Text(String),
    Number(f64),
    Integer(i64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(NaiveTime),
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Text(text) => f.write_str(text),
            Value::Number(number) => f.write_str(&format_number(*number)),
            Value::Integer(integer) => write!(f, "{integer}"),
            Value::Bool(flag) => write!(f, "{flag}"),
            Value::Date(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Value::DateTime(datetime) => write!(f, "{}", datetime.format("%Y-%m-%d %H:%M:%S")),
            Value::Time(time) => write!(f, "{}", time.format("%H:%M:%S")),
        }
    }
}

/// Formats a float the way a spreadsheet user expects: `3` rather than `3.0`,
/// nothing at all for NaN or infinities.
pub(crate) fn format_number(number: f64) -> String {
    if !number.is_finite() {
        String::new()
    } else if number.fract() == 0.0 && number.abs() < INTEGER_DISPLAY_LIMIT {
        format!("{}", number as i64)
    } else {
        format!("{number}")
    }
}

/// A named grid with a header row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>, rows: Vec<Vec<Value>>) -> Table {
        Table {
            name: name.into(),
            columns,
            rows,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Rows rendered as display strings, padded or cut to the header width.
    pub fn text_rows(&self) -> impl Iterator<Item = Vec<String>> + '_ {
        let width = self.columns.len();
        self.rows.iter().map(move |row| {
            let mut texts: Vec<String> = row.iter().take(width).map(Value::to_string).collect();
            texts.resize(width, String::new());
            texts
        })
    }

    /// Splits the rows into consecutive tables of at most `max_rows` rows each.
    /// The parts keep this table's name and columns; a table that fits is returned whole.
    pub fn split(self, max_rows: usize) -> Vec<Table> {
        if max_rows == 0 || self.rows.len() <= max_rows {
            return vec![self];
        }
        let Table { name, columns, rows } = self;
        let mut parts = Vec::with_capacity(rows.len().div_ceil(max_rows));
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            parts.push(Table {
                name: name.clone(),
                columns: columns.clone(),
                rows: rows.by_ref().take(max_rows).collect(),
            });
        }
        parts
    }
}
