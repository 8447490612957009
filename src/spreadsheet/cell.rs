use crate::table::Value;
use chrono::Duration;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::NaiveTime;

const MILLISECONDS_PER_DAY: f64 = 86_400_000.0;
/// Days between the 1900 and 1904 date systems
const DATE1904_OFFSET: i64 = 1462;

/// Types of cell data in spreadsheet files.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub(crate) enum CellType {
    #[default]
    Empty,
    /// Boolean values stored as `1` / `0`
    Boolean,
    Number,
    /// Date/time values stored as serial numbers from the 1900 epoch
    NumberDateTime1900,
    NumberDate1900,
    NumberTime1900,
    /// Date/time values stored as serial numbers from the 1904 epoch
    NumberDateTime1904,
    NumberDate1904,
    NumberTime1904,
    /// ISO 8601 date/time strings
    IsoDateTime,
    InlineString,
    /// Index into the shared string table
    SharedString,
    Error,
}

impl CellType {
    /// Maps built-in Excel number format ids to temporal cell types.
    pub(crate) fn parse_builtin_number_format_id(id: &str, is_1904: bool) -> Option<Self> {
        match id {
            "22" => Some(if is_1904 { Self::NumberDateTime1904 } else { Self::NumberDateTime1900 }),
            "14" | "15" | "16" | "17" => Some(if is_1904 { Self::NumberDate1904 } else { Self::NumberDate1900 }),
            "18" | "19" | "20" | "21" | "45" | "46" | "47" => Some(if is_1904 { Self::NumberTime1904 } else { Self::NumberTime1900 }),
            _ => None,
        }
    }

    /// Classifies a custom number format code by the date and time tokens
    /// outside of literals, escapes and bracketed sections.
    pub(crate) fn parse_custom_number_format(format: &str, is_1904: bool) -> Self {
        let mut is_escaped = false;
        let mut is_literal = false;
        let mut is_bracket = false;
        let mut is_date = false;
        let mut is_time = false;
        for character in format.chars() {
            match character {
                _ if is_escaped => is_escaped = false,
                '_' | '\\' => is_escaped = true,

                '"' if is_literal => is_literal = false,
                '"' if !is_bracket => is_literal = true,

                ']' if is_bracket => is_bracket = false,
                '[' if !is_literal => is_bracket = true,
                _ if is_literal || is_bracket => (),

                'Y' | 'y' | 'D' | 'd' => is_date = true,
                'H' | 'h' | 'S' | 's' => is_time = true,
                _ => (),
            }
        }

        match (is_date, is_time, is_1904) {
            (true, true, false) => Self::NumberDateTime1900,
            (true, true, true) => Self::NumberDateTime1904,
            (true, false, false) => Self::NumberDate1900,
            (true, false, true) => Self::NumberDate1904,
            (false, true, false) => Self::NumberTime1900,
            (false, true, true) => Self::NumberTime1904,
            (false, false, _) => Self::Number,
        }
    }
}

/// Converts Excel error codes to their display strings.
pub(crate) fn to_error_value(value: u8) -> &'static str {
    match value {
        0x00 => "#NULL!",
        0x07 => "#DIV/0!",
        0x0F => "#VALUE!",
        0x17 => "#REF!",
        0x1D => "#NAME?",
        0x24 => "#NUM!",
        0x2A => "#N/A",
        0x2B => "#GETTING_DATA",
        _ => "#ERROR!",
    }
}

/// A single cell as read from a worksheet, before typing.
#[derive(Clone, Debug)]
pub(crate) struct Cell {
    /// Row index (0-based)
    pub(crate) row: usize,
    /// Column index (0-based)
    pub(crate) col: usize,
    pub(crate) kind: CellType,
    /// Raw value: a number, a shared string index, text or an error code
    pub(crate) value: String,
}

impl Cell {
    /// Types the raw value. Anything that does not parse as its declared type is kept as text;
    /// error cells keep their code (`#N/A`, `#DIV/0!`) as text.
    pub(crate) fn to_value(&self, shared_strings: &[String]) -> Value {
        let serial = || self.value.parse::<f64>().ok();
        let typed = match self.kind {
            CellType::Empty => Some(Value::Null),
            CellType::Boolean => Some(Value::Bool(self.value == "1" || self.value.eq_ignore_ascii_case("true"))),
            CellType::Number => serial().map(Value::Number),
            CellType::NumberDate1900 => serial().and_then(|s| to_datetime(s, false)).map(|dt| Value::Date(dt.date())),
            CellType::NumberDate1904 => serial().and_then(|s| to_datetime(s, true)).map(|dt| Value::Date(dt.date())),
            CellType::NumberDateTime1900 => serial().and_then(|s| to_datetime(s, false)).map(Value::DateTime),
            CellType::NumberDateTime1904 => serial().and_then(|s| to_datetime(s, true)).map(Value::DateTime),
            CellType::NumberTime1900 => serial().and_then(|s| to_time_value(s, false)),
            CellType::NumberTime1904 => serial().and_then(|s| to_time_value(s, true)),
            CellType::IsoDateTime => parse_iso_datetime(&self.value),
            CellType::InlineString | CellType::Error => Some(Value::Text(self.value.to_owned())),
            CellType::SharedString => self
                .value
                .parse::<usize>()
                .ok()
                .map(|index| shared_strings.get(index).cloned().map(Value::Text).unwrap_or_default()),
        };
        typed.unwrap_or_else(|| Value::Text(self.value.to_owned()))
    }
}

/// Converts an Excel serial number to a date and time.
/// The 1900 system counts the phantom 1900-02-29, so serials below 60 shift by a day.
pub(crate) fn to_datetime(serial: f64, is_1904: bool) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let days = serial.trunc() as i64;
    let offset = if is_1904 {
        DATE1904_OFFSET
    } else if days < 60 {
        1
    } else {
        0
    };
    let milliseconds = (serial.fract() * MILLISECONDS_PER_DAY).round() as i64;
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    epoch
        .checked_add_signed(Duration::days(days + offset))?
        .checked_add_signed(Duration::milliseconds(milliseconds))
}

/// Time-formatted cells under one day are times of day; longer ones are datetimes.
fn to_time_value(serial: f64, is_1904: bool) -> Option<Value> {
    if (0.0..1.0).contains(&serial) {
        let milliseconds = (serial * MILLISECONDS_PER_DAY).round() as u32 % 86_400_000;
        NaiveTime::from_num_seconds_from_midnight_opt(milliseconds / 1000, (milliseconds % 1000) * 1_000_000).map(Value::Time)
    } else {
        to_datetime(serial, is_1904).map(Value::DateTime)
    }
}

fn parse_iso_datetime(value: &str) -> Option<Value> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(Value::DateTime)
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d").map(Value::Date))
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S%.f").map(Value::Time))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(kind: CellType, value: &str) -> Cell {
        Cell {
            row: 0,
            col: 0,
            kind,
            value: value.to_owned(),
        }
    }

    #[test]
    fn custom_formats_ignore_literals_and_colors() {
        assert_eq!(CellType::parse_custom_number_format("yyyy-mm-dd", false), CellType::NumberDate1900);
        assert_eq!(CellType::parse_custom_number_format("yyyy-mm-dd hh:mm", true), CellType::NumberDateTime1904);
        assert_eq!(CellType::parse_custom_number_format("[h]:mm:ss", false), CellType::NumberTime1900);
        assert_eq!(CellType::parse_custom_number_format("[Red]0.00", false), CellType::Number);
        assert_eq!(CellType::parse_custom_number_format("0.0\" days\"", false), CellType::Number);
        assert_eq!(CellType::parse_custom_number_format("#,##0_);\\(#,##0\\)", false), CellType::Number);
    }

    #[test]
    fn builtin_formats() {
        assert_eq!(CellType::parse_builtin_number_format_id("14", false), Some(CellType::NumberDate1900));
        assert_eq!(CellType::parse_builtin_number_format_id("22", true), Some(CellType::NumberDateTime1904));
        assert_eq!(CellType::parse_builtin_number_format_id("2", false), None);
    }

    #[test]
    fn serial_numbers_to_dates() {
        let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert_eq!(to_datetime(1.0, false).unwrap().date(), date(1900, 1, 1));
        assert_eq!(to_datetime(59.0, false).unwrap().date(), date(1900, 2, 28));
        assert_eq!(to_datetime(61.0, false).unwrap().date(), date(1900, 3, 1));
        assert_eq!(to_datetime(45_000.0, false).unwrap().date(), date(2023, 3, 15));
        assert_eq!(to_datetime(0.0, true).unwrap().date(), date(1904, 1, 1));
        assert_eq!(to_datetime(-1.0, false), None);
    }

    #[test]
    fn cells_become_values() {
        let shared = vec!["first".to_owned(), "second".to_owned()];
        assert_eq!(cell(CellType::SharedString, "1").to_value(&shared), Value::from("second"));
        assert_eq!(cell(CellType::SharedString, "9").to_value(&shared), Value::Null);
        assert_eq!(cell(CellType::Number, "2.5").to_value(&shared), Value::Number(2.5));
        assert_eq!(cell(CellType::Boolean, "1").to_value(&shared), Value::Bool(true));
        assert_eq!(cell(CellType::Error, "#N/A").to_value(&shared), Value::from("#N/A"));
        assert_eq!(
            cell(CellType::NumberDate1900, "45000").to_value(&shared).to_string(),
            "2023-03-15"
        );
        assert_eq!(
            cell(CellType::NumberDateTime1900, "45000.5").to_value(&shared).to_string(),
            "2023-03-15 12:00:00"
        );
        assert_eq!(cell(CellType::NumberTime1900, "0.75").to_value(&shared).to_string(), "18:00:00");
        assert_eq!(
            cell(CellType::IsoDateTime, "2024-02-01T08:30:00").to_value(&shared).to_string(),
            "2024-02-01 08:30:00"
        );
        assert_eq!(cell(CellType::Number, "abc").to_value(&shared), Value::from("abc"));
    }
}
