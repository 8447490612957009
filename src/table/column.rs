use crate::table::format_number;
use chrono::NaiveDate;
use chrono::NaiveDateTime;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];
const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Type a text column can be normalized to.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum ColumnType {
    Number,
    Date,
    DateTime,
    Text,
}

impl ColumnType {
    /// Classifies one non-empty cell.
    fn of(value: &str) -> ColumnType {
        let value = value.trim();
        if parse_number(value).is_some() {
            ColumnType::Number
        } else if parse_date(value).is_some() {
            ColumnType::Date
        } else if parse_datetime(value).is_some() {
            ColumnType::DateTime
        } else {
            ColumnType::Text
        }
    }

    /// Detects the most specific type shared by every non-empty value.
    /// Dates mixed with datetimes widen to datetimes; anything else falls back to text.
    pub(crate) fn detect<'a>(values: impl Iterator<Item = &'a str>) -> ColumnType {
        let mut detected = None::<ColumnType>;
        for value in values.filter(|value| !value.trim().is_empty()) {
            let kind = ColumnType::of(value);
            detected = Some(match (detected, kind) {
                (_, ColumnType::Text) => return ColumnType::Text,
                (None, kind) => kind,
                (Some(previous), kind) if previous == kind => kind,
                (Some(ColumnType::Date), ColumnType::DateTime) | (Some(ColumnType::DateTime), ColumnType::Date) => {
                    ColumnType::DateTime
                }
                _ => return ColumnType::Text,
            });
        }
        detected.unwrap_or(ColumnType::Text)
    }

    /// Rewrites one value in the canonical form of this type, leaving it unchanged
    /// when it does not parse (empty cells included).
    pub(crate) fn normalize(&self, value: &str) -> String {
        let trimmed = value.trim();
        let normalized = match self {
            ColumnType::Number => parse_number(trimmed).map(format_number),
            ColumnType::Date => parse_date(trimmed).map(|date| date.format("%Y-%m-%d").to_string()),
            ColumnType::DateTime => parse_datetime(trimmed)
                .or_else(|| parse_date(trimmed).and_then(|date| date.and_hms_opt(0, 0, 0)))
                .map(|datetime| datetime.format("%Y-%m-%d %H:%M:%S").to_string()),
            ColumnType::Text => None,
        };
        normalized.unwrap_or_else(|| value.to_owned())
    }
}

fn parse_number(value: &str) -> Option<f64> {
    // `inf` and `NaN` parse as floats but are not numbers a sheet can show
    value
        .replace(',', "")
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
        .filter(|_| value.chars().any(|c| c.is_ascii_digit()))
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
}

fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
}
