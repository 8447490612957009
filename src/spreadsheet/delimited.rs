//! Comma (or otherwise) separated text files.
//!
//! The encoding and delimiter are not declared, so a fixed list of combinations is tried
//! in order and the first one yielding a real table (more than one column, at least one
//! data row) wins. When none does, the bytes are read as lossy UTF-8 with commas and any
//! non-empty result is accepted.

use crate::error::SheetPushError;
use crate::table::Table;
use crate::table::Value;
use csv::ReaderBuilder;
use std::borrow::Cow;
use tracing::debug;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

#[derive(Copy, Clone, Debug, PartialEq)]
enum TextEncoding {
    Utf8,
    /// ISO-8859-1
    Latin1,
}

/// Latin-1 decodes any byte sequence, so it ends the list: no single-byte encoding placed
/// after it (cp1252 included) could ever be reached. Bytes `0x80..=0x9F` therefore come out
/// as C1 control characters, not as cp1252 punctuation.
const ENCODINGS: [TextEncoding; 2] = [TextEncoding::Utf8, TextEncoding::Latin1];

impl TextEncoding {
    /// Strict decoding; `None` when the bytes are not valid in this encoding.
    fn decode<'a>(&self, bytes: &'a [u8]) -> Option<Cow<'a, str>> {
        match self {
            TextEncoding::Utf8 => std::str::from_utf8(bytes).ok().map(Cow::Borrowed),
            // Every byte maps to the code point of the same value
            TextEncoding::Latin1 => Some(Cow::Owned(bytes.iter().map(|byte| char::from(*byte)).collect())),
        }
    }
}

/// Parses delimited text into a table named `name`.
pub(crate) fn read_table(bytes: &[u8], name: &str) -> Result<Table, SheetPushError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    for encoding in ENCODINGS {
        let Some(text) = encoding.decode(bytes) else {
            continue;
        };
        for delimiter in DELIMITERS {
            let Ok(records) = parse(&text, delimiter) else {
                continue;
            };
            if let Some(table) = to_table(name, records).filter(|table| table.column_count() > 1 && table.row_count() > 0) {
                debug!(file = name, ?encoding, delimiter = %char::from(delimiter), "Detected CSV layout");
                return Ok(table);
            }
        }
    }

    let text = String::from_utf8_lossy(bytes);
    let records = parse(&text, b',')?;
    match to_table(name, records) {
        Some(table) => {
            debug!(file = name, columns = table.column_count(), rows = table.row_count(), "Read CSV with default settings");
            Ok(table)
        }
        None => Err(SheetPushError::UnreadableFile(name.to_owned(), "no columns found".to_owned())),
    }
}

fn parse(text: &str, delimiter: u8) -> Result<Vec<Vec<String>>, SheetPushError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    let mut records = Vec::new();
    for record in reader.records() {
        records.push(record?.iter().map(str::to_owned).collect());
    }
    Ok(records)
}

/// First record is the header; ragged records are padded to the widest one.
fn to_table(name: &str, records: Vec<Vec<String>>) -> Option<Table> {
    let width = records.iter().map(Vec::len).max().filter(|width| *width > 0)?;
    let mut records = records.into_iter();
    let mut columns = records.next()?;
    columns.resize(width, String::new());
    let rows = records
        .map(|record| {
            let mut row: Vec<Value> = record
                .into_iter()
                .map(|field| if field.is_empty() { Value::Null } else { Value::Text(field) })
                .collect();
            row.resize(width, Value::Null);
            row
        })
        .collect();
    Some(Table::new(name, columns, rows))
}
