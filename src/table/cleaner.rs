//! Normalizes a raw table into the all-text grid that gets uploaded.
//!
//! Cleaning replaces null markers with empty strings, optionally drops empty rows and
//! columns, renders every cell as text, repairs column names (no blanks, no line breaks,
//! at most 100 characters, unique) and optionally canonicalizes numeric and date columns.
//! It never fails and applying it twice gives the same table as applying it once.

use crate::table::column::ColumnType;
use crate::table::Table;
use crate::table::Value;
use crate::upload::UploadOptions;
use std::collections::HashMap;
use std::collections::HashSet;
use tracing::debug;

/// Longest column name a worksheet header accepts here
pub const MAX_COLUMN_NAME_LENGTH: usize = 100;

pub fn clean(table: Table, options: &UploadOptions) -> Table {
    let Table { name, columns, rows } = table;
    let source_shape = (rows.len(), columns.len());
    let width = rows.iter().map(Vec::len).max().unwrap_or(0).max(columns.len());
    let markers: HashSet<&str> = options.null_markers.iter().map(|marker| marker.trim()).collect();

    let mut grid: Vec<Vec<String>> = rows
        .into_iter()
        .map(|row| {
            let mut cells: Vec<String> = row.into_iter().map(|value| to_text(value, &markers)).collect();
            cells.resize(width, String::new());
            cells
        })
        .collect();

    if options.remove_empty_rows {
        grid.retain(|row| row.iter().any(|cell| !is_blank(cell)));
    }

    let mut names = columns;
    names.resize(width, String::new());
    let keep: Vec<bool> = (0..width)
        .map(|col| !options.remove_empty_cols || grid.is_empty() || grid.iter().any(|row| !is_blank(&row[col])))
        .collect();
    if keep.contains(&false) {
        names = retain_columns(names, &keep);
        grid = grid.into_iter().map(|row| retain_columns(row, &keep)).collect();
    }

    if options.convert_data_types {
        for col in 0..names.len() {
            let kind = ColumnType::detect(grid.iter().map(|row| row[col].as_str()));
            if kind != ColumnType::Text {
                for row in grid.iter_mut() {
                    row[col] = kind.normalize(&row[col]);
                }
            }
        }
    }

    let columns = clean_column_names(names);
    debug!(
        table = name.as_str(),
        rows = grid.len(),
        columns = columns.len(),
        source_rows = source_shape.0,
        source_columns = source_shape.1,
        "Cleaned table"
    );
    Table {
        name,
        columns,
        rows: grid.into_iter().map(|row| row.into_iter().map(Value::Text).collect()).collect(),
    }
}

/// Repairs header names: line breaks become spaces, blanks become `Column_<n>`,
/// long names are cut to 100 characters and duplicates get `_1`, `_2`, ...
pub fn clean_column_names(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::<String>::with_capacity(names.len());
    let mut counters = HashMap::<String, usize>::new();
    let mut cleaned = Vec::with_capacity(names.len());
    for (index, name) in names.into_iter().enumerate() {
        let flattened = name.replace(['\n', '\r', '\t'], " ");
        let mut name = truncate(flattened.trim(), MAX_COLUMN_NAME_LENGTH).trim_end().to_owned();
        if name.is_empty() {
            name = format!("Column_{}", index + 1);
        }
        if seen.insert(name.clone()) {
            cleaned.push(name);
            continue;
        }
        let counter = counters.entry(name.clone()).or_insert(0);
        loop {
            *counter += 1;
            let suffix = format!("_{counter}");
            let base = truncate(&name, MAX_COLUMN_NAME_LENGTH - suffix.len());
            let candidate = format!("{base}{suffix}");
            if seen.insert(candidate.clone()) {
                cleaned.push(candidate);
                break;
            }
        }
    }
    cleaned
}

fn to_text(value: Value, markers: &HashSet<&str>) -> String {
    match value {
        Value::Text(text) if markers.contains(text.trim()) => String::new(),
        Value::Text(text) => text,
        value => value.to_string(),
    }
}

fn is_blank(cell: &str) -> bool {
    cell.trim().is_empty()
}

fn retain_columns<T>(row: Vec<T>, keep: &[bool]) -> Vec<T> {
    row.into_iter()
        .zip(keep)
        .filter_map(|(cell, keep)| keep.then_some(cell))
        .collect()
}

/// Cuts a string to at most `length` characters.
fn truncate(text: &str, length: usize) -> &str {
    match text.char_indices().nth(length) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
