//! Table decoding for LaserChron summary sheets.
//!
//! The sheet layout is an optional `Table ...` title row, a group header row,
//! two header rows (isotope / unit), then one body row per analysis with the
//! analysis label in the first column.

use crate::error::{ImportError, Result};
use crate::pipeline::processing::table::{
    Cell, ColumnKind, ColumnMeta, DataFrame, DataRow, DecodedTable, Grid, MetaFrame,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

static UNIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\((.+)\)").expect("unit regex"));
static UNIT_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\(.+\)$").expect("unit suffix regex"));
static PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[*/\s.]+").expect("punctuation regex"));
static ISOTOPE_AGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{3}\w{1,2}\s\d{3}\w{1,2}) age").expect("isotope age regex"));
static CONCORDANCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Conc$").expect("conc regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Knobs for decoding; the column count comes from configuration
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    pub expected_columns: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            expected_columns: crate::constants::EXPECTED_COLUMNS,
        }
    }
}

/// Merge the two header cells of one column into a single header text.
pub fn merge_header(first: &str, second: Option<&str>) -> String {
    match second.map(str::trim).filter(|s| !s.is_empty()) {
        None => first.to_string(),
        Some(second) => {
            if first.contains("Pb") || second.contains("Pb") || second.contains("Th") {
                format!("{}/{}", first, second)
            } else {
                format!("{} {}", first, second)
            }
        }
    }
}

/// Parenthesized unit token of a merged header, if any.
pub fn extract_unit(header: &str) -> Option<String> {
    UNIT.captures(header).map(|c| c[1].to_string())
}

/// Canonical column key for a normalized header text.
///
/// `206Pb*/238U* age` becomes `age_206Pb_238U`, `Best age` becomes
/// `best_age`, and `Conc` becomes `concordance`.
pub fn canonical_key(text: &str) -> String {
    let spaced = PUNCTUATION.replace_all(text, " ");
    let trimmed = spaced.trim();
    let aged = ISOTOPE_AGE.replace(trimmed, "age $1");
    let best = aged.replace("Best age", "best age");
    let conc = CONCORDANCE.replace(&best, "concordance");
    WHITESPACE.replace_all(&conc, "_").into_owned()
}

/// Header texts and units for the kept columns, after unit inference and
/// `±` renaming. Units that cannot be determined stay `None`.
pub fn resolve_headers(merged: &[String]) -> Vec<(String, Option<String>)> {
    let extracted: Vec<Option<String>> = merged.iter().map(|h| extract_unit(h)).collect();
    let mut texts: Vec<String> = merged.to_vec();
    let mut units = extracted.clone();

    for i in 0..merged.len() {
        if units[i].is_some() {
            continue;
        }
        let next_unit = extracted.get(i + 1).and_then(|u| u.as_deref());
        let text = texts[i].clone();
        if next_unit == Some("Ma") {
            units[i] = Some("Ma".to_string());
            texts[i] = format!("{} age", text);
        } else if next_unit == Some("%") {
            units[i] = Some("ratio".to_string());
        } else if text.contains('/') && !text.contains("age") {
            units[i] = Some("ratio".to_string());
        } else if text.contains("error corr") {
            units[i] = Some("dimensionless".to_string());
        }
    }

    let mut stripped: Vec<String> = texts
        .iter()
        .map(|t| UNIT_SUFFIX.replace(t.trim(), "").into_owned())
        .collect();
    for i in 1..stripped.len() {
        if stripped[i].trim() == "±" {
            stripped[i] = format!("{} error", stripped[i - 1]);
        }
    }

    let missing: Vec<&str> = stripped
        .iter()
        .zip(&units)
        .filter(|(_, u)| u.is_none())
        .map(|(t, _)| t.as_str())
        .collect();
    if !missing.is_empty() {
        warn!(columns = ?missing, "Could not determine units for all columns");
    }

    stripped.into_iter().zip(units).collect()
}

fn describe(key: &str, text: &str) -> String {
    match key {
        "U" => "Uranium concentration".to_string(),
        "concordance" => "Concordance".to_string(),
        _ => text.to_string(),
    }
}

fn clean_label(label: &str) -> String {
    label.replace(" <>", "").trim().to_string()
}

fn column_kind(rows: &[DataRow], index: usize) -> ColumnKind {
    let numeric = rows
        .iter()
        .map(|r| &r.values[index])
        .filter(|c| !c.is_empty())
        .all(|c| c.as_f64().is_some());
    if numeric {
        ColumnKind::Numeric
    } else {
        ColumnKind::Text
    }
}

/// Decode a raw data sheet into a data frame and its column metadata.
#[instrument(skip(grid), fields(rows = grid.len()))]
pub fn decode_table(grid: &Grid, options: DecodeOptions) -> Result<DecodedTable> {
    let mut rows: Vec<&Vec<Cell>> = grid.iter().collect();

    let titled = rows
        .first()
        .and_then(|r| r.first())
        .and_then(|c| match c {
            Cell::Text(s) => Some(s.starts_with("Table")),
            _ => None,
        })
        .unwrap_or(false);
    if titled {
        rows.remove(0);
    }
    rows.retain(|r| r.iter().any(|c| !c.is_empty()));

    if rows.len() < 3 {
        return Err(ImportError::MalformedTable(format!(
            "expected a group header and two header rows, found {} rows",
            rows.len()
        )));
    }

    let header_one = rows[1];
    let header_two = rows[2];
    let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);

    // Columns that are empty in the first header row carry end matter, not data
    let mut kept: Vec<usize> = Vec::new();
    let mut merged: Vec<String> = Vec::new();
    for j in 1..width {
        let Some(first) = header_one.get(j).and_then(Cell::text) else {
            continue;
        };
        let second = header_two.get(j).and_then(Cell::text);
        merged.push(merge_header(&first, second.as_deref()));
        kept.push(j);
    }
    debug!(columns = kept.len(), "Merged header rows");

    let headers = resolve_headers(&merged);

    let body: Vec<DataRow> = rows[3..]
        .iter()
        .filter_map(|row| {
            let label = row.first().and_then(Cell::text).map(|l| clean_label(&l))?;
            let values: Vec<Cell> = kept
                .iter()
                .map(|&j| row.get(j).cloned().unwrap_or(Cell::Empty))
                .collect();
            if label.is_empty() || values.iter().all(Cell::is_empty) {
                return None;
            }
            Some(DataRow { label, values })
        })
        .collect();

    if body.is_empty() {
        return Err(ImportError::MalformedTable("empty data frame".to_string()));
    }

    let columns: Vec<ColumnMeta> = headers
        .into_iter()
        .enumerate()
        .map(|(i, (text, unit))| {
            let key = canonical_key(&text);
            ColumnMeta {
                description: describe(&key, &text),
                key,
                unit,
                kind: column_kind(&body, i),
            }
        })
        .collect();

    let text_columns: Vec<&str> = columns
        .iter()
        .filter(|c| c.kind == ColumnKind::Text)
        .map(|c| c.key.as_str())
        .collect();
    if !text_columns.is_empty() {
        warn!(columns = ?text_columns, "Non-numeric cells will not be imported");
    }

    let mut meta = MetaFrame::new(columns);
    let keys: Vec<String> = meta.keys().map(str::to_string).collect();
    let mut data = DataFrame::new(keys, body)?;
    if data.columns().len() != meta.len() {
        return Err(ImportError::ShapeMismatch {
            data: data.columns().len(),
            meta: meta.len(),
        });
    }

    let ncols = options.expected_columns;
    if meta.len() > ncols {
        let head: HashSet<&str> = meta.keys().take(ncols).collect();
        let repeated = meta.keys().skip(ncols).any(|k| head.contains(k));
        if repeated {
            info!(
                columns = meta.len(),
                kept = ncols,
                "Ignoring duplicate output columns"
            );
            data.truncate_columns(ncols);
            meta.truncate(ncols);
        }
    }

    DecodedTable::new(data, meta)
}
