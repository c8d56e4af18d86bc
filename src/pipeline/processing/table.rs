use crate::error::{ImportError, Result};
use serde::Serialize;

/// A single spreadsheet cell after extraction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Cell {
    Empty,
    Number(f64),
    Text(String),
}

impl Cell {
    /// Build a cell from CSV text: blank is empty, numeric text is a number.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Empty;
        }
        match trimmed.parse::<f64>() {
            Ok(v) if !v.is_nan() => Cell::Number(v),
            Ok(_) => Cell::Empty,
            Err(_) => Cell::Text(raw.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }

    /// Text rendering, `None` for empty cells
    pub fn text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Number(v) => Some(v.to_string()),
            Cell::Text(s) => Some(s.clone()),
        }
    }

    /// Numeric coercion: numbers pass through, numeric text is parsed,
    /// anything else (including NaN) is `None`.
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Cell::Empty => return None,
            Cell::Number(v) => *v,
            Cell::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        value.is_finite().then_some(value)
    }

    /// Serialized form used in the stored CSV blob
    pub fn to_csv_field(&self) -> String {
        self.text().unwrap_or_default()
    }
}

/// Raw sheet contents, row-major, rows possibly ragged
pub type Grid = Vec<Vec<Cell>>;

/// Declared semantic type of a decoded column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnKind {
    Numeric,
    Text,
}

/// Descriptor for one canonical column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMeta {
    /// Canonical key, e.g. `age_206Pb_238U`
    pub key: String,
    pub description: String,
    pub unit: Option<String>,
    /// Informational; the mapper coerces each cell on its own and skips
    /// cells that are not finite numbers
    pub kind: ColumnKind,
}

/// Column metadata for a decoded table, in column order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetaFrame {
    columns: Vec<ColumnMeta>,
}

impl MetaFrame {
    pub fn new(columns: Vec<ColumnMeta>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.key.as_str())
    }

    /// First column with the given key
    pub fn get(&self, key: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.key == key)
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.key == key)
    }

    pub fn truncate(&mut self, len: usize) {
        self.columns.truncate(len);
    }
}

/// One body row keyed by its free-text analysis label
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataRow {
    pub label: String,
    pub values: Vec<Cell>,
}

/// Decoded measurements; every row has exactly one value per column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataFrame {
    columns: Vec<String>,
    rows: Vec<DataRow>,
}

impl DataFrame {
    pub fn new(columns: Vec<String>, rows: Vec<DataRow>) -> Result<Self> {
        if let Some(bad) = rows.iter().find(|r| r.values.len() != columns.len()) {
            return Err(ImportError::ShapeMismatch {
                data: bad.values.len(),
                meta: columns.len(),
            });
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[DataRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<DataRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn truncate_columns(&mut self, len: usize) {
        self.columns.truncate(len);
        for row in &mut self.rows {
            row.values.truncate(len);
        }
    }
}

/// A data frame paired with its column metadata.
/// Invariant: `data.columns()` equals `meta.keys()` in count and order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedTable {
    pub data: DataFrame,
    pub meta: MetaFrame,
}

impl DecodedTable {
    pub fn new(data: DataFrame, meta: MetaFrame) -> Result<Self> {
        let same = data.columns().len() == meta.len()
            && data.columns().iter().map(String::as_str).eq(meta.keys());
        if !same {
            return Err(ImportError::ShapeMismatch {
                data: data.columns().len(),
                meta: meta.len(),
            });
        }
        Ok(Self { data, meta })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_parse() {
        assert_eq!(Cell::parse(""), Cell::Empty);
        assert_eq!(Cell::parse("  "), Cell::Empty);
        assert_eq!(Cell::parse("12.5"), Cell::Number(12.5));
        assert_eq!(Cell::parse("(Ma)"), Cell::Text("(Ma)".to_string()));
    }

    #[test]
    fn test_numeric_coercion_skips_text_and_nan() {
        assert_eq!(Cell::Text(" 3.25 ".into()).as_f64(), Some(3.25));
        assert_eq!(Cell::Text("n.d.".into()).as_f64(), None);
        assert_eq!(Cell::Number(f64::NAN).as_f64(), None);
        assert_eq!(Cell::Empty.as_f64(), None);
    }

    #[test]
    fn test_data_frame_rejects_ragged_rows() {
        let rows = vec![DataRow {
            label: "A-1".into(),
            values: vec![Cell::Number(1.0)],
        }];
        let result = DataFrame::new(vec!["U".into(), "U_Th".into()], rows);
        assert!(matches!(
            result,
            Err(ImportError::ShapeMismatch { data: 1, meta: 2 })
        ));
    }

    #[test]
    fn test_decoded_table_requires_matching_columns() {
        let data = DataFrame::new(vec!["U".into()], vec![]).unwrap();
        let meta = MetaFrame::new(vec![
            ColumnMeta {
                key: "U".into(),
                description: "Uranium concentration".into(),
                unit: Some("ppm".into()),
                kind: ColumnKind::Numeric,
            },
            ColumnMeta {
                key: "U_Th".into(),
                description: "U/Th".into(),
                unit: Some("ratio".into()),
                kind: ColumnKind::Numeric,
            },
        ]);
        assert!(DecodedTable::new(data, meta).is_err());
    }
}
