use uuid::Uuid;

use crate::constants::{AGE_PREFIX, BEST_AGE_COLUMN, ERROR_SUFFIX};
use crate::pipeline::processing::normalize::{GeneralizedRow, GeneralizedTable};
use crate::types::Datum;

/// A datum ready to be written, with the vocabulary it depends on
#[derive(Debug, Clone, PartialEq)]
pub struct MappedDatum {
    pub datum: Datum,
    pub description: String,
}

/// Elementwise closeness as numpy's `allclose` defines it
pub fn allclose(a: f64, b: f64) -> bool {
    const RTOL: f64 = 1e-5;
    const ATOL: f64 = 1e-8;
    (a - b).abs() <= ATOL + RTOL * b.abs()
}

/// Maps generalized table rows to datum records
pub struct DatumMapper<'a> {
    table: &'a GeneralizedTable,
    error_metric: &'a str,
}

impl<'a> DatumMapper<'a> {
    pub fn new(table: &'a GeneralizedTable, error_metric: &'a str) -> Self {
        Self {
            table,
            error_metric,
        }
    }

    /// Whether a column becomes a datum of its own
    fn is_value_column(key: &str) -> bool {
        !key.ends_with(ERROR_SUFFIX) && key != BEST_AGE_COLUMN
    }

    /// One datum per numeric value column of `row`, in column order.
    pub fn map_row(&self, row: &GeneralizedRow, analysis_id: Uuid) -> Vec<MappedDatum> {
        let best_age = self
            .table
            .value(row, BEST_AGE_COLUMN)
            .and_then(|c| c.as_f64());

        let mut out = Vec::new();
        for (i, column) in self.table.meta.columns().iter().enumerate() {
            if !Self::is_value_column(&column.key) {
                continue;
            }
            let Some(value) = row.values.get(i).and_then(|c| c.as_f64()) else {
                continue;
            };

            let error_key = format!("{}{}", column.key, ERROR_SUFFIX);
            let error_column = self.table.meta.get(&error_key);
            let error = error_column
                .and_then(|_| self.table.value(row, &error_key))
                .and_then(|c| c.as_f64());
            let error_unit = error_column.and_then(|c| c.unit.clone());

            let is_interpreted = column.key.starts_with(AGE_PREFIX);
            let is_accepted = is_interpreted
                .then(|| best_age.map_or(false, |best| allclose(value, best)));

            out.push(MappedDatum {
                datum: Datum {
                    id: None,
                    analysis_id,
                    parameter: column.key.clone(),
                    value,
                    unit: column.unit.clone(),
                    error,
                    error_unit,
                    error_metric: self.error_metric.to_string(),
                    is_interpreted,
                    is_accepted,
                },
                description: column.description.clone(),
            });
        }
        out
    }
}
