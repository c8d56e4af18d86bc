//! Workbook data-sheet extraction and the CSV form it is stored in.

use crate::error::{ImportError, Result};
use crate::pipeline::processing::table::{Cell, Grid};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::io::Cursor;
use tracing::debug;

fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) if f.is_nan() => Cell::Empty,
        Data::Float(f) => Cell::Number(*f),
        Data::DateTime(dt) => Cell::Number(dt.as_f64()),
        Data::String(s) if s.trim().is_empty() => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Bool(b) => Cell::Text(b.to_string()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::Error(_) => Cell::Empty,
    }
}

/// Read the named sheet from workbook bytes (xls, xlsx or xlsm).
///
/// Returns `Ok(None)` when the workbook has no such sheet. Cells keep their
/// absolute positions: leading empty rows and columns are padded back in.
pub fn read_sheet(bytes: &[u8], sheet: &str) -> Result<Option<Grid>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| ImportError::Workbook(e.to_string()))?;

    if !workbook.sheet_names().iter().any(|name| name == sheet) {
        debug!(sheet, sheets = ?workbook.sheet_names(), "Workbook has no data sheet");
        return Ok(None);
    }

    let range = workbook
        .worksheet_range(sheet)
        .map_err(|e| ImportError::Workbook(e.to_string()))?;

    let (row_offset, col_offset) = range
        .start()
        .map(|(r, c)| (r as usize, c as usize))
        .unwrap_or((0, 0));
    let width = col_offset + range.width();

    let mut grid: Grid = vec![vec![Cell::Empty; width]; row_offset];
    for row in range.rows() {
        let mut cells = vec![Cell::Empty; col_offset];
        cells.extend(row.iter().map(cell_from_data));
        grid.push(cells);
    }
    Ok(Some(grid))
}

/// Serialize a grid as CSV text, one record per sheet row.
pub fn grid_to_csv(grid: &Grid) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(Vec::new());
    for row in grid {
        writer.write_record(row.iter().map(Cell::to_csv_field))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ImportError::Io(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| ImportError::MalformedTable(e.to_string()))
}

/// Parse a stored CSV blob back into a grid of cells.
pub fn datatable_grid(csv_data: &str) -> Result<Grid> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(csv_data.as_bytes());
    let mut grid = Grid::new();
    for record in reader.records() {
        let record = record?;
        grid.push(record.iter().map(Cell::parse).collect());
    }
    Ok(grid)
}
