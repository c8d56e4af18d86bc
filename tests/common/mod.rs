#![allow(dead_code)]

use rust_xlsxwriter::Workbook;
use std::path::Path;

pub const HEADER_ONE: [&str; 20] = [
    "Analysis", "U", "206Pb", "U/Th", "206Pb*", "±", "207Pb*", "±", "206Pb*", "±", "error",
    "206Pb*", "±", "207Pb*", "±", "206Pb*", "±", "Best age", "±", "Conc",
];
pub const HEADER_TWO: [&str; 20] = [
    "", "(ppm)", "204Pb", "", "207Pb*", "(%)", "235U*", "(%)", "238U", "(%)", "corr.",
    "238U*", "(Ma)", "235U", "(Ma)", "207Pb*", "(Ma)", "(Ma)", "(Ma)", "(%)",
];

/// Sheet columns of the 206Pb/238U age and the best age
pub const AGE_COLUMN: u16 = 11;
pub const BEST_AGE_COLUMN: u16 = 17;

/// Data written per analysis: every column but the seven uncertainties and best age
pub const DATA_PER_ANALYSIS: usize = 11;

/// One body row: label, 206Pb/238U age, best age
pub struct Spot<'a> {
    pub label: &'a str,
    pub age: f64,
    pub best_age: f64,
}

pub fn spot(label: &str, age: f64, best_age: f64) -> Spot<'_> {
    Spot {
        label,
        age,
        best_age,
    }
}

/// Write a workbook laid out like a LaserChron summary export.
pub fn write_datatable(path: &Path, spots: &[Spot<'_>]) -> anyhow::Result<()> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("datatable")?;

    sheet.write_string(0, 0, "Table 1. U-Pb geochronologic analyses")?;
    sheet.write_string(1, 4, "Isotope ratios")?;
    sheet.write_string(1, 11, "Apparent ages (Ma)")?;
    for (col, (one, two)) in HEADER_ONE.iter().zip(HEADER_TWO.iter()).enumerate() {
        let col = col as u16;
        sheet.write_string(2, col, *one)?;
        if !two.is_empty() {
            sheet.write_string(3, col, *two)?;
        }
    }

    for (i, spot) in spots.iter().enumerate() {
        let row = 4 + i as u32;
        sheet.write_string(row, 0, spot.label)?;
        for col in 1..20u16 {
            let value = match col {
                AGE_COLUMN => spot.age,
                BEST_AGE_COLUMN => spot.best_age,
                _ => 10.0 * col as f64 + i as f64,
            };
            sheet.write_number(row, col, value)?;
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    workbook.save(path)?;
    Ok(())
}

/// A workbook with no data sheet at all
pub fn write_other_workbook(path: &Path) -> anyhow::Result<()> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Ages")?;
    sheet.write_string(0, 0, "Sample")?;
    sheet.write_number(1, 0, 1.0)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    workbook.save(path)?;
    Ok(())
}
