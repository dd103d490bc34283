//! Whitespace-separated numeric text files.
//!
//! Lines starting with `#` and blank lines are skipped. Values may be
//! separated by spaces, tabs or commas.

use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView1};
use std::fmt::Write as _;
use std::path::Path;

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        Error::Configuration(format!("cannot read {}: {e}", path.display()))
    })
}

/// Parse a numeric table; every non-comment line becomes one row.
pub fn parse_table(contents: &str, origin: &Path) -> Result<Vec<Vec<f64>>> {
    let mut rows = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|token| !token.is_empty())
            .map(|token| {
                token.parse::<f64>().map_err(|_| {
                    Error::Configuration(format!(
                        "{}:{}: cannot parse '{token}' as a number",
                        origin.display(),
                        line_no + 1
                    ))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        rows.push(row);
    }
    Ok(rows)
}

/// Read a numeric table from disk.
pub fn read_table(path: &Path) -> Result<Vec<Vec<f64>>> {
    parse_table(&read_source(path)?, path)
}

/// Read a table whose rows must all have the same number of columns.
pub fn read_matrix(path: &Path) -> Result<Array2<f64>> {
    let rows = read_table(path)?;
    let n_cols = rows.first().map_or(0, Vec::len);
    if rows.is_empty() || n_cols == 0 {
        return Err(Error::Configuration(format!(
            "{} contains no data",
            path.display()
        )));
    }
    if let Some(bad) = rows.iter().position(|row| row.len() != n_cols) {
        return Err(Error::Configuration(format!(
            "{}: data row {} has {} columns, expected {n_cols}",
            path.display(),
            bad + 1,
            rows[bad].len()
        )));
    }
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((flat.len() / n_cols, n_cols), flat)
        .map_err(|e| Error::Configuration(format!("{}: {e}", path.display())))
}

/// Read every number in the file in reading order.
pub fn read_values(path: &Path) -> Result<Vec<f64>> {
    Ok(read_table(path)?.into_iter().flatten().collect())
}

/// Write one value per line. NaN entries are written as `NaN`.
pub fn write_values(path: &Path, values: &[f64]) -> Result<()> {
    let mut out = String::with_capacity(values.len() * 12);
    for value in values {
        // Infallible for String
        let _ = writeln!(out, "{value}");
    }
    std::fs::write(path, out).map_err(|e| Error::io(path, e))
}

/// Write one sky map, one pixel value per line in NESTED order.
///
/// Integer-valued counts are written without a fractional part.
pub fn write_map(path: &Path, map: ArrayView1<f64>) -> Result<()> {
    let values: Vec<f64> = map.iter().copied().collect();
    write_values(path, &values)
}
