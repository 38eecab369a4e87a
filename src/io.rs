//! Plain-text persistence of rectangular numeric tables (one row per point).

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use ndarray::Array2;

use crate::core::{Error, Result};

/// Write `array` as whitespace-separated rows
pub fn write_2d_array(path: &Path, array: &Array2<f64>) -> Result<()> {
    let file = fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    for row in array.outer_iter() {
        let line = row
            .iter()
            .map(|v| format!("{v:e}"))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(writer, "{line}")?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a table written by [`write_2d_array`]; blank lines are skipped
pub fn read_2d_array(path: &Path) -> Result<Array2<f64>> {
    let content = fs::read_to_string(path)?;
    let mut values = Vec::new();
    let mut columns = None;
    let mut rows = 0;

    for (line_number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|token| {
                token.parse::<f64>().map_err(|e| {
                    Error::Io(format!(
                        "{}:{}: invalid number '{token}': {e}",
                        path.display(),
                        line_number + 1
                    ))
                })
            })
            .collect::<Result<Vec<f64>>>()?;
        match columns {
            None => columns = Some(row.len()),
            Some(expected) if expected != row.len() => {
                return Err(Error::Io(format!(
                    "{}:{}: expected {expected} columns, found {}",
                    path.display(),
                    line_number + 1,
                    row.len()
                )))
            }
            Some(_) => {}
        }
        values.extend(row);
        rows += 1;
    }

    Array2::from_shape_vec((rows, columns.unwrap_or(0)), values)
        .map_err(|e| Error::Io(e.to_string()))
}
