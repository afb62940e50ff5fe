//! Spreadsheet row reading for downloaded report artifacts

use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};

use crate::error::{CollectorError, CollectorResult};

/// Read all data rows from the first sheet, skipping the header row.
///
/// Cells are stringified; numeric cells drop a trailing `.0` so ids
/// survive Excel's float round-trip.
pub fn read_rows(path: &Path) -> CollectorResult<Vec<Vec<String>>> {
    let mut workbook = open_workbook_auto(path).map_err(|e| {
        CollectorError::ArtifactInvalid(format!("unreadable spreadsheet {}: {e}", path.display()))
    })?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| {
            CollectorError::ArtifactInvalid(format!("{} has no sheets", path.display()))
        })?
        .map_err(|e| {
            CollectorError::ArtifactInvalid(format!("bad sheet in {}: {e}", path.display()))
        })?;

    let mut rows = range.rows();
    // First row is the column header
    rows.next();

    Ok(rows
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect())
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_stringify_without_float_artifacts() {
        assert_eq!(cell_to_string(&Data::Empty), "");
        assert_eq!(cell_to_string(&Data::String("North".into())), "North");
        assert_eq!(cell_to_string(&Data::Float(12345.0)), "12345");
        assert_eq!(cell_to_string(&Data::Float(0.25)), "0.25");
        assert_eq!(cell_to_string(&Data::Int(-3)), "-3");
        assert_eq!(cell_to_string(&Data::Bool(true)), "true");
    }

    #[test]
    fn unreadable_file_is_artifact_invalid() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("not_a_sheet.xlsx");
        std::fs::write(&path, b"plainly not a spreadsheet").expect("write");

        match read_rows(&path) {
            Err(CollectorError::ArtifactInvalid(_)) => {}
            other => panic!("expected ArtifactInvalid, got {other:?}"),
        }
    }
}
