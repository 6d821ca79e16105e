use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::layout::ensure_dir;

/// Read every row of a CSV table with a header line
pub fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open table: {}", path.display()))?;
    rdr.deserialize()
        .collect::<Result<Vec<T>, csv::Error>>()
        .with_context(|| format!("Failed to parse table: {}", path.display()))
}

/// Read a table if it exists, `None` otherwise
pub fn read_optional_table<T: DeserializeOwned>(path: &Path) -> Result<Option<Vec<T>>> {
    if path.exists() {
        read_table(path).map(Some)
    } else {
        Ok(None)
    }
}

/// Write rows to a CSV table, creating the parent directory
pub fn write_table<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    ensure_dir(path)?;
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create table: {}", path.display()))?;
    for row in rows {
        wtr.serialize(row)
            .with_context(|| format!("Failed to write row to {}", path.display()))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Header line of a CSV table, used by tests and the environment check
pub fn table_columns(path: &Path) -> Result<Vec<String>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open table: {}", path.display()))?;
    Ok(rdr.headers()?.iter().map(|h| h.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        name: String,
        value: Option<f64>,
        flag: bool,
    }

    #[test]
    fn test_missing_values_are_empty_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("rows.csv");
        let rows = vec![
            Row {
                name: "a".into(),
                value: Some(1.5),
                flag: true,
            },
            Row {
                name: "b".into(),
                value: None,
                flag: false,
            },
        ];
        write_table(&path, &rows).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("name,value,flag\n"));
        assert!(text.contains("b,,false"));

        let back: Vec<Row> = read_table(&path).unwrap();
        assert_eq!(back, rows);
        assert_eq!(table_columns(&path).unwrap(), vec!["name", "value", "flag"]);
    }

    #[test]
    fn test_optional_table_absent() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Option<Vec<Row>> =
            read_optional_table(&dir.path().join("missing.csv")).unwrap();
        assert!(rows.is_none());
    }
}
