//! Writers for TSV matrices and JSON summaries

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ndarray::ArrayView2;
use serde::Serialize;

use crate::error::{EdaError, Result};

/// Write a labelled matrix as TSV: a header of column IDs, then one row per row ID
pub fn write_matrix<P: AsRef<Path>>(
    path: P,
    corner: &str,
    row_ids: &[String],
    col_ids: &[String],
    values: ArrayView2<'_, f64>,
    precision: usize,
) -> Result<()> {
    if values.dim() != (row_ids.len(), col_ids.len()) {
        return Err(EdaError::DimensionMismatch {
            expected: format!("{} x {} values", row_ids.len(), col_ids.len()),
            got: format!("{} x {} values", values.nrows(), values.ncols()),
        });
    }

    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "{}\t{}", corner, col_ids.join("\t"))?;

    for (i, row_id) in row_ids.iter().enumerate() {
        let row: Vec<String> = values
            .row(i)
            .iter()
            .map(|v| format!("{:.*}", precision, v))
            .collect();
        writeln!(file, "{}\t{}", row_id, row.join("\t"))?;
    }

    file.flush()?;
    Ok(())
}

/// Write named columns of values as TSV (one row per label)
pub fn write_columns<P: AsRef<Path>>(
    path: P,
    header: &[&str],
    labels: &[String],
    columns: &[Vec<f64>],
    precision: usize,
) -> Result<()> {
    if header.len() != columns.len() + 1 || columns.iter().any(|c| c.len() != labels.len()) {
        return Err(EdaError::DimensionMismatch {
            expected: format!("{} columns of {} values", header.len().saturating_sub(1), labels.len()),
            got: format!("{} columns", columns.len()),
        });
    }

    let mut file = BufWriter::new(File::create(path)?);
    writeln!(file, "{}", header.join("\t"))?;
    for (i, label) in labels.iter().enumerate() {
        let row: Vec<String> = columns.iter().map(|c| format!("{:.*}", precision, c[i])).collect();
        writeln!(file, "{}\t{}", label, row.join("\t"))?;
    }
    file.flush()?;
    Ok(())
}

/// Serialize any value as pretty-printed JSON
pub fn write_json<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<()> {
    let file = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn test_write_matrix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.tsv");
        let values = array![[1.0, 2.5], [3.0, 4.0]];
        write_matrix(
            &path,
            "gene_id",
            &["g1".to_string(), "g2".to_string()],
            &["s1".to_string(), "s2".to_string()],
            values.view(),
            1,
        )
        .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "gene_id\ts1\ts2\ng1\t1.0\t2.5\ng2\t3.0\t4.0\n");
    }

    #[test]
    fn test_write_matrix_shape_checked() {
        let dir = tempdir().unwrap();
        let values = array![[1.0, 2.0]];
        let result = write_matrix(dir.path().join("m.tsv"), "id", &["g1".to_string()], &["s1".to_string()], values.view(), 2);
        assert!(matches!(result, Err(EdaError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_write_columns_and_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sf.tsv");
        write_columns(&path, &["sample", "size_factor"], &["a".to_string()], &[vec![1.25]], 2).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "sample\tsize_factor\na\t1.25\n");

        let json_path = dir.path().join("x.json");
        write_json(&json_path, &vec![1, 2, 3]).unwrap();
        let back: Vec<i32> = serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }
}
