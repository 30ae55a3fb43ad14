//! Readers for sample tables and gene count matrices

use std::path::Path;

use ndarray::Array2;

use super::delimited::DelimitedTable;
use crate::data::{CountMatrix, SampleTable};
use crate::error::{EdaError, Result};

/// Read a sample table (one row per sequencing run)
///
/// `id_column` names the sample identifier column; when `None` the first
/// column is used. Every other column becomes a categorical factor.
pub fn read_sample_table<P: AsRef<Path>>(path: P, id_column: Option<&str>) -> Result<SampleTable> {
    let table = DelimitedTable::read(path)?;
    if table.is_empty() {
        return Err(EdaError::EmptyData {
            reason: format!("no samples found in {}", table.name()),
        });
    }

    let id_idx = table.column_or(id_column, 0)?;
    let id_name = table.headers()[id_idx].clone();
    let mut samples = SampleTable::new(&id_name, table.column(id_idx))?;

    for (idx, name) in table.headers().iter().enumerate() {
        if idx == id_idx {
            continue;
        }
        if samples.has_column(name) {
            return Err(EdaError::InvalidSampleTable {
                reason: format!("column '{}' appears twice", name),
            });
        }
        samples.add_column(name, table.column(idx))?;
    }

    log::info!(
        "Loaded {} samples with columns [{}] from {}",
        samples.n_samples(),
        samples.column_names().join(", "),
        table.name()
    );
    Ok(samples)
}

/// Read a gene count matrix: first column gene IDs, header row sample IDs
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let table = DelimitedTable::read(path)?;
    if table.headers().len() < 2 {
        return Err(EdaError::InvalidCountMatrix {
            reason: "Not enough columns in header".to_string(),
        });
    }
    if table.is_empty() {
        return Err(EdaError::EmptyData {
            reason: "No genes found in count matrix".to_string(),
        });
    }

    let sample_ids: Vec<String> = table.headers()[1..].to_vec();
    let mut counts = Array2::zeros((table.n_rows(), sample_ids.len()));
    let mut gene_ids = Vec::with_capacity(table.n_rows());

    for (i, row) in table.rows().iter().enumerate() {
        gene_ids.push(row[0].clone());
        for (j, field) in row[1..].iter().enumerate() {
            counts[[i, j]] = field.parse::<f64>().map_err(|_| EdaError::InvalidCountMatrix {
                reason: format!("Invalid count value '{}' for gene {}", field, row[0]),
            })?;
        }
    }

    CountMatrix::new(counts, gene_ids, sample_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_count_matrix() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "gene_id\ts1\ts2\ts3").unwrap();
        writeln!(file, "gene1\t100\t200\t150").unwrap();
        writeln!(file, "gene2\t50\t75\t60").unwrap();

        let matrix = read_count_matrix(file.path()).unwrap();
        assert_eq!(matrix.n_genes(), 2);
        assert_eq!(matrix.n_samples(), 3);
        assert_eq!(matrix.counts()[[1, 2]], 60.0);
    }

    #[test]
    fn test_read_count_matrix_bad_value() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "gene_id,s1").unwrap();
        writeln!(file, "gene1,abc").unwrap();
        assert!(matches!(read_count_matrix(file.path()), Err(EdaError::InvalidCountMatrix { .. })));
    }

    #[test]
    fn test_read_sample_table_with_id_column() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "genotype,run,cell_cycle").unwrap();
        writeln!(file, "WT,r1,c13").unwrap();
        writeln!(file, "KD,r2,c12").unwrap();

        let samples = read_sample_table(file.path(), Some("run")).unwrap();
        assert_eq!(samples.id_column(), "run");
        assert_eq!(samples.sample_ids(), &["r1", "r2"]);
        assert_eq!(samples.column_names(), &["genotype", "cell_cycle"]);
        assert_eq!(samples.levels("cell_cycle").unwrap(), &["c12", "c13"]);

        assert!(matches!(
            read_sample_table(file.path(), Some("sample")),
            Err(EdaError::MissingColumn { .. })
        ));
    }
}
