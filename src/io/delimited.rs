//! Header-aware reading of tab- or comma-delimited text tables

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use csv::ReaderBuilder;

use crate::error::{EdaError, Result};

/// Pick the delimiter from the header line: tab if present, otherwise comma
pub fn detect_delimiter(header_line: &str) -> u8 {
    if header_line.contains('\t') {
        b'\t'
    } else {
        b','
    }
}

/// A fully read delimited table with a header row
#[derive(Debug, Clone)]
pub struct DelimitedTable {
    name: String,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl DelimitedTable {
    /// Read a delimited file. Blank lines are skipped, quotes and
    /// surrounding whitespace are stripped, and every row must have as
    /// many fields as the header.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();

        let mut first_line = String::new();
        BufReader::new(File::open(path)?).read_line(&mut first_line)?;
        if first_line.trim().is_empty() {
            return Err(EdaError::EmptyData {
                reason: format!("{} has no header row", name),
            });
        }

        let mut reader = ReaderBuilder::new()
            .delimiter(detect_delimiter(&first_line))
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path)?;

        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.iter().all(|f| f.is_empty()) {
                continue;
            }
            rows.push(record.iter().map(|f| f.to_string()).collect());
        }

        Ok(Self { name, headers, rows })
    }

    /// Display name (the source path)
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a named column
    pub fn column_index(&self, column: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| EdaError::MissingColumn {
                table: self.name.clone(),
                column: column.to_string(),
            })
    }

    /// Resolve an optional column name, falling back to a position
    pub fn column_or(&self, column: Option<&str>, fallback: usize) -> Result<usize> {
        match column {
            Some(name) => self.column_index(name),
            None if fallback < self.headers.len() => Ok(fallback),
            None => Err(EdaError::MissingColumn {
                table: self.name.clone(),
                column: format!("#{}", fallback + 1),
            }),
        }
    }

    /// All values of one column
    pub fn column(&self, idx: usize) -> Vec<String> {
        self.rows.iter().map(|r| r[idx].clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a\tb\tc"), b'\t');
        assert_eq!(detect_delimiter("a,b,c"), b',');
    }

    #[test]
    fn test_read_tsv_with_quotes() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "\"run\"\t\"genotype\"").unwrap();
        writeln!(file, "\"r1\"\t\"WT\"").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "r2\t KD ").unwrap();

        let table = DelimitedTable::read(file.path()).unwrap();
        assert_eq!(table.headers(), &["run", "genotype"]);
        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.rows()[1], vec!["r2", "KD"]);
        assert_eq!(table.column_index("genotype").unwrap(), 1);
        assert!(matches!(table.column_index("stage"), Err(EdaError::MissingColumn { .. })));
    }

    #[test]
    fn test_read_csv_and_ragged_rows() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "a,b").unwrap();
        writeln!(file, "1,2").unwrap();
        writeln!(file, "3").unwrap();
        assert!(matches!(DelimitedTable::read(file.path()), Err(EdaError::CsvError(_))));
    }

    #[test]
    fn test_empty_file() {
        let file = NamedTempFile::new().unwrap();
        assert!(matches!(DelimitedTable::read(file.path()), Err(EdaError::EmptyData { .. })));
    }
}
