//! Transcript abundance import and gene-level summarisation
//!
//! Every sample row is resolved to `<quant_dir>/<sample_id>/<file_name>`
//! before any file is read. Columns of the output matrix are emitted in
//! sample-table order, each built from the file resolved for that sample.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::annotation::TranscriptGeneMap;
use crate::data::{CountMatrix, SampleTable};
use crate::error::{EdaError, Result};
use crate::io::DelimitedTable;

/// Layout of a per-sample quantification table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuantFormat {
    /// `target_id` / `est_counts`
    #[default]
    Kallisto,
    /// `Name` / `NumReads`
    Salmon,
    Custom { id_column: String, count_column: String },
}

impl QuantFormat {
    pub fn id_column(&self) -> &str {
        match self {
            QuantFormat::Kallisto => "target_id",
            QuantFormat::Salmon => "Name",
            QuantFormat::Custom { id_column, .. } => id_column,
        }
    }

    pub fn count_column(&self) -> &str {
        match self {
            QuantFormat::Kallisto => "est_counts",
            QuantFormat::Salmon => "NumReads",
            QuantFormat::Custom { count_column, .. } => count_column,
        }
    }

    /// Conventional file name inside each sample directory
    pub fn default_file_name(&self) -> &'static str {
        match self {
            QuantFormat::Salmon => "quant.sf",
            _ => "abundance.tsv",
        }
    }
}

/// Options for the abundance importer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportOptions {
    pub format: QuantFormat,
    /// File name inside each sample directory; the format's default when unset
    pub file_name: Option<String>,
    /// Round gene-level sums to whole counts
    pub round_counts: bool,
    /// Fail on the first transcript missing from the annotation
    pub strict: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            format: QuantFormat::Kallisto,
            file_name: None,
            round_counts: true,
            strict: false,
        }
    }
}

impl ImportOptions {
    pub fn file_name(&self) -> &str {
        self.file_name
            .as_deref()
            .unwrap_or_else(|| self.format.default_file_name())
    }
}

/// Per-sample import statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleImport {
    pub sample_id: String,
    pub path: PathBuf,
    pub n_transcripts: usize,
    pub unresolved_transcripts: usize,
    pub unresolved_abundance: f64,
    pub gene_total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSummary {
    pub samples: Vec<SampleImport>,
    pub n_genes: usize,
}

impl ImportSummary {
    pub fn total_unresolved(&self) -> usize {
        self.samples.iter().map(|s| s.unresolved_transcripts).sum()
    }
}

/// Resolve every sample to its quantification file, failing if any is missing
pub fn resolve_quant_paths(samples: &SampleTable, quant_dir: &Path, file_name: &str) -> Result<Vec<PathBuf>> {
    let paths: Vec<PathBuf> = samples
        .sample_ids()
        .iter()
        .map(|id| quant_dir.join(id).join(file_name))
        .collect();

    let missing: Vec<&str> = samples
        .sample_ids()
        .iter()
        .zip(&paths)
        .filter(|(_, p)| !p.is_file())
        .map(|(id, _)| id.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(EdaError::SampleFileMismatch {
            reason: format!(
                "no {} under {} for samples: {}",
                file_name,
                quant_dir.display(),
                missing.join(", ")
            ),
        });
    }

    if let Ok(entries) = fs::read_dir(quant_dir) {
        let known: HashSet<&str> = samples.sample_ids().iter().map(|s| s.as_str()).collect();
        let mut extra: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| !known.contains(name.as_str()))
            .collect();
        extra.sort();
        if !extra.is_empty() {
            log::warn!(
                "{} sample directories not in the sample table are ignored: {}",
                extra.len(),
                extra.join(", ")
            );
        }
    }

    Ok(paths)
}

/// Read one quantification table and sum its abundances per gene
fn read_sample(
    sample_id: &str,
    path: &Path,
    tx2gene: &TranscriptGeneMap,
    options: &ImportOptions,
) -> Result<(BTreeMap<String, f64>, SampleImport)> {
    let table = DelimitedTable::read(path)?;
    let id_idx = table.column_index(options.format.id_column())?;
    let count_idx = table.column_index(options.format.count_column())?;

    let mut genes: BTreeMap<String, f64> = BTreeMap::new();
    let mut unresolved = 0;
    let mut unresolved_abundance = 0.0;

    for row in table.rows() {
        let transcript = &row[id_idx];
        let value: f64 = row[count_idx].parse().map_err(|_| EdaError::InvalidCountMatrix {
            reason: format!(
                "invalid abundance '{}' for transcript {} in {}",
                row[count_idx],
                transcript,
                path.display()
            ),
        })?;
        if !value.is_finite() || value < 0.0 {
            return Err(EdaError::InvalidCountMatrix {
                reason: format!("abundance {} for transcript {} in {}", value, transcript, path.display()),
            });
        }

        match tx2gene.gene_of(transcript) {
            Some(gene) => *genes.entry(gene.to_string()).or_insert(0.0) += value,
            None if options.strict => {
                return Err(EdaError::UnresolvedTranscript {
                    sample_id: sample_id.to_string(),
                    transcript_id: transcript.clone(),
                });
            }
            None => {
                unresolved += 1;
                unresolved_abundance += value;
            }
        }
    }

    if unresolved > 0 {
        log::warn!(
            "Sample {}: {} transcripts ({:.1} reads) have no gene mapping and were dropped",
            sample_id,
            unresolved,
            unresolved_abundance
        );
    }

    let info = SampleImport {
        sample_id: sample_id.to_string(),
        path: path.to_path_buf(),
        n_transcripts: table.n_rows(),
        unresolved_transcripts: unresolved,
        unresolved_abundance,
        gene_total: genes.values().sum(),
    };
    Ok((genes, info))
}

/// Import per-sample transcript abundances as a gene × sample count matrix
pub fn import_abundances(
    samples: &SampleTable,
    quant_dir: &Path,
    tx2gene: &TranscriptGeneMap,
    options: &ImportOptions,
) -> Result<(CountMatrix, ImportSummary)> {
    let paths = resolve_quant_paths(samples, quant_dir, options.file_name())?;

    let mut per_sample = Vec::with_capacity(paths.len());
    let mut infos = Vec::with_capacity(paths.len());
    for (sample_id, path) in samples.sample_ids().iter().zip(&paths) {
        let (genes, info) = read_sample(sample_id, path, tx2gene, options)?;
        log::debug!(
            "Sample {}: {} transcripts into {} genes",
            sample_id,
            info.n_transcripts,
            genes.len()
        );
        per_sample.push(genes);
        infos.push(info);
    }

    let mut gene_ids: Vec<String> = per_sample
        .iter()
        .flat_map(|genes| genes.keys().cloned())
        .collect();
    gene_ids.sort();
    gene_ids.dedup();

    let mut counts = Array2::zeros((gene_ids.len(), per_sample.len()));
    for (j, genes) in per_sample.iter().enumerate() {
        for (i, gene) in gene_ids.iter().enumerate() {
            if let Some(&value) = genes.get(gene) {
                counts[[i, j]] = if options.round_counts { value.round() } else { value };
            }
        }
    }

    let matrix = CountMatrix::new(counts, gene_ids, samples.sample_ids().to_vec())?;
    if matrix.sample_ids() != samples.sample_ids() {
        return Err(EdaError::SampleFileMismatch {
            reason: "imported columns do not match the sample table order".to_string(),
        });
    }

    let summary = ImportSummary {
        n_genes: matrix.n_genes(),
        samples: infos,
    };
    log::info!(
        "Imported {} genes across {} samples ({} unresolved transcript entries)",
        matrix.n_genes(),
        matrix.n_samples(),
        summary.total_unresolved()
    );
    Ok((matrix, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_quant(dir: &Path, sample: &str, rows: &[(&str, f64)]) {
        let sample_dir = dir.join(sample);
        fs::create_dir_all(&sample_dir).unwrap();
        let mut text = String::from("target_id\tlength\teff_length\test_counts\ttpm\n");
        for (tx, count) in rows {
            text.push_str(&format!("{}\t1000\t800\t{}\t1.0\n", tx, count));
        }
        fs::write(sample_dir.join("abundance.tsv"), text).unwrap();
    }

    fn tx2gene() -> TranscriptGeneMap {
        TranscriptGeneMap::from_pairs(
            vec![
                ("t1".to_string(), "geneB".to_string()),
                ("t2".to_string(), "geneB".to_string()),
                ("t3".to_string(), "geneA".to_string()),
            ],
            false,
        )
        .unwrap()
    }

    fn samples(ids: &[&str]) -> SampleTable {
        SampleTable::new("sample", ids.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    #[test]
    fn test_import_sums_transcripts_per_gene() {
        let dir = tempdir().unwrap();
        write_quant(dir.path(), "KD_c12_1", &[("t1", 10.4), ("t2", 5.0), ("t3", 2.0)]);
        write_quant(dir.path(), "WT_c12_1", &[("t1", 1.0), ("t3", 7.6), ("t9", 3.0)]);

        let table = samples(&["WT_c12_1", "KD_c12_1"]);
        let (matrix, summary) = import_abundances(&table, dir.path(), &tx2gene(), &ImportOptions::default()).unwrap();

        assert_eq!(matrix.sample_ids(), &["WT_c12_1", "KD_c12_1"]);
        assert_eq!(matrix.gene_ids(), &["geneA", "geneB"]);
        let c = matrix.counts();
        assert_eq!(c[[0, 0]], 8.0);
        assert_eq!(c[[1, 0]], 1.0);
        assert_eq!(c[[1, 1]], 15.0);
        assert_eq!(summary.samples[0].unresolved_transcripts, 1);
        assert_eq!(summary.total_unresolved(), 1);
    }

    #[test]
    fn test_missing_sample_directory() {
        let dir = tempdir().unwrap();
        write_quant(dir.path(), "WT_c12_1", &[("t1", 1.0)]);
        let table = samples(&["WT_c12_1", "KD_c12_1"]);

        match import_abundances(&table, dir.path(), &tx2gene(), &ImportOptions::default()) {
            Err(EdaError::SampleFileMismatch { reason }) => assert!(reason.contains("KD_c12_1")),
            other => panic!("expected SampleFileMismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_strict_rejects_unresolved() {
        let dir = tempdir().unwrap();
        write_quant(dir.path(), "s1", &[("t1", 1.0), ("tx_unknown", 4.0)]);
        let options = ImportOptions {
            strict: true,
            ..Default::default()
        };
        let result = import_abundances(&samples(&["s1"]), dir.path(), &tx2gene(), &options);
        assert!(matches!(result, Err(EdaError::UnresolvedTranscript { .. })));
    }

    #[test]
    fn test_salmon_layout_without_rounding() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("s1")).unwrap();
        fs::write(
            dir.path().join("s1").join("quant.sf"),
            "Name\tLength\tEffectiveLength\tTPM\tNumReads\nt1\t100\t80\t1\t2.5\nt3\t100\t80\t1\t4\n",
        )
        .unwrap();
        let options = ImportOptions {
            format: QuantFormat::Salmon,
            round_counts: false,
            ..Default::default()
        };
        let (matrix, _) = import_abundances(&samples(&["s1"]), dir.path(), &tx2gene(), &options).unwrap();
        assert_eq!(matrix.counts()[[1, 0]], 2.5);
        assert!(!matrix.is_integral());
    }
}
