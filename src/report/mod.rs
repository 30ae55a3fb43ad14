//! Long-form per-gene expression reports
//!
//! A report takes one value matrix (transformed or normalized counts) and
//! a set of genes of interest and reshapes it into one record per
//! (gene, sample), with genotype, stage and replicate decomposed from the
//! sample identifier.

mod summary;
mod trend;

use std::fs::File;
use std::path::Path;

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::annotation::GeneNameMap;
use crate::data::{CountMatrix, Factor, SampleTable};
use crate::error::{EdaError, Result};
use crate::transform::TransformedMatrix;

pub use summary::{BoxGroup, BoxSummary};
pub use trend::{local_linear, TrendCurve, DEFAULT_SPAN};

/// How covariates are encoded in a sample identifier such as `KD_c13_2`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleIdLayout {
    pub delimiter: String,
    pub genotype_field: usize,
    pub stage_field: usize,
    pub replicate_field: usize,
}

impl Default for SampleIdLayout {
    fn default() -> Self {
        Self {
            delimiter: "_".to_string(),
            genotype_field: 0,
            stage_field: 1,
            replicate_field: 2,
        }
    }
}

/// Covariates recovered from one sample identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleFields {
    pub genotype: String,
    pub stage: String,
    pub replicate: String,
}

impl SampleIdLayout {
    /// Split a sample ID into its fields; absent fields come back as `None`
    pub fn split<'a>(&self, sample_id: &'a str) -> (Option<&'a str>, Option<&'a str>, Option<&'a str>) {
        let parts: Vec<&str> = if self.delimiter.is_empty() {
            vec![sample_id]
        } else {
            sample_id.split(self.delimiter.as_str()).collect()
        };
        let field = |idx: usize| parts.get(idx).copied().filter(|p| !p.is_empty());
        (field(self.genotype_field), field(self.stage_field), field(self.replicate_field))
    }

    /// Decompose a sample ID, substituting empty strings for missing fields
    pub fn decompose(&self, sample_id: &str) -> SampleFields {
        let (genotype, stage, replicate) = self.split(sample_id);
        let mut missing = Vec::new();
        for (name, value) in [("genotype", genotype), ("stage", stage), ("replicate", replicate)] {
            if value.is_none() {
                missing.push(name);
            }
        }
        if !missing.is_empty() {
            log::warn!(
                "Sample ID '{}' lacks field(s) {}; using empty values",
                sample_id,
                missing.join(", ")
            );
        }
        SampleFields {
            genotype: genotype.unwrap_or_default().to_string(),
            stage: stage.unwrap_or_default().to_string(),
            replicate: replicate.unwrap_or_default().to_string(),
        }
    }
}

fn table_column<'t>(table: Option<&'t SampleTable>, name: &str) -> Result<Option<&'t Factor>> {
    match table {
        Some(t) if t.has_column(name) => t.factor(name).map(Some),
        _ => Ok(None),
    }
}

/// Covariates of every sample, in the order of `sample_ids`
///
/// `table`, when given, must list the same samples in the same order.
/// Genotype and stage are read from its `genotype_column` and
/// `stage_column` when it has them; everything else is decomposed from
/// the sample ID.
pub fn sample_fields(
    sample_ids: &[String],
    table: Option<&SampleTable>,
    layout: &SampleIdLayout,
    genotype_column: &str,
    stage_column: &str,
) -> Result<Vec<SampleFields>> {
    if let Some(t) = table {
        if t.sample_ids() != sample_ids {
            return Err(EdaError::DimensionMismatch {
                expected: format!("sample table rows [{}]", sample_ids.join(", ")),
                got: format!("[{}]", t.sample_ids().join(", ")),
            });
        }
    }
    let genotypes = table_column(table, genotype_column)?;
    let stages = table_column(table, stage_column)?;
    if genotypes.is_none() && stages.is_none() {
        return Ok(sample_ids.iter().map(|id| layout.decompose(id)).collect());
    }

    Ok(sample_ids
        .iter()
        .enumerate()
        .map(|(j, id)| {
            let (genotype, stage, replicate) = layout.split(id);
            SampleFields {
                genotype: match genotypes {
                    Some(f) => f.value(j).to_string(),
                    None => genotype.unwrap_or_default().to_string(),
                },
                stage: match stages {
                    Some(f) => f.value(j).to_string(),
                    None => stage.unwrap_or_default().to_string(),
                },
                replicate: replicate.unwrap_or_default().to_string(),
            }
        })
        .collect())
}

/// Genotype and stage levels of a report, each with its reference first
pub fn report_levels(
    fields: &[SampleFields],
    genotype_reference: Option<&str>,
    stage_reference: Option<&str>,
) -> Result<(Vec<String>, Vec<String>)> {
    let genotypes: Vec<String> = fields.iter().map(|f| f.genotype.clone()).collect();
    let stages: Vec<String> = fields.iter().map(|f| f.stage.clone()).collect();
    Ok((
        levels("genotype", &genotypes, genotype_reference)?,
        levels("stage", &stages, stage_reference)?,
    ))
}

fn levels(name: &str, values: &[String], reference: Option<&str>) -> Result<Vec<String>> {
    let factor = Factor::from_values(values);
    let factor = match reference {
        Some(level) => factor.relevel(name, level)?,
        None => factor,
    };
    Ok(factor.levels().to_vec())
}

/// One (gene, sample) observation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneExpressionRecord {
    pub gene_id: String,
    pub gene_name: String,
    pub sample_id: String,
    pub genotype: String,
    pub stage: String,
    pub replicate: String,
    pub value: f64,
}

/// Long-form expression of the requested genes across all samples
#[derive(Debug, Clone, Serialize)]
pub struct GeneReport {
    pub records: Vec<GeneExpressionRecord>,
    /// Genotype levels, reference first
    pub genotype_levels: Vec<String>,
    /// Stage levels, reference (earliest) first
    pub stage_levels: Vec<String>,
    pub value_label: String,
}

impl GeneReport {
    /// Distinct gene IDs in request order
    pub fn gene_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for record in &self.records {
            if !ids.contains(&record.gene_id.as_str()) {
                ids.push(&record.gene_id);
            }
        }
        ids
    }

    pub fn records_for<'a>(&'a self, gene_id: &'a str) -> impl Iterator<Item = &'a GeneExpressionRecord> + 'a {
        self.records.iter().filter(move |r| r.gene_id == gene_id)
    }

    /// Display name of a gene in this report
    pub fn gene_name(&self, gene_id: &str) -> Option<&str> {
        self.records
            .iter()
            .find(|r| r.gene_id == gene_id)
            .map(|r| r.gene_name.as_str())
    }

    /// 1-based ordinal position of a stage along the stage axis
    pub fn stage_position(&self, stage: &str) -> Option<f64> {
        self.stage_levels
            .iter()
            .position(|s| s == stage)
            .map(|p| (p + 1) as f64)
    }

    pub fn genotype_index(&self, genotype: &str) -> Option<usize> {
        self.genotype_levels.iter().position(|g| g == genotype)
    }

    /// Write all records as TSV with a header row
    pub fn write_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(File::create(path)?);
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Builds a [`GeneReport`] from a genes x samples value matrix
#[derive(Debug, Clone)]
pub struct GeneReportBuilder<'a> {
    values: ArrayView2<'a, f64>,
    gene_ids: &'a [String],
    sample_ids: &'a [String],
    names: Option<&'a GeneNameMap>,
    covariates: Option<(&'a SampleTable, String, String)>,
    layout: SampleIdLayout,
    genotype_reference: Option<String>,
    stage_reference: Option<String>,
    value_label: String,
}

impl<'a> GeneReportBuilder<'a> {
    pub fn new(values: ArrayView2<'a, f64>, gene_ids: &'a [String], sample_ids: &'a [String]) -> Result<Self> {
        if values.dim() != (gene_ids.len(), sample_ids.len()) {
            return Err(EdaError::DimensionMismatch {
                expected: format!("{} x {} values", gene_ids.len(), sample_ids.len()),
                got: format!("{} x {} values", values.nrows(), values.ncols()),
            });
        }
        Ok(Self {
            values,
            gene_ids,
            sample_ids,
            names: None,
            covariates: None,
            layout: SampleIdLayout::default(),
            genotype_reference: None,
            stage_reference: None,
            value_label: "value".to_string(),
        })
    }

    pub fn from_transformed(matrix: &'a TransformedMatrix) -> Result<Self> {
        Ok(Self::new(matrix.values(), matrix.gene_ids(), matrix.sample_ids())?
            .value_label(&format!("{} expression", matrix.method())))
    }

    pub fn from_counts(matrix: &'a CountMatrix) -> Result<Self> {
        Ok(Self::new(matrix.counts(), matrix.gene_ids(), matrix.sample_ids())?.value_label("normalized count"))
    }

    pub fn gene_names(mut self, names: &'a GeneNameMap) -> Self {
        self.names = Some(names);
        self
    }

    /// Take genotype and stage from sample table columns instead of the sample IDs
    pub fn sample_table(mut self, samples: &'a SampleTable, genotype_column: &str, stage_column: &str) -> Self {
        self.covariates = Some((samples, genotype_column.to_string(), stage_column.to_string()));
        self
    }

    pub fn layout(mut self, layout: SampleIdLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn genotype_reference(mut self, level: Option<&str>) -> Self {
        self.genotype_reference = level.map(str::to_string);
        self
    }

    pub fn stage_reference(mut self, level: Option<&str>) -> Self {
        self.stage_reference = level.map(str::to_string);
        self
    }

    pub fn value_label(mut self, label: &str) -> Self {
        self.value_label = label.to_string();
        self
    }

    /// Map a query (gene ID or symbol) to a gene ID
    fn resolve(&self, query: &str) -> String {
        if self.gene_ids.iter().any(|g| g == query) {
            return query.to_string();
        }
        match self.names.and_then(|n| n.resolve(query)) {
            Some(id) => id.to_string(),
            None => query.to_string(),
        }
    }

    /// Reshape the requested genes into long form
    ///
    /// Reference levels are checked before any gene is looked up. A gene
    /// absent from the matrix yields zero values for every sample.
    pub fn build<S: AsRef<str>>(&self, queries: &[S]) -> Result<GeneReport> {
        let fields = match &self.covariates {
            Some((table, genotype, stage)) => {
                sample_fields(self.sample_ids, Some(*table), &self.layout, genotype, stage)?
            }
            None => sample_fields(self.sample_ids, None, &self.layout, "", "")?,
        };
        let (genotype_levels, stage_levels) = report_levels(
            &fields,
            self.genotype_reference.as_deref(),
            self.stage_reference.as_deref(),
        )?;

        let mut records = Vec::with_capacity(queries.len() * self.sample_ids.len());
        let mut seen: Vec<String> = Vec::new();
        for query in queries {
            let query = query.as_ref();
            let gene_id = self.resolve(query);
            if seen.contains(&gene_id) {
                log::debug!("Gene '{}' requested more than once", gene_id);
                continue;
            }
            let row = self.gene_ids.iter().position(|g| *g == gene_id);
            if row.is_none() {
                log::warn!(
                    "Gene '{}' is not in the {} matrix; reporting zeros",
                    query,
                    self.value_label
                );
            }
            let gene_name = match self.names {
                Some(names) => names.display_name(&gene_id).to_string(),
                None => gene_id.clone(),
            };

            for (j, (sample_id, f)) in self.sample_ids.iter().zip(&fields).enumerate() {
                let value = row.map(|i| self.values[[i, j]]).unwrap_or(0.0);
                records.push(GeneExpressionRecord {
                    gene_id: gene_id.clone(),
                    gene_name: gene_name.clone(),
                    sample_id: sample_id.clone(),
                    genotype: f.genotype.clone(),
                    stage: f.stage.clone(),
                    replicate: f.replicate.clone(),
                    value: if value.is_finite() { value } else { 0.0 },
                });
            }
            seen.push(gene_id);
        }

        log::info!(
            "Gene report: {} genes x {} samples ({} genotypes, {} stages)",
            seen.len(),
            self.sample_ids.len(),
            genotype_levels.len(),
            stage_levels.len()
        );
        Ok(GeneReport {
            records,
            genotype_levels,
            stage_levels,
            value_label: self.value_label.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn toy() -> (ndarray::Array2<f64>, Vec<String>, Vec<String>) {
        let values = array![
            [100.0, 100.0, 10.0, 10.0, 5.0, 5.0],
            [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        ];
        let genes = strings(&["FBgn0001", "FBgn0002"]);
        let samples = strings(&["WT_c12_1", "KD_c12_1", "WT_c13_1", "KD_c13_1", "WT_c14_1", "KD_c14_1"]);
        (values, genes, samples)
    }

    fn names() -> GeneNameMap {
        GeneNameMap::from_pairs(vec![("FBgn0001".to_string(), "zld".to_string())]).unwrap()
    }

    #[test]
    fn test_layout_decompose() {
        let layout = SampleIdLayout::default();
        let f = layout.decompose("KD_c13_2");
        assert_eq!((f.genotype.as_str(), f.stage.as_str(), f.replicate.as_str()), ("KD", "c13", "2"));

        let short = layout.decompose("WT");
        assert_eq!(short.genotype, "WT");
        assert_eq!(short.stage, "");
        assert_eq!(short.replicate, "");

        let custom = SampleIdLayout {
            delimiter: "-".to_string(),
            genotype_field: 1,
            stage_field: 0,
            replicate_field: 2,
        };
        assert_eq!(custom.decompose("c10-WT-3").genotype, "WT");
    }

    #[test]
    fn test_report_long_form() {
        let (values, genes, samples) = toy();
        let names = names();
        let report = GeneReportBuilder::new(values.view(), &genes, &samples)
            .unwrap()
            .gene_names(&names)
            .genotype_reference(Some("WT"))
            .stage_reference(Some("c12"))
            .build(&["zld"])
            .unwrap();

        assert_eq!(report.records.len(), 6);
        assert_eq!(report.genotype_levels, vec!["WT", "KD"]);
        assert_eq!(report.stage_levels, vec!["c12", "c13", "c14"]);
        assert_eq!(report.gene_ids(), vec!["FBgn0001"]);
        assert_eq!(report.gene_name("FBgn0001"), Some("zld"));

        let first = &report.records[1];
        assert_eq!(first.sample_id, "KD_c12_1");
        assert_eq!(first.genotype, "KD");
        assert_eq!(first.stage, "c12");
        assert_eq!(first.replicate, "1");
        assert_eq!(first.value, 100.0);
        assert_eq!(report.stage_position("c14"), Some(3.0));
    }

    #[test]
    fn test_missing_gene_reports_zeros_and_id_as_name() {
        let (values, genes, samples) = toy();
        let names = names();
        let report = GeneReportBuilder::new(values.view(), &genes, &samples)
            .unwrap()
            .gene_names(&names)
            .build(&["FBgn0002", "FBgn9999"])
            .unwrap();
        assert_eq!(report.records.len(), 12);
        assert_eq!(report.gene_name("FBgn0002"), Some("FBgn0002"));
        assert!(report.records_for("FBgn9999").all(|r| r.value == 0.0));
        // natural order without an explicit reference
        assert_eq!(report.genotype_levels, vec!["KD", "WT"]);
    }

    #[test]
    fn test_missing_reference_level() {
        let (values, genes, samples) = toy();
        let result = GeneReportBuilder::new(values.view(), &genes, &samples)
            .unwrap()
            .genotype_reference(Some("Control"))
            .build(&["FBgn0001"]);
        assert!(matches!(result, Err(EdaError::MissingReferenceLevel { .. })));
    }

    #[test]
    fn test_write_tsv() {
        let (values, genes, samples) = toy();
        let report = GeneReportBuilder::new(values.view(), &genes, &samples)
            .unwrap()
            .build(&["FBgn0001"])
            .unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.tsv");
        report.write_tsv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("gene_id\tgene_name\tsample_id\tgenotype\tstage\treplicate\tvalue")
        );
        assert_eq!(lines.count(), 6);
    }

    #[test]
    fn test_gene_name_outlives_query() {
        let (values, genes, samples) = toy();
        let names = names();
        let report = GeneReportBuilder::new(values.view(), &genes, &samples)
            .unwrap()
            .gene_names(&names)
            .build(&["FBgn0001"])
            .unwrap();
        let name = {
            let query = String::from("FBgn0001");
            report.gene_name(&query)
        };
        assert_eq!(name, Some("zld"));
        assert_eq!(report.gene_name("FBgn0002"), None);
    }

    fn run_table(ids: &[String]) -> SampleTable {
        let mut table = SampleTable::new("run", ids.to_vec()).unwrap();
        table
            .add_column("genotype", strings(&["KD", "WT", "KD", "WT", "KD", "WT"]))
            .unwrap();
        table
            .add_column("cell_cycle", strings(&["c12", "c12", "c13", "c13", "c14", "c14"]))
            .unwrap();
        table
    }

    #[test]
    fn test_covariates_from_sample_table() {
        let (values, genes, _) = toy();
        let runs = strings(&["run01", "run02", "run03", "run04", "run05", "run06"]);
        let table = run_table(&runs);
        let report = GeneReportBuilder::new(values.view(), &genes, &runs)
            .unwrap()
            .sample_table(&table, "genotype", "cell_cycle")
            .genotype_reference(Some("WT"))
            .stage_reference(Some("c12"))
            .build(&["FBgn0001"])
            .unwrap();
        assert_eq!(report.genotype_levels, vec!["WT", "KD"]);
        assert_eq!(report.stage_levels, vec!["c12", "c13", "c14"]);
        assert_eq!(report.records[2].sample_id, "run03");
        assert_eq!(report.records[2].genotype, "KD");
        assert_eq!(report.records[2].stage, "c13");

        // decomposing the run IDs instead has no WT level
        let from_ids = GeneReportBuilder::new(values.view(), &genes, &runs)
            .unwrap()
            .genotype_reference(Some("WT"))
            .build(&["FBgn0001"]);
        assert!(matches!(from_ids, Err(EdaError::MissingReferenceLevel { .. })));
    }

    #[test]
    fn test_sample_fields_require_matching_table() {
        let runs = strings(&["run01", "run02", "run03", "run04", "run05", "run06"]);
        let table = run_table(&runs);
        let layout = SampleIdLayout::default();

        let fields = sample_fields(&runs, Some(&table), &layout, "genotype", "cell_cycle").unwrap();
        let (genotypes, stages) = report_levels(&fields, Some("WT"), None).unwrap();
        assert_eq!(genotypes, vec!["WT", "KD"]);
        assert_eq!(stages, vec!["c12", "c13", "c14"]);

        let reversed: Vec<String> = runs.iter().rev().cloned().collect();
        assert!(matches!(
            sample_fields(&reversed, Some(&table), &layout, "genotype", "cell_cycle"),
            Err(EdaError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            report_levels(&fields, Some("Control"), None),
            Err(EdaError::MissingReferenceLevel { .. })
        ));
    }
}
