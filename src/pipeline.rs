//! Stage-by-stage orchestration of a full run
//!
//! load -> import -> collapse -> filter -> normalize -> transform ->
//! distances / clustering / PCA, with the gene report branching off the
//! transformed matrix. Each stage consumes the previous stage's artifacts
//! and returns new ones; every error aborts the run at the stage where it
//! occurs.

use std::fs;
use std::path::Path;

use log::{info, warn};
use serde::Serialize;

use crate::annotation::{read_gene_name_map, read_transcript_gene_map, GeneNameMap, TranscriptGeneMap};
use crate::config::PipelineConfig;
use crate::data::{collapse_replicates, CountMatrix, SampleTable};
use crate::dispersion::{estimate_dispersions, DispersionFit};
use crate::error::{EdaError, Result};
use crate::filter::filter_low_counts;
use crate::glm::Design;
use crate::import::{import_abundances, ImportSummary};
use crate::io::{read_count_matrix, read_sample_table, write_columns, write_json, write_matrix};
use crate::normalization::{estimate_size_factors, normalize_counts, SizeFactors};
use crate::plot::{plot_distance_heatmap, plot_gene_boxplot, plot_gene_trend, plot_pca};
use crate::report::{report_levels, sample_fields, GeneReport, GeneReportBuilder};
use crate::similarity::{hierarchical_cluster, pca, Dendrogram, DistanceMatrix, PcaResult};
use crate::transform::{transform_counts, TransformedMatrix};

/// Normalized and transformed counts of one run
#[derive(Debug, Clone)]
pub struct Normalized {
    pub size_factors: SizeFactors,
    pub normalized: CountMatrix,
    pub dispersions: Option<DispersionFit>,
    pub transformed: TransformedMatrix,
    /// Design the dispersions were estimated with
    pub design: Design,
}

/// Sample similarity views of the transformed matrix
#[derive(Debug, Clone)]
pub struct Similarity {
    pub distances: DistanceMatrix,
    /// Leaf-sorted clustering of the samples
    pub dendrogram: Dendrogram,
    pub pca: PcaResult,
}

/// Every artifact of a full run
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub import: ImportSummary,
    pub n_genes_imported: usize,
    pub n_runs: usize,
    /// Collapsed and filtered raw counts
    pub counts: CountMatrix,
    pub samples: SampleTable,
    pub normalized: Normalized,
    pub similarity: Similarity,
    pub report: Option<GeneReport>,
}

/// Machine-readable digest written as `summary.json`
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub n_runs: usize,
    pub n_samples: usize,
    pub n_genes_imported: usize,
    pub n_genes_filtered: usize,
    pub unresolved_transcripts: usize,
    pub design: String,
    pub transform: String,
    pub blind: bool,
    pub size_factors: SizeFactors,
    pub leaf_order: Vec<String>,
    pub pca_variance_percent: Vec<f64>,
    pub pca_genes: usize,
    pub genes_reported: Vec<String>,
}

impl PipelineOutput {
    pub fn summary(&self, config: &PipelineConfig) -> RunSummary {
        RunSummary {
            n_runs: self.n_runs,
            n_samples: self.samples.n_samples(),
            n_genes_imported: self.n_genes_imported,
            n_genes_filtered: self.counts.n_genes(),
            unresolved_transcripts: self.import.total_unresolved(),
            design: self.normalized.design.to_string(),
            transform: self.normalized.transformed.method().to_string(),
            blind: config.blind,
            size_factors: self.normalized.size_factors.clone(),
            leaf_order: self
                .similarity
                .dendrogram
                .leaf_labels()
                .into_iter()
                .map(str::to_string)
                .collect(),
            pca_variance_percent: self.similarity.pca.variance_percent.clone(),
            pca_genes: self.similarity.pca.n_genes_used,
            genes_reported: self
                .report
                .as_ref()
                .map(|r| r.gene_ids().into_iter().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }
}

/// Read the sample table and apply the configured reference levels
pub fn load_samples(config: &PipelineConfig) -> Result<SampleTable> {
    let mut samples = read_sample_table(&config.samples, config.sample_id_column.as_deref())?;
    for (factor, level) in &config.reference_levels {
        samples = samples.relevel(factor, level)?;
        info!("Reference level of '{}' set to '{}'", factor, level);
    }
    Ok(samples)
}

fn load_annotation(config: &PipelineConfig) -> Result<(TranscriptGeneMap, Option<GeneNameMap>)> {
    let tx2gene = read_transcript_gene_map(&config.tx2gene, &config.tx2gene_columns)?;
    let names = match &config.gene_names {
        Some(path) => Some(read_gene_name_map(path, &config.gene_name_columns)?),
        None => None,
    };
    Ok((tx2gene, names))
}

/// Import abundances for every run of the sample table
pub fn import_counts(config: &PipelineConfig, samples: &SampleTable) -> Result<(CountMatrix, ImportSummary)> {
    let tx2gene = read_transcript_gene_map(&config.tx2gene, &config.tx2gene_columns)?;
    import_abundances(samples, &config.quant_dir, &tx2gene, &config.import)
}

/// Reorder the sample table to the columns of a count matrix, joining on sample ID
pub fn align_samples(counts: &CountMatrix, samples: &SampleTable) -> Result<SampleTable> {
    let mut missing = Vec::new();
    let mut rows = Vec::with_capacity(counts.n_samples());
    for id in counts.sample_ids() {
        match samples.sample_index(id) {
            Some(idx) => rows.push(idx),
            None => missing.push(id.as_str()),
        }
    }
    if !missing.is_empty() {
        return Err(EdaError::SampleFileMismatch {
            reason: format!("count matrix columns absent from the sample table: {}", missing.join(", ")),
        });
    }
    if rows.len() < samples.n_samples() {
        warn!(
            "{} sample table rows have no count matrix column and are ignored",
            samples.n_samples() - rows.len()
        );
    }
    samples.subset(&rows)
}

/// Size factors, normalized counts, dispersions (when needed) and the transform
pub fn normalize_and_transform(
    counts: &CountMatrix,
    samples: &SampleTable,
    config: &PipelineConfig,
) -> Result<Normalized> {
    let size_factors = estimate_size_factors(counts, config.size_factors)?;
    let normalized = normalize_counts(counts, &size_factors)?;

    let mut design = if config.blind {
        Design::intercept_only()
    } else {
        Design::parse(&config.design)?
    };

    let dispersions = if config.transform.needs_dispersions() {
        let mut model = design.model_matrix(samples)?;
        if model.n_coefs() >= counts.n_samples() {
            warn!(
                "Design {} leaves no residual degrees of freedom with {} samples; estimating dispersions blind",
                design,
                counts.n_samples()
            );
            design = Design::intercept_only();
            model = design.model_matrix(samples)?;
        }
        info!("Estimating dispersions with design {}", design);
        Some(estimate_dispersions(counts, &size_factors, &model, &config.dispersion)?)
    } else {
        None
    };

    let transformed = transform_counts(
        counts,
        &size_factors,
        dispersions.as_ref(),
        config.transform,
        config.pseudocount,
    )?;

    Ok(Normalized {
        size_factors,
        normalized,
        dispersions,
        transformed,
        design,
    })
}

/// Distances, leaf-sorted clustering and PCA of the transformed samples
pub fn compare_samples(transformed: &TransformedMatrix, config: &PipelineConfig) -> Result<Similarity> {
    let distances = DistanceMatrix::euclidean(transformed.values(), transformed.sample_ids())?;
    let dendrogram = hierarchical_cluster(&distances, config.linkage)?.leaf_sort();
    info!(
        "Sample order after {} linkage clustering: {}",
        config.linkage,
        dendrogram.leaf_labels().join(", ")
    );
    let pca = pca(transformed.values(), transformed.sample_ids(), &config.pca)?;
    Ok(Similarity {
        distances,
        dendrogram,
        pca,
    })
}

/// Check the report's reference levels against the samples a run will end with
///
/// The final samples are the `collapse_by` groups, or the runs themselves
/// when nothing is collapsed. Each group takes its covariates from its
/// first run, as [`collapse_replicates`] does.
pub fn check_report_levels(config: &PipelineConfig, samples: &SampleTable) -> Result<()> {
    if config.genes.is_empty() {
        return Ok(());
    }
    let fields = match &config.collapse_by {
        Some(groupby) => {
            let groups = samples.levels(groupby)?.to_vec();
            let first_rows: Vec<usize> = groups
                .iter()
                .filter_map(|level| samples.samples_with_level(groupby, level).first().copied())
                .collect();
            let representative = samples.subset(&first_rows)?;
            let mut collapsed = SampleTable::new(groupby, groups.clone())?;
            for column in [&config.genotype_column, &config.stage_column] {
                if representative.has_column(column) && column != groupby {
                    collapsed.add_column(column, representative.factor(column)?.values())?;
                }
            }
            sample_fields(
                &groups,
                Some(&collapsed),
                &config.sample_id_layout,
                &config.genotype_column,
                &config.stage_column,
            )?
        }
        None => sample_fields(
            samples.sample_ids(),
            Some(samples),
            &config.sample_id_layout,
            &config.genotype_column,
            &config.stage_column,
        )?,
    };
    let (genotypes, stages) = report_levels(&fields, config.genotype_reference(), config.stage_reference())?;
    log::debug!(
        "Report levels: genotype [{}], stage [{}]",
        genotypes.join(", "),
        stages.join(", ")
    );
    Ok(())
}

/// Long-form report of the configured genes, or `None` when no gene was requested
///
/// `samples` must be aligned with the columns of the normalized matrices.
pub fn build_report(
    normalized: &Normalized,
    samples: &SampleTable,
    names: Option<&GeneNameMap>,
    config: &PipelineConfig,
) -> Result<Option<GeneReport>> {
    if config.genes.is_empty() {
        return Ok(None);
    }
    let builder = if config.report_normalized {
        GeneReportBuilder::from_counts(&normalized.normalized)?
    } else {
        GeneReportBuilder::from_transformed(&normalized.transformed)?
    };
    let mut builder = builder
        .sample_table(samples, &config.genotype_column, &config.stage_column)
        .layout(config.sample_id_layout.clone())
        .genotype_reference(config.genotype_reference())
        .stage_reference(config.stage_reference());
    if let Some(names) = names {
        builder = builder.gene_names(names);
    }
    builder.build(config.genes.as_slice()).map(Some)
}

/// Run every stage and write all outputs under `config.output_dir`
pub fn run_pipeline(config: &PipelineConfig) -> Result<PipelineOutput> {
    config.validate()?;

    info!("Loading sample table from {}", config.samples.display());
    let samples = load_samples(config)?;
    // fail on unknown design variables before touching any quantification file
    let design = Design::parse(&config.design)?;
    design.model_matrix(&samples)?;
    check_report_levels(config, &samples)?;

    let (tx2gene, names) = load_annotation(config)?;
    let (imported, import) = import_abundances(&samples, &config.quant_dir, &tx2gene, &config.import)?;
    let n_runs = imported.n_samples();
    let n_genes_imported = imported.n_genes();

    let (counts, samples) = match &config.collapse_by {
        Some(groupby) => collapse_replicates(&imported, &samples, groupby, config.run_column.as_deref())?,
        None => (imported, samples),
    };
    let counts = filter_low_counts(&counts, &config.filter)?;

    let normalized = normalize_and_transform(&counts, &samples, config)?;
    let similarity = compare_samples(&normalized.transformed, config)?;
    let report = build_report(&normalized, &samples, names.as_ref(), config)?;

    let output = PipelineOutput {
        import,
        n_genes_imported,
        n_runs,
        counts,
        samples,
        normalized,
        similarity,
        report,
    };
    write_outputs(&output, config)?;
    Ok(output)
}

/// File-safe stem for a gene's plot files
fn file_stem(gene_id: &str) -> String {
    gene_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '.') { c } else { '_' })
        .collect()
}

/// Write the matrix of a transform run
pub fn write_transformed(path: &Path, transformed: &TransformedMatrix) -> Result<()> {
    write_matrix(
        path,
        "gene_id",
        transformed.gene_ids(),
        transformed.sample_ids(),
        transformed.values(),
        6,
    )
}

/// Write every table, plot and the JSON summary of a run
pub fn write_outputs(output: &PipelineOutput, config: &PipelineConfig) -> Result<()> {
    fs::create_dir_all(&config.output_dir)?;
    let out = |name: &str| config.output_path(name);

    let counts = &output.counts;
    write_matrix(out("gene_counts.tsv"), "gene_id", counts.gene_ids(), counts.sample_ids(), counts.counts(), 0)?;
    let normalized = &output.normalized.normalized;
    write_matrix(
        out("normalized_counts.tsv"),
        "gene_id",
        normalized.gene_ids(),
        normalized.sample_ids(),
        normalized.counts(),
        4,
    )?;
    write_transformed(&out("transformed.tsv"), &output.normalized.transformed)?;

    let sf = &output.normalized.size_factors;
    write_columns(out("size_factors.tsv"), &["sample_id", "size_factor"], &sf.sample_ids, &[sf.values.clone()], 6)?;

    let similarity = &output.similarity;
    let distances = &similarity.distances;
    write_matrix(
        out("sample_distances.tsv"),
        "sample_id",
        distances.labels(),
        distances.labels(),
        distances.values(),
        6,
    )?;

    let pca = &similarity.pca;
    let pc_names: Vec<String> = (1..=pca.n_components()).map(|k| format!("PC{}", k)).collect();
    let mut header = vec!["sample_id"];
    header.extend(pc_names.iter().map(String::as_str));
    let columns: Vec<Vec<f64>> = (0..pca.n_components()).map(|k| pca.component(k)).collect();
    write_columns(out("pca.tsv"), &header, &pca.sample_ids, &columns, 6)?;

    if let Some(report) = &output.report {
        report.write_tsv(out("gene_report.tsv"))?;
    }

    if config.plots {
        plot_distance_heatmap(&out("sample_distances.svg"), distances, &similarity.dendrogram)?;
        let groups = output.samples.factor(&config.genotype_column).ok();
        plot_pca(&out("pca.svg"), pca, groups)?;
        if let Some(report) = &output.report {
            for gene_id in report.gene_ids() {
                let stem = file_stem(gene_id);
                plot_gene_boxplot(&out(&format!("{}_boxplot.svg", stem)), report, gene_id)?;
                plot_gene_trend(&out(&format!("{}_trend.svg", stem)), report, gene_id, config.trend_span)?;
            }
        }
    }

    write_json(out("summary.json"), &output.summary(config))?;
    info!("Wrote results to {}", config.output_dir.display());
    Ok(())
}

/// Import only: write the raw gene x run count matrix
pub fn run_import(config: &PipelineConfig, output: &Path) -> Result<(CountMatrix, ImportSummary)> {
    let samples = load_samples(config)?;
    let (counts, summary) = import_counts(config, &samples)?;
    write_matrix(output, "gene_id", counts.gene_ids(), counts.sample_ids(), counts.counts(), 0)?;
    info!("Wrote {} genes x {} samples to {}", counts.n_genes(), counts.n_samples(), output.display());
    Ok((counts, summary))
}

/// Filter, normalize and transform an existing gene count matrix
pub fn run_transform(config: &PipelineConfig, counts_path: &Path, output: &Path) -> Result<TransformedMatrix> {
    config.validate()?;
    let counts = read_count_matrix(counts_path)?;
    let samples = align_samples(&counts, &load_samples(config)?)?;
    let counts = filter_low_counts(&counts, &config.filter)?;
    let normalized = normalize_and_transform(&counts, &samples, config)?;
    write_transformed(output, &normalized.transformed)?;
    info!("Wrote transformed matrix to {}", output.display());
    Ok(normalized.transformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("FBgn0001"), "FBgn0001");
        assert_eq!(file_stem("Su(H)/x"), "Su_H__x");
    }

    #[test]
    fn test_align_samples_joins_by_id() {
        let counts = CountMatrix::new(array![[1.0, 2.0]], strings(&["g"]), strings(&["b", "a"])).unwrap();
        let mut samples = SampleTable::new("run", strings(&["a", "b", "c"])).unwrap();
        samples.add_column("genotype", strings(&["WT", "KD", "WT"])).unwrap();

        let aligned = align_samples(&counts, &samples).unwrap();
        assert_eq!(aligned.sample_ids(), &["b", "a"]);
        assert_eq!(aligned.value("genotype", 0).unwrap(), "KD");

        let stray = CountMatrix::new(array![[1.0]], strings(&["g"]), strings(&["z"])).unwrap();
        assert!(matches!(
            align_samples(&stray, &samples),
            Err(EdaError::SampleFileMismatch { .. })
        ));
    }

    fn run_table() -> SampleTable {
        let mut samples = SampleTable::new("run", strings(&["run1", "run2", "run3", "run4"])).unwrap();
        samples
            .add_column("sample", strings(&["WT_c12_1", "WT_c12_1", "KD_c12_1", "KD_c12_1"]))
            .unwrap();
        samples
    }

    #[test]
    fn test_report_levels_follow_final_samples() {
        let mut config = PipelineConfig {
            genes: strings(&["zld"]),
            ..PipelineConfig::default()
        };
        config.reference_levels.insert("genotype".to_string(), "WT".to_string());
        let samples = run_table();

        // no genotype column: run IDs carry no genotype field
        assert!(matches!(
            check_report_levels(&config, &samples),
            Err(EdaError::MissingReferenceLevel { .. })
        ));

        config.collapse_by = Some("sample".to_string());
        check_report_levels(&config, &samples).unwrap();

        config.genes.clear();
        config.collapse_by = None;
        check_report_levels(&config, &samples).unwrap();
    }

    #[test]
    fn test_report_levels_use_sample_table_columns() {
        let config = {
            let mut config = PipelineConfig {
                genes: strings(&["zld"]),
                ..PipelineConfig::default()
            };
            config.reference_levels.insert("genotype".to_string(), "WT".to_string());
            config
        };
        let mut samples = run_table();
        samples.add_column("genotype", strings(&["WT", "WT", "KD", "KD"])).unwrap();
        check_report_levels(&config, &samples).unwrap();
    }

    #[test]
    fn test_normlog_skips_dispersions() {
        let counts = CountMatrix::new(
            array![[10.0, 20.0, 30.0, 40.0], [5.0, 5.0, 6.0, 7.0]],
            strings(&["g1", "g2"]),
            strings(&["s1", "s2", "s3", "s4"]),
        )
        .unwrap();
        let mut samples = SampleTable::new("run", strings(&["s1", "s2", "s3", "s4"])).unwrap();
        samples.add_column("genotype", strings(&["WT", "WT", "KD", "KD"])).unwrap();
        samples.add_column("cell_cycle", strings(&["c12", "c13", "c12", "c13"])).unwrap();

        let config = PipelineConfig {
            transform: crate::transform::TransformMethod::NormLog,
            ..PipelineConfig::default()
        };
        let result = normalize_and_transform(&counts, &samples, &config).unwrap();
        assert!(result.dispersions.is_none());
        assert_eq!(result.transformed.n_genes(), 2);
        assert_eq!(result.transformed.sample_ids(), counts.sample_ids());
    }
}
