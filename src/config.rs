//! Pipeline configuration
//!
//! Every parameter of a run lives in [`PipelineConfig`]. It can be read
//! from a JSON file, where any field may be omitted to keep its default,
//! and command-line flags are applied on top.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::annotation::AnnotationColumns;
use crate::dispersion::DispersionParams;
use crate::error::{EdaError, Result};
use crate::filter::LowCountFilter;
use crate::import::ImportOptions;
use crate::normalization::SizeFactorMethod;
use crate::report::{SampleIdLayout, DEFAULT_SPAN};
use crate::similarity::{Linkage, PcaConfig};
use crate::transform::TransformMethod;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Sample table, one row per sequencing run
    pub samples: PathBuf,
    /// Column of the sample table holding run IDs (first column when unset)
    pub sample_id_column: Option<String>,
    /// Directory holding one quantification subdirectory per run
    pub quant_dir: PathBuf,
    pub tx2gene: PathBuf,
    pub tx2gene_columns: AnnotationColumns,
    pub gene_names: Option<PathBuf>,
    pub gene_name_columns: AnnotationColumns,
    pub output_dir: PathBuf,

    pub import: ImportOptions,
    /// Sample table column whose values name the collapsed samples
    pub collapse_by: Option<String>,
    /// Column recorded as provenance when collapsing
    pub run_column: Option<String>,
    pub filter: LowCountFilter,

    pub design: String,
    /// Reference level per factor, applied before any normalization
    pub reference_levels: BTreeMap<String, String>,
    pub genotype_column: String,
    pub stage_column: String,
    pub size_factors: SizeFactorMethod,
    pub dispersion: DispersionParams,
    pub transform: TransformMethod,
    /// Estimate dispersions for the transform with an intercept-only design
    pub blind: bool,
    pub pseudocount: f64,

    pub linkage: Linkage,
    pub pca: PcaConfig,

    /// Genes of interest (IDs or symbols) for the per-gene report
    pub genes: Vec<String>,
    /// Report normalized counts instead of transformed values
    pub report_normalized: bool,
    pub sample_id_layout: SampleIdLayout,
    pub trend_span: f64,
    pub plots: bool,

    /// Worker threads for per-gene fits
    pub threads: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            samples: PathBuf::from("samples.tsv"),
            sample_id_column: None,
            quant_dir: PathBuf::from("quant"),
            tx2gene: PathBuf::from("tx2gene.tsv"),
            tx2gene_columns: AnnotationColumns::default(),
            gene_names: None,
            gene_name_columns: AnnotationColumns::default(),
            output_dir: PathBuf::from("results"),
            import: ImportOptions::default(),
            collapse_by: None,
            run_column: None,
            filter: LowCountFilter::default(),
            design: "~ genotype * cell_cycle".to_string(),
            reference_levels: BTreeMap::new(),
            genotype_column: "genotype".to_string(),
            stage_column: "cell_cycle".to_string(),
            size_factors: SizeFactorMethod::default(),
            dispersion: DispersionParams::default(),
            transform: TransformMethod::default(),
            blind: false,
            pseudocount: 1.0,
            linkage: Linkage::default(),
            pca: PcaConfig::default(),
            genes: Vec::new(),
            report_normalized: false,
            sample_id_layout: SampleIdLayout::default(),
            trend_span: DEFAULT_SPAN,
            plots: true,
            threads: 1,
        }
    }
}

impl PipelineConfig {
    /// Read a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        log::debug!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject parameter values no stage could use
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(EdaError::InvalidInput { reason });
        if self.filter.min_samples == 0 {
            return invalid("filter.min_samples must be at least 1".to_string());
        }
        if !(self.filter.min_count >= 0.0) {
            return invalid(format!("filter.min_count must be >= 0, got {}", self.filter.min_count));
        }
        if !(self.pseudocount > 0.0) {
            return invalid(format!("pseudocount must be positive, got {}", self.pseudocount));
        }
        if self.pca.n_top == 0 || self.pca.n_components == 0 {
            return invalid("pca.n_top and pca.n_components must be positive".to_string());
        }
        if !(self.trend_span > 0.0) {
            return invalid(format!("trend_span must be positive, got {}", self.trend_span));
        }
        if self.dispersion.grid_size < 2 {
            return invalid("dispersion.grid_size must be at least 2".to_string());
        }
        Ok(())
    }

    pub fn genotype_reference(&self) -> Option<&str> {
        self.reference_levels.get(&self.genotype_column).map(String::as_str)
    }

    pub fn stage_reference(&self) -> Option<&str> {
        self.reference_levels.get(&self.stage_column).map(String::as_str)
    }

    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(file_name)
    }
}

/// Parse a `factor=level` reference override
pub fn parse_reference(pair: &str) -> Result<(String, String)> {
    match pair.split_once('=') {
        Some((factor, level)) if !factor.trim().is_empty() && !level.trim().is_empty() => {
            Ok((factor.trim().to_string(), level.trim().to_string()))
        }
        _ => Err(EdaError::InvalidInput {
            reason: format!("reference must look like factor=level, got '{}'", pair),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "samples": "meta/samples.csv",
                "collapse_by": "sample",
                "filter": {{ "min_count": 5 }},
                "reference_levels": {{ "genotype": "WT", "cell_cycle": "c12" }},
                "transform": "vst",
                "linkage": "average",
                "import": {{ "format": "salmon" }}
            }}"#
        )
        .unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.samples, PathBuf::from("meta/samples.csv"));
        assert_eq!(config.collapse_by.as_deref(), Some("sample"));
        assert_eq!(config.filter.min_count, 5.0);
        assert_eq!(config.filter.min_samples, 2);
        assert_eq!(config.transform, TransformMethod::Vst);
        assert_eq!(config.linkage, Linkage::Average);
        assert_eq!(config.import.file_name(), "quant.sf");
        assert_eq!(config.genotype_reference(), Some("WT"));
        assert_eq!(config.stage_reference(), Some("c12"));
        assert_eq!(config.pca.n_top, 5000);
        assert_eq!(config.threads, 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.filter.min_samples = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.pseudocount = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_reference() {
        assert_eq!(
            parse_reference("genotype=WT").unwrap(),
            ("genotype".to_string(), "WT".to_string())
        );
        assert!(parse_reference("genotype").is_err());
        assert!(parse_reference("=WT").is_err());
    }
}
