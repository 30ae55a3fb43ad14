//! embryo_rnaseq: exploratory RNA-seq analysis of knockdown embryo time courses
//!
//! Transcript abundances from kallisto or salmon are summed per gene,
//! technical replicates are collapsed, low-count genes dropped, and the
//! counts normalized and variance-stabilized with negative binomial
//! machinery in the style of DESeq2. Samples are then compared by
//! distance, hierarchical clustering and PCA, and genes of interest are
//! reshaped into long-form reports with plots.
//!
//! # Example
//!
//! ```ignore
//! use embryo_rnaseq::prelude::*;
//!
//! let mut config = PipelineConfig::default();
//! config.collapse_by = Some("sample".to_string());
//! config.reference_levels.insert("genotype".to_string(), "WT".to_string());
//! config.genes = vec!["zld".to_string()];
//!
//! let output = run_pipeline(&config)?;
//! println!("{:?}", output.similarity.dendrogram.leaf_labels());
//! ```

pub mod annotation;
pub mod cli;
pub mod config;
pub mod data;
pub mod dispersion;
pub mod error;
pub mod filter;
pub mod glm;
pub mod import;
pub mod io;
pub mod normalization;
pub mod pipeline;
pub mod plot;
pub mod report;
pub mod similarity;
pub mod stats;
pub mod transform;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::annotation::{read_gene_name_map, read_transcript_gene_map, GeneNameMap, TranscriptGeneMap};
    pub use crate::config::PipelineConfig;
    pub use crate::data::{collapse_replicates, CountMatrix, Factor, SampleTable};
    pub use crate::dispersion::{estimate_dispersions, DispersionFit, DispersionParams};
    pub use crate::error::{EdaError, Result};
    pub use crate::filter::{filter_low_counts, LowCountFilter};
    pub use crate::glm::{Design, ModelMatrix};
    pub use crate::import::{import_abundances, ImportOptions, QuantFormat};
    pub use crate::io::{read_count_matrix, read_sample_table};
    pub use crate::normalization::{estimate_size_factors, normalize_counts, SizeFactorMethod, SizeFactors};
    pub use crate::pipeline::{run_pipeline, PipelineOutput};
    pub use crate::report::{GeneReport, GeneReportBuilder, SampleIdLayout};
    pub use crate::similarity::{hierarchical_cluster, pca, Dendrogram, DistanceMatrix, Linkage, PcaConfig};
    pub use crate::transform::{transform_counts, TransformMethod, TransformedMatrix};
}
