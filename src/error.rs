//! Error types for embryo_rnaseq

use thiserror::Error;

/// Main error type for the analysis pipeline
#[derive(Error, Debug)]
pub enum EdaError {
    #[error("Reference level '{level}' not found for factor '{factor}' (observed: {observed})")]
    MissingReferenceLevel {
        factor: String,
        level: String,
        observed: String,
    },

    #[error("Sample/file mismatch: {reason}")]
    SampleFileMismatch { reason: String },

    #[error(
        "No genes left after filtering ({n_genes} genes tested, \
         count > {min_count} required in at least {min_samples} samples)"
    )]
    EmptyAfterFiltering {
        min_count: f64,
        min_samples: usize,
        n_genes: usize,
    },

    #[error("Transcript '{transcript_id}' in sample '{sample_id}' has no gene mapping")]
    UnresolvedTranscript {
        sample_id: String,
        transcript_id: String,
    },

    #[error("Column '{column}' not found in {table}")]
    MissingColumn { table: String, column: String },

    #[error("Invalid sample table: {reason}")]
    InvalidSampleTable { reason: String },

    #[error("Invalid annotation: {reason}")]
    InvalidAnnotation { reason: String },

    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Invalid design: {reason}")]
    InvalidDesign { reason: String },

    #[error("Size factor estimation failed: {reason}")]
    SizeFactorFailed { reason: String },

    #[error("Trend fitting failed: {reason}")]
    TrendFittingFailed { reason: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error("Plot rendering failed for {target}: {reason}")]
    PlotFailed { target: String, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, EdaError>;
