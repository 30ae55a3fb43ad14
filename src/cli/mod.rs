//! Command-line interface for embryo_rnaseq

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{parse_reference, PipelineConfig};
use crate::error::{EdaError, Result};
use crate::import::QuantFormat;

#[derive(Parser)]
#[command(name = "embryo_rnaseq")]
#[command(version)]
#[command(about = "Exploratory RNA-seq analysis of knockdown embryo time courses")]
#[command(disable_help_flag = true)]
#[command(disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Number of worker threads for per-gene fits [default: 1]
    #[arg(short = 't', long, global = true)]
    pub threads: Option<usize>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline
    #[command(
        about = "Run the full pipeline",
        long_about = "Run the full pipeline\n\n\
            Imports per-sample transcript abundances, sums them per gene, collapses\n\
            technical replicates, drops low-count genes, normalizes, applies a\n\
            variance-stabilizing transform (rlog by default), clusters samples,\n\
            runs PCA and writes per-gene reports and plots.",
        after_long_help = "\
Examples:
  # Kallisto output in quant/<run>/abundance.tsv, lanes collapsed by the 'sample' column
  embryo_rnaseq run --samples samples.tsv --quant-dir quant --tx2gene tx2gene.tsv \\
    --collapse-by sample --reference genotype=WT --reference cell_cycle=c12 -o results

  # Settings from a JSON file, with a gene of interest and VST
  embryo_rnaseq run --config analysis.json --gene-names genes.tsv --gene zld --transform vst"
    )]
    Run {
        /// JSON configuration file; flags override its values
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        samples: SampleArgs,

        #[command(flatten)]
        quant: QuantArgs,

        #[command(flatten)]
        model: ModelArgs,

        /// Gene ID to name table
        #[arg(long)]
        gene_names: Option<PathBuf>,

        /// Output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Sample table column naming the collapsed samples
        #[arg(long)]
        collapse_by: Option<String>,

        /// Column recorded as run provenance when collapsing
        #[arg(long)]
        run_column: Option<String>,

        /// Linkage for sample clustering: single, complete or average
        #[arg(long)]
        linkage: Option<String>,

        /// Number of most variable genes used for PCA [default: 5000]
        #[arg(long)]
        ntop: Option<usize>,

        /// Gene (ID or symbol) to report and plot; repeatable
        #[arg(short, long = "gene")]
        genes: Vec<String>,

        /// Skip SVG plots
        #[arg(long)]
        no_plots: bool,
    },

    /// Import abundances into a gene count matrix
    #[command(
        long_about = "Import per-sample transcript abundances and sum them per gene.\n\n\
            Writes the raw gene x run count matrix without collapsing or filtering.",
        after_long_help = "\
Examples:
  embryo_rnaseq import --samples samples.tsv --quant-dir quant --tx2gene tx2gene.tsv -o counts.tsv
  embryo_rnaseq import --samples samples.tsv --quant-dir salmon --tx2gene tx2gene.tsv --format salmon"
    )]
    Import {
        /// JSON configuration file; flags override its values
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        samples: SampleArgs,

        #[command(flatten)]
        quant: QuantArgs,

        /// Output file path [default: gene_counts.tsv]
        #[arg(short, long, default_value = "gene_counts.tsv")]
        output: PathBuf,
    },

    /// Filter, normalize and transform a gene count matrix
    #[command(
        long_about = "Filter, normalize and transform an existing gene count matrix.\n\n\
            Matrix columns are joined to the sample table by sample ID; no\n\
            replicate collapsing is applied.",
        after_long_help = "\
Examples:
  embryo_rnaseq transform -c counts.tsv --samples samples.tsv -o rlog.tsv
  embryo_rnaseq transform -c counts.tsv --samples samples.tsv --transform vst --blind"
    )]
    Transform {
        /// JSON configuration file; flags override its values
        #[arg(long)]
        config: Option<PathBuf>,

        /// Gene count matrix (gene IDs in the first column)
        #[arg(short, long)]
        counts: PathBuf,

        #[command(flatten)]
        samples: SampleArgs,

        #[command(flatten)]
        model: ModelArgs,

        /// Output file path [default: transformed.tsv]
        #[arg(short, long, default_value = "transformed.tsv")]
        output: PathBuf,
    },
}

/// Sample table location
#[derive(Args)]
pub struct SampleArgs {
    /// Sample table, one row per sequencing run
    #[arg(long)]
    pub samples: Option<PathBuf>,

    /// Sample ID column [default: first column]
    #[arg(long)]
    pub id_column: Option<String>,
}

/// Quantification inputs
#[derive(Args)]
pub struct QuantArgs {
    /// Directory with one subdirectory per run
    #[arg(long)]
    pub quant_dir: Option<PathBuf>,

    /// Transcript to gene table
    #[arg(long)]
    pub tx2gene: Option<PathBuf>,

    /// Quantification layout: kallisto or salmon [default: kallisto]
    #[arg(long)]
    pub format: Option<String>,

    /// File name inside each run directory [default: per format]
    #[arg(long)]
    pub file_name: Option<String>,

    /// Fail on transcripts missing from the annotation
    #[arg(long)]
    pub strict: bool,
}

/// Filtering, design and transform settings
#[derive(Args)]
pub struct ModelArgs {
    /// Count a gene as expressed in a sample above this count [default: 1]
    #[arg(long)]
    pub min_count: Option<f64>,

    /// Samples that must exceed --min-count to keep a gene [default: 2]
    #[arg(long)]
    pub min_samples: Option<usize>,

    /// Design formula [default: "~ genotype * cell_cycle"]
    #[arg(short, long)]
    pub design: Option<String>,

    /// Reference level as factor=level; repeatable
    #[arg(short, long = "reference")]
    pub references: Vec<String>,

    /// Transform: rlog, vst or normlog [default: rlog]
    #[arg(long)]
    pub transform: Option<String>,

    /// Size factor method: ratio or poscounts [default: ratio]
    #[arg(long)]
    pub size_factors: Option<String>,

    /// Estimate dispersions for the transform with an intercept-only design
    #[arg(long,
        long_help = "Ignore the experimental design when estimating dispersions for\n\
            the transform. Use for unsupervised QC of sample clustering.")]
    pub blind: bool,
}

/// Default configuration, or the JSON file when given
pub fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path),
        None => Ok(PipelineConfig::default()),
    }
}

impl SampleArgs {
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(path) = &self.samples {
            config.samples = path.clone();
        }
        if let Some(column) = &self.id_column {
            config.sample_id_column = Some(column.clone());
        }
    }
}

impl QuantArgs {
    pub fn apply(&self, config: &mut PipelineConfig) -> Result<()> {
        if let Some(dir) = &self.quant_dir {
            config.quant_dir = dir.clone();
        }
        if let Some(path) = &self.tx2gene {
            config.tx2gene = path.clone();
        }
        if let Some(format) = &self.format {
            config.import.format = match format.to_ascii_lowercase().as_str() {
                "kallisto" => QuantFormat::Kallisto,
                "salmon" => QuantFormat::Salmon,
                other => {
                    return Err(EdaError::InvalidInput {
                        reason: format!("Unknown quantification format '{}'. Use kallisto or salmon.", other),
                    })
                }
            };
        }
        if let Some(name) = &self.file_name {
            config.import.file_name = Some(name.clone());
        }
        if self.strict {
            config.import.strict = true;
        }
        Ok(())
    }
}

impl ModelArgs {
    pub fn apply(&self, config: &mut PipelineConfig) -> Result<()> {
        if let Some(min_count) = self.min_count {
            config.filter.min_count = min_count;
        }
        if let Some(min_samples) = self.min_samples {
            config.filter.min_samples = min_samples;
        }
        if let Some(design) = &self.design {
            config.design = design.clone();
        }
        for pair in &self.references {
            let (factor, level) = parse_reference(pair)?;
            config.reference_levels.insert(factor, level);
        }
        if let Some(method) = &self.transform {
            config.transform = method.parse()?;
        }
        if let Some(method) = &self.size_factors {
            config.size_factors = method.parse()?;
        }
        if self.blind {
            config.blind = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::TransformMethod;

    #[test]
    fn test_run_flags_override_config() {
        let cli = Cli::parse_from([
            "embryo_rnaseq",
            "run",
            "--samples",
            "s.tsv",
            "--format",
            "salmon",
            "--reference",
            "genotype=WT",
            "--transform",
            "vst",
            "--min-samples",
            "3",
            "--gene",
            "zld",
            "--gene",
            "bcd",
            "-v",
        ]);
        assert!(cli.verbose);
        let Some(Commands::Run { samples, quant, model, genes, .. }) = cli.command else {
            panic!("expected run");
        };
        let mut config = PipelineConfig::default();
        samples.apply(&mut config);
        quant.apply(&mut config).unwrap();
        model.apply(&mut config).unwrap();

        assert_eq!(config.samples, PathBuf::from("s.tsv"));
        assert_eq!(config.import.format, QuantFormat::Salmon);
        assert_eq!(config.genotype_reference(), Some("WT"));
        assert_eq!(config.transform, TransformMethod::Vst);
        assert_eq!(config.filter.min_samples, 3);
        assert_eq!(config.filter.min_count, 1.0);
        assert_eq!(genes, vec!["zld", "bcd"]);
    }

    #[test]
    fn test_bad_reference_flag() {
        let cli = Cli::parse_from(["embryo_rnaseq", "transform", "-c", "x.tsv", "--reference", "WT"]);
        let Some(Commands::Transform { model, .. }) = cli.command else {
            panic!("expected transform");
        };
        assert!(model.apply(&mut PipelineConfig::default()).is_err());
    }
}
