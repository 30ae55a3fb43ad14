//! embryo_rnaseq command-line interface

use clap::Parser;
use log::{info, LevelFilter};

use embryo_rnaseq::cli::{load_config, Cli, Commands};
use embryo_rnaseq::config::PipelineConfig;
use embryo_rnaseq::error::{EdaError, Result};
use embryo_rnaseq::pipeline::{run_import, run_pipeline, run_transform};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let args: Vec<String> = std::env::args().collect();

    // Find the first non-flag argument (potential subcommand)
    let first_positional = args.iter().skip(1).find(|a| !a.starts_with('-'));
    let subcommands = ["run", "import", "transform", "help"];
    let has_subcommand = first_positional.is_some_and(|a| subcommands.contains(&a.as_str()));

    if !has_subcommand {
        if args.iter().any(|a| a == "--help") {
            print_long_help();
        } else if args.iter().any(|a| a == "-h") {
            print_short_help();
        } else if args.iter().any(|a| a == "-V" || a == "--version") {
            println!("embryo_rnaseq {}", VERSION);
        } else {
            print_no_args();
        }
        return;
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = configure_threads(cli.threads).and_then(|threads| match cli.command {
        Some(Commands::Run {
            config,
            samples,
            quant,
            model,
            gene_names,
            output_dir,
            collapse_by,
            run_column,
            linkage,
            ntop,
            genes,
            no_plots,
        }) => load_config(config.as_ref()).and_then(|mut config| {
            samples.apply(&mut config);
            quant.apply(&mut config)?;
            model.apply(&mut config)?;
            if let Some(path) = gene_names {
                config.gene_names = Some(path);
            }
            if let Some(dir) = output_dir {
                config.output_dir = dir;
            }
            if collapse_by.is_some() {
                config.collapse_by = collapse_by;
            }
            if run_column.is_some() {
                config.run_column = run_column;
            }
            if let Some(linkage) = linkage {
                config.linkage = linkage.parse()?;
            }
            if let Some(ntop) = ntop {
                config.pca.n_top = ntop;
            }
            if !genes.is_empty() {
                config.genes = genes;
            }
            if no_plots {
                config.plots = false;
            }
            config.threads = threads;
            run_analysis(&config)
        }),
        Some(Commands::Import {
            config,
            samples,
            quant,
            output,
        }) => load_config(config.as_ref()).and_then(|mut config| {
            samples.apply(&mut config);
            quant.apply(&mut config)?;
            run_import(&config, &output).map(|_| ())
        }),
        Some(Commands::Transform {
            config,
            counts,
            samples,
            model,
            output,
        }) => load_config(config.as_ref()).and_then(|mut config| {
            samples.apply(&mut config);
            model.apply(&mut config)?;
            run_transform(&config, &counts, &output).map(|_| ())
        }),
        None => {
            print_no_args();
            Ok(())
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Size the global rayon pool; one thread unless asked otherwise
fn configure_threads(threads: Option<usize>) -> Result<usize> {
    let threads = threads.unwrap_or(1);
    if threads == 0 {
        return Err(EdaError::InvalidInput {
            reason: "--threads must be at least 1".to_string(),
        });
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
    Ok(threads)
}

fn run_analysis(config: &PipelineConfig) -> Result<()> {
    let output = run_pipeline(config)?;
    let summary = output.summary(config);
    info!(
        "Done! {} runs -> {} samples, {} of {} genes kept, PCA {:.1}% / {:.1}%",
        summary.n_runs,
        summary.n_samples,
        summary.n_genes_filtered,
        summary.n_genes_imported,
        summary.pca_variance_percent.first().copied().unwrap_or(0.0),
        summary.pca_variance_percent.get(1).copied().unwrap_or(0.0)
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Custom help output
// ---------------------------------------------------------------------------

fn print_no_args() {
    println!("embryo_rnaseq v{}", VERSION);
    println!("Run `embryo_rnaseq -h` for usage or `embryo_rnaseq --help` for detailed information.");
}

fn print_short_help() {
    println!("embryo_rnaseq v{}", VERSION);
    println!();
    println!("Usage: embryo_rnaseq <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run        Run the full pipeline");
    println!("  import     Import abundances into a gene count matrix");
    println!("  transform  Filter, normalize and transform a gene count matrix");
    println!();
    println!("Run `embryo_rnaseq <COMMAND> --help` for command-specific options.");
}

fn print_long_help() {
    println!("embryo_rnaseq v{}", VERSION);
    println!("Exploratory RNA-seq analysis of knockdown embryo time courses");
    println!();
    println!("Usage: embryo_rnaseq <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  run        Run the full pipeline");
    println!("               - kallisto or salmon abundances summed per gene");
    println!("               - technical replicate collapsing and low-count filtering");
    println!("               - median-of-ratios normalization");
    println!("               - rlog, VST or log2 transforms");
    println!("               - sample distance heatmap, clustering and PCA");
    println!("               - per-gene boxplots and stage trends");
    println!("  import     Import abundances into a gene count matrix");
    println!("  transform  Filter, normalize and transform a gene count matrix");
    println!();
    println!("Global Options:");
    println!("  -v, --verbose        Enable verbose output");
    println!("  -t, --threads <N>    Worker threads for per-gene fits [default: 1]");
    println!("  -h                   Print short help");
    println!("      --help           Print detailed help");
    println!("  -V, --version        Print version");
    println!();
    println!("Examples:");
    println!("  embryo_rnaseq run --samples samples.tsv --quant-dir quant --tx2gene tx2gene.tsv \\");
    println!("    --collapse-by sample --reference genotype=WT -o results");
    println!();
    println!("  embryo_rnaseq transform -c counts.tsv --samples samples.tsv --transform vst --blind");
}
