//! Dispersion estimation for negative binomial models

mod gene_wise;
mod trend;

pub use gene_wise::{estimate_dispersion_gene, estimate_gene_dispersions};
pub use trend::{fit_dispersion_trend, DispersionTrend};

use serde::{Deserialize, Serialize};

use crate::data::CountMatrix;
use crate::error::{EdaError, Result};
use crate::glm::ModelMatrix;
use crate::normalization::SizeFactors;
use crate::stats::row_means;

/// Configurable parameters for dispersion estimation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispersionParams {
    /// Lower bound on any dispersion estimate
    pub min_disp: f64,
    /// Points per grid in the log-dispersion search
    pub grid_size: usize,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            grid_size: 20,
        }
    }
}

/// Gene-wise dispersions and the trend fitted through them
#[derive(Debug, Clone)]
pub struct DispersionFit {
    /// Mean of normalized counts per gene
    pub base_means: Vec<f64>,
    pub gene_wise: Vec<f64>,
    pub trend: DispersionTrend,
    /// Trend evaluated at each gene's base mean
    pub fitted: Vec<f64>,
}

/// Estimate gene-wise dispersions, then fit the mean-dispersion trend
pub fn estimate_dispersions(
    counts: &CountMatrix,
    size_factors: &SizeFactors,
    model: &ModelMatrix,
    params: &DispersionParams,
) -> Result<DispersionFit> {
    if model.matrix.nrows() != counts.n_samples() {
        return Err(EdaError::DimensionMismatch {
            expected: format!("{} model matrix rows", counts.n_samples()),
            got: format!("{} rows", model.matrix.nrows()),
        });
    }
    if model.matrix.nrows() < model.matrix.ncols() {
        return Err(EdaError::InvalidDesign {
            reason: "design has more coefficients than samples; no replicates for dispersion estimation"
                .to_string(),
        });
    }

    let normalized = &counts.counts() / &size_factors.view().insert_axis(ndarray::Axis(0));
    let base_means = row_means(normalized.view());

    log::info!("Estimating gene-wise dispersions for {} genes", counts.n_genes());
    let gene_wise = estimate_gene_dispersions(counts, size_factors, model, params);

    let trend = fit_dispersion_trend(&base_means, &gene_wise, params.min_disp)?;
    let fitted = base_means.iter().map(|&m| trend.eval(m)).collect();

    Ok(DispersionFit {
        base_means,
        gene_wise,
        trend,
        fitted,
    })
}
