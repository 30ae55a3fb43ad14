//! Variance-stabilizing transformations for visualization, distances and PCA

mod rlog;
mod vst;

pub use rlog::{rlog, RlogFit};
pub use vst::vst;

use std::fmt;

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::data::CountMatrix;
use crate::dispersion::DispersionFit;
use crate::error::{EdaError, Result};
use crate::normalization::SizeFactors;

/// Transformation applied to normalized counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformMethod {
    /// Regularized log
    #[default]
    Rlog,
    /// Closed-form variance stabilizing transformation from the dispersion trend
    Vst,
    /// `log2(normalized + pseudocount)`
    NormLog,
}

impl TransformMethod {
    /// Whether the method needs dispersion estimates
    pub fn needs_dispersions(&self) -> bool {
        !matches!(self, TransformMethod::NormLog)
    }
}

impl fmt::Display for TransformMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransformMethod::Rlog => "rlog",
            TransformMethod::Vst => "vst",
            TransformMethod::NormLog => "normlog",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for TransformMethod {
    type Err = EdaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rlog" => Ok(TransformMethod::Rlog),
            "vst" => Ok(TransformMethod::Vst),
            "normlog" | "log2" => Ok(TransformMethod::NormLog),
            other => Err(EdaError::InvalidInput {
                reason: format!("unknown transform '{}' (expected rlog, vst or normlog)", other),
            }),
        }
    }
}

/// Genes x samples on the log2 scale, with the IDs of the counts it came from
#[derive(Debug, Clone)]
pub struct TransformedMatrix {
    values: Array2<f64>,
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
    method: TransformMethod,
}

impl TransformedMatrix {
    pub fn new(
        values: Array2<f64>,
        gene_ids: Vec<String>,
        sample_ids: Vec<String>,
        method: TransformMethod,
    ) -> Result<Self> {
        if values.dim() != (gene_ids.len(), sample_ids.len()) {
            return Err(EdaError::DimensionMismatch {
                expected: format!("{} x {}", gene_ids.len(), sample_ids.len()),
                got: format!("{} x {}", values.nrows(), values.ncols()),
            });
        }
        Ok(Self {
            values,
            gene_ids,
            sample_ids,
            method,
        })
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn method(&self) -> TransformMethod {
        self.method
    }

    pub fn n_genes(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.values.ncols()
    }

    pub fn gene_index(&self, gene_id: &str) -> Option<usize> {
        self.gene_ids.iter().position(|g| g == gene_id)
    }
}

/// Transform raw counts with the chosen method
///
/// `Rlog` and `Vst` require the dispersion fit for these counts; `NormLog`
/// ignores it and adds `pseudocount` before taking log2.
pub fn transform_counts(
    counts: &CountMatrix,
    size_factors: &SizeFactors,
    dispersions: Option<&DispersionFit>,
    method: TransformMethod,
    pseudocount: f64,
) -> Result<TransformedMatrix> {
    if size_factors.sample_ids != counts.sample_ids() {
        return Err(EdaError::DimensionMismatch {
            expected: format!("size factors for {} samples", counts.n_samples()),
            got: format!("size factors for {} samples", size_factors.values.len()),
        });
    }
    let dispersion_fit = || {
        dispersions.ok_or_else(|| EdaError::InvalidInput {
            reason: format!("{} needs dispersion estimates", method),
        })
    };

    let normalized = &counts.counts() / &size_factors.view().insert_axis(Axis(0));
    let values = match method {
        TransformMethod::NormLog => {
            if pseudocount <= 0.0 {
                return Err(EdaError::InvalidInput {
                    reason: format!("pseudocount must be positive, got {}", pseudocount),
                });
            }
            normalized.mapv(|v| (v + pseudocount).log2())
        }
        TransformMethod::Vst => vst(normalized.view(), &dispersion_fit()?.trend),
        TransformMethod::Rlog => {
            let fit = dispersion_fit()?;
            if fit.fitted.len() != counts.n_genes() {
                return Err(EdaError::DimensionMismatch {
                    expected: format!("{} fitted dispersions", counts.n_genes()),
                    got: format!("{}", fit.fitted.len()),
                });
            }
            rlog(counts.counts(), &size_factors.values, &fit.fitted).data
        }
    };

    log::info!(
        "Transformed {} genes x {} samples with {}",
        counts.n_genes(),
        counts.n_samples(),
        method
    );
    TransformedMatrix::new(values, counts.gene_ids().to_vec(), counts.sample_ids().to_vec(), method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    use ndarray::array;

    fn counts() -> CountMatrix {
        CountMatrix::new(
            array![[10.0, 20.0, 15.0], [100.0, 180.0, 150.0], [3.0, 6.0, 4.0]],
            vec!["g1".into(), "g2".into(), "g3".into()],
            vec!["a".into(), "b".into(), "c".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_normlog() {
        let counts = counts();
        let sf = estimate_size_factors(&counts, SizeFactorMethod::Ratio).unwrap();
        let t = transform_counts(&counts, &sf, None, TransformMethod::NormLog, 1.0).unwrap();
        assert_eq!(t.gene_ids(), counts.gene_ids());
        assert_eq!(t.sample_ids(), counts.sample_ids());
        let expected = (10.0 / sf.values[0] + 1.0f64).log2();
        assert!((t.values()[[0, 0]] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_rlog_requires_dispersions() {
        let counts = counts();
        let sf = estimate_size_factors(&counts, SizeFactorMethod::Ratio).unwrap();
        let result = transform_counts(&counts, &sf, None, TransformMethod::Rlog, 1.0);
        assert!(matches!(result, Err(EdaError::InvalidInput { .. })));
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("VST".parse::<TransformMethod>().unwrap(), TransformMethod::Vst);
        assert_eq!("log2".parse::<TransformMethod>().unwrap(), TransformMethod::NormLog);
        assert!("zscore".parse::<TransformMethod>().is_err());
        assert_eq!(TransformMethod::default().to_string(), "rlog");
    }
}
