//! Size factor estimation by the median of ratios

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::data::CountMatrix;
use crate::error::{EdaError, Result};
use crate::stats::{geometric_mean, median};

/// Method for size factor estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeFactorMethod {
    /// Median of ratios over genes with no zero counts
    #[default]
    Ratio,
    /// Geometric means taken over positive counts only, for sparse data
    PosCounts,
}

impl std::str::FromStr for SizeFactorMethod {
    type Err = EdaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ratio" => Ok(SizeFactorMethod::Ratio),
            "poscounts" => Ok(SizeFactorMethod::PosCounts),
            other => Err(EdaError::InvalidInput {
                reason: format!("unknown size factor method '{}' (expected ratio or poscounts)", other),
            }),
        }
    }
}

/// One normalization factor per sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeFactors {
    pub sample_ids: Vec<String>,
    pub values: Vec<f64>,
    pub method: SizeFactorMethod,
}

impl SizeFactors {
    pub fn view(&self) -> ArrayView1<'_, f64> {
        ArrayView1::from(&self.values)
    }

    pub fn geometric_mean(&self) -> f64 {
        geometric_mean(&self.values)
    }

    pub fn range(&self) -> (f64, f64) {
        self.values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }
}

/// Estimate size factors for the samples of `counts`
///
/// The factors account for both sequencing depth and RNA composition.
pub fn estimate_size_factors(counts: &CountMatrix, method: SizeFactorMethod) -> Result<SizeFactors> {
    let raw = counts.counts();
    if raw.is_empty() {
        return Err(EdaError::EmptyData {
            reason: "count matrix is empty".to_string(),
        });
    }

    let values = match method {
        SizeFactorMethod::Ratio => median_of_ratios(raw, false)?,
        SizeFactorMethod::PosCounts => median_of_ratios(raw, true)?,
    };

    let factors = SizeFactors {
        sample_ids: counts.sample_ids().to_vec(),
        values: values.to_vec(),
        method,
    };
    let (lo, hi) = factors.range();
    log::info!(
        "Size factors ({:?}): range {:.3}-{:.3}, geometric mean {:.3}",
        method,
        lo,
        hi,
        factors.geometric_mean()
    );
    for (id, sf) in factors.sample_ids.iter().zip(&factors.values) {
        log::debug!("  {}: {:.4}", id, sf);
    }
    Ok(factors)
}

/// Per-gene geometric means as reference, then per-sample median ratio
///
/// With `positive_only`, genes with zeros still enter using the geometric
/// mean of their positive counts over all samples, and a sample without
/// any usable ratio gets factor 1. The result is rescaled to geometric mean 1.
fn median_of_ratios(counts: ArrayView2<'_, f64>, positive_only: bool) -> Result<Array1<f64>> {
    let n_samples = counts.ncols();

    let reference: Vec<(usize, f64)> = counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter_map(|(i, row)| {
            if positive_only {
                let log_sum: f64 = row.iter().filter(|&&x| x > 0.0).map(|x| x.ln()).sum();
                let any_positive = row.iter().any(|&x| x > 0.0);
                any_positive.then(|| (i, (log_sum / n_samples as f64).exp()))
            } else if row.iter().all(|&x| x > 0.0) {
                Some((i, (row.iter().map(|x| x.ln()).sum::<f64>() / n_samples as f64).exp()))
            } else {
                None
            }
        })
        .collect();

    if reference.is_empty() {
        return Err(EdaError::SizeFactorFailed {
            reason: if positive_only {
                "no gene has a positive count".to_string()
            } else {
                "every gene contains at least one zero; try the poscounts method".to_string()
            },
        });
    }

    let mut factors = Array1::zeros(n_samples);
    for j in 0..n_samples {
        let ratios: Vec<f64> = reference
            .iter()
            .filter(|(i, _)| counts[[*i, j]] > 0.0)
            .map(|&(i, geo)| counts[[i, j]] / geo)
            .collect();
        factors[j] = match median(&ratios) {
            Some(m) => m,
            None if positive_only => 1.0,
            None => {
                return Err(EdaError::SizeFactorFailed {
                    reason: format!("no usable ratios for sample {}", j),
                })
            }
        };
    }

    if factors.iter().any(|&x| x <= 0.0 || !x.is_finite()) {
        return Err(EdaError::SizeFactorFailed {
            reason: "invalid size factors computed".to_string(),
        });
    }

    if positive_only {
        let center = geometric_mean(factors.as_slice().unwrap_or(&[]));
        if center.is_finite() && center > 0.0 {
            factors.mapv_inplace(|f| f / center);
        }
    }
    Ok(factors)
}

/// Divide every column by its size factor
pub fn normalize_counts(counts: &CountMatrix, size_factors: &SizeFactors) -> Result<CountMatrix> {
    if size_factors.sample_ids != counts.sample_ids() {
        return Err(EdaError::DimensionMismatch {
            expected: format!("size factors for [{}]", counts.sample_ids().join(", ")),
            got: format!("size factors for [{}]", size_factors.sample_ids.join(", ")),
        });
    }
    let normalized = &counts.counts() / &size_factors.view().insert_axis(Axis(0));
    CountMatrix::new(normalized, counts.gene_ids().to_vec(), counts.sample_ids().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn matrix(values: ndarray::Array2<f64>) -> CountMatrix {
        let (g, s) = values.dim();
        CountMatrix::new(
            values,
            (0..g).map(|i| format!("g{}", i)).collect(),
            (0..s).map(|j| format!("s{}", j)).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_recovers_column_multiples() {
        let counts = matrix(array![
            [10.0, 20.0, 40.0],
            [100.0, 200.0, 400.0],
            [7.0, 14.0, 28.0],
            [55.0, 110.0, 220.0]
        ]);
        let sf = estimate_size_factors(&counts, SizeFactorMethod::Ratio).unwrap();
        assert_relative_eq!(sf.values[1] / sf.values[0], 2.0, epsilon = 1e-10);
        assert_relative_eq!(sf.values[2] / sf.values[0], 4.0, epsilon = 1e-10);
        assert_relative_eq!(sf.geometric_mean(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn test_ratio_needs_zero_free_gene() {
        let counts = matrix(array![[0.0, 5.0], [3.0, 0.0]]);
        assert!(matches!(
            estimate_size_factors(&counts, SizeFactorMethod::Ratio),
            Err(EdaError::SizeFactorFailed { .. })
        ));
        let sf = estimate_size_factors(&counts, SizeFactorMethod::PosCounts).unwrap();
        assert!(sf.values.iter().all(|&v| v > 0.0 && v.is_finite()));
    }

    #[test]
    fn test_normalize_counts() {
        let counts = matrix(array![[10.0, 20.0], [30.0, 60.0], [5.0, 10.0]]);
        let sf = estimate_size_factors(&counts, SizeFactorMethod::Ratio).unwrap();
        let normalized = normalize_counts(&counts, &sf).unwrap();
        let n = normalized.counts();
        for i in 0..3 {
            assert_relative_eq!(n[[i, 0]], n[[i, 1]], epsilon = 1e-10);
        }
        assert_eq!(normalized.gene_ids(), counts.gene_ids());
    }
}
