//! Principal component analysis of samples on the most variable genes

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{EdaError, Result};
use crate::stats::{row_variances, top_n_indices};

/// Gene selection and output size for [`pca`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcaConfig {
    /// Number of highest-variance genes used
    pub n_top: usize,
    /// Number of components reported
    pub n_components: usize,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            n_top: 5000,
            n_components: 2,
        }
    }
}

/// Sample coordinates on the leading principal components
#[derive(Debug, Clone, Serialize)]
pub struct PcaResult {
    pub sample_ids: Vec<String>,
    /// samples x components
    #[serde(skip)]
    pub coordinates: Array2<f64>,
    /// Percentage of total variance per reported component
    pub variance_percent: Vec<f64>,
    pub n_genes_used: usize,
}

impl PcaResult {
    pub fn n_components(&self) -> usize {
        self.coordinates.ncols()
    }

    /// Coordinates of every sample on one component
    pub fn component(&self, idx: usize) -> Vec<f64> {
        self.coordinates.column(idx).to_vec()
    }

    /// Axis label such as `PC1: 42% variance`
    pub fn axis_label(&self, idx: usize) -> String {
        format!("PC{}: {:.0}% variance", idx + 1, self.variance_percent[idx])
    }
}

/// PCA of the sample columns of a genes x samples matrix
///
/// Genes are ranked by row variance and the top `n_top` are centred per
/// gene. Components come from the eigendecomposition of the
/// samples x samples Gram matrix, so the cost depends on the number of
/// samples rather than genes. Each component is flipped so that its
/// largest-magnitude sample score is positive.
pub fn pca(values: ArrayView2<'_, f64>, sample_ids: &[String], config: &PcaConfig) -> Result<PcaResult> {
    let (n_genes, n_samples) = values.dim();
    if sample_ids.len() != n_samples {
        return Err(EdaError::DimensionMismatch {
            expected: format!("{} sample IDs", n_samples),
            got: format!("{} sample IDs", sample_ids.len()),
        });
    }
    if n_samples < 2 {
        return Err(EdaError::InvalidInput {
            reason: format!("PCA needs at least 2 samples, got {}", n_samples),
        });
    }
    if n_genes == 0 || config.n_top == 0 {
        return Err(EdaError::EmptyData {
            reason: "no genes available for PCA".to_string(),
        });
    }

    let selected = top_n_indices(&row_variances(values), config.n_top);
    let mut centred = values.select(Axis(0), &selected);
    for mut row in centred.axis_iter_mut(Axis(0)) {
        let mean = row.mean().unwrap_or(0.0);
        row -= mean;
    }

    let gram = centred.t().dot(&centred);
    let eigen = SymmetricEigen::new(DMatrix::from_fn(n_samples, n_samples, |i, j| gram[[i, j]]));

    let mut order: Vec<usize> = (0..n_samples).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));
    let eigenvalues: Vec<f64> = order.iter().map(|&k| eigen.eigenvalues[k].max(0.0)).collect();
    let total: f64 = eigenvalues.iter().sum();

    let n_components = config.n_components.min(n_samples);
    if n_components < config.n_components {
        log::warn!(
            "Requested {} principal components but only {} samples; reporting {}",
            config.n_components,
            n_samples,
            n_components
        );
    }

    let mut coordinates = Array2::zeros((n_samples, n_components));
    for (c, &k) in order.iter().take(n_components).enumerate() {
        let scale = eigenvalues[c].sqrt();
        let vector = eigen.eigenvectors.column(k);
        let pivot = (0..n_samples)
            .max_by(|&a, &b| vector[a].abs().total_cmp(&vector[b].abs()).then(b.cmp(&a)))
            .unwrap_or(0);
        let sign = if vector[pivot] < 0.0 { -1.0 } else { 1.0 };
        for s in 0..n_samples {
            coordinates[[s, c]] = sign * scale * vector[s];
        }
    }

    let variance_percent: Vec<f64> = eigenvalues
        .iter()
        .take(n_components)
        .map(|&l| if total > 0.0 { 100.0 * l / total } else { 0.0 })
        .collect();

    log::info!(
        "PCA on {} genes: {}",
        selected.len(),
        variance_percent
            .iter()
            .enumerate()
            .map(|(i, p)| format!("PC{} {:.1}%", i + 1, p))
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(PcaResult {
        sample_ids: sample_ids.to_vec(),
        coordinates,
        variance_percent,
        n_genes_used: selected.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("s{}", i)).collect()
    }

    /// 40 genes x 6 samples; the first 10 genes jump by 6 units in samples 3..6
    fn two_groups() -> Array2<f64> {
        Array2::from_shape_fn((40, 6), |(g, s)| {
            let noise = (((g * 7 + s * 13) % 11) as f64 - 5.0) * 0.02;
            let shift = if g < 10 && s >= 3 { 6.0 } else { 0.0 };
            2.0 + g as f64 * 0.1 + shift + noise
        })
    }

    #[test]
    fn test_pca_separates_groups_on_pc1() {
        let data = two_groups();
        let result = pca(data.view(), &ids(6), &PcaConfig::default()).unwrap();
        assert_eq!(result.coordinates.dim(), (6, 2));
        assert_eq!(result.n_genes_used, 40);

        let pc1 = result.component(0);
        let first_sign = pc1[0].signum();
        assert!(pc1[..3].iter().all(|v| v.signum() == first_sign));
        assert!(pc1[3..].iter().all(|v| v.signum() == -first_sign));

        assert!(result.variance_percent.iter().all(|&p| p >= 0.0));
        assert!(result.variance_percent.iter().sum::<f64>() <= 100.0 + 1e-9);
        assert!(result.variance_percent[0] > 90.0);
        assert_eq!(result.axis_label(0).split(':').next(), Some("PC1"));
    }

    #[test]
    fn test_sign_is_canonical() {
        let data = two_groups();
        let result = pca(data.view(), &ids(6), &PcaConfig::default()).unwrap();
        for c in 0..result.n_components() {
            let comp = result.component(c);
            let largest = comp.iter().copied().fold(0.0f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
            assert!(largest > 0.0);
        }

        let negated = data.mapv(|v| -v);
        let flipped = pca(negated.view(), &ids(6), &PcaConfig::default()).unwrap();
        for (a, b) in result.component(0).iter().zip(flipped.component(0)) {
            assert_relative_eq!(*a, b, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_top_genes_and_component_cap() {
        let data = two_groups();
        let config = PcaConfig {
            n_top: 10,
            n_components: 10,
        };
        let result = pca(data.view(), &ids(6), &config).unwrap();
        assert_eq!(result.n_genes_used, 10);
        assert_eq!(result.n_components(), 6);
        assert_relative_eq!(result.variance_percent.iter().sum::<f64>(), 100.0, epsilon = 1e-6);
    }

    #[test]
    fn test_pca_needs_two_samples() {
        let data = Array2::from_elem((5, 1), 1.0);
        assert!(matches!(
            pca(data.view(), &ids(1), &PcaConfig::default()),
            Err(EdaError::InvalidInput { .. })
        ));
    }
}
