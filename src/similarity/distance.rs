//! Pairwise sample distances

use ndarray::{Array2, ArrayView2};

use crate::error::{EdaError, Result};

/// Symmetric samples x samples distance matrix with a zero diagonal
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    labels: Vec<String>,
    values: Array2<f64>,
}

impl DistanceMatrix {
    /// Euclidean distances between the columns of a genes x samples matrix
    pub fn euclidean(data: ArrayView2<'_, f64>, labels: &[String]) -> Result<Self> {
        let n = data.ncols();
        if labels.len() != n {
            return Err(EdaError::DimensionMismatch {
                expected: format!("{} sample labels", n),
                got: format!("{} labels", labels.len()),
            });
        }
        if n == 0 {
            return Err(EdaError::EmptyData {
                reason: "no samples to compare".to_string(),
            });
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(EdaError::InvalidInput {
                reason: "distance input contains non-finite values".to_string(),
            });
        }

        let mut values = Array2::zeros((n, n));
        for i in 0..n {
            for j in (i + 1)..n {
                let d = data
                    .column(i)
                    .iter()
                    .zip(data.column(j))
                    .map(|(a, b)| (a - b).powi(2))
                    .sum::<f64>()
                    .sqrt();
                values[[i, j]] = d;
                values[[j, i]] = d;
            }
        }

        Ok(Self {
            labels: labels.to_vec(),
            values,
        })
    }

    pub fn n(&self) -> usize {
        self.labels.len()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[[i, j]]
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(0.0, f64::max)
    }

    /// Rows and columns permuted into `order`
    pub fn reordered(&self, order: &[usize]) -> Self {
        let values = Array2::from_shape_fn((order.len(), order.len()), |(i, j)| self.values[[order[i], order[j]]]);
        Self {
            labels: order.iter().map(|&i| self.labels[i].clone()).collect(),
            values,
        }
    }
}
