//! Low-count gene filter

use serde::{Deserialize, Serialize};

use crate::data::CountMatrix;
use crate::error::{EdaError, Result};

/// Keep a gene when at least `min_samples` samples have a count strictly
/// greater than `min_count`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LowCountFilter {
    pub min_count: f64,
    pub min_samples: usize,
}

impl Default for LowCountFilter {
    fn default() -> Self {
        Self {
            min_count: 1.0,
            min_samples: 2,
        }
    }
}

impl LowCountFilter {
    /// Whether a single gene row passes
    pub fn keeps(&self, row: impl IntoIterator<Item = f64>) -> bool {
        row.into_iter().filter(|&c| c > self.min_count).count() >= self.min_samples
    }

    /// Indices of the rows that pass, in input order
    pub fn passing_rows(&self, counts: &CountMatrix) -> Vec<usize> {
        (0..counts.n_genes())
            .filter(|&i| self.keeps(counts.gene_counts(i).iter().copied()))
            .collect()
    }
}

/// Drop genes that do not pass `filter`; row order is preserved
pub fn filter_low_counts(counts: &CountMatrix, filter: &LowCountFilter) -> Result<CountMatrix> {
    let keep = filter.passing_rows(counts);
    if keep.is_empty() {
        return Err(EdaError::EmptyAfterFiltering {
            min_count: filter.min_count,
            min_samples: filter.min_samples,
            n_genes: counts.n_genes(),
        });
    }

    log::info!(
        "Low-count filter (count > {} in >= {} samples): kept {} of {} genes",
        filter.min_count,
        filter.min_samples,
        keep.len(),
        counts.n_genes()
    );
    counts.subset_genes(&keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn matrix() -> CountMatrix {
        CountMatrix::new(
            array![
                [0.0, 0.0, 0.0, 0.0],
                [2.0, 0.0, 0.0, 1.0],
                [2.0, 3.0, 0.0, 0.0],
                [5.0, 6.0, 7.0, 8.0],
                [1.0, 1.0, 1.0, 1.0],
                [0.0, 9.0, 9.0, 9.0]
            ],
            (1..=6).map(|i| format!("g{}", i)).collect(),
            (1..=4).map(|i| format!("s{}", i)).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_default_filter() {
        let filtered = filter_low_counts(&matrix(), &LowCountFilter::default()).unwrap();
        // count == min_count does not qualify
        assert_eq!(filtered.gene_ids(), &["g3", "g4", "g6"]);
        assert_eq!(filtered.sample_ids(), matrix().sample_ids());
    }

    #[test]
    fn test_idempotent() {
        let filter = LowCountFilter::default();
        let once = filter_low_counts(&matrix(), &filter).unwrap();
        let twice = filter_low_counts(&once, &filter).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_monotone_in_both_parameters() {
        let counts = matrix();
        let kept = |min_count: f64, min_samples: usize| {
            LowCountFilter { min_count, min_samples }.passing_rows(&counts)
        };

        for &(t, k) in &[(0.0, 1), (1.0, 2), (2.0, 2), (0.0, 3)] {
            let base = kept(t, k);
            for stricter in [kept(t + 1.0, k), kept(t, k + 1)] {
                assert!(stricter.iter().all(|g| base.contains(g)));
            }
        }
    }

    #[test]
    fn test_empty_after_filtering() {
        let filter = LowCountFilter {
            min_count: 100.0,
            min_samples: 1,
        };
        match filter_low_counts(&matrix(), &filter) {
            Err(EdaError::EmptyAfterFiltering { n_genes, min_samples, .. }) => {
                assert_eq!(n_genes, 6);
                assert_eq!(min_samples, 1);
            }
            other => panic!("expected EmptyAfterFiltering, got {:?}", other),
        }
    }
}
