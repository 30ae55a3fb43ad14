//! Regularized log transformation (rlog)
//!
//! Each gene gets a negative binomial GLM with an intercept plus one
//! coefficient per sample. The sample coefficients carry a ridge penalty
//! whose width comes from the spread of observed log fold changes, so
//! low-count genes shrink toward their mean while well-measured genes keep
//! their sample-to-sample differences. Output is `X * beta` on the log2 scale.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use crate::glm::{nb_log_likelihood, nb_weight, to_dmatrix, MAX_BETA, MIN_MU};
use crate::stats::match_weighted_upper_quantile_for_variance;

/// Relative deviance change at which IRLS stops
const RLOG_TOL: f64 = 1e-4;
const RLOG_MAX_ITER: usize = 100;

/// Fraction of genes with a zero above which the data count as sparse
const SPARSE_THRESHOLD: f64 = 0.9;

/// Output of [`rlog`]
#[derive(Debug, Clone)]
pub struct RlogFit {
    /// genes x samples, log2 scale
    pub data: Array2<f64>,
    /// Per-gene intercept on the log2 scale (`-inf` for all-zero genes)
    pub intercepts: Vec<f64>,
    pub beta_prior_var: f64,
}

fn is_sparse(counts: ArrayView2<'_, f64>) -> bool {
    if counts.nrows() == 0 {
        return false;
    }
    let with_zero = counts.rows().into_iter().filter(|r| r.iter().any(|&x| x == 0.0)).count();
    with_zero as f64 / counts.nrows() as f64 > SPARSE_THRESHOLD
}

/// Regularized log of raw `counts` given size factors and per-gene fitted
/// (trended) dispersions
pub fn rlog(counts: ArrayView2<'_, f64>, size_factors: &[f64], dispersions: &[f64]) -> RlogFit {
    let (n_genes, n_samples) = counts.dim();
    if is_sparse(counts) {
        log::info!("Most genes contain zero counts; rlog values of sparse genes shrink strongly");
    }

    let n_coefs = n_samples + 1;
    let mut design = Array2::<f64>::zeros((n_samples, n_coefs));
    for s in 0..n_samples {
        design[[s, 0]] = 1.0;
        design[[s, s + 1]] = 1.0;
    }

    let normalized = Array2::from_shape_fn((n_genes, n_samples), |(i, j)| counts[[i, j]] / size_factors[j]);
    let base_means: Vec<f64> = normalized.rows().into_iter().map(|r| r.mean().unwrap_or(0.0)).collect();
    let nonzero: Vec<usize> = (0..n_genes)
        .filter(|&i| counts.row(i).iter().any(|&x| x > 0.0))
        .collect();

    let mut data = Array2::zeros((n_genes, n_samples));
    let mut intercepts = vec![f64::NEG_INFINITY; n_genes];
    if nonzero.is_empty() {
        return RlogFit {
            data,
            intercepts,
            beta_prior_var: 1.0,
        };
    }

    // prior width from log fold changes of each sample against the gene mean
    let mut lfcs = Vec::with_capacity(nonzero.len() * n_samples);
    let mut weights = Vec::with_capacity(nonzero.len() * n_samples);
    for &i in &nonzero {
        let w = 1.0 / (1.0 / base_means[i] + dispersions[i]);
        let center = (base_means[i] + 0.5).log2();
        for j in 0..n_samples {
            lfcs.push((normalized[[i, j]] + 0.5).log2() - center);
            weights.push(w);
        }
    }
    let beta_prior_var = match_weighted_upper_quantile_for_variance(&lfcs, &weights, 0.05);
    log::debug!("rlog beta prior variance {:.6}", beta_prior_var);

    // ridge on the natural-log scale; the intercept is left nearly free
    let ln2_sq = std::f64::consts::LN_2.powi(2);
    let mut lambda = vec![1.0 / beta_prior_var / ln2_sq; n_coefs];
    lambda[0] = 1e-6 / ln2_sq;

    let betas: Vec<Vec<f64>> = nonzero
        .par_iter()
        .map(|&i| {
            let y: Vec<f64> = counts.row(i).to_vec();
            fit_rlog_gene(&y, base_means[i], size_factors, dispersions[i], &design, &lambda)
        })
        .collect();

    for (&i, beta) in nonzero.iter().zip(&betas) {
        let log2_beta: Vec<f64> = beta.iter().map(|b| b * std::f64::consts::LOG2_E).collect();
        intercepts[i] = log2_beta[0];
        for s in 0..n_samples {
            data[[i, s]] = log2_beta[0] + log2_beta[s + 1];
        }
    }

    RlogFit {
        data,
        intercepts,
        beta_prior_var,
    }
}

/// Ridge-penalised IRLS for one gene, solved as an augmented least-squares
/// problem `[sqrt(W) X; sqrt(Lambda)] beta = [sqrt(W) z; 0]` by QR
///
/// Falls back to coordinate-wise Newton steps when the fit diverges.
fn fit_rlog_gene(
    counts: &[f64],
    base_mean: f64,
    size_factors: &[f64],
    alpha: f64,
    design: &Array2<f64>,
    lambda: &[f64],
) -> Vec<f64> {
    let (n, p) = design.dim();
    let x = to_dmatrix(design);
    let mut start = vec![0.0; p];
    start[0] = base_mean.max(0.1).ln();
    let mut beta = DVector::from_vec(start.clone());

    let mu_of = |beta: &DVector<f64>| -> Vec<f64> {
        let eta = &x * beta;
        (0..n).map(|s| (size_factors[s] * eta[s].exp()).max(MIN_MU)).collect()
    };

    let mut dev_old = 0.0;
    for iter in 0..RLOG_MAX_ITER {
        let mu = mu_of(&beta);
        let mut a = DMatrix::zeros(n + p, p);
        let mut b = DVector::zeros(n + p);
        for s in 0..n {
            let sw = nb_weight(mu[s], alpha).sqrt();
            let z = (mu[s] / size_factors[s]).ln() + (counts[s] - mu[s]) / mu[s];
            for k in 0..p {
                a[(s, k)] = sw * x[(s, k)];
            }
            b[s] = sw * z;
        }
        for k in 0..p {
            a[(n + k, k)] = lambda[k].sqrt();
        }

        let qr = a.qr();
        let qtb = qr.q().transpose() * b;
        let next = match qr.r().solve_upper_triangular(&qtb) {
            Some(next) => next,
            None => break,
        };
        if next.iter().any(|v| !v.is_finite() || v.abs() > MAX_BETA) {
            break;
        }
        beta = next;

        let dev: f64 = mu_of(&beta)
            .iter()
            .zip(counts)
            .map(|(&m, &y)| -2.0 * nb_log_likelihood(y, m, alpha))
            .sum();
        if iter > 0 {
            let change = (dev - dev_old).abs() / (dev.abs() + 0.1);
            if change.is_nan() || change < RLOG_TOL {
                break;
            }
        }
        dev_old = dev;
    }

    let stable = beta.iter().all(|v| v.is_finite() && v.abs() <= MAX_BETA);
    if stable {
        beta.iter().copied().collect()
    } else {
        newton_fallback(counts, size_factors, alpha, design, lambda, start)
    }
}

/// Coordinate-wise Newton ascent on the penalised log likelihood with step halving
fn newton_fallback(
    counts: &[f64],
    size_factors: &[f64],
    alpha: f64,
    design: &Array2<f64>,
    lambda: &[f64],
    mut beta: Vec<f64>,
) -> Vec<f64> {
    let (n, p) = design.dim();
    let mu_of = |beta: &[f64]| -> Vec<f64> {
        (0..n)
            .map(|s| {
                let eta: f64 = (0..p).map(|k| design[[s, k]] * beta[k]).sum();
                (size_factors[s] * eta.exp()).max(MIN_MU)
            })
            .collect()
    };
    let objective = |beta: &[f64]| -> f64 {
        let ll: f64 = mu_of(beta)
            .iter()
            .zip(counts)
            .map(|(&m, &y)| nb_log_likelihood(y, m, alpha))
            .sum();
        ll - 0.5 * beta.iter().zip(lambda).map(|(b, l)| l * b * b).sum::<f64>()
    };

    let mut current = objective(&beta);
    for _ in 0..1000 {
        let start = current;
        for j in 0..p {
            let mu = mu_of(&beta);
            let mut grad = -lambda[j] * beta[j];
            let mut hess = -lambda[j];
            for s in 0..n {
                grad += (counts[s] - mu[s]) / (1.0 + alpha * mu[s]) * design[[s, j]];
                hess -= nb_weight(mu[s], alpha) * design[[s, j]].powi(2);
            }
            if hess.abs() < 1e-20 {
                continue;
            }

            let old = beta[j];
            let delta = -grad / hess;
            let mut step = 1.0;
            while step > 1e-10 {
                beta[j] = (old + step * delta).clamp(-MAX_BETA, MAX_BETA);
                let value = objective(&beta);
                if value >= current {
                    current = value;
                    break;
                }
                step /= 2.0;
            }
            if step <= 1e-10 {
                beta[j] = old;
            }
        }
        if (current - start).abs() < 1e-8 * (current.abs() + 1e-8) {
            break;
        }
    }
    beta
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_rlog_shape_and_order() {
        let counts = array![
            [5.0, 8.0, 6.0, 7.0],
            [500.0, 520.0, 480.0, 510.0],
            [50.0, 40.0, 60.0, 55.0],
            [0.0, 0.0, 0.0, 0.0]
        ];
        let fit = rlog(counts.view(), &[1.0; 4], &[0.1, 0.02, 0.05, 0.1]);

        assert_eq!(fit.data.dim(), (4, 4));
        assert!(fit.data.iter().all(|v| v.is_finite()));
        for s in 0..4 {
            assert!(fit.data[[1, s]] > fit.data[[2, s]]);
            assert!(fit.data[[2, s]] > fit.data[[0, s]]);
            assert_eq!(fit.data[[3, s]], 0.0);
        }
        assert_eq!(fit.intercepts[3], f64::NEG_INFINITY);
        assert!((fit.intercepts[1] - 505.0f64.log2()).abs() < 0.2);
    }

    #[test]
    fn test_rlog_shrinks_low_counts() {
        // identical fold pattern at low and high depth
        let counts = array![[2.0, 6.0, 2.0, 6.0], [200.0, 600.0, 200.0, 600.0], [30.0, 35.0, 25.0, 40.0]];
        let fit = rlog(counts.view(), &[1.0; 4], &[0.3, 0.01, 0.05]);
        let spread = |i: usize| fit.data[[i, 1]] - fit.data[[i, 0]];
        assert!(spread(0) < spread(1));
        assert!(spread(0) > 0.0);
    }

    #[test]
    fn test_sparse_detection() {
        assert!(is_sparse(array![[0.0, 1.0], [0.0, 2.0]].view()));
        assert!(!is_sparse(array![[1.0, 1.0], [0.0, 2.0]].view()));
    }
}
