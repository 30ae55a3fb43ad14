//! Gene-wise dispersion estimation using the Cox-Reid adjusted profile likelihood

use ndarray::Array2;
use rayon::prelude::*;
use statrs::function::gamma::ln_gamma;

use super::DispersionParams;
use crate::data::CountMatrix;
use crate::glm::{fit_nb_glm_mu, linear_model_mu, weighted_gram, ModelMatrix};
use crate::normalization::SizeFactors;

/// Estimate one dispersion per gene; all-zero genes get NaN
///
/// Genes are independent, so they are fitted in parallel and collected in
/// row order.
pub fn estimate_gene_dispersions(
    counts: &CountMatrix,
    size_factors: &SizeFactors,
    model: &ModelMatrix,
    params: &DispersionParams,
) -> Vec<f64> {
    let raw = counts.counts();
    let sf = &size_factors.values;
    let xim = sf.iter().map(|&s| 1.0 / s.max(1e-10)).sum::<f64>() / sf.len() as f64;
    let use_linear_mu = model.is_group_design();

    if model.matrix.nrows() == model.matrix.ncols() {
        log::warn!(
            "Design has as many coefficients as samples ({}); dispersion estimates will be unreliable",
            model.matrix.ncols()
        );
    }

    (0..counts.n_genes())
        .into_par_iter()
        .map(|i| {
            let row: Vec<f64> = raw.row(i).to_vec();
            estimate_dispersion_gene(&row, sf, &model.matrix, xim, use_linear_mu, params)
        })
        .collect()
}

/// Dispersion of a single gene
///
/// Starts from the smaller of the rough (residual-based) and moments
/// estimates, fixes the fitted means, then searches log-dispersion on a
/// coarse grid refined once around the best point. The starting value is
/// kept when the search does not improve the log posterior.
pub fn estimate_dispersion_gene(
    counts: &[f64],
    size_factors: &[f64],
    design: &Array2<f64>,
    xim: f64,
    use_linear_mu: bool,
    params: &DispersionParams,
) -> f64 {
    if counts.iter().all(|&c| c == 0.0) {
        return f64::NAN;
    }
    let n = counts.len();
    let max_disp = (n as f64).max(10.0);

    let normalized: Vec<f64> = counts
        .iter()
        .zip(size_factors)
        .map(|(&c, &s)| if s > 0.0 { c / s } else { 0.0 })
        .collect();

    let rough = rough_disp_estimate(&normalized, design);
    let moments = moments_disp_estimate(&normalized, xim);
    let alpha_init = rough.min(moments).clamp(params.min_disp, max_disp);

    let mu = if use_linear_mu {
        linear_model_mu(counts, size_factors, design)
    } else {
        fit_nb_glm_mu(counts, size_factors, design, alpha_init)
    };

    let lp = |log_alpha: f64| log_posterior(counts, design, &mu, log_alpha);
    let (best_log_alpha, best_lp) = grid_search(&lp, params.min_disp.ln(), max_disp.ln(), params.grid_size);

    let init_lp = lp(alpha_init.ln());
    let alpha = if best_lp < init_lp + init_lp.abs() / 1e6 {
        alpha_init
    } else {
        best_log_alpha.exp()
    };
    alpha.clamp(params.min_disp, max_disp)
}

/// Coarse grid over `[lo, hi]`, then a fine grid one step either side of the best point
fn grid_search(f: &dyn Fn(f64) -> f64, lo: f64, hi: f64, size: usize) -> (f64, f64) {
    let size = size.max(3);
    let best_on = |lo: f64, hi: f64| -> (f64, f64) {
        let delta = (hi - lo) / (size - 1) as f64;
        (0..size)
            .map(|i| {
                let x = lo + i as f64 * delta;
                (x, f(x))
            })
            .filter(|(_, v)| v.is_finite())
            .fold((lo, f64::NEG_INFINITY), |best, cand| if cand.1 > best.1 { cand } else { best })
    };

    let delta = (hi - lo) / (size - 1) as f64;
    let (coarse, _) = best_on(lo, hi);
    best_on(coarse - delta, coarse + delta)
}

/// Residual-based estimate `sum(((y - mu)^2 - mu) / mu^2) / (n - p)` with `mu >= 1`
fn rough_disp_estimate(normalized: &[f64], design: &Array2<f64>) -> f64 {
    let n = normalized.len();
    let p = design.ncols();
    if n <= p {
        return f64::INFINITY;
    }
    let ones = vec![1.0; n];
    let mu = linear_model_mu(normalized, &ones, design);
    let sum: f64 = normalized
        .iter()
        .zip(&mu)
        .map(|(&y, &m)| {
            let m = m.max(1.0);
            ((y - m).powi(2) - m) / (m * m)
        })
        .sum();
    (sum / (n - p) as f64).max(0.0)
}

/// Moments estimate `(var - xim * mean) / mean^2`
fn moments_disp_estimate(normalized: &[f64], xim: f64) -> f64 {
    let n = normalized.len() as f64;
    let mean = normalized.iter().sum::<f64>() / n;
    if mean <= 1e-10 || n < 2.0 {
        return f64::INFINITY;
    }
    let var = normalized.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (var - xim * mean) / (mean * mean)
}

/// Profile log likelihood of `log(alpha)` with the Cox-Reid term `-0.5 log|X'WX|`
pub(crate) fn log_posterior(counts: &[f64], design: &Array2<f64>, mu: &[f64], log_alpha: f64) -> f64 {
    let alpha = log_alpha.exp();
    let size = 1.0 / alpha;

    let mut ll = 0.0;
    let mut weights = Vec::with_capacity(counts.len());
    for (&y, &m) in counts.iter().zip(mu) {
        let m = m.max(1e-10);
        ll += ln_gamma(y + size) - ln_gamma(size) - y * (m + size).ln() - size * (1.0 + m * alpha).ln();
        weights.push(1.0 / (1.0 / m + alpha));
    }

    let det = weighted_gram(design, &weights).determinant();
    let cox_reid = if det > 1e-10 { -0.5 * det.ln() } else { 0.0 };
    ll + cox_reid
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_group() -> Array2<f64> {
        array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]]
    }

    #[test]
    fn test_all_zero_gene() {
        let d = estimate_dispersion_gene(&[0.0; 6], &[1.0; 6], &two_group(), 1.0, true, &DispersionParams::default());
        assert!(d.is_nan());
    }

    #[test]
    fn test_noisier_gene_has_larger_dispersion() {
        let params = DispersionParams::default();
        let design = two_group();
        let calm = estimate_dispersion_gene(&[100.0, 104.0, 98.0, 200.0, 205.0, 195.0], &[1.0; 6], &design, 1.0, true, &params);
        let noisy = estimate_dispersion_gene(&[30.0, 180.0, 90.0, 60.0, 400.0, 150.0], &[1.0; 6], &design, 1.0, true, &params);
        assert!(calm > 0.0 && noisy > 0.0);
        assert!(noisy > calm * 10.0, "noisy={} calm={}", noisy, calm);
    }

    #[test]
    fn test_log_posterior_finite() {
        let design = two_group();
        let counts = [5.0, 7.0, 6.0, 20.0, 25.0, 22.0];
        let mu = linear_model_mu(&counts, &[1.0; 6], &design);
        assert!(log_posterior(&counts, &design, &mu, (0.1f64).ln()).is_finite());
    }

    #[test]
    fn test_grid_search_finds_peak() {
        let f = |x: f64| -(x - 1.3).powi(2);
        let (x, _) = grid_search(&f, -5.0, 5.0, 20);
        assert!((x - 1.3).abs() < 0.05);
    }
}
