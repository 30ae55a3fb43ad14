//! Small statistical helpers shared by normalization, transforms and PCA

use ndarray::{ArrayView2, Axis};

/// 97.5th percentile of the standard normal
const QNORM_0975: f64 = 1.959963984540054;

/// Median of a slice (NaN-free input); `None` when empty
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Geometric mean of positive values
pub fn geometric_mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    (values.iter().map(|v| v.ln()).sum::<f64>() / values.len() as f64).exp()
}

/// Unbiased (n - 1) variance of every row
pub fn row_variances(matrix: ArrayView2<'_, f64>) -> Vec<f64> {
    matrix
        .axis_iter(Axis(0))
        .map(|row| if row.len() > 1 { row.var(1.0) } else { 0.0 })
        .collect()
}

/// Mean of every row
pub fn row_means(matrix: ArrayView2<'_, f64>) -> Vec<f64> {
    matrix
        .axis_iter(Axis(0))
        .map(|row| row.mean().unwrap_or(0.0))
        .collect()
}

/// Indices of the `n` largest values, largest first; ties keep the lower index first
pub fn top_n_indices(values: &[f64], n: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]).then(a.cmp(&b)));
    order.truncate(n);
    order
}

/// Weighted quantile with normalized weights (Hmisc `wtd.quantile`,
/// `type = "quantile"`, `normwt = TRUE`)
///
/// Duplicate values pool their weights; the quantile interpolates between
/// the right-continuous steps of the cumulative weight function.
pub fn weighted_quantile(x: &[f64], weights: &[f64], prob: f64) -> f64 {
    let mut pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(weights)
        .filter(|(xi, wi)| **wi > 0.0 && !xi.is_nan() && !wi.is_nan())
        .map(|(&xi, &wi)| (xi, wi))
        .collect();
    if pairs.is_empty() {
        return 0.0;
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let scale = pairs.len() as f64 / pairs.iter().map(|p| p.1).sum::<f64>();
    let mut values: Vec<f64> = Vec::new();
    let mut cumulative: Vec<f64> = Vec::new();
    let mut total = 0.0;
    for (xi, wi) in pairs {
        total += wi * scale;
        if values.last() == Some(&xi) {
            if let Some(last) = cumulative.last_mut() {
                *last = total;
            }
        } else {
            values.push(xi);
            cumulative.push(total);
        }
    }

    let order = 1.0 + (total - 1.0) * prob;
    let low = order.floor().max(1.0);
    let high = (low + 1.0).min(total);
    let frac = order - order.floor();

    let step = |at: f64| -> f64 {
        let idx = cumulative.partition_point(|&c| c < at).min(values.len() - 1);
        values[idx]
    };
    (1.0 - frac) * step(low) + frac * step(high)
}

/// Variance of a zero-centred normal whose upper `upper_quantile` tail
/// matches the weighted quantile of `|x|`
pub fn match_weighted_upper_quantile_for_variance(x: &[f64], weights: &[f64], upper_quantile: f64) -> f64 {
    let abs_x: Vec<f64> = x.iter().map(|v| v.abs()).collect();
    let q = weighted_quantile(&abs_x, weights, 1.0 - upper_quantile);
    let sd = q / QNORM_0975;
    let var = sd * sd;
    log::debug!("Upper quantile {:.6} gives prior variance {:.6}", q, var);
    if var <= 0.0 || !var.is_finite() {
        1e-6
    } else {
        var
    }
}
