//! Local linear (loess-style) trend across ordinal stages

use serde::Serialize;

use super::GeneReport;

/// Default neighbourhood fraction, as in R's `loess`
pub const DEFAULT_SPAN: f64 = 0.75;

fn tricube(u: f64) -> f64 {
    if u >= 1.0 {
        0.0
    } else {
        (1.0 - u.powi(3)).powi(3)
    }
}

/// Local linear regression estimate at `at` with tricube weights
///
/// The bandwidth reaches the `ceil(span * n)`-th nearest point (halfway
/// to the next one when there is a next one), so that point keeps a
/// small positive weight. With no spread in the weighted `x` the
/// weighted mean is returned.
pub fn local_linear(xs: &[f64], ys: &[f64], at: f64, span: f64) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return None;
    }

    let mut distances: Vec<f64> = xs[..n].iter().map(|x| (x - at).abs()).collect();
    distances.sort_by(f64::total_cmp);
    let q = ((span * n as f64).ceil() as usize).clamp(1, n);
    let h = if q < n {
        (distances[q - 1] + distances[q]) / 2.0
    } else {
        distances[n - 1] * span.max(1.0)
    };

    let weights: Vec<f64> = xs[..n]
        .iter()
        .map(|x| if h > 0.0 { tricube((x - at).abs() / h) } else { 1.0 })
        .collect();
    let sw: f64 = weights.iter().sum();
    if sw <= 0.0 {
        return Some(ys[..n].iter().sum::<f64>() / n as f64);
    }

    let xm = weights.iter().zip(xs).map(|(w, x)| w * x).sum::<f64>() / sw;
    let ym = weights.iter().zip(ys).map(|(w, y)| w * y).sum::<f64>() / sw;
    let sxx: f64 = weights.iter().zip(xs).map(|(w, x)| w * (x - xm).powi(2)).sum();
    if sxx < 1e-12 {
        return Some(ym);
    }
    let sxy: f64 = weights
        .iter()
        .zip(xs.iter().zip(ys))
        .map(|(w, (x, y))| w * (x - xm) * (y - ym))
        .sum();
    Some(ym + sxy / sxx * (at - xm))
}

/// Smoothed curve of one genotype across the stage axis
#[derive(Debug, Clone, Serialize)]
pub struct TrendCurve {
    pub genotype: String,
    pub points: Vec<(f64, f64)>,
}

impl GeneReport {
    /// One smoothed curve per genotype over stage positions `1..=n_stages`
    ///
    /// Genotypes observed at fewer than two stages get no curve.
    pub fn trend_curves(&self, gene_id: &str, n_points: usize, span: f64) -> Vec<TrendCurve> {
        let n_points = n_points.max(2);
        let mut curves = Vec::new();
        for genotype in &self.genotype_levels {
            let (xs, ys): (Vec<f64>, Vec<f64>) = self
                .records_for(gene_id)
                .filter(|r| &r.genotype == genotype)
                .filter_map(|r| self.stage_position(&r.stage).map(|x| (x, r.value)))
                .unzip();

            let lo = xs.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if xs.is_empty() || hi <= lo {
                log::debug!("No trend for genotype '{}' of {}: one stage only", genotype, gene_id);
                continue;
            }

            let points = (0..n_points)
                .filter_map(|k| {
                    let x = lo + (hi - lo) * k as f64 / (n_points - 1) as f64;
                    local_linear(&xs, &ys, x, span).map(|y| (x, y))
                })
                .collect();
            curves.push(TrendCurve {
                genotype: genotype.clone(),
                points,
            });
        }
        curves
    }
}
