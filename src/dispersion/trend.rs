//! Mean-dispersion trend fitting

use serde::{Deserialize, Serialize};

use crate::error::{EdaError, Result};

/// Fitted relation between mean expression and dispersion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DispersionTrend {
    /// `asympt_disp + extra_pois / mean`
    Parametric { asympt_disp: f64, extra_pois: f64 },
    /// A single trimmed-mean dispersion for every gene
    Mean { value: f64 },
}

impl DispersionTrend {
    /// Trended dispersion at a given mean of normalized counts
    pub fn eval(&self, mean: f64) -> f64 {
        match *self {
            DispersionTrend::Parametric { asympt_disp, extra_pois } => {
                if mean > 0.0 {
                    asympt_disp + extra_pois / mean
                } else {
                    asympt_disp
                }
            }
            DispersionTrend::Mean { value } => value,
        }
    }
}

/// Fit the parametric trend, falling back to the trimmed mean dispersion
///
/// Genes with dispersion at or below `100 * min_disp` are excluded from
/// either fit.
pub fn fit_dispersion_trend(means: &[f64], dispersions: &[f64], min_disp: f64) -> Result<DispersionTrend> {
    let points: Vec<(f64, f64)> = means
        .iter()
        .zip(dispersions)
        .filter(|(&m, &d)| m > 0.0 && d.is_finite() && d > 100.0 * min_disp)
        .map(|(&m, &d)| (m, d))
        .collect();

    match fit_parametric(&points) {
        Ok((asympt_disp, extra_pois)) => {
            log::info!(
                "Dispersion trend: {:.4} + {:.4} / mean ({} genes)",
                asympt_disp,
                extra_pois,
                points.len()
            );
            Ok(DispersionTrend::Parametric { asympt_disp, extra_pois })
        }
        Err(e) => {
            log::warn!("{}; using the mean dispersion instead", e);
            let value = trimmed_mean(points.iter().map(|p| p.1).collect(), 0.001).ok_or_else(|| {
                EdaError::TrendFittingFailed {
                    reason: "no gene has a usable dispersion estimate".to_string(),
                }
            })?;
            log::info!("Dispersion trend: constant {:.4}", value);
            Ok(DispersionTrend::Mean { value })
        }
    }
}

fn trimmed_mean(mut values: Vec<f64>, trim: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let cut = (values.len() as f64 * trim).floor() as usize;
    let kept = &values[cut..values.len() - cut];
    Some(kept.iter().sum::<f64>() / kept.len() as f64)
}

/// Gamma-family fit of `disp ~ 1 + 1/mean` with residual filtering
///
/// Each round drops genes whose dispersion is outside `(1e-4, 15)` times
/// the current fit, then refits. Both coefficients must stay positive.
fn fit_parametric(points: &[(f64, f64)]) -> Result<(f64, f64)> {
    const ROUNDS: usize = 11;
    let mut coefs = (0.1_f64, 1.0_f64);

    for round in 0..ROUNDS {
        let previous = coefs;
        let good: Vec<(f64, f64)> = points
            .iter()
            .filter(|&&(m, d)| {
                let fitted = coefs.0 + coefs.1 / m;
                fitted > 0.0 && d / fitted > 1e-4 && d / fitted < 15.0
            })
            .copied()
            .collect();

        if good.len() < 3 {
            return Err(EdaError::TrendFittingFailed {
                reason: format!("only {} genes left for the parametric dispersion fit", good.len()),
            });
        }

        let (next, converged) = gamma_identity_glm(&good, coefs);
        coefs = next;
        log::debug!(
            "Parametric trend round {}: {} genes, a0={:.6}, a1={:.6}",
            round + 1,
            good.len(),
            coefs.0,
            coefs.1
        );

        if coefs.0 <= 0.0 || coefs.1 <= 0.0 {
            return Err(EdaError::TrendFittingFailed {
                reason: format!(
                    "parametric dispersion coefficients not positive (a0={:.4}, a1={:.4})",
                    coefs.0, coefs.1
                ),
            });
        }

        let change = (coefs.0 / previous.0).ln().powi(2) + (coefs.1 / previous.1).ln().powi(2);
        if change < 1e-6 && converged {
            return Ok(coefs);
        }
    }

    Err(EdaError::TrendFittingFailed {
        reason: "parametric dispersion fit did not converge".to_string(),
    })
}

/// Identity-link gamma GLM `y ~ a0 + a1 * (1/x)` by IRLS from `start`
fn gamma_identity_glm(data: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let deviance = |a0: f64, a1: f64| -> f64 {
        data.iter()
            .map(|&(m, d)| {
                let mu = (a0 + a1 / m).max(1e-8);
                2.0 * (-(d / mu).ln() + (d - mu) / mu)
            })
            .sum()
    };

    let (mut a0, mut a1) = start;
    let mut dev_old = deviance(a0, a1);

    for _ in 0..25 {
        let (mut sw, mut swx, mut swz, mut swxx, mut swxz) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(m, d) in data {
            let x = 1.0 / m;
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            sw += w;
            swx += w * x;
            swz += w * d;
            swxx += w * x * x;
            swxz += w * x * d;
        }
        let det = sw * swxx - swx * swx;
        if det.abs() < 1e-10 {
            return ((a0, a1), false);
        }
        a0 = (swxx * swz - swx * swxz) / det;
        a1 = (sw * swxz - swx * swz) / det;

        let dev = deviance(a0, a1);
        if (dev_old - dev).abs() / (0.1 + dev.abs()) < 1e-8 {
            return ((a0, a1), true);
        }
        dev_old = dev;
    }
    ((a0, a1), false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parametric_recovers_curve() {
        let means: Vec<f64> = (1..=200).map(|i| i as f64 * 5.0).collect();
        // multiplicative scatter around 0.05 + 2 / mean
        let disps: Vec<f64> = means
            .iter()
            .enumerate()
            .map(|(i, &m)| (0.05 + 2.0 / m) * if i % 2 == 0 { 1.2 } else { 1.0 / 1.2 })
            .collect();

        match fit_dispersion_trend(&means, &disps, 1e-8).unwrap() {
            DispersionTrend::Parametric { asympt_disp, extra_pois } => {
                assert_relative_eq!(asympt_disp, 0.05, max_relative = 0.1);
                assert_relative_eq!(extra_pois, 2.0, max_relative = 0.1);
            }
            other => panic!("expected parametric trend, got {:?}", other),
        }
    }

    #[test]
    fn test_falls_back_to_mean() {
        // dispersion rising with mean gives a negative extra-Poisson term
        let means = [10.0, 20.0, 50.0, 100.0, 500.0];
        let disps = [0.01, 0.02, 0.05, 0.1, 0.5];
        let trend = fit_dispersion_trend(&means, &disps, 1e-8).unwrap();
        match trend {
            DispersionTrend::Mean { value } => assert_relative_eq!(value, 0.136, epsilon = 1e-12),
            other => panic!("expected mean trend, got {:?}", other),
        }
        assert_eq!(trend.eval(1.0), trend.eval(1000.0));
    }

    #[test]
    fn test_no_usable_dispersions() {
        let result = fit_dispersion_trend(&[1.0, 2.0], &[f64::NAN, 1e-9], 1e-8);
        assert!(matches!(result, Err(EdaError::TrendFittingFailed { .. })));
    }

    #[test]
    fn test_eval() {
        let trend = DispersionTrend::Parametric {
            asympt_disp: 0.1,
            extra_pois: 2.0,
        };
        assert_relative_eq!(trend.eval(4.0), 0.6, epsilon = 1e-12);
        assert_relative_eq!(trend.eval(0.0), 0.1, epsilon = 1e-12);
    }
}
