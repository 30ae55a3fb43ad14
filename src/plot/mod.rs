//! SVG figures: sample distance heatmap, PCA scatter and per-gene views

mod gene;
mod heatmap;
mod scatter;

use std::path::Path;

use plotters::style::RGBColor;

use crate::error::{EdaError, Result};

pub use gene::{plot_gene_boxplot, plot_gene_trend};
pub use heatmap::plot_distance_heatmap;
pub use scatter::plot_pca;

type DrawResult = std::result::Result<(), Box<dyn std::error::Error>>;

const FONT: &str = "sans-serif";

/// Colours for categorical groups, cycled by level index
const PALETTE: [RGBColor; 8] = [
    RGBColor(31, 119, 180),
    RGBColor(214, 39, 40),
    RGBColor(44, 160, 44),
    RGBColor(255, 127, 14),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
];

fn group_color(idx: usize) -> RGBColor {
    PALETTE[idx % PALETTE.len()]
}

/// Deterministic horizontal offset in `[-width / 2, width / 2)` for the k-th point
fn jitter(k: usize, width: f64) -> f64 {
    ((k as f64 * 0.618_033_988_749_895).fract() - 0.5) * width
}

/// Padded `(min, max)` of some values, never degenerate
fn padded_range<I: IntoIterator<Item = f64>>(values: I, pad: f64) -> (f64, f64) {
    let (lo, hi) = values
        .into_iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    let span = if hi > lo { hi - lo } else { hi.abs().max(1.0) };
    (lo - pad * span, hi + pad * span)
}

fn render<F>(path: &Path, draw: F) -> Result<()>
where
    F: FnOnce(&Path) -> DrawResult,
{
    draw(path).map_err(|e| EdaError::PlotFailed {
        target: path.display().to_string(),
        reason: e.to_string(),
    })?;
    log::debug!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_is_bounded_and_repeatable() {
        for k in 0..50 {
            let j = jitter(k, 0.4);
            assert!((-0.2..0.2).contains(&j));
            assert_eq!(j, jitter(k, 0.4));
        }
        assert_ne!(jitter(1, 0.4), jitter(2, 0.4));
    }

    #[test]
    fn test_padded_range() {
        assert_eq!(padded_range(vec![0.0, 10.0], 0.1), (-1.0, 11.0));
        assert_eq!(padded_range(vec![5.0], 0.5), (2.5, 7.5));
        assert_eq!(padded_range(Vec::new(), 0.1), (0.0, 1.0));
    }
}
