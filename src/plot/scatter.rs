use std::path::Path;

use plotters::prelude::*;

use super::{group_color, padded_range, render, DrawResult, FONT};
use crate::data::Factor;
use crate::error::{EdaError, Result};
use crate::similarity::PcaResult;

/// PC1 vs PC2 scatter, one colour per level of `groups` (all samples alike when `None`)
pub fn plot_pca(path: &Path, result: &PcaResult, groups: Option<&Factor>) -> Result<()> {
    if let Some(factor) = groups {
        if factor.len() != result.sample_ids.len() {
            return Err(EdaError::DimensionMismatch {
                expected: format!("{} group values", result.sample_ids.len()),
                got: format!("{} values", factor.len()),
            });
        }
    }
    render(path, |path| draw(path, result, groups))
}

fn draw(path: &Path, result: &PcaResult, groups: Option<&Factor>) -> DrawResult {
    let pc1 = result.component(0);
    let pc2 = if result.n_components() > 1 {
        result.component(1)
    } else {
        vec![0.0; pc1.len()]
    };
    let (x_lo, x_hi) = padded_range(pc1.iter().copied(), 0.15);
    let (y_lo, y_hi) = padded_range(pc2.iter().copied(), 0.15);

    let root = SVGBackend::new(path, (720, 560)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("PCA of samples", (FONT, 20))
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)?;

    let y_desc = if result.n_components() > 1 {
        result.axis_label(1)
    } else {
        "PC2".to_string()
    };
    chart
        .configure_mesh()
        .x_desc(result.axis_label(0))
        .y_desc(y_desc)
        .light_line_style(&WHITE)
        .draw()?;

    let (levels, codes): (Vec<String>, Vec<usize>) = match groups {
        Some(factor) => (
            factor.levels().to_vec(),
            (0..factor.len()).map(|i| factor.code(i)).collect(),
        ),
        None => (vec!["samples".to_string()], vec![0; pc1.len()]),
    };

    for (g, level) in levels.iter().enumerate() {
        let color = group_color(g);
        let points: Vec<(f64, f64)> = codes
            .iter()
            .enumerate()
            .filter(|(_, &c)| c == g)
            .map(|(s, _)| (pc1[s], pc2[s]))
            .collect();
        chart
            .draw_series(points.into_iter().map(|p| Circle::new(p, 6, color.filled())))?
            .label(level.as_str())
            .legend(move |(x, y)| Circle::new((x, y), 5, color.filled()));
    }

    let x_nudge = (x_hi - x_lo) * 0.01;
    chart.draw_series(result.sample_ids.iter().enumerate().map(|(s, id)| {
        Text::new(id.clone(), (pc1[s] + x_nudge, pc2[s]), (FONT, 11).into_font())
    }))?;

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}
