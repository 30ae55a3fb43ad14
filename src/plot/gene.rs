use std::path::Path;

use plotters::prelude::*;

use super::{group_color, jitter, padded_range, render, DrawResult, FONT};
use crate::error::{EdaError, Result};
use crate::report::GeneReport;

const BOX_HALF_WIDTH: f64 = 0.3;

fn title(report: &GeneReport, gene_id: &str) -> String {
    match report.gene_name(gene_id) {
        Some(name) if name != gene_id => format!("{} ({})", name, gene_id),
        _ => gene_id.to_string(),
    }
}

fn require_gene(report: &GeneReport, gene_id: &str) -> Result<()> {
    if report.records_for(gene_id).next().is_none() {
        return Err(EdaError::InvalidInput {
            reason: format!("gene '{}' is not part of the report", gene_id),
        });
    }
    Ok(())
}

/// Label for integral axis positions, empty between them
fn ordinal_label(labels: &[String], x: f64, offset: f64) -> String {
    let pos = x - offset;
    if (pos - pos.round()).abs() > 1e-6 || pos.round() < 0.0 {
        return String::new();
    }
    labels.get(pos.round() as usize).cloned().unwrap_or_default()
}

/// Boxplot with jittered points, one box per (stage, genotype) group
pub fn plot_gene_boxplot(path: &Path, report: &GeneReport, gene_id: &str) -> Result<()> {
    require_gene(report, gene_id)?;
    render(path, |path| draw_boxplot(path, report, gene_id))
}

fn draw_boxplot(path: &Path, report: &GeneReport, gene_id: &str) -> DrawResult {
    let groups = report.box_groups(gene_id);
    let labels: Vec<String> = groups.iter().map(|g| g.label()).collect();
    let (y_lo, y_hi) = padded_range(groups.iter().flat_map(|g| g.values.iter().copied()), 0.08);
    let n = groups.len() as f64;

    let root = SVGBackend::new(path, (160 + 90 * groups.len() as u32, 520)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title(report, gene_id), (FONT, 20))
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.6..(n - 0.4), y_lo..y_hi)?;

    let formatter = |x: &f64| ordinal_label(&labels, *x, 0.0);
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels((2 * groups.len()).max(4))
        .x_label_formatter(&formatter)
        .y_desc(report.value_label.as_str())
        .draw()?;

    let mut k = 0;
    for (gi, group) in groups.iter().enumerate() {
        let x = gi as f64;
        let color = group_color(report.genotype_index(&group.genotype).unwrap_or(0));
        let s = group.summary;
        let (l, r) = (x - BOX_HALF_WIDTH, x + BOX_HALF_WIDTH);

        chart.draw_series(std::iter::once(Rectangle::new([(l, s.q1), (r, s.q3)], color.mix(0.15).filled())))?;
        chart.draw_series(std::iter::once(Rectangle::new([(l, s.q1), (r, s.q3)], color.stroke_width(2))))?;
        chart.draw_series([
            PathElement::new(vec![(l, s.median), (r, s.median)], BLACK.stroke_width(2)),
            PathElement::new(vec![(x, s.q3), (x, s.upper_whisker)], color.stroke_width(1)),
            PathElement::new(vec![(x, s.q1), (x, s.lower_whisker)], color.stroke_width(1)),
        ])?;

        chart.draw_series(group.values.iter().map(|&v| {
            let point = (x + jitter(k, 2.0 * BOX_HALF_WIDTH), v);
            k += 1;
            Circle::new(point, 4, color.filled())
        }))?;
    }

    root.present()?;
    Ok(())
}

/// Scatter over ordinal stages with one smoothed trend line per genotype
pub fn plot_gene_trend(path: &Path, report: &GeneReport, gene_id: &str, span: f64) -> Result<()> {
    require_gene(report, gene_id)?;
    render(path, |path| draw_trend(path, report, gene_id, span))
}

fn draw_trend(path: &Path, report: &GeneReport, gene_id: &str, span: f64) -> DrawResult {
    let curves = report.trend_curves(gene_id, 60, span);
    let values = report
        .records_for(gene_id)
        .map(|r| r.value)
        .chain(curves.iter().flat_map(|c| c.points.iter().map(|p| p.1)));
    let (y_lo, y_hi) = padded_range(values, 0.08);
    let n_stages = report.stage_levels.len() as f64;

    let root = SVGBackend::new(path, (720, 520)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title(report, gene_id), (FONT, 20))
        .margin(15)
        .x_label_area_size(45)
        .y_label_area_size(60)
        .build_cartesian_2d(0.6..(n_stages + 0.4), y_lo..y_hi)?;

    let formatter = |x: &f64| ordinal_label(&report.stage_levels, *x, 1.0);
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels((2 * report.stage_levels.len()).max(4))
        .x_label_formatter(&formatter)
        .x_desc("stage")
        .y_desc(report.value_label.as_str())
        .draw()?;

    for (g, genotype) in report.genotype_levels.iter().enumerate() {
        let color = group_color(g);
        let points: Vec<(f64, f64)> = report
            .records_for(gene_id)
            .filter(|r| &r.genotype == genotype)
            .enumerate()
            .filter_map(|(k, r)| report.stage_position(&r.stage).map(|x| (x + jitter(k, 0.16), r.value)))
            .collect();
        let series = chart.draw_series(points.into_iter().map(|p| Circle::new(p, 4, color.filled())))?;
        series
            .label(genotype.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 18, y)], color.stroke_width(2)));

        if let Some(curve) = curves.iter().find(|c| &c.genotype == genotype) {
            chart.draw_series(LineSeries::new(curve.points.clone(), color.stroke_width(2)))?;
        }
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}
