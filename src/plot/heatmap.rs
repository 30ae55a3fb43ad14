use std::path::Path;

use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters::style::FontTransform;

use super::{render, DrawResult, FONT};
use crate::error::{EdaError, Result};
use crate::similarity::{Dendrogram, DistanceMatrix};

const LABEL_WIDTH: i32 = 140;
const TITLE_HEIGHT: i32 = 40;
const TREE_HEIGHT: i32 = 120;
const BOTTOM_MARGIN: i32 = 130;

/// Blues ramp: dark for identical samples, white for the largest distance
fn distance_color(t: f64) -> RGBColor {
    let t = t.clamp(0.0, 1.0);
    let lerp = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
    RGBColor(lerp(8, 247), lerp(48, 251), lerp(107, 255))
}

/// Sample distance heatmap in dendrogram leaf order, with the column tree on top
pub fn plot_distance_heatmap(path: &Path, distances: &DistanceMatrix, tree: &Dendrogram) -> Result<()> {
    if tree.n_leaves() != distances.n() {
        return Err(EdaError::DimensionMismatch {
            expected: format!("dendrogram over {} samples", distances.n()),
            got: format!("{} leaves", tree.n_leaves()),
        });
    }
    render(path, |path| draw(path, distances, tree))
}

fn draw(path: &Path, distances: &DistanceMatrix, tree: &Dendrogram) -> DrawResult {
    let n = distances.n();
    let cell = (480 / n.max(1) as i32).clamp(12, 60);
    let width = LABEL_WIDTH + cell * n as i32 + 40;
    let height = TITLE_HEIGHT + TREE_HEIGHT + cell * n as i32 + BOTTOM_MARGIN;
    let (x0, y0) = (LABEL_WIDTH, TITLE_HEIGHT + TREE_HEIGHT);

    let root = SVGBackend::new(path, (width as u32, height as u32)).into_drawing_area();
    root.fill(&WHITE)?;
    root.draw(&Text::new(
        "Sample distances",
        (x0, 12),
        (FONT, 18).into_font().color(&BLACK),
    ))?;

    let order = tree.leaf_order();
    let max = distances.max();
    for (pi, &i) in order.iter().enumerate() {
        for (pj, &j) in order.iter().enumerate() {
            let t = if max > 0.0 { distances.get(i, j) / max } else { 0.0 };
            let (left, top) = (x0 + pj as i32 * cell, y0 + pi as i32 * cell);
            root.draw(&Rectangle::new(
                [(left, top), (left + cell, top + cell)],
                distance_color(t).filled(),
            ))?;
        }
    }

    let labels = distances.labels();
    let row_style = TextStyle::from((FONT, 12).into_font())
        .color(&BLACK)
        .pos(Pos::new(HPos::Right, VPos::Center));
    let col_style = TextStyle::from((FONT, 12).into_font())
        .color(&BLACK)
        .transform(FontTransform::Rotate90);
    for (p, &leaf) in order.iter().enumerate() {
        let centre = p as i32 * cell + cell / 2;
        root.draw(&Text::new(labels[leaf].as_str(), (x0 - 6, y0 + centre), row_style.clone()))?;
        root.draw(&Text::new(
            labels[leaf].as_str(),
            (x0 + centre + 6, y0 + n as i32 * cell + 6),
            col_style.clone(),
        ))?;
    }

    // column dendrogram: leaves sit just above the heatmap, the root at the top
    let n_nodes = n + tree.merges().len();
    let mut node_x = vec![0.0f64; n_nodes];
    for (p, &leaf) in order.iter().enumerate() {
        node_x[leaf] = (x0 + p as i32 * cell) as f64 + cell as f64 / 2.0;
    }
    let top_height = tree.merges().last().map(|m| m.height).unwrap_or(0.0);
    let node_y = |node: usize| -> i32 {
        let scaled = if top_height > 0.0 { tree.height(node) / top_height } else { 0.0 };
        y0 - 4 - (scaled * (TREE_HEIGHT - 12) as f64).round() as i32
    };
    for (k, merge) in tree.merges().iter().enumerate() {
        let node = n + k;
        node_x[node] = (node_x[merge.left] + node_x[merge.right]) / 2.0;
        let (xl, xr) = (node_x[merge.left].round() as i32, node_x[merge.right].round() as i32);
        let y = node_y(node);
        root.draw(&PathElement::new(
            vec![(xl, node_y(merge.left)), (xl, y), (xr, y), (xr, node_y(merge.right))],
            BLACK.stroke_width(1),
        ))?;
    }

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::{hierarchical_cluster, Linkage};
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn test_distance_color_ramp() {
        assert_eq!(distance_color(0.0), RGBColor(8, 48, 107));
        assert_eq!(distance_color(1.0), RGBColor(247, 251, 255));
        assert_eq!(distance_color(5.0), distance_color(1.0));
    }

    #[test]
    fn test_heatmap_writes_svg() {
        let labels: Vec<String> = ["WT_c12_1", "KD_c12_1", "WT_c13_1"].iter().map(|s| s.to_string()).collect();
        let data = array![[1.0, 5.0, 1.5], [2.0, 6.0, 2.5]];
        let distances = DistanceMatrix::euclidean(data.view(), &labels).unwrap();
        let tree = hierarchical_cluster(&distances, Linkage::Complete).unwrap().leaf_sort();

        let dir = tempdir().unwrap();
        let path = dir.path().join("sample_distances.svg");
        plot_distance_heatmap(&path, &distances, &tree).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("KD_c12_1"));
    }
}
