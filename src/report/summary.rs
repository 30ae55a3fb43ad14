//! Per-group box statistics for gene plots

use serde::Serialize;

use super::GeneReport;

/// Five-number summary with Tukey whiskers (1.5 x IQR)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoxSummary {
    pub lower_whisker: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub upper_whisker: f64,
}

/// Linear-interpolated quantile of sorted values
fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

impl BoxSummary {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let q1 = quantile_sorted(&sorted, 0.25);
        let median = quantile_sorted(&sorted, 0.5);
        let q3 = quantile_sorted(&sorted, 0.75);
        let reach = 1.5 * (q3 - q1);
        let lower_whisker = sorted.iter().copied().find(|&v| v >= q1 - reach).unwrap_or(q1);
        let upper_whisker = sorted.iter().rev().copied().find(|&v| v <= q3 + reach).unwrap_or(q3);

        Some(Self {
            lower_whisker,
            q1,
            median,
            q3,
            upper_whisker,
        })
    }
}

/// Values of one gene in one (stage, genotype) cell
#[derive(Debug, Clone, Serialize)]
pub struct BoxGroup {
    pub stage: String,
    pub genotype: String,
    pub values: Vec<f64>,
    pub summary: BoxSummary,
}

impl BoxGroup {
    pub fn label(&self) -> String {
        format!("{} {}", self.stage, self.genotype)
    }
}

impl GeneReport {
    /// Non-empty (stage x genotype) groups for one gene, stage-major in level order
    pub fn box_groups(&self, gene_id: &str) -> Vec<BoxGroup> {
        let mut groups = Vec::new();
        for stage in &self.stage_levels {
            for genotype in &self.genotype_levels {
                let values: Vec<f64> = self
                    .records_for(gene_id)
                    .filter(|r| &r.stage == stage && &r.genotype == genotype)
                    .map(|r| r.value)
                    .collect();
                if let Some(summary) = BoxSummary::from_values(&values) {
                    groups.push(BoxGroup {
                        stage: stage.clone(),
                        genotype: genotype.clone(),
                        values,
                        summary,
                    });
                }
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::GeneExpressionRecord;

    #[test]
    fn test_box_summary() {
        let s = BoxSummary::from_values(&[1.0, 2.0, 3.0, 4.0, 100.0]).unwrap();
        assert_eq!(s.median, 3.0);
        assert_eq!(s.q1, 2.0);
        assert_eq!(s.q3, 4.0);
        assert_eq!(s.lower_whisker, 1.0);
        // 100 lies beyond q3 + 1.5 * IQR
        assert_eq!(s.upper_whisker, 4.0);
        assert!(BoxSummary::from_values(&[]).is_none());

        let single = BoxSummary::from_values(&[7.0]).unwrap();
        assert_eq!((single.q1, single.median, single.q3), (7.0, 7.0, 7.0));
    }

    #[test]
    fn test_box_groups_order() {
        let record = |sample: &str, genotype: &str, stage: &str, value: f64| GeneExpressionRecord {
            gene_id: "g".to_string(),
            gene_name: "g".to_string(),
            sample_id: sample.to_string(),
            genotype: genotype.to_string(),
            stage: stage.to_string(),
            replicate: "1".to_string(),
            value,
        };
        let report = GeneReport {
            records: vec![
                record("KD_c13_1", "KD", "c13", 1.0),
                record("WT_c13_1", "WT", "c13", 2.0),
                record("WT_c12_1", "WT", "c12", 3.0),
            ],
            genotype_levels: vec!["WT".to_string(), "KD".to_string()],
            stage_levels: vec!["c12".to_string(), "c13".to_string()],
            value_label: "value".to_string(),
        };
        let labels: Vec<String> = report.box_groups("g").iter().map(|g| g.label()).collect();
        assert_eq!(labels, vec!["c12 WT", "c13 WT", "c13 KD"]);
    }
}
