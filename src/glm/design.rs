//! Design formulas and treatment-contrast model matrices

use std::fmt;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::data::SampleTable;
use crate::error::{EdaError, Result};

/// One term of a design formula: a main effect (one variable) or an
/// interaction of several variables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term(pub Vec<String>);

impl Term {
    pub fn order(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(":"))
    }
}

/// A parsed design formula such as `~ genotype + cell_cycle + genotype:cell_cycle`
///
/// Always carries an intercept. `a*b` expands to `a + b + a:b`. Terms are
/// kept in order of first appearance, main effects before interactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Design {
    terms: Vec<Term>,
}

/// Model matrix with named coefficients
#[derive(Debug, Clone)]
pub struct ModelMatrix {
    pub matrix: Array2<f64>,
    pub coef_names: Vec<String>,
}

impl Design {
    /// The intercept-only design `~ 1`
    pub fn intercept_only() -> Self {
        Self { terms: Vec::new() }
    }

    pub fn parse(formula: &str) -> Result<Self> {
        let body = formula.trim();
        let body = body.strip_prefix('~').ok_or_else(|| EdaError::InvalidDesign {
            reason: format!("formula '{}' must start with '~'", formula),
        })?;

        let mut terms: Vec<Term> = Vec::new();
        for raw in body.split('+') {
            let raw = raw.trim();
            if raw.is_empty() {
                return Err(EdaError::InvalidDesign {
                    reason: format!("empty term in formula '{}'", formula),
                });
            }
            if raw == "1" {
                continue;
            }

            let expanded = if raw.contains('*') {
                let vars = split_vars(raw, '*', formula)?;
                // every non-empty subset, in binary-counting order
                let mut subsets: Vec<Vec<String>> = (1..(1usize << vars.len()))
                    .map(|mask| {
                        vars.iter()
                            .enumerate()
                            .filter(|(i, _)| mask & (1 << i) != 0)
                            .map(|(_, v)| v.clone())
                            .collect()
                    })
                    .collect();
                subsets.sort_by_key(|s| s.len());
                subsets
            } else {
                vec![split_vars(raw, ':', formula)?]
            };

            for vars in expanded {
                let term = Term(vars);
                if !terms.contains(&term) {
                    terms.push(term);
                }
            }
        }

        terms.sort_by_key(|t| t.order());
        Ok(Self { terms })
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn is_intercept_only(&self) -> bool {
        self.terms.is_empty()
    }

    /// Distinct variables referenced by the formula
    pub fn variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = Vec::new();
        for term in &self.terms {
            for v in &term.0 {
                if !vars.contains(&v.as_str()) {
                    vars.push(v);
                }
            }
        }
        vars
    }

    /// Build the treatment-contrast model matrix for `samples`
    ///
    /// The first level of each factor is the baseline. An interaction term
    /// contributes one column per combination of non-baseline levels.
    pub fn model_matrix(&self, samples: &SampleTable) -> Result<ModelMatrix> {
        let n = samples.n_samples();
        let mut columns: Vec<Vec<f64>> = vec![vec![1.0; n]];
        let mut coef_names = vec!["Intercept".to_string()];

        for term in &self.terms {
            // (name, indicator column) per non-baseline level, for each variable
            let mut per_var: Vec<Vec<(String, Vec<f64>)>> = Vec::with_capacity(term.order());
            for var in &term.0 {
                let factor = samples.factor(var)?;
                let reference = factor.reference().unwrap_or_default().to_string();
                let indicators = factor
                    .levels()
                    .iter()
                    .enumerate()
                    .skip(1)
                    .map(|(code, level)| {
                        let column = (0..n)
                            .map(|i| if factor.code(i) == code { 1.0 } else { 0.0 })
                            .collect();
                        (format!("{}_{}_vs_{}", var, level, reference), column)
                    })
                    .collect();
                per_var.push(indicators);
            }

            let mut combos: Vec<(String, Vec<f64>)> = vec![(String::new(), vec![1.0; n])];
            for indicators in &per_var {
                let mut next = Vec::with_capacity(combos.len() * indicators.len());
                for (name, column) in &combos {
                    for (level_name, indicator) in indicators {
                        let joined = if name.is_empty() {
                            level_name.clone()
                        } else {
                            format!("{}_x_{}", name, level_name)
                        };
                        let product = column.iter().zip(indicator).map(|(a, b)| a * b).collect();
                        next.push((joined, product));
                    }
                }
                combos = next;
            }

            for (name, column) in combos {
                coef_names.push(name);
                columns.push(column);
            }
        }

        let mut matrix = Array2::zeros((n, columns.len()));
        for (j, column) in columns.iter().enumerate() {
            for (i, &v) in column.iter().enumerate() {
                matrix[[i, j]] = v;
            }
        }

        check_full_rank(&matrix)?;
        log::debug!("Model matrix {} x {}: [{}]", n, coef_names.len(), coef_names.join(", "));
        Ok(ModelMatrix { matrix, coef_names })
    }
}

impl fmt::Display for Design {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return write!(f, "~ 1");
        }
        let terms: Vec<String> = self.terms.iter().map(|t| t.to_string()).collect();
        write!(f, "~ {}", terms.join(" + "))
    }
}

fn split_vars(raw: &str, sep: char, formula: &str) -> Result<Vec<String>> {
    let vars: Vec<String> = raw.split(sep).map(|v| v.trim().to_string()).collect();
    if vars.iter().any(|v| v.is_empty() || v.contains(|c: char| c.is_whitespace() || "*:()".contains(c))) {
        return Err(EdaError::InvalidDesign {
            reason: format!("cannot parse term '{}' in formula '{}'", raw, formula),
        });
    }
    Ok(vars)
}

impl ModelMatrix {
    pub fn n_coefs(&self) -> usize {
        self.matrix.ncols()
    }

    /// Group each sample by its row of the model matrix
    ///
    /// Returns the group index of every sample and the number of groups.
    pub fn row_groups(&self) -> (Vec<usize>, usize) {
        let mut patterns: Vec<Vec<u64>> = Vec::new();
        let mut groups = Vec::with_capacity(self.matrix.nrows());
        for row in self.matrix.rows() {
            let key: Vec<u64> = row.iter().map(|v| v.to_bits()).collect();
            let idx = match patterns.iter().position(|p| *p == key) {
                Some(idx) => idx,
                None => {
                    patterns.push(key);
                    patterns.len() - 1
                }
            };
            groups.push(idx);
        }
        (groups, patterns.len())
    }

    /// True when the design is saturated over its distinct rows, so fitted
    /// means are per-group means of normalized counts
    pub fn is_group_design(&self) -> bool {
        let (_, n_groups) = self.row_groups();
        n_groups == self.n_coefs()
    }
}

/// Fail with `InvalidDesign` unless `matrix` has full column rank
pub fn check_full_rank(matrix: &Array2<f64>) -> Result<()> {
    let (nrow, ncol) = matrix.dim();
    if nrow == 0 || ncol == 0 {
        return Err(EdaError::InvalidDesign {
            reason: "model matrix has zero rows or columns".to_string(),
        });
    }

    if qr_rank(matrix) < ncol {
        let zero_column = (0..ncol).any(|j| matrix.column(j).iter().all(|&v| v == 0.0));
        let reason = if zero_column {
            "model matrix is not full rank: some level combinations have no samples"
        } else {
            "model matrix is not full rank: some terms are linear combinations of others"
        };
        return Err(EdaError::InvalidDesign {
            reason: reason.to_string(),
        });
    }
    Ok(())
}

/// Numerical rank by Householder QR with column pivoting; diagonal entries
/// of R above `max(nrow, ncol) * eps * max|diag(R)|` count
fn qr_rank(matrix: &Array2<f64>) -> usize {
    let (nrow, ncol) = matrix.dim();
    let k = nrow.min(ncol);
    let mut r = matrix.to_owned();
    let mut norms: Vec<f64> = (0..ncol).map(|j| r.column(j).dot(&r.column(j))).collect();

    for step in 0..k {
        let best = (step..ncol)
            .max_by(|&a, &b| norms[a].total_cmp(&norms[b]))
            .unwrap_or(step);
        if best != step {
            for i in 0..nrow {
                r.swap([i, step], [i, best]);
            }
            norms.swap(step, best);
        }

        let mut alpha = (step..nrow).map(|i| r[[i, step]].powi(2)).sum::<f64>().sqrt();
        if alpha < f64::EPSILON * 1e3 {
            break;
        }
        if r[[step, step]] > 0.0 {
            alpha = -alpha;
        }

        let v0 = r[[step, step]] - alpha;
        r[[step, step]] = alpha;
        let v_norm_sq = v0 * v0 + ((step + 1)..nrow).map(|i| r[[i, step]].powi(2)).sum::<f64>();
        if v_norm_sq < f64::MIN_POSITIVE {
            continue;
        }
        let tau = 2.0 / v_norm_sq;

        for j in (step + 1)..ncol {
            let dot = v0 * r[[step, j]] + ((step + 1)..nrow).map(|i| r[[i, step]] * r[[i, j]]).sum::<f64>();
            let scale = tau * dot;
            r[[step, j]] -= scale * v0;
            for i in (step + 1)..nrow {
                let vi = r[[i, step]];
                r[[i, j]] -= scale * vi;
            }
            norms[j] = (norms[j] - r[[step, j]].powi(2)).max(0.0);
        }
    }

    let max_diag = (0..k).map(|i| r[[i, i]].abs()).fold(0.0f64, f64::max);
    let tol = nrow.max(ncol) as f64 * f64::EPSILON * max_diag;
    (0..k).filter(|&i| r[[i, i]].abs() > tol).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn embryo_samples() -> SampleTable {
        let ids: Vec<String> = ["WT_c12_1", "WT_c13_1", "WT_c14_1", "KD_c12_1", "KD_c13_1", "KD_c14_1", "WT_c12_2", "KD_c14_2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut samples = SampleTable::new("sample", ids.clone()).unwrap();
        samples
            .add_column("genotype", ids.iter().map(|s| s[..2].to_string()).collect())
            .unwrap();
        samples
            .add_column("cell_cycle", ids.iter().map(|s| s[3..6].to_string()).collect())
            .unwrap();
        samples.relevel("genotype", "WT").unwrap()
    }

    #[test]
    fn test_parse_expands_star() {
        let design = Design::parse("~ genotype*cell_cycle").unwrap();
        let explicit = Design::parse("~genotype + cell_cycle + genotype:cell_cycle").unwrap();
        assert_eq!(design, explicit);
        assert_eq!(design.to_string(), "~ genotype + cell_cycle + genotype:cell_cycle");
        assert_eq!(design.variables(), vec!["genotype", "cell_cycle"]);
    }

    #[test]
    fn test_parse_intercept_and_errors() {
        assert!(Design::parse("~ 1").unwrap().is_intercept_only());
        assert!(matches!(Design::parse("genotype"), Err(EdaError::InvalidDesign { .. })));
        assert!(matches!(Design::parse("~ genotype +"), Err(EdaError::InvalidDesign { .. })));
    }

    #[test]
    fn test_interaction_model_matrix() {
        let samples = embryo_samples();
        let mm = Design::parse("~ genotype*cell_cycle").unwrap().model_matrix(&samples).unwrap();

        assert_eq!(mm.matrix.dim(), (8, 6));
        assert_eq!(mm.coef_names[1], "genotype_KD_vs_WT");
        assert_eq!(mm.coef_names[2], "cell_cycle_c13_vs_c12");
        assert_eq!(mm.coef_names[4], "genotype_KD_vs_WT_x_cell_cycle_c13_vs_c12");
        // KD_c13_1 is row 4
        assert_eq!(mm.matrix.row(4).to_vec(), vec![1.0, 1.0, 1.0, 0.0, 1.0, 0.0]);
        // WT_c12_1 is the baseline
        assert_eq!(mm.matrix.row(0).to_vec(), vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(mm.is_group_design());
    }

    #[test]
    fn test_unknown_variable() {
        let result = Design::parse("~ batch").unwrap().model_matrix(&embryo_samples());
        assert!(matches!(result, Err(EdaError::MissingColumn { .. })));
    }

    #[test]
    fn test_rank_deficient() {
        let collinear = array![[1.0, 0.0, 1.0], [1.0, 1.0, 0.0], [1.0, 0.0, 1.0], [1.0, 1.0, 0.0]];
        assert!(matches!(check_full_rank(&collinear), Err(EdaError::InvalidDesign { .. })));

        let ok = array![[1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0]];
        assert!(check_full_rank(&ok).is_ok());
    }

    #[test]
    fn test_missing_combination_is_rank_deficient() {
        let ids: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let mut samples = SampleTable::new("sample", ids).unwrap();
        samples
            .add_column("g", vec!["WT".into(), "WT".into(), "KD".into(), "KD".into()])
            .unwrap();
        samples
            .add_column("s", vec!["x".into(), "y".into(), "x".into(), "x".into()])
            .unwrap();
        let result = Design::parse("~ g*s").unwrap().model_matrix(&samples);
        assert!(matches!(result, Err(EdaError::InvalidDesign { .. })));
    }
}
