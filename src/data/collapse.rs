//! Collapse technical replicates by summing counts

use ndarray::Array2;

use super::{CountMatrix, SampleTable};
use crate::error::{EdaError, Result};

/// Name of the provenance column added when a run column is given
pub const RUNS_COLLAPSED: &str = "runs_collapsed";

/// Collapse technical replicates (e.g. sequencing lanes) by summing counts
///
/// Samples sharing a value in the `groupby` column are summed into one
/// column named after that value. Output columns follow the level order
/// of the `groupby` factor. Covariates are copied from the first run of
/// each group. When `run` names a column (or the ID column), its values
/// for each group are recorded, comma-joined, in a `runs_collapsed` column.
pub fn collapse_replicates(
    counts: &CountMatrix,
    samples: &SampleTable,
    groupby: &str,
    run: Option<&str>,
) -> Result<(CountMatrix, SampleTable)> {
    if counts.sample_ids() != samples.sample_ids() {
        return Err(EdaError::SampleFileMismatch {
            reason: "count matrix columns are not aligned with the sample table".to_string(),
        });
    }

    let group_factor = samples.factor(groupby)?;
    let run_values: Option<Vec<String>> = match run {
        Some(name) if name == samples.id_column() => Some(samples.sample_ids().to_vec()),
        Some(name) => Some(samples.factor(name)?.values()),
        None => None,
    };

    let group_order: Vec<String> = group_factor.levels().to_vec();
    let members: Vec<Vec<usize>> = group_order
        .iter()
        .map(|g| samples.samples_with_level(groupby, g))
        .collect();

    let raw = counts.counts();
    let n_genes = counts.n_genes();
    let mut new_counts = Array2::zeros((n_genes, group_order.len()));
    for (new_j, group) in members.iter().enumerate() {
        for &old_j in group {
            let mut column = new_counts.column_mut(new_j);
            column += &raw.column(old_j);
        }
    }

    let original_total = counts.total();
    let collapsed_total: f64 = new_counts.sum();
    if (original_total - collapsed_total).abs() > 1e-6 * original_total.max(1.0) {
        return Err(EdaError::InvalidInput {
            reason: format!(
                "total count mismatch after collapsing: original={}, collapsed={}",
                original_total, collapsed_total
            ),
        });
    }

    let first_rows: Vec<usize> = members.iter().map(|m| m[0]).collect();
    for (group, rows) in group_order.iter().zip(&members) {
        for name in samples.column_names() {
            let factor = samples.factor(name)?;
            if Some(name.as_str()) != run && rows.iter().any(|&r| factor.value(r) != factor.value(rows[0])) {
                log::warn!(
                    "Group '{}' has disagreeing values in column '{}'; keeping the first run's value",
                    group,
                    name
                );
            }
        }
    }

    let representative = samples.subset(&first_rows)?;
    let mut new_samples = SampleTable::new(groupby, group_order.clone())?;
    for name in representative.column_names() {
        if Some(name.as_str()) == run {
            continue;
        }
        new_samples.add_column(name, representative.factor(name)?.values())?;
    }
    // keep the original level order of every carried column
    for name in representative.column_names() {
        if Some(name.as_str()) == run {
            continue;
        }
        let levels = representative.levels(name)?.to_vec();
        new_samples = new_samples.reorder_levels(name, &levels)?;
    }
    if let Some(run_values) = run_values {
        let provenance = members
            .iter()
            .map(|rows| {
                rows.iter()
                    .map(|&r| run_values[r].clone())
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect();
        new_samples.add_column(RUNS_COLLAPSED, provenance)?;
    }

    log::info!(
        "Collapsed {} runs into {} samples by '{}'",
        counts.n_samples(),
        group_order.len(),
        groupby
    );

    let new_matrix = CountMatrix::new(new_counts, counts.gene_ids().to_vec(), group_order)?;
    Ok((new_matrix, new_samples))
}
