//! Sample metadata: one row per sequencing run, categorical covariates

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{EdaError, Result};

/// Compare two strings treating embedded digit runs as numbers,
/// so that stage labels like `c9` sort before `c10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ai = a.chars().peekable();
    let mut bi = b.chars().peekable();

    loop {
        match (ai.peek().copied(), bi.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) if ca.is_ascii_digit() && cb.is_ascii_digit() => {
                let mut da = String::new();
                while let Some(c) = ai.peek().copied().filter(|c| c.is_ascii_digit()) {
                    da.push(c);
                    ai.next();
                }
                let mut db = String::new();
                while let Some(c) = bi.peek().copied().filter(|c| c.is_ascii_digit()) {
                    db.push(c);
                    bi.next();
                }
                let ta = da.trim_start_matches('0');
                let tb = db.trim_start_matches('0');
                let ord = ta.len().cmp(&tb.len()).then_with(|| ta.cmp(tb));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(ca), Some(cb)) => {
                if ca != cb {
                    return ca.cmp(&cb);
                }
                ai.next();
                bi.next();
            }
        }
    }
}

/// A categorical variable: an ordered level set plus one level code per sample.
/// The first level is the reference (baseline) level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    levels: Vec<String>,
    codes: Vec<usize>,
}

impl Factor {
    /// Build a factor whose levels are the observed values in natural order
    pub fn from_values(values: &[String]) -> Self {
        let mut levels: Vec<String> = values.to_vec();
        levels.sort_by(|a, b| natural_cmp(a, b));
        levels.dedup();

        let lookup: HashMap<&str, usize> = levels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.as_str(), i))
            .collect();
        let codes = values.iter().map(|v| lookup[v.as_str()]).collect();

        Self { levels, codes }
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    /// Number of observations (samples)
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// The reference level (first in level order)
    pub fn reference(&self) -> Option<&str> {
        self.levels.first().map(|s| s.as_str())
    }

    pub fn value(&self, idx: usize) -> &str {
        &self.levels[self.codes[idx]]
    }

    /// Position of the observation's level in level order
    pub fn code(&self, idx: usize) -> usize {
        self.codes[idx]
    }

    pub fn values(&self) -> Vec<String> {
        self.codes.iter().map(|&c| self.levels[c].clone()).collect()
    }

    /// Move `reference` to the front of the level order, keeping the
    /// relative order of every other level.
    pub fn relevel(&self, name: &str, reference: &str) -> Result<Self> {
        let pos = self
            .levels
            .iter()
            .position(|l| l == reference)
            .ok_or_else(|| EdaError::MissingReferenceLevel {
                factor: name.to_string(),
                level: reference.to_string(),
                observed: self.levels.join(", "),
            })?;

        let mut order: Vec<usize> = Vec::with_capacity(self.levels.len());
        order.push(pos);
        order.extend((0..self.levels.len()).filter(|&i| i != pos));
        Ok(self.permute(&order))
    }

    /// Apply an explicit level order; it must name every observed level exactly once
    pub fn reorder(&self, name: &str, levels: &[String]) -> Result<Self> {
        let mut order = Vec::with_capacity(levels.len());
        for level in levels {
            let pos = self.levels.iter().position(|l| l == level).ok_or_else(|| {
                EdaError::MissingReferenceLevel {
                    factor: name.to_string(),
                    level: level.clone(),
                    observed: self.levels.join(", "),
                }
            })?;
            if order.contains(&pos) {
                return Err(EdaError::InvalidInput {
                    reason: format!("level '{}' listed twice for factor '{}'", level, name),
                });
            }
            order.push(pos);
        }
        if order.len() != self.levels.len() {
            return Err(EdaError::InvalidInput {
                reason: format!(
                    "level order for factor '{}' must list all of: {}",
                    name,
                    self.levels.join(", ")
                ),
            });
        }
        Ok(self.permute(&order))
    }

    /// Keep the given observations; unused levels are dropped, order is kept
    pub fn subset(&self, indices: &[usize]) -> Self {
        let used: HashSet<usize> = indices.iter().map(|&i| self.codes[i]).collect();
        let kept: Vec<usize> = (0..self.levels.len()).filter(|c| used.contains(c)).collect();
        let remap: HashMap<usize, usize> = kept.iter().enumerate().map(|(new, &old)| (old, new)).collect();

        Self {
            levels: kept.iter().map(|&c| self.levels[c].clone()).collect(),
            codes: indices.iter().map(|&i| remap[&self.codes[i]]).collect(),
        }
    }

    /// `order[k]` is the old index of the level that becomes level k
    fn permute(&self, order: &[usize]) -> Self {
        let mut new_code = vec![0usize; self.levels.len()];
        for (new, &old) in order.iter().enumerate() {
            new_code[old] = new;
        }
        Self {
            levels: order.iter().map(|&i| self.levels[i].clone()).collect(),
            codes: self.codes.iter().map(|&c| new_code[c]).collect(),
        }
    }
}

/// Sample metadata: identifiers plus named categorical columns, in file order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleTable {
    id_column: String,
    sample_ids: Vec<String>,
    column_names: Vec<String>,
    columns: HashMap<String, Factor>,
}

impl SampleTable {
    /// Create an empty table; sample IDs must be unique
    pub fn new(id_column: &str, sample_ids: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::new();
        for id in &sample_ids {
            if !seen.insert(id) {
                return Err(EdaError::InvalidSampleTable {
                    reason: format!("duplicate sample ID '{}'", id),
                });
            }
        }
        Ok(Self {
            id_column: id_column.to_string(),
            sample_ids,
            column_names: Vec::new(),
            columns: HashMap::new(),
        })
    }

    /// Add (or replace) a categorical column
    pub fn add_column(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.sample_ids.len() {
            return Err(EdaError::DimensionMismatch {
                expected: format!("{} values", self.sample_ids.len()),
                got: format!("{} values", values.len()),
            });
        }
        self.insert_factor(name, Factor::from_values(&values));
        Ok(())
    }

    fn insert_factor(&mut self, name: &str, factor: Factor) {
        if !self.columns.contains_key(name) {
            self.column_names.push(name.to_string());
        }
        self.columns.insert(name.to_string(), factor);
    }

    pub fn id_column(&self) -> &str {
        &self.id_column
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn sample_index(&self, sample_id: &str) -> Option<usize> {
        self.sample_ids.iter().position(|id| id == sample_id)
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn factor(&self, name: &str) -> Result<&Factor> {
        self.columns.get(name).ok_or_else(|| EdaError::MissingColumn {
            table: "sample table".to_string(),
            column: name.to_string(),
        })
    }

    pub fn levels(&self, name: &str) -> Result<&[String]> {
        Ok(self.factor(name)?.levels())
    }

    pub fn value(&self, name: &str, sample_idx: usize) -> Result<&str> {
        let factor = self.factor(name)?;
        if sample_idx >= factor.len() {
            return Err(EdaError::InvalidInput {
                reason: format!("sample index {} out of range", sample_idx),
            });
        }
        Ok(factor.value(sample_idx))
    }

    /// Sample indices whose value in `name` equals `level`
    pub fn samples_with_level(&self, name: &str, level: &str) -> Vec<usize> {
        self.columns
            .get(name)
            .map(|f| (0..f.len()).filter(|&i| f.value(i) == level).collect())
            .unwrap_or_default()
    }

    /// Return a copy with `reference` as the first level of column `name`
    pub fn relevel(&self, name: &str, reference: &str) -> Result<Self> {
        let factor = self.factor(name)?.relevel(name, reference)?;
        let mut table = self.clone();
        table.insert_factor(name, factor);
        Ok(table)
    }

    /// Return a copy with an explicit level order for column `name`
    pub fn reorder_levels(&self, name: &str, levels: &[String]) -> Result<Self> {
        let factor = self.factor(name)?.reorder(name, levels)?;
        let mut table = self.clone();
        table.insert_factor(name, factor);
        Ok(table)
    }

    /// Keep the given samples, in the given order
    pub fn subset(&self, sample_indices: &[usize]) -> Result<Self> {
        let ids = sample_indices
            .iter()
            .map(|&i| self.sample_ids[i].clone())
            .collect();
        let mut table = SampleTable::new(&self.id_column, ids)?;
        for name in &self.column_names {
            table.insert_factor(name, self.columns[name].subset(sample_indices));
        }
        Ok(table)
    }
}
