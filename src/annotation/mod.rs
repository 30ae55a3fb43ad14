//! Transcript → gene and gene → name annotation tables

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EdaError, Result};
use crate::io::DelimitedTable;

/// Column selection for an annotation file
///
/// When a column name is `None`, the key comes from the first column and
/// the value from the second.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationColumns {
    pub key: Option<String>,
    pub value: Option<String>,
    /// Strip a trailing `.N` version from keys (`FBtr0070000.1` -> `FBtr0070000`)
    pub ignore_version: bool,
}

/// Remove a trailing numeric version suffix from an identifier
pub fn strip_version(id: &str) -> &str {
    match id.rsplit_once('.') {
        Some((base, version)) if !base.is_empty() && !version.is_empty() && version.bytes().all(|b| b.is_ascii_digit()) => {
            base
        }
        _ => id,
    }
}

fn read_pairs<P: AsRef<Path>>(path: P, columns: &AnnotationColumns) -> Result<(String, Vec<(String, String)>)> {
    let table = DelimitedTable::read(path)?;
    if table.is_empty() {
        return Err(EdaError::EmptyData {
            reason: format!("no annotation rows in {}", table.name()),
        });
    }
    if table.headers().len() < 2 && (columns.key.is_none() || columns.value.is_none()) {
        return Err(EdaError::InvalidAnnotation {
            reason: format!("{} needs at least two columns", table.name()),
        });
    }

    let key_idx = table.column_or(columns.key.as_deref(), 0)?;
    let value_idx = table.column_or(columns.value.as_deref(), 1)?;

    let pairs = table
        .rows()
        .iter()
        .filter(|row| !row[key_idx].is_empty())
        .map(|row| (row[key_idx].clone(), row[value_idx].clone()))
        .collect();
    Ok((table.name().to_string(), pairs))
}

/// Many-to-one mapping from transcript ID to gene ID
#[derive(Debug, Clone, Default)]
pub struct TranscriptGeneMap {
    map: HashMap<String, String>,
    ignore_version: bool,
}

impl TranscriptGeneMap {
    pub fn from_pairs<I>(pairs: I, ignore_version: bool) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut map = HashMap::new();
        for (tx, gene) in pairs {
            let tx = if ignore_version { strip_version(&tx).to_string() } else { tx };
            if let Some(previous) = map.get(&tx) {
                if previous != &gene {
                    return Err(EdaError::InvalidAnnotation {
                        reason: format!("transcript '{}' maps to both '{}' and '{}'", tx, previous, gene),
                    });
                }
                continue;
            }
            map.insert(tx, gene);
        }
        Ok(Self { map, ignore_version })
    }

    /// Look up the gene of a transcript, applying version stripping if enabled
    pub fn gene_of(&self, transcript_id: &str) -> Option<&str> {
        let key = if self.ignore_version {
            strip_version(transcript_id)
        } else {
            transcript_id
        };
        self.map.get(key).map(|g| g.as_str())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of distinct genes
    pub fn n_genes(&self) -> usize {
        let mut genes: Vec<&String> = self.map.values().collect();
        genes.sort();
        genes.dedup();
        genes.len()
    }
}

/// Gene ID → gene symbol
#[derive(Debug, Clone, Default)]
pub struct GeneNameMap {
    names: HashMap<String, String>,
}

impl GeneNameMap {
    /// Build from pairs. An exact duplicate row is accepted, a conflicting
    /// second name for the same gene is an error.
    pub fn from_pairs<I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut names: HashMap<String, String> = HashMap::new();
        for (gene, name) in pairs {
            match names.get(&gene) {
                Some(existing) if existing != &name => {
                    return Err(EdaError::InvalidAnnotation {
                        reason: format!("gene '{}' has conflicting names '{}' and '{}'", gene, existing, name),
                    });
                }
                Some(_) => {}
                None => {
                    names.insert(gene, name);
                }
            }
        }
        Ok(Self { names })
    }

    pub fn name_of(&self, gene_id: &str) -> Option<&str> {
        self.names.get(gene_id).map(|n| n.as_str())
    }

    /// Name of a gene, or the gene ID itself when unnamed
    pub fn display_name<'a>(&'a self, gene_id: &'a str) -> &'a str {
        match self.names.get(gene_id) {
            Some(name) if !name.is_empty() => name,
            _ => gene_id,
        }
    }

    /// Resolve a query that is either a gene ID or a gene symbol.
    /// Symbols matching several IDs resolve to the lexically first ID.
    pub fn resolve<'a>(&'a self, query: &'a str) -> Option<&'a str> {
        if self.names.contains_key(query) {
            return Some(query);
        }
        self.names
            .iter()
            .filter(|(_, name)| name.as_str() == query)
            .map(|(id, _)| id.as_str())
            .min()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Read a transcript-to-gene table
pub fn read_transcript_gene_map<P: AsRef<Path>>(path: P, columns: &AnnotationColumns) -> Result<TranscriptGeneMap> {
    let (name, pairs) = read_pairs(path, columns)?;
    let map = TranscriptGeneMap::from_pairs(pairs, columns.ignore_version)?;
    log::info!(
        "Loaded {} transcripts for {} genes from {}",
        map.len(),
        map.n_genes(),
        name
    );
    Ok(map)
}

/// Read a gene-to-name table
pub fn read_gene_name_map<P: AsRef<Path>>(path: P, columns: &AnnotationColumns) -> Result<GeneNameMap> {
    let (name, mut pairs) = read_pairs(path, columns)?;
    if columns.ignore_version {
        for (gene, _) in pairs.iter_mut() {
            *gene = strip_version(gene).to_string();
        }
    }
    let map = GeneNameMap::from_pairs(pairs)?;
    log::info!("Loaded {} gene names from {}", map.len(), name);
    Ok(map)
}
