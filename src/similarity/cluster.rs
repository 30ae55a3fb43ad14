//! Agglomerative hierarchical clustering and dendrogram ordering

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::DistanceMatrix;
use crate::data::natural_cmp;
use crate::error::{EdaError, Result};

/// Linkage criterion for hierarchical clustering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Linkage {
    Single,
    #[default]
    Complete,
    Average,
}

impl std::str::FromStr for Linkage {
    type Err = EdaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(Linkage::Single),
            "complete" => Ok(Linkage::Complete),
            "average" => Ok(Linkage::Average),
            other => Err(EdaError::InvalidInput {
                reason: format!("unknown linkage '{}' (expected single, complete or average)", other),
            }),
        }
    }
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Linkage::Single => "single",
            Linkage::Complete => "complete",
            Linkage::Average => "average",
        };
        write!(f, "{}", name)
    }
}

/// One merge of the dendrogram
///
/// Node IDs below the number of leaves are leaves (sample indices); node
/// `n_leaves + k` is the cluster formed by merge `k`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub height: f64,
    pub size: usize,
}

/// Binary merge tree over labelled leaves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dendrogram {
    labels: Vec<String>,
    merges: Vec<Merge>,
}

/// Agglomerative clustering of a distance matrix
///
/// At each step the closest pair of active clusters merges; ties go to the
/// pair found first scanning clusters by their lowest sample index.
pub fn hierarchical_cluster(distances: &DistanceMatrix, linkage: Linkage) -> Result<Dendrogram> {
    let n = distances.n();
    if n == 0 {
        return Err(EdaError::EmptyData {
            reason: "cannot cluster zero samples".to_string(),
        });
    }

    let mut dist: Vec<Vec<f64>> = (0..n).map(|i| (0..n).map(|j| distances.get(i, j)).collect()).collect();
    let mut sizes = vec![1usize; n];
    let mut node_of: Vec<usize> = (0..n).collect();
    let mut active: Vec<usize> = (0..n).collect();
    let mut merges = Vec::with_capacity(n.saturating_sub(1));

    while active.len() > 1 {
        let mut best = (f64::INFINITY, 0, 0);
        for (ai, &a) in active.iter().enumerate() {
            for &b in &active[ai + 1..] {
                if dist[a][b] < best.0 {
                    best = (dist[a][b], a, b);
                }
            }
        }
        let (height, a, b) = best;
        if !height.is_finite() {
            return Err(EdaError::InvalidInput {
                reason: "distance matrix contains non-finite distances".to_string(),
            });
        }

        for &c in &active {
            if c == a || c == b {
                continue;
            }
            let merged = match linkage {
                Linkage::Single => dist[a][c].min(dist[b][c]),
                Linkage::Complete => dist[a][c].max(dist[b][c]),
                Linkage::Average => {
                    let (sa, sb) = (sizes[a] as f64, sizes[b] as f64);
                    (dist[a][c] * sa + dist[b][c] * sb) / (sa + sb)
                }
            };
            dist[a][c] = merged;
            dist[c][a] = merged;
        }

        sizes[a] += sizes[b];
        merges.push(Merge {
            left: node_of[a],
            right: node_of[b],
            height,
            size: sizes[a],
        });
        node_of[a] = n + merges.len() - 1;
        active.retain(|&c| c != b);
    }

    log::debug!(
        "{} linkage clustering of {} samples, root height {:.3}",
        linkage,
        n,
        merges.last().map(|m| m.height).unwrap_or(0.0)
    );
    Ok(Dendrogram {
        labels: distances.labels().to_vec(),
        merges,
    })
}

impl Dendrogram {
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn merges(&self) -> &[Merge] {
        &self.merges
    }

    pub fn n_leaves(&self) -> usize {
        self.labels.len()
    }

    /// Root node ID (the single leaf when there is only one)
    pub fn root(&self) -> usize {
        if self.merges.is_empty() {
            0
        } else {
            self.n_leaves() + self.merges.len() - 1
        }
    }

    pub fn is_leaf(&self, node: usize) -> bool {
        node < self.n_leaves()
    }

    /// Merge height of a node; leaves sit at 0
    pub fn height(&self, node: usize) -> f64 {
        if self.is_leaf(node) {
            0.0
        } else {
            self.merges[node - self.n_leaves()].height
        }
    }

    /// Children of an internal node in display order
    pub fn children(&self, node: usize) -> Option<(usize, usize)> {
        if self.is_leaf(node) {
            None
        } else {
            let m = &self.merges[node - self.n_leaves()];
            Some((m.left, m.right))
        }
    }

    /// Leaves in display order (left subtree before right)
    pub fn leaf_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.n_leaves());
        let mut stack = vec![self.root()];
        while let Some(node) = stack.pop() {
            match self.children(node) {
                Some((left, right)) => {
                    stack.push(right);
                    stack.push(left);
                }
                None => order.push(node),
            }
        }
        order
    }

    pub fn leaf_labels(&self) -> Vec<&str> {
        self.leaf_order().into_iter().map(|i| self.labels[i].as_str()).collect()
    }

    /// Reorder children so that at every node the tighter subtree comes first
    ///
    /// A subtree's tightness is the average height of its internal merges
    /// (0 for a leaf). Ties go to the subtree holding the smallest leaf
    /// label. Heights and memberships are unchanged; applying the sort
    /// again gives the same tree.
    pub fn leaf_sort(&self) -> Dendrogram {
        let n = self.n_leaves();
        let total = n + self.merges.len();
        let mut height_sum = vec![0.0; total];
        let mut internal = vec![0usize; total];
        let mut min_label: Vec<usize> = (0..total).map(|i| i.min(n.saturating_sub(1))).collect();

        let label_min = |a: usize, b: usize| -> usize {
            if natural_cmp(&self.labels[a], &self.labels[b]) == Ordering::Greater {
                b
            } else {
                a
            }
        };

        let mut merges = self.merges.clone();
        for (k, merge) in merges.iter_mut().enumerate() {
            let node = n + k;
            let (l, r) = (merge.left, merge.right);
            height_sum[node] = height_sum[l] + height_sum[r] + merge.height;
            internal[node] = internal[l] + internal[r] + 1;
            min_label[node] = label_min(min_label[l], min_label[r]);

            let avg = |c: usize| if internal[c] == 0 { 0.0 } else { height_sum[c] / internal[c] as f64 };
            let order = avg(l)
                .total_cmp(&avg(r))
                .then_with(|| natural_cmp(&self.labels[min_label[l]], &self.labels[min_label[r]]));
            if order == Ordering::Greater {
                merge.left = r;
                merge.right = l;
            }
        }

        Dendrogram {
            labels: self.labels.clone(),
            merges,
        }
    }

    /// Cluster label per leaf when the tree is cut into `k` clusters
    ///
    /// Labels count from 0 in order of each cluster's first sample.
    pub fn cut(&self, k: usize) -> Result<Vec<usize>> {
        let n = self.n_leaves();
        if k == 0 || k > n {
            return Err(EdaError::InvalidInput {
                reason: format!("cannot cut {} leaves into {} clusters", n, k),
            });
        }

        let mut parent: Vec<usize> = (0..n + self.merges.len()).collect();
        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }
        for (idx, merge) in self.merges.iter().take(n - k).enumerate() {
            let node = n + idx;
            let l = find(&mut parent, merge.left);
            let r = find(&mut parent, merge.right);
            parent[l] = node;
            parent[r] = node;
        }

        let mut roots: Vec<usize> = Vec::new();
        let mut labels = Vec::with_capacity(n);
        for leaf in 0..n {
            let root = find(&mut parent, leaf);
            let label = match roots.iter().position(|&r| r == root) {
                Some(pos) => pos,
                None => {
                    roots.push(root);
                    roots.len() - 1
                }
            };
            labels.push(label);
        }
        Ok(labels)
    }
}
