//! Sample similarity: distances, clustering and PCA

mod cluster;
mod distance;
mod pca;

pub use cluster::{hierarchical_cluster, Dendrogram, Linkage, Merge};
pub use distance::DistanceMatrix;
pub use pca::{pca, PcaConfig, PcaResult};
