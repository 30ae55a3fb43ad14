//! Core data structures: count matrices and sample tables

mod collapse;
mod count_matrix;
mod sample_table;

pub use collapse::{collapse_replicates, RUNS_COLLAPSED};
pub use count_matrix::CountMatrix;
pub use sample_table::{natural_cmp, Factor, SampleTable};
