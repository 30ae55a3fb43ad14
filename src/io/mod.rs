//! Input/Output: delimited tables, matrices and JSON

mod delimited;
mod tables;
mod writers;

pub use delimited::{detect_delimiter, DelimitedTable};
pub use tables::{read_count_matrix, read_sample_table};
pub use writers::{write_columns, write_json, write_matrix};
