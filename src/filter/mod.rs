//! Gene filtering ahead of normalization

mod low_count;

pub use low_count::{filter_low_counts, LowCountFilter};
