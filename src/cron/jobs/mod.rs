pub mod fx_rate;
pub mod partitions;
pub mod rollup_matrices;
