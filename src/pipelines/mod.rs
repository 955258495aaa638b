pub mod batch_runner;
pub mod safe_cluster;
