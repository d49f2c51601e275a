//! Command handlers invoked by the binary.

pub mod migrate;

pub use migrate::run_migration;
