//! Compute operator: registers workload clusters with open-cluster-management hubs

#![deny(missing_docs)]

/// Command line and hub configuration
pub mod config;
/// Controller wiring: watch streams, event filters and secondary-event mapping
pub mod controller_runner;
