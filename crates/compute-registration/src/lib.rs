//! RegisteredCluster reconciliation
//!
//! Turns a RegisteredCluster into a ManagedCluster on the hub that serves its
//! namespace, publishes the import command for it, and deploys a syncer that
//! connects the cluster to the RegisteredCluster's workspace. Deletion tears
//! the hub objects down in dependency order before the finalizer is released.

#![deny(missing_docs)]

pub mod client;
pub mod controller;
pub mod deletion;
pub mod filter;
pub mod hub;
pub mod import;
pub mod lifecycle;
pub mod manifests;
pub mod status;
pub mod syncer;

#[cfg(test)]
mod testing;

pub use client::{
    ComputeClient, ComputeClientImpl, HubClient, HubClientImpl, WorkspaceClient,
    WorkspaceClientImpl,
};
pub use controller::{error_policy, reconcile, Context, ContextBuilder};
pub use filter::{filter_events, owner_of, EventFilter};
pub use hub::{HubInstance, HubRegistry};
