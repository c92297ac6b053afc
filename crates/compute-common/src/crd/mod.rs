//! Custom Resource Definitions used by the compute operator
//!
//! `RegisteredCluster` is the only CRD this operator owns. The
//! open-cluster-management kinds are typed views of hub resources.

mod open_cluster_management;
mod registered_cluster;
mod types;

pub use open_cluster_management::{
    ClientConfig, ManagedCluster, ManagedClusterAddOn, ManagedClusterAddOnSpec,
    ManagedClusterSpec, ManagedClusterStatus, ManagedServiceAccount, ManagedServiceAccountSpec,
    ManifestWork, ManifestWorkSpec, ManifestWorkStatus, ManifestsTemplate,
    MANAGED_CLUSTER_JOINED, MANIFEST_WORK_APPLIED,
};
pub use registered_cluster::{RegisteredCluster, RegisteredClusterSpec, RegisteredClusterStatus};
pub use types::{
    find_condition, is_condition_true, merge_conditions, ClusterClaim, Condition,
    ConditionStatus, LocalObjectReference, ManagedClusterVersion, ResourceList,
};
