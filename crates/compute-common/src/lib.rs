//! Common types for the compute operator: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod telemetry;
pub mod template;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for every server-side apply and status patch
pub const FIELD_MANAGER: &str = "compute-operator";

/// Finalizer guarding RegisteredCluster removal until the derived graph is gone
pub const REGISTERED_CLUSTER_FINALIZER: &str =
    "registeredcluster.singapore.open-cluster-management.io/cleanup";

/// Correlation label carrying the owning RegisteredCluster name
pub const REGISTERED_CLUSTER_NAME_LABEL: &str =
    "registeredcluster.singapore.open-cluster-management.io/name";

/// Correlation label carrying the owning RegisteredCluster namespace
pub const REGISTERED_CLUSTER_NAMESPACE_LABEL: &str =
    "registeredcluster.singapore.open-cluster-management.io/namespace";

/// Optional correlation label carrying the owning RegisteredCluster UID
pub const REGISTERED_CLUSTER_UID_LABEL: &str =
    "registeredcluster.singapore.open-cluster-management.io/uid";

/// Label binding a ManagedCluster to its ManagedClusterSet
pub const MANAGED_CLUSTER_SET_LABEL: &str = "cluster.open-cluster-management.io/clusterset";

/// Label on a ManagedCluster holding the cluster identifier reported by the agent
pub const CLUSTER_ID_LABEL: &str = "clusterID";

/// Annotation marking ManagedClusters created on behalf of the compute service
pub const SERVICE_NAME_ANNOTATION: &str = "open-cluster-management/service-name";

/// Value of [`SERVICE_NAME_ANNOTATION`]
pub const SERVICE_NAME: &str = "compute";

/// Environment variable overriding the syncer image
pub const SYNCER_IMAGE_ENV: &str = "KCP_SYNCER_IMAGE";

/// Syncer image used when [`SYNCER_IMAGE_ENV`] is unset
pub const DEFAULT_SYNCER_IMAGE: &str = "ghcr.io/kcp-dev/kcp/syncer:main";
