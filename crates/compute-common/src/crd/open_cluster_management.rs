//! Typed views of the open-cluster-management hub resources
//!
//! These CRDs are owned by the hub, not by this operator. Only the fields
//! the registration controller reads or writes are modelled; everything
//! else round-trips through the API server untouched because writes are
//! server-side applies or deletes.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ClusterClaim, Condition, ManagedClusterVersion, ResourceList};

/// Condition type a ManagedCluster reports once its agent completed the handshake
pub const MANAGED_CLUSTER_JOINED: &str = "ManagedClusterJoined";

/// Condition type a ManifestWork reports once its manifests were applied
pub const MANIFEST_WORK_APPLIED: &str = "Applied";

/// ManagedCluster represents a cluster joined (or joining) the hub.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1",
    kind = "ManagedCluster",
    status = "ManagedClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    /// Whether the hub accepts the cluster's registration
    #[serde(default)]
    pub hub_accepts_client: bool,

    /// API endpoints of the managed cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_cluster_client_configs: Option<Vec<ClientConfig>>,

    /// Lease renewal interval for the cluster agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_duration_seconds: Option<i32>,
}

/// Endpoint of a managed cluster's API server
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// API server URL
    #[serde(default)]
    pub url: String,

    /// PEM CA bundle, base64 encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
}

/// Status reported by the hub for a ManagedCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterStatus {
    /// Join/availability conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Total capacity of the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<ResourceList>,

    /// Allocatable resources of the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocatable: Option<ResourceList>,

    /// Kubernetes version of the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<ManagedClusterVersion>,

    /// Claims reported by the cluster agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_claims: Option<Vec<ClusterClaim>>,
}

impl ManagedCluster {
    /// URL of the first client config, if any
    pub fn first_api_url(&self) -> Option<&str> {
        self.spec
            .managed_cluster_client_configs
            .as_deref()
            .and_then(|configs| configs.first())
            .map(|config| config.url.as_str())
            .filter(|url| !url.is_empty())
    }

    /// Conditions reported in status (empty if none)
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }
}

/// ManifestWork is a bundle of manifests the hub delivers onto a managed cluster.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "work.open-cluster-management.io",
    version = "v1",
    kind = "ManifestWork",
    namespaced,
    status = "ManifestWorkStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ManifestWorkSpec {
    /// Manifests to deliver
    #[serde(default)]
    pub workload: ManifestsTemplate,
}

/// Manifests carried by a ManifestWork
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ManifestsTemplate {
    /// Raw Kubernetes objects
    #[serde(default)]
    pub manifests: Vec<serde_json::Value>,
}

/// Delivery status of a ManifestWork
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestWorkStatus {
    /// Applied/Available/Degraded conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Per-manifest status, left opaque
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_status: Option<serde_json::Value>,
}

/// ManagedClusterAddOn installs an addon agent on a managed cluster.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "addon.open-cluster-management.io",
    version = "v1alpha1",
    kind = "ManagedClusterAddOn",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterAddOnSpec {
    /// Namespace the addon agent is installed into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_namespace: Option<String>,
}

/// ManagedServiceAccount projects a service account token from a managed cluster to the hub.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "authentication.open-cluster-management.io",
    version = "v1alpha1",
    kind = "ManagedServiceAccount",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedServiceAccountSpec {
    /// Token rotation settings, left opaque
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<serde_json::Value>,
}
