//! RegisteredCluster CRD
//!
//! A RegisteredCluster is a tenant's request to onboard a workload cluster.
//! The operator turns it into a hub-side ManagedCluster, an import command the
//! user runs on the physical cluster, and a syncer deployment that bridges
//! the cluster back into the tenant's workspace.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    ClusterClaim, Condition, LocalObjectReference, ManagedClusterVersion, ResourceList,
};

/// RegisteredCluster expresses the intent to register a cluster into a workspace.
///
/// Example:
/// ```yaml
/// apiVersion: singapore.open-cluster-management.io/v1alpha1
/// kind: RegisteredCluster
/// metadata:
///   name: cluster-1
///   namespace: team-a
/// spec:
///   location: root:team-a
///   clusterName: edge-cluster
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "singapore.open-cluster-management.io",
    version = "v1alpha1",
    kind = "RegisteredCluster",
    namespaced,
    status = "RegisteredClusterStatus",
    shortname = "rc",
    printcolumn = r#"{"name":"Location","type":"string","jsonPath":".spec.location"}"#,
    printcolumn = r#"{"name":"API URL","type":"string","jsonPath":".status.apiURL"}"#,
    printcolumn = r#"{"name":"Cluster ID","type":"string","jsonPath":".status.clusterID"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredClusterSpec {
    /// Workspace the cluster is registered into (e.g. `root:team-a`)
    #[serde(default)]
    pub location: String,

    /// Display name propagated to derived objects; not a correlation key
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,
}

/// Observed state of a RegisteredCluster, projected from its ManagedCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredClusterStatus {
    /// Conditions merged by type from the ManagedCluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Allocatable resources of the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocatable: Option<ResourceList>,

    /// Total capacity of the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<ResourceList>,

    /// Claims reported by the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_claims: Option<Vec<ClusterClaim>>,

    /// Kubernetes version of the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<ManagedClusterVersion>,

    /// API server URL of the cluster
    #[serde(rename = "apiURL", default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Cluster identifier reported by the cluster agent
    #[serde(rename = "clusterID", default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,

    /// Secret holding the command that imports the cluster into the hub
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_command_ref: Option<LocalObjectReference>,
}

impl RegisteredCluster {
    /// `namespace/name` key used in logs and error messages
    pub fn key(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().unwrap_or_default(),
            self.name_any()
        )
    }

    /// Returns true once deletion has been requested
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Status, or an empty one if none has been written yet
    pub fn status_or_default(&self) -> RegisteredClusterStatus {
        self.status.clone().unwrap_or_default()
    }
}
