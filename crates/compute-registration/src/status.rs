//! Projection of ManagedCluster state onto RegisteredCluster status
//!
//! Flow is one-way: hub truth overwrites status fields, never the reverse.
//! A field is only copied when the hub reports something for it, and
//! conditions are merged by type so conditions the hub does not report
//! survive.

use kube::ResourceExt;
use serde_json::{Map, Value};
use tracing::debug;

use compute_common::crd::{merge_conditions, ManagedCluster, RegisteredCluster, RegisteredClusterStatus};
use compute_common::{Error, CLUSTER_ID_LABEL};

use crate::client::ComputeClient;

/// Status of `current` after merging in what `managed` reports
pub fn project(current: &RegisteredClusterStatus, managed: &ManagedCluster) -> RegisteredClusterStatus {
    let mut next = current.clone();

    if let Some(hub) = &managed.status {
        if !hub.conditions.is_empty() {
            next.conditions = merge_conditions(&current.conditions, &hub.conditions);
        }
        if let Some(allocatable) = hub.allocatable.as_ref().filter(|r| !r.is_empty()) {
            next.allocatable = Some(allocatable.clone());
        }
        if let Some(capacity) = hub.capacity.as_ref().filter(|r| !r.is_empty()) {
            next.capacity = Some(capacity.clone());
        }
        if let Some(claims) = hub.cluster_claims.as_ref().filter(|c| !c.is_empty()) {
            next.cluster_claims = Some(claims.clone());
        }
        if let Some(version) = hub.version.as_ref().filter(|v| !v.is_zero()) {
            next.version = Some(version.clone());
        }
    }

    if let Some(url) = managed.first_api_url() {
        next.api_url = Some(url.to_string());
    }
    if let Some(id) = managed.labels().get(CLUSTER_ID_LABEL).filter(|id| !id.is_empty()) {
        next.cluster_id = Some(id.clone());
    }

    next
}

fn as_object(status: &RegisteredClusterStatus) -> Result<Map<String, Value>, Error> {
    match serde_json::to_value(status)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::serialization_for_kind(
            "RegisteredCluster",
            format!("status serialized to {} instead of an object", other),
        )),
    }
}

/// Merge patch turning `before` into `after`, or `None` when they serialize identically
///
/// Only top-level fields that differ are included. Fields that disappeared
/// are nulled.
pub fn status_patch(
    before: &RegisteredClusterStatus,
    after: &RegisteredClusterStatus,
) -> Result<Option<Value>, Error> {
    let before = as_object(before)?;
    let after = as_object(after)?;

    let mut patch = Map::new();
    for (field, value) in &after {
        if before.get(field) != Some(value) {
            patch.insert(field.clone(), value.clone());
        }
    }
    for field in before.keys() {
        if !after.contains_key(field) {
            patch.insert(field.clone(), Value::Null);
        }
    }

    Ok((!patch.is_empty()).then_some(Value::Object(patch)))
}

/// Project `managed` onto `cluster` and persist the changes, if any
///
/// Returns the stored object after the write, or `cluster` unchanged when
/// nothing differed.
pub async fn project_status(
    compute: &dyn ComputeClient,
    cluster: &RegisteredCluster,
    managed: &ManagedCluster,
) -> Result<RegisteredCluster, Error> {
    let before = cluster.status_or_default();
    let after = project(&before, managed);

    match status_patch(&before, &after)? {
        Some(patch) => {
            debug!(
                registered_cluster = %cluster.key(),
                managed_cluster = %managed.name_any(),
                "projecting managed cluster status"
            );
            compute.patch_status(cluster, &patch).await
        }
        None => Ok(cluster.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockComputeClient;
    use compute_common::crd::{
        ClientConfig, ClusterClaim, Condition, ConditionStatus, ManagedClusterSpec,
        ManagedClusterStatus, ManagedClusterVersion, RegisteredClusterSpec,
    };
    use std::collections::BTreeMap;

    fn managed(status: ManagedClusterStatus) -> ManagedCluster {
        let mut mc = ManagedCluster::new("registered-cluster-x", ManagedClusterSpec::default());
        mc.status = Some(status);
        mc
    }

    fn condition(type_: &str, status: ConditionStatus) -> Condition {
        Condition::new(type_, status, type_, "")
    }

    /// Story: conditions the hub does not report are kept next to the ones it does
    #[test]
    fn story_status_merge_is_non_destructive() {
        let current = RegisteredClusterStatus {
            conditions: vec![condition("A", ConditionStatus::True)],
            ..Default::default()
        };
        let mc = managed(ManagedClusterStatus {
            conditions: vec![condition("B", ConditionStatus::True)],
            ..Default::default()
        });

        let next = project(&current, &mc);
        let types: Vec<&str> = next.conditions.iter().map(|c| c.type_.as_str()).collect();
        assert_eq!(types, vec!["A", "B"]);
        assert!(next.conditions.iter().all(Condition::is_true));
    }

    #[test]
    fn empty_hub_fields_leave_status_alone() {
        let current = RegisteredClusterStatus {
            capacity: Some(BTreeMap::from([("cpu".to_string(), "4".to_string())])),
            version: Some(ManagedClusterVersion {
                kubernetes: "v1.28.0".to_string(),
            }),
            api_url: Some("https://old:6443".to_string()),
            ..Default::default()
        };
        let mc = managed(ManagedClusterStatus {
            capacity: Some(BTreeMap::new()),
            version: Some(ManagedClusterVersion::default()),
            cluster_claims: Some(vec![]),
            ..Default::default()
        });

        assert_eq!(project(&current, &mc), current);
    }

    #[test]
    fn hub_truth_overwrites_projected_fields() {
        let mut mc = managed(ManagedClusterStatus {
            allocatable: Some(BTreeMap::from([("cpu".to_string(), "7".to_string())])),
            capacity: Some(BTreeMap::from([("cpu".to_string(), "8".to_string())])),
            cluster_claims: Some(vec![ClusterClaim {
                name: "id.k8s.io".to_string(),
                value: "abc".to_string(),
            }]),
            version: Some(ManagedClusterVersion {
                kubernetes: "v1.29.1".to_string(),
            }),
            ..Default::default()
        });
        mc.spec.managed_cluster_client_configs = Some(vec![ClientConfig {
            url: "https://10.0.0.1:6443".to_string(),
            ca_bundle: None,
        }]);
        mc.labels_mut()
            .insert(CLUSTER_ID_LABEL.to_string(), "cluster-id-1".to_string());

        let current = RegisteredClusterStatus {
            api_url: Some("https://stale:6443".to_string()),
            ..Default::default()
        };
        let next = project(&current, &mc);
        assert_eq!(next.api_url.as_deref(), Some("https://10.0.0.1:6443"));
        assert_eq!(next.cluster_id.as_deref(), Some("cluster-id-1"));
        assert_eq!(next.allocatable.unwrap()["cpu"], "7");
        assert_eq!(next.capacity.unwrap()["cpu"], "8");
        assert_eq!(next.cluster_claims.unwrap().len(), 1);
        assert_eq!(next.version.unwrap().kubernetes, "v1.29.1");
    }

    #[test]
    fn patch_contains_only_changed_fields() {
        let before = RegisteredClusterStatus {
            capacity: Some(BTreeMap::from([("cpu".to_string(), "4".to_string())])),
            ..Default::default()
        };
        let after = RegisteredClusterStatus {
            api_url: Some("https://10.0.0.1:6443".to_string()),
            ..before.clone()
        };

        let patch = status_patch(&before, &after).unwrap().unwrap();
        assert_eq!(patch, serde_json::json!({"apiURL": "https://10.0.0.1:6443"}));
        assert!(status_patch(&after, &after).unwrap().is_none());
    }

    #[test]
    fn removed_fields_are_nulled() {
        let before = RegisteredClusterStatus {
            cluster_id: Some("x".to_string()),
            ..Default::default()
        };
        let patch = status_patch(&before, &RegisteredClusterStatus::default())
            .unwrap()
            .unwrap();
        assert_eq!(patch, serde_json::json!({"clusterID": null}));
    }

    fn registered() -> RegisteredCluster {
        let mut rc = RegisteredCluster::new("cluster-1", RegisteredClusterSpec::default());
        rc.metadata.namespace = Some("team-a".to_string());
        rc
    }

    #[tokio::test]
    async fn unchanged_status_is_not_written() {
        let mut compute = MockComputeClient::new();
        compute.expect_patch_status().never();

        let rc = registered();
        let mc = ManagedCluster::new("registered-cluster-x", ManagedClusterSpec::default());
        let stored = project_status(&compute, &rc, &mc).await.unwrap();
        assert_eq!(stored.name_any(), rc.name_any());
        assert!(stored.status.is_none());
    }

    #[tokio::test]
    async fn changed_status_is_patched_once() {
        let mut compute = MockComputeClient::new();
        compute
            .expect_patch_status()
            .withf(|_, patch| patch["conditions"][0]["type"] == "ManagedClusterJoined")
            .times(1)
            .returning(|rc, _| Ok(rc.clone()));

        let mc = managed(ManagedClusterStatus {
            conditions: vec![condition("ManagedClusterJoined", ConditionStatus::True)],
            ..Default::default()
        });
        project_status(&compute, &registered(), &mc).await.unwrap();
    }
}
