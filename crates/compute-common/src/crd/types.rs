//! Supporting types shared by the RegisteredCluster and hub CRDs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Resource quantities keyed by resource name (e.g. `cpu`, `memory`)
///
/// Quantities are kept as their string form; they are copied, never
/// interpreted.
pub type ResourceList = BTreeMap<String, String>;

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
///
/// Matches the shape of `metav1.Condition` so conditions reported by
/// open-cluster-management objects deserialize without loss.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., ManagedClusterJoined)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,

    /// Generation the condition was computed against
    #[serde(
        rename = "observedGeneration",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
            observed_generation: None,
        }
    }

    /// Returns true if the condition status is True
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Returns true if a condition of the given type exists and is True
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(Condition::is_true)
}

/// Merge incoming conditions into an existing list, keyed by type
///
/// Conditions absent from `incoming` are kept. A condition whose status did
/// not change keeps its original `lastTransitionTime`; everything else about
/// it is taken from the incoming report.
pub fn merge_conditions(existing: &[Condition], incoming: &[Condition]) -> Vec<Condition> {
    let mut merged = existing.to_vec();
    for condition in incoming {
        match merged.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(current) => {
                let last_transition_time = if current.status == condition.status {
                    current.last_transition_time
                } else {
                    condition.last_transition_time
                };
                *current = Condition {
                    last_transition_time,
                    ..condition.clone()
                };
            }
            None => merged.push(condition.clone()),
        }
    }
    merged
}

/// A name/value fact reported by a managed cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ClusterClaim {
    /// Claim name
    #[serde(default)]
    pub name: String,
    /// Claim value
    #[serde(default)]
    pub value: String,
}

/// Version information reported by a managed cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ManagedClusterVersion {
    /// Kubernetes version string
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kubernetes: String,
}

impl ManagedClusterVersion {
    /// A version with no fields set carries no information
    pub fn is_zero(&self) -> bool {
        self.kubernetes.is_empty()
    }
}

/// Reference to an object in the same namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct LocalObjectReference {
    /// Name of the referent
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn condition_at(type_: &str, status: ConditionStatus, secs: i64) -> Condition {
        Condition {
            last_transition_time: Utc.timestamp_opt(secs, 0).single().unwrap(),
            ..Condition::new(type_, status, "Reason", "message")
        }
    }

    /// Story: conditions from the hub never erase the ones recorded earlier
    #[test]
    fn story_merge_keeps_conditions_not_reported_downstream() {
        let existing = vec![condition_at("A", ConditionStatus::True, 10)];
        let incoming = vec![condition_at("B", ConditionStatus::True, 20)];

        let merged = merge_conditions(&existing, &incoming);

        assert_eq!(merged.len(), 2);
        assert!(is_condition_true(&merged, "A"));
        assert!(is_condition_true(&merged, "B"));
    }

    #[test]
    fn merge_replaces_by_type_without_duplicates() {
        let existing = vec![condition_at("Joined", ConditionStatus::False, 10)];
        let incoming = vec![condition_at("Joined", ConditionStatus::True, 20)];

        let merged = merge_conditions(&existing, &incoming);

        assert_eq!(merged.len(), 1);
        assert!(merged[0].is_true());
        assert_eq!(merged[0].last_transition_time.timestamp(), 20);
    }

    #[test]
    fn merge_preserves_transition_time_when_status_is_unchanged() {
        let existing = vec![condition_at("Available", ConditionStatus::True, 10)];
        let mut update = condition_at("Available", ConditionStatus::True, 99);
        update.message = "still fine".to_string();

        let merged = merge_conditions(&existing, &[update]);

        assert_eq!(merged[0].last_transition_time.timestamp(), 10);
        assert_eq!(merged[0].message, "still fine");
    }

    #[test]
    fn metav1_condition_without_reason_deserializes() {
        let json = serde_json::json!({
            "type": "ManagedClusterJoined",
            "status": "True",
            "lastTransitionTime": "2024-01-01T00:00:00Z",
            "observedGeneration": 3
        });
        let condition: Condition = serde_json::from_value(json).unwrap();
        assert!(condition.is_true());
        assert_eq!(condition.reason, "");
        assert_eq!(condition.observed_generation, Some(3));
    }

    #[test]
    fn missing_condition_is_not_true() {
        assert!(!is_condition_true(&[], "Joined"));
        assert!(find_condition(&[], "Joined").is_none());
    }

    #[test]
    fn zero_version_is_detected() {
        assert!(ManagedClusterVersion::default().is_zero());
        let v = ManagedClusterVersion {
            kubernetes: "v1.29.1".to_string(),
        };
        assert!(!v.is_zero());
    }
}
