//! Shared Kubernetes utilities using kube-rs
//!
//! Correlation-label helpers tie hub-side objects back to the RegisteredCluster
//! that caused them, since owner references cannot cross cluster boundaries.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, ResourceExt};

use crate::crd::RegisteredCluster;
use crate::{
    Error, REGISTERED_CLUSTER_NAMESPACE_LABEL, REGISTERED_CLUSTER_NAME_LABEL,
    REGISTERED_CLUSTER_UID_LABEL,
};

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity of a RegisteredCluster as carried by correlation labels
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    /// RegisteredCluster name
    pub name: String,
    /// RegisteredCluster namespace
    pub namespace: String,
}

impl CorrelationKey {
    /// Key of the given RegisteredCluster
    pub fn of(cluster: &RegisteredCluster) -> Self {
        Self {
            name: cluster.name_any(),
            namespace: cluster.namespace().unwrap_or_default(),
        }
    }

    /// Read the key back off a derived object's labels
    ///
    /// Returns `None` unless both the name and namespace labels are present.
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Option<Self> {
        let name = labels.get(REGISTERED_CLUSTER_NAME_LABEL)?;
        let namespace = labels.get(REGISTERED_CLUSTER_NAMESPACE_LABEL)?;
        Some(Self {
            name: name.clone(),
            namespace: namespace.clone(),
        })
    }

    /// The name/namespace label pair
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (REGISTERED_CLUSTER_NAME_LABEL.to_string(), self.name.clone()),
            (
                REGISTERED_CLUSTER_NAMESPACE_LABEL.to_string(),
                self.namespace.clone(),
            ),
        ])
    }

    /// Label selector matching both correlation labels
    pub fn selector(&self) -> String {
        format!(
            "{}={},{}={}",
            REGISTERED_CLUSTER_NAME_LABEL,
            self.name,
            REGISTERED_CLUSTER_NAMESPACE_LABEL,
            self.namespace
        )
    }
}

impl std::fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Correlation labels for objects derived from `cluster`, including the UID label when known
pub fn correlation_labels(cluster: &RegisteredCluster) -> BTreeMap<String, String> {
    let mut labels = CorrelationKey::of(cluster).labels();
    if let Some(uid) = cluster.uid() {
        labels.insert(REGISTERED_CLUSTER_UID_LABEL.to_string(), uid);
    }
    labels
}

/// Returns true if both correlation labels are present
pub fn has_correlation_labels(labels: &BTreeMap<String, String>) -> bool {
    CorrelationKey::from_labels(labels).is_some()
}

/// Map a 404 to `Ok(None)`
pub fn ignore_not_found<T>(
    result: std::result::Result<T, kube::Error>,
) -> std::result::Result<Option<T>, kube::Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(e),
    }
}

/// Load client configuration from an optional kubeconfig path and context
///
/// Without a path the configuration is inferred (in-cluster, then `$KUBECONFIG`).
pub async fn load_config(kubeconfig: Option<&Path>, context: Option<&str>) -> Result<Config, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "load_config",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            let options = KubeConfigOptions {
                context: context.map(str::to_string),
                ..Default::default()
            };
            Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "load_config",
                        format!("failed to load kubeconfig {}: {}", path.display(), e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("load_config", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Ok(config)
}

/// Create a kube client from a loaded configuration
pub fn create_client(config: Config) -> Result<Client, Error> {
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}
