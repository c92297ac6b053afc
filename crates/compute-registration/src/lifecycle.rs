//! Idempotent get/create primitives for derived objects
//!
//! Hub-side ManagedClusters have generated names, so they are found by their
//! correlation labels rather than by name. Listing before creating keeps
//! repeated reconciles from producing a second ManagedCluster.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use tracing::{debug, info};

use compute_common::crd::{ManagedCluster, ManagedClusterSpec, RegisteredCluster};
use compute_common::kube_utils::{correlation_labels, CorrelationKey};
use compute_common::{
    Error, MANAGED_CLUSTER_SET_LABEL, SERVICE_NAME, SERVICE_NAME_ANNOTATION,
};

use crate::client::{HubClient, WorkspaceClient};

/// Prefix of generated ManagedCluster names
pub const MANAGED_CLUSTER_NAME_PREFIX: &str = "registered-cluster-";

/// Name of the syncer service account in every workspace
pub const SYNCER_SERVICE_ACCOUNT: &str = "kcp-syncer-sa";

/// Namespace of the syncer service account in every workspace
pub const SYNCER_SERVICE_ACCOUNT_NAMESPACE: &str = "default";

/// Secret type carrying a service account token
pub const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";

const MANAGED_CLUSTER_KIND: &str = "ManagedCluster";

/// ManagedCluster to create for `cluster`
///
/// The name is generated by the API server. The cluster joins the cluster
/// set named after the tenant namespace.
pub fn desired_managed_cluster(cluster: &RegisteredCluster) -> ManagedCluster {
    let mut labels = correlation_labels(cluster);
    labels.insert(
        MANAGED_CLUSTER_SET_LABEL.to_string(),
        cluster.namespace().unwrap_or_default(),
    );

    ManagedCluster {
        metadata: ObjectMeta {
            generate_name: Some(MANAGED_CLUSTER_NAME_PREFIX.to_string()),
            labels: Some(labels),
            annotations: Some(BTreeMap::from([(
                SERVICE_NAME_ANNOTATION.to_string(),
                SERVICE_NAME.to_string(),
            )])),
            ..Default::default()
        },
        spec: ManagedClusterSpec {
            hub_accepts_client: true,
            ..Default::default()
        },
        status: None,
    }
}

/// Create the ManagedCluster for `cluster` unless one already carries its correlation labels
pub async fn ensure_managed_cluster(
    hub: &dyn HubClient,
    cluster: &RegisteredCluster,
) -> Result<(), Error> {
    let key = CorrelationKey::of(cluster);
    let existing = hub.list_managed_clusters(&key.selector()).await?;
    if !existing.is_empty() {
        debug!(owner = %key, count = existing.len(), "managed cluster already exists");
        return Ok(());
    }

    let created = hub
        .create_managed_cluster(&desired_managed_cluster(cluster))
        .await?;
    info!(owner = %key, managed_cluster = %created.name_any(), "created managed cluster");
    Ok(())
}

/// The ManagedCluster correlated with `cluster`
///
/// Returns `Ok(None)` only when nothing matches and `cluster` is being
/// deleted. Nothing matching otherwise is [`Error::NotFoundYet`]; more than
/// one match is [`Error::DuplicateCorrelation`].
pub async fn get_managed_cluster(
    hub: &dyn HubClient,
    cluster: &RegisteredCluster,
) -> Result<Option<ManagedCluster>, Error> {
    let key = CorrelationKey::of(cluster);
    let mut found = hub.list_managed_clusters(&key.selector()).await?;
    match found.len() {
        0 if cluster.is_deleting() => Ok(None),
        0 => Err(Error::not_found_yet(MANAGED_CLUSTER_KIND, key.to_string())),
        1 => Ok(found.pop()),
        count => Err(Error::duplicate(MANAGED_CLUSTER_KIND, key.to_string(), count)),
    }
}

/// Get or create the syncer service account in the workspace at `location`
pub async fn ensure_syncer_identity(
    workspace: &dyn WorkspaceClient,
    location: &str,
) -> Result<ServiceAccount, Error> {
    if let Some(account) = workspace
        .get_service_account(location, SYNCER_SERVICE_ACCOUNT_NAMESPACE, SYNCER_SERVICE_ACCOUNT)
        .await?
    {
        return Ok(account);
    }

    let account = ServiceAccount {
        metadata: ObjectMeta {
            name: Some(SYNCER_SERVICE_ACCOUNT.to_string()),
            namespace: Some(SYNCER_SERVICE_ACCOUNT_NAMESPACE.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    let created = workspace.create_service_account(location, &account).await?;
    info!(location, service_account = SYNCER_SERVICE_ACCOUNT, "created syncer service account");
    Ok(created)
}

fn token_of(secret: &Secret) -> Option<String> {
    if secret.type_.as_deref() != Some(SERVICE_ACCOUNT_TOKEN_TYPE) {
        return None;
    }
    let token = secret.data.as_ref()?.get("token")?;
    if token.0.is_empty() {
        return None;
    }
    String::from_utf8(token.0.clone()).ok()
}

/// First non-empty token among the account's token secrets
///
/// Only secret references named with the account's name as prefix are
/// considered. No candidate yielding a token is [`Error::TokenNotIssued`].
pub async fn fetch_syncer_token(
    workspace: &dyn WorkspaceClient,
    location: &str,
    account: &ServiceAccount,
) -> Result<String, Error> {
    let account_name = account.name_any();
    let namespace = account
        .namespace()
        .unwrap_or_else(|| SYNCER_SERVICE_ACCOUNT_NAMESPACE.to_string());

    let candidates = account
        .secrets
        .iter()
        .flatten()
        .filter_map(|reference| reference.name.as_deref())
        .filter(|name| name.starts_with(&account_name));

    for name in candidates {
        let Some(secret) = workspace.get_secret(location, &namespace, name).await? else {
            debug!(location, secret = name, "token secret not found");
            continue;
        };
        if let Some(token) = token_of(&secret) {
            return Ok(token);
        }
    }

    Err(Error::token_not_issued(account_name, location))
}
