//! Syncer identity and deployment descriptor
//!
//! The syncer authenticates into the tenant workspace with a service
//! account token, so its identity and RBAC live in the workspace. The
//! deployment itself is delivered to the managed cluster by a ManifestWork
//! on the hub, created only once the ManagedCluster has joined.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use kube::ResourceExt;
use serde::Serialize;
use tracing::{debug, info};

use compute_common::crd::{
    is_condition_true, ManagedCluster, ManifestWork, RegisteredCluster, MANAGED_CLUSTER_JOINED,
    MANIFEST_WORK_APPLIED,
};
use compute_common::template::ManifestTemplates;
use compute_common::{
    Error, DEFAULT_SYNCER_IMAGE, REGISTERED_CLUSTER_NAMESPACE_LABEL,
    REGISTERED_CLUSTER_NAME_LABEL, SYNCER_IMAGE_ENV,
};

use crate::client::{HubClient, WorkspaceClient};
use crate::lifecycle::{
    ensure_syncer_identity, fetch_syncer_token, SYNCER_SERVICE_ACCOUNT,
    SYNCER_SERVICE_ACCOUNT_NAMESPACE,
};
use crate::manifests::{SYNCER_CLUSTER_ROLE, SYNCER_CLUSTER_ROLE_BINDING, SYNCER_MANIFEST_WORK};

/// Prefix shared by every syncer object name
pub const SYNCER_PREFIX: &str = "kcp-syncer";

/// Name of the syncer objects for a RegisteredCluster
pub fn syncer_name(registered_cluster: &str) -> String {
    format!("{}-{}", SYNCER_PREFIX, registered_cluster)
}

/// Syncer image from [`SYNCER_IMAGE_ENV`], falling back to [`DEFAULT_SYNCER_IMAGE`]
pub fn image_from_env() -> String {
    std::env::var(SYNCER_IMAGE_ENV)
        .ok()
        .filter(|image| !image.is_empty())
        .unwrap_or_else(|| DEFAULT_SYNCER_IMAGE.to_string())
}

/// Process-wide settings baked into every syncer descriptor
#[derive(Clone, Debug)]
pub struct SyncerSettings {
    /// Container image of the syncer
    pub image: String,
    /// Server hosting the workspaces
    pub workspace_server: http::Uri,
    /// Base64 PEM bundle the syncer trusts for the workspace server
    pub ca_data: Option<String>,
}

impl SyncerSettings {
    /// Settings for `workspace_server` with the image taken from the environment
    pub fn new(workspace_server: http::Uri) -> Self {
        Self {
            image: image_from_env(),
            workspace_server,
            ca_data: None,
        }
    }

    /// Override the syncer image
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Trust the given DER certificates when talking to the workspace server
    pub fn with_root_certs(mut self, certs: &[Vec<u8>]) -> Self {
        self.ca_data = (!certs.is_empty()).then(|| STANDARD.encode(pem_bundle(certs)));
        self
    }

    /// `scheme://authority` of the workspace server
    pub fn server_origin(&self) -> Result<String, Error> {
        server_origin(&self.workspace_server)
    }
}

/// `scheme://authority` of `uri`, dropping any path
pub fn server_origin(uri: &http::Uri) -> Result<String, Error> {
    match (uri.scheme_str(), uri.authority()) {
        (Some(scheme), Some(authority)) => Ok(format!("{}://{}", scheme, authority)),
        _ => Err(Error::configuration(format!(
            "workspace server {} must be an absolute URL",
            uri
        ))),
    }
}

/// PEM encoding of DER certificates, LF line endings
pub fn pem_bundle(certs: &[Vec<u8>]) -> String {
    let blocks: Vec<pem::Pem> = certs
        .iter()
        .map(|der| pem::Pem::new("CERTIFICATE", der.clone()))
        .collect();
    pem::encode_many_config(
        &blocks,
        pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
    )
}

#[derive(Serialize)]
struct RbacValues {
    syncer_name: String,
    sync_target_name: String,
    service_account: &'static str,
    service_account_namespace: &'static str,
    name_label: &'static str,
    namespace_label: &'static str,
    registered_cluster_name: String,
    registered_cluster_namespace: String,
}

#[derive(Serialize)]
struct SyncerValues<'a> {
    syncer_name: String,
    token: &'a str,
    server: String,
    sync_target_name: String,
    managed_cluster_name: String,
    name_label: &'static str,
    namespace_label: &'static str,
    registered_cluster_name: String,
    registered_cluster_namespace: String,
    logical_cluster: &'a str,
    image: &'a str,
    ca_data: Option<&'a str>,
}

/// ClusterRole and binding granting the syncer service account access to its sync target
pub fn syncer_rbac(
    templates: &ManifestTemplates,
    cluster: &RegisteredCluster,
) -> Result<(ClusterRole, ClusterRoleBinding), Error> {
    let name = cluster.name_any();
    let values = RbacValues {
        syncer_name: syncer_name(&name),
        sync_target_name: name.clone(),
        service_account: SYNCER_SERVICE_ACCOUNT,
        service_account_namespace: SYNCER_SERVICE_ACCOUNT_NAMESPACE,
        name_label: REGISTERED_CLUSTER_NAME_LABEL,
        namespace_label: REGISTERED_CLUSTER_NAMESPACE_LABEL,
        registered_cluster_name: name,
        registered_cluster_namespace: cluster.namespace().unwrap_or_default(),
    };
    Ok((
        templates.render_yaml(SYNCER_CLUSTER_ROLE, &values)?,
        templates.render_yaml(SYNCER_CLUSTER_ROLE_BINDING, &values)?,
    ))
}

/// ManifestWork deploying the syncer for `cluster` onto `managed`
pub fn syncer_manifest_work(
    templates: &ManifestTemplates,
    settings: &SyncerSettings,
    cluster: &RegisteredCluster,
    managed: &ManagedCluster,
    token: &str,
) -> Result<ManifestWork, Error> {
    let name = cluster.name_any();
    let values = SyncerValues {
        syncer_name: syncer_name(&name),
        token,
        server: settings.server_origin()?,
        sync_target_name: name.clone(),
        managed_cluster_name: managed.name_any(),
        name_label: REGISTERED_CLUSTER_NAME_LABEL,
        namespace_label: REGISTERED_CLUSTER_NAMESPACE_LABEL,
        registered_cluster_name: name,
        registered_cluster_namespace: cluster.namespace().unwrap_or_default(),
        logical_cluster: &cluster.spec.location,
        image: &settings.image,
        ca_data: settings.ca_data.as_deref(),
    };
    Ok(templates.render_yaml(SYNCER_MANIFEST_WORK, &values)?)
}

/// Ensure the syncer identity and RBAC exist in the workspace and return its token
pub async fn sync_syncer_identity(
    workspace: &dyn WorkspaceClient,
    templates: &ManifestTemplates,
    cluster: &RegisteredCluster,
) -> Result<String, Error> {
    let location = cluster.spec.location.as_str();
    if location.is_empty() {
        return Err(Error::configuration(format!(
            "RegisteredCluster {} has no location",
            cluster.key()
        )));
    }

    let account = ensure_syncer_identity(workspace, location).await?;
    let (role, binding) = syncer_rbac(templates, cluster)?;
    workspace.apply_cluster_role(location, &role).await?;
    workspace.apply_cluster_role_binding(location, &binding).await?;
    fetch_syncer_token(workspace, location, &account).await
}

/// Result of a syncer descriptor sync
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncerState {
    /// The ManagedCluster has not joined; nothing was applied
    NotJoined,
    /// The descriptor is applied; `applied` mirrors its Applied condition
    Deployed {
        /// The hub reports the manifests as applied on the managed cluster
        applied: bool,
    },
}

/// Apply the syncer descriptor once `managed` reports it joined the hub
pub async fn sync_syncer(
    hub: &dyn HubClient,
    templates: &ManifestTemplates,
    settings: &SyncerSettings,
    cluster: &RegisteredCluster,
    managed: &ManagedCluster,
    token: &str,
) -> Result<SyncerState, Error> {
    if !is_condition_true(managed.conditions(), MANAGED_CLUSTER_JOINED) {
        debug!(managed_cluster = %managed.name_any(), "managed cluster has not joined yet");
        return Ok(SyncerState::NotJoined);
    }

    let work = syncer_manifest_work(templates, settings, cluster, managed, token)?;
    let stored = hub.apply_manifest_work(&work).await?;
    let applied = stored
        .status
        .as_ref()
        .is_some_and(|s| is_condition_true(&s.conditions, MANIFEST_WORK_APPLIED));
    if applied {
        info!(manifest_work = %stored.name_any(), "syncer manifests applied");
    } else {
        debug!(manifest_work = %stored.name_any(), "syncer manifests not applied yet");
    }
    Ok(SyncerState::Deployed { applied })
}
