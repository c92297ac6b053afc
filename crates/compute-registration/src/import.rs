//! Import command artifact
//!
//! The hub's onboarding controller publishes `<managed-cluster>-import`
//! once the ManagedCluster exists. Its two payloads are rendered into a
//! command the user runs against the physical cluster, stored in a Secret
//! next to the RegisteredCluster and referenced from its status.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use tracing::{debug, info};

use compute_common::crd::{ManagedCluster, RegisteredCluster};
use compute_common::template::ManifestTemplates;
use compute_common::{Error, REGISTERED_CLUSTER_NAMESPACE_LABEL, REGISTERED_CLUSTER_NAME_LABEL};

use crate::client::{ComputeClient, HubClient};
use crate::manifests::IMPORT_SECRET;

/// Key of the CRD payload in the hub import secret
pub const CRDS_KEY: &str = "crdsv1.yaml";
/// Key of the agent payload in the hub import secret
pub const IMPORT_KEY: &str = "import.yaml";
/// Key of the rendered command in the RegisteredCluster's import secret
pub const IMPORT_COMMAND_KEY: &str = "importCommand";

/// Name of the hub import secret for a ManagedCluster
pub fn hub_import_secret_name(managed_cluster: &str) -> String {
    format!("{}-import", managed_cluster)
}

/// Name of the import command secret for a RegisteredCluster
pub fn import_command_secret_name(registered_cluster: &str) -> String {
    format!("{}-import", registered_cluster)
}

/// Two-step apply command: CRDs first, then the agent after a short pause
pub fn render_import_command(crds: &[u8], import: &[u8]) -> String {
    format!(
        "echo \"{}\" | base64 --decode | kubectl apply -f - && sleep 2 && echo \"{}\" | base64 --decode | kubectl apply -f -",
        STANDARD.encode(crds),
        STANDARD.encode(import)
    )
}

#[derive(Serialize)]
struct ImportSecretValues<'a> {
    secret_name: String,
    namespace: String,
    name_label: &'a str,
    namespace_label: &'a str,
    registered_cluster_name: String,
    import_command: &'a str,
}

/// Secret holding `command`, owned by `cluster`
pub fn import_command_secret(
    templates: &ManifestTemplates,
    cluster: &RegisteredCluster,
    command: &str,
) -> Result<Secret, Error> {
    let name = cluster.name_any();
    let values = ImportSecretValues {
        secret_name: import_command_secret_name(&name),
        namespace: cluster.namespace().unwrap_or_default(),
        name_label: REGISTERED_CLUSTER_NAME_LABEL,
        namespace_label: REGISTERED_CLUSTER_NAMESPACE_LABEL,
        registered_cluster_name: name,
        import_command: command,
    };
    let mut secret: Secret = templates.render_yaml(IMPORT_SECRET, &values)?;
    if let Some(owner) = cluster.controller_owner_ref(&()) {
        secret.metadata.owner_references = Some(vec![owner]);
    }
    Ok(secret)
}

/// Progress of the import command artifact
#[derive(Debug)]
pub enum ImportState {
    /// The hub has not published the import payloads yet
    Waiting,
    /// The command secret is applied and referenced; carries the stored RegisteredCluster
    Ready(Box<RegisteredCluster>),
}

/// Publish the import command for `cluster` once the hub import secret is complete
pub async fn sync_import_command(
    compute: &dyn ComputeClient,
    hub: &dyn HubClient,
    templates: &ManifestTemplates,
    cluster: &RegisteredCluster,
    managed: &ManagedCluster,
) -> Result<ImportState, Error> {
    let managed_name = managed.name_any();
    let Some(hub_secret) = hub
        .get_secret(&managed_name, &hub_import_secret_name(&managed_name))
        .await?
    else {
        debug!(managed_cluster = %managed_name, "hub import secret not published yet");
        return Ok(ImportState::Waiting);
    };

    let data = hub_secret.data.unwrap_or_default();
    let (Some(crds), Some(import)) = (data.get(CRDS_KEY), data.get(IMPORT_KEY)) else {
        debug!(managed_cluster = %managed_name, "hub import secret is incomplete");
        return Ok(ImportState::Waiting);
    };

    let command = render_import_command(&crds.0, &import.0);
    compute
        .apply_secret(&import_command_secret(templates, cluster, &command)?)
        .await?;

    let secret_name = import_command_secret_name(&cluster.name_any());
    let current = cluster
        .status
        .as_ref()
        .and_then(|s| s.import_command_ref.as_ref())
        .map(|r| r.name.as_str());
    if current == Some(secret_name.as_str()) {
        return Ok(ImportState::Ready(Box::new(cluster.clone())));
    }

    let patch = serde_json::json!({ "importCommandRef": { "name": secret_name } });
    let updated = compute.patch_status(cluster, &patch).await?;
    info!(registered_cluster = %cluster.key(), secret = %secret_name, "import command published");
    Ok(ImportState::Ready(Box::new(updated)))
}
