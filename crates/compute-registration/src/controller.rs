//! RegisteredCluster controller implementation
//!
//! This module contains the reconciliation logic for RegisteredCluster
//! resources. Every pass re-reads the object and walks the same sequence:
//! finalizer, ManagedCluster, teardown (when deleting), import command,
//! syncer identity, syncer descriptor, status projection.
//!
//! Waiting on another controller is never a sleep. A step that depends on
//! something not there yet returns a requeue and the next pass starts from
//! the top.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use kube::runtime::controller::Action;
use kube::{Client, Config, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use compute_common::crd::RegisteredCluster;
use compute_common::template::ManifestTemplates;
use compute_common::{Error, REGISTERED_CLUSTER_FINALIZER};

use crate::client::{ComputeClient, ComputeClientImpl, WorkspaceClient, WorkspaceClientImpl};
use crate::deletion::{teardown, Teardown};
use crate::hub::HubRegistry;
use crate::import::{sync_import_command, ImportState};
use crate::lifecycle::{ensure_managed_cluster, get_managed_cluster};
use crate::manifests::registration_templates;
use crate::status::project_status;
use crate::syncer::{sync_syncer, sync_syncer_identity, SyncerSettings, SyncerState};

/// Delay before checking again for the hub import artifact
pub const IMPORT_ARTIFACT_RETRY: Duration = Duration::from_secs(1);

/// Delay after an optimistic-concurrency conflict
pub const CONFLICT_RETRY: Duration = Duration::from_secs(1);

/// First error backoff delay
pub const BASE_BACKOFF: Duration = Duration::from_secs(5);

/// Upper bound of the error backoff delay
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Controller context containing shared state and clients
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(client, workspace_config, hubs)
///     .syncer_image(image)
///     .build()?;
/// ```
pub struct Context {
    /// Client for the cluster holding RegisteredCluster objects
    pub compute: Arc<dyn ComputeClient>,
    /// Client for tenant workspaces
    pub workspace: Arc<dyn WorkspaceClient>,
    /// Hub routing table, fixed at startup
    pub hubs: Arc<HubRegistry>,
    /// Rendered manifest templates
    pub templates: Arc<ManifestTemplates>,
    /// Settings baked into syncer descriptors
    pub syncer: SyncerSettings,
    failures: DashMap<String, u32>,
}

impl Context {
    /// Create a builder for constructing a Context
    ///
    /// `workspace_config` addresses the server hosting the tenant workspaces.
    pub fn builder(client: Client, workspace_config: Config, hubs: Arc<HubRegistry>) -> ContextBuilder {
        ContextBuilder::new(client, workspace_config, hubs)
    }

    /// Create a context for testing with custom clients
    #[cfg(test)]
    pub fn for_testing(
        compute: Arc<dyn ComputeClient>,
        workspace: Arc<dyn WorkspaceClient>,
        hubs: HubRegistry,
    ) -> Self {
        let templates = registration_templates().expect("embedded templates parse");
        Self {
            compute,
            workspace,
            hubs: Arc::new(hubs),
            templates: Arc::new(templates),
            syncer: SyncerSettings::new(http::Uri::from_static("https://kcp.example.com:6443"))
                .with_image("ghcr.io/kcp-dev/kcp/syncer:test"),
            failures: DashMap::new(),
        }
    }

    /// Record a failed reconcile of `key` and return the delay before the next attempt
    pub fn next_backoff(&self, key: &str) -> Duration {
        let mut failures = self.failures.entry(key.to_string()).or_insert(0);
        let delay = BASE_BACKOFF
            .saturating_mul(2u32.saturating_pow(*failures))
            .min(MAX_BACKOFF);
        *failures = failures.saturating_add(1);
        delay
    }

    /// Forget past failures of `key`
    pub fn reset_backoff(&self, key: &str) {
        self.failures.remove(key);
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    workspace_config: Config,
    hubs: Arc<HubRegistry>,
    compute: Option<Arc<dyn ComputeClient>>,
    workspace: Option<Arc<dyn WorkspaceClient>>,
    syncer_image: Option<String>,
    workspace_server: Option<http::Uri>,
}

impl ContextBuilder {
    fn new(client: Client, workspace_config: Config, hubs: Arc<HubRegistry>) -> Self {
        Self {
            client,
            workspace_config,
            hubs,
            compute: None,
            workspace: None,
            syncer_image: None,
            workspace_server: None,
        }
    }

    /// Override the compute client (primarily for testing)
    pub fn compute_client(mut self, compute: Arc<dyn ComputeClient>) -> Self {
        self.compute = Some(compute);
        self
    }

    /// Override the workspace client (primarily for testing)
    pub fn workspace_client(mut self, workspace: Arc<dyn WorkspaceClient>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    /// Override the syncer image
    pub fn syncer_image(mut self, image: impl Into<String>) -> Self {
        self.syncer_image = Some(image.into());
        self
    }

    /// Override the workspace server URL written into syncer kubeconfigs
    pub fn workspace_server(mut self, server: http::Uri) -> Self {
        self.workspace_server = Some(server);
        self
    }

    /// Build the Context
    pub fn build(self) -> Result<Context, Error> {
        let templates = registration_templates()?;

        let server = self
            .workspace_server
            .unwrap_or_else(|| self.workspace_config.cluster_url.clone());
        let mut syncer = SyncerSettings::new(server)
            .with_root_certs(self.workspace_config.root_cert.as_deref().unwrap_or_default());
        if let Some(image) = self.syncer_image {
            syncer = syncer.with_image(image);
        }
        syncer.server_origin()?;

        Ok(Context {
            compute: self
                .compute
                .unwrap_or_else(|| Arc::new(ComputeClientImpl::new(self.client.clone()))),
            workspace: self
                .workspace
                .unwrap_or_else(|| Arc::new(WorkspaceClientImpl::new(self.workspace_config))),
            hubs: self.hubs,
            templates: Arc::new(templates),
            syncer,
            failures: DashMap::new(),
        })
    }
}

fn has_finalizer(cluster: &RegisteredCluster) -> bool {
    cluster.finalizers().iter().any(|f| f == REGISTERED_CLUSTER_FINALIZER)
}

async fn add_finalizer(cluster: &RegisteredCluster, ctx: &Context) -> Result<RegisteredCluster, Error> {
    let mut finalizers = cluster.finalizers().to_vec();
    finalizers.push(REGISTERED_CLUSTER_FINALIZER.to_string());
    ctx.compute.patch_finalizers(cluster, &finalizers).await
}

async fn remove_finalizer(cluster: &RegisteredCluster, ctx: &Context) -> Result<(), Error> {
    let finalizers: Vec<String> = cluster
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != REGISTERED_CLUSTER_FINALIZER)
        .cloned()
        .collect();
    ctx.compute.patch_finalizers(cluster, &finalizers).await?;
    Ok(())
}

/// Reconcile a RegisteredCluster
///
/// Returns `await_change` once the cluster has converged (or is gone), a
/// requeue while waiting on asynchronous dependencies, or an error that the
/// runtime retries through [`error_policy`].
#[instrument(
    skip(cluster, ctx),
    fields(registered_cluster = %cluster.name_any(), namespace = %cluster.namespace().unwrap_or_default())
)]
pub async fn reconcile(cluster: Arc<RegisteredCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().ok_or_else(|| {
        Error::internal_with_context("reconciler", format!("RegisteredCluster {} has no namespace", name))
    })?;

    // The cached copy may be stale; every write below is guarded by the fresh resourceVersion
    let Some(mut cluster) = ctx.compute.get_registered_cluster(&namespace, &name).await? else {
        debug!("registered cluster is gone");
        ctx.reset_backoff(&format!("{}/{}", namespace, name));
        return Ok(Action::await_change());
    };
    let key = cluster.key();

    let hub = ctx.hubs.resolve(&namespace)?;
    let hub_client = hub.client.as_ref();
    debug!(hub = %hub.name, "resolved hub");

    if !has_finalizer(&cluster) {
        if cluster.is_deleting() {
            debug!("deleting without finalizer, nothing to clean up");
            return Ok(Action::await_change());
        }
        info!("adding finalizer");
        cluster = add_finalizer(&cluster, &ctx).await?;
    }

    if !cluster.is_deleting() {
        ensure_managed_cluster(hub_client, &cluster).await?;
    }

    let managed = get_managed_cluster(hub_client, &cluster).await?;

    if cluster.is_deleting() {
        return match teardown(hub_client, &cluster, managed.as_ref()).await? {
            Teardown::Pending {
                target,
                retry_after,
            } => {
                debug!(target = %target, "waiting for derived object removal");
                Ok(Action::requeue(retry_after))
            }
            Teardown::Complete => {
                info!("derived objects removed, releasing finalizer");
                remove_finalizer(&cluster, &ctx).await?;
                ctx.reset_backoff(&key);
                Ok(Action::await_change())
            }
        };
    }

    let managed = managed.ok_or_else(|| Error::not_found_yet("ManagedCluster", key.clone()))?;
    debug!(managed_cluster = %managed.name_any(), "found managed cluster");

    match sync_import_command(
        ctx.compute.as_ref(),
        hub_client,
        &ctx.templates,
        &cluster,
        &managed,
    )
    .await?
    {
        ImportState::Waiting => {
            debug!("import artifact not published yet");
            return Ok(Action::requeue(IMPORT_ARTIFACT_RETRY));
        }
        ImportState::Ready(updated) => cluster = *updated,
    }

    let token = sync_syncer_identity(ctx.workspace.as_ref(), &ctx.templates, &cluster).await?;

    let syncer = sync_syncer(
        hub_client,
        &ctx.templates,
        &ctx.syncer,
        &cluster,
        &managed,
        &token,
    )
    .await?;
    if syncer == SyncerState::NotJoined {
        debug!("syncer deferred until the managed cluster joins");
    }

    project_status(ctx.compute.as_ref(), &cluster, &managed).await?;

    ctx.reset_backoff(&key);
    Ok(Action::await_change())
}

/// Error policy for the controller
///
/// Conflicts retry quickly since the next pass re-reads fresh state. Other
/// errors back off exponentially per RegisteredCluster.
pub fn error_policy(cluster: Arc<RegisteredCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = cluster.key();
    if error.is_conflict() {
        debug!(registered_cluster = %key, "write conflict, retrying with fresh state");
        return Action::requeue(CONFLICT_RETRY);
    }

    let delay = ctx.next_backoff(&key);
    if error.is_retryable() {
        warn!(?error, registered_cluster = %key, retry_in = ?delay, "reconciliation failed");
    } else {
        error!(?error, registered_cluster = %key, retry_in = ?delay, "reconciliation failed, needs attention");
    }
    Action::requeue(delay)
}
