//! Client seams for the three API endpoints the controller talks to
//!
//! - [`ComputeClient`]: the cluster holding RegisteredCluster objects
//! - [`HubClient`]: an open-cluster-management hub
//! - [`WorkspaceClient`]: a tenant workspace, addressed by location
//!
//! Each seam is a trait so the reconciler can be driven by mocks in tests.
//! Reads that the state machine expects to miss return `Ok(None)` instead of
//! a 404 error.

use std::fmt::Debug;

use async_trait::async_trait;
use dashmap::DashMap;
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Config, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use compute_common::crd::{
    ManagedCluster, ManagedClusterAddOn, ManagedServiceAccount, ManifestWork, RegisteredCluster,
};
use compute_common::kube_utils::{create_client, ignore_not_found};
use compute_common::{Error, FIELD_MANAGER};

/// Operations on the cluster that stores RegisteredCluster objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ComputeClient: Send + Sync {
    /// Fetch a RegisteredCluster, bypassing any cache
    async fn get_registered_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RegisteredCluster>, Error>;

    /// Replace the finalizer list
    ///
    /// The write carries the object's resourceVersion, so a concurrent
    /// modification fails with a 409 instead of being overwritten.
    async fn patch_finalizers(
        &self,
        cluster: &RegisteredCluster,
        finalizers: &[String],
    ) -> Result<RegisteredCluster, Error>;

    /// Merge-patch the status subresource with `status_patch`
    ///
    /// Guarded by resourceVersion like [`ComputeClient::patch_finalizers`].
    async fn patch_status(
        &self,
        cluster: &RegisteredCluster,
        status_patch: &serde_json::Value,
    ) -> Result<RegisteredCluster, Error>;

    /// Server-side apply a Secret
    async fn apply_secret(&self, secret: &Secret) -> Result<(), Error>;
}

/// Kinds of hub objects the deletion orchestrator tears down
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DerivedKind {
    /// work.open-cluster-management.io ManifestWork
    ManifestWork,
    /// authentication.open-cluster-management.io ManagedServiceAccount
    ManagedServiceAccount,
    /// addon.open-cluster-management.io ManagedClusterAddOn
    ManagedClusterAddOn,
    /// cluster.open-cluster-management.io ManagedCluster
    ManagedCluster,
}

impl DerivedKind {
    /// Kind name as it appears in the API
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManifestWork => "ManifestWork",
            Self::ManagedServiceAccount => "ManagedServiceAccount",
            Self::ManagedClusterAddOn => "ManagedClusterAddOn",
            Self::ManagedCluster => "ManagedCluster",
        }
    }
}

/// Reference to a derived object on the hub
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivedRef {
    /// Kind of the object
    pub kind: DerivedKind,
    /// Namespace, `None` for cluster-scoped kinds
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl DerivedRef {
    /// Reference a namespaced object
    pub fn namespaced(
        kind: DerivedKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Reference a cluster-scoped object
    pub fn cluster_scoped(kind: DerivedKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.into(),
        }
    }

    fn require_namespace(&self) -> Result<&str, Error> {
        self.namespace.as_deref().ok_or_else(|| {
            Error::internal_with_context(
                "hub_client",
                format!("{} {} requires a namespace", self.kind.as_str(), self.name),
            )
        })
    }
}

impl std::fmt::Display for DerivedRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind.as_str(), ns, self.name),
            None => write!(f, "{} {}", self.kind.as_str(), self.name),
        }
    }
}

/// Operations against an open-cluster-management hub
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HubClient: Send + Sync {
    /// List ManagedClusters matching a label selector, read from the API server
    async fn list_managed_clusters(&self, selector: &str) -> Result<Vec<ManagedCluster>, Error>;

    /// Create a ManagedCluster (the name may be generated)
    async fn create_managed_cluster(
        &self,
        cluster: &ManagedCluster,
    ) -> Result<ManagedCluster, Error>;

    /// Fetch a Secret on the hub
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Server-side apply a ManifestWork, returning the stored object
    async fn apply_manifest_work(&self, work: &ManifestWork) -> Result<ManifestWork, Error>;

    /// Returns true if the referenced object exists
    async fn exists(&self, target: &DerivedRef) -> Result<bool, Error>;

    /// Request deletion of the referenced object; already-absent objects are not an error
    async fn delete(&self, target: &DerivedRef) -> Result<(), Error>;
}

/// Operations inside a tenant workspace
///
/// `location` selects the workspace (e.g. `root:team-a`).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WorkspaceClient: Send + Sync {
    /// Fetch a ServiceAccount
    async fn get_service_account(
        &self,
        location: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, Error>;

    /// Create a ServiceAccount
    async fn create_service_account(
        &self,
        location: &str,
        account: &ServiceAccount,
    ) -> Result<ServiceAccount, Error>;

    /// Fetch a Secret
    async fn get_secret(
        &self,
        location: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, Error>;

    /// Server-side apply a ClusterRole
    async fn apply_cluster_role(&self, location: &str, role: &ClusterRole) -> Result<(), Error>;

    /// Server-side apply a ClusterRoleBinding
    async fn apply_cluster_role_binding(
        &self,
        location: &str,
        binding: &ClusterRoleBinding,
    ) -> Result<(), Error>;
}

fn apply_params() -> PatchParams {
    PatchParams::apply(FIELD_MANAGER).force()
}

fn object_name<K: Resource>(obj: &K) -> Result<String, Error> {
    obj.meta()
        .name
        .clone()
        .ok_or_else(|| Error::internal_with_context("apply", "object has no name"))
}

async fn apply_namespaced<K>(client: &Client, obj: &K) -> Result<K, Error>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
    K::DynamicType: Default,
{
    let name = object_name(obj)?;
    let namespace = obj.meta().namespace.clone().ok_or_else(|| {
        Error::internal_with_context("apply", format!("{} has no namespace", name))
    })?;
    let api: Api<K> = Api::namespaced(client.clone(), &namespace);
    Ok(api.patch(&name, &apply_params(), &Patch::Apply(obj)).await?)
}

async fn apply_cluster_scoped<K>(client: &Client, obj: &K) -> Result<K, Error>
where
    K: Resource<Scope = ClusterResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
    K::DynamicType: Default,
{
    let name = object_name(obj)?;
    let api: Api<K> = Api::all(client.clone());
    Ok(api.patch(&name, &apply_params(), &Patch::Apply(obj)).await?)
}

/// Real [`ComputeClient`] backed by a kube Client
pub struct ComputeClientImpl {
    client: Client,
}

impl ComputeClientImpl {
    /// Create a new ComputeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api_for(&self, cluster: &RegisteredCluster) -> Api<RegisteredCluster> {
        Api::namespaced(
            self.client.clone(),
            &cluster.namespace().unwrap_or_default(),
        )
    }
}

#[async_trait]
impl ComputeClient for ComputeClientImpl {
    async fn get_registered_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RegisteredCluster>, Error> {
        let api: Api<RegisteredCluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(ignore_not_found(api.get(name).await)?)
    }

    async fn patch_finalizers(
        &self,
        cluster: &RegisteredCluster,
        finalizers: &[String],
    ) -> Result<RegisteredCluster, Error> {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": cluster.resource_version(),
            }
        });
        Ok(self
            .api_for(cluster)
            .patch(
                &cluster.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?)
    }

    async fn patch_status(
        &self,
        cluster: &RegisteredCluster,
        status_patch: &serde_json::Value,
    ) -> Result<RegisteredCluster, Error> {
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": cluster.resource_version() },
            "status": status_patch,
        });
        Ok(self
            .api_for(cluster)
            .patch_status(
                &cluster.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?)
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<(), Error> {
        apply_namespaced(&self.client, secret).await?;
        Ok(())
    }
}

/// Real [`HubClient`] backed by a kube Client for one hub
pub struct HubClientImpl {
    client: Client,
}

impl HubClientImpl {
    /// Create a new HubClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_namespaced<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        Ok(ignore_not_found(api.get(name).await)?)
    }

    async fn delete_namespaced<K>(&self, namespace: &str, name: &str) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        ignore_not_found(api.delete(name, &DeleteParams::background()).await)?;
        Ok(())
    }
}

#[async_trait]
impl HubClient for HubClientImpl {
    async fn list_managed_clusters(&self, selector: &str) -> Result<Vec<ManagedCluster>, Error> {
        let api: Api<ManagedCluster> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default().labels(selector)).await?.items)
    }

    async fn create_managed_cluster(
        &self,
        cluster: &ManagedCluster,
    ) -> Result<ManagedCluster, Error> {
        let api: Api<ManagedCluster> = Api::all(self.client.clone());
        Ok(api.create(&PostParams::default(), cluster).await?)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        self.get_namespaced::<Secret>(namespace, name).await
    }

    async fn apply_manifest_work(&self, work: &ManifestWork) -> Result<ManifestWork, Error> {
        apply_namespaced(&self.client, work).await
    }

    async fn exists(&self, target: &DerivedRef) -> Result<bool, Error> {
        let found = match target.kind {
            DerivedKind::ManifestWork => self
                .get_namespaced::<ManifestWork>(target.require_namespace()?, &target.name)
                .await?
                .is_some(),
            DerivedKind::ManagedServiceAccount => self
                .get_namespaced::<ManagedServiceAccount>(
                    target.require_namespace()?,
                    &target.name,
                )
                .await?
                .is_some(),
            DerivedKind::ManagedClusterAddOn => self
                .get_namespaced::<ManagedClusterAddOn>(target.require_namespace()?, &target.name)
                .await?
                .is_some(),
            DerivedKind::ManagedCluster => {
                let api: Api<ManagedCluster> = Api::all(self.client.clone());
                ignore_not_found(api.get(&target.name).await)?.is_some()
            }
        };
        Ok(found)
    }

    async fn delete(&self, target: &DerivedRef) -> Result<(), Error> {
        debug!(target = %target, "deleting derived object");
        match target.kind {
            DerivedKind::ManifestWork => {
                self.delete_namespaced::<ManifestWork>(target.require_namespace()?, &target.name)
                    .await
            }
            DerivedKind::ManagedServiceAccount => {
                self.delete_namespaced::<ManagedServiceAccount>(
                    target.require_namespace()?,
                    &target.name,
                )
                .await
            }
            DerivedKind::ManagedClusterAddOn => {
                self.delete_namespaced::<ManagedClusterAddOn>(
                    target.require_namespace()?,
                    &target.name,
                )
                .await
            }
            DerivedKind::ManagedCluster => {
                let api: Api<ManagedCluster> = Api::all(self.client.clone());
                ignore_not_found(api.delete(&target.name, &DeleteParams::background()).await)?;
                Ok(())
            }
        }
    }
}

/// Real [`WorkspaceClient`]
///
/// Workspaces are served under `<server>/clusters/<location>`. One kube
/// Client is built per location on first use and reused afterwards.
pub struct WorkspaceClientImpl {
    base: Config,
    clients: DashMap<String, Client>,
}

impl WorkspaceClientImpl {
    /// Create a client factory from the base configuration of the workspace server
    pub fn new(base: Config) -> Self {
        Self {
            base,
            clients: DashMap::new(),
        }
    }

    fn client_for(&self, location: &str) -> Result<Client, Error> {
        if let Some(client) = self.clients.get(location) {
            return Ok(client.clone());
        }
        let mut config = self.base.clone();
        config.cluster_url = workspace_url(&self.base.cluster_url, location)?;
        let client = create_client(config)?;
        self.clients.insert(location.to_string(), client.clone());
        Ok(client)
    }
}

/// URL of the workspace `location` on the server behind `base`
///
/// Any `/clusters/...` suffix already present on `base` is replaced.
pub fn workspace_url(base: &http::Uri, location: &str) -> Result<http::Uri, Error> {
    let base = base.to_string();
    let root = match base.find("/clusters/") {
        Some(idx) => &base[..idx],
        None => base.as_str(),
    };
    format!("{}/clusters/{}", root.trim_end_matches('/'), location)
        .parse()
        .map_err(|e| {
            Error::configuration(format!("invalid workspace URL for {}: {}", location, e))
        })
}

#[async_trait]
impl WorkspaceClient for WorkspaceClientImpl {
    async fn get_service_account(
        &self,
        location: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, Error> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client_for(location)?, namespace);
        Ok(ignore_not_found(api.get(name).await)?)
    }

    async fn create_service_account(
        &self,
        location: &str,
        account: &ServiceAccount,
    ) -> Result<ServiceAccount, Error> {
        let namespace = account.namespace().unwrap_or_else(|| "default".to_string());
        let api: Api<ServiceAccount> = Api::namespaced(self.client_for(location)?, &namespace);
        Ok(api.create(&PostParams::default(), account).await?)
    }

    async fn get_secret(
        &self,
        location: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client_for(location)?, namespace);
        Ok(ignore_not_found(api.get(name).await)?)
    }

    async fn apply_cluster_role(&self, location: &str, role: &ClusterRole) -> Result<(), Error> {
        apply_cluster_scoped(&self.client_for(location)?, role).await?;
        Ok(())
    }

    async fn apply_cluster_role_binding(
        &self,
        location: &str,
        binding: &ClusterRoleBinding,
    ) -> Result<(), Error> {
        apply_cluster_scoped(&self.client_for(location)?, binding).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_url_appends_location() {
        let base: http::Uri = "https://kcp.example.com:6443".parse().unwrap();
        let url = workspace_url(&base, "root:team-a").unwrap();
        assert_eq!(
            url.to_string(),
            "https://kcp.example.com:6443/clusters/root:team-a"
        );
    }

    #[test]
    fn workspace_url_replaces_existing_workspace() {
        let base: http::Uri = "https://kcp.example.com:6443/clusters/root:compute"
            .parse()
            .unwrap();
        let url = workspace_url(&base, "root:team-b").unwrap();
        assert_eq!(
            url.to_string(),
            "https://kcp.example.com:6443/clusters/root:team-b"
        );
    }

    #[test]
    fn derived_ref_display_includes_scope() {
        let work = DerivedRef::namespaced(DerivedKind::ManifestWork, "mc-1", "kcp-syncer-a");
        assert_eq!(work.to_string(), "ManifestWork mc-1/kcp-syncer-a");
        let mc = DerivedRef::cluster_scoped(DerivedKind::ManagedCluster, "mc-1");
        assert_eq!(mc.to_string(), "ManagedCluster mc-1");
        assert!(mc.require_namespace().is_err());
        assert_eq!(work.require_namespace().unwrap(), "mc-1");
    }
}
