//! In-memory compute cluster, hub and workspace for multi-pass reconcile tests
//!
//! Mocks check single calls; this fake keeps state between reconciles so
//! scenarios can assert on what the controller converges to. Writes to a
//! RegisteredCluster are checked against its resourceVersion the way the API
//! server does, and removing the last finalizer of a deleting object removes
//! the object.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::error::ErrorResponse;
use kube::ResourceExt;

use compute_common::crd::{
    ClientConfig, Condition, ConditionStatus, ManagedCluster, ManagedClusterStatus, ManifestWork,
    RegisteredCluster, MANAGED_CLUSTER_JOINED,
};
use compute_common::Error;

use crate::client::{ComputeClient, DerivedKind, DerivedRef, HubClient, WorkspaceClient};
use crate::import::{hub_import_secret_name, CRDS_KEY, IMPORT_KEY};
use crate::lifecycle::SERVICE_ACCOUNT_TOKEN_TYPE;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn api_error(code: u16, reason: &str, message: String) -> Error {
    Error::from(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    }))
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector.split(',').all(|term| match term.split_once('=') {
        Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
        None => false,
    })
}

#[derive(Default)]
struct State {
    revision: u64,
    registered: BTreeMap<Key, RegisteredCluster>,
    compute_secrets: BTreeMap<Key, Secret>,
    status_patches: usize,

    managed_clusters: BTreeMap<String, ManagedCluster>,
    managed_cluster_creates: usize,
    hub_secrets: BTreeMap<Key, Secret>,
    works: BTreeMap<Key, ManifestWork>,
    work_applies: usize,
    other_derived: BTreeSet<String>,
    deletions: Vec<String>,

    service_accounts: BTreeMap<(String, Key), ServiceAccount>,
    service_account_creates: usize,
    workspace_secrets: BTreeMap<(String, Key), Secret>,
    cluster_roles: BTreeMap<(String, String), ClusterRole>,
    cluster_role_bindings: BTreeMap<(String, String), ClusterRoleBinding>,
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn stored_registered(&mut self, cluster: &RegisteredCluster) -> Result<&mut RegisteredCluster, Error> {
        let k = key(&cluster.namespace().unwrap_or_default(), &cluster.name_any());
        let stored = self
            .registered
            .get_mut(&k)
            .ok_or_else(|| api_error(404, "NotFound", format!("{} not found", cluster.key())))?;
        if stored.resource_version() != cluster.resource_version() {
            return Err(api_error(
                409,
                "Conflict",
                format!("{} has been modified", cluster.key()),
            ));
        }
        Ok(stored)
    }
}

/// Fake serving all three client seams from shared state
#[derive(Default)]
pub struct FakeClusters {
    state: Mutex<State>,
}

impl FakeClusters {
    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// Store a new RegisteredCluster as if a user created it
    pub fn create_registered(&self, mut cluster: RegisteredCluster) {
        self.with(|s| {
            let k = key(&cluster.namespace().unwrap_or_default(), &cluster.name_any());
            cluster.metadata.uid = Some(format!("uid-{}", cluster.name_any()));
            cluster.metadata.resource_version = Some(s.next_revision());
            s.registered.insert(k, cluster);
        })
    }

    /// Current stored RegisteredCluster
    pub fn registered(&self, namespace: &str, name: &str) -> Option<RegisteredCluster> {
        self.with(|s| s.registered.get(&key(namespace, name)).cloned())
    }

    /// Set the deletion marker as if a user deleted the object
    pub fn mark_deleting(&self, namespace: &str, name: &str) {
        self.with(|s| {
            let revision = s.next_revision();
            if let Some(rc) = s.registered.get_mut(&key(namespace, name)) {
                rc.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
                rc.metadata.resource_version = Some(revision);
            }
        })
    }

    /// Bump the stored resourceVersion as if another writer touched the object
    pub fn touch(&self, namespace: &str, name: &str) {
        self.with(|s| {
            let revision = s.next_revision();
            if let Some(rc) = s.registered.get_mut(&key(namespace, name)) {
                rc.metadata.resource_version = Some(revision);
            }
        })
    }

    /// Number of status writes
    pub fn status_patches(&self) -> usize {
        self.with(|s| s.status_patches)
    }

    /// Secrets applied to the compute cluster
    pub fn compute_secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.with(|s| s.compute_secrets.get(&key(namespace, name)).cloned())
    }

    /// All ManagedClusters on the hub
    pub fn managed_clusters(&self) -> Vec<ManagedCluster> {
        self.with(|s| s.managed_clusters.values().cloned().collect())
    }

    /// Number of ManagedCluster creations
    pub fn managed_cluster_creates(&self) -> usize {
        self.with(|s| s.managed_cluster_creates)
    }

    /// Insert a ManagedCluster directly, bypassing the controller
    pub fn insert_managed_cluster(&self, cluster: ManagedCluster) {
        self.with(|s| {
            s.managed_clusters.insert(cluster.name_any(), cluster);
        })
    }

    /// Publish the hub import secret as the onboarding controller would
    pub fn publish_import_secret(&self, managed_cluster: &str) {
        self.with(|s| {
            let secret = Secret {
                data: Some(BTreeMap::from([
                    (CRDS_KEY.to_string(), ByteString(b"crds".to_vec())),
                    (IMPORT_KEY.to_string(), ByteString(b"import".to_vec())),
                ])),
                ..Default::default()
            };
            s.hub_secrets.insert(
                key(managed_cluster, &hub_import_secret_name(managed_cluster)),
                secret,
            );
        })
    }

    /// Report the ManagedCluster as joined at `url`
    pub fn join(&self, managed_cluster: &str, url: &str) {
        self.with(|s| {
            if let Some(mc) = s.managed_clusters.get_mut(managed_cluster) {
                mc.spec.managed_cluster_client_configs = Some(vec![ClientConfig {
                    url: url.to_string(),
                    ca_bundle: None,
                }]);
                mc.status = Some(ManagedClusterStatus {
                    conditions: vec![Condition::new(
                        MANAGED_CLUSTER_JOINED,
                        ConditionStatus::True,
                        "ManagedClusterJoined",
                        "managed cluster joined",
                    )],
                    ..Default::default()
                });
            }
        })
    }

    /// Add a derived object created outside this controller (addons, appstudio grants)
    pub fn add_derived(&self, target: DerivedRef) {
        self.with(|s| {
            s.other_derived.insert(target.to_string());
        })
    }

    /// ManifestWork stored on the hub
    pub fn work(&self, namespace: &str, name: &str) -> Option<ManifestWork> {
        self.with(|s| s.works.get(&key(namespace, name)).cloned())
    }

    /// Every ManifestWork stored on the hub
    pub fn works(&self) -> Vec<ManifestWork> {
        self.with(|s| s.works.values().cloned().collect())
    }

    /// Number of ManifestWork applies, including no-op re-applies
    pub fn work_applies(&self) -> usize {
        self.with(|s| s.work_applies)
    }

    /// Number of derived hub objects still present
    pub fn derived_count(&self) -> usize {
        self.with(|s| s.managed_clusters.len() + s.works.len() + s.other_derived.len())
    }

    /// Deleted hub objects, in order
    pub fn deletions(&self) -> Vec<String> {
        self.with(|s| s.deletions.clone())
    }

    /// Number of syncer service account creations
    pub fn service_account_creates(&self) -> usize {
        self.with(|s| s.service_account_creates)
    }

    /// Number of distinct ClusterRoles applied in workspaces
    pub fn cluster_roles(&self) -> usize {
        self.with(|s| s.cluster_roles.len() + s.cluster_role_bindings.len())
    }
}

#[async_trait]
impl ComputeClient for FakeClusters {
    async fn get_registered_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<RegisteredCluster>, Error> {
        Ok(self.registered(namespace, name))
    }

    async fn patch_finalizers(
        &self,
        cluster: &RegisteredCluster,
        finalizers: &[String],
    ) -> Result<RegisteredCluster, Error> {
        self.with(|s| {
            let revision = s.next_revision();
            let stored = s.stored_registered(cluster)?;
            stored.metadata.finalizers = Some(finalizers.to_vec());
            stored.metadata.resource_version = Some(revision);
            let updated = stored.clone();
            if updated.is_deleting() && finalizers.is_empty() {
                s.registered.remove(&key(
                    &updated.namespace().unwrap_or_default(),
                    &updated.name_any(),
                ));
            }
            Ok(updated)
        })
    }

    async fn patch_status(
        &self,
        cluster: &RegisteredCluster,
        status_patch: &serde_json::Value,
    ) -> Result<RegisteredCluster, Error> {
        self.with(|s| {
            let revision = s.next_revision();
            let stored = s.stored_registered(cluster)?;
            let mut status = serde_json::to_value(stored.status_or_default())?;
            if let (Some(target), Some(patch)) = (status.as_object_mut(), status_patch.as_object()) {
                for (field, value) in patch {
                    if value.is_null() {
                        target.remove(field);
                    } else {
                        target.insert(field.clone(), value.clone());
                    }
                }
            }
            stored.status = Some(serde_json::from_value(status)?);
            stored.metadata.resource_version = Some(revision);
            let updated = stored.clone();
            s.status_patches += 1;
            Ok(updated)
        })
    }

    async fn apply_secret(&self, secret: &Secret) -> Result<(), Error> {
        self.with(|s| {
            s.compute_secrets.insert(
                key(&secret.namespace().unwrap_or_default(), &secret.name_any()),
                secret.clone(),
            );
        });
        Ok(())
    }
}

#[async_trait]
impl HubClient for FakeClusters {
    async fn list_managed_clusters(&self, selector: &str) -> Result<Vec<ManagedCluster>, Error> {
        Ok(self.with(|s| {
            s.managed_clusters
                .values()
                .filter(|mc| matches_selector(mc.labels(), selector))
                .cloned()
                .collect()
        }))
    }

    async fn create_managed_cluster(
        &self,
        cluster: &ManagedCluster,
    ) -> Result<ManagedCluster, Error> {
        Ok(self.with(|s| {
            s.managed_cluster_creates += 1;
            let mut created = cluster.clone();
            let prefix = created.metadata.generate_name.clone().unwrap_or_default();
            let name = format!("{}{}", prefix, s.managed_cluster_creates);
            created.metadata.name = Some(name.clone());
            created.metadata.resource_version = Some(s.next_revision());
            s.managed_clusters.insert(name, created.clone());
            created
        }))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        Ok(self.with(|s| s.hub_secrets.get(&key(namespace, name)).cloned()))
    }

    async fn apply_manifest_work(&self, work: &ManifestWork) -> Result<ManifestWork, Error> {
        Ok(self.with(|s| {
            let k = key(&work.namespace().unwrap_or_default(), &work.name_any());
            let mut stored = work.clone();
            stored.status = s.works.get(&k).and_then(|w| w.status.clone());
            s.works.insert(k, stored.clone());
            s.work_applies += 1;
            stored
        }))
    }

    async fn exists(&self, target: &DerivedRef) -> Result<bool, Error> {
        Ok(self.with(|s| match target.kind {
            DerivedKind::ManagedCluster => s.managed_clusters.contains_key(&target.name),
            DerivedKind::ManifestWork
                if s.works.contains_key(&key(
                    target.namespace.as_deref().unwrap_or_default(),
                    &target.name,
                )) =>
            {
                true
            }
            _ => s.other_derived.contains(&target.to_string()),
        }))
    }

    async fn delete(&self, target: &DerivedRef) -> Result<(), Error> {
        self.with(|s| {
            s.deletions.push(target.to_string());
            match target.kind {
                DerivedKind::ManagedCluster => {
                    s.managed_clusters.remove(&target.name);
                }
                _ => {
                    s.works.remove(&key(
                        target.namespace.as_deref().unwrap_or_default(),
                        &target.name,
                    ));
                    s.other_derived.remove(&target.to_string());
                }
            }
        });
        Ok(())
    }
}

#[async_trait]
impl WorkspaceClient for FakeClusters {
    async fn get_service_account(
        &self,
        location: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, Error> {
        Ok(self.with(|s| {
            s.service_accounts
                .get(&(location.to_string(), key(namespace, name)))
                .cloned()
        }))
    }

    /// Emulates the token controller by issuing a token secret right away
    async fn create_service_account(
        &self,
        location: &str,
        account: &ServiceAccount,
    ) -> Result<ServiceAccount, Error> {
        Ok(self.with(|s| {
            s.service_account_creates += 1;
            let namespace = account.namespace().unwrap_or_default();
            let name = account.name_any();
            let token_name = format!("{}-token-{}", name, s.service_account_creates);

            let mut created = account.clone();
            created.secrets = Some(vec![ObjectReference {
                name: Some(token_name.clone()),
                ..Default::default()
            }]);
            s.service_accounts.insert(
                (location.to_string(), key(&namespace, &name)),
                created.clone(),
            );
            s.workspace_secrets.insert(
                (location.to_string(), key(&namespace, &token_name)),
                Secret {
                    metadata: ObjectMeta {
                        name: Some(token_name.clone()),
                        namespace: Some(namespace.clone()),
                        ..Default::default()
                    },
                    type_: Some(SERVICE_ACCOUNT_TOKEN_TYPE.to_string()),
                    data: Some(BTreeMap::from([(
                        "token".to_string(),
                        ByteString(format!("token-for-{}", location).into_bytes()),
                    )])),
                    ..Default::default()
                },
            );
            created
        }))
    }

    async fn get_secret(
        &self,
        location: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, Error> {
        Ok(self.with(|s| {
            s.workspace_secrets
                .get(&(location.to_string(), key(namespace, name)))
                .cloned()
        }))
    }

    async fn apply_cluster_role(&self, location: &str, role: &ClusterRole) -> Result<(), Error> {
        self.with(|s| {
            s.cluster_roles
                .insert((location.to_string(), role.name_any()), role.clone());
        });
        Ok(())
    }

    async fn apply_cluster_role_binding(
        &self,
        location: &str,
        binding: &ClusterRoleBinding,
    ) -> Result<(), Error> {
        self.with(|s| {
            s.cluster_role_bindings
                .insert((location.to_string(), binding.name_any()), binding.clone());
        });
        Ok(())
    }
}
