//! Process-wide registry of hub control planes
//!
//! Built once at startup and shared read-only by every reconcile. Each
//! RegisteredCluster is routed to a hub by its namespace: a hub that lists
//! the namespace as a tenant wins, otherwise the catch-all hub (one with no
//! tenant list) serves it.

use std::sync::Arc;

use kube::Client;

use compute_common::Error;

use crate::client::{HubClient, HubClientImpl};

/// One hub control plane
pub struct HubInstance {
    /// Hub name, used in logs
    pub name: String,
    /// Tenant namespaces served; empty means catch-all
    pub tenants: Vec<String>,
    /// Client used by the reconciler
    pub client: Arc<dyn HubClient>,
    /// Raw kube client for watches (None only in tests using mocks)
    pub kube: Option<Client>,
}

impl HubInstance {
    /// Create a hub backed by a real kube Client
    pub fn new(name: impl Into<String>, tenants: Vec<String>, client: Client) -> Self {
        Self {
            name: name.into(),
            tenants,
            client: Arc::new(HubClientImpl::new(client.clone())),
            kube: Some(client),
        }
    }

    /// Create a hub backed by an arbitrary [`HubClient`]
    pub fn with_client(
        name: impl Into<String>,
        tenants: Vec<String>,
        client: Arc<dyn HubClient>,
    ) -> Self {
        Self {
            name: name.into(),
            tenants,
            client,
            kube: None,
        }
    }

    /// Returns true if the hub serves every namespace not claimed elsewhere
    pub fn is_catch_all(&self) -> bool {
        self.tenants.is_empty()
    }

    /// Returns true if `namespace` is listed as a tenant
    pub fn serves(&self, namespace: &str) -> bool {
        self.tenants.iter().any(|t| t == namespace)
    }
}

impl std::fmt::Debug for HubInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubInstance")
            .field("name", &self.name)
            .field("tenants", &self.tenants)
            .finish_non_exhaustive()
    }
}

/// Immutable set of hubs
#[derive(Debug)]
pub struct HubRegistry {
    hubs: Vec<HubInstance>,
}

impl HubRegistry {
    /// Validate and build the registry
    ///
    /// Rejects duplicate hub names, a tenant claimed by two hubs, and more
    /// than one catch-all hub.
    pub fn new(hubs: Vec<HubInstance>) -> Result<Self, Error> {
        if hubs.is_empty() {
            return Err(Error::configuration("at least one hub must be configured"));
        }
        for (i, hub) in hubs.iter().enumerate() {
            for other in &hubs[i + 1..] {
                if hub.name == other.name {
                    return Err(Error::configuration(format!(
                        "hub {} is configured twice",
                        hub.name
                    )));
                }
                if hub.is_catch_all() && other.is_catch_all() {
                    return Err(Error::configuration(format!(
                        "hubs {} and {} both have no tenants; only one catch-all hub is allowed",
                        hub.name, other.name
                    )));
                }
                if let Some(tenant) = hub.tenants.iter().find(|t| other.serves(t)) {
                    return Err(Error::configuration(format!(
                        "namespace {} is claimed by hubs {} and {}",
                        tenant, hub.name, other.name
                    )));
                }
            }
        }
        Ok(Self { hubs })
    }

    /// Hub serving `namespace`
    pub fn resolve(&self, namespace: &str) -> Result<&HubInstance, Error> {
        self.hubs
            .iter()
            .find(|hub| hub.serves(namespace))
            .or_else(|| self.hubs.iter().find(|hub| hub.is_catch_all()))
            .ok_or_else(|| Error::hub_not_found(namespace))
    }

    /// All configured hubs
    pub fn hubs(&self) -> &[HubInstance] {
        &self.hubs
    }
}
