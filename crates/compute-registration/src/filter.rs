//! Event filtering for the registration controller's watches
//!
//! Each watched kind decides from an (old, new) pair of snapshots whether an
//! event is worth a reconcile. The watch streams only deliver the new object,
//! so [`EventFilter`] remembers the last snapshot per object and feeds the
//! predicate the pair.
//!
//! - RegisteredCluster: every creation, status changes, and the deletion marker
//!   appearing. Spec-only edits wait for the next trigger.
//! - ManagedCluster: must carry both correlation labels; creation, or a change
//!   to status, client configs, or the cluster ID label.
//! - ManifestWork: must carry both correlation labels; status changes only.
//!
//! Delete events never trigger; they only evict the remembered snapshot.
//! A relist after a watch desync evicts every object it did not report.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use futures::{future, Stream, StreamExt};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Resource, ResourceExt};
use serde_json::Value;
use tracing::trace;

use compute_common::crd::{ManagedCluster, ManifestWork, RegisteredCluster};
use compute_common::kube_utils::{has_correlation_labels, CorrelationKey};
use compute_common::CLUSTER_ID_LABEL;

/// The parts of an object the predicates compare
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    /// Object labels
    pub labels: BTreeMap<String, String>,
    /// Serialized status sub-object
    pub status: Option<Value>,
    /// Serialized client-config list (ManagedCluster only)
    pub client_configs: Option<Value>,
    /// Whether deletion has been requested
    pub deleting: bool,
}

/// Closed set of kinds the controller watches
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchedKind {
    /// The intent object
    RegisteredCluster,
    /// Hub-side cluster registration
    ManagedCluster,
    /// Hub-side syncer deployment descriptor
    ManifestWork,
}

/// Decides whether a change is reconciliation-worthy
pub trait Interest {
    /// `old` is `None` for a creation (or first sighting)
    fn interesting_on(&self, old: Option<&Snapshot>, new: &Snapshot) -> bool;
}

impl Interest for WatchedKind {
    fn interesting_on(&self, old: Option<&Snapshot>, new: &Snapshot) -> bool {
        match self {
            WatchedKind::RegisteredCluster => match old {
                None => true,
                Some(old) => old.status != new.status || (!old.deleting && new.deleting),
            },
            WatchedKind::ManagedCluster => {
                if !has_correlation_labels(&new.labels) {
                    return false;
                }
                match old {
                    None => true,
                    Some(old) => {
                        old.status != new.status
                            || old.client_configs != new.client_configs
                            || old.labels.get(CLUSTER_ID_LABEL) != new.labels.get(CLUSTER_ID_LABEL)
                    }
                }
            }
            WatchedKind::ManifestWork => match old {
                None => false,
                Some(old) => has_correlation_labels(&new.labels) && old.status != new.status,
            },
        }
    }
}

/// A watched resource that can describe itself as a [`Snapshot`]
pub trait Watched: Resource + Clone {
    /// Which predicate applies
    const KIND: WatchedKind;

    /// Capture the fields the predicate compares
    fn snapshot(&self) -> Snapshot;
}

fn to_value<T: serde::Serialize>(value: &Option<T>) -> Option<Value> {
    value.as_ref().and_then(|v| serde_json::to_value(v).ok())
}

impl Watched for RegisteredCluster {
    const KIND: WatchedKind = WatchedKind::RegisteredCluster;

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            labels: self.labels().clone(),
            status: to_value(&self.status),
            client_configs: None,
            deleting: self.metadata.deletion_timestamp.is_some(),
        }
    }
}

impl Watched for ManagedCluster {
    const KIND: WatchedKind = WatchedKind::ManagedCluster;

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            labels: self.labels().clone(),
            status: to_value(&self.status),
            client_configs: to_value(&self.spec.managed_cluster_client_configs),
            deleting: self.metadata.deletion_timestamp.is_some(),
        }
    }
}

impl Watched for ManifestWork {
    const KIND: WatchedKind = WatchedKind::ManifestWork;

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            labels: self.labels().clone(),
            status: to_value(&self.status),
            client_configs: None,
            deleting: self.metadata.deletion_timestamp.is_some(),
        }
    }
}

/// Remembers the last snapshot of every object of kind `K`
pub struct EventFilter<K> {
    seen: DashMap<String, Snapshot>,
    relisting: AtomicBool,
    relisted: DashSet<String>,
    _kind: PhantomData<fn(K)>,
}

impl<K: Watched> Default for EventFilter<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Watched> EventFilter<K> {
    /// Create an empty filter
    pub fn new() -> Self {
        Self {
            seen: DashMap::new(),
            relisting: AtomicBool::new(false),
            relisted: DashSet::new(),
            _kind: PhantomData,
        }
    }

    fn key(obj: &K) -> String {
        format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
    }

    /// Record `obj` and return whether the change should trigger a reconcile
    pub fn admit(&self, obj: &K) -> bool {
        let new = obj.snapshot();
        if self.relisting.load(Ordering::Acquire) {
            self.relisted.insert(Self::key(obj));
        }
        let old = self.seen.insert(Self::key(obj), new.clone());
        let admitted = K::KIND.interesting_on(old.as_ref(), &new);
        trace!(kind = ?K::KIND, object = %Self::key(obj), admitted, "filtered watch event");
        admitted
    }

    /// Drop the remembered snapshot of a deleted object
    pub fn forget(&self, obj: &K) {
        self.seen.remove(&Self::key(obj));
    }

    /// Start collecting the objects reported by a relist
    pub fn begin_relist(&self) {
        self.relisted.clear();
        self.relisting.store(true, Ordering::Release);
    }

    /// Evict every object the finished relist did not report
    pub fn finish_relist(&self) {
        self.relisting.store(false, Ordering::Release);
        let before = self.seen.len();
        self.seen.retain(|key, _| self.relisted.contains(key));
        self.relisted.clear();
        trace!(kind = ?K::KIND, evicted = before - self.seen.len(), "relist complete");
    }

    /// Keys of the remembered objects
    pub fn remembered(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.seen.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

/// Turn raw watcher events into the objects worth reconciling
pub fn filter_events<K, S>(
    events: S,
    filter: Arc<EventFilter<K>>,
) -> impl Stream<Item = Result<K, watcher::Error>> + Send
where
    K: Watched + Send + Sync + 'static,
    S: Stream<Item = Result<watcher::Event<K>, watcher::Error>> + Send,
{
    events.filter_map(move |event| {
        let passed = match event {
            Ok(watcher::Event::Apply(obj)) | Ok(watcher::Event::InitApply(obj)) => {
                filter.admit(&obj).then_some(Ok(obj))
            }
            Ok(watcher::Event::Delete(obj)) => {
                filter.forget(&obj);
                None
            }
            Ok(watcher::Event::Init) => {
                filter.begin_relist();
                None
            }
            Ok(watcher::Event::InitDone) => {
                filter.finish_relist();
                None
            }
            Err(e) => Some(Err(e)),
        };
        future::ready(passed)
    })
}

/// RegisteredCluster a derived object belongs to, read from its correlation labels
pub fn owner_of<K: ResourceExt>(obj: &K) -> Option<ObjectRef<RegisteredCluster>> {
    CorrelationKey::from_labels(obj.labels())
        .map(|key| ObjectRef::new(&key.name).within(&key.namespace))
}
