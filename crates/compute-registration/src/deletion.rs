//! Ordered teardown of the hub objects derived from a RegisteredCluster
//!
//! Stages run outermost dependent first. Each stage deletes its object and
//! returns [`Teardown::Pending`] while the object still exists; the next
//! reconcile observes its absence and moves on. Only when the ManagedCluster
//! itself is gone is the teardown [`Teardown::Complete`].

use std::time::Duration;

use kube::ResourceExt;
use tracing::{debug, info};

use compute_common::crd::{ManagedCluster, RegisteredCluster};
use compute_common::Error;

use crate::client::{DerivedKind, DerivedRef, HubClient};
use crate::syncer::syncer_name;

/// ManifestWork and ManagedServiceAccount name used by the appstudio integration
pub const APPSTUDIO_NAME: &str = "appstudio";

/// ManagedClusterAddOn installing the managed service account agent
pub const MANAGED_SERVICE_ACCOUNT_ADDON: &str = "managed-serviceaccount";

const NAMESPACED_STAGE_DELAY: Duration = Duration::from_secs(1);
const MANAGED_CLUSTER_STAGE_DELAY: Duration = Duration::from_secs(5);

/// Outcome of one teardown pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Teardown {
    /// `target` was deleted or is still going away; check again after `retry_after`
    Pending {
        /// Object whose deletion is in flight
        target: DerivedRef,
        /// Delay before the next pass
        retry_after: Duration,
    },
    /// Every derived object is confirmed absent
    Complete,
}

/// One teardown stage
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stage {
    /// Object removed by this stage
    pub target: DerivedRef,
    /// Requeue delay while the object still exists
    pub retry_after: Duration,
}

/// Stages for `cluster`, whose hub-side ManagedCluster is named `managed_cluster`
pub fn teardown_plan(cluster: &RegisteredCluster, managed_cluster: &str) -> Vec<Stage> {
    let namespaced = |kind, name: String| Stage {
        target: DerivedRef::namespaced(kind, managed_cluster, name),
        retry_after: NAMESPACED_STAGE_DELAY,
    };
    vec![
        namespaced(DerivedKind::ManifestWork, syncer_name(&cluster.name_any())),
        namespaced(DerivedKind::ManifestWork, APPSTUDIO_NAME.to_string()),
        namespaced(DerivedKind::ManagedServiceAccount, APPSTUDIO_NAME.to_string()),
        namespaced(
            DerivedKind::ManagedClusterAddOn,
            MANAGED_SERVICE_ACCOUNT_ADDON.to_string(),
        ),
        Stage {
            target: DerivedRef::cluster_scoped(DerivedKind::ManagedCluster, managed_cluster),
            retry_after: MANAGED_CLUSTER_STAGE_DELAY,
        },
    ]
}

/// Advance the teardown by at most one stage
///
/// `managed_cluster` is `None` when no ManagedCluster carries the
/// RegisteredCluster's correlation labels, in which case nothing is left to
/// remove. Errors other than not-found are returned as-is.
pub async fn teardown(
    hub: &dyn HubClient,
    cluster: &RegisteredCluster,
    managed_cluster: Option<&ManagedCluster>,
) -> Result<Teardown, Error> {
    let Some(managed_cluster) = managed_cluster else {
        debug!(registered_cluster = %cluster.key(), "no managed cluster left to tear down");
        return Ok(Teardown::Complete);
    };

    for stage in teardown_plan(cluster, &managed_cluster.name_any()) {
        if !hub.exists(&stage.target).await? {
            debug!(target = %stage.target, "already absent");
            continue;
        }
        info!(
            registered_cluster = %cluster.key(),
            target = %stage.target,
            "deleting derived object"
        );
        hub.delete(&stage.target).await?;
        return Ok(Teardown::Pending {
            target: stage.target,
            retry_after: stage.retry_after,
        });
    }

    Ok(Teardown::Complete)
}
