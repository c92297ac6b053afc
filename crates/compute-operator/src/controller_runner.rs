//! Controller runner - builds the RegisteredCluster controller future
//!
//! The RegisteredCluster watch feeds a reflector store and is then filtered,
//! so the store always holds every object while only interesting events
//! trigger a reconcile. Each hub contributes filtered ManagedCluster and
//! ManifestWork watches whose events map back to the owning
//! RegisteredCluster through the correlation labels.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{reflector, watcher, Controller, WatchStreamExt};
use kube::{Api, Client};

use compute_common::crd::{ManagedCluster, ManifestWork, RegisteredCluster};
use compute_common::REGISTERED_CLUSTER_NAME_LABEL;
use compute_registration::{error_policy, filter_events, owner_of, reconcile, Context, EventFilter};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Watch config for hub objects created on behalf of a RegisteredCluster
fn correlated_watch_config() -> WatcherConfig {
    WatcherConfig::default()
        .labels(REGISTERED_CLUSTER_NAME_LABEL)
        .timeout(WATCH_TIMEOUT_SECS)
}

/// Build the RegisteredCluster controller future
///
/// `client` talks to the compute cluster; hub watches use each hub's own
/// client. Hubs without a kube client (mock-backed) are not watched.
pub fn build_registration_controllers(
    client: Client,
    ctx: Arc<Context>,
    concurrency: u16,
) -> Vec<Pin<Box<dyn Future<Output = ()> + Send>>> {
    let clusters: Api<RegisteredCluster> = Api::all(client);
    let (reader, writer) = reflector::store();
    let cluster_events = watcher(clusters, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .default_backoff()
        .reflect(writer);
    let triggers = filter_events(cluster_events, Arc::new(EventFilter::<RegisteredCluster>::new()));

    let mut controller = Controller::for_stream(triggers, reader);
    for hub in ctx.hubs.hubs() {
        let Some(hub_client) = hub.kube.clone() else {
            tracing::warn!(hub = %hub.name, "hub has no watch client, relying on requeues");
            continue;
        };
        let managed: Api<ManagedCluster> = Api::all(hub_client.clone());
        let works: Api<ManifestWork> = Api::all(hub_client);

        let managed_events = filter_events(
            watcher(managed, correlated_watch_config()).default_backoff(),
            Arc::new(EventFilter::<ManagedCluster>::new()),
        );
        let work_events = filter_events(
            watcher(works, correlated_watch_config()).default_backoff(),
            Arc::new(EventFilter::<ManifestWork>::new()),
        );

        controller = controller
            .watches_stream(managed_events, |mc: ManagedCluster| owner_of(&mc))
            .watches_stream(work_events, |work: ManifestWork| owner_of(&work));
        tracing::info!(hub = %hub.name, "- ManagedCluster and ManifestWork watches");
    }

    tracing::info!(concurrency, "- RegisteredCluster controller");

    vec![Box::pin(
        controller
            .with_config(ControllerConfig::default().concurrency(concurrency))
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(|result| {
                match result {
                    Ok(action) => {
                        tracing::debug!(?action, "RegisteredCluster reconciliation completed")
                    }
                    Err(e) => tracing::warn!(error = ?e, "RegisteredCluster reconciliation error"),
                }
                futures::future::ready(())
            }),
    )]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hub_watches_select_correlated_objects_only() {
        let config = correlated_watch_config();
        assert_eq!(config.label_selector.as_deref(), Some(REGISTERED_CLUSTER_NAME_LABEL));
        assert_eq!(config.timeout, Some(WATCH_TIMEOUT_SECS));
    }
}
