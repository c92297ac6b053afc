//! Compute Operator - registers workload clusters with open-cluster-management hubs

use std::sync::Arc;

use clap::{Parser, Subcommand};
use kube::CustomResourceExt;

use compute_common::crd::RegisteredCluster;
use compute_common::kube_utils::{create_client, load_config};
use compute_common::telemetry::{init_telemetry, TelemetryConfig};
use compute_operator::config::{build_registry, ControllerArgs};
use compute_operator::controller_runner::build_registration_controllers;
use compute_registration::Context;

/// Compute - onboards RegisteredClusters onto hubs and connects them to their workspaces
#[derive(Parser, Debug)]
#[command(name = "compute-operator", version, about, long_about = None)]
struct Cli {
    /// Generate the RegisteredCluster CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    controller: ControllerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches RegisteredClusters on the compute cluster and, on every
    /// configured hub, the ManagedClusters and ManifestWorks created for them.
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&RegisteredCluster::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    let telemetry = init_telemetry(TelemetryConfig::default())?;

    let result = match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.controller).await,
    };

    telemetry.shutdown();
    result
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    tracing::info!("Compute controller starting...");

    let config = load_config(None, None).await?;
    let client = create_client(config.clone())?;

    let hubs = Arc::new(build_registry(args.hub_config.as_deref(), &client).await?);

    let mut workspace_config = config;
    if let Some(server) = &args.workspace_server {
        workspace_config.cluster_url = server.clone();
    }
    let mut builder = Context::builder(client.clone(), workspace_config, hubs)
        .syncer_image(args.syncer_image);
    if let Some(server) = args.workspace_server {
        builder = builder.workspace_server(server);
    }
    let ctx = Arc::new(builder.build()?);

    tracing::info!("Starting controllers:");
    let controllers = build_registration_controllers(client, ctx, args.concurrency);
    futures::future::join_all(controllers).await;

    tracing::info!("Compute controller stopped");
    Ok(())
}
