//! Operator configuration
//!
//! Command line flags are parsed by clap with environment fallbacks. Hubs
//! come from a YAML file listing, per hub, where its kubeconfig lives and
//! which tenant namespaces it serves:
//!
//! ```yaml
//! hubs:
//!   - name: east
//!     kubeconfig: /etc/hubs/east/kubeconfig
//!     namespaces: [team-a, team-b]
//!   - name: default
//! ```
//!
//! Without a file the compute cluster itself is the single catch-all hub.

use std::path::{Path, PathBuf};

use clap::Args;
use kube::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use compute_common::kube_utils::{create_client, load_config};
use compute_common::DEFAULT_SYNCER_IMAGE;
use compute_registration::{HubInstance, HubRegistry};

/// Name given to the implicit hub when no hub file is configured
pub const DEFAULT_HUB_NAME: &str = "default";

/// Default number of RegisteredClusters reconciled concurrently
pub const DEFAULT_CONCURRENCY: u16 = 4;

/// Flags of the `controller` mode
#[derive(Args, Debug, Clone)]
pub struct ControllerArgs {
    /// YAML file listing the hubs and the tenant namespaces they serve
    #[arg(long, env = "HUB_CONFIG")]
    pub hub_config: Option<PathBuf>,

    /// Image of the syncer deployed onto joined clusters
    #[arg(long, env = "KCP_SYNCER_IMAGE", default_value = DEFAULT_SYNCER_IMAGE)]
    pub syncer_image: String,

    /// Server hosting the tenant workspaces (defaults to the compute cluster's API server)
    #[arg(long, env = "WORKSPACE_SERVER")]
    pub workspace_server: Option<http::Uri>,

    /// Maximum number of RegisteredClusters reconciled at once
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: u16,
}

/// Errors raised while loading operator configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The hub file could not be read
    #[error("failed to read hub config {path}: {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// The hub file is not valid YAML for [`HubConfigFile`]
    #[error("failed to parse hub config {path}: {source}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Underlying parse error
        source: serde_yaml::Error,
    },

    /// The hub file parsed but describes an unusable set of hubs
    #[error("invalid hub config: {0}")]
    Invalid(String),

    /// A hub's client could not be built
    #[error("hub {hub}: {source}")]
    Hub {
        /// Hub name
        hub: String,
        /// Underlying error
        source: compute_common::Error,
    },
}

/// Parsed hub file
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HubConfigFile {
    /// Configured hubs
    #[serde(default)]
    pub hubs: Vec<HubEntry>,
}

/// One hub of the hub file
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HubEntry {
    /// Hub name, unique across the file
    pub name: String,
    /// Kubeconfig of the hub; absent means in-cluster or `$KUBECONFIG`
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
    /// Context to select inside `kubeconfig`
    #[serde(default)]
    pub context: Option<String>,
    /// Tenant namespaces served; empty makes this the catch-all hub
    #[serde(default)]
    pub namespaces: Vec<String>,
}

impl HubConfigFile {
    /// Read and validate a hub file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: Self = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.hubs.is_empty() {
            return Err(ConfigError::Invalid("no hubs listed".to_string()));
        }
        if let Some(entry) = self.hubs.iter().find(|h| h.name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "hub with tenants {:?} has no name",
                entry.namespaces
            )));
        }
        if self.hubs.iter().any(|h| h.context.is_some() && h.kubeconfig.is_none()) {
            return Err(ConfigError::Invalid(
                "a context can only be selected together with a kubeconfig".to_string(),
            ));
        }
        Ok(())
    }
}

/// Build the hub registry
///
/// `compute` backs the implicit catch-all hub used when no file is given.
pub async fn build_registry(
    hub_config: Option<&Path>,
    compute: &Client,
) -> Result<HubRegistry, ConfigError> {
    let Some(path) = hub_config else {
        info!(hub = DEFAULT_HUB_NAME, "no hub config, using the compute cluster as the only hub");
        return HubRegistry::new(vec![HubInstance::new(DEFAULT_HUB_NAME, vec![], compute.clone())])
            .map_err(|source| ConfigError::Hub {
                hub: DEFAULT_HUB_NAME.to_string(),
                source,
            });
    };

    let file = HubConfigFile::load(path)?;
    let mut hubs = Vec::with_capacity(file.hubs.len());
    for entry in file.hubs {
        let client = hub_client(&entry).await.map_err(|source| ConfigError::Hub {
            hub: entry.name.clone(),
            source,
        })?;
        info!(hub = %entry.name, tenants = ?entry.namespaces, "hub configured");
        hubs.push(HubInstance::new(entry.name, entry.namespaces, client));
    }
    HubRegistry::new(hubs).map_err(|e| ConfigError::Invalid(e.to_string()))
}

async fn hub_client(entry: &HubEntry) -> Result<Client, compute_common::Error> {
    let config = load_config(entry.kubeconfig.as_deref(), entry.context.as_deref()).await?;
    create_client(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_hubs_with_tenants_and_catch_all() {
        let file = write(
            r#"
hubs:
  - name: east
    kubeconfig: /etc/hubs/east/kubeconfig
    context: hub-admin
    namespaces: [team-a, team-b]
  - name: default
"#,
        );
        let parsed = HubConfigFile::load(file.path()).unwrap();

        assert_eq!(parsed.hubs.len(), 2);
        assert_eq!(parsed.hubs[0].name, "east");
        assert_eq!(
            parsed.hubs[0].kubeconfig.as_deref(),
            Some(Path::new("/etc/hubs/east/kubeconfig"))
        );
        assert_eq!(parsed.hubs[0].context.as_deref(), Some("hub-admin"));
        assert_eq!(parsed.hubs[0].namespaces, vec!["team-a", "team-b"]);
        assert_eq!(
            parsed.hubs[1],
            HubEntry {
                name: "default".to_string(),
                kubeconfig: None,
                context: None,
                namespaces: vec![],
            }
        );
    }

    #[test]
    fn missing_file_reports_the_path() {
        let err = HubConfigFile::load(Path::new("/nonexistent/hubs.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("/nonexistent/hubs.yaml"));
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let file = write("hubs: {name: [");
        assert!(matches!(
            HubConfigFile::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn rejects_unusable_hub_lists() {
        for contents in [
            "hubs: []",
            "hubs:\n  - name: \"\"\n    namespaces: [team-a]",
            "hubs:\n  - name: east\n    context: admin",
        ] {
            let file = write(contents);
            assert!(
                matches!(HubConfigFile::load(file.path()), Err(ConfigError::Invalid(_))),
                "accepted {contents:?}"
            );
        }
    }
}
