//! Embedded manifest templates rendered by the registration controller

use compute_common::template::{ManifestTemplates, TemplateError};

/// ManifestWork delivering the syncer onto the managed cluster
pub const SYNCER_MANIFEST_WORK: &str = "kcp_syncer_manifestwork.yaml";
/// ClusterRole granting the syncer access to its SyncTarget in the workspace
pub const SYNCER_CLUSTER_ROLE: &str = "kcp_syncer_clusterrole.yaml";
/// Binding of [`SYNCER_CLUSTER_ROLE`] to the syncer service account
pub const SYNCER_CLUSTER_ROLE_BINDING: &str = "kcp_syncer_clusterrolebinding.yaml";
/// Secret holding the rendered import command
pub const IMPORT_SECRET: &str = "import_secret.yaml";

/// Build the template set used by the registration controller
pub fn registration_templates() -> Result<ManifestTemplates, TemplateError> {
    ManifestTemplates::new()
        .with_template(
            SYNCER_MANIFEST_WORK,
            include_str!("../templates/kcp_syncer_manifestwork.yaml"),
        )?
        .with_template(
            SYNCER_CLUSTER_ROLE,
            include_str!("../templates/kcp_syncer_clusterrole.yaml"),
        )?
        .with_template(
            SYNCER_CLUSTER_ROLE_BINDING,
            include_str!("../templates/kcp_syncer_clusterrolebinding.yaml"),
        )?
        .with_template(IMPORT_SECRET, include_str!("../templates/import_secret.yaml"))
}
