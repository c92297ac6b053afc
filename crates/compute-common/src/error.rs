//! Error types for the compute operator
//!
//! Errors are structured with fields to aid debugging in production. The
//! variants follow the failure categories the reconciler distinguishes:
//! transient API failures, structural inconsistencies between an intent
//! object and its derived objects, derived objects that are not visible yet,
//! and configuration problems that no amount of retrying will fix.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for compute operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    ///
    /// Optimistic-concurrency failures arrive here as HTTP 409 and are
    /// detected with [`Error::is_conflict`].
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// More than one derived object matched the correlation labels
    #[error("found {count} {kind} objects correlated with {owner}, expected at most one")]
    DuplicateCorrelation {
        /// Kind of the derived object (e.g., "ManagedCluster")
        kind: String,
        /// `namespace/name` of the owning RegisteredCluster
        owner: String,
        /// Number of matches returned
        count: usize,
    },

    /// A derived object the reconciler depends on is not visible yet
    #[error("{kind} for {owner} not found yet")]
    NotFoundYet {
        /// Kind of the derived object
        kind: String,
        /// `namespace/name` of the owning RegisteredCluster
        owner: String,
    },

    /// No hub is configured to serve the tenant namespace
    #[error("no hub configured for namespace {namespace}")]
    HubNotFound {
        /// Tenant namespace that failed to resolve
        namespace: String,
    },

    /// The syncer service account has no usable token yet
    #[error("failed to get the token of workspace service account {service_account} in {location}")]
    TokenNotIssued {
        /// Name of the service account
        service_account: String,
        /// Workspace location the account lives in
        location: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Manifest template failed to render
    #[error("template error [{template}]: {message}")]
    Template {
        /// Name of the template
        template: String,
        /// Description of what failed
        message: String,
    },

    /// Invalid operator configuration
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of what's invalid
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "workspace")
        context: String,
    },
}

impl Error {
    /// Create a duplicate-correlation error
    pub fn duplicate(kind: impl Into<String>, owner: impl Into<String>, count: usize) -> Self {
        Self::DuplicateCorrelation {
            kind: kind.into(),
            owner: owner.into(),
            count,
        }
    }

    /// Create a not-found-yet error
    pub fn not_found_yet(kind: impl Into<String>, owner: impl Into<String>) -> Self {
        Self::NotFoundYet {
            kind: kind.into(),
            owner: owner.into(),
        }
    }

    /// Create a hub resolution error
    pub fn hub_not_found(namespace: impl Into<String>) -> Self {
        Self::HubNotFound {
            namespace: namespace.into(),
        }
    }

    /// Create a token-not-issued error
    pub fn token_not_issued(
        service_account: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self::TokenNotIssued {
            service_account: service_account.into(),
            location: location.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a template error for the named template
    pub fn template(template: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Template {
            template: template.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Kubernetes errors are retryable unless they are client errors other
    /// than conflicts. Missing derived objects and unissued tokens resolve
    /// once another controller catches up. Configuration, duplicate
    /// correlation and serialization errors need a human.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) if ae.code == 409 => true,
                kube::Error::Api(ae) => !(400..500).contains(&ae.code),
                _ => true,
            },
            Error::DuplicateCorrelation { .. } => false,
            Error::NotFoundYet { .. } => true,
            Error::HubNotFound { .. } => false,
            Error::TokenNotIssued { .. } => true,
            Error::Serialization { .. } => false,
            Error::Template { .. } => false,
            Error::Configuration { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Check if this is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }

    /// Check if this is a Kubernetes not-found response
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> Error {
        Error::from(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} happened"),
            reason: reason.to_string(),
            code,
        }))
    }

    /// Story: a stale write surfaces as a conflict and the whole reconcile retries
    #[test]
    fn story_version_conflict_is_retryable() {
        let err = api_error(409, "Conflict");
        assert!(err.is_conflict());
        assert!(err.is_retryable());
        assert!(!err.is_not_found());
    }

    #[test]
    fn not_found_is_detected_but_not_retried_blindly() {
        let err = api_error(404, "NotFound");
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
        assert!(!err.is_retryable());
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(api_error(503, "ServiceUnavailable").is_retryable());
        assert!(!api_error(403, "Forbidden").is_retryable());
    }

    /// Story: duplicate ManagedClusters are surfaced with enough context to fix by hand
    #[test]
    fn story_duplicate_correlation_names_the_owner() {
        let err = Error::duplicate("ManagedCluster", "team-a/cluster-1", 2);
        let msg = err.to_string();
        assert!(msg.contains("team-a/cluster-1"));
        assert!(msg.contains("found 2 ManagedCluster"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn configuration_problems_are_not_retryable() {
        assert!(!Error::hub_not_found("team-z").is_retryable());
        assert!(Error::hub_not_found("team-z").to_string().contains("team-z"));
        assert!(!Error::configuration("bad hub file").is_retryable());
    }

    #[test]
    fn transient_dependencies_are_retryable() {
        assert!(Error::not_found_yet("ManagedCluster", "ns/a").is_retryable());
        let err = Error::token_not_issued("kcp-syncer-sa", "root:team-a");
        assert!(err.is_retryable());
        assert!(err.to_string().contains("kcp-syncer-sa"));
    }

    #[test]
    fn internal_error_carries_context() {
        match Error::internal_with_context("reconciler", "object has no namespace") {
            Error::Internal { context, message } => {
                assert_eq!(context, "reconciler");
                assert_eq!(message, "object has no namespace");
            }
            _ => panic!("Expected Internal variant"),
        }
        assert!(Error::internal("x").to_string().contains(UNKNOWN_CONTEXT));
    }

    #[test]
    fn serde_errors_convert_to_serialization() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(Error::from(json_err), Error::Serialization { .. }));
        let err = Error::serialization_for_kind("ManifestWork", "bad field");
        match err {
            Error::Serialization { kind, .. } => assert_eq!(kind.as_deref(), Some("ManifestWork")),
            _ => panic!("Expected Serialization variant"),
        }
    }
}
