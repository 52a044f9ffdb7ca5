//! Error types for the cluster coordinator.
//!
//! Every coordinator operation returns one of these as a value; nothing
//! panics across the component boundary.

use thiserror::Error;
use tokenfleet_core::{AppName, IdError, InstanceId, Namespace};

use crate::mode::ClusterMode;

/// A result type using `ClusterError`.
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Errors that can occur in coordinator operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The referenced instance is not registered.
    #[error("instance not found: {instance_id}")]
    InstanceNotFound {
        /// Application searched, if known.
        app: Option<AppName>,
        /// The missing instance.
        instance_id: InstanceId,
    },

    /// The instance does not declare `belongToApp` and cannot serve tokens.
    #[error("instance {0} does not belong to its app and cannot become a token server")]
    NotEligible(InstanceId),

    /// A requested namespace is owned by another live server.
    #[error("namespace {namespace} is already owned by {current_owner}")]
    NamespaceConflict {
        /// The contested namespace.
        namespace: Namespace,
        /// Its current owner.
        current_owner: InstanceId,
    },

    /// The mode change is not in the transition table.
    #[error("invalid transition for instance {instance_id}: cannot go from {from} to {to}")]
    InvalidTransition {
        /// The instance being transitioned.
        instance_id: InstanceId,
        /// Its current mode.
        from: ClusterMode,
        /// The requested mode.
        to: ClusterMode,
    },

    /// The bind target is not an active token server.
    #[error("instance {0} is not an active token server")]
    ServerNotActive(InstanceId),

    /// No live server matches the given address.
    #[error("no active token server at {host}:{port}")]
    NoServerAtAddress {
        /// Requested host.
        host: String,
        /// Requested token port.
        port: u16,
    },

    /// The application has no live token server to bind to.
    #[error("app {0} has no active token server")]
    NoActiveServer(AppName),

    /// The instance id is registered under several apps and no app was given.
    #[error("instance {instance_id} is registered in several apps: {apps:?}")]
    AmbiguousInstance {
        /// The ambiguous instance.
        instance_id: InstanceId,
        /// Apps that contain it.
        apps: Vec<AppName>,
    },

    /// The request is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An identifier or address failed validation.
    #[error("invalid identifier: {0}")]
    Id(#[from] IdError),
}

impl ClusterError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::InstanceNotFound { .. } => 404,
            Self::NamespaceConflict { .. }
            | Self::ServerNotActive(_)
            | Self::NoServerAtAddress { .. }
            | Self::NoActiveServer(_) => 409,
            Self::NotEligible(_) | Self::InvalidTransition { .. } => 422,
            Self::AmbiguousInstance { .. } | Self::InvalidRequest(_) | Self::Id(_) => 400,
        }
    }

    /// The stable error kind reported to callers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InstanceNotFound { .. } => "InstanceNotFound",
            Self::NotEligible(_) => "NotEligible",
            Self::NamespaceConflict { .. } => "NamespaceConflict",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::ServerNotActive(_) | Self::NoServerAtAddress { .. } | Self::NoActiveServer(_) => {
                "ServerNotActive"
            }
            Self::AmbiguousInstance { .. } => "AmbiguousInstance",
            Self::InvalidRequest(_) | Self::Id(_) => "InvalidRequest",
        }
    }

    pub(crate) fn not_found(app: &AppName, instance_id: &InstanceId) -> Self {
        Self::InstanceNotFound {
            app: Some(app.clone()),
            instance_id: instance_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> InstanceId {
        InstanceId::new(s).unwrap()
    }

    #[test]
    fn error_status_codes() {
        let app = AppName::new("checkout").unwrap();

        assert_eq!(ClusterError::not_found(&app, &id("a")).http_status_code(), 404);
        assert_eq!(
            ClusterError::NamespaceConflict {
                namespace: Namespace::new("ns1").unwrap(),
                current_owner: id("a"),
            }
            .http_status_code(),
            409
        );
        assert_eq!(ClusterError::NotEligible(id("a")).http_status_code(), 422);
        assert_eq!(
            ClusterError::InvalidTransition {
                instance_id: id("a"),
                from: ClusterMode::Server,
                to: ClusterMode::Client,
            }
            .http_status_code(),
            422
        );
        assert_eq!(ClusterError::ServerNotActive(id("a")).http_status_code(), 409);
        assert_eq!(
            ClusterError::InvalidRequest("x".into()).http_status_code(),
            400
        );
    }

    #[test]
    fn error_kinds() {
        assert_eq!(ClusterError::NotEligible(id("a")).kind(), "NotEligible");
        assert_eq!(
            ClusterError::NoServerAtAddress {
                host: "10.0.0.1".into(),
                port: 18730
            }
            .kind(),
            "ServerNotActive"
        );
        assert_eq!(
            ClusterError::from(IdError::Blank("app name")).kind(),
            "InvalidRequest"
        );
    }
}
