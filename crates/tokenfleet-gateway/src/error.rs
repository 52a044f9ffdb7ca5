//! API error types and responses.
//!
//! Every failed request gets a JSON body of the form
//! `{"error": <kind>, "message": <text>}`. Namespace conflicts also carry
//! `namespace` and `currentOwner` so the caller can decide on a takeover.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use tokenfleet_cluster::ClusterError;
use tokenfleet_core::IdError;

/// API error type that implements `IntoResponse`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A coordinator operation failed.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// The request body or query could not be parsed.
    #[error("bad request: {0}")]
    BadRequest(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_owner: Option<String>,
}

impl ApiError {
    /// Get the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Cluster(err) => StatusCode::from_u16(err.http_status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get the error kind reported in the body.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Cluster(err) => err.kind(),
            Self::BadRequest(_) => "InvalidRequest",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (namespace, current_owner) = match &self {
            Self::Cluster(ClusterError::NamespaceConflict {
                namespace,
                current_owner,
            }) => (Some(namespace.to_string()), Some(current_owner.to_string())),
            _ => (None, None),
        };

        let body = ErrorResponse {
            error: self.kind(),
            message: self.to_string(),
            namespace,
            current_owner,
        };

        (status, Json(body)).into_response()
    }
}

impl From<IdError> for ApiError {
    fn from(err: IdError) -> Self {
        Self::Cluster(ClusterError::Id(err))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokenfleet_core::{InstanceId, Namespace};

    #[test]
    fn error_status_codes() {
        let conflict = ApiError::from(ClusterError::NamespaceConflict {
            namespace: Namespace::new("ns1").unwrap(),
            current_owner: InstanceId::new("10.0.0.1@8719").unwrap(),
        });
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(conflict.kind(), "NamespaceConflict");

        let not_eligible = ApiError::from(ClusterError::NotEligible(
            InstanceId::new("10.0.0.1@8719").unwrap(),
        ));
        assert_eq!(not_eligible.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        assert_eq!(
            ApiError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(IdError::Blank("app name")).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn error_kinds() {
        assert_eq!(ApiError::BadRequest("x".into()).kind(), "InvalidRequest");
        assert_eq!(
            ApiError::from(IdError::InvalidPort(0)).kind(),
            "InvalidRequest"
        );
    }
}
