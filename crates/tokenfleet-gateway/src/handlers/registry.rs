//! Instance registry endpoints.
//!
//! Instances report themselves here periodically; every report doubles as a
//! heartbeat.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use tokenfleet_cluster::{ClusterControl, Instance, InstanceRegistration};
use tokenfleet_core::{AppName, InstanceId};

use crate::error::ApiError;
use crate::state::GatewayState;

/// Response for the application list.
#[derive(Debug, Serialize)]
pub struct AppsResponse {
    /// Applications with at least one registered instance.
    pub apps: Vec<AppName>,
}

/// Response for the instance list of one application.
#[derive(Debug, Serialize)]
pub struct InstancesResponse {
    /// Application.
    pub app: AppName,
    /// Instances in registration order.
    pub instances: Vec<Instance>,
}

/// Register an instance or refresh its heartbeat.
///
/// # Errors
///
/// Returns `InvalidRequest` if the address or metadata is invalid.
pub async fn register_instance<C>(
    State(state): State<Arc<GatewayState<C>>>,
    payload: Result<Json<InstanceRegistration>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ClusterControl + 'static,
{
    let Json(registration) = payload?;
    let instance = state.cluster.register(registration)?;

    tracing::debug!(
        app = %instance.app,
        instance_id = %instance.instance_id,
        "Instance reported"
    );

    Ok(Json(instance))
}

/// Deregister an instance.
///
/// # Errors
///
/// Returns `InstanceNotFound` if the instance is not registered.
pub async fn remove_instance<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path((app, instance_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ClusterControl + 'static,
{
    let app = AppName::new(app)?;
    let instance_id = InstanceId::new(instance_id)?;
    state.cluster.remove_instance(&app, &instance_id)?;

    Ok(StatusCode::NO_CONTENT)
}

/// List applications.
pub async fn list_apps<C>(State(state): State<Arc<GatewayState<C>>>) -> impl IntoResponse
where
    C: ClusterControl + 'static,
{
    Json(AppsResponse {
        apps: state.cluster.apps(),
    })
}

/// List the instances of one application.
///
/// # Errors
///
/// Returns `InvalidRequest` if the app name is invalid.
pub async fn list_instances<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(app): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ClusterControl + 'static,
{
    let app = AppName::new(app)?;
    let instances = state.cluster.list(&app);

    Ok(Json(InstancesResponse { app, instances }))
}
