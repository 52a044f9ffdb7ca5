//! Cluster assignment endpoints.
//!
//! Mutating endpoints return the application's assignment view after the
//! change, except unbind which returns an empty object.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use tokenfleet_cluster::{
    AssignmentRequest, BindClientRequest, ClusterControl, ClusterError,
    ModifyClientConfigRequest, ModifyModeRequest, ModifyServerConfigRequest, UnbindRequest,
};
use tokenfleet_core::{AppName, InstanceId};

use crate::error::ApiError;
use crate::handlers::Empty;
use crate::state::GatewayState;

// =============================================================================
// Request Types
// =============================================================================

/// Optional application filter for overview endpoints.
#[derive(Debug, Deserialize)]
pub struct AppFilter {
    /// Restrict the overview to one application.
    #[serde(default)]
    pub app: Option<AppName>,
}

/// Query identifying one instance.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceQuery {
    /// Application.
    pub app: AppName,
    /// Instance identifier.
    pub instance_id: InstanceId,
}

// =============================================================================
// Assignment
// =============================================================================

/// Assign a token server.
///
/// # Errors
///
/// Returns `InstanceNotFound` (404), `NamespaceConflict` (409), or
/// `NotEligible` / `InvalidTransition` (422).
pub async fn assign<C>(
    State(state): State<Arc<GatewayState<C>>>,
    payload: Result<Json<AssignmentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ClusterControl + 'static,
{
    let Json(request) = payload?;
    let view = state.cluster.assign(request)?;

    Ok(Json(view))
}

/// Return an instance to standalone mode.
///
/// # Errors
///
/// Returns `InstanceNotFound` if the instance is not registered.
pub async fn unbind<C>(
    State(state): State<Arc<GatewayState<C>>>,
    payload: Result<Json<UnbindRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ClusterControl + 'static,
{
    let Json(request) = payload?;
    tracing::info!(app = %request.app, instance_id = %request.instance_id, "Unbinding instance");
    state.cluster.unbind(request)?;

    Ok(Json(Empty {}))
}

/// Bind a client to a specific server.
///
/// # Errors
///
/// Returns `ServerNotActive` if the target is not a live server.
pub async fn bind_client<C>(
    State(state): State<Arc<GatewayState<C>>>,
    payload: Result<Json<BindClientRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ClusterControl + 'static,
{
    let Json(request) = payload?;
    let app = request.app.clone();
    state.cluster.bind_client(request)?;

    Ok(Json(state.cluster.project(&app)))
}

/// Switch an instance's mode using default settings.
///
/// # Errors
///
/// Returns the error of the underlying unbind, assign, or bind.
pub async fn modify_mode<C>(
    State(state): State<Arc<GatewayState<C>>>,
    payload: Result<Json<ModifyModeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ClusterControl + 'static,
{
    let Json(request) = payload?;
    let app = request.app.clone();
    state.cluster.modify_mode(request)?;

    Ok(Json(state.cluster.project(&app)))
}

/// Edit a server's namespaces and transport settings.
///
/// # Errors
///
/// Returns `ServerNotActive` if the instance is not a server, or
/// `NamespaceConflict` if a namespace belongs to another live server.
pub async fn modify_server_config<C>(
    State(state): State<Arc<GatewayState<C>>>,
    payload: Result<Json<ModifyServerConfigRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ClusterControl + 'static,
{
    let Json(request) = payload?;
    let app = request.app.clone();
    state.cluster.modify_server_config(request)?;

    Ok(Json(state.cluster.project(&app)))
}

/// Bind a client to the server at an address.
///
/// # Errors
///
/// Returns `ServerNotActive` if no live server listens at the address.
pub async fn modify_client_config<C>(
    State(state): State<Arc<GatewayState<C>>>,
    payload: Result<Json<ModifyClientConfigRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ClusterControl + 'static,
{
    let Json(request) = payload?;
    let app = request.app.clone();
    state.cluster.modify_client_config(request)?;

    Ok(Json(state.cluster.project(&app)))
}

// =============================================================================
// Projections
// =============================================================================

/// Assignment view of an application.
///
/// # Errors
///
/// Returns `InvalidRequest` if the app name is invalid.
pub async fn get_assign_state<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(app): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ClusterControl + 'static,
{
    let app = AppName::new(app)?;
    Ok(Json(state.cluster.project(&app)))
}

/// Token servers, optionally filtered by application.
///
/// # Errors
///
/// Returns `InvalidRequest` if the query is malformed.
pub async fn list_servers<C>(
    State(state): State<Arc<GatewayState<C>>>,
    filter: Result<Query<AppFilter>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ClusterControl + 'static,
{
    let Query(filter) = filter?;
    Ok(Json(state.cluster.servers(filter.app.as_ref())))
}

/// Token clients, optionally filtered by application.
///
/// # Errors
///
/// Returns `InvalidRequest` if the query is malformed.
pub async fn list_clients<C>(
    State(state): State<Arc<GatewayState<C>>>,
    filter: Result<Query<AppFilter>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ClusterControl + 'static,
{
    let Query(filter) = filter?;
    Ok(Json(state.cluster.clients(filter.app.as_ref())))
}

/// Cluster states of every instance of an application.
///
/// # Errors
///
/// Returns `InvalidRequest` if the app name is invalid.
pub async fn list_cluster_states<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(app): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ClusterControl + 'static,
{
    let app = AppName::new(app)?;
    Ok(Json(state.cluster.cluster_states(&app)))
}

/// Cluster state of one instance.
///
/// # Errors
///
/// Returns `InstanceNotFound` if the instance is not registered.
pub async fn get_cluster_state<C>(
    State(state): State<Arc<GatewayState<C>>>,
    query: Result<Query<InstanceQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ClusterControl + 'static,
{
    let Query(InstanceQuery { app, instance_id }) = query?;
    let cluster_state = state
        .cluster
        .cluster_state(&app, &instance_id)
        .ok_or(ClusterError::InstanceNotFound {
            app: Some(app),
            instance_id,
        })?;

    Ok(Json(cluster_state))
}
