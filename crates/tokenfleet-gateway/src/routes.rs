//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;

use axum::body::Body;
use axum::routing::{delete, get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::map_response_body::MapResponseBodyLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use tokenfleet_cluster::ClusterControl;

use crate::handlers::{cluster, health, registry};
use crate::state::GatewayState;

/// Create the gateway router with all routes and middleware.
///
/// # Routes
///
/// ## Registry
/// - `GET /health` - Health check
/// - `POST /registry/instance` - Register an instance / heartbeat
/// - `DELETE /registry/instance/:app/:instance_id` - Deregister an instance
/// - `GET /registry/apps` - List applications
/// - `GET /registry/instances/:app` - List instances of an application
///
/// ## Assignment
/// - `POST /cluster/assign` - Assign a token server
/// - `POST /cluster/unbind` - Return an instance to standalone
/// - `POST /cluster/bind` - Bind a client to a server
/// - `POST /cluster/config/modify_single` - Switch an instance's mode
/// - `POST /cluster/server/modify_config` - Edit a server
/// - `POST /cluster/client/modify_config` - Bind a client by server address
///
/// ## Views
/// - `GET /cluster/assign/:app` - Assignment view of an application
/// - `GET /cluster/server`, `GET /cluster/server_list?app=` - Token servers
/// - `GET /cluster/client`, `GET /cluster/client_list?app=` - Token clients
/// - `GET /cluster/state/:app` - Cluster state of every instance
/// - `GET /cluster/state_single?app=&instanceId=` - Cluster state of one instance
pub fn create_router<C>(state: GatewayState<C>) -> Router
where
    C: ClusterControl + 'static,
{
    // Extract config values before moving state
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout = state.config.request_timeout();

    let state = Arc::new(state);

    Router::new()
        .route("/health", get(health::health::<C>))
        // Registry
        .route("/registry/instance", post(registry::register_instance::<C>))
        .route(
            "/registry/instance/:app/:instance_id",
            delete(registry::remove_instance::<C>),
        )
        .route("/registry/apps", get(registry::list_apps::<C>))
        .route("/registry/instances/:app", get(registry::list_instances::<C>))
        // Assignment
        .route("/cluster/assign", post(cluster::assign::<C>))
        .route("/cluster/unbind", post(cluster::unbind::<C>))
        .route("/cluster/bind", post(cluster::bind_client::<C>))
        .route(
            "/cluster/config/modify_single",
            post(cluster::modify_mode::<C>),
        )
        .route(
            "/cluster/server/modify_config",
            post(cluster::modify_server_config::<C>),
        )
        .route(
            "/cluster/client/modify_config",
            post(cluster::modify_client_config::<C>),
        )
        // Views
        .route("/cluster/assign/:app", get(cluster::get_assign_state::<C>))
        .route("/cluster/server", get(cluster::list_servers::<C>))
        .route("/cluster/server_list", get(cluster::list_servers::<C>))
        .route("/cluster/client", get(cluster::list_clients::<C>))
        .route("/cluster/client_list", get(cluster::list_clients::<C>))
        .route("/cluster/state/:app", get(cluster::list_cluster_states::<C>))
        .route("/cluster/state_single", get(cluster::get_cluster_state::<C>))
        // Middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(request_timeout))
                .layer(cors)
                .layer(MapResponseBodyLayer::new(Body::new))
                .layer(RequestBodyLimitLayer::new(max_body_bytes)),
        )
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(origins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::{json, Value};
    use tokenfleet_cluster::ClusterCoordinator;

    use crate::config::GatewayConfig;

    fn server() -> TestServer {
        let cluster = Arc::new(ClusterCoordinator::with_defaults());
        let state = GatewayState::new(cluster, GatewayConfig::default());
        TestServer::new(create_router(state)).unwrap()
    }

    async fn register(server: &TestServer, ip: &str) -> String {
        let response = server
            .post("/registry/instance")
            .json(&json!({ "app": "checkout", "ip": ip, "port": 8719 }))
            .await;
        response.assert_status_ok();
        response.json::<Value>()["instanceId"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn cors_specific_origins() {
        let origins = vec![
            "http://localhost:3000".to_string(),
            "https://ops.example.com".to_string(),
        ];
        let _layer = build_cors_layer(&origins);
    }

    #[tokio::test]
    async fn assign_returns_projection() {
        let server = server();
        let a = register(&server, "10.0.0.1").await;
        let b = register(&server, "10.0.0.2").await;

        let response = server
            .post("/cluster/assign")
            .json(&json!({
                "app": "checkout",
                "instanceId": a,
                "namespaceSet": ["ns1"],
                "clientSet": [b],
            }))
            .await;

        response.assert_status_ok();
        let body = response.json::<Value>();
        assert_eq!(body["app"], "checkout");
        assert_eq!(body["instances"][0]["mode"], 1);
        assert_eq!(body["instances"][1]["mode"], 2);
        assert_eq!(body["instances"][1]["selected"], true);
        assert_eq!(body["assignedServer"]["id"], a);
        assert_eq!(body["assignedServer"]["connectedCount"], 1);
        assert_eq!(body["assignedServer"]["state"]["namespaceSet"], json!(["ns1"]));
    }

    #[tokio::test]
    async fn assign_conflict_reports_owner() {
        let server = server();
        let a = register(&server, "10.0.0.1").await;
        let b = register(&server, "10.0.0.2").await;

        server
            .post("/cluster/assign")
            .json(&json!({ "instanceId": a, "namespaceSet": ["ns1"] }))
            .await
            .assert_status_ok();

        let response = server
            .post("/cluster/assign")
            .json(&json!({ "instanceId": b, "namespaceSet": ["ns1"], "newServer": false }))
            .await;

        response.assert_status(StatusCode::CONFLICT);
        let body = response.json::<Value>();
        assert_eq!(body["error"], "NamespaceConflict");
        assert_eq!(body["namespace"], "ns1");
        assert_eq!(body["currentOwner"], a);
    }

    #[tokio::test]
    async fn assign_errors_map_to_status_codes() {
        let server = server();
        server
            .post("/registry/instance")
            .json(&json!({
                "app": "checkout",
                "ip": "10.0.0.9",
                "port": 8719,
                "belongToApp": false,
            }))
            .await
            .assert_status_ok();

        let response = server
            .post("/cluster/assign")
            .json(&json!({ "instanceId": "10.0.0.9@8719", "namespaceSet": ["ns1"] }))
            .await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(response.json::<Value>()["error"], "NotEligible");

        let response = server
            .post("/cluster/assign")
            .json(&json!({ "instanceId": "10.9.9.9@1", "namespaceSet": ["ns1"] }))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<Value>()["error"], "InstanceNotFound");

        let response = server
            .post("/cluster/assign")
            .json(&json!({ "namespaceSet": ["ns1"] }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["error"], "InvalidRequest");
    }

    #[tokio::test]
    async fn unbind_returns_empty_object() {
        let server = server();
        let a = register(&server, "10.0.0.1").await;

        for _ in 0..2 {
            let response = server
                .post("/cluster/unbind")
                .json(&json!({ "app": "checkout", "instanceId": a }))
                .await;
            response.assert_status_ok();
            assert_eq!(response.json::<Value>(), json!({}));
        }

        server
            .post("/cluster/unbind")
            .json(&json!({ "app": "checkout", "instanceId": "10.9.9.9@1" }))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_registration_is_rejected() {
        let server = server();

        let response = server
            .post("/registry/instance")
            .json(&json!({ "app": "checkout", "ip": "10.0.0.1", "port": 70000 }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["error"], "InvalidRequest");
    }

    #[tokio::test]
    async fn registry_and_views() {
        let server = server();
        let a = register(&server, "10.0.0.1").await;
        register(&server, "10.0.0.2").await;

        let apps = server.get("/registry/apps").await.json::<Value>();
        assert_eq!(apps["apps"], json!(["checkout"]));

        let instances = server
            .get("/registry/instances/checkout")
            .await
            .json::<Value>();
        assert_eq!(instances["instances"].as_array().unwrap().len(), 2);

        server
            .post("/cluster/config/modify_single")
            .json(&json!({ "app": "checkout", "instanceId": a, "mode": 1 }))
            .await
            .assert_status_ok();
        server
            .post("/cluster/config/modify_single")
            .json(&json!({ "app": "checkout", "instanceId": "10.0.0.2@8719", "mode": 2 }))
            .await
            .assert_status_ok();

        let servers = server
            .get("/cluster/server_list")
            .add_query_param("app", "checkout")
            .await
            .json::<Value>();
        assert_eq!(servers[0]["state"]["namespaceSet"], json!(["checkout"]));
        assert_eq!(servers[0]["state"]["connection"][0]["connectedCount"], 1);

        let clients = server.get("/cluster/client").await.json::<Value>();
        assert_eq!(clients[0]["serverHost"], "10.0.0.1");
        assert_eq!(clients[0]["serverPort"], 18730);

        let single = server
            .get("/cluster/state_single")
            .add_query_param("app", "checkout")
            .add_query_param("instanceId", a.as_str())
            .await;
        single.assert_status_ok();
        assert_eq!(single.json::<Value>()["stateInfo"]["mode"], 1);

        server
            .get("/cluster/state_single")
            .add_query_param("app", "checkout")
            .add_query_param("instanceId", "10.9.9.9@1")
            .await
            .assert_status(StatusCode::NOT_FOUND);

        let states = server.get("/cluster/state/checkout").await.json::<Value>();
        assert_eq!(states.as_array().unwrap().len(), 2);

        let view = server.get("/cluster/assign/unknown").await;
        view.assert_status_ok();
        assert_eq!(view.json::<Value>()["instances"], json!([]));
    }

    #[tokio::test]
    async fn modify_configs() {
        let server = server();
        let a = register(&server, "10.0.0.1").await;
        let b = register(&server, "10.0.0.2").await;

        server
            .post("/cluster/assign")
            .json(&json!({ "instanceId": a, "namespaceSet": ["ns1"] }))
            .await
            .assert_status_ok();

        let response = server
            .post("/cluster/server/modify_config")
            .json(&json!({
                "app": "checkout",
                "instanceId": a,
                "namespaceSet": ["ns1", "ns2"],
                "port": 19000,
            }))
            .await;
        response.assert_status_ok();

        let response = server
            .post("/cluster/client/modify_config")
            .json(&json!({
                "app": "checkout",
                "instanceId": b,
                "serverHost": "10.0.0.1",
                "serverPort": 19000,
                "requestTimeout": 50,
            }))
            .await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["instances"][1]["mode"], 2);

        let response = server
            .post("/cluster/client/modify_config")
            .json(&json!({
                "app": "checkout",
                "instanceId": b,
                "serverHost": "10.0.0.1",
                "serverPort": 18730,
            }))
            .await;
        response.assert_status(StatusCode::CONFLICT);
        assert_eq!(response.json::<Value>()["error"], "ServerNotActive");
    }

    #[tokio::test]
    async fn remove_instance_deregisters() {
        let server = server();
        let a = register(&server, "10.0.0.1").await;

        server
            .delete(&format!("/registry/instance/checkout/{a}"))
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .delete(&format!("/registry/instance/checkout/{a}"))
            .await
            .assert_status(StatusCode::NOT_FOUND);

        let apps = server.get("/registry/apps").await.json::<Value>();
        assert_eq!(apps["apps"], json!([]));
    }
}
