//! Read-only views of cluster assignment state.
//!
//! Every view is computed from one [`AppCluster`] snapshot and never stored.
//! An application nobody has registered yet simply yields an empty view.

use std::collections::BTreeSet;

use serde::Serialize;
use tokenfleet_core::{AppName, InstanceId, Namespace};

use crate::mode::{ClientConfig, ClusterMode, ServerConfig};
use crate::registry::Instance;
use crate::state::AppCluster;

/// One instance as seen in the assignment view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceState {
    /// Instance identifier.
    pub instance_id: InstanceId,
    /// Reported IP or host name.
    pub ip: String,
    /// Reported command port.
    pub port: u16,
    /// Whether the instance may become a token server.
    pub belong_to_app: bool,
    /// Current mode code.
    pub mode: ClusterMode,
    /// Part of the assigned server's group (the server or one of its clients).
    pub selected: bool,
    /// Whether heartbeats are arriving in time.
    pub healthy: bool,
}

/// Assignment view of one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignState {
    /// Application.
    pub app: AppName,
    /// All instances in registration order.
    pub instances: Vec<InstanceState>,
    /// The application's assigned server, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_server: Option<TokenServer>,
}

impl AssignState {
    /// The view of an application with no instances.
    #[must_use]
    pub const fn empty(app: AppName) -> Self {
        Self {
            app,
            instances: Vec::new(),
            assigned_server: None,
        }
    }
}

/// Clients connected to one namespace of a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionGroup {
    /// Namespace.
    pub namespace: Namespace,
    /// Number of bound clients.
    pub connected_count: usize,
}

/// Server-side state reported for a token server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenServerState {
    /// Application the server belongs to.
    pub app_name: AppName,
    /// Token port.
    pub port: u16,
    /// Owned namespaces.
    pub namespace_set: BTreeSet<Namespace>,
    /// Whether the server runs inside the application process, as the
    /// instance reported at registration.
    pub embedded: bool,
    /// Idle connection timeout in seconds.
    pub idle_seconds: u64,
    /// Per-namespace connection counts.
    pub connection: Vec<ConnectionGroup>,
}

/// A token server in the operator overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenServer {
    /// Instance identifier.
    pub id: InstanceId,
    /// Instance IP or host name.
    pub ip: String,
    /// Instance command port.
    pub port: u16,
    /// Number of clients bound to this server.
    pub connected_count: usize,
    /// Whether the instance belongs to its application.
    pub belong_to_app: bool,
    /// Server settings.
    pub state: TokenServerState,
}

/// A token client in the operator overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClient {
    /// Application.
    pub app: AppName,
    /// Instance identifier.
    pub instance_id: InstanceId,
    /// Instance IP or host name.
    pub ip: String,
    /// Instance command port.
    pub port: u16,
    /// Host the client sends token requests to.
    pub server_host: String,
    /// Port the client sends token requests to.
    pub server_port: u16,
    /// Token request timeout in milliseconds.
    pub request_timeout: u64,
}

/// Mode details of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateInfo {
    /// Mode code.
    pub mode: ClusterMode,
    /// The instance's reported embedded flag.
    pub embedded: bool,
    /// Server settings when `mode` is server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,
    /// Client settings when `mode` is client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientConfig>,
}

/// Full cluster state of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterState {
    /// Application.
    pub app: AppName,
    /// Instance identifier.
    pub instance_id: InstanceId,
    /// Instance IP or host name.
    pub ip: String,
    /// Instance command port.
    pub port: u16,
    /// Mode details.
    pub state_info: StateInfo,
}

/// Build the assignment view of an application.
#[must_use]
pub fn assign_state(cluster: &AppCluster) -> AssignState {
    let assigned = cluster.assigned_server();
    let assigned_id = assigned.map(|s| &s.instance_id);

    let instances = cluster
        .registry()
        .list()
        .iter()
        .map(|instance| {
            let selected = assigned_id.is_some_and(|server_id| {
                instance.instance_id == *server_id
                    || instance
                        .mode
                        .client()
                        .is_some_and(|c| c.server_id == *server_id)
            });
            InstanceState {
                instance_id: instance.instance_id.clone(),
                ip: instance.ip.clone(),
                port: instance.port,
                belong_to_app: instance.belong_to_app,
                mode: instance.mode.kind(),
                selected,
                healthy: instance.healthy,
            }
        })
        .collect();

    AssignState {
        app: cluster.app().clone(),
        instances,
        assigned_server: assigned.and_then(|server| token_server(cluster, server)),
    }
}

/// The token server view of `server`, or `None` if it is not a server.
#[must_use]
pub fn token_server(cluster: &AppCluster, server: &Instance) -> Option<TokenServer> {
    let config = server.mode.server()?;
    let connected_count = cluster.clients_of(&server.instance_id).count();
    let default_namespace = cluster.app().default_namespace();

    let connection = config
        .namespace_set
        .iter()
        .map(|namespace| ConnectionGroup {
            namespace: namespace.clone(),
            connected_count: if *namespace == default_namespace {
                connected_count
            } else {
                0
            },
        })
        .collect();

    Some(TokenServer {
        id: server.instance_id.clone(),
        ip: server.ip.clone(),
        port: server.port,
        connected_count,
        belong_to_app: server.belong_to_app,
        state: TokenServerState {
            app_name: cluster.app().clone(),
            port: config.port,
            namespace_set: config.namespace_set.clone(),
            embedded: server.embedded,
            idle_seconds: config.idle_seconds,
            connection,
        },
    })
}

/// All servers of an application, including unhealthy ones.
#[must_use]
pub fn token_servers(cluster: &AppCluster) -> Vec<TokenServer> {
    cluster
        .registry()
        .list()
        .iter()
        .filter_map(|instance| token_server(cluster, instance))
        .collect()
}

/// All clients of an application.
#[must_use]
pub fn token_clients(cluster: &AppCluster) -> Vec<TokenClient> {
    cluster
        .registry()
        .list()
        .iter()
        .filter_map(|instance| {
            let client = instance.mode.client()?;
            Some(TokenClient {
                app: cluster.app().clone(),
                instance_id: instance.instance_id.clone(),
                ip: instance.ip.clone(),
                port: instance.port,
                server_host: client.server_host.clone(),
                server_port: client.server_port,
                request_timeout: client.request_timeout,
            })
        })
        .collect()
}

/// The cluster state of one instance.
#[must_use]
pub fn cluster_state(cluster: &AppCluster, instance: &Instance) -> ClusterState {
    ClusterState {
        app: cluster.app().clone(),
        instance_id: instance.instance_id.clone(),
        ip: instance.ip.clone(),
        port: instance.port,
        state_info: StateInfo {
            mode: instance.mode.kind(),
            embedded: instance.embedded,
            server: instance.mode.server().cloned(),
            client: instance.mode.client().cloned(),
        },
    }
}

/// The cluster states of every instance of an application.
#[must_use]
pub fn cluster_states(cluster: &AppCluster) -> Vec<ClusterState> {
    cluster
        .registry()
        .list()
        .iter()
        .map(|instance| cluster_state(cluster, instance))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssignmentRequest, CoordinatorConfig, InstanceRegistration};
    use chrono::Utc;

    fn app() -> AppName {
        AppName::new("checkout").unwrap()
    }

    fn ns(name: &str) -> Namespace {
        Namespace::new(name).unwrap()
    }

    /// A cluster with server `10.0.0.1@8719` owning `checkout` and `orders`,
    /// client `10.0.0.2@8719`, and standalone `10.0.0.3@8719`.
    fn cluster() -> AppCluster {
        let config = CoordinatorConfig::default();
        let now = Utc::now();
        let mut events = Vec::new();
        let mut cluster = AppCluster::new(app());

        let mut ids = Vec::new();
        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            let instance = cluster
                .register(InstanceRegistration::new(app(), ip, 8719), now, &mut events)
                .unwrap();
            ids.push(instance.instance_id);
        }

        let request = AssignmentRequest::new(
            app(),
            ids[0].clone(),
            [ns("checkout"), ns("orders")],
        )
        .with_clients([ids[1].clone()]);
        cluster.assign(&request, &config, now, &mut events).unwrap();
        cluster
    }

    #[test]
    fn assign_state_marks_server_group_selected() {
        let view = assign_state(&cluster());

        assert_eq!(view.instances.len(), 3);
        let modes: Vec<_> = view.instances.iter().map(|i| i.mode.code()).collect();
        assert_eq!(modes, vec![1, 2, 0]);
        let selected: Vec<_> = view.instances.iter().map(|i| i.selected).collect();
        assert_eq!(selected, vec![true, true, false]);

        let server = view.assigned_server.unwrap();
        assert_eq!(server.id.as_str(), "10.0.0.1@8719");
        assert_eq!(server.connected_count, 1);
        assert_eq!(server.state.port, 18730);
    }

    #[test]
    fn connection_counts_follow_default_namespace() {
        let cluster = cluster();
        let servers = token_servers(&cluster);

        assert_eq!(servers.len(), 1);
        let groups: Vec<_> = servers[0]
            .state
            .connection
            .iter()
            .map(|g| (g.namespace.as_str().to_string(), g.connected_count))
            .collect();
        assert_eq!(
            groups,
            vec![("checkout".to_string(), 1), ("orders".to_string(), 0)]
        );
    }

    #[test]
    fn client_view_points_at_server_address() {
        let clients = token_clients(&cluster());

        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].instance_id.as_str(), "10.0.0.2@8719");
        assert_eq!(clients[0].server_host, "10.0.0.1");
        assert_eq!(clients[0].server_port, 18730);
        assert_eq!(clients[0].request_timeout, 20);
    }

    #[test]
    fn empty_app_projects_empty_view() {
        let view = assign_state(&AppCluster::new(app()));
        assert_eq!(view, AssignState::empty(app()));
    }

    #[test]
    fn cluster_state_json_shape() {
        let cluster = cluster();
        let states = cluster_states(&cluster);
        let json = serde_json::to_value(&states[0]).unwrap();

        assert_eq!(json["instanceId"], "10.0.0.1@8719");
        assert_eq!(json["stateInfo"]["mode"], 1);
        assert_eq!(json["stateInfo"]["server"]["port"], 18730);
        assert!(json["stateInfo"].get("client").is_none());

        let standalone = serde_json::to_value(&states[2]).unwrap();
        assert_eq!(standalone["stateInfo"]["mode"], 0);
        assert!(standalone["stateInfo"].get("server").is_none());
    }

    #[test]
    fn embedded_flag_follows_registration() {
        let config = CoordinatorConfig::default();
        let now = Utc::now();
        let mut events = Vec::new();
        let mut cluster = AppCluster::new(app());
        let alone = cluster
            .register(
                InstanceRegistration::new(app(), "10.0.0.9", 18730).embedded(false),
                now,
                &mut events,
            )
            .unwrap()
            .instance_id;
        cluster
            .assign(
                &AssignmentRequest::new(app(), alone.clone(), [ns("checkout")]),
                &config,
                now,
                &mut events,
            )
            .unwrap();

        assert!(!token_servers(&cluster)[0].state.embedded);
        let json = serde_json::to_value(cluster_states(&cluster)).unwrap();
        assert_eq!(json[0]["stateInfo"]["embedded"], false);
        assert_eq!(cluster_states(&cluster)[0].state_info.mode, ClusterMode::Server);
    }
}
