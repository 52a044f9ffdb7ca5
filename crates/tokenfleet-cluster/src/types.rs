//! Request and configuration types for coordinator operations.
//!
//! These types define the API contracts for registration, assignment,
//! unbinding, and configuration edits.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokenfleet_core::{AppName, InstanceId, Namespace};

use crate::mode::ClusterMode;

/// A heartbeat-borne registration of an instance.
///
/// Registration is an idempotent upsert keyed by `(app, instance_id)`; it
/// also counts as a heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRegistration {
    /// Application the instance belongs to.
    pub app: AppName,
    /// Explicit instance identifier. Defaults to `ip@port`.
    #[serde(default)]
    pub instance_id: Option<InstanceId>,
    /// Reported IP or host name.
    pub ip: String,
    /// Reported command port.
    pub port: i64,
    /// Machine host name.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Client library version.
    #[serde(default)]
    pub version: Option<String>,
    /// Whether the instance may act as a token server for its app.
    #[serde(default)]
    pub belong_to_app: Option<bool>,
    /// Whether a token server on this instance runs inside the application
    /// process. Alone-mode token servers report `false`. Defaults to `true`.
    #[serde(default)]
    pub embedded: Option<bool>,
    /// Heartbeat time on the instance's clock. Informational only.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl InstanceRegistration {
    /// Create a registration for `ip:port` in `app` with all optional fields unset.
    #[must_use]
    pub fn new(app: AppName, ip: impl Into<String>, port: u16) -> Self {
        Self {
            app,
            instance_id: None,
            ip: ip.into(),
            port: i64::from(port),
            hostname: None,
            version: None,
            belong_to_app: None,
            embedded: None,
            timestamp: None,
        }
    }

    /// Use an explicit instance identifier.
    #[must_use]
    pub fn with_instance_id(mut self, id: InstanceId) -> Self {
        self.instance_id = Some(id);
        self
    }

    /// Declare whether the instance may become a token server.
    #[must_use]
    pub fn belong_to_app(mut self, belong: bool) -> Self {
        self.belong_to_app = Some(belong);
        self
    }

    /// Declare whether a token server here runs embedded in the application.
    #[must_use]
    pub fn embedded(mut self, embedded: bool) -> Self {
        self.embedded = Some(embedded);
        self
    }

    /// Set the instance-reported heartbeat time.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Request to make an instance the token server for a set of namespaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRequest {
    /// Application of the target. Only needed when the id is ambiguous.
    #[serde(default)]
    pub app: Option<AppName>,
    /// Instance to promote.
    pub instance_id: InstanceId,
    /// Namespaces the server will own.
    pub namespace_set: BTreeSet<Namespace>,
    /// Force-release any current owner of the requested namespaces.
    #[serde(default)]
    pub new_server: bool,
    /// Instances to bind to the new server explicitly.
    #[serde(default)]
    pub client_set: BTreeSet<InstanceId>,
}

impl AssignmentRequest {
    /// Create an assignment without takeover or explicit clients.
    #[must_use]
    pub fn new(
        app: AppName,
        instance_id: InstanceId,
        namespaces: impl IntoIterator<Item = Namespace>,
    ) -> Self {
        Self {
            app: Some(app),
            instance_id,
            namespace_set: namespaces.into_iter().collect(),
            new_server: false,
            client_set: BTreeSet::new(),
        }
    }

    /// Request a forced takeover of conflicting namespaces.
    #[must_use]
    pub fn takeover(mut self) -> Self {
        self.new_server = true;
        self
    }

    /// Bind these instances as clients of the new server.
    #[must_use]
    pub fn with_clients(mut self, clients: impl IntoIterator<Item = InstanceId>) -> Self {
        self.client_set = clients.into_iter().collect();
        self
    }
}

/// Request to return an instance to standalone mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnbindRequest {
    /// Application of the instance.
    pub app: AppName,
    /// Instance to unbind.
    pub instance_id: InstanceId,
}

impl UnbindRequest {
    /// Create an unbind request.
    #[must_use]
    pub const fn new(app: AppName, instance_id: InstanceId) -> Self {
        Self { app, instance_id }
    }
}

/// Request to attach a client to a specific server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindClientRequest {
    /// Application of both instances.
    pub app: AppName,
    /// Instance that becomes (or stays) a client.
    pub instance_id: InstanceId,
    /// Server to follow.
    pub server_instance_id: InstanceId,
    /// Token request timeout in milliseconds.
    #[serde(default)]
    pub request_timeout: Option<u64>,
}

/// Edit of a current server's namespaces and transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyServerConfigRequest {
    /// Application of the server.
    pub app: AppName,
    /// The server instance.
    pub instance_id: InstanceId,
    /// Replacement namespace set.
    pub namespace_set: BTreeSet<Namespace>,
    /// New token server port.
    #[serde(default)]
    pub port: Option<u16>,
    /// New idle connection timeout in seconds.
    #[serde(default)]
    pub idle_seconds: Option<u64>,
}

/// Edit of a client's target, addressed by server host and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyClientConfigRequest {
    /// Application of the client.
    pub app: AppName,
    /// The client instance.
    pub instance_id: InstanceId,
    /// Host of the token server to follow.
    pub server_host: String,
    /// Token port of the server to follow.
    pub server_port: u16,
    /// Token request timeout in milliseconds.
    #[serde(default)]
    pub request_timeout: Option<u64>,
}

/// Coarse mode change of a single instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyModeRequest {
    /// Application of the instance.
    pub app: AppName,
    /// The instance.
    pub instance_id: InstanceId,
    /// Target mode.
    pub mode: ClusterMode,
}

/// What happens to clients of a server that is unbound or demoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DanglingClientPolicy {
    /// Leave clients pointing at the old address until they are rebound or
    /// the health sweep demotes them after the grace period.
    #[default]
    Retain,
    /// Demote clients to standalone together with their server.
    Demote,
}

/// Configuration for the cluster coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long without heartbeat before an instance is marked unhealthy (seconds).
    pub heartbeat_timeout_seconds: u64,
    /// Interval of the health sweep (seconds).
    pub sweep_interval_seconds: u64,
    /// Evict instances silent for this long (seconds). Disabled when `None`.
    pub instance_ttl_seconds: Option<u64>,
    /// How long a client may point at a missing server before demotion (seconds).
    pub dangling_client_grace_seconds: u64,
    /// Treatment of clients when their server goes away.
    pub dangling_client_policy: DanglingClientPolicy,
    /// Token server port used when none is configured.
    pub default_server_port: u16,
    /// Server idle connection timeout used when none is configured (seconds).
    pub default_idle_seconds: u64,
    /// Client request timeout used when none is configured (milliseconds).
    pub default_request_timeout_ms: u64,
    /// Capacity of the cluster event channel.
    pub event_channel_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_seconds: 60,
            sweep_interval_seconds: 10,
            instance_ttl_seconds: None,
            dangling_client_grace_seconds: 60,
            dangling_client_policy: DanglingClientPolicy::Retain,
            default_server_port: 18730,
            default_idle_seconds: 600,
            default_request_timeout_ms: 20,
            event_channel_capacity: 256,
        }
    }
}

impl CoordinatorConfig {
    /// Heartbeat timeout as a `chrono::Duration`.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> chrono::Duration {
        seconds(self.heartbeat_timeout_seconds)
    }

    /// Instance eviction TTL as a `chrono::Duration`.
    #[must_use]
    pub fn instance_ttl(&self) -> Option<chrono::Duration> {
        self.instance_ttl_seconds.map(seconds)
    }

    /// Dangling client grace period as a `chrono::Duration`.
    #[must_use]
    pub fn dangling_client_grace(&self) -> chrono::Duration {
        seconds(self.dangling_client_grace_seconds)
    }

    /// Sweep interval as a `std::time::Duration`.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::from(u32::try_from(secs).unwrap_or(u32::MAX)))
}
