//! Instance mode state machine.
//!
//! Every instance is in exactly one of three modes. The mode carries its own
//! configuration, so a server can never hold client settings and vice versa.
//!
//! # State Machine
//!
//! ```text
//!                      assign-as-server
//!           ┌─────────────────────────────────────┐
//!           │                                     ▼
//!    ┌──────────────┐  unbind / health-timeout ┌──────────┐
//!    │  Standalone  │◄─────────────────────────│  Server  │──┐ reconfigure
//!    └──────────────┘                          └──────────┘◄─┘
//!       │        ▲
//!       │        │ unbind / health-timeout
//!       │        │
//!       │     ┌──────────┐
//!       └────▶│  Client  │──┐ retarget
//!  assign-as- └──────────┘◄─┘
//!    client
//! ```
//!
//! There is no direct edge between `Server` and `Client`; an instance must
//! pass through `Standalone`. Demoting an instance that is already
//! `Standalone` is a no-op.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokenfleet_core::{InstanceId, Namespace};

use crate::error::{ClusterError, Result};

/// Mode discriminant, encoded on the wire as `0`, `1`, or `2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ClusterMode {
    /// Enforces rate limits locally.
    Standalone,
    /// Serves tokens for a set of namespaces.
    Server,
    /// Requests tokens from a server.
    Client,
}

impl ClusterMode {
    /// Numeric wire code of this mode.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Standalone => 0,
            Self::Server => 1,
            Self::Client => 2,
        }
    }
}

impl fmt::Display for ClusterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Standalone => "standalone",
            Self::Server => "server",
            Self::Client => "client",
        };
        f.write_str(name)
    }
}

impl TryFrom<u8> for ClusterMode {
    type Error = UnknownMode;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Standalone),
            1 => Ok(Self::Server),
            2 => Ok(Self::Client),
            other => Err(UnknownMode(other)),
        }
    }
}

impl From<ClusterMode> for u8 {
    fn from(mode: ClusterMode) -> Self {
        mode.code()
    }
}

/// A mode code outside `0..=2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown cluster mode: {0}")]
pub struct UnknownMode(pub u8);

/// Settings of an instance serving as token server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Token server port.
    pub port: u16,
    /// Idle connection timeout in seconds.
    pub idle_seconds: u64,
    /// Namespaces currently owned by this server.
    pub namespace_set: BTreeSet<Namespace>,
}

/// Settings of an instance acting as token client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// The server this client was bound to.
    pub server_id: InstanceId,
    /// Host of that server.
    pub server_host: String,
    /// Token port of that server.
    pub server_port: u16,
    /// Token request timeout in milliseconds.
    pub request_timeout: u64,
}

/// Current mode of an instance together with its mode-specific settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum Mode {
    /// No cluster participation.
    #[default]
    Standalone,
    /// Token server.
    Server(ServerConfig),
    /// Token client.
    Client(ClientConfig),
}

impl Mode {
    /// The discriminant of this mode.
    #[must_use]
    pub const fn kind(&self) -> ClusterMode {
        match self {
            Self::Standalone => ClusterMode::Standalone,
            Self::Server(_) => ClusterMode::Server,
            Self::Client(_) => ClusterMode::Client,
        }
    }

    /// Server settings, if this is a server.
    #[must_use]
    pub const fn server(&self) -> Option<&ServerConfig> {
        match self {
            Self::Server(config) => Some(config),
            _ => None,
        }
    }

    /// Client settings, if this is a client.
    #[must_use]
    pub const fn client(&self) -> Option<&ClientConfig> {
        match self {
            Self::Client(config) => Some(config),
            _ => None,
        }
    }
}

/// Events that drive mode transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeEvent {
    /// Promote to (or reconfigure as) token server.
    AssignAsServer,
    /// Bind (or re-point) as token client.
    AssignAsClient,
    /// Operator-requested release of any role.
    Unbind,
    /// Heartbeat timeout observed by the health sweep.
    HealthTimeout,
}

impl ModeEvent {
    /// The mode this event leads to when allowed.
    #[must_use]
    pub const fn target(self) -> ClusterMode {
        match self {
            Self::AssignAsServer => ClusterMode::Server,
            Self::AssignAsClient => ClusterMode::Client,
            Self::Unbind | Self::HealthTimeout => ClusterMode::Standalone,
        }
    }
}

/// Apply the transition table. Returns `None` for a forbidden transition.
#[must_use]
pub const fn next_mode(from: ClusterMode, event: ModeEvent) -> Option<ClusterMode> {
    use ClusterMode::{Client, Server, Standalone};
    use ModeEvent::{AssignAsClient, AssignAsServer, HealthTimeout, Unbind};

    match (from, event) {
        (Standalone | Server, AssignAsServer) => Some(Server),
        (Standalone | Client, AssignAsClient) => Some(Client),
        // Demotion is idempotent
        (Standalone | Server | Client, Unbind | HealthTimeout) => Some(Standalone),
        (Client, AssignAsServer) | (Server, AssignAsClient) => None,
    }
}

/// Check whether `event` is allowed in mode `from`.
#[must_use]
pub const fn is_valid_transition(from: ClusterMode, event: ModeEvent) -> bool {
    next_mode(from, event).is_some()
}

/// Validate a transition and return the resulting mode.
///
/// # Errors
///
/// Returns `ClusterError::InvalidTransition` if the table forbids it.
pub fn validate_transition(
    instance_id: &InstanceId,
    from: ClusterMode,
    event: ModeEvent,
) -> Result<ClusterMode> {
    next_mode(from, event).ok_or_else(|| ClusterError::InvalidTransition {
        instance_id: instance_id.clone(),
        from,
        to: event.target(),
    })
}

/// Events accepted in the given mode.
#[must_use]
pub fn valid_events_from(mode: ClusterMode) -> Vec<ModeEvent> {
    [
        ModeEvent::AssignAsServer,
        ModeEvent::AssignAsClient,
        ModeEvent::Unbind,
        ModeEvent::HealthTimeout,
    ]
    .into_iter()
    .filter(|event| is_valid_transition(mode, *event))
    .collect()
}

/// Returns true if the mode holds a cluster role that a demotion would clear.
#[must_use]
pub const fn holds_role(mode: ClusterMode) -> bool {
    matches!(mode, ClusterMode::Server | ClusterMode::Client)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> InstanceId {
        InstanceId::new("10.0.0.1@8719").unwrap()
    }

    #[test]
    fn valid_transitions() {
        use ClusterMode::*;

        assert!(is_valid_transition(Standalone, ModeEvent::AssignAsServer));
        assert!(is_valid_transition(Standalone, ModeEvent::AssignAsClient));
        assert!(is_valid_transition(Server, ModeEvent::Unbind));
        assert!(is_valid_transition(Client, ModeEvent::Unbind));
        assert!(is_valid_transition(Server, ModeEvent::HealthTimeout));
        assert!(is_valid_transition(Client, ModeEvent::HealthTimeout));
        // Reconfigure and retarget stay in place
        assert_eq!(next_mode(Server, ModeEvent::AssignAsServer), Some(Server));
        assert_eq!(next_mode(Client, ModeEvent::AssignAsClient), Some(Client));
    }

    #[test]
    fn no_direct_edge_between_server_and_client() {
        use ClusterMode::*;

        assert!(!is_valid_transition(Server, ModeEvent::AssignAsClient));
        assert!(!is_valid_transition(Client, ModeEvent::AssignAsServer));
    }

    #[test]
    fn demoting_standalone_is_noop() {
        assert_eq!(
            next_mode(ClusterMode::Standalone, ModeEvent::HealthTimeout),
            Some(ClusterMode::Standalone)
        );
        assert_eq!(
            next_mode(ClusterMode::Standalone, ModeEvent::Unbind),
            Some(ClusterMode::Standalone)
        );
    }

    #[test]
    fn validate_transition_err() {
        let result = validate_transition(&id(), ClusterMode::Server, ModeEvent::AssignAsClient);

        match result {
            Err(ClusterError::InvalidTransition { from, to, .. }) => {
                assert_eq!(from, ClusterMode::Server);
                assert_eq!(to, ClusterMode::Client);
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn valid_events_from_client() {
        let events = valid_events_from(ClusterMode::Client);
        assert!(events.contains(&ModeEvent::AssignAsClient));
        assert!(events.contains(&ModeEvent::Unbind));
        assert!(!events.contains(&ModeEvent::AssignAsServer));
    }

    #[test]
    fn mode_codes() {
        assert_eq!(serde_json::to_string(&ClusterMode::Server).unwrap(), "1");
        let mode: ClusterMode = serde_json::from_str("2").unwrap();
        assert_eq!(mode, ClusterMode::Client);
        assert!(serde_json::from_str::<ClusterMode>("3").is_err());
        assert_eq!(ClusterMode::try_from(7), Err(UnknownMode(7)));
    }

    #[test]
    fn mode_payload_matches_kind() {
        let server = Mode::Server(ServerConfig {
            port: 18730,
            idle_seconds: 600,
            namespace_set: BTreeSet::new(),
        });
        assert_eq!(server.kind(), ClusterMode::Server);
        assert!(server.server().is_some());
        assert!(server.client().is_none());
        assert_eq!(Mode::default().kind(), ClusterMode::Standalone);
        assert!(holds_role(ClusterMode::Client));
        assert!(!holds_role(ClusterMode::Standalone));
    }
}
