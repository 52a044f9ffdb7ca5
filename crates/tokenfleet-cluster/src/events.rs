//! Cluster events.
//!
//! The coordinator publishes an event for every change it commits. Events
//! are fire-and-forget: they are sent after the change is visible to readers
//! and are dropped when nobody is subscribed.

use std::collections::BTreeSet;

use serde::Serialize;
use tokenfleet_core::{AppName, InstanceId, Namespace};

use crate::mode::ClusterMode;

/// Why an instance lost its cluster role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DemotionReason {
    /// Explicit unbind or removal.
    Unbind,
    /// Heartbeat timeout.
    HealthTimeout,
    /// Another server took over its namespaces.
    Takeover,
    /// Its server disappeared and the grace period ran out.
    DanglingClient,
    /// Its server was demoted while the demote policy is active.
    ServerGone,
}

/// A change committed by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClusterEvent {
    /// An instance was seen for the first time.
    #[serde(rename_all = "camelCase")]
    Registered {
        /// Application.
        app: AppName,
        /// The new instance.
        instance_id: InstanceId,
    },
    /// An instance missed its heartbeat deadline.
    #[serde(rename_all = "camelCase")]
    MarkedUnhealthy {
        /// Application.
        app: AppName,
        /// The silent instance.
        instance_id: InstanceId,
    },
    /// An unhealthy instance sent a heartbeat again.
    #[serde(rename_all = "camelCase")]
    Recovered {
        /// Application.
        app: AppName,
        /// The recovered instance.
        instance_id: InstanceId,
    },
    /// An instance became (or was reconfigured as) a token server.
    #[serde(rename_all = "camelCase")]
    ServerAssigned {
        /// Application.
        app: AppName,
        /// The server.
        instance_id: InstanceId,
        /// Namespaces it now owns.
        namespace_set: BTreeSet<Namespace>,
    },
    /// An instance was bound to a token server.
    #[serde(rename_all = "camelCase")]
    ClientBound {
        /// Application.
        app: AppName,
        /// The client.
        instance_id: InstanceId,
        /// Its server.
        server_id: InstanceId,
    },
    /// An instance returned to standalone mode.
    #[serde(rename_all = "camelCase")]
    Demoted {
        /// Application.
        app: AppName,
        /// The demoted instance.
        instance_id: InstanceId,
        /// Its mode before demotion.
        from: ClusterMode,
        /// Why it was demoted.
        reason: DemotionReason,
    },
    /// An instance was deregistered.
    #[serde(rename_all = "camelCase")]
    Removed {
        /// Application.
        app: AppName,
        /// The removed instance.
        instance_id: InstanceId,
    },
}

impl ClusterEvent {
    /// Application the event belongs to.
    #[must_use]
    pub const fn app(&self) -> &AppName {
        match self {
            Self::Registered { app, .. }
            | Self::MarkedUnhealthy { app, .. }
            | Self::Recovered { app, .. }
            | Self::ServerAssigned { app, .. }
            | Self::ClientBound { app, .. }
            | Self::Demoted { app, .. }
            | Self::Removed { app, .. } => app,
        }
    }

    /// Instance the event is about.
    #[must_use]
    pub const fn instance_id(&self) -> &InstanceId {
        match self {
            Self::Registered { instance_id, .. }
            | Self::MarkedUnhealthy { instance_id, .. }
            | Self::Recovered { instance_id, .. }
            | Self::ServerAssigned { instance_id, .. }
            | Self::ClientBound { instance_id, .. }
            | Self::Demoted { instance_id, .. }
            | Self::Removed { instance_id, .. } => instance_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_type_tag() {
        let event = ClusterEvent::Demoted {
            app: AppName::new("checkout").unwrap(),
            instance_id: InstanceId::new("10.0.0.1@8719").unwrap(),
            from: ClusterMode::Server,
            reason: DemotionReason::HealthTimeout,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "demoted");
        assert_eq!(json["instanceId"], "10.0.0.1@8719");
        assert_eq!(json["from"], 1);
        assert_eq!(json["reason"], "healthTimeout");
        assert_eq!(event.app().as_str(), "checkout");
    }
}
