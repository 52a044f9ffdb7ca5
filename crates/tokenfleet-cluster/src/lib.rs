//! Cluster flow-control coordination for tokenfleet.
//!
//! This crate decides which application instance acts as the token server
//! for which namespaces, which instances follow it as token clients, and
//! which stay standalone.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Gateway (HTTP/JSON)                      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ClusterCoordinator                       │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │  Instance   │ │  Namespace  │ │    Mode             │    │
//! │  │  Registry   │ │  Ownership  │ │    State Machine    │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!               │                              │
//!               ▼                              ▼
//!        ┌──────────────┐              ┌──────────────┐
//!        │  Projections │              │ Health sweep │
//!        │  (read-only) │              │   + events   │
//!        └──────────────┘              └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use tokenfleet_cluster::{
//!     AssignmentRequest, ClusterControl, ClusterCoordinator, InstanceRegistration,
//! };
//! use tokenfleet_core::{AppName, Namespace};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let coordinator = ClusterCoordinator::with_defaults();
//! let app = AppName::new("checkout")?;
//!
//! let server = coordinator.register(InstanceRegistration::new(app.clone(), "10.0.0.1", 8719))?;
//! let view = coordinator.assign(AssignmentRequest::new(
//!     app,
//!     server.instance_id,
//!     [Namespace::new("checkout")?],
//! ))?;
//!
//! assert!(view.assigned_server.is_some());
//! # Ok(())
//! # }
//! ```
//!
//! # Modes
//!
//! - `Standalone` → `Server` (assign) or `Client` (bind)
//! - `Server` → `Standalone` (unbind, health timeout)
//! - `Client` → `Standalone` (unbind, health timeout)
//!
//! See the [`mode`] module for transition validation helpers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod coordinator;
pub mod error;
pub mod events;
pub mod health;
pub mod mode;
pub mod ownership;
pub mod projection;
pub mod registry;
pub mod state;
pub mod types;

pub use coordinator::{ClusterControl, ClusterCoordinator, SweepReport};
pub use error::{ClusterError, Result};
pub use events::{ClusterEvent, DemotionReason};
pub use health::spawn_health_sweeper;
pub use mode::{ClientConfig, ClusterMode, Mode, ModeEvent, ServerConfig};
pub use ownership::OwnershipMap;
pub use projection::{
    AssignState, ClusterState, ConnectionGroup, InstanceState, StateInfo, TokenClient,
    TokenServer, TokenServerState,
};
pub use registry::{Instance, InstanceRegistry};
pub use state::AppCluster;
pub use types::{
    AssignmentRequest, BindClientRequest, CoordinatorConfig, DanglingClientPolicy,
    InstanceRegistration, ModifyClientConfigRequest, ModifyModeRequest,
    ModifyServerConfigRequest, UnbindRequest,
};

// Re-export commonly used types from dependencies for convenience
pub use tokenfleet_core::{AppName, InstanceId, Namespace};
