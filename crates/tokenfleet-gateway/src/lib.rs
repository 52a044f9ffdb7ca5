//! HTTP gateway for tokenfleet cluster flow-control coordination.
//!
//! This crate exposes the cluster coordinator over JSON/HTTP:
//!
//! - Instance registration and heartbeats
//! - Token server assignment, unbinding, and client binding
//! - Read-only assignment and overview projections
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Instances / operators / dashboards              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ JSON over HTTP
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    tokenfleet-gateway                        │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │  Registry   │ │  Cluster    │ │    Projection       │    │
//! │  │  Handlers   │ │  Handlers   │ │    Handlers         │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                    ┌────────────────────┐
//!                    │ ClusterCoordinator │
//!                    └────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokenfleet_cluster::ClusterCoordinator;
//! use tokenfleet_gateway::{create_router, GatewayConfig, GatewayState};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let cluster = Arc::new(ClusterCoordinator::with_defaults());
//! let state = GatewayState::new(cluster, GatewayConfig::default());
//! let app = create_router(state);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8719").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::GatewayConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use state::GatewayState;
