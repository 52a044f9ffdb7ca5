//! Gateway application state.

use std::sync::Arc;

use tokenfleet_cluster::ClusterControl;

use crate::config::GatewayConfig;

/// Shared application state for the gateway.
pub struct GatewayState<C>
where
    C: ClusterControl,
{
    /// The cluster coordinator.
    pub cluster: Arc<C>,
    /// Gateway configuration.
    pub config: GatewayConfig,
}

impl<C> GatewayState<C>
where
    C: ClusterControl,
{
    /// Create a new gateway state.
    #[must_use]
    pub fn new(cluster: Arc<C>, config: GatewayConfig) -> Self {
        Self { cluster, config }
    }
}

impl<C> Clone for GatewayState<C>
where
    C: ClusterControl,
{
    fn clone(&self) -> Self {
        Self {
            cluster: Arc::clone(&self.cluster),
            config: self.config.clone(),
        }
    }
}
