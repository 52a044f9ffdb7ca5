//! Per-application cluster state.
//!
//! [`AppCluster`] bundles the registry, the ownership map, and the
//! bookkeeping for dangling clients of one application. The coordinator
//! applies every mutation to a private copy and publishes the copy only when
//! the whole operation succeeded, so the methods here may fail halfway
//! without leaving partial state visible.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tokenfleet_core::{AppName, InstanceId};

use crate::error::{ClusterError, Result};
use crate::events::{ClusterEvent, DemotionReason};
use crate::mode::{self, ClientConfig, ClusterMode, Mode, ModeEvent, ServerConfig};
use crate::ownership::OwnershipMap;
use crate::registry::{Instance, InstanceRegistry, Registration};
use crate::types::{
    AssignmentRequest, CoordinatorConfig, DanglingClientPolicy, InstanceRegistration,
    ModifyServerConfigRequest,
};

/// Registry, ownership, and mode state of one application.
#[derive(Debug, Clone)]
pub struct AppCluster {
    app: AppName,
    registry: InstanceRegistry,
    ownership: OwnershipMap,
    assigned_server: Option<InstanceId>,
    dangling_since: HashMap<InstanceId, DateTime<Utc>>,
}

impl AppCluster {
    pub(crate) fn new(app: AppName) -> Self {
        Self {
            app,
            registry: InstanceRegistry::new(),
            ownership: OwnershipMap::new(),
            assigned_server: None,
            dangling_since: HashMap::new(),
        }
    }

    /// The application name.
    #[must_use]
    pub const fn app(&self) -> &AppName {
        &self.app
    }

    /// The instance registry.
    #[must_use]
    pub const fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// The namespace ownership map.
    #[must_use]
    pub const fn ownership(&self) -> &OwnershipMap {
        &self.ownership
    }

    /// Returns true if `instance_id` is a healthy token server.
    #[must_use]
    pub fn is_live_server(&self, instance_id: &InstanceId) -> bool {
        self.registry
            .get(instance_id)
            .is_some_and(Instance::is_live_server)
    }

    /// The server shown as the application's assigned server: the most
    /// recently assigned one while it is live, else the first live server.
    #[must_use]
    pub fn assigned_server(&self) -> Option<&Instance> {
        self.assigned_server
            .as_ref()
            .and_then(|id| self.registry.get(id))
            .filter(|i| i.is_live_server())
            .or_else(|| self.registry.list().iter().find(|i| i.is_live_server()))
    }

    /// Clients currently pointing at `server_id`.
    pub fn clients_of<'a>(
        &'a self,
        server_id: &'a InstanceId,
    ) -> impl Iterator<Item = &'a Instance> + 'a {
        self.registry
            .list()
            .iter()
            .filter(move |i| i.mode.client().is_some_and(|c| c.server_id == *server_id))
    }

    /// When a client started pointing at a missing server, if it does.
    #[must_use]
    pub fn dangling_since(&self, instance_id: &InstanceId) -> Option<DateTime<Utc>> {
        self.dangling_since.get(instance_id).copied()
    }

    fn instance(&self, instance_id: &InstanceId) -> Result<&Instance> {
        self.registry
            .get(instance_id)
            .ok_or_else(|| ClusterError::not_found(&self.app, instance_id))
    }

    fn set_mode(&mut self, instance_id: &InstanceId, mode: Mode) {
        if let Some(instance) = self.registry.get_mut(instance_id) {
            instance.mode = mode;
        }
    }

    // =========================================================================
    // Registry
    // =========================================================================

    pub(crate) fn register(
        &mut self,
        registration: InstanceRegistration,
        now: DateTime<Utc>,
        events: &mut Vec<ClusterEvent>,
    ) -> Result<Instance> {
        let (instance_id, outcome) = self.registry.register(registration, now)?;

        match outcome {
            Registration::Created => events.push(ClusterEvent::Registered {
                app: self.app.clone(),
                instance_id: instance_id.clone(),
            }),
            Registration::Refreshed { recovered: true } => events.push(ClusterEvent::Recovered {
                app: self.app.clone(),
                instance_id: instance_id.clone(),
            }),
            Registration::Refreshed { recovered: false } => {}
        }

        self.instance(&instance_id).cloned()
    }

    pub(crate) fn heartbeat(
        &mut self,
        instance_id: &InstanceId,
        reported: DateTime<Utc>,
        now: DateTime<Utc>,
        events: &mut Vec<ClusterEvent>,
    ) -> Result<()> {
        let recovered = self
            .registry
            .heartbeat(instance_id, reported, now)
            .ok_or_else(|| ClusterError::not_found(&self.app, instance_id))?;

        if recovered {
            events.push(ClusterEvent::Recovered {
                app: self.app.clone(),
                instance_id: instance_id.clone(),
            });
        }
        Ok(())
    }

    /// Mark an instance unhealthy and drop any role it holds.
    pub(crate) fn mark_unhealthy(
        &mut self,
        instance_id: &InstanceId,
        config: &CoordinatorConfig,
        now: DateTime<Utc>,
        events: &mut Vec<ClusterEvent>,
    ) -> Result<()> {
        let changed = self
            .registry
            .mark_unhealthy(instance_id)
            .ok_or_else(|| ClusterError::not_found(&self.app, instance_id))?;

        if changed {
            events.push(ClusterEvent::MarkedUnhealthy {
                app: self.app.clone(),
                instance_id: instance_id.clone(),
            });
        }

        self.demote(
            instance_id,
            ModeEvent::HealthTimeout,
            DemotionReason::HealthTimeout,
            config,
            now,
            events,
        )
    }

    pub(crate) fn remove(
        &mut self,
        instance_id: &InstanceId,
        config: &CoordinatorConfig,
        now: DateTime<Utc>,
        events: &mut Vec<ClusterEvent>,
    ) -> Result<()> {
        self.demote(
            instance_id,
            ModeEvent::Unbind,
            DemotionReason::Unbind,
            config,
            now,
            events,
        )?;
        self.registry.remove(instance_id);
        self.dangling_since.remove(instance_id);
        events.push(ClusterEvent::Removed {
            app: self.app.clone(),
            instance_id: instance_id.clone(),
        });
        Ok(())
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    /// Promote (or reconfigure) a token server and route clients to it.
    pub(crate) fn assign(
        &mut self,
        request: &AssignmentRequest,
        config: &CoordinatorConfig,
        now: DateTime<Utc>,
        events: &mut Vec<ClusterEvent>,
    ) -> Result<()> {
        let server_id = &request.instance_id;
        let target = self.instance(server_id)?;

        if !target.belong_to_app {
            return Err(ClusterError::NotEligible(server_id.clone()));
        }
        if request.namespace_set.is_empty() {
            return Err(ClusterError::InvalidRequest(
                "namespaceSet cannot be empty".to_string(),
            ));
        }
        let from = target.mode.kind();
        mode::validate_transition(server_id, from, ModeEvent::AssignAsServer)?;

        let healthy = target.healthy;
        let (port, idle_seconds) = target.mode.server().map_or(
            (config.default_server_port, config.default_idle_seconds),
            |s| (s.port, s.idle_seconds),
        );

        // Explicit clients are validated before anything changes
        for client_id in &request.client_set {
            if client_id == server_id {
                return Err(ClusterError::InvalidRequest(format!(
                    "{server_id} cannot be a client of itself"
                )));
            }
            let client = self.instance(client_id)?;
            mode::validate_transition(client_id, client.mode.kind(), ModeEvent::AssignAsClient)?;
        }
        if !request.client_set.is_empty() && !healthy {
            return Err(ClusterError::ServerNotActive(server_id.clone()));
        }

        let claim = self.ownership.claim(
            server_id,
            &request.namespace_set,
            request.new_server,
            |owner| self.registry.get(owner).is_some_and(Instance::is_live_server),
        )?;

        for displaced in &claim.displaced {
            if self.registry.get(displaced).is_some() {
                self.demote(
                    displaced,
                    ModeEvent::Unbind,
                    DemotionReason::Takeover,
                    config,
                    now,
                    events,
                )?;
            }
        }

        if from == ClusterMode::Server {
            self.ownership.retain_only(server_id, &request.namespace_set);
        }

        self.set_mode(
            server_id,
            Mode::Server(ServerConfig {
                port,
                idle_seconds,
                namespace_set: request.namespace_set.clone(),
            }),
        );
        self.assigned_server = Some(server_id.clone());
        self.dangling_since.remove(server_id);

        tracing::info!(
            app = %self.app,
            instance_id = %server_id,
            namespaces = ?request.namespace_set,
            takeover = request.new_server,
            displaced = ?claim.displaced,
            "Assigned token server"
        );
        events.push(ClusterEvent::ServerAssigned {
            app: self.app.clone(),
            instance_id: server_id.clone(),
            namespace_set: request.namespace_set.clone(),
        });

        if healthy {
            let to_bind = self.clients_to_route(server_id, &request.client_set);
            for client_id in to_bind {
                self.attach_client(&client_id, server_id, None, config, events)?;
            }
        }

        Ok(())
    }

    /// Clients a newly assigned server picks up: those listed explicitly and
    /// every other instance of the application already in client mode.
    fn clients_to_route(
        &self,
        server_id: &InstanceId,
        explicit: &BTreeSet<InstanceId>,
    ) -> Vec<InstanceId> {
        self.registry
            .list()
            .iter()
            .filter(|i| i.instance_id != *server_id)
            .filter(|i| explicit.contains(&i.instance_id) || i.mode.client().is_some())
            .map(|i| i.instance_id.clone())
            .collect()
    }

    /// Point `client_id` at `server_id`.
    pub(crate) fn attach_client(
        &mut self,
        client_id: &InstanceId,
        server_id: &InstanceId,
        request_timeout: Option<u64>,
        config: &CoordinatorConfig,
        events: &mut Vec<ClusterEvent>,
    ) -> Result<()> {
        let server = self.instance(server_id)?;
        let server_port = match (&server.mode, server.healthy) {
            (Mode::Server(server_config), true) => server_config.port,
            _ => return Err(ClusterError::ServerNotActive(server_id.clone())),
        };
        let server_host = server.ip.clone();

        let client = self.instance(client_id)?;
        mode::validate_transition(client_id, client.mode.kind(), ModeEvent::AssignAsClient)?;
        let request_timeout = request_timeout
            .or_else(|| client.mode.client().map(|c| c.request_timeout))
            .unwrap_or(config.default_request_timeout_ms);

        self.set_mode(
            client_id,
            Mode::Client(ClientConfig {
                server_id: server_id.clone(),
                server_host,
                server_port,
                request_timeout,
            }),
        );
        self.dangling_since.remove(client_id);

        tracing::debug!(
            app = %self.app,
            instance_id = %client_id,
            server_id = %server_id,
            "Bound token client"
        );
        events.push(ClusterEvent::ClientBound {
            app: self.app.clone(),
            instance_id: client_id.clone(),
            server_id: server_id.clone(),
        });
        Ok(())
    }

    /// Replace a server's namespaces and transport settings.
    pub(crate) fn modify_server(
        &mut self,
        request: &ModifyServerConfigRequest,
        config: &CoordinatorConfig,
        now: DateTime<Utc>,
        events: &mut Vec<ClusterEvent>,
    ) -> Result<()> {
        let server_id = &request.instance_id;
        let current = self
            .instance(server_id)?
            .mode
            .server()
            .cloned()
            .ok_or_else(|| ClusterError::ServerNotActive(server_id.clone()))?;

        if request.namespace_set.is_empty() {
            return Err(ClusterError::InvalidRequest(
                "namespaceSet cannot be empty".to_string(),
            ));
        }

        let claim = self.ownership.claim(server_id, &request.namespace_set, false, |owner| {
            self.registry.get(owner).is_some_and(Instance::is_live_server)
        })?;
        for displaced in &claim.displaced {
            if self.registry.get(displaced).is_some() {
                self.demote(
                    displaced,
                    ModeEvent::Unbind,
                    DemotionReason::Takeover,
                    config,
                    now,
                    events,
                )?;
            }
        }
        self.ownership.retain_only(server_id, &request.namespace_set);

        let port = request.port.unwrap_or(current.port);
        self.set_mode(
            server_id,
            Mode::Server(ServerConfig {
                port,
                idle_seconds: request.idle_seconds.unwrap_or(current.idle_seconds),
                namespace_set: request.namespace_set.clone(),
            }),
        );

        if port != current.port {
            let clients: Vec<InstanceId> = self
                .clients_of(server_id)
                .map(|c| c.instance_id.clone())
                .collect();
            for client_id in clients {
                if let Some(Mode::Client(client)) =
                    self.registry.get_mut(&client_id).map(|i| &mut i.mode)
                {
                    client.server_port = port;
                }
            }
        }

        events.push(ClusterEvent::ServerAssigned {
            app: self.app.clone(),
            instance_id: server_id.clone(),
            namespace_set: request.namespace_set.clone(),
        });
        Ok(())
    }

    /// Find the live server listening on `host:port`.
    pub(crate) fn server_at(&self, host: &str, port: u16) -> Result<InstanceId> {
        self.registry
            .list()
            .iter()
            .filter(|i| i.is_live_server() && i.ip == host)
            .find(|i| i.mode.server().is_some_and(|s| s.port == port))
            .map(|i| i.instance_id.clone())
            .ok_or_else(|| ClusterError::NoServerAtAddress {
                host: host.to_string(),
                port,
            })
    }

    /// Live servers of this application in registration order.
    pub(crate) fn live_servers(&self) -> Vec<InstanceId> {
        self.registry
            .list()
            .iter()
            .filter(|i| i.is_live_server())
            .map(|i| i.instance_id.clone())
            .collect()
    }

    // =========================================================================
    // Demotion
    // =========================================================================

    /// Return an instance to standalone mode. A no-op for standalone instances.
    pub(crate) fn demote(
        &mut self,
        instance_id: &InstanceId,
        event: ModeEvent,
        reason: DemotionReason,
        config: &CoordinatorConfig,
        now: DateTime<Utc>,
        events: &mut Vec<ClusterEvent>,
    ) -> Result<()> {
        let from = self.instance(instance_id)?.mode.kind();
        mode::validate_transition(instance_id, from, event)?;

        match from {
            ClusterMode::Standalone => return Ok(()),
            ClusterMode::Server => {
                let released = self.ownership.release(instance_id);
                self.set_mode(instance_id, Mode::Standalone);
                if self.assigned_server.as_ref() == Some(instance_id) {
                    self.assigned_server = None;
                }

                let clients: Vec<InstanceId> = self
                    .clients_of(instance_id)
                    .map(|c| c.instance_id.clone())
                    .collect();
                match config.dangling_client_policy {
                    DanglingClientPolicy::Retain => {
                        for client_id in &clients {
                            self.dangling_since.entry(client_id.clone()).or_insert(now);
                        }
                    }
                    DanglingClientPolicy::Demote => {
                        for client_id in &clients {
                            self.demote_client(client_id, DemotionReason::ServerGone, events);
                        }
                    }
                }

                tracing::info!(
                    app = %self.app,
                    instance_id = %instance_id,
                    released = ?released,
                    clients = clients.len(),
                    reason = ?reason,
                    "Demoted token server"
                );
            }
            ClusterMode::Client => {
                self.set_mode(instance_id, Mode::Standalone);
                self.dangling_since.remove(instance_id);
                tracing::info!(
                    app = %self.app,
                    instance_id = %instance_id,
                    reason = ?reason,
                    "Demoted token client"
                );
            }
        }

        events.push(ClusterEvent::Demoted {
            app: self.app.clone(),
            instance_id: instance_id.clone(),
            from,
            reason,
        });
        Ok(())
    }

    fn demote_client(
        &mut self,
        client_id: &InstanceId,
        reason: DemotionReason,
        events: &mut Vec<ClusterEvent>,
    ) {
        self.set_mode(client_id, Mode::Standalone);
        self.dangling_since.remove(client_id);
        events.push(ClusterEvent::Demoted {
            app: self.app.clone(),
            instance_id: client_id.clone(),
            from: ClusterMode::Client,
            reason,
        });
    }

    // =========================================================================
    // Health sweep
    // =========================================================================

    /// Apply heartbeat timeouts, TTL eviction, and dangling-client expiry.
    pub(crate) fn sweep(
        &mut self,
        now: DateTime<Utc>,
        config: &CoordinatorConfig,
        events: &mut Vec<ClusterEvent>,
    ) -> Result<()> {
        let timed_out: Vec<InstanceId> = self
            .registry
            .silent_since(now - config.heartbeat_timeout())
            .into_iter()
            .filter(|i| i.healthy || mode::holds_role(i.mode.kind()))
            .map(|i| i.instance_id.clone())
            .collect();
        for instance_id in &timed_out {
            tracing::warn!(
                app = %self.app,
                instance_id = %instance_id,
                "Heartbeat timeout"
            );
            self.mark_unhealthy(instance_id, config, now, events)?;
        }

        if let Some(ttl) = config.instance_ttl() {
            let expired: Vec<InstanceId> = self
                .registry
                .silent_since(now - ttl)
                .into_iter()
                .map(|i| i.instance_id.clone())
                .collect();
            for instance_id in &expired {
                tracing::info!(app = %self.app, instance_id = %instance_id, "Evicting silent instance");
                self.remove(instance_id, config, now, events)?;
            }
        }

        self.expire_dangling_clients(now, config, events);
        Ok(())
    }

    fn expire_dangling_clients(
        &mut self,
        now: DateTime<Utc>,
        config: &CoordinatorConfig,
        events: &mut Vec<ClusterEvent>,
    ) {
        let dangling: Vec<InstanceId> = self
            .registry
            .list()
            .iter()
            .filter(|i| {
                i.mode
                    .client()
                    .is_some_and(|c| !self.is_live_server(&c.server_id))
            })
            .map(|i| i.instance_id.clone())
            .collect();

        self.dangling_since.retain(|id, _| dangling.contains(id));

        let grace = config.dangling_client_grace();
        for client_id in &dangling {
            let since = *self.dangling_since.entry(client_id.clone()).or_insert(now);
            if now - since > grace {
                tracing::warn!(
                    app = %self.app,
                    instance_id = %client_id,
                    "Demoting client whose server is gone"
                );
                self.demote_client(client_id, DemotionReason::DanglingClient, events);
            }
        }
    }
}
