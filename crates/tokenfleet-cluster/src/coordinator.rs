//! Cluster coordinator.
//!
//! This module provides the `ClusterControl` trait and the
//! `ClusterCoordinator` implementation that owns all per-application state.
//!
//! Each application has its own slot holding a mutation lock and the current
//! published snapshot. A mutation takes the lock, applies the operation to a
//! private copy of the snapshot, and swaps the copy in only if the operation
//! succeeded. Readers clone the snapshot pointer and never wait on the
//! mutation lock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokenfleet_core::{AppName, InstanceId};
use tokio::sync::broadcast;

use crate::error::{ClusterError, Result};
use crate::events::{ClusterEvent, DemotionReason};
use crate::mode::{self, ClusterMode, ModeEvent};
use crate::projection::{self, AssignState, ClusterState, TokenClient, TokenServer};
use crate::registry::Instance;
use crate::state::AppCluster;
use crate::types::{
    AssignmentRequest, BindClientRequest, CoordinatorConfig, InstanceRegistration,
    ModifyClientConfigRequest, ModifyModeRequest, ModifyServerConfigRequest, UnbindRequest,
};

/// Trait defining the cluster coordination operations.
///
/// All operations are synchronous in-memory bookkeeping. Operations on one
/// application are linearized; operations on different applications run in
/// parallel.
pub trait ClusterControl: Send + Sync {
    // =========================================================================
    // Registry
    // =========================================================================

    /// Register an instance or refresh an existing one. Counts as a heartbeat.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::Id` if the address or metadata is invalid.
    fn register(&self, registration: InstanceRegistration) -> Result<Instance>;

    /// Record a heartbeat from a registered instance.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::InstanceNotFound` if the instance is unknown.
    fn heartbeat(
        &self,
        app: &AppName,
        instance_id: &InstanceId,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;

    /// Mark an instance unhealthy and demote it if it holds a role.
    fn mark_unhealthy(&self, app: &AppName, instance_id: &InstanceId) -> Result<()>;

    /// Deregister an instance, unbinding it first.
    fn remove_instance(&self, app: &AppName, instance_id: &InstanceId) -> Result<()>;

    /// Instances of an application in registration order.
    fn list(&self, app: &AppName) -> Vec<Instance>;

    /// Applications with at least one instance, sorted.
    fn apps(&self) -> Vec<AppName>;

    // =========================================================================
    // Assignment
    // =========================================================================

    /// Make an instance the token server for a namespace set.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::InstanceNotFound`, `NotEligible`,
    /// `NamespaceConflict`, or `InvalidTransition`.
    fn assign(&self, request: AssignmentRequest) -> Result<AssignState>;

    /// Return an instance to standalone mode. Unbinding a standalone
    /// instance succeeds without changes.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::InstanceNotFound` if the instance is unknown.
    fn unbind(&self, request: UnbindRequest) -> Result<()>;

    /// Attach an instance as client of a specific server.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::ServerNotActive` if the target is not a live
    /// server.
    fn bind_client(&self, request: BindClientRequest) -> Result<()>;

    /// Edit the namespaces and transport settings of a server.
    fn modify_server_config(&self, request: ModifyServerConfigRequest) -> Result<()>;

    /// Bind a client to the server listening at an address.
    fn modify_client_config(&self, request: ModifyClientConfigRequest) -> Result<()>;

    /// Switch an instance to a mode using default settings.
    fn modify_mode(&self, request: ModifyModeRequest) -> Result<()>;

    // =========================================================================
    // Projections
    // =========================================================================

    /// Assignment view of an application. Unknown apps yield an empty view.
    fn project(&self, app: &AppName) -> AssignState;

    /// Cluster state of every instance of an application.
    fn cluster_states(&self, app: &AppName) -> Vec<ClusterState>;

    /// Cluster state of one instance.
    fn cluster_state(&self, app: &AppName, instance_id: &InstanceId) -> Option<ClusterState>;

    /// Token servers of one application, or of all applications.
    fn servers(&self, app: Option<&AppName>) -> Vec<TokenServer>;

    /// Token clients of one application, or of all applications.
    fn clients(&self, app: Option<&AppName>) -> Vec<TokenClient>;
}

/// Outcome of one health sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Instances newly marked unhealthy.
    pub marked_unhealthy: usize,
    /// Servers and clients returned to standalone.
    pub demoted: usize,
    /// Instances removed by TTL.
    pub evicted: usize,
}

impl SweepReport {
    /// Returns true if the sweep changed nothing visible.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.marked_unhealthy == 0 && self.demoted == 0 && self.evicted == 0
    }

    fn absorb(&mut self, events: &[ClusterEvent]) {
        for event in events {
            match event {
                ClusterEvent::MarkedUnhealthy { .. } => self.marked_unhealthy += 1,
                ClusterEvent::Demoted { .. } => self.demoted += 1,
                ClusterEvent::Removed { .. } => self.evicted += 1,
                _ => {}
            }
        }
    }
}

struct AppSlot {
    write: Mutex<()>,
    snapshot: RwLock<Arc<AppCluster>>,
}

impl AppSlot {
    fn new(app: AppName) -> Self {
        Self {
            write: Mutex::new(()),
            snapshot: RwLock::new(Arc::new(AppCluster::new(app))),
        }
    }

    fn snapshot(&self) -> Arc<AppCluster> {
        Arc::clone(&self.snapshot.read())
    }
}

/// The main cluster coordinator implementation.
pub struct ClusterCoordinator {
    config: CoordinatorConfig,
    apps: RwLock<HashMap<AppName, Arc<AppSlot>>>,
    events: broadcast::Sender<ClusterEvent>,
}

impl ClusterCoordinator {
    /// Create a new coordinator.
    #[must_use]
    pub fn new(config: CoordinatorConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            config,
            apps: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Create with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(CoordinatorConfig::default())
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Subscribe to committed cluster events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }

    /// Current snapshot of an application, if it was ever registered.
    #[must_use]
    pub fn snapshot(&self, app: &AppName) -> Option<Arc<AppCluster>> {
        self.slot(app).map(|slot| slot.snapshot())
    }

    /// Register an instance whose heartbeat arrived at `now`.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::Id` if the address or metadata is invalid.
    pub fn register_at(
        &self,
        registration: InstanceRegistration,
        now: DateTime<Utc>,
    ) -> Result<Instance> {
        let slot = self.slot_or_insert(&registration.app);
        self.commit(&slot, |cluster, events| {
            cluster.register(registration, now, events)
        })
    }

    /// Record a heartbeat that arrived at `now`. `reported` is the
    /// instance's own clock and never decides freshness.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::InstanceNotFound` if the instance is unknown.
    pub fn heartbeat_at(
        &self,
        app: &AppName,
        instance_id: &InstanceId,
        reported: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.mutate(app, instance_id, |cluster, events| {
            cluster.heartbeat(instance_id, reported, now, events)
        })?;
        tracing::debug!(app = %app, instance_id = %instance_id, "Processed heartbeat");
        Ok(())
    }

    /// Run one health sweep over every application.
    ///
    /// Marks silent instances unhealthy and demotes them, evicts instances
    /// past the TTL, and demotes clients that have pointed at a missing
    /// server for longer than the grace period.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let slots: Vec<Arc<AppSlot>> = self.apps.read().values().cloned().collect();
        let mut report = SweepReport::default();

        for slot in slots {
            let result = self.commit(&slot, |cluster, events| {
                cluster.sweep(now, &self.config, events)?;
                let mut app_report = SweepReport::default();
                app_report.absorb(events);
                Ok(app_report)
            });
            match result {
                Ok(app_report) => {
                    report.marked_unhealthy += app_report.marked_unhealthy;
                    report.demoted += app_report.demoted;
                    report.evicted += app_report.evicted;
                }
                Err(e) => tracing::error!(error = %e, "Health sweep failed"),
            }
        }

        report
    }

    fn slot(&self, app: &AppName) -> Option<Arc<AppSlot>> {
        self.apps.read().get(app).cloned()
    }

    fn slot_or_insert(&self, app: &AppName) -> Arc<AppSlot> {
        if let Some(slot) = self.slot(app) {
            return slot;
        }
        let mut apps = self.apps.write();
        Arc::clone(
            apps.entry(app.clone())
                .or_insert_with(|| Arc::new(AppSlot::new(app.clone()))),
        )
    }

    /// Apply `op` to a copy of the slot's state and publish it on success.
    ///
    /// Events are sent before the mutation lock is released so subscribers
    /// see one application's changes in commit order.
    fn commit<T>(
        &self,
        slot: &AppSlot,
        op: impl FnOnce(&mut AppCluster, &mut Vec<ClusterEvent>) -> Result<T>,
    ) -> Result<T> {
        let _guard = slot.write.lock();
        let mut next = AppCluster::clone(&slot.snapshot());
        let mut events = Vec::new();
        let value = op(&mut next, &mut events)?;
        *slot.snapshot.write() = Arc::new(next);

        for event in events {
            // No subscribers is fine
            let _ = self.events.send(event);
        }
        Ok(value)
    }

    /// Mutate an application that must already contain `instance_id`.
    fn mutate<T>(
        &self,
        app: &AppName,
        instance_id: &InstanceId,
        op: impl FnOnce(&mut AppCluster, &mut Vec<ClusterEvent>) -> Result<T>,
    ) -> Result<T> {
        let slot = self
            .slot(app)
            .ok_or_else(|| ClusterError::not_found(app, instance_id))?;
        self.commit(&slot, op)
    }

    /// Find the application of an instance when the caller did not name one.
    fn resolve_app(&self, app: Option<&AppName>, instance_id: &InstanceId) -> Result<AppName> {
        if let Some(app) = app {
            return Ok(app.clone());
        }

        let slots: Vec<(AppName, Arc<AppSlot>)> = self
            .apps
            .read()
            .iter()
            .map(|(app, slot)| (app.clone(), Arc::clone(slot)))
            .collect();
        let mut matches: Vec<AppName> = slots
            .into_iter()
            .filter(|(_, slot)| slot.snapshot().registry().get(instance_id).is_some())
            .map(|(app, _)| app)
            .collect();
        matches.sort();

        match matches.len() {
            0 => Err(ClusterError::InstanceNotFound {
                app: None,
                instance_id: instance_id.clone(),
            }),
            1 => Ok(matches.remove(0)),
            _ => Err(ClusterError::AmbiguousInstance {
                instance_id: instance_id.clone(),
                apps: matches,
            }),
        }
    }

    fn snapshots(&self, app: Option<&AppName>) -> Vec<Arc<AppCluster>> {
        match app {
            Some(app) => self.snapshot(app).into_iter().collect(),
            None => {
                let mut snapshots: Vec<Arc<AppCluster>> =
                    self.apps.read().values().map(|slot| slot.snapshot()).collect();
                snapshots.sort_by(|a, b| a.app().cmp(b.app()));
                snapshots
            }
        }
    }
}

impl ClusterControl for ClusterCoordinator {
    fn register(&self, registration: InstanceRegistration) -> Result<Instance> {
        self.register_at(registration, Utc::now())
    }

    fn heartbeat(
        &self,
        app: &AppName,
        instance_id: &InstanceId,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.heartbeat_at(app, instance_id, timestamp, Utc::now())
    }

    fn mark_unhealthy(&self, app: &AppName, instance_id: &InstanceId) -> Result<()> {
        self.mutate(app, instance_id, |cluster, events| {
            cluster.mark_unhealthy(instance_id, &self.config, Utc::now(), events)
        })
    }

    fn remove_instance(&self, app: &AppName, instance_id: &InstanceId) -> Result<()> {
        self.mutate(app, instance_id, |cluster, events| {
            cluster.remove(instance_id, &self.config, Utc::now(), events)
        })?;
        tracing::info!(app = %app, instance_id = %instance_id, "Removed instance");
        Ok(())
    }

    fn list(&self, app: &AppName) -> Vec<Instance> {
        self.snapshot(app)
            .map(|cluster| cluster.registry().list().to_vec())
            .unwrap_or_default()
    }

    fn apps(&self) -> Vec<AppName> {
        self.snapshots(None)
            .iter()
            .filter(|cluster| !cluster.registry().is_empty())
            .map(|cluster| cluster.app().clone())
            .collect()
    }

    fn assign(&self, request: AssignmentRequest) -> Result<AssignState> {
        let app = self.resolve_app(request.app.as_ref(), &request.instance_id)?;
        self.mutate(&app, &request.instance_id, |cluster, events| {
            cluster.assign(&request, &self.config, Utc::now(), events)?;
            Ok(projection::assign_state(cluster))
        })
    }

    fn unbind(&self, request: UnbindRequest) -> Result<()> {
        self.mutate(&request.app, &request.instance_id, |cluster, events| {
            cluster.demote(
                &request.instance_id,
                ModeEvent::Unbind,
                DemotionReason::Unbind,
                &self.config,
                Utc::now(),
                events,
            )
        })
    }

    fn bind_client(&self, request: BindClientRequest) -> Result<()> {
        self.mutate(&request.app, &request.instance_id, |cluster, events| {
            cluster.attach_client(
                &request.instance_id,
                &request.server_instance_id,
                request.request_timeout,
                &self.config,
                events,
            )
        })
    }

    fn modify_server_config(&self, request: ModifyServerConfigRequest) -> Result<()> {
        self.mutate(&request.app, &request.instance_id, |cluster, events| {
            cluster.modify_server(&request, &self.config, Utc::now(), events)
        })
    }

    fn modify_client_config(&self, request: ModifyClientConfigRequest) -> Result<()> {
        self.mutate(&request.app, &request.instance_id, |cluster, events| {
            let server_id = cluster.server_at(&request.server_host, request.server_port)?;
            cluster.attach_client(
                &request.instance_id,
                &server_id,
                request.request_timeout,
                &self.config,
                events,
            )
        })
    }

    fn modify_mode(&self, request: ModifyModeRequest) -> Result<()> {
        let ModifyModeRequest {
            app,
            instance_id,
            mode: target,
        } = request;

        self.mutate(&app, &instance_id, |cluster, events| {
            let current = cluster
                .registry()
                .get(&instance_id)
                .map(|i| i.mode.kind())
                .ok_or_else(|| ClusterError::not_found(&app, &instance_id))?;

            match target {
                ClusterMode::Standalone => cluster.demote(
                    &instance_id,
                    ModeEvent::Unbind,
                    DemotionReason::Unbind,
                    &self.config,
                    Utc::now(),
                    events,
                ),
                ClusterMode::Server if current == ClusterMode::Server => Ok(()),
                ClusterMode::Server => {
                    let request = AssignmentRequest::new(
                        app.clone(),
                        instance_id.clone(),
                        [app.default_namespace()],
                    );
                    cluster.assign(&request, &self.config, Utc::now(), events)
                }
                ClusterMode::Client if current == ClusterMode::Client => Ok(()),
                ClusterMode::Client => {
                    mode::validate_transition(&instance_id, current, ModeEvent::AssignAsClient)?;
                    let servers = cluster.live_servers();
                    match servers.as_slice() {
                        [] => Err(ClusterError::NoActiveServer(app.clone())),
                        [server_id] => cluster.attach_client(
                            &instance_id,
                            server_id,
                            None,
                            &self.config,
                            events,
                        ),
                        _ => Err(ClusterError::InvalidRequest(format!(
                            "app {app} has {} active token servers; bind to one explicitly",
                            servers.len()
                        ))),
                    }
                }
            }
        })
    }

    fn project(&self, app: &AppName) -> AssignState {
        self.snapshot(app).map_or_else(
            || AssignState::empty(app.clone()),
            |cluster| projection::assign_state(&cluster),
        )
    }

    fn cluster_states(&self, app: &AppName) -> Vec<ClusterState> {
        self.snapshot(app)
            .map(|cluster| projection::cluster_states(&cluster))
            .unwrap_or_default()
    }

    fn cluster_state(&self, app: &AppName, instance_id: &InstanceId) -> Option<ClusterState> {
        let cluster = self.snapshot(app)?;
        let instance = cluster.registry().get(instance_id)?;
        Some(projection::cluster_state(&cluster, instance))
    }

    fn servers(&self, app: Option<&AppName>) -> Vec<TokenServer> {
        self.snapshots(app)
            .iter()
            .flat_map(|cluster| projection::token_servers(cluster))
            .collect()
    }

    fn clients(&self, app: Option<&AppName>) -> Vec<TokenClient> {
        self.snapshots(app)
            .iter()
            .flat_map(|cluster| projection::token_clients(cluster))
            .collect()
    }
}
