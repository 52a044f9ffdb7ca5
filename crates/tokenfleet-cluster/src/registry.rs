//! Instance registry.
//!
//! Tracks the instances of one application in first-registration order, which
//! keeps operator views stable. The registry only maintains identity, health,
//! and heartbeat bookkeeping; an instance's [`Mode`] is changed exclusively by
//! the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokenfleet_core::{validate_host, validate_port, AppName, IdError, InstanceId};

use crate::mode::{ClusterMode, Mode};
use crate::types::InstanceRegistration;

/// Maximum length of a reported host name.
pub const MAX_HOSTNAME_LEN: usize = 256;

/// A registered instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Owning application.
    pub app: AppName,
    /// Identifier, unique within the application.
    pub instance_id: InstanceId,
    /// Reported IP or host name.
    pub ip: String,
    /// Reported command port.
    pub port: u16,
    /// Machine host name.
    pub hostname: Option<String>,
    /// Client library version.
    pub version: String,
    /// Whether the instance may act as a token server.
    pub belong_to_app: bool,
    /// Whether a token server here runs inside the application process.
    pub embedded: bool,
    /// Current cluster mode.
    pub mode: Mode,
    /// Whether heartbeats are arriving in time.
    pub healthy: bool,
    /// Coordinator time at which the latest heartbeat arrived.
    pub last_heartbeat: DateTime<Utc>,
    /// Timestamp carried by the latest heartbeat, as reported by the instance.
    pub reported_at: Option<DateTime<Utc>>,
    /// Time of first registration.
    pub registered_at: DateTime<Utc>,
}

impl Instance {
    /// Returns true if this instance is a healthy token server.
    #[must_use]
    pub const fn is_live_server(&self) -> bool {
        self.healthy && matches!(self.mode.kind(), ClusterMode::Server)
    }
}

/// Outcome of a registration upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The instance was not known before.
    Created,
    /// An existing instance was refreshed.
    Refreshed {
        /// The instance was unhealthy before this heartbeat.
        recovered: bool,
    },
}

/// The instances of a single application.
#[derive(Debug, Clone, Default)]
pub struct InstanceRegistry {
    instances: Vec<Instance>,
}

impl InstanceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh an instance from a registration.
    ///
    /// The registration also counts as a heartbeat received at `now`.
    ///
    /// # Errors
    ///
    /// Returns an `IdError` if the host, port, or host name is invalid.
    pub fn register(
        &mut self,
        registration: InstanceRegistration,
        now: DateTime<Utc>,
    ) -> Result<(InstanceId, Registration), IdError> {
        validate_host(&registration.ip)?;
        let port = validate_port(registration.port)?;
        if let Some(hostname) = &registration.hostname {
            if hostname.len() > MAX_HOSTNAME_LEN {
                return Err(IdError::TooLong {
                    kind: "hostname",
                    max: MAX_HOSTNAME_LEN,
                    got: hostname.len(),
                });
            }
        }

        let instance_id = registration
            .instance_id
            .unwrap_or_else(|| InstanceId::from_address(&registration.ip, port));

        if let Some(existing) = self.get_mut(&instance_id) {
            let recovered = !existing.healthy;
            existing.ip = registration.ip;
            existing.port = port;
            existing.hostname = registration.hostname.or(existing.hostname.take());
            if let Some(version) = registration.version {
                existing.version = version;
            }
            if let Some(belong) = registration.belong_to_app {
                existing.belong_to_app = belong;
            }
            if let Some(embedded) = registration.embedded {
                existing.embedded = embedded;
            }
            existing.healthy = true;
            existing.last_heartbeat = existing.last_heartbeat.max(now);
            existing.reported_at = registration.timestamp.or(existing.reported_at);
            return Ok((instance_id, Registration::Refreshed { recovered }));
        }

        self.instances.push(Instance {
            app: registration.app,
            instance_id: instance_id.clone(),
            ip: registration.ip,
            port,
            hostname: registration.hostname,
            version: registration.version.unwrap_or_else(|| "unknown".to_string()),
            belong_to_app: registration.belong_to_app.unwrap_or(true),
            embedded: registration.embedded.unwrap_or(true),
            mode: Mode::Standalone,
            healthy: true,
            last_heartbeat: now,
            reported_at: registration.timestamp,
            registered_at: now,
        });

        Ok((instance_id, Registration::Created))
    }

    /// Record a heartbeat received at `now`. Returns `Some(recovered)` or
    /// `None` if unknown.
    ///
    /// Freshness is judged on `now` only. The instance's own `reported`
    /// clock is kept for display.
    pub fn heartbeat(
        &mut self,
        instance_id: &InstanceId,
        reported: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<bool> {
        let instance = self.get_mut(instance_id)?;
        let recovered = !instance.healthy;
        instance.healthy = true;
        instance.last_heartbeat = instance.last_heartbeat.max(now);
        instance.reported_at = Some(reported);
        Some(recovered)
    }

    /// Mark an instance unhealthy. Returns `Some(changed)` or `None` if unknown.
    pub fn mark_unhealthy(&mut self, instance_id: &InstanceId) -> Option<bool> {
        let instance = self.get_mut(instance_id)?;
        let changed = instance.healthy;
        instance.healthy = false;
        Some(changed)
    }

    /// Remove an instance.
    pub fn remove(&mut self, instance_id: &InstanceId) -> Option<Instance> {
        let index = self
            .instances
            .iter()
            .position(|i| i.instance_id == *instance_id)?;
        Some(self.instances.remove(index))
    }

    /// Look up an instance.
    #[must_use]
    pub fn get(&self, instance_id: &InstanceId) -> Option<&Instance> {
        self.instances.iter().find(|i| i.instance_id == *instance_id)
    }

    pub(crate) fn get_mut(&mut self, instance_id: &InstanceId) -> Option<&mut Instance> {
        self.instances
            .iter_mut()
            .find(|i| i.instance_id == *instance_id)
    }

    /// All instances in registration order.
    #[must_use]
    pub fn list(&self) -> &[Instance] {
        &self.instances
    }

    /// Instances whose last heartbeat is older than `cutoff`.
    #[must_use]
    pub fn silent_since(&self, cutoff: DateTime<Utc>) -> Vec<&Instance> {
        self.instances
            .iter()
            .filter(|i| i.last_heartbeat < cutoff)
            .collect()
    }

    /// Number of registered instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns true if no instance is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn app() -> AppName {
        AppName::new("checkout").unwrap()
    }

    #[test]
    fn register_creates_standalone_instance() {
        let mut registry = InstanceRegistry::new();
        let now = Utc::now();

        let (id, outcome) = registry
            .register(InstanceRegistration::new(app(), "10.0.0.1", 8719), now)
            .unwrap();

        assert_eq!(outcome, Registration::Created);
        assert_eq!(id.as_str(), "10.0.0.1@8719");
        let instance = registry.get(&id).unwrap();
        assert_eq!(instance.mode, Mode::Standalone);
        assert!(instance.healthy);
        assert!(instance.belong_to_app);
        assert!(instance.embedded);
        assert_eq!(instance.version, "unknown");
    }

    #[test]
    fn register_is_idempotent_upsert() {
        let mut registry = InstanceRegistry::new();
        let now = Utc::now();
        let reg = InstanceRegistration::new(app(), "10.0.0.1", 8719);

        registry.register(reg.clone(), now).unwrap();
        let (_, outcome) = registry.register(reg.belong_to_app(false), now).unwrap();

        assert_eq!(outcome, Registration::Refreshed { recovered: false });
        assert_eq!(registry.len(), 1);
        assert!(!registry.list()[0].belong_to_app);
    }

    #[test]
    fn register_rejects_bad_address() {
        let mut registry = InstanceRegistry::new();
        let now = Utc::now();

        let mut reg = InstanceRegistration::new(app(), "10.0.0.1", 8719);
        reg.port = -1;
        assert_eq!(registry.register(reg, now), Err(IdError::InvalidPort(-1)));

        let reg = InstanceRegistration::new(app(), "bad host", 8719);
        assert!(matches!(
            registry.register(reg, now),
            Err(IdError::InvalidHost(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn heartbeat_recovers_unhealthy_instance() {
        let mut registry = InstanceRegistry::new();
        let now = Utc::now();
        let (id, _) = registry
            .register(InstanceRegistration::new(app(), "10.0.0.1", 8719), now)
            .unwrap();

        assert_eq!(registry.mark_unhealthy(&id), Some(true));
        assert_eq!(registry.mark_unhealthy(&id), Some(false));
        let later = now + Duration::seconds(5);
        assert_eq!(registry.heartbeat(&id, later, later), Some(true));
        assert!(registry.get(&id).unwrap().healthy);
        assert_eq!(
            registry.get(&id).unwrap().last_heartbeat,
            now + Duration::seconds(5)
        );
    }

    #[test]
    fn heartbeat_never_moves_backwards() {
        let mut registry = InstanceRegistry::new();
        let now = Utc::now();
        let (id, _) = registry
            .register(InstanceRegistration::new(app(), "10.0.0.1", 8719), now)
            .unwrap();

        registry.heartbeat(&id, now, now - Duration::seconds(30));
        assert_eq!(registry.get(&id).unwrap().last_heartbeat, now);
    }

    #[test]
    fn reported_clock_does_not_drive_freshness() {
        let mut registry = InstanceRegistry::new();
        let now = Utc::now();
        let ahead = now + Duration::days(1);
        let (id, _) = registry
            .register(
                InstanceRegistration::new(app(), "10.0.0.1", 8719).at(ahead),
                now,
            )
            .unwrap();

        let instance = registry.get(&id).unwrap();
        assert_eq!(instance.last_heartbeat, now);
        assert_eq!(instance.reported_at, Some(ahead));

        registry.heartbeat(&id, ahead + Duration::seconds(10), now + Duration::seconds(10));
        let instance = registry.get(&id).unwrap();
        assert_eq!(instance.last_heartbeat, now + Duration::seconds(10));
        assert_eq!(instance.reported_at, Some(ahead + Duration::seconds(10)));
        assert_eq!(registry.silent_since(now + Duration::seconds(70)).len(), 1);
    }

    #[test]
    fn unknown_instance() {
        let mut registry = InstanceRegistry::new();
        let id = InstanceId::new("ghost").unwrap();
        assert!(registry.heartbeat(&id, Utc::now(), Utc::now()).is_none());
        assert!(registry.mark_unhealthy(&id).is_none());
        assert!(registry.remove(&id).is_none());
    }

    #[test]
    fn list_keeps_registration_order() {
        let mut registry = InstanceRegistry::new();
        let now = Utc::now();
        for port in [8721, 8719, 8720] {
            registry
                .register(InstanceRegistration::new(app(), "10.0.0.1", port), now)
                .unwrap();
        }
        let ports: Vec<u16> = registry.list().iter().map(|i| i.port).collect();
        assert_eq!(ports, vec![8721, 8719, 8720]);
    }

    #[test]
    fn silent_since_filters_by_heartbeat() {
        let mut registry = InstanceRegistry::new();
        let now = Utc::now();
        registry
            .register(
                InstanceRegistration::new(app(), "10.0.0.1", 8719),
                now - Duration::seconds(120),
            )
            .unwrap();
        registry
            .register(InstanceRegistration::new(app(), "10.0.0.2", 8719), now)
            .unwrap();

        let silent = registry.silent_since(now - Duration::seconds(60));
        assert_eq!(silent.len(), 1);
        assert_eq!(silent[0].ip, "10.0.0.1");
    }
}
