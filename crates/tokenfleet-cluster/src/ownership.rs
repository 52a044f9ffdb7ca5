//! Namespace ownership map.
//!
//! Maps each namespace to the single server instance that owns it. Claims are
//! checked in full before anything is written, so a rejected claim leaves the
//! map untouched.

use std::collections::{BTreeMap, BTreeSet};

use tokenfleet_core::{InstanceId, Namespace};

use crate::error::{ClusterError, Result};

/// Result of a successful claim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Claim {
    /// Previous owners that were force-released (takeover or stale owners).
    pub displaced: BTreeSet<InstanceId>,
}

/// Namespace to owner mapping of one application.
#[derive(Debug, Clone, Default)]
pub struct OwnershipMap {
    owners: BTreeMap<Namespace, InstanceId>,
}

impl OwnershipMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `namespaces` for `instance_id`.
    ///
    /// A namespace held by a different owner for which `is_live` returns true
    /// is a conflict unless `takeover` is set. Owners that are displaced,
    /// either by takeover or because they are no longer live, lose every
    /// namespace they hold.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::NamespaceConflict` naming the first contested
    /// namespace (in sorted order) and its owner.
    pub fn claim(
        &mut self,
        instance_id: &InstanceId,
        namespaces: &BTreeSet<Namespace>,
        takeover: bool,
        is_live: impl Fn(&InstanceId) -> bool,
    ) -> Result<Claim> {
        let mut displaced = BTreeSet::new();

        for namespace in namespaces {
            let Some(owner) = self.owners.get(namespace) else {
                continue;
            };
            if owner == instance_id {
                continue;
            }
            if is_live(owner) && !takeover {
                return Err(ClusterError::NamespaceConflict {
                    namespace: namespace.clone(),
                    current_owner: owner.clone(),
                });
            }
            displaced.insert(owner.clone());
        }

        for owner in &displaced {
            self.release(owner);
        }
        for namespace in namespaces {
            self.owners.insert(namespace.clone(), instance_id.clone());
        }

        Ok(Claim { displaced })
    }

    /// Release every namespace owned by `instance_id`. Idempotent.
    pub fn release(&mut self, instance_id: &InstanceId) -> BTreeSet<Namespace> {
        self.release_where(instance_id, |_| true)
    }

    /// Release the namespaces of `instance_id` that are not in `keep`.
    pub fn retain_only(
        &mut self,
        instance_id: &InstanceId,
        keep: &BTreeSet<Namespace>,
    ) -> BTreeSet<Namespace> {
        self.release_where(instance_id, |ns| !keep.contains(ns))
    }

    fn release_where(
        &mut self,
        instance_id: &InstanceId,
        drop_ns: impl Fn(&Namespace) -> bool,
    ) -> BTreeSet<Namespace> {
        let mut released = BTreeSet::new();
        self.owners.retain(|ns, owner| {
            if owner == instance_id && drop_ns(ns) {
                released.insert(ns.clone());
                false
            } else {
                true
            }
        });
        released
    }

    /// The owner of a namespace.
    #[must_use]
    pub fn owner_of(&self, namespace: &Namespace) -> Option<&InstanceId> {
        self.owners.get(namespace)
    }

    /// Namespaces owned by an instance.
    #[must_use]
    pub fn owned_by(&self, instance_id: &InstanceId) -> BTreeSet<Namespace> {
        self.owners
            .iter()
            .filter(|(_, owner)| *owner == instance_id)
            .map(|(ns, _)| ns.clone())
            .collect()
    }

    /// Iterate over `(namespace, owner)` pairs in namespace order.
    pub fn iter(&self) -> impl Iterator<Item = (&Namespace, &InstanceId)> {
        self.owners.iter()
    }

    /// Number of owned namespaces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Returns true if no namespace is owned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> InstanceId {
        InstanceId::new(s).unwrap()
    }

    fn set(names: &[&str]) -> BTreeSet<Namespace> {
        names.iter().map(|n| Namespace::new(*n).unwrap()).collect()
    }

    fn ns(name: &str) -> Namespace {
        Namespace::new(name).unwrap()
    }

    #[test]
    fn claim_free_namespaces() {
        let mut map = OwnershipMap::new();
        let claim = map.claim(&id("a"), &set(&["ns1", "ns2"]), false, |_| true).unwrap();

        assert!(claim.displaced.is_empty());
        assert_eq!(map.owner_of(&ns("ns1")), Some(&id("a")));
        assert_eq!(map.owned_by(&id("a")), set(&["ns1", "ns2"]));
    }

    #[test]
    fn conflict_leaves_map_unchanged() {
        let mut map = OwnershipMap::new();
        map.claim(&id("a"), &set(&["ns1"]), false, |_| true).unwrap();

        let result = map.claim(&id("b"), &set(&["ns0", "ns1"]), false, |_| true);

        match result {
            Err(ClusterError::NamespaceConflict {
                namespace,
                current_owner,
            }) => {
                assert_eq!(namespace, ns("ns1"));
                assert_eq!(current_owner, id("a"));
            }
            other => panic!("expected NamespaceConflict, got {other:?}"),
        }
        assert!(map.owner_of(&ns("ns0")).is_none());
        assert_eq!(map.owner_of(&ns("ns1")), Some(&id("a")));
    }

    #[test]
    fn takeover_releases_previous_owner_entirely() {
        let mut map = OwnershipMap::new();
        map.claim(&id("a"), &set(&["ns1", "ns2"]), false, |_| true).unwrap();

        let claim = map.claim(&id("b"), &set(&["ns1"]), true, |_| true).unwrap();

        assert_eq!(claim.displaced, [id("a")].into_iter().collect());
        assert_eq!(map.owner_of(&ns("ns1")), Some(&id("b")));
        assert!(map.owner_of(&ns("ns2")).is_none());
        assert!(map.owned_by(&id("a")).is_empty());
    }

    #[test]
    fn stale_owner_is_displaced_without_takeover() {
        let mut map = OwnershipMap::new();
        map.claim(&id("a"), &set(&["ns1"]), false, |_| true).unwrap();

        let claim = map.claim(&id("b"), &set(&["ns1"]), false, |_| false).unwrap();

        assert!(claim.displaced.contains(&id("a")));
        assert_eq!(map.owner_of(&ns("ns1")), Some(&id("b")));
    }

    #[test]
    fn reclaiming_own_namespaces_is_not_a_conflict() {
        let mut map = OwnershipMap::new();
        map.claim(&id("a"), &set(&["ns1"]), false, |_| true).unwrap();
        let claim = map.claim(&id("a"), &set(&["ns1", "ns2"]), false, |_| true).unwrap();
        assert!(claim.displaced.is_empty());
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn release_is_idempotent() {
        let mut map = OwnershipMap::new();
        map.claim(&id("a"), &set(&["ns1", "ns2"]), false, |_| true).unwrap();

        assert_eq!(map.release(&id("a")), set(&["ns1", "ns2"]));
        assert!(map.release(&id("a")).is_empty());
        assert!(map.is_empty());
    }

    #[test]
    fn retain_only_drops_other_namespaces() {
        let mut map = OwnershipMap::new();
        map.claim(&id("a"), &set(&["ns1", "ns2", "ns3"]), false, |_| true).unwrap();
        map.claim(&id("b"), &set(&["ns4"]), false, |_| true).unwrap();

        let released = map.retain_only(&id("a"), &set(&["ns2"]));

        assert_eq!(released, set(&["ns1", "ns3"]));
        assert_eq!(map.owned_by(&id("a")), set(&["ns2"]));
        assert_eq!(map.owned_by(&id("b")), set(&["ns4"]));
    }
}
