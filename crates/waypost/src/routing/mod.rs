// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The routing engine: a dual index over local and remote services plus
//! the weighted routing groups drawn from on resolution.
//!
//! Two remote indices are kept in lockstep: the forward index
//! `service -> {uuid}` answers "who provides this name", the inverted
//! index `uuid -> {service -> descriptor}` answers "what does this node
//! provide" and is what peer snapshots are diffed against. A third set
//! tracks locally attached names so that group presence reflects the
//! whole catalog, not just the federation.

mod group;

pub use group::GroupIndex;

use crate::service::ServiceDescriptor;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet};

/// A snapshot of one node's local catalog, as carried by synchronize
/// chunks.
pub type CatalogSnapshot = BTreeMap<String, ServiceDescriptor>;

/// Services added and removed by one `update_remote` call, in apply
/// order. A descriptor change shows up as a removal of the old value and
/// an addition of the new one.
pub type RemoteDiff = (
    Vec<(String, ServiceDescriptor)>,
    Vec<(String, ServiceDescriptor)>,
);

/// The federated routing table. All operations serialize on one internal
/// mutex; draws are O(group size) and keep the critical section short.
pub struct Router {
    state: Mutex<RouterState>,
}

struct RouterState {
    /// Service -> uuids of remote nodes providing it.
    forward: BTreeMap<String, BTreeSet<String>>,
    /// Uuid -> its last applied catalog snapshot.
    inverted: BTreeMap<String, CatalogSnapshot>,
    /// Names attached on this node.
    locals: BTreeSet<String>,
    groups: GroupTable,
}

impl Router {
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// A router whose group draws follow a fixed RNG seed. Production
    /// code uses `new()`; deterministic tests seed explicitly.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: Mutex::new(RouterState {
                forward: BTreeMap::new(),
                inverted: BTreeMap::new(),
                locals: BTreeSet::new(),
                groups: GroupTable::new(seed),
            }),
        }
    }

    /// Register a locally attached service. Name uniqueness against the
    /// local catalog is enforced by the facade before this call.
    pub fn add_local(&self, name: &str) {
        let mut state = self.state.lock();
        state.locals.insert(name.to_string());
        state.groups.add_service(name);
    }

    /// Drop a locally detached service. Group presence survives if remote
    /// providers of the same name are still known.
    pub fn remove_local(&self, name: &str) {
        let mut state = self.state.lock();
        state.locals.remove(name);

        let still_remote = state
            .forward
            .get(name)
            .map(|uuids| !uuids.is_empty())
            .unwrap_or(false);
        if !still_remote {
            state.groups.remove_service(name);
        }
    }

    /// Apply a peer's catalog snapshot, returning `(added, removed)`.
    ///
    /// The diff is the symmetric difference against the peer's previous
    /// snapshot, with descriptor changes expanded to a remove/add pair.
    /// The returned lists drive the gateway's `cleanup`/`consume`.
    pub fn update_remote(&self, uuid: &str, snapshot: CatalogSnapshot) -> RemoteDiff {
        let mut state = self.state.lock();

        let current = state.inverted.get(uuid).cloned().unwrap_or_default();

        let mut removed = Vec::new();
        for (name, descriptor) in &current {
            if snapshot.get(name) != Some(descriptor) {
                removed.push((name.clone(), descriptor.clone()));
            }
        }

        let mut added = Vec::new();
        for (name, descriptor) in &snapshot {
            if current.get(name) != Some(descriptor) {
                added.push((name.clone(), descriptor.clone()));
            }
        }

        for (name, _) in &removed {
            state.remove(uuid, name);
        }
        for (name, descriptor) in &added {
            state.add(uuid, name, descriptor.clone());
        }

        (added, removed)
    }

    /// Drop a peer's entire subtree, returning what was dropped.
    pub fn remove_remote(&self, uuid: &str) -> CatalogSnapshot {
        let mut state = self.state.lock();

        let dropped = state.inverted.get(uuid).cloned().unwrap_or_default();
        for name in dropped.keys() {
            state.remove(uuid, name);
        }

        dropped
    }

    /// Install or replace a routing group. Presence is seeded from both
    /// the remote forward index and the local catalog.
    pub fn add_group(&self, name: &str, group: &BTreeMap<String, u64>) {
        let mut state = self.state.lock();
        let RouterState {
            forward,
            locals,
            groups,
            ..
        } = &mut *state;

        groups.add_group(name, group, |service| {
            locals.contains(service)
                || forward
                    .get(service)
                    .map(|uuids| !uuids.is_empty())
                    .unwrap_or(false)
        });

        log::info!("[routing] routing group '{}' has been updated", name);
    }

    /// Erase a routing group. Resolutions of its name fall back to the
    /// name itself afterwards.
    pub fn remove_group(&self, name: &str) {
        let mut state = self.state.lock();
        state.groups.remove_group(name);

        log::info!("[routing] routing group '{}' has been removed", name);
    }

    /// Map a requested name to a concrete service name.
    ///
    /// Group names and service names share one flat namespace: a name
    /// matching a group resolves by weighted draw, anything else (and any
    /// group with no resolvable member) resolves to itself. A name with
    /// neither local nor remote provider thus comes back unchanged, and
    /// the facade reports it unavailable at the gateway step.
    pub fn select_service(&self, name: &str) -> String {
        let mut state = self.state.lock();
        state
            .groups
            .select(name)
            .unwrap_or_else(|| name.to_string())
    }

    /// True when the name has a local owner or at least one remote
    /// provider.
    pub fn has(&self, name: &str) -> bool {
        let state = self.state.lock();
        state.locals.contains(name)
            || state
                .forward
                .get(name)
                .map(|uuids| !uuids.is_empty())
                .unwrap_or(false)
    }

    /// Uuids currently present in the remote index (for introspection and
    /// tests).
    pub fn remote_uuids(&self) -> Vec<String> {
        self.state.lock().inverted.keys().cloned().collect()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterState {
    fn add(&mut self, uuid: &str, name: &str, descriptor: ServiceDescriptor) {
        self.forward
            .entry(name.to_string())
            .or_default()
            .insert(uuid.to_string());
        self.inverted
            .entry(uuid.to_string())
            .or_default()
            .insert(name.to_string(), descriptor);

        self.groups.add_service(name);
    }

    fn remove(&mut self, uuid: &str, name: &str) {
        if let Some(uuids) = self.forward.get_mut(name) {
            uuids.remove(uuid);
            if uuids.is_empty() {
                self.forward.remove(name);
            }
        }
        if let Some(services) = self.inverted.get_mut(uuid) {
            services.remove(name);
            if services.is_empty() {
                self.inverted.remove(uuid);
            }
        }

        let resolvable = self.locals.contains(name) || self.forward.contains_key(name);
        if !resolvable {
            self.groups.remove_service(name);
        }
    }
}

/// The group table plus its inverted index
/// `service -> {group -> index in group}`, so a presence flip touches
/// only the groups that contain the service.
struct GroupTable {
    groups: BTreeMap<String, GroupIndex>,
    inverted: BTreeMap<String, BTreeMap<String, usize>>,
    rng: SmallRng,
}

impl GroupTable {
    fn new(seed: u64) -> Self {
        Self {
            groups: BTreeMap::new(),
            inverted: BTreeMap::new(),
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    fn add_group<F>(&mut self, name: &str, group: &BTreeMap<String, u64>, is_present: F)
    where
        F: Fn(&str) -> bool,
    {
        self.remove_group(name);

        let mut index = GroupIndex::new(group);

        for position in 0..index.services().len() {
            let service = index.services()[position].clone();
            if is_present(&service) {
                index.mark_present(position);
            }
            self.inverted
                .entry(service)
                .or_default()
                .insert(name.to_string(), position);
        }

        self.groups.insert(name.to_string(), index);
    }

    fn remove_group(&mut self, name: &str) {
        if self.groups.remove(name).is_none() {
            return;
        }

        self.inverted.retain(|_, groups| {
            groups.remove(name);
            !groups.is_empty()
        });
    }

    fn add_service(&mut self, name: &str) {
        if let Some(groups) = self.inverted.get(name) {
            for (group, &position) in groups {
                if let Some(index) = self.groups.get_mut(group) {
                    index.mark_present(position);
                }
            }
        }
    }

    fn remove_service(&mut self, name: &str) {
        if let Some(groups) = self.inverted.get(name) {
            for (group, &position) in groups {
                if let Some(index) = self.groups.get_mut(group) {
                    index.mark_absent(position);
                }
            }
        }
    }

    fn select(&mut self, name: &str) -> Option<String> {
        let index = self.groups.get(name)?;
        index.pick(&mut self.rng).map(str::to_string)
    }
}
