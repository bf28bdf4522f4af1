// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway capability: cross-node call forwarding.
//!
//! The routing core feeds the gateway with `consume`/`cleanup` as peer
//! catalogs change and delegates to `resolve` when a name has no local
//! owner. What the gateway does with a descriptor (proxying, virtual
//! addressing, plain hand-back) is its own business.

use crate::service::ServiceDescriptor;
use parking_lot::Mutex;
use rand::seq::IteratorRandom;
use std::collections::BTreeMap;

/// Cross-node forwarding interface consumed by the locator.
pub trait Gateway: Send + Sync {
    /// Resolve a name to a descriptor on some remote node.
    fn resolve(&self, name: &str) -> crate::Result<ServiceDescriptor>;

    /// A peer's service became available (or changed its descriptor).
    fn consume(&self, uuid: &str, name: &str, descriptor: &ServiceDescriptor);

    /// A peer's service went away.
    fn cleanup(&self, uuid: &str, name: &str);
}

/// The default gateway: keeps every consumed descriptor and resolves by
/// uniform random choice among the known providers of a name. No
/// forwarding, no affinity - the cheapest thing that federates.
pub struct AdhocGateway {
    state: Mutex<BTreeMap<String, BTreeMap<String, ServiceDescriptor>>>,
}

impl AdhocGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of `(uuid, name)` pairs currently known.
    pub fn entries(&self) -> usize {
        self.state.lock().values().map(BTreeMap::len).sum()
    }
}

impl Default for AdhocGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl Gateway for AdhocGateway {
    fn resolve(&self, name: &str) -> crate::Result<ServiceDescriptor> {
        let state = self.state.lock();

        let providers = state
            .get(name)
            .filter(|providers| !providers.is_empty())
            .ok_or_else(|| crate::Error::ServiceUnavailable(name.to_string()))?;

        let mut rng = rand::thread_rng();
        let descriptor = providers
            .values()
            .choose(&mut rng)
            .cloned()
            .ok_or_else(|| crate::Error::ServiceUnavailable(name.to_string()))?;

        Ok(descriptor)
    }

    fn consume(&self, uuid: &str, name: &str, descriptor: &ServiceDescriptor) {
        log::debug!("[gateway] consuming '{}' from node '{}'", name, uuid);
        self.state
            .lock()
            .entry(name.to_string())
            .or_default()
            .insert(uuid.to_string(), descriptor.clone());
    }

    fn cleanup(&self, uuid: &str, name: &str) {
        log::debug!("[gateway] cleaning up '{}' from node '{}'", name, uuid);
        let mut state = self.state.lock();
        if let Some(providers) = state.get_mut(name) {
            providers.remove(uuid);
            if providers.is_empty() {
                state.remove(name);
            }
        }
    }
}
