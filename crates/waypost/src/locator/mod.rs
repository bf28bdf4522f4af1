// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The locator facade.
//!
//! Owns the local catalog (attached actors plus the port pool, under one
//! mutex), the router, the synchronize feed, and - while connected - the
//! federation machinery. External callers may arrive on any thread; the
//! catalog mutex and the router's internal mutex provide the total order
//! every other component relies on.

use crate::cluster::announce::AnnounceEngine;
use crate::cluster::PeerRegistry;
use crate::config::LocatorConfig;
use crate::gateway::Gateway;
use crate::protocol::PeerKey;
use crate::routing::{CatalogSnapshot, Router};
use crate::service::{Endpoint, ServiceActor, ServiceDescriptor, UsageCounters};
use crate::storage::{GroupStore, StoreErrorKind};
use crate::sync::{SynchronizeFeed, Upstream};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-node service locator.
///
/// Constructed through [`Locator::builder`]; shared behind an `Arc` so
/// the RPC front-end and the federation threads can reach it.
pub struct Locator {
    config: LocatorConfig,
    router: Arc<Router>,
    catalog: Mutex<LocalCatalog>,
    feed: Mutex<SynchronizeFeed>,
    gateway: Mutex<Option<Arc<dyn Gateway>>>,
    store: Option<Box<dyn GroupStore>>,
    federation: Mutex<Option<Federation>>,
}

struct LocalCatalog {
    /// Attached services in insertion order; names are unique.
    services: Vec<(String, Box<dyn ServiceActor>)>,
    /// Free ports, popped on attach and returned on detach. Mutated in
    /// lockstep with `services`, hence guarded by the same mutex.
    ports: Vec<u16>,
}

struct Federation {
    registry: Arc<PeerRegistry>,
    announce: Option<AnnounceEngine>,
}

/// Builder wiring the collaborators into a locator.
pub struct LocatorBuilder {
    config: LocatorConfig,
    gateway: Option<Arc<dyn Gateway>>,
    store: Option<Box<dyn GroupStore>>,
    router_seed: Option<u64>,
}

impl LocatorBuilder {
    /// Use this gateway for cross-node resolution and federation.
    pub fn gateway(mut self, gateway: Arc<dyn Gateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Read routing groups from this store at start-up and on `refresh`.
    pub fn store(mut self, store: Box<dyn GroupStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Seed the router's draw RNG (deterministic tests only).
    pub fn router_seed(mut self, seed: u64) -> Self {
        self.router_seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<Arc<Locator>> {
        self.config.validate()?;

        log::info!("[locator] this node's id is '{}'", self.config.uuid);

        let mut router = match self.router_seed {
            Some(seed) => Router::with_seed(seed),
            None => Router::new(),
        };

        if let Some(store) = &self.store {
            if let Err(err) = load_groups(store.as_ref(), &router) {
                // Partial loads leave the table in an unpredictable
                // state; start from a clean one instead.
                router = match self.router_seed {
                    Some(seed) => Router::with_seed(seed),
                    None => Router::new(),
                };
                log::info!("[locator] unable to read groups from storage: {}", err);
            }
        }

        let ports = match self.config.port_pool {
            Some((min, max)) => {
                log::info!(
                    "[locator] {} locator ports available, {} through {}",
                    max - min,
                    min,
                    max
                );
                // Reverse fill so allocation hands out ascending ports.
                (min..max).rev().collect()
            }
            None => Vec::new(),
        };

        Ok(Arc::new(Locator {
            config: self.config,
            router: Arc::new(router),
            catalog: Mutex::new(LocalCatalog {
                services: Vec::new(),
                ports,
            }),
            feed: Mutex::new(SynchronizeFeed::new()),
            gateway: Mutex::new(self.gateway),
            store: self.store,
            federation: Mutex::new(None),
        }))
    }
}

fn load_groups(store: &dyn GroupStore, router: &Router) -> std::result::Result<(), crate::StoreError> {
    let names = store.find("groups", &["group"])?;

    if names.is_empty() {
        log::info!("[locator] there are no routing groups to load");
        return Ok(());
    }

    for name in names {
        let group = store.read(&name)?;
        router.add_group(&name, &group);
    }
    Ok(())
}

impl Locator {
    pub fn builder(config: LocatorConfig) -> LocatorBuilder {
        LocatorBuilder {
            config,
            gateway: None,
            store: None,
            router_seed: None,
        }
    }

    /// This node's identity.
    pub fn uuid(&self) -> &str {
        &self.config.uuid
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    /// The routing table, shared with the federation machinery.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Publish a service under `name`.
    ///
    /// Allocates a port from the pool (or 0 without one), binds the
    /// actor, records it in the catalog, and pushes a fresh snapshot to
    /// all subscribers.
    pub fn attach(&self, name: &str, mut actor: Box<dyn ServiceActor>) -> Result<()> {
        {
            let mut catalog = self.catalog.lock();

            if catalog.services.iter().any(|(existing, _)| existing == name) {
                return Err(Error::NameConflict(name.to_string()));
            }

            let port = if self.config.port_pool.is_some() {
                match catalog.ports.pop() {
                    Some(port) => port,
                    None => return Err(Error::PortsExhausted),
                }
            } else {
                0
            };

            let endpoints = vec![Endpoint::new(self.config.hostname.clone(), port)];

            // A port lost to a failed bind stays out of the pool: the
            // failure usually means something else squats on it.
            actor.run(&endpoints)?;

            let bound = actor
                .location()
                .first()
                .map(|endpoint| endpoint.port)
                .unwrap_or(port);
            log::info!("[locator] service '{}' published on port {}", name, bound);

            catalog.services.push((name.to_string(), actor));
        }

        self.router.add_local(name);
        self.broadcast();
        Ok(())
    }

    /// Withdraw a service, returning its actor for the caller to
    /// dispose of.
    pub fn detach(&self, name: &str) -> Result<Box<dyn ServiceActor>> {
        let actor = {
            let mut catalog = self.catalog.lock();

            let index = catalog
                .services
                .iter()
                .position(|(existing, _)| existing == name)
                .ok_or_else(|| Error::ServiceUnavailable(name.to_string()))?;

            let (_, mut actor) = catalog.services.remove(index);
            let location = actor.location();
            actor.terminate();

            let port = location.first().map(|endpoint| endpoint.port).unwrap_or(0);
            if self.config.port_pool.is_some() {
                catalog.ports.push(port);
            }

            log::info!("[locator] service '{}' withdrawn from port {}", name, port);
            actor
        };

        self.router.remove_local(name);
        self.broadcast();
        Ok(actor)
    }

    /// Resolve a name to a descriptor, preferring the local catalog and
    /// falling back to the gateway.
    pub fn resolve(&self, name: &str) -> Result<ServiceDescriptor> {
        let target = self.router.select_service(name);

        {
            let catalog = self.catalog.lock();
            if let Some((_, actor)) = catalog
                .services
                .iter()
                .find(|(existing, _)| *existing == target)
            {
                log::debug!("[locator] providing '{}' using the local node", name);
                return Ok(actor.metadata());
            }
        }

        let gateway = self.gateway.lock().clone();
        match gateway {
            Some(gateway) => gateway.resolve(&target),
            None => Err(Error::ServiceUnavailable(name.to_string())),
        }
    }

    /// Usage counters for every attached service, in catalog order of
    /// names.
    pub fn reports(&self) -> BTreeMap<String, UsageCounters> {
        let catalog = self.catalog.lock();
        catalog
            .services
            .iter()
            .map(|(name, actor)| (name.clone(), actor.counters()))
            .collect()
    }

    /// Re-read one routing group from the store. A `Storage`-kind read
    /// failure means the group was deleted; other failures propagate.
    pub fn refresh(&self, name: &str) -> Result<()> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| Error::Storage("no group store is configured".to_string()))?;

        match store.read(name) {
            Ok(group) => {
                self.router.add_group(name, &group);
                Ok(())
            }
            Err(err) if err.kind == StoreErrorKind::Storage => {
                log::info!(
                    "[locator] unable to read group '{}' from storage: {}",
                    name,
                    err
                );
                self.router.remove_group(name);
                Ok(())
            }
            Err(err) => Err(Error::Storage(err.to_string())),
        }
    }

    /// Register a subscriber with the synchronize feed.
    pub fn synchronize(&self, upstream: Box<dyn Upstream>) -> Result<()> {
        let snapshot = self.dump();
        self.feed.lock().subscribe(&snapshot, upstream)
    }

    /// Full `{name -> descriptor}` snapshot of the local catalog.
    pub fn dump(&self) -> CatalogSnapshot {
        let catalog = self.catalog.lock();
        catalog
            .services
            .iter()
            .map(|(name, actor)| (name.clone(), actor.metadata()))
            .collect()
    }

    /// Start federating: bring up the peer registry and, with a
    /// multicast group configured, the announce engine. Without a
    /// gateway this is a no-op and the node stays standalone.
    pub fn connect(&self) -> Result<()> {
        let mut federation = self.federation.lock();
        if federation.is_some() {
            return Ok(());
        }

        let gateway = self.gateway.lock().clone();
        let Some(gateway) = gateway else {
            log::info!("[locator] no gateway configured, federation is inactive");
            return Ok(());
        };

        let registry = PeerRegistry::spawn(
            Arc::clone(&self.router),
            gateway,
            self.config.lease(),
            self.config.uuid.clone(),
        )?;

        let announce = match self.config.multicast_group {
            Some(group) => {
                log::info!(
                    "[locator] announcing the node on '{}:{}'",
                    group,
                    self.config.announce_port
                );
                let engine = AnnounceEngine::spawn(
                    self.config.peer_key(),
                    group,
                    self.config.announce_port,
                    self.config.announce_interval(),
                    Arc::clone(&registry),
                );
                match engine {
                    Ok(engine) => Some(engine),
                    Err(err) => {
                        registry.close();
                        return Err(err.into());
                    }
                }
            }
            None => {
                log::info!("[locator] no multicast group configured, relying on static peers");
                None
            }
        };

        *federation = Some(Federation { registry, announce });
        Ok(())
    }

    /// Tear federation down. Order matters: subscribers are severed
    /// first, then announces stop, then the gateway goes away, and the
    /// peer registry is cleared last.
    pub fn disconnect(&self) {
        self.feed.lock().shutdown();

        let federation = self.federation.lock().take();
        if let Some(federation) = federation {
            if let Some(engine) = federation.announce {
                engine.close();
            }
            *self.gateway.lock() = None;
            federation.registry.close();
        }
    }

    /// Feed a peer identity in by hand, exactly as if it had announced
    /// on the multicast group. For multicast-free environments.
    pub fn add_static_peer(&self, uuid: &str, hostname: &str, port: u16) -> Result<()> {
        let federation = self.federation.lock();
        match federation.as_ref() {
            Some(federation) => {
                federation
                    .registry
                    .handle_announce(&PeerKey::new(uuid, hostname, port));
                Ok(())
            }
            None => Err(Error::Config("federation is not active".to_string())),
        }
    }

    /// Number of currently registered peers (introspection and tests).
    pub fn peer_count(&self) -> usize {
        self.federation
            .lock()
            .as_ref()
            .map(|federation| federation.registry.peer_count())
            .unwrap_or(0)
    }

    fn broadcast(&self) {
        // The snapshot is taken after the catalog mutex is released, so
        // adjacent mutations may coalesce into one frame; subscribers
        // still observe a single monotonic order through the feed mutex.
        let snapshot = self.dump();
        self.feed.lock().broadcast(&snapshot);
    }
}

impl Drop for Locator {
    fn drop(&mut self) {
        let mut catalog = self.catalog.lock();
        if catalog.services.is_empty() {
            return;
        }

        log::warn!(
            "[locator] disposing of {} orphan service{}",
            catalog.services.len(),
            if catalog.services.len() == 1 { "" } else { "s" }
        );

        while let Some((_, mut actor)) = catalog.services.pop() {
            actor.terminate();
        }
    }
}
