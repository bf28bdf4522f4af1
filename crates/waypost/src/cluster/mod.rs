// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Peer lifecycle: discovery, synchronization, heartbeats, eviction.
//!
//! One registry entry per announced peer key. A discovered peer is
//! connected, asked to `synchronize`, and then consumed by a dedicated
//! reader thread until its stream ends, errors, or its announce lease
//! expires. Evictions requested from inside a reader are deferred through
//! the maintenance queue: a reader never tears down its own channel while
//! a frame from it may still be in flight.

pub mod announce;

use crate::gateway::Gateway;
use crate::protocol::{self, PeerKey, Request, SyncFrame};
use crate::routing::{CatalogSnapshot, Router};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How long a connection attempt to a freshly discovered peer may take.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Maintenance tick: upper bound on how late a lease sweep may run.
const MAINTENANCE_TICK: Duration = Duration::from_millis(250);

/// Observable phase of a peer entry.
///
/// Discovery and connecting are transient inside `handle_announce`; an
/// entry becomes visible once its synchronize request is on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Synchronize requested, no chunk received yet.
    Synchronizing,
    /// At least one snapshot has been applied.
    Live,
}

struct PeerEntry {
    stream: TcpStream,
    reader: Option<JoinHandle<()>>,
    deadline: Instant,
    state: PeerState,
}

enum Task {
    Evict { key: PeerKey, reason: String },
}

/// The set of known peers plus the maintenance thread that serves
/// deferred evictions and lease expiry.
pub struct PeerRegistry {
    peers: Mutex<BTreeMap<PeerKey, PeerEntry>>,
    router: Arc<Router>,
    gateway: Arc<dyn Gateway>,
    lease: Duration,
    local_uuid: String,
    tasks: Sender<Task>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl PeerRegistry {
    /// Create the registry and start its maintenance thread.
    pub fn spawn(
        router: Arc<Router>,
        gateway: Arc<dyn Gateway>,
        lease: Duration,
        local_uuid: impl Into<String>,
    ) -> std::io::Result<Arc<Self>> {
        let (tasks, queue) = channel::unbounded();

        let registry = Arc::new(Self {
            peers: Mutex::new(BTreeMap::new()),
            router,
            gateway,
            lease,
            local_uuid: local_uuid.into(),
            tasks,
            maintenance: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        });

        let worker = Arc::clone(&registry);
        let handle = std::thread::Builder::new()
            .name("waypost-maint".to_string())
            .spawn(move || maintenance_loop(worker, queue))?;
        *registry.maintenance.lock() = Some(handle);

        Ok(registry)
    }

    /// Process one announce: discover an unknown key, or refresh the
    /// lease of a known one.
    pub fn handle_announce(self: &Arc<Self>, key: &PeerKey) {
        if self.shutdown.load(Ordering::Relaxed) {
            return;
        }
        if key.uuid == self.local_uuid {
            return;
        }

        {
            let mut peers = self.peers.lock();
            if let Some(entry) = peers.get_mut(key) {
                log::debug!("[cluster] resetting the heartbeat deadline for node {}", key);
                entry.deadline = Instant::now() + self.lease;
                return;
            }
        }

        log::info!("[cluster] discovered node {}", key);

        let Some(stream) = self.open_channel(key) else {
            // A subsequent announce retries the discovery.
            return;
        };

        let read_stream = match stream.try_clone() {
            Ok(clone) => clone,
            Err(err) => {
                log::error!("[cluster] unable to clone the channel to {}: {}", key, err);
                return;
            }
        };

        {
            let mut peers = self.peers.lock();
            if peers.contains_key(key) {
                // Lost a discovery race; the existing entry wins.
                let _ = stream.shutdown(Shutdown::Both);
                return;
            }
            peers.insert(
                key.clone(),
                PeerEntry {
                    stream,
                    reader: None,
                    deadline: Instant::now() + self.lease,
                    state: PeerState::Synchronizing,
                },
            );
        }

        let worker = Arc::clone(self);
        let reader_key = key.clone();
        let spawned = std::thread::Builder::new()
            .name("waypost-peer-rx".to_string())
            .spawn(move || reader_loop(worker, reader_key, read_stream));

        match spawned {
            Ok(handle) => {
                if let Some(entry) = self.peers.lock().get_mut(key) {
                    entry.reader = Some(handle);
                }
            }
            Err(err) => {
                log::error!("[cluster] unable to start a reader for {}: {}", key, err);
                self.defer_evict(key.clone(), "reader thread unavailable");
            }
        }
    }

    /// Stop the maintenance thread and drop every peer.
    pub fn close(&self) {
        if self.shutdown.swap(true, Ordering::Relaxed) {
            return;
        }

        if let Some(handle) = self.maintenance.lock().take() {
            let _ = handle.join();
        }

        let keys: Vec<PeerKey> = self.peers.lock().keys().cloned().collect();
        for key in keys {
            self.evict(&key, "the locator is disconnecting");
        }
    }

    /// Number of registered peers.
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Observable state of one peer entry.
    pub fn peer_state(&self, key: &PeerKey) -> Option<PeerState> {
        self.peers.lock().get(key).map(|entry| entry.state)
    }

    /// Resolve the announced address and try each candidate endpoint in
    /// order, sending the synchronize request on the first channel that
    /// opens.
    fn open_channel(&self, key: &PeerKey) -> Option<TcpStream> {
        let endpoints = match (key.hostname.as_str(), key.port).to_socket_addrs() {
            Ok(endpoints) => endpoints,
            Err(err) => {
                log::error!(
                    "[cluster] unable to resolve node '{}' endpoints: {}",
                    key.uuid,
                    err
                );
                return None;
            }
        };

        let mut stream = None;
        for endpoint in endpoints {
            match TcpStream::connect_timeout(&endpoint, CONNECT_TIMEOUT) {
                Ok(connected) => {
                    stream = Some(connected);
                    break;
                }
                Err(err) => {
                    log::warn!(
                        "[cluster] unable to connect to node '{}' via '{}': {}",
                        key.uuid,
                        endpoint,
                        err
                    );
                }
            }
        }

        let mut stream = match stream {
            Some(stream) => stream,
            None => {
                log::error!("[cluster] unable to connect to node '{}'", key.uuid);
                return None;
            }
        };

        stream.set_nodelay(true).ok();

        if let Err(err) = protocol::write_frame(&mut stream, &Request::Synchronize) {
            log::error!(
                "[cluster] unable to request synchronization from '{}': {}",
                key.uuid,
                err
            );
            return None;
        }

        Some(stream)
    }

    /// Apply one snapshot chunk from a peer and forward the diff to the
    /// gateway: cleanups for removals first, then consumes for additions.
    fn apply_snapshot(&self, key: &PeerKey, snapshot: CatalogSnapshot) {
        {
            let mut peers = self.peers.lock();
            let Some(entry) = peers.get_mut(key) else {
                // Already evicted; the stale chunk is dropped.
                return;
            };
            if entry.state == PeerState::Synchronizing {
                log::info!("[cluster] node '{}' is now live", key.uuid);
                entry.state = PeerState::Live;
            }
        }

        let (added, removed) = self.router.update_remote(&key.uuid, snapshot);

        for (name, _) in &removed {
            self.gateway.cleanup(&key.uuid, name);
        }
        for (name, descriptor) in &added {
            self.gateway.consume(&key.uuid, name, descriptor);
        }

        log::debug!(
            "[cluster] applied a snapshot from '{}': {} added, {} removed",
            key.uuid,
            added.len(),
            removed.len()
        );
    }

    /// Queue an eviction on the maintenance thread.
    fn defer_evict(&self, key: PeerKey, reason: impl Into<String>) {
        let _ = self.tasks.send(Task::Evict {
            key,
            reason: reason.into(),
        });
    }

    /// Drop one peer: remove its registry entry, purge its subtree from
    /// the router, notify the gateway, and release the channel. Runs on
    /// the maintenance thread or from `close()`, never on the peer's own
    /// reader.
    fn evict(&self, key: &PeerKey, reason: &str) {
        let entry = match self.peers.lock().remove(key) {
            Some(entry) => entry,
            None => return,
        };

        log::info!("[cluster] evicting node {}: {}", key, reason);

        let dropped = self.router.remove_remote(&key.uuid);
        for name in dropped.keys() {
            self.gateway.cleanup(&key.uuid, name);
        }

        let _ = entry.stream.shutdown(Shutdown::Both);
        if let Some(reader) = entry.reader {
            let _ = reader.join();
        }
    }

    /// Evict every peer whose announce lease has run out.
    fn sweep_expired(&self) {
        let now = Instant::now();
        let expired: Vec<PeerKey> = self
            .peers
            .lock()
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            log::warn!("[cluster] node '{}' has timed out", key.uuid);
            self.evict(&key, "heartbeat lease expired");
        }
    }
}

/// Serves deferred evictions and periodic lease sweeps.
fn maintenance_loop(registry: Arc<PeerRegistry>, queue: Receiver<Task>) {
    loop {
        match queue.recv_timeout(MAINTENANCE_TICK) {
            Ok(Task::Evict { key, reason }) => registry.evict(&key, &reason),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        registry.sweep_expired();

        if registry.shutdown.load(Ordering::Relaxed) {
            break;
        }
    }
}

/// Consumes one peer's synchronize stream until it terminates.
fn reader_loop(registry: Arc<PeerRegistry>, key: PeerKey, mut stream: TcpStream) {
    loop {
        match protocol::read_frame::<_, SyncFrame>(&mut stream) {
            Ok(Some(SyncFrame::Chunk { services })) => {
                registry.apply_snapshot(&key, services);
            }
            Ok(Some(SyncFrame::Choke)) => {
                log::info!("[cluster] node '{}' has been shut down", key.uuid);
                registry.defer_evict(key, "peer closed the synchronize stream");
                return;
            }
            Ok(Some(SyncFrame::Error { code, message })) => {
                log::warn!(
                    "[cluster] node '{}' reported error {}: {}",
                    key.uuid,
                    code,
                    message
                );
                registry.defer_evict(key, "peer reported a stream error");
                return;
            }
            Ok(None) => {
                log::warn!("[cluster] node '{}' has unexpectedly disconnected", key.uuid);
                registry.defer_evict(key, "synchronize channel closed");
                return;
            }
            Err(err) => {
                // Strict: one malformed chunk costs the peer its entry.
                log::error!(
                    "[cluster] malformed synchronize frame from '{}': {}",
                    key.uuid,
                    err
                );
                registry.defer_evict(key, "malformed synchronize frame");
                return;
            }
        }
    }
}
