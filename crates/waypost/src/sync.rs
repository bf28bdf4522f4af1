// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Push-based catalog synchronization.
//!
//! Every local catalog mutation produces one full-snapshot frame that is
//! fanned out to all subscribed upstreams. Receivers diff consecutive
//! snapshots themselves (`Router::update_remote`), which keeps the feed
//! stateless per subscriber: no cursors, no replay, no per-client queues.

use crate::protocol::{self, SyncFrame};
use crate::routing::CatalogSnapshot;
use std::io;

/// Outbound half of one subscriber connection.
pub trait Upstream: Send {
    /// Send one complete frame (length prefix included).
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Sever the connection. Called once, on feed shutdown.
    fn close(&mut self);
}

/// The subscriber list plus a reusable serialization buffer.
///
/// Single-writer by construction: the locator serializes all calls
/// through its feed mutex, so frames reach every subscriber in one total
/// order.
pub struct SynchronizeFeed {
    upstreams: Vec<Box<dyn Upstream>>,
    buffer: Vec<u8>,
    closed: bool,
}

impl SynchronizeFeed {
    pub fn new() -> Self {
        Self {
            upstreams: Vec::new(),
            buffer: Vec::with_capacity(4096),
            closed: false,
        }
    }

    /// Register a subscriber: send it the current catalog as its initial
    /// snapshot, then keep it on the list for subsequent broadcasts.
    pub fn subscribe(
        &mut self,
        snapshot: &CatalogSnapshot,
        mut upstream: Box<dyn Upstream>,
    ) -> crate::Result<()> {
        if self.closed {
            return Err(crate::Error::FeedClosed);
        }

        self.encode_chunk(snapshot)?;
        upstream.send(&self.buffer)?;
        self.upstreams.push(upstream);

        log::info!(
            "[sync] subscriber attached, {} upstream(s) total",
            self.upstreams.len()
        );
        Ok(())
    }

    /// Fan the current catalog out to every subscriber. A subscriber
    /// whose send fails is dropped from the list.
    pub fn broadcast(&mut self, snapshot: &CatalogSnapshot) {
        if self.closed || self.upstreams.is_empty() {
            return;
        }

        if let Err(err) = self.encode_chunk(snapshot) {
            log::error!("[sync] unable to serialize the catalog snapshot: {}", err);
            return;
        }

        let buffer = &self.buffer;
        self.upstreams.retain_mut(|upstream| {
            match upstream.send(buffer) {
                Ok(()) => true,
                Err(err) => {
                    log::warn!("[sync] dropping unreachable subscriber: {}", err);
                    false
                }
            }
        });
    }

    /// Send the terminal frame to every subscriber and reject any further
    /// subscribes.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if protocol::encode_frame(&SyncFrame::Choke, &mut self.buffer).is_ok() {
            for upstream in &mut self.upstreams {
                if let Err(err) = upstream.send(&self.buffer) {
                    log::debug!("[sync] terminal frame not delivered: {}", err);
                }
                upstream.close();
            }
        }

        self.upstreams.clear();
    }

    /// Number of currently attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.upstreams.len()
    }

    fn encode_chunk(&mut self, snapshot: &CatalogSnapshot) -> crate::Result<()> {
        let frame = SyncFrame::Chunk {
            services: snapshot.clone(),
        };
        protocol::encode_frame(&frame, &mut self.buffer)?;
        Ok(())
    }
}

impl Default for SynchronizeFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{Endpoint, ServiceDescriptor};
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    /// Upstream collecting decoded frames for assertions.
    #[derive(Clone)]
    struct Recorder {
        frames: Arc<Mutex<Vec<SyncFrame>>>,
        fail: Arc<Mutex<bool>>,
        closed: Arc<Mutex<bool>>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                frames: Arc::new(Mutex::new(Vec::new())),
                fail: Arc::new(Mutex::new(false)),
                closed: Arc::new(Mutex::new(false)),
            }
        }

        fn frames(&self) -> Vec<SyncFrame> {
            self.frames.lock().unwrap().clone()
        }
    }

    impl Upstream for Recorder {
        fn send(&mut self, frame: &[u8]) -> io::Result<()> {
            if *self.fail.lock().unwrap() {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
            }
            let decoded = protocol::read_frame(&mut io::Cursor::new(frame))
                .unwrap()
                .unwrap();
            self.frames.lock().unwrap().push(decoded);
            Ok(())
        }

        fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    fn snapshot(names: &[&str]) -> CatalogSnapshot {
        names
            .iter()
            .enumerate()
            .map(|(port, name)| {
                (
                    name.to_string(),
                    ServiceDescriptor::new(vec![Endpoint::new("node", port as u16)], 1),
                )
            })
            .collect()
    }

    #[test]
    fn test_subscribe_sends_initial_snapshot() {
        let mut feed = SynchronizeFeed::new();
        let recorder = Recorder::new();

        feed.subscribe(&snapshot(&["storage"]), Box::new(recorder.clone()))
            .unwrap();

        let frames = recorder.frames();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            SyncFrame::Chunk { services } => assert!(services.contains_key("storage")),
            other => panic!("expected chunk, got {:?}", other),
        }
    }

    #[test]
    fn test_broadcast_reaches_every_subscriber() {
        let mut feed = SynchronizeFeed::new();
        let a = Recorder::new();
        let b = Recorder::new();
        feed.subscribe(&snapshot(&[]), Box::new(a.clone())).unwrap();
        feed.subscribe(&snapshot(&[]), Box::new(b.clone())).unwrap();

        feed.broadcast(&snapshot(&["storage"]));

        assert_eq!(a.frames().len(), 2);
        assert_eq!(b.frames().len(), 2);
    }

    #[test]
    fn test_failed_subscriber_is_dropped() {
        let mut feed = SynchronizeFeed::new();
        let alive = Recorder::new();
        let dead = Recorder::new();
        feed.subscribe(&snapshot(&[]), Box::new(alive.clone()))
            .unwrap();
        feed.subscribe(&snapshot(&[]), Box::new(dead.clone()))
            .unwrap();

        *dead.fail.lock().unwrap() = true;
        feed.broadcast(&snapshot(&["storage"]));
        assert_eq!(feed.subscriber_count(), 1);

        // The survivor keeps receiving.
        feed.broadcast(&snapshot(&["storage", "cache"]));
        assert_eq!(alive.frames().len(), 3);
    }

    #[test]
    fn test_shutdown_sends_terminal_frame_and_rejects_subscribes() {
        let mut feed = SynchronizeFeed::new();
        let recorder = Recorder::new();
        feed.subscribe(&snapshot(&[]), Box::new(recorder.clone()))
            .unwrap();

        feed.shutdown();

        let frames = recorder.frames();
        assert!(matches!(frames.last(), Some(SyncFrame::Choke)));
        assert!(*recorder.closed.lock().unwrap());
        assert_eq!(feed.subscriber_count(), 0);

        let late = Recorder::new();
        let result = feed.subscribe(&snapshot(&[]), Box::new(late));
        assert!(matches!(result, Err(crate::Error::FeedClosed)));
    }

    #[test]
    fn test_subscriber_observes_ordered_sequence() {
        let mut feed = SynchronizeFeed::new();
        let recorder = Recorder::new();

        feed.subscribe(&snapshot(&["a"]), Box::new(recorder.clone()))
            .unwrap();
        feed.broadcast(&snapshot(&["a", "b"]));
        feed.broadcast(&snapshot(&["b"]));
        feed.shutdown();

        let frames = recorder.frames();
        assert_eq!(frames.len(), 4);

        let names: Vec<BTreeMap<String, ServiceDescriptor>> = frames[..3]
            .iter()
            .map(|frame| match frame {
                SyncFrame::Chunk { services } => services.clone(),
                other => panic!("expected chunk, got {:?}", other),
            })
            .collect();
        assert!(names[0].contains_key("a") && names[0].len() == 1);
        assert!(names[1].contains_key("b") && names[1].len() == 2);
        assert!(names[2].contains_key("b") && names[2].len() == 1);
        assert!(matches!(frames[3], SyncFrame::Choke));
    }
}
