// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Standalone-node behavior: the local catalog, weighted groups, group
//! refresh, and the synchronize feed, all without any federation.

mod common;

use common::EchoActor;
use std::io;
use std::sync::{Arc, Mutex};
use waypost::protocol::{self, SyncFrame};
use waypost::{Error, FileStore, Locator, LocatorConfig, Upstream};

fn write_group(root: &std::path::Path, name: &str, body: &str) {
    let dir = root.join("groups");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(format!("{}.json", name)), body).unwrap();
}

#[test]
fn local_service_lifecycle() {
    let locator = Locator::builder(LocatorConfig::new("node-a", "127.0.0.1", 10053))
        .build()
        .unwrap();

    locator.attach("storage", EchoActor::new(1)).unwrap();

    let descriptor = locator.resolve("storage").unwrap();
    assert_eq!(descriptor.version, 1);
    assert_eq!(descriptor.endpoints[0].hostname, "127.0.0.1");

    locator.detach("storage").unwrap();

    // No gateway: an unresolvable name is a client error.
    assert!(matches!(
        locator.resolve("storage"),
        Err(Error::ServiceUnavailable(_))
    ));
}

#[test]
fn weighted_group_follows_presence() {
    let dir = tempfile::tempdir().unwrap();
    write_group(dir.path(), "storages", r#"{"s1": 1, "s2": 3}"#);

    let locator = Locator::builder(LocatorConfig::new("node-a", "127.0.0.1", 10053))
        .store(Box::new(FileStore::new(dir.path())))
        .router_seed(20260802)
        .build()
        .unwrap();

    locator.attach("s1", EchoActor::new(1)).unwrap();

    // s2 is nowhere attached: every draw lands on s1.
    for _ in 0..1000 {
        assert_eq!(locator.resolve("storages").unwrap().version, 1);
    }

    // Attach s2: draws now split roughly 1:3.
    locator.attach("s2", EchoActor::new(2)).unwrap();

    let mut s2_hits = 0u32;
    let draws = 1000;
    for _ in 0..draws {
        if locator.resolve("storages").unwrap().version == 2 {
            s2_hits += 1;
        }
    }
    assert!(
        (600..900).contains(&s2_hits),
        "s2 drawn {} of {} times",
        s2_hits,
        draws
    );
}

#[test]
fn group_refresh_tracks_store_deletion() {
    let dir = tempfile::tempdir().unwrap();
    write_group(dir.path(), "storages", r#"{"s1": 1}"#);

    let locator = Locator::builder(LocatorConfig::new("node-a", "127.0.0.1", 10053))
        .store(Box::new(FileStore::new(dir.path())))
        .build()
        .unwrap();

    locator.attach("s1", EchoActor::new(1)).unwrap();
    assert_eq!(locator.resolve("storages").unwrap().version, 1);

    // Delete the group behind the locator's back, then refresh: the
    // read failure is interpreted as a deletion and the group name falls
    // back to flat resolution.
    std::fs::remove_file(dir.path().join("groups").join("storages.json")).unwrap();
    locator.refresh("storages").unwrap();

    assert!(matches!(
        locator.resolve("storages"),
        Err(Error::ServiceUnavailable(_))
    ));

    // The member service itself is untouched.
    assert_eq!(locator.resolve("s1").unwrap().version, 1);
}

/// Upstream decoding every received frame into a shared list.
#[derive(Clone)]
struct CollectingUpstream {
    frames: Arc<Mutex<Vec<SyncFrame>>>,
}

impl CollectingUpstream {
    fn new() -> Self {
        Self {
            frames: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn frames(&self) -> Vec<SyncFrame> {
        self.frames.lock().unwrap().clone()
    }
}

impl Upstream for CollectingUpstream {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        let decoded = protocol::read_frame(&mut io::Cursor::new(frame))
            .expect("frame decodes")
            .expect("frame is complete");
        self.frames.lock().unwrap().push(decoded);
        Ok(())
    }

    fn close(&mut self) {}
}

#[test]
fn subscribers_observe_every_mutation_in_order() {
    let locator = Locator::builder(LocatorConfig::new("node-a", "127.0.0.1", 10053))
        .build()
        .unwrap();

    locator.attach("storage", EchoActor::new(1)).unwrap();

    let collector = CollectingUpstream::new();
    locator.synchronize(Box::new(collector.clone())).unwrap();

    locator.attach("cache", EchoActor::new(2)).unwrap();
    locator.detach("storage").unwrap();
    locator.disconnect();

    let frames = collector.frames();
    assert_eq!(frames.len(), 4, "initial + 2 mutations + terminal");

    match &frames[0] {
        SyncFrame::Chunk { services } => {
            assert_eq!(services.len(), 1);
            assert!(services.contains_key("storage"));
        }
        other => panic!("expected initial chunk, got {:?}", other),
    }
    match &frames[1] {
        SyncFrame::Chunk { services } => {
            assert_eq!(services.len(), 2);
        }
        other => panic!("expected chunk, got {:?}", other),
    }
    match &frames[2] {
        SyncFrame::Chunk { services } => {
            assert_eq!(services.len(), 1);
            assert!(services.contains_key("cache"));
        }
        other => panic!("expected chunk, got {:?}", other),
    }
    assert!(matches!(frames[3], SyncFrame::Choke));

    // A late subscriber is turned away.
    let late = CollectingUpstream::new();
    assert!(matches!(
        locator.synchronize(Box::new(late)),
        Err(Error::FeedClosed)
    ));
}

#[test]
fn reports_reflect_the_catalog() {
    let locator = Locator::builder(LocatorConfig::new("node-a", "127.0.0.1", 10053))
        .build()
        .unwrap();

    locator.attach("storage", EchoActor::new(1)).unwrap();
    locator.attach("cache", EchoActor::new(2)).unwrap();

    let reports = locator.reports();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports["storage"].channels, 1);
    assert_eq!(reports["cache"].footprints["10.0.0.9:50000"], 1024);

    locator.detach("cache").unwrap();
    assert_eq!(locator.reports().len(), 1);
}
