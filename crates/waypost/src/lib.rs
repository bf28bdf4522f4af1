// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Waypost - Federated Service Locator
//!
//! A per-node locator daemon for distributed service clusters. Each node
//! publishes the services it hosts, discovers peer nodes through periodic
//! multicast announces, and keeps a federated routing table that maps
//! logical service names to concrete endpoints on local or remote nodes.
//! Client queries are resolved through weighted routing groups, and every
//! local catalog change is pushed to subscribed peers as a full snapshot.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use waypost::{Locator, LocatorConfig};
//!
//! fn main() -> waypost::Result<()> {
//!     let config = LocatorConfig::new("16a2b3c4", "node-1.cluster.local", 10053);
//!     let locator = Locator::builder(config).build()?;
//!
//!     // Publish a service and resolve it back.
//!     // locator.attach("storage", actor)?;
//!     let descriptor = locator.resolve("storage")?;
//!     println!("storage lives at {:?}", descriptor.endpoints);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                          Locator Facade                            |
//! |      attach / detach / resolve / reports / refresh / synchronize   |
//! +--------------------------------------------------------------------+
//! |        Routing Engine        |        Synchronize Feed             |
//! |  weighted groups, dual index |  full-snapshot push to subscribers  |
//! +--------------------------------------------------------------------+
//! |                       Cluster Federation                           |
//! |  multicast announces | peer state machine | lease-based eviction   |
//! +--------------------------------------------------------------------+
//! |                          Wire Protocol                             |
//! |        length-prefixed JSON frames | announce datagrams            |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Locator`] | The per-node facade, entry point for everything |
//! | [`Router`] | Dual-indexed routing table with weighted groups |
//! | [`ServiceActor`] | Capability trait wrapping one hosted service |
//! | [`Gateway`] | Capability trait for cross-node call forwarding |
//! | [`GroupStore`] | Capability trait over the persistent group store |

/// Cluster federation: announce engine, peer registry, lease eviction.
pub mod cluster;
/// Node configuration (identity, announce group, port pool).
pub mod config;
/// Error type shared across the crate.
pub mod error;
/// Gateway capability interface and the default ad-hoc implementation.
pub mod gateway;
/// The locator facade.
pub mod locator;
/// Wire protocol: announce datagrams, RPC frames, synchronize stream frames.
pub mod protocol;
/// TCP front-end exposing the locator RPC surface.
pub mod rpc;
/// Routing engine: weighted groups and the dual service index.
pub mod routing;
/// Service-side types: descriptors, usage counters, the actor trait.
pub mod service;
/// Persistent group store interface and the file-backed implementation.
pub mod storage;
/// Push-based catalog synchronization feed.
pub mod sync;

pub use config::{GatewayConfig, LocatorConfig};
pub use error::{Error, Result};
pub use gateway::{AdhocGateway, Gateway};
pub use locator::{Locator, LocatorBuilder};
pub use protocol::PeerKey;
pub use routing::Router;
pub use rpc::LocatorServer;
pub use service::{Endpoint, ServiceActor, ServiceDescriptor, UsageCounters};
pub use storage::{FileStore, GroupStore, StoreError, StoreErrorKind};
pub use sync::Upstream;

/// Waypost version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
