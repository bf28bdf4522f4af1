// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service-side types: the public descriptor, per-service usage counters,
//! and the actor capability trait wrapping one locally hosted service.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;

/// A network endpoint as published in service descriptors.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub hostname: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// Public metadata of one service: where to reach it, which protocol
/// version it speaks, and its method dictionary.
///
/// The routing core treats descriptors as opaque blobs: they are compared
/// for equality, serialized onto the wire, and handed to the gateway, but
/// never introspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Endpoints the service listens on.
    pub endpoints: Vec<Endpoint>,
    /// Protocol version the service implements.
    pub version: u32,
    /// Method id to method name dictionary.
    #[serde(default)]
    pub methods: BTreeMap<u32, String>,
}

impl ServiceDescriptor {
    pub fn new(endpoints: Vec<Endpoint>, version: u32) -> Self {
        Self {
            endpoints,
            version,
            methods: BTreeMap::new(),
        }
    }
}

/// Usage counters reported per service by `reports()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    /// Number of channels currently open to the service.
    pub channels: u64,
    /// Byte footprint per client endpoint, keyed "host:port".
    #[serde(default)]
    pub footprints: BTreeMap<String, u64>,
}

/// One locally hosted service, as seen by the locator.
///
/// The locator owns attached actors: it binds them on `attach`, terminates
/// them on `detach`, and disposes of any orphans when it is dropped. The
/// embedding runtime behind this trait is not the locator's concern.
pub trait ServiceActor: Send {
    /// Bind the service to the given endpoints and start serving.
    ///
    /// A port of 0 asks the actor to let the OS pick one; the effective
    /// address is reported by `location()` afterwards.
    fn run(&mut self, endpoints: &[Endpoint]) -> io::Result<()>;

    /// Stop serving and release the bound endpoints.
    fn terminate(&mut self);

    /// Endpoints the actor is currently bound to.
    fn location(&self) -> Vec<Endpoint>;

    /// The actor's public descriptor, served to resolve queries.
    fn metadata(&self) -> ServiceDescriptor;

    /// Channel and byte-footprint counters for `reports()`.
    fn counters(&self) -> UsageCounters;
}
