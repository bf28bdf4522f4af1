// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared fixtures for the locator integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use waypost::{
    AdhocGateway, Endpoint, Gateway, ServiceActor, ServiceDescriptor, UsageCounters,
};

/// A stub service: binds wherever it is told, reports a descriptor
/// distinguished by its version.
pub struct EchoActor {
    version: u32,
    bound: Vec<Endpoint>,
}

impl EchoActor {
    pub fn new(version: u32) -> Box<Self> {
        Box::new(Self {
            version,
            bound: Vec::new(),
        })
    }
}

impl ServiceActor for EchoActor {
    fn run(&mut self, endpoints: &[Endpoint]) -> io::Result<()> {
        self.bound = endpoints
            .iter()
            .map(|endpoint| {
                let port = if endpoint.port == 0 {
                    42000 + self.version as u16
                } else {
                    endpoint.port
                };
                Endpoint::new(endpoint.hostname.clone(), port)
            })
            .collect();
        Ok(())
    }

    fn terminate(&mut self) {
        self.bound.clear();
    }

    fn location(&self) -> Vec<Endpoint> {
        self.bound.clone()
    }

    fn metadata(&self) -> ServiceDescriptor {
        ServiceDescriptor::new(self.bound.clone(), self.version)
    }

    fn counters(&self) -> UsageCounters {
        let mut counters = UsageCounters {
            channels: 1,
            footprints: BTreeMap::new(),
        };
        counters.footprints.insert("10.0.0.9:50000".into(), 1024);
        counters
    }
}

/// One observed gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    Consume {
        uuid: String,
        name: String,
        version: u32,
    },
    Cleanup {
        uuid: String,
        name: String,
    },
}

/// An ad-hoc gateway that records every consume/cleanup in call order.
pub struct RecordingGateway {
    inner: AdhocGateway,
    events: Mutex<Vec<GatewayEvent>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self {
            inner: AdhocGateway::new(),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<GatewayEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Gateway for RecordingGateway {
    fn resolve(&self, name: &str) -> waypost::Result<ServiceDescriptor> {
        self.inner.resolve(name)
    }

    fn consume(&self, uuid: &str, name: &str, descriptor: &ServiceDescriptor) {
        self.events.lock().unwrap().push(GatewayEvent::Consume {
            uuid: uuid.to_string(),
            name: name.to_string(),
            version: descriptor.version,
        });
        self.inner.consume(uuid, name, descriptor);
    }

    fn cleanup(&self, uuid: &str, name: &str) {
        self.events.lock().unwrap().push(GatewayEvent::Cleanup {
            uuid: uuid.to_string(),
            name: name.to_string(),
        });
        self.inner.cleanup(uuid, name);
    }
}

/// Poll `check` until it holds or `deadline` passes.
pub fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    check()
}
