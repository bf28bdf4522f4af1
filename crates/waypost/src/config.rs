// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Locator node configuration.

use crate::protocol::{PeerKey, DEFAULT_ANNOUNCE_PORT};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

/// Per-node locator configuration.
///
/// Federation requires both a `multicast_group` and a `gateway` entry:
/// without a gateway the node neither announces itself nor listens for
/// peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorConfig {
    /// Unique node identity.
    pub uuid: String,

    /// Hostname announced to peers and used to bind local services.
    pub hostname: String,

    /// TCP port the locator RPC surface listens on.
    #[serde(default = "default_locator_port")]
    pub locator_port: u16,

    /// Multicast group announces are exchanged on.
    #[serde(default)]
    pub multicast_group: Option<Ipv4Addr>,

    /// UDP port for announces.
    #[serde(default = "default_announce_port")]
    pub announce_port: u16,

    /// Seconds between announces.
    #[serde(default = "default_announce_interval")]
    pub announce_interval_secs: u64,

    /// Seconds of announce silence after which a peer is evicted.
    #[serde(default = "default_lease")]
    pub lease_secs: u64,

    /// Optional `(min, max)` half-open range of ports handed to attached
    /// services. Absent means bind to port 0 and let the OS choose.
    #[serde(default)]
    pub port_pool: Option<(u16, u16)>,

    /// Gateway used for cross-node call forwarding.
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
}

/// Gateway selection: which implementation to construct, with free-form
/// arguments interpreted by that implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub kind: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

fn default_locator_port() -> u16 {
    10053
}

fn default_announce_port() -> u16 {
    DEFAULT_ANNOUNCE_PORT
}

fn default_announce_interval() -> u64 {
    5
}

fn default_lease() -> u64 {
    60
}

impl LocatorConfig {
    /// Minimal configuration: identity only, no federation, no port pool.
    pub fn new(uuid: impl Into<String>, hostname: impl Into<String>, locator_port: u16) -> Self {
        Self {
            uuid: uuid.into(),
            hostname: hostname.into(),
            locator_port,
            multicast_group: None,
            announce_port: default_announce_port(),
            announce_interval_secs: default_announce_interval(),
            lease_secs: default_lease(),
            port_pool: None,
            gateway: None,
        }
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            serde_json::from_str(&content).map_err(|err| crate::Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// This node's identity tuple as announced to the cluster.
    pub fn peer_key(&self) -> PeerKey {
        PeerKey::new(&self.uuid, &self.hostname, self.locator_port)
    }

    /// Announce period as a `Duration`.
    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs)
    }

    /// Peer lease duration as a `Duration`.
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }

    /// Check the configuration for values that cannot work at runtime.
    pub fn validate(&self) -> crate::Result<()> {
        if self.uuid.is_empty() {
            return Err(crate::Error::Config("uuid cannot be empty".into()));
        }
        if self.hostname.is_empty() {
            return Err(crate::Error::Config("hostname cannot be empty".into()));
        }
        if self.locator_port == 0 {
            return Err(crate::Error::Config("locator_port cannot be 0".into()));
        }
        if self.announce_interval_secs == 0 {
            return Err(crate::Error::Config(
                "announce_interval_secs cannot be 0".into(),
            ));
        }
        if self.lease_secs == 0 {
            return Err(crate::Error::Config("lease_secs cannot be 0".into()));
        }
        if let Some(group) = self.multicast_group {
            if !group.is_multicast() {
                return Err(crate::Error::Config(format!(
                    "'{}' is not a multicast address",
                    group
                )));
            }
        }
        if let Some((min, max)) = self.port_pool {
            if min >= max {
                return Err(crate::Error::Config(format!(
                    "port pool {}..{} is empty",
                    min, max
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_validates() {
        let config = LocatorConfig::new("5f1d", "node-1", 10053);
        assert!(config.validate().is_ok());
        assert_eq!(config.announce_port, DEFAULT_ANNOUNCE_PORT);
        assert_eq!(config.lease(), Duration::from_secs(60));
    }

    #[test]
    fn test_peer_key() {
        let config = LocatorConfig::new("5f1d", "node-1", 10053);
        let key = config.peer_key();
        assert_eq!(key.uuid, "5f1d");
        assert_eq!(key.hostname, "node-1");
        assert_eq!(key.port, 10053);
    }

    #[test]
    fn test_rejects_empty_identity() {
        let config = LocatorConfig::new("", "node-1", 10053);
        assert!(config.validate().is_err());

        let config = LocatorConfig::new("5f1d", "", 10053);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_multicast_group() {
        let mut config = LocatorConfig::new("5f1d", "node-1", 10053);
        config.multicast_group = Some(Ipv4Addr::new(10, 0, 0, 1));
        assert!(config.validate().is_err());

        config.multicast_group = Some(Ipv4Addr::new(239, 196, 8, 1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_port_pool() {
        let mut config = LocatorConfig::new("5f1d", "node-1", 10053);
        config.port_pool = Some((5000, 5000));
        assert!(config.validate().is_err());

        config.port_pool = Some((5010, 5000));
        assert!(config.validate().is_err());

        config.port_pool = Some((5000, 5010));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_lease() {
        let mut config = LocatorConfig::new("5f1d", "node-1", 10053);
        config.lease_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_defaults() {
        let json = r#"{"uuid":"5f1d","hostname":"node-1"}"#;
        let config: LocatorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.locator_port, 10053);
        assert_eq!(config.announce_interval_secs, 5);
        assert!(config.multicast_group.is_none());
        assert!(config.gateway.is_none());
    }

    #[test]
    fn test_gateway_config_parse() {
        let json = r#"{
            "uuid": "5f1d",
            "hostname": "node-1",
            "multicast_group": "239.196.8.1",
            "gateway": {"kind": "adhoc"}
        }"#;
        let config: LocatorConfig = serde_json::from_str(json).unwrap();
        let gateway = config.gateway.expect("gateway configured");
        assert_eq!(gateway.kind, "adhoc");
        assert!(gateway.args.is_null());
    }
}
