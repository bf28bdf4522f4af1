// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Waypost locator daemon.
//!
//! Runs one locator per node: serves the RPC surface, announces the node
//! on the configured multicast group, and federates with discovered
//! peers.
//!
//! # Usage
//!
//! ```bash
//! # Minimal standalone node
//! waypostd --uuid $(uuidgen) --hostname node-1.cluster.local
//!
//! # Federated node with a file-backed group store
//! waypostd --config /etc/waypost/locator.json --groups /var/lib/waypost
//! ```

use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use waypost::{AdhocGateway, FileStore, Locator, LocatorConfig, LocatorServer};

/// Waypost - federated service locator daemon
#[derive(Parser, Debug)]
#[command(name = "waypostd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node uuid (overrides the config file)
    #[arg(long)]
    uuid: Option<String>,

    /// Hostname announced to peers (overrides the config file)
    #[arg(long)]
    hostname: Option<String>,

    /// TCP port for the locator RPC surface
    #[arg(short, long, default_value = "10053")]
    port: u16,

    /// Multicast group for announces (enables federation together with
    /// a gateway)
    #[arg(short, long)]
    multicast: Option<Ipv4Addr>,

    /// Root directory of the file-backed group store
    #[arg(short, long)]
    groups: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // The fmt subscriber's log bridge also captures the library's `log`
    // records.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => {
            info!("loading config from {:?}", path);
            LocatorConfig::from_file(path)?
        }
        None => {
            let uuid = args
                .uuid
                .clone()
                .ok_or("either --config or --uuid is required")?;
            let hostname = args
                .hostname
                .clone()
                .ok_or("either --config or --hostname is required")?;
            LocatorConfig::new(uuid, hostname, args.port)
        }
    };

    if let Some(uuid) = args.uuid {
        config.uuid = uuid;
    }
    if let Some(hostname) = args.hostname {
        config.hostname = hostname;
    }
    if args.multicast.is_some() {
        config.multicast_group = args.multicast;
    }
    config.validate()?;

    info!("+----------------------------------------------+");
    info!("|  Waypost Locator v{:<26} |", env!("CARGO_PKG_VERSION"));
    info!("+----------------------------------------------+");
    info!("|  Node:      {:<32} |", config.uuid);
    info!(
        "|  RPC:       {:<32} |",
        format!("{}:{}", config.hostname, config.locator_port)
    );
    info!(
        "|  Announces: {:<32} |",
        match config.multicast_group {
            Some(group) => format!("{}:{}", group, config.announce_port),
            None => "disabled".to_string(),
        }
    );
    info!("+----------------------------------------------+");

    let mut builder = Locator::builder(config.clone());

    if let Some(groups) = &args.groups {
        builder = builder.store(Box::new(FileStore::new(groups)));
    }

    let gateway_kind = config
        .gateway
        .as_ref()
        .map(|gateway| gateway.kind.as_str())
        .or_else(|| config.multicast_group.map(|_| "adhoc"));

    match gateway_kind {
        Some("adhoc") => {
            builder = builder.gateway(Arc::new(AdhocGateway::new()));
        }
        Some(other) => {
            return Err(format!("unknown gateway kind '{}'", other).into());
        }
        None => {}
    }

    let locator = builder.build()?;
    locator.connect()?;

    let bind: SocketAddr = (IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.locator_port).into();
    let server = LocatorServer::spawn(Arc::clone(&locator), bind)?;

    info!("locator ready on '{}'", server.local_addr());

    // Serve until killed. Teardown on a signal is the supervisor's
    // business; the kernel reclaims sockets and threads.
    loop {
        std::thread::sleep(Duration::from_secs(3600));
    }
}
