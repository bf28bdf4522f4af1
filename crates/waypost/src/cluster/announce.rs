// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multicast announce engine.
//!
//! Two sockets on one UDP port: an outbound socket connected to the
//! multicast group (so announces go out with plain `send`) and an inbound
//! sink joined to the same group on a wildcard bind. A periodic thread
//! emits this node's identity; a listener thread decodes peer identities
//! and feeds them into the peer registry.

use crate::cluster::PeerRegistry;
use crate::protocol::{self, PeerKey};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Largest announce datagram accepted.
const ANNOUNCE_BUFFER_SIZE: usize = 1024;

/// Poll granularity for shutdown checks in both threads.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// The periodic announcer plus the multicast sink listener.
pub struct AnnounceEngine {
    announcer: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl AnnounceEngine {
    /// Bind both sockets and start the announcer and listener threads.
    ///
    /// Socket construction failures are configuration errors and abort
    /// start-up; everything after that is retried on the next tick.
    pub fn spawn(
        key: PeerKey,
        group: Ipv4Addr,
        port: u16,
        interval: Duration,
        registry: Arc<PeerRegistry>,
    ) -> io::Result<Self> {
        let sink = open_sink(group, port)?;
        let announce = open_announce(group, port)?;

        log::info!(
            "[announce] joined multicast group '{}' on '0.0.0.0:{}', announcing every {:?}",
            group,
            port,
            interval
        );

        let shutdown = Arc::new(AtomicBool::new(false));

        let announcer = {
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("waypost-announce".to_string())
                .spawn(move || announcer_loop(announce, key, interval, shutdown))?
        };

        let listener = {
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("waypost-sink".to_string())
                .spawn(move || listener_loop(sink, registry, shutdown))?
        };

        Ok(Self {
            announcer: Some(announcer),
            listener: Some(listener),
            shutdown,
        })
    }

    /// Stop both threads and drop the sockets, outbound first.
    pub fn close(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.announcer.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.listener.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AnnounceEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Outbound announce socket: connected to the group so that every write
/// targets it, with multicast loopback disabled so a node never discovers
/// itself.
fn open_announce(group: Ipv4Addr, port: u16) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.set_multicast_loop_v4(false)?;
    let _ = socket.set_multicast_ttl_v4(1);
    socket.connect((group, port))?;
    Ok(socket)
}

/// Inbound sink: wildcard-bound on the announce port, joined to the
/// group on the unspecified interface.
fn open_sink(group: Ipv4Addr, port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;

    let bind_addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, port).into();
    socket.bind(&bind_addr.into())?;
    socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;

    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(POLL_INTERVAL))?;
    Ok(socket)
}

/// Emits this node's identity immediately and then once per interval.
fn announcer_loop(socket: UdpSocket, key: PeerKey, interval: Duration, shutdown: Arc<AtomicBool>) {
    let frame = protocol::encode_announce(&key);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            log::debug!("[announce] announcer stopping");
            return;
        }

        match socket.send(&frame) {
            Ok(sent) if sent == frame.len() => {
                log::debug!("[announce] announced the node as {}", key);
            }
            Ok(sent) => {
                log::error!(
                    "[announce] short announce write: {} of {} bytes",
                    sent,
                    frame.len()
                );
            }
            Err(err) => {
                log::error!("[announce] unable to announce the node: {}", err);
            }
        }

        // Chunked sleep keeps shutdown latency under the poll interval.
        let mut remaining = interval;
        while !remaining.is_zero() {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            let step = remaining.min(POLL_INTERVAL);
            std::thread::sleep(step);
            remaining -= step;
        }
    }
}

/// Decodes inbound announce datagrams and hands the peer keys to the
/// registry. Malformed datagrams are logged and dropped.
fn listener_loop(socket: UdpSocket, registry: Arc<PeerRegistry>, shutdown: Arc<AtomicBool>) {
    let mut buffer = [0u8; ANNOUNCE_BUFFER_SIZE];

    loop {
        if shutdown.load(Ordering::Relaxed) {
            log::debug!("[announce] sink stopping");
            return;
        }

        let (size, from) = match socket.recv_from(&mut buffer) {
            Ok(received) => received,
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(err) => {
                log::error!("[announce] unable to receive an announce: {}", err);
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }
        };

        match protocol::decode_announce(&buffer[..size]) {
            Ok(key) => registry.handle_announce(&key),
            Err(err) => {
                log::error!("[announce] unable to decode an announce from '{}': {}", from, err);
            }
        }
    }
}
