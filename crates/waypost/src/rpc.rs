// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP front-end for the locator RPC surface.
//!
//! One accept loop, one thread per connection. Requests and responses
//! are length-prefixed JSON frames. A `synchronize` request upgrades the
//! connection: its write half joins the feed as an upstream and the
//! connection thread parks on reads until the client goes away.

use crate::locator::Locator;
use crate::protocol::{self, ErrorCode, Request, Response};
use crate::sync::Upstream;
use crate::Error;
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Accept-loop poll granularity for shutdown checks.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// The locator's TCP server.
pub struct LocatorServer {
    local_addr: SocketAddr,
    accept: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl LocatorServer {
    /// Bind `addr` and start accepting connections.
    pub fn spawn(locator: Arc<Locator>, addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        log::info!("[rpc] locator listening on '{}'", local_addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let accept = {
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("waypost-rpc".to_string())
                .spawn(move || accept_loop(listener, locator, shutdown))?
        };

        Ok(Self {
            local_addr,
            accept: Some(accept),
            shutdown,
        })
    }

    /// The effective bind address (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and join the accept loop. Established connections
    /// die with their streams when the locator's feed shuts down.
    pub fn close(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.accept.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LocatorServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: TcpListener, locator: Arc<Locator>, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            log::debug!("[rpc] accept loop stopping");
            return;
        }

        match listener.accept() {
            Ok((stream, peer)) => {
                log::debug!("[rpc] accepted a connection from '{}'", peer);
                stream.set_nodelay(true).ok();
                // Connections block again; only the listener polls.
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }

                let locator = Arc::clone(&locator);
                let spawned = std::thread::Builder::new()
                    .name("waypost-rpc-conn".to_string())
                    .spawn(move || serve_connection(locator, stream, peer));
                if let Err(err) = spawned {
                    log::error!("[rpc] unable to serve '{}': {}", peer, err);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(err) => {
                log::error!("[rpc] accept failed: {}", err);
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn serve_connection(locator: Arc<Locator>, mut stream: TcpStream, peer: SocketAddr) {
    loop {
        let request = match protocol::read_frame::<_, Request>(&mut stream) {
            Ok(Some(request)) => request,
            Ok(None) => return,
            Err(err) => {
                log::warn!("[rpc] dropping '{}': {}", peer, err);
                let _ = stream.shutdown(Shutdown::Both);
                return;
            }
        };

        let response = match request {
            Request::Resolve { name } => match locator.resolve(&name) {
                Ok(descriptor) => Response::Descriptor { descriptor },
                Err(err) => error_response(err),
            },
            Request::Reports => Response::Reports {
                services: locator.reports(),
            },
            Request::Refresh { name } => match locator.refresh(&name) {
                Ok(()) => Response::Refreshed,
                Err(err) => error_response(err),
            },
            Request::Synchronize => {
                serve_synchronize(&locator, &mut stream, peer);
                return;
            }
        };

        if let Err(err) = protocol::write_frame(&mut stream, &response) {
            log::warn!("[rpc] unable to respond to '{}': {}", peer, err);
            return;
        }
    }
}

/// Hand the connection's write half to the feed, then drain the read
/// half until the client disconnects. Frames flow from broadcast calls
/// on other threads; this thread only notices the hangup.
fn serve_synchronize(locator: &Arc<Locator>, stream: &mut TcpStream, peer: SocketAddr) {
    let upstream = match stream.try_clone() {
        Ok(clone) => TcpUpstream { stream: clone },
        Err(err) => {
            log::warn!("[rpc] unable to subscribe '{}': {}", peer, err);
            return;
        }
    };

    if let Err(err) = locator.synchronize(Box::new(upstream)) {
        log::warn!("[rpc] subscription from '{}' rejected: {}", peer, err);
        let response = error_response(err);
        let _ = protocol::write_frame(stream, &response);
        return;
    }

    let mut sink = [0u8; 64];
    loop {
        match stream.read(&mut sink) {
            Ok(0) => {
                log::debug!("[rpc] subscriber '{}' disconnected", peer);
                return;
            }
            Ok(_) => {
                // Nothing is expected on a synchronize stream; ignore.
            }
            Err(err) => {
                log::debug!("[rpc] subscriber '{}' gone: {}", peer, err);
                return;
            }
        }
    }
}

fn error_response(err: Error) -> Response {
    let code = match &err {
        Error::NameConflict(_) => ErrorCode::NameConflict,
        Error::PortsExhausted => ErrorCode::PortsExhausted,
        Error::ServiceUnavailable(_) => ErrorCode::ServiceUnavailable,
        Error::Storage(_) => ErrorCode::Storage,
        Error::Protocol(_) => ErrorCode::Protocol,
        _ => ErrorCode::Internal,
    };

    Response::Error {
        code,
        message: err.to_string(),
    }
}

struct TcpUpstream {
    stream: TcpStream,
}

impl Upstream for TcpUpstream {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        use std::io::Write;
        self.stream.write_all(frame)?;
        self.stream.flush()
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
