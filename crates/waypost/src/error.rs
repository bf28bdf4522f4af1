// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Errors returned by locator operations.

use std::io;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the locator and its subsystems.
///
/// Client errors (`NameConflict`, `PortsExhausted`, `ServiceUnavailable`)
/// are reported to the caller and never change federation state. Peer and
/// transport failures are handled inside the cluster module and do not
/// reach this enum unless the caller initiated the operation.
#[derive(Debug)]
pub enum Error {
    /// Invalid or inconsistent configuration. Fatal at start-up.
    Config(String),
    /// Underlying socket or file I/O failure.
    Io(io::Error),
    /// A service with this name is already attached on this node.
    NameConflict(String),
    /// A port pool is configured and has no free ports left.
    PortsExhausted,
    /// The name resolves to no local service and no gateway can serve it.
    ServiceUnavailable(String),
    /// Group store failure that is not interpretable as a deletion.
    Storage(String),
    /// Malformed or oversized wire frame.
    Protocol(String),
    /// The synchronize feed has been shut down; subscribes are rejected.
    FeedClosed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::Io(err) => write!(f, "i/o error: {}", err),
            Error::NameConflict(name) => {
                write!(f, "service '{}' is already attached", name)
            }
            Error::PortsExhausted => write!(f, "no ports left for allocation"),
            Error::ServiceUnavailable(name) => {
                write!(f, "service '{}' is not available", name)
            }
            Error::Storage(msg) => write!(f, "storage error: {}", msg),
            Error::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Error::FeedClosed => write!(f, "the synchronize feed is shut down"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_client_errors() {
        let err = Error::NameConflict("storage".into());
        assert!(err.to_string().contains("storage"));

        let err = Error::ServiceUnavailable("cache".into());
        assert!(err.to_string().contains("cache"));

        let err = Error::PortsExhausted;
        assert!(err.to_string().contains("no ports"));
    }

    #[test]
    fn test_io_error_source() {
        use std::error::Error as _;

        let err = Error::from(io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(err.source().is_some());
        assert!(Error::FeedClosed.source().is_none());
    }
}
