// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire protocol for the locator.
//!
//! Three frame families share one encoding: JSON payloads with a 4-byte
//! big-endian length prefix on TCP, and a single bare JSON datagram for
//! multicast announces. Decoders ignore unknown fields so that newer nodes
//! can extend frames without breaking older receivers.

use crate::service::{ServiceDescriptor, UsageCounters};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};

/// UDP port announces are exchanged on.
pub const DEFAULT_ANNOUNCE_PORT: u16 = 10054;

/// Hard cap on a single TCP frame.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Identity of one locator node: who it is and where its RPC port lives.
///
/// The uuid alone identifies a node; hostname and port are the address
/// used to open the synchronize channel. Announces differing only in
/// address are distinct registry entries but collapse on uuid in the
/// routing table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerKey {
    pub uuid: String,
    pub hostname: String,
    pub port: u16,
}

impl PeerKey {
    pub fn new(uuid: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        Self {
            uuid: uuid.into(),
            hostname: hostname.into(),
            port,
        }
    }
}

impl std::fmt::Display for PeerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}' on '{}:{}'", self.uuid, self.hostname, self.port)
    }
}

/// Requests accepted by the locator RPC surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Resolve { name: String },
    Reports,
    Refresh { name: String },
    Synchronize,
}

/// Error codes carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NameConflict,
    PortsExhausted,
    ServiceUnavailable,
    Storage,
    Protocol,
    Internal,
}

/// Responses produced by the locator RPC surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Descriptor {
        descriptor: ServiceDescriptor,
    },
    Reports {
        services: BTreeMap<String, UsageCounters>,
    },
    Refreshed,
    Error {
        code: ErrorCode,
        message: String,
    },
}

/// Frames carried on a synchronize stream.
///
/// `Chunk` is a full snapshot of the sender's local catalog; receivers
/// compute deltas themselves. `Choke` terminates the stream gracefully,
/// `Error` terminates it with a peer-reported failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncFrame {
    Chunk {
        services: BTreeMap<String, ServiceDescriptor>,
    },
    Choke,
    Error {
        code: u32,
        message: String,
    },
}

/// Wire-level failures.
#[derive(Debug)]
pub enum ProtocolError {
    Io(io::Error),
    /// Frame length prefix exceeds `MAX_FRAME_SIZE` or is zero.
    BadLength(usize),
    /// Payload failed to parse as the expected frame.
    Malformed(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Io(err) => write!(f, "i/o error: {}", err),
            ProtocolError::BadLength(len) => write!(f, "invalid frame length: {}", len),
            ProtocolError::Malformed(msg) => write!(f, "malformed frame: {}", msg),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<io::Error> for ProtocolError {
    fn from(err: io::Error) -> Self {
        ProtocolError::Io(err)
    }
}

impl From<ProtocolError> for crate::Error {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(err) => crate::Error::Io(err),
            other => crate::Error::Protocol(other.to_string()),
        }
    }
}

// ============================================================================
// Announce datagrams
// ============================================================================

/// Encode a peer key as a single announce datagram.
pub fn encode_announce(key: &PeerKey) -> Vec<u8> {
    // Serializing a plain struct with string/u16 fields cannot fail.
    serde_json::to_vec(key).unwrap_or_default()
}

/// Decode an announce datagram.
///
/// Unknown trailing fields are tolerated for forward compatibility.
pub fn decode_announce(data: &[u8]) -> Result<PeerKey, ProtocolError> {
    serde_json::from_slice(data).map_err(|err| ProtocolError::Malformed(err.to_string()))
}

// ============================================================================
// Length-prefixed TCP framing
// ============================================================================

/// Serialize `msg` into `buf` as a complete frame (prefix + payload).
///
/// `buf` is cleared first; callers reuse it across frames to avoid
/// reallocating on every broadcast.
pub fn encode_frame<T: Serialize>(msg: &T, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
    buf.clear();
    buf.extend_from_slice(&[0u8; 4]);

    serde_json::to_writer(&mut *buf, msg).map_err(|err| ProtocolError::Malformed(err.to_string()))?;

    let len = buf.len() - 4;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::BadLength(len));
    }
    buf[..4].copy_from_slice(&(len as u32).to_be_bytes());
    Ok(())
}

/// Write `msg` to `w` as one frame.
pub fn write_frame<W: Write, T: Serialize>(w: &mut W, msg: &T) -> Result<(), ProtocolError> {
    let mut buf = Vec::with_capacity(256);
    encode_frame(msg, &mut buf)?;
    w.write_all(&buf)?;
    w.flush()?;
    Ok(())
}

/// Read one frame from `r`.
///
/// Returns `Ok(None)` when the stream is closed cleanly at a frame
/// boundary.
pub fn read_frame<R: Read, T: DeserializeOwned>(r: &mut R) -> Result<Option<T>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(ProtocolError::Io(err)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 || len > MAX_FRAME_SIZE {
        return Err(ProtocolError::BadLength(len));
    }

    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;

    serde_json::from_slice(&payload)
        .map(Some)
        .map_err(|err| ProtocolError::Malformed(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Endpoint;
    use std::io::Cursor;

    fn sample_descriptor() -> ServiceDescriptor {
        let mut descriptor = ServiceDescriptor::new(vec![Endpoint::new("node-1", 6001)], 1);
        descriptor.methods.insert(0, "enqueue".into());
        descriptor
    }

    #[test]
    fn test_announce_roundtrip() {
        let key = PeerKey::new("5f1d", "node-1.cluster", 10053);
        let wire = encode_announce(&key);
        let parsed = decode_announce(&wire).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_announce_tolerates_trailing_fields() {
        let wire = br#"{"uuid":"5f1d","hostname":"node-1","port":10053,"generation":7}"#;
        let parsed = decode_announce(wire).unwrap();
        assert_eq!(parsed.uuid, "5f1d");
        assert_eq!(parsed.port, 10053);
    }

    #[test]
    fn test_announce_rejects_garbage() {
        assert!(decode_announce(b"\x01\x02\x03").is_err());
        assert!(decode_announce(br#"{"uuid":"x"}"#).is_err()); // missing fields
    }

    #[test]
    fn test_frame_roundtrip_request() {
        let mut wire = Vec::new();
        write_frame(
            &mut wire,
            &Request::Resolve {
                name: "storage".into(),
            },
        )
        .unwrap();

        let parsed: Request = read_frame(&mut Cursor::new(&wire)).unwrap().unwrap();
        assert_eq!(
            parsed,
            Request::Resolve {
                name: "storage".into()
            }
        );
    }

    #[test]
    fn test_frame_roundtrip_sync_chunk() {
        let mut services = BTreeMap::new();
        services.insert("queue".to_string(), sample_descriptor());

        let mut wire = Vec::new();
        write_frame(&mut wire, &SyncFrame::Chunk { services }).unwrap();

        match read_frame::<_, SyncFrame>(&mut Cursor::new(&wire)).unwrap().unwrap() {
            SyncFrame::Chunk { services } => {
                assert_eq!(services.len(), 1);
                assert_eq!(services["queue"], sample_descriptor());
            }
            other => panic!("expected chunk, got {:?}", other),
        }
    }

    #[test]
    fn test_read_frame_clean_eof() {
        let parsed: Option<SyncFrame> = read_frame(&mut Cursor::new(&[])).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn test_read_frame_rejects_zero_length() {
        let wire = 0u32.to_be_bytes();
        let result: Result<Option<SyncFrame>, _> = read_frame(&mut Cursor::new(&wire));
        assert!(matches!(result, Err(ProtocolError::BadLength(0))));
    }

    #[test]
    fn test_read_frame_rejects_oversized_length() {
        let wire = (MAX_FRAME_SIZE as u32 + 1).to_be_bytes();
        let result: Result<Option<SyncFrame>, _> = read_frame(&mut Cursor::new(&wire));
        assert!(matches!(result, Err(ProtocolError::BadLength(_))));
    }

    #[test]
    fn test_read_frame_rejects_malformed_payload() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&3u32.to_be_bytes());
        wire.extend_from_slice(b"???");

        let result: Result<Option<SyncFrame>, _> = read_frame(&mut Cursor::new(&wire));
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_encode_frame_reuses_buffer() {
        let mut buf = Vec::new();
        encode_frame(&SyncFrame::Choke, &mut buf).unwrap();
        let first = buf.clone();

        encode_frame(&SyncFrame::Choke, &mut buf).unwrap();
        assert_eq!(buf, first);
    }

    #[test]
    fn test_response_error_roundtrip() {
        let mut wire = Vec::new();
        write_frame(
            &mut wire,
            &Response::Error {
                code: ErrorCode::ServiceUnavailable,
                message: "service 'x' is not available".into(),
            },
        )
        .unwrap();

        match read_frame::<_, Response>(&mut Cursor::new(&wire)).unwrap().unwrap() {
            Response::Error { code, .. } => assert_eq!(code, ErrorCode::ServiceUnavailable),
            other => panic!("expected error, got {:?}", other),
        }
    }
}
