//! Minimal SSH transport (RFC 4253) used by the handshake driver.
//!
//! Only the pieces needed to reach the userauth service are here: identification exchange,
//! the binary packet protocol, KEXINIT negotiation, the key exchange methods listed in the
//! algorithm catalog and the cipher/MAC suites that protect packets after NEWKEYS. Every read
//! and write is bounded by a single deadline owned by the probe.

pub mod cipher;
pub mod hostkey;
pub mod ident;
pub mod kex;
pub mod kexinit;
pub mod packet;
pub mod wire;

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use self::packet::{Opener, Sealer};
use self::wire::{Reader, Writer};

/// Message numbers used by the probe (RFC 4250 §4.1, RFC 8308).
pub mod msg {
    pub const DISCONNECT: u8 = 1;
    pub const IGNORE: u8 = 2;
    pub const UNIMPLEMENTED: u8 = 3;
    pub const DEBUG: u8 = 4;
    pub const SERVICE_REQUEST: u8 = 5;
    pub const SERVICE_ACCEPT: u8 = 6;
    pub const EXT_INFO: u8 = 7;
    pub const KEXINIT: u8 = 20;
    pub const NEWKEYS: u8 = 21;
    /// KEXDH_INIT, KEX_ECDH_INIT and KEX_DH_GEX_REQUEST_OLD share this number.
    pub const KEX_INIT: u8 = 30;
    /// KEXDH_REPLY, KEX_ECDH_REPLY and KEX_DH_GEX_GROUP share this number.
    pub const KEX_REPLY: u8 = 31;
    pub const KEX_DH_GEX_INIT: u8 = 32;
    pub const KEX_DH_GEX_REPLY: u8 = 33;
    pub const KEX_DH_GEX_REQUEST: u8 = 34;
    pub const USERAUTH_REQUEST: u8 = 50;
    pub const USERAUTH_FAILURE: u8 = 51;
    pub const USERAUTH_SUCCESS: u8 = 52;
    pub const USERAUTH_BANNER: u8 = 53;
}

/// Largest packet accepted from a peer, well above the 35000 bytes RFC 4253 requires.
const MAX_PACKET_LEN: usize = 256 * 1024;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("deadline exceeded")]
    TimedOut,

    #[error("connection closed by peer")]
    Closed,

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("no common {category} algorithm (client: {client:?}, server: {server:?})")]
    NoCommonAlgorithm {
        category: &'static str,
        client: Vec<String>,
        server: Vec<String>,
    },

    #[error("cryptographic failure: {0}")]
    Crypto(String),

    #[error("server disconnected (reason {reason}): {description}")]
    Disconnected { reason: u32, description: String },
}

impl TransportError {
    /// True when the error came from the deadline rather than the peer.
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::TimedOut => true,
            TransportError::Io(err) => err.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

/// Which end of the connection this transport speaks for. Decides which derived keys protect
/// outgoing packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

pub struct Transport<'s, S> {
    stream: &'s mut S,
    role: Role,
    deadline: Instant,
    inbound: Vec<u8>,
    sealer: Sealer,
    opener: Opener,
    send_seq: u32,
    recv_seq: u32,
}

impl<'s, S> Transport<'s, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: &'s mut S, role: Role, deadline: Instant) -> Self {
        Self {
            stream,
            role,
            deadline,
            inbound: Vec::new(),
            sealer: Sealer::plain(),
            opener: Opener::plain(),
            send_seq: 0,
            recv_seq: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Reads one line terminated by LF, without the line terminator. Bytes after the line stay
    /// buffered for packet parsing.
    pub async fn read_line(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        loop {
            if let Some(pos) = self.inbound.iter().position(|&b| b == b'\n') {
                if pos + 1 > max_len {
                    return Err(TransportError::Malformed(format!(
                        "line longer than {max_len} bytes"
                    )));
                }
                let mut line: Vec<u8> = self.inbound.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(line);
            }
            if self.inbound.len() > max_len {
                return Err(TransportError::Malformed(format!(
                    "line longer than {max_len} bytes"
                )));
            }
            self.fill().await?;
        }
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let deadline = self.deadline;
        let stream = &mut *self.stream;
        timeout_at(deadline, async {
            stream.write_all(bytes).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| TransportError::TimedOut)??;
        Ok(())
    }

    /// Frames and sends one payload under the current outgoing keys.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let bytes = self.sealer.seal(self.send_seq, payload)?;
        self.send_seq = self.send_seq.wrapping_add(1);
        self.write_all(&bytes).await
    }

    /// Receives one raw payload, whatever its message number.
    pub async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let head = self.opener.head_len();
        self.ensure(head).await?;
        let packet_len = self
            .opener
            .packet_length(self.recv_seq, &self.inbound[..head])?;
        if !(5..=MAX_PACKET_LEN).contains(&packet_len) {
            return Err(TransportError::Malformed(format!(
                "packet length {packet_len} out of range"
            )));
        }
        let total = 4 + packet_len + self.opener.trailer_len();
        self.ensure(total).await?;
        let mut packet: Vec<u8> = self.inbound.drain(..total).collect();
        let payload = self.opener.open(self.recv_seq, &mut packet)?;
        self.recv_seq = self.recv_seq.wrapping_add(1);
        if payload.is_empty() {
            return Err(TransportError::Malformed("empty payload".into()));
        }
        Ok(payload)
    }

    /// Receives the next payload that carries protocol meaning. IGNORE, DEBUG and
    /// UNIMPLEMENTED are dropped; DISCONNECT becomes an error.
    pub async fn recv_message(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            let payload = self.recv().await?;
            match payload[0] {
                msg::IGNORE | msg::DEBUG => continue,
                msg::UNIMPLEMENTED => {
                    debug!("peer replied SSH_MSG_UNIMPLEMENTED");
                    continue;
                }
                msg::DISCONNECT => {
                    let mut r = Reader::new(&payload[1..]);
                    let reason = r.u32()?;
                    let description = r.utf8().unwrap_or_default();
                    return Err(TransportError::Disconnected {
                        reason,
                        description,
                    });
                }
                _ => return Ok(payload),
            }
        }
    }

    /// Receives a message and insists on its number.
    pub async fn expect(&mut self, expected: u8) -> Result<Vec<u8>, TransportError> {
        let payload = self.recv_message().await?;
        if payload[0] != expected {
            return Err(TransportError::Protocol(format!(
                "expected message {expected}, got {}",
                payload[0]
            )));
        }
        Ok(payload)
    }

    pub async fn send_newkeys(&mut self, sealer: Sealer) -> Result<(), TransportError> {
        self.send(&Writer::message(msg::NEWKEYS).into_bytes())
            .await?;
        self.sealer = sealer;
        Ok(())
    }

    pub async fn recv_newkeys(&mut self, opener: Opener) -> Result<(), TransportError> {
        self.expect(msg::NEWKEYS).await?;
        self.opener = opener;
        Ok(())
    }

    async fn ensure(&mut self, len: usize) -> Result<(), TransportError> {
        while self.inbound.len() < len {
            self.fill().await?;
        }
        Ok(())
    }

    async fn fill(&mut self) -> Result<(), TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = timeout_at(self.deadline, self.stream.read(&mut chunk))
            .await
            .map_err(|_| TransportError::TimedOut)??;
        if n == 0 {
            return Err(TransportError::Closed);
        }
        self.inbound.extend_from_slice(&chunk[..n]);
        Ok(())
    }
}
