//! Identification string exchange (RFC 4253 §4.2).

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};

use super::{Transport, TransportError};

/// Longest identification line allowed, CR LF included.
pub const MAX_LINE_LEN: usize = 255;

/// Lines a server may send before its identification line.
const MAX_PRE_BANNER_LINES: usize = 32;

/// A parsed `SSH-protoversion-softwareversion SP comments` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identification {
    pub raw: String,
    pub proto_version: String,
    pub software_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Identification {
    pub fn parse(line: &str) -> Result<Self, TransportError> {
        let raw = line.trim();
        let rest = raw.strip_prefix("SSH-").ok_or_else(|| {
            TransportError::Malformed(format!("identification does not start with SSH-: {raw:?}"))
        })?;
        let (proto_version, rest) = rest.split_once('-').ok_or_else(|| {
            TransportError::Malformed(format!("identification has no software version: {raw:?}"))
        })?;
        let (software_version, comment) = match rest.split_once(' ') {
            Some((software, comment)) => (software, Some(comment.to_string())),
            None => (rest, None),
        };
        if proto_version.is_empty() || software_version.is_empty() {
            return Err(TransportError::Malformed(format!(
                "identification has an empty version field: {raw:?}"
            )));
        }
        Ok(Self {
            raw: raw.to_string(),
            proto_version: proto_version.to_string(),
            software_version: software_version.to_string(),
            comment,
        })
    }

    /// SSH 2.0, or 1.99 from servers that also speak the old protocol.
    pub fn speaks_ssh2(&self) -> bool {
        self.proto_version == "2.0" || self.proto_version == "1.99"
    }
}

/// Reads lines until one starts with `SSH-` and returns it without its line terminator, unparsed,
/// so the caller can record it before validating it. Lines sent before it are collected into
/// `preamble`, which keeps them even when the read fails.
pub async fn read_server_hello<S>(
    transport: &mut Transport<'_, S>,
    preamble: &mut Vec<String>,
) -> Result<Vec<u8>, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    loop {
        let line = transport.read_line(MAX_LINE_LEN).await?;
        if line.starts_with(b"SSH-") {
            return Ok(line);
        }
        if preamble.len() == MAX_PRE_BANNER_LINES {
            return Err(TransportError::Malformed(format!(
                "no identification line within {MAX_PRE_BANNER_LINES} lines"
            )));
        }
        preamble.push(String::from_utf8_lossy(&line).trim().to_string());
    }
}

pub async fn write_identification<S>(
    transport: &mut Transport<'_, S>,
    ident: &str,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let line = format!("{ident}\r\n");
    transport.write_all(line.as_bytes()).await
}
