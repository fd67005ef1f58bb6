use std::fmt;

use serde::Serialize;

use super::error::ProbeError;

/// Terminal status of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanStatus {
    Success,
    ConnectionError,
    HandshakeError,
    Timeout,
    UnknownError,
}

impl ScanStatus {
    /// Maps an outcome onto the status taxonomy. Pure; only the error variant is inspected.
    pub fn classify(error: Option<&ProbeError>) -> Self {
        match error {
            None => ScanStatus::Success,
            Some(ProbeError::Dial(_)) => ScanStatus::ConnectionError,
            Some(ProbeError::DialTimeout(_)) => ScanStatus::Timeout,
            Some(ProbeError::Handshake { source, .. }) if source.is_timeout() => {
                ScanStatus::Timeout
            }
            Some(ProbeError::Handshake { .. }) => ScanStatus::HandshakeError,
            Some(ProbeError::Cancelled) => ScanStatus::Timeout,
            Some(ProbeError::Internal(_)) => ScanStatus::UnknownError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Success => "success",
            ScanStatus::ConnectionError => "connection-error",
            ScanStatus::HandshakeError => "handshake-error",
            ScanStatus::Timeout => "timeout",
            ScanStatus::UnknownError => "unknown-error",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
