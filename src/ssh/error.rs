use std::fmt;
use std::io;

use serde::Serialize;
use thiserror::Error;

use super::transport::TransportError;

/// Handshake phases, in the order the driver runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    VersionExchange,
    KeyExchange,
    ExtensionNegotiation,
    UserAuthProbe,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::VersionExchange => "version exchange",
            Phase::KeyExchange => "key exchange",
            Phase::ExtensionNegotiation => "extension negotiation",
            Phase::UserAuthProbe => "userauth probe",
        };
        write!(f, "{}", label)
    }
}

/// Why a single probe did not succeed.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to dial target: {0}")]
    Dial(#[source] io::Error),

    #[error("connect timed out after {0:?}")]
    DialTimeout(std::time::Duration),

    #[error("{phase} failed: {source}")]
    Handshake {
        phase: Phase,
        #[source]
        source: TransportError,
    },

    #[error("probe cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProbeError {
    pub fn handshake(phase: Phase, source: TransportError) -> Self {
        ProbeError::Handshake { phase, source }
    }

    /// Phase the error was raised in, when it came from the driver.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            ProbeError::Handshake { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}
