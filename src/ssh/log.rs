//! The structured record a probe leaves behind.
//!
//! The driver writes into a caller-owned [`HandshakeLog`] as each artifact is observed, so the
//! record survives any later failure. Unset fields are omitted when serialized.

use serde::Serialize;

use super::error::Phase;
use super::transport::hostkey::{ExchangeSignature, HostKey};
use super::transport::ident::Identification;
use super::transport::kexinit::{KexInit, Negotiated};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HandshakeLog {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<Identification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<Identification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_key_exchange: Option<KexInit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_key_exchange: Option<KexInit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm_selection: Option<Negotiated>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_exchange: Option<KeyExchangeLog>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_host_key: Option<HostKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<ExchangeSignature>,
    /// `None` when collection was not attempted, empty when the server sent nothing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_extensions: Option<Vec<Extension>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userauth: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userauth_banner: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<PhaseNote>,
}

impl HandshakeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when nothing at all was observed.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn note(&mut self, phase: Phase, message: impl Into<String>) {
        self.notes.push(PhaseNote {
            phase,
            message: message.into(),
        });
    }
}

/// Public values and group parameters of the key exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyExchangeLog {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupLog>,
    #[serde(
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "crate::util::hex::serialize"
    )]
    pub client_public: Vec<u8>,
    #[serde(
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "crate::util::hex::serialize"
    )]
    pub server_public: Vec<u8>,
}

/// Diffie-Hellman group in use, with the bounds requested for group exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupLog {
    pub prime_bits: u64,
    #[serde(serialize_with = "crate::util::hex::serialize")]
    pub generator: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested: Option<GexBoundsLog>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GexBoundsLog {
    pub min: u32,
    pub preferred: u32,
    pub max: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extension {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseNote {
    pub phase: Phase,
    pub message: String,
}
