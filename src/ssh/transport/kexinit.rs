//! SSH_MSG_KEXINIT and algorithm negotiation (RFC 4253 §7.1).

use rand::RngCore;
use serde::Serialize;

use super::cipher::CipherKind;
use super::wire::{Reader, Writer};
use super::{msg, TransportError};

/// Names that signal a capability rather than select an algorithm.
const MARKERS: &[&str] = &[
    "ext-info-c",
    "ext-info-s",
    "kex-strict-c-v00@openssh.com",
    "kex-strict-s-v00@openssh.com",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KexInit {
    #[serde(serialize_with = "crate::util::hex::serialize")]
    pub cookie: [u8; 16],
    pub kex_algorithms: Vec<String>,
    pub host_key_algorithms: Vec<String>,
    pub ciphers_client_to_server: Vec<String>,
    pub ciphers_server_to_client: Vec<String>,
    pub macs_client_to_server: Vec<String>,
    pub macs_server_to_client: Vec<String>,
    pub compression_client_to_server: Vec<String>,
    pub compression_server_to_client: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub languages_client_to_server: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub languages_server_to_client: Vec<String>,
    pub first_kex_follows: bool,
}

impl KexInit {
    /// Builds an offer with the same cipher and MAC lists in both directions and no
    /// compression.
    pub fn offer(
        kex_algorithms: Vec<String>,
        host_key_algorithms: Vec<String>,
        ciphers: Vec<String>,
        macs: Vec<String>,
    ) -> Self {
        let mut cookie = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut cookie);
        let none = vec!["none".to_string()];
        Self {
            cookie,
            kex_algorithms,
            host_key_algorithms,
            ciphers_client_to_server: ciphers.clone(),
            ciphers_server_to_client: ciphers,
            macs_client_to_server: macs.clone(),
            macs_server_to_client: macs,
            compression_client_to_server: none.clone(),
            compression_server_to_client: none,
            languages_client_to_server: Vec::new(),
            languages_server_to_client: Vec::new(),
            first_kex_follows: false,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::message(msg::KEXINIT);
        w.put_raw(&self.cookie)
            .put_name_list(&self.kex_algorithms)
            .put_name_list(&self.host_key_algorithms)
            .put_name_list(&self.ciphers_client_to_server)
            .put_name_list(&self.ciphers_server_to_client)
            .put_name_list(&self.macs_client_to_server)
            .put_name_list(&self.macs_server_to_client)
            .put_name_list(&self.compression_client_to_server)
            .put_name_list(&self.compression_server_to_client)
            .put_name_list(&self.languages_client_to_server)
            .put_name_list(&self.languages_server_to_client)
            .put_bool(self.first_kex_follows)
            .put_u32(0);
        w.into_bytes()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, TransportError> {
        let mut r = Reader::new(payload);
        if r.u8()? != msg::KEXINIT {
            return Err(TransportError::Protocol("expected SSH_MSG_KEXINIT".into()));
        }
        let mut cookie = [0u8; 16];
        cookie.copy_from_slice(r.take(16)?);
        let kexinit = Self {
            cookie,
            kex_algorithms: r.name_list()?,
            host_key_algorithms: r.name_list()?,
            ciphers_client_to_server: r.name_list()?,
            ciphers_server_to_client: r.name_list()?,
            macs_client_to_server: r.name_list()?,
            macs_server_to_client: r.name_list()?,
            compression_client_to_server: r.name_list()?,
            compression_server_to_client: r.name_list()?,
            languages_client_to_server: r.name_list()?,
            languages_server_to_client: r.name_list()?,
            first_kex_follows: r.bool()?,
        };
        r.u32()?;
        Ok(kexinit)
    }
}

/// Algorithms chosen for one direction of traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectionAlgorithms {
    pub cipher: String,
    /// Absent when the cipher authenticates packets itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    pub compression: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Negotiated {
    pub kex: String,
    pub host_key: String,
    pub client_to_server: DirectionAlgorithms,
    pub server_to_client: DirectionAlgorithms,
}

/// The first client preference that the server also lists.
fn first_match(
    category: &'static str,
    client: &[String],
    server: &[String],
) -> Result<String, TransportError> {
    client
        .iter()
        .filter(|name| !MARKERS.contains(&name.as_str()))
        .find(|name| server.contains(*name))
        .cloned()
        .ok_or_else(|| TransportError::NoCommonAlgorithm {
            category,
            client: client.to_vec(),
            server: server.to_vec(),
        })
}

fn direction(
    label: &'static str,
    ciphers: (&[String], &[String]),
    macs: (&[String], &[String]),
    compression: (&[String], &[String]),
) -> Result<DirectionAlgorithms, TransportError> {
    let cipher = first_match(label, ciphers.0, ciphers.1)?;
    let aead = CipherKind::from_name(&cipher).is_some_and(|kind| kind.is_aead());
    let mac = if aead {
        None
    } else {
        Some(first_match("mac", macs.0, macs.1)?)
    };
    Ok(DirectionAlgorithms {
        cipher,
        mac,
        compression: first_match("compression", compression.0, compression.1)?,
    })
}

pub fn negotiate(client: &KexInit, server: &KexInit) -> Result<Negotiated, TransportError> {
    Ok(Negotiated {
        kex: first_match("kex", &client.kex_algorithms, &server.kex_algorithms)?,
        host_key: first_match(
            "host key",
            &client.host_key_algorithms,
            &server.host_key_algorithms,
        )?,
        client_to_server: direction(
            "client to server cipher",
            (
                &client.ciphers_client_to_server,
                &server.ciphers_client_to_server,
            ),
            (&client.macs_client_to_server, &server.macs_client_to_server),
            (
                &client.compression_client_to_server,
                &server.compression_client_to_server,
            ),
        )?,
        server_to_client: direction(
            "server to client cipher",
            (
                &client.ciphers_server_to_client,
                &server.ciphers_server_to_client,
            ),
            (&client.macs_server_to_client, &server.macs_server_to_client),
            (
                &client.compression_server_to_client,
                &server.compression_server_to_client,
            ),
        )?,
    })
}

/// True when `sender` announced a guessed kex packet whose algorithms differ from the
/// negotiated ones, so the packet must be dropped.
pub fn guess_was_wrong(sender: &KexInit, negotiated: &Negotiated) -> bool {
    if !sender.first_kex_follows {
        return false;
    }
    let kex_guess = sender
        .kex_algorithms
        .iter()
        .find(|name| !MARKERS.contains(&name.as_str()));
    kex_guess != Some(&negotiated.kex)
        || sender.host_key_algorithms.first() != Some(&negotiated.host_key)
}
