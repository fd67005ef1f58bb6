//! Probe configuration assembly.
//!
//! [`ProbeOptions`] carries the operator's raw inputs; [`ProbeConfig::assemble`] validates them
//! into the immutable value the driver consumes. The configuration has no credential field, so
//! the driver can only ever send the `none` userauth method.

use std::time::Duration;

use thiserror::Error;

use super::algorithms::{self, AlgorithmError, Category};
use super::transport::ident::{Identification, MAX_LINE_LEN};
use super::transport::kex::GexRequest;

pub const DEFAULT_CLIENT_ID: &str = "SSH-2.0-Go";
pub const DEFAULT_GEX_MIN_BITS: u32 = 1024;
pub const DEFAULT_GEX_MAX_BITS: u32 = 8192;
pub const DEFAULT_GEX_PREFERRED_BITS: u32 = 2048;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Unvalidated inputs, as parsed from flags.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub client_id: String,
    pub kex_algorithms: String,
    pub host_key_algorithms: String,
    pub ciphers: String,
    pub macs: String,
    pub hello_only: bool,
    pub collect_extensions: bool,
    pub collect_userauth: bool,
    pub gex_min_bits: u32,
    pub gex_max_bits: u32,
    pub gex_preferred_bits: u32,
    pub timeout: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_string(),
            kex_algorithms: algorithms::DEFAULT_KEX.to_string(),
            host_key_algorithms: algorithms::DEFAULT_HOST_KEYS.to_string(),
            ciphers: algorithms::DEFAULT_CIPHERS.to_string(),
            macs: algorithms::DEFAULT_MACS.to_string(),
            hello_only: false,
            collect_extensions: false,
            collect_userauth: false,
            gex_min_bits: DEFAULT_GEX_MIN_BITS,
            gex_max_bits: DEFAULT_GEX_MAX_BITS,
            gex_preferred_bits: DEFAULT_GEX_PREFERRED_BITS,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {} list: {}", .0.category, .0)]
    Algorithm(AlgorithmError),

    #[error("group exchange bounds must satisfy min <= preferred <= max (got {min}/{preferred}/{max})")]
    GexBounds { min: u32, preferred: u32, max: u32 },

    #[error("invalid client identification {0:?}: {1}")]
    ClientId(String, &'static str),

    #[error("probe timeout must be greater than zero")]
    ZeroTimeout,
}

impl From<AlgorithmError> for ConfigError {
    fn from(err: AlgorithmError) -> Self {
        ConfigError::Algorithm(err)
    }
}

/// How the server's host key is treated. Scanning observes keys; it never decides whether
/// to trust them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    #[default]
    AcceptAny,
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    client_id: String,
    kex_algorithms: Vec<String>,
    host_key_algorithms: Vec<String>,
    ciphers: Vec<String>,
    macs: Vec<String>,
    hello_only: bool,
    collect_extensions: bool,
    collect_userauth: bool,
    gex: GexRequest,
    timeout: Duration,
    host_key_policy: HostKeyPolicy,
}

impl ProbeConfig {
    pub fn assemble(options: &ProbeOptions) -> Result<Self, ConfigError> {
        validate_client_id(&options.client_id)?;
        let kex_algorithms = algorithms::validate(&options.kex_algorithms, Category::Kex)?;
        let host_key_algorithms =
            algorithms::validate(&options.host_key_algorithms, Category::HostKey)?;
        let ciphers = algorithms::validate(&options.ciphers, Category::Cipher)?;
        let macs = algorithms::validate(&options.macs, Category::Mac)?;

        let (min, preferred, max) = (
            options.gex_min_bits,
            options.gex_preferred_bits,
            options.gex_max_bits,
        );
        if !(min <= preferred && preferred <= max) {
            return Err(ConfigError::GexBounds {
                min,
                preferred,
                max,
            });
        }
        if options.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }

        Ok(Self {
            client_id: options.client_id.clone(),
            kex_algorithms,
            host_key_algorithms,
            ciphers,
            macs,
            hello_only: options.hello_only,
            collect_extensions: options.collect_extensions,
            collect_userauth: options.collect_userauth,
            gex: GexRequest {
                min,
                preferred,
                max,
            },
            timeout: options.timeout,
            host_key_policy: HostKeyPolicy::AcceptAny,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn kex_algorithms(&self) -> &[String] {
        &self.kex_algorithms
    }

    pub fn host_key_algorithms(&self) -> &[String] {
        &self.host_key_algorithms
    }

    pub fn ciphers(&self) -> &[String] {
        &self.ciphers
    }

    pub fn macs(&self) -> &[String] {
        &self.macs
    }

    pub fn hello_only(&self) -> bool {
        self.hello_only
    }

    pub fn collect_extensions(&self) -> bool {
        self.collect_extensions
    }

    pub fn collect_userauth(&self) -> bool {
        self.collect_userauth
    }

    pub fn gex(&self) -> GexRequest {
        self.gex
    }

    /// Handshake deadline, armed once the connection is established.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn host_key_policy(&self) -> HostKeyPolicy {
        self.host_key_policy
    }
}

fn validate_client_id(client_id: &str) -> Result<(), ConfigError> {
    let reject = |why| Err(ConfigError::ClientId(client_id.to_string(), why));
    if client_id.contains(['\r', '\n']) {
        return reject("line breaks are not allowed");
    }
    if client_id.len() + 2 > MAX_LINE_LEN {
        return reject("longer than 253 bytes");
    }
    match Identification::parse(client_id) {
        Ok(ident) if ident.proto_version == "2.0" => Ok(()),
        Ok(_) => reject("protocol version must be 2.0"),
        Err(_) => reject("expected SSH-2.0-<software>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_assemble() {
        let config = ProbeConfig::assemble(&ProbeOptions::default()).unwrap();
        assert_eq!(config.client_id(), "SSH-2.0-Go");
        assert_eq!(config.kex_algorithms()[0], "curve25519-sha256");
        assert_eq!(config.ciphers().len(), 6);
        assert_eq!(
            config.gex(),
            GexRequest {
                min: 1024,
                preferred: 2048,
                max: 8192
            }
        );
        assert_eq!(config.host_key_policy(), HostKeyPolicy::AcceptAny);
        assert!(!config.hello_only());
    }

    #[test]
    fn policy_flags_are_copied_verbatim() {
        let options = ProbeOptions {
            hello_only: true,
            collect_extensions: true,
            collect_userauth: true,
            ..ProbeOptions::default()
        };
        let config = ProbeConfig::assemble(&options).unwrap();
        assert!(config.hello_only());
        assert!(config.collect_extensions());
        assert!(config.collect_userauth());
    }

    #[test]
    fn bogus_cipher_fails_the_whole_assembly() {
        let options = ProbeOptions {
            ciphers: "bogus-cipher".into(),
            ..ProbeOptions::default()
        };
        let err = ProbeConfig::assemble(&options).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"invalid cipher list: algorithm not supported: "bogus-cipher""#
        );
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn legacy_ciphers_are_accepted() {
        let options = ProbeOptions {
            ciphers: "aes128-cbc,3des-cbc,arcfour".into(),
            kex_algorithms: "ecdh-sha2-nistp521".into(),
            ..ProbeOptions::default()
        };
        let config = ProbeConfig::assemble(&options).unwrap();
        assert_eq!(config.ciphers(), ["aes128-cbc", "3des-cbc", "arcfour"]);
        assert_eq!(config.kex_algorithms(), ["ecdh-sha2-nistp521"]);
    }

    #[test]
    fn inverted_gex_bounds_are_rejected() {
        let options = ProbeOptions {
            gex_min_bits: 4096,
            gex_preferred_bits: 2048,
            ..ProbeOptions::default()
        };
        assert!(matches!(
            ProbeConfig::assemble(&options),
            Err(ConfigError::GexBounds { .. })
        ));
    }

    #[test]
    fn client_id_must_be_an_ssh2_identification() {
        for bad in ["Go", "SSH-1.5-Go", "SSH-2.0-Go\r\nextra"] {
            let options = ProbeOptions {
                client_id: bad.into(),
                ..ProbeOptions::default()
            };
            assert!(matches!(
                ProbeConfig::assemble(&options),
                Err(ConfigError::ClientId(..))
            ));
        }
        let options = ProbeOptions {
            client_id: "SSH-2.0-OpenSSH_9.6 scanner".into(),
            ..ProbeOptions::default()
        };
        assert!(ProbeConfig::assemble(&options).is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let options = ProbeOptions {
            timeout: Duration::ZERO,
            ..ProbeOptions::default()
        };
        assert!(matches!(
            ProbeConfig::assemble(&options),
            Err(ConfigError::ZeroTimeout)
        ));
    }
}
