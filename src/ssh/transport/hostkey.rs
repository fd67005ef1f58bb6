//! Server host key blobs and exchange-hash signatures (RFC 4253 §6.6, RFC 5656 §3,
//! RFC 8332, OpenSSH PROTOCOL.certkeys).
//!
//! Keys are parsed for the record only. Signatures are checked so that a forged key
//! exchange is detected, but no key is ever trusted or compared with known hosts.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use ring::digest;
use ring::signature::{self, RsaPublicKeyComponents, UnparsedPublicKey};
use serde::Serialize;

use super::wire::Reader;
use super::TransportError;

const CERT_SUFFIX: &str = "-cert-v01@openssh.com";

/// Public parameters carried in a host key blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeyParams {
    Ed25519 {
        #[serde(serialize_with = "crate::util::hex::serialize")]
        public_key: Vec<u8>,
    },
    Ecdsa {
        curve: String,
        #[serde(serialize_with = "crate::util::hex::serialize")]
        point: Vec<u8>,
    },
    Rsa {
        modulus_bits: u64,
        #[serde(serialize_with = "crate::util::hex::serialize")]
        modulus: Vec<u8>,
        #[serde(serialize_with = "crate::util::hex::serialize")]
        exponent: Vec<u8>,
    },
    Dsa {
        p_bits: u64,
        q_bits: u64,
    },
    Certificate(Box<Certificate>),
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Certificate {
    pub cert_type: String,
    #[serde(serialize_with = "crate::util::hex::serialize")]
    pub nonce: Vec<u8>,
    pub key: KeyParams,
    pub serial: u64,
    /// 1 for user certificates, 2 for host certificates.
    pub purpose: u32,
    pub key_id: String,
    pub principals: Vec<String>,
    pub valid_after: u64,
    pub valid_before: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostKey {
    /// Key type named inside the blob.
    pub key_type: String,
    #[serde(serialize_with = "crate::util::serialize_base64")]
    pub blob: Vec<u8>,
    pub fingerprint_sha256: String,
    pub params: KeyParams,
}

impl HostKey {
    pub fn parse(blob: &[u8]) -> Result<Self, TransportError> {
        let mut r = Reader::new(blob);
        let key_type = r.utf8()?;
        let params = parse_params(&key_type, &mut r)?;
        Ok(Self {
            fingerprint_sha256: fingerprint_sha256(blob),
            key_type,
            blob: blob.to_vec(),
            params,
        })
    }
}

fn bit_len(magnitude: &[u8]) -> u64 {
    match magnitude.iter().position(|&b| b != 0) {
        Some(i) => {
            let lead = magnitude[i];
            ((magnitude.len() - i - 1) * 8) as u64 + u64::from(8 - lead.leading_zeros())
        }
        None => 0,
    }
}

fn parse_params(key_type: &str, r: &mut Reader<'_>) -> Result<KeyParams, TransportError> {
    if let Some(base) = key_type.strip_suffix(CERT_SUFFIX) {
        return parse_certificate(key_type, base, r);
    }
    Ok(match key_type {
        "ssh-ed25519" => KeyParams::Ed25519 {
            public_key: r.string()?.to_vec(),
        },
        t if t.starts_with("ecdsa-sha2-") => {
            let curve = r.utf8()?;
            if !t.ends_with(&curve) {
                return Err(TransportError::Malformed(format!(
                    "{t} key carries curve {curve}"
                )));
            }
            KeyParams::Ecdsa {
                curve,
                point: r.string()?.to_vec(),
            }
        }
        "ssh-rsa" => {
            let exponent = r.mpint()?.to_vec();
            let modulus = r.mpint()?.to_vec();
            KeyParams::Rsa {
                modulus_bits: bit_len(&modulus),
                modulus,
                exponent,
            }
        }
        "ssh-dss" => {
            let p = r.mpint()?;
            let q = r.mpint()?;
            r.mpint()?;
            r.mpint()?;
            KeyParams::Dsa {
                p_bits: bit_len(p),
                q_bits: bit_len(q),
            }
        }
        _ => KeyParams::Unknown,
    })
}

fn parse_certificate(
    cert_type: &str,
    base: &str,
    r: &mut Reader<'_>,
) -> Result<KeyParams, TransportError> {
    let nonce = r.string()?.to_vec();
    let key = parse_params(base, r)?;
    let serial = r.u64()?;
    let purpose = r.u32()?;
    let key_id = r.utf8()?;
    let mut principals = Vec::new();
    let mut names = Reader::new(r.string()?);
    while !names.is_empty() {
        principals.push(names.utf8()?);
    }
    let valid_after = r.u64()?;
    let valid_before = r.u64()?;
    Ok(KeyParams::Certificate(Box::new(Certificate {
        cert_type: cert_type.to_string(),
        nonce,
        key,
        serial,
        purpose,
        key_id,
        principals,
        valid_after,
        valid_before,
    })))
}

/// OpenSSH-style `SHA256:<unpadded base64>` fingerprint.
pub fn fingerprint_sha256(blob: &[u8]) -> String {
    let hash = digest::digest(&digest::SHA256, blob);
    format!("SHA256:{}", STANDARD_NO_PAD.encode(hash.as_ref()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureCheck {
    Verified,
    /// The algorithm or key size is outside what the verifier implements.
    Unchecked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeSignature {
    pub algorithm: String,
    #[serde(serialize_with = "crate::util::serialize_base64")]
    pub value: Vec<u8>,
    pub check: SignatureCheck,
}

/// Signature algorithm a negotiated host key algorithm signs with. Certificates sign with the
/// algorithm of their embedded key.
fn signature_algorithm(host_key_algorithm: &str) -> &str {
    host_key_algorithm
        .strip_suffix(CERT_SUFFIX)
        .unwrap_or(host_key_algorithm)
}

/// Checks the server's signature over the exchange hash. The signature must use the algorithm
/// negotiated for the host key. A signature that does not verify is an error; one the verifier
/// cannot evaluate is returned as [`SignatureCheck::Unchecked`].
pub fn verify_exchange(
    key: &HostKey,
    negotiated: &str,
    signature_blob: &[u8],
    exchange_hash: &[u8],
) -> Result<ExchangeSignature, TransportError> {
    let mut r = Reader::new(signature_blob);
    let algorithm = r.utf8()?;
    let value = r.string()?.to_vec();
    let expected = signature_algorithm(negotiated);
    if algorithm != expected {
        return Err(TransportError::Crypto(format!(
            "{algorithm} signature, negotiated {expected}"
        )));
    }
    let check = check_signature(&key.params, &algorithm, &value, exchange_hash)?;
    Ok(ExchangeSignature {
        algorithm,
        value,
        check,
    })
}

fn check_signature(
    params: &KeyParams,
    algorithm: &str,
    value: &[u8],
    message: &[u8],
) -> Result<SignatureCheck, TransportError> {
    let outcome = match (params, algorithm) {
        (KeyParams::Certificate(cert), _) => {
            return check_signature(&cert.key, algorithm, value, message)
        }
        (KeyParams::Ed25519 { public_key }, "ssh-ed25519") => {
            UnparsedPublicKey::new(&signature::ED25519, public_key).verify(message, value)
        }
        (KeyParams::Ecdsa { curve, point }, _) if algorithm == format!("ecdsa-sha2-{curve}") => {
            let (verifier, scalar_len) = match curve.as_str() {
                "nistp256" => (&signature::ECDSA_P256_SHA256_FIXED, 32),
                "nistp384" => (&signature::ECDSA_P384_SHA384_FIXED, 48),
                _ => return Ok(SignatureCheck::Unchecked),
            };
            let fixed = ecdsa_fixed(value, scalar_len)?;
            UnparsedPublicKey::new(verifier, point).verify(message, &fixed)
        }
        (
            KeyParams::Rsa {
                modulus_bits,
                modulus,
                exponent,
            },
            _,
        ) => {
            let scheme: &'static signature::RsaParameters = match algorithm {
                "ssh-rsa" => &signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY,
                "rsa-sha2-256" => &signature::RSA_PKCS1_2048_8192_SHA256,
                "rsa-sha2-512" => &signature::RSA_PKCS1_2048_8192_SHA512,
                other => {
                    return Err(TransportError::Crypto(format!(
                        "{other} signature from an RSA key"
                    )))
                }
            };
            if !(2048..=8192).contains(modulus_bits) {
                return Ok(SignatureCheck::Unchecked);
            }
            RsaPublicKeyComponents {
                n: modulus,
                e: exponent,
            }
            .verify(scheme, message, value)
        }
        (KeyParams::Dsa { .. }, "ssh-dss") | (KeyParams::Unknown, _) => {
            return Ok(SignatureCheck::Unchecked)
        }
        _ => {
            return Err(TransportError::Crypto(format!(
                "{algorithm} signature does not match the host key type"
            )))
        }
    };
    outcome
        .map(|_| SignatureCheck::Verified)
        .map_err(|_| TransportError::Crypto(format!("{algorithm} signature does not verify")))
}

/// Converts an SSH ECDSA signature (`mpint r || mpint s`) into the fixed-width `r || s`.
fn ecdsa_fixed(value: &[u8], scalar_len: usize) -> Result<Vec<u8>, TransportError> {
    let mut r = Reader::new(value);
    let mut out = vec![0u8; scalar_len * 2];
    for (i, scalar) in [r.mpint()?, r.mpint()?].into_iter().enumerate() {
        if scalar.len() > scalar_len {
            return Err(TransportError::Malformed("ecdsa scalar too long".into()));
        }
        let end = (i + 1) * scalar_len;
        out[end - scalar.len()..end].copy_from_slice(scalar);
    }
    Ok(out)
}
