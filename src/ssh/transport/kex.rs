//! Key exchange methods, the exchange hash and session key derivation (RFC 4253 §7-8,
//! RFC 4419, RFC 5656, RFC 8731).

use num_bigint::{BigUint, RandBigInt};
use p521::elliptic_curve::sec1::ToEncodedPoint;
use ring::agreement::{self, EphemeralPrivateKey, UnparsedPublicKey};
use ring::digest;
use ring::rand::SystemRandom;

use super::cipher::{CipherKind, MacKind};
use super::kexinit::{DirectionAlgorithms, Negotiated};
use super::packet::{DirectionKeys, Opener, Sealer};
use super::wire::Writer;
use super::{Role, TransportError};

/// Bits of private DH exponent. Twice the strength of the largest hash used is enough.
const DH_EXPONENT_BITS: u64 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KexMethod {
    Curve25519Sha256,
    Curve25519Sha256Libssh,
    EcdhNistp256,
    EcdhNistp384,
    EcdhNistp521,
    DhGroup1Sha1,
    DhGroup14Sha1,
    DhGroup14Sha256,
    DhGexSha1,
    DhGexSha256,
}

impl KexMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "curve25519-sha256" => KexMethod::Curve25519Sha256,
            "curve25519-sha256@libssh.org" => KexMethod::Curve25519Sha256Libssh,
            "ecdh-sha2-nistp256" => KexMethod::EcdhNistp256,
            "ecdh-sha2-nistp384" => KexMethod::EcdhNistp384,
            "ecdh-sha2-nistp521" => KexMethod::EcdhNistp521,
            "diffie-hellman-group1-sha1" => KexMethod::DhGroup1Sha1,
            "diffie-hellman-group14-sha1" => KexMethod::DhGroup14Sha1,
            "diffie-hellman-group14-sha256" => KexMethod::DhGroup14Sha256,
            "diffie-hellman-group-exchange-sha1" => KexMethod::DhGexSha1,
            "diffie-hellman-group-exchange-sha256" => KexMethod::DhGexSha256,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            KexMethod::Curve25519Sha256 => "curve25519-sha256",
            KexMethod::Curve25519Sha256Libssh => "curve25519-sha256@libssh.org",
            KexMethod::EcdhNistp256 => "ecdh-sha2-nistp256",
            KexMethod::EcdhNistp384 => "ecdh-sha2-nistp384",
            KexMethod::EcdhNistp521 => "ecdh-sha2-nistp521",
            KexMethod::DhGroup1Sha1 => "diffie-hellman-group1-sha1",
            KexMethod::DhGroup14Sha1 => "diffie-hellman-group14-sha1",
            KexMethod::DhGroup14Sha256 => "diffie-hellman-group14-sha256",
            KexMethod::DhGexSha1 => "diffie-hellman-group-exchange-sha1",
            KexMethod::DhGexSha256 => "diffie-hellman-group-exchange-sha256",
        }
    }

    pub fn hash(&self) -> &'static digest::Algorithm {
        match self {
            KexMethod::DhGroup1Sha1 | KexMethod::DhGroup14Sha1 | KexMethod::DhGexSha1 => {
                &digest::SHA1_FOR_LEGACY_USE_ONLY
            }
            KexMethod::EcdhNistp384 => &digest::SHA384,
            KexMethod::EcdhNistp521 => &digest::SHA512,
            _ => &digest::SHA256,
        }
    }

    pub fn is_group_exchange(&self) -> bool {
        matches!(self, KexMethod::DhGexSha1 | KexMethod::DhGexSha256)
    }

    /// Elliptic-curve methods exchange raw points instead of mpints.
    pub fn is_ecdh(&self) -> bool {
        self.ring_curve().is_some() || *self == KexMethod::EcdhNistp521
    }

    /// Curves ring implements. P-521 goes through the `p521` crate instead.
    fn ring_curve(&self) -> Option<&'static agreement::Algorithm> {
        match self {
            KexMethod::Curve25519Sha256 | KexMethod::Curve25519Sha256Libssh => {
                Some(&agreement::X25519)
            }
            KexMethod::EcdhNistp256 => Some(&agreement::ECDH_P256),
            KexMethod::EcdhNistp384 => Some(&agreement::ECDH_P384),
            _ => None,
        }
    }

    /// The fixed group for the non-negotiated DH methods.
    pub fn fixed_group(&self) -> Option<DhGroup> {
        match self {
            KexMethod::DhGroup1Sha1 => Some(DhGroup::oakley_group2()),
            KexMethod::DhGroup14Sha1 | KexMethod::DhGroup14Sha256 => Some(DhGroup::modp_group14()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhGroup {
    pub p: BigUint,
    pub g: BigUint,
}

impl DhGroup {
    /// RFC 2409 §6.2, used by diffie-hellman-group1-sha1.
    pub fn oakley_group2() -> Self {
        Self {
            p: BigUint::from_bytes_be(&GROUP1_PRIME),
            g: BigUint::from(2u32),
        }
    }

    /// RFC 3526 §3, used by the group14 methods.
    pub fn modp_group14() -> Self {
        Self {
            p: BigUint::from_bytes_be(&GROUP14_PRIME),
            g: BigUint::from(2u32),
        }
    }

    /// Builds a group received in SSH_MSG_KEX_DH_GEX_GROUP.
    pub fn from_magnitudes(p: &[u8], g: &[u8]) -> Result<Self, TransportError> {
        let group = Self {
            p: BigUint::from_bytes_be(p),
            g: BigUint::from_bytes_be(g),
        };
        if group.p.bits() < 512 || group.g <= BigUint::from(1u32) || group.g >= group.p {
            return Err(TransportError::Protocol(format!(
                "unusable group: {} bit prime, generator {}",
                group.p.bits(),
                group.g
            )));
        }
        Ok(group)
    }

    pub fn bits(&self) -> u64 {
        self.p.bits()
    }

    /// A public value must lie in `(1, p-1)`.
    fn check_public(&self, value: &BigUint) -> Result<(), TransportError> {
        let one = BigUint::from(1u32);
        if *value <= one || *value >= &self.p - &one {
            return Err(TransportError::Crypto(
                "diffie-hellman public value out of range".into(),
            ));
        }
        Ok(())
    }
}

/// One side's ephemeral key for a single exchange.
pub enum KeyShare {
    Ecdh {
        private: EphemeralPrivateKey,
        public: Vec<u8>,
    },
    Nistp521 {
        secret: p521::ecdh::EphemeralSecret,
        public: Vec<u8>,
    },
    Dh {
        group: DhGroup,
        x: BigUint,
        public: BigUint,
    },
}

impl KeyShare {
    pub fn ecdh(curve: &'static agreement::Algorithm) -> Result<Self, TransportError> {
        let rng = SystemRandom::new();
        let private = EphemeralPrivateKey::generate(curve, &rng)
            .map_err(|_| TransportError::Crypto("failed to generate ephemeral key".into()))?;
        let public = private
            .compute_public_key()
            .map_err(|_| TransportError::Crypto("failed to compute public key".into()))?
            .as_ref()
            .to_vec();
        Ok(KeyShare::Ecdh { private, public })
    }

    pub fn nistp521() -> Self {
        let secret = p521::ecdh::EphemeralSecret::random(&mut rand::rngs::OsRng);
        let public = secret
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        KeyShare::Nistp521 { secret, public }
    }

    pub fn dh(group: DhGroup) -> Self {
        let mut rng = rand::thread_rng();
        let bits = DH_EXPONENT_BITS.min(group.bits().saturating_sub(1));
        let mut x = rng.gen_biguint(bits);
        while x <= BigUint::from(1u32) {
            x = rng.gen_biguint(bits);
        }
        let public = group.g.modpow(&x, &group.p);
        KeyShare::Dh { group, x, public }
    }

    /// Ephemeral share for a method with a fixed group or curve.
    pub fn for_method(method: KexMethod) -> Result<Self, TransportError> {
        if method == KexMethod::EcdhNistp521 {
            return Ok(Self::nistp521());
        }
        if let Some(curve) = method.ring_curve() {
            return Self::ecdh(curve);
        }
        method.fixed_group().map(Self::dh).ok_or_else(|| {
            TransportError::Protocol(format!("{} needs a negotiated group", method.name()))
        })
    }

    /// The value sent to the peer: a raw point for ECDH, the big-endian magnitude for DH.
    pub fn public(&self) -> Vec<u8> {
        match self {
            KeyShare::Ecdh { public, .. } | KeyShare::Nistp521 { public, .. } => public.clone(),
            KeyShare::Dh { public, .. } => public.to_bytes_be(),
        }
    }

    /// Writes our public value the way the method frames it on the wire.
    pub fn put_public(&self, w: &mut Writer) {
        match self {
            KeyShare::Ecdh { public, .. } | KeyShare::Nistp521 { public, .. } => {
                w.put_string(public)
            }
            KeyShare::Dh { public, .. } => w.put_mpint(&public.to_bytes_be()),
        };
    }

    /// Combines with the peer's public value into the shared secret K as an unsigned magnitude.
    pub fn agree(self, peer: &[u8]) -> Result<Vec<u8>, TransportError> {
        match self {
            KeyShare::Ecdh { private, .. } => {
                let curve = private.algorithm();
                agreement::agree_ephemeral(
                    private,
                    &UnparsedPublicKey::new(curve, peer),
                    |secret| secret.to_vec(),
                )
                .map_err(|_| TransportError::Crypto("key agreement failed".into()))
            }
            KeyShare::Nistp521 { secret, .. } => {
                let peer = p521::PublicKey::from_sec1_bytes(peer)
                    .map_err(|_| TransportError::Crypto("invalid nistp521 point".into()))?;
                Ok(secret.diffie_hellman(&peer).raw_secret_bytes().to_vec())
            }
            KeyShare::Dh { group, x, .. } => {
                let peer = BigUint::from_bytes_be(peer);
                group.check_public(&peer)?;
                Ok(peer.modpow(&x, &group.p).to_bytes_be())
            }
        }
    }
}

/// Group-exchange request bounds as sent in SSH_MSG_KEX_DH_GEX_REQUEST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GexRequest {
    pub min: u32,
    pub preferred: u32,
    pub max: u32,
}

/// Incrementally assembled input to the exchange hash H.
pub struct ExchangeHash {
    hash: &'static digest::Algorithm,
    buf: Writer,
}

impl ExchangeHash {
    pub fn new(
        method: KexMethod,
        client_ident: &[u8],
        server_ident: &[u8],
        client_kexinit: &[u8],
        server_kexinit: &[u8],
        host_key: &[u8],
    ) -> Self {
        let mut buf = Writer::new();
        buf.put_string(client_ident)
            .put_string(server_ident)
            .put_string(client_kexinit)
            .put_string(server_kexinit)
            .put_string(host_key);
        Self {
            hash: method.hash(),
            buf,
        }
    }

    pub fn group_exchange(&mut self, request: GexRequest, group: &DhGroup) -> &mut Self {
        self.buf
            .put_u32(request.min)
            .put_u32(request.preferred)
            .put_u32(request.max)
            .put_mpint(&group.p.to_bytes_be())
            .put_mpint(&group.g.to_bytes_be());
        self
    }

    /// Public values as they appeared on the wire: strings for ECDH, mpints for DH.
    pub fn public_values(&mut self, method: KexMethod, client: &[u8], server: &[u8]) -> &mut Self {
        if method.is_ecdh() {
            self.buf.put_string(client).put_string(server);
        } else {
            self.buf.put_mpint(client).put_mpint(server);
        }
        self
    }

    pub fn finish(mut self, shared_secret: &[u8]) -> Vec<u8> {
        self.buf.put_mpint(shared_secret);
        digest::digest(self.hash, self.buf.as_bytes())
            .as_ref()
            .to_vec()
    }
}

/// Shared secret and exchange hash of a completed exchange.
pub struct SessionSecrets<'a> {
    pub method: KexMethod,
    pub shared_secret: &'a [u8],
    pub exchange_hash: &'a [u8],
    pub session_id: &'a [u8],
}

impl SessionSecrets<'_> {
    /// RFC 4253 §7.2: `K1 = HASH(K || H || letter || session_id)`, extended by
    /// `Kn = HASH(K || H || K1 || ... || Kn-1)` until `len` bytes are available.
    pub fn derive(&self, letter: u8, len: usize) -> Vec<u8> {
        let alg = self.method.hash();
        let mut k = Writer::new();
        k.put_mpint(self.shared_secret);

        let mut ctx = digest::Context::new(alg);
        ctx.update(k.as_bytes());
        ctx.update(self.exchange_hash);
        ctx.update(&[letter]);
        ctx.update(self.session_id);
        let mut out = ctx.finish().as_ref().to_vec();

        while out.len() < len {
            let mut ctx = digest::Context::new(alg);
            ctx.update(k.as_bytes());
            ctx.update(self.exchange_hash);
            ctx.update(&out);
            out.extend_from_slice(ctx.finish().as_ref());
        }
        out.truncate(len);
        out
    }

    /// Derives both directions and hands back the protection for our side.
    pub fn protection(
        &self,
        negotiated: &Negotiated,
        role: Role,
    ) -> Result<(Sealer, Opener), TransportError> {
        let c2s = self.direction(&negotiated.client_to_server, b'A', b'C', b'E')?;
        let s2c = self.direction(&negotiated.server_to_client, b'B', b'D', b'F')?;
        let (outgoing, incoming) = match role {
            Role::Client => (c2s, s2c),
            Role::Server => (s2c, c2s),
        };
        Ok((Sealer::new(&outgoing.keys())?, Opener::new(&incoming.keys())?))
    }

    fn direction(
        &self,
        algorithms: &DirectionAlgorithms,
        iv_letter: u8,
        key_letter: u8,
        mac_letter: u8,
    ) -> Result<DerivedDirection, TransportError> {
        let cipher = CipherKind::from_name(&algorithms.cipher).ok_or_else(|| {
            TransportError::Crypto(format!("cipher {} is not implemented", algorithms.cipher))
        })?;
        let mac = match &algorithms.mac {
            Some(name) => Some(MacKind::from_name(name).ok_or_else(|| {
                TransportError::Crypto(format!("mac {name} is not implemented"))
            })?),
            None => None,
        };
        Ok(DerivedDirection {
            cipher,
            mac,
            iv: self.derive(iv_letter, cipher.iv_len()),
            key: self.derive(key_letter, cipher.key_len()),
            mac_key: mac.map(|m| self.derive(mac_letter, m.key_len())).unwrap_or_default(),
        })
    }
}

struct DerivedDirection {
    cipher: CipherKind,
    mac: Option<MacKind>,
    iv: Vec<u8>,
    key: Vec<u8>,
    mac_key: Vec<u8>,
}

impl DerivedDirection {
    fn keys(&self) -> DirectionKeys<'_> {
        DirectionKeys {
            cipher: self.cipher,
            mac: self.mac,
            key: &self.key,
            iv: &self.iv,
            mac_key: &self.mac_key,
        }
    }
}

const GROUP1_PRIME: [u8; 128] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xc9, 0x0f, 0xda, 0xa2,
    0x21, 0x68, 0xc2, 0x34, 0xc4, 0xc6, 0x62, 0x8b, 0x80, 0xdc, 0x1c, 0xd1,
    0x29, 0x02, 0x4e, 0x08, 0x8a, 0x67, 0xcc, 0x74, 0x02, 0x0b, 0xbe, 0xa6,
    0x3b, 0x13, 0x9b, 0x22, 0x51, 0x4a, 0x08, 0x79, 0x8e, 0x34, 0x04, 0xdd,
    0xef, 0x95, 0x19, 0xb3, 0xcd, 0x3a, 0x43, 0x1b, 0x30, 0x2b, 0x0a, 0x6d,
    0xf2, 0x5f, 0x14, 0x37, 0x4f, 0xe1, 0x35, 0x6d, 0x6d, 0x51, 0xc2, 0x45,
    0xe4, 0x85, 0xb5, 0x76, 0x62, 0x5e, 0x7e, 0xc6, 0xf4, 0x4c, 0x42, 0xe9,
    0xa6, 0x37, 0xed, 0x6b, 0x0b, 0xff, 0x5c, 0xb6, 0xf4, 0x06, 0xb7, 0xed,
    0xee, 0x38, 0x6b, 0xfb, 0x5a, 0x89, 0x9f, 0xa5, 0xae, 0x9f, 0x24, 0x11,
    0x7c, 0x4b, 0x1f, 0xe6, 0x49, 0x28, 0x66, 0x51, 0xec, 0xe6, 0x53, 0x81,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
];

const GROUP14_PRIME: [u8; 256] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xc9, 0x0f, 0xda, 0xa2,
    0x21, 0x68, 0xc2, 0x34, 0xc4, 0xc6, 0x62, 0x8b, 0x80, 0xdc, 0x1c, 0xd1,
    0x29, 0x02, 0x4e, 0x08, 0x8a, 0x67, 0xcc, 0x74, 0x02, 0x0b, 0xbe, 0xa6,
    0x3b, 0x13, 0x9b, 0x22, 0x51, 0x4a, 0x08, 0x79, 0x8e, 0x34, 0x04, 0xdd,
    0xef, 0x95, 0x19, 0xb3, 0xcd, 0x3a, 0x43, 0x1b, 0x30, 0x2b, 0x0a, 0x6d,
    0xf2, 0x5f, 0x14, 0x37, 0x4f, 0xe1, 0x35, 0x6d, 0x6d, 0x51, 0xc2, 0x45,
    0xe4, 0x85, 0xb5, 0x76, 0x62, 0x5e, 0x7e, 0xc6, 0xf4, 0x4c, 0x42, 0xe9,
    0xa6, 0x37, 0xed, 0x6b, 0x0b, 0xff, 0x5c, 0xb6, 0xf4, 0x06, 0xb7, 0xed,
    0xee, 0x38, 0x6b, 0xfb, 0x5a, 0x89, 0x9f, 0xa5, 0xae, 0x9f, 0x24, 0x11,
    0x7c, 0x4b, 0x1f, 0xe6, 0x49, 0x28, 0x66, 0x51, 0xec, 0xe4, 0x5b, 0x3d,
    0xc2, 0x00, 0x7c, 0xb8, 0xa1, 0x63, 0xbf, 0x05, 0x98, 0xda, 0x48, 0x36,
    0x1c, 0x55, 0xd3, 0x9a, 0x69, 0x16, 0x3f, 0xa8, 0xfd, 0x24, 0xcf, 0x5f,
    0x83, 0x65, 0x5d, 0x23, 0xdc, 0xa3, 0xad, 0x96, 0x1c, 0x62, 0xf3, 0x56,
    0x20, 0x85, 0x52, 0xbb, 0x9e, 0xd5, 0x29, 0x07, 0x70, 0x96, 0x96, 0x6d,
    0x67, 0x0c, 0x35, 0x4e, 0x4a, 0xbc, 0x98, 0x04, 0xf1, 0x74, 0x6c, 0x08,
    0xca, 0x18, 0x21, 0x7c, 0x32, 0x90, 0x5e, 0x46, 0x2e, 0x36, 0xce, 0x3b,
    0xe3, 0x9e, 0x77, 0x2c, 0x18, 0x0e, 0x86, 0x03, 0x9b, 0x27, 0x83, 0xa2,
    0xec, 0x07, 0xa2, 0x8f, 0xb5, 0xc5, 0x5d, 0xf0, 0x6f, 0x4c, 0x52, 0xc9,
    0xde, 0x2b, 0xcb, 0xf6, 0x95, 0x58, 0x17, 0x18, 0x39, 0x95, 0x49, 0x7c,
    0xea, 0x95, 0x6a, 0xe5, 0x15, 0xd2, 0x26, 0x18, 0x98, 0xfa, 0x05, 0x10,
    0x15, 0x72, 0x8e, 0x5a, 0x8a, 0xac, 0xaa, 0x68, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff,
];
