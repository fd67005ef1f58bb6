//! Cipher and MAC algorithm descriptors.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    ChaCha20Poly1305,
    Aes128Gcm,
    Aes256Gcm,
    Aes128Ctr,
    Aes192Ctr,
    Aes256Ctr,
    Aes128Cbc,
    TripleDesCbc,
    Arcfour,
    Arcfour128,
    Arcfour256,
}

impl CipherKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "chacha20-poly1305@openssh.com" => Some(CipherKind::ChaCha20Poly1305),
            "aes128-gcm@openssh.com" => Some(CipherKind::Aes128Gcm),
            "aes256-gcm@openssh.com" => Some(CipherKind::Aes256Gcm),
            "aes128-ctr" => Some(CipherKind::Aes128Ctr),
            "aes192-ctr" => Some(CipherKind::Aes192Ctr),
            "aes256-ctr" => Some(CipherKind::Aes256Ctr),
            "aes128-cbc" => Some(CipherKind::Aes128Cbc),
            "3des-cbc" => Some(CipherKind::TripleDesCbc),
            "arcfour" => Some(CipherKind::Arcfour),
            "arcfour128" => Some(CipherKind::Arcfour128),
            "arcfour256" => Some(CipherKind::Arcfour256),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CipherKind::ChaCha20Poly1305 => "chacha20-poly1305@openssh.com",
            CipherKind::Aes128Gcm => "aes128-gcm@openssh.com",
            CipherKind::Aes256Gcm => "aes256-gcm@openssh.com",
            CipherKind::Aes128Ctr => "aes128-ctr",
            CipherKind::Aes192Ctr => "aes192-ctr",
            CipherKind::Aes256Ctr => "aes256-ctr",
            CipherKind::Aes128Cbc => "aes128-cbc",
            CipherKind::TripleDesCbc => "3des-cbc",
            CipherKind::Arcfour => "arcfour",
            CipherKind::Arcfour128 => "arcfour128",
            CipherKind::Arcfour256 => "arcfour256",
        }
    }

    /// Bytes of derived key material. The OpenSSH ChaCha20 construction takes two 256-bit keys.
    pub fn key_len(&self) -> usize {
        match self {
            CipherKind::ChaCha20Poly1305 => 64,
            CipherKind::Aes128Gcm
            | CipherKind::Aes128Ctr
            | CipherKind::Aes128Cbc
            | CipherKind::Arcfour
            | CipherKind::Arcfour128 => 16,
            CipherKind::Aes192Ctr | CipherKind::TripleDesCbc => 24,
            CipherKind::Aes256Gcm | CipherKind::Aes256Ctr | CipherKind::Arcfour256 => 32,
        }
    }

    pub fn iv_len(&self) -> usize {
        match self {
            CipherKind::ChaCha20Poly1305
            | CipherKind::Arcfour
            | CipherKind::Arcfour128
            | CipherKind::Arcfour256 => 0,
            CipherKind::Aes128Gcm | CipherKind::Aes256Gcm => 12,
            CipherKind::TripleDesCbc => 8,
            CipherKind::Aes128Ctr
            | CipherKind::Aes192Ctr
            | CipherKind::Aes256Ctr
            | CipherKind::Aes128Cbc => 16,
        }
    }

    /// Cipher block size, which packets on the wire are a multiple of. Stream ciphers use 8.
    pub fn block_len(&self) -> usize {
        match self {
            CipherKind::ChaCha20Poly1305
            | CipherKind::TripleDesCbc
            | CipherKind::Arcfour
            | CipherKind::Arcfour128
            | CipherKind::Arcfour256 => 8,
            _ => 16,
        }
    }

    /// Keystream bytes thrown away after keying (RFC 4345).
    pub fn rc4_discard(&self) -> usize {
        match self {
            CipherKind::Arcfour128 | CipherKind::Arcfour256 => 1536,
            _ => 0,
        }
    }

    /// AEAD ciphers carry their own tag and make the negotiated MAC irrelevant.
    pub fn is_aead(&self) -> bool {
        matches!(
            self,
            CipherKind::ChaCha20Poly1305 | CipherKind::Aes128Gcm | CipherKind::Aes256Gcm
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacKind {
    HmacSha1,
    HmacSha1_96,
    HmacSha256,
    HmacSha512,
    HmacSha1Etm,
    HmacSha256Etm,
    HmacSha512Etm,
}

impl MacKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "hmac-sha1" => Some(MacKind::HmacSha1),
            "hmac-sha1-96" => Some(MacKind::HmacSha1_96),
            "hmac-sha2-256" => Some(MacKind::HmacSha256),
            "hmac-sha2-512" => Some(MacKind::HmacSha512),
            "hmac-sha1-etm@openssh.com" => Some(MacKind::HmacSha1Etm),
            "hmac-sha2-256-etm@openssh.com" => Some(MacKind::HmacSha256Etm),
            "hmac-sha2-512-etm@openssh.com" => Some(MacKind::HmacSha512Etm),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MacKind::HmacSha1 => "hmac-sha1",
            MacKind::HmacSha1_96 => "hmac-sha1-96",
            MacKind::HmacSha256 => "hmac-sha2-256",
            MacKind::HmacSha512 => "hmac-sha2-512",
            MacKind::HmacSha1Etm => "hmac-sha1-etm@openssh.com",
            MacKind::HmacSha256Etm => "hmac-sha2-256-etm@openssh.com",
            MacKind::HmacSha512Etm => "hmac-sha2-512-etm@openssh.com",
        }
    }

    pub fn algorithm(&self) -> ring::hmac::Algorithm {
        match self {
            MacKind::HmacSha1 | MacKind::HmacSha1_96 | MacKind::HmacSha1Etm => {
                ring::hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY
            }
            MacKind::HmacSha256 | MacKind::HmacSha256Etm => ring::hmac::HMAC_SHA256,
            MacKind::HmacSha512 | MacKind::HmacSha512Etm => ring::hmac::HMAC_SHA512,
        }
    }

    pub fn key_len(&self) -> usize {
        match self {
            MacKind::HmacSha1 | MacKind::HmacSha1_96 | MacKind::HmacSha1Etm => 20,
            MacKind::HmacSha256 | MacKind::HmacSha256Etm => 32,
            MacKind::HmacSha512 | MacKind::HmacSha512Etm => 64,
        }
    }

    /// Bytes of tag placed on the wire.
    pub fn tag_len(&self) -> usize {
        match self {
            MacKind::HmacSha1_96 => 12,
            _ => self.key_len(),
        }
    }

    /// Encrypt-then-MAC: the length field stays in clear and the tag covers ciphertext.
    pub fn is_etm(&self) -> bool {
        matches!(
            self,
            MacKind::HmacSha1Etm | MacKind::HmacSha256Etm | MacKind::HmacSha512Etm
        )
    }
}
