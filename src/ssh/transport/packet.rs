//! Binary packet protocol (RFC 4253 §6) and the per-direction protection applied after
//! NEWKEYS.

use aes::{Aes128, Aes192, Aes256};
use ctr::cipher::consts::{U16, U32};
use ctr::cipher::generic_array::GenericArray;
use ctr::cipher::{
    BlockDecryptMut, BlockEncryptMut, BlockSizeUser, KeyInit, KeyIvInit, StreamCipher,
};
use ctr::Ctr128BE;
use des::TdesEde3;
use rand::RngCore;
use rc4::Rc4;
use ring::aead::chacha20_poly1305_openssh as chacha;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_128_GCM, AES_256_GCM};
use ring::hmac;
use subtle::ConstantTimeEq;

use super::cipher::{CipherKind, MacKind};
use super::TransportError;

const MIN_PADDING: usize = 4;
const PLAIN_BLOCK: usize = 8;
const GCM_TAG_LEN: usize = 16;

/// Key material for one direction, cut to the sizes of the negotiated algorithms.
pub struct DirectionKeys<'a> {
    pub cipher: CipherKind,
    pub mac: Option<MacKind>,
    pub key: &'a [u8],
    pub iv: &'a [u8],
    pub mac_key: &'a [u8],
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Encrypt,
    Decrypt,
}

/// Ciphers that need a separate MAC. CBC keeps chaining state per direction, so it has a
/// variant for each.
enum PacketCipher {
    Aes128Ctr(Ctr128BE<Aes128>),
    Aes192Ctr(Ctr128BE<Aes192>),
    Aes256Ctr(Ctr128BE<Aes256>),
    Aes128CbcEnc(cbc::Encryptor<Aes128>),
    Aes128CbcDec(cbc::Decryptor<Aes128>),
    TdesCbcEnc(cbc::Encryptor<TdesEde3>),
    TdesCbcDec(cbc::Decryptor<TdesEde3>),
    Rc4Short(Rc4<U16>),
    Rc4Long(Rc4<U32>),
}

impl PacketCipher {
    fn new(kind: CipherKind, key: &[u8], iv: &[u8], mode: Mode) -> Result<Self, TransportError> {
        let bad_len =
            |_| TransportError::Crypto(format!("{} key or iv has the wrong length", kind.name()));
        let mut cipher = match (kind, mode) {
            (CipherKind::Aes128Ctr, _) => {
                PacketCipher::Aes128Ctr(Ctr128BE::new_from_slices(key, iv).map_err(bad_len)?)
            }
            (CipherKind::Aes192Ctr, _) => {
                PacketCipher::Aes192Ctr(Ctr128BE::new_from_slices(key, iv).map_err(bad_len)?)
            }
            (CipherKind::Aes256Ctr, _) => {
                PacketCipher::Aes256Ctr(Ctr128BE::new_from_slices(key, iv).map_err(bad_len)?)
            }
            (CipherKind::Aes128Cbc, Mode::Encrypt) => PacketCipher::Aes128CbcEnc(
                cbc::Encryptor::new_from_slices(key, iv).map_err(bad_len)?,
            ),
            (CipherKind::Aes128Cbc, Mode::Decrypt) => PacketCipher::Aes128CbcDec(
                cbc::Decryptor::new_from_slices(key, iv).map_err(bad_len)?,
            ),
            (CipherKind::TripleDesCbc, Mode::Encrypt) => PacketCipher::TdesCbcEnc(
                cbc::Encryptor::new_from_slices(key, iv).map_err(bad_len)?,
            ),
            (CipherKind::TripleDesCbc, Mode::Decrypt) => PacketCipher::TdesCbcDec(
                cbc::Decryptor::new_from_slices(key, iv).map_err(bad_len)?,
            ),
            (CipherKind::Arcfour | CipherKind::Arcfour128, _) => {
                PacketCipher::Rc4Short(Rc4::new_from_slice(key).map_err(bad_len)?)
            }
            (CipherKind::Arcfour256, _) => {
                PacketCipher::Rc4Long(Rc4::new_from_slice(key).map_err(bad_len)?)
            }
            (other, _) => {
                return Err(TransportError::Crypto(format!(
                    "{} carries its own authentication",
                    other.name()
                )))
            }
        };
        let mut discard = vec![0u8; kind.rc4_discard()];
        cipher.apply(&mut discard)?;
        Ok(cipher)
    }

    fn block_len(&self) -> usize {
        match self {
            PacketCipher::TdesCbcEnc(_)
            | PacketCipher::TdesCbcDec(_)
            | PacketCipher::Rc4Short(_)
            | PacketCipher::Rc4Long(_) => 8,
            _ => 16,
        }
    }

    /// Encrypts or decrypts `data` in place, continuing from the previous call.
    fn apply(&mut self, data: &mut [u8]) -> Result<(), TransportError> {
        match self {
            PacketCipher::Aes128Ctr(c) => c.apply_keystream(data),
            PacketCipher::Aes192Ctr(c) => c.apply_keystream(data),
            PacketCipher::Aes256Ctr(c) => c.apply_keystream(data),
            PacketCipher::Aes128CbcEnc(c) => cbc_encrypt(c, data)?,
            PacketCipher::Aes128CbcDec(c) => cbc_decrypt(c, data)?,
            PacketCipher::TdesCbcEnc(c) => cbc_encrypt(c, data)?,
            PacketCipher::TdesCbcDec(c) => cbc_decrypt(c, data)?,
            PacketCipher::Rc4Short(c) => c.apply_keystream(data),
            PacketCipher::Rc4Long(c) => c.apply_keystream(data),
        }
        Ok(())
    }
}

fn whole_blocks(len: usize, block: usize) -> Result<(), TransportError> {
    if len % block != 0 {
        return Err(TransportError::Malformed(format!(
            "{len} bytes is not a multiple of the {block}-byte cipher block"
        )));
    }
    Ok(())
}

fn cbc_encrypt<C: BlockEncryptMut>(cipher: &mut C, data: &mut [u8]) -> Result<(), TransportError> {
    let block = <C as BlockSizeUser>::block_size();
    whole_blocks(data.len(), block)?;
    for chunk in data.chunks_exact_mut(block) {
        cipher.encrypt_block_mut(GenericArray::from_mut_slice(chunk));
    }
    Ok(())
}

fn cbc_decrypt<C: BlockDecryptMut>(cipher: &mut C, data: &mut [u8]) -> Result<(), TransportError> {
    let block = <C as BlockSizeUser>::block_size();
    whole_blocks(data.len(), block)?;
    for chunk in data.chunks_exact_mut(block) {
        cipher.decrypt_block_mut(GenericArray::from_mut_slice(chunk));
    }
    Ok(())
}

struct PacketMac {
    kind: MacKind,
    key: hmac::Key,
}

impl PacketMac {
    fn new(kind: MacKind, key: &[u8]) -> Result<Self, TransportError> {
        if key.len() < kind.key_len() {
            return Err(TransportError::Crypto(format!(
                "{} needs {} bytes of key",
                kind.name(),
                kind.key_len()
            )));
        }
        Ok(Self {
            kind,
            key: hmac::Key::new(kind.algorithm(), &key[..kind.key_len()]),
        })
    }

    fn compute(&self, seq: u32, data: &[u8]) -> Vec<u8> {
        let mut ctx = hmac::Context::with_key(&self.key);
        ctx.update(&seq.to_be_bytes());
        ctx.update(data);
        let tag = ctx.sign();
        tag.as_ref()[..self.kind.tag_len()].to_vec()
    }

    fn verify(&self, seq: u32, data: &[u8], received: &[u8]) -> Result<(), TransportError> {
        let expected = self.compute(seq, data);
        if expected.len() == received.len() && bool::from(expected.ct_eq(received)) {
            Ok(())
        } else {
            Err(TransportError::Crypto("packet MAC mismatch".into()))
        }
    }
}

/// AES-GCM as profiled by RFC 5647: the fixed 4-byte prefix of the IV stays, the trailing
/// 64-bit invocation counter increments per packet.
struct GcmState {
    key: LessSafeKey,
    iv: [u8; 12],
}

impl GcmState {
    fn new(kind: CipherKind, key: &[u8], iv: &[u8]) -> Result<Self, TransportError> {
        let alg = match kind {
            CipherKind::Aes128Gcm => &AES_128_GCM,
            CipherKind::Aes256Gcm => &AES_256_GCM,
            other => {
                return Err(TransportError::Crypto(format!(
                    "{} is not an aes-gcm cipher",
                    other.name()
                )))
            }
        };
        let unbound = UnboundKey::new(alg, key)
            .map_err(|_| TransportError::Crypto("aes-gcm key has the wrong length".into()))?;
        let iv: [u8; 12] = iv
            .try_into()
            .map_err(|_| TransportError::Crypto("aes-gcm iv has the wrong length".into()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            iv,
        })
    }

    fn next_nonce(&mut self) -> Nonce {
        let nonce = Nonce::assume_unique_for_key(self.iv);
        let mut counter = [0u8; 8];
        counter.copy_from_slice(&self.iv[4..]);
        let next = u64::from_be_bytes(counter).wrapping_add(1);
        self.iv[4..].copy_from_slice(&next.to_be_bytes());
        nonce
    }
}

fn chacha_key(key: &[u8]) -> Result<&[u8; chacha::KEY_LEN], TransportError> {
    key.try_into()
        .map_err(|_| TransportError::Crypto("chacha20-poly1305 key has the wrong length".into()))
}

/// Outgoing packet protection.
pub struct Sealer(SealState);

/// Incoming packet protection.
pub struct Opener(OpenState);

enum SealState {
    Plain,
    Mac { cipher: PacketCipher, mac: PacketMac },
    Gcm(GcmState),
    ChaCha(Box<chacha::SealingKey>),
}

enum OpenState {
    Plain,
    Mac {
        cipher: PacketCipher,
        mac: PacketMac,
        /// First decrypted block, kept between reading the length and the rest.
        head: Vec<u8>,
    },
    Gcm(GcmState),
    ChaCha(Box<chacha::OpeningKey>),
}

fn mac_for(keys: &DirectionKeys<'_>) -> Result<PacketMac, TransportError> {
    let kind = keys.mac.ok_or_else(|| {
        TransportError::Crypto(format!("{} requires a MAC algorithm", keys.cipher.name()))
    })?;
    PacketMac::new(kind, keys.mac_key)
}

impl Sealer {
    /// Framing used before the first NEWKEYS.
    pub fn plain() -> Self {
        Sealer(SealState::Plain)
    }

    pub fn new(keys: &DirectionKeys<'_>) -> Result<Self, TransportError> {
        let state = match keys.cipher {
            CipherKind::ChaCha20Poly1305 => {
                SealState::ChaCha(Box::new(chacha::SealingKey::new(chacha_key(keys.key)?)))
            }
            CipherKind::Aes128Gcm | CipherKind::Aes256Gcm => {
                SealState::Gcm(GcmState::new(keys.cipher, keys.key, keys.iv)?)
            }
            _ => SealState::Mac {
                cipher: PacketCipher::new(keys.cipher, keys.key, keys.iv, Mode::Encrypt)?,
                mac: mac_for(keys)?,
            },
        };
        Ok(Sealer(state))
    }

    fn block_len(&self) -> usize {
        match &self.0 {
            SealState::Plain | SealState::ChaCha(_) => PLAIN_BLOCK,
            SealState::Mac { cipher, .. } => cipher.block_len(),
            SealState::Gcm(_) => 16,
        }
    }

    /// Whether the 4-byte length field is left out of the padding alignment.
    fn length_excluded(&self) -> bool {
        match &self.0 {
            SealState::Plain => false,
            SealState::Mac { mac, .. } => mac.kind.is_etm(),
            SealState::Gcm(_) | SealState::ChaCha(_) => true,
        }
    }

    pub fn seal(&mut self, seq: u32, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
        let block = self.block_len();
        let aligned = if self.length_excluded() { 1 } else { 5 } + payload.len();
        let mut padding = block - aligned % block;
        if padding < MIN_PADDING {
            padding += block;
        }
        let packet_len = 1 + payload.len() + padding;

        let mut buf = Vec::with_capacity(4 + packet_len + 64);
        buf.extend_from_slice(&(packet_len as u32).to_be_bytes());
        buf.push(padding as u8);
        buf.extend_from_slice(payload);
        let mut pad = vec![0u8; padding];
        rand::thread_rng().fill_bytes(&mut pad);
        buf.extend_from_slice(&pad);

        match &mut self.0 {
            SealState::Plain => {}
            SealState::Mac { cipher, mac } => {
                if mac.kind.is_etm() {
                    cipher.apply(&mut buf[4..])?;
                    let tag = mac.compute(seq, &buf);
                    buf.extend_from_slice(&tag);
                } else {
                    let tag = mac.compute(seq, &buf);
                    cipher.apply(&mut buf)?;
                    buf.extend_from_slice(&tag);
                }
            }
            SealState::Gcm(state) => {
                let len_field = [buf[0], buf[1], buf[2], buf[3]];
                let nonce = state.next_nonce();
                let tag = state
                    .key
                    .seal_in_place_separate_tag(nonce, Aad::from(len_field), &mut buf[4..])
                    .map_err(|_| TransportError::Crypto("aes-gcm seal failed".into()))?;
                buf.extend_from_slice(tag.as_ref());
            }
            SealState::ChaCha(key) => {
                let mut tag = [0u8; chacha::TAG_LEN];
                key.seal_in_place(seq, &mut buf, &mut tag);
                buf.extend_from_slice(&tag);
            }
        }
        Ok(buf)
    }
}

impl Opener {
    /// Framing used before the first NEWKEYS.
    pub fn plain() -> Self {
        Opener(OpenState::Plain)
    }

    pub fn new(keys: &DirectionKeys<'_>) -> Result<Self, TransportError> {
        let state = match keys.cipher {
            CipherKind::ChaCha20Poly1305 => {
                OpenState::ChaCha(Box::new(chacha::OpeningKey::new(chacha_key(keys.key)?)))
            }
            CipherKind::Aes128Gcm | CipherKind::Aes256Gcm => {
                OpenState::Gcm(GcmState::new(keys.cipher, keys.key, keys.iv)?)
            }
            _ => OpenState::Mac {
                cipher: PacketCipher::new(keys.cipher, keys.key, keys.iv, Mode::Decrypt)?,
                mac: mac_for(keys)?,
                head: Vec::new(),
            },
        };
        Ok(Opener(state))
    }

    /// Bytes needed before the packet length can be known.
    pub fn head_len(&self) -> usize {
        match &self.0 {
            OpenState::Mac { mac, .. } if !mac.kind.is_etm() => 16,
            _ => 4,
        }
    }

    /// Bytes that follow the packet body on the wire (MAC or AEAD tag).
    pub fn trailer_len(&self) -> usize {
        match &self.0 {
            OpenState::Plain => 0,
            OpenState::Mac { mac, .. } => mac.kind.tag_len(),
            OpenState::Gcm(_) => GCM_TAG_LEN,
            OpenState::ChaCha(_) => chacha::TAG_LEN,
        }
    }

    /// Decodes the packet length from the first `head_len()` bytes.
    pub fn packet_length(&mut self, seq: u32, head: &[u8]) -> Result<usize, TransportError> {
        let len_bytes: [u8; 4] = match &mut self.0 {
            OpenState::Plain | OpenState::Gcm(_) => [head[0], head[1], head[2], head[3]],
            OpenState::Mac {
                cipher,
                mac,
                head: stash,
            } => {
                if mac.kind.is_etm() {
                    [head[0], head[1], head[2], head[3]]
                } else {
                    let mut block = head.to_vec();
                    cipher.apply(&mut block)?;
                    let len = [block[0], block[1], block[2], block[3]];
                    *stash = block;
                    len
                }
            }
            OpenState::ChaCha(key) => {
                key.decrypt_packet_length(seq, [head[0], head[1], head[2], head[3]])
            }
        };
        Ok(u32::from_be_bytes(len_bytes) as usize)
    }

    /// Authenticates and decrypts a complete wire packet and returns its payload.
    pub fn open(&mut self, seq: u32, packet: &mut [u8]) -> Result<Vec<u8>, TransportError> {
        let body_end = packet.len() - self.trailer_len();
        let body: Vec<u8> = match &mut self.0 {
            OpenState::Plain => packet[4..].to_vec(),
            OpenState::Mac { cipher, mac, head } => {
                let (wire, tag) = packet.split_at_mut(body_end);
                if mac.kind.is_etm() {
                    mac.verify(seq, wire, tag)?;
                    cipher.apply(&mut wire[4..])?;
                } else {
                    if wire.len() % cipher.block_len() != 0 || head.len() != 16 {
                        return Err(TransportError::Malformed(
                            "packet is not a multiple of the cipher block".into(),
                        ));
                    }
                    wire[..16].copy_from_slice(head);
                    cipher.apply(&mut wire[16..])?;
                    head.clear();
                    mac.verify(seq, wire, tag)?;
                }
                wire[4..].to_vec()
            }
            OpenState::Gcm(state) => {
                let len_field = [packet[0], packet[1], packet[2], packet[3]];
                let nonce = state.next_nonce();
                let plain = state
                    .key
                    .open_in_place(nonce, Aad::from(len_field), &mut packet[4..])
                    .map_err(|_| TransportError::Crypto("aes-gcm tag mismatch".into()))?;
                plain.to_vec()
            }
            OpenState::ChaCha(key) => {
                let (wire, tag) = packet.split_at_mut(body_end);
                let tag: [u8; chacha::TAG_LEN] = (&*tag)
                    .try_into()
                    .map_err(|_| TransportError::Malformed("short chacha20 tag".into()))?;
                let plain = key
                    .open_in_place(seq, wire, &tag)
                    .map_err(|_| TransportError::Crypto("chacha20-poly1305 tag mismatch".into()))?;
                plain.to_vec()
            }
        };
        payload_of(&body)
    }
}

/// Strips the padding-length byte and the random padding.
fn payload_of(body: &[u8]) -> Result<Vec<u8>, TransportError> {
    let (&padding, rest) = body
        .split_first()
        .ok_or_else(|| TransportError::Malformed("empty packet body".into()))?;
    let padding = padding as usize;
    if padding > rest.len() {
        return Err(TransportError::Malformed(format!(
            "padding length {padding} exceeds packet body"
        )));
    }
    Ok(rest[..rest.len() - padding].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(cipher: CipherKind, mac: Option<MacKind>) -> (Sealer, Opener) {
        let key = vec![7u8; cipher.key_len()];
        let iv = vec![3u8; cipher.iv_len()];
        let mac_key = vec![9u8; mac.map(|m| m.key_len()).unwrap_or(0)];
        let keys = DirectionKeys {
            cipher,
            mac,
            key: &key,
            iv: &iv,
            mac_key: &mac_key,
        };
        (Sealer::new(&keys).unwrap(), Opener::new(&keys).unwrap())
    }

    fn open_wire(opener: &mut Opener, seq: u32, wire: &[u8]) -> Result<Vec<u8>, TransportError> {
        let head = opener.head_len();
        let len = opener.packet_length(seq, &wire[..head])?;
        assert_eq!(4 + len + opener.trailer_len(), wire.len());
        let mut packet = wire.to_vec();
        opener.open(seq, &mut packet)
    }

    #[test]
    fn plain_packets_are_padded_to_eight_bytes() {
        let mut sealer = Sealer::plain();
        let wire = sealer.seal(0, b"\x15").unwrap();
        assert_eq!(wire.len() % 8, 0);
        assert!(wire[4] as usize >= MIN_PADDING);
        let mut opener = Opener::plain();
        assert_eq!(open_wire(&mut opener, 0, &wire).unwrap(), b"\x15");
    }

    #[test]
    fn every_suite_opens_what_it_seals_across_several_packets() {
        let suites = [
            (CipherKind::ChaCha20Poly1305, None),
            (CipherKind::Aes128Gcm, None),
            (CipherKind::Aes256Gcm, None),
            (CipherKind::Aes128Ctr, Some(MacKind::HmacSha256)),
            (CipherKind::Aes192Ctr, Some(MacKind::HmacSha1_96)),
            (CipherKind::Aes256Ctr, Some(MacKind::HmacSha256Etm)),
            (CipherKind::Aes128Ctr, Some(MacKind::HmacSha512Etm)),
            (CipherKind::Aes128Cbc, Some(MacKind::HmacSha256)),
            (CipherKind::Aes128Cbc, Some(MacKind::HmacSha1Etm)),
            (CipherKind::TripleDesCbc, Some(MacKind::HmacSha1)),
            (CipherKind::TripleDesCbc, Some(MacKind::HmacSha256Etm)),
            (CipherKind::Arcfour, Some(MacKind::HmacSha1)),
            (CipherKind::Arcfour128, Some(MacKind::HmacSha256Etm)),
            (CipherKind::Arcfour256, Some(MacKind::HmacSha1_96)),
        ];
        for (cipher, mac) in suites {
            let (mut sealer, mut opener) = pair(cipher, mac);
            for seq in 3..6u32 {
                let payload = format!("payload {seq} for {}", cipher.name()).into_bytes();
                let wire = sealer.seal(seq, &payload).unwrap();
                assert_eq!(open_wire(&mut opener, seq, &wire).unwrap(), payload);
            }
        }
    }

    #[test]
    fn legacy_block_ciphers_pad_to_their_own_block() {
        let (mut sealer, _) = pair(CipherKind::TripleDesCbc, Some(MacKind::HmacSha1));
        for len in 1..40 {
            let wire = sealer.seal(0, &vec![0x5e; len]).unwrap();
            let body = wire.len() - MacKind::HmacSha1.tag_len();
            assert_eq!(body % 8, 0);
        }
    }

    #[test]
    fn arcfour128_skips_the_first_1536_keystream_bytes() {
        let key = [0x42u8; 16];
        let mut plain = PacketCipher::new(CipherKind::Arcfour, &key, &[], Mode::Encrypt).unwrap();
        let mut skipped =
            PacketCipher::new(CipherKind::Arcfour128, &key, &[], Mode::Encrypt).unwrap();
        let mut long = vec![0u8; 1536 + 32];
        plain.apply(&mut long).unwrap();
        let mut short = vec![0u8; 32];
        skipped.apply(&mut short).unwrap();
        assert_eq!(&long[1536..], &short[..]);
    }

    #[test]
    fn cbc_rejects_partial_blocks() {
        let (_, mut opener) = pair(CipherKind::Aes128Cbc, Some(MacKind::HmacSha256Etm));
        let mut packet = 20u32.to_be_bytes().to_vec();
        packet.extend_from_slice(&[0u8; 20]);
        let mac = PacketMac::new(MacKind::HmacSha256Etm, &[9u8; 32]).unwrap();
        let tag = mac.compute(0, &packet);
        packet.extend_from_slice(&tag);
        assert!(matches!(
            opener.open(0, &mut packet),
            Err(TransportError::Malformed(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        for (cipher, mac) in [
            (CipherKind::ChaCha20Poly1305, None),
            (CipherKind::Aes128Gcm, None),
            (CipherKind::Aes128Ctr, Some(MacKind::HmacSha256)),
        ] {
            let (mut sealer, mut opener) = pair(cipher, mac);
            let mut wire = sealer.seal(1, b"service request").unwrap();
            let last = wire.len() - 1;
            wire[last] ^= 0x01;
            assert!(matches!(
                open_wire(&mut opener, 1, &wire),
                Err(TransportError::Crypto(_))
            ));
        }
    }

    #[test]
    fn wrong_sequence_number_fails_the_mac() {
        let (mut sealer, mut opener) = pair(CipherKind::Aes256Ctr, Some(MacKind::HmacSha1));
        let wire = sealer.seal(10, b"x").unwrap();
        assert!(open_wire(&mut opener, 11, &wire).is_err());
    }
}
