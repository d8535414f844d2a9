//! Repository crypto: the scrypt KDF, the authenticated envelope and the
//! AES-256-GCM helper used by shareable-link tooling.
//!
//! Every encrypted object in the repository is an "envelope":
//!
//! ```ascii
//! IV                          xx xx xx xx   (16 bytes)
//!                             xx xx xx xx
//!                             xx xx xx xx
//!                             xx xx xx xx
//! ciphertext                  xx xx xx xx   (N bytes, AES-256-CTR)
//!                             ...
//! Poly1305-AES tag            xx xx xx xx   (16 bytes, over the
//!                             xx xx xx xx    ciphertext only, with the
//!                             xx xx xx xx    IV as the MAC nonce)
//!                             xx xx xx xx
//! ```
//!
//! To open an envelope:
//! 1. Split off the leading IV and the trailing tag.
//! 2. Compute `s = AES-128-ECB(MAC-K, IV)` and authenticate the ciphertext
//!    with Poly1305 under the clamped `MAC-R` and `s`. Compare tags in
//!    constant time.
//! 3. AES-256-CTR-decrypt the ciphertext, using the IV as the initial
//!    counter block (the block increments as one big-endian 128-bit
//!    integer).
//!
//! The per-repository [`MasterKey`] is the triple (encryption key 32,
//! MAC-K 16, MAC-R 16), obtained either by unlocking a key file or by
//! deriving 64 bytes of scrypt output and splitting it in that order.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::{Aes128, Aes256};
use aes_gcm::aead::{Aead, AeadCore, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use poly1305::Poly1305;
use scrypt::{scrypt, Params};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, ObjectKind, Result};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

pub const IV_LEN: usize = 16;
pub const TAG_LEN: usize = 16;
/// Bytes an envelope adds around its plaintext.
pub const ENVELOPE_OVERHEAD: usize = IV_LEN + TAG_LEN;
/// scrypt output length: encryption key, MAC-K and MAC-R back to back.
pub const DERIVED_KEY_LEN: usize = 64;

const GCM_NONCE_LEN: usize = 12;

/// The Poly1305-AES key halves.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MacKey {
    k: [u8; 16],
    r: [u8; 16],
}

impl MacKey {
    /// Poly1305-AES over `message` with a 16-byte nonce.
    ///
    /// `r` is clamped per Poly1305; `s` is the AES-128 encryption of the
    /// nonce under `k`; the tag is `Poly1305(message, r) + s mod 2^128`.
    fn sum(&self, nonce: &[u8; IV_LEN], message: &[u8]) -> [u8; TAG_LEN] {
        let aes = Aes128::new(GenericArray::from_slice(&self.k));
        let mut block = GenericArray::clone_from_slice(nonce);
        aes.encrypt_block(&mut block);

        let mut key = [0u8; 32];
        key[..16].copy_from_slice(&self.r);
        key[16..].copy_from_slice(block.as_slice());
        let tag = Poly1305::new(GenericArray::from_slice(&key)).compute_unpadded(message);
        key.zeroize();
        tag.into()
    }
}

/// The repository-wide key triple. Zeroed when dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    encrypt: [u8; 32],
    mac: MacKey,
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey").finish_non_exhaustive()
    }
}

impl MasterKey {
    pub fn from_parts(encrypt: [u8; 32], mac_k: [u8; 16], mac_r: [u8; 16]) -> Self {
        MasterKey {
            encrypt,
            mac: MacKey { k: mac_k, r: mac_r },
        }
    }

    /// Derives a key triple from a password with scrypt.
    ///
    /// `n` must be a power of two. The 64-byte output splits into
    /// (encryption key 32 | MAC-K 16 | MAC-R 16).
    pub fn derive(password: &str, salt: &[u8], n: u64, r: u32, p: u32) -> Result<MasterKey> {
        if n < 2 || !n.is_power_of_two() {
            return Err(Error::Format(format!(
                "scrypt N must be a power of two, got {n}"
            )));
        }
        let params = Params::new(n.trailing_zeros() as u8, r, p, DERIVED_KEY_LEN)
            .map_err(|err| Error::Format(format!("bad scrypt parameters: {err}")))?;

        let mut derived = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
        scrypt(password.as_bytes(), salt, &params, &mut derived[..])
            .map_err(|err| Error::Format(format!("scrypt failed: {err}")))?;

        let mut encrypt = [0u8; 32];
        let mut mac_k = [0u8; 16];
        let mut mac_r = [0u8; 16];
        encrypt.copy_from_slice(&derived[..32]);
        mac_k.copy_from_slice(&derived[32..48]);
        mac_r.copy_from_slice(&derived[48..64]);
        Ok(MasterKey::from_parts(encrypt, mac_k, mac_r))
    }

    /// Verifies and decrypts an envelope.
    ///
    /// The tag covers the ciphertext only; the IV doubles as the MAC
    /// nonce, so a tampered IV also fails authentication. Verification is
    /// constant time. Inputs too short to carry an IV and a tag are
    /// rejected the same way a bad tag is.
    pub fn open(&self, envelope: &[u8], what: ObjectKind) -> Result<Vec<u8>> {
        if envelope.len() < ENVELOPE_OVERHEAD {
            return Err(Error::Authentication(what));
        }
        let (iv, rest) = envelope.split_at(IV_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);
        let mut nonce = [0u8; IV_LEN];
        nonce.copy_from_slice(iv);

        let expected = self.mac.sum(&nonce, ciphertext);
        if !bool::from(expected.as_slice().ct_eq(tag)) {
            return Err(Error::Authentication(what));
        }

        let mut plaintext = ciphertext.to_vec();
        Aes256Ctr::new(
            GenericArray::from_slice(&self.encrypt),
            GenericArray::from_slice(&nonce),
        )
        .apply_keystream(&mut plaintext);
        Ok(plaintext)
    }

    /// Encrypts and authenticates `plaintext` into an envelope.
    ///
    /// The exact inverse of [`open`](Self::open). The caller supplies the
    /// IV; this crate only ever seals when authoring fixtures or tooling
    /// objects, never on the read path.
    pub fn seal(&self, iv: &[u8; IV_LEN], plaintext: &[u8]) -> Vec<u8> {
        let mut ciphertext = plaintext.to_vec();
        Aes256Ctr::new(
            GenericArray::from_slice(&self.encrypt),
            GenericArray::from_slice(iv),
        )
        .apply_keystream(&mut ciphertext);
        let tag = self.mac.sum(iv, &ciphertext);

        let mut envelope = Vec::with_capacity(plaintext.len() + ENVELOPE_OVERHEAD);
        envelope.extend_from_slice(iv);
        envelope.extend_from_slice(&ciphertext);
        envelope.extend_from_slice(&tag);
        envelope
    }
}

/// AES-256-GCM seal with a random 12-byte nonce prepended to the box.
///
/// Not part of the repository format; shareable-link encoders sitting on
/// top of this crate use it for their own payloads.
pub fn gcm_seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| Error::Format("GCM encryption failed".into()))?;

    let mut boxed = Vec::with_capacity(GCM_NONCE_LEN + ciphertext.len());
    boxed.extend_from_slice(nonce.as_slice());
    boxed.extend_from_slice(&ciphertext);
    Ok(boxed)
}

/// Opens a box produced by [`gcm_seal`].
pub fn gcm_open(key: &[u8; 32], boxed: &[u8]) -> Result<Vec<u8>> {
    if boxed.len() < GCM_NONCE_LEN + TAG_LEN {
        return Err(Error::Authentication(ObjectKind::Link));
    }
    let (nonce, ciphertext) = boxed.split_at(GCM_NONCE_LEN);
    Aes256Gcm::new(GenericArray::from_slice(key))
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Authentication(ObjectKind::Link))
}
