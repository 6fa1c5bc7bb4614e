//! `ewp-rsa-aes128gcm` content coding.
//!
//! Body layout:
//!
//! ```text
//! sha256(recipient SPKI DER)      32 bytes
//! encrypted AES key length        u16, big-endian
//! RSA-PKCS#1 v1.5(AES-128 key)    variable
//! AES-128-GCM(plaintext) || tag   rest
//! ```
//!
//! The AES key is single-use, so the GCM IV is all zeroes.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};

use super::credentials::{public_key_fingerprint, CryptoError, RsaKeyPair};
use crate::http::Request;

pub const CONTENT_CODING: &str = "ewp-rsa-aes128gcm";

pub const FINGERPRINT_LEN: usize = 32;
pub const KEY_LENGTH_LEN: usize = 2;
/// Fingerprint plus key-length field; the smallest prefix that still parses
/// as far as the encrypted key.
pub const HEADER_LEN: usize = FINGERPRINT_LEN + KEY_LENGTH_LEN;

const AES_KEY_LEN: usize = 16;
const IV: [u8; 12] = [0u8; 12];

pub fn encrypt(recipient: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let fingerprint = public_key_fingerprint(recipient)?;

    let mut aes_key = [0u8; AES_KEY_LEN];
    OsRng.fill_bytes(&mut aes_key);
    let encrypted_key = recipient.encrypt(&mut OsRng, Pkcs1v15Encrypt, &aes_key)?;
    let key_len = u16::try_from(encrypted_key.len())
        .map_err(|_| CryptoError::BadEnvelope("encrypted key too long".into()))?;

    let cipher = Aes128Gcm::new_from_slice(&aes_key).map_err(|_| CryptoError::Aes)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&IV), plaintext)
        .map_err(|_| CryptoError::Aes)?;

    let mut out = Vec::with_capacity(HEADER_LEN + encrypted_key.len() + ciphertext.len());
    out.extend_from_slice(&fingerprint);
    out.extend_from_slice(&key_len.to_be_bytes());
    out.extend_from_slice(&encrypted_key);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Recipient fingerprint of an encrypted body. Needs no private key.
pub fn recipient_fingerprint(body: &[u8]) -> Result<[u8; FINGERPRINT_LEN], CryptoError> {
    body.get(..FINGERPRINT_LEN)
        .and_then(|s| <[u8; FINGERPRINT_LEN]>::try_from(s).ok())
        .ok_or_else(|| CryptoError::BadEnvelope("body shorter than the key fingerprint".into()))
}

pub fn decrypt(key_pair: &RsaKeyPair, body: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let fingerprint = recipient_fingerprint(body)?;
    if fingerprint != key_pair.fingerprint() {
        return Err(CryptoError::UnknownRecipient(hex::encode(fingerprint)));
    }
    let len_bytes = body
        .get(FINGERPRINT_LEN..HEADER_LEN)
        .ok_or_else(|| CryptoError::BadEnvelope("missing encrypted key length".into()))?;
    let key_len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
    let encrypted_key = body
        .get(HEADER_LEN..HEADER_LEN + key_len)
        .ok_or_else(|| CryptoError::BadEnvelope("truncated encrypted key".into()))?;
    let ciphertext = &body[HEADER_LEN + key_len..];

    let aes_key = key_pair.private_key().decrypt(Pkcs1v15Encrypt, encrypted_key)?;
    let cipher = Aes128Gcm::new_from_slice(&aes_key)
        .map_err(|_| CryptoError::BadEnvelope("AES key has the wrong length".into()))?;
    cipher
        .decrypt(Nonce::from_slice(&IV), ciphertext)
        .map_err(|_| CryptoError::Aes)
}

/// Decrypt with whichever of `key_pairs` the body is addressed to.
pub fn decrypt_with_any<'a, I>(key_pairs: I, body: &[u8]) -> Result<Vec<u8>, CryptoError>
where
    I: IntoIterator<Item = &'a RsaKeyPair>,
{
    let fingerprint = recipient_fingerprint(body)?;
    let key_pair = key_pairs
        .into_iter()
        .find(|k| k.fingerprint() == fingerprint)
        .ok_or_else(|| CryptoError::UnknownRecipient(hex::encode(fingerprint)))?;
    decrypt(key_pair, body)
}

/// Encrypts request bodies for one recipient and records the coding.
#[derive(Debug, Clone)]
pub struct RequestEncryptor {
    recipient: RsaPublicKey,
}

impl RequestEncryptor {
    pub fn new(recipient: RsaPublicKey) -> Self {
        Self { recipient }
    }

    pub fn encode(&self, request: &mut Request) -> Result<(), CryptoError> {
        let encrypted = encrypt(&self.recipient, request.body_bytes())?;
        request.set_body(encrypted);
        let coding = match request.header("Content-Encoding") {
            Some(existing) if !existing.trim().is_empty() => {
                format!("{}, {}", existing, CONTENT_CODING)
            }
            _ => CONTENT_CODING.to_string(),
        };
        request.put_header("Content-Encoding", coding);
        Ok(())
    }
}

/// Inspects encrypted response bodies without decrypting them.
pub struct EncryptionVerifier;

impl EncryptionVerifier {
    pub fn recipient(body: &[u8]) -> Result<[u8; FINGERPRINT_LEN], CryptoError> {
        recipient_fingerprint(body)
    }

    pub fn is_encrypted_for(body: &[u8], key_pair: &RsaKeyPair) -> bool {
        matches!(recipient_fingerprint(body), Ok(fp) if fp == key_pair.fingerprint())
    }
}
