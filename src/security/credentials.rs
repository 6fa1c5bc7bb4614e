//! Key pairs and credentials used by the engine.
//!
//! The engine owns four identities:
//! - a registered client key pair (HTTP signatures, response decryption),
//! - a registered server key pair (used to impersonate the wrong party),
//! - a self-signed TLS client certificate with its key pair,
//! - an unregistered key pair that plays the attacker.
//!
//! All of them are read-only after construction and shared through `Arc`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::http::ClientIdentity;

/// Default RSA modulus size for generated keys.
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Validity of generated TLS client certificates.
pub const CERTIFICATE_VALIDITY_YEARS: i32 = 10;

/// Serial number of every generated certificate.
pub const CERTIFICATE_SERIAL: u64 = 1;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("RSA operation failed: {0}")]
    Rsa(String),
    #[error("AES-GCM operation failed")]
    Aes,
    #[error("key encoding failed: {0}")]
    Encoding(String),
    #[error("malformed ewp-rsa-aes128gcm envelope: {0}")]
    BadEnvelope(String),
    #[error("no private key matches recipient fingerprint {0}")]
    UnknownRecipient(String),
}

impl From<rsa::Error> for CryptoError {
    fn from(e: rsa::Error) -> Self {
        CryptoError::Rsa(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("key conversion failed: {0}")]
    Key(String),
    #[error("certificate generation failed: {0}")]
    Generation(String),
}

impl From<rcgen::Error> for CertificateError {
    fn from(e: rcgen::Error) -> Self {
        CertificateError::Generation(e.to_string())
    }
}

/// SHA-256 of the public key's SubjectPublicKeyInfo DER encoding.
pub fn public_key_fingerprint(key: &RsaPublicKey) -> Result<[u8; 32], CryptoError> {
    let der = key
        .to_public_key_der()
        .map_err(|e| CryptoError::Encoding(e.to_string()))?;
    Ok(Sha256::digest(der.as_bytes()).into())
}

/// RSA key pair with its cached public encodings.
#[derive(Clone)]
pub struct RsaKeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
    public_der: Vec<u8>,
    fingerprint: [u8; 32],
}

impl std::fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("key_id", &self.key_id())
            .finish_non_exhaustive()
    }
}

impl RsaKeyPair {
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::new(&mut OsRng, bits)?;
        Self::from_private_key(private)
    }

    pub fn from_private_key(private: RsaPrivateKey) -> Result<Self, CryptoError> {
        let public = private.to_public_key();
        let public_der = public
            .to_public_key_der()
            .map_err(|e| CryptoError::Encoding(e.to_string()))?
            .as_bytes()
            .to_vec();
        let fingerprint = Sha256::digest(&public_der).into();
        Ok(Self { private, public, public_der, fingerprint })
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// SubjectPublicKeyInfo DER.
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_der
    }

    pub fn fingerprint(&self) -> [u8; 32] {
        self.fingerprint
    }

    /// Hex fingerprint, as used for HTTP signature `keyId`s.
    pub fn key_id(&self) -> String {
        hex::encode(self.fingerprint)
    }

    pub fn private_key_pkcs8_der(&self) -> Result<Vec<u8>, CryptoError> {
        Ok(self
            .private
            .to_pkcs8_der()
            .map_err(|e| CryptoError::Encoding(e.to_string()))?
            .as_bytes()
            .to_vec())
    }

    fn private_key_pkcs8_pem(&self) -> Result<String, CryptoError> {
        Ok(self
            .private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?
            .as_str()
            .to_owned())
    }
}

/// Generate a self-signed X.509 certificate for `key_pair`.
///
/// Validity spans [`CERTIFICATE_VALIDITY_YEARS`] from the start of the
/// current year and the serial is always [`CERTIFICATE_SERIAL`].
pub fn generate_certificate(key_pair: &RsaKeyPair) -> Result<Vec<u8>, CertificateError> {
    use chrono::Datelike;

    let pem = key_pair
        .private_key_pkcs8_pem()
        .map_err(|e| CertificateError::Key(e.to_string()))?;
    let signing_key = rcgen::KeyPair::from_pem_and_sign_algo(&pem, &rcgen::PKCS_RSA_SHA256)?;

    let mut params = rcgen::CertificateParams::new(Vec::<String>::new())?;
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "httpsec-conformance client");
    params.serial_number = Some(rcgen::SerialNumber::from(CERTIFICATE_SERIAL));
    let year = Utc::now().year();
    params.not_before = rcgen::date_time_ymd(year, 1, 1);
    params.not_after = rcgen::date_time_ymd(year + CERTIFICATE_VALIDITY_YEARS, 1, 1);

    let certificate = params.self_signed(&signing_key)?;
    Ok(certificate.der().to_vec())
}

/// TLS client identity with the moment it started being used.
#[derive(Debug, Clone)]
pub struct TlsCredentials {
    key_pair: Arc<RsaKeyPair>,
    identity: Arc<ClientIdentity>,
    in_use_since: DateTime<Utc>,
}

impl TlsCredentials {
    pub fn new(
        key_pair: Arc<RsaKeyPair>,
        certificate_der: Vec<u8>,
        in_use_since: DateTime<Utc>,
    ) -> Result<Self, CryptoError> {
        let identity = ClientIdentity {
            certificate_der,
            private_key_der: key_pair.private_key_pkcs8_der()?,
        };
        Ok(Self { key_pair, identity: Arc::new(identity), in_use_since })
    }

    /// Generate a fresh key pair and self-signed certificate.
    pub fn generate(bits: usize) -> Result<Self, CertificateError> {
        let key_pair =
            RsaKeyPair::generate(bits).map_err(|e| CertificateError::Key(e.to_string()))?;
        let certificate = generate_certificate(&key_pair)?;
        Self::new(Arc::new(key_pair), certificate, Utc::now())
            .map_err(|e| CertificateError::Key(e.to_string()))
    }

    pub fn key_pair(&self) -> &Arc<RsaKeyPair> {
        &self.key_pair
    }

    pub fn identity(&self) -> &Arc<ClientIdentity> {
        &self.identity
    }

    pub fn in_use_since(&self) -> DateTime<Utc> {
        self.in_use_since
    }

    /// True while the credentials are younger than `window`.
    pub fn is_fresh(&self, window: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(window) {
            Ok(window) => now - self.in_use_since < window,
            Err(_) => true,
        }
    }
}

/// Everything the engine signs, encrypts and authenticates with.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub client: Arc<RsaKeyPair>,
    pub server: Arc<RsaKeyPair>,
    pub tls: TlsCredentials,
    pub unregistered: Arc<RsaKeyPair>,
    /// Institution identifiers the client credentials are registered for.
    pub covered_hei_ids: Vec<String>,
}

impl Credentials {
    /// Generate a full set of throwaway credentials.
    pub fn generate(bits: usize, covered_hei_ids: Vec<String>) -> Result<Self, CertificateError> {
        let generate = |bits| {
            RsaKeyPair::generate(bits).map_err(|e| CertificateError::Key(e.to_string()))
        };
        Ok(Self {
            client: Arc::new(generate(bits)?),
            server: Arc::new(generate(bits)?),
            tls: TlsCredentials::generate(bits)?,
            unregistered: Arc::new(generate(bits)?),
            covered_hei_ids,
        })
    }

    /// Our own key pairs able to decrypt responses addressed to us.
    pub fn decryption_keys(&self) -> Vec<Arc<RsaKeyPair>> {
        vec![self.client.clone(), self.server.clone(), self.tls.key_pair().clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::keys;

    #[test]
    fn test_key_id_is_hex_sha256_of_spki() {
        let pair = &keys().client;
        let expected = hex::encode(Sha256::digest(pair.public_key_der()));
        assert_eq!(pair.key_id(), expected);
        assert_eq!(pair.key_id().len(), 64);
        assert_eq!(public_key_fingerprint(pair.public_key()).unwrap(), pair.fingerprint());
    }

    #[test]
    fn test_distinct_pairs_have_distinct_fingerprints() {
        let k = keys();
        assert_ne!(k.client.fingerprint(), k.server.fingerprint());
        assert_ne!(k.client.fingerprint(), k.unregistered.fingerprint());
    }

    #[test]
    fn test_freshness_window() {
        let now = Utc::now();
        let tls = TlsCredentials::new(keys().client.clone(), vec![1, 2, 3], now).unwrap();
        assert!(tls.is_fresh(Duration::from_secs(600), now + chrono::Duration::seconds(30)));
        assert!(!tls.is_fresh(Duration::from_secs(600), now + chrono::Duration::minutes(11)));
    }

    #[test]
    fn test_generated_certificate_is_der() {
        let cert = generate_certificate(&keys().tls).unwrap();
        // DER SEQUENCE tag
        assert_eq!(cert[0], 0x30);
        assert!(cert.len() > 200);
    }
}
