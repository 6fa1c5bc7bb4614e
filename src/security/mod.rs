//! Security methods, credentials, and the signing/encryption machinery used
//! to build valid and deliberately broken requests.
//!
//! - [`method`]: the four security dimensions and the 4-letter selector
//! - [`credentials`]: key pairs, TLS identity, certificate generation
//! - [`httpsig`], [`tls`]: request signers, one per client-auth method
//! - [`ewp_rsa_aes`]: the `ewp-rsa-aes128gcm` body coding
//! - [`decoding`], [`response_auth`]: response decoding and server authentication

pub mod credentials;
pub mod decoding;
pub mod digest;
pub mod ewp_rsa_aes;
pub mod httpsig;
pub mod method;
pub mod response_auth;
pub mod tls;

pub use credentials::{CertificateError, Credentials, CryptoError, RsaKeyPair, TlsCredentials};
pub use httpsig::{DigestStyle, HttpSigSigner, SignatureError};
pub use method::{
    ClientAuth, Dimension, HttpSecurityDescription, RequestEncryption, ResponseEncryption,
    SecurityMethod, SecurityMethods, Selector, SelectorError, ServerAuth,
};
pub use tls::TlsCertificateSigner;

use crate::http::Request;

/// Applies one client-authentication method to a request.
pub trait RequestSigner {
    fn sign(&self, request: &mut Request) -> Result<(), SignatureError>;
}

/// Client authentication `None`: leaves the request untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousSigner;

impl RequestSigner for AnonymousSigner {
    fn sign(&self, _request: &mut Request) -> Result<(), SignatureError> {
        Ok(())
    }
}

/// The valid signer for `client_auth`, or `None` for methods the engine
/// has no credentials for (CA-signed TLS).
pub fn signer_for(
    client_auth: ClientAuth,
    credentials: &Credentials,
) -> Option<Box<dyn RequestSigner>> {
    match client_auth {
        ClientAuth::None => Some(Box::new(AnonymousSigner)),
        ClientAuth::TlsSelfSigned => {
            Some(Box::new(TlsCertificateSigner::new(credentials.tls.identity().clone())))
        }
        ClientAuth::TlsCaSigned => None,
        ClientAuth::HttpSig => Some(Box::new(HttpSigSigner::new(credentials.client.clone()))),
    }
}
