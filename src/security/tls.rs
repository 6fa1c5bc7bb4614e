//! TLS client-certificate authentication.
//!
//! The certificate itself travels in the TLS handshake, so signing only
//! attaches the identity to the request for the transport to present.

use std::sync::Arc;

use super::httpsig::SignatureError;
use super::RequestSigner;
use crate::http::{ClientIdentity, Request};

#[derive(Debug, Clone)]
pub struct TlsCertificateSigner {
    identity: Arc<ClientIdentity>,
}

impl TlsCertificateSigner {
    pub fn new(identity: Arc<ClientIdentity>) -> Self {
        Self { identity }
    }
}

impl RequestSigner for TlsCertificateSigner {
    fn sign(&self, request: &mut Request) -> Result<(), SignatureError> {
        request.client_certificate = Some(self.identity.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Method;

    #[test]
    fn test_attaches_identity() {
        let identity = Arc::new(ClientIdentity {
            certificate_der: vec![0x30, 0x01],
            private_key_der: vec![0x30, 0x02],
        });
        let mut request = Request::new(Method::GET, "https://example.com/echo");
        TlsCertificateSigner::new(identity.clone()).sign(&mut request).unwrap();
        assert_eq!(request.client_certificate, Some(identity));
        assert!(request.headers.is_empty());
    }
}
