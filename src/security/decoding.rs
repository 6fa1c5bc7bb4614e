//! Response `Content-Encoding` decoding.
//!
//! Codings are removed outermost first. Each coding must be one the request
//! declared acceptable, and every required coding must have been present.

use std::io::Read;
use std::sync::Arc;

use flate2::read::GzDecoder;
use thiserror::Error;

use super::credentials::RsaKeyPair;
use super::ewp_rsa_aes::{self, CONTENT_CODING};
use crate::http::{acceptable_codings, comma_separated_tokens, Response};

/// Coding check or decoding failure, phrased for the step report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct DecodingError(pub String);

pub struct ResponseDecoder<'a> {
    key_pairs: &'a [Arc<RsaKeyPair>],
    acceptable: Vec<String>,
    required: Vec<String>,
}

impl<'a> ResponseDecoder<'a> {
    pub fn new(key_pairs: &'a [Arc<RsaKeyPair>], accept_encoding: Option<&str>) -> Self {
        Self {
            key_pairs,
            acceptable: acceptable_codings(accept_encoding),
            required: Vec::new(),
        }
    }

    pub fn require(mut self, coding: &str) -> Self {
        self.required.push(coding.to_ascii_lowercase());
        self
    }

    /// Decoded copy of `response`, with `Content-Encoding` removed.
    pub fn decode(&self, response: &Response) -> Result<Response, DecodingError> {
        let mut decoded = response.clone();
        let mut codings = comma_separated_tokens(response.header("Content-Encoding"));
        let mut unsatisfied = self.required.clone();

        while let Some(coding) = codings.pop() {
            let coding = coding.to_ascii_lowercase();
            decoded.body = self.decode_one(&coding, &decoded.body)?;
            unsatisfied.retain(|c| *c != coding);
            if !self.acceptable.contains(&coding) {
                return Err(DecodingError(format!(
                    "The response was (successfully) encoded with the '{}' coding, but the \
                     client didn't declare this encoding as acceptable (it wasn't allowed in \
                     the Accept-Encoding header).",
                    coding
                )));
            }
        }
        decoded.headers.remove("Content-Encoding");

        if !unsatisfied.is_empty() {
            return Err(DecodingError(format!(
                "Expecting the response to be encoded with {}",
                unsatisfied.join(" and ")
            )));
        }
        Ok(decoded)
    }

    fn decode_one(&self, coding: &str, body: &[u8]) -> Result<Vec<u8>, DecodingError> {
        match coding {
            "identity" => Ok(body.to_vec()),
            "gzip" => {
                let mut out = Vec::new();
                GzDecoder::new(body)
                    .read_to_end(&mut out)
                    .map_err(|e| DecodingError(format!("Could not decode gzip body: {}", e)))?;
                Ok(out)
            }
            c if c == CONTENT_CODING => {
                ewp_rsa_aes::decrypt_with_any(self.key_pairs.iter().map(|k| k.as_ref()), body)
                    .map_err(|e| {
                        DecodingError(format!(
                            "Could not decrypt {} response: {}",
                            CONTENT_CODING, e
                        ))
                    })
            }
            other => Err(DecodingError(format!("Unsupported Content-Encoding: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::*;
    use crate::test_support::keys;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_decodes_in_reverse_order() {
        let k = keys();
        let pairs = vec![k.client.clone()];
        let encrypted = ewp_rsa_aes::encrypt(k.client.public_key(), &gzip(b"<ok/>")).unwrap();
        let response = Response::new(200)
            .with_header("Content-Encoding", "gzip, ewp-rsa-aes128gcm")
            .with_body(encrypted);
        let decoded = ResponseDecoder::new(&pairs, Some("ewp-rsa-aes128gcm, gzip"))
            .require(CONTENT_CODING)
            .decode(&response)
            .unwrap();
        assert_eq!(decoded.body, b"<ok/>");
        assert!(decoded.header("Content-Encoding").is_none());
    }

    #[test]
    fn test_missing_required_coding() {
        let pairs: Vec<Arc<RsaKeyPair>> = Vec::new();
        let response = Response::new(200).with_body(b"<ok/>".to_vec());
        let err = ResponseDecoder::new(&pairs, Some("ewp-rsa-aes128gcm"))
            .require(CONTENT_CODING)
            .decode(&response)
            .unwrap_err();
        assert_eq!(err.0, "Expecting the response to be encoded with ewp-rsa-aes128gcm");
    }

    #[test]
    fn test_unacceptable_coding() {
        let pairs: Vec<Arc<RsaKeyPair>> = Vec::new();
        let response = Response::new(200)
            .with_header("Content-Encoding", "gzip")
            .with_body(gzip(b"x"));
        let err = ResponseDecoder::new(&pairs, None).decode(&response).unwrap_err();
        assert!(err.0.contains("'gzip'"));
    }

    #[test]
    fn test_unknown_coding() {
        let pairs: Vec<Arc<RsaKeyPair>> = Vec::new();
        let response = Response::new(200).with_header("Content-Encoding", "br");
        let err = ResponseDecoder::new(&pairs, Some("br")).decode(&response).unwrap_err();
        assert_eq!(err.0, "Unsupported Content-Encoding: br");
    }
}
