//! HTTP signature server authentication of responses.

use chrono::{DateTime, Utc};
use rsa::RsaPublicKey;
use thiserror::Error;

use super::credentials::public_key_fingerprint;
use super::digest;
use super::httpsig::{self, SignatureParams, ALGORITHM};
use crate::http::{Request, Response};

/// Largest accepted difference between a response date and our clock.
pub const MAX_DATE_SKEW_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct InvalidResponse(pub String);

fn invalid(message: impl Into<String>) -> InvalidResponse {
    InvalidResponse(message.into())
}

/// Verifies that responses are signed by one of the server keys covering
/// the API under test.
pub struct HttpSigResponseVerifier<'a> {
    server_keys: &'a [RsaPublicKey],
}

impl<'a> HttpSigResponseVerifier<'a> {
    pub fn new(server_keys: &'a [RsaPublicKey]) -> Self {
        Self { server_keys }
    }

    pub fn verify(&self, request: &Request, response: &Response) -> Result<(), InvalidResponse> {
        self.verify_request_id(request, response)?;
        let params = parse_signature_header(response)?;
        if !params.algorithm.eq_ignore_ascii_case(ALGORITHM) {
            return Err(invalid(format!(
                "Only {} algorithm is supported, but '{}' found in the response's Signature \
                 header.",
                ALGORITHM, params.algorithm
            )));
        }
        verify_required_headers_signed(response, &params)?;
        verify_request_signature_echo(request, response)?;
        verify_dates(response, Utc::now())?;
        let key = self.lookup_key(&params.key_id)?;

        let path = request
            .path_and_query()
            .map_err(|e| invalid(format!("Cannot compute (request-target): {}", e)))?;
        let target = Some((&request.method, path.as_str()));
        let text = httpsig::signing_string(target, &response.headers, &params.headers)
            .map_err(|e| invalid(format!("Cannot build the response's signing string: {}", e)))?;
        httpsig::verify_rsa_sha256(key, &text, &params.signature)
            .map_err(|_| invalid("The response's HTTP signature is invalid."))?;

        verify_digest(response)
    }

    fn verify_request_id(
        &self,
        request: &Request,
        response: &Response,
    ) -> Result<(), InvalidResponse> {
        match (request.header("X-Request-Id"), response.header("X-Request-Id")) {
            (Some(sent), Some(got)) if sent != got => Err(invalid(
                "X-Request-Id header in the response doesn't match the one sent in the request.",
            )),
            (Some(_), None) => Err(invalid(
                "HTTP Signature Server Authentication requires the server to include the \
                 correlated (and signed) X-Request-Id, whenever it has been included in the \
                 request.",
            )),
            _ => Ok(()),
        }
    }

    fn lookup_key(&self, key_id: &str) -> Result<&'a RsaPublicKey, InvalidResponse> {
        self.server_keys
            .iter()
            .find(|key| {
                public_key_fingerprint(key)
                    .map(|fp| hex::encode(fp).eq_ignore_ascii_case(key_id))
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                invalid(
                    "The keyId extracted from the response's Signature header doesn't match any \
                     of the server keys covering this API in the Registry.",
                )
            })
    }
}

fn parse_signature_header(response: &Response) -> Result<SignatureParams, InvalidResponse> {
    let value = response
        .header("Signature")
        .ok_or_else(|| invalid("Expecting the response to contain the Signature header"))?;
    SignatureParams::parse(value).map_err(|_| {
        invalid("Could not parse response's Signature header, make sure it's in a proper format")
    })
}

fn verify_required_headers_signed(
    response: &Response,
    params: &SignatureParams,
) -> Result<(), InvalidResponse> {
    let mut required = vec!["digest"];
    if response.header("X-Request-Id").is_some() {
        required.push("x-request-id");
    }
    if response.header("X-Request-Signature").is_some() {
        required.push("x-request-signature");
    }
    for header in required {
        if !params.covers(header) {
            return Err(invalid(format!(
                "Expecting the response's Signature to cover the \"{}\" header, but it doesn't.",
                header
            )));
        }
    }
    if !params.covers("date") && !params.covers("original-date") {
        return Err(invalid(
            "Expecting the response's Signature to cover the \"date\" header or the \
             \"original-date\" header (or both), but it doesn't cover any of them.",
        ));
    }
    Ok(())
}

fn verify_request_signature_echo(
    request: &Request,
    response: &Response,
) -> Result<(), InvalidResponse> {
    let request_signature = request
        .header("Authorization")
        .and_then(|v| SignatureParams::parse(v).ok())
        .map(|p| p.signature);
    match (response.header("X-Request-Signature"), request_signature) {
        (Some(_), None) => Err(invalid(
            "X-Request-Signature response header should be present only when HTTP Signature \
             Client Authentication has been used in the request.",
        )),
        (Some(echoed), Some(sent)) if echoed != sent => Err(invalid(
            "X-Request-Signature response header doesn't match the actual HTTP Signature of \
             the original request",
        )),
        (None, Some(_)) => Err(invalid("Missing X-Request-Signature response header.")),
        _ => Ok(()),
    }
}

fn verify_dates(response: &Response, now: DateTime<Utc>) -> Result<(), InvalidResponse> {
    let present: Vec<&str> = ["Date", "Original-Date"]
        .into_iter()
        .filter(|h| response.header(h).is_some())
        .collect();
    if present.is_empty() {
        return Err(invalid(
            "Expecting the response to contain the \"Date\" header or the \"Original-Date\" \
             (or both).",
        ));
    }
    for header in present {
        let value = response.header(header).unwrap_or_default();
        if let Some(problem) = date_problem(value, now) {
            return Err(invalid(format!(
                "The value of response's \"{}\" header failed verification: {}",
                header, problem
            )));
        }
    }
    Ok(())
}

/// Why a signature date is unacceptable, if it is.
pub fn date_problem(value: &str, now: DateTime<Utc>) -> Option<String> {
    let Some(parsed) = httpsig::parse_http_date(value) else {
        return Some("Could not parse the date. Make sure it's in a valid RFC 2616 format.".into());
    };
    let difference = (now - parsed).num_seconds().abs();
    if difference > MAX_DATE_SKEW_SECS {
        return Some(format!(
            "Server/client difference exceeds the maximum allowed threshold (it was {} seconds; \
             allowed: {})",
            difference, MAX_DATE_SKEW_SECS
        ));
    }
    None
}

fn verify_digest(response: &Response) -> Result<(), InvalidResponse> {
    let header = response
        .header("Digest")
        .ok_or_else(|| invalid("Missing response header: Digest"))?;
    let got = digest::find_sha256(header)
        .ok_or_else(|| invalid("Missing SHA-256 digest in Digest header"))?;
    let expected = digest::sha256_base64(&response.body);
    if got != expected {
        return Err(invalid(format!("Response SHA-256 digest mismatch. Expected: {}", expected)));
    }
    Ok(())
}
