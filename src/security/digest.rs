//! `Digest` header helpers (RFC 3230).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::Sha1;
use sha2::{Digest as _, Sha256};

pub fn sha256_base64(body: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(body))
}

pub fn sha1_base64(body: &[u8]) -> String {
    STANDARD.encode(Sha1::digest(body))
}

/// `SHA-256=<base64>` for the given body.
pub fn sha256_header_value(body: &[u8]) -> String {
    format!("SHA-256={}", sha256_base64(body))
}

/// Parse `alg=value, alg=value` pairs. Algorithm names keep their case.
pub fn parse_digest_header(value: &str) -> Vec<(String, String)> {
    value
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(alg, v)| (alg.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// The SHA-256 value of a `Digest` header, matching the algorithm name
/// case-insensitively.
pub fn find_sha256(value: &str) -> Option<String> {
    parse_digest_header(value)
        .into_iter()
        .find(|(alg, _)| alg.eq_ignore_ascii_case("SHA-256"))
        .map(|(_, v)| v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_body_digest() {
        assert_eq!(sha256_base64(b""), "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=");
        assert_eq!(sha1_base64(b""), "2jmj7l5rSw0yVb/vlWAYkK/YBwk=");
    }

    #[test]
    fn test_parse_keeps_base64_padding() {
        let pairs = parse_digest_header("SHA-256=abc=, Unknown-Digest-Algorithm=SomeValue");
        assert_eq!(pairs[0], ("SHA-256".to_string(), "abc=".to_string()));
        assert_eq!(pairs[1].0, "Unknown-Digest-Algorithm");
    }

    #[test]
    fn test_find_sha256_case_insensitive() {
        assert_eq!(find_sha256("shA-256=xyz"), Some("xyz".to_string()));
        assert_eq!(find_sha256("SHA=xyz"), None);
    }
}
