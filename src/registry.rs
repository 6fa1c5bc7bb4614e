//! Registry seam: which API entries exist and which server keys cover them.

use rsa::RsaPublicKey;

use crate::combination::DeclaredSecurity;
use crate::security::credentials::public_key_fingerprint;
use crate::version::SemanticVersion;

/// One API entry as published in the registry catalogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEntry {
    pub api: String,
    pub version: SemanticVersion,
    pub url: String,
    pub security: DeclaredSecurity,
}

pub trait Registry: Send + Sync {
    /// Entries for `api` published at `url` that are compatible with `version`.
    fn find_api_entries(&self, api: &str, url: &str, version: &SemanticVersion) -> Vec<ApiEntry>;

    /// Server public keys that cover the given entry.
    fn server_keys_covering(&self, entry: &ApiEntry) -> Vec<RsaPublicKey>;

    /// Key with the given SHA-256 fingerprint (hex) among those covering `entry`.
    fn find_server_key(&self, entry: &ApiEntry, key_id: &str) -> Option<RsaPublicKey> {
        self.server_keys_covering(entry).into_iter().find(|key| {
            public_key_fingerprint(key)
                .map(|fp| hex::encode(fp).eq_ignore_ascii_case(key_id))
                .unwrap_or(false)
        })
    }
}

/// Fixed, in-memory registry.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    entries: Vec<(ApiEntry, Vec<RsaPublicKey>)>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, entry: ApiEntry, server_keys: Vec<RsaPublicKey>) -> Self {
        self.entries.push((entry, server_keys));
        self
    }
}

impl Registry for StaticRegistry {
    fn find_api_entries(&self, api: &str, url: &str, version: &SemanticVersion) -> Vec<ApiEntry> {
        self.entries
            .iter()
            .map(|(entry, _)| entry)
            .filter(|e| e.api == api && e.url == url && e.version.is_compatible_with(version))
            .cloned()
            .collect()
    }

    fn server_keys_covering(&self, entry: &ApiEntry) -> Vec<RsaPublicKey> {
        self.entries
            .iter()
            .filter(|(e, _)| e == entry)
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect()
    }
}
