//! Shared key material for unit tests. RSA generation is slow, so every
//! test reuses one set.

use std::sync::{Arc, OnceLock};

use crate::security::RsaKeyPair;

pub(crate) struct TestKeys {
    pub client: Arc<RsaKeyPair>,
    pub server: Arc<RsaKeyPair>,
    /// Certificate signing needs at least 2048 bits.
    pub tls: Arc<RsaKeyPair>,
    pub unregistered: Arc<RsaKeyPair>,
}

pub(crate) fn keys() -> &'static TestKeys {
    static KEYS: OnceLock<TestKeys> = OnceLock::new();
    KEYS.get_or_init(|| {
        let generate = |bits| Arc::new(RsaKeyPair::generate(bits).unwrap());
        TestKeys {
            client: generate(1024),
            server: generate(1024),
            tls: generate(2048),
            unregistered: generate(2048),
        }
    })
}
