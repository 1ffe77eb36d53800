use gateway_sync_controller_core::dataplane::Config;
use sha2::{Digest, Sha256};
use std::fmt;

/// The configuration hash a data plane reports when it has not applied any configuration.
pub const EMPTY_CONFIGURATION_HASH: &str = "00000000000000000000000000000000";

/// A digest of a serialized configuration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(payload: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(payload)))
    }

    /// Serializes a configuration in canonical order, returning the payload and its fingerprint.
    pub fn encode(config: &Config) -> Result<(Vec<u8>, Self), serde_json::Error> {
        let mut config = config.clone();
        config.canonicalize();
        let payload = serde_json::to_vec(&config)?;
        let fingerprint = Self::of(&payload);
        Ok((payload, fingerprint))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
