//! Content-addressed fingerprint derivation.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};

use crate::Error;
use crate::options::KeyFn;
use crate::record::Record;

/// Hex-encoded SHA-256 digest of a key seed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hash a seed into a fingerprint.
    pub fn from_seed(seed: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(seed.as_bytes());
        Self(hex::encode(hasher.finalize()))
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

/// Default seed: crate version followed by the base64 payload.
///
/// Records without a buffered payload are not cacheable.
pub fn default_key(record: &Record) -> Option<String> {
    record
        .bytes()
        .map(|bytes| format!("{}{}", env!("CARGO_PKG_VERSION"), BASE64.encode(bytes)))
}

/// Derive the fingerprint for a record.
///
/// Returns `Ok(None)` when the key function yields no seed or an empty one;
/// such records bypass lookup and storage entirely.
pub async fn derive_key(record: &Record, key: &KeyFn) -> Result<Option<Fingerprint>, Error> {
    let seed = key
        .call(record)
        .await
        .map_err(|e| Error::KeyDerivation(e.to_string()))?;

    Ok(seed.filter(|s| !s.is_empty()).map(|s| Fingerprint::from_seed(&s)))
}
