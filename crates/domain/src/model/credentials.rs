use hex::encode as hex_encode;
use sha3::{Digest, Sha3_256};
use thiserror::Error;

/// Errors emitted while minting credentials.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("system randomness unavailable: {0}")]
    Entropy(String),
}

/// Returns `bytes` random bytes from the OS, hex encoded.
pub fn generate_hex_secret(bytes: usize) -> Result<String, CredentialError> {
    let mut buf = vec![0u8; bytes];
    getrandom::fill(&mut buf).map_err(|err| CredentialError::Entropy(err.to_string()))?;
    Ok(hex_encode(buf))
}

/// SHA3-256 digest of a partner API secret, hex encoded. Only the digest is
/// persisted.
pub fn hash_api_secret(secret: &str) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(secret.as_bytes());
    hex_encode(hasher.finalize())
}

/// Byte comparison whose running time depends only on the input lengths.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Lookup key for a contributor bearer token. The raw token never reaches
/// storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenHash(String);

impl TokenHash {
    pub fn of(raw_token: &str) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(raw_token.trim().as_bytes());
        Self(hex_encode(hasher.finalize()))
    }

    /// Wraps an already-hashed value read back from storage.
    pub fn from_hex(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Freshly minted partner credentials. The secret is shown once at
/// provisioning time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl PartnerCredentials {
    pub fn generate() -> Result<Self, CredentialError> {
        Ok(Self {
            api_key: generate_hex_secret(32)?,
            api_secret: generate_hex_secret(32)?,
        })
    }

    pub fn secret_hash(&self) -> String {
        hash_api_secret(&self.api_secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_plain_equality() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer"));
    }

    #[test]
    fn secret_hash_is_deterministic() {
        let left = hash_api_secret("s3cret");
        assert_eq!(left, hash_api_secret("s3cret"));
        assert_ne!(left, hash_api_secret("s3cret!"));
        assert_eq!(left.len(), 64);
    }

    #[test]
    fn generated_credentials_are_distinct_hex() {
        let creds = PartnerCredentials::generate().expect("entropy available");
        assert_eq!(creds.api_key.len(), 64);
        assert!(creds.api_key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(creds.api_key, creds.api_secret);
        assert_eq!(creds.secret_hash(), hash_api_secret(&creds.api_secret));
    }

    #[test]
    fn token_hash_ignores_surrounding_whitespace() {
        assert_eq!(TokenHash::of(" abc "), TokenHash::of("abc"));
    }
}
