use crate::{FsError, FsResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

pub const CONTENT_HASH_LEN: usize = 64;

/// SHA-256 of a blob in canonical form: exactly 64 lowercase hex characters.
///
/// Two hashes are equal iff their canonical strings are byte-equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hashes `data` and returns the canonical form.
    pub fn of(data: &[u8]) -> Self {
        ContentHash(hex::encode(Sha256::digest(data)))
    }

    pub fn parse(s: impl Into<String>) -> FsResult<Self> {
        let s = s.into();
        if s.len() != CONTENT_HASH_LEN {
            return Err(FsError::InvalidHash(format!(
                "expected {} hex chars, got {}",
                CONTENT_HASH_LEN,
                s.len()
            )));
        }
        if !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(FsError::InvalidHash(format!("not lowercase hex: {}", s)));
        }
        Ok(ContentHash(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The two shard directory names of the on-disk layout: first two and
    /// next two hex characters.
    pub fn shard_prefixes(&self) -> (&str, &str) {
        (&self.0[0..2], &self.0[2..4])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
