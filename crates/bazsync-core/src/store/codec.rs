//! Codecs and stable hashing for store keys and values
//!
//! The store never persists Rust types directly: resource ids and entities go
//! through a [`Codec`], and resource ids are addressed by a [`ResourceHash`]
//! computed by a pluggable hasher. This keeps the on-disk layout independent of
//! the in-memory representation.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;

/// Errors raised by codecs
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed value: {0}")]
    Malformed(String),
}

/// Encodes values to bytes and back
pub trait Codec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// serde_json backed codec
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Codec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// 128-bit content hash identifying a resource id
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHash(pub [u8; 16]);

impl ResourceHash {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CodecError> {
        let arr: [u8; 16] = bytes.try_into().map_err(|_| {
            CodecError::Malformed(format!("resource hash must be 16 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for ResourceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ResourceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceHash({})", self)
    }
}

/// Incremental structural hasher.
///
/// Writes are length-prefixed so that `("ab", "c")` and `("a", "bc")` hash
/// differently. The digest is SHA-256 truncated to 128 bits.
#[derive(Default)]
pub struct StableHasher {
    inner: Sha256,
}

impl StableHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.inner.update(value.to_le_bytes());
        self
    }

    pub fn put_str(&mut self, value: &str) -> &mut Self {
        self.put_u32(value.len() as u32);
        self.inner.update(value.as_bytes());
        self
    }

    pub fn finish(self) -> ResourceHash {
        let digest = self.inner.finalize();
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[..16]);
        ResourceHash(out)
    }
}

/// Hash a value with a closure over a fresh [`StableHasher`]
pub fn stable_hash(f: impl FnOnce(&mut StableHasher)) -> ResourceHash {
    let mut hasher = StableHasher::new();
    f(&mut hasher);
    hasher.finish()
}
