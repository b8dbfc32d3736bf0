//! SHA256 hashing for event ids and content addressing.

use std::io::Read;

use sha2::{Digest as _, Sha256};

use crate::error::{Error, Result};

/// Size in bytes of a SHA256 digest.
pub const DIGEST_LEN: usize = 32;

/// A raw SHA256 digest.
pub type Digest = [u8; DIGEST_LEN];

/// Default chunk size used when hashing streams.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Single SHA256 hash.
#[inline]
pub fn sha256(data: &[u8]) -> Digest {
    let hash = Sha256::digest(data);
    let mut result = [0u8; DIGEST_LEN];
    result.copy_from_slice(&hash);
    result
}

/// Lowercase hex rendering of a digest, as used for event ids.
pub fn digest_to_hex(digest: &Digest) -> String {
    hex::encode(digest)
}

/// Incremental hasher that also counts the bytes fed into it.
///
/// Lets a stream be hashed and measured in one pass.
#[derive(Debug, Clone, Default)]
pub struct StreamHasher {
    hasher: Sha256,
    bytes_read: u64,
}

impl StreamHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes_read += chunk.len() as u64;
    }

    /// Bytes consumed so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Finish and return the digest with the total byte count.
    pub fn finalize(self) -> (Digest, u64) {
        let hash = self.hasher.finalize();
        let mut result = [0u8; DIGEST_LEN];
        result.copy_from_slice(&hash);
        (result, self.bytes_read)
    }
}

/// Hash a blocking reader in chunks of `chunk_size` bytes.
///
/// Returns the digest and the number of bytes read. A read error discards
/// everything consumed so far.
pub fn sha256_reader<R: Read>(mut reader: R, chunk_size: usize) -> std::io::Result<(Digest, u64)> {
    if chunk_size == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "chunk size must be non-zero",
        ));
    }

    let mut buffer = vec![0u8; chunk_size];
    let mut hasher = StreamHasher::new();
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize())
}

/// Parse a 64-char hex digest.
pub fn digest_from_hex(value: &str) -> Result<Digest> {
    let mut out = [0u8; DIGEST_LEN];
    hex::decode_to_slice(value, &mut out)
        .map_err(|e| Error::InvalidEvent(format!("bad digest hex {}: {}", value, e)))?;
    Ok(out)
}
