//! Digest computation for integrity verification
//!
//! Streams files through MD5, SHA-1, SHA-256 or SHA-512 with a single
//! fixed-size buffer and returns lowercase hex. Supports single-pass
//! copy-and-hash via [`StreamingHasher`]. Digests are a pure function of
//! the byte sequence; the buffer size never changes the result.

use crate::config::HashAlgorithm;
use crate::error::{IoResultExt, Result};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Unified hasher over the supported algorithms
pub enum Hasher {
    /// MD5
    Md5(Md5),
    /// SHA-1
    Sha1(Sha1),
    /// SHA-256
    Sha256(Sha256),
    /// SHA-512
    Sha512(Sha512),
}

impl Hasher {
    /// Create a new hasher for the given algorithm
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Self::Md5(Md5::new()),
            HashAlgorithm::Sha1 => Self::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    /// The algorithm this hasher uses
    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            Self::Md5(_) => HashAlgorithm::Md5,
            Self::Sha1(_) => HashAlgorithm::Sha1,
            Self::Sha256(_) => HashAlgorithm::Sha256,
            Self::Sha512(_) => HashAlgorithm::Sha512,
        }
    }

    /// Feed more data
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    /// Finalize and return the lowercase hex digest
    pub fn finalize(self) -> String {
        match self {
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Compute the digest of a file, streaming with the default 32 MiB buffer
pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> Result<String> {
    hash_file_with_buffer(path, algorithm, crate::config::DEFAULT_HASH_BUFFER)
}

/// Compute the digest of a file with a custom read-buffer size.
///
/// Reads sequentially; the whole file is never held in memory. Open and
/// read failures are reported verbatim with path context; this layer does
/// not retry.
pub fn hash_file_with_buffer(
    path: &Path,
    algorithm: HashAlgorithm,
    buffer_size: usize,
) -> Result<String> {
    let mut file = File::open(path).with_path(path)?;
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; buffer_size.max(1)];

    loop {
        let bytes_read = file.read(&mut buffer).with_path(path)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize())
}

/// Compute the digest of in-memory data
pub fn hash_bytes(data: &[u8], algorithm: HashAlgorithm) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Streaming hasher for copy-and-hash tee operations
pub struct StreamingHasher {
    hasher: Hasher,
    bytes_processed: u64,
}

impl StreamingHasher {
    /// Create a new streaming hasher
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            hasher: Hasher::new(algorithm),
            bytes_processed: 0,
        }
    }

    /// Process one chunk
    pub fn process(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes_processed += data.len() as u64;
    }

    /// Bytes processed so far
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    /// Finalize and return the lowercase hex digest
    pub fn finalize(self) -> String {
        self.hasher.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::TempDir;

    const ALL: [HashAlgorithm; 4] = [
        HashAlgorithm::Md5,
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha512,
    ];

    #[test]
    fn test_known_digests() {
        // Standard test vectors for the empty input
        assert_eq!(
            hash_bytes(b"", HashAlgorithm::Md5),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(
            hash_bytes(b"", HashAlgorithm::Sha1),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
        assert_eq!(
            hash_bytes(b"", HashAlgorithm::Sha256),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            hash_bytes(b"abc", HashAlgorithm::Sha256),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_digest_lengths() {
        for algorithm in ALL {
            let digest = hash_bytes(b"payload", algorithm);
            assert_eq!(digest.len(), algorithm.output_size() * 2);
            assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn test_file_matches_memory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let content: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        File::create(&path).unwrap().write_all(&content).unwrap();

        for algorithm in ALL {
            assert_eq!(
                hash_file(&path, algorithm).unwrap(),
                hash_bytes(&content, algorithm)
            );
        }
    }

    #[test]
    fn test_streaming_matches_direct() {
        let mut hasher = StreamingHasher::new(HashAlgorithm::Sha256);
        hasher.process(b"Hello, ");
        hasher.process(b"World!");
        assert_eq!(hasher.bytes_processed(), 13);
        assert_eq!(
            hasher.finalize(),
            hash_bytes(b"Hello, World!", HashAlgorithm::Sha256)
        );
    }

    #[test]
    fn test_open_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent");
        let err = hash_file(&missing, HashAlgorithm::Sha256).unwrap_err();
        assert_eq!(err.path().unwrap(), &missing);
    }

    proptest! {
        // The digest is independent of the read-buffer size.
        #[test]
        fn digest_independent_of_buffer_size(
            content in proptest::collection::vec(any::<u8>(), 0..4096),
            buffer_size in 1usize..512,
        ) {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("f");
            std::fs::write(&path, &content).unwrap();

            let reference = hash_bytes(&content, HashAlgorithm::Sha256);
            let streamed =
                hash_file_with_buffer(&path, HashAlgorithm::Sha256, buffer_size).unwrap();
            prop_assert_eq!(reference, streamed);
        }
    }
}
