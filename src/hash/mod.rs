// src/hash/mod.rs

//! Digest algorithms and encodings for artifact verification
//!
//! Repository feeds declare checksums in several shapes:
//!
//! | Feed            | Algorithm | Encoding   |
//! |-----------------|-----------|------------|
//! | Debian Packages | SHA-256 / SHA-1 / MD5 | hex |
//! | RPM primary.xml | SHA-256 / SHA-1 / SHA-512 | hex |
//! | Arch desc       | SHA-256 / MD5 | hex |
//! | Alpine APKINDEX | SHA-1 (control segment only) | base64, `Q1` prefix |
//! | Homebrew        | SHA-256   | hex        |
//! | Nix narinfo     | SHA-256   | Nix base32 |
//! | NuGet feed      | SHA-512   | base64     |
//!
//! The algorithm is always taken from the record, never assumed.

pub mod nixbase32;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;
use thiserror::Error;

/// Hash algorithm selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// MD5 (16 bytes, legacy, not for security)
    Md5,
    /// SHA-1 (20 bytes, legacy)
    Sha1,
    /// SHA-256 (32 bytes)
    #[default]
    Sha256,
    /// SHA-512 (64 bytes)
    Sha512,
}

impl HashAlgorithm {
    /// Get the hash output length in bytes
    #[inline]
    pub const fn output_len(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    /// Get the algorithm name as a string
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "md5" | "md5sum" => Ok(Self::Md5),
            "sha1" | "sha-1" | "sha" => Ok(Self::Sha1),
            "sha256" | "sha-256" | "sha256sum" => Ok(Self::Sha256),
            "sha512" | "sha-512" => Ok(Self::Sha512),
            _ => Err(HashError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Textual encoding of a digest value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestEncoding {
    #[default]
    Hex,
    Base64,
    /// Nix's restricted 32-character alphabet
    NixBase32,
}

impl DigestEncoding {
    /// Render raw digest bytes in this encoding
    pub fn encode(&self, digest: &[u8]) -> String {
        match self {
            Self::Hex => hex::encode(digest),
            Self::Base64 => BASE64.encode(digest),
            Self::NixBase32 => nixbase32::encode(digest),
        }
    }

    /// Decode a digest value to raw bytes
    pub fn decode(&self, value: &str) -> Result<Vec<u8>, HashError> {
        match self {
            Self::Hex => hex::decode(value).map_err(|_| HashError::InvalidEncoding {
                encoding: *self,
                value: value.to_string(),
            }),
            Self::Base64 => BASE64.decode(value).map_err(|_| HashError::InvalidEncoding {
                encoding: *self,
                value: value.to_string(),
            }),
            Self::NixBase32 => nixbase32::decode(value).ok_or_else(|| HashError::InvalidEncoding {
                encoding: *self,
                value: value.to_string(),
            }),
        }
    }
}

/// Which bytes of the artifact the digest covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumScope {
    /// The whole downloaded file
    #[default]
    WholeFile,
    /// Only the gzip member holding an `.apk`'s `.PKGINFO`
    ApkControlSegment,
}

/// Hash computation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    /// Unknown hash algorithm name
    #[error("unknown hash algorithm: {0}")]
    UnknownAlgorithm(String),
    /// Digest has the wrong length for its algorithm
    #[error("invalid digest length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
    /// Digest value is not valid in its encoding
    #[error("invalid {encoding:?} digest: {value}")]
    InvalidEncoding { encoding: DigestEncoding, value: String },
}

/// A declared checksum as carried by a package record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: HashAlgorithm,
    pub encoding: DigestEncoding,
    /// Digest in `encoding`, exactly as the feed spelled it
    pub value: String,
    #[serde(default)]
    pub scope: ChecksumScope,
}

impl Checksum {
    /// Hex-encoded whole-file checksum, the common case
    pub fn hex(algorithm: HashAlgorithm, value: impl Into<String>) -> Self {
        Self {
            algorithm,
            encoding: DigestEncoding::Hex,
            value: value.into().to_lowercase(),
            scope: ChecksumScope::WholeFile,
        }
    }

    pub fn new(
        algorithm: HashAlgorithm,
        encoding: DigestEncoding,
        value: impl Into<String>,
    ) -> Self {
        Self {
            algorithm,
            encoding,
            value: value.into(),
            scope: ChecksumScope::WholeFile,
        }
    }

    pub fn with_scope(mut self, scope: ChecksumScope) -> Self {
        self.scope = scope;
        self
    }

    /// Parse Nix's `algo:digest` notation (`sha256:1b8m0...`)
    pub fn parse_nix(s: &str) -> Result<Self, HashError> {
        let (algo, digest) = s
            .split_once(':')
            .ok_or_else(|| HashError::UnknownAlgorithm(s.to_string()))?;
        let algorithm: HashAlgorithm = algo.parse()?;
        // Nix also emits hex digests when the length says so
        let encoding = if digest.len() == algorithm.output_len() * 2 {
            DigestEncoding::Hex
        } else {
            DigestEncoding::NixBase32
        };
        let checksum = Self::new(algorithm, encoding, digest);
        checksum.digest_bytes()?;
        Ok(checksum)
    }

    /// Parse Alpine's `Q1<base64 sha1>` notation
    pub fn parse_apk(s: &str) -> Result<Self, HashError> {
        let digest = s
            .strip_prefix("Q1")
            .ok_or_else(|| HashError::UnknownAlgorithm(s.to_string()))?;
        let checksum = Self::new(HashAlgorithm::Sha1, DigestEncoding::Base64, digest)
            .with_scope(ChecksumScope::ApkControlSegment);
        checksum.digest_bytes()?;
        Ok(checksum)
    }

    /// Decode and length-check the declared digest
    pub fn digest_bytes(&self) -> Result<Vec<u8>, HashError> {
        let bytes = self.encoding.decode(&self.value)?;
        if bytes.len() != self.algorithm.output_len() {
            return Err(HashError::InvalidLength {
                expected: self.algorithm.output_len(),
                got: bytes.len(),
            });
        }
        Ok(bytes)
    }

    /// Whether raw digest bytes match this checksum
    pub fn matches(&self, digest: &[u8]) -> bool {
        match self.digest_bytes() {
            Ok(expected) => expected == digest,
            Err(_) => false,
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

/// Hasher that can compute digests using any supported algorithm
pub struct Hasher {
    algorithm: HashAlgorithm,
    state: HasherState,
}

enum HasherState {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    /// Create a new hasher with the specified algorithm
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let state = match algorithm {
            HashAlgorithm::Md5 => HasherState::Md5(Md5::new()),
            HashAlgorithm::Sha1 => HasherState::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => HasherState::Sha256(Sha256::new()),
            HashAlgorithm::Sha512 => HasherState::Sha512(Sha512::new()),
        };
        Self { algorithm, state }
    }

    /// Update the hasher with more data
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Md5(h) => h.update(data),
            HasherState::Sha1(h) => h.update(data),
            HasherState::Sha256(h) => h.update(data),
            HasherState::Sha512(h) => h.update(data),
        }
    }

    /// Finalize and return the raw digest
    pub fn finalize(self) -> Vec<u8> {
        match self.state {
            HasherState::Md5(h) => h.finalize().to_vec(),
            HasherState::Sha1(h) => h.finalize().to_vec(),
            HasherState::Sha256(h) => h.finalize().to_vec(),
            HasherState::Sha512(h) => h.finalize().to_vec(),
        }
    }

    #[inline]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }
}

/// Compute the digest of a byte slice
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Vec<u8> {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Compute the digest of data from a reader
pub fn hash_reader<R: Read>(algorithm: HashAlgorithm, reader: &mut R) -> io::Result<Vec<u8>> {
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Hex SHA-256 of a byte slice
#[inline]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(hash_bytes(HashAlgorithm::Sha256, data))
}
