// src/compression/mod.rs
//! Unified compression/decompression utilities
//!
//! Provides a consistent interface for the compression formats found in
//! repository feeds and package payloads (gzip, xz, zstd, bzip2).
//! Detection works from a filename suffix or, where no extension exists
//! (an RPM payload, a NAR served without a suffix), from magic bytes.

use std::io::{self, BufRead, Read};
use thiserror::Error;

/// Compression-related errors
#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Failed to create {format} decoder: {source}")]
    DecoderCreation {
        format: &'static str,
        source: io::Error,
    },

    #[error("Failed to decompress {format} data: {source}")]
    Decompression {
        format: &'static str,
        source: io::Error,
    },

    #[error("Unsupported compression format: {0}")]
    UnsupportedFormat(String),
}

/// Supported compression formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionFormat {
    /// No compression (raw data)
    None,
    /// Gzip compression (.gz)
    Gzip,
    /// XZ/LZMA compression (.xz)
    Xz,
    /// Zstandard compression (.zst)
    Zstd,
    /// Bzip2 compression (.bz2)
    Bzip2,
}

/// Longest magic sequence we look for
pub const MAX_MAGIC_LEN: usize = 6;

impl CompressionFormat {
    /// All formats that have a magic signature
    pub const DETECTABLE: [CompressionFormat; 4] = [Self::Gzip, Self::Xz, Self::Zstd, Self::Bzip2];

    /// Detect compression format from file extension
    ///
    /// # Examples
    /// ```
    /// use pkgbridge::compression::CompressionFormat;
    ///
    /// assert_eq!(CompressionFormat::from_extension("Packages.gz"), CompressionFormat::Gzip);
    /// assert_eq!(CompressionFormat::from_extension("core.db.tar.xz"), CompressionFormat::Xz);
    /// assert_eq!(CompressionFormat::from_extension("primary.xml.zst"), CompressionFormat::Zstd);
    /// assert_eq!(CompressionFormat::from_extension("abc.nar.bz2"), CompressionFormat::Bzip2);
    /// assert_eq!(CompressionFormat::from_extension("Packages"), CompressionFormat::None);
    /// ```
    pub fn from_extension(path: &str) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or(path);
        if path.ends_with(".gz") || path.ends_with(".tgz") {
            Self::Gzip
        } else if path.ends_with(".xz") || path.ends_with(".txz") {
            Self::Xz
        } else if path.ends_with(".zst") || path.ends_with(".zstd") {
            Self::Zstd
        } else if path.ends_with(".bz2") || path.ends_with(".tbz2") {
            Self::Bzip2
        } else {
            Self::None
        }
    }

    /// Map a compression name as written in metadata (`Compression: xz`)
    pub fn from_name(name: &str) -> Result<Self, CompressionError> {
        match name.trim().to_lowercase().as_str() {
            "" | "none" | "identity" => Ok(Self::None),
            "gzip" | "gz" => Ok(Self::Gzip),
            "xz" | "lzma" => Ok(Self::Xz),
            "zstd" | "zst" => Ok(Self::Zstd),
            "bzip2" | "bz2" => Ok(Self::Bzip2),
            other => Err(CompressionError::UnsupportedFormat(other.to_string())),
        }
    }

    /// The magic prefix identifying this format
    pub fn magic(&self) -> &'static [u8] {
        match self {
            Self::None => &[],
            Self::Gzip => &[0x1f, 0x8b],
            Self::Xz => &[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00],
            Self::Zstd => &[0x28, 0xb5, 0x2f, 0xfd],
            Self::Bzip2 => b"BZh",
        }
    }

    /// Detect compression format from magic bytes
    ///
    /// Magic bytes:
    /// - Gzip: `1f 8b`
    /// - XZ: `fd 37 7a 58 5a 00` (FD + "7zXZ" + NUL)
    /// - Zstd: `28 b5 2f fd`
    /// - Bzip2: `42 5a 68` ("BZh")
    pub fn from_magic_bytes(data: &[u8]) -> Self {
        Self::DETECTABLE
            .into_iter()
            .find(|format| data.starts_with(format.magic()))
            .unwrap_or(Self::None)
    }

    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Gzip => ".gz",
            Self::Xz => ".xz",
            Self::Zstd => ".zst",
            Self::Bzip2 => ".bz2",
        }
    }

    /// Get a human-readable name for this format
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Xz => "xz",
            Self::Zstd => "zstd",
            Self::Bzip2 => "bzip2",
        }
    }
}

impl std::fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Create a decompressing reader for the given format
///
/// Returns a boxed `Read` implementation that decompresses data on the fly.
/// For `CompressionFormat::None`, returns the reader unchanged. Gzip and xz
/// decoders continue across concatenated members.
pub fn create_decoder<'a, R: Read + 'a>(
    reader: R,
    format: CompressionFormat,
) -> Result<Box<dyn Read + 'a>, CompressionError> {
    match format {
        CompressionFormat::None => Ok(Box::new(reader)),
        CompressionFormat::Gzip => Ok(Box::new(flate2::read::MultiGzDecoder::new(reader))),
        CompressionFormat::Xz => Ok(Box::new(xz2::read::XzDecoder::new_multi_decoder(reader))),
        CompressionFormat::Zstd => {
            let decoder = zstd::Decoder::new(reader).map_err(|e| CompressionError::DecoderCreation {
                format: "zstd",
                source: e,
            })?;
            Ok(Box::new(decoder))
        }
        CompressionFormat::Bzip2 => Ok(Box::new(bzip2::read::MultiBzDecoder::new(reader))),
    }
}

/// Sniff the compression of a buffered stream without consuming it
///
/// Returns the format together with the untouched reader, ready to be
/// handed to [`create_decoder`].
pub fn detect_reader<R: BufRead>(mut reader: R) -> io::Result<(CompressionFormat, R)> {
    let head = reader.fill_buf()?;
    let format = CompressionFormat::from_magic_bytes(head);
    Ok((format, reader))
}

/// Create a decompressing reader, auto-detecting format from the stream head
pub fn create_decoder_sniffed<'a, R: BufRead + 'a>(
    reader: R,
) -> Result<(CompressionFormat, Box<dyn Read + 'a>), CompressionError> {
    let (format, reader) = detect_reader(reader).map_err(|e| CompressionError::DecoderCreation {
        format: "auto",
        source: e,
    })?;
    Ok((format, create_decoder(reader, format)?))
}

/// Decompress a byte slice to a Vec
///
/// Convenience function that detects format from magic bytes and decompresses.
pub fn decompress_auto(data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let format = CompressionFormat::from_magic_bytes(data);
    decompress(data, format)
}

/// Decompress a feed, trusting the filename suffix first and magic bytes second
pub fn decompress_named(name: &str, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
    let by_name = CompressionFormat::from_extension(name);
    let by_magic = CompressionFormat::from_magic_bytes(data);
    let format = if by_name == CompressionFormat::None || by_name != by_magic {
        // Servers sometimes transparently decompress; magic bytes are authoritative
        by_magic
    } else {
        by_name
    };
    decompress(data, format)
}

/// Decompress a byte slice using the specified format
pub fn decompress(data: &[u8], format: CompressionFormat) -> Result<Vec<u8>, CompressionError> {
    if format == CompressionFormat::None {
        return Ok(data.to_vec());
    }
    let mut decoder = create_decoder(data, format)?;
    let mut output = Vec::new();
    decoder
        .read_to_end(&mut output)
        .map_err(|e| CompressionError::Decompression {
            format: format.name(),
            source: e,
        })?;
    Ok(output)
}
