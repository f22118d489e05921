// src/index/alpine.rs

//! Alpine `APKINDEX.tar.gz` parser
//!
//! The index is a gzip tar (usually a signature segment followed by the
//! index segment) whose `APKINDEX` member holds single-letter stanzas.

use std::io::Read;
use tracing::debug;

use super::stanza::{Stanza, StanzaSyntax, feed_text, stanzas};
use super::{FeedContext, IndexParser};
use crate::compression::{CompressionFormat, create_decoder};
use crate::ecosystem::Ecosystem;
use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::record::PackageRecord;

/// Single-letter codes carried into `PackageRecord::extra`
const EXTRA_CODES: [(&str, &str); 5] = [
    ("o", "origin"),
    ("I", "installed_size"),
    ("U", "url"),
    ("L", "license"),
    ("m", "maintainer"),
];

pub struct AlpineIndexParser {
    context: FeedContext,
}

impl AlpineIndexParser {
    /// `context.base_url` is the `<branch>/<repo>/<arch>` directory
    pub fn new(context: FeedContext) -> Self {
        Self { context }
    }

    /// Pull the `APKINDEX` member out of the index tarball
    fn index_text(feed: &[u8]) -> Result<Vec<u8>> {
        let format = CompressionFormat::from_magic_bytes(feed);
        if format == CompressionFormat::None
            && (feed.starts_with(b"C:") || feed.starts_with(b"P:"))
        {
            // Bare APKINDEX text, as written by local tooling
            return Ok(feed.to_vec());
        }

        let decoder = create_decoder(feed, format)?;
        let mut archive = tar::Archive::new(decoder);
        let entries = archive
            .entries()
            .map_err(|e| Error::Format(format!("APKINDEX archive is unreadable: {e}")))?;
        for entry in entries {
            let mut entry =
                entry.map_err(|e| Error::Format(format!("corrupt APKINDEX archive: {e}")))?;
            let path = entry
                .path()
                .map_err(|e| Error::Format(format!("bad APKINDEX member path: {e}")))?
                .to_string_lossy()
                .into_owned();
            if path.trim_start_matches("./") == "APKINDEX" {
                let mut text = Vec::new();
                entry
                    .read_to_end(&mut text)
                    .map_err(|e| Error::Format(format!("truncated APKINDEX member: {e}")))?;
                return Ok(text);
            }
            debug!("Skipping APKINDEX archive member {}", path);
        }
        Err(Error::Format("index archive has no APKINDEX member".to_string()))
    }

    fn record_from(&self, stanza: &Stanza) -> Result<PackageRecord> {
        let name = stanza.require("P")?;
        let version = stanza.require("V")?;
        let locator = self.context.locator(&format!("{name}-{version}.apk"));

        let mut record = PackageRecord::new(Ecosystem::Alpine, name, version, locator);
        self.context.stamp(&mut record);
        record.architecture = stanza.get("A").unwrap_or("noarch").to_string();
        record.size = stanza.get("S").and_then(|s| s.parse().ok());
        record.description = stanza.get_nonempty("T").map(str::to_string);
        record.depends = stanza
            .get("D")
            .unwrap_or_default()
            .split_whitespace()
            .filter(|dep| !dep.starts_with('!'))
            .map(str::to_string)
            .collect();
        record.provides = stanza
            .get("p")
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        record.checksum = match stanza.get_nonempty("C") {
            Some(value) => match Checksum::parse_apk(value) {
                Ok(checksum) => Some(checksum),
                Err(e) => {
                    debug!("Ignoring checksum of {}: {}", name, e);
                    None
                }
            },
            None => None,
        };
        for (code, key) in EXTRA_CODES {
            if let Some(value) = stanza.get_nonempty(code) {
                record.extra.insert(key.to_string(), value.to_string());
            }
        }
        Ok(record)
    }
}

impl IndexParser for AlpineIndexParser {
    fn parse(&self, feed: &[u8]) -> Result<Vec<PackageRecord>> {
        let text = Self::index_text(feed)?;
        let text = feed_text(&text)?;
        let mut records = Vec::new();

        for stanza in stanzas(text, StanzaSyntax::APKINDEX) {
            if !stanza.contains("P") && !stanza.contains("V") {
                debug!(
                    "Skipping APKINDEX stanza at line {} with no package",
                    stanza.line
                );
                continue;
            }
            records.push(self.record_from(&stanza)?);
        }

        debug!(
            "Parsed {} Alpine records from {}",
            records.len(), self.context.origin
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{ChecksumScope, HashAlgorithm};

    const SINGLE: &str = "\
C:Q1pXI9nC0g6R3e4Tq9xvZ0dhRH7eA=
P:openssl
V:3.1.4-r5
A:x86_64
S:369876
I:1564672
T:Toolkit for Transport Layer Security (TLS)
U:https://www.openssl.org/
L:Apache-2.0
o:openssl
m:Ariadne Conill <ariadne@dereferenced.org>
D:libcrypto3=3.1.4-r5 libssl3=3.1.4-r5 so:libc.musl-x86_64.so.1 !libressl
p:cmd:openssl=3.1.4-r5

";

    fn index_tarball(text: &str) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, body) in [("DESCRIPTION", "v3.20.0\n"), ("APKINDEX", text)] {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, body.as_bytes())
                .unwrap();
        }
        let tar = builder.into_inner().unwrap();
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        std::io::Write::write_all(&mut encoder, &tar).unwrap();
        encoder.finish().unwrap()
    }

    fn parser() -> AlpineIndexParser {
        AlpineIndexParser::new(FeedContext::new(
            "alpine-main",
            0,
            "https://dl-cdn.alpinelinux.org/alpine/v3.20/main/x86_64",
        ))
    }

    #[test]
    fn test_single_package_exact_fields() {
        let records = parser().parse(&index_tarball(SINGLE)).unwrap();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.name, "openssl");
        assert_eq!(rec.version, "3.1.4-r5");
        assert_eq!(rec.architecture, "x86_64");
        assert_eq!(rec.size, Some(369876));
        assert_eq!(
            rec.locator,
            "https://dl-cdn.alpinelinux.org/alpine/v3.20/main/x86_64/openssl-3.1.4-r5.apk"
        );
        assert_eq!(
            rec.depends,
            vec!["libcrypto3=3.1.4-r5", "libssl3=3.1.4-r5", "so:libc.musl-x86_64.so.1"]
        );
        assert_eq!(rec.provides, vec!["cmd:openssl=3.1.4-r5"]);
        let checksum = rec.checksum.as_ref().unwrap();
        assert_eq!(checksum.algorithm, HashAlgorithm::Sha1);
        assert_eq!(checksum.scope, ChecksumScope::ApkControlSegment);
        assert_eq!(checksum.value, "pXI9nC0g6R3e4Tq9xvZ0dhRH7eA=");
        assert_eq!(rec.extra.get("origin").map(String::as_str), Some("openssl"));
        assert_eq!(
            rec.description.as_deref(),
            Some("Toolkit for Transport Layer Security (TLS)")
        );
    }

    #[test]
    fn test_plain_text_index() {
        let records = parser().parse(SINGLE.as_bytes()).unwrap();
        assert_eq!(records[0].name, "openssl");
    }

    #[test]
    fn test_stanzas_without_blank_separator() {
        let text = "P:a\nV:1\nP:b\nV:2\n";
        let records = parser().parse(&index_tarball(text)).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].name, "b");
    }

    #[test]
    fn test_missing_version_is_format_error() {
        let result = parser().parse(&index_tarball("P:broken\nA:x86_64\n"));
        assert!(matches!(result, Err(Error::Format(_))));
    }

    #[test]
    fn test_archive_without_index() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(1);
        header.set_cksum();
        builder
            .append_data(&mut header, "DESCRIPTION", &b"x"[..])
            .unwrap();
        let tar = builder.into_inner().unwrap();
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        std::io::Write::write_all(&mut encoder, &tar).unwrap();
        let result = parser().parse(&encoder.finish().unwrap());
        assert!(matches!(result, Err(Error::Format(_))));
    }
}
