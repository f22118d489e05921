// src/index/debian.rs

//! Debian/Ubuntu `Packages` index parser
//!
//! Reads the RFC-822 style stanzas published under
//! `dists/<suite>/<component>/binary-<arch>/Packages[.gz|.xz]`.

use tracing::debug;

use super::stanza::{Stanza, StanzaSyntax, feed_text, stanzas};
use super::{FeedContext, IndexParser, sniff_decompress};
use crate::ecosystem::Ecosystem;
use crate::error::Result;
use crate::hash::{Checksum, HashAlgorithm};
use crate::record::PackageRecord;

const MANDATORY: [&str; 3] = ["Package", "Version", "Filename"];

/// Checksum fields, strongest first
const CHECKSUM_FIELDS: [(&str, HashAlgorithm); 3] = [
    ("SHA256", HashAlgorithm::Sha256),
    ("SHA1", HashAlgorithm::Sha1),
    ("MD5sum", HashAlgorithm::Md5),
];

/// Fields carried into `PackageRecord::extra`
const EXTRA_FIELDS: [(&str, &str); 4] = [
    ("Section", "section"),
    ("Source", "source"),
    ("Homepage", "homepage"),
    ("Installed-Size", "installed_size"),
];

pub struct DebianPackagesParser {
    context: FeedContext,
}

impl DebianPackagesParser {
    /// `context.base_url` is the mirror root that `Filename` is relative to
    pub fn new(context: FeedContext) -> Self {
        Self { context }
    }

    fn record_from(&self, stanza: &Stanza) -> Result<PackageRecord> {
        let name = stanza.require("Package")?;
        let version = stanza.require("Version")?;
        let filename = stanza.require("Filename")?;

        let mut record = PackageRecord::new(
            Ecosystem::Debian,
            name,
            version,
            self.context.locator(filename),
        );
        self.context.stamp(&mut record);
        record.architecture = stanza.get("Architecture").unwrap_or_default().to_string();
        record.size = stanza.get("Size").and_then(|s| match s.parse() {
            Ok(size) => Some(size),
            Err(_) => {
                debug!("Ignoring bad Size '{}' for {}", s, name);
                None
            }
        });
        record.checksum = CHECKSUM_FIELDS.iter().find_map(|(field, algorithm)| {
            stanza
                .get_nonempty(field)
                .map(|value| Checksum::hex(*algorithm, value))
        });
        record.depends = ["Pre-Depends", "Depends"]
            .iter()
            .filter_map(|field| stanza.get(field))
            .flat_map(split_relations)
            .collect();
        record.provides = stanza
            .get("Provides")
            .map(split_relations)
            .unwrap_or_default();
        record.description = stanza
            .get("Description")
            .and_then(|d| d.lines().next())
            .map(str::to_string);
        for (field, key) in EXTRA_FIELDS {
            if let Some(value) = stanza.get_nonempty(field) {
                record.extra.insert(key.to_string(), value.to_string());
            }
        }
        Ok(record)
    }
}

/// Split a comma-separated relation field; `a | b` groups stay whole
fn split_relations(field: &str) -> Vec<String> {
    field
        .split(',')
        .map(|rel| rel.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|rel| !rel.is_empty())
        .collect()
}

impl IndexParser for DebianPackagesParser {
    fn parse(&self, feed: &[u8]) -> Result<Vec<PackageRecord>> {
        let data = sniff_decompress(feed)?;
        let text = feed_text(&data)?;
        let mut records = Vec::new();

        for stanza in stanzas(text, StanzaSyntax::DEBIAN) {
            if !MANDATORY.iter().any(|field| stanza.contains(field)) {
                debug!(
                    "Skipping stanza at line {} with no package fields",
                    stanza.line
                );
                continue;
            }
            records.push(self.record_from(&stanza)?);
        }

        debug!(
            "Parsed {} Debian records from {}",
            records.len(), self.context.origin
        );
        Ok(records)
    }
}
