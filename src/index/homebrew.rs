// src/index/homebrew.rs

//! Homebrew formula metadata and bottle manifests
//!
//! `formula.json` lists every formula with its bottles keyed by platform tag.
//! Bottles live in an OCI registry; the per-formula image index maps tags
//! to blob digests and is consulted when the formula JSON cannot name the
//! wanted bottle (a pinned older version, or a tag with no prebuilt bottle).

use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use super::{FeedContext, IndexParser, sniff_decompress};
use crate::ecosystem::Ecosystem;
use crate::error::{Error, Result};
use crate::hash::{Checksum, HashAlgorithm};
use crate::record::PackageRecord;

/// Bottle tag for platform-independent formulae
pub const ALL_TAG: &str = "all";

/// Default bottle registry
pub const DEFAULT_REGISTRY: &str = "https://ghcr.io/v2/homebrew/core";

/// Media type of an OCI image index
pub const OCI_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Extra key marking a record whose bottle must come from the image index
pub const EXTRA_BOTTLE_MISSING: &str = "bottle_missing";

/// Homebrew formula metadata
#[derive(Debug, Clone, Deserialize)]
pub struct HomebrewFormula {
    /// Formula name (e.g., "jq")
    pub name: String,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    pub versions: Versions,
    #[serde(default)]
    pub revision: u32,
    /// Runtime dependencies
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub oldnames: Vec<String>,
    #[serde(default)]
    pub bottle: Option<Bottle>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Versions {
    pub stable: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Bottle {
    pub stable: BottleStable,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BottleStable {
    #[serde(default)]
    pub files: HashMap<String, BottleFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BottleFile {
    pub url: String,
    pub sha256: String,
}

impl HomebrewFormula {
    /// Bottle file for a tag, falling back to `all`
    pub fn get_bottle(&self, tag: &str) -> Option<(&str, &BottleFile)> {
        let files = &self.bottle.as_ref()?.stable.files;
        files
            .get_key_value(tag)
            .or_else(|| files.get_key_value(ALL_TAG))
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Version with the `_<revision>` suffix bottles are published under
    pub fn pkg_version(&self) -> String {
        if self.revision > 0 {
            format!("{}_{}", self.versions.stable, self.revision)
        } else {
            self.versions.stable.clone()
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FormulaFeed {
    Many(Vec<HomebrewFormula>),
    One(Box<HomebrewFormula>),
}

/// Registry repository name for a formula (`openssl@3` → `openssl/3`)
pub fn oci_repository(name: &str) -> String {
    name.replace('@', "/").replace('+', "x")
}

pub struct HomebrewFormulaParser {
    context: FeedContext,
    bottle_tag: String,
}

impl HomebrewFormulaParser {
    pub fn new(context: FeedContext, bottle_tag: impl Into<String>) -> Self {
        Self {
            context,
            bottle_tag: bottle_tag.into(),
        }
    }

    /// Canonical record for one formula
    pub fn record_for(&self, formula: &HomebrewFormula) -> PackageRecord {
        let (locator, architecture, checksum) = match formula.get_bottle(&self.bottle_tag) {
            Some((tag, file)) => (
                file.url.clone(),
                tag.to_string(),
                Some(Checksum::hex(HashAlgorithm::Sha256, &file.sha256)),
            ),
            None => (String::new(), self.bottle_tag.clone(), None),
        };

        let mut record = PackageRecord::new(
            Ecosystem::Homebrew,
            &formula.name,
            &formula.versions.stable,
            locator,
        );
        self.context.stamp(&mut record);
        record.release = (formula.revision > 0).then(|| formula.revision.to_string());
        record.architecture = architecture;
        record.checksum = checksum;
        record.depends = formula.dependencies.clone();
        record.provides = formula
            .aliases
            .iter()
            .chain(&formula.oldnames)
            .cloned()
            .collect();
        record.description = formula.desc.clone();
        if let Some(homepage) = &formula.homepage {
            record.extra.insert("homepage".to_string(), homepage.clone());
        }
        if record.checksum.is_none() {
            record
                .extra
                .insert(EXTRA_BOTTLE_MISSING.to_string(), "true".to_string());
        }
        record
    }
}

impl IndexParser for HomebrewFormulaParser {
    fn parse(&self, feed: &[u8]) -> Result<Vec<PackageRecord>> {
        let data = sniff_decompress(feed)?;
        let formulae = match serde_json::from_slice::<FormulaFeed>(&data)? {
            FormulaFeed::Many(list) => list,
            FormulaFeed::One(one) => vec![*one],
        };
        let records: Vec<PackageRecord> = formulae.iter().map(|f| self.record_for(f)).collect();
        debug!(
            "Parsed {} Homebrew formulae from {} for tag {}",
            records.len(),
            self.context.origin,
            self.bottle_tag
        );
        Ok(records)
    }
}

/// OCI image index listing one formula version's bottles
#[derive(Debug, Clone, Deserialize)]
pub struct ImageIndex {
    #[serde(rename = "mediaType", default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<ManifestDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManifestDescriptor {
    pub digest: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(rename = "os.version", default)]
    pub os_version: Option<String>,
}

/// A bottle blob located through the image index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BottleRef {
    /// Bare hex SHA-256 of the bottle blob
    pub sha256: String,
    /// Tag the bottle was built for
    pub tag: String,
}

impl ImageIndex {
    pub fn parse(json: &[u8]) -> Result<Self> {
        let index: Self = serde_json::from_slice(json)?;
        if let Some(media_type) = &index.media_type {
            if media_type != OCI_IMAGE_INDEX {
                return Err(Error::Format(format!("expected an OCI image index, got {media_type}")));
            }
        }
        Ok(index)
    }

    /// Bottle for a tag, falling back to `all`
    ///
    /// Manifests are matched by their `org.opencontainers.image.ref.name`
    /// annotation (`<version>.<tag>`). The blob digest comes from
    /// `sh.brew.bottle.digest` when present.
    pub fn bottle_for(&self, tag: &str) -> Option<BottleRef> {
        self.find_tag(tag).or_else(|| self.find_tag(ALL_TAG))
    }

    fn find_tag(&self, tag: &str) -> Option<BottleRef> {
        let suffix = format!(".{tag}");
        self.manifests.iter().find_map(|manifest| {
            let ref_name = manifest.annotations.get("org.opencontainers.image.ref.name")?;
            if !ref_name.ends_with(&suffix) {
                return None;
            }
            let digest = manifest
                .annotations
                .get("sh.brew.bottle.digest")
                .map(String::as_str)
                .unwrap_or(&manifest.digest);
            Some(BottleRef {
                sha256: digest.trim_start_matches("sha256:").to_string(),
                tag: tag.to_string(),
            })
        })
    }

    /// Tags available in this index
    pub fn tags(&self) -> Vec<String> {
        self.manifests
            .iter()
            .filter_map(|m| m.annotations.get("org.opencontainers.image.ref.name"))
            .filter_map(|name| name.rsplit_once('.').map(|(_, tag)| tag.to_string()))
            .collect()
    }
}

/// Blob URL of a bottle in the registry
pub fn blob_url(registry: &str, formula: &str, sha256: &str) -> String {
    format!(
        "{}/{}/blobs/sha256:{}",
        registry.trim_end_matches('/'),
        oci_repository(formula),
        sha256
    )
}

/// Image index URL of one formula version
pub fn manifest_url(registry: &str, formula: &str, version: &str) -> String {
    format!(
        "{}/{}/manifests/{}",
        registry.trim_end_matches('/'),
        oci_repository(formula),
        version
    )
}
