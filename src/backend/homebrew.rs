// src/backend/homebrew.rs

//! Homebrew bottles through the OCI registry
//!
//! `formula.json` only describes the stable version's bottles. Pinning
//! another version, or a formula whose feed entry lacks a bottle for the
//! tag, goes through the formula version's OCI image index instead.

use tracing::{debug, info};

use crate::cancel::CancelSignal;
use crate::error::{Error, Result};
use crate::fetch::RepositoryClient;
use crate::hash::{Checksum, HashAlgorithm};
use crate::index::homebrew::{
    EXTRA_BOTTLE_MISSING, ImageIndex, OCI_IMAGE_INDEX, blob_url, manifest_url,
};
use crate::record::PackageRecord;

/// Anonymous registry token accepted by ghcr.io for public images
const ANONYMOUS_TOKEN: &str = "QQ==";

/// Headers every Homebrew request carries
pub fn registry_headers() -> Vec<(&'static str, String)> {
    vec![
        ("Authorization", format!("Bearer {ANONYMOUS_TOKEN}")),
        ("Accept", OCI_IMAGE_INDEX.to_string()),
    ]
}

/// Version as the registry tags it (`1.7.1`, `3.3.1_1` with a revision)
pub fn pkg_version(record: &PackageRecord) -> String {
    match &record.release {
        Some(revision) => format!("{}_{}", record.version, revision),
        None => record.version.clone(),
    }
}

/// Whether a record has to be completed from the image index
pub fn needs_image_index(record: &PackageRecord, pinned: Option<&str>) -> bool {
    record.extra.contains_key(EXTRA_BOTTLE_MISSING)
        || pinned.is_some_and(|version| !record.matches_version(version))
}

/// Point `record` at the bottle for `tag` published under `version`
pub fn resolve_bottle(
    client: &RepositoryClient,
    registry: &str,
    record: &PackageRecord,
    version: &str,
    tag: &str,
    cancel: &CancelSignal,
) -> Result<PackageRecord> {
    let url = manifest_url(registry, &record.name, version);
    debug!("Looking up {} {} bottles at {}", record.name, version, url);
    let index = match client.fetch_bytes(&url, cancel) {
        Ok(bytes) => ImageIndex::parse(&bytes)?,
        Err(Error::NotFound(_)) => {
            return Err(Error::NotFound(format!(
                "{} {} has no published bottles",
                record.name, version
            )));
        }
        Err(e) => return Err(e),
    };

    let bottle = index.bottle_for(tag).ok_or_else(|| {
        Error::NotFound(format!(
            "{} {} has no bottle for {} (available: {})",
            record.name,
            version,
            tag,
            index.tags().join(", ")
        ))
    })?;
    info!("Using {} bottle of {} {}", bottle.tag, record.name, version);

    let mut resolved = record.clone();
    resolved.version = version.to_string();
    resolved.release = None;
    resolved.architecture = bottle.tag.clone();
    resolved.locator = blob_url(registry, &record.name, &bottle.sha256);
    resolved.checksum = Some(Checksum::hex(HashAlgorithm::Sha256, bottle.sha256));
    resolved.size = None;
    resolved.extra.remove(EXTRA_BOTTLE_MISSING);
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecosystem::Ecosystem;

    const SHA: &str = "4c2a4b3e8e0f6d1f1e6a1e0b8b1b1f5d6f1e2d3c4b5a69788796a5b4c3d2e1f0";

    fn image_index(version: &str) -> String {
        format!(
            r#"{{
                "schemaVersion": 2,
                "mediaType": "application/vnd.oci.image.index.v1+json",
                "manifests": [{{
                    "mediaType": "application/vnd.oci.image.manifest.v1+json",
                    "digest": "sha256:{}",
                    "size": 1000,
                    "platform": {{"architecture": "amd64", "os": "linux"}},
                    "annotations": {{
                        "org.opencontainers.image.ref.name": "{version}.x86_64_linux",
                        "sh.brew.bottle.digest": "sha256:{SHA}"
                    }}
                }}]
            }}"#,
            "0".repeat(64)
        )
    }

    fn jq() -> PackageRecord {
        let mut record = PackageRecord::new(Ecosystem::Homebrew, "jq", "1.7.1", "");
        record.extra.insert(EXTRA_BOTTLE_MISSING.to_string(), "true".to_string());
        record
    }

    #[test]
    fn test_pkg_version() {
        let mut record = jq();
        assert_eq!(pkg_version(&record), "1.7.1");
        record.release = Some("1".to_string());
        assert_eq!(pkg_version(&record), "1.7.1_1");
    }

    #[test]
    fn test_needs_image_index() {
        let mut record = jq();
        assert!(needs_image_index(&record, None));
        record.extra.clear();
        assert!(!needs_image_index(&record, None));
        assert!(!needs_image_index(&record, Some("1.7.1")));
        assert!(needs_image_index(&record, Some("1.6")));
    }

    #[test]
    fn test_resolve_bottle_from_index() {
        let registry = tempfile::tempdir().unwrap();
        let manifests = registry.path().join("jq/manifests");
        std::fs::create_dir_all(&manifests).unwrap();
        std::fs::write(manifests.join("1.6"), image_index("1.6")).unwrap();

        let client = RepositoryClient::new().unwrap();
        let cancel = CancelSignal::new();
        let url = registry.path().to_string_lossy().into_owned();
        let resolved =
            resolve_bottle(&client, &url, &jq(), "1.6", "x86_64_linux", &cancel).unwrap();

        assert_eq!(resolved.version, "1.6");
        assert_eq!(resolved.architecture, "x86_64_linux");
        assert_eq!(resolved.locator, format!("{url}/jq/blobs/sha256:{SHA}"));
        assert_eq!(resolved.checksum.unwrap().value, SHA);
        assert!(!resolved.extra.contains_key(EXTRA_BOTTLE_MISSING));

        let missing = resolve_bottle(&client, &url, &jq(), "1.5", "x86_64_linux", &cancel);
        assert!(matches!(missing, Err(Error::NotFound(_))));
        let wrong_tag = resolve_bottle(&client, &url, &jq(), "1.6", "arm64_sonoma", &cancel);
        assert!(matches!(wrong_tag, Err(Error::NotFound(_))));
    }
}
