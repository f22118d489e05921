// src/index/nix.rs

//! Nix binary cache metadata
//!
//! A build farm (Hydra) names the store path of the latest successful build
//! of an attribute; the binary cache's `<hash>.narinfo` describes the NAR
//! holding that path and the store paths it references.

use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

use super::stanza::{StanzaSyntax, feed_text, stanzas};
use super::{FeedContext, IndexParser};
use crate::ecosystem::Ecosystem;
use crate::error::{Error, Result};
use crate::hash::Checksum;
use crate::record::PackageRecord;

/// Store directory every path lives under
pub const STORE_DIR: &str = "/nix/store";

/// Length of the hash part of a store path basename
pub const HASH_LEN: usize = 32;

/// Output installed when the caller does not pick one
pub const DEFAULT_OUTPUT: &str = "out";

/// Basename of a store path (`/nix/store/<hash>-<name>` → `<hash>-<name>`)
pub fn store_basename(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

/// Hash part of a store path or basename
pub fn store_hash(path: &str) -> Result<&str> {
    let base = store_basename(path);
    match base.get(..HASH_LEN) {
        Some(hash) if base.as_bytes().get(HASH_LEN) == Some(&b'-') => Ok(hash),
        _ => Err(Error::Format(format!("'{path}' is not a store path"))),
    }
}

/// Split a derivation name into name and version (`hello-2.12.1`)
///
/// The version starts at the first `-` followed by a digit.
pub fn split_name_version(drv_name: &str) -> (&str, Option<&str>) {
    let bytes = drv_name.as_bytes();
    for (idx, window) in bytes.windows(2).enumerate() {
        if window[0] == b'-' && window[1].is_ascii_digit() {
            return (&drv_name[..idx], Some(&drv_name[idx + 1..]));
        }
    }
    (drv_name, None)
}

/// URL of a store path's narinfo in a binary cache
pub fn narinfo_url(cache_url: &str, store_path: &str) -> Result<String> {
    Ok(format!(
        "{}/{}.narinfo",
        cache_url.trim_end_matches('/'),
        store_hash(store_path)?
    ))
}

/// URL of the latest build of `<attr>.<system>` on a build farm
pub fn latest_build_url(farm_url: &str, jobset: &str, attr: &str, system: &str) -> String {
    format!(
        "{}/job/{}/{}.{}/latest",
        farm_url.trim_end_matches('/'),
        jobset.trim_matches('/'),
        attr,
        system
    )
}

/// One output of a build
#[derive(Debug, Clone, Deserialize)]
pub struct BuildOutput {
    pub path: String,
}

/// Build-farm description of a build
#[derive(Debug, Clone, Deserialize)]
pub struct BuildInfo {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub nixname: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub finished: serde_json::Value,
    #[serde(default)]
    pub buildstatus: Option<i64>,
    #[serde(default)]
    pub buildoutputs: BTreeMap<String, BuildOutput>,
}

impl BuildInfo {
    pub fn parse(json: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(json)?)
    }

    fn is_finished(&self) -> bool {
        match &self.finished {
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
            _ => false,
        }
    }

    /// Store path of a successfully built output
    pub fn store_path(&self, output: &str) -> Result<&str> {
        let label = self.nixname.as_deref().unwrap_or("build");
        if !self.is_finished() || self.buildstatus != Some(0) {
            return Err(Error::NotFound(format!(
                "{label} has no finished successful build (status {:?})",
                self.buildstatus
            )));
        }
        self.buildoutputs
            .get(output)
            .map(|o| o.path.as_str())
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "{label} has no output '{output}' (available: {})",
                    self.buildoutputs.keys().cloned().collect::<Vec<_>>().join(", ")
                ))
            })
    }
}

/// Parser for one `.narinfo` document
pub struct NarinfoParser {
    context: FeedContext,
}

impl NarinfoParser {
    /// `context.base_url` is the binary cache root `URL:` is relative to
    pub fn new(context: FeedContext) -> Self {
        Self { context }
    }
}

impl IndexParser for NarinfoParser {
    fn parse(&self, feed: &[u8]) -> Result<Vec<PackageRecord>> {
        let text = feed_text(feed)?;
        let mut records = Vec::new();

        for stanza in stanzas(text, StanzaSyntax::NARINFO) {
            let store_path = stanza.require("StorePath")?;
            let url = stanza.require("URL")?;
            let basename = store_basename(store_path);
            store_hash(basename)?;

            let drv_name = &basename[HASH_LEN + 1..];
            let (_, version) = split_name_version(drv_name);

            let mut record = PackageRecord::new(
                Ecosystem::Nix,
                basename,
                version.unwrap_or_default(),
                self.context.locator(url),
            );
            self.context.stamp(&mut record);
            record.architecture = stanza.get("System").unwrap_or_default().to_string();
            record.size = stanza.get("FileSize").and_then(|s| s.parse().ok());

            let compression = stanza.get("Compression").unwrap_or("bzip2");
            let file_hash = stanza.get_nonempty("FileHash");
            let nar_hash = stanza.get_nonempty("NarHash");
            // An uncompressed NAR is its own file
            let declared = file_hash.or(if compression == "none" { nar_hash } else { None });
            record.checksum = declared
                .map(Checksum::parse_nix)
                .transpose()
                .map_err(|e| Error::Format(format!("narinfo for {basename} has a bad hash: {e}")))?;

            record.depends = stanza
                .get_all("References")
                .flat_map(str::split_whitespace)
                .filter(|reference| *reference != basename)
                .map(str::to_string)
                .collect();
            record.description = Some(drv_name.to_string());

            record.extra.insert("store_path".to_string(), store_path.to_string());
            record.extra.insert("compression".to_string(), compression.to_string());
            if let Some(nar_hash) = nar_hash {
                record.extra.insert("nar_hash".to_string(), nar_hash.to_string());
            }
            for (field, key) in [("NarSize", "nar_size"), ("Deriver", "deriver"), ("CA", "ca")] {
                if let Some(value) = stanza.get_nonempty(field) {
                    record.extra.insert(key.to_string(), value.to_string());
                }
            }
            records.push(record);
        }

        if records.is_empty() {
            return Err(Error::Format("narinfo has no StorePath".to_string()));
        }
        debug!("Parsed narinfo for {}", records[0].name);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{DigestEncoding, HashAlgorithm};

    const HELLO: &str = "\
StorePath: /nix/store/0c0pkfdd7ajxdbrdqgzmrxyzxnsymrzv-hello-2.12.1
URL: nar/1v1gi8f3m6ni7rfzq1mxd4ig2kfz3d8jm3n2d2zkhfk7bb9ljkkc.nar.xz
Compression: xz
FileHash: sha256:1v1gi8f3m6ni7rfzq1mxd4ig2kfz3d8jm3n2d2zkhfk7bb9ljkkc
FileSize: 50160
NarHash: sha256:0cyqbmyvkbilnxkpl2r0p2s5q9dlv9qx0hdacwj0rvkyzwnwnvqp
NarSize: 226552
References: 0c0pkfdd7ajxdbrdqgzmrxyzxnsymrzv-hello-2.12.1 aw2fw9ag10wr9pf0qk4nk5sxi0q0bn56-glibc-2.37-8
Deriver: 9cbljk8wdbjlbl0ks8wdzhgf0c2wvvj8-hello-2.12.1.drv
Sig: cache.nixos.org-1:abc==
";

    fn parser() -> NarinfoParser {
        NarinfoParser::new(FeedContext::new("nixpkgs", 0, "https://cache.nixos.org"))
    }

    #[test]
    fn test_narinfo_exact_fields() {
        let records = parser().parse(HELLO.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.name, "0c0pkfdd7ajxdbrdqgzmrxyzxnsymrzv-hello-2.12.1");
        assert_eq!(rec.version, "2.12.1");
        assert_eq!(
            rec.locator,
            "https://cache.nixos.org/nar/1v1gi8f3m6ni7rfzq1mxd4ig2kfz3d8jm3n2d2zkhfk7bb9ljkkc.nar.xz"
        );
        assert_eq!(rec.size, Some(50160));
        let checksum = rec.checksum.as_ref().unwrap();
        assert_eq!(checksum.algorithm, HashAlgorithm::Sha256);
        assert_eq!(checksum.encoding, DigestEncoding::NixBase32);
        assert_eq!(
            checksum.value,
            "1v1gi8f3m6ni7rfzq1mxd4ig2kfz3d8jm3n2d2zkhfk7bb9ljkkc"
        );
        assert_eq!(
            rec.depends,
            vec!["aw2fw9ag10wr9pf0qk4nk5sxi0q0bn56-glibc-2.37-8"]
        );
        assert_eq!(
            rec.extra.get("nar_size").map(String::as_str),
            Some("226552")
        );
        assert_eq!(rec.extra.get("compression").map(String::as_str), Some("xz"));
        assert_eq!(
            rec.extra.get("store_path").map(String::as_str),
            Some("/nix/store/0c0pkfdd7ajxdbrdqgzmrxyzxnsymrzv-hello-2.12.1")
        );
        assert!(
            rec.cleaned_dependencies()
                .iter()
                .all(|d| !d.contains("hello"))
        );
    }

    #[test]
    fn test_uncompressed_nar_uses_nar_hash() {
        let text = "StorePath: /nix/store/aw2fw9ag10wr9pf0qk4nk5sxi0q0bn56-glibc-2.37-8\nURL: nar/x.nar\nCompression: none\nNarHash: sha256:0cyqbmyvkbilnxkpl2r0p2s5q9dlv9qx0hdacwj0rvkyzwnwnvqp\n";
        let rec = &parser().parse(text.as_bytes()).unwrap()[0];
        assert!(rec.checksum.is_some());
        assert_eq!(rec.version, "2.37-8");
    }

    #[test]
    fn test_missing_url_is_format_error() {
        let text = "StorePath: /nix/store/aw2fw9ag10wr9pf0qk4nk5sxi0q0bn56-glibc-2.37-8\n";
        assert!(matches!(parser().parse(text.as_bytes()), Err(Error::Format(_))));
        assert!(matches!(parser().parse(b"\n"), Err(Error::Format(_))));
    }

    #[test]
    fn test_store_path_helpers() {
        let path = "/nix/store/0c0pkfdd7ajxdbrdqgzmrxyzxnsymrzv-hello-2.12.1";
        assert_eq!(
            store_basename(path),
            "0c0pkfdd7ajxdbrdqgzmrxyzxnsymrzv-hello-2.12.1"
        );
        assert_eq!(
            store_hash(path).unwrap(),
            "0c0pkfdd7ajxdbrdqgzmrxyzxnsymrzv"
        );
        assert!(store_hash("/nix/store/short-name").is_err());
        assert_eq!(
            narinfo_url("https://cache.nixos.org/", path).unwrap(),
            "https://cache.nixos.org/0c0pkfdd7ajxdbrdqgzmrxyzxnsymrzv.narinfo"
        );
        assert_eq!(
            split_name_version("hello-2.12.1"),
            ("hello", Some("2.12.1"))
        );
        assert_eq!(
            split_name_version("gnu-config-2024-01-01"),
            ("gnu-config", Some("2024-01-01"))
        );
        assert_eq!(split_name_version("source"), ("source", None));
    }

    #[test]
    fn test_build_info() {
        let json = r#"{"id": 1, "nixname": "hello-2.12.1", "system": "x86_64-linux",
            "finished": 1, "buildstatus": 0,
            "buildoutputs": {"out": {"path": "/nix/store/0c0pkfdd7ajxdbrdqgzmrxyzxnsymrzv-hello-2.12.1"}}}"#;
        let build = BuildInfo::parse(json.as_bytes()).unwrap();
        assert!(build.store_path("out").unwrap().ends_with("hello-2.12.1"));
        assert!(matches!(build.store_path("dev"), Err(Error::NotFound(_))));

        let failed = r#"{"finished": true, "buildstatus": 1, "buildoutputs": {}}"#;
        assert!(matches!(
            BuildInfo::parse(failed.as_bytes()).unwrap().store_path("out"),
            Err(Error::NotFound(_))
        ));
        assert_eq!(
            latest_build_url(
                "https://hydra.nixos.org",
                "nixpkgs/trunk",
                "hello",
                "x86_64-linux",
            ),
            "https://hydra.nixos.org/job/nixpkgs/trunk/hello.x86_64-linux/latest"
        );
    }
}
