// src/backend/nix.rs

//! Lazy Nix catalog
//!
//! There is no index to enumerate. The requested attribute is mapped to a
//! store path through the build farm's latest successful build, and every
//! store path (the requested one and each of its references) is described
//! by its `.narinfo` from the binary cache. Narinfos never change for a
//! given store path, so they are cached for the adapter's lifetime; build
//! lookups follow the index TTL.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cancel::CancelSignal;
use crate::error::{Error, Result};
use crate::fetch::RepositoryClient;
use crate::index::nix::{BuildInfo, STORE_DIR, latest_build_url, narinfo_url, store_hash};
use crate::index::{FeedContext, IndexCache, IndexParser, NarinfoParser};
use crate::record::PackageRecord;
use crate::resolver::PackageCatalog;

/// Where a store path's tree is extracted under an install root
pub fn store_root(target_root: &Path, basename: &str) -> PathBuf {
    target_root
        .join(STORE_DIR.trim_start_matches('/'))
        .join(basename)
}

/// Binary cache plus build farm
pub struct NixCatalog {
    build_farm: String,
    jobset: String,
    context: FeedContext,
    client: RepositoryClient,
    ttl: Duration,
    narinfos: Mutex<HashMap<String, Arc<PackageRecord>>>,
    builds: Mutex<HashMap<String, Arc<IndexCache<String>>>>,
}

impl NixCatalog {
    /// `context.base_url` is the binary cache root
    pub fn new(
        build_farm: impl Into<String>,
        jobset: impl Into<String>,
        context: FeedContext,
        client: RepositoryClient,
        ttl: Duration,
    ) -> Self {
        Self {
            build_farm: build_farm.into(),
            jobset: jobset.into(),
            context,
            client,
            ttl,
            narinfos: Mutex::new(HashMap::new()),
            builds: Mutex::new(HashMap::new()),
        }
    }

    /// Store path of the latest successful build of `attr`
    pub fn latest_store_path(
        &self,
        attr: &str,
        system: &str,
        output: &str,
        cancel: &CancelSignal,
    ) -> Result<Arc<String>> {
        let key = format!("{attr}.{system}!{output}");
        let cache = {
            let mut builds = self.builds.lock();
            Arc::clone(
                builds
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(IndexCache::new(format!("nix:{key}"), self.ttl))),
            )
        };
        cache.get_or_refresh(|| {
            let url = latest_build_url(&self.build_farm, &self.jobset, attr, system);
            let build = BuildInfo::parse(&self.client.fetch_bytes(&url, cancel)?)?;
            let path = build.store_path(output)?.to_string();
            info!("Latest build of {} for {} is {}", attr, system, path);
            Ok(path)
        })
    }

    /// Record for a store path or basename, from its narinfo
    pub fn narinfo(&self, store_path: &str, cancel: &CancelSignal) -> Result<Arc<PackageRecord>> {
        let hash = store_hash(store_path)?.to_string();
        if let Some(record) = self.narinfos.lock().get(&hash) {
            return Ok(Arc::clone(record));
        }

        let url = narinfo_url(&self.context.base_url, store_path)?;
        let feed = self.client.fetch_bytes(&url, cancel)?;
        let record = NarinfoParser::new(self.context.clone())
            .parse(&feed)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Format(format!("{url} describes no store path")))?;
        debug!(
            "{} references {} store paths",
            record.name, record.depends.len()
        );

        let record = Arc::new(record);
        self.narinfos.lock().insert(hash, Arc::clone(&record));
        Ok(record)
    }

    /// Catalog view for one request
    pub fn view<'a>(
        &'a self,
        system: &'a str,
        output: &'a str,
        cancel: &'a CancelSignal,
    ) -> NixView<'a> {
        NixView {
            catalog: self,
            system,
            output,
            cancel,
        }
    }

    /// Forget build lookups; narinfos stay valid
    pub fn invalidate(&self) {
        self.builds.lock().clear();
    }
}

/// [`NixCatalog`] bound to a system, an output and a cancellation signal
pub struct NixView<'a> {
    catalog: &'a NixCatalog,
    system: &'a str,
    output: &'a str,
    cancel: &'a CancelSignal,
}

impl PackageCatalog for NixView<'_> {
    /// Store basenames go straight to the binary cache; anything else is an
    /// attribute looked up on the build farm
    fn lookup(&self, name: &str) -> Result<Option<Arc<PackageRecord>>> {
        self.cancel.check("nix lookup")?;
        if store_hash(name).is_ok() {
            return self.catalog.narinfo(name, self.cancel).map(Some);
        }
        let store_path = self
            .catalog
            .latest_store_path(name, self.system, self.output, self.cancel)?;
        self.catalog.narinfo(&store_path, self.cancel).map(Some)
    }

    fn provider(&self, _capability: &str) -> Result<Option<Arc<PackageRecord>>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_root() {
        let root = store_root(
            Path::new("/opt/env"),
            "7h6mc2r1m5g9ivjlwm3dxi2c4ij1gwdy-hello-2.12.1",
        );
        assert_eq!(
            root,
            Path::new("/opt/env/nix/store/7h6mc2r1m5g9ivjlwm3dxi2c4ij1gwdy-hello-2.12.1")
        );
    }

    #[test]
    fn test_narinfo_is_cached_per_hash() {
        let dir = tempfile::tempdir().unwrap();
        let hash = "7h6mc2r1m5g9ivjlwm3dxi2c4ij1gwdy";
        std::fs::write(
            dir.path().join(format!("{hash}.narinfo")),
            format!(
                "StorePath: /nix/store/{hash}-hello-2.12.1\nURL: nar/abc.nar.xz\nCompression: xz\nFileSize: 10\nNarHash: sha256:1b8m03r63zqhnjf7l5wnldhh7c134ap5vpj0850ymkq1iyzicy5s\nNarSize: 20\nReferences: {hash}-hello-2.12.1\n"
            ),
        )
        .unwrap();

        let catalog = NixCatalog::new(
            "https://hydra.nixos.org",
            "nixpkgs/trunk",
            FeedContext::new("nix", 0, dir.path().to_string_lossy()),
            RepositoryClient::new().unwrap(),
            Duration::from_secs(60),
        );
        let cancel = CancelSignal::new();
        let first = catalog
            .narinfo(&format!("/nix/store/{hash}-hello-2.12.1"), &cancel)
            .unwrap();
        assert_eq!(first.name, format!("{hash}-hello-2.12.1"));
        assert!(first.depends.is_empty());

        std::fs::remove_file(dir.path().join(format!("{hash}.narinfo"))).unwrap();
        let second = catalog
            .narinfo(&format!("{hash}-hello-2.12.1"), &cancel)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
