// src/backend/mod.rs

//! Per-repository backend adapters
//!
//! An [`Adapter`] is built once from a [`RepositoryConfig`] and runs the
//! whole pipeline for that repository: index load (through its own
//! [`IndexCache`]), dependency resolution, artifact download and checksum
//! verification, then extraction into a target root.
//!
//! ```no_run
//! use pkgbridge::backend::{Adapter, DownloadOptions};
//! use pkgbridge::cancel::CancelSignal;
//! use pkgbridge::config::{EngineConfig, RepositoryConfig};
//! use pkgbridge::ecosystem::Ecosystem;
//! use std::path::Path;
//!
//! let mut repo = RepositoryConfig::new("alpine-main", Ecosystem::Alpine, "https://dl-cdn.alpinelinux.org/alpine");
//! repo.branch = Some("v3.20".to_string());
//! repo.repo = Some("main".to_string());
//!
//! let adapter = Adapter::new(repo, &EngineConfig::default())?;
//! let report = adapter.resolve_and_install(
//!     "jq",
//!     &DownloadOptions::default(),
//!     Path::new("/tmp/jq-root"),
//!     &CancelSignal::new(),
//! )?;
//! println!("installed {:?}", report.names());
//! # Ok::<(), pkgbridge::error::Error>(())
//! ```

pub mod homebrew;
pub mod nix;
pub mod nuget;
pub mod source;

pub use nix::NixCatalog;
pub use nuget::NugetCatalog;
pub use source::IndexSource;

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use strum_macros::{Display, IntoStaticStr};
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::config::{EngineConfig, RepositoryConfig};
use crate::ecosystem::Ecosystem;
use crate::error::{Error, Result};
use crate::extract::{ExtractSummary, Extractor};
use crate::fetch::{ArchiveFetcher, DownloadProgress, RepositoryClient};
use crate::index::nix::DEFAULT_OUTPUT;
use crate::index::{FeedContext, IndexCache, IndexSnapshot};
use crate::record::PackageRecord;
use crate::resolver::{
    DependencyResolver, InstallPlan, PackageCatalog, ResolveOptions, UnresolvedDependency,
};

/// Per-request download and install policy
#[derive(Debug, Clone, Serialize)]
pub struct DownloadOptions {
    /// Pin for the requested package
    pub version: Option<String>,
    /// Target architecture; defaults to the repository's
    pub architecture: Option<String>,
    /// Nix build output to install
    pub output: String,
    /// Unpack artifacts after download
    pub extract: bool,
    /// Keep downloaded archives after a successful extraction, so a later
    /// install of the same plan is served from the cache
    pub retain_archive: bool,
    /// Verify artifacts against their declared checksums
    pub verify_checksum: bool,
    /// Install the requested package alone
    pub skip_dependencies: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            version: None,
            architecture: None,
            output: DEFAULT_OUTPUT.to_string(),
            extract: true,
            retain_archive: true,
            verify_checksum: true,
            skip_dependencies: false,
        }
    }
}

impl DownloadOptions {
    fn resolve_options(&self, ecosystem: Ecosystem) -> ResolveOptions {
        ResolveOptions {
            // Homebrew pins are applied to the stable record afterwards
            version: match ecosystem {
                Ecosystem::Homebrew => None,
                _ => self.version.clone(),
            },
            skip_dependencies: self.skip_dependencies,
        }
    }
}

/// Pipeline operations an adapter may offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Install,
    Resolve,
    Download,
    Search,
    Refresh,
}

/// What happened to one plan node
#[derive(Debug, Clone, Serialize)]
pub struct InstalledPackage {
    pub record: Arc<PackageRecord>,
    /// Where the archive was (or is) cached
    pub artifact: PathBuf,
    /// Bytes transferred; zero on a cache hit
    pub bytes_downloaded: u64,
    pub cache_hit: bool,
    /// Where the package was unpacked
    pub install_root: Option<PathBuf>,
    pub extracted: Option<ExtractSummary>,
}

/// Outcome of [`Adapter::resolve_and_install`]
#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub requested: String,
    pub target_root: PathBuf,
    /// Plan order, dependencies first
    pub packages: Vec<InstalledPackage>,
    pub warnings: Vec<UnresolvedDependency>,
}

impl InstallReport {
    pub fn names(&self) -> Vec<&str> {
        self.packages
            .iter()
            .map(|p| p.record.name.as_str())
            .collect()
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.packages.iter().map(|p| p.bytes_downloaded).sum()
    }

    pub fn cache_hits(&self) -> usize {
        self.packages.iter().filter(|p| p.cache_hit).count()
    }
}

/// A downloaded (or already cached) artifact
struct FetchedArtifact {
    path: PathBuf,
    bytes: u64,
    cache_hit: bool,
}

/// How records are looked up
enum Catalog {
    /// Whole-index snapshots, one cache per target architecture
    Indexed(Mutex<HashMap<String, Arc<IndexCache<IndexSnapshot>>>>),
    NuGet(NugetCatalog),
    Nix(NixCatalog),
}

/// Backend for one configured repository
pub struct Adapter {
    repo: RepositoryConfig,
    source: IndexSource,
    client: RepositoryClient,
    catalog: Catalog,
    artifact_dir: PathBuf,
    ttl: Duration,
    parallel_downloads: bool,
    show_progress: bool,
}

impl Adapter {
    pub fn new(repo: RepositoryConfig, config: &EngineConfig) -> Result<Self> {
        repo.validate()?;
        let source = IndexSource::from_config(&repo)?;
        let ecosystem = repo.ecosystem;

        let client = match ecosystem {
            Ecosystem::Homebrew => {
                let headers = homebrew::registry_headers();
                let headers: Vec<(&str, &str)> = headers
                    .iter()
                    .map(|(name, value)| (*name, value.as_str()))
                    .collect();
                RepositoryClient::with_settings(
                    config.http_timeout(),
                    config.max_retries,
                    &headers,
                )?
            }
            _ => RepositoryClient::from_config(config)?,
        };

        let context = FeedContext::new(&repo.name, repo.priority, "");
        let catalog = match &source {
            IndexSource::NuGet { feed } => Catalog::NuGet(NugetCatalog::new(
                feed.as_str(),
                FeedContext {
                    base_url: feed.clone(),
                    ..context
                },
                client.clone(),
                config.index_ttl(),
            )),
            IndexSource::Nix {
                cache,
                build_farm,
                jobset,
            } => Catalog::Nix(NixCatalog::new(
                build_farm.as_str(),
                jobset.as_str(),
                FeedContext {
                    base_url: cache.clone(),
                    ..context
                },
                client.clone(),
                config.index_ttl(),
            )),
            _ => Catalog::Indexed(Mutex::new(HashMap::new())),
        };

        info!(
            "Created {} adapter for repository {} ({})",
            ecosystem, repo.name, repo.url
        );
        Ok(Self {
            artifact_dir: config.cache_dir.join(ecosystem.to_string()),
            repo,
            source,
            client,
            catalog,
            ttl: config.index_ttl(),
            parallel_downloads: config.parallel_downloads,
            show_progress: config.show_progress,
        })
    }

    /// Adapter for the repository named `name` in `config`
    pub fn from_config(config: &EngineConfig, name: &str) -> Result<Self> {
        let repo = config
            .repository(name)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no repository named '{name}'")))?;
        Self::new(repo, config)
    }

    pub fn ecosystem(&self) -> Ecosystem {
        self.repo.ecosystem
    }

    pub fn repository(&self) -> &RepositoryConfig {
        &self.repo
    }

    pub fn source(&self) -> &IndexSource {
        &self.source
    }

    /// Directory artifacts of this ecosystem are cached in
    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    pub fn supports(&self, operation: Operation) -> bool {
        !matches!(
            (self.ecosystem(), operation),
            (Ecosystem::Nix, Operation::Search)
        )
    }

    fn ensure_supported(&self, operation: Operation) -> Result<()> {
        if self.supports(operation) {
            return Ok(());
        }
        Err(Error::Unsupported {
            ecosystem: self.ecosystem(),
            operation: operation.into(),
        })
    }

    /// Target architecture in the ecosystem's spelling
    fn target_arch(&self, options: &DownloadOptions) -> String {
        match &options.architecture {
            Some(arch) => self.ecosystem().native_arch(arch),
            None => self.repo.native_arch(),
        }
    }

    fn feed_context(&self) -> FeedContext {
        FeedContext::new(&self.repo.name, self.repo.priority, "")
    }

    fn snapshot_cache(
        caches: &Mutex<HashMap<String, Arc<IndexCache<IndexSnapshot>>>>,
        label: &str,
        arch: &str,
        ttl: Duration,
    ) -> Arc<IndexCache<IndexSnapshot>> {
        let mut caches = caches.lock();
        Arc::clone(
            caches
                .entry(arch.to_string())
                .or_insert_with(|| Arc::new(IndexCache::new(format!("{label}/{arch}"), ttl))),
        )
    }

    /// Current index snapshot for `arch`, rebuilt when expired
    ///
    /// Only enumerable ecosystems have one.
    pub fn snapshot(&self, arch: &str, cancel: &CancelSignal) -> Result<Arc<IndexSnapshot>> {
        cancel.check("index load")?;
        match &self.catalog {
            Catalog::Indexed(caches) => {
                let cache = Self::snapshot_cache(caches, &self.repo.name, arch, self.ttl);
                cache.get_or_refresh(|| {
                    self.source.load(&self.client, &self.feed_context(), arch, cancel)
                })
            }
            _ => Err(Error::Unsupported {
                ecosystem: self.ecosystem(),
                operation: "index snapshot",
            }),
        }
    }

    /// Run `f` against the catalog answering for this request
    fn with_catalog<T>(
        &self,
        options: &DownloadOptions,
        cancel: &CancelSignal,
        f: impl FnOnce(&dyn PackageCatalog) -> Result<T>,
    ) -> Result<T> {
        let arch = self.target_arch(options);
        match &self.catalog {
            Catalog::Indexed(_) => {
                let snapshot = self.snapshot(&arch, cancel)?;
                f(snapshot.as_ref())
            }
            Catalog::NuGet(catalog) => f(&catalog.view(cancel)),
            Catalog::Nix(catalog) => f(&catalog.view(&arch, &options.output, cancel)),
        }
    }

    /// Resolve `name` into an install plan
    pub fn resolve(
        &self,
        name: &str,
        options: &DownloadOptions,
        cancel: &CancelSignal,
    ) -> Result<InstallPlan> {
        self.ensure_supported(Operation::Resolve)?;
        info!("Resolving {} from {}", name, self.repo.name);
        let resolve_options = options.resolve_options(self.ecosystem());
        let mut plan = self.with_catalog(options, cancel, |catalog| {
            DependencyResolver::new(catalog)
                .with_cancel(cancel)
                .resolve(name, &resolve_options)
        })?;

        if let IndexSource::Homebrew { registry, .. } = &self.source {
            self.complete_bottles(&mut plan, registry, options, cancel)?;
        }
        Ok(plan)
    }

    /// Swap in image-index bottles for pinned or bottle-less formulae
    fn complete_bottles(
        &self,
        plan: &mut InstallPlan,
        registry: &str,
        options: &DownloadOptions,
        cancel: &CancelSignal,
    ) -> Result<()> {
        let tag = self.source.snapshot_arch(&self.target_arch(options));
        let root = plan.nodes.len().saturating_sub(1);
        for (idx, node) in plan.nodes.iter_mut().enumerate() {
            let pinned = if idx == root { options.version.as_deref() } else { None };
            if !homebrew::needs_image_index(node, pinned) {
                continue;
            }
            cancel.check("bottle lookup")?;
            let version = pinned.map_or_else(|| homebrew::pkg_version(node), str::to_string);
            let resolved =
                homebrew::resolve_bottle(&self.client, registry, node, &version, &tag, cancel)?;
            *node = Arc::new(resolved);
        }
        Ok(())
    }

    /// Cache path of a record's artifact
    pub fn artifact_path(&self, record: &PackageRecord) -> PathBuf {
        self.artifact_dir.join(artifact_name(record))
    }

    fn fetch_one(
        &self,
        fetcher: &ArchiveFetcher,
        record: &PackageRecord,
        options: &DownloadOptions,
        cancel: &CancelSignal,
    ) -> Result<FetchedArtifact> {
        if record.locator.is_empty() {
            return Err(Error::NotFound(format!(
                "no downloadable artifact for {} {}",
                record.name,
                record.full_version()
            )));
        }
        let path = self.artifact_path(record);
        let cache_hit = path.exists();
        let checksum = if options.verify_checksum {
            record.checksum.as_ref()
        } else {
            None
        };
        let bytes = fetcher.fetch_verified(&record.locator, &path, checksum, cancel)?;
        Ok(FetchedArtifact {
            path,
            bytes,
            cache_hit,
        })
    }

    /// Download and verify every plan node, concurrently when configured
    fn fetch_plan(
        &self,
        plan: &InstallPlan,
        options: &DownloadOptions,
        cancel: &CancelSignal,
    ) -> Result<Vec<FetchedArtifact>> {
        let progress = self
            .show_progress
            .then(|| DownloadProgress::with_aggregate(plan.len()));
        let mut fetcher = ArchiveFetcher::from_client(self.client.clone());
        if let Some(progress) = &progress {
            fetcher = fetcher.with_progress(progress.clone());
        }

        let results: Vec<Result<FetchedArtifact>> = if self.parallel_downloads && plan.len() > 1 {
            info!("Downloading {} artifacts in parallel", plan.len());
            plan.nodes
                .par_iter()
                .map(|record| self.fetch_one(&fetcher, record, options, cancel))
                .collect()
        } else {
            plan.nodes
                .iter()
                .map(|record| self.fetch_one(&fetcher, record, options, cancel))
                .collect()
        };

        if let Some(progress) = &progress {
            let failed = results.iter().filter(|r| r.is_err()).count();
            let bytes: u64 = results.iter().flatten().map(|a| a.bytes).sum();
            progress.finish_all(results.len() - failed, failed, bytes);
        }
        results.into_iter().collect()
    }

    /// Resolve, download and verify; returns artifact paths in plan order
    pub fn download(
        &self,
        name: &str,
        options: &DownloadOptions,
        cancel: &CancelSignal,
    ) -> Result<Vec<PathBuf>> {
        self.ensure_supported(Operation::Download)?;
        let plan = self.resolve(name, options, cancel)?;
        let fetched = self.fetch_plan(&plan, options, cancel)?;
        Ok(fetched.into_iter().map(|artifact| artifact.path).collect())
    }

    /// Where a record's files go under `target_root`
    fn install_root(&self, record: &PackageRecord, target_root: &Path) -> PathBuf {
        match self.ecosystem() {
            Ecosystem::Nix => nix::store_root(target_root, &record.name),
            _ => target_root.to_path_buf(),
        }
    }

    /// Resolve `name`, download and verify the plan, then unpack it in order
    pub fn resolve_and_install(
        &self,
        name: &str,
        options: &DownloadOptions,
        target_root: &Path,
        cancel: &CancelSignal,
    ) -> Result<InstallReport> {
        self.ensure_supported(Operation::Install)?;
        let plan = self.resolve(name, options, cancel)?;
        let fetched = self.fetch_plan(&plan, options, cancel)?;

        let extractor = Extractor::with_cancel(cancel.clone());
        let mut packages = Vec::with_capacity(plan.len());
        for (record, artifact) in plan.nodes.iter().zip(fetched) {
            cancel.check("install")?;
            let (install_root, extracted) = if options.extract {
                let root = self.install_root(record, target_root);
                let summary = extractor.extract(&artifact.path, record.container, &root)?;
                if !options.retain_archive {
                    if let Err(e) = fs::remove_file(&artifact.path) {
                        warn!("Could not remove {}: {}", artifact.path.display(), e);
                    }
                }
                (Some(root), Some(summary))
            } else {
                (None, None)
            };

            packages.push(InstalledPackage {
                record: Arc::clone(record),
                artifact: artifact.path,
                bytes_downloaded: artifact.bytes,
                cache_hit: artifact.cache_hit,
                install_root,
                extracted,
            });
        }

        let report = InstallReport {
            requested: name.to_string(),
            target_root: target_root.to_path_buf(),
            packages,
            warnings: plan.warnings,
        };
        info!(
            "Installed {} package(s) for {} into {} ({} bytes downloaded, {} cached)",
            report.packages.len(),
            name,
            target_root.display(),
            report.bytes_downloaded(),
            report.cache_hits()
        );
        Ok(report)
    }

    /// Case-insensitive substring search over the repository
    pub fn search(&self, query: &str, cancel: &CancelSignal) -> Result<Vec<Arc<PackageRecord>>> {
        self.ensure_supported(Operation::Search)?;
        match &self.catalog {
            Catalog::NuGet(catalog) => {
                cancel.check("search")?;
                catalog.search(query, cancel)
            }
            _ => {
                let arch = self.repo.native_arch();
                Ok(self.snapshot(&arch, cancel)?.search(query))
            }
        }
    }

    /// Rebuild the index now
    ///
    /// Enumerable ecosystems reload the repository's own architecture and
    /// drop snapshots for any other; lazy catalogs forget what they fetched.
    pub fn refresh(&self, cancel: &CancelSignal) -> Result<()> {
        self.ensure_supported(Operation::Refresh)?;
        cancel.check("refresh")?;
        match &self.catalog {
            Catalog::Indexed(caches) => {
                let arch = self.repo.native_arch();
                caches.lock().retain(|cached_arch, _| *cached_arch == arch);
                let cache = Self::snapshot_cache(caches, &self.repo.name, &arch, self.ttl);
                let snapshot = cache.force_refresh(|| {
                    self.source.load(&self.client, &self.feed_context(), &arch, cancel)
                })?;
                debug!("{} now holds {} records", self.repo.name, snapshot.len());
            }
            Catalog::NuGet(catalog) => catalog.invalidate(),
            Catalog::Nix(catalog) => catalog.invalidate(),
        }
        Ok(())
    }
}

/// Filename an artifact is cached under
///
/// Locators that do not end in a usable filename (registry blobs, NuGet
/// package endpoints) get one built from the record.
pub fn artifact_name(record: &PackageRecord) -> String {
    let version = record.full_version();
    let name = match record.ecosystem {
        Ecosystem::Homebrew => format!(
            "{}--{}.{}.bottle.tar.gz",
            record.name, version, record.architecture
        ),
        Ecosystem::NuGet => format!("{}.{}.nupkg", record.name, version).to_lowercase(),
        _ => record.filename(),
    };
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        format!("{}-{}", record.name.replace(['/', '\\'], "_"), version)
    } else {
        name
    }
}
