// src/lib.rs

//! pkgbridge: multi-ecosystem package resolution and installation
//!
//! Installs a named package from a Debian, RPM, Alpine, Arch, Homebrew, Nix
//! or NuGet repository into an isolated directory tree, the same way for
//! every ecosystem: resolve → fetch → verify → unpack.
//!
//! # Architecture
//!
//! - Parsers: each index feed is reduced to canonical [`PackageRecord`]s
//! - Snapshots: records plus a provider index, cached per adapter with a TTL
//! - Resolver: explicit worklist over names and virtual capabilities
//! - Fetcher: retrying downloads, temp-then-rename, streaming verification
//! - Extractor: one entry stream per container kind, re-rooted under a
//!   target directory with `..` and symlink escapes refused

pub mod backend;
pub mod cancel;
pub mod compression;
pub mod config;
pub mod ecosystem;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod hash;
pub mod index;
pub mod record;
pub mod resolver;

pub use backend::{Adapter, DownloadOptions, InstallReport, InstalledPackage, Operation};
pub use cancel::CancelSignal;
pub use config::{EngineConfig, RepositoryConfig};
pub use ecosystem::{ContainerKind, Ecosystem};
pub use error::{Error, Result};
pub use extract::{ArchiveEntry, EntryKind, ExtractSummary, Extractor};
pub use fetch::{ArchiveFetcher, RepositoryClient, Transport};
pub use hash::{Checksum, DigestEncoding, HashAlgorithm};
pub use index::{IndexCache, IndexParser, IndexSnapshot};
pub use record::PackageRecord;
pub use resolver::{DependencyResolver, InstallPlan, PackageCatalog, UnresolvedDependency};
