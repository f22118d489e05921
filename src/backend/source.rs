// src/backend/source.rs

//! Where each ecosystem publishes its index
//!
//! [`IndexSource`] is decided once from a [`RepositoryConfig`]. Debian,
//! RPM, Alpine, Arch and Homebrew publish one enumerable index that is
//! loaded whole into an [`IndexSnapshot`]. NuGet and Nix are queried per
//! package by their catalogs and only contribute their locations here.

use tracing::{debug, info};

use crate::cancel::CancelSignal;
use crate::config::RepositoryConfig;
use crate::ecosystem::Ecosystem;
use crate::error::{Error, Result};
use crate::fetch::RepositoryClient;
use crate::hash::hash_bytes;
use crate::index::homebrew::DEFAULT_REGISTRY;
use crate::index::rpmmd::primary_location;
use crate::index::{
    AlpineIndexParser, ArchDbParser, DebianPackagesParser, FeedContext, HomebrewFormulaParser,
    IndexParser, IndexSnapshot, RpmPrimaryParser, join_url,
};
use crate::record::PackageRecord;

/// Compression suffixes tried for Debian `Packages`, preferred first
const PACKAGES_SUFFIXES: [&str; 3] = [".xz", ".gz", ""];

/// Formula feed looked up under a Homebrew API base
const FORMULA_FEED: &str = "formula.json";

/// Build-farm jobset used when the repository names none
pub const DEFAULT_JOBSET: &str = "nixpkgs/trunk";

/// Index location of one configured repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSource {
    Debian {
        mirror: String,
        suite: String,
        components: Vec<String>,
    },
    Rpm {
        base: String,
    },
    /// `base` is the repository directory above the per-arch directories
    Alpine {
        base: String,
    },
    Arch {
        base: String,
        repo: String,
    },
    Homebrew {
        formula_url: String,
        registry: String,
        bottle_tag: Option<String>,
    },
    NuGet {
        feed: String,
    },
    Nix {
        cache: String,
        build_farm: String,
        jobset: String,
    },
}

impl IndexSource {
    pub fn from_config(repo: &RepositoryConfig) -> Result<Self> {
        let url = repo.url.trim_end_matches('/').to_string();
        Ok(match repo.ecosystem {
            Ecosystem::Debian => Self::Debian {
                mirror: url,
                suite: repo.suite.clone().ok_or_else(|| {
                    Error::Config(format!("debian repository '{}' needs a suite", repo.name))
                })?,
                components: if repo.components.is_empty() {
                    vec!["main".to_string()]
                } else {
                    repo.components.clone()
                },
            },
            Ecosystem::Rpm => Self::Rpm { base: url },
            Ecosystem::Alpine => {
                let mut base = url;
                for segment in [&repo.branch, &repo.repo].into_iter().flatten() {
                    base = join_url(&base, segment);
                }
                Self::Alpine { base }
            }
            Ecosystem::Arch => Self::Arch {
                base: url,
                repo: repo.repo.clone().ok_or_else(|| {
                    Error::Config(format!(
                        "arch repository '{}' needs a repo (core, extra, ...)",
                        repo.name
                    ))
                })?,
            },
            Ecosystem::Homebrew => Self::Homebrew {
                formula_url: if url.ends_with(".json") {
                    url
                } else {
                    join_url(&url, FORMULA_FEED)
                },
                registry: repo
                    .registry_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_REGISTRY.to_string()),
                bottle_tag: repo.bottle_tag.clone(),
            },
            Ecosystem::NuGet => Self::NuGet { feed: url },
            Ecosystem::Nix => Self::Nix {
                cache: url,
                build_farm: repo.build_farm_url.clone().ok_or_else(|| {
                    Error::Config(format!("nix repository '{}' needs a build_farm_url", repo.name))
                })?,
                jobset: repo
                    .jobset
                    .clone()
                    .unwrap_or_else(|| DEFAULT_JOBSET.to_string()),
            },
        })
    }

    pub fn ecosystem(&self) -> Ecosystem {
        match self {
            Self::Debian { .. } => Ecosystem::Debian,
            Self::Rpm { .. } => Ecosystem::Rpm,
            Self::Alpine { .. } => Ecosystem::Alpine,
            Self::Arch { .. } => Ecosystem::Arch,
            Self::Homebrew { .. } => Ecosystem::Homebrew,
            Self::NuGet { .. } => Ecosystem::NuGet,
            Self::Nix { .. } => Ecosystem::Nix,
        }
    }

    /// Whether the whole index can be loaded into one snapshot
    pub fn is_enumerable(&self) -> bool {
        !matches!(self, Self::NuGet { .. } | Self::Nix { .. })
    }

    /// Architecture a snapshot for host architecture `arch` is ranked by
    ///
    /// Homebrew ranks by bottle tag, everything else by the feed's own
    /// architecture spelling.
    pub fn snapshot_arch(&self, arch: &str) -> String {
        match self {
            Self::Homebrew { bottle_tag, .. } => bottle_tag
                .clone()
                .unwrap_or_else(|| default_bottle_tag(arch)),
            _ => arch.to_string(),
        }
    }

    /// Feed locations for `arch`, in the order they are read
    ///
    /// Debian entries omit the compression suffix, which is detected at load
    /// time.
    pub fn index_locations(&self, arch: &str) -> Vec<String> {
        match self {
            Self::Debian {
                mirror,
                suite,
                components,
            } => components
                .iter()
                .map(|component| {
                    format!("{mirror}/dists/{suite}/{component}/binary-{arch}/Packages")
                })
                .collect(),
            Self::Rpm { base } => vec![join_url(base, "repodata/repomd.xml")],
            Self::Alpine { base } => vec![format!("{base}/{arch}/APKINDEX.tar.gz")],
            Self::Arch { base, repo } => vec![format!("{base}/{repo}/os/{arch}/{repo}.db")],
            Self::Homebrew { formula_url, .. } => vec![formula_url.clone()],
            Self::NuGet { .. } | Self::Nix { .. } => Vec::new(),
        }
    }

    /// Download and parse the whole index for `arch`
    ///
    /// `context` carries the origin tag and priority; its base URL is
    /// replaced per feed.
    pub fn load(
        &self,
        client: &RepositoryClient,
        context: &FeedContext,
        arch: &str,
        cancel: &CancelSignal,
    ) -> Result<IndexSnapshot> {
        let with_base = |base: &str| FeedContext {
            base_url: base.to_string(),
            ..context.clone()
        };
        let locations = self.index_locations(arch);

        let parts: Vec<Vec<PackageRecord>> = match self {
            Self::Debian { mirror, .. } => {
                let parser = DebianPackagesParser::new(with_base(mirror));
                locations
                    .iter()
                    .map(|location| {
                        let (found, feed) = fetch_first_variant(client, location, cancel)?;
                        debug!("Using {}", found);
                        parser.parse(&feed)
                    })
                    .collect::<Result<_>>()?
            }
            Self::Rpm { base } => vec![load_rpm(client, &with_base(base), cancel)?],
            Self::Alpine { base } => {
                let dir = format!("{base}/{arch}");
                let feed = client.fetch_bytes(&locations[0], cancel)?;
                vec![AlpineIndexParser::new(with_base(&dir)).parse(&feed)?]
            }
            Self::Arch { base, repo } => {
                let dir = format!("{base}/{repo}/os/{arch}");
                let feed = client.fetch_bytes(&locations[0], cancel)?;
                vec![ArchDbParser::new(with_base(&dir)).parse(&feed)?]
            }
            Self::Homebrew { formula_url, .. } => {
                let feed = client.fetch_bytes(formula_url, cancel)?;
                let parser = HomebrewFormulaParser::new(with_base(""), self.snapshot_arch(arch));
                vec![parser.parse(&feed)?]
            }
            Self::NuGet { .. } | Self::Nix { .. } => {
                return Err(Error::Unsupported {
                    ecosystem: self.ecosystem(),
                    operation: "whole-index load",
                });
            }
        };

        let snapshot = IndexSnapshot::merged(parts, self.snapshot_arch(arch));
        info!(
            "Loaded {} {} records from {}",
            snapshot.len(),
            self.ecosystem(),
            context.origin
        );
        Ok(snapshot)
    }
}

/// Fetch the first compression variant of a Debian `Packages` file that exists
fn fetch_first_variant(
    client: &RepositoryClient,
    location: &str,
    cancel: &CancelSignal,
) -> Result<(String, Vec<u8>)> {
    for suffix in PACKAGES_SUFFIXES {
        let url = format!("{location}{suffix}");
        match client.fetch_bytes(&url, cancel) {
            Ok(feed) => return Ok((url, feed)),
            Err(Error::NotFound(what)) => debug!("No {}", what),
            Err(e) => return Err(e),
        }
    }
    Err(Error::NotFound(format!("{location} in any compression")))
}

/// `repomd.xml`, then the primary metadata it points at
fn load_rpm(
    client: &RepositoryClient,
    context: &FeedContext,
    cancel: &CancelSignal,
) -> Result<Vec<PackageRecord>> {
    let repomd = client.fetch_bytes(&join_url(&context.base_url, "repodata/repomd.xml"), cancel)?;
    let primary = primary_location(&repomd)?;
    let url = context.locator(&primary.href);
    let feed = client.fetch_bytes(&url, cancel)?;

    if let Some(checksum) = &primary.checksum {
        if !checksum.matches(&hash_bytes(checksum.algorithm, &feed)) {
            return Err(Error::Format(format!(
                "{url} does not match its {} in repomd.xml",
                checksum.algorithm
            )));
        }
    }
    RpmPrimaryParser::new(context.clone()).parse(&feed)
}

/// Bottle tag for the host OS on `arch` (Homebrew spelling)
pub fn default_bottle_tag(arch: &str) -> String {
    if cfg!(target_os = "macos") {
        match arch {
            "arm64" => "arm64_sonoma".to_string(),
            _ => "sonoma".to_string(),
        }
    } else {
        format!("{arch}_linux")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debian_locations() {
        let mut repo =
            RepositoryConfig::new("deb", Ecosystem::Debian, "https://deb.debian.org/debian/");
        repo.suite = Some("bookworm".to_string());
        repo.components = vec!["main".to_string(), "contrib".to_string()];
        let source = IndexSource::from_config(&repo).unwrap();
        assert_eq!(
            source.index_locations("amd64"),
            vec![
                "https://deb.debian.org/debian/dists/bookworm/main/binary-amd64/Packages",
                "https://deb.debian.org/debian/dists/bookworm/contrib/binary-amd64/Packages",
            ]
        );
    }

    #[test]
    fn test_alpine_and_arch_locations() {
        let mut alpine = RepositoryConfig::new(
            "a",
            Ecosystem::Alpine,
            "https://dl-cdn.alpinelinux.org/alpine",
        );
        alpine.branch = Some("v3.20".to_string());
        alpine.repo = Some("main".to_string());
        assert_eq!(
            IndexSource::from_config(&alpine).unwrap().index_locations("x86_64"),
            vec!["https://dl-cdn.alpinelinux.org/alpine/v3.20/main/x86_64/APKINDEX.tar.gz"]
        );

        let mut arch =
            RepositoryConfig::new("core", Ecosystem::Arch, "https://geo.mirror.pkgbuild.com");
        assert!(matches!(IndexSource::from_config(&arch), Err(Error::Config(_))));
        arch.repo = Some("core".to_string());
        assert_eq!(
            IndexSource::from_config(&arch).unwrap().index_locations("x86_64"),
            vec!["https://geo.mirror.pkgbuild.com/core/os/x86_64/core.db"]
        );
    }

    #[test]
    fn test_homebrew_defaults() {
        let repo =
            RepositoryConfig::new("brew", Ecosystem::Homebrew, "https://formulae.brew.sh/api");
        let source = IndexSource::from_config(&repo).unwrap();
        match &source {
            IndexSource::Homebrew {
                formula_url,
                registry,
                bottle_tag,
            } => {
                assert_eq!(formula_url, "https://formulae.brew.sh/api/formula.json");
                assert_eq!(registry, DEFAULT_REGISTRY);
                assert!(bottle_tag.is_none());
            }
            other => panic!("unexpected source {other:?}"),
        }
        assert!(source.is_enumerable());
    }

    #[test]
    fn test_nix_needs_build_farm() {
        let mut repo = RepositoryConfig::new("nix", Ecosystem::Nix, "https://cache.nixos.org");
        assert!(matches!(IndexSource::from_config(&repo), Err(Error::Config(_))));
        repo.build_farm_url = Some("https://hydra.nixos.org".to_string());
        let source = IndexSource::from_config(&repo).unwrap();
        assert!(!source.is_enumerable());
        assert!(source.index_locations("x86_64-linux").is_empty());
    }

    #[test]
    fn test_lazy_sources_refuse_whole_load() {
        let repo = RepositoryConfig::new("nuget", Ecosystem::NuGet, "https://www.nuget.org/api/v2");
        let source = IndexSource::from_config(&repo).unwrap();
        let client = RepositoryClient::new().unwrap();
        let result = source.load(
            &client,
            &FeedContext::default(),
            "neutral",
            &CancelSignal::new(),
        );
        assert!(matches!(
            result,
            Err(Error::Unsupported {
                ecosystem: Ecosystem::NuGet,
                ..
            })
        ));
    }
}
