// src/config.rs

//! Engine and repository configuration
//!
//! Plain data, deserializable from TOML text handed over by the caller.
//! Locating and reading configuration files is the caller's business.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::ecosystem::Ecosystem;
use crate::error::{Error, Result};

/// Default index cache lifetime (30 minutes)
pub const DEFAULT_INDEX_TTL_SECS: u64 = 30 * 60;

/// Default timeout for HTTP requests (30 seconds)
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Default retry attempts for failed downloads
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Engine-wide settings shared by every adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Where downloaded artifacts are cached
    pub cache_dir: PathBuf,
    /// Index snapshot lifetime in seconds
    pub index_ttl_secs: u64,
    /// Per-request HTTP timeout in seconds
    pub http_timeout_secs: u64,
    /// Attempts per download before giving up
    pub max_retries: u32,
    /// Fetch plan nodes concurrently before extracting them in order
    pub parallel_downloads: bool,
    /// Draw progress bars for downloads
    pub show_progress: bool,
    /// Configured repositories
    #[serde(rename = "repository")]
    pub repositories: Vec<RepositoryConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("pkgbridge-cache"),
            index_ttl_secs: DEFAULT_INDEX_TTL_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            parallel_downloads: false,
            show_progress: false,
            repositories: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration from TOML text
    ///
    /// ```
    /// use pkgbridge::config::EngineConfig;
    ///
    /// let config = EngineConfig::from_toml_str(r#"
    ///     cache_dir = "/var/cache/pkgbridge"
    ///
    ///     [[repository]]
    ///     name = "alpine-main"
    ///     ecosystem = "alpine"
    ///     url = "https://dl-cdn.alpinelinux.org/alpine"
    ///     branch = "v3.20"
    ///     repo = "main"
    /// "#).unwrap();
    /// assert_eq!(config.repositories.len(), 1);
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        for repo in &self.repositories {
            repo.validate()?;
            if !seen.insert(repo.name.as_str()) {
                return Err(Error::Config(format!("duplicate repository name '{}'", repo.name)));
            }
        }
        Ok(())
    }

    pub fn index_ttl(&self) -> Duration {
        Duration::from_secs(self.index_ttl_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Find a repository by name
    pub fn repository(&self, name: &str) -> Option<&RepositoryConfig> {
        self.repositories.iter().find(|r| r.name == name)
    }
}

/// One repository of one ecosystem
///
/// Only the fields relevant to the ecosystem are consulted; the rest keep
/// their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Unique repository name, used as the records' origin tag
    pub name: String,
    pub ecosystem: Ecosystem,
    /// Mirror / feed base URL (`https://`, `file://` or a bare path)
    pub url: String,
    /// Target architecture; defaults to the host
    #[serde(default)]
    pub architecture: Option<String>,
    /// Higher wins when several repositories provide the same capability
    #[serde(default)]
    pub priority: i32,

    /// Debian suite (`bookworm`, `noble`)
    #[serde(default)]
    pub suite: Option<String>,
    /// Debian components; the first one is the default
    #[serde(default)]
    pub components: Vec<String>,

    /// Alpine branch (`v3.20`, `edge`)
    #[serde(default)]
    pub branch: Option<String>,
    /// Alpine or Arch repository name (`main`, `core`, `extra`)
    #[serde(default)]
    pub repo: Option<String>,

    /// Homebrew bottle tag (`arm64_sonoma`, `x86_64_linux`)
    #[serde(default)]
    pub bottle_tag: Option<String>,
    /// OCI registry base for bottles (`https://ghcr.io/v2/homebrew/core`)
    #[serde(default)]
    pub registry_url: Option<String>,

    /// Nix build-farm base (`https://hydra.nixos.org`)
    #[serde(default)]
    pub build_farm_url: Option<String>,
    /// Nix build-farm project/jobset (`nixpkgs/trunk`)
    #[serde(default)]
    pub jobset: Option<String>,
}

impl RepositoryConfig {
    /// Minimal repository definition; ecosystem-specific fields default
    pub fn new(name: impl Into<String>, ecosystem: Ecosystem, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ecosystem,
            url: url.into(),
            architecture: None,
            priority: 0,
            suite: None,
            components: Vec::new(),
            branch: None,
            repo: None,
            bottle_tag: None,
            registry_url: None,
            build_farm_url: None,
            jobset: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("repository name must not be empty".to_string()));
        }
        if self.url.trim().is_empty() {
            return Err(Error::Config(format!("repository '{}' has no url", self.name)));
        }
        if self.ecosystem == Ecosystem::Debian && self.suite.is_none() {
            return Err(Error::Config(format!("debian repository '{}' needs a suite", self.name)));
        }
        Ok(())
    }

    /// Target architecture in this ecosystem's spelling
    pub fn native_arch(&self) -> String {
        let arch = self
            .architecture
            .clone()
            .unwrap_or_else(crate::ecosystem::host_arch);
        self.ecosystem.native_arch(&arch)
    }
}
