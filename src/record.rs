// src/record.rs

//! Canonical package record
//!
//! Every index parser reduces its feed to [`PackageRecord`]s. Records are
//! immutable once parsed and shared as `Arc<PackageRecord>` out of the index
//! snapshot that owns them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ecosystem::{ContainerKind, Ecosystem};
use crate::hash::Checksum;

/// One installable artifact as described by a repository index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Package name; for Nix the store path basename (`<hash>-<name>`)
    pub name: String,
    /// Upstream version as the feed spells it
    pub version: String,
    /// RPM epoch, when non-zero
    #[serde(default)]
    pub epoch: Option<u32>,
    /// RPM release / Alpine `-rN` style revision kept apart from the version
    #[serde(default)]
    pub release: Option<String>,
    /// Architecture in the ecosystem's own spelling (`amd64`, `x86_64`,
    /// `noarch`, a bottle tag, a Nix system)
    pub architecture: String,
    /// Declared artifact size in bytes
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub checksum: Option<Checksum>,
    /// Absolute download locator (URL or path)
    pub locator: String,
    /// Raw dependency tokens, constraints and alternatives included
    #[serde(default)]
    pub depends: Vec<String>,
    /// Raw virtual/soname capabilities declared in addition to the name
    #[serde(default)]
    pub provides: Vec<String>,
    /// Repository the record came from
    pub origin: String,
    /// Origin priority; higher wins provider ties
    #[serde(default)]
    pub priority: i32,
    pub ecosystem: Ecosystem,
    pub container: ContainerKind,
    #[serde(default)]
    pub description: Option<String>,
    /// Format-specific fields (`section`, `origin`, `nar_hash`, ...)
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl PackageRecord {
    /// Start a record with the mandatory fields; the rest default
    pub fn new(
        ecosystem: Ecosystem,
        name: impl Into<String>,
        version: impl Into<String>,
        locator: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            epoch: None,
            release: None,
            architecture: String::new(),
            size: None,
            checksum: None,
            locator: locator.into(),
            depends: Vec::new(),
            provides: Vec::new(),
            origin: String::new(),
            priority: 0,
            ecosystem,
            container: ecosystem.container_kind(),
            description: None,
            extra: BTreeMap::new(),
        }
    }

    /// Version including epoch and release (`1:2.3-4`)
    pub fn full_version(&self) -> String {
        let mut version = String::new();
        if let Some(epoch) = self.epoch {
            version.push_str(&format!("{epoch}:"));
        }
        version.push_str(&self.version);
        if let Some(release) = &self.release {
            version.push('-');
            version.push_str(release);
        }
        version
    }

    /// Whether a pinned version string names this record
    pub fn matches_version(&self, pinned: &str) -> bool {
        self.version == pinned || self.full_version() == pinned
    }

    /// Artifact filename, taken from the last locator segment
    pub fn filename(&self) -> String {
        let path = self
            .locator
            .split(['?', '#'])
            .next()
            .unwrap_or(&self.locator);
        match path.rsplit('/').next() {
            Some(last) if !last.is_empty() => last.to_string(),
            _ => format!("{}-{}", self.name, self.full_version()),
        }
    }

    /// Every bare capability this record satisfies, its own name first
    pub fn capabilities(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.provides.iter().map(|p| bare_capability(p)))
    }

    /// Whether this record satisfies a bare capability
    pub fn provides_capability(&self, capability: &str) -> bool {
        self.capabilities().any(|c| c == capability)
    }

    /// Dependency tokens minus anything the record satisfies itself
    pub fn cleaned_dependencies(&self) -> Vec<&str> {
        self.depends
            .iter()
            .map(String::as_str)
            .filter(|token| {
                !alternatives(token).any(|alt| self.provides_capability(bare_capability(alt)))
            })
            .collect()
    }
}

/// Split a Debian `a | b` alternative group into its members
pub fn alternatives(token: &str) -> impl Iterator<Item = &str> {
    token
        .split('|')
        .map(str::trim)
        .filter(|alt| !alt.is_empty())
}

/// Architecture qualifiers that may trail a Debian dependency
const ARCH_QUALIFIERS: &[&str] = &[
    "any", "native", "all", "amd64", "arm64", "armel", "armhf", "i386", "mips64el", "ppc64el",
    "riscv64", "s390x",
];

/// Reduce a dependency or provides token to its bare capability
///
/// Strips parenthesized or whitespace-separated constraints
/// (`libc6 (>= 2.34)`, `glibc >= 2.38`), inline operators
/// (`glibc>=2.38`, `so:libcrypto.so.3=3.1.4-r0`) and trailing architecture
/// qualifiers (`python3:any`). Parentheses glued to the name are part of it
/// (`perl(Carp)`, `libc.so.6(GLIBC_2.34)(64bit)`).
pub fn bare_capability(token: &str) -> &str {
    let token = token.split_whitespace().next().unwrap_or("");
    let token = match token.find(['<', '>', '=', '~']) {
        Some(idx) if idx > 0 => &token[..idx],
        _ => token,
    };
    match token.rsplit_once(':') {
        Some((name, qualifier)) if !name.is_empty() && ARCH_QUALIFIERS.contains(&qualifier) => name,
        _ => token,
    }
}
