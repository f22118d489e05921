// src/ecosystem.rs

//! Ecosystem and container-kind tags
//!
//! These tagged variants are chosen once, when an adapter is built, and drive
//! every later dispatch (which parser, which archive reader, how architecture
//! names are spelled).

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Package ecosystem hosting a repository
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Ecosystem {
    /// Debian/Ubuntu `Packages` stanzas, `.deb` artifacts
    #[strum(to_string = "debian", serialize = "deb", serialize = "ubuntu")]
    Debian,
    /// RPM repodata (`repomd.xml` + `primary.xml`), `.rpm` artifacts
    #[strum(to_string = "rpm", serialize = "fedora", serialize = "yum")]
    Rpm,
    /// Alpine `APKINDEX`, `.apk` artifacts
    #[strum(to_string = "alpine", serialize = "apk")]
    Alpine,
    /// Arch Linux sync database, `.pkg.tar.*` artifacts
    #[strum(to_string = "arch", serialize = "pacman")]
    Arch,
    /// Homebrew formula JSON with OCI-hosted bottles
    #[strum(to_string = "homebrew", serialize = "brew")]
    Homebrew,
    /// Nix binary cache (`.narinfo` + NAR), located through a build farm
    #[strum(to_string = "nix")]
    Nix,
    /// NuGet/Chocolatey OData feed, `.nupkg` artifacts
    #[strum(to_string = "nuget", serialize = "chocolatey")]
    NuGet,
}

impl Ecosystem {
    /// Every supported ecosystem
    pub const ALL: [Ecosystem; 7] = [
        Self::Debian,
        Self::Rpm,
        Self::Alpine,
        Self::Arch,
        Self::Homebrew,
        Self::Nix,
        Self::NuGet,
    ];

    /// Container encoding of this ecosystem's artifacts
    pub fn container_kind(&self) -> ContainerKind {
        match self {
            Self::Debian => ContainerKind::Deb,
            Self::Rpm => ContainerKind::Rpm,
            Self::Alpine => ContainerKind::Apk,
            Self::Arch | Self::Homebrew => ContainerKind::Tar,
            Self::Nix => ContainerKind::Nar,
            Self::NuGet => ContainerKind::Zip,
        }
    }

    /// Spell a host architecture the way this ecosystem's feeds do
    pub fn native_arch(&self, arch: &str) -> String {
        let canonical = canonical_arch(arch);
        match self {
            Self::Debian => match canonical.as_str() {
                "x86_64" => "amd64".to_string(),
                "aarch64" => "arm64".to_string(),
                "i686" => "i386".to_string(),
                "armv7" => "armhf".to_string(),
                other => other.to_string(),
            },
            Self::Homebrew => match canonical.as_str() {
                "aarch64" => "arm64".to_string(),
                other => other.to_string(),
            },
            Self::Nix => match canonical.as_str() {
                "x86_64" | "aarch64" | "i686" => format!("{canonical}-linux"),
                other => other.to_string(),
            },
            _ => canonical,
        }
    }

    /// Whether `arch` marks an architecture-independent package
    pub fn is_noarch(arch: &str) -> bool {
        matches!(arch, "all" | "any" | "noarch" | "neutral" | "")
    }
}

/// Canonical (kernel-style) name for an architecture alias
pub fn canonical_arch(arch: &str) -> String {
    match arch.to_ascii_lowercase().as_str() {
        "amd64" | "x64" | "x86_64" => "x86_64".to_string(),
        "arm64" | "aarch64" => "aarch64".to_string(),
        "i386" | "i486" | "i586" | "i686" | "x86" => "i686".to_string(),
        "armhf" | "armv7" | "armv7h" | "armv7l" => "armv7".to_string(),
        other => other.to_string(),
    }
}

/// Detect the host architecture in canonical form
pub fn host_arch() -> String {
    canonical_arch(std::env::consts::ARCH)
}

/// Outer archive encoding wrapping a package's file payload
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ContainerKind {
    /// `ar` envelope wrapping a compressed `data.tar`
    Deb,
    /// Binary header block followed by a compressed cpio stream
    Rpm,
    /// Concatenated gzip-compressed tar segments
    Apk,
    /// Single (optionally compressed) tar stream
    Tar,
    /// Plain zip container
    Zip,
    /// Nix archive framed tree, optionally compressed
    Nar,
}

impl ContainerKind {
    /// Guess the container from an artifact filename
    pub fn from_filename(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.ends_with(".deb") || name.ends_with(".udeb") {
            Some(Self::Deb)
        } else if name.ends_with(".rpm") {
            Some(Self::Rpm)
        } else if name.ends_with(".apk") {
            Some(Self::Apk)
        } else if name.ends_with(".zip") || name.ends_with(".nupkg") {
            Some(Self::Zip)
        } else if name.contains(".nar") {
            Some(Self::Nar)
        } else if name.contains(".tar") || name.ends_with(".tgz") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}
