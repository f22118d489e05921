// src/extract/mod.rs

//! Safe multi-format archive extraction
//!
//! Every container kind is read as a stream of [`ArchiveEntry`] values
//! handed to an [`EntrySink`]. [`TreeWriter`] is the sink that puts them on
//! disk under a target root, enforcing the path policy in [`path`]: entries
//! are re-rooted, `..` entries are skipped and counted, hard links must stay
//! inside the root and file sizes must match their headers.
//!
//! Extraction is idempotent. Re-extracting over an existing tree overwrites
//! it; if a previous tree was left read-only, owner write access is restored
//! once and the extraction retried.

pub mod apk;
pub mod cpio;
pub mod deb;
pub mod nar;
pub mod path;
pub mod rpm;
pub mod tarball;
pub mod writer;
pub mod zipfile;

pub use writer::{TreeWriter, remediate_permissions};

use serde::Serialize;
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

use crate::cancel::CancelSignal;
use crate::ecosystem::ContainerKind;
use crate::error::{Error, Result};

/// What an archive entry is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Hardlink,
}

/// One member of an archive, as declared by its headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path exactly as the archive spells it
    pub path: String,
    pub kind: EntryKind,
    /// Permission bits
    pub mode: u32,
    /// Declared content length (regular files only)
    pub size: u64,
    /// Symlink target, or for hard links the archive path linked to
    pub link_target: Option<String>,
}

/// Receives archive entries one at a time
///
/// `content` yields the body of regular files and is empty otherwise.
pub trait EntrySink {
    fn on_entry(&mut self, entry: &ArchiveEntry, content: &mut dyn Read) -> Result<()>;
}

/// What an extraction put on disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractSummary {
    pub files: usize,
    pub directories: usize,
    pub symlinks: usize,
    pub hardlinks: usize,
    pub bytes_written: u64,
    /// Entries skipped because their path was unsafe
    pub neutralized: Vec<String>,
    /// Whether permissions had to be restored before succeeding
    pub remediated: bool,
}

impl ExtractSummary {
    pub fn entries(&self) -> usize {
        self.files + self.directories + self.symlinks + self.hardlinks
    }
}

/// Feed the entries of an archive to `sink`
pub fn stream(archive: &Path, kind: ContainerKind, sink: &mut dyn EntrySink) -> Result<()> {
    match kind {
        ContainerKind::Deb => deb::read_deb(archive, sink),
        ContainerKind::Rpm => rpm::read_rpm(archive, sink),
        ContainerKind::Apk => apk::read_apk(archive, sink),
        ContainerKind::Tar => tarball::read_tarball(archive, sink),
        ContainerKind::Zip => zipfile::read_zip(archive, sink),
        ContainerKind::Nar => nar::read_nar(archive, sink),
    }
}

fn is_permission_denied(e: &Error) -> bool {
    matches!(e, Error::Io(io) if io.kind() == std::io::ErrorKind::PermissionDenied)
}

/// Everything except cancellation surfaces as an extraction failure
fn as_extraction_error(archive: &Path, e: Error) -> Error {
    match e {
        Error::Extraction(_) | Error::Cancelled(_) => e,
        other => Error::Extraction(format!("{}: {other}", archive.display())),
    }
}

/// Unpacks archives into a target root
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    cancel: CancelSignal,
}

impl Extractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check `cancel` before every entry
    pub fn with_cancel(cancel: CancelSignal) -> Self {
        Self { cancel }
    }

    /// Extract `archive` of `kind` under `target_root`
    ///
    /// For [`ContainerKind::Nar`] the archive's root node becomes
    /// `target_root` itself.
    pub fn extract(
        &self,
        archive: &Path,
        kind: ContainerKind,
        target_root: &Path,
    ) -> Result<ExtractSummary> {
        info!(
            "Extracting {} ({:?}) into {}",
            archive.display(), kind, target_root.display()
        );

        let summary = match self.extract_once(archive, kind, target_root) {
            Err(e) if is_permission_denied(&e) && target_root.exists() => {
                warn!(
                    "Permission denied under {}, restoring owner write access and retrying: {}",
                    target_root.display(),
                    e
                );
                remediate_permissions(target_root).map_err(|e| as_extraction_error(archive, e))?;
                let mut summary = self
                    .extract_once(archive, kind, target_root)
                    .map_err(|e| as_extraction_error(archive, e))?;
                summary.remediated = true;
                summary
            }
            other => other.map_err(|e| as_extraction_error(archive, e))?,
        };

        if !summary.neutralized.is_empty() {
            warn!(
                "Skipped {} unsafe entries in {}",
                summary.neutralized.len(),
                archive.display()
            );
        }
        info!(
            "Extracted {} entries ({} bytes) from {}",
            summary.entries(),
            summary.bytes_written,
            archive.display()
        );
        Ok(summary)
    }

    fn extract_once(
        &self,
        archive: &Path,
        kind: ContainerKind,
        target_root: &Path,
    ) -> Result<ExtractSummary> {
        self.cancel.check("extraction")?;
        let mut writer = TreeWriter::new(target_root).with_cancel(&self.cancel);
        if kind == ContainerKind::Nar {
            writer = writer.accept_root_entry();
        } else {
            fs::create_dir_all(target_root)?;
        }
        stream(archive, kind, &mut writer)?;
        Ok(writer.finish())
    }
}
