// src/extract/writer.rs

//! Materializes archive entries under a target root

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::path::safe_join;
use super::{ArchiveEntry, EntryKind, EntrySink, ExtractSummary};
use crate::cancel::CancelSignal;
use crate::error::{Error, Result};

/// Owner bits added to every regular file
const OWNER_RW: u32 = 0o600;
/// Owner bits added to every directory
const OWNER_RWX: u32 = 0o700;

/// Attach the failing path to an I/O error without losing its kind
fn io_at(path: &Path, e: io::Error) -> Error {
    Error::Io(io::Error::new(e.kind(), format!("{}: {e}", path.display())))
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| io_at(path, e))
}

/// Remove whatever sits at `path` unless it is already a directory
fn clear_non_directory(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => fs::remove_file(path).map_err(|e| io_at(path, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_at(path, e)),
    }
}

/// Remove whatever sits at `path`
fn clear_any(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).map_err(|e| io_at(path, e)),
        Ok(_) => fs::remove_file(path).map_err(|e| io_at(path, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_at(path, e)),
    }
}

/// [`EntrySink`] writing entries into a directory tree
pub struct TreeWriter<'a> {
    root: PathBuf,
    cancel: Option<&'a CancelSignal>,
    root_entry: bool,
    summary: ExtractSummary,
}

impl<'a> TreeWriter<'a> {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cancel: None,
            root_entry: false,
            summary: ExtractSummary::default(),
        }
    }

    /// Let a non-directory entry occupy the root path itself (NAR files)
    pub fn accept_root_entry(mut self) -> Self {
        self.root_entry = true;
        self
    }

    pub fn with_cancel(mut self, cancel: &'a CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn summary(&self) -> &ExtractSummary {
        &self.summary
    }

    pub fn finish(self) -> ExtractSummary {
        self.summary
    }

    fn neutralize(&mut self, entry: &ArchiveEntry, reason: &Error) {
        warn!("Skipping unsafe entry {:?}: {}", entry.path, reason);
        self.summary.neutralized.push(entry.path.clone());
    }

    fn ensure_parent(&self, dest: &Path) -> Result<()> {
        match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                fs::create_dir_all(parent).map_err(|e| io_at(parent, e))
            }
            _ => Ok(()),
        }
    }

    fn write_directory(&mut self, dest: &Path, mode: u32) -> Result<()> {
        match fs::symlink_metadata(dest) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                fs::remove_file(dest).map_err(|e| io_at(dest, e))?;
                fs::create_dir_all(dest).map_err(|e| io_at(dest, e))?;
            }
            Err(_) => fs::create_dir_all(dest).map_err(|e| io_at(dest, e))?,
        }
        set_mode(dest, (mode & 0o7777) | OWNER_RWX)?;
        self.summary.directories += 1;
        Ok(())
    }

    fn write_file(
        &mut self,
        entry: &ArchiveEntry,
        dest: &Path,
        content: &mut dyn Read,
    ) -> Result<()> {
        self.ensure_parent(dest)?;
        clear_any(dest)?;

        let mode = (entry.mode & 0o7777) | OWNER_RW;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(dest)
            .map_err(|e| io_at(dest, e))?;
        let written = io::copy(content, &mut file).map_err(|e| io_at(dest, e))?;
        file.flush().map_err(|e| io_at(dest, e))?;
        drop(file);

        if written != entry.size {
            return Err(Error::Extraction(format!(
                "{}: expected {} bytes, archive yielded {}",
                entry.path, entry.size, written
            )));
        }
        // The umask may have masked bits off at creation
        set_mode(dest, mode)?;

        self.summary.files += 1;
        self.summary.bytes_written += written;
        Ok(())
    }

    fn write_symlink(&mut self, entry: &ArchiveEntry, dest: &Path) -> Result<()> {
        let target = entry.link_target.as_deref().ok_or_else(|| {
            Error::Extraction(format!("symlink {} has no target", entry.path))
        })?;
        self.ensure_parent(dest)?;
        clear_any(dest)?;
        std::os::unix::fs::symlink(target, dest).map_err(|e| io_at(dest, e))?;
        self.summary.symlinks += 1;
        Ok(())
    }

    fn write_hardlink(&mut self, entry: &ArchiveEntry, dest: &Path) -> Result<()> {
        let target = entry.link_target.as_deref().ok_or_else(|| {
            Error::Extraction(format!("hard link {} has no target", entry.path))
        })?;
        let source = match safe_join(&self.root, target) {
            Ok(source) => source,
            Err(e) => {
                self.neutralize(entry, &e);
                return Ok(());
            }
        };
        if !source.is_file() {
            return Err(Error::Extraction(format!(
                "hard link {} points at missing {}",
                entry.path, target
            )));
        }
        self.ensure_parent(dest)?;
        clear_non_directory(dest)?;
        fs::hard_link(&source, dest).map_err(|e| io_at(dest, e))?;
        self.summary.hardlinks += 1;
        Ok(())
    }
}

impl EntrySink for TreeWriter<'_> {
    fn on_entry(&mut self, entry: &ArchiveEntry, content: &mut dyn Read) -> Result<()> {
        if let Some(cancel) = self.cancel {
            cancel.check("extraction")?;
        }

        let dest = match safe_join(&self.root, &entry.path) {
            Ok(dest) => dest,
            Err(e @ Error::PathTraversal(_)) => {
                self.neutralize(entry, &e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        if dest == self.root && entry.kind != EntryKind::Directory && !self.root_entry {
            self.neutralize(
                entry,
                &Error::InvalidPath("entry names the root".to_string()),
            );
            return Ok(());
        }
        debug!("{:?} {} -> {}", entry.kind, entry.path, dest.display());

        match entry.kind {
            EntryKind::Directory => self.write_directory(&dest, entry.mode),
            EntryKind::File => self.write_file(entry, &dest, content),
            EntryKind::Symlink => self.write_symlink(entry, &dest),
            EntryKind::Hardlink => self.write_hardlink(entry, &dest),
        }
    }
}

/// Give the owner write access throughout `root` (and search on directories)
pub fn remediate_permissions(root: &Path) -> Result<usize> {
    let mut fixed = 0;
    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = entry
            .map_err(|e| Error::Extraction(format!("cannot walk {}: {e}", root.display())))?;
        let meta = entry
            .path()
            .symlink_metadata()
            .map_err(|e| io_at(entry.path(), e))?;
        if meta.file_type().is_symlink() {
            continue;
        }
        let wanted = if meta.is_dir() { OWNER_RWX } else { 0o200 };
        let mode = meta.permissions().mode();
        if mode & wanted != wanted {
            set_mode(entry.path(), mode | wanted)?;
            fixed += 1;
        }
    }
    debug!(
        "Restored owner write on {} paths under {}",
        fixed, root.display()
    );
    Ok(fixed)
}

/// Open an archive, keeping its path in the error
pub(crate) fn open_file(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| io_at(path, e))
}
