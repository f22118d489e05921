// src/extract/tarball.rs

//! Compressed tarballs (Arch packages, Homebrew bottles) and the tar
//! streaming shared by the other tar-based containers

use std::io::{BufReader, Read};
use std::path::Path;
use tar::EntryType;
use tracing::debug;

use super::writer::open_file;
use super::{ArchiveEntry, EntryKind, EntrySink};
use crate::compression::create_decoder_sniffed;
use crate::error::{Error, Result};

/// Arch metadata members at the top of a package
const ARCH_METADATA: &[&str] = &[".PKGINFO", ".MTREE", ".BUILDINFO", ".INSTALL", ".CHANGELOG"];

fn corrupt(e: impl std::fmt::Display) -> Error {
    Error::Extraction(format!("corrupt tar stream: {e}"))
}

/// Feed every tar member not rejected by `skip` to `sink`
pub fn stream_tar<R: Read>(
    archive: &mut tar::Archive<R>,
    sink: &mut dyn EntrySink,
    skip: &dyn Fn(&str) -> bool,
) -> Result<()> {
    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let path = entry
            .path()
            .map_err(corrupt)?
            .to_string_lossy()
            .into_owned();
        if skip(&path) {
            debug!("Skipping metadata member {}", path);
            continue;
        }

        let header = entry.header();
        let kind = match header.entry_type() {
            EntryType::Regular | EntryType::Continuous => EntryKind::File,
            EntryType::Directory => EntryKind::Directory,
            EntryType::Symlink => EntryKind::Symlink,
            EntryType::Link => EntryKind::Hardlink,
            other => {
                debug!("Ignoring {:?} member {}", other, path);
                continue;
            }
        };
        let mode = header.mode().map_err(corrupt)?;
        let size = entry.size();
        let link_target = entry
            .link_name()
            .map_err(corrupt)?
            .map(|target| target.to_string_lossy().into_owned());

        let record = ArchiveEntry {
            path,
            kind,
            mode,
            size: if kind == EntryKind::File { size } else { 0 },
            link_target,
        };
        sink.on_entry(&record, &mut entry)?;
    }
    Ok(())
}

/// Top-level Arch metadata member
pub fn is_arch_metadata(path: &str) -> bool {
    let path = path.trim_start_matches("./");
    ARCH_METADATA.contains(&path)
}

/// Stream a compressed (or plain) tar file
pub fn read_tarball(path: &Path, sink: &mut dyn EntrySink) -> Result<()> {
    let reader = BufReader::new(open_file(path)?);
    let (format, decoder) =
        create_decoder_sniffed(reader).map_err(|e| Error::Extraction(e.to_string()))?;
    debug!("Reading {} tarball {}", format, path.display());
    let mut archive = tar::Archive::new(decoder);
    stream_tar(&mut archive, sink, &is_arch_metadata)
}
