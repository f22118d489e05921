// src/extract/zipfile.rs

//! Zip containers (`.nupkg`)

use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

use super::writer::open_file;
use super::{ArchiveEntry, EntryKind, EntrySink};
use crate::error::Result;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Open Packaging Convention bookkeeping that is not package payload
pub fn is_opc_metadata(name: &str) -> bool {
    name == "[Content_Types].xml"
        || name == ".signature.p7s"
        || name.starts_with("_rels/")
        || name.starts_with("package/services/")
}

/// Stream every payload entry of a zip archive
pub fn read_zip(path: &Path, sink: &mut dyn EntrySink) -> Result<()> {
    let mut archive = zip::ZipArchive::new(open_file(path)?)?;

    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        let name = file.name().to_string();
        if is_opc_metadata(&name) {
            debug!("Skipping OPC member {}", name);
            continue;
        }

        let unix_mode = file.unix_mode();
        let is_symlink = unix_mode.is_some_and(|m| m & S_IFMT == S_IFLNK);
        let (kind, default_mode) = if file.is_dir() {
            (EntryKind::Directory, 0o755)
        } else if is_symlink {
            (EntryKind::Symlink, 0o777)
        } else {
            (EntryKind::File, 0o644)
        };
        let mode = unix_mode.map(|m| m & 0o7777).unwrap_or(default_mode);

        let mut entry = ArchiveEntry {
            path: name,
            kind,
            mode,
            size: if kind == EntryKind::File { file.size() } else { 0 },
            link_target: None,
        };
        if kind == EntryKind::Symlink {
            let mut target = String::new();
            file.read_to_string(&mut target)?;
            entry.link_target = Some(target);
            sink.on_entry(&entry, &mut io::empty())?;
        } else {
            sink.on_entry(&entry, &mut file)?;
        }
    }
    Ok(())
}
