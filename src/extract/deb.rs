// src/extract/deb.rs

//! Debian packages: an `ar` envelope around `data.tar.*`

use std::path::Path;
use tracing::debug;

use super::tarball::stream_tar;
use super::writer::open_file;
use super::EntrySink;
use crate::compression::{CompressionFormat, create_decoder};
use crate::error::{Error, Result};

/// Stream the `data.tar[.gz|.xz|.zst|.bz2]` member of a `.deb`
pub fn read_deb(path: &Path, sink: &mut dyn EntrySink) -> Result<()> {
    let mut archive = ar::Archive::new(open_file(path)?);

    while let Some(entry) = archive.next_entry() {
        let entry = entry.map_err(|e| Error::Extraction(format!("corrupt ar envelope: {e}")))?;
        let name = String::from_utf8_lossy(entry.header().identifier())
            .trim_end_matches('/')
            .to_string();
        if !name.starts_with("data.tar") {
            debug!("Skipping ar member {}", name);
            continue;
        }

        let format = CompressionFormat::from_extension(&name);
        debug!("Reading {} ({})", name, format);
        let decoder = create_decoder(entry, format).map_err(|e| Error::Extraction(e.to_string()))?;
        let mut tar = tar::Archive::new(decoder);
        return stream_tar(&mut tar, sink, &|_| false);
    }

    Err(Error::Extraction(format!("{} has no data.tar member", path.display())))
}
