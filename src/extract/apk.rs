// src/extract/apk.rs

//! Alpine packages: concatenated gzip members (signature, control, data)
//! read as one tar stream

use std::io::BufReader;
use std::path::Path;

use super::tarball::stream_tar;
use super::writer::open_file;
use super::EntrySink;
use crate::error::Result;

/// Signature and control members (`.SIGN.*`, `.PKGINFO`, `.pre-install`, ...)
pub fn is_apk_metadata(path: &str) -> bool {
    let path = path.trim_start_matches("./");
    path.starts_with('.') && !path.contains('/')
}

/// Stream the data members of an `.apk`
pub fn read_apk(path: &Path, sink: &mut dyn EntrySink) -> Result<()> {
    let decoder = flate2::read::MultiGzDecoder::new(BufReader::new(open_file(path)?));
    let mut archive = tar::Archive::new(decoder);
    // Each segment may carry its own end-of-archive blocks
    archive.set_ignore_zeros(true);
    stream_tar(&mut archive, sink, &is_apk_metadata)
}
