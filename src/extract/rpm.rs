// src/extract/rpm.rs

//! RPM packages
//!
//! An RPM is a 96-byte lead, a signature header padded to 8 bytes, the main
//! header, then a compressed cpio payload. The headers are walked to find
//! the payload; if that fails the file is scanned for compression magic and
//! each candidate is accepted only if it decompresses to cpio.

use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, warn};

use super::cpio::{CpioReader, MAGIC_CRC, MAGIC_NEWC};
use super::writer::open_file;
use super::{ArchiveEntry, EntryKind, EntrySink};
use crate::compression::{CompressionFormat, create_decoder};
use crate::error::{Error, Result};

const LEAD_SIZE: usize = 96;
const LEAD_MAGIC: [u8; 4] = [0xed, 0xab, 0xee, 0xdb];
const HEADER_MAGIC: [u8; 3] = [0x8e, 0xad, 0xe8];
/// Upper bound on how far into the file the magic scan looks
const SCAN_LIMIT: u64 = 64 * 1024 * 1024;
/// Bytes read per step of the magic scan
const SCAN_CHUNK: usize = 64 * 1024;
/// Tail carried into the next step; at least the longest magic
const SCAN_OVERLAP: usize = 8;

fn corrupt(e: impl std::fmt::Display) -> Error {
    Error::Extraction(format!("corrupt RPM payload: {e}"))
}

/// Skip one header structure; returns its size in bytes
fn skip_header<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut intro = [0u8; 16];
    reader.read_exact(&mut intro)?;
    if intro[..3] != HEADER_MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad header magic"));
    }
    let nindex = u32::from_be_bytes([intro[8], intro[9], intro[10], intro[11]]) as u64;
    let hsize = u32::from_be_bytes([intro[12], intro[13], intro[14], intro[15]]) as u64;
    let body = nindex * 16 + hsize;
    io::copy(&mut reader.by_ref().take(body), &mut io::sink())?;
    Ok(16 + body)
}

/// Walk lead and headers, leaving `reader` at the payload
fn seek_payload<R: Read>(reader: &mut R) -> io::Result<()> {
    let mut lead = [0u8; LEAD_SIZE];
    reader.read_exact(&mut lead)?;
    if lead[..4] != LEAD_MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "not an RPM (bad lead magic)"));
    }
    let signature = skip_header(reader)?;
    let padding = (8 - signature % 8) % 8;
    io::copy(&mut reader.by_ref().take(padding), &mut io::sink())?;
    skip_header(reader)?;
    Ok(())
}

/// Compression of the payload at the head of `reader`, if it looks valid
fn payload_format<R: BufRead>(reader: &mut R) -> io::Result<Option<CompressionFormat>> {
    let head = reader.fill_buf()?;
    if head.starts_with(MAGIC_NEWC) || head.starts_with(MAGIC_CRC) {
        return Ok(Some(CompressionFormat::None));
    }
    Ok(Some(CompressionFormat::from_magic_bytes(head)).filter(|f| *f != CompressionFormat::None))
}

/// Whether the stream at `offset` decompresses (as `format`) to cpio
fn decodes_to_cpio<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    format: CompressionFormat,
) -> io::Result<bool> {
    reader.seek(SeekFrom::Start(offset))?;
    let Ok(mut decoder) = create_decoder(reader.by_ref(), format) else {
        return Ok(false);
    };
    let mut magic = [0u8; 6];
    Ok(decoder.read_exact(&mut magic).is_ok() && (magic == MAGIC_NEWC || magic == MAGIC_CRC))
}

/// Find the payload by compression magic; returns offset and format
///
/// The file is read in [`SCAN_CHUNK`] steps, so memory stays bounded no
/// matter how far the payload sits. Nothing past [`SCAN_LIMIT`] is tried.
pub fn scan_payload<R: Read + Seek>(
    reader: &mut R,
) -> io::Result<Option<(u64, CompressionFormat)>> {
    let mut base = LEAD_SIZE as u64;
    let mut window: Vec<u8> = Vec::with_capacity(SCAN_CHUNK + SCAN_OVERLAP);
    reader.seek(SeekFrom::Start(base))?;

    while base < SCAN_LIMIT {
        let read = reader
            .by_ref()
            .take(SCAN_CHUNK as u64)
            .read_to_end(&mut window)?;
        let at_end = read < SCAN_CHUNK;
        // Offsets near the tail wait for the next chunk unless the file ended
        let scanned = if at_end {
            window.len()
        } else {
            window.len().saturating_sub(SCAN_OVERLAP)
        };

        for idx in 0..scanned {
            let offset = base + idx as u64;
            if offset >= SCAN_LIMIT {
                return Ok(None);
            }
            for format in CompressionFormat::DETECTABLE {
                if window[idx..].starts_with(format.magic())
                    && decodes_to_cpio(reader, offset, format)?
                {
                    return Ok(Some((offset, format)));
                }
            }
        }
        if at_end {
            break;
        }

        window.drain(..scanned);
        base += scanned as u64;
        reader.seek(SeekFrom::Start(base + window.len() as u64))?;
    }
    Ok(None)
}

/// Stream the cpio payload of an `.rpm`
pub fn read_rpm(path: &Path, sink: &mut dyn EntrySink) -> Result<()> {
    let mut reader = BufReader::new(open_file(path)?);

    let located = match seek_payload(&mut reader) {
        Ok(()) => payload_format(&mut reader)?,
        Err(e) => {
            debug!("Header walk of {} failed: {}", path.display(), e);
            None
        }
    };
    if let Some(format) = located {
        debug!("RPM payload of {} is {}", path.display(), format);
        let decoder = create_decoder(reader, format).map_err(corrupt)?;
        return stream_cpio(decoder, sink);
    }

    warn!("Scanning {} for its payload", path.display());
    let mut file = BufReader::new(open_file(path)?);
    let (offset, format) = scan_payload(&mut file)?.ok_or_else(|| {
        Error::Extraction(format!("{} has no recognizable payload", path.display()))
    })?;
    debug!("Found {} payload at offset {}", format, offset);
    file.seek(SeekFrom::Start(offset))?;
    let decoder = create_decoder(file, format).map_err(corrupt)?;
    stream_cpio(decoder, sink)
}

/// Feed cpio members to `sink`, turning shared-inode files into hard links
pub fn stream_cpio<R: Read>(reader: R, sink: &mut dyn EntrySink) -> Result<()> {
    let mut cpio = CpioReader::new(reader);
    // Earlier names of a hard-linked inode; its data rides on the last one
    let mut pending_links: BTreeMap<u32, Vec<String>> = BTreeMap::new();

    while let Some(header) = cpio.next_entry().map_err(corrupt)? {
        if header.is_file() {
            if header.nlink > 1 && header.size == 0 {
                pending_links
                    .entry(header.ino)
                    .or_default()
                    .push(header.name);
                continue;
            }
            let entry = ArchiveEntry {
                path: header.name.clone(),
                kind: EntryKind::File,
                mode: header.permissions(),
                size: header.size,
                link_target: None,
            };
            sink.on_entry(&entry, &mut cpio.content())?;

            for alias in pending_links.remove(&header.ino).unwrap_or_default() {
                let link = ArchiveEntry {
                    path: alias,
                    kind: EntryKind::Hardlink,
                    mode: header.permissions(),
                    size: 0,
                    link_target: Some(header.name.clone()),
                };
                sink.on_entry(&link, &mut io::empty())?;
            }
        } else if header.is_dir() {
            let mode = header.permissions();
            let entry = ArchiveEntry {
                path: header.name,
                kind: EntryKind::Directory,
                mode,
                size: 0,
                link_target: None,
            };
            sink.on_entry(&entry, &mut io::empty())?;
        } else if header.is_symlink() {
            let mut target = String::new();
            cpio.content().read_to_string(&mut target).map_err(corrupt)?;
            let mode = header.permissions();
            let entry = ArchiveEntry {
                path: header.name,
                kind: EntryKind::Symlink,
                mode,
                size: 0,
                link_target: Some(target),
            };
            sink.on_entry(&entry, &mut io::empty())?;
        } else {
            debug!(
                "Ignoring special cpio member {} (mode {:o})",
                header.name, header.mode
            );
        }
    }

    // Hard-linked groups whose members are all empty
    for name in pending_links.into_values().flatten() {
        let entry = ArchiveEntry {
            path: name,
            kind: EntryKind::File,
            mode: 0o644,
            size: 0,
            link_target: None,
        };
        sink.on_entry(&entry, &mut io::empty())?;
    }
    Ok(())
}
