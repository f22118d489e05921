// src/extract/cpio.rs

//! Streaming reader for cpio "newc" archives (RPM payloads)

use std::io::{self, Read};

/// CPIO New ASCII Format (newc) header size
const HEADER_SIZE: usize = 110;
/// Magic string for newc format
pub const MAGIC_NEWC: &[u8] = b"070701";
/// Magic string for CRC format
pub const MAGIC_CRC: &[u8] = b"070702";
const TRAILER: &str = "TRAILER!!!";

/// File type bits of `mode`
const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

/// Header of one cpio entry
#[derive(Debug, Clone)]
pub struct CpioEntry {
    pub name: String,
    pub size: u64,
    pub mode: u32,
    pub ino: u32,
    pub nlink: u32,
}

impl CpioEntry {
    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    /// Permission bits without the file type
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

fn pad4(len: u64) -> u64 {
    (4 - (len % 4)) % 4
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// A reader for CPIO (New ASCII) archives
///
/// After [`next_entry`](Self::next_entry) the entry body is available
/// through [`content`](Self::content); whatever the caller leaves unread is
/// skipped on the next call.
pub struct CpioReader<R: Read> {
    reader: R,
    remaining: u64,
    padding: u64,
}

impl<R: Read> CpioReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            remaining: 0,
            padding: 0,
        }
    }

    fn skip_pending(&mut self) -> io::Result<()> {
        let pending = self.remaining + self.padding;
        if pending > 0 {
            let skipped = io::copy(&mut (&mut self.reader).take(pending), &mut io::sink())?;
            if skipped != pending {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated cpio entry"));
            }
        }
        self.remaining = 0;
        self.padding = 0;
        Ok(())
    }

    /// Read the next entry header
    ///
    /// Returns `Ok(None)` at the `TRAILER!!!` entry or a clean end of stream.
    pub fn next_entry(&mut self) -> io::Result<Option<CpioEntry>> {
        self.skip_pending()?;

        let mut header_buf = [0u8; HEADER_SIZE];
        if let Err(e) = self.reader.read_exact(&mut header_buf) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return Ok(None);
            }
            return Err(e);
        }

        let magic = &header_buf[0..6];
        if magic != MAGIC_NEWC && magic != MAGIC_CRC {
            return Err(invalid(format!(
                "Invalid CPIO magic: {:?}",
                String::from_utf8_lossy(magic)
            )));
        }

        let parse_hex = |start: usize| -> io::Result<u32> {
            let s = std::str::from_utf8(&header_buf[start..start + 8])
                .map_err(|e| invalid(e.to_string()))?;
            u32::from_str_radix(s, 16).map_err(|e| invalid(e.to_string()))
        };

        let ino = parse_hex(6)?;
        let mode = parse_hex(14)?;
        let nlink = parse_hex(38)?;
        let size = parse_hex(54)? as u64;
        let namesize = parse_hex(94)? as u64;

        let mut name_buf = vec![0u8; namesize as usize];
        self.reader.read_exact(&mut name_buf)?;
        if name_buf.last() == Some(&0) {
            name_buf.pop();
        }
        let name = String::from_utf8_lossy(&name_buf).into_owned();

        let name_pad = pad4(HEADER_SIZE as u64 + namesize);
        if name_pad > 0 {
            let mut skip = [0u8; 3];
            self.reader.read_exact(&mut skip[..name_pad as usize])?;
        }

        if name == TRAILER {
            return Ok(None);
        }

        self.remaining = size;
        self.padding = pad4(size);
        Ok(Some(CpioEntry {
            name,
            size,
            mode,
            ino,
            nlink,
        }))
    }

    /// Body of the current entry
    pub fn content(&mut self) -> EntryContent<'_, R> {
        EntryContent {
            reader: &mut self.reader,
            remaining: &mut self.remaining,
        }
    }
}

/// Reader over the body of the current cpio entry
pub struct EntryContent<'a, R: Read> {
    reader: &'a mut R,
    remaining: &'a mut u64,
}

impl<R: Read> Read for EntryContent<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if *self.remaining == 0 {
            return Ok(0);
        }
        let max = buf
            .len()
            .min(usize::try_from(*self.remaining).unwrap_or(usize::MAX));
        let n = self.reader.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated cpio entry"));
        }
        *self.remaining -= n as u64;
        Ok(n)
    }
}
