// src/fetch/mod.rs

//! Artifact download and integrity verification
//!
//! [`ArchiveFetcher::fetch`] streams a locator into a temporary sibling of
//! the destination and renames it into place only once the body is
//! complete, so an interrupted download never leaves a file that looks
//! finished. An existing destination is a cache hit and costs no transport
//! operation at all.
//!
//! [`verify`] streams a file through the declared digest. A mismatch removes
//! the file so the next run downloads it again.

pub mod client;
pub mod progress;

pub use client::{Body, LocalTransport, RepositoryClient, Transport, with_retries};
pub use progress::DownloadProgress;

use indicatif::ProgressBar;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::config::DEFAULT_MAX_RETRIES;
use crate::error::{Error, Result};
use crate::hash::{Checksum, ChecksumScope, HashAlgorithm, Hasher, hash_reader};

/// Buffer size for streaming downloads (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

/// Copy a body into `out`, checking for cancellation between chunks
fn stream_body(
    reader: &mut dyn Read,
    out: &mut File,
    cancel: &CancelSignal,
    progress_bar: Option<&ProgressBar>,
) -> Result<u64> {
    let mut written: u64 = 0;
    let mut buffer = [0u8; STREAM_BUFFER_SIZE];

    loop {
        cancel.check("download")?;
        let n = reader
            .read(&mut buffer)
            .map_err(|e| Error::Network(format!("Failed to read response: {e}")))?;
        if n == 0 {
            break;
        }
        out.write_all(&buffer[..n])?;
        written += n as u64;
        if let Some(pb) = progress_bar {
            pb.set_position(written);
        }
    }

    out.flush()?;
    Ok(written)
}

/// Downloads artifacts through a [`Transport`]
pub struct ArchiveFetcher<T: Transport = RepositoryClient> {
    transport: T,
    max_retries: u32,
    retry_delay: Duration,
    progress: Option<DownloadProgress>,
}

impl ArchiveFetcher<RepositoryClient> {
    /// Fetcher over a repository client, inheriting its retry policy
    pub fn from_client(client: RepositoryClient) -> Self {
        let (retries, delay) = (client.max_retries(), client.retry_delay());
        Self::new(client).with_retry_policy(retries, delay)
    }
}

impl<T: Transport> ArchiveFetcher<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(client::RETRY_DELAY_MS),
            progress: None,
        }
    }

    pub fn with_retry_policy(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    /// Draw a bar per download on `progress`
    pub fn with_progress(mut self, progress: DownloadProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Download `locator` to `dest`
    ///
    /// Returns the number of bytes written, or `0` when `dest` already
    /// exists. On failure or cancellation nothing is left at `dest`.
    pub fn fetch(&self, locator: &str, dest: &Path, cancel: &CancelSignal) -> Result<u64> {
        if dest.exists() {
            debug!("{} already present, skipping download", dest.display());
            return Ok(0);
        }
        cancel.check("download")?;

        let parent = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| locator.to_string());
        info!("Downloading {} to {}", locator, dest.display());

        let written = with_retries(self.max_retries, self.retry_delay, "Download", cancel, || {
            self.fetch_once(locator, dest, parent, &name, cancel)
        })?;

        info!("Downloaded {} bytes to {}", written, dest.display());
        Ok(written)
    }

    /// Download, then verify against `checksum` when one is declared
    pub fn fetch_verified(
        &self,
        locator: &str,
        dest: &Path,
        checksum: Option<&Checksum>,
        cancel: &CancelSignal,
    ) -> Result<u64> {
        let written = self.fetch(locator, dest, cancel)?;
        match checksum {
            Some(checksum) => verify(dest, checksum)?,
            None => debug!("No checksum declared for {}", locator),
        }
        Ok(written)
    }

    fn fetch_once(
        &self,
        locator: &str,
        dest: &Path,
        parent: &Path,
        name: &str,
        cancel: &CancelSignal,
    ) -> Result<u64> {
        let mut body = self.transport.open(locator)?;
        let mut temp = NamedTempFile::new_in(parent)?;
        let bar = self.progress.as_ref().map(|p| p.add(name, body.length));

        let result = stream_body(&mut body.reader, temp.as_file_mut(), cancel, bar.as_ref())
            .and_then(|written| match body.length {
                Some(expected) if expected != written => Err(Error::Network(format!(
                    "truncated body from {locator}: got {written} of {expected} bytes"
                ))),
                _ => Ok(written),
            });

        if let (Some(progress), Some(bar)) = (&self.progress, &bar) {
            match &result {
                Ok(_) => progress.finish_download(bar, name),
                Err(e) => progress.fail_download(bar, name, &e.to_string()),
            }
        }

        // Dropping `temp` on the error path deletes the partial file
        let written = result?;
        temp.persist(dest).map_err(|e| Error::Io(e.error))?;
        Ok(written)
    }
}

/// Check `path` against a declared checksum, removing it on mismatch
pub fn verify(path: &Path, checksum: &Checksum) -> Result<()> {
    debug!("Verifying {} of {}", checksum.algorithm, path.display());

    let digest = match checksum.scope {
        ChecksumScope::WholeFile => {
            let mut reader = BufReader::new(File::open(path)?);
            hash_reader(checksum.algorithm, &mut reader)?
        }
        ChecksumScope::ApkControlSegment => match apk_control_digest(path, checksum.algorithm) {
            Ok(digest) => digest,
            Err(e) => {
                if let Err(remove) = fs::remove_file(path) {
                    warn!("Could not remove unreadable {}: {}", path.display(), remove);
                }
                return Err(e);
            }
        },
    };

    if checksum.matches(&digest) {
        debug!("Checksum verified: {}", checksum);
        return Ok(());
    }

    let actual = checksum.encoding.encode(&digest);
    warn!(
        "{} mismatch for {}: expected {}, got {}",
        checksum.algorithm,
        path.display(),
        checksum.value,
        actual
    );
    if let Err(e) = fs::remove_file(path) {
        warn!("Could not remove corrupt {}: {}", path.display(), e);
    }
    Err(Error::HashMismatch {
        path: path.to_path_buf(),
        algorithm: checksum.algorithm,
        expected: checksum.value.clone(),
        actual,
    })
}

/// [`BufRead`] adapter feeding every byte its consumer takes to a hasher
struct HashingReader<R> {
    inner: R,
    hasher: Hasher,
    consumed: u64,
}

impl<R: BufRead> HashingReader<R> {
    fn new(inner: R, algorithm: HashAlgorithm) -> Self {
        Self {
            inner,
            hasher: Hasher::new(algorithm),
            consumed: 0,
        }
    }

    fn finish(self) -> (Vec<u8>, u64) {
        (self.hasher.finalize(), self.consumed)
    }
}

impl<R: BufRead> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = {
            let available = self.fill_buf()?;
            let n = available.len().min(buf.len());
            buf[..n].copy_from_slice(&available[..n]);
            n
        };
        self.consume(n);
        Ok(n)
    }
}

impl<R: BufRead> BufRead for HashingReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        // The bytes being consumed are still buffered, so this does no I/O
        if let Ok(buffered) = self.inner.fill_buf() {
            let amt = amt.min(buffered.len());
            self.hasher.update(&buffered[..amt]);
            self.consumed += amt as u64;
            self.inner.consume(amt);
        }
    }
}

/// Whether a decompressed member is a tar holding `.PKGINFO`; drains it
fn member_has_pkginfo<R: Read>(member: R) -> io::Result<bool> {
    let mut archive = tar::Archive::new(member);
    let mut found = false;
    if let Ok(entries) = archive.entries() {
        for entry in entries.flatten() {
            found |= entry.path().is_ok_and(|p| p.as_os_str() == ".PKGINFO");
        }
    }
    io::copy(&mut archive.into_inner(), &mut io::sink())?;
    Ok(found)
}

/// Digest of the gzip member of an `.apk` that carries `.PKGINFO`
///
/// An `.apk` is a concatenation of gzip members (signature, control, data).
/// The index checksum covers the compressed bytes of the control member,
/// which are hashed as the decoder consumes them.
fn apk_control_digest(path: &Path, algorithm: HashAlgorithm) -> Result<Vec<u8>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut offset: u64 = 0;

    while !reader.fill_buf()?.is_empty() {
        let mut member = HashingReader::new(&mut reader, algorithm);
        let has_pkginfo = member_has_pkginfo(flate2::bufread::GzDecoder::new(&mut member))
            .map_err(|e| {
                Error::Format(format!("{}: bad gzip member at {offset}: {e}", path.display()))
            })?;
        let (digest, length) = member.finish();
        if length == 0 {
            break;
        }
        if has_pkginfo {
            debug!(
                "Control segment of {} spans {}..{}",
                path.display(), offset, offset + length
            );
            return Ok(digest);
        }
        offset += length;
    }

    Err(Error::Format(format!("{} has no control segment", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{DigestEncoding, hash_bytes, sha256_hex};
    use base64::Engine;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory transport counting `open` calls
    #[derive(Default)]
    struct MemoryTransport {
        files: HashMap<String, Vec<u8>>,
        opens: AtomicUsize,
    }

    impl MemoryTransport {
        fn with(locator: &str, body: &[u8]) -> Self {
            let mut files = HashMap::new();
            files.insert(locator.to_string(), body.to_vec());
            Self {
                files,
                opens: AtomicUsize::new(0),
            }
        }
    }

    impl Transport for MemoryTransport {
        fn open(&self, locator: &str) -> Result<Body> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let body = self
                .files
                .get(locator)
                .cloned()
                .ok_or_else(|| Error::NotFound(locator.to_string()))?;
            let len = body.len() as u64;
            Ok(Body::new(Cursor::new(body), Some(len)))
        }
    }

    /// Yields some bytes, then fails the connection
    struct BrokenReader {
        sent: bool,
    }

    impl Read for BrokenReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.sent {
                return Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"));
            }
            self.sent = true;
            buf[..4].copy_from_slice(b"part");
            Ok(4)
        }
    }

    struct BrokenTransport {
        opens: AtomicUsize,
    }

    impl Transport for BrokenTransport {
        fn open(&self, _locator: &str) -> Result<Body> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Body::new(BrokenReader { sent: false }, Some(1024)))
        }
    }

    /// Cancels the signal on first read
    struct CancellingReader {
        cancel: CancelSignal,
    }

    impl Read for CancellingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.cancel.cancel();
            buf[0] = b'x';
            Ok(1)
        }
    }

    struct CancellingTransport {
        cancel: CancelSignal,
    }

    impl Transport for CancellingTransport {
        fn open(&self, _locator: &str) -> Result<Body> {
            Ok(Body::new(CancellingReader { cancel: self.cancel.clone() }, None))
        }
    }

    fn dir_is_empty(dir: &Path) -> bool {
        fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn test_fetch_then_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("debian").join("hello_2.10-3_amd64.deb");
        let fetcher = ArchiveFetcher::new(MemoryTransport::with("mem://hello", b"payload"));
        let cancel = CancelSignal::new();

        assert_eq!(fetcher.fetch("mem://hello", &dest, &cancel).unwrap(), 7);
        assert_eq!(fs::read(&dest).unwrap(), b"payload");
        assert_eq!(fetcher.transport().opens.load(Ordering::SeqCst), 1);

        assert_eq!(fetcher.fetch("mem://hello", &dest, &cancel).unwrap(), 0);
        assert_eq!(fetcher.transport().opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_download_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.apk");
        let fetcher = ArchiveFetcher::new(BrokenTransport {
            opens: AtomicUsize::new(0),
        })
        .with_retry_policy(2, Duration::ZERO);

        let result = fetcher.fetch("mem://a", &dest, &CancelSignal::new());
        assert!(matches!(result, Err(Error::Network(_))));
        assert_eq!(fetcher.transport().opens.load(Ordering::SeqCst), 2);
        assert!(!dest.exists());
        assert!(dir_is_empty(dir.path()));
    }

    #[test]
    fn test_not_found_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher =
            ArchiveFetcher::new(MemoryTransport::default()).with_retry_policy(3, Duration::ZERO);
        let result = fetcher.fetch("mem://missing", &dir.path().join("x"), &CancelSignal::new());
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(fetcher.transport().opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_before_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("x.deb");
        let fetcher = ArchiveFetcher::new(MemoryTransport::with("mem://x", b"data"));
        let cancel = CancelSignal::new();
        cancel.cancel();

        let result = fetcher.fetch("mem://x", &dest, &cancel);
        assert!(matches!(result, Err(Error::Cancelled(_))));
        assert!(!dest.exists());
        assert_eq!(fetcher.transport().opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancel_while_streaming() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("x.deb");
        let cancel = CancelSignal::new();
        let fetcher = ArchiveFetcher::new(CancellingTransport { cancel: cancel.clone() });

        let result = fetcher.fetch("mem://x", &dest, &cancel);
        assert!(matches!(result, Err(Error::Cancelled(_))));
        assert!(dir_is_empty(dir.path()));
    }

    #[test]
    fn test_verify_and_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg.deb");
        fs::write(&path, b"hello world").unwrap();
        let checksum = Checksum::hex(HashAlgorithm::Sha256, sha256_hex(b"hello world"));
        verify(&path, &checksum).unwrap();

        fs::write(&path, b"hello worle").unwrap();
        match verify(&path, &checksum) {
            Err(Error::HashMismatch { algorithm, expected, .. }) => {
                assert_eq!(algorithm, HashAlgorithm::Sha256);
                assert_eq!(expected, checksum.value);
            }
            other => panic!("expected hash mismatch, got {other:?}"),
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_verify_base64_sha512() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("newtonsoft.json.13.0.3.nupkg");
        fs::write(&path, b"nupkg bytes").unwrap();
        let digest = hash_bytes(HashAlgorithm::Sha512, b"nupkg bytes");
        let checksum = Checksum::new(
            HashAlgorithm::Sha512,
            DigestEncoding::Base64,
            base64::engine::general_purpose::STANDARD.encode(digest),
        );
        verify(&path, &checksum).unwrap();
    }

    #[test]
    fn test_fetch_verified_removes_corrupt_cache() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.pkg.tar.zst");
        let fetcher = ArchiveFetcher::new(MemoryTransport::with("mem://a", b"tampered"));
        let checksum = Checksum::hex(HashAlgorithm::Sha256, sha256_hex(b"original"));

        let result =
            fetcher.fetch_verified("mem://a", &dest, Some(&checksum), &CancelSignal::new());
        assert!(matches!(result, Err(Error::HashMismatch { .. })));
        assert!(!dest.exists());
    }

    fn gzip_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, body) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *body).unwrap();
        }
        let tar = builder.into_inner().unwrap();
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&tar).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_apk_control_segment_checksum() {
        let signature = gzip_tar(&[(".SIGN.RSA.alpine-devel.rsa.pub", b"sig")]);
        let control = gzip_tar(&[(".PKGINFO", b"pkgname = zlib\npkgver = 1.3.1-r1\n")]);
        let data = gzip_tar(&[("usr/lib/libz.so.1", b"\x7fELF")]);
        let apk = [signature.clone(), control.clone(), data].concat();

        let digest = hash_bytes(HashAlgorithm::Sha1, &control);
        let checksum = Checksum::parse_apk(&format!(
            "Q1{}",
            base64::engine::general_purpose::STANDARD.encode(digest)
        ))
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zlib-1.3.1-r1.apk");
        fs::write(&path, &apk).unwrap();
        verify(&path, &checksum).unwrap();

        // Flip a byte in the control member's gzip mtime field
        let mut corrupt = apk.clone();
        corrupt[signature.len() + 4] ^= 0xff;
        fs::write(&path, &corrupt).unwrap();
        assert!(matches!(verify(&path, &checksum), Err(Error::HashMismatch { .. })));
        assert!(!path.exists());
    }

    #[test]
    fn test_apk_control_digest_reads_no_further_than_control() {
        let control = gzip_tar(&[(".PKGINFO", b"pkgname = musl\npkgver = 1.2.5-r0\n")]);
        // Whatever follows the control member is never decoded
        let apk = [control.clone(), vec![0xde; 64 * 1024]].concat();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("musl-1.2.5-r0.apk");
        fs::write(&path, &apk).unwrap();
        assert_eq!(
            apk_control_digest(&path, HashAlgorithm::Sha1).unwrap(),
            hash_bytes(HashAlgorithm::Sha1, &control)
        );
    }

    #[test]
    fn test_apk_without_control_segment_is_removed() {
        let data = gzip_tar(&[("usr/lib/libz.so.1", b"\x7fELF")]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zlib-1.3.1-r1.apk");
        fs::write(&path, &data).unwrap();

        let checksum = Checksum::parse_apk("Q1AAAAAAAAAAAAAAAAAAAAAAAAAAA=").unwrap();
        assert!(matches!(verify(&path, &checksum), Err(Error::Format(_))));
        assert!(!path.exists());
    }
}
