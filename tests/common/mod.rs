// tests/common/mod.rs

//! Shared fixture builders for integration tests.
//!
//! Every repository is laid out under a temp directory and reached through
//! `file://` URLs or bare paths, so nothing touches the network.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs;
use std::io::Write;
use std::path::Path;

use pkgbridge::hash::{HashAlgorithm, hash_bytes, nixbase32, sha256_hex};

/// One member of a fixture archive
#[derive(Clone, Copy)]
pub enum Member<'a> {
    File(&'a str, &'a [u8], u32),
    Dir(&'a str),
    Symlink(&'a str, &'a str),
}

/// Write `members` into a tar builder
pub fn append_members<W: Write>(builder: &mut tar::Builder<W>, members: &[Member<'_>]) {
    for member in members {
        let mut header = tar::Header::new_gnu();
        match *member {
            Member::File(path, body, mode) => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(body.len() as u64);
                header.set_mode(mode);
                builder.append_data(&mut header, path, body).unwrap();
            }
            Member::Dir(path) => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                header.set_mode(0o755);
                builder.append_data(&mut header, path, &[][..]).unwrap();
            }
            Member::Symlink(path, target) => {
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_size(0);
                header.set_mode(0o777);
                builder.append_link(&mut header, path, target).unwrap();
            }
        }
    }
}

pub fn tar(members: &[Member<'_>]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    append_members(&mut builder, members);
    builder.into_inner().unwrap()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn tar_gz(members: &[Member<'_>]) -> Vec<u8> {
    gzip(&tar(members))
}

/// A tar member whose name is written raw, bypassing the builder's checks
pub fn raw_tar_file(name: &str, body: &[u8]) -> Vec<u8> {
    let mut header = tar::Header::new_old();
    let raw_name = &mut header.as_old_mut().name;
    raw_name[..name.len()].copy_from_slice(name.as_bytes());
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(body.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();

    let mut out = header.as_bytes().to_vec();
    out.extend_from_slice(body);
    out.resize(out.len().div_ceil(512) * 512, 0);
    out
}

/// `.deb` with a `data.tar.gz` holding `members`
pub fn deb(members: &[Member<'_>]) -> Vec<u8> {
    let control = tar_gz(&[Member::File("./control", b"Package: fixture\n", 0o644)]);
    let data = tar_gz(members);

    let mut builder = ar::Builder::new(Vec::new());
    for (name, body) in [
        ("debian-binary", &b"2.0\n"[..]),
        ("control.tar.gz", &control[..]),
        ("data.tar.gz", &data[..]),
    ] {
        let header = ar::Header::new(name.as_bytes().to_vec(), body.len() as u64);
        builder.append(&header, body).unwrap();
    }
    builder.into_inner().unwrap()
}

/// `.apk` as control and data gzip members; returns the package and its
/// `Q1` control checksum
pub fn apk(name: &str, version: &str, members: &[Member<'_>]) -> (Vec<u8>, String) {
    let pkginfo = format!("pkgname = {name}\npkgver = {version}\n");
    let control = tar_gz(&[Member::File(".PKGINFO", pkginfo.as_bytes(), 0o644)]);
    let data = tar_gz(members);

    let checksum = format!(
        "Q1{}",
        base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            hash_bytes(HashAlgorithm::Sha1, &control)
        )
    );
    let mut package = control;
    package.extend_from_slice(&data);
    (package, checksum)
}

/// `.nupkg` with OPC metadata next to `files`
pub fn nupkg(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, body) in [
        ("[Content_Types].xml", &b"<Types/>"[..]),
        ("_rels/.rels", &b"<Relationships/>"[..]),
        ("package/services/metadata/core-properties/1.psmdcp", &b"<x/>"[..]),
    ]
    .into_iter()
    .chain(files.iter().copied())
    {
        writer.start_file(name, options).unwrap();
        writer.write_all(body).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

fn pad4(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// cpio `newc` stream: (name, mode, ino, nlink, body)
pub fn newc(entries: &[(&str, u32, u32, u32, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    let trailer: (&str, u32, u32, u32, &[u8]) = ("TRAILER!!!", 0, 0, 1, b"");
    for (name, mode, ino, nlink, body) in entries.iter().chain(std::iter::once(&trailer)) {
        let namesize = name.len() + 1;
        out.extend_from_slice(
            format!(
                "070701{ino:08x}{mode:08x}{:08x}{:08x}{nlink:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{:08x}{namesize:08x}{:08x}",
                0, 0, 0, body.len(), 0, 0, 0, 0, 0
            )
            .as_bytes(),
        );
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out.resize(out.len() + pad4(110 + namesize), 0);
        out.extend_from_slice(body);
        out.resize(out.len() + pad4(body.len()), 0);
    }
    out
}

/// `.rpm` with empty signature and main headers around a gzip cpio payload
pub fn rpm(entries: &[(&str, u32, u32, u32, &[u8])]) -> Vec<u8> {
    let mut rpm = vec![0xed, 0xab, 0xee, 0xdb];
    rpm.resize(96, 0);
    let header = |out: &mut Vec<u8>| {
        out.extend_from_slice(&[0x8e, 0xad, 0xe8, 0x01, 0, 0, 0, 0]);
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
    };
    header(&mut rpm);
    header(&mut rpm);
    rpm.extend_from_slice(&gzip(&newc(entries)));
    rpm
}

/// Minimal NAR writer
#[derive(Default)]
pub struct Nar(pub Vec<u8>);

impl Nar {
    pub fn str(&mut self, s: &[u8]) -> &mut Self {
        self.0.extend_from_slice(&(s.len() as u64).to_le_bytes());
        self.0.extend_from_slice(s);
        self.0.resize(self.0.len() + (8 - s.len() % 8) % 8, 0);
        self
    }

    pub fn tokens(&mut self, tokens: &[&str]) -> &mut Self {
        for token in tokens {
            self.str(token.as_bytes());
        }
        self
    }
}

/// NAR of a directory holding one executable at `bin/<program>`
pub fn nar_with_program(program: &str, body: &[u8]) -> Vec<u8> {
    let mut nar = Nar::default();
    nar.tokens(&["nix-archive-1", "(", "type", "directory"]);
    nar.tokens(&["entry", "(", "name", "bin", "node", "(", "type", "directory"]);
    nar.tokens(&["entry", "(", "name", program, "node", "(", "type", "regular"]);
    nar.tokens(&["executable", "", "contents"]).str(body);
    nar.tokens(&[")", ")"]);
    nar.tokens(&[")", ")"]);
    nar.tokens(&[")"]);
    nar.0
}

/// `sha256:<nix base32>` digest of `data`
pub fn nix_sha256(data: &[u8]) -> String {
    format!(
        "sha256:{}",
        nixbase32::encode(&hash_bytes(HashAlgorithm::Sha256, data))
    )
}

pub fn sha256(data: &[u8]) -> String {
    sha256_hex(data)
}

/// Write `data` to `root/relative`, creating parents
pub fn put(root: &Path, relative: &str, data: &[u8]) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

pub fn file_url(path: &Path) -> String {
    url::Url::from_directory_path(path)
        .unwrap()
        .as_str()
        .trim_end_matches('/')
        .to_string()
}

/// Send library logs to the test harness output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
