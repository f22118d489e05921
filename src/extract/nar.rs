// src/extract/nar.rs

//! Nix archives
//!
//! A NAR is a sequence of strings, each an 8-byte little-endian length
//! followed by the bytes and zero padding to a multiple of 8. Nodes are
//! framed by `(` and `)`:
//!
//! ```text
//! nar       = "nix-archive-1" node
//! node      = "(" "type" ( regular | symlink | directory ) ")"
//! regular   = "regular" [ "executable" "" ] "contents" <bytes>
//! symlink   = "symlink" "target" <string>
//! directory = "directory" { "entry" "(" "name" <string> "node" node ")" }
//! ```
//!
//! The root node becomes the extraction root itself.

use std::io::{self, BufReader, Read};
use std::path::Path;
use tracing::debug;

use super::writer::open_file;
use super::{ArchiveEntry, EntryKind, EntrySink};
use crate::compression::create_decoder_sniffed;
use crate::error::{Error, Result};

pub const NAR_MAGIC: &str = "nix-archive-1";
/// Longest framing string, name or symlink target accepted
const MAX_STRING: u64 = 64 * 1024;
const MAX_DEPTH: usize = 256;

fn corrupt(msg: impl std::fmt::Display) -> Error {
    Error::Extraction(format!("corrupt NAR: {msg}"))
}

fn padding(len: u64) -> u64 {
    (8 - len % 8) % 8
}

/// Streaming NAR decoder
pub struct NarReader<R: Read> {
    reader: R,
}

impl<R: Read> NarReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.reader.read_exact(&mut buf).map_err(corrupt)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn skip(&mut self, len: u64) -> Result<()> {
        let skipped = io::copy(&mut self.reader.by_ref().take(len), &mut io::sink())?;
        if skipped != len {
            return Err(corrupt("unexpected end of archive"));
        }
        Ok(())
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u64()?;
        if len > MAX_STRING {
            return Err(corrupt(format!("string of {len} bytes")));
        }
        let mut buf = vec![0u8; len as usize];
        self.reader.read_exact(&mut buf).map_err(corrupt)?;
        self.skip(padding(len))?;
        String::from_utf8(buf).map_err(corrupt)
    }

    fn expect(&mut self, token: &str) -> Result<()> {
        let found = self.read_string()?;
        if found != token {
            return Err(corrupt(format!("expected {token:?}, found {found:?}")));
        }
        Ok(())
    }

    /// Decode the whole archive into `sink`
    pub fn read_into(&mut self, sink: &mut dyn EntrySink) -> Result<()> {
        self.expect(NAR_MAGIC)?;
        self.node(String::new(), sink, 0)
    }

    fn node(&mut self, path: String, sink: &mut dyn EntrySink, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(corrupt("directory nesting too deep"));
        }
        self.expect("(")?;
        self.expect("type")?;

        match self.read_string()?.as_str() {
            "regular" => {
                let mut tag = self.read_string()?;
                let mut executable = false;
                if tag == "executable" {
                    self.expect("")?;
                    executable = true;
                    tag = self.read_string()?;
                }
                if tag != "contents" {
                    return Err(corrupt(format!("expected \"contents\", found {tag:?}")));
                }
                let size = self.read_u64()?;
                let entry = ArchiveEntry {
                    path,
                    kind: EntryKind::File,
                    mode: if executable { 0o755 } else { 0o644 },
                    size,
                    link_target: None,
                };
                let mut contents = self.reader.by_ref().take(size);
                sink.on_entry(&entry, &mut contents)?;
                // Whatever the sink left unread
                let rest = contents.limit();
                self.skip(rest + padding(size))?;
            }
            "symlink" => {
                self.expect("target")?;
                let target = self.read_string()?;
                let entry = ArchiveEntry {
                    path,
                    kind: EntryKind::Symlink,
                    mode: 0o777,
                    size: 0,
                    link_target: Some(target),
                };
                sink.on_entry(&entry, &mut io::empty())?;
            }
            "directory" => {
                let entry = ArchiveEntry {
                    path: path.clone(),
                    kind: EntryKind::Directory,
                    mode: 0o755,
                    size: 0,
                    link_target: None,
                };
                sink.on_entry(&entry, &mut io::empty())?;

                loop {
                    match self.read_string()?.as_str() {
                        ")" => return Ok(()),
                        "entry" => {}
                        other => return Err(corrupt(format!("unexpected {other:?} in directory"))),
                    }
                    self.expect("(")?;
                    self.expect("name")?;
                    let name = self.read_string()?;
                    if name.is_empty() || name.contains('/') || name.contains('\0') {
                        return Err(corrupt(format!("invalid entry name {name:?}")));
                    }
                    self.expect("node")?;
                    let child = if path.is_empty() {
                        name
                    } else {
                        format!("{path}/{name}")
                    };
                    self.node(child, sink, depth + 1)?;
                    self.expect(")")?;
                }
            }
            other => return Err(corrupt(format!("unknown node type {other:?}"))),
        }

        self.expect(")")
    }
}

/// Stream a (possibly compressed) `.nar` file
pub fn read_nar(path: &Path, sink: &mut dyn EntrySink) -> Result<()> {
    let reader = BufReader::new(open_file(path)?);
    let (format, decoder) =
        create_decoder_sniffed(reader).map_err(|e| Error::Extraction(e.to_string()))?;
    debug!("Reading {} NAR {}", format, path.display());
    NarReader::new(decoder).read_into(sink)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal NAR writer for fixtures
    #[derive(Default)]
    pub(crate) struct NarBuilder(pub Vec<u8>);

    impl NarBuilder {
        pub(crate) fn str(&mut self, s: &[u8]) -> &mut Self {
            self.0.extend_from_slice(&(s.len() as u64).to_le_bytes());
            self.0.extend_from_slice(s);
            self.0.resize(self.0.len() + padding(s.len() as u64) as usize, 0);
            self
        }

        pub(crate) fn tokens(&mut self, tokens: &[&str]) -> &mut Self {
            for token in tokens {
                self.str(token.as_bytes());
            }
            self
        }
    }

    /// `/nix/store/...-hello` with `bin/hello` and a `bin/hi` symlink
    pub(crate) fn hello_nar() -> Vec<u8> {
        let mut nar = NarBuilder::default();
        nar.tokens(&[NAR_MAGIC, "(", "type", "directory"]);
        nar.tokens(&["entry", "(", "name", "bin", "node", "(", "type", "directory"]);
        nar.tokens(&["entry", "(", "name", "hello", "node", "(", "type", "regular"]);
        nar.tokens(&["executable", "", "contents"])
            .str(b"#!/bin/sh\necho hi\n");
        nar.tokens(&[")", ")"]);
        nar.tokens(&[
            "entry", "(", "name", "hi", "node", "(", "type", "symlink", "target", "hello", ")", ")",
        ]);
        nar.tokens(&[")", ")"]);
        nar.tokens(&[")"]);
        nar.0
    }

    #[derive(Default)]
    struct Collect(Vec<(ArchiveEntry, Vec<u8>)>);

    impl EntrySink for Collect {
        fn on_entry(&mut self, entry: &ArchiveEntry, content: &mut dyn Read) -> Result<()> {
            let mut body = Vec::new();
            content.read_to_end(&mut body)?;
            self.0.push((entry.clone(), body));
            Ok(())
        }
    }

    #[test]
    fn test_directory_tree() {
        let mut sink = Collect::default();
        NarReader::new(&hello_nar()[..])
            .read_into(&mut sink)
            .unwrap();

        let Collect(entries) = &sink;
        let paths: Vec<_> = entries
            .iter()
            .map(|(e, _)| (e.path.as_str(), e.kind))
            .collect();
        assert_eq!(
            paths,
            vec![
                ("", EntryKind::Directory),
                ("bin", EntryKind::Directory),
                ("bin/hello", EntryKind::File),
                ("bin/hi", EntryKind::Symlink),
            ]
        );
        assert_eq!(sink.0[2].0.mode, 0o755);
        assert_eq!(sink.0[2].1, b"#!/bin/sh\necho hi\n");
        assert_eq!(sink.0[3].0.link_target.as_deref(), Some("hello"));
    }

    #[test]
    fn test_single_file_root() {
        let mut nar = NarBuilder::default();
        nar.tokens(&[NAR_MAGIC, "(", "type", "regular", "contents"])
            .str(b"12345");
        nar.tokens(&[")"]);

        let mut sink = Collect::default();
        NarReader::new(&nar.0[..]).read_into(&mut sink).unwrap();
        assert_eq!(sink.0.len(), 1);
        assert_eq!(sink.0[0].0.path, "");
        assert_eq!(sink.0[0].0.mode, 0o644);
        assert_eq!(sink.0[0].1, b"12345");
    }

    #[test]
    fn test_bad_magic_and_names() {
        let mut nar = NarBuilder::default();
        nar.tokens(&["nix-archive-2"]);
        let result = NarReader::new(&nar.0[..]).read_into(&mut Collect::default());
        assert!(matches!(result, Err(Error::Extraction(_))));

        let mut nar = NarBuilder::default();
        nar.tokens(&[NAR_MAGIC, "(", "type", "directory", "entry", "(", "name", "a/b", "node"]);
        let result = NarReader::new(&nar.0[..]).read_into(&mut Collect::default());
        assert!(matches!(result, Err(Error::Extraction(_))));
    }

    #[test]
    fn test_truncated() {
        let nar = hello_nar();
        let result = NarReader::new(&nar[..nar.len() - 20]).read_into(&mut Collect::default());
        assert!(matches!(result, Err(Error::Extraction(_))));
    }
}
