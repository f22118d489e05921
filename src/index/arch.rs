// src/index/arch.rs

//! Arch Linux sync database parser (`<repo>.db`)
//!
//! The database is a gzip or zstd tar with one directory per package.
//! Each `desc` file is a list of `%KEY%` blocks, one value per line, ended
//! by a blank line. Older databases keep dependencies in a separate
//! `depends` file next to `desc`.

use std::collections::HashMap;
use std::io::Read;
use tracing::debug;

use super::{FeedContext, IndexParser};
use crate::compression::{CompressionFormat, create_decoder};
use crate::ecosystem::Ecosystem;
use crate::error::{Error, Result};
use crate::hash::{Checksum, HashAlgorithm};
use crate::record::PackageRecord;

/// `%KEY%` blocks of one desc-style file
type DescBlocks = HashMap<String, Vec<String>>;

/// Parse `%KEY%` blocks; unknown keys are kept, stray lines skipped
pub fn parse_desc(text: &str) -> DescBlocks {
    let mut blocks = DescBlocks::new();
    let mut current: Option<String> = None;

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() {
            current = None;
            continue;
        }
        if line.len() > 2 && line.starts_with('%') && line.ends_with('%') {
            let key = line.trim_matches('%').to_string();
            blocks.entry(key.clone()).or_default();
            current = Some(key);
            continue;
        }
        match &current {
            Some(key) => blocks.entry(key.clone()).or_default().push(line.to_string()),
            None => debug!("Skipping stray desc line {}: {:?}", idx + 1, line),
        }
    }

    blocks
}

fn first<'a>(blocks: &'a DescBlocks, key: &str) -> Option<&'a str> {
    blocks
        .get(key)
        .and_then(|values| values.first())
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

pub struct ArchDbParser {
    context: FeedContext,
}

impl ArchDbParser {
    /// `context.base_url` is the `<repo>/os/<arch>` directory
    pub fn new(context: FeedContext) -> Self {
        Self { context }
    }

    fn record_from(&self, dir: &str, blocks: &DescBlocks) -> Result<PackageRecord> {
        let missing = |key: &str| {
            Error::Format(format!("{dir}/desc is missing mandatory field %{key}%"))
        };
        let name = first(blocks, "NAME").ok_or_else(|| missing("NAME"))?;
        let version = first(blocks, "VERSION").ok_or_else(|| missing("VERSION"))?;
        let filename = first(blocks, "FILENAME").ok_or_else(|| missing("FILENAME"))?;

        let mut record = PackageRecord::new(
            Ecosystem::Arch,
            name,
            version,
            self.context.locator(filename),
        );
        self.context.stamp(&mut record);
        record.architecture = first(blocks, "ARCH").unwrap_or("any").to_string();
        record.size = first(blocks, "CSIZE").and_then(|s| s.parse().ok());
        record.description = first(blocks, "DESC").map(str::to_string);
        record.checksum = first(blocks, "SHA256SUM")
            .map(|v| Checksum::hex(HashAlgorithm::Sha256, v))
            .or_else(|| first(blocks, "MD5SUM").map(|v| Checksum::hex(HashAlgorithm::Md5, v)));
        record.depends = blocks.get("DEPENDS").cloned().unwrap_or_default();
        record.provides = blocks.get("PROVIDES").cloned().unwrap_or_default();
        for (key, extra) in [("BASE", "base"), ("URL", "url"), ("ISIZE", "installed_size")] {
            if let Some(value) = first(blocks, key) {
                record.extra.insert(extra.to_string(), value.to_string());
            }
        }
        if let Some(licenses) = blocks.get("LICENSE").filter(|l| !l.is_empty()) {
            record.extra.insert("license".to_string(), licenses.join(" "));
        }
        Ok(record)
    }
}

impl IndexParser for ArchDbParser {
    fn parse(&self, feed: &[u8]) -> Result<Vec<PackageRecord>> {
        let format = CompressionFormat::from_magic_bytes(feed);
        let decoder = create_decoder(feed, format)?;
        let mut archive = tar::Archive::new(decoder);

        // Directories in archive order, each with its merged desc blocks
        let mut order: Vec<String> = Vec::new();
        let mut packages: HashMap<String, DescBlocks> = HashMap::new();

        let entries = archive
            .entries()
            .map_err(|e| Error::Format(format!("sync database is unreadable: {e}")))?;
        for entry in entries {
            let mut entry =
                entry.map_err(|e| Error::Format(format!("corrupt sync database: {e}")))?;
            let path = entry
                .path()
                .map_err(|e| Error::Format(format!("bad sync database path: {e}")))?
                .to_string_lossy()
                .into_owned();
            let Some((dir, file)) = path.trim_end_matches('/').rsplit_once('/') else {
                continue;
            };
            if file != "desc" && file != "depends" {
                continue;
            }

            let mut text = String::new();
            entry
                .read_to_string(&mut text)
                .map_err(|e| Error::Format(format!("unreadable {path}: {e}")))?;

            let blocks = packages.entry(dir.to_string()).or_insert_with(|| {
                order.push(dir.to_string());
                DescBlocks::new()
            });
            blocks.extend(parse_desc(&text));
        }

        let records = order
            .iter()
            .filter_map(|dir| packages.get(dir).map(|blocks| (dir, blocks)))
            .filter(|(dir, blocks)| {
                let looks_like_package =
                    blocks.contains_key("NAME") || blocks.contains_key("FILENAME");
                if !looks_like_package {
                    debug!("Skipping {} with only dependency data", dir);
                }
                looks_like_package
            })
            .map(|(dir, blocks)| self.record_from(dir, blocks))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Parsed {} Arch records from {}",
            records.len(), self.context.origin
        );
        Ok(records)
    }
}
