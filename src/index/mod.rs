// src/index/mod.rs

//! Repository index parsing
//!
//! One parser per ecosystem turns raw feed bytes into [`PackageRecord`]s.
//! Parsed records are gathered into an [`IndexSnapshot`] and kept in an
//! [`IndexCache`] owned by the adapter.

pub mod alpine;
pub mod arch;
pub mod cache;
pub mod debian;
pub mod homebrew;
pub mod nix;
pub mod nuget;
pub mod provider;
pub mod rpmmd;
pub mod stanza;

use quick_xml::events::BytesStart;
use std::borrow::Cow;

use crate::compression::{self, CompressionFormat};
use crate::error::{Error, Result};
use crate::record::PackageRecord;

pub use alpine::AlpineIndexParser;
pub use arch::ArchDbParser;
pub use cache::IndexCache;
pub use debian::DebianPackagesParser;
pub use homebrew::HomebrewFormulaParser;
pub use nix::NarinfoParser;
pub use nuget::NugetFeedParser;
pub use provider::{IndexSnapshot, ProviderIndex};
pub use rpmmd::RpmPrimaryParser;

/// Turns one feed into canonical records
pub trait IndexParser {
    /// Parse a (possibly compressed) feed
    ///
    /// Fails with `Error::Format` on structural corruption.
    fn parse(&self, feed: &[u8]) -> Result<Vec<PackageRecord>>;
}

/// Repository facts every parser stamps onto its records
#[derive(Debug, Clone, Default)]
pub struct FeedContext {
    /// Origin repository tag
    pub origin: String,
    /// Origin priority, copied onto every record
    pub priority: i32,
    /// Base that relative artifact locations are joined to
    pub base_url: String,
}

impl FeedContext {
    pub fn new(origin: impl Into<String>, priority: i32, base_url: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            priority,
            base_url: base_url.into(),
        }
    }

    /// Absolute locator for a feed-relative location
    pub fn locator(&self, location: &str) -> String {
        join_url(&self.base_url, location)
    }

    /// Copy origin and priority onto a record
    pub fn stamp(&self, record: &mut PackageRecord) {
        record.origin = self.origin.clone();
        record.priority = self.priority;
    }
}

/// Join a base URL (or path) and a relative location with one slash
///
/// Locations that are already absolute URLs are returned unchanged.
pub fn join_url(base: &str, location: &str) -> String {
    if location.contains("://") || base.is_empty() {
        return location.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        location.trim_start_matches("./").trim_start_matches('/')
    )
}

/// Decompress a feed if its leading bytes carry a compression magic
pub fn sniff_decompress(feed: &[u8]) -> Result<Cow<'_, [u8]>> {
    match CompressionFormat::from_magic_bytes(feed) {
        CompressionFormat::None => Ok(Cow::Borrowed(feed)),
        format => {
            let data = compression::decompress(feed, format)
                .map_err(|e| Error::Format(format!("cannot decompress {format} feed: {e}")))?;
            Ok(Cow::Owned(data))
        }
    }
}

/// Decompress a downloaded feed, by filename suffix or magic bytes
pub fn decode_feed(name: &str, raw: &[u8]) -> Result<Vec<u8>> {
    compression::decompress_named(name, raw)
        .map_err(|e| Error::Format(format!("cannot decompress {name}: {e}")))
}

/// Read one attribute of an XML element, unescaped
pub(crate) fn xml_attr(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| Error::Format(format!("invalid XML attribute: {e}")))?;
        if attr.key.local_name().as_ref() == name {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}
