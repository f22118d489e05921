// src/backend/nuget.rs

//! Per-package NuGet catalog
//!
//! A NuGet feed cannot be listed whole. Each id is fetched on demand through
//! `FindPackagesById()`, following `rel="next"` links, and the versions are
//! kept in their own TTL cache, newest stable version first.

use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::error::{Error, Result};
use crate::fetch::RepositoryClient;
use crate::index::nuget::{NEUTRAL_ARCH, next_page};
use crate::index::{FeedContext, IndexCache, IndexParser, IndexSnapshot, NugetFeedParser};
use crate::record::PackageRecord;
use crate::resolver::PackageCatalog;

/// Pages followed for one id before giving up
const MAX_PAGES: usize = 50;

/// Sort key putting stable releases first, then newest first
///
/// Versions semver cannot read (leading zeros, odd shapes) rank below
/// every readable one and compare as strings.
fn version_key(version: &str) -> (bool, Option<semver::Version>, String) {
    match parse_version(version) {
        Some(parsed) => (parsed.pre.is_empty(), Some(parsed), version.to_string()),
        None => (!version.contains('-'), None, version.to_string()),
    }
}

/// Read a NuGet version as semver, padding `1.2` and folding a fourth part
fn parse_version(version: &str) -> Option<semver::Version> {
    let split = version.find(['-', '+']).unwrap_or(version.len());
    let (core, suffix) = version.split_at(split);
    let mut parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 4 {
        return None;
    }
    let revision = if parts.len() == 4 { parts.pop() } else { None };
    while parts.len() < 3 {
        parts.push("0");
    }

    let mut text = parts.join(".");
    match (suffix.strip_prefix('-'), revision) {
        (Some(pre), Some(revision)) => {
            text.push_str(&format!("-{pre}+r{revision}"));
        }
        (Some(_), None) => text.push_str(suffix),
        (None, Some(revision)) => text.push_str(&format!("+r{revision}")),
        (None, None) => text.push_str(suffix),
    }
    semver::Version::parse(&text).ok()
}

/// Order NuGet records so the preferred version comes first
pub fn sort_versions(records: &mut [PackageRecord]) {
    records.sort_by_cached_key(|record| Reverse(version_key(&record.version)));
}

/// On-demand catalog over one NuGet (or Chocolatey) OData feed
pub struct NugetCatalog {
    feed: String,
    context: FeedContext,
    client: RepositoryClient,
    ttl: Duration,
    packages: Mutex<HashMap<String, Arc<IndexCache<IndexSnapshot>>>>,
}

impl NugetCatalog {
    pub fn new(
        feed: impl Into<String>,
        context: FeedContext,
        client: RepositoryClient,
        ttl: Duration,
    ) -> Self {
        Self {
            feed: feed.into().trim_end_matches('/').to_string(),
            context,
            client,
            ttl,
            packages: Mutex::new(HashMap::new()),
        }
    }

    /// `FindPackagesById()` query for one id
    pub fn find_packages_url(&self, id: &str) -> String {
        format!("{}/FindPackagesById()?id='{}'", self.feed, id)
    }

    /// `Search()` query for a term
    pub fn search_url(&self, query: &str) -> String {
        format!(
            "{}/Search()?searchTerm='{}'&includePrerelease=false",
            self.feed, query
        )
    }

    fn cache_for(&self, id: &str) -> Arc<IndexCache<IndexSnapshot>> {
        let mut packages = self.packages.lock();
        let key = id.to_ascii_lowercase();
        Arc::clone(
            packages
                .entry(key)
                .or_insert_with(|| Arc::new(IndexCache::new(format!("nuget:{id}"), self.ttl))),
        )
    }

    /// Every published version of `id`, preferred first
    pub fn versions(&self, id: &str, cancel: &CancelSignal) -> Result<Arc<IndexSnapshot>> {
        self.cache_for(id).get_or_refresh(|| self.load(id, cancel))
    }

    fn load(&self, id: &str, cancel: &CancelSignal) -> Result<IndexSnapshot> {
        let parser = NugetFeedParser::new(self.context.clone());
        let mut records = Vec::new();
        let mut next = Some(self.find_packages_url(id));
        let mut pages = 0;

        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_PAGES {
                warn!("Stopping after {} pages of {}", MAX_PAGES, id);
                break;
            }
            let feed = self.client.fetch_bytes(&url, cancel)?;
            records.extend(parser.parse(&feed)?);
            next = next_page(&feed)?;
        }

        records.retain(|record| record.name.eq_ignore_ascii_case(id));
        if records.is_empty() {
            return Err(Error::NotFound(format!("NuGet package {id}")));
        }
        sort_versions(&mut records);
        info!(
            "Found {} versions of {} ({} pages)",
            records.len(), id, pages
        );
        Ok(IndexSnapshot::build(records, NEUTRAL_ARCH))
    }

    /// Packages matching a search term, first page only
    pub fn search(&self, query: &str, cancel: &CancelSignal) -> Result<Vec<Arc<PackageRecord>>> {
        let feed = self.client.fetch_bytes(&self.search_url(query), cancel)?;
        let records = NugetFeedParser::new(self.context.clone()).parse(&feed)?;
        debug!("Search for '{}' returned {} entries", query, records.len());
        Ok(records.into_iter().map(Arc::new).collect())
    }

    /// Forget every cached id
    pub fn invalidate(&self) {
        self.packages.lock().clear();
    }

    /// Catalog view for one request
    pub fn view<'a>(&'a self, cancel: &'a CancelSignal) -> NugetView<'a> {
        NugetView {
            catalog: self,
            cancel,
        }
    }
}

/// [`NugetCatalog`] bound to a cancellation signal
pub struct NugetView<'a> {
    catalog: &'a NugetCatalog,
    cancel: &'a CancelSignal,
}

impl PackageCatalog for NugetView<'_> {
    fn lookup(&self, name: &str) -> Result<Option<Arc<PackageRecord>>> {
        match self.catalog.versions(name, self.cancel) {
            Ok(snapshot) => Ok(snapshot.records().first().cloned()),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn lookup_version(&self, name: &str, version: &str) -> Result<Option<Arc<PackageRecord>>> {
        match self.catalog.versions(name, self.cancel) {
            Ok(snapshot) => Ok(snapshot
                .records()
                .iter()
                .find(|record| record.matches_version(version))
                .cloned()),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// NuGet has no virtual packages
    fn provider(&self, _capability: &str) -> Result<Option<Arc<PackageRecord>>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecosystem::Ecosystem;

    fn record(version: &str) -> PackageRecord {
        PackageRecord::new(Ecosystem::NuGet, "Newtonsoft.Json", version, "x")
    }

    #[test]
    fn test_parse_version_shapes() {
        assert_eq!(parse_version("13.0.3").unwrap().to_string(), "13.0.3");
        assert_eq!(parse_version("4.7").unwrap().to_string(), "4.7.0");
        assert_eq!(parse_version("1.2.3.4").unwrap().to_string(), "1.2.3+r4");
        assert_eq!(
            parse_version("2.0.0-beta1").unwrap().to_string(),
            "2.0.0-beta1"
        );
        assert!(parse_version("01.2.3").is_none());
    }

    #[test]
    fn test_stable_newest_first() {
        let mut records: Vec<_> = ["9.0.1", "13.0.3", "14.0.0-beta1", "13.0.1", "6.0"]
            .into_iter()
            .map(record)
            .collect();
        sort_versions(&mut records);
        let order: Vec<_> = records.iter().map(|r| r.version.as_str()).collect();
        assert_eq!(
            order,
            vec!["13.0.3", "13.0.1", "9.0.1", "6.0", "14.0.0-beta1"]
        );
    }

    #[test]
    fn test_query_urls() {
        let catalog = NugetCatalog::new(
            "https://www.nuget.org/api/v2/",
            FeedContext::default(),
            RepositoryClient::new().unwrap(),
            Duration::from_secs(60),
        );
        assert_eq!(
            catalog.find_packages_url("Newtonsoft.Json"),
            "https://www.nuget.org/api/v2/FindPackagesById()?id='Newtonsoft.Json'"
        );
        assert!(catalog.search_url("json").contains("searchTerm='json'"));
    }
}
