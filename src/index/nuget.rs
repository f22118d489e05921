// src/index/nuget.rs

//! NuGet / Chocolatey OData (Atom) feed parser
//!
//! `FindPackagesById()` answers with an Atom feed: one `<entry>` per
//! published version, package facts under `<m:properties>` and the
//! `.nupkg` location in `<content src=...>`.

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::debug;

use super::{FeedContext, IndexParser, sniff_decompress, xml_attr};
use crate::ecosystem::Ecosystem;
use crate::error::{Error, Result};
use crate::hash::{Checksum, DigestEncoding, HashAlgorithm};
use crate::record::PackageRecord;

/// Architecture recorded for every NuGet package
pub const NEUTRAL_ARCH: &str = "neutral";

/// `m:properties` children the parser keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Property {
    Id,
    Version,
    Title,
    Dependencies,
    Description,
    PackageHash,
    PackageHashAlgorithm,
    PackageSize,
    IsLatestVersion,
    ProjectUrl,
}

impl Property {
    fn from_local_name(name: &[u8]) -> Option<Self> {
        Some(match name {
            b"Id" => Self::Id,
            b"Version" => Self::Version,
            b"Title" => Self::Title,
            b"Dependencies" => Self::Dependencies,
            b"Description" => Self::Description,
            b"PackageHash" => Self::PackageHash,
            b"PackageHashAlgorithm" => Self::PackageHashAlgorithm,
            b"PackageSize" => Self::PackageSize,
            b"IsLatestVersion" => Self::IsLatestVersion,
            b"ProjectUrl" => Self::ProjectUrl,
            _ => return None,
        })
    }
}

#[derive(Debug, Default)]
struct EntryBuilder {
    id: Option<String>,
    title: Option<String>,
    version: Option<String>,
    dependencies: Option<String>,
    description: Option<String>,
    hash: Option<String>,
    hash_algorithm: Option<String>,
    size: Option<u64>,
    is_latest: bool,
    project_url: Option<String>,
    content_src: Option<String>,
}

/// Turn `Id:Range:Framework|...` into dependency tokens
///
/// Framework-only groups (`::net45`) carry no dependency; an id listed
/// under several frameworks is kept once.
pub fn parse_dependencies(field: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut seen: Vec<&str> = Vec::new();
    for group in field.split('|') {
        let mut parts = group.splitn(3, ':');
        let id = parts.next().unwrap_or_default().trim();
        let range = parts.next().unwrap_or_default().trim();
        if id.is_empty() || seen.iter().any(|s| s.eq_ignore_ascii_case(id)) {
            continue;
        }
        seen.push(id);
        tokens.push(if range.is_empty() {
            id.to_string()
        } else {
            format!("{id} ({range})")
        });
    }
    tokens
}

/// `href` of the feed's `<link rel="next">`, for paged results
pub fn next_page(feed: &[u8]) -> Result<Option<String>> {
    let data = sniff_decompress(feed)?;
    let mut reader = Reader::from_reader(data.as_ref());
    reader.trim_text(true);
    let mut buf = Vec::new();
    let mut in_entry = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"entry" => in_entry = true,
            Event::End(e) if e.local_name().as_ref() == b"entry" => in_entry = false,
            Event::Empty(e) | Event::Start(e)
                if !in_entry && e.local_name().as_ref() == b"link" =>
            {
                if xml_attr(&e, b"rel")?.as_deref() == Some("next") {
                    return xml_attr(&e, b"href");
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
        buf.clear();
    }
}

pub struct NugetFeedParser {
    context: FeedContext,
}

impl NugetFeedParser {
    pub fn new(context: FeedContext) -> Self {
        Self { context }
    }

    fn finish(&self, entry: EntryBuilder) -> Result<PackageRecord> {
        let id = entry
            .id
            .or(entry.title)
            .ok_or_else(|| Error::Format("feed entry without d:Id".to_string()))?;
        let version = entry
            .version
            .ok_or_else(|| Error::Format(format!("feed entry '{id}' has no d:Version")))?;
        let locator = entry
            .content_src
            .ok_or_else(|| Error::Format(format!("feed entry '{id}' has no content@src")))?;

        let mut record = PackageRecord::new(
            Ecosystem::NuGet,
            id,
            version,
            self.context.locator(&locator),
        );
        self.context.stamp(&mut record);
        record.architecture = NEUTRAL_ARCH.to_string();
        record.size = entry.size;
        record.depends = entry
            .dependencies
            .as_deref()
            .map(parse_dependencies)
            .unwrap_or_default();
        record.description = entry.description.and_then(|d| d.lines().next().map(str::to_string));
        if let Some(hash) = entry.hash {
            let algorithm = entry
                .hash_algorithm
                .as_deref()
                .unwrap_or("SHA512")
                .parse()
                .unwrap_or(HashAlgorithm::Sha512);
            record.checksum = Some(Checksum::new(algorithm, DigestEncoding::Base64, hash));
        }
        if entry.is_latest {
            record.extra.insert("is_latest".to_string(), "true".to_string());
        }
        if let Some(url) = entry.project_url {
            record.extra.insert("project_url".to_string(), url);
        }
        Ok(record)
    }
}

impl IndexParser for NugetFeedParser {
    fn parse(&self, feed: &[u8]) -> Result<Vec<PackageRecord>> {
        let data = sniff_decompress(feed)?;
        let mut reader = Reader::from_reader(data.as_ref());
        reader.trim_text(true);
        let mut buf = Vec::new();

        let mut records = Vec::new();
        let mut current: Option<EntryBuilder> = None;
        let mut in_properties = false;
        let mut in_title = false;
        let mut property: Option<Property> = None;

        loop {
            let event = reader.read_event_into(&mut buf).map_err(|e| {
                Error::Format(format!("feed error at byte {}: {e}", reader.buffer_position()))
            })?;
            match event {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"entry" => current = Some(EntryBuilder::default()),
                    b"properties" => in_properties = current.is_some(),
                    b"title" => in_title = current.is_some() && !in_properties,
                    b"content" => {
                        if let Some(entry) = current.as_mut() {
                            entry.content_src = xml_attr(&e, b"src")?;
                        }
                    }
                    name if in_properties => property = Property::from_local_name(name),
                    _ => {}
                },
                Event::Empty(e) if e.local_name().as_ref() == b"content" => {
                    if let Some(entry) = current.as_mut() {
                        entry.content_src = xml_attr(&e, b"src")?;
                    }
                }
                Event::Text(t) => {
                    if let Some(entry) = current.as_mut() {
                        let value = t.unescape()?.trim().to_string();
                        if in_title {
                            entry.title = Some(value);
                        } else if let Some(prop) = property {
                            match prop {
                                Property::Id => entry.id = Some(value),
                                Property::Version => entry.version = Some(value),
                                Property::Title => {
                                    entry.title.get_or_insert(value);
                                }
                                Property::Dependencies => entry.dependencies = Some(value),
                                Property::Description => entry.description = Some(value),
                                Property::PackageHash => entry.hash = Some(value),
                                Property::PackageHashAlgorithm => {
                                    entry.hash_algorithm = Some(value)
                                }
                                Property::PackageSize => entry.size = value.parse().ok(),
                                Property::IsLatestVersion => {
                                    entry.is_latest = value.eq_ignore_ascii_case("true")
                                }
                                Property::ProjectUrl => entry.project_url = Some(value),
                            }
                        }
                    }
                }
                Event::End(e) => match e.local_name().as_ref() {
                    b"entry" => {
                        if let Some(entry) = current.take() {
                            records.push(self.finish(entry)?);
                        }
                        in_properties = false;
                    }
                    b"properties" => in_properties = false,
                    b"title" => in_title = false,
                    _ => property = None,
                },
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        debug!(
            "Parsed {} NuGet entries from {}",
            records.len(), self.context.origin
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xml:base="https://www.nuget.org/api/v2" xmlns="http://www.w3.org/2005/Atom"
      xmlns:d="http://schemas.microsoft.com/ado/2007/08/dataservices"
      xmlns:m="http://schemas.microsoft.com/ado/2007/08/dataservices/metadata">
  <id>http://schemas.datacontract.org/2004/07/</id>
  <title />
  <updated>2024-05-01T00:00:00Z</updated>
  <link rel="self" href="https://www.nuget.org/api/v2/Packages" />
  <entry>
    <id>https://www.nuget.org/api/v2/Packages(Id='Serilog.Sinks.Console',Version='5.0.1')</id>
    <title type="text">Serilog.Sinks.Console</title>
    <summary type="text"></summary>
    <updated>2023-12-01T00:00:00Z</updated>
    <author><name>Serilog Contributors</name></author>
    <content type="application/zip" src="https://www.nuget.org/api/v2/package/Serilog.Sinks.Console/5.0.1" />
    <m:properties>
      <d:Id>Serilog.Sinks.Console</d:Id>
      <d:Version>5.0.1</d:Version>
      <d:Dependencies>Serilog:[3.1.1, ):net462|Serilog:[3.1.1, ):net471|::netstandard2.0|System.Console:4.3.0:netstandard2.0</d:Dependencies>
      <d:Description>A Serilog sink that writes log events to the console.
Second line.</d:Description>
      <d:IsLatestVersion m:type="Edm.Boolean">true</d:IsLatestVersion>
      <d:PackageHash>2jaz+Kq0Mzwpv9TNgS06f4Qq4zzXLnJ9JG0g3MTVtrD8RYbY+V3X7dYrAhxMGfD4lVIdzKZBFJNbUl9jv1N7/g==</d:PackageHash>
      <d:PackageHashAlgorithm>SHA512</d:PackageHashAlgorithm>
      <d:PackageSize m:type="Edm.Int64">43781</d:PackageSize>
      <d:ProjectUrl>https://github.com/serilog/serilog-sinks-console</d:ProjectUrl>
    </m:properties>
  </entry>
  <link rel="next" href="https://www.nuget.org/api/v2/FindPackagesById?id='Serilog.Sinks.Console'&amp;$skiptoken='x'" />
</feed>"#;

    fn parser() -> NugetFeedParser {
        NugetFeedParser::new(FeedContext::new("nuget", 0, "https://www.nuget.org/api/v2"))
    }

    #[test]
    fn test_single_entry_exact_fields() {
        let records = parser().parse(FEED.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.name, "Serilog.Sinks.Console");
        assert_eq!(rec.version, "5.0.1");
        assert_eq!(rec.architecture, "neutral");
        assert_eq!(rec.size, Some(43781));
        assert_eq!(
            rec.locator,
            "https://www.nuget.org/api/v2/package/Serilog.Sinks.Console/5.0.1"
        );
        let checksum = rec.checksum.as_ref().unwrap();
        assert_eq!(checksum.algorithm, HashAlgorithm::Sha512);
        assert_eq!(checksum.encoding, DigestEncoding::Base64);
        assert!(checksum.value.starts_with("2jaz+Kq0"));
        assert_eq!(
            rec.depends,
            vec!["Serilog ([3.1.1, ))", "System.Console (4.3.0)"]
        );
        assert_eq!(
            rec.description.as_deref(),
            Some("A Serilog sink that writes log events to the console.")
        );
        assert_eq!(rec.extra.get("is_latest").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_next_page_link() {
        let next = next_page(FEED.as_bytes()).unwrap().unwrap();
        assert!(next.contains("$skiptoken"));
        assert!(next.contains("&$skiptoken"));
        let single = r#"<feed><link rel="self" href="x"/></feed>"#;
        assert_eq!(next_page(single.as_bytes()).unwrap(), None);
    }

    #[test]
    fn test_title_fallback_for_id() {
        let feed = r#"<feed><entry><title>choco-pkg</title>
            <content src="https://community.chocolatey.org/api/v2/package/choco-pkg/1.0"/>
            <m:properties xmlns:m="m" xmlns:d="d"><d:Version>1.0</d:Version></m:properties>
            </entry></feed>"#;
        let rec = &parser().parse(feed.as_bytes()).unwrap()[0];
        assert_eq!(rec.name, "choco-pkg");
        assert!(rec.checksum.is_none());
        assert!(rec.depends.is_empty());
    }

    #[test]
    fn test_entry_without_content_is_format_error() {
        let feed = r#"<feed><entry><m:properties xmlns:m="m" xmlns:d="d"><d:Id>a</d:Id><d:Version>1</d:Version></m:properties></entry></feed>"#;
        assert!(matches!(parser().parse(feed.as_bytes()), Err(Error::Format(_))));
    }

    #[test]
    fn test_parse_dependencies() {
        assert_eq!(parse_dependencies("::net45"), Vec::<String>::new());
        assert_eq!(
            parse_dependencies("A:1.0|a:2.0|B::net8.0"),
            vec!["A (1.0)", "B"]
        );
    }
}
