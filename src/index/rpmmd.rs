// src/index/rpmmd.rs

//! RPM repodata parser (`repomd.xml` + `primary.xml`)
//!
//! `repomd.xml` points at the primary metadata file; `primary.xml` is
//! streamed element by element, never materialized as a tree.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::debug;

use super::{FeedContext, IndexParser, join_url, sniff_decompress, xml_attr};
use crate::ecosystem::Ecosystem;
use crate::error::{Error, Result};
use crate::hash::{Checksum, HashAlgorithm};
use crate::record::PackageRecord;

/// One `<data>` entry of `repomd.xml`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepomdEntry {
    /// `primary`, `filelists`, `other`, ...
    pub data_type: String,
    /// Location relative to the repository root
    pub href: String,
    /// Checksum of the file as stored (compressed)
    pub checksum: Option<Checksum>,
}

/// Parse `repomd.xml` into its data entries
pub fn parse_repomd(xml: &[u8]) -> Result<Vec<RepomdEntry>> {
    let mut reader = Reader::from_reader(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut entries = Vec::new();
    let mut current: Option<RepomdEntry> = None;
    let mut checksum_type: Option<HashAlgorithm> = None;
    let mut in_checksum = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"data" => {
                current = Some(RepomdEntry {
                    data_type: xml_attr(&e, b"type")?.unwrap_or_default(),
                    href: String::new(),
                    checksum: None,
                });
            }
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"location" => {
                if let (Some(entry), Some(href)) = (current.as_mut(), xml_attr(&e, b"href")?) {
                    entry.href = href;
                }
            }
            Event::Start(e) if e.local_name().as_ref() == b"checksum" => {
                in_checksum = current.is_some();
                checksum_type = xml_attr(&e, b"type")?.and_then(|t| t.parse().ok());
            }
            Event::Text(t) if in_checksum => {
                if let (Some(entry), Some(algorithm)) = (current.as_mut(), checksum_type) {
                    entry.checksum = Some(Checksum::hex(algorithm, t.unescape()?.trim()));
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"checksum" => in_checksum = false,
            Event::End(e) if e.local_name().as_ref() == b"data" => {
                if let Some(entry) = current.take() {
                    entries.push(entry);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

/// Location of the primary metadata
pub fn primary_location(repomd: &[u8]) -> Result<RepomdEntry> {
    parse_repomd(repomd)?
        .into_iter()
        .find(|entry| entry.data_type == "primary" && !entry.href.is_empty())
        .ok_or_else(|| Error::Format("repomd.xml has no primary data entry".to_string()))
}

/// Which text node is being collected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextField {
    Name,
    Arch,
    Checksum,
    Summary,
    File,
    SourceRpm,
}

/// Which relation list `<rpm:entry>` elements belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Provides,
    Requires,
    Ignored,
}

/// Fields of the `<package>` being read
#[derive(Debug, Default)]
struct PackageBuilder {
    name: Option<String>,
    arch: Option<String>,
    epoch: Option<u32>,
    version: Option<String>,
    release: Option<String>,
    checksum_type: Option<HashAlgorithm>,
    checksum: Option<String>,
    summary: Option<String>,
    size: Option<u64>,
    href: Option<String>,
    base: Option<String>,
    provides: Vec<String>,
    requires: Vec<String>,
    files: Vec<String>,
    sourcerpm: Option<String>,
}

/// Render an `<rpm:entry>` as a dependency token
fn relation_token(e: &BytesStart<'_>) -> Result<Option<String>> {
    let Some(name) = xml_attr(e, b"name")? else {
        return Ok(None);
    };
    let op = match xml_attr(e, b"flags")?.as_deref() {
        Some("EQ") => "=",
        Some("LT") => "<",
        Some("LE") => "<=",
        Some("GT") => ">",
        Some("GE") => ">=",
        _ => return Ok(Some(name)),
    };
    let mut version = String::new();
    if let Some(epoch) = xml_attr(e, b"epoch")?.filter(|e| e != "0") {
        version.push_str(&epoch);
        version.push(':');
    }
    version.push_str(&xml_attr(e, b"ver")?.unwrap_or_default());
    if let Some(rel) = xml_attr(e, b"rel")? {
        version.push('-');
        version.push_str(&rel);
    }
    Ok(Some(format!("{name} {op} {version}")))
}

pub struct RpmPrimaryParser {
    context: FeedContext,
}

impl RpmPrimaryParser {
    /// `context.base_url` is the repository root `location@href` is relative to
    pub fn new(context: FeedContext) -> Self {
        Self { context }
    }

    fn finish(&self, pkg: PackageBuilder) -> Result<PackageRecord> {
        let name = pkg
            .name
            .ok_or_else(|| Error::Format("primary.xml package without <name>".to_string()))?;
        let version = pkg.version.ok_or_else(|| {
            Error::Format(format!("primary.xml package '{name}' has no version@ver"))
        })?;
        let href = pkg.href.ok_or_else(|| {
            Error::Format(format!("primary.xml package '{name}' has no location@href"))
        })?;
        let locator = match &pkg.base {
            Some(base) => join_url(base, &href),
            None => self.context.locator(&href),
        };

        let mut record = PackageRecord::new(Ecosystem::Rpm, name, version, locator);
        self.context.stamp(&mut record);
        record.epoch = pkg.epoch.filter(|e| *e != 0);
        record.release = pkg.release;
        record.architecture = pkg.arch.unwrap_or_else(|| "noarch".to_string());
        record.size = pkg.size;
        record.checksum = match (pkg.checksum_type, pkg.checksum) {
            (Some(algorithm), Some(value)) => Some(Checksum::hex(algorithm, value)),
            _ => None,
        };
        record.description = pkg.summary;
        record.depends = pkg.requires;
        record.provides = pkg.provides;
        record.provides.extend(pkg.files);
        if let Some(srpm) = pkg.sourcerpm {
            record.extra.insert("sourcerpm".to_string(), srpm);
        }
        Ok(record)
    }
}

impl IndexParser for RpmPrimaryParser {
    fn parse(&self, feed: &[u8]) -> Result<Vec<PackageRecord>> {
        let data = sniff_decompress(feed)?;
        let mut reader = Reader::from_reader(data.as_ref());
        reader.trim_text(true);
        let mut buf = Vec::new();

        let mut records = Vec::new();
        let mut current: Option<PackageBuilder> = None;
        let mut text_field: Option<TextField> = None;
        let mut relation = Relation::Ignored;

        loop {
            let event = reader.read_event_into(&mut buf).map_err(|e| {
                Error::Format(format!(
                    "primary.xml error at byte {}: {e}",
                    reader.buffer_position()
                ))
            })?;
            let opens_text = matches!(event, Event::Start(_));
            match event {
                Event::Start(e) if e.local_name().as_ref() == b"package" => {
                    current = Some(PackageBuilder::default());
                }
                Event::End(e) if e.local_name().as_ref() == b"package" => {
                    if let Some(pkg) = current.take() {
                        records.push(self.finish(pkg)?);
                    }
                }
                Event::Start(e) | Event::Empty(e) => {
                    if let Some(pkg) = current.as_mut() {
                        let text = |field| if opens_text { Some(field) } else { None };
                        match e.local_name().as_ref() {
                            b"name" => text_field = text(TextField::Name),
                            b"arch" => text_field = text(TextField::Arch),
                            b"summary" => text_field = text(TextField::Summary),
                            b"file" => text_field = text(TextField::File),
                            b"sourcerpm" => text_field = text(TextField::SourceRpm),
                            b"checksum" => {
                                pkg.checksum_type =
                                    xml_attr(&e, b"type")?.and_then(|t| t.parse().ok());
                                text_field = text(TextField::Checksum);
                            }
                            b"version" => {
                                pkg.epoch = xml_attr(&e, b"epoch")?.and_then(|v| v.parse().ok());
                                pkg.version = xml_attr(&e, b"ver")?;
                                pkg.release = xml_attr(&e, b"rel")?;
                            }
                            b"size" => {
                                pkg.size = xml_attr(&e, b"package")?.and_then(|v| v.parse().ok());
                            }
                            b"location" => {
                                pkg.href = xml_attr(&e, b"href")?;
                                pkg.base = xml_attr(&e, b"base")?;
                            }
                            b"provides" => relation = Relation::Provides,
                            b"requires" => relation = Relation::Requires,
                            b"conflicts" | b"obsoletes" | b"suggests" | b"recommends"
                            | b"supplements" | b"enhances" => relation = Relation::Ignored,
                            b"entry" => {
                                if let Some(token) = relation_token(&e)? {
                                    match relation {
                                        Relation::Provides => pkg.provides.push(token),
                                        Relation::Requires => pkg.requires.push(token),
                                        Relation::Ignored => {}
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                }
                Event::Text(t) => {
                    if let (Some(pkg), Some(field)) = (current.as_mut(), text_field) {
                        let value = t.unescape()?.trim().to_string();
                        match field {
                            TextField::Name => pkg.name = Some(value),
                            TextField::Arch => pkg.arch = Some(value),
                            TextField::Checksum => pkg.checksum = Some(value),
                            TextField::Summary => pkg.summary = Some(value),
                            TextField::File => pkg.files.push(value),
                            TextField::SourceRpm => pkg.sourcerpm = Some(value),
                        }
                    }
                }
                Event::End(e) => {
                    match e.local_name().as_ref() {
                        b"provides" | b"requires" | b"conflicts" | b"obsoletes"
                        | b"suggests" | b"recommends" | b"supplements" | b"enhances" => {
                            relation = Relation::Ignored
                        }
                        _ => {}
                    }
                    text_field = None;
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        debug!(
            "Parsed {} RPM records from {}",
            records.len(), self.context.origin
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPOMD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<repomd xmlns="http://linux.duke.edu/metadata/repo" xmlns:rpm="http://linux.duke.edu/metadata/rpm">
  <revision>1712345678</revision>
  <data type="primary">
    <checksum type="sha256">aa11bb22cc33dd44ee55ff6600112233445566778899aabbccddeeff00112233</checksum>
    <open-checksum type="sha256">ffeeddccbbaa99887766554433221100ffeeddccbbaa99887766554433221100</open-checksum>
    <location href="repodata/aa11-primary.xml.gz"/>
    <size>4096</size>
  </data>
  <data type="filelists">
    <checksum type="sha256">0000000000000000000000000000000000000000000000000000000000000000</checksum>
    <location href="repodata/00-filelists.xml.gz"/>
  </data>
</repomd>"#;

    const PRIMARY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="1">
<package type="rpm">
  <name>bash</name>
  <arch>x86_64</arch>
  <version epoch="0" ver="5.2.26" rel="3.fc40"/>
  <checksum type="sha256" pkgid="YES">4b2f3c1d0e9f8a7b6c5d4e3f2a1b0c9d8e7f6a5b4c3d2e1f0a9b8c7d6e5f4a3b</checksum>
  <summary>The GNU Bourne Again shell</summary>
  <description>The GNU Bourne Again shell (Bash) is a shell.</description>
  <packager>Fedora Project</packager>
  <url>https://www.gnu.org/software/bash</url>
  <time file="1712345678" build="1712345600"/>
  <size package="1874321" installed="8388608" archive="8400000"/>
  <location href="Packages/b/bash-5.2.26-3.fc40.x86_64.rpm"/>
  <format>
    <rpm:license>GPL-3.0-or-later</rpm:license>
    <rpm:sourcerpm>bash-5.2.26-3.fc40.src.rpm</rpm:sourcerpm>
    <rpm:provides>
      <rpm:entry name="bash" flags="EQ" epoch="0" ver="5.2.26" rel="3.fc40"/>
      <rpm:entry name="config(bash)" flags="EQ" epoch="0" ver="5.2.26" rel="3.fc40"/>
    </rpm:provides>
    <rpm:requires>
      <rpm:entry name="filesystem" flags="GE" epoch="0" ver="3"/>
      <rpm:entry name="libc.so.6(GLIBC_2.34)(64bit)"/>
      <rpm:entry name="rpmlib(CompressedFileNames)" flags="LE" epoch="0" ver="3.0.4" rel="1"/>
    </rpm:requires>
    <rpm:conflicts>
      <rpm:entry name="filesystem" flags="LT" epoch="0" ver="3"/>
    </rpm:conflicts>
    <file>/usr/bin/bash</file>
    <file type="dir">/etc/skel</file>
  </format>
</package>
</metadata>"#;

    fn parser() -> RpmPrimaryParser {
        RpmPrimaryParser::new(FeedContext::new(
            "fedora",
            1,
            "https://dl.fedoraproject.org/pub/fedora/linux/releases/40/Everything/x86_64/os",
        ))
    }

    #[test]
    fn test_repomd_primary_location() {
        let primary = primary_location(REPOMD.as_bytes()).unwrap();
        assert_eq!(primary.href, "repodata/aa11-primary.xml.gz");
        let checksum = primary.checksum.unwrap();
        assert_eq!(checksum.algorithm, HashAlgorithm::Sha256);
        assert!(checksum.value.starts_with("aa11bb22"));
        assert_eq!(parse_repomd(REPOMD.as_bytes()).unwrap().len(), 2);
    }

    #[test]
    fn test_repomd_without_primary() {
        let xml = r#"<repomd><data type="other"><location href="x"/></data></repomd>"#;
        assert!(matches!(primary_location(xml.as_bytes()), Err(Error::Format(_))));
    }

    #[test]
    fn test_single_package_exact_fields() {
        let records = parser().parse(PRIMARY.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.name, "bash");
        assert_eq!(rec.version, "5.2.26");
        assert_eq!(rec.release.as_deref(), Some("3.fc40"));
        assert_eq!(rec.epoch, None);
        assert_eq!(rec.full_version(), "5.2.26-3.fc40");
        assert_eq!(rec.architecture, "x86_64");
        assert_eq!(rec.size, Some(1874321));
        assert_eq!(
            rec.locator,
            "https://dl.fedoraproject.org/pub/fedora/linux/releases/40/Everything/x86_64/os/Packages/b/bash-5.2.26-3.fc40.x86_64.rpm"
        );
        let checksum = rec.checksum.as_ref().unwrap();
        assert_eq!(checksum.algorithm, HashAlgorithm::Sha256);
        assert!(checksum.value.starts_with("4b2f3c1d"));
        assert_eq!(
            rec.depends,
            vec![
                "filesystem >= 3",
                "libc.so.6(GLIBC_2.34)(64bit)",
                "rpmlib(CompressedFileNames) <= 3.0.4-1"
            ]
        );
        assert_eq!(
            rec.provides,
            vec![
                "bash = 5.2.26-3.fc40",
                "config(bash) = 5.2.26-3.fc40",
                "/usr/bin/bash",
                "/etc/skel"
            ]
        );
        assert_eq!(
            rec.description.as_deref(),
            Some("The GNU Bourne Again shell")
        );
        assert_eq!(
            rec.extra.get("sourcerpm").map(String::as_str),
            Some("bash-5.2.26-3.fc40.src.rpm")
        );
    }

    #[test]
    fn test_xml_base_location() {
        let xml = r#"<metadata><package type="rpm"><name>a</name><arch>noarch</arch>
            <version epoch="1" ver="2" rel="3"/>
            <location xml:base="https://mirror.example/" href="a.rpm"/></package></metadata>"#;
        let rec = &parser().parse(xml.as_bytes()).unwrap()[0];
        assert_eq!(rec.locator, "https://mirror.example/a.rpm");
        assert_eq!(rec.epoch, Some(1));
    }

    #[test]
    fn test_missing_location_is_format_error() {
        let xml = r#"<metadata><package type="rpm"><name>a</name><version ver="1"/></package></metadata>"#;
        assert!(matches!(parser().parse(xml.as_bytes()), Err(Error::Format(_))));
    }

    #[test]
    fn test_malformed_xml() {
        let xml = "<metadata><package><name>a</nam></package>";
        assert!(matches!(parser().parse(xml.as_bytes()), Err(Error::Format(_))));
    }
}
