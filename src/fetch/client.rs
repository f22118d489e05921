// src/fetch/client.rs

//! Transports for feeds and artifacts
//!
//! [`RepositoryClient`] wraps a blocking reqwest client with retry support
//! and also serves `file://` URLs and bare filesystem paths, which is how
//! local mirrors and tests reach it.

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::compression::decompress_auto;
use crate::config::{DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_MAX_RETRIES, EngineConfig};
use crate::error::{Error, Result};

/// Retry delay in milliseconds, multiplied by the attempt number
pub const RETRY_DELAY_MS: u64 = 1000;

/// A streaming response body
pub struct Body {
    pub reader: Box<dyn Read + Send>,
    /// Declared length, when the transport knows it
    pub length: Option<u64>,
}

impl Body {
    pub fn new(reader: impl Read + Send + 'static, length: Option<u64>) -> Self {
        Self {
            reader: Box::new(reader),
            length,
        }
    }
}

/// Something that can open a locator for reading
///
/// A single call is one attempt; retrying is the caller's job.
pub trait Transport: Send + Sync {
    fn open(&self, locator: &str) -> Result<Body>;
}

/// Where a locator points
enum Location {
    Remote(String),
    Local(PathBuf),
}

fn classify(locator: &str) -> Result<Location> {
    if locator.starts_with("http://") || locator.starts_with("https://") {
        return Ok(Location::Remote(locator.to_string()));
    }
    if locator.starts_with("file://") {
        let url = url::Url::parse(locator)
            .map_err(|e| Error::InvalidPath(format!("{locator}: {e}")))?;
        let path = url
            .to_file_path()
            .map_err(|()| Error::InvalidPath(format!("{locator} is not a local path")))?;
        return Ok(Location::Local(path));
    }
    if locator.contains("://") {
        return Err(Error::Config(format!("unsupported URL scheme in {locator}")));
    }
    Ok(Location::Local(PathBuf::from(locator)))
}

/// Map a non-success HTTP status to an error
fn status_error(status: StatusCode, url: &str) -> Error {
    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        Error::NotFound(format!("HTTP {status} from {url}"))
    } else {
        Error::Network(format!("HTTP {status} from {url}"))
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out
///
/// Only transient errors are retried, with linear back-off. `cancel` is
/// checked before every attempt and wakes the back-off early.
pub fn with_retries<T>(
    max_retries: u32,
    delay: Duration,
    what: &str,
    cancel: &CancelSignal,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempt = 0;
    loop {
        cancel.check(what)?;
        attempt += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_retries.max(1) => {
                warn!("{} attempt {} failed: {}, retrying...", what, attempt, e);
                cancel.sleep(delay * attempt, what)?;
            }
            Err(e) if e.is_transient() && attempt > 1 => {
                return Err(Error::Network(format!("{what} failed after {attempt} attempts: {e}")));
            }
            Err(e) => return Err(e),
        }
    }
}

/// HTTP client wrapper with retry support
#[derive(Clone)]
pub struct RepositoryClient {
    client: Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl RepositoryClient {
    /// Client with default timeout and retry count
    pub fn new() -> Result<Self> {
        Self::with_settings(
            Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            DEFAULT_MAX_RETRIES,
            &[],
        )
    }

    /// Client honoring the engine's timeout and retry count
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::with_settings(config.http_timeout(), config.max_retries, &[])
    }

    /// Client sending `headers` with every request
    pub fn with_settings(
        timeout: Duration,
        max_retries: u32,
        headers: &[(&str, &str)],
    ) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Config(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("invalid header value for {name}: {e}")))?;
            default_headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pkgbridge/", env!("CARGO_PKG_VERSION")))
            .default_headers(default_headers)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Fetch a whole body into memory, retrying transient failures
    pub fn fetch_bytes(&self, locator: &str, cancel: &CancelSignal) -> Result<Vec<u8>> {
        debug!("Fetching {}", locator);
        with_retries(self.max_retries, self.retry_delay, "Fetch", cancel, || {
            let mut body = self.open(locator)?;
            let mut bytes = Vec::with_capacity(body.length.unwrap_or(0) as usize);
            body.reader
                .read_to_end(&mut bytes)
                .map_err(|e| Error::Network(format!("Failed to read {locator}: {e}")))?;
            Ok(bytes)
        })
    }

    /// Fetch and decompress data, detecting the format from magic bytes
    pub fn fetch_and_decompress(&self, locator: &str, cancel: &CancelSignal) -> Result<Vec<u8>> {
        let bytes = self.fetch_bytes(locator, cancel)?;
        let decompressed = decompress_auto(&bytes).map_err(|e| {
            Error::Format(format!("Failed to decompress data from {locator}: {e}"))
        })?;
        debug!(
            "Decompressed {} bytes -> {} bytes",
            bytes.len(), decompressed.len()
        );
        Ok(decompressed)
    }

    /// Fetch a body as UTF-8 text
    pub fn fetch_string(&self, locator: &str, cancel: &CancelSignal) -> Result<String> {
        let bytes = self.fetch_bytes(locator, cancel)?;
        String::from_utf8(bytes)
            .map_err(|e| Error::Format(format!("Invalid UTF-8 in response from {locator}: {e}")))
    }

    fn open_remote(&self, url: &str) -> Result<Body> {
        info!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::Network(format!("Failed to fetch {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), url));
        }
        let length = response.content_length();
        Ok(Body::new(response, length))
    }
}

fn open_local(path: PathBuf) -> Result<Body> {
    debug!("Opening local {}", path.display());
    let file = File::open(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
        _ => Error::Io(e),
    })?;
    let length = file.metadata().ok().map(|m| m.len());
    Ok(Body::new(file, length))
}

impl Transport for RepositoryClient {
    fn open(&self, locator: &str) -> Result<Body> {
        match classify(locator)? {
            Location::Remote(url) => self.open_remote(&url),
            Location::Local(path) => open_local(path),
        }
    }
}

/// Filesystem-only transport for `file://` URLs and bare paths
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn open(&self, locator: &str) -> Result<Body> {
        match classify(locator)? {
            Location::Local(path) => open_local(path),
            Location::Remote(url) => Err(Error::Config(format!("{url} needs a network transport"))),
        }
    }
}
