// src/index/cache.rs

//! TTL cache for parsed index snapshots
//!
//! Each adapter owns one [`IndexCache`]. Readers take a shared lock and get
//! the current snapshot while it is fresh. When it has expired, one caller
//! takes the refresh lock, re-checks freshness (another caller may have won
//! the race) and rebuilds. A failed rebuild keeps serving the previous
//! snapshot, if there is one.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

struct CachedValue<T> {
    value: Arc<T>,
    fetched_at: DateTime<Utc>,
    loaded: Instant,
}

/// Single-value cache with expiry and a refresh lock
pub struct IndexCache<T> {
    label: String,
    ttl: Duration,
    current: RwLock<Option<CachedValue<T>>>,
    refresh_lock: Mutex<()>,
}

impl<T> IndexCache<T> {
    /// `label` names the cached feed in log messages
    pub fn new(label: impl Into<String>, ttl: Duration) -> Self {
        Self {
            label: label.into(),
            ttl,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn fresh(&self) -> Option<Arc<T>> {
        let guard = self.current.read();
        guard
            .as_ref()
            .filter(|cached| cached.loaded.elapsed() < self.ttl)
            .map(|cached| Arc::clone(&cached.value))
    }

    /// Current value, fresh or stale
    pub fn peek(&self) -> Option<Arc<T>> {
        self.current
            .read()
            .as_ref()
            .map(|cached| Arc::clone(&cached.value))
    }

    /// When the current value was built
    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.current.read().as_ref().map(|cached| cached.fetched_at)
    }

    pub fn is_fresh(&self) -> bool {
        self.fresh().is_some()
    }

    /// Drop the current value so the next access rebuilds
    pub fn invalidate(&self) {
        *self.current.write() = None;
    }

    /// Return the fresh value, rebuilding it with `refresh` if expired
    ///
    /// Concurrent callers trigger a single rebuild. If the rebuild fails and
    /// a stale value exists, the stale value is returned and a warning logged.
    /// Cancellation is always returned as an error.
    pub fn get_or_refresh<F>(&self, refresh: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some(value) = self.fresh() {
            return Ok(value);
        }

        let _refresh = self.refresh_lock.lock();
        if let Some(value) = self.fresh() {
            debug!("{} index was refreshed by another caller", self.label);
            return Ok(value);
        }

        match self.rebuild(refresh) {
            Ok(value) => Ok(value),
            Err(e @ Error::Cancelled(_)) => Err(e),
            Err(e) => match self.peek() {
                Some(stale) => {
                    warn!(
                        "Refreshing {} index failed, serving stale snapshot: {}",
                        self.label, e
                    );
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    /// Rebuild unconditionally
    ///
    /// On failure the previous value stays in place and the error is returned.
    pub fn force_refresh<F>(&self, refresh: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        let _refresh = self.refresh_lock.lock();
        self.rebuild(refresh).inspect_err(|e| {
            if self.peek().is_some() {
                warn!(
                    "Refreshing {} index failed, keeping previous snapshot: {}",
                    self.label, e
                );
            }
        })
    }

    fn rebuild<F>(&self, refresh: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        let started = Instant::now();
        let value = Arc::new(refresh()?);
        *self.current.write() = Some(CachedValue {
            value: Arc::clone(&value),
            fetched_at: Utc::now(),
            loaded: Instant::now(),
        });
        info!("Rebuilt {} index in {:.2?}", self.label, started.elapsed());
        Ok(value)
    }
}
