use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::cache::QueryCache;
use crate::classify::ErrorClassifier;
use crate::credentials::{check_credential, check_url};
use crate::error::{ClassifiedError, ConfigError, ErrorKind};
use crate::fallback::FallbackStore;
use crate::handle::TableHandle;
use crate::remote::{DataSource, RemoteSource};
use crate::retry::{RetryExecutor, RetryOptions};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend base URL, e.g. `https://xyz.supabase.co`.
    pub url: Option<String>,
    /// Public (anon or publishable) key.
    pub anon_key: Option<String>,
    pub retry: RetryOptions,
    /// Skip the backend and answer everything from the fallback store.
    pub prefer_fallback: bool,
    /// Zero disables the read cache.
    pub cache_ttl: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: None,
            anon_key: None,
            retry: RetryOptions::default(),
            prefer_fallback: false,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn remote(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            anon_key: Some(anon_key.into()),
            ..Self::default()
        }
    }
}

// --- Status ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Served {
    Remote,
    Fallback,
    Cache,
}

impl Served {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Served::Remote => "remote",
            Served::Fallback => "fallback",
            Served::Cache => "cache",
        }
    }
}

/// Why the most recent call fell back to the local store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Degradation {
    pub table: String,
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: u32,
    pub at: String,
}

/// Snapshot of which path has been serving calls. Diagnostic only: query
/// results never carry this.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStatus {
    pub remote_configured: bool,
    pub prefer_fallback: bool,
    pub remote_served: u64,
    pub fallback_served: u64,
    pub cache_hits: u64,
    pub failed: u64,
    pub last_degradation: Option<Degradation>,
}

impl SourceStatus {
    /// Whether calls are currently being answered locally.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.remote_configured || self.prefer_fallback || self.last_degradation.is_some()
    }
}

#[derive(Default)]
pub(crate) struct StatusCounters {
    remote: AtomicU64,
    fallback: AtomicU64,
    cache: AtomicU64,
    failed: AtomicU64,
    last_degradation: Mutex<Option<Degradation>>,
}

impl StatusCounters {
    pub(crate) fn served(&self, served: Served) {
        let counter = match served {
            Served::Remote => {
                *self.last_degradation.lock() = None;
                &self.remote
            }
            Served::Fallback => &self.fallback,
            Served::Cache => &self.cache,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn degraded(&self, err: &ClassifiedError) {
        *self.last_degradation.lock() = Some(Degradation {
            table: err.table.clone(),
            kind: err.kind,
            message: err.message.clone(),
            attempts: err.attempts,
            at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        });
    }
}

// --- Client ---

pub(crate) struct Inner {
    pub(crate) remote: Option<Arc<dyn DataSource>>,
    pub(crate) fallback: FallbackStore,
    pub(crate) executor: RetryExecutor,
    pub(crate) cache: QueryCache,
    pub(crate) prefer_fallback: bool,
    pub(crate) status: StatusCounters,
}

/// Entry point for all table access. Cheap to clone; clones share the
/// fallback store, cache and status counters.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Validates the configuration and builds a client. A bad URL, a missing
    /// or privileged credential, or inconsistent retry options are rejected
    /// here rather than on the first query.
    ///
    /// With `prefer_fallback` set and the URL or key left out, the client is
    /// built without a backend. A key that is given is still checked.
    pub fn new(config: ClientConfig) -> Result<Self, ConfigError> {
        config.retry.validate()?;

        if config.prefer_fallback && (config.url.is_none() || config.anon_key.is_none()) {
            if let Some(key) = config.anon_key.as_deref() {
                check_credential(key)?;
            }
            return Ok(Self::build(&config, None));
        }

        let url = check_url(config.url.as_deref().unwrap_or_default())?;
        let key = config.anon_key.as_deref().unwrap_or_default();
        let kind = check_credential(key)?;
        let remote = RemoteSource::new(&url, key.trim())?;
        info!(url = %remote.rest_url(), credential = ?kind, prefer_fallback = config.prefer_fallback, "client configured");

        Ok(Self::build(&config, Some(Arc::new(remote))))
    }

    /// Builds a client over any [`DataSource`] in place of the HTTP backend.
    pub fn with_source(config: ClientConfig, source: Arc<dyn DataSource>) -> Result<Self, ConfigError> {
        config.retry.validate()?;
        Ok(Self::build(&config, Some(source)))
    }

    /// A client that only ever answers from the fallback store.
    #[must_use]
    pub fn offline() -> Self {
        Self::build(
            &ClientConfig {
                prefer_fallback: true,
                ..ClientConfig::default()
            },
            None,
        )
    }

    fn build(config: &ClientConfig, remote: Option<Arc<dyn DataSource>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                remote,
                fallback: FallbackStore::seeded(),
                executor: RetryExecutor::new(config.retry.clone(), ErrorClassifier::default()),
                cache: QueryCache::new(config.cache_ttl),
                prefer_fallback: config.prefer_fallback,
                status: StatusCounters::default(),
            }),
        }
    }

    /// Starts a query on `table`. An unknown table name is reported as a
    /// `Validation` error when the handle executes, without any I/O.
    pub fn from(&self, table: &str) -> TableHandle {
        TableHandle::new(Arc::clone(&self.inner), table)
    }

    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.inner.remote.is_none() || self.inner.prefer_fallback
    }

    #[must_use]
    pub fn retry_options(&self) -> &RetryOptions {
        self.inner.executor.options()
    }

    #[must_use]
    pub fn status(&self) -> SourceStatus {
        let counters = &self.inner.status;
        SourceStatus {
            remote_configured: self.inner.remote.is_some(),
            prefer_fallback: self.inner.prefer_fallback,
            remote_served: counters.remote.load(Ordering::Relaxed),
            fallback_served: counters.fallback.load(Ordering::Relaxed),
            cache_hits: counters.cache.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            last_degradation: counters.last_degradation.lock().clone(),
        }
    }

    /// Drops cached reads for `table`.
    pub fn invalidate(&self, table: &str) {
        self.inner.cache.invalidate(table);
    }

    /// Drops every cached read and restores the fallback seed dataset.
    pub fn reset_local_state(&self) {
        self.inner.cache.clear();
        self.inner.fallback.reset();
    }
}
