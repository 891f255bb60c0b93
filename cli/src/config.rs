use std::time::Duration;

use anyhow::{Result, bail};
use clap::Args;

use larder_core::{ClientConfig, RetryOptions};

/// Backend and retry settings. Every flag can also come from the
/// environment.
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Backend base URL
    #[arg(long, env = "LARDER_URL", global = true)]
    pub url: Option<String>,

    /// Public (anon or publishable) backend key
    #[arg(long, env = "LARDER_ANON_KEY", global = true, hide_env_values = true)]
    pub anon_key: Option<String>,

    /// Retries after the first attempt of each call
    #[arg(long, env = "LARDER_MAX_RETRIES", default_value = "3", global = true)]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds (doubles each retry)
    #[arg(long, env = "LARDER_RETRY_DELAY_MS", default_value = "200", global = true)]
    pub retry_delay_ms: u64,

    /// Per-attempt timeout in milliseconds
    #[arg(
        long,
        env = "LARDER_REQUEST_TIMEOUT_MS",
        default_value = "15000",
        global = true
    )]
    pub request_timeout_ms: u64,

    /// Skip the backend and use the built-in offline dataset
    #[arg(
        long = "offline",
        alias = "prefer-fallback",
        env = "LARDER_PREFER_FALLBACK",
        global = true
    )]
    pub prefer_fallback: bool,

    /// Seconds to keep read results cached (0 disables)
    #[arg(long, env = "LARDER_CACHE_TTL_SECS", default_value = "30", global = true)]
    pub cache_ttl_secs: u64,
}

impl Config {
    /// Turns the settings into a client configuration. Missing backend
    /// settings are only accepted when running offline.
    pub fn client_config(&self) -> Result<ClientConfig> {
        let url = non_empty(self.url.as_deref());
        let anon_key = non_empty(self.anon_key.as_deref());

        if !self.prefer_fallback {
            if url.is_none() {
                bail!("No backend URL configured. Set LARDER_URL or pass --offline");
            }
            if anon_key.is_none() {
                bail!("No backend key configured. Set LARDER_ANON_KEY or pass --offline");
            }
        }
        if self.request_timeout_ms == 0 {
            bail!("Request timeout must be greater than 0");
        }

        Ok(ClientConfig {
            url,
            anon_key,
            retry: RetryOptions {
                timeout: Duration::from_millis(self.request_timeout_ms),
                max_retries: self.max_retries,
                base_delay: Duration::from_millis(self.retry_delay_ms),
                ..RetryOptions::default()
            },
            prefer_fallback: self.prefer_fallback,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
