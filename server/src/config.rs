//! Server configuration.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ratewire_common::{Currency, RatewireError, Result};
use ratewire_rates::{
    DriftingRateProvider, HttpRateProvider, RateProvider, RateQuotes, RefresherConfig,
    StaticRateProvider,
};

/// Which upstream rate provider to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Reference rates with a random walk applied every refresh.
    Drift,
    /// Fixed reference rates.
    Static,
    /// JSON reference rates fetched over HTTP.
    Http,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drift" => Ok(ProviderKind::Drift),
            "static" => Ok(ProviderKind::Static),
            "http" => Ok(ProviderKind::Http),
            other => Err(format!("Unknown provider kind: {}", other)),
        }
    }
}

/// Upstream provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Provider implementation.
    pub kind: ProviderKind,
    /// Endpoint for the HTTP provider.
    pub url: Option<String>,
    /// Largest relative move per refresh for the drift provider.
    pub max_drift: f64,
    /// Upper bound on one fetch.
    pub fetch_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Drift,
            url: None,
            max_drift: 0.05,
            fetch_timeout: Duration::from_secs(3),
        }
    }
}

/// Main server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address.
    pub listen_addr: String,
    /// Listen port.
    pub listen_port: u16,
    /// Pivot currency tables are expressed against.
    pub pivot: Currency,
    /// Time between rate refreshes.
    pub refresh_interval: Duration,
    /// Smallest relative rate move that triggers a broadcast.
    pub min_change_ratio: f64,
    /// Outbound frames buffered per connection before updates are dropped.
    pub subscriber_buffer: usize,
    /// How long shutdown waits for connections to drain.
    pub shutdown_grace: Duration,
    /// Upstream provider.
    pub provider: ProviderConfig,
    /// Log level.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 9092,
            pivot: Currency::Eur,
            refresh_interval: Duration::from_secs(5),
            min_change_ratio: 0.0,
            subscriber_buffer: 64,
            shutdown_grace: Duration::from_secs(5),
            provider: ProviderConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables keep their defaults; `validate`
    /// catches values that parse but make no sense.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("RATEWIRE_LISTEN_ADDR") {
            config.listen_addr = addr;
        }

        if let Some(port) = env_parse("RATEWIRE_LISTEN_PORT") {
            config.listen_port = port;
        }

        if let Some(pivot) = env_parse("RATEWIRE_PIVOT") {
            config.pivot = pivot;
        }

        if let Some(secs) = env_parse::<u64>("RATEWIRE_REFRESH_SECS") {
            config.refresh_interval = Duration::from_secs(secs);
        }

        if let Some(ratio) = env_parse("RATEWIRE_MIN_CHANGE_RATIO") {
            config.min_change_ratio = ratio;
        }

        if let Some(buffer) = env_parse("RATEWIRE_SUBSCRIBER_BUFFER") {
            config.subscriber_buffer = buffer;
        }

        if let Some(secs) = env_parse::<u64>("RATEWIRE_SHUTDOWN_GRACE_SECS") {
            config.shutdown_grace = Duration::from_secs(secs);
        }

        if let Some(kind) = env_parse("RATEWIRE_PROVIDER") {
            config.provider.kind = kind;
        }

        if let Ok(url) = std::env::var("RATEWIRE_PROVIDER_URL") {
            config.provider.url = Some(url);
        }

        if let Some(drift) = env_parse("RATEWIRE_DRIFT") {
            config.provider.max_drift = drift;
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.listen_port == 0 {
            return Err("Listen port cannot be 0".to_string());
        }

        if self.refresh_interval.is_zero() {
            return Err("Refresh interval cannot be zero".to_string());
        }

        if self.subscriber_buffer == 0 {
            return Err("Subscriber buffer cannot be zero".to_string());
        }

        if !(0.0..1.0).contains(&self.min_change_ratio) {
            return Err("Minimum change ratio must be in [0, 1)".to_string());
        }

        if self.provider.kind == ProviderKind::Http && self.provider.url.is_none() {
            return Err("HTTP provider requires RATEWIRE_PROVIDER_URL".to_string());
        }

        if !(0.0..=0.5).contains(&self.provider.max_drift) {
            return Err("Drift must be between 0 and 0.5".to_string());
        }

        Ok(())
    }

    /// Address to bind the listener to.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.listen_addr, self.listen_port)
    }

    /// Refresher settings derived from this configuration.
    pub fn refresher_config(&self) -> RefresherConfig {
        RefresherConfig {
            interval: self.refresh_interval,
            fetch_timeout: self.provider.fetch_timeout,
            min_change_ratio: self.min_change_ratio,
            pivot: Some(self.pivot),
        }
    }

    /// Construct the configured upstream provider.
    pub fn build_provider(&self) -> Result<Arc<dyn RateProvider>> {
        let provider: Arc<dyn RateProvider> = match self.provider.kind {
            ProviderKind::Drift => Arc::new(DriftingRateProvider::new(
                RateQuotes::reference(),
                self.provider.max_drift,
            )),
            ProviderKind::Static => Arc::new(StaticRateProvider::reference()),
            ProviderKind::Http => {
                let url = self.provider.url.clone().ok_or_else(|| {
                    RatewireError::Configuration("HTTP provider requires a URL".to_string())
                })?;
                Arc::new(HttpRateProvider::new(url, self.provider.fetch_timeout)?)
            }
        };

        Ok(provider)
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|value| value.parse().ok())
}
