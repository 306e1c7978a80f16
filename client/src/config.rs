//! Rate client configuration.

use std::time::Duration;

/// Configuration for the rate client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Address of the rate server.
    pub server_addr: String,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// How long a rate query waits for its answer.
    pub request_timeout: Duration,
    /// Pushed updates buffered before further ones are dropped.
    pub update_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:9092".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            update_buffer: 64,
        }
    }
}

impl ClientConfig {
    /// Config pointing at `server_addr` with default timeouts.
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("RATEWIRE_SERVER_ADDR") {
            config.server_addr = addr;
        }

        if let Some(secs) = std::env::var("RATEWIRE_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
        {
            config.request_timeout = Duration::from_secs(secs);
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.server_addr.is_empty() {
            return Err("Server address cannot be empty".to_string());
        }

        if self.connect_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err("Timeouts cannot be zero".to_string());
        }

        if self.update_buffer == 0 {
            return Err("Update buffer cannot be zero".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server_addr, "127.0.0.1:9092");
    }

    #[test]
    fn test_invalid_config() {
        assert!(ClientConfig::new("").validate().is_err());

        let mut config = ClientConfig::new("localhost:9092");
        config.update_buffer = 0;
        assert!(config.validate().is_err());
    }
}
