//! Upstream rate provider trait and implementations.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{RateError, RateResult};

/// Raw figures returned by a provider.
///
/// Untrusted: codes are free text and rates unchecked until turned into a
/// [`RateTable`](crate::RateTable). The JSON shape matches the ECB
/// reference rate mirrors, e.g. `{"base": "EUR", "rates": {"USD": 1.08}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateQuotes {
    /// Pivot currency code the rates are expressed against.
    pub base: String,
    /// Currency code to units per one pivot.
    pub rates: HashMap<String, f64>,
}

impl RateQuotes {
    /// A recent ECB reference snapshot, used to seed offline providers.
    pub fn reference() -> Self {
        let rates = [
            ("USD", 1.0845),
            ("JPY", 162.52),
            ("BGN", 1.9558),
            ("CZK", 25.214),
            ("DKK", 7.4601),
            ("GBP", 0.8551),
            ("HUF", 395.03),
            ("PLN", 4.3218),
            ("RON", 4.9723),
            ("SEK", 11.452),
            ("CHF", 0.9551),
            ("ISK", 150.10),
            ("NOK", 11.603),
            ("HRK", 7.5345),
            ("RUB", 99.012),
            ("TRY", 35.041),
            ("AUD", 1.6402),
            ("BRL", 5.4012),
            ("CAD", 1.4718),
            ("CNY", 7.8011),
            ("HKD", 8.4712),
            ("IDR", 17201.0),
            ("ILS", 4.0512),
            ("INR", 90.301),
            ("KRW", 1450.2),
            ("MXN", 18.602),
            ("MYR", 5.1023),
            ("NZD", 1.7812),
            ("PHP", 61.503),
            ("SGD", 1.4521),
            ("THB", 38.512),
            ("ZAR", 20.103),
        ];

        Self {
            base: "EUR".to_string(),
            rates: rates
                .into_iter()
                .map(|(code, rate)| (code.to_string(), rate))
                .collect(),
        }
    }
}

/// Trait for upstream rate providers.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Pull the provider's current figures.
    async fn fetch(&self) -> RateResult<RateQuotes>;
}

/// Provider serving fixed quotes that can be changed at runtime.
pub struct StaticRateProvider {
    base: String,
    rates: DashMap<String, f64>,
}

impl StaticRateProvider {
    /// Create a provider quoting against `base`.
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            rates: DashMap::new(),
        }
    }

    /// Create a provider serving [`RateQuotes::reference`].
    pub fn reference() -> Self {
        Self::from_quotes(RateQuotes::reference())
    }

    /// Create a provider serving the given quotes.
    pub fn from_quotes(quotes: RateQuotes) -> Self {
        let provider = Self::new(quotes.base);
        for (code, rate) in quotes.rates {
            provider.set_rate(code, rate);
        }
        provider
    }

    /// Set the rate for a currency code.
    pub fn set_rate(&self, code: impl Into<String>, rate: f64) {
        self.rates.insert(code.into(), rate);
    }

    /// Stop quoting a currency code.
    pub fn remove_rate(&self, code: &str) {
        self.rates.remove(code);
    }
}

#[async_trait]
impl RateProvider for StaticRateProvider {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch(&self) -> RateResult<RateQuotes> {
        Ok(RateQuotes {
            base: self.base.clone(),
            rates: self
                .rates
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
        })
    }
}

/// Provider that moves every rate by a bounded random step on each fetch.
///
/// Stands in for a live feed: subscribers see a new table every refresh.
pub struct DriftingRateProvider {
    base: String,
    rates: Mutex<HashMap<String, f64>>,
    rng: Mutex<StdRng>,
    max_drift: f64,
}

impl DriftingRateProvider {
    /// Create a drifting provider seeded with `quotes`.
    ///
    /// `max_drift` is the largest relative move per fetch, e.g. 0.05 for 5%.
    pub fn new(quotes: RateQuotes, max_drift: f64) -> Self {
        Self::with_rng(quotes, max_drift, StdRng::from_entropy())
    }

    /// Create a drifting provider with a fixed seed.
    pub fn seeded(quotes: RateQuotes, max_drift: f64, seed: u64) -> Self {
        Self::with_rng(quotes, max_drift, StdRng::seed_from_u64(seed))
    }

    fn with_rng(quotes: RateQuotes, max_drift: f64, rng: StdRng) -> Self {
        Self {
            base: quotes.base,
            rates: Mutex::new(quotes.rates),
            rng: Mutex::new(rng),
            max_drift: max_drift.clamp(0.0, 0.5),
        }
    }
}

#[async_trait]
impl RateProvider for DriftingRateProvider {
    fn name(&self) -> &str {
        "drift"
    }

    async fn fetch(&self) -> RateResult<RateQuotes> {
        let mut rng = self.rng.lock();
        let mut rates = self.rates.lock();

        for (code, rate) in rates.iter_mut() {
            if code.eq_ignore_ascii_case(&self.base) {
                continue;
            }
            let step: f64 = rng.gen_range(-self.max_drift..=self.max_drift);
            *rate *= 1.0 + step;
        }

        Ok(RateQuotes {
            base: self.base.clone(),
            rates: rates.clone(),
        })
    }
}

/// Provider pulling reference rates as JSON over HTTP.
pub struct HttpRateProvider {
    url: String,
    client: reqwest::Client,
}

impl HttpRateProvider {
    /// Create a provider for `url` with a per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> RateResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RateError::ProviderUnavailable(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self) -> RateResult<RateQuotes> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| RateError::ProviderUnavailable(e.to_string()))?;

        let body = response
            .text()
            .await
            .map_err(|e| RateError::ProviderUnavailable(e.to_string()))?;

        match serde_json::from_str::<RateQuotes>(&body) {
            Ok(quotes) => {
                debug!(url = %self.url, count = quotes.rates.len(), "Fetched rates");
                Ok(quotes)
            }
            Err(e) => {
                error!(url = %self.url, error = %e, "Failed to parse rate response");
                Err(RateError::ProviderMalformed(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::RateTable;
    use ratewire_common::Currency;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn create_mock_server(status: u16, body: &str) -> MockServer {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&mock_server)
            .await;

        mock_server
    }

    #[tokio::test]
    async fn test_static_provider() {
        let provider = StaticRateProvider::new("USD");
        provider.set_rate("EUR", 0.9);
        provider.set_rate("GBP", 0.8);

        let quotes = provider.fetch().await.unwrap();
        assert_eq!(quotes.base, "USD");
        assert_eq!(quotes.rates.get("EUR"), Some(&0.9));

        provider.remove_rate("GBP");
        let quotes = provider.fetch().await.unwrap();
        assert_eq!(quotes.rates.len(), 1);
    }

    #[test]
    fn test_reference_quotes_form_a_valid_table() {
        let table = RateTable::from_quotes(&RateQuotes::reference()).unwrap();
        assert_eq!(table.pivot(), Currency::Eur);
        assert_eq!(table.len(), Currency::ALL.len());
    }

    #[tokio::test]
    async fn test_drifting_provider_moves_within_bounds() {
        let seed = RateQuotes::reference();
        let provider = DriftingRateProvider::seeded(seed.clone(), 0.05, 7);

        let quotes = provider.fetch().await.unwrap();
        for (code, rate) in &quotes.rates {
            let before = seed.rates[code];
            assert!(((rate - before) / before).abs() <= 0.05 + 1e-12);
            assert!(*rate > 0.0);
        }
        assert_ne!(quotes.rates, seed.rates);
    }

    #[tokio::test]
    async fn test_drifting_provider_zero_drift_is_stable() {
        let seed = RateQuotes::reference();
        let provider = DriftingRateProvider::seeded(seed.clone(), 0.0, 1);

        let quotes = provider.fetch().await.unwrap();
        assert_eq!(quotes.rates, seed.rates);
    }

    #[tokio::test]
    async fn test_http_provider_fetch() {
        let body = r#"{"amount": 1.0, "base": "EUR", "date": "2026-10-15",
                       "rates": {"USD": 1.0845, "GBP": 0.8551}}"#;
        let server = create_mock_server(200, body).await;

        let provider =
            HttpRateProvider::new(format!("{}/latest", server.uri()), Duration::from_secs(2))
                .unwrap();
        let quotes = provider.fetch().await.unwrap();

        assert_eq!(quotes.base, "EUR");
        assert_eq!(quotes.rates.get("GBP"), Some(&0.8551));
    }

    #[tokio::test]
    async fn test_http_provider_malformed_body() {
        let server = create_mock_server(200, "<gesmes:Envelope/>").await;

        let provider =
            HttpRateProvider::new(format!("{}/latest", server.uri()), Duration::from_secs(2))
                .unwrap();
        let result = provider.fetch().await;

        assert!(matches!(result, Err(RateError::ProviderMalformed(_))));
    }

    #[tokio::test]
    async fn test_http_provider_server_error() {
        let server = create_mock_server(503, "").await;

        let provider =
            HttpRateProvider::new(format!("{}/latest", server.uri()), Duration::from_secs(2))
                .unwrap();
        let result = provider.fetch().await;

        assert!(matches!(result, Err(RateError::ProviderUnavailable(_))));
    }
}
