//! Rate table error types.

use ratewire_common::{Currency, RatewireError};
use thiserror::Error;

/// Errors that can occur while reading or refreshing rates.
#[derive(Debug, Error)]
pub enum RateError {
    /// Currency is not present in the current table.
    #[error("Unknown currency: {0}")]
    UnknownCurrency(Currency),

    /// Provider could not be reached or did not answer in time.
    #[error("Rate provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Provider answered with data that does not describe a valid table.
    #[error("Rate provider returned malformed data: {0}")]
    ProviderMalformed(String),

    /// A rate is not a strictly positive finite number.
    #[error("Invalid rate {rate} for {currency}")]
    InvalidRate { currency: Currency, rate: f64 },
}

impl RateError {
    /// Check whether the error came from a refresh rather than a lookup.
    pub fn is_provider_failure(&self) -> bool {
        !matches!(self, RateError::UnknownCurrency(_))
    }
}

impl From<RateError> for RatewireError {
    fn from(err: RateError) -> Self {
        match err {
            RateError::UnknownCurrency(currency) => {
                RatewireError::UnknownCurrency(currency.to_string())
            }
            RateError::ProviderUnavailable(msg) => RatewireError::ProviderUnavailable(msg),
            RateError::ProviderMalformed(msg) => RatewireError::ProviderMalformed(msg),
            err @ RateError::InvalidRate { .. } => {
                RatewireError::ProviderMalformed(err.to_string())
            }
        }
    }
}

/// Result type for rate operations.
pub type RateResult<T> = Result<T, RateError>;
