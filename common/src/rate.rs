//! Rate request and response values.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Currency;

/// A request for the rate converting `base` into `destination`.
///
/// `base` and `destination` may be equal; the rate is then exactly 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateRequest {
    pub base: Currency,
    pub destination: Currency,
}

impl RateRequest {
    /// Create a new rate request.
    pub fn new(base: Currency, destination: Currency) -> Self {
        Self { base, destination }
    }

    /// Check whether the request converts a currency into itself.
    pub fn is_identity(&self) -> bool {
        self.base == self.destination
    }
}

impl fmt::Display for RateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.destination)
    }
}

/// A computed rate: 1 unit of `base` buys `rate` units of `destination`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateResponse {
    pub base: Currency,
    pub destination: Currency,
    pub rate: f64,
}

impl RateResponse {
    /// Create a response for a request.
    pub fn new(request: RateRequest, rate: f64) -> Self {
        Self {
            base: request.base,
            destination: request.destination,
            rate,
        }
    }

    /// Get the request this response answers.
    pub fn request(&self) -> RateRequest {
        RateRequest::new(self.base, self.destination)
    }
}

impl fmt::Display for RateResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.base, self.destination, self.rate)
    }
}
