//! Protocol message types.

use ratewire_common::{Currency, RateResponse, RatewireError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status codes carried by error frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    /// The caller sent something the server cannot act on.
    InvalidArgument,
    /// The server cannot answer right now.
    Unavailable,
    /// Unexpected server-side failure.
    Internal,
}

impl From<&RatewireError> for StatusCode {
    fn from(err: &RatewireError) -> Self {
        match err {
            RatewireError::UnknownCurrency(_)
            | RatewireError::InvalidArgument { .. }
            | RatewireError::Protocol(_) => StatusCode::InvalidArgument,
            RatewireError::Configuration(_) => StatusCode::Internal,
            _ => StatusCode::Unavailable,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            StatusCode::InvalidArgument => "INVALID_ARGUMENT",
            StatusCode::Unavailable => "UNAVAILABLE",
            StatusCode::Internal => "INTERNAL",
        };
        f.write_str(code)
    }
}

/// Frames sent from client to server.
///
/// Currency codes travel as text so the server can answer unknown codes
/// with an `INVALID_ARGUMENT` error instead of dropping the frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Unary rate query.
    GetRate {
        request_id: u64,
        base: String,
        destination: String,
    },
    /// Add a pair to this connection's subscription.
    Subscribe { base: String, destination: String },
}

impl ClientMessage {
    /// Build a rate query.
    pub fn get_rate(request_id: u64, base: Currency, destination: Currency) -> Self {
        ClientMessage::GetRate {
            request_id,
            base: base.code().to_string(),
            destination: destination.code().to_string(),
        }
    }

    /// Build a subscribe request.
    pub fn subscribe(base: Currency, destination: Currency) -> Self {
        ClientMessage::Subscribe {
            base: base.code().to_string(),
            destination: destination.code().to_string(),
        }
    }
}

/// Frames sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Answer to a `get_rate` frame.
    Rate {
        request_id: u64,
        base: Currency,
        destination: Currency,
        rate: f64,
    },
    /// Pushed after a rate refresh for one subscribed pair.
    RateUpdate {
        base: Currency,
        destination: Currency,
        rate: f64,
    },
    /// A request on this connection failed.
    Error {
        request_id: Option<u64>,
        code: StatusCode,
        message: String,
    },
}

impl ServerMessage {
    /// Answer a `get_rate` frame.
    pub fn rate(request_id: u64, response: RateResponse) -> Self {
        ServerMessage::Rate {
            request_id,
            base: response.base,
            destination: response.destination,
            rate: response.rate,
        }
    }

    /// Push a subscription update.
    pub fn rate_update(response: RateResponse) -> Self {
        ServerMessage::RateUpdate {
            base: response.base,
            destination: response.destination,
            rate: response.rate,
        }
    }

    /// Report an error for a request.
    pub fn error(request_id: Option<u64>, err: &RatewireError) -> Self {
        ServerMessage::Error {
            request_id,
            code: StatusCode::from(err),
            message: err.to_string(),
        }
    }

    /// The rate carried by a `rate` or `rate_update` frame.
    pub fn response(&self) -> Option<RateResponse> {
        match *self {
            ServerMessage::Rate {
                base,
                destination,
                rate,
                ..
            }
            | ServerMessage::RateUpdate {
                base,
                destination,
                rate,
            } => Some(RateResponse {
                base,
                destination,
                rate,
            }),
            ServerMessage::Error { .. } => None,
        }
    }
}
