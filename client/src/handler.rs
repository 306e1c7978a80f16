//! Handling of frames the server pushes without being asked.

use ratewire_common::{RateResponse, Result};
use ratewire_protocol::StatusCode;

/// Unsolicited frames from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// A subscribed pair was recomputed after a refresh.
    Update(RateResponse),
    /// A subscribe request was rejected.
    Rejected { code: StatusCode, message: String },
}

/// Trait for consuming pushed rate updates.
#[async_trait::async_trait]
pub trait RateUpdateHandler: Send + Sync {
    /// Handle one pushed update.
    async fn on_update(&self, update: RateResponse) -> Result<()>;

    /// Handle a rejected subscription.
    async fn on_rejected(&self, code: StatusCode, message: &str) -> Result<()> {
        tracing::warn!(code = %code, message = %message, "Subscription rejected");
        Ok(())
    }
}

/// Handler that logs every update.
pub struct LoggingHandler;

#[async_trait::async_trait]
impl RateUpdateHandler for LoggingHandler {
    async fn on_update(&self, update: RateResponse) -> Result<()> {
        tracing::info!(
            base = %update.base,
            destination = %update.destination,
            rate = update.rate,
            "Rate update received"
        );
        Ok(())
    }
}
