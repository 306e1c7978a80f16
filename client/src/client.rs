//! Rate client for querying and subscribing to a Ratewire server.

use std::sync::atomic::{AtomicU64, Ordering};

use ratewire_common::{Currency, RateRequest, RateResponse, RatewireError, Result};
use ratewire_protocol::{ClientMessage, ServerMessage, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use crate::config::ClientConfig;
use crate::connection::ServerConnection;
use crate::handler::{RateUpdateHandler, ServerEvent};

/// Client for a Ratewire server.
///
/// One connection carries both rate queries and the subscription stream.
pub struct RateClient {
    config: ClientConfig,
    connection: ServerConnection,
    events: mpsc::Receiver<ServerEvent>,
    next_request_id: AtomicU64,
}

impl RateClient {
    /// Connect to a server with default settings.
    pub async fn connect(addr: impl ToString) -> Result<Self> {
        Self::connect_with(ClientConfig::new(addr.to_string())).await
    }

    /// Connect using `config`.
    #[instrument(skip(config), fields(server_addr = %config.server_addr))]
    pub async fn connect_with(config: ClientConfig) -> Result<Self> {
        config.validate().map_err(RatewireError::Configuration)?;

        let (events_tx, events) = mpsc::channel(config.update_buffer);
        let connection =
            ServerConnection::open(config.server_addr.as_str(), config.connect_timeout, events_tx)
                .await?;

        Ok(Self::with_connection(config, connection, events))
    }

    /// Run a client over an already established stream.
    pub fn from_stream<S>(config: ClientConfig, stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (events_tx, events) = mpsc::channel(config.update_buffer);
        let connection = ServerConnection::from_stream(stream, events_tx);
        Self::with_connection(config, connection, events)
    }

    fn with_connection(
        config: ClientConfig,
        connection: ServerConnection,
        events: mpsc::Receiver<ServerEvent>,
    ) -> Self {
        Self {
            config,
            connection,
            events,
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Ask for the current rate converting `base` into `destination`.
    pub async fn get_rate(&self, base: Currency, destination: Currency) -> Result<RateResponse> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let message = ClientMessage::get_rate(request_id, base, destination);

        let reply = self
            .connection
            .request(request_id, &message, self.config.request_timeout)
            .await?;

        match reply {
            ServerMessage::Error { code, message, .. } => Err(error_from_status(code, message)),
            other => other.response().ok_or_else(|| {
                RatewireError::Protocol(format!("unexpected reply to request {}", request_id))
            }),
        }
    }

    /// Add a pair to this connection's subscription.
    ///
    /// The server answers only if it rejects the pair; the rejection then
    /// arrives through [`next_event`](Self::next_event).
    pub async fn subscribe(&self, base: Currency, destination: Currency) -> Result<()> {
        self.connection
            .send(&ClientMessage::subscribe(base, destination))
            .await?;
        info!(pair = %RateRequest::new(base, destination), "Subscribed");
        Ok(())
    }

    /// Next pushed frame, or `None` once the server has closed the session.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    /// Next pushed rate update, logging and skipping rejections.
    pub async fn next_update(&mut self) -> Option<RateResponse> {
        loop {
            match self.events.recv().await? {
                ServerEvent::Update(update) => return Some(update),
                ServerEvent::Rejected { code, message } => {
                    warn!(code = %code, message = %message, "Subscription rejected");
                }
            }
        }
    }

    /// Feed every pushed frame to `handler` until the session ends.
    pub async fn run_handler(&mut self, handler: &dyn RateUpdateHandler) -> Result<()> {
        while let Some(event) = self.events.recv().await {
            let result = match event {
                ServerEvent::Update(update) => handler.on_update(update).await,
                ServerEvent::Rejected { code, message } => handler.on_rejected(code, &message).await,
            };
            if let Err(e) = result {
                warn!(error = %e, "Error handling rate update");
            }
        }
        Ok(())
    }

    /// Check if the server side is still open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Close the session.
    pub async fn close(self) -> Result<()> {
        self.connection.close(self.config.request_timeout).await
    }
}

fn error_from_status(code: StatusCode, message: String) -> RatewireError {
    match code {
        StatusCode::InvalidArgument => RatewireError::InvalidArgument {
            message,
            field: None,
        },
        StatusCode::Unavailable => RatewireError::ProviderUnavailable(message),
        StatusCode::Internal => RatewireError::Protocol(message),
    }
}
