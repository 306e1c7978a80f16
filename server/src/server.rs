//! Rate server lifecycle.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use ratewire_common::{RatewireError, Result};
use ratewire_rates::{RateProvider, RateRefresher, RateStore, RefreshOutcome};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::broadcaster::NotificationBroadcaster;
use crate::config::ServerConfig;
use crate::metrics::Metrics;
use crate::registry::SubscriptionRegistry;
use crate::service::RateService;
use crate::state::ServerState;

/// First pause after a failed accept.
const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(10);
/// Longest pause between accept attempts.
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Pause before the next accept after `failures` consecutive errors.
fn accept_backoff(failures: u32) -> Duration {
    ACCEPT_BACKOFF_BASE
        .saturating_mul(1 << failures.min(16))
        .min(ACCEPT_BACKOFF_MAX)
}

/// The rate distribution server.
///
/// Owns the rate store, the subscription registry and the background
/// refresher and broadcaster tasks.
pub struct RateServer {
    config: ServerConfig,
    state: RwLock<ServerState>,
    store: Arc<RateStore>,
    registry: Arc<SubscriptionRegistry>,
    refresher: Arc<RateRefresher>,
    broadcaster: Arc<NotificationBroadcaster>,
    service: Arc<RateService>,
    metrics: Arc<Metrics>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RateServer {
    /// Create a server fed by `provider`.
    pub fn new(config: ServerConfig, provider: Arc<dyn RateProvider>) -> Self {
        let store = Arc::new(RateStore::empty(config.pivot));
        let registry = Arc::new(SubscriptionRegistry::new());
        let metrics = Arc::new(Metrics::new());

        let refresher = Arc::new(RateRefresher::new(
            provider,
            store.clone(),
            config.refresher_config(),
        ));
        let broadcaster = Arc::new(NotificationBroadcaster::new(
            registry.clone(),
            store.clone(),
            metrics.clone(),
        ));
        let service = Arc::new(RateService::new(
            store.clone(),
            registry.clone(),
            metrics.clone(),
            config.subscriber_buffer,
            config.shutdown_grace,
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            state: RwLock::new(ServerState::Starting),
            store,
            registry,
            refresher,
            broadcaster,
            service,
            metrics,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Prime the rate table and start the background tasks.
    ///
    /// Fails if the first fetch fails; the server never serves without
    /// rates.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        info!(pivot = %self.config.pivot, "Starting rate server");

        match self.refresher.refresh_once().await {
            Ok(RefreshOutcome::Updated(generation)) => {
                let table = self.store.snapshot();
                info!(
                    generation,
                    currencies = table.len(),
                    refreshed_at = %table.refreshed_at(),
                    "Initial rates loaded"
                );
            }
            Ok(RefreshOutcome::Unchanged) => {}
            Err(e) => {
                error!(error = %e, "Unable to load initial rates");
                return Err(e.into());
            }
        }

        let refresher = self.refresher.clone();
        let shutdown = self.shutdown_tx.subscribe();
        let refresher_task = tokio::spawn(async move { refresher.run(shutdown).await });

        let broadcaster = self.broadcaster.clone();
        let events = self.refresher.subscribe();
        let shutdown = self.shutdown_tx.subscribe();
        let broadcaster_task = tokio::spawn(async move { broadcaster.run(events, shutdown).await });

        self.tasks.lock().extend([refresher_task, broadcaster_task]);
        *self.state.write() = ServerState::Running;

        info!("Rate server started");
        Ok(())
    }

    /// Accept connections until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        if !self.state().accepts_requests() {
            return Err(RatewireError::Configuration(
                "Server must be started before serving".to_string(),
            ));
        }

        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Listening for connections");
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut accept_failures = 0u32;

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => {
                            accept_failures = 0;
                            accepted
                        }
                        Err(e) => {
                            // Errors like EMFILE persist across retries.
                            let delay = accept_backoff(accept_failures);
                            accept_failures = accept_failures.saturating_add(1);
                            warn!(error = %e, retry_in = ?delay, "Failed to accept connection");
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                    };

                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(peer = %peer, error = %e, "Unable to set TCP_NODELAY");
                    }

                    let service = self.service.clone();
                    let shutdown = self.shutdown_tx.subscribe();
                    tokio::spawn(
                        async move {
                            match service.serve_connection(stream, shutdown).await {
                                Ok(()) => {}
                                Err(e) if e.is_graceful_close() => {}
                                Err(e) => warn!(error = %e, "Connection ended with error"),
                            }
                        }
                        .instrument(info_span!("connection", peer = %peer)),
                    );
                }
                _ = async { shutdown.wait_for(|stop| *stop).await.is_ok() } => break,
            }
        }

        info!("Stopped accepting connections");
        Ok(())
    }

    /// Stop the server gracefully.
    ///
    /// Signals every task, waits up to the grace period for open
    /// connections to drain, then drops any remaining subscriptions.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<()> {
        if self.state().is_terminal() {
            debug!("Rate server already stopped");
            return Ok(());
        }

        info!("Stopping rate server");
        *self.state.write() = ServerState::ShuttingDown;

        self.shutdown_tx.send_replace(true);

        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        while self.metrics.active_connections() > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.metrics.active_connections(),
                    "Grace period expired with connections still open"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task failed");
            }
        }

        self.registry.clear();
        *self.state.write() = ServerState::Stopped;

        info!("Rate server stopped");
        Ok(())
    }

    /// Get current server state.
    pub fn state(&self) -> ServerState {
        *self.state.read()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<RateStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn service(&self) -> &Arc<RateService> {
        &self.service
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratewire_client::RateClient;
    use ratewire_common::Currency;
    use ratewire_rates::StaticRateProvider;

    fn test_config() -> ServerConfig {
        ServerConfig {
            listen_addr: "127.0.0.1".to_string(),
            refresh_interval: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(1),
            ..ServerConfig::default()
        }
    }

    fn usd_provider() -> Arc<StaticRateProvider> {
        let provider = StaticRateProvider::new("USD");
        provider.set_rate("EUR", 0.9);
        provider.set_rate("GBP", 0.8);
        Arc::new(provider)
    }

    #[tokio::test]
    async fn test_start_requires_rates() {
        let provider = Arc::new(StaticRateProvider::new("USD"));
        let server = RateServer::new(test_config(), provider);

        tokio_test::assert_err!(server.start().await);
        assert_eq!(server.state(), ServerState::Starting);
    }

    #[tokio::test]
    async fn test_start_rejects_unsupported_codes_only() {
        let provider = StaticRateProvider::new("USD");
        provider.set_rate("XAU", 0.0004);
        let server = RateServer::new(test_config(), Arc::new(provider));

        tokio_test::assert_err!(server.start().await);
        assert_eq!(server.state(), ServerState::Starting);
        assert_eq!(server.store().generation(), 0);
    }

    #[test]
    fn test_accept_backoff_grows_and_caps() {
        assert_eq!(accept_backoff(0), ACCEPT_BACKOFF_BASE);
        assert_eq!(accept_backoff(1), ACCEPT_BACKOFF_BASE * 2);
        assert_eq!(accept_backoff(3), ACCEPT_BACKOFF_BASE * 8);
        assert_eq!(accept_backoff(7), ACCEPT_BACKOFF_MAX);
        assert_eq!(accept_backoff(u32::MAX), ACCEPT_BACKOFF_MAX);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let server = RateServer::new(test_config(), usd_provider());
        tokio_test::assert_ok!(server.start().await);

        tokio_test::assert_ok!(server.stop().await);
        assert!(server.state().is_terminal());
        tokio_test::assert_ok!(server.stop().await);
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn test_serve_before_start_rejected() {
        let server = RateServer::new(test_config(), usd_provider());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        tokio_test::assert_err!(server.serve(listener).await);
    }

    #[tokio::test]
    async fn test_end_to_end_over_tcp() {
        let provider = usd_provider();
        let server = Arc::new(RateServer::new(test_config(), provider.clone()));
        tokio_test::assert_ok!(server.start().await);
        assert_eq!(server.state(), ServerState::Running);
        // Rebased onto the EUR pivot.
        assert_eq!(server.store().snapshot().pivot(), Currency::Eur);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = {
            let server = server.clone();
            tokio::spawn(async move { server.serve(listener).await })
        };

        let mut client = RateClient::connect(addr).await.unwrap();
        let response = client.get_rate(Currency::Eur, Currency::Gbp).await.unwrap();
        assert!((response.rate - 0.8 / 0.9).abs() < 1e-9);

        client.subscribe(Currency::Eur, Currency::Gbp).await.unwrap();
        // Round trip so the subscription is registered before rates move.
        client.get_rate(Currency::Usd, Currency::Usd).await.unwrap();
        provider.set_rate("EUR", 0.95);

        let update = tokio::time::timeout(Duration::from_secs(5), client.next_update())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.request(), ratewire_common::RateRequest::new(Currency::Eur, Currency::Gbp));
        assert!((update.rate - 0.8 / 0.95).abs() < 1e-9);

        tokio_test::assert_ok!(server.stop().await);
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.registry().is_empty());
        tokio_test::assert_ok!(serving.await.unwrap());
        assert_eq!(server.metrics().active_connections(), 0);

        // The server closed the session.
        assert!(client.next_update().await.is_none());
    }
}
