//! Periodic rate refresh and update events.

use std::sync::Arc;
use std::time::Duration;

use ratewire_common::Currency;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{RateError, RateResult};
use crate::provider::RateProvider;
use crate::store::RateStore;
use crate::table::RateTable;

/// Configuration for the rate refresher.
#[derive(Debug, Clone)]
pub struct RefresherConfig {
    /// Time between refreshes.
    pub interval: Duration,
    /// Upper bound on a single provider fetch.
    pub fetch_timeout: Duration,
    /// Smallest relative move that counts as a change. Zero publishes on
    /// any difference.
    pub min_change_ratio: f64,
    /// Pivot to express tables in; the provider's own pivot when `None`.
    pub pivot: Option<Currency>,
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(3),
            min_change_ratio: 0.0,
            pivot: None,
        }
    }
}

/// Result of one refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new table was published with this generation.
    Updated(u64),
    /// The provider's figures matched the current table.
    Unchanged,
}

/// Pulls rates from a provider and publishes changed tables.
///
/// Each publication raises a rate update event on a watch channel carrying
/// the table generation. A watch channel holds only the latest value, so a
/// consumer still busy with the previous event skips straight to the
/// newest table instead of building a backlog.
pub struct RateRefresher {
    provider: Arc<dyn RateProvider>,
    store: Arc<RateStore>,
    config: RefresherConfig,
    events: watch::Sender<u64>,
}

impl RateRefresher {
    /// Create a refresher publishing into `store`.
    pub fn new(
        provider: Arc<dyn RateProvider>,
        store: Arc<RateStore>,
        config: RefresherConfig,
    ) -> Self {
        let (events, _) = watch::channel(store.generation());
        Self {
            provider,
            store,
            config,
            events,
        }
    }

    /// Receive rate update events.
    ///
    /// The receiver starts with the current generation marked as seen.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.events.subscribe()
    }

    /// Get the store this refresher publishes into.
    pub fn store(&self) -> &Arc<RateStore> {
        &self.store
    }

    /// Fetch once and publish if the figures changed materially.
    ///
    /// On error the current table is left untouched.
    #[instrument(skip(self), fields(provider = self.provider.name()))]
    pub async fn refresh_once(&self) -> RateResult<RefreshOutcome> {
        let quotes = tokio::time::timeout(self.config.fetch_timeout, self.provider.fetch())
            .await
            .map_err(|_| {
                RateError::ProviderUnavailable(format!(
                    "fetch timed out after {:?}",
                    self.config.fetch_timeout
                ))
            })??;

        let mut table = RateTable::from_quotes(&quotes)?;
        if let Some(pivot) = self.config.pivot {
            table = table.rebased(pivot)?;
        }

        let current = self.store.snapshot();
        if !table.differs_from(&current, self.config.min_change_ratio) {
            debug!(generation = current.generation(), "Rates unchanged");
            return Ok(RefreshOutcome::Unchanged);
        }

        let generation = self.store.replace(table);
        self.events.send_replace(generation);

        debug!(generation, "Rates refreshed");
        Ok(RefreshOutcome::Updated(generation))
    }

    /// Refresh on a fixed interval until `shutdown` flips to true.
    ///
    /// Failed ticks are logged and skipped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(interval = ?self.config.interval, provider = self.provider.name(), "Rate refresher started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.refresh_once().await {
                        Ok(RefreshOutcome::Updated(generation)) => {
                            info!(generation, "Got updated rates");
                        }
                        Ok(RefreshOutcome::Unchanged) => {}
                        Err(e) if e.is_provider_failure() => {
                            warn!(
                                error = %e,
                                stale_generation = self.store.generation(),
                                "Rate refresh failed, keeping previous rates"
                            );
                        }
                        Err(e) => {
                            error!(
                                error = %e,
                                pivot = ?self.config.pivot,
                                "Provider rates cannot be expressed in the configured pivot"
                            );
                        }
                    }
                }
                // The guard returned by wait_for is not Send; drop it inside the block.
                _ = async { shutdown.wait_for(|stop| *stop).await.is_ok() } => break,
            }
        }

        info!("Rate refresher stopped");
    }
}
