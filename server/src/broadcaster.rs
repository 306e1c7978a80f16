//! Fan-out of refreshed rates to subscribers.

use std::sync::Arc;

use ratewire_common::RateResponse;
use ratewire_protocol::ServerMessage;
use ratewire_rates::RateStore;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::metrics::Metrics;
use crate::registry::SubscriptionRegistry;

/// Outcome of one broadcast cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscriptions in the registry snapshot.
    pub subscribers: usize,
    /// Updates queued for delivery.
    pub delivered: usize,
    /// Requests skipped because the table no longer quotes a currency.
    pub skipped: usize,
    /// Updates dropped because a subscriber's buffer was full.
    pub dropped: usize,
    /// Subscribers removed because their connection had gone.
    pub disconnected: usize,
}

/// Pushes recomputed rates to every subscriber after a refresh.
pub struct NotificationBroadcaster {
    registry: Arc<SubscriptionRegistry>,
    store: Arc<RateStore>,
    metrics: Arc<Metrics>,
}

impl NotificationBroadcaster {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        store: Arc<RateStore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            store,
            metrics,
        }
    }

    /// Run one broadcast cycle against the current table.
    ///
    /// Never waits on a subscriber: a full buffer drops that update, a
    /// closed one unregisters the connection. Either way the remaining
    /// subscribers are still served.
    pub fn broadcast(&self) -> BroadcastReport {
        let table = self.store.snapshot();
        let subscriptions = self.registry.snapshot();
        let mut report = BroadcastReport {
            subscribers: subscriptions.len(),
            ..Default::default()
        };

        for subscription in subscriptions {
            let connection_id = subscription.connection_id;

            for request in &subscription.requests {
                let rate = match table.get(request.base, request.destination) {
                    Ok(rate) => rate,
                    Err(e) => {
                        warn!(
                            connection_id = %connection_id,
                            base = %request.base,
                            destination = %request.destination,
                            error = %e,
                            "Unable to get updated rate"
                        );
                        report.skipped += 1;
                        continue;
                    }
                };

                let update = ServerMessage::rate_update(RateResponse::new(*request, rate));
                match subscription.sender.try_send(update) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            connection_id = %connection_id,
                            pair = %request,
                            "Subscriber buffer full, dropping update"
                        );
                        report.dropped += 1;
                    }
                    Err(TrySendError::Closed(_)) => {
                        warn!(connection_id = %connection_id, "Unable to send updated rate, removing subscriber");
                        self.registry.unregister(connection_id);
                        report.disconnected += 1;
                        break;
                    }
                }
            }
        }

        self.metrics.broadcast_completed(&report);
        debug!(generation = table.generation(), ?report, "Broadcast complete");
        report
    }

    /// Broadcast on every rate update event until shutdown or until the
    /// event source goes away.
    pub async fn run(&self, mut events: watch::Receiver<u64>, mut shutdown: watch::Receiver<bool>) {
        info!("Notification broadcaster started");

        loop {
            tokio::select! {
                changed = events.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let generation = *events.borrow_and_update();
                    let report = self.broadcast();
                    info!(
                        generation,
                        subscribers = report.subscribers,
                        delivered = report.delivered,
                        "Pushed updated rates"
                    );
                }
                _ = async { shutdown.wait_for(|stop| *stop).await.is_ok() } => break,
            }
        }

        info!("Notification broadcaster stopped");
    }
}
