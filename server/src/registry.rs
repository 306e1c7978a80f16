//! Registry of live rate subscriptions.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use ratewire_common::{ConnectionId, RateRequest};
use ratewire_protocol::ServerMessage;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Channel for pushing frames to one connection's writer.
pub type UpdateSender = mpsc::Sender<ServerMessage>;

/// State kept for one subscribed connection.
struct Subscriber {
    requests: Vec<RateRequest>,
    sender: UpdateSender,
}

/// Copy of one connection's subscription, detached from the registry.
#[derive(Debug, Clone)]
pub struct SubscriptionSnapshot {
    pub connection_id: ConnectionId,
    /// Requests in the order the client sent them.
    pub requests: Vec<RateRequest>,
    pub sender: UpdateSender,
}

/// Maps open connections to the rate pairs they want pushed.
///
/// Every operation takes the same mutex for the duration of a map update
/// or copy and nothing else; callers never hold it across I/O.
/// Duplicate requests are kept and produce duplicate pushes.
pub struct SubscriptionRegistry {
    subscribers: Mutex<HashMap<ConnectionId, Subscriber>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a connection with an empty request set.
    ///
    /// Registering an already known connection keeps its requests. The
    /// returned guard unregisters the connection when dropped.
    pub fn register(self: &Arc<Self>, connection_id: ConnectionId, sender: UpdateSender) -> SubscriptionGuard {
        self.subscribers
            .lock()
            .entry(connection_id)
            .or_insert_with(|| Subscriber {
                requests: Vec::new(),
                sender,
            });

        debug!(connection_id = %connection_id, "Connection registered");

        SubscriptionGuard {
            registry: Arc::clone(self),
            connection_id,
        }
    }

    /// Append a request to a connection's set.
    ///
    /// Returns false if the connection is no longer registered.
    pub fn add_request(&self, connection_id: ConnectionId, request: RateRequest) -> bool {
        match self.subscribers.lock().get_mut(&connection_id) {
            Some(subscriber) => {
                subscriber.requests.push(request);
                true
            }
            None => false,
        }
    }

    /// Remove a connection. Unknown connections are ignored.
    pub fn unregister(&self, connection_id: ConnectionId) -> bool {
        let removed = self.subscribers.lock().remove(&connection_id).is_some();
        if removed {
            info!(connection_id = %connection_id, "Subscription removed");
        }
        removed
    }

    /// Point-in-time copy of every subscription.
    pub fn snapshot(&self) -> Vec<SubscriptionSnapshot> {
        self.subscribers
            .lock()
            .iter()
            .map(|(&connection_id, subscriber)| SubscriptionSnapshot {
                connection_id,
                requests: subscriber.requests.clone(),
                sender: subscriber.sender.clone(),
            })
            .collect()
    }

    /// Requests currently held for a connection.
    pub fn requests(&self, connection_id: ConnectionId) -> Option<Vec<RateRequest>> {
        self.subscribers
            .lock()
            .get(&connection_id)
            .map(|subscriber| subscriber.requests.clone())
    }

    /// Check whether a connection is registered.
    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.subscribers.lock().contains_key(&connection_id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.subscribers.lock().clear();
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a connection registered for as long as it is alive.
pub struct SubscriptionGuard {
    registry: Arc<SubscriptionRegistry>,
    connection_id: ConnectionId,
}

impl SubscriptionGuard {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Append a request to this connection's set.
    pub fn add_request(&self, request: RateRequest) -> bool {
        self.registry.add_request(self.connection_id, request)
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.connection_id);
    }
}
