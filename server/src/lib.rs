//! Ratewire Server
//!
//! Serves exchange rates over line-delimited JSON on TCP. Clients ask for
//! single rates or subscribe to pairs and receive a push for each pair
//! every time the rate table is refreshed.

pub mod config;
pub mod state;
pub mod metrics;
pub mod registry;
pub mod broadcaster;
pub mod service;
pub mod server;

pub use broadcaster::{BroadcastReport, NotificationBroadcaster};
pub use config::{ProviderConfig, ProviderKind, ServerConfig};
pub use metrics::{Metrics, MetricsSnapshot};
pub use registry::{SubscriptionGuard, SubscriptionRegistry, SubscriptionSnapshot};
pub use server::RateServer;
pub use service::RateService;
pub use state::ServerState;
