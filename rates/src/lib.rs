//! Ratewire Rates
//!
//! Exchange rate table management: the pivot-relative rate table, its
//! atomic publication to concurrent readers, upstream rate providers and
//! the periodic refresher that raises rate update events.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ratewire_common::Currency;
//! use ratewire_rates::{RateRefresher, RateStore, RefresherConfig, StaticRateProvider};
//!
//! let store = Arc::new(RateStore::empty(Currency::Eur));
//! let provider = Arc::new(StaticRateProvider::reference());
//! let refresher = RateRefresher::new(provider, store.clone(), RefresherConfig::default());
//!
//! refresher.refresh_once().await?;
//! let rate = store.get(Currency::Usd, Currency::Gbp)?;
//! ```

pub mod table;
pub mod store;
pub mod provider;
pub mod refresher;
pub mod error;

pub use table::RateTable;
pub use store::RateStore;
pub use provider::{
    DriftingRateProvider, HttpRateProvider, RateProvider, RateQuotes, StaticRateProvider,
};
pub use refresher::{RateRefresher, RefreshOutcome, RefresherConfig};
pub use error::{RateError, RateResult};
