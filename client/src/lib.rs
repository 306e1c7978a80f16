//! Ratewire Client Library
//!
//! Async client for a Ratewire server: one-off rate queries and a stream
//! of rate updates for subscribed currency pairs.

pub mod client;
pub mod config;
pub mod connection;
pub mod handler;

pub use client::RateClient;
pub use config::ClientConfig;
pub use handler::{LoggingHandler, RateUpdateHandler, ServerEvent};
