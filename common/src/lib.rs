//! Ratewire Common Types
//!
//! Shared types used across the Ratewire crates: the closed currency set,
//! rate request/response values, connection identifiers and the error
//! taxonomy surfaced to callers.

pub mod currency;
pub mod identifiers;
pub mod rate;
pub mod error;

pub use currency::*;
pub use identifiers::*;
pub use rate::*;
pub use error::*;
