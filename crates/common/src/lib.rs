//! # Common svcadm
//!
//! Shared building blocks for the svcadm workspace: the error vocabulary,
//! layered configuration loading, logging initialisation and random secret
//! generation.

pub mod config;
pub mod error;
pub mod journal;
pub mod secrets;

pub use config::*;
pub use error::*;

/// Version of the common crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
