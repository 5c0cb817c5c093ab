//! # Configuration Abstractions
//!
//! Layered configuration loading and the validation contract shared by every
//! svcadm component.

pub mod loader;
pub mod traits;

pub use loader::*;
pub use traits::*;
