//! Configuration module
//!
//! The service configuration (`svcadm.yaml`), the users file and their
//! validation rules.

pub mod types;
pub mod users;
pub mod validation;

pub use types::*;
pub use users::{User, UserSet};
