//! svcadm Library
//!
//! Dependency-ordered lifecycle management for a fleet of containerised
//! developer services: engine facade, service adapters, orchestration and
//! the CLI surface.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod paths;
pub mod services;

#[doc(hidden)]
pub mod test_utils;

pub use config::{Configuration, ServiceSpec, User, UserSet};
pub use engine::{ContainerEngine, DockerEngine, EngineError};
pub use error::{Result, ServiceError};
pub use orchestrator::{Orchestrator, ServiceOutcome, StartReport};
pub use paths::SvcadmPaths;
pub use services::{ServiceAdapter, ServiceContext, ServiceKind};

/// Crate version, stamped on every managed resource
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
