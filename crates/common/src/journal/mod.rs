//! Logging setup using tracing
//!
//! Console output for the operator plus an append-only log file that keeps a
//! history across runs.

pub mod init;

pub use init::{init_journal, JournalOptions};
