//! mountlink-core: core traits, types, and error definitions for mountlink.
//!
//! This crate defines the transport-agnostic pieces every other mountlink
//! crate builds on: the byte-level [`Transport`] trait, line-oriented
//! [`Session`]s, test case and result types, and the error taxonomy.
//!
//! # Key types
//!
//! - [`Transport`] / [`Connect`] -- byte channel and session factory
//! - [`Session`] -- line send/receive with bounded waits
//! - [`TestCase`], [`TestResult`], [`ModuleResult`] -- what to check and what happened
//! - [`RunEvent`] -- run progress notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;
pub mod line;
pub mod session;
pub mod transport;
pub mod types;

pub use error::{ConnectionFailure, Error, FailureKind, Result};
pub use events::{ModuleState, RunEvent};
pub use session::{Session, SessionState};
pub use transport::{Connect, Transport};
pub use types::*;
