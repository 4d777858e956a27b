//! mountlink-protocol: the mount-control command set and exchange logic.
//!
//! - [`Command`]: the controller's command vocabulary
//! - [`protocol`]: reply decoding (`#` sentinel, JSON payloads, angles)
//! - [`ProtocolClient`]: runs one command/response exchange and classifies it
//!   as pass, fail, timeout, or error

pub mod client;
pub mod command;
pub mod protocol;

pub use client::{Exchange, ProtocolClient};
pub use command::Command;
pub use protocol::Reply;
