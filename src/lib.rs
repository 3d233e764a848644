//! opsdesk: REST backends for a ticket manager and a read-only database
//! query tool.
//!
//! Both apps share the HTTP plumbing in [`web`] and the environment-driven
//! settings in [`config`]. The binary in `main.rs` serves one app per
//! process.

pub mod config;
pub mod dbquery;
pub mod tickets;
pub mod web;

pub use config::{QueryToolConfig, TicketsConfig};
pub use web::{WebError, shutdown_signal};
