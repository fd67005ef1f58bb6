//! Asynchronous SSH handshake scanner.
//!
//! [`ssh`] holds the probe itself; [`engine`] fans it out over many targets with rate and
//! concurrency limits, and [`output`] writes one outcome per target.

#[cfg(feature = "cli")]
pub mod cli;
pub mod engine;
pub mod input;
pub mod model;
pub mod output;
pub mod ssh;
pub mod util;
