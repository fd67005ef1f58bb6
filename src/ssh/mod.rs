//! SSH handshake probe.
//!
//! [`config::ProbeConfig`] is assembled once per run from operator input,
//! [`driver::HandshakeDriver`] runs the partial handshake against one target and fills a
//! [`log::HandshakeLog`], and [`status::ScanStatus::classify`] turns the outcome into a status.

pub mod algorithms;
pub mod config;
pub mod driver;
pub mod error;
pub mod log;
pub mod status;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigError, HostKeyPolicy, ProbeConfig, ProbeOptions};
pub use driver::HandshakeDriver;
pub use error::{Phase, ProbeError};
pub use log::HandshakeLog;
pub use status::ScanStatus;
