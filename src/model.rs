use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::ssh::{HandshakeLog, ProbeConfig, ProbeError, ScanStatus};

pub const DEFAULT_PORT: u16 = 22;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetSpec {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct Target {
    pub original: TargetSpec,
    pub resolved: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub target: Option<TargetSpec>,
    pub input: Option<String>,
    /// Port for input lines that name only a host.
    pub default_port: u16,
    pub concurrency: usize,
    pub rate: u32,
    pub connect_timeout: Duration,
    pub probe: ProbeConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    pub format: OutputFormat,
    /// Stdout when unset.
    pub file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jsonl,
    Pretty,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Jsonl => write!(f, "jsonl"),
            OutputFormat::Pretty => write!(f, "pretty"),
        }
    }
}

/// One line of output: where the probe went, how it ended and what it saw.
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub ip: String,
    pub host: String,
    pub port: u16,
    pub timestamp: String,
    pub status: ScanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_ms: Option<u128>,
    pub data: HandshakeLog,
}

impl ScanOutcome {
    pub fn new(
        target: &Target,
        log: HandshakeLog,
        error: Option<&ProbeError>,
        connect_ms: Option<u128>,
    ) -> Self {
        Self {
            ip: target.resolved.ip().to_string(),
            host: target.original.host.clone(),
            port: target.resolved.port(),
            timestamp: crate::util::now_iso8601(),
            status: ScanStatus::classify(error),
            error: error.map(|err| err.to_string()),
            connect_ms,
            data: log,
        }
    }

    /// Outcome for a probe that produced nothing but an error.
    pub fn failed(target: &Target, error: &ProbeError) -> Self {
        Self::new(target, HandshakeLog::new(), Some(error), None)
    }
}
