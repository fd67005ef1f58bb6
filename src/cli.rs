use crate::model::{OutputFormat, DEFAULT_PORT};
use crate::ssh::algorithms;
use crate::ssh::config::{
    DEFAULT_CLIENT_ID, DEFAULT_GEX_MAX_BITS, DEFAULT_GEX_MIN_BITS, DEFAULT_GEX_PREFERRED_BITS,
};
use crate::ssh::{ProbeConfig, ProbeOptions};
use anyhow::Context;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(author, version, about = "Async SSH handshake scanner", long_about = None)]
pub struct Cli {
    /// Single host to scan
    #[arg(short = 'H', long = "host", value_name = "HOST")]
    pub host: Option<String>,

    /// Port to scan, also used for input lines without a port
    #[arg(short = 'p', long = "port", value_name = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// File containing targets (one per line)
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    pub input: Option<String>,

    /// Concurrency limit
    #[arg(long = "concurrency", default_value_t = 64)]
    pub concurrency: usize,

    /// New connections per second (token bucket fill rate)
    #[arg(long = "rate", default_value_t = 64)]
    pub rate: u32,

    /// Connect timeout in milliseconds
    #[arg(long = "connect-timeout", default_value_t = 1500)]
    pub connect_timeout_ms: u64,

    /// Handshake timeout per target in milliseconds, counted from connect
    #[arg(long = "timeout", default_value_t = 10_000)]
    pub timeout_ms: u64,

    /// Output format
    #[arg(long = "output", default_value_t = OutputFormat::Jsonl)]
    pub output: OutputFormat,

    /// Human-readable output instead of JSONL
    #[arg(long = "pretty", action = ArgAction::SetTrue)]
    pub pretty: bool,

    /// Write results to this file instead of stdout
    #[arg(long = "output-file", value_name = "FILE")]
    pub output_file: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short = 'v', long = "verbose", action = ArgAction::SetTrue)]
    pub verbose: bool,

    /// Identification string sent to the server
    #[arg(long = "client", default_value = DEFAULT_CLIENT_ID)]
    pub client: String,

    /// Key exchange algorithms, in preference order
    #[arg(long = "kex-algorithms", default_value = algorithms::DEFAULT_KEX)]
    pub kex_algorithms: String,

    /// Host key algorithms, in preference order
    #[arg(long = "host-key-algorithms", default_value = algorithms::DEFAULT_HOST_KEYS)]
    pub host_key_algorithms: String,

    /// Ciphers, in preference order
    #[arg(long = "ciphers", default_value = algorithms::DEFAULT_CIPHERS)]
    pub ciphers: String,

    /// MACs, in preference order
    #[arg(long = "macs", default_value = algorithms::DEFAULT_MACS)]
    pub macs: String,

    /// Collect the server's EXT_INFO extensions
    #[arg(long = "extensions", action = ArgAction::SetTrue)]
    pub extensions: bool,

    /// Ask for the server's authentication methods
    #[arg(long = "userauth", action = ArgAction::SetTrue)]
    pub userauth: bool,

    /// Smallest group size to accept in group exchange, in bits
    #[arg(long = "gex-min-bits", default_value_t = DEFAULT_GEX_MIN_BITS)]
    pub gex_min_bits: u32,

    /// Largest group size to accept in group exchange, in bits
    #[arg(long = "gex-max-bits", default_value_t = DEFAULT_GEX_MAX_BITS)]
    pub gex_max_bits: u32,

    /// Preferred group size in group exchange, in bits
    #[arg(long = "gex-preferred-bits", default_value_t = DEFAULT_GEX_PREFERRED_BITS)]
    pub gex_preferred_bits: u32,

    /// Stop after the identification exchange
    #[arg(long = "hello-only", action = ArgAction::SetTrue)]
    pub hello_only: bool,
}

impl Cli {
    pub fn into_config(self) -> anyhow::Result<crate::model::Config> {
        if self.host.is_none() && self.input.is_none() {
            anyhow::bail!("either --host or --input is required");
        }

        if self.host.is_some() && self.input.is_some() {
            anyhow::bail!("--host and --input are mutually exclusive");
        }

        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be greater than zero");
        }

        if self.rate == 0 {
            anyhow::bail!("rate must be greater than zero");
        }

        if self.connect_timeout_ms == 0 {
            anyhow::bail!("connect timeout must be greater than zero");
        }

        let options = ProbeOptions {
            client_id: self.client,
            kex_algorithms: self.kex_algorithms,
            host_key_algorithms: self.host_key_algorithms,
            ciphers: self.ciphers,
            macs: self.macs,
            hello_only: self.hello_only,
            collect_extensions: self.extensions,
            collect_userauth: self.userauth,
            gex_min_bits: self.gex_min_bits,
            gex_max_bits: self.gex_max_bits,
            gex_preferred_bits: self.gex_preferred_bits,
            timeout: Duration::from_millis(self.timeout_ms),
        };
        let probe = ProbeConfig::assemble(&options).context("invalid ssh options")?;

        Ok(crate::model::Config {
            target: self.host.map(|host| crate::model::TargetSpec {
                host,
                port: self.port,
            }),
            input: self.input,
            default_port: self.port,
            concurrency: self.concurrency,
            rate: self.rate,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            probe,
            output: crate::model::OutputConfig {
                format: if self.pretty {
                    OutputFormat::Pretty
                } else {
                    self.output
                },
                file: self.output_file,
            },
        })
    }
}
