use crate::model::{OutputConfig, OutputFormat, ScanOutcome};
use crate::ssh::HandshakeLog;
use crate::util::sanitize_text;
use anyhow::Context;
use std::fs::File;
use std::io::{BufWriter, Write};

pub struct OutputSink {
    format: OutputFormat,
    writer: BufWriter<Box<dyn Write + Send>>,
}

impl OutputSink {
    pub fn new(cfg: &OutputConfig) -> anyhow::Result<Self> {
        let target: Box<dyn Write + Send> = match &cfg.file {
            Some(path) => Box::new(
                File::create(path)
                    .with_context(|| format!("cannot create output file {}", path.display()))?,
            ),
            None => Box::new(std::io::stdout()),
        };
        Ok(Self::from_writer(cfg.format, target))
    }

    pub fn from_writer(format: OutputFormat, writer: Box<dyn Write + Send>) -> Self {
        Self {
            format,
            writer: BufWriter::new(writer),
        }
    }

    pub fn write_outcome(&mut self, outcome: &ScanOutcome) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Jsonl => {
                let line = serde_json::to_string(outcome)?;
                writeln!(self.writer, "{line}")?;
            }
            OutputFormat::Pretty => write_pretty(&mut self.writer, outcome)?,
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

fn write_pretty(w: &mut impl Write, outcome: &ScanOutcome) -> std::io::Result<()> {
    writeln!(
        w,
        "{} {} ({}) -> {}",
        outcome.host, outcome.port, outcome.ip, outcome.status
    )?;
    let log: &HandshakeLog = &outcome.data;
    if let Some(banner) = &log.banner {
        writeln!(w, "  banner: {}", sanitize_text(banner))?;
    }
    if let Some(selection) = &log.algorithm_selection {
        writeln!(w, "  kex: {}", selection.kex)?;
        writeln!(w, "  host key algorithm: {}", selection.host_key)?;
        let c2s = &selection.client_to_server;
        writeln!(
            w,
            "  cipher: {} (mac: {})",
            c2s.cipher,
            c2s.mac.as_deref().unwrap_or("implicit")
        )?;
    }
    if let Some(key) = &log.server_host_key {
        writeln!(w, "  host key: {} {}", key.key_type, key.fingerprint_sha256)?;
    }
    if let Some(extensions) = &log.server_extensions {
        let names: Vec<&str> = extensions.iter().map(|ext| ext.name.as_str()).collect();
        writeln!(w, "  extensions: {}", names.join(", "))?;
    }
    if let Some(methods) = &log.userauth {
        writeln!(w, "  auth methods: {}", methods.join(", "))?;
    }
    if let Some(banner) = &log.userauth_banner {
        writeln!(w, "  auth banner: {}", sanitize_text(banner.trim_end()))?;
    }
    if let Some(error) = &outcome.error {
        writeln!(w, "  error: {error}")?;
    }
    Ok(())
}
