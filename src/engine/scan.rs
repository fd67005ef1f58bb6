use crate::model::{Config, ScanOutcome, Target};
use crate::ssh::{HandshakeDriver, HandshakeLog, ProbeConfig, ProbeError};
use async_trait::async_trait;
use std::io;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[async_trait]
pub trait TargetProcessor: Send + Sync {
    async fn process_target(
        &self,
        target: Target,
        cfg: Arc<Config>,
        cancel: CancellationToken,
    ) -> ScanOutcome;
}

/// Dials the target over TCP and runs the SSH handshake probe on the connection.
#[derive(Clone, Debug, Default)]
pub struct SshProcessor;

#[async_trait]
impl TargetProcessor for SshProcessor {
    async fn process_target(
        &self,
        target: Target,
        cfg: Arc<Config>,
        cancel: CancellationToken,
    ) -> ScanOutcome {
        let started = Instant::now();
        let result = scan(target.resolved, cfg.connect_timeout, &cfg.probe, &cancel).await;
        debug!(
            target = %target.resolved,
            status = %result.status(),
            ms = started.elapsed().as_millis(),
            "processed target"
        );
        ScanOutcome::new(
            &target,
            result.log,
            result.error.as_ref(),
            result.connect_ms,
        )
    }
}

/// Everything one probe produced. The log is kept even when the probe failed.
#[derive(Debug)]
pub struct ScanResult {
    pub log: HandshakeLog,
    pub error: Option<ProbeError>,
    pub connect_ms: Option<u128>,
}

impl ScanResult {
    pub fn status(&self) -> crate::ssh::ScanStatus {
        crate::ssh::ScanStatus::classify(self.error.as_ref())
    }
}

/// Probes one address over TCP. Cancellation aborts any in-flight I/O and drops the connection.
pub async fn scan(
    addr: SocketAddr,
    connect_timeout: Duration,
    probe: &ProbeConfig,
    cancel: &CancellationToken,
) -> ScanResult {
    scan_with(addr, connect_timeout, probe, cancel, |addr| TcpStream::connect(addr)).await
}

/// Like [`scan`], with the connection opened by `connect`.
pub async fn scan_with<C, F, S>(
    addr: SocketAddr,
    connect_timeout: Duration,
    probe: &ProbeConfig,
    cancel: &CancellationToken,
    connect: C,
) -> ScanResult
where
    C: FnOnce(SocketAddr) -> F,
    F: Future<Output = io::Result<S>>,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut log = HandshakeLog::new();
    let mut connect_ms = None;
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProbeError::Cancelled),
        res = dial_and_probe(addr, connect_timeout, probe, connect, &mut log, &mut connect_ms) => res,
    };
    ScanResult {
        log,
        error: outcome.err(),
        connect_ms,
    }
}

async fn dial_and_probe<C, F, S>(
    addr: SocketAddr,
    connect_timeout: Duration,
    probe: &ProbeConfig,
    connect: C,
    log: &mut HandshakeLog,
    connect_ms: &mut Option<u128>,
) -> Result<(), ProbeError>
where
    C: FnOnce(SocketAddr) -> F,
    F: Future<Output = io::Result<S>>,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let dial_start = Instant::now();
    let mut stream = match timeout(connect_timeout, connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => return Err(ProbeError::Dial(err)),
        Err(_) => return Err(ProbeError::DialTimeout(connect_timeout)),
    };
    *connect_ms = Some(dial_start.elapsed().as_millis());

    let deadline = Instant::now() + probe.timeout();
    let result = HandshakeDriver::new(probe)
        .run(&mut stream, log, deadline)
        .await;
    close(&mut stream, addr).await;
    result
}

async fn close<S>(stream: &mut S, addr: SocketAddr)
where
    S: AsyncWrite + Unpin,
{
    if let Err(err) = stream.shutdown().await {
        if err.kind() != io::ErrorKind::NotConnected {
            warn!(target = %addr, error = %err, "failed to close connection");
        }
    }
}
