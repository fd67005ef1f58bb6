pub mod rate;
pub mod scan;

use crate::model::{Config, ScanOutcome};
use crate::output::OutputChannel;
use crate::ssh::ProbeError;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use rate::RateLimiter;
use scan::{SshProcessor, TargetProcessor};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

pub struct Engine {
    cfg: Arc<Config>,
    sink: OutputChannel,
    limiter: RateLimiter,
    sem: Arc<Semaphore>,
    processor: Arc<dyn TargetProcessor>,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(cfg: Config, sink: OutputChannel) -> anyhow::Result<Self> {
        Self::with_processor(cfg, sink, Arc::new(SshProcessor))
    }

    pub fn with_processor(
        cfg: Config,
        sink: OutputChannel,
        processor: Arc<dyn TargetProcessor>,
    ) -> anyhow::Result<Self> {
        if cfg.concurrency == 0 {
            anyhow::bail!("concurrency must be greater than zero");
        }
        Ok(Self {
            limiter: RateLimiter::new(cfg.rate),
            sem: Arc::new(Semaphore::new(cfg.concurrency)),
            cfg: Arc::new(cfg),
            sink,
            processor,
            cancel: CancellationToken::new(),
        })
    }

    /// Cancelling this token stops reading targets and aborts every in-flight probe.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[instrument(skip(self))]
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut stream = crate::input::stream_targets(&self.cfg)?;
        let mut tasks = FuturesUnordered::new();

        loop {
            let target = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("scan cancelled, no further targets will be dialed");
                    break;
                }
                next = stream.next() => match next {
                    Some(target) => target,
                    None => break,
                },
            };

            self.limiter.acquire().await;
            let permit = self.sem.clone().acquire_owned().await?;
            let cfg = self.cfg.clone();
            let sink = self.sink.clone();
            let processor = self.processor.clone();
            let cancel = self.cancel.child_token();
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                let view = target.clone();
                let worker =
                    tokio::spawn(async move { processor.process_target(target, cfg, cancel).await });
                let outcome = match worker.await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        error!(target = %view.resolved, error = %err, "probe task failed");
                        ScanOutcome::failed(&view, &ProbeError::Internal(err.to_string()))
                    }
                };
                if let Err(err) = sink.emit(outcome).await {
                    warn!(target = %view.resolved, error = %err, "dropping scan outcome");
                }
            }));

            self.limiter.sleep_jitter().await;
        }

        while let Some(joined) = tasks.next().await {
            if let Err(err) = joined {
                error!(error = %err, "scan task failed");
            }
        }
        self.sink.shutdown().await
    }
}
