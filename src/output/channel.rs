use crate::model::{OutputConfig, ScanOutcome};
use tokio::sync::mpsc;

use super::sink::OutputSink;

/// Queues outcomes for a blocking writer thread.
#[derive(Clone)]
pub struct OutputChannel {
    inner: std::sync::Arc<OutputInner>,
}

struct OutputInner {
    tx: tokio::sync::Mutex<Option<mpsc::Sender<OutputCommand>>>,
    handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

enum OutputCommand {
    Emit(Box<ScanOutcome>),
}

impl OutputChannel {
    pub fn new(cfg: OutputConfig) -> anyhow::Result<Self> {
        let mut sink = OutputSink::new(&cfg)?;
        let (tx, mut rx) = mpsc::channel(1024);
        let handle = tokio::task::spawn_blocking(move || {
            while let Some(cmd) = rx.blocking_recv() {
                if let Err(err) = match cmd {
                    OutputCommand::Emit(outcome) => sink.write_outcome(&outcome),
                } {
                    tracing::error!(error = %err, "failed to write scan outcome");
                }
            }
            if let Err(err) = sink.flush() {
                tracing::error!(error = %err, "failed to flush output");
            }
        });

        Ok(Self {
            inner: std::sync::Arc::new(OutputInner {
                tx: tokio::sync::Mutex::new(Some(tx)),
                handle: tokio::sync::Mutex::new(Some(handle)),
            }),
        })
    }

    pub async fn emit(&self, outcome: ScanOutcome) -> anyhow::Result<()> {
        let guard = self.inner.tx.lock().await;
        if let Some(tx) = guard.as_ref() {
            tx.send(OutputCommand::Emit(Box::new(outcome)))
                .await
                .map_err(|err| anyhow::anyhow!("output worker not available: {err}"))?
        } else {
            anyhow::bail!("output worker not available; dropping scan outcome");
        }
        Ok(())
    }

    /// Closes the queue and waits until everything queued has been written.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.inner.tx.lock().await.take();

        if let Some(handle) = self.inner.handle.lock().await.take() {
            handle
                .await
                .map_err(|err| anyhow::anyhow!("failed to join output worker: {err}"))?;
        }

        Ok(())
    }
}
