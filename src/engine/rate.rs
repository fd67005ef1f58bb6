use rand::{thread_rng, Rng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Instant};

/// Token bucket for new connections: `fill_rate` tokens, refilled once per second.
#[derive(Clone)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    fill_rate: u32,
    last_refill: Arc<tokio::sync::Mutex<Instant>>,
}

impl RateLimiter {
    pub fn new(fill_rate: u32) -> Self {
        let fill_rate = fill_rate.max(1);
        let permits = Arc::new(Semaphore::new(fill_rate as usize));
        Self {
            permits,
            fill_rate,
            last_refill: Arc::new(tokio::sync::Mutex::new(Instant::now())),
        }
    }

    /// Waits for a token and consumes it.
    pub async fn acquire(&self) {
        loop {
            self.refill().await;
            if let Ok(permit) = self.permits.try_acquire() {
                permit.forget();
                return;
            }
            sleep(self.poll_interval()).await;
        }
    }

    async fn refill(&self) {
        let mut guard = self.last_refill.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(*guard);
        if elapsed >= Duration::from_secs(1) {
            let to_add = self
                .fill_rate
                .saturating_sub(self.permits.available_permits() as u32);
            if to_add > 0 {
                self.permits.add_permits(to_add as usize);
            }
            *guard = now;
        }
    }

    fn poll_interval(&self) -> Duration {
        (Duration::from_secs(1) / self.fill_rate).max(Duration::from_millis(1))
    }

    pub async fn sleep_jitter(&self) {
        let jitter_ms: u64 = thread_rng().gen_range(5..20);
        sleep(Duration::from_millis(jitter_ms)).await;
    }
}
