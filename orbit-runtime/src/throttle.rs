//! Interruptible sleep and error-driven throttling (spec.md §4.12).
//!
//! Grounded on `kube_runtime::utils::stream_backoff::StreamBackoff` (wraps a
//! stream, restarts it through a `Backoff` after errors) and
//! `kube_runtime::utils::backoff_reset_timer::BackoffResetTimer` (resets the
//! sequence after a quiet period), plus `kube_runtime::lease::sleep`'s
//! interruptible sleep-until-deadline for the wakeup-signal half.

use backon::{BackoffBuilder, ExponentialBuilder};
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Sleep up to the smallest positive delay in `delays`, waking early if
/// `wakeup` changes. Returns `None` if the full delay elapsed, `Some(remaining)`
/// if interrupted (spec.md §4.12 "sleep_or_wait").
pub async fn sleep_or_wait(delays: &[Duration], wakeup: &mut watch::Receiver<bool>) -> Option<Duration> {
    let delay = delays.iter().copied().filter(|d| !d.is_zero()).min()?;
    let deadline = Instant::now() + delay;
    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => None,
        _ = wakeup.changed() => Some(deadline.saturating_duration_since(Instant::now())),
    }
}

/// A stateful backoff wrapper protecting a critical loop (spec.md §4.12
/// "Throttler"). Scoped state: `active_until` (sleep before next attempt),
/// `source_of_delays` (the in-progress backoff sequence), `last_used_delay`.
pub struct Throttler {
    seed: ExponentialBuilder,
    active_until: Mutex<Option<Instant>>,
    sequence: Mutex<Option<Box<dyn Iterator<Item = Duration> + Send>>>,
    last_used_delay: Mutex<Option<Duration>>,
}

impl Throttler {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        let seed = ExponentialBuilder::default()
            .with_min_delay(min_delay)
            .with_max_delay(max_delay)
            .without_max_times();
        Self {
            seed,
            active_until: Mutex::new(None),
            sequence: Mutex::new(None),
            last_used_delay: Mutex::new(None),
        }
    }

    pub fn last_used_delay(&self) -> Option<Duration> {
        *self.last_used_delay.lock()
    }

    /// Run `body` once: sleep out any pending `active_until` first; on
    /// success, reset state; on error, advance the backoff sequence and
    /// arm `active_until` for the next call.
    pub async fn guard<F, Fut, T, E>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let until = *self.active_until.lock();
        if let Some(until) = until {
            tokio::time::sleep_until(until).await;
        }
        match body().await {
            Ok(v) => {
                *self.active_until.lock() = None;
                *self.sequence.lock() = None;
                *self.last_used_delay.lock() = None;
                Ok(v)
            }
            Err(e) => {
                let mut sequence = self.sequence.lock();
                let iter = sequence.get_or_insert_with(|| Box::new(self.seed.clone().build()));
                let delay = iter.next().unwrap_or_else(|| self.last_used_delay().unwrap_or(Duration::from_secs(1)));
                drop(sequence);
                *self.last_used_delay.lock() = Some(delay);
                *self.active_until.lock() = Some(Instant::now() + delay);
                Err(e)
            }
        }
    }
}
