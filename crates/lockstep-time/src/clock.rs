//! Clock and sleep abstraction
//!
//! The protocols coordinate through wall-clock sleeps, so the clock is
//! injected: `SystemClock` for deployments, `ManualClock` for tests that
//! must not spend real time.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Future returned by [`Clock::sleep`].
pub type SleepFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Source of wall-clock time and sleeps.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now_unix(&self) -> f64;

    /// Sleep for a duration.
    fn sleep(&self, duration: Duration) -> SleepFuture<'_>;

    /// Sleep until a unix-seconds deadline; returns immediately if the
    /// deadline has passed.
    fn sleep_until_unix(&self, deadline: f64) -> SleepFuture<'_> {
        let remaining = deadline - self.now_unix();
        if remaining <= 0.0 {
            return Box::pin(std::future::ready(()));
        }
        self.sleep(Duration::from_secs_f64(remaining))
    }
}

/// The real wall clock, sleeping on the tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> f64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(since) => since.as_secs_f64(),
            // Pre-1970 system clocks read as the epoch itself.
            Err(_) => 0.0,
        }
    }

    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// A clock that only moves when told to, or when something sleeps on it.
///
/// Sleeps complete immediately and advance the clock by the requested
/// duration, so protocol code runs to completion without real delays while
/// still observing a consistent timeline.
#[derive(Debug)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    pub fn new(start_unix: f64) -> Self {
        ManualClock {
            micros: AtomicU64::new((start_unix * 1e6) as u64),
        }
    }

    /// Move the clock forward without sleeping.
    pub fn advance(&self, duration: Duration) {
        self.micros
            .fetch_add(duration.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1e6
    }

    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        self.advance(duration);
        Box::pin(std::future::ready(()))
    }
}
