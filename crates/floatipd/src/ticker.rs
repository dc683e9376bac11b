//! Cancellable fixed-period tick source.

use std::time::Duration;

use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Yields a tick every `period` until its token is cancelled.
///
/// The first tick fires immediately. A tick that overruns the period delays
/// the following ones instead of bursting to catch up.
#[derive(Debug)]
pub struct Ticker {
    interval: Interval,
    token: CancellationToken,
}

impl Ticker {
    /// A zero `period` is raised to one millisecond.
    pub fn new(period: Duration, token: CancellationToken) -> Self {
        let mut interval = time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval, token }
    }

    /// Waits for the next tick. Returns `false` once cancelled, even if a
    /// tick is also due.
    pub async fn next(&mut self) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            () = self.token.cancelled() => false,
            _ = self.interval.tick() => true,
        }
    }
}
