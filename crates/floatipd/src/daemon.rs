//! Daemon lifecycle - the periodic control loop and its teardown

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use floatip_common::FipError;
use parking_lot::Mutex as StateLock;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::{FatalError, FatalResult};
use crate::reconciler::{DrainReport, Reconciler, TickReport};
use crate::ticker::Ticker;

/// Lifecycle of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    /// Ticking on the poll interval
    Running,
    /// Tearing down chains and addresses
    Draining,
    /// Drain finished
    Terminated,
}

/// Daemon
///
/// Runs [`Reconciler::tick`] on every tick of a [`Ticker`] and drains once the
/// loop ends, whether by cancellation or by a fatal error. Ticks and the
/// drain share one exclusive lock, so a drain never overlaps a tick.
pub struct Daemon {
    reconciler: Arc<Mutex<Reconciler>>,
    poll_interval: Duration,
    state: StateLock<DaemonState>,
    ticks: AtomicU64,
}

impl Daemon {
    pub fn new(reconciler: Reconciler, poll_interval: Duration) -> Self {
        Self {
            reconciler: Arc::new(Mutex::new(reconciler)),
            poll_interval,
            state: StateLock::new(DaemonState::Running),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> DaemonState {
        *self.state.lock()
    }

    /// Number of completed ticks.
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: DaemonState) {
        info!("Daemon state: {:?}", state);
        *self.state.lock() = state;
    }

    /// One tick in its own task, so a panic surfaces as a fatal error
    /// instead of unwinding through the loop.
    async fn tick_once(&self) -> FatalResult<TickReport> {
        let reconciler = Arc::clone(&self.reconciler);
        let handle = tokio::spawn(async move {
            let guard = reconciler.lock().await;
            guard.tick().await
        });

        match handle.await {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => Err(FatalError::new(
                "reconcile tick",
                FipError::internal("reconcile task panicked"),
            )),
            Err(join_error) => Err(FatalError::new(
                "reconcile tick",
                FipError::internal(join_error.to_string()),
            )),
        }
    }

    /// Drains under the reconciler lock.
    async fn drain(&self) -> DrainReport {
        self.set_state(DaemonState::Draining);
        let report = self.reconciler.lock().await.drain().await;
        self.set_state(DaemonState::Terminated);
        report
    }

    /// Runs until `token` is cancelled or a tick fails fatally, then drains.
    ///
    /// Cancellation is only observed between ticks. Returns the fatal error,
    /// if any, after the drain.
    pub async fn run(&self, token: CancellationToken) -> FatalResult<()> {
        let mut ticker = Ticker::new(self.poll_interval, token);
        info!(
            poll_interval = ?self.poll_interval,
            "Starting reconcile loop"
        );

        let outcome = loop {
            if !ticker.next().await {
                info!("Reconcile loop cancelled");
                break Ok(());
            }
            match self.tick_once().await {
                Ok(_) => {
                    self.ticks.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    error!(error = %e, "Fatal error, stopping reconcile loop");
                    break Err(e);
                }
            }
        };

        self.drain().await;
        outcome
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("poll_interval", &self.poll_interval)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::{HostHandles, ReconcileOptions};
    use async_trait::async_trait;
    use floatip_common::{BindingSource, DesiredState};
    use floatip_test::{HostVerifier, TestHost, IFACE, PRIMARY};

    fn handles(host: &TestHost) -> HostHandles {
        HostHandles {
            link: host.link.clone(),
            nat: host.iptables.clone(),
            source: host.source.clone(),
        }
    }

    async fn daemon(host: &TestHost) -> Daemon {
        let reconciler = Reconciler::start(
            Some(IFACE.to_string()),
            handles(host),
            ReconcileOptions::default(),
        )
        .await
        .unwrap();
        Daemon::new(reconciler, Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_drains_on_cancel() {
        let host = TestHost::new();
        host.source.set_bindings(&[("10.0.0.5", "10.0.0.10")]);
        let daemon = daemon(&host).await;
        assert_eq!(daemon.state(), DaemonState::Running);

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            canceller.cancel();
        });

        daemon.run(token).await.unwrap();
        assert_eq!(daemon.state(), DaemonState::Terminated);
        assert_eq!(daemon.tick_count(), 3);

        let verifier = HostVerifier::new(&host);
        verifier.assert_bindings(&[]).unwrap();
        verifier.assert_addresses(&[PRIMARY]).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_tick_stops_loop_and_drains() {
        let host = TestHost::new();
        host.source.set_bindings(&[("10.0.0.5", "10.0.0.10")]);
        let daemon = daemon(&host).await;
        host.iptables.fail_inserts(true);

        let err = daemon.run(CancellationToken::new()).await.unwrap_err();
        assert!(err.operation.contains("insert forward rule"));
        assert_eq!(daemon.state(), DaemonState::Terminated);
        assert_eq!(daemon.tick_count(), 0);
        HostVerifier::new(&host).assert_addresses(&[PRIMARY]).unwrap();
    }

    struct PanickingSource;

    #[async_trait]
    impl BindingSource for PanickingSource {
        async fn load(&self) -> DesiredState {
            panic!("store exploded");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_tick_still_drains() {
        let host = TestHost::new();
        let mut parts = handles(&host);
        parts.source = Arc::new(PanickingSource);
        let reconciler =
            Reconciler::start(Some(IFACE.to_string()), parts, ReconcileOptions::default())
                .await
                .unwrap();
        host.link.seed_address(IFACE, "10.0.0.5/24");
        let daemon = Daemon::new(reconciler, Duration::from_secs(5));

        let err = daemon.run(CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("panicked"));
        assert_eq!(daemon.state(), DaemonState::Terminated);
        HostVerifier::new(&host).assert_addresses(&[PRIMARY]).unwrap();
    }
}
