//! Periodic update checks.
//!
//! The first check runs after an initial delay, then at a fixed interval.
//! Missed ticks (for example while the machine slept) are skipped rather than
//! replayed. Power events arrive on a channel and are applied to the
//! orchestrator as they come in, including while a cycle is running.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ScheduleConfig;
use crate::host::PowerEvent;
use crate::orchestrator::UpdateOrchestrator;

/// Capacity of the power event channel.
const POWER_EVENT_CAPACITY: usize = 16;

/// Handle for delivering power events to a running scheduler.
#[derive(Debug, Clone)]
pub struct PowerNotifier {
    tx: mpsc::Sender<PowerEvent>,
}

impl PowerNotifier {
    /// Deliver `event`; returns false once the scheduler has stopped.
    pub fn notify(&self, event: PowerEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(event = ?event, "power event queue full, dropping event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// The system is about to sleep.
    pub fn suspend(&self) -> bool {
        self.notify(PowerEvent::Suspend)
    }

    /// The system woke up.
    pub fn resume(&self) -> bool {
        self.notify(PowerEvent::Resume)
    }
}

/// Drives update checks on a timer.
pub struct CheckScheduler {
    orchestrator: Arc<UpdateOrchestrator>,
    initial_delay: Duration,
    interval: Duration,
    events: mpsc::Receiver<PowerEvent>,
}

impl CheckScheduler {
    /// Create a scheduler and the notifier that feeds it power events.
    pub fn new(
        orchestrator: Arc<UpdateOrchestrator>,
        schedule: &ScheduleConfig,
    ) -> (Self, PowerNotifier) {
        let (tx, events) = mpsc::channel(POWER_EVENT_CAPACITY);
        (
            Self {
                orchestrator,
                initial_delay: schedule.initial_delay(),
                interval: schedule.interval(),
                events,
            },
            PowerNotifier { tx },
        )
    }

    /// Run until `shutdown` becomes true.
    ///
    /// A running cycle is allowed to finish before shutdown is observed.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let start = Instant::now() + self.initial_delay;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            initial_delay_secs = self.initial_delay.as_secs(),
            interval_secs = self.interval.as_secs(),
            "update scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(event) = self.events.recv() => {
                    self.orchestrator.handle_power_event(event);
                }
                _ = ticker.tick() => {
                    while let Ok(event) = self.events.try_recv() {
                        self.orchestrator.handle_power_event(event);
                    }
                    self.run_check().await;
                }
            }
        }

        info!("update scheduler stopped");
    }

    /// Run one check, applying power events that arrive meanwhile.
    async fn run_check(&mut self) {
        let check = self.orchestrator.check_for_updates();
        tokio::pin!(check);

        loop {
            tokio::select! {
                biased;
                Some(event) = self.events.recv() => {
                    self.orchestrator.handle_power_event(event);
                }
                result = &mut check => {
                    match result {
                        Ok(outcome) => debug!(outcome = ?outcome, "scheduled check finished"),
                        Err(e) => debug!(error = %e, "scheduled check failed"),
                    }
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpdaterConfig;
    use crate::host::MapLocalizer;
    use crate::keys::TrustedKeySet;
    use crate::metadata::MetadataCodec;
    use crate::orchestrator::Collaborators;
    use crate::staging::Platform;
    use crate::testutil::{FakeDialog, FakeFetcher, FakeNativeUpdater, TestSigner};
    use semver::Version;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    struct Gate {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    fn gated_fetcher() -> (FakeFetcher, Gate) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let fetcher = FakeFetcher {
            gate: Some((Arc::clone(&entered), Arc::clone(&release))),
            ..FakeFetcher::default()
        };
        (fetcher, Gate { entered, release })
    }

    async fn orchestrator(temp: &TempDir, fetcher: FakeFetcher) -> Arc<UpdateOrchestrator> {
        let mut config = UpdaterConfig::default();
        config.app.temp_dir = Some(temp.path().to_path_buf());
        let keys = TrustedKeySet::from_encoded([TestSigner::from_seed(1).public_key_box()], true)
            .unwrap();

        Arc::new(
            UpdateOrchestrator::new(
                config,
                Version::new(1, 0, 0),
                Platform::Windows,
                MetadataCodec::new(Arc::new(keys)),
                Box::new(fetcher),
                Collaborators {
                    dialog: Box::new(FakeDialog::default()),
                    localizer: Box::new(MapLocalizer::english()),
                    native_updater: Box::new(FakeNativeUpdater::default()),
                },
            )
            .await,
        )
    }

    fn schedule(initial_delay_secs: u64, interval_secs: u64) -> ScheduleConfig {
        ScheduleConfig {
            initial_delay_secs,
            interval_secs,
            ..ScheduleConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_delay_then_interval() {
        let temp = TempDir::new().unwrap();
        let (fetcher, gate) = gated_fetcher();
        let orchestrator = orchestrator(&temp, fetcher.clone()).await;
        let (scheduler, _notifier) = CheckScheduler::new(orchestrator, &schedule(30, 3600));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let started = Instant::now();
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(fetcher.requests().is_empty());

        gate.entered.notified().await;
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(fetcher.requests().len(), 1);
        gate.release.notify_one();

        gate.entered.notified().await;
        assert!(started.elapsed() >= Duration::from_secs(30 + 3600));
        assert_eq!(fetcher.requests().len(), 2);
        gate.release.notify_one();

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_skips_scheduled_checks() {
        let temp = TempDir::new().unwrap();
        let (fetcher, gate) = gated_fetcher();
        let orchestrator = orchestrator(&temp, fetcher.clone()).await;
        let (scheduler, notifier) =
            CheckScheduler::new(Arc::clone(&orchestrator), &schedule(10, 60));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let started = Instant::now();
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        assert!(notifier.suspend());
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert!(orchestrator.state().is_suspended);
        assert!(fetcher.requests().is_empty());

        assert!(notifier.resume());
        gate.entered.notified().await;
        assert!(!orchestrator.state().is_suspended);
        assert!(started.elapsed() >= Duration::from_secs(70));
        assert_eq!(fetcher.requests().len(), 1);

        // Suspending mid-cycle does not cancel the running check.
        assert!(notifier.suspend());
        tokio::task::yield_now().await;
        gate.release.notify_one();

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(orchestrator.state().is_suspended);
        assert!(!orchestrator.state().is_running);
        assert_eq!(fetcher.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifier_reports_stopped_scheduler() {
        let temp = TempDir::new().unwrap();
        let orchestrator = orchestrator(&temp, FakeFetcher::default()).await;
        let (scheduler, notifier) = CheckScheduler::new(orchestrator, &schedule(10, 60));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(!notifier.suspend());
    }
}
