//! Single-run watch loop

use std::fmt;

use tracing::{error, info};

use crate::models::{Breach, RunStatus};

use super::{Verdict, WatchContext};

/// How a run watch ended
#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    /// The run left the running state on its own
    Finished(RunStatus),
    /// The run was stopped for a breach
    Stopped(Breach),
    /// Shutdown was requested
    Cancelled,
}

impl fmt::Display for WatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Finished(status) => write!(f, "finished with status {status}"),
            Self::Stopped(breach) => write!(f, "stopped: {breach}"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Where a [`RunWatcher`] is in its cycle
#[derive(Debug, Clone, PartialEq)]
pub enum WatchState {
    /// About to fetch the run
    Polling,
    /// Waiting one interval before the next fetch
    Continuing,
    /// Notifying and terminating; shutdown does not interrupt this
    Stopping(Breach),
    /// Done
    Terminated(WatchOutcome),
}

/// Follows one run until it ends, breaches, or shutdown
pub struct RunWatcher {
    run_id: String,
    ctx: WatchContext,
    state: WatchState,
    failed_polls: u32,
}

impl RunWatcher {
    /// Start in [`WatchState::Polling`]
    pub fn new(run_id: impl Into<String>, ctx: WatchContext) -> Self {
        Self {
            run_id: run_id.into(),
            ctx,
            state: WatchState::Polling,
            failed_polls: 0,
        }
    }

    /// Watched run
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Current state
    pub fn state(&self) -> &WatchState {
        &self.state
    }

    /// Fetches that failed so far
    pub fn failed_polls(&self) -> u32 {
        self.failed_polls
    }

    /// Advance one transition
    pub async fn step(&mut self) -> &WatchState {
        let next = match std::mem::replace(&mut self.state, WatchState::Polling) {
            WatchState::Polling => self.poll().await,
            WatchState::Continuing => {
                if self.ctx.pause().await {
                    WatchState::Polling
                } else {
                    WatchState::Terminated(WatchOutcome::Cancelled)
                }
            }
            WatchState::Stopping(breach) => {
                self.ctx.stop_run(&self.run_id, &breach).await;
                WatchState::Terminated(WatchOutcome::Stopped(breach))
            }
            done @ WatchState::Terminated(_) => done,
        };

        self.state = next;
        &self.state
    }

    /// Drive the watch to completion
    pub async fn run(mut self) -> WatchOutcome {
        info!(
            run_id = %self.run_id,
            interval_secs = self.ctx.settings().poll_interval.as_secs(),
            "Monitoring run"
        );

        loop {
            if let WatchState::Terminated(outcome) = self.step().await {
                return outcome.clone();
            }
        }
    }

    async fn poll(&mut self) -> WatchState {
        if self.ctx.is_shutting_down() {
            return WatchState::Terminated(WatchOutcome::Cancelled);
        }

        let snapshot = match self.ctx.tracking().get_run(&self.run_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.failed_polls += 1;
                error!(
                    run_id = %self.run_id,
                    error = %e,
                    transient = e.is_transient(),
                    failed_polls = self.failed_polls,
                    "Error fetching run details"
                );
                return WatchState::Continuing;
            }
        };

        match self.ctx.judge(&snapshot) {
            Verdict::Ended(status) => {
                info!(
                    run_id = %self.run_id,
                    status = %status,
                    "Run is no longer active, stopping monitoring"
                );
                WatchState::Terminated(WatchOutcome::Finished(status))
            }
            Verdict::Healthy => {
                info!(
                    run_id = %self.run_id,
                    metrics = snapshot.metrics.len(),
                    "Metrics within thresholds"
                );
                WatchState::Continuing
            }
            Verdict::Breached(breach) => WatchState::Stopping(breach),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testing::{running, snapshot, stub_gateway, MockTracking};
    use crate::watcher::WatchSettings;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    const INTERVAL: Duration = Duration::from_secs(30);

    struct Harness {
        tracking: Arc<MockTracking>,
        telegram: Arc<Mutex<Vec<String>>>,
        shutdown: CancellationToken,
        watcher: RunWatcher,
    }

    fn harness(terminate_error: Option<Error>) -> Harness {
        let tracking = Arc::new(MockTracking::new());
        if let Some(e) = terminate_error {
            tracking.fail_terminate(e);
        }
        let (gateway, telegram, _) = stub_gateway(false, false);
        let shutdown = CancellationToken::new();
        let ctx = WatchContext::new(
            tracking.clone(),
            Arc::new(gateway),
            [("loss", 0.5), ("val_loss", 0.6)].into_iter().collect(),
            WatchSettings {
                poll_interval: INTERVAL,
                ..WatchSettings::default()
            },
            shutdown.clone(),
        );

        Harness {
            tracking,
            telegram,
            shutdown,
            watcher: RunWatcher::new("r1", ctx),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_waits_once_then_retries() {
        let mut h = harness(None);
        h.tracking
            .push_run(Err(Error::tracking(500, "boom")))
            .push_run(Ok(snapshot("r1", RunStatus::Finished, &[])));

        assert_eq!(h.watcher.step().await, &WatchState::Continuing);
        assert_eq!(h.watcher.failed_polls(), 1);

        let started = Instant::now();
        let outcome = h.watcher.run().await;

        assert_eq!(outcome, WatchOutcome::Finished(RunStatus::Finished));
        assert_eq!(started.elapsed(), INTERVAL);
        assert_eq!(h.tracking.get_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_run_is_polled_until_it_finishes() {
        let h = harness(None);
        h.tracking
            .push_run(Ok(running("r1", &[("loss", 0.2)])))
            .push_run(Ok(running("r1", &[("loss", 0.3)])))
            .push_run(Ok(snapshot("r1", RunStatus::Failed, &[("loss", 0.9)])));

        let started = Instant::now();
        let outcome = h.watcher.run().await;

        assert_eq!(outcome, WatchOutcome::Finished(RunStatus::Failed));
        assert_eq!(started.elapsed(), INTERVAL * 2);
        assert!(h.telegram.lock().unwrap().is_empty());
        assert!(h.tracking.terminated().is_empty());
    }

    #[tokio::test]
    async fn test_breach_goes_through_stopping() {
        let mut h = harness(None);
        h.tracking
            .push_run(Ok(running("r1", &[("loss", 0.7), ("val_loss", 0.4)])));

        let expected = Breach::new("loss", 0.7, 0.5);
        assert_eq!(
            h.watcher.step().await,
            &WatchState::Stopping(expected.clone())
        );
        assert_eq!(
            h.watcher.step().await,
            &WatchState::Terminated(WatchOutcome::Stopped(expected))
        );

        assert_eq!(
            h.telegram.lock().unwrap().as_slice(),
            ["🚫 Stopping run r1: Metric loss = 0.7000 exceeded threshold 0.5000"]
        );
        assert_eq!(h.tracking.terminated(), vec!["r1"]);
    }

    #[tokio::test]
    async fn test_terminate_failure_still_terminates_watch() {
        let h = harness(Some(Error::tracking(403, "forbidden")));
        h.tracking.push_run(Ok(running("r1", &[("loss", 1.0)])));

        let outcome = h.watcher.run().await;

        assert_eq!(outcome, WatchOutcome::Stopped(Breach::new("loss", 1.0, 0.5)));
        assert_eq!(h.tracking.get_calls(), 1);
    }

    #[tokio::test]
    async fn test_finished_run_is_not_notified() {
        let h = harness(None);
        h.tracking
            .push_run(Ok(snapshot("r1", RunStatus::Finished, &[("loss", 99.0)])));

        let outcome = h.watcher.run().await;

        assert_eq!(outcome, WatchOutcome::Finished(RunStatus::Finished));
        assert!(h.telegram.lock().unwrap().is_empty());
        assert!(h.tracking.terminated().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_wait() {
        let mut h = harness(None);
        h.tracking.push_run(Ok(running("r1", &[("loss", 0.1)])));

        assert_eq!(h.watcher.step().await, &WatchState::Continuing);

        h.shutdown.cancel();
        let started = Instant::now();
        let outcome = h.watcher.run().await;

        assert_eq!(outcome, WatchOutcome::Cancelled);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(h.tracking.get_calls(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_does_not_abort_stopping() {
        let mut h = harness(None);
        h.tracking.push_run(Ok(running("r1", &[("val_loss", 0.9)])));

        assert!(matches!(h.watcher.step().await, WatchState::Stopping(_)));
        h.shutdown.cancel();

        let outcome = h.watcher.run().await;

        assert_eq!(
            outcome,
            WatchOutcome::Stopped(Breach::new("val_loss", 0.9, 0.6))
        );
        assert_eq!(h.tracking.terminated(), vec!["r1"]);
    }
}
