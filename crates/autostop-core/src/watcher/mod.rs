//! Watch loops
//!
//! A [`RunWatcher`] follows one run until it ends or is stopped. A
//! [`FleetWatcher`] rescans an experiment, or the whole tracking server,
//! every interval and judges every run it finds. Both share a
//! [`WatchContext`] holding the clients, the threshold table and the
//! shutdown token.

mod fleet;
mod run;

pub use fleet::{CycleReport, FleetScanner, FleetWatcher};
pub use run::{RunWatcher, WatchOutcome, WatchState};

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::alerting::{evaluate, ChannelSelection, NotificationGateway};
use crate::models::{Breach, Decision, RunSnapshot, RunStatus, ThresholdTable};
use crate::tracking::TrackingClient;

/// Knobs shared by every watch loop
#[derive(Debug, Clone)]
pub struct WatchSettings {
    /// Pause between polls
    pub poll_interval: Duration,
    /// Channels stop notifications go to
    pub channels: ChannelSelection,
    /// List runs of any status when a global scan finds nothing
    pub diagnostics: bool,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            channels: ChannelSelection::default(),
            diagnostics: false,
        }
    }
}

/// Everything a watch loop needs, cheap to clone
#[derive(Clone)]
pub struct WatchContext {
    tracking: Arc<dyn TrackingClient>,
    notifier: Arc<NotificationGateway>,
    thresholds: Arc<ThresholdTable>,
    settings: WatchSettings,
    shutdown: CancellationToken,
}

/// What a single look at a run concluded
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Verdict {
    /// The run is no longer running
    Ended(RunStatus),
    /// Still running, nothing over its limit
    Healthy,
    /// Still running and a metric broke its limit
    Breached(Breach),
}

/// Which side effects of a stop went through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopReport {
    /// At least one channel accepted the message
    pub notified: bool,
    /// The tracking service accepted the status update
    pub terminated: bool,
}

impl WatchContext {
    /// Bundle the shared pieces of a watch
    pub fn new(
        tracking: Arc<dyn TrackingClient>,
        notifier: Arc<NotificationGateway>,
        thresholds: ThresholdTable,
        settings: WatchSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            tracking,
            notifier,
            thresholds: Arc::new(thresholds),
            settings,
            shutdown,
        }
    }

    /// Tracking client handle
    pub fn tracking(&self) -> Arc<dyn TrackingClient> {
        self.tracking.clone()
    }

    /// Loop settings
    pub fn settings(&self) -> &WatchSettings {
        &self.settings
    }

    /// Whether shutdown was requested
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Sleep one poll interval.
    ///
    /// Returns `false` without waiting out the interval if shutdown was
    /// requested.
    pub async fn pause(&self) -> bool {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => false,
            () = tokio::time::sleep(self.settings.poll_interval) => true,
        }
    }

    pub(crate) fn judge(&self, snapshot: &RunSnapshot) -> Verdict {
        if !snapshot.is_running() {
            return Verdict::Ended(snapshot.status.clone());
        }

        match evaluate(snapshot, &self.thresholds) {
            Decision::Continue => Verdict::Healthy,
            Decision::Stop(breach) => Verdict::Breached(breach),
        }
    }

    /// Notify, then terminate.
    ///
    /// Both steps are always attempted; failures are logged and reported,
    /// never raised.
    pub async fn stop_run(&self, run_id: &str, breach: &Breach) -> StopReport {
        let message = breach.stop_message(run_id);
        warn!(
            run_id = %run_id,
            metric = %breach.metric,
            value = breach.value,
            threshold = breach.threshold,
            "{}",
            message
        );

        let notified = match self.notifier.notify(&message, self.settings.channels).await {
            Ok(()) => true,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Failed to send notification");
                false
            }
        };

        let terminated = match self.tracking.terminate_run(run_id).await {
            Ok(()) => true,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Failed to stop run");
                false
            }
        };

        debug!(run_id = %run_id, notified, terminated, "Stop handled");

        StopReport {
            notified,
            terminated,
        }
    }
}
