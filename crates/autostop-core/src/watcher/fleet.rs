//! Experiment-wide and server-wide watch loop

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::models::{RunSnapshot, WatchTarget};
use crate::tracking::{SearchQuery, TrackingClient};

use super::{Verdict, WatchContext};

/// Runs listed when a diagnostic search is made
const DIAGNOSTIC_PAGE_SIZE: u32 = 100;
/// Runs from that page that get logged
const DIAGNOSTIC_SAMPLE: usize = 5;

/// Finds the runs a watch target covers
pub struct FleetScanner {
    target: WatchTarget,
    tracking: Arc<dyn TrackingClient>,
}

impl FleetScanner {
    /// Scanner for `target`
    pub fn new(target: WatchTarget, tracking: Arc<dyn TrackingClient>) -> Self {
        Self { target, tracking }
    }

    /// What this scanner covers
    pub fn target(&self) -> &WatchTarget {
        &self.target
    }

    /// Current snapshots of the target's runs.
    ///
    /// An empty list means nothing is active right now and is not an error.
    pub async fn scan(&self) -> Result<Vec<RunSnapshot>> {
        match &self.target {
            WatchTarget::Run(run_id) => Ok(vec![self.tracking.get_run(run_id).await?]),
            WatchTarget::Experiment(experiment_id) => {
                let runs = self
                    .tracking
                    .search_runs(&SearchQuery::running_in_experiment(experiment_id))
                    .await?;

                if runs.is_empty() {
                    info!(experiment_id = %experiment_id, "No active runs found in experiment");
                } else {
                    debug!(experiment_id = %experiment_id, count = runs.len(), "Found active runs");
                }

                Ok(runs)
            }
            WatchTarget::AllActive => self.search_all_running().await,
        }
    }

    /// Try each formulation of "running" until one yields runs.
    ///
    /// A formulation that errors is skipped. The last error surfaces only
    /// when no formulation succeeded at all.
    async fn search_all_running(&self) -> Result<Vec<RunSnapshot>> {
        let mut last_error = None;
        let mut answered = false;

        for (index, query) in SearchQuery::running_everywhere().iter().enumerate() {
            let formulation = index + 1;

            match self.tracking.search_runs(query).await {
                Ok(runs) if !runs.is_empty() => {
                    debug!(formulation, count = runs.len(), "Found active runs");
                    return Ok(runs);
                }
                Ok(_) => {
                    answered = true;
                    debug!(formulation, "Search returned no active runs");
                }
                Err(e) => {
                    debug!(formulation, error = %e, "Search formulation failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !answered => Err(e),
            _ => {
                info!("No active runs found");
                Ok(Vec::new())
            }
        }
    }

    /// Log a sample of runs in any status
    pub async fn log_diagnostics(&self) {
        match self
            .tracking
            .search_runs(&SearchQuery::any(DIAGNOSTIC_PAGE_SIZE))
            .await
        {
            Ok(runs) => {
                info!(count = runs.len(), "Runs visible with any status");
                for run in runs.iter().take(DIAGNOSTIC_SAMPLE) {
                    info!(run_id = %run.run_id, status = %run.status, "Visible run");
                }
            }
            Err(e) => debug!(error = %e, "Error fetching runs for diagnostics"),
        }
    }
}

/// What one fleet cycle did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Runs the scan returned
    pub discovered: usize,
    /// Runs judged this cycle
    pub evaluated: usize,
    /// Runs stopped for a breach
    pub stopped: Vec<String>,
    /// Runs seen in a terminal status
    pub finished: Vec<String>,
}

/// Rescans a target every interval and judges each run found
pub struct FleetWatcher {
    scanner: FleetScanner,
    ctx: WatchContext,
    retired: HashSet<String>,
}

impl FleetWatcher {
    /// Watch whatever `scanner` finds
    pub fn new(scanner: FleetScanner, ctx: WatchContext) -> Self {
        Self {
            scanner,
            ctx,
            retired: HashSet::new(),
        }
    }

    /// Whether a run will be skipped by later cycles
    pub fn is_retired(&self, run_id: &str) -> bool {
        self.retired.contains(run_id)
    }

    /// Scan once and handle every run found.
    ///
    /// Runs are judged concurrently; each run is handled at most once per
    /// cycle and never again after it finished or was stopped.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let snapshots = self.scanner.scan().await?;
        let mut report = CycleReport {
            discovered: snapshots.len(),
            ..CycleReport::default()
        };

        if snapshots.is_empty()
            && self.ctx.settings().diagnostics
            && matches!(self.scanner.target(), WatchTarget::AllActive)
        {
            self.scanner.log_diagnostics().await;
        }

        let mut seen = HashSet::new();
        let pending: Vec<RunSnapshot> = snapshots
            .into_iter()
            .filter(|s| !self.retired.contains(&s.run_id) && seen.insert(s.run_id.clone()))
            .collect();
        report.evaluated = pending.len();

        let ctx = &self.ctx;
        let handled = join_all(pending.iter().map(|snapshot| async move {
            let verdict = ctx.judge(snapshot);
            if let Verdict::Breached(breach) = &verdict {
                ctx.stop_run(&snapshot.run_id, breach).await;
            }
            (snapshot.run_id.as_str(), verdict)
        }))
        .await;

        for (run_id, verdict) in handled {
            match verdict {
                Verdict::Healthy => debug!(run_id = %run_id, "Metrics within thresholds"),
                Verdict::Ended(status) => {
                    debug!(run_id = %run_id, status = %status, "Run is no longer active");
                    self.retired.insert(run_id.to_string());
                    report.finished.push(run_id.to_string());
                }
                Verdict::Breached(_) => {
                    self.retired.insert(run_id.to_string());
                    report.stopped.push(run_id.to_string());
                }
            }
        }

        Ok(report)
    }

    /// Cycle until shutdown; scan failures are logged and retried next interval
    pub async fn run(mut self) {
        info!(
            watch_target = %self.scanner.target(),
            interval_secs = self.ctx.settings().poll_interval.as_secs(),
            "Monitoring runs"
        );

        while !self.ctx.is_shutting_down() {
            match self.run_cycle().await {
                Ok(report) => debug!(
                    discovered = report.discovered,
                    evaluated = report.evaluated,
                    stopped = report.stopped.len(),
                    "Cycle complete"
                ),
                Err(e) => error!(
                    error = %e,
                    transient = e.is_transient(),
                    "Error fetching active runs"
                ),
            }

            if !self.ctx.pause().await {
                break;
            }
        }

        info!("Fleet watch shut down");
    }
}
