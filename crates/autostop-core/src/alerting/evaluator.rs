//! Threshold evaluation for run snapshots

use tracing::trace;

use crate::models::{Breach, Decision, RunSnapshot, ThresholdTable};

/// Decide whether a run must be stopped.
///
/// Non-running snapshots are never inspected. Otherwise readings are scanned
/// in delivery order (most recent per key only) and the first value strictly
/// greater than its bound stops the run; later readings are not looked at.
pub fn evaluate(snapshot: &RunSnapshot, thresholds: &ThresholdTable) -> Decision {
    if !snapshot.is_running() {
        return Decision::Continue;
    }

    for reading in snapshot.latest_readings() {
        let Some(threshold) = thresholds.get(&reading.key) else {
            continue;
        };

        trace!(
            run_id = %snapshot.run_id,
            metric = %reading.key,
            value = reading.value,
            threshold,
            "Checking metric"
        );

        if reading.value > threshold {
            return Decision::Stop(Breach {
                metric: reading.key.clone(),
                value: reading.value,
                threshold,
            });
        }
    }

    Decision::Continue
}
