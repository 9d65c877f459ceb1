//! Watch scope, thresholds, and evaluation decisions

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Which runs a process invocation monitors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    /// A single run by ID
    Run(String),
    /// Every running run of one experiment
    Experiment(String),
    /// Every running run the tracking service knows about
    AllActive,
}

impl WatchTarget {
    /// Build a target from optional selectors.
    ///
    /// Empty strings count as unset; a run ID takes precedence over an
    /// experiment ID.
    pub fn from_options(run_id: Option<String>, experiment_id: Option<String>) -> Self {
        let non_empty = |value: Option<String>| value.filter(|v| !v.trim().is_empty());

        match (non_empty(run_id), non_empty(experiment_id)) {
            (Some(run_id), _) => Self::Run(run_id),
            (None, Some(experiment_id)) => Self::Experiment(experiment_id),
            (None, None) => Self::AllActive,
        }
    }
}

impl fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Run(id) => write!(f, "run {id}"),
            Self::Experiment(id) => write!(f, "experiment {id}"),
            Self::AllActive => f.write_str("all active runs"),
        }
    }
}

/// Upper bounds per metric name
///
/// Loaded once at startup and shared read-only between watchers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdTable(HashMap<String, f64>);

impl ThresholdTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound for a metric, `None` when the metric is unmonitored
    pub fn get(&self, metric: &str) -> Option<f64> {
        self.0.get(metric).copied()
    }

    /// Number of monitored metrics
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no metric is monitored
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(metric, bound)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl From<HashMap<String, f64>> for ThresholdTable {
    fn from(map: HashMap<String, f64>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for ThresholdTable {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// A metric reading that exceeded its configured bound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breach {
    /// Metric that triggered the stop
    pub metric: String,
    /// Observed value
    pub value: f64,
    /// Configured upper bound
    pub threshold: f64,
}

impl Breach {
    /// Record that `metric` read `value` against an upper bound of `threshold`
    pub fn new(metric: impl Into<String>, value: f64, threshold: f64) -> Self {
        Self {
            metric: metric.into(),
            value,
            threshold,
        }
    }

    /// Operator-facing message announcing that a run is being stopped
    pub fn stop_message(&self, run_id: &str) -> String {
        format!("🚫 Stopping run {run_id}: Metric {self}")
    }
}

impl fmt::Display for Breach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} = {:.4} exceeded threshold {:.4}",
            self.metric, self.value, self.threshold
        )
    }
}

/// Outcome of evaluating one snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Keep watching
    Continue,
    /// Stop the run
    Stop(Breach),
}

impl Decision {
    /// Whether this decision stops the run
    pub fn is_stop(&self) -> bool {
        matches!(self, Self::Stop(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some("r1"), Some("7"), WatchTarget::Run("r1".to_string()))]
    #[case(None, Some("7"), WatchTarget::Experiment("7".to_string()))]
    #[case(Some("  "), Some("7"), WatchTarget::Experiment("7".to_string()))]
    #[case(None, None, WatchTarget::AllActive)]
    #[case(Some(""), Some(""), WatchTarget::AllActive)]
    fn test_target_from_options(
        #[case] run_id: Option<&str>,
        #[case] experiment_id: Option<&str>,
        #[case] expected: WatchTarget,
    ) {
        let target = WatchTarget::from_options(
            run_id.map(String::from),
            experiment_id.map(String::from),
        );
        assert_eq!(target, expected);
    }

    #[test]
    fn test_stop_message_formats_four_decimals() {
        let breach = Breach {
            metric: "loss".to_string(),
            value: 0.7,
            threshold: 0.5,
        };

        assert_eq!(
            breach.stop_message("r1"),
            "🚫 Stopping run r1: Metric loss = 0.7000 exceeded threshold 0.5000"
        );
    }

    #[test]
    fn test_threshold_table_lookup() {
        let table: ThresholdTable = [("loss", 0.5), ("grad_norm", 10.0)].into_iter().collect();

        assert_eq!(table.get("loss"), Some(0.5));
        assert_eq!(table.get("accuracy"), None);
        assert_eq!(table.len(), 2);
    }
}
