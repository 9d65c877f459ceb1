//! Run snapshot models

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a tracked run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunStatus {
    /// The run is still executing
    Running,
    /// The run completed on its own
    Finished,
    /// The run failed (or was stopped by us)
    Failed,
    /// Any other status the tracking service reports (`SCHEDULED`, `KILLED`, ...)
    Other(String),
}

impl RunStatus {
    /// Wire representation used by the tracking service
    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Other(status) => status,
        }
    }

    /// Whether the run is still executing
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl From<&str> for RunStatus {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "RUNNING" => Self::Running,
            "FINISHED" => Self::Finished,
            "FAILED" => Self::Failed,
            _ => Self::Other(value.to_string()),
        }
    }
}

impl From<String> for RunStatus {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<RunStatus> for String {
    fn from(status: RunStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single reported metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReading {
    /// Metric name
    pub key: String,
    /// Reported value
    pub value: f64,
    /// Training step the value was logged at
    #[serde(default)]
    pub step: i64,
    /// Epoch milliseconds the value was logged at
    #[serde(default)]
    pub timestamp: i64,
}

impl MetricReading {
    /// Create a reading at step 0 with no timestamp
    pub fn new(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            value,
            step: 0,
            timestamp: 0,
        }
    }

    /// Set the step and timestamp of this reading
    #[must_use]
    pub fn at(mut self, step: i64, timestamp: i64) -> Self {
        self.step = step;
        self.timestamp = timestamp;
        self
    }

    /// Wall-clock time the value was logged, if the timestamp is representable
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }

    fn is_newer_than(&self, other: &Self) -> bool {
        (self.step, self.timestamp) > (other.step, other.timestamp)
    }
}

/// State of one run as observed by a single poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Run identifier
    pub run_id: String,
    /// Owning experiment
    pub experiment_id: String,
    /// Status at the time of the poll
    pub status: RunStatus,
    /// Metric readings in the order the tracking service delivered them
    pub metrics: Vec<MetricReading>,
}

impl RunSnapshot {
    /// Create a new snapshot
    pub fn new(
        run_id: impl Into<String>,
        experiment_id: impl Into<String>,
        status: RunStatus,
        metrics: Vec<MetricReading>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            experiment_id: experiment_id.into(),
            status,
            metrics,
        }
    }

    /// Whether the run was executing when this snapshot was taken
    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// Readings in delivery order, keeping only the most recent one per key.
    ///
    /// Recency is `(step, timestamp)`; on an exact tie the later reading wins.
    pub fn latest_readings(&self) -> impl Iterator<Item = &MetricReading> + '_ {
        let mut latest: HashMap<&str, usize> = HashMap::new();
        for (idx, reading) in self.metrics.iter().enumerate() {
            let superseded = latest
                .get(reading.key.as_str())
                .is_some_and(|&current| self.metrics[current].is_newer_than(reading));
            if !superseded {
                latest.insert(reading.key.as_str(), idx);
            }
        }

        self.metrics
            .iter()
            .enumerate()
            .filter(move |(idx, reading)| latest.get(reading.key.as_str()) == Some(idx))
            .map(|(_, reading)| reading)
    }
}
