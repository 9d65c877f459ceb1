//! Tracking service access
//!
//! The [`TrackingClient`] trait is what the watch loops depend on;
//! [`MlflowClient`] implements it against the MLflow REST API.

mod mlflow;
mod query;

pub use mlflow::MlflowClient;
pub use query::{RunViewType, SearchQuery, RUNNING_FILTER};

use async_trait::async_trait;

use crate::error::Result;
use crate::models::RunSnapshot;

/// Read and terminate runs on a tracking service.
///
/// Implementations do not retry; a failed call is reported once and the
/// caller decides when to ask again.
#[async_trait]
pub trait TrackingClient: Send + Sync {
    /// Fetch one run by ID
    async fn get_run(&self, run_id: &str) -> Result<RunSnapshot>;

    /// Search runs; an empty result is not an error
    async fn search_runs(&self, query: &SearchQuery) -> Result<Vec<RunSnapshot>>;

    /// Mark a run as failed so it stops
    async fn terminate_run(&self, run_id: &str) -> Result<()>;
}
