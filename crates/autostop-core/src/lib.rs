//! # autostop
//!
//! Watchdog for MLflow training runs.
//!
//! autostop polls a tracking server, compares the latest metric readings of
//! each running run against configured upper bounds, and when a bound is
//! exceeded sends a notification and marks the run as failed.
//!
//! ## Architecture
//!
//! - **Tracking**: MLflow REST client behind the [`tracking::TrackingClient`] trait
//! - **Alerting**: threshold evaluation and Telegram/Slack notification
//! - **Watcher**: single-run state machine and fleet-wide rescanning loop
//!
//! ## Quick Start
//!
//! ```bash
//! # Watch every running run on the server
//! MLFLOW_TRACKING_URI=http://localhost:5000 autostop watch
//!
//! # Watch one run
//! autostop watch --run-id 3f2a9c
//!
//! # Evaluate one run without side effects
//! autostop check --run-id 3f2a9c
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod alerting;
pub mod config;
pub mod error;
pub mod models;
pub mod tracking;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{evaluate, ChannelSelection, NotificationGateway};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
    pub use crate::tracking::{MlflowClient, TrackingClient};
    pub use crate::watcher::{FleetScanner, FleetWatcher, RunWatcher, WatchContext, WatchSettings};
}
