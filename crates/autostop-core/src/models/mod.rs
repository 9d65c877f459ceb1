//! Data models for Autostop

mod run;
mod watch;

pub use run::*;
pub use watch::*;
