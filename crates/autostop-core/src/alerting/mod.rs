//! Threshold evaluation and operator notifications
//!
//! Decides when a run breaches its metric thresholds and delivers the stop
//! announcement over Telegram and/or Slack.

mod evaluator;
mod notifier;

pub use evaluator::evaluate;
pub use notifier::{
    Channel, ChannelSelection, NotificationError, NotificationGateway, NotificationOutcome,
    Notifier, SlackNotifier, TelegramNotifier,
};
