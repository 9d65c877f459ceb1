//! In-memory doubles for the tracking service and notification channels

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::alerting::{Channel, NotificationError, NotificationGateway, Notifier};
use crate::error::{Error, Result};
use crate::models::{MetricReading, RunSnapshot, RunStatus};
use crate::tracking::{SearchQuery, TrackingClient};

/// Scripted tracking service
#[derive(Default)]
pub struct MockTracking {
    runs: Mutex<VecDeque<Result<RunSnapshot>>>,
    searches: Mutex<VecDeque<Result<Vec<RunSnapshot>>>>,
    terminate_error: Mutex<Option<Error>>,
    pub get_calls: AtomicUsize,
    pub queries: Mutex<Vec<SearchQuery>>,
    pub terminated: Mutex<Vec<String>>,
}

impl MockTracking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_run(&self, response: Result<RunSnapshot>) -> &Self {
        self.runs.lock().unwrap().push_back(response);
        self
    }

    pub fn push_search(&self, response: Result<Vec<RunSnapshot>>) -> &Self {
        self.searches.lock().unwrap().push_back(response);
        self
    }

    pub fn fail_terminate(&self, error: Error) -> &Self {
        *self.terminate_error.lock().unwrap() = Some(error);
        self
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<SearchQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> Vec<String> {
        self.terminated.lock().unwrap().clone()
    }
}

#[async_trait]
impl TrackingClient for MockTracking {
    async fn get_run(&self, _run_id: &str) -> Result<RunSnapshot> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.runs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::tracking(404, "no scripted response")))
    }

    async fn search_runs(&self, query: &SearchQuery) -> Result<Vec<RunSnapshot>> {
        self.queries.lock().unwrap().push(query.clone());
        self.searches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn terminate_run(&self, run_id: &str) -> Result<()> {
        self.terminated.lock().unwrap().push(run_id.to_string());
        match self.terminate_error.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Channel that records messages and optionally fails
pub struct StubNotifier {
    channel: Channel,
    fail: bool,
    pub sent: Arc<Mutex<Vec<String>>>,
}

impl StubNotifier {
    pub fn new(channel: Channel, fail: bool) -> Self {
        Self {
            channel,
            fail,
            sent: Arc::default(),
        }
    }
}

#[async_trait]
impl Notifier for StubNotifier {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, message: &str) -> std::result::Result<(), NotificationError> {
        self.sent.lock().unwrap().push(message.to_string());
        if self.fail {
            Err(NotificationError::HttpError(format!("{} down", self.channel)))
        } else {
            Ok(())
        }
    }
}

/// Gateway over two stub channels plus handles on what each one received
pub fn stub_gateway(
    telegram_fails: bool,
    slack_fails: bool,
) -> (NotificationGateway, Arc<Mutex<Vec<String>>>, Arc<Mutex<Vec<String>>>) {
    let telegram = StubNotifier::new(Channel::Telegram, telegram_fails);
    let slack = StubNotifier::new(Channel::Slack, slack_fails);
    let (telegram_sent, slack_sent) = (telegram.sent.clone(), slack.sent.clone());

    (
        NotificationGateway::new(Box::new(telegram), Box::new(slack)),
        telegram_sent,
        slack_sent,
    )
}

pub fn running(run_id: &str, metrics: &[(&str, f64)]) -> RunSnapshot {
    snapshot(run_id, RunStatus::Running, metrics)
}

pub fn snapshot(run_id: &str, status: RunStatus, metrics: &[(&str, f64)]) -> RunSnapshot {
    RunSnapshot::new(
        run_id,
        "0",
        status,
        metrics
            .iter()
            .map(|(key, value)| MetricReading::new(*key, *value))
            .collect(),
    )
}
