//! MLflow REST client

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::error::{Error, Result};
use crate::models::{MetricReading, RunSnapshot, RunStatus};

use super::{SearchQuery, TrackingClient};

/// Client for the MLflow tracking server's REST API
#[derive(Clone)]
pub struct MlflowClient {
    client: Client,
    base: Url,
}

impl MlflowClient {
    /// Create a client for the tracking server at `tracking_uri`
    pub fn new(client: Client, tracking_uri: &str) -> Result<Self> {
        let mut base = Url::parse(tracking_uri)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self { client, base })
    }

    fn endpoint(&self, method: &str) -> Result<Url> {
        Ok(self.base.join(&format!("api/2.0/mlflow/{method}"))?)
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;

        debug!(status = %status, body = %body, "MLflow response");

        if status != StatusCode::OK {
            return Err(Error::tracking(status.as_u16(), body));
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl TrackingClient for MlflowClient {
    async fn get_run(&self, run_id: &str) -> Result<RunSnapshot> {
        let mut url = self.endpoint("runs/get")?;
        url.query_pairs_mut().append_pair("run_id", run_id);

        debug!(url = %url, "Fetching run details");

        let response = self.client.get(url).send().await?;
        let parsed: GetRunResponse = Self::read_json(response).await?;

        Ok(parsed.run.into())
    }

    async fn search_runs(&self, query: &SearchQuery) -> Result<Vec<RunSnapshot>> {
        let url = self.endpoint("runs/search")?;

        debug!(url = %url, query = ?query, "Searching runs");

        let response = self.client.post(url).json(query).send().await?;
        let parsed: SearchRunsResponse = Self::read_json(response).await?;

        Ok(parsed.runs.into_iter().map(RunSnapshot::from).collect())
    }

    async fn terminate_run(&self, run_id: &str) -> Result<()> {
        let url = self.endpoint("runs/update")?;

        debug!(url = %url, run_id = %run_id, "Stopping run");

        let body = UpdateRunRequest {
            run_id,
            status: RunStatus::Failed.as_str(),
        };
        let response = self.client.post(url).json(&body).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::tracking(status.as_u16(), body));
        }

        info!(run_id = %run_id, "Successfully stopped run");
        Ok(())
    }
}

// Wire types

#[derive(Debug, Deserialize)]
struct GetRunResponse {
    run: RunPayload,
}

#[derive(Debug, Deserialize)]
struct SearchRunsResponse {
    #[serde(default)]
    runs: Vec<RunPayload>,
}

#[derive(Debug, Deserialize)]
struct RunPayload {
    info: RunInfo,
    #[serde(default)]
    data: RunData,
}

#[derive(Debug, Deserialize)]
struct RunInfo {
    run_id: String,
    status: RunStatus,
    #[serde(default)]
    experiment_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct RunData {
    #[serde(default)]
    metrics: Vec<MetricPayload>,
}

#[derive(Debug, Deserialize)]
struct MetricPayload {
    key: String,
    value: f64,
    #[serde(default, deserialize_with = "int_or_string")]
    timestamp: i64,
    #[serde(default, deserialize_with = "int_or_string")]
    step: i64,
}

#[derive(Debug, Serialize)]
struct UpdateRunRequest<'a> {
    run_id: &'a str,
    status: &'a str,
}

impl From<RunPayload> for RunSnapshot {
    fn from(payload: RunPayload) -> Self {
        let metrics = payload
            .data
            .metrics
            .into_iter()
            .map(|m| MetricReading::new(m.key, m.value).at(m.step, m.timestamp))
            .collect();

        RunSnapshot::new(
            payload.info.run_id,
            payload.info.experiment_id,
            payload.info.status,
            metrics,
        )
    }
}

/// int64 fields arrive as numbers or, proto3-style, as strings
fn int_or_string<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrString {
        Int(i64),
        Str(String),
    }

    match IntOrString::deserialize(deserializer)? {
        IntOrString::Int(value) => Ok(value),
        IntOrString::Str(value) => value.parse().map_err(serde::de::Error::custom),
    }
}
