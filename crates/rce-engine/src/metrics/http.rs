use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{info, warn};

use super::{MetricsError, MetricsQuery, MetricsRecorder};
use crate::result::ExecutionResult;

/// Metrics calls must not hold resources long after the job is done.
const METRICS_TIMEOUT: Duration = Duration::from_secs(5);
/// How long a failing service is reported unavailable before it is tried again.
const RETRY_AFTER: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct LogsPayload {
    logs: Vec<ExecutionResult>,
}

/// Ships records to an external metrics service.
///
/// `POST {base_url}/metrics` stores one record; `GET {base_url}/metrics`
/// with the query as URL parameters returns `{ "logs": [...] }`.
pub struct HttpMetricsRecorder {
    client: Client,
    base_url: String,
    token: Option<String>,
    /// When the latest call failed to reach the service, if it did.
    down_since: Mutex<Option<Instant>>,
    retry_after: Duration,
}

impl HttpMetricsRecorder {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, MetricsError> {
        let client = Client::builder()
            .timeout(METRICS_TIMEOUT)
            .build()
            .map_err(|e| MetricsError::Request(format!("http client: {e}")))?;
        let base_url = base_url.trim_end_matches('/').to_string();
        info!(base_url = %base_url, authenticated = token.is_some(), "metrics client initialized");
        Ok(Self {
            client,
            base_url,
            token,
            down_since: Mutex::new(None),
            retry_after: RETRY_AFTER,
        })
    }

    /// Fetch one record to check the service is reachable. The outcome
    /// feeds [`MetricsRecorder::is_available`].
    pub async fn ping(&self) -> Result<(), MetricsError> {
        let query = MetricsQuery {
            limit: 1,
            ..MetricsQuery::default()
        };
        self.get(&query).await.map(|_| ())
    }

    /// Record the outcome of a call. Transport errors and 5xx answers mark
    /// the service down; anything else marks it up.
    fn observe<T>(&self, result: &Result<T, Failure>) {
        let down = matches!(result, Err(Failure::Unreachable(_)));
        if let Ok(mut since) = self.down_since.lock() {
            match (down, since.is_some()) {
                (true, false) => {
                    warn!(base_url = %self.base_url, "metrics service unreachable");
                    *since = Some(Instant::now());
                }
                (true, true) => *since = Some(Instant::now()),
                (false, true) => {
                    info!(base_url = %self.base_url, "metrics service reachable again");
                    *since = None;
                }
                (false, false) => {}
            }
        }
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        let req = self
            .client
            .request(method, format!("{}/metrics", self.base_url));
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

/// Why a call failed, split by whether the service should count as down.
enum Failure {
    Unreachable(String),
    Rejected(String),
}

impl From<Failure> for MetricsError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Unreachable(msg) | Failure::Rejected(msg) => MetricsError::Request(msg),
        }
    }
}

async fn send(request: reqwest::RequestBuilder) -> Result<reqwest::Response, Failure> {
    let response = request
        .send()
        .await
        .map_err(|e| Failure::Unreachable(e.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let msg = format!("HTTP {status}: {body}");
    Err(if status.is_server_error() {
        Failure::Unreachable(msg)
    } else {
        Failure::Rejected(msg)
    })
}

#[async_trait]
impl MetricsRecorder for HttpMetricsRecorder {
    fn name(&self) -> &str {
        "http"
    }

    fn is_available(&self) -> bool {
        match self.down_since.lock() {
            Ok(since) => (*since).is_none_or(|at| at.elapsed() >= self.retry_after),
            Err(_) => true,
        }
    }

    async fn create_metric(&self, record: &ExecutionResult) -> Result<(), MetricsError> {
        let result = send(self.request(reqwest::Method::POST).json(record)).await;
        self.observe(&result);
        result?;
        Ok(())
    }

    async fn get(&self, query: &MetricsQuery) -> Result<Vec<ExecutionResult>, MetricsError> {
        let result = send(self.request(reqwest::Method::GET).query(query)).await;
        self.observe(&result);
        let payload: LogsPayload = result?
            .json()
            .await
            .map_err(|e| MetricsError::Request(format!("decode logs: {e}")))?;
        Ok(payload.logs)
    }
}
