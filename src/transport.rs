//! Wire access to the remote job service.
//!
//! [`JobTransport`] is the seam between the exchange state machine and the
//! network. [`HttpTransport`] speaks the hosted-Space HTTP API: a queue-style
//! call endpoint whose results arrive as Server-Sent Events, or the legacy
//! single-request `/api/<name>` endpoint.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::config::{Config, Protocol};
use crate::error::ExchangeError;
use crate::events::{ExchangeRequest, JobId};

/// Stream of push events for a single job. Dropping it releases the subscription.
pub type PushStream = BoxStream<'static, Result<PushEvent, ExchangeError>>;

/// A named event pushed by the remote job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// Terminal success; carries the raw JSON payload
    Complete(String),
    /// Terminal failure; payload is whatever the service sent
    Error(String),
    /// Anything non-terminal (heartbeats, interim generations, queue notices)
    Progress { event: String },
}

impl PushEvent {
    pub fn from_sse(event: &str, data: String) -> Self {
        match event {
            "complete" => PushEvent::Complete(data),
            "error" => PushEvent::Error(data),
            other => PushEvent::Progress {
                event: other.to_string(),
            },
        }
    }
}

/// Pull the reply text out of a `complete` payload: a JSON array whose first
/// element is the assistant's text
pub fn result_text(data: &str) -> Result<String, ExchangeError> {
    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| ExchangeError::malformed(format!("payload is not JSON: {}", e)))?;

    let first = value
        .as_array()
        .ok_or_else(|| ExchangeError::malformed("payload is not an array"))?
        .first()
        .ok_or_else(|| ExchangeError::malformed("payload array is empty"))?;

    first
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ExchangeError::malformed(format!("first element is not text: {}", first)))
}

/// Two-call job protocol: create a job, then subscribe to its result stream
#[async_trait]
pub trait JobTransport: Send + Sync {
    /// Phase 1. Send the request and return the job id the service assigned.
    async fn create_job(&self, request: &ExchangeRequest) -> Result<JobId, ExchangeError>;

    /// Phase 2. Open a push subscription scoped to `job_id`.
    async fn subscribe(&self, job_id: &JobId) -> Result<PushStream, ExchangeError>;

    /// Forget a job that was created but will never be subscribed to.
    /// Local bookkeeping only; nothing is sent to the service.
    fn discard(&self, _job_id: &JobId) {}
}

#[derive(Serialize)]
struct CallBody<'a> {
    data: (&'a str, Vec<[String; 2]>),
}

impl<'a> CallBody<'a> {
    fn from_request(request: &'a ExchangeRequest) -> Self {
        Self {
            data: (request.input.as_str(), request.history_pairs()),
        }
    }
}

#[derive(Deserialize)]
struct CallResponse {
    #[serde(alias = "jobId", alias = "job_id")]
    event_id: String,
}

/// reqwest-backed transport for hosted Spaces
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    call_prefix: String,
    api_name: String,
    protocol: Protocol,
    /// Predict replies waiting for their subscription, keyed by locally minted id
    parked: Mutex<HashMap<JobId, String>>,
}

impl HttpTransport {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        // No overall request timeout: result streams stay open until the job ends.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            call_prefix: config.call_prefix.clone(),
            api_name: config.api_name.clone(),
            protocol: config.protocol,
            parked: Mutex::new(HashMap::new()),
        }
    }

    pub fn endpoint(&self) -> String {
        match self.protocol {
            Protocol::Queue => format!("{}{}/{}", self.base_url, self.call_prefix, self.api_name),
            Protocol::Predict => format!("{}/api/{}", self.base_url, self.api_name),
        }
    }

    fn job_url(&self, job_id: &JobId) -> String {
        format!("{}/{}", self.endpoint(), job_id)
    }

    async fn post_call(&self, request: &ExchangeRequest) -> Result<reqwest::Response, ExchangeError> {
        let url = self.endpoint();
        debug!(url = %url, history_turns = request.history.len(), "posting exchange request");

        let response = self
            .client
            .post(&url)
            .json(&CallBody::from_request(request))
            .send()
            .await
            .map_err(|e| ExchangeError::submission(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ExchangeError::submission(format!(
                "HTTP {}: {}",
                status,
                error_text.trim()
            )));
        }

        Ok(response)
    }

    async fn create_queue_job(&self, request: &ExchangeRequest) -> Result<JobId, ExchangeError> {
        let response = self.post_call(request).await?;
        let payload: CallResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::submission(format!("invalid job response: {}", e)))?;

        if payload.event_id.trim().is_empty() {
            return Err(ExchangeError::submission("service returned an empty job id"));
        }

        Ok(JobId::new(payload.event_id))
    }

    async fn create_predict_job(&self, request: &ExchangeRequest) -> Result<JobId, ExchangeError> {
        let response = self.post_call(request).await?;
        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::submission(e.to_string()))?;

        // Park the `data` array so the subscription sees the same payload shape
        // as a queue `complete` event. Anything else is parked raw and surfaces
        // as a malformed result.
        let parked = match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(serde_json::Value::Object(mut object)) => match object.remove("data") {
                Some(data) => data.to_string(),
                None => body,
            },
            _ => body,
        };

        let job_id = JobId::new(format!("local-{}", Uuid::new_v4()));
        self.parked.lock().insert(job_id.clone(), parked);
        Ok(job_id)
    }

    async fn subscribe_queue(&self, job_id: &JobId) -> Result<PushStream, ExchangeError> {
        let url = self.job_url(job_id);
        debug!(url = %url, "opening result stream");

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| ExchangeError::subscription(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ExchangeError::subscription(format!(
                "HTTP {}: {}",
                status,
                error_text.trim()
            )));
        }

        let stream = response.bytes_stream().eventsource().map(|item| match item {
            Ok(event) => {
                trace!(event = %event.event, data = %event.data, "push event");
                Ok(PushEvent::from_sse(&event.event, event.data))
            }
            Err(e) => Err(ExchangeError::subscription(e.to_string())),
        });

        Ok(stream.boxed())
    }

    fn subscribe_predict(&self, job_id: &JobId) -> Result<PushStream, ExchangeError> {
        let data = self
            .parked
            .lock()
            .remove(job_id)
            .ok_or_else(|| ExchangeError::subscription(format!("unknown job {}", job_id)))?;

        Ok(stream::iter([Ok::<_, ExchangeError>(PushEvent::Complete(data))]).boxed())
    }
}

#[async_trait]
impl JobTransport for HttpTransport {
    async fn create_job(&self, request: &ExchangeRequest) -> Result<JobId, ExchangeError> {
        match self.protocol {
            Protocol::Queue => self.create_queue_job(request).await,
            Protocol::Predict => self.create_predict_job(request).await,
        }
    }

    async fn subscribe(&self, job_id: &JobId) -> Result<PushStream, ExchangeError> {
        match self.protocol {
            Protocol::Queue => self.subscribe_queue(job_id).await,
            Protocol::Predict => self.subscribe_predict(job_id),
        }
    }

    fn discard(&self, job_id: &JobId) {
        if self.parked.lock().remove(job_id).is_some() {
            debug!(job_id = %job_id, "discarded parked reply");
        }
    }
}
