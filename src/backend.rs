use crate::error::ServiceError;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 512;
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Input document for one scoring job, in the encoding the external scorer
/// expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPayload {
    pub target_rna: String,
    pub aso_length: usize,
    pub sugar_mods: Vec<String>,
    pub backbone_mods: Vec<String>,
    pub dosage: i64,
    pub transfection_method: String,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendJobState {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl BackendJobState {
    fn parse(raw: &str) -> Result<Self, ServiceError> {
        match raw.to_uppercase().as_str() {
            "QUEUED" | "IN_QUEUE" => Ok(Self::Queued),
            "IN_PROGRESS" | "IN-PROGRESS" | "RUNNING" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(ServiceError::upstream(format!(
                "Backend reported unknown job state '{other}'"
            ))),
        }
    }
}

/// Scored positions as parallel arrays; both must have the same length.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendOutput {
    pub positions: Vec<u64>,
    pub scores: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct BackendStatus {
    pub state: BackendJobState,
    pub output: Option<BackendOutput>,
    pub error: Option<String>,
}

/// The external compute backend, modeled purely as an asynchronous job
/// queue. A trait so the dispatch and reconciliation paths are testable
/// without a network.
pub trait ScoringBackend: Send + Sync {
    fn submit(&self, payload: &ScoringPayload) -> Result<String, ServiceError>;
    fn status(&self, job_id: &str) -> Result<BackendStatus, ServiceError>;
    fn cancel(&self, job_id: &str) -> Result<(), ServiceError>;
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    input: &'a ScoringPayload,
}

#[derive(Deserialize)]
struct SubmitResponse {
    id: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    output: Option<BackendOutput>,
    #[serde(default)]
    error: Option<String>,
}

/// Blocking HTTP client for the scoring endpoint: `POST /run`,
/// `GET /status/<id>`, `POST /cancel/<id>`, bearer-token auth.
pub struct HttpScoringBackend {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpScoringBackend {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::internal(format!("Could not build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

impl ScoringBackend for HttpScoringBackend {
    fn submit(&self, payload: &ScoringPayload) -> Result<String, ServiceError> {
        let url = format!("{}/run", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&SubmitRequest { input: payload })
            .send()
            .map_err(|e| ServiceError::upstream(format!("Could not submit job to '{url}': {e}")))?;
        if !response.status().is_success() {
            return Err(ServiceError::upstream(format!(
                "Job submission failed: HTTP {}",
                response.status()
            )));
        }
        let parsed: SubmitResponse = response
            .json()
            .map_err(|e| ServiceError::upstream(format!("Invalid submit response: {e}")))?;
        Ok(parsed.id)
    }

    fn status(&self, job_id: &str) -> Result<BackendStatus, ServiceError> {
        let url = format!("{}/status/{job_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .map_err(|e| ServiceError::upstream(format!("Could not fetch '{url}': {e}")))?;
        if !response.status().is_success() {
            return Err(ServiceError::upstream(format!(
                "Status check for job '{job_id}' failed: HTTP {}",
                response.status()
            )));
        }
        let parsed: StatusResponse = response
            .json()
            .map_err(|e| ServiceError::upstream(format!("Invalid status response: {e}")))?;
        Ok(BackendStatus {
            state: BackendJobState::parse(&parsed.status)?,
            output: parsed.output,
            error: parsed.error,
        })
    }

    fn cancel(&self, job_id: &str) -> Result<(), ServiceError> {
        let url = format!("{}/cancel/{job_id}", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .send()
            .map_err(|e| ServiceError::upstream(format!("Could not cancel via '{url}': {e}")))?;
        if !response.status().is_success() {
            return Err(ServiceError::upstream(format!(
                "Cancel for job '{job_id}' failed: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}
