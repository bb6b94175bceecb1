//! Client for the remote face verification service.
//!
//! HTTP goes through the [`HttpTransport`] trait so the client can run over
//! `ureq` in production and an in-memory mock in tests. The transport is
//! blocking; the async entry points run it on tokio's blocking pool.

use crate::types::{VerificationRequest, VerificationResult, VerifyResponseBody};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const VERIFY_PATH: &str = "/verify/";
pub const EMBEDDINGS_PATH: &str = "/embeddings/";
pub const RECORDS_PATH: &str = "/api/records/";

/// Shown for any transport failure or unreadable response.
pub const NETWORK_ERROR_MESSAGE: &str = "Network error during verification";
/// Shown when the server reports failure without an error message.
pub const FALLBACK_FAILURE_MESSAGE: &str = "Verification failed";

const JSON_HEADERS: &[(&str, &str)] = &[("Content-Type", "application/json")];

// ─── Transport ──────────────────────────────────────────────────────────────

/// Status and body of an HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("server unreachable: {0}")]
    Unreachable(String),
    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Blocking HTTP transport.
///
/// Non-2xx statuses are returned as responses, not errors: the service puts
/// its error message in the JSON body of 4xx/5xx replies.
pub trait HttpTransport: Send + Sync {
    fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<HttpResponse, TransportError>;

    fn get(&self, url: &str) -> Result<HttpResponse, TransportError>;
}

/// Production transport backed by a `ureq` agent.
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        Self {
            agent: config.into(),
        }
    }
}

impl HttpTransport for UreqTransport {
    fn post(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<HttpResponse, TransportError> {
        let mut req = self.agent.post(url);
        for &(k, v) in headers {
            req = req.header(k, v);
        }
        let mut resp = req.send(body).map_err(map_ureq_error)?;
        let status = resp.status().as_u16();
        let body = resp
            .body_mut()
            .read_to_vec()
            .map_err(|e| TransportError::Body(e.to_string()))?;
        Ok(HttpResponse { status, body })
    }

    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let mut resp = self.agent.get(url).call().map_err(map_ureq_error)?;
        let status = resp.status().as_u16();
        let body = resp
            .body_mut()
            .read_to_vec()
            .map_err(|e| TransportError::Body(e.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

fn map_ureq_error(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Timeout(_) => TransportError::Timeout,
        other => TransportError::Unreachable(other.to_string()),
    }
}

// ─── Inspection payloads ────────────────────────────────────────────────────

/// One stored verification attempt, as listed by `GET /api/records/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub id: u64,
    pub known_image_path: String,
    pub new_image_path: String,
    pub is_verified: bool,
    pub verification_date: DateTime<Utc>,
    /// ID of the embedding saved for this attempt, if any.
    #[serde(default)]
    pub embedding: Option<u64>,
}

/// Bounding box of a detected face, in source image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FacialArea {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

/// One detected face of a stored embedding.
///
/// The service stores one entry per face found in the new image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceEmbedding {
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub facial_area: Option<FacialArea>,
    #[serde(default)]
    pub face_confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponseBody {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    embedding: Option<Vec<FaceEmbedding>>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordsResponseBody {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    records: Vec<VerificationRecord>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("malformed response (HTTP {status}): {reason}")]
    MalformedResponse { status: u16, reason: String },
    #[error("server error: {0}")]
    Server(String),
    #[error("background task failed: {0}")]
    Task(String),
}

// ─── Client ─────────────────────────────────────────────────────────────────

/// Submits verification requests to `<base_url>/verify/`.
#[derive(Clone)]
pub struct VerificationClient {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
}

impl VerificationClient {
    pub fn new(base_url: impl Into<String>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            base_url: base_url.into(),
            transport,
        }
    }

    /// Client over a `ureq` transport with the given global timeout.
    pub fn over_http(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self::new(base_url, Arc::new(UreqTransport::new(timeout)))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Submit both images once and interpret the reply.
    ///
    /// Never fails: transport and decoding problems come back as
    /// [`VerificationResult::Failed`] with a generic network message.
    pub async fn verify(&self, request: VerificationRequest) -> VerificationResult {
        let client = self.clone();
        match tokio::task::spawn_blocking(move || client.verify_blocking(&request)).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "verification task failed");
                VerificationResult::failed(NETWORK_ERROR_MESSAGE)
            }
        }
    }

    /// Blocking form of [`verify`](Self::verify).
    pub fn verify_blocking(&self, request: &VerificationRequest) -> VerificationResult {
        match self.submit(request) {
            Ok(body) => interpret(body),
            Err(e) => {
                tracing::warn!(error = %e, url = %self.url(VERIFY_PATH), "verification request failed");
                VerificationResult::failed(NETWORK_ERROR_MESSAGE)
            }
        }
    }

    fn submit(&self, request: &VerificationRequest) -> Result<VerifyResponseBody, ClientError> {
        let body = serde_json::to_vec(&request.to_wire()).map_err(|e| {
            ClientError::MalformedResponse {
                status: 0,
                reason: format!("serialize request: {e}"),
            }
        })?;
        let url = self.url(VERIFY_PATH);
        tracing::debug!(
            url = %url,
            known_bytes = request.known.len(),
            new_bytes = request.new.len(),
            "submitting verification"
        );
        let response = self.transport.post(&url, JSON_HEADERS, &body)?;
        decode(&response)
    }

    /// Fetch the most recently saved embedding, one entry per detected face.
    /// `None` when the service has not saved any yet.
    pub async fn latest_embedding(&self) -> Result<Option<Vec<FaceEmbedding>>, ClientError> {
        let client = self.clone();
        run_blocking(move || client.latest_embedding_blocking()).await
    }

    fn latest_embedding_blocking(&self) -> Result<Option<Vec<FaceEmbedding>>, ClientError> {
        let response = self.transport.get(&self.url(EMBEDDINGS_PATH))?;
        let body: EmbeddingResponseBody = decode(&response)?;
        if let Some(error) = body.error {
            return Err(ClientError::Server(error));
        }
        if !body.success {
            tracing::debug!(message = ?body.message, "no embedding available");
            return Ok(None);
        }
        Ok(body.embedding)
    }

    /// Fetch the latest verification records (the service returns up to ten).
    pub async fn recent_records(&self) -> Result<Vec<VerificationRecord>, ClientError> {
        let client = self.clone();
        run_blocking(move || client.recent_records_blocking()).await
    }

    fn recent_records_blocking(&self) -> Result<Vec<VerificationRecord>, ClientError> {
        let response = self.transport.get(&self.url(RECORDS_PATH))?;
        let body: RecordsResponseBody = decode(&response)?;
        match (body.success, body.error) {
            (true, _) => Ok(body.records),
            (false, Some(error)) => Err(ClientError::Server(error)),
            (false, None) => Err(ClientError::Server(FALLBACK_FAILURE_MESSAGE.to_string())),
        }
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, ClientError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ClientError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ClientError::Task(e.to_string()))?
}

fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, ClientError> {
    serde_json::from_slice(&response.body).map_err(|e| ClientError::MalformedResponse {
        status: response.status,
        reason: e.to_string(),
    })
}

fn interpret(body: VerifyResponseBody) -> VerificationResult {
    if body.success {
        VerificationResult::Completed {
            verified: body.verified,
            message: body.message,
            embedding_saved: body.embedding_saved,
            verification_id: body.verification_id,
        }
    } else {
        VerificationResult::Failed {
            error: body
                .error
                .unwrap_or_else(|| FALLBACK_FAILURE_MESSAGE.to_string()),
        }
    }
}

// ─── Mock Transport (for tests) ─────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Canned-reply transport that records every request.
    pub struct MockTransport {
        reply: Result<HttpResponse, TransportError>,
        requests: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl MockTransport {
        pub fn json(status: u16, body: &str) -> Self {
            Self::replying(Ok(HttpResponse {
                status,
                body: body.as_bytes().to_vec(),
            }))
        }

        pub fn failing(err: TransportError) -> Self {
            Self::replying(Err(err))
        }

        fn replying(reply: Result<HttpResponse, TransportError>) -> Self {
            Self {
                reply,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn requests(&self) -> Vec<(String, Vec<u8>)> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl HttpTransport for MockTransport {
        fn post(
            &self,
            url: &str,
            _headers: &[(&str, &str)],
            body: &[u8],
        ) -> Result<HttpResponse, TransportError> {
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), body.to_vec()));
            self.reply.clone()
        }

        fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push((url.to_string(), Vec::new()));
            self.reply.clone()
        }
    }
}
