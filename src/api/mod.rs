//! Client side of the analysis service REST API.

#[cfg(test)]
pub(crate) mod fake;
mod http;
mod schema;

pub use http::HttpApi;

use crate::model::{AnalysisForm, ProgressSnapshot, Session, SessionAction};
use crate::validation::UploadFile;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced a response (connect, TLS, body read, ...).
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    /// Non-2xx response whose body is not a service error envelope.
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },
    /// The body does not have the shape the endpoint promises.
    #[error("unexpected response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },
    /// The service answered and reported a failure.
    #[error("{0}")]
    Application(String),
}

impl ApiError {
    /// True when the service itself said the operation failed, as opposed to
    /// the request not getting through.
    pub fn is_explicit_failure(&self) -> bool {
        matches!(self, ApiError::Application(_))
    }
}

/// Operations offered by the analysis service.
#[async_trait]
pub trait AnalysisApi: Send + Sync {
    /// `POST /api/analyze`; returns the new session id.
    async fn analyze(&self, form: &AnalysisForm) -> Result<String, ApiError>;

    /// `GET /api/progress/{id}`
    async fn progress(&self, session_id: &str) -> Result<ProgressSnapshot, ApiError>;

    /// `GET /api/sessions`
    async fn list_sessions(&self) -> Result<Vec<Session>, ApiError>;

    /// `GET /api/sessions/{id}/status`
    async fn session_status(&self, session_id: &str) -> Result<Session, ApiError>;

    /// `POST /api/sessions/{id}/{pause|resume|save|continue}`
    async fn session_action(&self, session_id: &str, action: SessionAction)
        -> Result<(), ApiError>;

    /// `DELETE /api/sessions/{id}`
    async fn delete_session(&self, session_id: &str) -> Result<(), ApiError>;

    /// `POST /api/sessions/clear`
    async fn clear_sessions(&self) -> Result<(), ApiError>;

    /// `POST /api/upload`; returns the stored file id.
    async fn upload(&self, file: &UploadFile) -> Result<String, ApiError>;
}
