//! Wire shapes of the analysis service responses.
//!
//! Every response is decoded into one of these structs before anything else
//! looks at it. A body that does not fit is a decode error, which is kept apart
//! from the service reporting a failure in a well-formed envelope.

use super::ApiError;
use crate::model::{ProgressSnapshot, Session};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Common `{success, error, message}` envelope carried by every reply.
pub(crate) trait ServiceReply {
    fn success(&self) -> bool;
    fn error(&self) -> Option<&str>;
    fn message(&self) -> Option<&str>;

    /// The failure reported by the service, if any.
    fn failure(&self) -> Option<String> {
        if let Some(err) = self.error().filter(|e| !e.trim().is_empty()) {
            return Some(err.to_string());
        }
        if !self.success() {
            return Some(
                self.message()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or("the service reported a failure")
                    .to_string(),
            );
        }
        None
    }
}

macro_rules! service_reply {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ServiceReply for $ty {
                fn success(&self) -> bool {
                    self.success
                }
                fn error(&self) -> Option<&str> {
                    self.error.as_deref()
                }
                fn message(&self) -> Option<&str> {
                    self.message.as_deref()
                }
            }
        )+
    };
}

#[derive(Debug, Deserialize)]
pub(crate) struct AckResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AnalyzeResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProgressResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub percentage: Option<f64>,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub total_steps: Option<u32>,
    #[serde(default)]
    pub estimated_time: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SessionsResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub session: Option<Session>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UploadResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

service_reply!(
    AckResponse,
    AnalyzeResponse,
    ProgressResponse,
    SessionsResponse,
    StatusResponse,
    UploadResponse,
);

impl From<ProgressResponse> for ProgressSnapshot {
    fn from(r: ProgressResponse) -> Self {
        ProgressSnapshot::new(
            r.percentage.unwrap_or(0.0),
            r.current_step.unwrap_or_default(),
            r.total_steps,
            r.estimated_time,
            r.completed,
        )
    }
}

/// Interpret an HTTP status and body as a reply of type `T`.
///
/// The service answers errors with `{"error": "..."}` and a 4xx/5xx status, so
/// the envelope is inspected before the status code: a readable error message
/// is an application error, an unreadable non-2xx body is a status error.
pub(crate) fn interpret<T>(endpoint: &str, status: u16, body: &str) -> Result<T, ApiError>
where
    T: DeserializeOwned + ServiceReply,
{
    let ok_status = (200..300).contains(&status);
    match serde_json::from_str::<T>(body) {
        Ok(reply) => {
            if let Some(failure) = reply.failure() {
                return Err(ApiError::Application(failure));
            }
            if !ok_status {
                return Err(ApiError::Status {
                    endpoint: endpoint.to_string(),
                    status,
                });
            }
            Ok(reply)
        }
        Err(e) => {
            if !ok_status {
                // Shape mismatch on an error page (HTML, proxy text, ...).
                if let Ok(ack) = serde_json::from_str::<AckResponse>(body) {
                    if let Some(failure) = ack.failure() {
                        return Err(ApiError::Application(failure));
                    }
                }
                return Err(ApiError::Status {
                    endpoint: endpoint.to_string(),
                    status,
                });
            }
            Err(ApiError::Decode {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionStatus;

    #[test]
    fn test_progress_reply_decodes() {
        let r: ProgressResponse = interpret(
            "/api/progress/abc123",
            200,
            r#"{"success":true,"percentage":45,"current_step":"Coletando dados","completed":false}"#,
        )
        .unwrap();
        let snap = ProgressSnapshot::from(r);
        assert_eq!(snap.percentage, 45.0);
        assert_eq!(snap.current_step, "Coletando dados");
        assert!(!snap.completed);
    }

    #[test]
    fn test_error_envelope_on_404_is_application_error() {
        let err = interpret::<ProgressResponse>(
            "/api/progress/x",
            404,
            r#"{"error":"Sessão não encontrada"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Application(ref m) if m == "Sessão não encontrada"));
        assert!(err.is_explicit_failure());
    }

    #[test]
    fn test_success_false_without_message() {
        let err = interpret::<AckResponse>("/api/sessions/clear", 200, r#"{"success":false}"#)
            .unwrap_err();
        assert!(matches!(err, ApiError::Application(_)));
    }

    #[test]
    fn test_html_error_page_is_status_error() {
        let err = interpret::<SessionsResponse>("/api/sessions", 502, "<html>Bad gateway</html>")
            .unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 502, .. }));
        assert!(!err.is_explicit_failure());
    }

    #[test]
    fn test_wrong_shape_is_decode_error() {
        let err = interpret::<SessionsResponse>(
            "/api/sessions",
            200,
            r#"{"success":true,"sessions":{"not":"a list"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Decode { .. }));
    }

    #[test]
    fn test_sessions_reply_decodes_server_fields() {
        let r: SessionsResponse = interpret(
            "/api/sessions",
            200,
            r#"{"success":true,"total":1,"sessions":[{"session_id":"session_1","status":"paused",
                "segmento":"Moda","produto":"Tênis","started_at":"2024-05-01T10:00:00.123456",
                "completed_at":null,"paused_at":"2024-05-01T10:05:00","error":null,"etapas_salvas":4}]}"#,
        )
        .unwrap();
        assert_eq!(r.sessions.len(), 1);
        assert_eq!(r.sessions[0].status, SessionStatus::Paused);
        assert_eq!(r.sessions[0].etapas_salvas, 4);
        assert_eq!(r.sessions[0].completed_at, None);
    }
}
