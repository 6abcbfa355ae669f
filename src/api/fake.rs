//! Recording in-memory `AnalysisApi` for tests.

use super::{AnalysisApi, ApiError};
use crate::model::{AnalysisForm, ProgressSnapshot, Session, SessionAction};
use crate::validation::UploadFile;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub(crate) struct FakeApi {
    calls: Mutex<Vec<String>>,
    analyze: Mutex<VecDeque<Result<String, ApiError>>>,
    progress: Mutex<VecDeque<Result<ProgressSnapshot, ApiError>>>,
    sessions: Mutex<Option<Result<Vec<Session>, String>>>,
    status: Mutex<HashMap<String, Session>>,
    failures: Mutex<HashMap<String, String>>,
    uploaded: Mutex<Vec<String>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply_analyze(&self, reply: Result<String, ApiError>) {
        self.analyze.lock().unwrap().push_back(reply);
    }

    pub fn reply_progress(&self, reply: Result<ProgressSnapshot, ApiError>) {
        self.progress.lock().unwrap().push_back(reply);
    }

    pub fn set_sessions(&self, sessions: Vec<Session>) {
        *self.sessions.lock().unwrap() = Some(Ok(sessions));
    }

    pub fn fail_sessions(&self, message: &str) {
        *self.sessions.lock().unwrap() = Some(Err(message.to_string()));
    }

    pub fn set_status(&self, session: Session) {
        self.status
            .lock()
            .unwrap()
            .insert(session.session_id.clone(), session);
    }

    /// Make the call recorded as `call` (e.g. `"POST /api/sessions/s1/pause"`) fail.
    pub fn fail(&self, call: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(call.to_string(), message.to_string());
    }

    /// Make the call recorded as `call` take `by` before it answers.
    pub fn delay(&self, call: &str, by: Duration) {
        self.delays.lock().unwrap().insert(call.to_string(), by);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploaded.lock().unwrap().clone()
    }

    async fn answer_after_delay(&self, call: &str) {
        let delay = self.delays.lock().unwrap().get(call).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn record(&self, call: String) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(call.clone());
        match self.failures.lock().unwrap().get(&call) {
            Some(msg) => Err(ApiError::Application(msg.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AnalysisApi for FakeApi {
    async fn analyze(&self, _form: &AnalysisForm) -> Result<String, ApiError> {
        self.record("POST /api/analyze".into())?;
        self.answer_after_delay("POST /api/analyze").await;
        self.analyze
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Application("no analyze reply queued".into())))
    }

    async fn progress(&self, session_id: &str) -> Result<ProgressSnapshot, ApiError> {
        let call = format!("GET /api/progress/{session_id}");
        self.record(call.clone())?;
        self.answer_after_delay(&call).await;
        self.progress.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(ApiError::Status {
                endpoint: format!("/api/progress/{session_id}"),
                status: 503,
            })
        })
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, ApiError> {
        self.record("GET /api/sessions".into())?;
        match self.sessions.lock().unwrap().clone() {
            Some(Ok(list)) => Ok(list),
            Some(Err(msg)) => Err(ApiError::Application(msg)),
            None => Ok(Vec::new()),
        }
    }

    async fn session_status(&self, session_id: &str) -> Result<Session, ApiError> {
        self.record(format!("GET /api/sessions/{session_id}/status"))?;
        self.status
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| ApiError::Application("Sessão não encontrada".into()))
    }

    async fn session_action(
        &self,
        session_id: &str,
        action: SessionAction,
    ) -> Result<(), ApiError> {
        self.record(format!(
            "POST /api/sessions/{session_id}/{}",
            action.path_segment()
        ))
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), ApiError> {
        self.record(format!("DELETE /api/sessions/{session_id}"))
    }

    async fn clear_sessions(&self) -> Result<(), ApiError> {
        self.record("POST /api/sessions/clear".into())
    }

    async fn upload(&self, file: &UploadFile) -> Result<String, ApiError> {
        self.record(format!("POST /api/upload {}", file.file_name))?;
        self.uploaded.lock().unwrap().push(file.file_name.clone());
        Ok(format!("file-{}", file.file_name))
    }
}
