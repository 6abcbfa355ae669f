//! Session and progress controller.
//!
//! Owns the cached session list, the active session and its progress poll, the
//! notification queue and the persisted client state. Presentation layers send
//! [`UiCommand`]s and receive [`DashboardEvent`]s; they never touch this state
//! directly.
//!
//! Every operation is split in two: a service call, and the state change that
//! follows its reply. Text mode awaits both in line. [`run_controller`] runs
//! the calls as tasks and applies their replies as they come back, so commands,
//! poll ticks and notification expiry keep being served while a call is
//! outstanding.

use super::poller::{PollHandle, PollTick};
use crate::api::{AnalysisApi, ApiError};
use crate::model::{
    AnalysisForm, DashboardConfig, DashboardEvent, Notification, ProgressSnapshot, Session,
    SessionAction, SessionStatus, Severity, StopReason,
};
use crate::notify::NotificationQueue;
use crate::storage::{self, KvStore, CURRENT_SESSION_KEY, FORM_DATA_KEY};
use crate::validation::{self, UploadFile};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Commands emitted by UI layers.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    StartAnalysis(AnalysisForm),
    Pause(String),
    Resume(String),
    Save(String),
    Continue(String),
    /// Sent only after the user confirmed.
    Delete(String),
    /// Sent only after the user confirmed.
    ClearAll,
    Refresh,
    ShowDetail(String),
    Upload(Vec<PathBuf>),
    Dismiss(u64),
    Quit,
}

/// A service call run off the controller loop.
enum Request {
    /// Session list, then the persisted session's status if there is one.
    Startup(Option<String>),
    Analyze(AnalysisForm),
    Progress(PollTick),
    Action(String, SessionAction),
    Delete(String),
    Clear,
    Sessions,
    Detail(String),
    Upload(UploadFile),
}

/// The finished call, applied back on the controller.
enum Reply {
    Startup {
        sessions: Result<Vec<Session>, ApiError>,
        recovered: Option<(String, Result<Session, ApiError>)>,
    },
    Started(AnalysisForm, Result<String, ApiError>),
    Progress(PollTick, Result<ProgressSnapshot, ApiError>),
    Action(String, SessionAction, Result<(), ApiError>),
    Deleted(String, Result<(), ApiError>),
    Cleared(Result<(), ApiError>),
    Sessions(Result<Vec<Session>, ApiError>),
    Detail(Result<Session, ApiError>),
    Uploaded(String, Result<String, ApiError>),
}

async fn perform(api: &dyn AnalysisApi, request: Request) -> Reply {
    match request {
        Request::Startup(persisted) => {
            let sessions = api.list_sessions().await;
            let recovered = match persisted {
                Some(id) => {
                    let status = api.session_status(&id).await;
                    Some((id, status))
                }
                None => None,
            };
            Reply::Startup {
                sessions,
                recovered,
            }
        }
        Request::Analyze(form) => {
            let res = api.analyze(&form).await;
            Reply::Started(form, res)
        }
        Request::Progress(tick) => {
            let res = api.progress(&tick.session_id).await;
            Reply::Progress(tick, res)
        }
        Request::Action(id, action) => {
            let res = api.session_action(&id, action).await;
            Reply::Action(id, action, res)
        }
        Request::Delete(id) => {
            let res = api.delete_session(&id).await;
            Reply::Deleted(id, res)
        }
        Request::Clear => Reply::Cleared(api.clear_sessions().await),
        Request::Sessions => Reply::Sessions(api.list_sessions().await),
        Request::Detail(id) => Reply::Detail(api.session_status(&id).await),
        Request::Upload(file) => {
            let res = api.upload(&file).await;
            Reply::Uploaded(file.file_name, res)
        }
    }
}

/// Receivers the controller's owner feeds back into it.
pub(crate) struct Inbox {
    pub ticks: mpsc::Receiver<PollTick>,
    replies: UnboundedReceiver<Reply>,
}

/// What `Save` leaves behind under `analysis_{id}`.
#[derive(Debug, Serialize)]
struct SaveSnapshot<'a> {
    session_id: &'a str,
    saved_at: String,
    status: Option<SessionStatus>,
    segmento: Option<&'a str>,
    produto: Option<&'a str>,
    progress: Option<&'a ProgressSnapshot>,
    form: Option<BTreeMap<String, String>>,
}

pub(crate) struct SessionController {
    api: Arc<dyn AnalysisApi>,
    store: Box<dyn KvStore>,
    poll_interval: Duration,
    event_tx: UnboundedSender<DashboardEvent>,
    tick_tx: mpsc::Sender<PollTick>,
    reply_tx: UnboundedSender<Reply>,
    requests: Vec<JoinHandle<()>>,

    sessions: HashMap<String, Session>,
    // Server order, for rendering.
    session_order: Vec<String>,
    active: Option<String>,
    poll: Option<PollHandle>,
    generation: u64,
    // Generation whose progress request has not come back yet.
    progress_in_flight: Option<u64>,
    starting: bool,
    progress: Option<ProgressSnapshot>,
    notifications: NotificationQueue,
    restored_form: Option<AnalysisForm>,
}

impl SessionController {
    /// Build a controller and read the persisted form. Poll ticks arriving on
    /// the returned inbox must be fed back through [`Self::on_poll_tick`], or
    /// handed to [`run_controller`] together with the replies.
    pub fn new(
        cfg: &DashboardConfig,
        api: Arc<dyn AnalysisApi>,
        store: Box<dyn KvStore>,
        event_tx: UnboundedSender<DashboardEvent>,
    ) -> (Self, Inbox) {
        // One slot: a tick nobody has picked up yet is not followed by more.
        let (tick_tx, ticks) = mpsc::channel(1);
        let (reply_tx, replies) = mpsc::unbounded_channel();
        let restored_form = storage::load_json::<BTreeMap<String, String>>(store.as_ref(), FORM_DATA_KEY)
            .map(|fields| AnalysisForm::from_fields(&fields));
        let ctrl = Self {
            api,
            store,
            poll_interval: cfg.poll_interval,
            event_tx,
            tick_tx,
            reply_tx,
            requests: Vec::new(),
            sessions: HashMap::new(),
            session_order: Vec::new(),
            active: None,
            poll: None,
            generation: 0,
            progress_in_flight: None,
            starting: false,
            progress: None,
            notifications: NotificationQueue::new(cfg.notification_ttl),
            restored_form,
        };
        (ctrl, Inbox { ticks, replies })
    }

    /// Last submitted form, as read at startup.
    pub fn restored_form(&self) -> Option<AnalysisForm> {
        self.restored_form.clone()
    }

    pub fn active_session(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn is_polling(&self) -> bool {
        self.poll.is_some()
    }

    pub fn progress(&self) -> Option<&ProgressSnapshot> {
        self.progress.as_ref()
    }

    /// Cached sessions in server order.
    pub fn sessions(&self) -> Vec<Session> {
        self.session_order
            .iter()
            .filter_map(|id| self.sessions.get(id).cloned())
            .collect()
    }

    pub fn notifications(&self) -> impl Iterator<Item = &Notification> {
        self.notifications.iter()
    }

    /// Stop polling and abandon outstanding calls. Safe to call more than once.
    pub fn dispose(&mut self) {
        self.stop_polling(StopReason::Disposed);
        for task in self.requests.drain(..) {
            task.abort();
        }
    }

    /// Load the session list and reconcile with whatever session was active
    /// when the client last ran. The reply arrives on the inbox.
    fn begin_startup(&mut self) {
        let persisted = self.store.get(CURRENT_SESSION_KEY);
        if let Some(session_id) = &persisted {
            tracing::info!(%session_id, "recovering persisted session");
        }
        self.spawn_request(Request::Startup(persisted));
    }

    /// Start the service call for `cmd` without waiting for its reply.
    fn dispatch(&mut self, cmd: UiCommand) {
        match cmd {
            UiCommand::StartAnalysis(form) => {
                if self.starting {
                    self.notify("An analysis is already being started", Severity::Warning);
                    return;
                }
                if self.prepare_start(&form) {
                    self.starting = true;
                    self.spawn_request(Request::Analyze(form));
                }
            }
            UiCommand::Pause(id) => self.spawn_request(Request::Action(id, SessionAction::Pause)),
            UiCommand::Resume(id) => {
                self.spawn_request(Request::Action(id, SessionAction::Resume))
            }
            UiCommand::Save(id) => self.spawn_request(Request::Action(id, SessionAction::Save)),
            UiCommand::Continue(id) => {
                if self.prepare_continue(&id) {
                    self.spawn_request(Request::Action(id, SessionAction::Continue));
                }
            }
            UiCommand::Delete(id) => self.spawn_request(Request::Delete(id)),
            UiCommand::ClearAll => self.spawn_request(Request::Clear),
            UiCommand::Refresh => self.spawn_request(Request::Sessions),
            UiCommand::ShowDetail(id) => self.spawn_request(Request::Detail(id)),
            UiCommand::Upload(paths) => {
                for path in paths {
                    if let Some(file) = self.check_upload(&path) {
                        self.spawn_request(Request::Upload(file));
                    }
                }
            }
            UiCommand::Dismiss(id) => self.dismiss(id),
            UiCommand::Quit => self.dispose(),
        }
    }

    /// Request progress for a live tick, unless the previous request for the
    /// same poll is still out.
    fn dispatch_tick(&mut self, tick: PollTick) {
        if !self.is_current(&tick) {
            tracing::trace!(generation = tick.generation, "ignoring stale poll tick");
            return;
        }
        if self.progress_in_flight == Some(tick.generation) {
            tracing::trace!(generation = tick.generation, "progress request still pending");
            return;
        }
        self.progress_in_flight = Some(tick.generation);
        self.spawn_request(Request::Progress(tick));
    }

    fn apply(&mut self, reply: Reply) {
        match reply {
            Reply::Startup {
                sessions,
                recovered,
            } => {
                self.on_sessions(sessions);
                if let Some((session_id, status)) = recovered {
                    self.on_recovered(&session_id, status);
                }
            }
            Reply::Started(form, res) => {
                self.starting = false;
                self.on_started(&form, res);
            }
            Reply::Progress(tick, res) => {
                if self.progress_in_flight == Some(tick.generation) {
                    self.progress_in_flight = None;
                }
                if self.on_progress(&tick, res) {
                    self.spawn_request(Request::Sessions);
                }
            }
            Reply::Action(id, action, res) => {
                self.on_action(&id, action, res);
            }
            Reply::Deleted(id, res) => {
                self.on_deleted(&id, res);
            }
            Reply::Cleared(res) => {
                self.on_cleared(res);
            }
            Reply::Sessions(res) => {
                self.on_sessions(res);
            }
            Reply::Detail(res) => {
                self.on_detail(res);
            }
            Reply::Uploaded(file_name, res) => {
                self.on_uploaded(&file_name, res);
            }
        }
    }

    fn spawn_request(&mut self, request: Request) {
        let api = Arc::clone(&self.api);
        let reply_tx = self.reply_tx.clone();
        self.requests.retain(|task| !task.is_finished());
        self.requests.push(tokio::spawn(async move {
            let reply = perform(api.as_ref(), request).await;
            let _ = reply_tx.send(reply);
        }));
    }

    /// Validate and submit the form. On success the new session becomes the
    /// active one and is polled. Returns whether a session was started.
    pub async fn start_analysis(&mut self, form: AnalysisForm) -> bool {
        if !self.prepare_start(&form) {
            return false;
        }
        let res = self.api.analyze(&form).await;
        self.on_started(&form, res)
    }

    fn prepare_start(&mut self, form: &AnalysisForm) -> bool {
        if let Err(e) = validation::validate_form(form) {
            self.notify(e.to_string(), Severity::Warning);
            return false;
        }
        if let Err(e) = storage::save_json(self.store.as_mut(), FORM_DATA_KEY, &form.to_fields()) {
            tracing::warn!(error = %e, "could not persist form data");
        }
        self.set_busy(Some("Starting analysis…"));
        true
    }

    fn on_started(&mut self, form: &AnalysisForm, res: Result<String, ApiError>) -> bool {
        self.set_busy(None);
        match res {
            Ok(session_id) => {
                tracing::info!(%session_id, segmento = %form.segmento, "analysis started");
                self.activate(&session_id);
                self.notify(
                    format!("Analysis started (session {session_id})"),
                    Severity::Success,
                );
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "analysis request failed");
                self.notify(format!("Could not start analysis: {e}"), Severity::Error);
                false
            }
        }
    }

    /// Handle one poll tick. Ticks from a poll that has since been replaced or
    /// stopped are ignored.
    pub async fn on_poll_tick(&mut self, tick: PollTick) {
        if !self.is_current(&tick) {
            tracing::trace!(generation = tick.generation, "ignoring stale poll tick");
            return;
        }
        let res = self.api.progress(&tick.session_id).await;
        if self.on_progress(&tick, res) {
            self.refresh_sessions().await;
        }
    }

    fn is_current(&self, tick: &PollTick) -> bool {
        matches!(&self.poll, Some(p) if p.generation() == tick.generation)
    }

    /// Apply a progress reply. Returns true when the analysis just completed
    /// and the session list should be reloaded.
    fn on_progress(&mut self, tick: &PollTick, res: Result<ProgressSnapshot, ApiError>) -> bool {
        // The poll may have been stopped or replaced while the request was out.
        if !self.is_current(tick) {
            tracing::trace!(generation = tick.generation, "dropping stale progress reply");
            return false;
        }
        let session_id = &tick.session_id;
        match res {
            Ok(snap) => {
                self.progress = Some(snap.clone());
                let _ = self.event_tx.send(DashboardEvent::Progress(snap.clone()));
                if !snap.completed {
                    return false;
                }
                self.stop_polling(StopReason::Completed);
                self.active = None;
                self.emit_active();
                self.forget_persisted_session();
                self.notify("Analysis completed successfully", Severity::Success);
                true
            }
            Err(e) if e.is_explicit_failure() => {
                self.stop_polling(StopReason::Failed);
                self.emit_active();
                self.notify(format!("Progress check failed: {e}"), Severity::Error);
                false
            }
            Err(e) => {
                // Each tick stands alone; the next one tries again.
                tracing::warn!(%session_id, error = %e, "progress poll failed");
                false
            }
        }
    }

    pub async fn pause(&mut self, session_id: &str) -> bool {
        let res = self.api.session_action(session_id, SessionAction::Pause).await;
        self.on_action(session_id, SessionAction::Pause, res)
    }

    pub async fn resume(&mut self, session_id: &str) -> bool {
        let res = self.api.session_action(session_id, SessionAction::Resume).await;
        self.on_action(session_id, SessionAction::Resume, res)
    }

    pub async fn save(&mut self, session_id: &str) -> bool {
        let res = self.api.session_action(session_id, SessionAction::Save).await;
        self.on_action(session_id, SessionAction::Save, res)
    }

    /// Continue an interrupted session. Sessions that are not paused, failed or
    /// saved are refused without contacting the service.
    pub async fn continue_session(&mut self, session_id: &str) -> bool {
        if !self.prepare_continue(session_id) {
            return false;
        }
        let res = self
            .api
            .session_action(session_id, SessionAction::Continue)
            .await;
        self.on_action(session_id, SessionAction::Continue, res)
    }

    fn prepare_continue(&mut self, session_id: &str) -> bool {
        let status = self.sessions.get(session_id).map(|s| s.status);
        if !status.map(SessionStatus::can_continue).unwrap_or(false) {
            self.notify(
                "Only paused, failed or saved sessions can be continued",
                Severity::Warning,
            );
            return false;
        }
        self.set_busy(Some("Continuing analysis…"));
        true
    }

    fn on_action(
        &mut self,
        session_id: &str,
        action: SessionAction,
        res: Result<(), ApiError>,
    ) -> bool {
        if action == SessionAction::Continue {
            self.set_busy(None);
        }
        if let Err(e) = res {
            let what = match action {
                SessionAction::Pause => "pause analysis",
                SessionAction::Resume => "resume analysis",
                SessionAction::Save => "save session",
                SessionAction::Continue => "continue session",
            };
            self.notify(format!("Could not {what}: {e}"), Severity::Error);
            return false;
        }
        match action {
            SessionAction::Pause => {
                self.set_status(session_id, SessionStatus::Paused);
                if self.active.as_deref() == Some(session_id) {
                    self.stop_polling(StopReason::Paused);
                    self.emit_active();
                }
                self.notify("Analysis paused", Severity::Info);
            }
            SessionAction::Resume => {
                self.set_status(session_id, SessionStatus::Running);
                self.activate(session_id);
                self.notify("Analysis resumed", Severity::Success);
            }
            SessionAction::Save => {
                self.write_snapshot(session_id);
                self.notify("Session saved", Severity::Success);
            }
            SessionAction::Continue => {
                self.set_status(session_id, SessionStatus::Running);
                self.activate(session_id);
                self.notify("Analysis continued", Severity::Success);
            }
        }
        true
    }

    /// Delete a session. Confirmation is the caller's job.
    pub async fn delete_session(&mut self, session_id: &str) -> bool {
        let res = self.api.delete_session(session_id).await;
        self.on_deleted(session_id, res)
    }

    fn on_deleted(&mut self, session_id: &str, res: Result<(), ApiError>) -> bool {
        if let Err(e) = res {
            self.notify(format!("Could not delete session: {e}"), Severity::Error);
            return false;
        }
        self.sessions.remove(session_id);
        self.session_order.retain(|id| id != session_id);
        if let Err(e) = self.store.remove(&storage::snapshot_key(session_id)) {
            tracing::warn!(error = %e, "could not remove saved snapshot");
        }
        if self.active.as_deref() == Some(session_id) {
            self.stop_polling(StopReason::Removed);
            self.active = None;
            self.progress = None;
            self.emit_active();
            self.forget_persisted_session();
        }
        let _ = self
            .event_tx
            .send(DashboardEvent::SessionRemoved(session_id.to_string()));
        self.notify("Session deleted", Severity::Success);
        true
    }

    /// Remove every session on the service. Confirmation is the caller's job.
    pub async fn clear_all(&mut self) -> bool {
        let res = self.api.clear_sessions().await;
        self.on_cleared(res)
    }

    fn on_cleared(&mut self, res: Result<(), ApiError>) -> bool {
        if let Err(e) = res {
            self.notify(format!("Could not clear sessions: {e}"), Severity::Error);
            return false;
        }
        self.replace_sessions(Vec::new());
        self.stop_polling(StopReason::Removed);
        self.active = None;
        self.progress = None;
        self.emit_active();
        self.forget_persisted_session();
        self.notify("All sessions cleared", Severity::Success);
        true
    }

    /// Fetch all sessions and replace the cache wholesale.
    pub async fn refresh_sessions(&mut self) -> bool {
        let res = self.api.list_sessions().await;
        self.on_sessions(res)
    }

    fn on_sessions(&mut self, res: Result<Vec<Session>, ApiError>) -> bool {
        match res {
            Ok(list) => {
                tracing::debug!(count = list.len(), "session list refreshed");
                self.replace_sessions(list);
                true
            }
            Err(e) => {
                self.notify(format!("Could not load sessions: {e}"), Severity::Error);
                false
            }
        }
    }

    pub async fn show_detail(&mut self, session_id: &str) -> Option<Session> {
        let res = self.api.session_status(session_id).await;
        self.on_detail(res)
    }

    fn on_detail(&mut self, res: Result<Session, ApiError>) -> Option<Session> {
        match res {
            Ok(session) => {
                self.upsert(session.clone());
                let _ = self
                    .event_tx
                    .send(DashboardEvent::SessionDetail(session.clone()));
                Some(session)
            }
            Err(e) => {
                self.notify(format!("Could not load session: {e}"), Severity::Error);
                None
            }
        }
    }

    fn on_recovered(&mut self, session_id: &str, res: Result<Session, ApiError>) {
        let session = match res {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(%session_id, error = %e, "could not query persisted session");
                return;
            }
        };
        self.upsert(session.clone());
        match session.status {
            SessionStatus::Running => {
                self.activate(session_id);
                self.notify(
                    format!("Resumed tracking of analysis {session_id}"),
                    Severity::Info,
                );
            }
            SessionStatus::Paused => {
                self.active = Some(session_id.to_string());
                self.emit_active();
                self.notify(format!("Analysis {session_id} is paused"), Severity::Info);
            }
            SessionStatus::Completed => {
                self.forget_persisted_session();
            }
            SessionStatus::Error => {
                let reason = session
                    .error
                    .unwrap_or_else(|| "unknown error".to_string());
                self.notify(
                    format!("Analysis {session_id} failed: {reason}"),
                    Severity::Error,
                );
            }
            SessionStatus::Saved | SessionStatus::Unknown => {
                tracing::debug!(%session_id, status = session.status.as_str(), "nothing to recover");
            }
        }
    }

    /// Validate and upload each file on its own. Rejected files never reach the
    /// service. Returns how many uploads succeeded.
    pub async fn upload_files(&mut self, paths: &[PathBuf]) -> usize {
        let mut uploaded = 0;
        for path in paths {
            let Some(file) = self.check_upload(path) else {
                continue;
            };
            let res = self.api.upload(&file).await;
            if self.on_uploaded(&file.file_name, res) {
                uploaded += 1;
            }
        }
        uploaded
    }

    fn check_upload(&mut self, path: &Path) -> Option<UploadFile> {
        match validation::prepare_upload(path) {
            Ok(file) => Some(file),
            Err(rejection) => {
                tracing::info!(path = %path.display(), reason = %rejection, "upload rejected");
                self.notify(rejection.to_string(), Severity::Warning);
                None
            }
        }
    }

    fn on_uploaded(&mut self, file_name: &str, res: Result<String, ApiError>) -> bool {
        match res {
            Ok(file_id) => {
                tracing::info!(file = %file_name, %file_id, "file uploaded");
                self.notify(format!("{file_name} uploaded"), Severity::Success);
                true
            }
            Err(e) => {
                self.notify(format!("Upload of {file_name} failed: {e}"), Severity::Error);
                false
            }
        }
    }

    pub fn dismiss(&mut self, id: u64) {
        if self.notifications.dismiss(id) {
            let _ = self.event_tx.send(DashboardEvent::Dismissed(id));
        }
    }

    pub fn expire_notifications(&mut self, now: Instant) {
        for id in self.notifications.expire(now) {
            let _ = self.event_tx.send(DashboardEvent::Dismissed(id));
        }
    }

    /// Make `session_id` the active session: persist it and (re)start polling.
    fn activate(&mut self, session_id: &str) {
        self.active = Some(session_id.to_string());
        if let Err(e) = self.store.set(CURRENT_SESSION_KEY, session_id.to_string()) {
            tracing::warn!(error = %e, "could not persist active session");
        }
        self.start_polling(session_id);
    }

    fn start_polling(&mut self, session_id: &str) {
        self.stop_polling(StopReason::Replaced);
        self.generation += 1;
        self.progress = None;
        self.poll = Some(PollHandle::spawn(
            session_id.to_string(),
            self.generation,
            self.poll_interval,
            self.tick_tx.clone(),
        ));
        tracing::debug!(%session_id, generation = self.generation, "polling started");
        self.emit_active();
    }

    /// Cancel the current poll, if any. Returns whether one was running.
    fn stop_polling(&mut self, reason: StopReason) -> bool {
        let Some(poll) = self.poll.take() else {
            return false;
        };
        tracing::debug!(session_id = poll.session_id(), ?reason, "polling stopped");
        let _ = self.event_tx.send(DashboardEvent::PollingStopped {
            session_id: poll.session_id().to_string(),
            reason,
        });
        true
    }

    fn forget_persisted_session(&mut self) {
        if let Err(e) = self.store.remove(CURRENT_SESSION_KEY) {
            tracing::warn!(error = %e, "could not clear persisted session");
        }
    }

    fn write_snapshot(&mut self, session_id: &str) {
        let session = self.sessions.get(session_id);
        let progress = if self.active.as_deref() == Some(session_id) {
            self.progress.as_ref()
        } else {
            None
        };
        let snapshot = SaveSnapshot {
            session_id,
            saved_at: now_rfc3339(),
            status: session.map(|s| s.status),
            segmento: session.and_then(|s| s.segmento.as_deref()),
            produto: session.and_then(|s| s.produto.as_deref()),
            progress,
            form: self.restored_form_fields(),
        };
        let key = storage::snapshot_key(session_id);
        let encoded = serde_json::to_string(&snapshot);
        match encoded {
            Ok(raw) => {
                if let Err(e) = self.store.set(&key, raw) {
                    tracing::warn!(error = %e, "could not persist save snapshot");
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not encode save snapshot"),
        }
    }

    fn restored_form_fields(&self) -> Option<BTreeMap<String, String>> {
        storage::load_json(self.store.as_ref(), FORM_DATA_KEY)
    }

    fn replace_sessions(&mut self, list: Vec<Session>) {
        self.session_order = list.iter().map(|s| s.session_id.clone()).collect();
        self.sessions = list
            .iter()
            .map(|s| (s.session_id.clone(), s.clone()))
            .collect();
        let _ = self.event_tx.send(DashboardEvent::SessionsReplaced(list));
    }

    fn upsert(&mut self, session: Session) {
        if !self.sessions.contains_key(&session.session_id) {
            self.session_order.push(session.session_id.clone());
        }
        self.sessions
            .insert(session.session_id.clone(), session.clone());
        let _ = self.event_tx.send(DashboardEvent::SessionUpdated(session));
    }

    fn set_status(&mut self, session_id: &str, status: SessionStatus) {
        if let Some(s) = self.sessions.get(session_id) {
            let mut updated = s.clone();
            updated.status = status;
            self.upsert(updated);
        }
    }

    fn emit_active(&self) {
        let _ = self.event_tx.send(DashboardEvent::ActiveSession {
            session_id: self.active.clone(),
            polling: self.poll.is_some(),
        });
    }

    fn set_busy(&self, label: Option<&str>) {
        let _ = self
            .event_tx
            .send(DashboardEvent::Busy(label.map(str::to_string)));
    }

    fn notify(&mut self, message: impl Into<String>, severity: Severity) {
        let n = self.notifications.push(message, severity);
        match severity {
            Severity::Error => tracing::error!(text = %n.message, "notification"),
            Severity::Warning => tracing::warn!(text = %n.message, "notification"),
            Severity::Info | Severity::Success => {
                tracing::info!(text = %n.message, "notification")
            }
        }
        let _ = self.event_tx.send(DashboardEvent::Notified(n));
    }
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "now".into())
}

/// Drive the controller. Commands, poll ticks, service replies and
/// notification expiry are handled one at a time, so nothing here needs a
/// lock; service calls run as separate tasks and never hold the loop up.
pub(crate) async fn run_controller(
    mut ctrl: SessionController,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
    mut inbox: Inbox,
) {
    ctrl.begin_startup();
    let mut housekeeping = tokio::time::interval(Duration::from_millis(250));

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Quit) | None => break,
                    Some(cmd) => ctrl.dispatch(cmd),
                }
            }
            Some(tick) = inbox.ticks.recv() => ctrl.dispatch_tick(tick),
            Some(reply) = inbox.replies.recv() => ctrl.apply(reply),
            _ = housekeeping.tick() => {
                ctrl.expire_notifications(Instant::now());
            }
        }
    }

    ctrl.dispose();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeApi;
    use crate::storage::MemoryStore;

    struct Harness {
        api: Arc<FakeApi>,
        ctrl: SessionController,
        inbox: Inbox,
        events: UnboundedReceiver<DashboardEvent>,
    }

    fn cfg() -> DashboardConfig {
        DashboardConfig {
            base_url: "http://localhost:5000".into(),
            poll_interval: Duration::from_secs(3),
            notification_ttl: Duration::from_secs(5),
            user_agent: "test".into(),
        }
    }

    fn harness_with(store: MemoryStore) -> Harness {
        let api = Arc::new(FakeApi::new());
        let (event_tx, events) = mpsc::unbounded_channel();
        let (ctrl, inbox) = SessionController::new(&cfg(), api.clone(), Box::new(store), event_tx);
        Harness {
            api,
            ctrl,
            inbox,
            events,
        }
    }

    impl Harness {
        /// Run the startup call and apply its reply.
        async fn startup(&mut self) {
            self.ctrl.begin_startup();
            let reply = self.inbox.replies.recv().await.unwrap();
            self.ctrl.apply(reply);
        }
    }

    fn harness() -> Harness {
        harness_with(MemoryStore::new())
    }

    fn session(id: &str, status: SessionStatus) -> Session {
        Session {
            session_id: id.into(),
            status,
            segmento: Some("Moda".into()),
            produto: Some("Tênis".into()),
            started_at: Some("2024-05-01T10:00:00".into()),
            completed_at: None,
            paused_at: None,
            etapas_salvas: 2,
            error: None,
            active: None,
            saved: None,
        }
    }

    fn form(segmento: &str, produto: &str) -> AnalysisForm {
        AnalysisForm {
            segmento: segmento.into(),
            produto: produto.into(),
            ..Default::default()
        }
    }

    fn snap(percentage: f64, step: &str, completed: bool) -> ProgressSnapshot {
        ProgressSnapshot::new(percentage, step.into(), Some(13), None, completed)
    }

    fn severities(ctrl: &SessionController) -> Vec<Severity> {
        ctrl.notifications().map(|n| n.severity).collect()
    }

    fn drain(events: &mut UnboundedReceiver<DashboardEvent>) -> Vec<DashboardEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = events.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_segment_warns_without_network() {
        let mut h = harness();
        assert!(!h.ctrl.start_analysis(form("Mo", "Tênis")).await);
        assert!(h.api.calls().is_empty());
        assert_eq!(severities(&h.ctrl), vec![Severity::Warning]);
        assert!(h.ctrl.active_session().is_none());
        assert!(!h.ctrl.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_persists_session_and_polls_it() {
        let mut h = harness();
        h.api.reply_analyze(Ok("abc123".into()));
        assert!(h.ctrl.start_analysis(form("Moda", "Tênis")).await);

        assert_eq!(h.ctrl.active_session(), Some("abc123"));
        assert_eq!(
            h.ctrl.store.get(CURRENT_SESSION_KEY).as_deref(),
            Some("abc123")
        );
        let saved: BTreeMap<String, String> =
            storage::load_json(h.ctrl.store.as_ref(), FORM_DATA_KEY).unwrap();
        assert_eq!(saved.get("segmento").map(String::as_str), Some("Moda"));

        h.api.reply_progress(Ok(snap(10.0, "Pesquisa", false)));
        let tick = h.inbox.ticks.recv().await.unwrap();
        assert_eq!(tick.session_id, "abc123");
        h.ctrl.on_poll_tick(tick).await;
        assert_eq!(h.api.count("GET /api/progress/abc123"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_leaves_nothing_active() {
        let mut h = harness();
        h.api
            .reply_analyze(Err(ApiError::Application("Dados não fornecidos".into())));
        assert!(!h.ctrl.start_analysis(form("Moda", "Tênis")).await);
        assert!(h.ctrl.active_session().is_none());
        assert!(!h.ctrl.is_polling());
        assert_eq!(h.ctrl.store.get(CURRENT_SESSION_KEY), None);
        assert_eq!(severities(&h.ctrl), vec![Severity::Error]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_update_does_not_refresh_list() {
        let mut h = harness();
        h.api.reply_analyze(Ok("abc123".into()));
        h.ctrl.start_analysis(form("Moda", "Tênis")).await;

        h.api.reply_progress(Ok(snap(45.0, "Coletando dados", false)));
        let tick = h.inbox.ticks.recv().await.unwrap();
        h.ctrl.on_poll_tick(tick).await;

        let p = h.ctrl.progress().unwrap();
        assert_eq!(crate::view::percent_label(p.percentage), "45%");
        assert_eq!(p.current_step, "Coletando dados");
        assert!(h.ctrl.is_polling());
        assert_eq!(h.api.count("GET /api/sessions"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_stops_poll_and_refreshes_once() {
        let mut h = harness();
        h.api.reply_analyze(Ok("abc123".into()));
        h.ctrl.start_analysis(form("Moda", "Tênis")).await;
        h.api.set_sessions(vec![session("abc123", SessionStatus::Completed)]);

        h.api.reply_progress(Ok(snap(100.0, "Análise concluída", true)));
        let tick = h.inbox.ticks.recv().await.unwrap();
        h.ctrl.on_poll_tick(tick).await;

        assert!(!h.ctrl.is_polling());
        assert!(h.ctrl.active_session().is_none());
        assert_eq!(h.ctrl.store.get(CURRENT_SESSION_KEY), None);
        assert_eq!(h.api.count("GET /api/sessions"), 1);
        assert_eq!(severities(&h.ctrl).last(), Some(&Severity::Success));
        assert_eq!(h.ctrl.sessions()[0].status, SessionStatus::Completed);

        // No further ticks once stopped.
        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert!(h.inbox.ticks.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_keeps_polling() {
        let mut h = harness();
        h.api.reply_analyze(Ok("abc123".into()));
        h.ctrl.start_analysis(form("Moda", "Tênis")).await;

        h.api.reply_progress(Err(ApiError::Status {
            endpoint: "/api/progress/abc123".into(),
            status: 502,
        }));
        let tick = h.inbox.ticks.recv().await.unwrap();
        h.ctrl.on_poll_tick(tick).await;
        assert!(h.ctrl.is_polling());

        h.api.reply_progress(Ok(snap(20.0, "Análise", false)));
        let tick = h.inbox.ticks.recv().await.unwrap();
        h.ctrl.on_poll_tick(tick).await;
        assert_eq!(h.ctrl.progress().map(|p| p.percentage), Some(20.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_error_stops_polling() {
        let mut h = harness();
        h.api.reply_analyze(Ok("abc123".into()));
        h.ctrl.start_analysis(form("Moda", "Tênis")).await;

        h.api
            .reply_progress(Err(ApiError::Application("Sessão não encontrada".into())));
        let tick = h.inbox.ticks.recv().await.unwrap();
        h.ctrl.on_poll_tick(tick).await;

        assert!(!h.ctrl.is_polling());
        assert_eq!(severities(&h.ctrl).last(), Some(&Severity::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_poll_replaces_old_one() {
        let mut h = harness();
        h.ctrl.start_polling("first");
        h.ctrl.start_polling("second");

        let tick = h.inbox.ticks.recv().await.unwrap();
        assert_eq!(tick.session_id, "second");
        tokio::task::yield_now().await;
        assert!(h.inbox.ticks.try_recv().is_err());

        let stopped: Vec<_> = drain(&mut h.events)
            .into_iter()
            .filter_map(|e| match e {
                DashboardEvent::PollingStopped { session_id, reason } => Some((session_id, reason)),
                _ => None,
            })
            .collect();
        assert_eq!(stopped, vec![("first".to_string(), StopReason::Replaced)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_tick_is_ignored() {
        let mut h = harness();
        h.ctrl.start_polling("first");
        let stale = PollTick {
            generation: h.ctrl.generation,
            session_id: "first".into(),
        };
        h.ctrl.start_polling("second");
        h.ctrl.on_poll_tick(stale).await;
        assert!(h.api.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_stops_poll_and_resume_restarts_it() {
        let mut h = harness();
        h.api.set_sessions(vec![session("abc123", SessionStatus::Running)]);
        h.ctrl.refresh_sessions().await;
        h.api.reply_analyze(Ok("abc123".into()));
        h.ctrl.start_analysis(form("Moda", "Tênis")).await;

        assert!(h.ctrl.pause("abc123").await);
        assert!(!h.ctrl.is_polling());
        assert_eq!(h.ctrl.active_session(), Some("abc123"));
        assert_eq!(h.ctrl.sessions()[0].status, SessionStatus::Paused);

        assert!(h.ctrl.resume("abc123").await);
        assert!(h.ctrl.is_polling());
        assert_eq!(h.ctrl.sessions()[0].status, SessionStatus::Running);
        let tick = h.inbox.ticks.recv().await.unwrap();
        assert_eq!(tick.session_id, "abc123");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_pause_changes_nothing() {
        let mut h = harness();
        h.api.set_sessions(vec![session("abc123", SessionStatus::Running)]);
        h.ctrl.refresh_sessions().await;
        h.api.reply_analyze(Ok("abc123".into()));
        h.ctrl.start_analysis(form("Moda", "Tênis")).await;
        h.api.fail("POST /api/sessions/abc123/pause", "Sessão não está em execução");

        assert!(!h.ctrl.pause("abc123").await);
        assert!(h.ctrl.is_polling());
        assert_eq!(h.ctrl.sessions()[0].status, SessionStatus::Running);
        assert_eq!(severities(&h.ctrl).last(), Some(&Severity::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_refused_for_running_session() {
        let mut h = harness();
        h.api.set_sessions(vec![session("s1", SessionStatus::Running)]);
        h.ctrl.refresh_sessions().await;

        assert!(!h.ctrl.continue_session("s1").await);
        assert_eq!(h.api.count("POST /api/sessions/s1/continue"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_saved_session_activates_it() {
        let mut h = harness();
        h.api.set_sessions(vec![session("s1", SessionStatus::Saved)]);
        h.ctrl.refresh_sessions().await;

        assert!(h.ctrl.continue_session("s1").await);
        assert_eq!(h.ctrl.active_session(), Some("s1"));
        assert!(h.ctrl.is_polling());
        assert_eq!(h.ctrl.store.get(CURRENT_SESSION_KEY).as_deref(), Some("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_writes_snapshot() {
        let mut h = harness();
        h.api.set_sessions(vec![session("s1", SessionStatus::Paused)]);
        h.ctrl.refresh_sessions().await;

        assert!(h.ctrl.save("s1").await);
        let raw = h.ctrl.store.get("analysis_s1").unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["session_id"], "s1");
        assert_eq!(v["status"], "paused");
        assert_eq!(v["segmento"], "Moda");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_active_session_clears_state() {
        let mut h = harness();
        h.api.set_sessions(vec![
            session("abc123", SessionStatus::Running),
            session("other", SessionStatus::Completed),
        ]);
        h.ctrl.refresh_sessions().await;
        h.api.reply_analyze(Ok("abc123".into()));
        h.ctrl.start_analysis(form("Moda", "Tênis")).await;

        assert!(h.ctrl.delete_session("abc123").await);
        assert!(!h.ctrl.is_polling());
        assert!(h.ctrl.active_session().is_none());
        assert_eq!(h.ctrl.store.get(CURRENT_SESSION_KEY), None);
        let ids: Vec<_> = h.ctrl.sessions().into_iter().map(|s| s.session_id).collect();
        assert_eq!(ids, vec!["other".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delete_keeps_session() {
        let mut h = harness();
        h.api.set_sessions(vec![session("s1", SessionStatus::Completed)]);
        h.ctrl.refresh_sessions().await;
        h.api.fail("DELETE /api/sessions/s1", "boom");

        assert!(!h.ctrl.delete_session("s1").await);
        assert_eq!(h.ctrl.sessions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all_empties_cache() {
        let mut h = harness();
        h.api.set_sessions(vec![session("s1", SessionStatus::Completed)]);
        h.ctrl.refresh_sessions().await;
        assert!(h.ctrl.clear_all().await);
        assert!(h.ctrl.sessions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_replaces_mapping_wholesale() {
        let mut h = harness();
        h.api.set_sessions(vec![session("a", SessionStatus::Completed)]);
        h.ctrl.refresh_sessions().await;
        h.api.set_sessions(vec![
            session("b", SessionStatus::Running),
            session("c", SessionStatus::Saved),
        ]);
        h.ctrl.refresh_sessions().await;
        let ids: Vec<_> = h.ctrl.sessions().into_iter().map(|s| s.session_id).collect();
        assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_keeps_cache() {
        let mut h = harness();
        h.api.set_sessions(vec![session("a", SessionStatus::Completed)]);
        h.ctrl.refresh_sessions().await;
        h.api.fail_sessions("down");
        assert!(!h.ctrl.refresh_sessions().await);
        assert_eq!(h.ctrl.sessions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_resumes_running_session() {
        let mut store = MemoryStore::new();
        store.set(CURRENT_SESSION_KEY, "abc123".into()).unwrap();
        let mut h = harness_with(store);
        h.api.set_status(session("abc123", SessionStatus::Running));

        h.startup().await;
        assert_eq!(h.ctrl.active_session(), Some("abc123"));
        assert!(h.ctrl.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_paused_session_is_not_polled() {
        let mut store = MemoryStore::new();
        store.set(CURRENT_SESSION_KEY, "abc123".into()).unwrap();
        let mut h = harness_with(store);
        h.api.set_status(session("abc123", SessionStatus::Paused));

        h.startup().await;
        assert_eq!(h.ctrl.active_session(), Some("abc123"));
        assert!(!h.ctrl.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_discards_completed_session() {
        let mut store = MemoryStore::new();
        store.set(CURRENT_SESSION_KEY, "abc123".into()).unwrap();
        let mut h = harness_with(store);
        h.api.set_status(session("abc123", SessionStatus::Completed));

        h.startup().await;
        assert!(h.ctrl.active_session().is_none());
        assert_eq!(h.ctrl.store.get(CURRENT_SESSION_KEY), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_error_session_only_notifies() {
        let mut store = MemoryStore::new();
        store.set(CURRENT_SESSION_KEY, "abc123".into()).unwrap();
        let mut h = harness_with(store);
        let mut failed = session("abc123", SessionStatus::Error);
        failed.error = Some("timeout".into());
        h.api.set_status(failed);

        h.startup().await;
        assert!(!h.ctrl.is_polling());
        assert!(h.ctrl.active_session().is_none());
        assert_eq!(severities(&h.ctrl), vec![Severity::Error]);
        assert!(h.ctrl.notifications().any(|n| n.message.contains("timeout")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restored_form_is_read_at_startup() {
        let mut store = MemoryStore::new();
        store
            .set(FORM_DATA_KEY, r#"{"segmento":"Moda","produto":"Tênis"}"#.into())
            .unwrap();
        let h = harness_with(store);
        let form = h.ctrl.restored_form().unwrap();
        assert_eq!(form.segmento, "Moda");
        assert_eq!(form.produto, "Tênis");
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_skips_rejected_files() {
        let dir = tempfile::tempdir().unwrap();
        let big = dir.path().join("big.pdf");
        std::fs::File::create(&big)
            .unwrap()
            .set_len(validation::MAX_UPLOAD_BYTES + 1)
            .unwrap();
        let exe = dir.path().join("tool.exe");
        std::fs::write(&exe, b"MZ").unwrap();
        let ok = dir.path().join("brief.txt");
        std::fs::write(&ok, b"brief").unwrap();

        let mut h = harness();
        let uploaded = h.ctrl.upload_files(&[big, exe, ok]).await;
        assert_eq!(uploaded, 1);
        assert_eq!(h.api.uploaded(), vec!["brief.txt".to_string()]);
        assert_eq!(
            severities(&h.ctrl),
            vec![Severity::Warning, Severity::Warning, Severity::Success]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_expire_and_emit_dismissals() {
        let mut h = harness();
        h.ctrl.start_analysis(form("Mo", "x")).await;
        h.ctrl.start_analysis(form("Mo", "x")).await;
        assert_eq!(h.ctrl.notifications().count(), 2);
        drain(&mut h.events);

        tokio::time::advance(Duration::from_secs(5)).await;
        h.ctrl.expire_notifications(Instant::now());
        assert_eq!(h.ctrl.notifications().count(), 0);
        let dismissed = drain(&mut h.events)
            .into_iter()
            .filter(|e| matches!(e, DashboardEvent::Dismissed(_)))
            .count();
        assert_eq!(dismissed, 2);
    }

    async fn next_detail(events: &mut UnboundedReceiver<DashboardEvent>) -> Session {
        loop {
            match events.recv().await {
                Some(DashboardEvent::SessionDetail(s)) => return s,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_start_does_not_hold_up_other_commands_or_quit() {
        let api = Arc::new(FakeApi::new());
        api.delay("POST /api/analyze", Duration::from_secs(600));
        api.reply_analyze(Ok("abc123".into()));
        api.set_status(session("s1", SessionStatus::Paused));
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let (ctrl, inbox) =
            SessionController::new(&cfg(), api.clone(), Box::new(MemoryStore::new()), event_tx);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let started = Instant::now();
        let controller = tokio::spawn(run_controller(ctrl, cmd_rx, inbox));

        cmd_tx.send(UiCommand::StartAnalysis(form("Moda", "Tênis"))).unwrap();
        cmd_tx.send(UiCommand::ShowDetail("s1".into())).unwrap();
        let detail = tokio::time::timeout(Duration::from_secs(5), next_detail(&mut events))
            .await
            .expect("detail served while the analysis request was pending");
        assert_eq!(detail.session_id, "s1");

        cmd_tx.send(UiCommand::Quit).unwrap();
        tokio::time::timeout(Duration::from_secs(5), controller)
            .await
            .expect("controller stopped after quit")
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(api.count("POST /api/analyze"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_progress_reply_is_not_followed_by_a_burst() {
        let api = Arc::new(FakeApi::new());
        api.reply_analyze(Ok("abc123".into()));
        api.delay("GET /api/progress/abc123", Duration::from_secs(10));
        let (event_tx, _events) = mpsc::unbounded_channel();
        let (ctrl, inbox) =
            SessionController::new(&cfg(), api.clone(), Box::new(MemoryStore::new()), event_tx);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let controller = tokio::spawn(run_controller(ctrl, cmd_rx, inbox));
        cmd_tx.send(UiCommand::StartAnalysis(form("Moda", "Tênis"))).unwrap();

        // Requests go out at 3s and, after the 10s reply, at the next tick (15s).
        tokio::time::sleep(Duration::from_millis(25_500)).await;
        assert_eq!(api.count("GET /api/progress/abc123"), 2);

        cmd_tx.send(UiCommand::Quit).unwrap();
        controller.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_reply_for_replaced_poll_is_dropped() {
        let mut h = harness();
        h.ctrl.start_polling("first");
        let old = PollTick {
            generation: h.ctrl.generation,
            session_id: "first".into(),
        };
        h.ctrl.dispatch_tick(old.clone());
        assert_eq!(h.ctrl.progress_in_flight, Some(old.generation));

        h.ctrl.start_polling("second");
        h.ctrl
            .apply(Reply::Progress(old, Ok(snap(80.0, "Relatório", false))));
        assert!(h.ctrl.progress().is_none());
        assert!(h.ctrl.progress_in_flight.is_none());
        h.ctrl.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_while_first_pending_is_refused() {
        let mut h = harness();
        h.api.delay("POST /api/analyze", Duration::from_secs(60));
        h.api.reply_analyze(Ok("abc123".into()));
        h.ctrl.dispatch(UiCommand::StartAnalysis(form("Moda", "Tênis")));
        h.ctrl.dispatch(UiCommand::StartAnalysis(form("Moda", "Tênis")));
        assert_eq!(severities(&h.ctrl), vec![Severity::Warning]);

        let reply = h.inbox.replies.recv().await.unwrap();
        h.ctrl.apply(reply);
        assert_eq!(h.ctrl.active_session(), Some("abc123"));
        assert_eq!(h.api.count("POST /api/analyze"), 1);
        h.ctrl.dispose();
    }
}
