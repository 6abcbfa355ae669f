use crate::model::{AnalysisForm, DashboardEvent, Notification, ProgressSnapshot, Session, FORM_FIELDS};
use ratatui::{
    style::Color,
    style::Style,
    text::{Line, Span},
};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Analysis,
    Sessions,
    Help,
}

impl Tab {
    pub const ALL: [Tab; 3] = [Tab::Analysis, Tab::Sessions, Tab::Help];

    pub fn index(self) -> usize {
        match self {
            Tab::Analysis => 0,
            Tab::Sessions => 1,
            Tab::Help => 2,
        }
    }

    pub fn next(self) -> Tab {
        Tab::ALL[(self.index() + 1) % Tab::ALL.len()]
    }

    pub fn prev(self) -> Tab {
        Tab::ALL[(self.index() + Tab::ALL.len() - 1) % Tab::ALL.len()]
    }
}

/// A destructive action waiting for y/n.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirm {
    Delete(String),
    ClearAll,
}

impl Confirm {
    pub fn prompt(&self) -> String {
        match self {
            Confirm::Delete(id) => format!("Delete session {id}?"),
            Confirm::ClearAll => "Delete ALL sessions?".to_string(),
        }
    }
}

/// Index of the attachments input, after the analysis fields.
pub const ATTACHMENTS_FIELD: usize = FORM_FIELDS.len();
pub const FIELD_COUNT: usize = FORM_FIELDS.len() + 1;

pub fn field_label(idx: usize) -> &'static str {
    match idx {
        0 => "Segment *",
        1 => "Product *",
        2 => "Target audience",
        3 => "Price",
        4 => "Revenue goal",
        5 => "Marketing budget",
        6 => "Launch deadline",
        7 => "Competitors",
        8 => "Additional data",
        9 => "Question",
        _ => "Attachments",
    }
}

/// Text inputs of the Analysis tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormState {
    pub values: Vec<String>,
    pub focus: usize,
}

impl Default for FormState {
    fn default() -> Self {
        Self {
            values: vec![String::new(); FIELD_COUNT],
            focus: 0,
        }
    }
}

impl FormState {
    pub fn from_form(form: Option<&AnalysisForm>) -> Self {
        let mut state = Self::default();
        if let Some(form) = form {
            let fields = form.to_fields();
            for (i, key) in FORM_FIELDS.iter().enumerate() {
                if let Some(v) = fields.get(*key) {
                    state.values[i] = v.clone();
                }
            }
        }
        state
    }

    pub fn to_form(&self) -> AnalysisForm {
        let fields: BTreeMap<String, String> = FORM_FIELDS
            .iter()
            .zip(&self.values)
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        AnalysisForm::from_fields(&fields)
    }

    /// Comma-separated attachment paths.
    pub fn attachment_paths(&self) -> Vec<PathBuf> {
        self.values[ATTACHMENTS_FIELD]
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect()
    }

    pub fn focused_mut(&mut self) -> &mut String {
        &mut self.values[self.focus]
    }

    pub fn next_field(&mut self) {
        self.focus = (self.focus + 1) % FIELD_COUNT;
    }

    pub fn prev_field(&mut self) {
        self.focus = (self.focus + FIELD_COUNT - 1) % FIELD_COUNT;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Everything the UI thread renders. Owned by that thread only; the controller
/// reaches it through [`apply_event`].
#[derive(Debug)]
pub struct UiState {
    pub tab: Tab,
    pub form: FormState,
    pub sessions: Vec<Session>,
    pub sessions_loaded: bool,
    pub selected: usize,
    pub detail: Option<Session>,
    pub active_session: Option<String>,
    pub polling: bool,
    pub progress: Option<ProgressSnapshot>,
    pub notifications: Vec<Notification>,
    pub busy: Option<String>,
    pub confirm: Option<Confirm>,
    pub info: String,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            tab: Tab::Analysis,
            form: FormState::default(),
            sessions: Vec::new(),
            sessions_loaded: false,
            selected: 0,
            detail: None,
            active_session: None,
            polling: false,
            progress: None,
            notifications: Vec::new(),
            busy: None,
            confirm: None,
            info: String::new(),
        }
    }
}

impl UiState {
    pub fn selected_session(&self) -> Option<&Session> {
        self.sessions.get(self.selected)
    }

    fn clamp_selection(&mut self) {
        if self.sessions.is_empty() {
            self.selected = 0;
        } else if self.selected >= self.sessions.len() {
            self.selected = self.sessions.len() - 1;
        }
    }

    fn upsert(&mut self, session: Session) {
        if let Some(d) = self.detail.as_mut() {
            if d.session_id == session.session_id {
                *d = session.clone();
            }
        }
        match self
            .sessions
            .iter_mut()
            .find(|s| s.session_id == session.session_id)
        {
            Some(existing) => *existing = session,
            None => self.sessions.push(session),
        }
    }
}

pub fn apply_event(state: &mut UiState, ev: DashboardEvent) {
    match ev {
        DashboardEvent::SessionsReplaced(list) => {
            state.sessions = list;
            state.sessions_loaded = true;
            state.clamp_selection();
            if let Some(d) = state.detail.take() {
                state.detail = state
                    .sessions
                    .iter()
                    .find(|s| s.session_id == d.session_id)
                    .cloned();
            }
        }
        DashboardEvent::SessionUpdated(s) => state.upsert(s),
        DashboardEvent::SessionRemoved(id) => {
            state.sessions.retain(|s| s.session_id != id);
            state.clamp_selection();
            if state.detail.as_ref().map(|d| d.session_id == id).unwrap_or(false) {
                state.detail = None;
            }
        }
        DashboardEvent::SessionDetail(s) => {
            state.detail = Some(s.clone());
            state.upsert(s);
        }
        DashboardEvent::ActiveSession {
            session_id,
            polling,
        } => {
            // Keep the last snapshot of a session that just finished.
            if session_id.is_some() && session_id != state.active_session {
                state.progress = None;
            }
            state.active_session = session_id;
            state.polling = polling;
        }
        DashboardEvent::Progress(snap) => state.progress = Some(snap),
        DashboardEvent::PollingStopped { .. } => state.polling = false,
        DashboardEvent::Notified(n) => state.notifications.push(n),
        DashboardEvent::Dismissed(id) => state.notifications.retain(|n| n.id != id),
        DashboardEvent::Busy(label) => state.busy = label,
    }
}

pub fn push_kv(out: &mut Vec<Line<'static>>, label: &str, value: String) {
    out.push(Line::from(vec![
        Span::styled(format!("{label}:"), Style::default().fg(Color::Gray)),
        Span::raw(" "),
        Span::raw(value),
    ]));
}
