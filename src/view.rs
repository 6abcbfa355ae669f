//! View models shared by the TUI and text output.
//!
//! Everything here is a pure function of controller state. Session fields are
//! carried as plain strings and never interpreted.

use crate::model::{clamp_percentage, ProgressSnapshot, Session, SessionStatus};

pub const NOT_AVAILABLE: &str = "N/A";
pub const EMPTY_SESSIONS: &str = "No analysis sessions yet. Start one from the Analysis tab.";

/// `45.4` -> `"45%"`. Out-of-range values are clamped first.
pub fn percent_label(percentage: f64) -> String {
    format!("{:.0}%", clamp_percentage(percentage))
}

/// Gauge ratio in `0.0..=1.0`.
pub fn progress_ratio(percentage: f64) -> f64 {
    clamp_percentage(percentage) / 100.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressView {
    pub label: String,
    pub ratio: f64,
    pub step: String,
    pub eta: Option<String>,
    pub completed: bool,
}

impl ProgressView {
    pub fn from_snapshot(snap: &ProgressSnapshot) -> Self {
        let step = match snap.total_steps {
            Some(total) if !snap.current_step.is_empty() => {
                format!("{} · {} steps", snap.current_step, total)
            }
            _ if snap.current_step.is_empty() => "Waiting for the first update".to_string(),
            _ => snap.current_step.clone(),
        };
        Self {
            label: percent_label(snap.percentage),
            ratio: progress_ratio(snap.percentage),
            step,
            eta: snap
                .estimated_time
                .clone()
                .filter(|t| !t.is_empty() && t != NOT_AVAILABLE),
            completed: snap.completed,
        }
    }
}

/// Actions a session row can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowAction {
    Details,
    Pause,
    Resume,
    Continue,
    Save,
    Delete,
}

impl RowAction {
    pub fn label(self) -> &'static str {
        match self {
            RowAction::Details => "details",
            RowAction::Pause => "pause",
            RowAction::Resume => "resume",
            RowAction::Continue => "continue",
            RowAction::Save => "save",
            RowAction::Delete => "delete",
        }
    }

    /// Key that triggers the action on the Sessions tab.
    pub fn key(self) -> char {
        match self {
            RowAction::Details => '⏎',
            RowAction::Pause => 'p',
            RowAction::Resume => 'r',
            RowAction::Continue => 'c',
            RowAction::Save => 's',
            RowAction::Delete => 'd',
        }
    }
}

/// Actions offered for a session in `status`. Continue appears only for
/// interrupted sessions.
pub fn session_actions(status: SessionStatus) -> Vec<RowAction> {
    let mut actions = vec![RowAction::Details];
    match status {
        SessionStatus::Running => actions.extend([RowAction::Pause, RowAction::Save]),
        SessionStatus::Paused => actions.extend([RowAction::Resume, RowAction::Save]),
        _ => {}
    }
    if status.can_continue() {
        actions.push(RowAction::Continue);
    }
    actions.push(RowAction::Delete);
    actions
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionRow {
    pub session_id: String,
    pub status: SessionStatus,
    pub segmento: String,
    pub produto: String,
    pub started: String,
    pub steps: u32,
    pub actions: Vec<RowAction>,
}

impl SessionRow {
    pub fn from_session(s: &Session) -> Self {
        Self {
            session_id: s.session_id.clone(),
            status: s.status,
            segmento: or_na(s.segmento.as_deref()),
            produto: or_na(s.produto.as_deref()),
            started: s
                .started_at
                .as_deref()
                .map(format_timestamp)
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            steps: s.etapas_salvas,
            actions: session_actions(s.status),
        }
    }
}

pub fn session_rows(sessions: &[Session]) -> Vec<SessionRow> {
    sessions.iter().map(SessionRow::from_session).collect()
}

/// Label/value pairs for the detail panel.
pub fn detail_lines(s: &Session) -> Vec<(&'static str, String)> {
    let ts = |v: &Option<String>| {
        v.as_deref()
            .map(format_timestamp)
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    };
    let flag = |v: Option<bool>| match v {
        Some(true) => "yes".to_string(),
        Some(false) => "no".to_string(),
        None => NOT_AVAILABLE.to_string(),
    };
    let mut lines = vec![
        ("Session", s.session_id.clone()),
        ("Status", s.status.label().to_string()),
        ("Segment", or_na(s.segmento.as_deref())),
        ("Product", or_na(s.produto.as_deref())),
        ("Started", ts(&s.started_at)),
        ("Completed", ts(&s.completed_at)),
        ("Paused", ts(&s.paused_at)),
        ("Saved steps", s.etapas_salvas.to_string()),
        ("Active", flag(s.active)),
        ("Saved", flag(s.saved)),
    ];
    if let Some(err) = s.error.as_deref().filter(|e| !e.is_empty()) {
        lines.push(("Error", err.to_string()));
    }
    lines
}

/// Render an ISO-8601 timestamp as `YYYY-MM-DD HH:MM`. Anything that does not
/// parse is shown as sent.
pub fn format_timestamp(raw: &str) -> String {
    let input = time::macros::format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    let output = time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]");
    let head = raw.get(..19).unwrap_or(raw);
    time::PrimitiveDateTime::parse(head, input)
        .ok()
        .and_then(|dt| dt.format(output).ok())
        .unwrap_or_else(|| raw.to_string())
}

fn or_na(v: Option<&str>) -> String {
    match v.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => NOT_AVAILABLE.to_string(),
    }
}
