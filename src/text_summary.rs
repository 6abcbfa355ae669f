//! Text builders for CLI output.
//!
//! This module formats human-readable lines for text mode from the shared view models.

use crate::model::{Notification, ProgressSnapshot, Session, Severity};
use crate::view::{self, ProgressView, SessionRow};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// One line per session, or the empty-state line.
pub(crate) fn build_session_list(sessions: &[Session]) -> TextSummary {
    if sessions.is_empty() {
        return TextSummary {
            lines: vec![view::EMPTY_SESSIONS.to_string()],
        };
    }
    let rows = view::session_rows(sessions);
    let id_width = rows
        .iter()
        .map(|r| r.session_id.chars().count())
        .max()
        .unwrap_or(0)
        .max("SESSION".len());

    let mut lines = vec![format!(
        "{:<id_width$}  {:<9}  {:<16}  {:<5}  {} / {}",
        "SESSION", "STATUS", "STARTED", "STEPS", "SEGMENT", "PRODUCT"
    )];
    lines.extend(rows.iter().map(|r| session_line(r, id_width)));
    TextSummary { lines }
}

fn session_line(r: &SessionRow, id_width: usize) -> String {
    format!(
        "{:<id_width$}  {:<9}  {:<16}  {:<5}  {} / {}",
        r.session_id,
        r.status.label(),
        r.started,
        r.steps,
        r.segmento,
        r.produto
    )
}

/// Label/value lines for a single session, followed by the actions it allows.
pub(crate) fn build_session_detail(session: &Session) -> TextSummary {
    let mut lines: Vec<String> = view::detail_lines(session)
        .into_iter()
        .map(|(label, value)| format!("{label:<12} {value}"))
        .collect();
    let actions: Vec<&str> = view::session_actions(session.status)
        .into_iter()
        .map(|a| a.label())
        .collect();
    lines.push(format!("{:<12} {}", "Actions", actions.join(", ")));
    TextSummary { lines }
}

pub(crate) fn progress_line(snap: &ProgressSnapshot) -> String {
    let v = ProgressView::from_snapshot(snap);
    match v.eta {
        Some(eta) => format!("[{:>4}] {} (ETA {eta})", v.label, v.step),
        None => format!("[{:>4}] {}", v.label, v.step),
    }
}

pub(crate) fn notification_line(n: &Notification) -> String {
    let tag = match n.severity {
        Severity::Info => "info",
        Severity::Success => "ok",
        Severity::Warning => "warn",
        Severity::Error => "error",
    };
    format!("{tag}: {}", n.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionStatus;
    use std::time::Duration;

    fn session(id: &str, status: SessionStatus) -> Session {
        Session {
            session_id: id.into(),
            status,
            segmento: Some("Moda".into()),
            produto: Some("Tênis".into()),
            started_at: Some("2024-05-01T10:00:00".into()),
            completed_at: None,
            paused_at: None,
            etapas_salvas: 3,
            error: None,
            active: None,
            saved: None,
        }
    }

    #[test]
    fn test_empty_list_has_its_own_line() {
        let summary = build_session_list(&[]);
        assert_eq!(summary.lines, vec![view::EMPTY_SESSIONS.to_string()]);
    }

    #[test]
    fn test_list_has_header_and_rows() {
        let summary = build_session_list(&[
            session("abc123", SessionStatus::Running),
            session("def456", SessionStatus::Completed),
        ]);
        assert_eq!(summary.lines.len(), 3);
        assert!(summary.lines[1].starts_with("abc123"));
        assert!(summary.lines[1].contains("Running"));
        assert!(summary.lines[2].contains("Moda / Tênis"));
    }

    #[test]
    fn test_detail_lists_allowed_actions() {
        let summary = build_session_detail(&session("abc123", SessionStatus::Paused));
        let last = summary.lines.last().unwrap();
        assert!(last.contains("continue"));
        assert!(last.contains("resume"));
    }

    #[test]
    fn test_progress_and_notification_lines() {
        let snap = ProgressSnapshot::new(45.0, "Coletando dados".into(), None, Some("2 min".into()), false);
        assert_eq!(progress_line(&snap), "[ 45%] Coletando dados (ETA 2 min)");
        let n = Notification {
            id: 1,
            message: "Session saved".into(),
            severity: Severity::Success,
            lifetime: Duration::from_secs(5),
        };
        assert_eq!(notification_line(&n), "ok: Session saved");
    }
}
