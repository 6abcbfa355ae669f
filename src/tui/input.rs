//! Key handling. Pure over `UiState` so it can be tested without a terminal.

use super::state::{Confirm, Tab, UiState, ATTACHMENTS_FIELD};
use crate::orchestrator::UiCommand;
use crate::view::{session_actions, RowAction};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug)]
pub enum KeyAction {
    None,
    Send(UiCommand),
    Copy(String),
    Quit,
}

pub fn handle_key(state: &mut UiState, k: KeyEvent) -> KeyAction {
    if let Some(pending) = state.confirm.take() {
        // Anything but y declines and sends nothing.
        return match k.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => KeyAction::Send(match pending {
                Confirm::Delete(id) => UiCommand::Delete(id),
                Confirm::ClearAll => UiCommand::ClearAll,
            }),
            _ => {
                state.info = "Cancelled".into();
                KeyAction::None
            }
        };
    }

    let ctrl = k.modifiers.contains(KeyModifiers::CONTROL);
    match k.code {
        KeyCode::Char('c') | KeyCode::Char('q') if ctrl => return KeyAction::Quit,
        KeyCode::Tab => {
            state.tab = state.tab.next();
            return KeyAction::None;
        }
        KeyCode::BackTab => {
            state.tab = state.tab.prev();
            return KeyAction::None;
        }
        KeyCode::F(1) => {
            state.tab = Tab::Help;
            return KeyAction::None;
        }
        KeyCode::Esc => {
            return match state.notifications.last() {
                Some(n) => KeyAction::Send(UiCommand::Dismiss(n.id)),
                None => KeyAction::None,
            };
        }
        _ => {}
    }

    if ctrl {
        return handle_shortcut(state, k.code);
    }

    match state.tab {
        Tab::Analysis => handle_form_key(state, k.code),
        Tab::Sessions => handle_sessions_key(state, k.code),
        Tab::Help => match k.code {
            KeyCode::Char('q') => KeyAction::Quit,
            _ => KeyAction::None,
        },
    }
}

/// Ctrl shortcuts act on the active session and work from any tab.
fn handle_shortcut(state: &mut UiState, code: KeyCode) -> KeyAction {
    match code {
        KeyCode::Char('s') => on_active(state, UiCommand::Save),
        KeyCode::Char('p') => on_active(state, UiCommand::Pause),
        KeyCode::Char('r') => on_active(state, UiCommand::Resume),
        KeyCode::Char('u') => {
            let paths = state.form.attachment_paths();
            if paths.is_empty() {
                state.info = "No attachments to upload".into();
                KeyAction::None
            } else {
                state.form.values[ATTACHMENTS_FIELD].clear();
                KeyAction::Send(UiCommand::Upload(paths))
            }
        }
        KeyCode::Char('l') => {
            state.form.clear();
            KeyAction::None
        }
        _ => KeyAction::None,
    }
}

fn on_active(state: &mut UiState, make: fn(String) -> UiCommand) -> KeyAction {
    match state.active_session.clone() {
        Some(id) => KeyAction::Send(make(id)),
        None => {
            state.info = "No active session".into();
            KeyAction::None
        }
    }
}

fn handle_form_key(state: &mut UiState, code: KeyCode) -> KeyAction {
    match code {
        KeyCode::Enter => KeyAction::Send(UiCommand::StartAnalysis(state.form.to_form())),
        KeyCode::Down => {
            state.form.next_field();
            KeyAction::None
        }
        KeyCode::Up => {
            state.form.prev_field();
            KeyAction::None
        }
        KeyCode::Backspace => {
            state.form.focused_mut().pop();
            KeyAction::None
        }
        KeyCode::Char(c) => {
            state.form.focused_mut().push(c);
            KeyAction::None
        }
        _ => KeyAction::None,
    }
}

fn handle_sessions_key(state: &mut UiState, code: KeyCode) -> KeyAction {
    match code {
        KeyCode::Char('q') => return KeyAction::Quit,
        KeyCode::Up | KeyCode::Char('k') => {
            state.selected = state.selected.saturating_sub(1);
            return KeyAction::None;
        }
        KeyCode::Down | KeyCode::Char('j') => {
            if state.selected + 1 < state.sessions.len() {
                state.selected += 1;
            }
            return KeyAction::None;
        }
        KeyCode::Char('R') => return KeyAction::Send(UiCommand::Refresh),
        KeyCode::Char('X') => {
            if !state.sessions.is_empty() {
                state.confirm = Some(Confirm::ClearAll);
            }
            return KeyAction::None;
        }
        _ => {}
    }

    let Some(session) = state.selected_session() else {
        return KeyAction::None;
    };
    let id = session.session_id.clone();
    let offered = session_actions(session.status);
    let wanted = match code {
        KeyCode::Enter => RowAction::Details,
        KeyCode::Char('p') => RowAction::Pause,
        KeyCode::Char('r') => RowAction::Resume,
        KeyCode::Char('s') => RowAction::Save,
        KeyCode::Char('c') => RowAction::Continue,
        KeyCode::Char('d') => RowAction::Delete,
        KeyCode::Char('y') => return KeyAction::Copy(id),
        _ => return KeyAction::None,
    };
    if !offered.contains(&wanted) {
        state.info = format!("{} is not available for this session", wanted.label());
        return KeyAction::None;
    }
    match wanted {
        RowAction::Details => KeyAction::Send(UiCommand::ShowDetail(id)),
        RowAction::Pause => KeyAction::Send(UiCommand::Pause(id)),
        RowAction::Resume => KeyAction::Send(UiCommand::Resume(id)),
        RowAction::Save => KeyAction::Send(UiCommand::Save(id)),
        RowAction::Continue => KeyAction::Send(UiCommand::Continue(id)),
        RowAction::Delete => {
            state.confirm = Some(Confirm::Delete(id));
            KeyAction::None
        }
    }
}
