mod clipboard;
mod help;
mod input;
mod state;

use crate::api::{AnalysisApi, HttpApi};
use crate::cli::{build_config, open_store, Cli};
use crate::model::{AnalysisForm, DashboardEvent, Severity};
use crate::orchestrator::{self, SessionController, UiCommand};
use crate::view::{self, ProgressView};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use input::KeyAction;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Gauge, Paragraph, Tabs, Wrap},
    Terminal,
};
use state::{apply_event, field_label, push_kv, Tab, UiState, FIELD_COUNT};
use std::sync::Arc;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let api: Arc<dyn AnalysisApi> = Arc::new(HttpApi::new(&cfg)?);

    // Unbounded channels avoid backpressure between the UI thread and the controller.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<DashboardEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let (ctrl, inbox) = SessionController::new(&cfg, api, open_store(&args), event_tx);
    let restored = ctrl.restored_form();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_handle = std::thread::spawn(move || run_threaded(restored, event_rx, cmd_tx));

    orchestrator::run_controller(ctrl, cmd_rx, inbox).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }
    Ok(())
}

/// Run the TUI loop on a dedicated thread. Dropping `cmd_tx` on return also
/// stops the controller.
pub fn run_threaded(
    restored: Option<AnalysisForm>,
    mut event_rx: UnboundedReceiver<DashboardEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = match Terminal::new(backend).context("create terminal") {
        Ok(t) => t,
        Err(e) => {
            restore_terminal();
            return Err(e);
        }
    };
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState {
        form: state::FormState::from_form(restored.as_ref()),
        ..Default::default()
    };

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep the UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            apply_event(&mut state, ev);
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match input::handle_key(&mut state, k) {
                    KeyAction::None => {}
                    KeyAction::Send(cmd) => {
                        if cmd_tx.send(cmd).is_err() {
                            break Err(anyhow::anyhow!("controller stopped"));
                        }
                    }
                    KeyAction::Copy(text) => {
                        state.info = match clipboard::copy_to_clipboard(&text) {
                            Ok(()) => format!("Copied {text}"),
                            Err(e) => format!("Copy failed: {e:#}"),
                        };
                    }
                    KeyAction::Quit => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                }
            }
        }
    };

    restore_terminal();
    res
}

fn restore_terminal() {
    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let notif_height = if state.notifications.is_empty() {
        0
    } else {
        state.notifications.len().min(4) as u16 + 2
    };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Min(0),
                Constraint::Length(notif_height),
                Constraint::Length(1),
            ]
            .as_ref(),
        )
        .split(area);

    let tabs = Tabs::new(vec![
        Line::from("Analysis"),
        Line::from("Sessions"),
        Line::from("Help"),
    ])
    .select(state.tab.index())
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("analysis-dashboard"),
    )
    .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        Tab::Analysis => draw_analysis(chunks[1], f, state),
        Tab::Sessions => draw_sessions(chunks[1], f, state),
        Tab::Help => help::draw_help(chunks[1], f),
    }

    if notif_height > 0 {
        draw_notifications(chunks[2], f, state);
    }
    draw_status_line(chunks[3], f, state);

    if let Some(confirm) = state.confirm.as_ref() {
        draw_confirm(area, f, &confirm.prompt());
    }
}

fn draw_analysis(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)].as_ref())
        .split(area);

    let mut lines: Vec<Line> = Vec::with_capacity(FIELD_COUNT + 2);
    for idx in 0..FIELD_COUNT {
        let focused = idx == state.form.focus;
        let marker = if focused { "> " } else { "  " };
        let label_style = if focused {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default().fg(Color::Gray)
        };
        let mut value = state.form.values[idx].clone();
        if focused {
            value.push('▏');
        }
        lines.push(Line::from(vec![
            Span::raw(marker),
            Span::styled(format!("{:<18}", field_label(idx)), label_style),
            Span::raw(value),
        ]));
    }
    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        Span::styled("Enter", Style::default().fg(Color::Magenta)),
        Span::raw(": start analysis, "),
        Span::styled("Ctrl-U", Style::default().fg(Color::Magenta)),
        Span::raw(": upload attachments, "),
        Span::styled("Ctrl-L", Style::default().fg(Color::Magenta)),
        Span::raw(": clear"),
    ]));
    let form = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("New analysis"));
    f.render_widget(form, cols[0]);

    draw_progress(cols[1], f, state);
}

fn draw_progress(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let pv = state.progress.as_ref().map(ProgressView::from_snapshot);
    let (ratio, label) = pv
        .as_ref()
        .map(|v| (v.ratio, v.label.clone()))
        .unwrap_or((0.0, view::percent_label(0.0)));
    let gauge_color = match pv.as_ref() {
        Some(v) if v.completed => Color::Green,
        _ => Color::Cyan,
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(Style::default().fg(gauge_color))
        .ratio(ratio)
        .label(label);
    f.render_widget(gauge, rows[0]);

    let mut lines: Vec<Line<'static>> = Vec::new();
    match state.active_session.as_deref() {
        Some(id) => {
            push_kv(&mut lines, "Session", id.to_string());
            let polling = if state.polling { "polling" } else { "not polling" };
            push_kv(&mut lines, "Tracking", polling.to_string());
            if let Some(session) = state.sessions.iter().find(|s| s.session_id == id) {
                push_kv(&mut lines, "Status", session.status.label().to_string());
            }
        }
        None => lines.push(Line::from(Span::styled(
            "No active analysis",
            Style::default().fg(Color::Gray),
        ))),
    }
    if let Some(v) = pv {
        push_kv(&mut lines, "Step", v.step);
        if let Some(eta) = v.eta {
            push_kv(&mut lines, "ETA", eta);
        }
        if v.completed {
            lines.push(Line::from(Span::styled(
                "Analysis completed",
                Style::default().fg(Color::Green),
            )));
        }
    }
    if let Some(busy) = state.busy.as_deref() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            busy.to_string(),
            Style::default().fg(Color::Yellow),
        )));
    }
    if state.active_session.is_some() {
        lines.push(Line::from(""));
        lines.push(Line::from(vec![
            Span::styled("Ctrl-P", Style::default().fg(Color::Magenta)),
            Span::raw(": pause, "),
            Span::styled("Ctrl-R", Style::default().fg(Color::Magenta)),
            Span::raw(": resume, "),
            Span::styled("Ctrl-S", Style::default().fg(Color::Magenta)),
            Span::raw(": save"),
        ]));
    }
    let p = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Active session"));
    f.render_widget(p, rows[1]);
}

fn draw_sessions(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)].as_ref())
        .split(area);

    let title = format!("Sessions ({})", state.sessions.len());
    let block = Block::default().borders(Borders::ALL).title(title);

    if state.sessions.is_empty() {
        let text = if state.sessions_loaded {
            view::EMPTY_SESSIONS
        } else {
            "Loading sessions…"
        };
        let p = Paragraph::new(vec![
            Line::from(""),
            Line::from(Span::styled(text, Style::default().fg(Color::Gray))),
            Line::from(""),
            Line::from(vec![
                Span::styled("R", Style::default().fg(Color::Magenta)),
                Span::raw(": refresh"),
            ]),
        ])
        .block(block);
        f.render_widget(p, cols[0]);
    } else {
        let rows = view::session_rows(&state.sessions);
        let visible = (cols[0].height as usize).saturating_sub(2).max(1);
        let offset = state.selected.saturating_sub(visible - 1);

        let lines: Vec<Line> = rows
            .iter()
            .enumerate()
            .skip(offset)
            .take(visible)
            .map(|(i, r)| {
                let selected = i == state.selected;
                let mut row_style = Style::default();
                if selected {
                    row_style = row_style.add_modifier(Modifier::REVERSED);
                }
                let active = state.active_session.as_deref() == Some(r.session_id.as_str());
                Line::from(vec![
                    Span::styled(if active { "● " } else { "  " }, Style::default().fg(Color::Green)),
                    Span::styled(format!("{:<10}", r.status.label()), status_style(r.status)),
                    Span::styled(format!("{} / {}", r.segmento, r.produto), row_style),
                    Span::styled(format!("  {}", r.started), Style::default().fg(Color::Gray)),
                ])
            })
            .collect();
        f.render_widget(Paragraph::new(lines).block(block), cols[0]);
    }

    draw_session_detail(cols[1], f, state);
}

fn status_style(status: crate::model::SessionStatus) -> Style {
    use crate::model::SessionStatus;
    let color = match status {
        SessionStatus::Running => Color::Cyan,
        SessionStatus::Paused => Color::Yellow,
        SessionStatus::Completed => Color::Green,
        SessionStatus::Error => Color::Red,
        SessionStatus::Saved => Color::Magenta,
        SessionStatus::Unknown => Color::Gray,
    };
    Style::default().fg(color)
}

fn draw_session_detail(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let selected = state.selected_session();
    // Fetched detail wins over the cached row when it is for the same session.
    let session = match (state.detail.as_ref(), selected) {
        (Some(d), Some(s)) if d.session_id == s.session_id => Some(d),
        (_, s) => s,
    };

    let mut lines: Vec<Line<'static>> = Vec::new();
    match session {
        Some(s) => {
            for (label, value) in view::detail_lines(s) {
                push_kv(&mut lines, label, value);
            }
            lines.push(Line::from(""));
            let mut actions = vec![Span::raw("Actions: ")];
            for a in view::session_actions(s.status) {
                actions.push(Span::styled(a.key().to_string(), Style::default().fg(Color::Magenta)));
                actions.push(Span::raw(format!(" {}  ", a.label())));
            }
            lines.push(Line::from(actions));
            lines.push(Line::from(vec![
                Span::styled("y", Style::default().fg(Color::Magenta)),
                Span::raw(" copy id"),
            ]));
        }
        None => lines.push(Line::from(Span::styled(
            "No session selected",
            Style::default().fg(Color::Gray),
        ))),
    }
    let p = Paragraph::new(lines)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Details"));
    f.render_widget(p, area);
}

fn draw_notifications(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let shown = (area.height as usize).saturating_sub(2);
    let skip = state.notifications.len().saturating_sub(shown);
    let lines: Vec<Line> = state
        .notifications
        .iter()
        .skip(skip)
        .map(|n| {
            let (tag, color) = match n.severity {
                Severity::Info => ("info", Color::Cyan),
                Severity::Success => ("ok", Color::Green),
                Severity::Warning => ("warn", Color::Yellow),
                Severity::Error => ("error", Color::Red),
            };
            Line::from(vec![
                Span::styled(format!("{tag:<6}"), Style::default().fg(color)),
                Span::raw(n.message.clone()),
            ])
        })
        .collect();
    let p = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Notifications (Esc to dismiss)"),
    );
    f.render_widget(p, area);
}

fn draw_status_line(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut spans = vec![
        Span::styled("Tab", Style::default().fg(Color::Magenta)),
        Span::raw(" switch  "),
        Span::styled("F1", Style::default().fg(Color::Magenta)),
        Span::raw(" help  "),
        Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
        Span::raw(" quit"),
    ];
    if !state.info.is_empty() {
        spans.push(Span::raw("  |  "));
        spans.push(Span::styled(state.info.clone(), Style::default().fg(Color::Gray)));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_confirm(area: Rect, f: &mut ratatui::Frame, prompt: &str) {
    let popup = centered(area, 50, 5);
    f.render_widget(Clear, popup);
    let p = Paragraph::new(vec![
        Line::from(prompt.to_string()),
        Line::from(""),
        Line::from(vec![
            Span::styled("y", Style::default().fg(Color::Magenta)),
            Span::raw(" confirm   any other key cancels"),
        ]),
    ])
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("Confirm")
            .border_style(Style::default().fg(Color::Red)),
    );
    f.render_widget(p, popup);
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let w = width.min(area.width);
    let h = height.min(area.height);
    Rect {
        x: area.x + (area.width - w) / 2,
        y: area.y + (area.height - h) / 2,
        width: w,
        height: h,
    }
}
