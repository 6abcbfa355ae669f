use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn keybind(key: &'static str, what: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(format!("{key:<12}"), Style::default().fg(Color::Magenta)),
        Span::raw(what),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        keybind("Ctrl-C", "Quit (q also quits outside the form)"),
        keybind("Tab", "Next tab (Shift-Tab: previous)"),
        keybind("F1", "Show this help"),
        keybind("Esc", "Dismiss newest notification"),
        keybind("Ctrl-S", "Save active session"),
        keybind("Ctrl-P", "Pause active session"),
        keybind("Ctrl-R", "Resume active session"),
        Line::from(""),
        Line::from("Analysis tab:"),
        keybind("↑/↓", "Move between fields"),
        keybind("Enter", "Start analysis"),
        keybind("Ctrl-U", "Upload attachments (comma-separated paths)"),
        keybind("Ctrl-L", "Clear form"),
        Line::from(""),
        Line::from("Sessions tab:"),
        keybind("↑/↓ or j/k", "Navigate"),
        keybind("Enter", "Show details"),
        keybind("p / r", "Pause / resume"),
        keybind("s", "Save"),
        keybind("c", "Continue (paused, failed or saved only)"),
        keybind("d", "Delete selected (asks first)"),
        keybind("X", "Delete all sessions (asks first)"),
        keybind("R", "Refresh list"),
        keybind("y", "Copy session id to clipboard"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
