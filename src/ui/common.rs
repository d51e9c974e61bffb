//! Common UI components shared across the dashboard.
//!
//! This module contains the header bar, status bar, help overlay and the
//! card-id prompt.

use ratatui::{
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

use crate::app::App;
use crate::session::StreamStatus;

/// Render the header bar with session and connection overview.
pub fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let snap = &app.snapshot;
    let status_style = app.theme.status_style(snap.status);

    let session = match snap.session {
        Some(ref s) => format!("card {} │ device {}", s.card_id, s.device_id),
        None => "no session".to_string(),
    };

    let mut spans = vec![
        Span::styled(" ● ", status_style),
        Span::styled("CTG MONITOR ", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw("│ "),
        Span::styled(snap.status.to_string(), status_style),
        Span::raw(" │ "),
        Span::raw(session),
        Span::raw(" │ "),
        Span::styled(
            format!("{}", snap.point_count),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw(" points"),
    ];
    if snap.loading {
        spans.push(Span::styled(" │ working…", Style::default().fg(app.theme.warning)));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// Render the status bar at the bottom.
///
/// Shows, in order of priority: temporary messages, the last error, the
/// current warning, then the available controls.
pub fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    if let Some(msg) = app.get_status_message() {
        let paragraph =
            Paragraph::new(format!(" {} ", msg)).style(Style::default().fg(app.theme.highlight));
        frame.render_widget(paragraph, area);
        return;
    }

    let snap = &app.snapshot;
    let (text, style) = if let Some(ref err) = snap.error {
        (
            format!(" Error: {} | s:start r:refresh c:clear q:quit", err),
            Style::default().fg(app.theme.critical),
        )
    } else if let Some(ref warning) = snap.warning {
        (
            format!(" Warning: {} | x:stop ?:help q:quit", warning),
            Style::default().fg(app.theme.warning),
        )
    } else if app.prompt.is_some() {
        (
            " Type the card UUID | Enter:start Esc:cancel".to_string(),
            Style::default().add_modifier(Modifier::DIM),
        )
    } else {
        let controls = match snap.status {
            StreamStatus::Disconnected | StreamStatus::Closed | StreamStatus::Failed => {
                "s:start r:refresh e:export c:clear ?:help q:quit"
            }
            _ => "x:stop e:export c:clear ?:help q:quit",
        };
        (format!(" {}", controls), Style::default().add_modifier(Modifier::DIM))
    };

    frame.render_widget(Paragraph::new(text).style(style), area);
}

/// Render the card-id prompt as a small centered box.
pub fn render_prompt(frame: &mut Frame, app: &App, area: Rect) {
    let Some(ref prompt) = app.prompt else {
        return;
    };

    let width = 50u16.min(area.width.saturating_sub(4));
    let height = 3u16.min(area.height);
    let x = area.x + (area.width.saturating_sub(width)) / 2;
    let y = area.y + (area.height.saturating_sub(height)) / 2;
    let prompt_area = Rect::new(x, y, width, height);

    let block = Block::default()
        .title(format!(" {} ", prompt.label))
        .borders(Borders::ALL)
        .border_type(app.theme.border_type)
        .border_style(Style::default().fg(app.theme.highlight));

    let line = Line::from(vec![
        Span::raw(" "),
        Span::raw(prompt.text.clone()),
        Span::styled("█", Style::default().add_modifier(Modifier::SLOW_BLINK)),
    ]);

    frame.render_widget(Clear, prompt_area);
    frame.render_widget(Paragraph::new(line).block(block), prompt_area);
}

/// Render the help overlay with keyboard shortcuts.
///
/// Displayed as a centered modal on top of the dashboard.
pub fn render_help(frame: &mut Frame, app: &App, area: Rect) {
    let help_text = vec![
        Line::from(vec![Span::styled("Keyboard Shortcuts", app.theme.header)]),
        Line::from(""),
        Line::from(vec![Span::styled(
            " Session",
            Style::default().add_modifier(Modifier::BOLD),
        )]),
        Line::from("  s         Start monitoring (asks for card)"),
        Line::from("  x         Stop the active session"),
        Line::from("  r         Look up an active session"),
        Line::from(""),
        Line::from(vec![Span::styled(
            " Data",
            Style::default().add_modifier(Modifier::BOLD),
        )]),
        Line::from("  c         Clear buffered data"),
        Line::from("  e         Export to JSON"),
        Line::from(""),
        Line::from(vec![Span::styled(
            " General",
            Style::default().add_modifier(Modifier::BOLD),
        )]),
        Line::from("  ?         Toggle help"),
        Line::from("  q / Esc   Quit"),
        Line::from(""),
        Line::from(vec![Span::styled(
            "Press any key to close",
            Style::default().add_modifier(Modifier::DIM),
        )]),
    ];

    let block = Block::default()
        .title(" Help ")
        .borders(Borders::ALL)
        .border_type(app.theme.border_type)
        .border_style(Style::default().fg(app.theme.highlight));

    let paragraph = Paragraph::new(help_text).block(block);

    // Center the help overlay - responsive to terminal size
    let help_width = 46u16.min(area.width.saturating_sub(4));
    let help_height = 19u16.min(area.height.saturating_sub(2));
    let x = area.x + (area.width.saturating_sub(help_width)) / 2;
    let y = area.y + (area.height.saturating_sub(help_height)) / 2;
    let help_area = Rect::new(x, y, help_width, help_height);

    frame.render_widget(Clear, help_area);
    frame.render_widget(paragraph, help_area);
}
