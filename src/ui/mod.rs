//! Terminal rendering.
//!
//! - [`common`]: header, status bar, help overlay, card prompt
//! - [`theme`]: light/dark colors
//! - [`widgets`]: dashboard panels and the [`WidgetRegistry`]

pub mod common;
pub mod theme;
pub mod widgets;

pub use theme::Theme;
pub use widgets::{DashboardWidget, WidgetContext, WidgetRegistry};

use chrono::Utc;
use ratatui::{
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Style},
    widgets::Paragraph,
    Frame,
};

use crate::app::App;

/// Minimum terminal size for usable display
pub const MIN_WIDTH: u16 = 60;
pub const MIN_HEIGHT: u16 = 16;

/// Draw the whole dashboard.
pub fn render(frame: &mut Frame, app: &App) {
    let area = frame.area();

    if area.width < MIN_WIDTH || area.height < MIN_HEIGHT {
        let msg = format!(
            "Terminal too small: {}x{}\nMinimum: {}x{}\n\nResize to continue",
            area.width, area.height, MIN_WIDTH, MIN_HEIGHT
        );
        let paragraph = Paragraph::new(msg)
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::Yellow));
        let centered = Rect::new(0, (area.height / 2).saturating_sub(2), area.width, 5.min(area.height));
        frame.render_widget(paragraph, centered);
        return;
    }

    let chunks = Layout::vertical([
        Constraint::Length(1), // Header bar
        Constraint::Min(8),    // Widgets
        Constraint::Length(1), // Status bar
    ])
    .split(area);

    common::render_header(frame, app, chunks[0]);

    let constraints: Vec<Constraint> = app.widgets.iter().map(|w| w.constraint()).collect();
    let slots = Layout::vertical(constraints).split(chunks[1]);
    let ctx = WidgetContext {
        snapshot: &app.snapshot,
        manager: app.manager(),
        theme: &app.theme,
        now: Utc::now(),
    };
    for (widget, slot) in app.widgets.iter().zip(slots.iter()) {
        widget.render(frame, *slot, &ctx);
    }

    common::render_status_bar(frame, app, chunks[2]);

    if app.prompt.is_some() {
        common::render_prompt(frame, app, area);
    }

    if app.show_help {
        common::render_help(frame, app, area);
    }
}
