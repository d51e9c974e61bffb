//! Theme configuration for the TUI.
//!
//! Supports light and dark themes with automatic terminal detection.

use ratatui::style::{Color, Modifier, Style};
use ratatui::widgets::block::BorderType;

use crate::model::DataType;
use crate::session::StreamStatus;

/// Color and style theme for the TUI.
///
/// Use [`Theme::auto_detect()`] for automatic theme selection based on
/// terminal background, or [`Theme::dark()`]/[`Theme::light()`] explicitly.
#[derive(Debug, Clone)]
pub struct Theme {
    /// Accent color for highlights and active elements.
    pub highlight: Color,
    /// Color for advisory states (stalled, reconnecting, warnings).
    pub warning: Color,
    /// Color for errors and failed connections.
    pub critical: Color,
    /// Color for a live, healthy stream.
    pub healthy: Color,
    /// Color for borders and separators.
    pub border: Color,
    /// Fetal heart rate trace.
    pub fhr: Color,
    /// Uterine contraction trace.
    pub uc: Color,
    /// Style for section titles.
    pub header: Style,
    /// Style for prompts and selected input.
    pub selected: Style,
    /// Border style (rounded, plain, etc.).
    pub border_type: BorderType,
}

impl Theme {
    /// Create a dark theme suitable for dark terminal backgrounds.
    pub fn dark() -> Self {
        Self {
            highlight: Color::Cyan,
            warning: Color::Yellow,
            critical: Color::Red,
            healthy: Color::Green,
            border: Color::Gray,
            fhr: Color::LightRed,
            uc: Color::LightBlue,
            header: Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            selected: Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD),
            border_type: BorderType::Rounded,
        }
    }

    /// Create a light theme suitable for light terminal backgrounds.
    pub fn light() -> Self {
        Self {
            highlight: Color::Blue,
            warning: Color::Yellow,
            critical: Color::Red,
            healthy: Color::Green,
            border: Color::DarkGray,
            fhr: Color::Red,
            uc: Color::Blue,
            header: Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD),
            selected: Style::default().bg(Color::LightBlue).add_modifier(Modifier::BOLD),
            border_type: BorderType::Rounded,
        }
    }

    /// Auto-detect based on terminal background
    pub fn auto_detect() -> Self {
        match terminal_light::luma() {
            Ok(luma) if luma > 0.5 => Self::light(),
            _ => Self::dark(),
        }
    }

    /// Get style for a connection status
    pub fn status_style(&self, status: StreamStatus) -> Style {
        match status {
            StreamStatus::Connected => Style::default().fg(self.healthy),
            StreamStatus::Connecting
            | StreamStatus::Stalled
            | StreamStatus::Reconnecting { .. } => Style::default().fg(self.warning),
            StreamStatus::Failed => Style::default().fg(self.critical).add_modifier(Modifier::BOLD),
            StreamStatus::Disconnected | StreamStatus::Closed => {
                Style::default().add_modifier(Modifier::DIM)
            }
        }
    }

    /// Trace color for a channel.
    pub fn channel_color(&self, data_type: &DataType) -> Color {
        match data_type {
            DataType::FetalHeartRate => self.fhr,
            DataType::UterineContractions => self.uc,
            DataType::Other(_) => self.highlight,
        }
    }
}
