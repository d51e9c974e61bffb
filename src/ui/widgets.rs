//! Dashboard widgets and the registry that builds them from tags.
//!
//! The dashboard layout is a list of tags from configuration. Each tag maps
//! to a constructor in a [`WidgetRegistry`]; the process-wide registry is
//! filled once, on first use, by [`WidgetRegistry::global`].

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use ratatui::{
    layout::{Constraint, Rect},
    style::{Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
    Frame,
};

use crate::data::duration::format_duration;
use crate::error::{Error, Result};
use crate::model::{CtgDataPoint, DataType};
use crate::session::{ManagerSnapshot, SessionManager};

use super::Theme;

/// Everything a widget may read while rendering.
pub struct WidgetContext<'a> {
    pub snapshot: &'a ManagerSnapshot,
    pub manager: &'a SessionManager,
    pub theme: &'a Theme,
    pub now: DateTime<Utc>,
}

/// A dashboard panel.
pub trait DashboardWidget: Send {
    /// Registry tag this widget was built from.
    fn tag(&self) -> &'static str;

    /// Vertical space the widget wants.
    fn constraint(&self) -> Constraint;

    fn render(&self, frame: &mut Frame, area: Rect, ctx: &WidgetContext<'_>);
}

/// Builds a widget.
pub type WidgetConstructor = fn() -> Box<dyn DashboardWidget>;

/// Mapping from widget tag to constructor.
#[derive(Debug, Default, Clone)]
pub struct WidgetRegistry {
    constructors: BTreeMap<&'static str, WidgetConstructor>,
}

impl WidgetRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in widgets.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(FHR_TAG, fetal_heart_rate_chart);
        registry.register(UC_TAG, uterine_contractions_chart);
        registry.register(SESSION_INFO_TAG, session_info);
        registry
    }

    /// The process-wide registry, built on first use.
    pub fn global() -> &'static WidgetRegistry {
        static REGISTRY: OnceLock<WidgetRegistry> = OnceLock::new();
        REGISTRY.get_or_init(Self::with_builtin)
    }

    /// Add or replace the constructor for `tag`.
    pub fn register(&mut self, tag: &'static str, constructor: WidgetConstructor) {
        self.constructors.insert(tag, constructor);
    }

    pub fn tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.constructors.keys().copied()
    }

    pub fn build(&self, tag: &str) -> Option<Box<dyn DashboardWidget>> {
        self.constructors.get(tag.trim()).map(|ctor| ctor())
    }

    /// Build every tag in order. Unknown tags are a configuration error.
    pub fn build_all<S: AsRef<str>>(&self, tags: &[S]) -> Result<Vec<Box<dyn DashboardWidget>>> {
        tags.iter()
            .map(|tag| {
                let tag = tag.as_ref();
                self.build(tag).ok_or_else(|| {
                    let known: Vec<_> = self.tags().collect();
                    Error::Config(format!(
                        "unknown dashboard widget '{}' (known: {})",
                        tag,
                        known.join(", ")
                    ))
                })
            })
            .collect()
    }
}

pub const FHR_TAG: &str = "fetal-heart-rate";
pub const UC_TAG: &str = "uterine-contractions";
pub const SESSION_INFO_TAG: &str = "session-info";

fn fetal_heart_rate_chart() -> Box<dyn DashboardWidget> {
    Box::new(ChannelChart::fetal_heart_rate())
}

fn uterine_contractions_chart() -> Box<dyn DashboardWidget> {
    Box::new(ChannelChart::uterine_contractions())
}

fn session_info() -> Box<dyn DashboardWidget> {
    Box::new(SessionInfo)
}

/// Split a channel into contiguous `(time_sec, value)` runs.
///
/// Loss-sentinel samples end a run, so the chart shows a gap instead of a
/// line dropping to -1.
pub fn segments(points: &[CtgDataPoint]) -> Vec<Vec<(f64, f64)>> {
    let mut runs = Vec::new();
    let mut current = Vec::new();
    for point in points {
        if point.is_signal_lost() {
            if !current.is_empty() {
                runs.push(std::mem::take(&mut current));
            }
        } else {
            current.push((point.time_sec, point.value));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

/// Text of the current-reading indicator.
pub fn reading_label(points: &[CtgDataPoint], last_valid: Option<f64>, unit: &str) -> String {
    let latest_lost = points.last().is_some_and(CtgDataPoint::is_signal_lost);
    match (last_valid, latest_lost) {
        (Some(_), true) | (None, _) => "no signal".to_string(),
        (Some(value), false) => format!("{:.0} {}", value, unit),
    }
}

/// Line chart of one channel with a current-reading indicator in the title.
pub struct ChannelChart {
    tag: &'static str,
    data_type: DataType,
    y_bounds: [f64; 2],
}

impl ChannelChart {
    pub fn fetal_heart_rate() -> Self {
        Self {
            tag: FHR_TAG,
            data_type: DataType::FetalHeartRate,
            y_bounds: [50.0, 210.0],
        }
    }

    pub fn uterine_contractions() -> Self {
        Self {
            tag: UC_TAG,
            data_type: DataType::UterineContractions,
            y_bounds: [0.0, 100.0],
        }
    }

    fn x_bounds(points: &[CtgDataPoint]) -> [f64; 2] {
        const WINDOW: f64 = 60.0;
        let last = points.last().map(|p| p.time_sec).unwrap_or(0.0);
        let first = points.first().map(|p| p.time_sec).unwrap_or(0.0);
        if last - first < WINDOW {
            [first, first + WINDOW]
        } else {
            [first, last]
        }
    }
}

impl DashboardWidget for ChannelChart {
    fn tag(&self) -> &'static str {
        self.tag
    }

    fn constraint(&self) -> Constraint {
        Constraint::Min(8)
    }

    fn render(&self, frame: &mut Frame, area: Rect, ctx: &WidgetContext<'_>) {
        let points = ctx.manager.series(&self.data_type);
        let last_valid = ctx.manager.last_valid(&self.data_type);
        let reading = reading_label(&points, last_valid, self.data_type.unit());
        let color = ctx.theme.channel_color(&self.data_type);

        let reading_style = if reading == "no signal" {
            Style::default().fg(ctx.theme.warning)
        } else {
            Style::default().fg(color).add_modifier(Modifier::BOLD)
        };
        let title = Line::from(vec![
            Span::styled(format!(" {} ", self.data_type.label()), ctx.theme.header),
            Span::raw("│ "),
            Span::styled(reading, reading_style),
            Span::raw(" "),
        ]);

        let block = Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_type(ctx.theme.border_type)
            .border_style(Style::default().fg(ctx.theme.border));

        let runs = segments(&points);
        if runs.is_empty() {
            let text = Paragraph::new(Line::from(Span::styled(
                "waiting for data",
                Style::default().add_modifier(Modifier::DIM),
            )))
            .block(block);
            frame.render_widget(text, area);
            return;
        }

        let datasets: Vec<Dataset> = runs
            .iter()
            .map(|run| {
                Dataset::default()
                    .marker(symbols::Marker::Braille)
                    .graph_type(GraphType::Line)
                    .style(Style::default().fg(color))
                    .data(run)
            })
            .collect();

        let [x_min, x_max] = Self::x_bounds(&points);
        let [y_min, y_max] = self.y_bounds;
        let axis_style = Style::default().fg(ctx.theme.border);

        let chart = Chart::new(datasets)
            .block(block)
            .x_axis(
                Axis::default()
                    .style(axis_style)
                    .bounds([x_min, x_max])
                    .labels([format!("{:.0}s", x_min), format!("{:.0}s", x_max)]),
            )
            .y_axis(
                Axis::default()
                    .style(axis_style)
                    .bounds([y_min, y_max])
                    .labels([format!("{:.0}", y_min), format!("{:.0}", y_max)]),
            );

        frame.render_widget(chart, area);
    }
}

/// Session identifiers, timing and stream health.
pub struct SessionInfo;

impl DashboardWidget for SessionInfo {
    fn tag(&self) -> &'static str {
        SESSION_INFO_TAG
    }

    fn constraint(&self) -> Constraint {
        Constraint::Length(6)
    }

    fn render(&self, frame: &mut Frame, area: Rect, ctx: &WidgetContext<'_>) {
        let snap = ctx.snapshot;
        let dim = Style::default().add_modifier(Modifier::DIM);
        let label = |text: &'static str| Span::styled(text, dim);

        let mut lines = match snap.session {
            Some(ref session) => {
                let elapsed = std::time::Duration::from_secs(session.elapsed_secs(ctx.now) as u64);
                vec![
                    Line::from(vec![
                        label("Session "),
                        Span::raw(session.session_id.clone()),
                        label("  Status "),
                        Span::raw(format!("{:?}", session.status).to_lowercase()),
                    ]),
                    Line::from(vec![
                        label("Card    "),
                        Span::raw(session.card_id.clone()),
                        label("  Device "),
                        Span::raw(session.device_id.clone()),
                    ]),
                    Line::from(vec![
                        label("Started "),
                        Span::raw(session.start_time.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
                        label("  Elapsed "),
                        Span::raw(format_duration(elapsed)),
                    ]),
                ]
            }
            None => vec![Line::from(Span::styled(
                "No session. Press s to start monitoring.",
                dim,
            ))],
        };

        let last = snap
            .last_message_at
            .map(|at| {
                let age = (ctx.now - at).to_std().unwrap_or_default();
                format!("{} ago", format_duration(age))
            })
            .unwrap_or_else(|| "-".to_string());
        lines.push(Line::from(vec![
            label("Stream  "),
            Span::styled(snap.status.to_string(), ctx.theme.status_style(snap.status)),
            label("  Points "),
            Span::raw(snap.point_count.to_string()),
            label("  Last message "),
            Span::raw(last),
        ]));

        let block = Block::default()
            .title(Span::styled(" Session ", ctx.theme.header))
            .borders(Borders::ALL)
            .border_type(ctx.theme.border_type)
            .border_style(Style::default().fg(ctx.theme.border));

        frame.render_widget(Paragraph::new(lines).block(block), area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(time_sec: f64, value: f64) -> CtgDataPoint {
        CtgDataPoint {
            timestamp_ms: (time_sec * 1000.0) as i64,
            data_type: DataType::FetalHeartRate,
            value,
            time_sec,
            device_id: "ctg-01".into(),
        }
    }

    #[test]
    fn test_segments_split_at_sentinel() {
        let points = vec![
            point(1.0, 140.0),
            point(2.0, 141.0),
            point(3.0, -1.0),
            point(4.0, -1.0),
            point(5.0, 138.0),
        ];
        assert_eq!(
            segments(&points),
            vec![vec![(1.0, 140.0), (2.0, 141.0)], vec![(5.0, 138.0)]]
        );
    }

    #[test]
    fn test_segments_all_lost() {
        assert!(segments(&[point(1.0, -1.0)]).is_empty());
        assert!(segments(&[]).is_empty());
    }

    #[test]
    fn test_reading_label() {
        let live = vec![point(1.0, 142.0)];
        assert_eq!(reading_label(&live, Some(142.0), "bpm"), "142 bpm");

        let lost = vec![point(1.0, 142.0), point(2.0, -1.0)];
        assert_eq!(reading_label(&lost, Some(142.0), "bpm"), "no signal");

        assert_eq!(reading_label(&[], None, "bpm"), "no signal");
    }

    #[test]
    fn test_registry_builds_known_tags_in_order() {
        let registry = WidgetRegistry::with_builtin();
        let widgets = registry
            .build_all(&[SESSION_INFO_TAG, FHR_TAG, UC_TAG])
            .unwrap();
        let tags: Vec<_> = widgets.iter().map(|w| w.tag()).collect();
        assert_eq!(tags, vec![SESSION_INFO_TAG, FHR_TAG, UC_TAG]);
    }

    #[test]
    fn test_registry_rejects_unknown_tag() {
        let registry = WidgetRegistry::with_builtin();
        let Err(err) = registry.build_all(&["fetal-heart-rate", "spo2"]) else {
            panic!("expected error");
        };
        assert!(err.to_string().contains("spo2"));
    }

    #[test]
    fn test_registry_register_custom() {
        let mut registry = WidgetRegistry::new();
        assert!(registry.build(SESSION_INFO_TAG).is_none());
        registry.register("info", session_info);
        assert_eq!(registry.build("info").map(|w| w.tag()), Some(SESSION_INFO_TAG));
        assert!(WidgetRegistry::global().build(FHR_TAG).is_some());
    }
}
