//! Application state for the dashboard.
//!
//! The draw loop runs on the main thread and never waits on the network:
//! start, stop and refresh are spawned on the tokio runtime and report back
//! through a channel that [`App::tick`] drains.

use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::model::{validate_card_id, CtgDataPoint, Session};
use crate::session::{ManagerSnapshot, SessionManager};
use crate::ui::{DashboardWidget, Theme, WidgetRegistry};

/// Text input currently capturing keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub label: &'static str,
    pub text: String,
}

/// Main application state.
pub struct App {
    pub running: bool,
    pub show_help: bool,

    manager: SessionManager,
    runtime: Handle,
    pub snapshot: ManagerSnapshot,

    pub widgets: Vec<Box<dyn DashboardWidget>>,
    pub theme: Theme,

    /// Card id offered when the start prompt opens.
    pub default_card: Option<String>,
    pub prompt: Option<Prompt>,

    pub export_path: String,

    // Outcomes of spawned operations
    outcomes_tx: mpsc::UnboundedSender<String>,
    outcomes_rx: mpsc::UnboundedReceiver<String>,

    // Status message (temporary feedback)
    pub status_message: Option<(String, std::time::Instant)>,
}

/// File layout of the `e` export.
#[derive(Debug, Serialize)]
struct Export<'a> {
    exported_at: String,
    session: Option<&'a Session>,
    status: String,
    points: &'a [CtgDataPoint],
}

impl App {
    /// Create the app with widgets built from `widget_tags`.
    pub fn new(
        manager: SessionManager,
        runtime: Handle,
        registry: &WidgetRegistry,
        widget_tags: &[String],
        theme: Theme,
    ) -> Result<Self> {
        let widgets = registry.build_all(widget_tags)?;
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let snapshot = manager.snapshot();

        Ok(Self {
            running: true,
            show_help: false,
            manager,
            runtime,
            snapshot,
            widgets,
            theme,
            default_card: None,
            prompt: None,
            export_path: "ctg_export.json".to_string(),
            outcomes_tx,
            outcomes_rx,
            status_message: None,
        })
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Set a temporary status message that will be shown for a few seconds.
    pub fn set_status_message(&mut self, message: String) {
        self.status_message = Some((message, std::time::Instant::now()));
    }

    /// Get the current status message if it hasn't expired (3 seconds).
    pub fn get_status_message(&self) -> Option<&str> {
        if let Some((msg, time)) = &self.status_message {
            if time.elapsed() < std::time::Duration::from_secs(3) {
                return Some(msg);
            }
        }
        None
    }

    /// Refresh the snapshot and collect finished operations.
    pub fn tick(&mut self) {
        while let Ok(message) = self.outcomes_rx.try_recv() {
            self.set_status_message(message);
        }
        self.snapshot = self.manager.snapshot();
    }

    /// A start or stop request is outstanding; session actions are disabled.
    pub fn is_busy(&self) -> bool {
        self.snapshot.loading
    }

    /// Open the card-id prompt.
    pub fn begin_start(&mut self) {
        if self.is_busy() {
            self.set_status_message("Busy, please wait".to_string());
            return;
        }
        if self.snapshot.session.as_ref().is_some_and(Session::is_active) {
            self.set_status_message("A session is already active; press x to stop it".to_string());
            return;
        }
        self.prompt = Some(Prompt {
            label: "Card ID",
            text: self.default_card.clone().unwrap_or_default(),
        });
    }

    pub fn prompt_push(&mut self, c: char) {
        if let Some(prompt) = self.prompt.as_mut() {
            prompt.text.push(c);
        }
    }

    pub fn prompt_pop(&mut self) {
        if let Some(prompt) = self.prompt.as_mut() {
            prompt.text.pop();
        }
    }

    pub fn cancel_prompt(&mut self) {
        self.prompt = None;
    }

    /// Validate the prompt text and start a session with it.
    pub fn submit_prompt(&mut self) {
        let Some(prompt) = self.prompt.take() else {
            return;
        };
        match validate_card_id(&prompt.text) {
            Ok(card_id) => {
                self.default_card = Some(card_id.clone());
                self.start_session(card_id);
            }
            Err(e) => {
                self.set_status_message(e.to_string());
                self.prompt = Some(prompt);
            }
        }
    }

    /// Start a session without prompting.
    pub fn start_session(&mut self, card_id: String) {
        let manager = self.manager.clone();
        let tx = self.outcomes_tx.clone();
        self.runtime.spawn(async move {
            let message = match manager.start_session(&card_id).await {
                Ok(session) => format!("Session {} started", session.session_id),
                Err(e) => format!("Start failed: {}", e),
            };
            let _ = tx.send(message);
        });
        self.set_status_message("Starting session...".to_string());
    }

    pub fn stop_session(&mut self) {
        if self.is_busy() {
            self.set_status_message("Busy, please wait".to_string());
            return;
        }
        let manager = self.manager.clone();
        let tx = self.outcomes_tx.clone();
        self.runtime.spawn(async move {
            let message = match manager.stop_session().await {
                Ok(()) => "Session stopped".to_string(),
                Err(e) => format!("Stop failed: {}", e),
            };
            let _ = tx.send(message);
        });
    }

    /// Look for an active session on the backend.
    pub fn refresh(&mut self) {
        let manager = self.manager.clone();
        let tx = self.outcomes_tx.clone();
        self.runtime.spawn(async move {
            let message = match manager.refresh().await {
                Ok(Some(session)) => format!("Active session {}", session.session_id),
                Ok(None) => "No active session".to_string(),
                Err(e) => format!("Refresh failed: {}", e),
            };
            let _ = tx.send(message);
        });
    }

    pub fn clear_data(&mut self) {
        self.manager.clear_data();
        self.manager.clear_error();
        self.set_status_message("Data cleared".to_string());
    }

    /// Write the session and the buffered points to a JSON file.
    pub fn export_state(&self, path: &Path) -> Result<()> {
        let points = self.manager.points();
        let export = Export {
            exported_at: Utc::now().to_rfc3339(),
            session: self.snapshot.session.as_ref(),
            status: self.snapshot.status.to_string(),
            points: &points,
        };
        let json = serde_json::to_string_pretty(&export)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Toggle the help overlay.
    pub fn toggle_help(&mut self) {
        self.show_help = !self.show_help;
    }

    /// Cancel the stream and timers, then leave the loop.
    ///
    /// The backend session keeps running.
    pub fn quit(&mut self) {
        self.manager.shutdown();
        self.running = false;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::session::{HttpSessionApi, ManagerSettings};
    use crate::transport::testing::ScriptedConnector;
    use crate::transport::StreamTransport;

    fn app(rt: &tokio::runtime::Runtime) -> App {
        let api = HttpSessionApi::builder().build().unwrap();
        let transport = StreamTransport::new(ScriptedConnector::new(vec![]));
        let manager = SessionManager::new(Arc::new(api), transport, ManagerSettings::default());
        let tags = vec!["session-info".to_string(), "fetal-heart-rate".to_string()];
        App::new(
            manager,
            rt.handle().clone(),
            &WidgetRegistry::with_builtin(),
            &tags,
            Theme::dark(),
        )
        .unwrap()
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn test_unknown_widget_tag_fails() {
        let rt = runtime();
        let api = HttpSessionApi::builder().build().unwrap();
        let transport = StreamTransport::new(ScriptedConnector::new(vec![]));
        let manager = SessionManager::new(Arc::new(api), transport, ManagerSettings::default());
        let result = App::new(
            manager,
            rt.handle().clone(),
            &WidgetRegistry::with_builtin(),
            &["heart".to_string()],
            Theme::dark(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_prompt_rejects_invalid_card() {
        let rt = runtime();
        let mut app = app(&rt);

        app.begin_start();
        for c in "not-a-uuid".chars() {
            app.prompt_push(c);
        }
        app.submit_prompt();

        assert!(app.prompt.is_some());
        assert!(app.get_status_message().unwrap().contains("UUID"));
    }

    #[test]
    fn test_prompt_prefills_default_card() {
        let rt = runtime();
        let mut app = app(&rt);
        app.default_card = Some("11111111-1111-1111-1111-111111111111".into());

        app.begin_start();
        assert_eq!(
            app.prompt.as_ref().map(|p| p.text.as_str()),
            Some("11111111-1111-1111-1111-111111111111")
        );
        app.prompt_pop();
        app.cancel_prompt();
        assert!(app.prompt.is_none());
    }

    #[test]
    fn test_export_writes_json() {
        let rt = runtime();
        let app = app(&rt);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");

        app.export_state(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["status"], "disconnected");
        assert!(value["session"].is_null());
        assert_eq!(value["points"].as_array().map(Vec::len), Some(0));
    }

    #[test]
    fn test_quit_stops_loop() {
        let rt = runtime();
        let mut app = app(&rt);
        app.quit();
        assert!(!app.running);
    }
}
