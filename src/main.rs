use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::{
    event::Event,
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use serde::Serialize;
use tracing::info;

use ctgwatch::app::App;
use ctgwatch::events;
use ctgwatch::logging::{self, LogTarget};
use ctgwatch::model::{validate_card_id, CtgDataPoint, DataType};
use ctgwatch::session::{HttpSessionApi, Readings, SessionApi, SessionManager, StreamStatus};
use ctgwatch::settings::Settings;
use ctgwatch::transport::{HttpStreamConnector, StreamTransport};
use ctgwatch::ui::{self, Theme, WidgetRegistry};

#[derive(Parser, Debug)]
#[command(name = "ctgwatch")]
#[command(about = "Client and live dashboard for CTG monitoring sessions")]
#[command(version)]
struct Args {
    /// Settings file (TOML); defaults to ./ctgwatch.toml when present
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Session API base URL (overrides settings)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Event stream URL (overrides settings)
    #[arg(long, global = true)]
    stream_url: Option<String>,

    /// Device ID sent with start requests (overrides settings)
    #[arg(long, global = true)]
    device_id: Option<String>,

    /// Write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive dashboard (default)
    Monitor {
        /// Start a session for this card right away
        #[arg(long)]
        card: Option<String>,
    },
    /// Start a session and print readings until Ctrl-C or the stream ends
    Watch {
        #[arg(long)]
        card: String,
    },
    /// Start a session and print it
    Start {
        #[arg(long)]
        card: String,
    },
    /// Stop a session by ID
    Stop { session_id: String },
    /// Show a session by ID
    Get { session_id: String },
    /// List active sessions
    Active,
    /// List the sessions of a card
    History {
        #[arg(long)]
        card: String,
    },
    /// Query the monitoring service health
    Health,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Monitor { card: None });

    let target = match (&command, args.log_file.as_deref()) {
        (_, Some(path)) => LogTarget::File(path),
        (Command::Monitor { .. }, None) => LogTarget::Off,
        (_, None) => LogTarget::Stderr,
    };
    logging::init(args.verbose, target)?;

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(url) = args.api_url {
        settings.api.base_url = url;
    }
    if let Some(url) = args.stream_url {
        settings.stream.url = url;
    }
    if let Some(device) = args.device_id {
        settings.stream.device_id = device;
    }
    settings.validate()?;

    let rt = tokio::runtime::Runtime::new()?;
    let api = HttpSessionApi::builder()
        .base_url(&settings.api.base_url)
        .timeout(settings.api.timeout)
        .build()?;

    match command {
        Command::Monitor { card } => {
            let card = card.map(|c| validate_card_id(&c)).transpose()?;
            let manager = build_manager(&settings, api)?;
            run_tui(&rt, manager, &settings, card)
        }
        Command::Watch { card } => {
            let card = validate_card_id(&card)?;
            let manager = build_manager(&settings, api)?;
            rt.block_on(watch(manager, card))
        }
        Command::Start { card } => {
            let card = validate_card_id(&card)?;
            let request = ctgwatch::StartSessionRequest {
                device_id: settings.stream.device_id.clone(),
                card_id: card,
            };
            let session = rt.block_on(api.start_session(&request))?;
            print_json(&session)
        }
        Command::Stop { session_id } => {
            let session = rt.block_on(api.stop_session(&session_id))?;
            print_json(&session)
        }
        Command::Get { session_id } => {
            let session = rt.block_on(api.get_session(&session_id))?;
            print_json(&session)
        }
        Command::Active => {
            let sessions = rt.block_on(api.active_sessions())?;
            print_json(&sessions)
        }
        Command::History { card } => {
            let card = validate_card_id(&card)?;
            let sessions = rt.block_on(api.card_sessions(&card))?;
            print_json(&sessions)
        }
        Command::Health => {
            let health = rt.block_on(api.health())?;
            print_json(&health)
        }
    }
}

/// Wire the HTTP API and the SSE connector into a manager.
fn build_manager(settings: &Settings, api: HttpSessionApi) -> Result<SessionManager> {
    // No total timeout: the stream response stays open for the whole session.
    let stream_client = reqwest::Client::builder()
        .connect_timeout(settings.stream.connect_timeout)
        .build()
        .context("failed to build stream HTTP client")?;
    let connector = HttpStreamConnector::new(stream_client, &settings.stream.url);
    let transport = StreamTransport::new(Arc::new(connector));

    Ok(SessionManager::new(
        Arc::new(api),
        transport,
        settings.manager_settings(),
    ))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Headless mode: print readings as they arrive.
async fn watch(manager: SessionManager, card: String) -> Result<()> {
    let session = manager.start_session(&card).await?;
    println!(
        "session {} started for card {} on {}",
        session.session_id, session.card_id, session.device_id
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    let mut printer = WatchPrinter::default();

    let interrupted = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break true,
            _ = ticker.tick() => {}
        }

        let step = printer.update(manager.readings_since(printer.cursor));
        for line in &step.lines {
            println!("{}", line);
        }
        if let Some(ref err) = step.error {
            eprintln!("error: {}", err);
        }
        if step.finished {
            break false;
        }
    };

    if interrupted {
        info!("interrupted; stopping session");
        manager.stop_session().await?;
        println!("session stopped");
    }
    manager.shutdown_and_wait().await;
    Ok(())
}

/// Output of one [`WatchPrinter::update`].
#[derive(Debug, Default, PartialEq)]
struct WatchStep {
    lines: Vec<String>,
    error: Option<String>,
    /// The stream reached a terminal state.
    finished: bool,
}

/// Turns successive [`Readings`] into output lines, printing each point
/// once and each status or warning change once.
#[derive(Debug)]
struct WatchPrinter {
    cursor: u64,
    status: StreamStatus,
    warning: Option<String>,
}

impl Default for WatchPrinter {
    fn default() -> Self {
        Self {
            cursor: 0,
            status: StreamStatus::Disconnected,
            warning: None,
        }
    }
}

impl WatchPrinter {
    fn update(&mut self, readings: Readings) -> WatchStep {
        let Readings {
            snapshot,
            points,
            cursor,
        } = readings;
        self.cursor = cursor;

        let mut step = WatchStep {
            lines: points.iter().map(format_point).collect(),
            ..Default::default()
        };
        if snapshot.status != self.status {
            step.lines.push(format!("status: {}", snapshot.status));
            self.status = snapshot.status;
        }
        if snapshot.warning != self.warning {
            if let Some(ref warning) = snapshot.warning {
                step.lines.push(format!("warning: {}", warning));
            }
            self.warning = snapshot.warning;
        }
        if matches!(snapshot.status, StreamStatus::Closed | StreamStatus::Failed) {
            step.error = snapshot.error;
            step.finished = true;
        }
        step
    }
}

fn format_point(point: &CtgDataPoint) -> String {
    let value = if point.is_signal_lost() {
        "no signal".to_string()
    } else {
        format!("{:.0} {}", point.value, point.data_type.unit())
    };
    let label = match point.data_type {
        DataType::FetalHeartRate => "FHR",
        DataType::UterineContractions => "UC",
        DataType::Other(ref tag) => tag.as_str(),
    };
    format!("{:>8.1}s  {:<4} {}", point.time_sec, label, value)
}

/// Run the dashboard until the user quits
fn run_tui(
    rt: &tokio::runtime::Runtime,
    manager: SessionManager,
    settings: &Settings,
    card: Option<String>,
) -> Result<()> {
    let mut app = App::new(
        manager,
        rt.handle().clone(),
        WidgetRegistry::global(),
        &settings.dashboard.widgets,
        Theme::auto_detect(),
    )?;
    app.export_path = settings.dashboard.export_path.clone();
    if let Some(card) = card {
        app.default_card = Some(card.clone());
        app.start_session(card);
    }

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Setup panic hook to restore terminal
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic);
    }));

    let result = run_app(&mut terminal, &mut app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    rt.block_on(app.manager().shutdown_and_wait());
    result
}

fn run_app(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> Result<()> {
    while app.running {
        app.tick();
        terminal.draw(|frame| ui::render(frame, app))?;

        if let Some(Event::Key(key)) = events::poll_event(Duration::from_millis(100))? {
            events::handle_key_event(app, key);
        }
    }

    Ok(())
}
