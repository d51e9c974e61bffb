//! # ctgwatch
//!
//! A client library and terminal dashboard for CTG (cardiotocography)
//! monitoring sessions.
//!
//! The crate starts and stops monitoring sessions through the monitoring
//! service's REST API, subscribes to the service's server-sent event stream
//! for the session's medical card, and keeps a bounded, time-ordered buffer of
//! fetal heart rate and uterine contraction readings. A supervisor watches the
//! connection for silence and reconnects with capped exponential backoff.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          SessionManager                          │
//! │  ┌────────────┐   ┌──────────────┐   ┌────────┐   ┌───────────┐  │
//! │  │ SessionApi │   │StreamTransport│──▶│ policy │──▶│TimeSeries │  │
//! │  │  (REST)    │   │   (SSE)       │   │watchdog│   │  Buffer   │  │
//! │  └────────────┘   └──────────────┘   │reconnect   └─────┬─────┘  │
//! │                                      └────────┘         │        │
//! └─────────────────────────────────────────────────────────┼────────┘
//!                                                           ▼
//!                                   app + ui (ratatui dashboard) / CLI
//! ```
//!
//! - **[`model`]**: session records, stream envelopes and data points
//! - **[`transport`]**: server-sent event decoding and the [`StreamTransport`]
//! - **[`data`]**: the capacity-bounded [`TimeSeriesBuffer`]
//! - **[`policy`]**: [`Watchdog`](policy::Watchdog) and
//!   [`ReconnectPolicy`](policy::ReconnectPolicy) state machines
//! - **[`session`]**: the REST client and the [`SessionManager`]
//! - **[`settings`]**: layered configuration
//! - **[`app`]**, **[`events`]**, **[`ui`]**: the interactive dashboard
//!
//! ## Usage
//!
//! ### As a CLI tool
//!
//! ```bash
//! # Interactive dashboard
//! ctgwatch --api-url http://localhost:8080/api/v1
//!
//! # Print readings for a card until Ctrl-C
//! ctgwatch watch --card 3f2b8c1e-4d5a-4b6c-9e7f-0a1b2c3d4e5f
//!
//! # List active sessions
//! ctgwatch active
//! ```
//!
//! ### As a library
//!
//! ```no_run
//! use std::sync::Arc;
//! use ctgwatch::session::{HttpSessionApi, ManagerSettings, SessionManager};
//! use ctgwatch::transport::{HttpStreamConnector, StreamTransport};
//!
//! # tokio_test::block_on(async {
//! let api = HttpSessionApi::builder()
//!     .base_url("http://localhost:8080/api/v1")
//!     .build()?;
//! let connector = HttpStreamConnector::new(
//!     reqwest::Client::new(),
//!     "http://localhost:3000/api/stream-sse",
//! );
//! let manager = SessionManager::new(
//!     Arc::new(api),
//!     StreamTransport::new(Arc::new(connector)),
//!     ManagerSettings::default(),
//! );
//!
//! manager.start_session("3f2b8c1e-4d5a-4b6c-9e7f-0a1b2c3d4e5f").await?;
//! println!("{:?}", manager.snapshot().status);
//! # Ok::<_, ctgwatch::Error>(())
//! # });
//! ```

pub mod app;
pub mod data;
pub mod error;
pub mod events;
pub mod logging;
pub mod model;
pub mod policy;
pub mod session;
pub mod settings;
pub mod transport;
pub mod ui;

// Re-export main types for convenience
pub use app::App;
pub use data::TimeSeriesBuffer;
pub use error::{Error, Result};
pub use model::{
    validate_card_id, CtgDataPoint, DataType, Session, SessionStatus, StartSessionRequest,
    StreamMessage,
};
pub use session::{HttpSessionApi, SessionApi, SessionManager, StreamStatus};
pub use settings::Settings;
pub use transport::{StreamEvent, StreamHandle, StreamTransport};
