//! Session lifecycle: start/stop against the API and the stream bound to it.
//!
//! The [`SessionManager`] is the single owner of the active session, the
//! time-series buffer and the stream task. Consumers read
//! [`snapshot`](SessionManager::snapshot)s and series copies; nothing else
//! mutates that state.
//!
//! Each opened stream is tagged with a generation number taken under the
//! state lock. Stopping, restarting or shutting down bumps the generation
//! and signals the task to close its stream, so a late event from a
//! discarded stream can never touch the buffer. Start and stop also wait for
//! that task to finish, so the old connection is gone before they return.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::data::TimeSeriesBuffer;
use crate::error::{Error, Result};
use crate::model::{
    CtgDataPoint, DataType, MessageKind, Session, SessionStatus, StartSessionRequest, StreamMessage,
};
use crate::policy::{
    HealthSignal, ReconnectConfig, ReconnectPolicy, ReconnectState, Watchdog, WatchdogConfig,
};
use crate::transport::{StreamEvent, StreamHandle, StreamParams, StreamTransport};

use super::SessionApi;

/// Runtime settings of a [`SessionManager`].
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Device sent with start requests.
    pub device_id: String,
    /// Maximum number of buffered points across all channels.
    pub buffer_capacity: usize,
    pub watchdog: WatchdogConfig,
    pub reconnect: ReconnectConfig,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            device_id: "ctg-01".to_string(),
            buffer_capacity: crate::data::DEFAULT_CAPACITY,
            watchdog: WatchdogConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// User-visible connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// No stream is bound.
    Disconnected,
    Connecting,
    Connected,
    /// No message within the heartbeat window. Non-fatal.
    Stalled,
    /// Waiting for, or running, reconnection attempt `attempt` of `max`.
    Reconnecting { attempt: u32, max: u32 },
    /// Reconnection attempts exhausted.
    Failed,
    /// The server ended the stream.
    Closed,
}

impl StreamStatus {
    pub fn is_live(self) -> bool {
        matches!(
            self,
            StreamStatus::Connecting
                | StreamStatus::Connected
                | StreamStatus::Stalled
                | StreamStatus::Reconnecting { .. }
        )
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamStatus::Disconnected => f.write_str("disconnected"),
            StreamStatus::Connecting => f.write_str("connecting"),
            StreamStatus::Connected => f.write_str("connected"),
            StreamStatus::Stalled => f.write_str("stalled"),
            StreamStatus::Reconnecting { attempt, max } => {
                write!(f, "reconnecting ({}/{})", attempt, max)
            }
            StreamStatus::Failed => f.write_str("connection failed"),
            StreamStatus::Closed => f.write_str("stream ended"),
        }
    }
}

/// Points appended after a cursor, read under the same lock as the state.
#[derive(Debug, Clone, PartialEq)]
pub struct Readings {
    pub snapshot: ManagerSnapshot,
    /// New points in arrival order.
    pub points: Vec<CtgDataPoint>,
    /// Cursor for the next [`SessionManager::readings_since`] call.
    pub cursor: u64,
}

/// Read-only copy of the manager state.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerSnapshot {
    pub session: Option<Session>,
    pub status: StreamStatus,
    /// Last error, until cleared or replaced.
    pub error: Option<String>,
    /// Advisory message such as the no-data warning.
    pub warning: Option<String>,
    /// A start or stop request is in flight.
    pub loading: bool,
    pub point_count: usize,
    pub last_message_at: Option<DateTime<Utc>>,
}

struct ManagerState {
    session: Option<Session>,
    buffer: TimeSeriesBuffer,
    status: StreamStatus,
    error: Option<String>,
    warning: Option<String>,
    loading: bool,
    last_message_at: Option<DateTime<Utc>>,
    generation: u64,
    pump: Option<PumpTask>,
}

impl ManagerState {
    /// Forget the bound stream. Nothing it produces afterwards is applied.
    ///
    /// Dropping the returned task stops it in the background;
    /// [`PumpTask::stop`] also waits for its connection to close.
    fn detach(&mut self) -> Option<PumpTask> {
        self.generation += 1;
        self.pump.take()
    }

    fn snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot {
            session: self.session.clone(),
            status: self.status,
            error: self.error.clone(),
            warning: self.warning.clone(),
            loading: self.loading,
            point_count: self.buffer.len(),
            last_message_at: self.last_message_at,
        }
    }

    fn mark_session_stopped(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.status = SessionStatus::Stopped;
            session.end_time.get_or_insert_with(Utc::now);
        }
    }
}

struct Inner {
    api: Arc<dyn SessionApi>,
    transport: StreamTransport,
    settings: ManagerSettings,
    state: Arc<Mutex<ManagerState>>,
    op_lock: tokio::sync::Mutex<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        drop(self.state.lock().detach());
    }
}

/// A running [`Pump`] and the signal that stops it.
///
/// Dropping the sender also stops the pump.
struct PumpTask {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl PumpTask {
    /// Stop the pump and wait until it has released its connection.
    async fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.task.await;
    }
}

/// Owns the active session and the stream feeding its buffer.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("transport", &self.inner.transport)
            .field("settings", &self.inner.settings)
            .finish()
    }
}

/// Resets the loading flag however the operation ends.
struct Loading<'a>(&'a Mutex<ManagerState>);

impl<'a> Loading<'a> {
    fn begin(state: &'a Mutex<ManagerState>) -> Self {
        state.lock().loading = true;
        Self(state)
    }
}

impl Drop for Loading<'_> {
    fn drop(&mut self) {
        self.0.lock().loading = false;
    }
}

impl SessionManager {
    pub fn new(api: Arc<dyn SessionApi>, transport: StreamTransport, settings: ManagerSettings) -> Self {
        let state = ManagerState {
            session: None,
            buffer: TimeSeriesBuffer::new(settings.buffer_capacity),
            status: StreamStatus::Disconnected,
            error: None,
            warning: None,
            loading: false,
            last_message_at: None,
            generation: 0,
            pump: None,
        };

        Self {
            inner: Arc::new(Inner {
                api,
                transport,
                settings,
                state: Arc::new(Mutex::new(state)),
                op_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    /// Start a session for `subject_id` and bind its stream.
    ///
    /// A blank id is rejected without any request. On failure no session or
    /// stream is left behind.
    pub async fn start_session(&self, subject_id: &str) -> Result<Session> {
        let subject_id = subject_id.trim();
        if subject_id.is_empty() {
            return self.fail(Error::Validation("card id must not be empty".into()));
        }

        let Ok(_guard) = self.inner.op_lock.try_lock() else {
            return self.fail(Error::Busy);
        };

        if self.inner.state.lock().session.as_ref().is_some_and(Session::is_active) {
            return self.fail(Error::Validation(
                "a session is already active; stop it first".into(),
            ));
        }

        let request = StartSessionRequest {
            device_id: self.inner.settings.device_id.clone(),
            card_id: subject_id.to_string(),
        };

        let loading = Loading::begin(&self.inner.state);
        self.inner.state.lock().error = None;

        let session = match self.inner.api.start_session(&request).await {
            Ok(session) => session,
            Err(e) => {
                warn!(card_id = %subject_id, error = %e, "failed to start session");
                drop(loading);
                return self.fail(e);
            }
        };
        info!(session_id = %session.session_id, card_id = %session.card_id, "session started");

        let device = if session.device_id.is_empty() {
            request.device_id.clone()
        } else {
            session.device_id.clone()
        };
        let card = if session.card_id.is_empty() {
            request.card_id.clone()
        } else {
            session.card_id.clone()
        };
        let params = StreamParams::new(card).with_device(device);

        let previous = self.inner.state.lock().detach();
        if let Some(previous) = previous {
            previous.stop().await;
        }

        let mut state = self.inner.state.lock();
        state.buffer.clear();
        state.session = Some(session.clone());
        state.warning = None;
        state.last_message_at = None;
        state.status = StreamStatus::Connecting;

        match self.inner.transport.open(params.clone()) {
            Ok(handle) => {
                let pump = Pump {
                    state: self.inner.state.clone(),
                    transport: self.inner.transport.clone(),
                    settings: self.inner.settings.clone(),
                    params,
                    generation: state.generation,
                };
                let (stop, stopped) = oneshot::channel();
                state.pump = Some(PumpTask {
                    stop,
                    task: tokio::spawn(pump.run(handle, stopped)),
                });
            }
            Err(e) => {
                state.status = StreamStatus::Failed;
                state.error = Some(e.to_string());
            }
        }
        drop(state);
        drop(loading);

        Ok(session)
    }

    /// Stop the active session and unbind its stream.
    ///
    /// Without an active session this does nothing. On failure the session
    /// and stream are kept.
    pub async fn stop_session(&self) -> Result<()> {
        let Ok(_guard) = self.inner.op_lock.try_lock() else {
            return self.fail(Error::Busy);
        };

        let session_id = {
            let state = self.inner.state.lock();
            match state.session.as_ref().filter(|s| s.is_active()) {
                Some(session) => session.session_id.clone(),
                None => return Ok(()),
            }
        };

        let loading = Loading::begin(&self.inner.state);
        self.inner.state.lock().error = None;

        if let Err(e) = self.inner.api.stop_session(&session_id).await {
            warn!(%session_id, error = %e, "failed to stop session");
            drop(loading);
            return self.fail(e);
        }
        info!(%session_id, "session stopped");

        let previous = {
            let mut state = self.inner.state.lock();
            state.session = None;
            state.status = StreamStatus::Disconnected;
            state.warning = None;
            state.detach()
        };
        if let Some(previous) = previous {
            previous.stop().await;
        }
        drop(loading);

        Ok(())
    }

    /// Ask the backend for active sessions and adopt the first one.
    ///
    /// The adopted session has no stream bound; it can be stopped, or a new
    /// session started once it is. A session already held is kept.
    pub async fn refresh(&self) -> Result<Option<Session>> {
        let Ok(_guard) = self.inner.op_lock.try_lock() else {
            return self.fail(Error::Busy);
        };

        let sessions = match self.inner.api.active_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => return self.fail(e),
        };

        let (adopted, previous) = {
            let mut state = self.inner.state.lock();
            if let Some(current) = state.session.as_ref().filter(|s| s.is_active()) {
                return Ok(Some(current.clone()));
            }

            match sessions.into_iter().next() {
                Some(session) => {
                    debug!(session_id = %session.session_id, "adopted active session");
                    state.session = Some(session.clone());
                    state.status = StreamStatus::Disconnected;
                    (Some(session), state.detach())
                }
                None => (None, None),
            }
        };
        if let Some(previous) = previous {
            previous.stop().await;
        }
        Ok(adopted)
    }

    /// Empty the buffer.
    pub fn clear_data(&self) {
        self.inner.state.lock().buffer.clear();
    }

    pub fn clear_error(&self) {
        let mut state = self.inner.state.lock();
        state.error = None;
        state.warning = None;
    }

    /// Cancel the stream and every pending timer.
    ///
    /// The session record is kept; the backend session is not stopped. No
    /// event is applied after this returns, though the connection itself is
    /// released in the background.
    pub fn shutdown(&self) {
        drop(self.detach_all());
    }

    /// Like [`shutdown`](Self::shutdown), and wait until the connection has
    /// been released.
    pub async fn shutdown_and_wait(&self) {
        if let Some(pump) = self.detach_all() {
            pump.stop().await;
        }
    }

    fn detach_all(&self) -> Option<PumpTask> {
        let mut state = self.inner.state.lock();
        if state.status.is_live() {
            state.status = StreamStatus::Disconnected;
        }
        state.detach()
    }

    pub fn snapshot(&self) -> ManagerSnapshot {
        self.inner.state.lock().snapshot()
    }

    /// Points appended since `cursor` (start from 0), together with the
    /// state they were read under.
    ///
    /// Points that were evicted or cleared before the call are skipped.
    pub fn readings_since(&self, cursor: u64) -> Readings {
        let state = self.inner.state.lock();
        let (points, cursor) = state.buffer.since(cursor);
        Readings {
            snapshot: state.snapshot(),
            points,
            cursor,
        }
    }

    /// Points of one channel, oldest first.
    pub fn series(&self, data_type: &DataType) -> Vec<CtgDataPoint> {
        self.inner.state.lock().buffer.filter_by_type(data_type)
    }

    /// Latest reading of one channel that is not the loss sentinel.
    pub fn last_valid(&self, data_type: &DataType) -> Option<f64> {
        self.inner.state.lock().buffer.last_valid(data_type)
    }

    /// Every buffered point in arrival order.
    pub fn points(&self) -> Vec<CtgDataPoint> {
        self.inner.state.lock().buffer.iter().cloned().collect()
    }

    fn fail<T>(&self, err: Error) -> Result<T> {
        self.inner.state.lock().error = Some(err.to_string());
        Err(err)
    }
}

/// Drives one bound stream: applies messages, runs the watchdog and the
/// reconnection policy.
struct Pump {
    state: Arc<Mutex<ManagerState>>,
    transport: StreamTransport,
    settings: ManagerSettings,
    params: StreamParams,
    generation: u64,
}

enum Flow {
    Continue,
    Stop,
}

impl Pump {
    async fn run(self, mut handle: StreamHandle, stopped: oneshot::Receiver<()>) {
        tokio::select! {
            _ = stopped => debug!("stream task stopped"),
            _ = self.drive(&mut handle) => {}
        }
        handle.close_and_wait().await;
    }

    async fn drive(&self, handle: &mut StreamHandle) {
        let mut policy = ReconnectPolicy::new(self.settings.reconnect);
        let mut watchdog: Option<Watchdog> = None;

        loop {
            let deadline = watchdog.as_ref().and_then(Watchdog::next_deadline);
            let timer = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            let event = tokio::select! {
                event = handle.next() => event,
                _ = timer => {
                    if let Some(dog) = watchdog.as_mut() {
                        let signals = dog.poll(Instant::now());
                        if let Flow::Stop = self.on_signals(&signals) {
                            return;
                        }
                    }
                    continue;
                }
            };

            let failure = match event {
                Some(StreamEvent::Open) => {
                    watchdog = Some(Watchdog::new(self.settings.watchdog, Instant::now()));
                    if let Flow::Stop = self.update(|st| st.status = StreamStatus::Connected) {
                        return;
                    }
                    continue;
                }
                Some(StreamEvent::Message(message)) => {
                    policy.on_connected();
                    let is_data = matches!(message.kind, MessageKind::Data(_));
                    let recovered = watchdog
                        .as_mut()
                        .is_some_and(|dog| dog.record_message(is_data, Instant::now()));
                    if recovered {
                        debug!("event stream recovered from stall");
                    }
                    match self.apply(message) {
                        Flow::Continue => continue,
                        Flow::Stop => return,
                    }
                }
                Some(StreamEvent::Error(reason)) => reason,
                None => "stream ended unexpectedly".to_string(),
            };

            watchdog = None;
            match policy.on_failure() {
                Some(delay) => {
                    let attempt = match policy.state() {
                        ReconnectState::Retrying(n) => n,
                        _ => 1,
                    };
                    let max = self.settings.reconnect.max_attempts;
                    warn!(error = %failure, attempt, delay_ms = delay.as_millis() as u64, "event stream lost; reconnecting");
                    let flow = self.update(|st| {
                        st.status = StreamStatus::Reconnecting { attempt, max };
                        st.warning = Some(format!("connection lost: {}", failure));
                    });
                    if let Flow::Stop = flow {
                        return;
                    }

                    handle.close_and_wait().await;
                    sleep(delay).await;

                    *handle = match self.transport.open(self.params.clone()) {
                        Ok(handle) => handle,
                        Err(e) => {
                            self.give_up(e.to_string());
                            return;
                        }
                    };
                }
                None => {
                    self.give_up(failure);
                    return;
                }
            }
        }
    }

    /// Run `f` on the state unless this stream has been detached.
    fn update(&self, f: impl FnOnce(&mut ManagerState)) -> Flow {
        let mut state = self.state.lock();
        if state.generation != self.generation {
            return Flow::Stop;
        }
        f(&mut state);
        Flow::Continue
    }

    fn apply(&self, message: StreamMessage) -> Flow {
        let now = Utc::now();
        let mut terminal = false;

        let flow = self.update(|st| {
            st.last_message_at = Some(now);
            if st.status == StreamStatus::Stalled {
                st.status = StreamStatus::Connected;
            }

            match &message.kind {
                MessageKind::Connected => {
                    st.status = StreamStatus::Connected;
                }
                MessageKind::Heartbeat | MessageKind::Unknown(_) => {}
                MessageKind::Data(payload) => {
                    let point = CtgDataPoint::from_message(&message, payload, now.timestamp_millis());
                    st.buffer.append(point);
                    if st.warning.is_some() && st.status == StreamStatus::Connected {
                        st.warning = None;
                    }
                }
                MessageKind::NoData { message } => {
                    terminal = true;
                    st.mark_session_stopped();
                    st.status = StreamStatus::Closed;
                    st.warning = Some(
                        message
                            .clone()
                            .unwrap_or_else(|| "no data available for this session".into()),
                    );
                }
                MessageKind::End => {
                    terminal = true;
                    st.mark_session_stopped();
                    st.status = StreamStatus::Closed;
                }
                MessageKind::Error { message } => {
                    terminal = true;
                    st.mark_session_stopped();
                    st.status = StreamStatus::Closed;
                    st.error = Some(
                        message
                            .clone()
                            .unwrap_or_else(|| "the stream reported an error".into()),
                    );
                }
            }
        });

        if terminal {
            info!(kind = message.kind_name(), "event stream finished");
            return Flow::Stop;
        }
        flow
    }

    fn on_signals(&self, signals: &[HealthSignal]) -> Flow {
        let mut flow = Flow::Continue;
        for signal in signals {
            let result = match signal {
                HealthSignal::Stalled => {
                    warn!(window_secs = self.settings.watchdog.heartbeat_window.as_secs(), "event stream stalled");
                    self.update(|st| st.status = StreamStatus::Stalled)
                }
                HealthSignal::NoDataWarning => {
                    warn!(timeout_secs = self.settings.watchdog.data_timeout.as_secs(), "no data received");
                    let secs = self.settings.watchdog.data_timeout.as_secs();
                    self.update(|st| {
                        st.warning = Some(format!("no data received within {}s", secs));
                    })
                }
            };
            if let Flow::Stop = result {
                flow = Flow::Stop;
            }
        }
        flow
    }

    fn give_up(&self, reason: String) {
        warn!(error = %reason, "event stream failed; waiting for user action");
        self.update(|st| {
            st.status = StreamStatus::Failed;
            st.warning = None;
            st.error = Some(format!("connection lost: {}", reason));
        });
    }
}
