//! Server-push transport for the CTG event stream.
//!
//! A [`StreamTransport`] opens one [`StreamHandle`] per call to
//! [`StreamTransport::open`]. Each handle owns a background task that pulls
//! bytes from a [`StreamConnector`], decodes server-sent events and forwards
//! typed [`StreamEvent`]s through a bounded channel. Consumers iterate the
//! handle with [`StreamHandle::next`] (or as a `futures` stream); the sequence
//! ends when the stream terminates or the handle is closed.
//!
//! ```text
//! Idle ──▶ Connecting ──▶ Open ──▶ Closed   (end / no_data / error message, close())
//!               │           │
//!               └───────────┴────▶ Errored  (connect failure, I/O error, EOF)
//! ```
//!
//! The transport never retries; reconnection is decided by
//! [`policy`](crate::policy).

mod connector;
pub mod sse;

pub use connector::{ByteStream, HttpStreamConnector, StreamConnector};

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::StreamMessage;
use sse::SseDecoder;

/// Identifiers scoping one stream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamParams {
    /// Subject (medical card) identifier. Must not be empty.
    pub subject_id: String,
    /// Device whose readings should be streamed.
    pub device_id: Option<String>,
}

impl StreamParams {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            device_id: None,
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        self.device_id = (!device_id.is_empty()).then_some(device_id);
        self
    }
}

/// Typed event delivered by a [`StreamHandle`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The connection was established.
    Open,
    /// A decoded envelope.
    Message(StreamMessage),
    /// The connection failed; the handle is now `Errored`.
    Error(String),
}

/// Lifecycle state of a [`StreamHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Connecting,
    Open,
    Closed,
    Errored,
}

impl TransportState {
    /// Closed and Errored are final for a handle.
    pub fn is_terminal(self) -> bool {
        matches!(self, TransportState::Closed | TransportState::Errored)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportState::Idle => "idle",
            TransportState::Connecting => "connecting",
            TransportState::Open => "open",
            TransportState::Closed => "closed",
            TransportState::Errored => "errored",
        };
        f.write_str(label)
    }
}

/// Opens stream handles through a shared connector.
#[derive(Clone)]
pub struct StreamTransport {
    connector: Arc<dyn StreamConnector>,
    channel_capacity: usize,
    next_id: Arc<AtomicU64>,
}

impl fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTransport")
            .field("connector", &self.connector.description())
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

impl StreamTransport {
    pub fn new(connector: Arc<dyn StreamConnector>) -> Self {
        Self {
            connector,
            channel_capacity: 64,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Returns a human-readable description of the stream endpoint.
    pub fn description(&self) -> String {
        self.connector.description()
    }

    /// Open a new stream connection.
    ///
    /// Fails immediately, without connecting, if the subject id is blank.
    /// Must be called from within a tokio runtime.
    pub fn open(&self, params: StreamParams) -> Result<StreamHandle> {
        if params.subject_id.trim().is_empty() {
            return Err(Error::InvalidArgument("subject id must not be empty".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let state = Arc::new(Mutex::new(TransportState::Idle));

        let task = tokio::spawn(run_stream(
            id,
            self.connector.clone(),
            params,
            tx,
            state.clone(),
        ));

        Ok(StreamHandle {
            id,
            events: rx,
            state,
            task: Some(task),
            closed: false,
        })
    }
}

async fn run_stream(
    id: u64,
    connector: Arc<dyn StreamConnector>,
    params: StreamParams,
    tx: mpsc::Sender<StreamEvent>,
    state: Arc<Mutex<TransportState>>,
) {
    *state.lock() = TransportState::Connecting;
    debug!(handle = id, subject = %params.subject_id, "connecting to event stream");

    let mut bytes = match connector.connect(&params).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(handle = id, error = %e, "event stream connection failed");
            fail(&state, &tx, e.to_string()).await;
            return;
        }
    };

    *state.lock() = TransportState::Open;
    info!(handle = id, "event stream open");
    if tx.send(StreamEvent::Open).await.is_err() {
        return;
    }

    let mut decoder = SseDecoder::new();
    while let Some(chunk) = bytes.next().await {
        match chunk {
            Ok(chunk) => {
                for event in decoder.feed(&chunk) {
                    if forward(id, event, &tx, &state).await.is_break() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(handle = id, error = %e, "event stream read failed");
                fail(&state, &tx, e.to_string()).await;
                return;
            }
        }
    }

    if decoder.finish() {
        debug!(handle = id, "dropping unterminated event at end of stream");
    }

    debug!(handle = id, "event stream closed by server");
    fail(&state, &tx, "stream closed by server".to_string()).await;
}

/// Decode one SSE event and forward it. Breaks when the handle is finished.
async fn forward(
    id: u64,
    event: sse::SseEvent,
    tx: &mpsc::Sender<StreamEvent>,
    state: &Mutex<TransportState>,
) -> std::ops::ControlFlow<()> {
    use std::ops::ControlFlow;

    if !event.is_message() {
        debug!(handle = id, event = ?event.event, "ignoring named event");
        return ControlFlow::Continue(());
    }

    let message = match StreamMessage::parse(&event.data) {
        Ok(message) => message,
        Err(e) => {
            warn!(handle = id, error = %e, raw = %event.data, "skipping malformed stream message");
            return ControlFlow::Continue(());
        }
    };

    let terminal = message.is_terminal();
    if terminal {
        debug!(handle = id, kind = message.kind_name(), "terminal stream message");
        *state.lock() = TransportState::Closed;
    }
    if tx.send(StreamEvent::Message(message)).await.is_err() || terminal {
        return ControlFlow::Break(());
    }
    ControlFlow::Continue(())
}

async fn fail(state: &Mutex<TransportState>, tx: &mpsc::Sender<StreamEvent>, reason: String) {
    *state.lock() = TransportState::Errored;
    let _ = tx.send(StreamEvent::Error(reason)).await;
}

/// The live resource behind one `open` call.
///
/// Dropping the handle closes it.
#[derive(Debug)]
pub struct StreamHandle {
    id: u64,
    events: mpsc::Receiver<StreamEvent>,
    state: Arc<Mutex<TransportState>>,
    task: Option<JoinHandle<()>>,
    closed: bool,
}

impl StreamHandle {
    /// Process-unique id of this handle.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> TransportState {
        *self.state.lock()
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the stream has terminated and every event sent
    /// before termination has been delivered, or immediately after
    /// [`close`](Self::close).
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.closed {
            return None;
        }
        self.events.recv().await
    }

    /// Close the handle and discard undelivered events.
    ///
    /// Idempotent. No further events are delivered after it returns. The
    /// reader task is cancelled but may release the connection slightly
    /// later; [`close_and_wait`](Self::close_and_wait) waits for that.
    pub fn close(&mut self) {
        self.abort_reader();
    }

    /// Close the handle and wait until the reader task, together with the
    /// connection it owns, has been dropped.
    pub async fn close_and_wait(&mut self) {
        if let Some(task) = self.abort_reader() {
            // An aborted task completes only after its future is dropped.
            let _ = task.await;
        }
    }

    fn abort_reader(&mut self) -> Option<JoinHandle<()>> {
        let task = self.task.take();
        if let Some(ref task) = task {
            task.abort();
        }
        if !self.closed {
            self.closed = true;
            self.events.close();
            let mut state = self.state.lock();
            if !state.is_terminal() {
                *state = TransportState::Closed;
            }
            debug!(handle = self.id, "stream handle closed");
        }
        task
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Stream for StreamHandle {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.closed {
            return Poll::Ready(None);
        }
        self.events.poll_recv(cx)
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted connector for transport and manager tests.

    use std::collections::VecDeque;

    use async_trait::async_trait;
    use futures_util::stream;

    use super::*;

    /// What a scripted connection does.
    pub enum Script {
        /// Connection attempt fails with the given message.
        Refuse(String),
        /// Yields the chunks, then ends (EOF).
        Chunks(Vec<Vec<u8>>),
        /// Yields whatever the test pushes into the sender, ends when it is dropped.
        Live(mpsc::UnboundedReceiver<Vec<u8>>),
    }

    /// Connector that replays one script per `connect` call.
    #[derive(Default)]
    pub struct ScriptedConnector {
        scripts: Mutex<VecDeque<Script>>,
        pub connects: AtomicU64,
        pub subjects: Mutex<Vec<String>>,
    }

    impl ScriptedConnector {
        pub fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                ..Default::default()
            })
        }

        /// A connector whose single connection is fed by the returned sender.
        pub fn live() -> (Arc<Self>, mpsc::UnboundedSender<Vec<u8>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Self::new(vec![Script::Live(rx)]), tx)
        }

        pub fn connect_count(&self) -> u64 {
            self.connects.load(Ordering::SeqCst)
        }
    }

    impl fmt::Debug for ScriptedConnector {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("ScriptedConnector")
        }
    }

    #[async_trait]
    impl StreamConnector for ScriptedConnector {
        async fn connect(&self, params: &StreamParams) -> Result<ByteStream> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.subjects.lock().push(params.subject_id.clone());
            let script = self.scripts.lock().pop_front();
            match script {
                None => Err(Error::Transport("no scripted connection left".into())),
                Some(Script::Refuse(reason)) => Err(Error::Transport(reason)),
                Some(Script::Chunks(chunks)) => {
                    Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok::<_, Error>))))
                }
                Some(Script::Live(rx)) => Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|chunk| (Ok::<_, Error>(chunk), rx))
                }))),
            }
        }

        fn description(&self) -> String {
            "scripted".to_string()
        }
    }

    /// Encode a JSON envelope as one SSE event.
    pub fn sse(json: &str) -> Vec<u8> {
        format!("data: {}\n\n", json).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{sse, Script, ScriptedConnector};
    use super::*;
    use crate::model::{DataType, MessageKind};

    fn kinds(events: &[StreamEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| match e {
                StreamEvent::Open => "open".to_string(),
                StreamEvent::Message(m) => m.kind_name().to_string(),
                StreamEvent::Error(_) => "error!".to_string(),
            })
            .collect()
    }

    async fn drain(handle: &mut StreamHandle) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.next().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_open_rejects_empty_subject_without_connecting() {
        let connector = ScriptedConnector::new(vec![]);
        let transport = StreamTransport::new(connector.clone());

        let err = transport.open(StreamParams::new("  ")).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        tokio::task::yield_now().await;
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_messages_in_order_until_end() {
        let connector = ScriptedConnector::new(vec![Script::Chunks(vec![
            sse(r#"{"type":"connected"}"#),
            sse(r#"{"type":"data","data":{"data_type":"fetal_heart_rate","value":142,"time_sec":1}}"#),
            sse(r#"{"type":"heartbeat"}"#),
            sse(r#"{"type":"end"}"#),
            sse(r#"{"type":"data","data":{"data_type":"fetal_heart_rate","value":150,"time_sec":2}}"#),
        ])]);
        let transport = StreamTransport::new(connector);

        let mut handle = transport.open(StreamParams::new("card-1")).unwrap();
        let events = drain(&mut handle).await;

        assert_eq!(kinds(&events), vec!["open", "connected", "data", "heartbeat", "end"]);
        assert_eq!(handle.state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn test_error_message_is_terminal() {
        let connector = ScriptedConnector::new(vec![Script::Chunks(vec![
            sse(r#"{"type":"error","message":"device offline"}"#),
            sse(r#"{"type":"heartbeat"}"#),
        ])]);
        let transport = StreamTransport::new(connector);

        let mut handle = transport.open(StreamParams::new("card-1")).unwrap();
        let events = drain(&mut handle).await;

        assert_eq!(kinds(&events), vec!["open", "error"]);
        assert_eq!(handle.state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn test_eof_without_end_is_transport_error() {
        let connector =
            ScriptedConnector::new(vec![Script::Chunks(vec![sse(r#"{"type":"heartbeat"}"#)])]);
        let transport = StreamTransport::new(connector);

        let mut handle = transport.open(StreamParams::new("card-1")).unwrap();
        let events = drain(&mut handle).await;

        assert_eq!(kinds(&events), vec!["open", "heartbeat", "error!"]);
        assert_eq!(handle.state(), TransportState::Errored);
    }

    #[tokio::test]
    async fn test_unterminated_last_event_is_not_delivered() {
        let connector = ScriptedConnector::new(vec![Script::Chunks(vec![
            sse(r#"{"type":"heartbeat"}"#),
            br#"data: {"type":"end"}"#.to_vec(),
        ])]);
        let transport = StreamTransport::new(connector);

        let mut handle = transport.open(StreamParams::new("card-1")).unwrap();
        let events = drain(&mut handle).await;

        assert_eq!(kinds(&events), vec!["open", "heartbeat", "error!"]);
        assert_eq!(handle.state(), TransportState::Errored);
    }

    #[tokio::test]
    async fn test_connect_failure_is_errored() {
        let connector = ScriptedConnector::new(vec![Script::Refuse("refused".into())]);
        let transport = StreamTransport::new(connector.clone());

        let mut handle = transport.open(StreamParams::new("card-1")).unwrap();
        let events = drain(&mut handle).await;

        assert_eq!(events, vec![StreamEvent::Error("stream error: refused".into())]);
        assert_eq!(handle.state(), TransportState::Errored);
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_and_named_events_are_skipped() {
        let connector = ScriptedConnector::new(vec![Script::Chunks(vec![
            b"data: {broken\n\n".to_vec(),
            b"event: ping\ndata: {\"type\":\"end\"}\n\n".to_vec(),
            sse(r#"{"type":"data","data":{"data_type":"uterine_contractions","value":"18","time_sec":"4"}}"#),
            sse(r#"{"type":"end"}"#),
        ])]);
        let transport = StreamTransport::new(connector);

        let mut handle = transport.open(StreamParams::new("card-1")).unwrap();
        let events = drain(&mut handle).await;

        assert_eq!(kinds(&events), vec!["open", "data", "end"]);
        let StreamEvent::Message(msg) = &events[1] else {
            panic!("expected message");
        };
        let MessageKind::Data(payload) = &msg.kind else {
            panic!("expected data");
        };
        assert_eq!(payload.data_type, DataType::UterineContractions);
        assert_eq!(payload.value, 18.0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_stops_delivery() {
        let (connector, feed) = ScriptedConnector::live();
        let transport = StreamTransport::new(connector);

        let mut handle = transport.open(StreamParams::new("card-1")).unwrap();
        assert_eq!(handle.next().await, Some(StreamEvent::Open));
        assert_eq!(handle.state(), TransportState::Open);

        feed.send(sse(r#"{"type":"heartbeat"}"#)).unwrap();
        handle.close();
        handle.close();

        assert!(handle.is_closed());
        assert_eq!(handle.state(), TransportState::Closed);
        assert_eq!(handle.next().await, None);
        let _ = feed.send(sse(r#"{"type":"heartbeat"}"#));
        assert_eq!(handle.next().await, None);
    }

    #[tokio::test]
    async fn test_close_and_wait_releases_connection() {
        let (connector, feed) = ScriptedConnector::live();
        let transport = StreamTransport::new(connector);

        let mut handle = transport.open(StreamParams::new("card-1")).unwrap();
        assert_eq!(handle.next().await, Some(StreamEvent::Open));
        assert!(!feed.is_closed());

        handle.close_and_wait().await;
        assert!(feed.is_closed());
        assert_eq!(handle.state(), TransportState::Closed);

        handle.close_and_wait().await;
        assert_eq!(handle.next().await, None);
    }

    #[tokio::test]
    async fn test_each_open_uses_one_connection() {
        let connector = ScriptedConnector::new(vec![
            Script::Chunks(vec![sse(r#"{"type":"end"}"#)]),
            Script::Chunks(vec![sse(r#"{"type":"end"}"#)]),
        ]);
        let transport = StreamTransport::new(connector.clone());

        let mut first = transport.open(StreamParams::new("card-1")).unwrap();
        let mut second = transport.open(StreamParams::new("card-1")).unwrap();
        assert_ne!(first.id(), second.id());
        drain(&mut first).await;
        drain(&mut second).await;

        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_handle_is_a_stream() {
        let connector = ScriptedConnector::new(vec![Script::Chunks(vec![
            sse(r#"{"type":"connected"}"#),
            sse(r#"{"type":"end"}"#),
        ])]);
        let transport = StreamTransport::new(connector);

        let handle = transport.open(StreamParams::new("card-1")).unwrap();
        let events: Vec<StreamEvent> = handle.collect().await;
        assert_eq!(kinds(&events), vec!["open", "connected", "end"]);
    }

    #[test]
    fn test_params_ignore_empty_device() {
        let params = StreamParams::new("card").with_device("");
        assert_eq!(params.device_id, None);
        let params = StreamParams::new("card").with_device("ctg-01");
        assert_eq!(params.device_id.as_deref(), Some("ctg-01"));
    }
}
