//! Streaming session: connection lifecycle, frame queue, reconnection and capture
//!
//! Each session runs as a single task that owns every piece of mutable state
//! (the link, the frame queue, the recording handle, the timers). Public
//! methods on [`StreamingSession`] are commands sent to that task; socket
//! events, retry timers, capture ticks and heartbeats arrive as events on the
//! same loop, so there is exactly one writer.
//!
//! # Connection Flow
//!
//! 1. `connect()` - open a link (bounded by the open timeout), drain the queue
//! 2. `start_streaming()` - start the capture loop, if an audio source is attached
//! 3. `send_frame()` - enqueue and drain; frames wait while disconnected
//! 4. `disconnect()` - cancel timers, stop capture, close the link, clear the queue
//!
//! # Stale Events
//!
//! Every link and every timer gets a fresh id. Events carrying an id that no
//! longer matches are dropped, so results from a superseded connection are
//! never delivered and a cancelled retry can never resurrect the session.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::frame_queue::FrameQueue;
use super::media::{Frame, Gesture, MediaKind, Speech, WireFormats};
use super::protocol::{
    parse_server_messages, ClientMessage, ControlMessage, RecognitionResult, ServerMessage,
};
use super::reconnect::{ReconnectDecision, ReconnectNotice, ReconnectPolicy};
use super::transport::{Connector, FrameSink, Link, TransportEvent, WsConnector};
use super::StreamingError;
use crate::capture::{AudioSource, CaptureError};
use crate::config::ClientSettings;

/// Capacity of the command channel from handles to the session task
const COMMAND_CHANNEL_CAPACITY: usize = 64;

pub type SpeechSession = StreamingSession<Speech>;
pub type GestureSession = StreamingSession<Gesture>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a session, published after every change
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub connection_state: ConnectionState,
    pub is_streaming: bool,
    pub is_recording: bool,
    pub reconnect_attempts: u32,
    pub queued_frames: usize,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            connection_state: ConnectionState::Disconnected,
            is_streaming: false,
            is_recording: false,
            reconnect_attempts: 0,
            queued_frames: 0,
        }
    }
}

/// Everything a session needs besides its connector
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// WebSocket URL of the streaming endpoint
    pub url: String,
    pub open_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub max_frame_retries: u32,
    pub capture_interval: Duration,
    /// `None` disables heartbeats
    pub heartbeat_interval: Option<Duration>,
    pub formats: WireFormats,
}

impl SessionOptions {
    /// Default options for an explicit URL
    pub fn new(url: impl Into<String>) -> Self {
        let settings = ClientSettings::default();
        Self {
            url: url.into(),
            ..Self::from_settings::<Speech>(&settings)
        }
    }

    /// Options for media kind `M`, with the URL derived from the settings' base URL.
    ///
    /// Heartbeats are only enabled for endpoints that understand them (see
    /// [`endpoint_accepts_heartbeat`]).
    pub fn from_settings<M: MediaKind>(settings: &ClientSettings) -> Self {
        let url = settings.websocket_url(M::STREAM_PATH);
        Self {
            heartbeat_interval: settings
                .heartbeat_interval()
                .filter(|_| endpoint_accepts_heartbeat(&url)),
            url,
            open_timeout: settings.open_timeout(),
            reconnect: settings.reconnect_policy(),
            max_frame_retries: settings.max_frame_retries,
            capture_interval: settings.capture_interval(),
            formats: WireFormats {
                audio: settings.audio.clone(),
                video: settings.video.clone(),
            },
        }
    }
}

/// Whether the backend answers `heartbeat` messages on this endpoint.
///
/// Only the connection-manager routes under `/ws/` do. The recognition
/// endpoints treat every text frame as media and would answer a heartbeat
/// with a recognition result.
pub fn endpoint_accepts_heartbeat(url: &str) -> bool {
    let after_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path = after_scheme
        .find('/')
        .map_or("", |idx| &after_scheme[idx..]);
    path.starts_with("/ws/")
}

// ============================================================================
// Callback slots
// ============================================================================

type ResultCallback<R> = Arc<dyn Fn(R) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&StreamingError) + Send + Sync>;
type StatusCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;
type ReconnectCallback = Arc<dyn Fn(ReconnectNotice) + Send + Sync>;

/// One handler per event type; registering again replaces the previous one
struct Callbacks<R> {
    on_result: Option<ResultCallback<R>>,
    on_error: Option<ErrorCallback>,
    on_status_change: Option<StatusCallback>,
    on_reconnect: Option<ReconnectCallback>,
}

impl<R> Default for Callbacks<R> {
    fn default() -> Self {
        Self {
            on_result: None,
            on_error: None,
            on_status_change: None,
            on_reconnect: None,
        }
    }
}

type SharedCallbacks<R> = Arc<Mutex<Callbacks<R>>>;

// ============================================================================
// Commands and events
// ============================================================================

enum Command {
    Connect(oneshot::Sender<bool>),
    Disconnect(oneshot::Sender<()>),
    ForceReconnect(oneshot::Sender<bool>),
    StartStreaming(oneshot::Sender<Result<(), StreamingError>>),
    StopStreaming(oneshot::Sender<()>),
    SendFrame(Frame, oneshot::Sender<bool>),
    PendingFrames(oneshot::Sender<usize>),
}

#[derive(Debug)]
enum Event {
    Transport { link_id: Uuid, event: TransportEvent },
    ReconnectDue { timer_id: Uuid },
    CaptureTick { capture_id: Uuid },
    HeartbeatDue { link_id: Uuid },
}

type EventSender = mpsc::UnboundedSender<Event>;

/// A cancellable timer task tagged with the id its events carry
struct Timer {
    id: Uuid,
    cancel: CancellationToken,
}

impl Timer {
    /// Fire `event` once after `delay`
    fn once(delay: Duration, events: EventSender, event: impl FnOnce(Uuid) -> Event) -> Self {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let event = event(id);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = events.send(event);
                }
            }
        });
        Self { id, cancel }
    }

    /// Fire an event every `period` until cancelled
    fn every(
        period: Duration,
        events: EventSender,
        event: impl Fn(Uuid) -> Event + Send + 'static,
    ) -> Self {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(period) => {
                        if events.send(event(id)).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Self { id, cancel }
    }

    fn cancel(self) {
        self.cancel.cancel();
    }
}

/// The currently open link
struct ActiveLink {
    id: Uuid,
    sink: Box<dyn FrameSink>,
    forwarder: JoinHandle<()>,
    heartbeat: Option<Timer>,
}

// ============================================================================
// Public handle
// ============================================================================

/// Handle to a streaming session.
///
/// Cheap to clone; every clone talks to the same session task. The task
/// shuts down (closing the link and stopping capture) once the last handle
/// is dropped.
pub struct StreamingSession<M: MediaKind> {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
    callbacks: SharedCallbacks<M::Result>,
}

impl<M: MediaKind> Clone for StreamingSession<M> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            status: self.status.clone(),
            callbacks: self.callbacks.clone(),
        }
    }
}

impl<M: MediaKind> StreamingSession<M> {
    /// Start a session task. Must be called within a Tokio runtime.
    pub fn spawn(options: SessionOptions, connector: Arc<dyn Connector>) -> Self {
        Self::spawn_inner(options, connector, None)
    }

    /// Start a session whose capture loop records from `source`
    pub fn with_audio_source(
        options: SessionOptions,
        connector: Arc<dyn Connector>,
        source: Box<dyn AudioSource>,
    ) -> Self {
        Self::spawn_inner(options, connector, Some(source))
    }

    /// Start a session against the configured backend over a real WebSocket
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self::spawn(
            SessionOptions::from_settings::<M>(settings),
            Arc::new(WsConnector::new()),
        )
    }

    fn spawn_inner(
        options: SessionOptions,
        connector: Arc<dyn Connector>,
        source: Option<Box<dyn AudioSource>>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let callbacks: SharedCallbacks<M::Result> = Arc::new(Mutex::new(Callbacks::default()));

        log::info!("{} session: created for {}", M::NAME, options.url);

        let core = SessionCore::<M> {
            queue: FrameQueue::new(options.max_frame_retries),
            options,
            connector,
            callbacks: callbacks.clone(),
            status_tx,
            events_tx,
            state: ConnectionState::Disconnected,
            is_streaming: false,
            is_recording: false,
            reconnect_attempts: 0,
            link: None,
            pending_retry: None,
            source,
            capture_ticker: None,
            results_dispatched: 0,
        };
        tokio::spawn(core.run(commands_rx, events_rx));

        Self {
            commands: commands_tx,
            status: status_rx,
            callbacks,
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, StreamingError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| StreamingError::SessionClosed)?;
        reply_rx.await.map_err(|_| StreamingError::SessionClosed)
    }

    /// Open the connection. Returns `true` once connected (immediately if
    /// already connected); `false` on failure, after reporting to `on_error`
    /// and scheduling a retry.
    pub async fn connect(&self) -> bool {
        self.request(Command::Connect).await.unwrap_or(false)
    }

    /// Stop streaming, cancel retries, close the link and clear the queue
    pub async fn disconnect(&self) {
        if self.request(Command::Disconnect).await.is_err() {
            log::debug!("{} session: disconnect after shutdown", M::NAME);
        }
    }

    /// Reset the retry budget and reconnect immediately, bypassing backoff
    pub async fn force_reconnect(&self) -> bool {
        self.request(Command::ForceReconnect).await.unwrap_or(false)
    }

    /// Permit frames to flow; starts the capture loop when an audio source is attached
    pub async fn start_streaming(&self) -> Result<(), StreamingError> {
        self.request(Command::StartStreaming).await?
    }

    pub async fn stop_streaming(&self) {
        let _ = self.request(Command::StopStreaming).await;
    }

    /// Queue a frame and try to flush. Returns `true` if the queue is empty
    /// afterwards, `false` if frames are still waiting for the transport.
    pub async fn send_frame(&self, frame: impl Into<Frame>) -> bool {
        let frame = frame.into();
        self.request(|reply| Command::SendFrame(frame, reply))
            .await
            .unwrap_or(false)
    }

    /// Number of frames waiting in the outbound queue
    pub async fn pending_frames(&self) -> usize {
        self.request(Command::PendingFrames).await.unwrap_or(0)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.status.borrow().connection_state
    }

    pub fn is_streaming(&self) -> bool {
        self.status.borrow().is_streaming
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.status.borrow().reconnect_attempts
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Observe status changes; unlike the callbacks, any number of subscribers is fine
    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub fn on_result<F>(&self, callback: F)
    where
        F: Fn(M::Result) + Send + Sync + 'static,
    {
        self.with_callbacks(|c| c.on_result = Some(Arc::new(callback)));
    }

    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&StreamingError) + Send + Sync + 'static,
    {
        self.with_callbacks(|c| c.on_error = Some(Arc::new(callback)));
    }

    pub fn on_status_change<F>(&self, callback: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.with_callbacks(|c| c.on_status_change = Some(Arc::new(callback)));
    }

    pub fn on_reconnect<F>(&self, callback: F)
    where
        F: Fn(ReconnectNotice) + Send + Sync + 'static,
    {
        self.with_callbacks(|c| c.on_reconnect = Some(Arc::new(callback)));
    }

    /// Unregister every callback
    pub fn clear_callbacks(&self) {
        self.with_callbacks(|c| *c = Callbacks::default());
    }

    fn with_callbacks(&self, update: impl FnOnce(&mut Callbacks<M::Result>)) {
        match self.callbacks.lock() {
            Ok(mut callbacks) => update(&mut callbacks),
            Err(poisoned) => update(&mut poisoned.into_inner()),
        }
    }
}

// ============================================================================
// Session task
// ============================================================================

struct SessionCore<M: MediaKind> {
    options: SessionOptions,
    connector: Arc<dyn Connector>,
    callbacks: SharedCallbacks<M::Result>,
    status_tx: watch::Sender<SessionStatus>,
    events_tx: EventSender,

    state: ConnectionState,
    is_streaming: bool,
    is_recording: bool,
    reconnect_attempts: u32,
    link: Option<ActiveLink>,
    queue: FrameQueue,
    pending_retry: Option<Timer>,
    source: Option<Box<dyn AudioSource>>,
    capture_ticker: Option<Timer>,
    results_dispatched: u64,
}

impl<M: MediaKind> SessionCore<M> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        log::debug!("{} session: task started", M::NAME);

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },

                Some(event) = events.recv() => self.handle_event(event).await,
            }
            self.publish_status();
        }

        // Every handle is gone
        self.cancel_pending_retry();
        self.stop_streaming();
        self.close_link().await;
        log::info!("{} session: task ended", M::NAME);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => {
                let connected = self.connect().await;
                let _ = reply.send(connected);
            }
            Command::Disconnect(reply) => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            Command::ForceReconnect(reply) => {
                let connected = self.force_reconnect().await;
                let _ = reply.send(connected);
            }
            Command::StartStreaming(reply) => {
                let result = self.start_streaming();
                let _ = reply.send(result);
            }
            Command::StopStreaming(reply) => {
                self.stop_streaming();
                let _ = reply.send(());
            }
            Command::SendFrame(frame, reply) => {
                let drained = self.send_frame(frame).await;
                let _ = reply.send(drained);
            }
            Command::PendingFrames(reply) => {
                let _ = reply.send(self.queue.len());
            }
        }
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Transport { link_id, event } => {
                if self.link.as_ref().map(|l| l.id) != Some(link_id) {
                    log::debug!(
                        "{} session: dropping {:?} from superseded link",
                        M::NAME,
                        event
                    );
                    return;
                }
                self.handle_transport_event(event).await;
            }
            Event::ReconnectDue { timer_id } => {
                if self.pending_retry.as_ref().map(|t| t.id) != Some(timer_id) {
                    log::debug!("{} session: ignoring cancelled retry", M::NAME);
                    return;
                }
                self.pending_retry = None;
                log::info!(
                    "{} session: reconnect attempt {}/{}",
                    M::NAME,
                    self.reconnect_attempts,
                    self.options.reconnect.max_attempts
                );
                self.connect().await;
            }
            Event::CaptureTick { capture_id } => {
                if self.capture_ticker.as_ref().map(|t| t.id) != Some(capture_id) {
                    return;
                }
                self.capture_tick().await;
            }
            Event::HeartbeatDue { link_id } => {
                self.send_heartbeat(link_id).await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Transport connector
    // ------------------------------------------------------------------

    fn link_is_open(&self) -> bool {
        self.link.as_ref().is_some_and(|l| l.sink.is_open())
    }

    async fn connect(&mut self) -> bool {
        if self.state == ConnectionState::Connected && self.link_is_open() {
            log::debug!("{} session: already connected", M::NAME);
            return true;
        }

        self.set_state(ConnectionState::Connecting);
        self.close_link().await;

        let opened =
            tokio::time::timeout(self.options.open_timeout, self.connector.open(&self.options.url))
                .await;

        match opened {
            Ok(Ok(link)) => {
                self.install_link(link);
                self.reconnect_attempts = 0;
                self.cancel_pending_retry();
                self.set_state(ConnectionState::Connected);
                log::info!("{} session: connected to {}", M::NAME, self.options.url);

                if !self.queue.is_empty() {
                    log::info!(
                        "{} session: flushing {} queued frame(s)",
                        M::NAME,
                        self.queue.len()
                    );
                }
                self.drain_queue().await;
                true
            }
            Ok(Err(e)) => {
                self.connection_failed(e);
                false
            }
            Err(_) => {
                self.connection_failed(StreamingError::Timeout);
                false
            }
        }
    }

    fn connection_failed(&mut self, error: StreamingError) {
        log::warn!("{} session: connection failed: {}", M::NAME, error);
        self.set_state(ConnectionState::Error);
        self.emit_error(&error);
        self.schedule_reconnect();
    }

    fn install_link(&mut self, link: Link) {
        let Link { sink, mut events } = link;
        let id = Uuid::new_v4();

        let events_tx = self.events_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if events_tx
                    .send(Event::Transport { link_id: id, event })
                    .is_err()
                {
                    break;
                }
            }
        });

        let heartbeat = self.options.heartbeat_interval.map(|period| {
            Timer::every(period, self.events_tx.clone(), move |_| Event::HeartbeatDue {
                link_id: id,
            })
        });

        self.link = Some(ActiveLink {
            id,
            sink,
            forwarder,
            heartbeat,
        });
    }

    /// Tear down the current link; close errors are logged, never returned
    async fn close_link(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };
        if let Some(heartbeat) = link.heartbeat.take() {
            heartbeat.cancel();
        }
        link.forwarder.abort();
        if link.sink.is_open() {
            if let Err(e) = link.sink.close().await {
                log::warn!("{} session: error closing link: {}", M::NAME, e);
            }
        }
    }

    async fn disconnect(&mut self) {
        self.cancel_pending_retry();
        self.stop_streaming();
        self.close_link().await;
        let cleared = self.queue.clear();
        self.set_state(ConnectionState::Disconnected);
        log::info!(
            "{} session: disconnected ({} queued frame(s) discarded)",
            M::NAME,
            cleared
        );
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Text(text) => self.dispatch(&text),
            TransportEvent::Closed { reason } => {
                log::warn!(
                    "{} session: connection closed ({})",
                    M::NAME,
                    reason.as_deref().unwrap_or("no reason")
                );
                self.close_link().await;
                self.set_state(ConnectionState::Disconnected);
                self.schedule_reconnect();
            }
            TransportEvent::Error(message) => {
                log::warn!("{} session: transport error: {}", M::NAME, message);
                self.close_link().await;
                self.set_state(ConnectionState::Error);
                self.emit_error(&StreamingError::Disconnected(message));
                self.schedule_reconnect();
            }
        }
    }

    // ------------------------------------------------------------------
    // Reconnection controller
    // ------------------------------------------------------------------

    fn schedule_reconnect(&mut self) {
        let policy = self.options.reconnect;
        match policy.next(self.reconnect_attempts) {
            ReconnectDecision::Retry { attempt, delay } => {
                self.reconnect_attempts = attempt;
                log::info!(
                    "{} session: retrying in {:?} (attempt {}/{})",
                    M::NAME,
                    delay,
                    attempt,
                    policy.max_attempts
                );
                self.emit_reconnect(ReconnectNotice {
                    attempt,
                    max_attempts: policy.max_attempts,
                    delay,
                });

                // At most one retry outstanding
                self.cancel_pending_retry();
                self.pending_retry = Some(Timer::once(delay, self.events_tx.clone(), |id| {
                    Event::ReconnectDue { timer_id: id }
                }));
            }
            ReconnectDecision::Exhausted => {
                log::error!(
                    "{} session: giving up after {} reconnection attempts",
                    M::NAME,
                    self.reconnect_attempts
                );
                self.cancel_pending_retry();
                // Nothing will drain the queue again until a manual reconnect
                self.stop_streaming();
                self.set_state(ConnectionState::Disconnected);
                self.emit_error(&StreamingError::ReconnectExhausted {
                    attempts: self.reconnect_attempts,
                });
            }
        }
    }

    fn cancel_pending_retry(&mut self) {
        if let Some(timer) = self.pending_retry.take() {
            timer.cancel();
        }
    }

    async fn force_reconnect(&mut self) -> bool {
        log::info!("{} session: forced reconnect", M::NAME);
        self.reconnect_attempts = 0;
        self.cancel_pending_retry();
        self.stop_streaming();
        self.close_link().await;
        self.connect().await
    }

    // ------------------------------------------------------------------
    // Outbound frames
    // ------------------------------------------------------------------

    async fn send_frame(&mut self, frame: Frame) -> bool {
        let message = M::encode_frame(&frame, &self.options.formats);
        self.queue.push(message);
        self.drain_queue().await
    }

    async fn drain_queue(&mut self) -> bool {
        let sink = self.link.as_mut().map(|link| link.sink.as_mut());
        self.queue.drain(sink).await
    }

    async fn send_heartbeat(&mut self, link_id: Uuid) {
        let Some(link) = self.link.as_mut().filter(|l| l.id == link_id) else {
            return;
        };
        if !link.sink.is_open() {
            return;
        }
        let outcome = match ClientMessage::heartbeat().to_json() {
            Ok(json) => link.sink.send_text(json).await,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            log::warn!("{} session: heartbeat failed: {}", M::NAME, e);
        }
    }

    // ------------------------------------------------------------------
    // Capture loop
    // ------------------------------------------------------------------

    fn start_streaming(&mut self) -> Result<(), StreamingError> {
        if self.state != ConnectionState::Connected || !self.link_is_open() {
            log::warn!("{} session: start_streaming while {}", M::NAME, self.state);
            return Err(StreamingError::NotConnected);
        }
        if self.is_streaming {
            return Ok(());
        }

        if let Some(source) = self.source.as_mut() {
            if !source.has_permission() {
                match source.request_permission() {
                    Ok(true) => {}
                    Ok(false) => return Err(StreamingError::PermissionDenied),
                    Err(e) => return Err(capture_error(e)),
                }
            }
            source.start().map_err(capture_error)?;
            self.is_recording = true;

            self.capture_ticker = Some(Timer::every(
                self.options.capture_interval,
                self.events_tx.clone(),
                |id| Event::CaptureTick { capture_id: id },
            ));
            log::info!(
                "{} session: capture loop started ({:?} cadence)",
                M::NAME,
                self.options.capture_interval
            );
        }

        self.is_streaming = true;
        log::info!("{} session: streaming started", M::NAME);
        Ok(())
    }

    /// Always completes; source errors are logged
    fn stop_streaming(&mut self) {
        if let Some(ticker) = self.capture_ticker.take() {
            ticker.cancel();
        }
        if self.is_recording {
            if let Some(source) = self.source.as_mut() {
                if let Err(e) = source.stop() {
                    log::warn!("{} session: error stopping recording: {}", M::NAME, e);
                }
            }
        }
        if self.is_streaming {
            log::info!("{} session: streaming stopped", M::NAME);
        }
        self.is_recording = false;
        self.is_streaming = false;
    }

    async fn capture_tick(&mut self) {
        let Some(source) = self.source.as_mut() else {
            return;
        };
        if !source.is_active() {
            return;
        }
        if let Some(bytes) = source.take_buffered() {
            log::debug!("{} session: captured {} bytes", M::NAME, bytes.len());
            self.send_frame(Frame::new(bytes)).await;
        }
    }

    // ------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------

    fn dispatch(&mut self, text: &str) {
        for parsed in parse_server_messages::<M::Result>(text) {
            match parsed {
                Ok(ServerMessage::Result(result)) => {
                    self.results_dispatched += 1;
                    if result.is_emergency() {
                        log::warn!("{} session: result flagged as emergency", M::NAME);
                    }
                    if self.results_dispatched % 50 == 0 {
                        log::debug!(
                            "{} session: {} results dispatched",
                            M::NAME,
                            self.results_dispatched
                        );
                    }
                    let callback = self.callbacks.lock().ok().and_then(|c| c.on_result.clone());
                    if let Some(callback) = callback {
                        callback(result);
                    }
                }
                Ok(ServerMessage::Control(ControlMessage::Error { message })) => {
                    log::warn!("{} session: backend error: {}", M::NAME, message);
                    self.emit_error(&StreamingError::Server(message));
                }
                Ok(ServerMessage::Control(control)) => {
                    log::debug!("{} session: control message {:?}", M::NAME, control);
                }
                Err(e) => {
                    log::warn!("{} session: rejected message: {}", M::NAME, e);
                    self.emit_error(&e);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        log::debug!("{} session: {} -> {}", M::NAME, self.state, next);
        self.state = next;
        self.publish_status();

        let callback = self
            .callbacks
            .lock()
            .ok()
            .and_then(|c| c.on_status_change.clone());
        if let Some(callback) = callback {
            callback(next);
        }
    }

    fn emit_error(&self, error: &StreamingError) {
        let callback = self.callbacks.lock().ok().and_then(|c| c.on_error.clone());
        if let Some(callback) = callback {
            callback(error);
        }
    }

    fn emit_reconnect(&self, notice: ReconnectNotice) {
        let callback = self
            .callbacks
            .lock()
            .ok()
            .and_then(|c| c.on_reconnect.clone());
        if let Some(callback) = callback {
            callback(notice);
        }
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(SessionStatus {
            connection_state: self.state,
            is_streaming: self.is_streaming,
            is_recording: self.is_recording,
            reconnect_attempts: self.reconnect_attempts,
            queued_frames: self.queue.len(),
        });
    }
}

fn capture_error(error: CaptureError) -> StreamingError {
    match error {
        CaptureError::PermissionDenied => StreamingError::PermissionDenied,
        other => StreamingError::Capture(other.to_string()),
    }
}
