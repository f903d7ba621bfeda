//! Gateway shard
//!
//! One shard owns one gateway connection: socket lifecycle, framing,
//! heartbeat, identify/resume, and reconnection. The connection handle is
//! replaced on every reconnect; the [`ShardSession`] lives for the
//! process duration.
//!
//! The driver splits the socket into a reader task and a writer task (the
//! writer closes the sink when its channel drains) and serializes all
//! protocol decisions in one task, so session state never races.

mod backoff;
mod state;

pub use state::{ConnectionState, ShardSession, NO_SEQUENCE};

use crate::error::GatewayError;
use crate::events::{CloseEvent, ShardEvent, ShardEvents};
use crate::inflate::ZlibStreamInflator;
use crate::intents::GatewayIntents;
use crate::protocol::{CloseCode, GatewayFrame, OpCode, ReadyPayload};
use crate::scheduler::SendScheduler;
use crate::subscriptions::plan_subscription_chunks;
use backoff::Backoff;
use chat_client_common::ClientConfig;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Hard cap on the serialized size of any outbound frame
pub const MAX_FRAME_BYTES: usize = 15 * 1024;

/// Reconnect backoff bounds
const RECONNECT_BASE_MS: u64 = 1_000;
const RECONNECT_MAX_MS: u64 = 60_000;

/// Delay range before re-identifying after a non-resumable invalid session
const INVALID_SESSION_DELAY_MS: std::ops::Range<u64> = 1_000..5_000;

/// Options for tearing down a shard connection
#[derive(Debug, Clone, Copy)]
pub struct DestroyOptions {
    /// Close code sent to the server
    pub code: u16,
    /// Also forget the session and sequence, preventing a later RESUME
    pub reset_session: bool,
}

impl Default for DestroyOptions {
    fn default() -> Self {
        Self {
            code: CloseCode::Normal.as_u16(),
            reset_session: false,
        }
    }
}

/// Commands from the [`Shard`] handle to its driver task
enum Command {
    Connect(oneshot::Sender<Result<(), GatewayError>>),
    Send { text: String, important: bool },
    Destroy(DestroyOptions),
}

/// A gateway shard
///
/// Cheap to clone; all clones address the same driver task.
#[derive(Clone)]
pub struct Shard {
    session: Arc<ShardSession>,
    events: ShardEvents,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl Shard {
    /// Create a shard and spawn its driver task
    ///
    /// The shard stays idle until [`Self::connect`] is called.
    #[must_use]
    pub fn new(shard_id: u32, config: Arc<ClientConfig>) -> Self {
        let session = Arc::new(ShardSession::new(shard_id));
        let events = ShardEvents::new();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            config,
            session: session.clone(),
            events: events.clone(),
            cmd_rx,
            waiters: Vec::new(),
            backoff: Backoff::new(RECONNECT_BASE_MS, RECONNECT_MAX_MS),
        };
        tokio::spawn(driver.run());

        Self {
            session,
            events,
            cmd_tx,
        }
    }

    /// Subscribe to shard events
    #[must_use]
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<ShardEvent> {
        self.events.subscribe()
    }

    /// Connect (or reconnect) and wait for the session to be established
    ///
    /// Resolves on READY or RESUMED; rejects when the connection closes,
    /// the session is invalidated, or the shard is destroyed first.
    pub async fn connect(&self) -> Result<(), GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Connect(tx))
            .map_err(|_| GatewayError::NotRunning)?;
        rx.await.map_err(|_| GatewayError::Destroyed)?
    }

    /// Queue a frame for dispatch through the send scheduler
    ///
    /// Frames over [`MAX_FRAME_BYTES`] are refused: the error is both
    /// returned and emitted as a shard error, and the connection stays
    /// open.
    pub fn send(&self, frame: &GatewayFrame, important: bool) -> Result<(), GatewayError> {
        let text = frame.to_json()?;
        if text.len() > MAX_FRAME_BYTES {
            let err = GatewayError::FrameTooLarge(text.len());
            self.events.emit(ShardEvent::Error {
                shard_id: self.session.shard_id(),
                message: err.to_string(),
            });
            return Err(err);
        }
        self.cmd_tx
            .send(Command::Send { text, important })
            .map_err(|_| GatewayError::NotRunning)
    }

    /// Send a presence update (important frame)
    pub fn update_presence(&self, presence: serde_json::Value) -> Result<(), GatewayError> {
        self.send(&GatewayFrame::presence_update(presence), true)
    }

    /// Send a voice state update (important frame)
    pub fn update_voice_state(&self, voice_state: serde_json::Value) -> Result<(), GatewayError> {
        self.send(&GatewayFrame::voice_state_update(voice_state), true)
    }

    /// Close the connection
    ///
    /// The shard returns to idle and can be connected again later.
    pub fn destroy(&self, options: DestroyOptions) -> Result<(), GatewayError> {
        self.cmd_tx
            .send(Command::Destroy(options))
            .map_err(|_| GatewayError::NotRunning)
    }

    /// Current connection state
    pub async fn state(&self) -> ConnectionState {
        self.session.state().await
    }

    /// Session state handle
    #[must_use]
    pub fn session(&self) -> &Arc<ShardSession> {
        &self.session
    }

    /// Last measured heartbeat round-trip in milliseconds
    #[must_use]
    pub fn ping_ms(&self) -> u64 {
        self.session.ping_ms()
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("shard_id", &self.session.shard_id())
            .field("session", &self.session)
            .finish()
    }
}

// ── Driver ───────────────────────────────────────────────────

/// Shard-scoped timers; at most one is armed per kind
#[derive(Debug, Default)]
struct Deadlines {
    hello: Option<Instant>,
    heartbeat: Option<Instant>,
    ready: Option<Instant>,
    ws_close: Option<Instant>,
    invalid_session: Option<Instant>,
    scheduler: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Hello,
    Heartbeat,
    Ready,
    WsClose,
    InvalidSession,
    Scheduler,
}

impl Deadlines {
    fn earliest(&self) -> Option<(TimerKind, Instant)> {
        [
            (TimerKind::Hello, self.hello),
            (TimerKind::Heartbeat, self.heartbeat),
            (TimerKind::Ready, self.ready),
            (TimerKind::WsClose, self.ws_close),
            (TimerKind::InvalidSession, self.invalid_session),
            (TimerKind::Scheduler, self.scheduler),
        ]
        .into_iter()
        .filter_map(|(kind, at)| at.map(|at| (kind, at)))
        .min_by_key(|(_, at)| *at)
    }

    fn disarm(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::Hello => self.hello = None,
            TimerKind::Heartbeat => self.heartbeat = None,
            TimerKind::Ready => self.ready = None,
            TimerKind::WsClose => self.ws_close = None,
            TimerKind::InvalidSession => self.invalid_session = None,
            TimerKind::Scheduler => self.scheduler = None,
        }
    }

    /// Drop every timer except the close watchdog
    fn disarm_for_close(&mut self) {
        self.hello = None;
        self.heartbeat = None;
        self.ready = None;
        self.invalid_session = None;
        self.scheduler = None;
    }
}

/// Sleep until the given deadline, or forever when none is armed
async fn next_timer(deadline: Option<(TimerKind, Instant)>) -> TimerKind {
    match deadline {
        Some((kind, at)) => {
            tokio::time::sleep_until(at).await;
            kind
        }
        None => std::future::pending().await,
    }
}

/// What the driver does after the connection terminates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterClose {
    Reconnect,
    Idle,
}

enum RunOutcome {
    Reconnect,
    Idle,
    Stop,
}

/// Per-connection driver state, dropped on every reconnect
struct ActiveConnection {
    scheduler: SendScheduler<String>,
    inflator: Option<ZlibStreamInflator>,
    writer_tx: mpsc::UnboundedSender<Message>,
    deadlines: Deadlines,
    heartbeat_interval: Option<Duration>,
    last_ping_sent: Option<Instant>,
    after: AfterClose,
    closing: bool,
    /// Close code this side sent, reported if the server never echoes one
    initiated_close: Option<u16>,
    finished: Option<CloseEvent>,
}

impl ActiveConnection {
    fn finish(&mut self, code: u16, reason: impl Into<String>, was_clean: bool) {
        if self.finished.is_some() {
            return;
        }
        // A dropped transport after our own close still counts as that
        // close completing.
        let event = match (was_clean, self.initiated_close) {
            (false, Some(initiated)) => CloseEvent {
                code: initiated,
                reason: "closed by client".to_string(),
                was_clean: false,
            },
            _ => CloseEvent {
                code,
                reason: reason.into(),
                was_clean,
            },
        };
        self.finished = Some(event);
    }
}

enum Tick {
    Cmd(Option<Command>),
    Inbound(Option<Result<Message, String>>),
    Timer(TimerKind),
}

struct Driver {
    config: Arc<ClientConfig>,
    session: Arc<ShardSession>,
    events: ShardEvents,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    waiters: Vec<oneshot::Sender<Result<(), GatewayError>>>,
    backoff: Backoff,
}

impl Driver {
    async fn run(mut self) {
        let mut reconnect = false;
        loop {
            if reconnect {
                match self.wait_backoff().await {
                    BackoffOutcome::Proceed => {}
                    BackoffOutcome::Cancelled => {
                        reconnect = false;
                        continue;
                    }
                    BackoffOutcome::Stop => break,
                }
            } else {
                // Idle until the application asks for a connection.
                match self.cmd_rx.recv().await {
                    None => break,
                    Some(Command::Connect(tx)) => self.waiters.push(tx),
                    Some(Command::Destroy(options)) => {
                        if options.reset_session {
                            self.session.clear_session().await;
                        }
                        continue;
                    }
                    Some(Command::Send { .. }) => {
                        self.events.debug(|| "Dropping frame: not connected".to_string());
                        continue;
                    }
                }
            }

            match self.run_connection().await {
                RunOutcome::Reconnect => reconnect = true,
                RunOutcome::Idle => reconnect = false,
                RunOutcome::Stop => break,
            }
        }
        self.session.set_state(ConnectionState::Disconnected).await;
    }

    /// Sleep out the reconnect backoff while staying responsive to
    /// destroy/connect commands
    async fn wait_backoff(&mut self) -> BackoffOutcome {
        let delay = self.backoff.next_delay();
        self.events
            .debug(|| format!("Reconnecting in {} ms", delay.as_millis()));
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return BackoffOutcome::Proceed,
                cmd = self.cmd_rx.recv() => match cmd {
                    None => return BackoffOutcome::Stop,
                    // An explicit connect skips the rest of the delay.
                    Some(Command::Connect(tx)) => {
                        self.waiters.push(tx);
                        return BackoffOutcome::Proceed;
                    }
                    Some(Command::Destroy(options)) => {
                        if options.reset_session {
                            self.session.clear_session().await;
                        }
                        self.events.emit(ShardEvent::Destroyed);
                        return BackoffOutcome::Cancelled;
                    }
                    Some(Command::Send { .. }) => {}
                },
            }
        }
    }

    async fn run_connection(&mut self) -> RunOutcome {
        let resuming = self.session.can_resume().await;
        self.session
            .set_state(if resuming {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            })
            .await;

        let url = self.connect_url(resuming).await;
        self.events.debug(|| format!("Connecting to {url}"));

        let ws = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                self.emit_error(format!("Socket open failed: {e}"));
                self.fail_waiters(|| GatewayError::Closed {
                    code: 1006,
                    reason: "socket open failed".to_string(),
                });
                return RunOutcome::Reconnect;
            }
        };

        self.session.set_state(ConnectionState::Nearly).await;
        self.session.mark_connected().await;

        let (mut sink, mut stream) = ws.split();

        // Writer task: owns the sink, closes it when the channel drains.
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(msg) = writer_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader task: forwards frames until the stream ends.
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<Result<Message, String>>();
        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(msg) => {
                        if inbound_tx.send(Ok(msg)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = inbound_tx.send(Err(e.to_string()));
                        break;
                    }
                }
            }
        });

        let mut conn = ActiveConnection {
            scheduler: SendScheduler::new(self.config.gateway.scheduler),
            inflator: self.config.gateway.compress.then(ZlibStreamInflator::new),
            writer_tx,
            deadlines: Deadlines::default(),
            heartbeat_interval: None,
            last_ping_sent: None,
            after: AfterClose::Reconnect,
            closing: false,
            initiated_close: None,
            finished: None,
        };
        conn.deadlines.hello =
            Some(Instant::now() + Duration::from_millis(self.config.gateway.hello_timeout_ms));

        let (close_event, after) = loop {
            if !conn.closing {
                conn.deadlines.scheduler = conn
                    .scheduler
                    .wakeup_after(Instant::now())
                    .map(|delay| Instant::now() + delay);
            }

            let tick = {
                let timer = conn.deadlines.earliest();
                tokio::select! {
                    cmd = self.cmd_rx.recv() => Tick::Cmd(cmd),
                    msg = inbound_rx.recv() => Tick::Inbound(msg),
                    kind = next_timer(timer) => Tick::Timer(kind),
                }
            };

            match tick {
                Tick::Cmd(None) => return RunOutcome::Stop,
                Tick::Cmd(Some(cmd)) => self.handle_command(cmd, &mut conn).await,
                Tick::Inbound(item) => self.handle_inbound(item, &mut conn).await,
                Tick::Timer(kind) => {
                    conn.deadlines.disarm(kind);
                    self.handle_timer(kind, &mut conn).await;
                }
            }

            if !conn.closing {
                self.pump(&mut conn);
            }

            if let Some(event) = conn.finished.take() {
                break (event, conn.after);
            }
        };

        self.finish_connection(close_event, after).await
    }

    async fn handle_command(&mut self, cmd: Command, conn: &mut ActiveConnection) {
        match cmd {
            Command::Connect(tx) => {
                if self.session.state().await == ConnectionState::Ready {
                    let _ = tx.send(Ok(()));
                } else {
                    self.waiters.push(tx);
                }
            }
            Command::Send { text, important } => {
                conn.scheduler.enqueue(text, important);
            }
            Command::Destroy(options) => {
                if options.reset_session {
                    self.session.clear_session().await;
                }
                conn.after = AfterClose::Idle;
                self.initiate_close(conn, options.code);
            }
        }
    }

    async fn handle_inbound(
        &mut self,
        item: Option<Result<Message, String>>,
        conn: &mut ActiveConnection,
    ) {
        match item {
            None => conn.finish(1006, "connection lost", false),
            Some(Err(message)) => {
                self.emit_error(format!("WebSocket error: {message}"));
                conn.finish(1006, message, false);
            }
            Some(Ok(Message::Text(text))) => self.handle_payload(&text, conn).await,
            Some(Ok(Message::Binary(bytes))) => {
                let Some(inflator) = conn.inflator.as_mut() else {
                    self.events
                        .debug(|| "Ignoring unexpected binary frame".to_string());
                    return;
                };
                match inflator.push(&bytes) {
                    Ok(None) => {}
                    Ok(Some(inflated)) => match String::from_utf8(inflated) {
                        Ok(text) => self.handle_payload(&text, conn).await,
                        Err(e) => self.emit_error(format!("Inflated payload is not UTF-8: {e}")),
                    },
                    Err(e) => {
                        // The shared context is corrupt; the stream cannot recover.
                        self.emit_error(format!("Inflater failed: {e}"));
                        self.initiate_close(conn, CloseCode::SessionTimeout.as_u16());
                    }
                }
            }
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.to_string()))
                    .unwrap_or((1005, String::new()));
                conn.finish(code, reason, true);
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
        }
    }

    async fn handle_payload(&mut self, text: &str, conn: &mut ActiveConnection) {
        let frame = match GatewayFrame::from_json(text) {
            Ok(frame) => frame,
            Err(e) => {
                // Malformed frames are non-fatal; the shard keeps running.
                self.emit_error(format!("Failed to decode frame: {e}"));
                return;
            }
        };

        if let Some(seq) = frame.s {
            self.session.set_sequence(seq);
        }
        if self.events.has_subscribers() {
            self.events.emit(ShardEvent::Raw(frame.clone()));
        }

        match frame.op {
            OpCode::Hello => self.on_hello(&frame, conn).await,
            OpCode::HeartbeatAck => self.on_heartbeat_ack(conn),
            OpCode::Heartbeat => {
                // The server may request an immediate heartbeat.
                self.send_heartbeat(conn);
            }
            OpCode::Reconnect => {
                self.events.debug(|| "Server requested reconnect".to_string());
                self.initiate_close(conn, CloseCode::ReconnectRequested.as_u16());
            }
            OpCode::InvalidSession => self.on_invalid_session(&frame, conn).await,
            OpCode::Dispatch => self.on_dispatch(frame, conn).await,
            other => {
                self.events
                    .debug(|| format!("Ignoring unexpected opcode {other}"));
            }
        }
    }

    async fn on_hello(&mut self, frame: &GatewayFrame, conn: &mut ActiveConnection) {
        let Some(hello) = frame.as_hello() else {
            self.emit_error("Malformed HELLO payload".to_string());
            return;
        };

        conn.deadlines.hello = None;
        self.backoff.reset();

        let interval = Duration::from_millis(hello.heartbeat_interval.max(1));
        conn.heartbeat_interval = Some(interval);
        // First heartbeat is jittered across the interval to spread load.
        let first = rand::thread_rng().gen_range(0..hello.heartbeat_interval.max(1));
        conn.deadlines.heartbeat = Some(Instant::now() + Duration::from_millis(first));

        self.events.debug(|| {
            format!(
                "HELLO received, heartbeat interval {} ms",
                hello.heartbeat_interval
            )
        });
        self.identify_or_resume(conn).await;
    }

    /// Send IDENTIFY, or RESUME when a session is held
    async fn identify_or_resume(&mut self, conn: &mut ActiveConnection) {
        if self.session.can_resume().await {
            let session_id = self.session.session_id().await.unwrap_or_default();
            let seq = self.session.resume_sequence();
            self.session.set_state(ConnectionState::Resuming).await;
            self.events
                .debug(|| format!("Resuming session {session_id} from seq {seq}"));
            self.enqueue_frame(
                conn,
                &GatewayFrame::resume(&self.config.token, &session_id, seq),
                true,
            );
        } else {
            self.session.set_state(ConnectionState::Identifying).await;
            self.events.debug(|| "Identifying".to_string());
            let properties = serde_json::to_value(&self.config.properties)
                .unwrap_or(serde_json::Value::Null);
            self.enqueue_frame(
                conn,
                &GatewayFrame::identify(
                    &self.config.token,
                    properties,
                    self.config.gateway.intents,
                    None,
                ),
                true,
            );
        }
    }

    fn on_heartbeat_ack(&mut self, conn: &mut ActiveConnection) {
        self.session.ack_heartbeat();
        if let Some(sent) = conn.last_ping_sent {
            let ping = sent.elapsed().as_millis() as u64;
            self.session.set_ping_ms(ping);
            self.events.debug(|| format!("Heartbeat acked, ping {ping} ms"));
        }
    }

    fn send_heartbeat(&mut self, conn: &mut ActiveConnection) {
        let seq = self.session.sequence();
        // During the handshake the close-snapshot stands in for the live
        // sequence.
        let seq = if seq == NO_SEQUENCE {
            let resume = self.session.resume_sequence();
            (resume >= 0).then_some(resume)
        } else {
            Some(seq)
        };

        let frame = if self.config.gateway.use_qos_heartbeat {
            GatewayFrame::qos_heartbeat(seq, true)
        } else {
            GatewayFrame::heartbeat(seq)
        };
        self.enqueue_frame(conn, &frame, true);
        self.session.mark_heartbeat_sent();
        conn.last_ping_sent = Some(Instant::now());
    }

    async fn on_invalid_session(&mut self, frame: &GatewayFrame, conn: &mut ActiveConnection) {
        let resumable = frame.as_invalid_session().unwrap_or(false);
        self.events.emit(ShardEvent::InvalidSession { resumable });

        if resumable {
            self.identify_or_resume(conn).await;
        } else {
            self.session.clear_session().await;
            self.session.set_state(ConnectionState::Reconnecting).await;
            let delay = rand::thread_rng().gen_range(INVALID_SESSION_DELAY_MS);
            self.events
                .debug(|| format!("Session invalidated, re-identifying in {delay} ms"));
            conn.deadlines.invalid_session = Some(Instant::now() + Duration::from_millis(delay));
            self.fail_waiters(|| GatewayError::InvalidSession);
        }
    }

    async fn on_dispatch(&mut self, frame: GatewayFrame, conn: &mut ActiveConnection) {
        let event = frame.t.unwrap_or_default();
        let data = frame.d.unwrap_or(serde_json::Value::Null);
        let sequence = frame.s.unwrap_or_else(|| self.session.sequence());

        match event.as_str() {
            "READY" => self.on_ready(&data, conn).await,
            "RESUMED" => {
                self.session.set_state(ConnectionState::Ready).await;
                self.events.emit(ShardEvent::Resumed);
                self.resolve_waiters();
            }
            "GUILD_CREATE" => {
                if self.session.state().await == ConnectionState::WaitingForGuilds {
                    if let Some(id) = data.get("id").and_then(serde_json::Value::as_str) {
                        if self.session.guild_arrived(id).await {
                            self.promote_ready(conn).await;
                        }
                    }
                }
            }
            _ => {}
        }

        self.events.emit(ShardEvent::Dispatch {
            event,
            data,
            sequence,
        });
    }

    async fn on_ready(&mut self, data: &serde_json::Value, conn: &mut ActiveConnection) {
        let ready: ReadyPayload = match serde_json::from_value(data.clone()) {
            Ok(ready) => ready,
            Err(e) => {
                self.emit_error(format!("Malformed READY payload: {e}"));
                return;
            }
        };

        self.session
            .set_session(ready.session_id.clone(), ready.resume_gateway_url.clone())
            .await;

        let guild_ids: Vec<String> = ready.guilds.iter().map(|g| g.id.clone()).collect();
        self.session
            .set_expected_guilds(guild_ids.iter().cloned())
            .await;
        self.session
            .set_state(ConnectionState::WaitingForGuilds)
            .await;

        self.events.debug(|| {
            format!(
                "READY: session {} with {} guilds",
                ready.session_id,
                guild_ids.len()
            )
        });
        self.events.emit(ShardEvent::Ready);
        self.resolve_waiters();

        // Announce subscriptions for every guild, split under the frame
        // budget.
        for chunk in plan_subscription_chunks(&guild_ids) {
            self.enqueue_frame(conn, &GatewayFrame::guild_subscriptions_bulk(chunk), false);
        }

        let wants_guilds = self.config.gateway.intents & GatewayIntents::GUILDS.bits() != 0;
        let wait_ms = if wants_guilds {
            self.config.gateway.wait_guild_timeout_ms
        } else {
            0
        };

        if guild_ids.is_empty() || wait_ms == 0 {
            self.promote_ready(conn).await;
        } else {
            conn.deadlines.ready = Some(Instant::now() + Duration::from_millis(wait_ms));
        }
    }

    /// Promote the shard to Ready, reporting any guilds that never arrived
    async fn promote_ready(&mut self, conn: &mut ActiveConnection) {
        conn.deadlines.ready = None;
        self.session.set_state(ConnectionState::Ready).await;
        let leftover = self.session.take_expected_guilds().await;
        self.events.emit(ShardEvent::AllReady {
            unavailable: (!leftover.is_empty()).then_some(leftover),
        });
    }

    async fn handle_timer(&mut self, kind: TimerKind, conn: &mut ActiveConnection) {
        match kind {
            TimerKind::Hello => {
                self.emit_error("Timed out waiting for HELLO".to_string());
                self.initiate_close(conn, CloseCode::SessionTimeout.as_u16());
            }
            TimerKind::Heartbeat => {
                let state = self.session.state().await;
                if !self.session.last_heartbeat_acked() && !state.forces_heartbeat() {
                    self.emit_error("Heartbeat not acknowledged, zombie connection".to_string());
                    self.initiate_close(conn, CloseCode::SessionTimeout.as_u16());
                } else {
                    self.send_heartbeat(conn);
                    if let Some(interval) = conn.heartbeat_interval {
                        conn.deadlines.heartbeat = Some(Instant::now() + interval);
                    }
                }
            }
            TimerKind::Ready => self.promote_ready(conn).await,
            TimerKind::WsClose => {
                // The server never closed; synthesize the close ourselves.
                conn.finished = Some(CloseEvent {
                    code: CloseCode::SessionTimeout.as_u16(),
                    reason: "close timed out".to_string(),
                    was_clean: false,
                });
            }
            TimerKind::InvalidSession => self.identify_or_resume(conn).await,
            TimerKind::Scheduler => {}
        }
    }

    /// Serialize and queue a driver-built frame
    fn enqueue_frame(&mut self, conn: &mut ActiveConnection, frame: &GatewayFrame, important: bool) {
        match frame.to_json() {
            Ok(text) => conn.scheduler.enqueue(text, important),
            Err(e) => self.emit_error(format!("Failed to encode frame: {e}")),
        }
    }

    /// Dispatch every frame the token bucket allows
    fn pump(&mut self, conn: &mut ActiveConnection) {
        while let Some(text) = conn.scheduler.next_frame(Instant::now()) {
            if conn.writer_tx.send(Message::Text(text.into())).is_err() {
                conn.finish(1006, "writer closed", false);
                return;
            }
        }
    }

    /// Start a close handshake and arm the close watchdog
    fn initiate_close(&mut self, conn: &mut ActiveConnection, code: u16) {
        if conn.closing {
            return;
        }
        conn.closing = true;
        conn.initiated_close = Some(code);
        conn.deadlines.disarm_for_close();
        conn.deadlines.ws_close = Some(
            Instant::now() + Duration::from_millis(self.config.gateway.close_timeout_ms),
        );
        let frame = CloseFrame {
            code: WsCloseCode::from(code),
            reason: "".into(),
        };
        if conn.writer_tx.send(Message::Close(Some(frame))).is_err() {
            conn.finish(1006, "writer closed", false);
        }
    }

    async fn finish_connection(&mut self, event: CloseEvent, after: AfterClose) -> RunOutcome {
        // Session survival is decided by the explicit `reset_session`
        // flag (handled at the destroy sites) or by a non-resumable
        // INVALID_SESSION, never inferred from the close code.
        self.session.snapshot_close_sequence();
        self.session.set_state(ConnectionState::Disconnected).await;

        tracing::debug!(
            shard_id = self.session.shard_id(),
            code = event.code,
            was_clean = event.was_clean,
            "Connection closed"
        );
        self.events.emit(ShardEvent::Close(event.clone()));
        self.fail_waiters(|| GatewayError::Closed {
            code: event.code,
            reason: event.reason.clone(),
        });

        match after {
            AfterClose::Idle => {
                self.events.emit(ShardEvent::Destroyed);
                RunOutcome::Idle
            }
            AfterClose::Reconnect => RunOutcome::Reconnect,
        }
    }

    async fn connect_url(&self, resuming: bool) -> String {
        let base = if resuming {
            self.session
                .resume_url()
                .await
                .unwrap_or_else(|| self.config.gateway.url.clone())
        } else {
            self.config.gateway.url.clone()
        };
        let gateway = &self.config.gateway;
        let compress = if gateway.compress {
            "&compress=zlib-stream"
        } else {
            ""
        };
        format!(
            "{}/?v={}&encoding={}{compress}",
            base.trim_end_matches('/'),
            gateway.version,
            gateway.encoding,
        )
    }

    fn emit_error(&self, message: String) {
        tracing::warn!(shard_id = self.session.shard_id(), %message, "Shard error");
        self.events.emit(ShardEvent::Error {
            shard_id: self.session.shard_id(),
            message,
        });
    }

    fn resolve_waiters(&mut self) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn fail_waiters(&mut self, make: impl Fn() -> GatewayError) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(make()));
        }
    }
}

enum BackoffOutcome {
    Proceed,
    Cancelled,
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destroy_options_default() {
        let options = DestroyOptions::default();
        assert_eq!(options.code, 1000);
        assert!(!options.reset_session);
    }

    #[test]
    fn test_deadlines_earliest_picks_minimum() {
        let now = Instant::now();
        let mut deadlines = Deadlines::default();
        assert!(deadlines.earliest().is_none());

        deadlines.heartbeat = Some(now + Duration::from_secs(45));
        deadlines.hello = Some(now + Duration::from_secs(20));
        deadlines.scheduler = Some(now + Duration::from_millis(500));

        let (kind, _) = deadlines.earliest().unwrap();
        assert_eq!(kind, TimerKind::Scheduler);

        deadlines.disarm(TimerKind::Scheduler);
        let (kind, _) = deadlines.earliest().unwrap();
        assert_eq!(kind, TimerKind::Hello);
    }

    #[test]
    fn test_disarm_for_close_keeps_watchdog() {
        let now = Instant::now();
        let mut deadlines = Deadlines {
            hello: Some(now),
            heartbeat: Some(now),
            ready: Some(now),
            ws_close: Some(now + Duration::from_secs(5)),
            invalid_session: Some(now),
            scheduler: Some(now),
        };
        deadlines.disarm_for_close();
        let (kind, _) = deadlines.earliest().unwrap();
        assert_eq!(kind, TimerKind::WsClose);
        assert!(deadlines.heartbeat.is_none());
    }

    #[tokio::test]
    async fn test_oversized_send_is_refused() {
        let config = Arc::new(ClientConfig::new("token"));
        let shard = Shard::new(0, config);
        let mut events = shard.events();

        let huge = serde_json::Value::String("x".repeat(MAX_FRAME_BYTES + 1));
        let frame = GatewayFrame::presence_update(huge);
        let err = shard.send(&frame, false).unwrap_err();
        assert!(matches!(err, GatewayError::FrameTooLarge(_)));

        // The refusal is also reported as a shard error event.
        match events.recv().await.unwrap() {
            ShardEvent::Error { shard_id, message } => {
                assert_eq!(shard_id, 0);
                assert!(message.contains("byte cap"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_small_send_is_accepted_while_idle() {
        let config = Arc::new(ClientConfig::new("token"));
        let shard = Shard::new(0, config);
        // Queued to the driver; dropped there with a debug note since the
        // shard is idle. The call itself succeeds.
        shard
            .send(&GatewayFrame::heartbeat(Some(1)), true)
            .unwrap();
        assert_eq!(shard.state().await, ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_connection_state_initially_idle() {
        let config = Arc::new(ClientConfig::new("token"));
        let shard = Shard::new(7, config);
        assert_eq!(shard.state().await, ConnectionState::Idle);
        assert_eq!(shard.session().shard_id(), 7);
        assert_eq!(shard.ping_ms(), 0);
    }
}
