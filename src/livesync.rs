//! Live WebSocket channel to the backend, with heartbeat and bounded
//! exponential-backoff reconnect.
//!
//! ## Design
//! - One manager per `(debate_id, client_id)` pair; the manager owns a single
//!   connection task and `connect()` is a no-op while that task is alive, so
//!   two connections for the same pair cannot coexist.
//! - The retry logic is an explicit state machine ([`Phase`]) rather than
//!   timer-callback recursion: Idle → Connecting → Open → Backoff(n) → …
//!   → Failed once the attempt budget is spent.
//! - Inbound frames parse into the closed [`ServerEvent`] set and are
//!   forwarded over an unbounded channel in transport order, with no
//!   reordering or buffering. Unparseable frames are warn-logged and dropped.
//! - A caller-initiated `disconnect()` closes with a normal code and never
//!   reconnects; only peer-side closes and dial failures consume the retry
//!   budget. A successful open resets it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::protocol::{ChatMessage, ClientEvent, JudgeAnnouncement, JurorVerdict, ServerEvent};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Reconnect delay ceiling.
pub const BACKOFF_CAP_MS: u64 = 10_000;

/// Delay before reconnect attempt number `attempt` (zero-based):
/// `min(base * 2^attempt, BACKOFF_CAP_MS)`.
pub fn backoff_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    let factor = 1u64 << attempt.min(20);
    base_ms.saturating_mul(factor).min(BACKOFF_CAP_MS)
}

// ---------------------------------------------------------------------------
// Public surface
// ---------------------------------------------------------------------------

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No connection and none pending.
    Idle,
    /// Dial in progress.
    Connecting,
    /// Connection established, frames flowing.
    Open,
    /// Waiting out the delay before reconnect attempt `attempt`.
    Backoff { attempt: u32 },
    /// Retry budget exhausted; a manual `connect()` is required.
    Failed,
}

/// Everything the manager delivers to its consumer, in transport order.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    NewMessage(ChatMessage),
    JurorResponse(JurorVerdict),
    JudgeAnnouncement(JudgeAnnouncement),
    /// Transport opened (also after a reconnect). History should be
    /// re-fetched on this event, since the stream is not gap-free.
    Connected,
    /// Transport closed. `will_retry` is false for caller-initiated closes.
    Disconnected { will_retry: bool },
    /// Retry budget exhausted; the channel stays down until `connect()`.
    GaveUp,
}

/// Settings for one live channel.
#[derive(Debug, Clone)]
pub struct LiveSyncConfig {
    /// Full endpoint, e.g. `ws://localhost:8000/ws/7/user_ab12cd34e`.
    pub url: String,
    /// Reconnects scheduled before giving up.
    pub max_reconnect_attempts: u32,
    /// Keep-alive ping period; `None` disables the heartbeat.
    pub heartbeat: Option<Duration>,
    /// Base for the exponential backoff delay.
    pub backoff_base_ms: u64,
    /// Cap on how long a dial may take before counting as a failure.
    pub connect_timeout: Duration,
}

impl LiveSyncConfig {
    /// Defaults: 5 reconnect attempts, 30 s heartbeat, 1 s backoff base,
    /// 10 s dial timeout.
    pub fn new(url: impl Into<String>) -> Self {
        LiveSyncConfig {
            url: url.into(),
            max_reconnect_attempts: 5,
            heartbeat: Some(Duration::from_secs(30)),
            backoff_base_ms: 1_000,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// The live channel manager.
///
/// Construct with [`LiveSync::new`], which also hands back the event
/// receiver. Dropping the manager tears the connection task down.
pub struct LiveSync {
    config: LiveSyncConfig,
    events: mpsc::UnboundedSender<LiveEvent>,
    phase: Arc<Mutex<Phase>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LiveSync {
    pub fn new(config: LiveSyncConfig) -> (Self, mpsc::UnboundedReceiver<LiveEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let manager = LiveSync {
            config,
            events,
            phase: Arc::new(Mutex::new(Phase::Idle)),
            shutdown,
            task: Mutex::new(None),
        };
        (manager, rx)
    }

    /// Current lifecycle state.
    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap()
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == Phase::Open
    }

    /// Start the connection task. A no-op while a task is already alive;
    /// liveness of the task itself is checked, not a separate flag.
    ///
    /// Must be called from within a Tokio runtime. Calling after `Failed`
    /// starts over with a fresh retry budget.
    pub fn connect(&self) {
        let mut task = self.task.lock().unwrap();
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                debug!(url = %self.config.url, "live channel already running, connect ignored");
                return;
            }
        }
        self.shutdown.send_replace(false);
        *task = Some(tokio::spawn(run_channel(
            self.config.clone(),
            self.events.clone(),
            Arc::clone(&self.phase),
            self.shutdown.subscribe(),
        )));
    }

    /// Close with a normal closure code and stop. Never triggers reconnect.
    pub fn disconnect(&self) {
        info!(url = %self.config.url, "live channel disconnect requested");
        self.shutdown.send_replace(true);
    }
}

// ---------------------------------------------------------------------------
// Connection task
// ---------------------------------------------------------------------------

fn set_phase(cell: &Arc<Mutex<Phase>>, phase: Phase) {
    *cell.lock().unwrap() = phase;
}

fn emit(events: &mpsc::UnboundedSender<LiveEvent>, event: LiveEvent) {
    let _ = events.send(event);
}

/// Parse one text frame and forward it. Heartbeat pongs are swallowed;
/// unknown frames are dropped with a warning, never an error upward.
fn dispatch_frame(events: &mpsc::UnboundedSender<LiveEvent>, text: &str) {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(ServerEvent::NewMessage(msg)) => emit(events, LiveEvent::NewMessage(msg)),
        Ok(ServerEvent::JurorResponse(v)) => emit(events, LiveEvent::JurorResponse(v)),
        Ok(ServerEvent::JudgeAnnouncement(a)) => emit(events, LiveEvent::JudgeAnnouncement(a)),
        Ok(ServerEvent::Pong) => debug!("heartbeat pong received"),
        Err(e) => warn!(error = %e, raw = text, "unrecognized live frame dropped"),
    }
}

/// Heartbeat tick, or never when the heartbeat is disabled.
async fn next_tick(heartbeat: &mut Option<tokio::time::Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// The whole lifecycle of one manager activation: dial, pump frames, back
/// off on failure, give up after the budget, exit immediately on shutdown.
async fn run_channel(
    config: LiveSyncConfig,
    events: mpsc::UnboundedSender<LiveEvent>,
    phase: Arc<Mutex<Phase>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempts: u32 = 0;
    loop {
        if *shutdown.borrow() {
            set_phase(&phase, Phase::Idle);
            emit(&events, LiveEvent::Disconnected { will_retry: false });
            return;
        }

        set_phase(&phase, Phase::Connecting);
        info!(url = %config.url, "dialing live channel");
        let dial = tokio::time::timeout(config.connect_timeout, connect_async(config.url.as_str()));
        match dial.await {
            Ok(Ok((stream, _response))) => {
                attempts = 0;
                set_phase(&phase, Phase::Open);
                emit(&events, LiveEvent::Connected);
                let requested = drive(stream, &events, &config, &mut shutdown).await;
                if requested {
                    set_phase(&phase, Phase::Idle);
                    emit(&events, LiveEvent::Disconnected { will_retry: false });
                    return;
                }
                info!(url = %config.url, "live channel closed");
            }
            Ok(Err(e)) => {
                warn!(error = %e, url = %config.url, "live channel dial failed");
            }
            Err(_) => {
                warn!(
                    timeout_ms = config.connect_timeout.as_millis() as u64,
                    url = %config.url,
                    "live channel dial timed out"
                );
            }
        }

        if attempts >= config.max_reconnect_attempts {
            warn!(
                attempts,
                url = %config.url,
                "reconnect attempts exhausted, giving up"
            );
            set_phase(&phase, Phase::Failed);
            emit(&events, LiveEvent::GaveUp);
            return;
        }
        let delay = backoff_delay_ms(config.backoff_base_ms, attempts);
        set_phase(&phase, Phase::Backoff { attempt: attempts });
        emit(&events, LiveEvent::Disconnected { will_retry: true });
        debug!(attempt = attempts, delay_ms = delay, "backing off before reconnect");
        attempts += 1;

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    set_phase(&phase, Phase::Idle);
                    emit(&events, LiveEvent::Disconnected { will_retry: false });
                    return;
                }
            }
        }
    }
}

/// Pump one open connection until it closes. Returns true when the exit was
/// requested by the caller (shutdown signal or manager drop), false when the
/// peer closed or the transport failed.
async fn drive(
    stream: WsStream,
    events: &mpsc::UnboundedSender<LiveEvent>,
    config: &LiveSyncConfig,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let (mut write, mut read) = stream.split();
    let mut heartbeat = config.heartbeat.map(|period| {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval
    });

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => dispatch_frame(events, &text),
                Some(Ok(WsMessage::Ping(payload))) => {
                    if let Err(e) = write.send(WsMessage::Pong(payload)).await {
                        debug!(error = %e, "pong reply failed");
                    }
                }
                Some(Ok(WsMessage::Pong(_))) => debug!("transport-level pong"),
                Some(Ok(WsMessage::Close(frame))) => {
                    info!(frame = ?frame, "close frame from server");
                    return false;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    // Log only; the close path below the loop owns recovery.
                    warn!(error = %e, "live channel read error");
                    return false;
                }
                None => {
                    info!("live channel stream ended");
                    return false;
                }
            },
            _ = next_tick(&mut heartbeat) => {
                let ping = serde_json::to_string(&ClientEvent::Ping).unwrap_or_default();
                if let Err(e) = write.send(WsMessage::Text(ping)).await {
                    warn!(error = %e, "heartbeat send failed");
                    return false;
                }
                debug!("heartbeat ping sent");
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let close = WsMessage::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    }));
                    if let Err(e) = write.send(close).await {
                        debug!(error = %e, "close frame send failed");
                    }
                    return true;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
