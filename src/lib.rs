pub mod api;
pub mod cli;
pub mod config;
pub mod livesync;
pub mod profile;
pub mod protocol;
pub mod session;
pub mod verdicts;

use tokio::sync::mpsc;
use tracing::{debug, warn};

pub use api::{ApiError, BackendClient};
pub use livesync::{LiveEvent, LiveSync, LiveSyncConfig, Phase};
pub use session::{Session, SharedSession};
pub use verdicts::{Tally, VerdictBoard, VerdictOutcome, Vote};

use config::AppConfig;
use protocol::{ChatMessage, JudgeAnnouncement, JurorVerdict, PostMessageRequest};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Who this process is inside a courtroom: the name and address shown to
/// other participants, plus the client id presented on the live channel.
#[derive(Debug, Clone)]
pub struct Identity {
    pub username: String,
    pub address: String,
    pub client_id: String,
}

impl Identity {
    pub fn new(username: impl Into<String>, address: impl Into<String>) -> Self {
        Identity {
            username: username.into(),
            address: address.into(),
            client_id: cli::new_client_id(),
        }
    }

    /// A generated throwaway identity.
    pub fn guest() -> Self {
        let (username, address) = cli::guest_identity();
        Identity::new(username, address)
    }
}

// ---------------------------------------------------------------------------
// Room options
// ---------------------------------------------------------------------------

/// Live-channel knobs for one room.
#[derive(Debug, Clone)]
pub struct RoomOptions {
    pub heartbeat: Option<std::time::Duration>,
    pub max_reconnect_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for RoomOptions {
    fn default() -> Self {
        RoomOptions {
            heartbeat: Some(std::time::Duration::from_secs(30)),
            max_reconnect_attempts: 5,
            backoff_base_ms: 1_000,
        }
    }
}

impl RoomOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        RoomOptions {
            heartbeat: cfg.heartbeat(),
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            ..RoomOptions::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Room updates
// ---------------------------------------------------------------------------

/// What one live event did to the room, for the caller to render.
#[derive(Debug)]
pub enum RoomUpdate {
    /// A fresh message was appended to the transcript.
    Message(ChatMessage),
    /// A verdict was recorded (or replaced an earlier delivery).
    Verdict {
        verdict: JurorVerdict,
        outcome: VerdictOutcome,
    },
    Announcement(JudgeAnnouncement),
    /// The live channel (re)opened; history was refilled and `new_messages`
    /// rows were missing locally.
    Synced { new_messages: usize },
    Offline { will_retry: bool },
    /// Reconnect budget spent. The room stays readable but frozen.
    Gone,
    /// Duplicate or dropped delivery; nothing changed.
    Noop,
}

// ---------------------------------------------------------------------------
// DebateRoom: one joined courtroom
// ---------------------------------------------------------------------------

/// A joined debate: REST client, shared session state, and the live channel,
/// glued together so the caller only pumps events and renders updates.
pub struct DebateRoom {
    api: BackendClient,
    session: SharedSession,
    sync: LiveSync,
    identity: Identity,
    discussion_id: u64,
}

impl DebateRoom {
    /// Fetch the debate, seed the transcript and verdict board from history,
    /// and open the live channel. Returns the room plus the event stream to
    /// pump through [`handle_event`](Self::handle_event).
    pub async fn join(
        api: BackendClient,
        discussion_id: u64,
        identity: Identity,
        opts: RoomOptions,
    ) -> Result<(DebateRoom, mpsc::UnboundedReceiver<LiveEvent>), ApiError> {
        let info = api.fetch_debate(discussion_id).await?;
        let session = session::new_shared(Session::new(info));

        let mut cfg = LiveSyncConfig::new(api.ws_url(discussion_id, &identity.client_id));
        cfg.heartbeat = opts.heartbeat;
        cfg.max_reconnect_attempts = opts.max_reconnect_attempts;
        cfg.backoff_base_ms = opts.backoff_base_ms;
        let (sync, events) = LiveSync::new(cfg);

        let room = DebateRoom {
            api,
            session,
            sync,
            identity,
            discussion_id,
        };
        room.resync().await;
        room.sync.connect();
        Ok((room, events))
    }

    pub fn discussion_id(&self) -> u64 {
        self.discussion_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn session(&self) -> SharedSession {
        std::sync::Arc::clone(&self.session)
    }

    pub fn phase(&self) -> Phase {
        self.sync.phase()
    }

    /// Close the live channel for good. The transcript stays readable.
    pub fn leave(&self) {
        self.sync.disconnect();
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Submit a message. The transcript only grows once the backend has
    /// stored the row and handed back its id; the echo then runs through the
    /// same dedup as the live feed, so the later broadcast is a no-op.
    pub async fn submit(
        &self,
        text: &str,
        stance: Option<String>,
        reply_to: Option<u64>,
    ) -> Result<ChatMessage, ApiError> {
        let req = PostMessageRequest {
            discussion_id: self.discussion_id,
            user_address: self.identity.address.clone(),
            username: self.identity.username.clone(),
            message: text.to_string(),
            stance,
            reply_to,
        };
        let stored = self.api.post_message(&req).await?;
        self.session.lock().unwrap().push_message(stored.clone());
        Ok(stored)
    }

    // -----------------------------------------------------------------------
    // Event pump
    // -----------------------------------------------------------------------

    /// Apply one live event to the session and describe the outcome.
    pub async fn handle_event(&self, event: LiveEvent) -> RoomUpdate {
        match event {
            LiveEvent::NewMessage(msg) => {
                let fresh = self.session.lock().unwrap().push_message(msg.clone());
                if fresh {
                    RoomUpdate::Message(msg)
                } else {
                    RoomUpdate::Noop
                }
            }
            LiveEvent::JurorResponse(v) => {
                let outcome = self.session.lock().unwrap().apply_verdict(v.clone());
                match outcome {
                    VerdictOutcome::Rejected => RoomUpdate::Noop,
                    _ => RoomUpdate::Verdict {
                        verdict: v,
                        outcome,
                    },
                }
            }
            LiveEvent::JudgeAnnouncement(a) => RoomUpdate::Announcement(a),
            LiveEvent::Connected => {
                let new_messages = self.resync().await;
                RoomUpdate::Synced { new_messages }
            }
            LiveEvent::Disconnected { will_retry } => RoomUpdate::Offline { will_retry },
            LiveEvent::GaveUp => RoomUpdate::Gone,
        }
    }

    /// Refill transcript and verdicts from REST. Runs at join and after
    /// every (re)connect, since events sent while the channel was down are
    /// never replayed. Fetch failures are soft; the next reconnect retries.
    async fn resync(&self) -> usize {
        let mut added = 0;
        match self.api.fetch_messages(self.discussion_id).await {
            Ok(history) => {
                added = self.session.lock().unwrap().merge_history(history);
            }
            Err(e) => warn!(error = %e, "message history refetch failed"),
        }
        match self.api.fetch_juror_results(self.discussion_id).await {
            Ok(rows) => {
                let (accepted, rejected) = self.session.lock().unwrap().merge_verdict_history(rows);
                debug!(accepted, rejected, "verdict history merged");
            }
            Err(e) => warn!(error = %e, "juror history refetch failed"),
        }
        added
    }
}
