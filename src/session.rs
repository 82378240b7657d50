//! In-memory state for one debate: metadata, the ordered chat log with
//! idempotent append, and the verdict board.
//!
//! The log is keyed by the server-assigned message id. The REST submit
//! response and the live push both originate from the same server-side
//! write, so the same row can arrive twice; `push_message` makes the second
//! arrival a no-op instead of assuming exactly-once delivery.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;
use tracing::debug;

use crate::protocol::{ChatMessage, Debate, DebateInfo, JurorPersona, JurorVerdict};
use crate::verdicts::{VerdictBoard, VerdictOutcome};

/// Session shared between the live-sync consumer and the renderer.
pub type SharedSession = Arc<Mutex<Session>>;

/// Current epoch time in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Shorten a wallet address for display: `0x1234...cdef`.
///
/// Short or empty addresses pass through untouched. Counts and splits on
/// chars, not bytes; addresses come from the server and are not guaranteed
/// to be ASCII hex.
pub fn short_address(address: &str) -> String {
    let count = address.chars().count();
    if count <= 10 {
        return address.to_string();
    }
    let head: String = address.chars().take(4).collect();
    let tail: String = address.chars().skip(count - 4).collect();
    format!("{head}...{tail}")
}

/// All client-side state for one debate.
#[derive(Debug, Clone)]
pub struct Session {
    debate: Debate,
    jurors: Vec<JurorPersona>,
    messages: Vec<ChatMessage>,
    seen: HashSet<u64>,
    board: VerdictBoard,
}

impl Session {
    /// Build a session from the debate-info envelope.
    pub fn new(info: DebateInfo) -> Self {
        let board = VerdictBoard::new(info.debate.sides.clone());
        Session {
            debate: info.debate,
            jurors: info.jurors,
            messages: Vec::new(),
            seen: HashSet::new(),
            board,
        }
    }

    pub fn discussion_id(&self) -> u64 {
        self.debate.discussion_id
    }

    pub fn topic(&self) -> &str {
        &self.debate.topic
    }

    pub fn sides(&self) -> &[String] {
        self.debate.sides.as_slice()
    }

    pub fn jurors(&self) -> &[JurorPersona] {
        &self.jurors
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn board(&self) -> &VerdictBoard {
        &self.board
    }

    /// Append a message unless its id has been seen. Returns whether the
    /// message was new. Order of first arrival is preserved; duplicates
    /// never reorder the log.
    pub fn push_message(&mut self, msg: ChatMessage) -> bool {
        if !self.seen.insert(msg.id) {
            debug!(message_id = msg.id, "duplicate message push ignored");
            return false;
        }
        self.messages.push(msg);
        true
    }

    /// Fold a history fetch through [`push_message`](Self::push_message),
    /// returning how many entries were new. Used on load and after every
    /// successful (re)connect, since the stream is not gap-free across
    /// reconnects.
    pub fn merge_history(&mut self, batch: Vec<ChatMessage>) -> usize {
        let mut added = 0;
        for msg in batch {
            if self.push_message(msg) {
                added += 1;
            }
        }
        added
    }

    /// Feed a verdict to the board.
    pub fn apply_verdict(&mut self, v: JurorVerdict) -> VerdictOutcome {
        self.board.insert(v)
    }

    /// Fold a juror-results fetch into the board; `(accepted, rejected)`.
    pub fn merge_verdict_history(&mut self, batches: Vec<Vec<JurorVerdict>>) -> (usize, usize) {
        self.board.absorb_history(batches)
    }

    /// Whole-session dump for `--json` output and debugging.
    pub fn snapshot(&self) -> serde_json::Value {
        let latest: serde_json::Value = self
            .board
            .latest_per_juror()
            .into_iter()
            .map(|(id, rec)| (id.to_string(), serde_json::to_value(rec).unwrap_or_default()))
            .collect::<serde_json::Map<String, serde_json::Value>>()
            .into();
        let tallies: Vec<serde_json::Value> = self
            .board
            .tally_series()
            .into_iter()
            .map(|(message_id, tally)| {
                json!({
                    "message_id": message_id,
                    "votes": tally.to_value(self.sides()),
                })
            })
            .collect();
        json!({
            "discussion_id": self.debate.discussion_id,
            "topic": self.debate.topic,
            "sides": self.debate.sides,
            "jurors": self.jurors,
            "messages": self.messages,
            "latest_opinions": latest,
            "standing": self.board.standing().to_value(self.sides()),
            "tallies": tallies,
        })
    }
}

/// Wrap a session for sharing across tasks.
pub fn new_shared(session: Session) -> SharedSession {
    Arc::new(Mutex::new(session))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
