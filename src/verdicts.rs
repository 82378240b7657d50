//! Juror verdict aggregation: folds an arbitrarily-ordered stream of verdict
//! records (bulk history + live pushes) into latest-opinion, per-juror
//! history, and per-message tally views without double counting.
//!
//! ## Design
//! - One map keyed by `(juror_id, message_id)`; redelivery overwrites, so a
//!   juror contributes at most one vote per message by construction.
//! - Raw results are interpreted against the debate's side list exactly once,
//!   at insertion. `-1` is the undecided sentinel; anything else outside
//!   `[0, sides.len())` is rejected and logged, never counted.
//! - Derived views are recomputed from the map on demand rather than
//!   maintained incrementally, so out-of-order arrival cannot leave them
//!   stale.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{debug, warn};

use crate::protocol::JurorVerdict;

/// Label used for the sentinel bucket in resolved tallies.
pub const UNDECIDED_LABEL: &str = "Undecided";

// ---------------------------------------------------------------------------
// Vote interpretation
// ---------------------------------------------------------------------------

/// A raw result resolved against a side list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Vote {
    /// Index into the debate's side list.
    Side(usize),
    Undecided,
}

/// Resolve a raw backend result string against `side_count` sides.
///
/// Returns `None` for anything that is neither the `-1` sentinel nor a valid
/// side index, non-numeric text included. Both the live path and the
/// history path go through here, so the two cannot drift.
pub fn interpret_result(raw: &str, side_count: usize) -> Option<Vote> {
    let idx: i64 = raw.trim().parse().ok()?;
    if idx == -1 {
        return Some(Vote::Undecided);
    }
    if idx >= 0 && (idx as usize) < side_count {
        return Some(Vote::Side(idx as usize));
    }
    None
}

// ---------------------------------------------------------------------------
// Records and outcomes
// ---------------------------------------------------------------------------

/// One accepted verdict, with its result already interpreted.
#[derive(Debug, Clone, Serialize)]
pub struct VerdictRecord {
    pub juror_id: u32,
    pub message_id: u64,
    pub vote: Vote,
    /// The raw result string as received, kept for display and debugging.
    pub raw_result: String,
    pub reasoning: String,
    pub created_at: String,
}

/// What happened when a verdict was fed into the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictOutcome {
    /// New `(juror, message)` key.
    Recorded,
    /// Existing key overwritten (redelivery).
    Replaced,
    /// Malformed result; nothing changed.
    Rejected,
}

/// Per-message vote counts: one slot per side plus the undecided bucket.
///
/// Counts stay index-based internally; names are resolved only when
/// rendering via [`Tally::named`] or [`Tally::to_value`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub per_side: Vec<u32>,
    pub undecided: u32,
}

impl Tally {
    fn zeroed(side_count: usize) -> Self {
        Tally {
            per_side: vec![0; side_count],
            undecided: 0,
        }
    }

    fn bump(&mut self, vote: Vote) {
        match vote {
            Vote::Side(i) => self.per_side[i] = self.per_side[i].saturating_add(1),
            Vote::Undecided => self.undecided = self.undecided.saturating_add(1),
        }
    }

    /// Total votes across all sides and the undecided bucket.
    pub fn total(&self) -> u32 {
        self.per_side.iter().sum::<u32>() + self.undecided
    }

    /// Resolve counts to `(side name, count)` pairs, undecided last.
    pub fn named<'a>(&self, sides: &'a [String]) -> Vec<(&'a str, u32)> {
        let mut out: Vec<(&str, u32)> = sides
            .iter()
            .zip(self.per_side.iter())
            .map(|(name, n)| (name.as_str(), *n))
            .collect();
        out.push((UNDECIDED_LABEL, self.undecided));
        out
    }

    /// JSON object `{side: count, ..., "Undecided": count}` for snapshots.
    pub fn to_value(&self, sides: &[String]) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, n) in self.named(sides) {
            map.insert(name.to_string(), serde_json::Value::from(n));
        }
        serde_json::Value::Object(map)
    }
}

// ---------------------------------------------------------------------------
// The board
// ---------------------------------------------------------------------------

/// Verdict store for one debate.
#[derive(Debug, Clone, Default)]
pub struct VerdictBoard {
    sides: Vec<String>,
    verdicts: HashMap<(u32, u64), VerdictRecord>,
}

impl VerdictBoard {
    /// Build an empty board over the debate's side list.
    pub fn new(sides: Vec<String>) -> Self {
        VerdictBoard {
            sides,
            verdicts: HashMap::new(),
        }
    }

    pub fn sides(&self) -> &[String] {
        &self.sides
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }

    /// Feed one verdict in. Overwrites on a repeated `(juror, message)` key;
    /// rejects (with a warning) results that do not resolve to a side or the
    /// undecided sentinel.
    pub fn insert(&mut self, v: JurorVerdict) -> VerdictOutcome {
        let Some(vote) = interpret_result(&v.result, self.sides.len()) else {
            warn!(
                juror_id = v.juror_id,
                message_id = v.latest_msg_id,
                raw = %v.result,
                "dropping verdict with unusable result"
            );
            return VerdictOutcome::Rejected;
        };
        let record = VerdictRecord {
            juror_id: v.juror_id,
            message_id: v.latest_msg_id,
            vote,
            raw_result: v.result,
            reasoning: v.reasoning,
            created_at: v.created_at,
        };
        let key = (record.juror_id, record.message_id);
        match self.verdicts.insert(key, record) {
            None => VerdictOutcome::Recorded,
            Some(_) => {
                debug!(
                    juror_id = key.0,
                    message_id = key.1,
                    "verdict redelivery overwrote existing entry"
                );
                VerdictOutcome::Replaced
            }
        }
    }

    /// Fold the nested per-juror lists from the history endpoint through
    /// [`insert`](Self::insert). Returns `(accepted, rejected)` counts.
    pub fn absorb_history(&mut self, batches: Vec<Vec<JurorVerdict>>) -> (usize, usize) {
        let mut accepted = 0;
        let mut rejected = 0;
        for batch in batches {
            for v in batch {
                match self.insert(v) {
                    VerdictOutcome::Rejected => rejected += 1,
                    _ => accepted += 1,
                }
            }
        }
        (accepted, rejected)
    }

    /// Latest opinion per juror: the record with the greatest `created_at`
    /// (ties broken toward the higher message id). Recomputed from the map
    /// each call.
    pub fn latest_per_juror(&self) -> BTreeMap<u32, &VerdictRecord> {
        let mut latest: BTreeMap<u32, &VerdictRecord> = BTreeMap::new();
        for rec in self.verdicts.values() {
            match latest.get(&rec.juror_id) {
                Some(cur)
                    if (cur.created_at.as_str(), cur.message_id)
                        >= (rec.created_at.as_str(), rec.message_id) => {}
                _ => {
                    latest.insert(rec.juror_id, rec);
                }
            }
        }
        latest
    }

    /// Where the jury stands right now: one vote per juror, taken from each
    /// juror's latest opinion.
    pub fn standing(&self) -> Tally {
        let mut tally = Tally::zeroed(self.sides.len());
        for rec in self.latest_per_juror().values() {
            tally.bump(rec.vote);
        }
        tally
    }

    /// Full history for one juror, ordered by `created_at` then message id.
    pub fn history_for(&self, juror_id: u32) -> Vec<&VerdictRecord> {
        let mut out: Vec<&VerdictRecord> = self
            .verdicts
            .values()
            .filter(|r| r.juror_id == juror_id)
            .collect();
        out.sort_by(|a, b| {
            (a.created_at.as_str(), a.message_id).cmp(&(b.created_at.as_str(), b.message_id))
        });
        out
    }

    /// Tally for one message, or `None` if no juror has voted on it.
    pub fn tally_for(&self, message_id: u64) -> Option<Tally> {
        let mut tally = Tally::zeroed(self.sides.len());
        let mut any = false;
        for rec in self.verdicts.values() {
            if rec.message_id == message_id {
                tally.bump(rec.vote);
                any = true;
            }
        }
        any.then_some(tally)
    }

    /// Per-message tallies ordered by message id, i.e. the charting series.
    ///
    /// Ordered by id rather than wall clock because historical batches are
    /// not chronologically contiguous with live events.
    pub fn tally_series(&self) -> Vec<(u64, Tally)> {
        let mut by_message: BTreeMap<u64, Tally> = BTreeMap::new();
        for rec in self.verdicts.values() {
            by_message
                .entry(rec.message_id)
                .or_insert_with(|| Tally::zeroed(self.sides.len()))
                .bump(rec.vote);
        }
        by_message.into_iter().collect()
    }

    /// Ids of jurors with at least one recorded verdict, ascending.
    pub fn known_jurors(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.verdicts.keys().map(|(j, _)| *j).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
