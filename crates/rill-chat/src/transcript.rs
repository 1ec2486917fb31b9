//! Transcript store: the ordered turn sequence for one conversation

use std::sync::Arc;

use rill_api::{Role, Turn};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// An immutable snapshot of the transcript
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    pub turns: Vec<Turn>,
}

impl Transcript {
    /// Look up a turn by id
    pub fn turn(&self, id: &str) -> Option<&Turn> {
        self.turns.iter().find(|turn| turn.id == id)
    }

    /// The most recent turn with the given role
    pub fn last_turn_of(&self, role: Role) -> Option<&Turn> {
        self.turns.iter().rev().find(|turn| turn.role == role)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Shared, observable transcript store.
///
/// Turn order is append-only except for [`truncate_from`]; nothing ever
/// inserts into the middle of the sequence. Each mutation is applied
/// atomically and publishes a complete snapshot, so observers never see a
/// torn intermediate state.
///
/// [`truncate_from`]: TranscriptStore::truncate_from
#[derive(Clone)]
pub struct TranscriptStore {
    tx: Arc<watch::Sender<Transcript>>,
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Transcript::default());
        Self { tx: Arc::new(tx) }
    }

    /// Subscribe to snapshots emitted after each applied mutation
    pub fn subscribe(&self) -> watch::Receiver<Transcript> {
        self.tx.subscribe()
    }

    /// Clone the current snapshot
    pub fn snapshot(&self) -> Transcript {
        self.tx.borrow().clone()
    }

    /// Append a turn at the tail
    pub fn append(&self, turn: Turn) {
        self.tx.send_modify(|transcript| transcript.turns.push(turn));
    }

    /// Mutate a single turn in place. Returns false when the id is unknown
    /// (e.g. the turn was dropped by a conversation switch mid-stream).
    pub fn update(&self, turn_id: &str, f: impl FnOnce(&mut Turn)) -> bool {
        let mut found = false;
        self.tx.send_modify(|transcript| {
            if let Some(turn) = transcript.turns.iter_mut().find(|turn| turn.id == turn_id) {
                f(turn);
                found = true;
            }
        });
        found
    }

    /// Drop the given turn and every turn after it — the edit-rebase
    /// primitive. Returns false when the id is unknown.
    pub fn truncate_from(&self, turn_id: &str) -> bool {
        let mut found = false;
        self.tx.send_modify(|transcript| {
            if let Some(index) = transcript.turns.iter().position(|turn| turn.id == turn_id) {
                transcript.turns.truncate(index);
                found = true;
            }
        });
        found
    }

    /// Replace the whole transcript (history load — never a merge)
    pub fn replace(&self, turns: Vec<Turn>) {
        self.tx.send_modify(|transcript| transcript.turns = turns);
    }

    pub fn clear(&self) {
        self.replace(Vec::new());
    }

    /// The most recent turn with the given role, cloned out
    pub fn last_turn_of(&self, role: Role) -> Option<Turn> {
        self.tx.borrow().last_turn_of(role).cloned()
    }
}
