//! Session Store
//!
//! Matchmaking queue plus the table of active sessions.
//!
//! Sessions are owned once, keyed by [`SessionId`]; the registry maps each
//! participant to the handle of its session, so both participants resolve
//! to the same state. The store itself is not synchronized: the notifier
//! owns it behind a single guard, which makes every operation here atomic
//! with respect to the others.

use std::collections::BTreeMap;

use tracing::{debug, info};
use uuid::Uuid;

use crate::game::board::CellIndex;
use crate::game::state::{MoveError, MoveOutcome, ParticipantId, Session, SessionId};

/// Result of [`SessionStore::join`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinResult {
    /// No opponent available; the caller now waits.
    Waiting,
    /// Paired with the most recent waiter. Snapshot of the new session.
    Paired(Session),
}

/// Waiting set plus session registry.
#[derive(Debug, Default)]
pub struct SessionStore {
    /// Active sessions, each owned once.
    sessions: BTreeMap<SessionId, Session>,
    /// Participant to session handle. Both participants share one handle.
    registry: BTreeMap<ParticipantId, SessionId>,
    /// Unpaired participants in arrival order; pairing pops the last.
    waiting: Vec<ParticipantId>,
}

impl SessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `id` or pair it with the most recently waiting participant.
    ///
    /// `id` must not already be waiting or registered; the caller tracks one
    /// session per connection.
    pub fn join(&mut self, id: ParticipantId) -> JoinResult {
        match self.waiting.pop() {
            Some(opponent) => JoinResult::Paired(self.pair(opponent, id)),
            None => {
                debug!(participant = %id, "Participant waiting for an opponent");
                self.waiting.push(id);
                JoinResult::Waiting
            }
        }
    }

    /// Create a session: `first` takes the first symbol and the first move.
    ///
    /// Both ids are registered against the same session and removed from
    /// the waiting set.
    pub fn pair(&mut self, first: ParticipantId, second: ParticipantId) -> Session {
        self.waiting.retain(|w| w != &first && w != &second);

        let session = Session::new(Uuid::new_v4(), first.clone(), second.clone());
        let session_id = session.id();
        self.registry.insert(first.clone(), session_id);
        self.registry.insert(second.clone(), session_id);
        self.sessions.insert(session_id, session.clone());

        info!(session = %session_id, first = %first, second = %second, "Session paired");
        session
    }

    /// Apply a move for `id`. Rejections leave every session untouched.
    pub fn apply_move(
        &mut self,
        id: &ParticipantId,
        index: CellIndex,
    ) -> Result<MoveOutcome, MoveError> {
        let session = self
            .registry
            .get(id)
            .and_then(|session_id| self.sessions.get_mut(session_id))
            .ok_or(MoveError::NoSession)?;

        let outcome = session.apply_move(id, index)?;
        debug!(
            session = %session.id(),
            participant = %id,
            index = %index,
            board = %outcome.board,
            status = ?outcome.status,
            "Move applied"
        );
        Ok(outcome)
    }

    /// Remove `id` from the waiting set and tear down its session, if any.
    ///
    /// The session is unregistered under both participants. Returns the
    /// removed session. Calling again is a no-op.
    pub fn leave(&mut self, id: &ParticipantId) -> Option<Session> {
        self.waiting.retain(|w| w != id);

        let session_id = self.registry.remove(id)?;
        let session = self.sessions.remove(&session_id)?;
        for participant in session.participants() {
            self.registry.remove(&participant.id);
        }

        info!(session = %session_id, participant = %id, "Session torn down");
        Some(session)
    }

    /// Session `id` belongs to.
    pub fn session_of(&self, id: &ParticipantId) -> Option<&Session> {
        self.registry
            .get(id)
            .and_then(|session_id| self.sessions.get(session_id))
    }

    /// Whether `id` is waiting for an opponent.
    pub fn is_waiting(&self, id: &ParticipantId) -> bool {
        self.waiting.contains(id)
    }

    /// Number of waiting participants.
    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
