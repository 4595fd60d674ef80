//! Session State
//!
//! Per-session game state machine: participants, board, turn ownership
//! and terminal detection. A finished session is frozen.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::game::board::{Board, BoardStatus, CellIndex, Symbol};

/// Unique session identifier.
pub type SessionId = Uuid;

// =============================================================================
// PARTICIPANT
// =============================================================================

/// Opaque, stable identifier of one connection, supplied by the transport.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wrap a transport-supplied identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One side of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Connection identifier.
    pub id: ParticipantId,
    /// Symbol fixed at pairing.
    pub symbol: Symbol,
}

// =============================================================================
// MOVE RESULTS
// =============================================================================

/// Status after an accepted move.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveStatus {
    /// Game goes on.
    Continuing,
    /// The mover completed a line.
    Won,
    /// Board filled with no line.
    Drawn,
}

impl MoveStatus {
    /// Whether the move ended the session.
    pub fn is_terminal(self) -> bool {
        !matches!(self, MoveStatus::Continuing)
    }
}

/// Immutable snapshot returned by an accepted move.
///
/// The mover is not recorded here; callers correlate `Won` with the id
/// they submitted the move for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoveOutcome {
    /// Terminal evaluation after the move.
    pub status: MoveStatus,
    /// Post-move board.
    pub board: Board,
    /// Next to move. Meaningless unless `status` is `Continuing`.
    pub turn: ParticipantId,
    /// Both participants in creation order.
    pub participants: [ParticipantId; 2],
}

/// Reasons a move is rejected. A rejection never mutates state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveError {
    /// The caller has no session.
    #[error("You are not in a game")]
    NoSession,
    /// The session already ended.
    #[error("The game is already over")]
    SessionFinished,
    /// The other participant holds the turn.
    #[error("It's not your turn")]
    NotYourTurn,
    /// Target cell is taken.
    #[error("Cell {0} is already occupied")]
    CellOccupied(CellIndex),
}

// =============================================================================
// SESSION
// =============================================================================

/// A paired match between exactly two participants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    id: SessionId,
    participants: [Participant; 2],
    board: Board,
    turn: ParticipantId,
    finished: bool,
}

impl Session {
    /// Start a session. `first` was waiting, takes `Symbol::First` and moves first.
    pub fn new(id: SessionId, first: ParticipantId, second: ParticipantId) -> Self {
        Self {
            id,
            turn: first.clone(),
            participants: [
                Participant {
                    id: first,
                    symbol: Symbol::First,
                },
                Participant {
                    id: second,
                    symbol: Symbol::Second,
                },
            ],
            board: Board::new(),
            finished: false,
        }
    }

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Participants in creation order.
    pub fn participants(&self) -> &[Participant; 2] {
        &self.participants
    }

    /// Participant ids in creation order.
    pub fn participant_ids(&self) -> [ParticipantId; 2] {
        [self.participants[0].id.clone(), self.participants[1].id.clone()]
    }

    /// Look up a participant by id.
    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    /// The participant facing `id`, if `id` belongs to this session.
    pub fn opponent_of(&self, id: &ParticipantId) -> Option<&Participant> {
        match self.participants.iter().position(|p| &p.id == id)? {
            0 => Some(&self.participants[1]),
            _ => Some(&self.participants[0]),
        }
    }

    /// Current board.
    pub fn board(&self) -> &Board {
        &self.board
    }

    /// Participant allowed to move.
    pub fn turn(&self) -> &ParticipantId {
        &self.turn
    }

    /// Whether the session reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Validate and apply a move for `id` at `index`.
    ///
    /// Checks, in order: not finished, caller holds the turn, cell empty.
    /// On acceptance the mover's symbol is written, the turn passes to the
    /// other participant and the board is evaluated for a win or draw.
    pub fn apply_move(
        &mut self,
        id: &ParticipantId,
        index: CellIndex,
    ) -> Result<MoveOutcome, MoveError> {
        if self.finished {
            return Err(MoveError::SessionFinished);
        }
        if &self.turn != id {
            return Err(MoveError::NotYourTurn);
        }
        if !self.board.is_empty_at(index) {
            return Err(MoveError::CellOccupied(index));
        }
        let (symbol, next) = match self.participants.iter().position(|p| &p.id == id) {
            Some(0) => (self.participants[0].symbol, self.participants[1].id.clone()),
            Some(_) => (self.participants[1].symbol, self.participants[0].id.clone()),
            None => return Err(MoveError::NotYourTurn),
        };

        self.board.place(index, symbol);
        self.turn = next;

        let status = match self.board.status() {
            BoardStatus::Won(_) => MoveStatus::Won,
            BoardStatus::Drawn => MoveStatus::Drawn,
            BoardStatus::Open => MoveStatus::Continuing,
        };
        if status.is_terminal() {
            self.finished = true;
        }

        Ok(MoveOutcome {
            status,
            board: self.board,
            turn: self.turn.clone(),
            participants: self.participant_ids(),
        })
    }
}
