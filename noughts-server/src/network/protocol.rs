//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are JSON text frames tagged by `type`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::board::{Board, CellIndex, Symbol};
use crate::game::state::{MoveError, MoveStatus, ParticipantId, SessionId};

// =============================================================================
// NOTICE TEXTS
// =============================================================================

/// Sent to a participant with no opponent yet.
pub const WAITING_TEXT: &str = "Waiting for an opponent...";
/// Sent to the first-moving participant on pairing.
pub const STARTED_FIRST_TEXT: &str = "Game started! You are X and it's your turn.";
/// Sent to the second-moving participant on pairing.
pub const STARTED_SECOND_TEXT: &str = "Game started! You are O and it's your opponent's turn.";
/// Turn text for the participant to move.
pub const YOUR_TURN_TEXT: &str = "It's your turn.";
/// Turn text for the waiting participant.
pub const OPPONENT_TURN_TEXT: &str = "It's your opponent's turn.";
/// Outcome text for the winner.
pub const WON_TEXT: &str = "Congratulations, you won!";
/// Outcome text for the loser.
pub const LOST_TEXT: &str = "Sorry, you lost.";
/// Outcome text for both sides of a draw.
pub const DRAW_TEXT: &str = "It's a draw.";
/// Outcome text for the participant left behind.
pub const FORFEIT_TEXT: &str = "Opponent disconnected. You win!";
/// Outcome text for a participant who left on purpose.
pub const LEFT_TEXT: &str = "You left the game.";

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Place the caller's symbol.
    Move(MoveRequest),

    /// Re-enter matchmaking after a finished game or a leave.
    Join,

    /// Abandon the current session or stop waiting.
    Leave,

    /// Ping for latency measurement.
    Ping {
        /// Client clock, echoed back in the pong.
        timestamp: u64,
    },
}

/// A move as received on the wire, not yet range-checked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MoveRequest {
    /// Board index, must be 0-8.
    pub index: i64,
}

impl MoveRequest {
    /// Range-check the index before it reaches the session store.
    pub fn cell(&self) -> Result<CellIndex, ProtocolError> {
        CellIndex::try_from(self.index).map_err(ProtocolError::IndexOutOfRange)
    }
}

/// Malformed client input. Never reaches the session store.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not a known message.
    #[error("invalid message format: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Move index outside the board.
    #[error("index {0} is out of range, expected 0-8")]
    IndexOutOfRange(i64),
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// No opponent yet.
    Waiting {
        /// Human-readable notice.
        text: String,
    },

    /// Paired with an opponent.
    SessionStarted(SessionStartInfo),

    /// Board changed after an accepted move.
    State(StateUpdate),

    /// Terminal outcome for this recipient.
    SessionEnded(SessionEndInfo),

    /// The recipient's move was refused.
    MoveRejected(MoveRejection),

    /// Pong response.
    Pong {
        /// Timestamp from the ping.
        timestamp: u64,
        /// Server clock in milliseconds since the epoch.
        server_time: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Why the server is going away.
        reason: String,
    },
}

/// Role within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Holds `Symbol::First` and moves now.
    First,
    /// Holds `Symbol::Second` and waits.
    Second,
}

impl From<Symbol> for Role {
    fn from(symbol: Symbol) -> Self {
        match symbol {
            Symbol::First => Role::First,
            Symbol::Second => Role::Second,
        }
    }
}

/// Pairing notice, one per participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStartInfo {
    /// Session identifier.
    pub session_id: SessionId,
    /// Recipient's role.
    pub role: Role,
    /// Recipient's symbol.
    pub symbol: Symbol,
    /// Human-readable notice.
    pub text: String,
}

/// Post-move state, tailored per recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    /// Board after the move.
    pub board: Board,
    /// Terminal evaluation of the move.
    pub status: MoveStatus,
    /// Next to move; `None` once the session is over.
    pub turn: Option<ParticipantId>,
    /// Whether the recipient moves next.
    pub your_turn: bool,
    /// Human-readable turn notice.
    pub text: String,
}

/// Outcome from the recipient's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Recipient completed a line.
    Won,
    /// Opponent completed a line.
    Lost,
    /// Board filled with no line.
    Draw,
    /// Opponent departed mid-game.
    WonByForfeit,
    /// Recipient left mid-game.
    Forfeited,
}

impl Outcome {
    /// Notice text for this outcome.
    pub fn text(self) -> &'static str {
        match self {
            Outcome::Won => WON_TEXT,
            Outcome::Lost => LOST_TEXT,
            Outcome::Draw => DRAW_TEXT,
            Outcome::WonByForfeit => FORFEIT_TEXT,
            Outcome::Forfeited => LEFT_TEXT,
        }
    }
}

/// Terminal notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEndInfo {
    /// Outcome for the recipient.
    pub outcome: Outcome,
    /// Human-readable notice.
    pub text: String,
}

impl From<Outcome> for SessionEndInfo {
    fn from(outcome: Outcome) -> Self {
        Self {
            outcome,
            text: outcome.text().to_string(),
        }
    }
}

/// Why a move was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Not in any session.
    NoSession,
    /// Session already over.
    SessionFinished,
    /// Opponent holds the turn.
    NotYourTurn,
    /// Cell already taken.
    CellOccupied,
}

/// Move rejection, sent only to the mover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRejection {
    /// Machine-readable reason.
    pub reason: RejectReason,
    /// Human-readable message.
    pub message: String,
}

impl From<&MoveError> for MoveRejection {
    fn from(err: &MoveError) -> Self {
        let reason = match err {
            MoveError::NoSession => RejectReason::NoSession,
            MoveError::SessionFinished => RejectReason::SessionFinished,
            MoveError::NotYourTurn => RejectReason::NotYourTurn,
            MoveError::CellOccupied(_) => RejectReason::CellOccupied,
        };
        Self {
            reason,
            message: err.to_string(),
        }
    }
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Invalid input.
    InvalidInput,
    /// Join while already waiting.
    AlreadyWaiting,
    /// Join while in an unfinished session.
    AlreadyInSession,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Build an `Error` message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError {
            code,
            message: message.into(),
        })
    }
}
