//! Game Logic Module
//!
//! Board rules and the per-session state machine. No I/O, no locking.
//!
//! ## Module Structure
//!
//! - `board`: Symbols, cells, the 3x3 board and win/draw evaluation
//! - `state`: Participants, sessions, move validation and outcomes

pub mod board;
pub mod state;

// Re-export key types
pub use board::{Board, BoardStatus, Cell, CellIndex, Symbol, BOARD_CELLS, WINNING_LINES};
pub use state::{MoveError, MoveOutcome, MoveStatus, Participant, ParticipantId, Session, SessionId};
