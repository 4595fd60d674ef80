//! # Noughts Server
//!
//! Pairs anonymous WebSocket clients into two-player sessions and referees
//! noughts and crosses between them.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      NOUGHTS SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/           - Rules (pure, synchronous)                 │
//! │  ├── board.rs    - Board, symbols, winning lines             │
//! │  └── state.rs    - Session state machine, move outcomes      │
//! │                                                              │
//! │  network/        - Matchmaking and transport                 │
//! │  ├── session.rs  - Waiting set + session registry            │
//! │  ├── notifier.rs - Guarded hub, per-participant fan-out      │
//! │  ├── protocol.rs - Message types                             │
//! │  └── server.rs   - WebSocket server                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! The waiting set, the registry and the outboxes sit behind a single
//! mutex in [`network::SessionNotifier`]. Join, move and leave are each
//! atomic; of two racing moves only the one holding the turn is applied.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;

// Re-export commonly used types
pub use game::board::{Board, CellIndex, Symbol};
pub use game::state::{MoveError, MoveOutcome, MoveStatus, ParticipantId, Session};
pub use network::notifier::SessionNotifier;
pub use network::session::{JoinResult, SessionStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
