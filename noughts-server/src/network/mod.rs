//! Network Layer
//!
//! Matchmaking, session fan-out and the WebSocket transport.

pub mod notifier;
pub mod protocol;
pub mod server;
pub mod session;

pub use notifier::{HubStats, Outbox, RequeueError, SessionNotifier};
pub use protocol::{
    ClientMessage, ErrorCode, MoveRejection, MoveRequest, Outcome, ProtocolError, RejectReason,
    Role, ServerMessage, SessionEndInfo, SessionStartInfo, StateUpdate,
};
pub use server::{GameServer, GameServerError, ServerConfig};
pub use session::{JoinResult, SessionStore};
