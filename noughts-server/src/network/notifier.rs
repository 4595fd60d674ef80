//! Session Notifier
//!
//! Event gateway between the transport and the [`SessionStore`].
//!
//! The store and the per-participant outboxes live together behind one
//! mutex. Every event (connect, move, join, leave, disconnect) runs its store
//! operation and enqueues its notifications inside the same critical
//! section, so notifications for one session are queued in the order the
//! store applied them. Outboxes are unbounded channels: enqueueing never
//! waits on a slow client.

use std::collections::BTreeMap;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument};

use crate::game::board::CellIndex;
use crate::game::state::{MoveError, MoveOutcome, MoveStatus, ParticipantId, Session};
use crate::network::protocol::{
    ErrorCode, MoveRejection, Outcome, Role, ServerMessage, SessionEndInfo, SessionStartInfo,
    StateUpdate, OPPONENT_TURN_TEXT, STARTED_FIRST_TEXT, STARTED_SECOND_TEXT, WAITING_TEXT,
    YOUR_TURN_TEXT,
};
use crate::network::session::{JoinResult, SessionStore};

/// Channel carrying messages to one connection.
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Reasons a participant cannot enter matchmaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RequeueError {
    /// Already in the waiting set.
    #[error("Already waiting for an opponent")]
    AlreadyWaiting,
    /// In a session that has not finished.
    #[error("Already in a game")]
    AlreadyInSession,
}

impl RequeueError {
    fn code(self) -> ErrorCode {
        match self {
            RequeueError::AlreadyWaiting => ErrorCode::AlreadyWaiting,
            RequeueError::AlreadyInSession => ErrorCode::AlreadyInSession,
        }
    }
}

/// Snapshot of hub occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Connections with a registered outbox.
    pub connections: usize,
    /// Live sessions, finished ones included until torn down.
    pub sessions: usize,
    /// Participants waiting for an opponent.
    pub waiting: usize,
}

/// State guarded as one unit.
#[derive(Default)]
struct Hub {
    store: SessionStore,
    outboxes: BTreeMap<ParticipantId, Outbox>,
}

impl Hub {
    fn send(&self, to: &ParticipantId, message: ServerMessage) {
        match self.outboxes.get(to) {
            Some(outbox) => {
                if outbox.send(message).is_err() {
                    debug!(participant = %to, "Outbox closed, message dropped");
                }
            }
            None => debug!(participant = %to, "Participant unreachable, message dropped"),
        }
    }

    /// Enter matchmaking, tearing down a finished session first.
    fn enqueue(&mut self, id: &ParticipantId) -> Result<JoinResult, RequeueError> {
        if self.store.is_waiting(id) {
            return Err(RequeueError::AlreadyWaiting);
        }
        match self.store.session_of(id).map(Session::is_finished) {
            Some(false) => return Err(RequeueError::AlreadyInSession),
            Some(true) => {
                self.store.leave(id);
            }
            None => {}
        }

        let result = self.store.join(id.clone());
        match &result {
            JoinResult::Waiting => self.send(
                id,
                ServerMessage::Waiting {
                    text: WAITING_TEXT.to_string(),
                },
            ),
            JoinResult::Paired(session) => self.announce_pairing(session),
        }
        Ok(result)
    }

    fn announce_pairing(&self, session: &Session) {
        for participant in session.participants() {
            let role = Role::from(participant.symbol);
            let text = match role {
                Role::First => STARTED_FIRST_TEXT,
                Role::Second => STARTED_SECOND_TEXT,
            };
            self.send(
                &participant.id,
                ServerMessage::SessionStarted(SessionStartInfo {
                    session_id: session.id(),
                    role,
                    symbol: participant.symbol,
                    text: text.to_string(),
                }),
            );
        }
    }

    fn announce_move(&self, mover: &ParticipantId, outcome: &MoveOutcome) {
        for recipient in &outcome.participants {
            let ended = match outcome.status {
                MoveStatus::Continuing => None,
                MoveStatus::Won if recipient == mover => Some(Outcome::Won),
                MoveStatus::Won => Some(Outcome::Lost),
                MoveStatus::Drawn => Some(Outcome::Draw),
            };
            let your_turn = ended.is_none() && recipient == &outcome.turn;
            let text = match ended {
                Some(result) => result.text(),
                None if your_turn => YOUR_TURN_TEXT,
                None => OPPONENT_TURN_TEXT,
            };

            self.send(
                recipient,
                ServerMessage::State(StateUpdate {
                    board: outcome.board,
                    status: outcome.status,
                    turn: ended.is_none().then(|| outcome.turn.clone()),
                    your_turn,
                    text: text.to_string(),
                }),
            );
            if let Some(result) = ended {
                self.send(recipient, ServerMessage::SessionEnded(result.into()));
            }
        }
    }

    /// Leave matchmaking or the current session. Returns whether an
    /// unfinished session was forfeited.
    fn depart(&mut self, id: &ParticipantId) -> bool {
        let Some(session) = self.store.leave(id) else {
            return false;
        };
        if session.is_finished() {
            return false;
        }

        if let Some(opponent) = session.opponent_of(id) {
            info!(
                session = %session.id(),
                leaver = %id,
                winner = %opponent.id,
                "Session forfeited"
            );
            self.send(&opponent.id, ServerMessage::SessionEnded(Outcome::WonByForfeit.into()));
        }
        self.send(id, ServerMessage::SessionEnded(SessionEndInfo::from(Outcome::Forfeited)));
        true
    }
}

/// Gateway that applies transport events to the store and fans out results.
#[derive(Default)]
pub struct SessionNotifier {
    hub: Mutex<Hub>,
}

impl SessionNotifier {
    /// Create a notifier with an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// A connection arrived: register its outbox and enter matchmaking.
    ///
    /// The transport must hand out a fresh id per connection.
    #[instrument(skip(self, outbox))]
    pub async fn connect(
        &self,
        id: ParticipantId,
        outbox: Outbox,
    ) -> Result<JoinResult, RequeueError> {
        let mut hub = self.hub.lock().await;
        hub.outboxes.insert(id.clone(), outbox);
        let result = hub.enqueue(&id);
        if let Err(err) = &result {
            hub.send(&id, ServerMessage::error(err.code(), err.to_string()));
        }
        result
    }

    /// Re-enter matchmaking on request.
    #[instrument(skip(self))]
    pub async fn rejoin(&self, id: &ParticipantId) -> Result<JoinResult, RequeueError> {
        let mut hub = self.hub.lock().await;
        let result = hub.enqueue(id);
        if let Err(err) = &result {
            debug!(participant = %id, error = %err, "Join refused");
            hub.send(id, ServerMessage::error(err.code(), err.to_string()));
        }
        result
    }

    /// Apply a range-checked move and notify both participants.
    ///
    /// A rejection is reported to the mover only.
    #[instrument(skip(self))]
    pub async fn submit_move(
        &self,
        id: &ParticipantId,
        index: CellIndex,
    ) -> Result<MoveStatus, MoveError> {
        let mut hub = self.hub.lock().await;
        match hub.store.apply_move(id, index) {
            Ok(outcome) => {
                hub.announce_move(id, &outcome);
                if outcome.status.is_terminal() {
                    info!(participant = %id, status = ?outcome.status, "Session finished");
                }
                Ok(outcome.status)
            }
            Err(err) => {
                debug!(participant = %id, index = %index, error = %err, "Move rejected");
                hub.send(id, ServerMessage::MoveRejected(MoveRejection::from(&err)));
                Err(err)
            }
        }
    }

    /// Explicit leave; the connection stays registered.
    ///
    /// Returns whether an unfinished session was forfeited.
    #[instrument(skip(self))]
    pub async fn leave(&self, id: &ParticipantId) -> bool {
        self.hub.lock().await.depart(id)
    }

    /// The connection closed. Must be called exactly once per connection.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, id: &ParticipantId) -> bool {
        let mut hub = self.hub.lock().await;
        hub.outboxes.remove(id);
        hub.depart(id)
    }

    /// The server closed the connection. Tears down like [`disconnect`]
    /// but nobody is told of a forfeit.
    ///
    /// [`disconnect`]: SessionNotifier::disconnect
    #[instrument(skip(self))]
    pub async fn release(&self, id: &ParticipantId) {
        let mut hub = self.hub.lock().await;
        hub.outboxes.remove(id);
        if let Some(session) = hub.store.leave(id) {
            debug!(session = %session.id(), participant = %id, "Session closed by server");
        }
    }

    /// Current occupancy.
    pub async fn stats(&self) -> HubStats {
        let hub = self.hub.lock().await;
        HubStats {
            connections: hub.outboxes.len(),
            sessions: hub.store.session_count(),
            waiting: hub.store.waiting_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board::Symbol;
    use crate::network::protocol::{RejectReason, FORFEIT_TEXT, LEFT_TEXT};
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    type Inbox = UnboundedReceiver<ServerMessage>;

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::from(s)
    }

    fn idx(i: usize) -> CellIndex {
        CellIndex::new(i).unwrap()
    }

    fn drain(inbox: &mut Inbox) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = inbox.try_recv() {
            messages.push(message);
        }
        messages
    }

    async fn connect(notifier: &SessionNotifier, id: &str) -> Inbox {
        let (tx, rx) = mpsc::unbounded_channel();
        notifier.connect(pid(id), tx).await.unwrap();
        rx
    }

    async fn paired(notifier: &SessionNotifier) -> (Inbox, Inbox) {
        let mut p1 = connect(notifier, "p1").await;
        let mut p2 = connect(notifier, "p2").await;
        drain(&mut p1);
        drain(&mut p2);
        (p1, p2)
    }

    fn ended(messages: &[ServerMessage]) -> Vec<Outcome> {
        messages
            .iter()
            .filter_map(|m| match m {
                ServerMessage::SessionEnded(info) => Some(info.outcome),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_first_connection_waits() {
        let notifier = SessionNotifier::new();
        let mut p1 = connect(&notifier, "p1").await;

        assert_eq!(
            drain(&mut p1),
            vec![ServerMessage::Waiting {
                text: WAITING_TEXT.to_string()
            }]
        );
        assert_eq!(
            notifier.stats().await,
            HubStats {
                connections: 1,
                sessions: 0,
                waiting: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_pairing_notifies_each_role() {
        let notifier = SessionNotifier::new();
        let mut p1 = connect(&notifier, "p1").await;
        let mut p2 = connect(&notifier, "p2").await;

        let p1_msgs = drain(&mut p1);
        let p2_msgs = drain(&mut p2);
        assert_eq!(p1_msgs.len(), 2);
        match (&p1_msgs[1], &p2_msgs[..]) {
            (ServerMessage::SessionStarted(first), [ServerMessage::SessionStarted(second)]) => {
                assert_eq!(first.role, Role::First);
                assert_eq!(first.symbol, Symbol::First);
                assert_eq!(first.text, STARTED_FIRST_TEXT);
                assert_eq!(second.role, Role::Second);
                assert_eq!(second.text, STARTED_SECOND_TEXT);
                assert_eq!(first.session_id, second.session_id);
            }
            other => panic!("Unexpected messages: {:?}", other),
        }
        assert_eq!(
            notifier.stats().await,
            HubStats {
                connections: 2,
                sessions: 1,
                waiting: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_move_broadcasts_per_recipient_turn() {
        let notifier = SessionNotifier::new();
        let (mut p1, mut p2) = paired(&notifier).await;

        let status = notifier.submit_move(&pid("p1"), idx(0)).await.unwrap();
        assert_eq!(status, MoveStatus::Continuing);

        for (inbox, mine) in [(&mut p1, false), (&mut p2, true)] {
            match &drain(inbox)[..] {
                [ServerMessage::State(update)] => {
                    assert_eq!(update.board.get(idx(0)), Some(Symbol::First));
                    assert_eq!(update.turn, Some(pid("p2")));
                    assert_eq!(update.your_turn, mine);
                    let text = if mine { YOUR_TURN_TEXT } else { OPPONENT_TURN_TEXT };
                    assert_eq!(update.text, text);
                }
                other => panic!("Unexpected messages: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_rejected_move_only_reaches_mover() {
        let notifier = SessionNotifier::new();
        let (mut p1, mut p2) = paired(&notifier).await;

        let err = notifier.submit_move(&pid("p2"), idx(0)).await.unwrap_err();
        assert_eq!(err, MoveError::NotYourTurn);

        assert!(drain(&mut p1).is_empty());
        match &drain(&mut p2)[..] {
            [ServerMessage::MoveRejected(rejection)] => {
                assert_eq!(rejection.reason, RejectReason::NotYourTurn)
            }
            other => panic!("Unexpected messages: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_win_sends_distinct_outcomes() {
        let notifier = SessionNotifier::new();
        let (mut p1, mut p2) = paired(&notifier).await;

        for (who, i) in [("p1", 0), ("p2", 3), ("p1", 1), ("p2", 4)] {
            notifier.submit_move(&pid(who), idx(i)).await.unwrap();
        }
        drain(&mut p1);
        drain(&mut p2);

        let status = notifier.submit_move(&pid("p1"), idx(2)).await.unwrap();
        assert_eq!(status, MoveStatus::Won);

        let p1_msgs = drain(&mut p1);
        let p2_msgs = drain(&mut p2);
        assert_eq!(ended(&p1_msgs), vec![Outcome::Won]);
        assert_eq!(ended(&p2_msgs), vec![Outcome::Lost]);
        match &p2_msgs[0] {
            ServerMessage::State(update) => {
                assert_eq!(update.turn, None);
                assert!(!update.your_turn);
            }
            other => panic!("Unexpected message: {:?}", other),
        }

        // Finished sessions accept nothing further.
        let err = notifier.submit_move(&pid("p2"), idx(8)).await.unwrap_err();
        assert_eq!(err, MoveError::SessionFinished);
    }

    #[tokio::test]
    async fn test_draw_notifies_both() {
        let notifier = SessionNotifier::new();
        let (mut p1, mut p2) = paired(&notifier).await;

        let moves = [0, 1, 2, 3, 4, 6, 5, 8, 7];
        let mut status = MoveStatus::Continuing;
        for (n, i) in moves.into_iter().enumerate() {
            let who = if n % 2 == 0 { "p1" } else { "p2" };
            status = notifier.submit_move(&pid(who), idx(i)).await.unwrap();
        }
        assert_eq!(status, MoveStatus::Drawn);
        assert_eq!(ended(&drain(&mut p1)), vec![Outcome::Draw]);
        assert_eq!(ended(&drain(&mut p2)), vec![Outcome::Draw]);
    }

    #[tokio::test]
    async fn test_disconnect_mid_game_is_forfeit() {
        let notifier = SessionNotifier::new();
        let (mut p1, mut p2) = paired(&notifier).await;
        notifier.submit_move(&pid("p1"), idx(0)).await.unwrap();
        drain(&mut p1);
        drain(&mut p2);

        assert!(notifier.disconnect(&pid("p1")).await);

        match &drain(&mut p2)[..] {
            [ServerMessage::SessionEnded(info)] => {
                assert_eq!(info.outcome, Outcome::WonByForfeit);
                assert_eq!(info.text, FORFEIT_TEXT);
            }
            other => panic!("Unexpected messages: {:?}", other),
        }
        assert_eq!(
            notifier.stats().await,
            HubStats {
                connections: 1,
                sessions: 0,
                waiting: 0,
            }
        );

        let err = notifier.submit_move(&pid("p2"), idx(5)).await.unwrap_err();
        assert_eq!(err, MoveError::NoSession);
        assert!(!notifier.disconnect(&pid("p1")).await);
    }

    #[tokio::test]
    async fn test_disconnect_after_finish_sends_nothing() {
        let notifier = SessionNotifier::new();
        let (mut p1, mut p2) = paired(&notifier).await;
        for (who, i) in [("p1", 0), ("p2", 3), ("p1", 1), ("p2", 4), ("p1", 2)] {
            notifier.submit_move(&pid(who), idx(i)).await.unwrap();
        }
        drain(&mut p1);
        drain(&mut p2);

        assert!(!notifier.disconnect(&pid("p1")).await);
        assert!(drain(&mut p2).is_empty());
        assert_eq!(notifier.stats().await.sessions, 0);
    }

    #[tokio::test]
    async fn test_disconnect_while_waiting() {
        let notifier = SessionNotifier::new();
        let _p1 = connect(&notifier, "p1").await;
        assert!(!notifier.disconnect(&pid("p1")).await);
        assert_eq!(notifier.stats().await, HubStats::default());

        // The next arrival waits instead of pairing with a gone participant.
        let mut p2 = connect(&notifier, "p2").await;
        assert!(matches!(&drain(&mut p2)[..], [ServerMessage::Waiting { .. }]));
    }

    #[tokio::test]
    async fn test_release_mid_game_awards_nothing() {
        let notifier = SessionNotifier::new();
        let (mut p1, mut p2) = paired(&notifier).await;
        notifier.submit_move(&pid("p1"), idx(0)).await.unwrap();
        drain(&mut p1);
        drain(&mut p2);

        notifier.release(&pid("p1")).await;
        assert!(drain(&mut p1).is_empty());
        assert!(drain(&mut p2).is_empty());
        assert_eq!(
            notifier.stats().await,
            HubStats {
                connections: 1,
                sessions: 0,
                waiting: 0,
            }
        );

        // The opponent's own teardown finds nothing left to forfeit.
        notifier.release(&pid("p2")).await;
        assert!(drain(&mut p1).is_empty());
        assert_eq!(notifier.stats().await, HubStats::default());
    }

    #[tokio::test]
    async fn test_explicit_leave_notifies_both() {
        let notifier = SessionNotifier::new();
        let (mut p1, mut p2) = paired(&notifier).await;

        assert!(notifier.leave(&pid("p2")).await);
        assert_eq!(ended(&drain(&mut p1)), vec![Outcome::WonByForfeit]);
        match &drain(&mut p2)[..] {
            [ServerMessage::SessionEnded(info)] => assert_eq!(info.text, LEFT_TEXT),
            other => panic!("Unexpected messages: {:?}", other),
        }
        assert_eq!(notifier.stats().await.connections, 2);
    }

    #[tokio::test]
    async fn test_rejoin_rules() {
        let notifier = SessionNotifier::new();
        let (mut p1, mut p2) = paired(&notifier).await;

        assert_eq!(
            notifier.rejoin(&pid("p1")).await.unwrap_err(),
            RequeueError::AlreadyInSession
        );
        assert!(matches!(
            &drain(&mut p1)[..],
            [ServerMessage::Error(e)] if e.code == ErrorCode::AlreadyInSession
        ));

        for (who, i) in [("p1", 0), ("p2", 3), ("p1", 1), ("p2", 4), ("p1", 2)] {
            notifier.submit_move(&pid(who), idx(i)).await.unwrap();
        }
        drain(&mut p1);
        drain(&mut p2);

        // Finished session is torn down, then the loser waits again.
        assert_eq!(notifier.rejoin(&pid("p2")).await.unwrap(), JoinResult::Waiting);
        assert_eq!(
            notifier.rejoin(&pid("p2")).await.unwrap_err(),
            RequeueError::AlreadyWaiting
        );

        // The winner rejoins and is paired with the waiting loser, who now moves first.
        match notifier.rejoin(&pid("p1")).await.unwrap() {
            JoinResult::Paired(session) => {
                assert_eq!(session.participant_ids(), [pid("p2"), pid("p1")]);
            }
            JoinResult::Waiting => panic!("Expected pairing"),
        }
        assert_eq!(notifier.stats().await.sessions, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_duplicate_moves_apply_once() {
        let notifier = Arc::new(SessionNotifier::new());
        let (_p1, _p2) = paired(&notifier).await;

        let handles: Vec<_> = (0..9)
            .map(|i| {
                let notifier = notifier.clone();
                tokio::spawn(async move { notifier.submit_move(&pid("p1"), idx(i)).await })
            })
            .collect();

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(err) => assert_eq!(err, MoveError::NotYourTurn),
            }
        }
        assert_eq!(accepted, 1);
    }
}
