//! Single-threaded event coordination for all connected clients
//!
//! The coordinator owns every shared registry: players, live sessions,
//! the matchmaking queue, and the broadcast groups. It consumes one
//! queue of connection events (opened, inbound client event, closed)
//! and processes them strictly in arrival order, so no two mutations
//! of shared state ever interleave and no locking is needed. Transport
//! tasks only move bytes; all decisions happen here.
//!
//! Handler failures are caught at the dispatch boundary: the error is
//! logged, the originating connection gets a rejection or protocol
//! error event, and processing continues. A malformed or ill-timed
//! event can never take the process down or corrupt the registries.

use crate::error::{EventError, PeerFault};
use crate::matchmaker::Matchmaker;
use crate::registry::{ConnectionId, ConnectionRegistry, IntentState};
use crate::router::BroadcastRouter;
use crate::session::{GameSession, SessionState};
use log::{debug, info, warn};
use shared::{ClientEvent, EndReason, ServerEvent};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Everything the transport layer reports to the coordinator.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A connection opened; `sender` feeds its writer task.
    Opened {
        conn: ConnectionId,
        sender: mpsc::UnboundedSender<ServerEvent>,
    },
    /// A decoded client event arrived.
    Inbound {
        conn: ConnectionId,
        event: ClientEvent,
    },
    /// The connection closed, cleanly or not. The single asynchronous
    /// trigger outside direct client requests.
    Closed { conn: ConnectionId },
}

/// Owns all session-coordination state and processes events serially.
pub struct Coordinator {
    registry: ConnectionRegistry,
    sessions: HashMap<String, GameSession>,
    matchmaker: Matchmaker,
    router: BroadcastRouter,
    rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl Coordinator {
    /// Creates the coordinator and the sender half the transport layer
    /// uses to feed it.
    pub fn new() -> (Self, mpsc::UnboundedSender<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            registry: ConnectionRegistry::new(),
            sessions: HashMap::new(),
            matchmaker: Matchmaker::new(),
            router: BroadcastRouter::new(),
            rx,
        };
        (coordinator, tx)
    }

    /// Consumes connection events until every sender is dropped.
    pub async fn run(mut self) {
        info!("Coordinator started");
        while let Some(event) = self.rx.recv().await {
            self.handle(event);
        }
        info!("Coordinator queue closed, shutting down");
    }

    /// Processes one event. Public for direct-drive testing.
    pub fn handle(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened { conn, sender } => {
                debug!("Connection {} opened", conn);
                self.router.attach(conn, sender);
            }
            ConnectionEvent::Inbound { conn, event } => {
                if let Err(err) = self.handle_client_event(conn, event) {
                    warn!("Event from connection {} rejected: {}", conn, err);
                    self.router.send_to(conn, err.to_client_event());
                }
            }
            ConnectionEvent::Closed { conn } => {
                debug!("Connection {} closed", conn);
                self.handle_disconnect(conn);
            }
        }
    }

    fn handle_client_event(
        &mut self,
        conn: ConnectionId,
        event: ClientEvent,
    ) -> Result<(), EventError> {
        match event {
            ClientEvent::RegisterIdentity { identity } => self.register_identity(conn, identity),
            ClientEvent::StartSolo => self.start_solo(conn),
            ClientEvent::JoinRandomQueue => self.join_random_queue(conn),
            ClientEvent::RequestFriendWait => self.set_friend_wait(conn, true),
            ClientEvent::LeaveFriendWait => self.set_friend_wait(conn, false),
            ClientEvent::InviteFriend { peer } => self.invite_friend(conn, &peer),
            ClientEvent::AcceptInvite { peer } => self.accept_invite(conn, &peer),
            ClientEvent::RejectInvite { peer } => self.reject_invite(conn, &peer),
            ClientEvent::ReportState { snapshot } => self.report_state(conn, snapshot),
            ClientEvent::ReportOpponentSignal { payload } => {
                self.report_opponent_signal(conn, payload)
            }
            ClientEvent::EndSession => self.end_session(conn),
            ClientEvent::WatchLobby => {
                self.router.watch_lobby(conn);
                // Watchers get the current list immediately, not only
                // on the next transition.
                self.router.send_lobby_snapshot(conn, &self.sessions);
                Ok(())
            }
            ClientEvent::UnwatchLobby => {
                self.router.unwatch_lobby(conn);
                Ok(())
            }
            ClientEvent::SpectateSession { session_id } => self.spectate_session(conn, session_id),
        }
    }

    fn register_identity(
        &mut self,
        conn: ConnectionId,
        identity: String,
    ) -> Result<(), EventError> {
        self.registry.register(&identity, conn)?;
        self.router.send_to(conn, ServerEvent::IdentityAccepted);
        Ok(())
    }

    fn start_solo(&mut self, conn: ConnectionId) -> Result<(), EventError> {
        let identity = self.require_idle_identity(conn)?;

        let mut session = GameSession::create(&identity, None);
        // A solo player waits for nobody.
        session.start();
        let session_id = session.id.clone();
        let participants = session.participants().to_vec();

        if let Some(player) = self.registry.get_mut(&identity) {
            player.intent = IntentState::Idle;
            player.active_session = Some(session_id.clone());
        }
        self.router.join_session_group(&session_id, conn);
        self.sessions.insert(session_id.clone(), session);

        self.router.send_to(
            conn,
            ServerEvent::SessionStarted {
                session_id,
                participants,
            },
        );
        self.router.publish_lobby_snapshot(&self.sessions);
        Ok(())
    }

    fn join_random_queue(&mut self, conn: ConnectionId) -> Result<(), EventError> {
        let identity = self.require_idle_identity(conn)?;

        if let Some(player) = self.registry.get_mut(&identity) {
            player.intent = IntentState::WaitingForRandomMatch;
        }
        self.matchmaker.enqueue(&identity);
        debug!(
            "'{}' joined random queue ({} waiting)",
            identity,
            self.matchmaker.queue_len()
        );

        if let Some((first, second)) = self.matchmaker.take_ready_pair(&self.registry) {
            self.start_paired_session(&first, &second);
        }
        Ok(())
    }

    fn set_friend_wait(&mut self, conn: ConnectionId, waiting: bool) -> Result<(), EventError> {
        let identity = self.require_idle_identity(conn)?;

        if let Some(player) = self.registry.get_mut(&identity) {
            player.intent = if waiting {
                IntentState::WaitingForFriend
            } else {
                IntentState::Idle
            };
        }
        // Friend-wait supersedes any queued random-match intent.
        self.matchmaker.remove(&identity);
        Ok(())
    }

    fn invite_friend(&mut self, conn: ConnectionId, peer: &str) -> Result<(), EventError> {
        let inviter = self.require_identity(conn)?;
        self.matchmaker
            .validate_invite(&self.registry, &inviter, peer)?;

        let peer_conn = self
            .registry
            .get(peer)
            .map(|p| p.conn)
            .ok_or(EventError::InvalidPeerState(PeerFault::Offline))?;
        self.router
            .send_to(peer_conn, ServerEvent::InviteReceived { from: inviter });
        Ok(())
    }

    fn accept_invite(&mut self, conn: ConnectionId, peer: &str) -> Result<(), EventError> {
        let accepter = self.require_identity(conn)?;
        // Both sides are re-validated now; the invite-time check no
        // longer counts.
        self.matchmaker
            .validate_accept(&self.registry, &accepter, peer)?;

        let inviter_conn = self
            .registry
            .get(peer)
            .map(|p| p.conn)
            .ok_or(EventError::InvalidPeerState(PeerFault::Offline))?;
        self.router.send_to(
            inviter_conn,
            ServerEvent::InviteAccepted {
                peer: accepter.clone(),
            },
        );

        // Acceptance starts the session directly; any countdown is a
        // client-side courtesy.
        self.start_paired_session(&accepter, peer);
        Ok(())
    }

    fn reject_invite(&mut self, conn: ConnectionId, peer: &str) -> Result<(), EventError> {
        let _rejecter = self.require_identity(conn)?;

        // Notification only; the rejecting side keeps all its state.
        match self.registry.get(peer) {
            Some(inviter) if !inviter.in_session() => {
                let inviter_conn = inviter.conn;
                self.router.send_to(
                    inviter_conn,
                    ServerEvent::InviteRejected {
                        reason: "invite declined".to_string(),
                    },
                );
            }
            _ => debug!("Discarded invite rejection toward '{}'", peer),
        }
        Ok(())
    }

    fn report_state(
        &mut self,
        conn: ConnectionId,
        snapshot: shared::PlayerSnapshot,
    ) -> Result<(), EventError> {
        let identity = self.require_identity(conn)?;
        let session_id = self.active_session_of(&identity)?;

        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| EventError::SessionNotFound {
                session_id: session_id.clone(),
            })?;
        session.record_snapshot(&identity, snapshot)?;

        if let Some(session) = self.sessions.get(&session_id) {
            self.router.publish_session_state(session);
        }
        Ok(())
    }

    fn report_opponent_signal(
        &mut self,
        conn: ConnectionId,
        payload: u32,
    ) -> Result<(), EventError> {
        let identity = self.require_identity(conn)?;
        let session_id = self.active_session_of(&identity)?;

        let opponent = self
            .sessions
            .get(&session_id)
            .and_then(|s| s.opponent_of(&identity))
            .map(str::to_string);

        // Solo sessions have no opponent; the signal is dropped.
        if let Some(opponent) = opponent {
            if let Some(player) = self.registry.get(&opponent) {
                self.router
                    .send_to(player.conn, ServerEvent::OpponentSignal { payload });
            }
        }
        Ok(())
    }

    fn end_session(&mut self, conn: ConnectionId) -> Result<(), EventError> {
        let identity = self.require_identity(conn)?;
        let session_id = self.active_session_of(&identity)?;
        self.finish_session(&session_id, EndReason::Normal, Some(identity));
        Ok(())
    }

    fn spectate_session(
        &mut self,
        conn: ConnectionId,
        session_id: String,
    ) -> Result<(), EventError> {
        // Ended sessions are evicted immediately, so presence in the
        // map is the liveness check.
        if !self.sessions.contains_key(&session_id) {
            return Err(EventError::SessionNotFound { session_id });
        }
        self.router.join_session_group(&session_id, conn);
        Ok(())
    }

    fn handle_disconnect(&mut self, conn: ConnectionId) {
        self.router.detach(conn);

        let Some(identity) = self.registry.identity_of(conn).map(str::to_string) else {
            return;
        };
        self.matchmaker.remove(&identity);

        if let Some(player) = self.registry.remove(&identity) {
            if let Some(session_id) = player.active_session {
                self.finish_session(&session_id, EndReason::OpponentDisconnected, None);
            }
        }
    }

    /// Creates, registers, and immediately starts a Paired session for
    /// two validated players, then announces it. Shared by both
    /// pairing protocols.
    fn start_paired_session(&mut self, first: &str, second: &str) {
        let mut session = GameSession::create(first, Some(second));
        session.start();
        let session_id = session.id.clone();
        let participants = session.participants().to_vec();

        for identity in [first, second] {
            if let Some(player) = self.registry.get_mut(identity) {
                player.intent = IntentState::Idle;
                player.active_session = Some(session_id.clone());
                let conn = player.conn;
                self.router.join_session_group(&session_id, conn);
            }
        }
        self.matchmaker.remove(first);
        self.matchmaker.remove(second);
        self.sessions.insert(session_id.clone(), session);

        let event = ServerEvent::MatchConfirmed {
            session_id: session_id.clone(),
            participants,
        };
        self.router.publish_to_session(&session_id, &event);
        self.router.publish_lobby_snapshot(&self.sessions);
    }

    /// Ends a session once: notifies the broadcast group, clears the
    /// participants' back-references, evicts the session from the live
    /// map, and refreshes the lobby view. Safe to call against a
    /// missing or already-Ended session.
    fn finish_session(&mut self, session_id: &str, reason: EndReason, loser: Option<String>) {
        let ended = match self.sessions.get_mut(session_id) {
            Some(session) => session.end(),
            None => false,
        };
        if !ended {
            return;
        }

        self.router.publish_to_session(
            session_id,
            &ServerEvent::SessionEnded { reason, loser },
        );

        if let Some(session) = self.sessions.remove(session_id) {
            for identity in session.participants() {
                if let Some(player) = self.registry.get_mut(identity) {
                    player.active_session = None;
                }
            }
        }
        self.router.drop_session_group(session_id);
        self.router.publish_lobby_snapshot(&self.sessions);
    }

    fn require_identity(&self, conn: ConnectionId) -> Result<String, EventError> {
        self.registry
            .identity_of(conn)
            .map(str::to_string)
            .ok_or(EventError::NotRegistered)
    }

    /// Resolves the connection's player and checks it is free to enter
    /// a new waiting state or session.
    fn require_idle_identity(&self, conn: ConnectionId) -> Result<String, EventError> {
        let player = self.registry.resolve(conn).ok_or(EventError::NotRegistered)?;
        if player.in_session() {
            return Err(EventError::AlreadyPlaying);
        }
        Ok(player.identity.clone())
    }

    fn active_session_of(&self, identity: &str) -> Result<String, EventError> {
        self.registry
            .get(identity)
            .and_then(|p| p.active_session.clone())
            .ok_or(EventError::NoActiveSession)
    }

    /// True iff the player occupies a session that is currently
    /// Active.
    pub fn is_playing(&self, identity: &str) -> bool {
        self.registry
            .get(identity)
            .and_then(|p| p.active_session.as_deref())
            .and_then(|sid| self.sessions.get(sid))
            .map(|s| s.state() == SessionState::Active)
            .unwrap_or(false)
    }

    /// Number of live (non-Ended) sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
