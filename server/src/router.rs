//! Group-addressed fan-out of server events
//!
//! Two kinds of delivery groups: one per live session (participants
//! plus any spectators) and one global group of lobby watchers. The
//! router only moves already-built events onto per-connection outbound
//! channels; it never touches player or session state. Spectators are
//! delivery-only members and invisible to scoring.

use crate::registry::ConnectionId;
use crate::session::{GameSession, SessionState};
use log::debug;
use shared::{ServerEvent, SessionSummary};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

/// Fans session and lobby updates out to the right connections.
#[derive(Default)]
pub struct BroadcastRouter {
    /// Outbound channel per live connection, owned by its writer task.
    senders: HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>,
    /// Session broadcast groups keyed by session id.
    session_groups: HashMap<String, HashSet<ConnectionId>>,
    /// Connections observing the live-session list.
    lobby_watchers: HashSet<ConnectionId>,
}

impl BroadcastRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a connection's outbound channel. Must happen before
    /// any delivery to that connection.
    pub fn attach(&mut self, conn: ConnectionId, sender: mpsc::UnboundedSender<ServerEvent>) {
        self.senders.insert(conn, sender);
    }

    /// Detaches a connection and drops it from every group.
    pub fn detach(&mut self, conn: ConnectionId) {
        self.senders.remove(&conn);
        self.lobby_watchers.remove(&conn);
        for group in self.session_groups.values_mut() {
            group.remove(&conn);
        }
    }

    pub fn join_session_group(&mut self, session_id: &str, conn: ConnectionId) {
        self.session_groups
            .entry(session_id.to_string())
            .or_default()
            .insert(conn);
    }

    /// Dissolves a session's group entirely, e.g. after the session
    /// ends and is evicted.
    pub fn drop_session_group(&mut self, session_id: &str) {
        self.session_groups.remove(session_id);
    }

    pub fn watch_lobby(&mut self, conn: ConnectionId) {
        self.lobby_watchers.insert(conn);
    }

    pub fn unwatch_lobby(&mut self, conn: ConnectionId) {
        self.lobby_watchers.remove(&conn);
    }

    /// Delivers one event to one connection. A closed channel means
    /// the connection is tearing down; the pending disconnect event
    /// will clean it up, so this only logs.
    pub fn send_to(&self, conn: ConnectionId, event: ServerEvent) {
        if let Some(sender) = self.senders.get(&conn) {
            if sender.send(event).is_err() {
                debug!("Dropped event for closing connection {}", conn);
            }
        } else {
            debug!("No outbound channel for connection {}", conn);
        }
    }

    /// Delivers one event to every member of a session's group.
    pub fn publish_to_session(&self, session_id: &str, event: &ServerEvent) {
        if let Some(group) = self.session_groups.get(session_id) {
            for conn in group {
                self.send_to(*conn, event.clone());
            }
        }
    }

    /// Fans the session's full state to its participants and
    /// spectators.
    pub fn publish_session_state(&self, session: &GameSession) {
        let event = ServerEvent::SessionStateUpdate {
            session_id: session.id.clone(),
            participants: session.participants().to_vec(),
            snapshots: session.view(),
        };
        self.publish_to_session(&session.id, &event);
    }

    /// Fans the current Active-session list to all lobby watchers.
    pub fn publish_lobby_snapshot(&self, sessions: &HashMap<String, GameSession>) {
        if self.lobby_watchers.is_empty() {
            return;
        }
        let event = ServerEvent::LobbySnapshot {
            sessions: active_summaries(sessions),
        };
        for conn in &self.lobby_watchers {
            self.send_to(*conn, event.clone());
        }
    }

    /// One-off snapshot for a watcher that just joined.
    pub fn send_lobby_snapshot(
        &self,
        conn: ConnectionId,
        sessions: &HashMap<String, GameSession>,
    ) {
        self.send_to(
            conn,
            ServerEvent::LobbySnapshot {
                sessions: active_summaries(sessions),
            },
        );
    }
}

fn active_summaries(sessions: &HashMap<String, GameSession>) -> Vec<SessionSummary> {
    sessions
        .values()
        .filter(|s| s.state() == SessionState::Active)
        .map(GameSession::summary)
        .collect()
}
