//! Game session lifecycle and per-player snapshot state
//!
//! A session owns the lifecycle of one match, Solo or Paired, and the
//! latest reported snapshot of each participant. The server runs no
//! game simulation: for a Paired session this relayed snapshot is the
//! only communication path between the two players, so the session's
//! job is consistent relay and lifecycle bookkeeping.

use crate::error::EventError;
use log::info;
use rand::distributions::Alphanumeric;
use rand::Rng;
use shared::{PlayerSnapshot, SessionMode, SessionSummary, SESSION_ID_SUFFIX_LEN};
use std::collections::HashMap;

/// Lifecycle state, strictly forward: Forming -> Active -> Ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Players assigned but game time not yet counting.
    Forming,
    /// Both sides playing; snapshots accepted and relayed.
    Active,
    /// Terminal and immutable; evicted from the live map.
    Ended,
}

/// One match instance.
#[derive(Debug)]
pub struct GameSession {
    pub id: String,
    pub mode: SessionMode,
    /// 1 or 2 identities, in arrival order. Fixed at creation.
    participants: Vec<String>,
    state: SessionState,
    snapshots: HashMap<String, PlayerSnapshot>,
}

impl GameSession {
    /// Creates a Forming session: Solo with one player, Paired with two.
    pub fn create(player1: &str, player2: Option<&str>) -> Self {
        let (mode, participants) = match player2 {
            Some(p2) => (
                SessionMode::Paired,
                vec![player1.to_string(), p2.to_string()],
            ),
            None => (SessionMode::Solo, vec![player1.to_string()]),
        };

        let id = generate_session_id(mode);
        info!("Created {:?} session {} for {:?}", mode, id, participants);

        Self {
            id,
            mode,
            participants,
            state: SessionState::Forming,
            snapshots: HashMap::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn participants(&self) -> &[String] {
        &self.participants
    }

    pub fn is_participant(&self, identity: &str) -> bool {
        self.participants.iter().any(|p| p == identity)
    }

    /// The other participant in a Paired session, if any.
    pub fn opponent_of(&self, identity: &str) -> Option<&str> {
        self.participants
            .iter()
            .find(|p| p.as_str() != identity)
            .map(String::as_str)
    }

    /// Forming -> Active. Calling again is a no-op and reports false,
    /// so game time is never double-counted.
    pub fn start(&mut self) -> bool {
        match self.state {
            SessionState::Forming => {
                self.state = SessionState::Active;
                info!("Session {} started", self.id);
                true
            }
            _ => false,
        }
    }

    /// Overwrites one participant's snapshot. Valid only while Active;
    /// an update against a Forming or Ended session is answered as if
    /// the session no longer existed.
    pub fn record_snapshot(
        &mut self,
        identity: &str,
        snapshot: PlayerSnapshot,
    ) -> Result<(), EventError> {
        if self.state != SessionState::Active || !self.is_participant(identity) {
            return Err(EventError::SessionNotFound {
                session_id: self.id.clone(),
            });
        }
        self.snapshots.insert(identity.to_string(), snapshot);
        Ok(())
    }

    /// Transitions to Ended from any non-terminal state. Idempotent:
    /// ending an already-Ended session reports false and changes
    /// nothing.
    pub fn end(&mut self) -> bool {
        match self.state {
            SessionState::Ended => false,
            _ => {
                self.state = SessionState::Ended;
                info!("Session {} ended", self.id);
                true
            }
        }
    }

    /// Full session view relayed to the broadcast group: every
    /// participant's latest snapshot, in participant order.
    pub fn view(&self) -> Vec<(String, PlayerSnapshot)> {
        self.participants
            .iter()
            .filter_map(|p| self.snapshots.get(p).map(|s| (p.clone(), s.clone())))
            .collect()
    }

    /// Lobby-list entry for this session.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            mode: self.mode,
            participants: self.participants.clone(),
        }
    }
}

/// Builds a globally unique session id: mode prefix plus a random
/// lowercase alphanumeric suffix.
fn generate_session_id(mode: SessionMode) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_SUFFIX_LEN)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("{}_{}", mode.id_prefix(), suffix)
}
