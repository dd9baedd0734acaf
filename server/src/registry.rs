//! Player identity registration and connection-to-player resolution
//!
//! This module is the leaf dependency of the coordinator: it maps each
//! display identity to exactly one live connection and tracks that
//! player's matchmaking intent. Every inbound event is dispatched
//! through the reverse lookup here. All state is volatile; a process
//! restart starts from an empty registry.

use crate::error::EventError;
use log::info;
use std::collections::HashMap;

/// Opaque handle for one live transport connection.
pub type ConnectionId = u64;

/// A waiting player's declared matchmaking goal.
///
/// Mutually exclusive with occupying a session: the coordinator resets
/// intent to `Idle` whenever it places the player into a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntentState {
    #[default]
    Idle,
    WaitingForFriend,
    WaitingForRandomMatch,
}

/// One connected identity and its coordinator-side state.
#[derive(Debug)]
pub struct Player {
    /// Unique display name, doubles as the primary key.
    pub identity: String,
    /// The single live connection owned by this player.
    pub conn: ConnectionId,
    pub intent: IntentState,
    /// Weak back-reference to the occupied session, id-based so an
    /// evicted session can never dangle.
    pub active_session: Option<String>,
}

impl Player {
    fn new(identity: String, conn: ConnectionId) -> Self {
        Self {
            identity,
            conn,
            intent: IntentState::Idle,
            active_session: None,
        }
    }

    /// True while the player occupies any non-terminal session.
    pub fn in_session(&self) -> bool {
        self.active_session.is_some()
    }
}

/// Maps identities to live players and connections back to identities.
#[derive(Default)]
pub struct ConnectionRegistry {
    players: HashMap<String, Player>,
    by_conn: HashMap<ConnectionId, String>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new identity for a connection.
    ///
    /// Fails without side effect if the identity is already claimed by
    /// a live player; the client must retry with a different name
    /// (never auto-renamed). Also fails if the connection already
    /// holds an identity.
    pub fn register(&mut self, identity: &str, conn: ConnectionId) -> Result<(), EventError> {
        if let Some(existing) = self.by_conn.get(&conn) {
            return Err(EventError::AlreadyRegistered {
                identity: existing.clone(),
            });
        }
        if self.players.contains_key(identity) {
            return Err(EventError::IdentityConflict {
                identity: identity.to_string(),
            });
        }

        info!("Registered identity '{}' on connection {}", identity, conn);
        self.players
            .insert(identity.to_string(), Player::new(identity.to_string(), conn));
        self.by_conn.insert(conn, identity.to_string());
        Ok(())
    }

    /// Reverse lookup from a live connection to its player's identity.
    pub fn identity_of(&self, conn: ConnectionId) -> Option<&str> {
        self.by_conn.get(&conn).map(String::as_str)
    }

    /// Resolves a connection to its player record.
    pub fn resolve(&self, conn: ConnectionId) -> Option<&Player> {
        self.by_conn.get(&conn).and_then(|id| self.players.get(id))
    }

    pub fn get(&self, identity: &str) -> Option<&Player> {
        self.players.get(identity)
    }

    pub fn get_mut(&mut self, identity: &str) -> Option<&mut Player> {
        self.players.get_mut(identity)
    }

    /// Unregisters a player. The only path for erasing a Player; the
    /// registry never replaces an entry in place.
    pub fn remove(&mut self, identity: &str) -> Option<Player> {
        let player = self.players.remove(identity)?;
        self.by_conn.remove(&player.conn);
        info!("Removed identity '{}'", identity);
        Some(player)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ConnectionRegistry::new();

        registry.register("alice", 1).unwrap();

        let player = registry.resolve(1).unwrap();
        assert_eq!(player.identity, "alice");
        assert_eq!(player.conn, 1);
        assert_eq!(player.intent, IntentState::Idle);
        assert!(!player.in_session());
    }

    #[test]
    fn test_duplicate_identity_rejected_without_side_effect() {
        let mut registry = ConnectionRegistry::new();

        registry.register("alice", 1).unwrap();
        let err = registry.register("alice", 2).unwrap_err();

        assert!(matches!(err, EventError::IdentityConflict { .. }));
        // Original mapping is untouched.
        assert_eq!(registry.resolve(1).unwrap().conn, 1);
        assert!(registry.resolve(2).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_connection_cannot_register_twice() {
        let mut registry = ConnectionRegistry::new();

        registry.register("alice", 1).unwrap();
        let err = registry.register("bob", 1).unwrap_err();

        assert!(matches!(err, EventError::AlreadyRegistered { .. }));
        assert!(registry.get("bob").is_none());
    }

    #[test]
    fn test_remove() {
        let mut registry = ConnectionRegistry::new();

        registry.register("alice", 1).unwrap();
        let removed = registry.remove("alice").unwrap();
        assert_eq!(removed.identity, "alice");

        assert!(registry.resolve(1).is_none());
        assert!(registry.get("alice").is_none());
        assert!(registry.is_empty());

        // Identity becomes claimable again.
        registry.register("alice", 2).unwrap();
        assert_eq!(registry.resolve(2).unwrap().identity, "alice");
    }

    #[test]
    fn test_remove_nonexistent() {
        let mut registry = ConnectionRegistry::new();
        assert!(registry.remove("ghost").is_none());
    }

    #[test]
    fn test_intent_mutation() {
        let mut registry = ConnectionRegistry::new();
        registry.register("alice", 1).unwrap();

        registry.get_mut("alice").unwrap().intent = IntentState::WaitingForRandomMatch;
        assert_eq!(
            registry.resolve(1).unwrap().intent,
            IntentState::WaitingForRandomMatch
        );
    }
}
