//! Matchmaking: the random queue and the friend-invite handshake
//!
//! Two independent pairing protocols that converge on the same
//! Paired-session creation step. The random queue is strictly
//! first-come-first-paired with no skill matching. The friend invite
//! is a named lookup validated twice: once when the invite is sent
//! and again when it is accepted, because either side can vanish or
//! change intent in between.
//!
//! A disconnect can land between an enqueue and the pairing that would
//! consume it, so candidates are re-validated against the registry
//! immediately before a pair is committed. Stale queue entries from
//! players who left, changed intent, or went into a session are
//! dropped during that scan; there is no timeout-driven sweep.

use crate::error::{EventError, PeerFault};
use crate::registry::{ConnectionRegistry, IntentState};
use std::collections::VecDeque;

/// Pairs waiting players into sessions.
#[derive(Default)]
pub struct Matchmaker {
    /// Random-match queue in intent-registration order.
    queue: VecDeque<String>,
}

impl Matchmaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a player to the random queue. Re-joining while already
    /// queued keeps the original position.
    pub fn enqueue(&mut self, identity: &str) {
        if !self.queue.iter().any(|q| q == identity) {
            self.queue.push_back(identity.to_string());
        }
    }

    /// Drops a player from the queue, typically on disconnect or
    /// intent change.
    pub fn remove(&mut self, identity: &str) {
        self.queue.retain(|q| q != identity);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Commits the two earliest still-valid waiting players, removing
    /// them from the queue. Entries that no longer pass liveness
    /// re-validation are discarded on the way. Returns None (and
    /// leaves valid entries queued) when fewer than two candidates
    /// survive.
    pub fn take_ready_pair(&mut self, registry: &ConnectionRegistry) -> Option<(String, String)> {
        self.queue
            .retain(|identity| is_still_waiting(registry, identity));

        if self.queue.len() < 2 {
            return None;
        }

        let first = self.queue.pop_front()?;
        let second = self.queue.pop_front()?;
        Some((first, second))
    }

    /// Validates an invite from `inviter` toward `peer`. Rejections
    /// are surfaced only to the inviter; the peer is untouched.
    pub fn validate_invite(
        &self,
        registry: &ConnectionRegistry,
        inviter: &str,
        peer: &str,
    ) -> Result<(), EventError> {
        if peer == inviter {
            return Err(EventError::InvalidPeerState(PeerFault::NotWaiting));
        }
        let target = registry
            .get(peer)
            .ok_or(EventError::InvalidPeerState(PeerFault::Offline))?;
        if target.intent != IntentState::WaitingForFriend {
            return Err(EventError::InvalidPeerState(PeerFault::NotWaiting));
        }
        Ok(())
    }

    /// Validates an acceptance by the invited player toward the
    /// original inviter. Both sides are re-checked at acceptance time:
    /// the accepter must still be waiting for a friend and the inviter
    /// must still be online and unoccupied.
    pub fn validate_accept(
        &self,
        registry: &ConnectionRegistry,
        accepter: &str,
        inviter: &str,
    ) -> Result<(), EventError> {
        let me = registry.get(accepter).ok_or(EventError::NotRegistered)?;
        if me.intent != IntentState::WaitingForFriend {
            return Err(EventError::NotAwaitingInvite);
        }

        let peer = registry
            .get(inviter)
            .ok_or(EventError::InvalidPeerState(PeerFault::Offline))?;
        if peer.in_session() {
            return Err(EventError::InvalidPeerState(PeerFault::Busy));
        }
        Ok(())
    }
}

fn is_still_waiting(registry: &ConnectionRegistry, identity: &str) -> bool {
    registry
        .get(identity)
        .map(|p| p.intent == IntentState::WaitingForRandomMatch && !p.in_session())
        .unwrap_or(false)
}
