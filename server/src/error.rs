//! Structured error taxonomy for per-event handler failures.
//!
//! Every variant is recoverable from the process's point of view: the
//! coordinator logs it, answers the originating connection, and moves
//! on to the next event. Disconnects are not errors and never appear
//! here; they are handled as forced cleanup.

use shared::ServerEvent;
use thiserror::Error;

/// What was wrong with the peer named in an invite or acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerFault {
    /// No live player with that identity.
    Offline,
    /// Peer is online but has not declared friend-wait intent.
    NotWaiting,
    /// Peer is already occupied by a session.
    Busy,
}

impl PeerFault {
    pub fn reason(&self) -> &'static str {
        match self {
            PeerFault::Offline => "peer offline",
            PeerFault::NotWaiting => "peer not waiting",
            PeerFault::Busy => "peer already in a session",
        }
    }
}

/// Failure modes of a single inbound event.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("identity '{identity}' is already in use")]
    IdentityConflict { identity: String },

    #[error("invalid peer state: {}", .0.reason())]
    InvalidPeerState(PeerFault),

    #[error("session '{session_id}' not found")]
    SessionNotFound { session_id: String },

    #[error("connection has not registered an identity")]
    NotRegistered,

    #[error("connection already registered as '{identity}'")]
    AlreadyRegistered { identity: String },

    #[error("player is already in a session")]
    AlreadyPlaying,

    #[error("player has no active session")]
    NoActiveSession,

    #[error("player is not waiting for a friend")]
    NotAwaitingInvite,
}

impl EventError {
    /// Maps the error to the event sent back to the offending
    /// connection. Rejections that have a dedicated protocol event use
    /// it; everything else degrades to a generic protocol error.
    pub fn to_client_event(&self) -> ServerEvent {
        match self {
            EventError::IdentityConflict { .. } => ServerEvent::IdentityRejected {
                reason: self.to_string(),
            },
            EventError::InvalidPeerState(fault) => ServerEvent::InviteRejected {
                reason: fault.reason().to_string(),
            },
            EventError::NotAwaitingInvite => ServerEvent::InviteRejected {
                reason: "not waiting for a friend".to_string(),
            },
            _ => ServerEvent::ProtocolError {
                message: self.to_string(),
            },
        }
    }
}
