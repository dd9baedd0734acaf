//! Wire protocol shared between the session coordinator and its clients.
//!
//! Events travel over a persistent TCP connection as bincode-encoded
//! frames, each prefixed with a little-endian `u32` byte length. The
//! enum variant name doubles as the event name; payloads carry only
//! what the coordinator relays or decides on.

use serde::{Deserialize, Serialize};
use std::io::{self, Read};

/// Hard cap on a single frame's payload size.
///
/// A full board snapshot is a few hundred bytes; anything near this
/// limit is a protocol violation and the connection is dropped.
pub const MAX_FRAME_LEN: u32 = 64 * 1024;

/// Length of the random suffix in generated session ids.
pub const SESSION_ID_SUFFIX_LEN: usize = 13;

/// Events sent from a client to the coordinator.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum ClientEvent {
    /// Claim a display identity. Must precede every other event.
    RegisterIdentity { identity: String },
    /// Start a one-player session immediately.
    StartSolo,
    /// Enter the random-match queue.
    JoinRandomQueue,
    /// Declare availability for a friend invite.
    RequestFriendWait,
    /// Withdraw friend-invite availability.
    LeaveFriendWait,
    /// Ask a named waiting player for a match.
    InviteFriend { peer: String },
    /// Accept a previously received invite from `peer`.
    AcceptInvite { peer: String },
    /// Decline a previously received invite from `peer`.
    RejectInvite { peer: String },
    /// Report the latest local gameplay snapshot.
    ReportState { snapshot: PlayerSnapshot },
    /// Send a cosmetic attack signal to the opponent, relayed verbatim.
    ReportOpponentSignal { payload: u32 },
    /// End the current session; the sender is recorded as the loser.
    EndSession,
    /// Join the live-session list feed.
    WatchLobby,
    /// Leave the live-session list feed.
    UnwatchLobby,
    /// Join a session's broadcast group as a delivery-only spectator.
    SpectateSession { session_id: String },
}

/// Events sent from the coordinator to a client.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum ServerEvent {
    IdentityAccepted,
    IdentityRejected {
        reason: String,
    },
    /// A Solo session started for the receiver.
    SessionStarted {
        session_id: String,
        participants: Vec<String>,
    },
    /// A Paired session formed and started; sent to both participants.
    MatchConfirmed {
        session_id: String,
        participants: Vec<String>,
    },
    /// Full session view after any participant reported state.
    SessionStateUpdate {
        session_id: String,
        participants: Vec<String>,
        snapshots: Vec<(String, PlayerSnapshot)>,
    },
    SessionEnded {
        reason: EndReason,
        /// Identity that ended the session, when it ended normally.
        loser: Option<String>,
    },
    InviteReceived {
        from: String,
    },
    InviteAccepted {
        peer: String,
    },
    InviteRejected {
        reason: String,
    },
    LobbySnapshot {
        sessions: Vec<SessionSummary>,
    },
    /// Opponent's attack signal, forwarded without inspection.
    OpponentSignal {
        payload: u32,
    },
    ProtocolError {
        message: String,
    },
}

/// Why a session ended, from the remaining participant's view.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Normal,
    OpponentDisconnected,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Normal => "normal",
            EndReason::OpponentDisconnected => "opponentDisconnected",
        }
    }
}

/// Session mode, fixed at creation.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Solo,
    Paired,
}

impl SessionMode {
    /// Wire prefix used in generated session ids.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            SessionMode::Solo => "single",
            SessionMode::Paired => "multi",
        }
    }
}

/// Latest reported gameplay metrics for one participant.
///
/// The coordinator relays this without validating it; the board is an
/// opaque cell grid owned by client-side rendering.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct PlayerSnapshot {
    pub board: Vec<Vec<u8>>,
    pub lines: u32,
    pub score: u32,
    pub level: u32,
}

/// One entry in the spectatable-session list.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: String,
    pub mode: SessionMode,
    pub participants: Vec<String>,
}

/// Encodes a message as one length-prefixed frame.
///
/// The cap applies in both directions: a frame too large to encode
/// here is refused rather than emitted, since the reading side would
/// reject it anyway and lose stream sync.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, bincode::Error> {
    let body = bincode::serialize(msg)?;
    if body.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(Box::new(bincode::ErrorKind::SizeLimit));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Reads one frame from a blocking reader and decodes it.
///
/// Used by test clients; the server has its own async read path.
pub fn read_frame<T, R>(reader: &mut R) -> io::Result<T>
where
    T: for<'de> Deserialize<'de>,
    R: Read,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame length {} exceeds limit", len),
        ));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body)?;
    bincode::deserialize(&body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
