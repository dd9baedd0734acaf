//! # Session Coordinator Library
//!
//! Server-side real-time session coordination for a two-party (or
//! solo) competitive falling-block game. The server never simulates
//! gameplay: clients own the board, piece movement, and scoring, and
//! the coordinator's job is identity, matchmaking, session lifecycle,
//! and fanning reported state to the right subset of connections.
//!
//! ## Core Responsibilities
//!
//! ### Identity
//! Each client claims a unique display identity over its persistent
//! connection. Duplicates are rejected outright; there is no renaming
//! and no persistence across restarts.
//!
//! ### Matchmaking
//! Two pairing protocols: a first-come-first-paired random queue and
//! a friend-invite handshake against a named waiting player. Both
//! converge on the same Paired-session creation step.
//!
//! ### Session Lifecycle & Relay
//! Sessions move strictly Forming -> Active -> Ended. While Active,
//! participant snapshots are relayed unvalidated to the session's
//! broadcast group (participants plus spectators), and the list of
//! Active sessions is fanned to lobby watchers after every transition.
//!
//! ## Architecture
//!
//! All shared state lives in one coordinator task that consumes a
//! single queue of connection events in arrival order; transport tasks
//! only move bytes. This serialization removes the need for locks
//! around the player and session registries and makes every handler a
//! plain synchronous function, which is also how the test suites
//! drive them.

pub mod coordinator;
pub mod error;
pub mod matchmaker;
pub mod network;
pub mod registry;
pub mod router;
pub mod session;
