//! Integration tests for the session coordinator
//!
//! These tests run the real server on a loopback socket and drive it
//! with framed TCP clients, validating the end-to-end protocol flows.

use server::coordinator::Coordinator;
use server::network::NetworkServer;
use shared::{
    encode_frame, ClientEvent, EndReason, PlayerSnapshot, ServerEvent, SessionMode, MAX_FRAME_LEN,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Boots a full server (coordinator + transport) on a free port.
async fn start_server() -> SocketAddr {
    let server = NetworkServer::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind server");
    let addr = server.local_addr();

    let (coordinator, events) = Coordinator::new();
    tokio::spawn(coordinator.run());
    tokio::spawn(server.run(events));

    addr
}

/// Minimal framed protocol client.
struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr)
            .await
            .expect("Failed to connect to server");
        Self { stream }
    }

    async fn send(&mut self, event: &ClientEvent) {
        let frame = encode_frame(event).expect("Failed to encode event");
        self.stream
            .write_all(&frame)
            .await
            .expect("Failed to send event");
    }

    async fn recv(&mut self) -> ServerEvent {
        timeout(RECV_TIMEOUT, self.recv_inner())
            .await
            .expect("Timed out waiting for server event")
    }

    async fn recv_inner(&mut self) -> ServerEvent {
        let mut len_buf = [0u8; 4];
        self.stream
            .read_exact(&mut len_buf)
            .await
            .expect("Failed to read frame length");
        let len = u32::from_le_bytes(len_buf);
        assert!(len <= MAX_FRAME_LEN, "server emitted {}-byte frame", len);
        let mut body = vec![0u8; len as usize];
        self.stream
            .read_exact(&mut body)
            .await
            .expect("Failed to read frame body");
        bincode::deserialize(&body).expect("Failed to decode server event")
    }

    async fn register(&mut self, identity: &str) {
        self.send(&ClientEvent::RegisterIdentity {
            identity: identity.to_string(),
        })
        .await;
        match self.recv().await {
            ServerEvent::IdentityAccepted => {}
            other => panic!("Registration failed: {:?}", other),
        }
    }
}

/// REGISTRATION FLOWS
mod registration_tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_identity_rejected_over_wire() {
        let addr = start_server().await;

        let mut first = TestClient::connect(addr).await;
        first.register("alice").await;

        let mut second = TestClient::connect(addr).await;
        second
            .send(&ClientEvent::RegisterIdentity {
                identity: "alice".to_string(),
            })
            .await;

        match second.recv().await {
            ServerEvent::IdentityRejected { reason } => {
                assert!(reason.contains("alice"));
            }
            other => panic!("Expected IdentityRejected, got {:?}", other),
        }

        // The original player is unaffected and can still play.
        first.send(&ClientEvent::StartSolo).await;
        assert!(matches!(
            first.recv().await,
            ServerEvent::SessionStarted { .. }
        ));
    }

    #[tokio::test]
    async fn identity_freed_after_disconnect() {
        let addr = start_server().await;

        {
            let mut holder = TestClient::connect(addr).await;
            holder.register("alice").await;
        } // dropped: connection closes

        // The coordinator processes the close asynchronously.
        let mut late = TestClient::connect(addr).await;
        for _ in 0..20 {
            late.send(&ClientEvent::RegisterIdentity {
                identity: "alice".to_string(),
            })
            .await;
            match late.recv().await {
                ServerEvent::IdentityAccepted => return,
                ServerEvent::IdentityRejected { .. } => {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                other => panic!("Unexpected event: {:?}", other),
            }
        }
        panic!("Identity never freed after disconnect");
    }
}

/// SESSION SCENARIOS (end-to-end acceptance flows)
mod session_tests {
    use super::*;

    #[tokio::test]
    async fn solo_session_scenario() {
        let addr = start_server().await;

        let mut client = TestClient::connect(addr).await;
        client.register("A").await;
        client.send(&ClientEvent::StartSolo).await;

        match client.recv().await {
            ServerEvent::SessionStarted {
                session_id,
                participants,
            } => {
                assert!(session_id.starts_with("single_"));
                assert_eq!(participants, vec!["A".to_string()]);
            }
            other => panic!("Expected SessionStarted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn random_match_scenario() {
        let addr = start_server().await;

        let mut a = TestClient::connect(addr).await;
        let mut b = TestClient::connect(addr).await;
        a.register("A").await;
        b.register("B").await;

        a.send(&ClientEvent::JoinRandomQueue).await;
        b.send(&ClientEvent::JoinRandomQueue).await;

        let (id_a, participants_a) = match a.recv().await {
            ServerEvent::MatchConfirmed {
                session_id,
                participants,
            } => (session_id, participants),
            other => panic!("Expected MatchConfirmed, got {:?}", other),
        };
        let (id_b, participants_b) = match b.recv().await {
            ServerEvent::MatchConfirmed {
                session_id,
                participants,
            } => (session_id, participants),
            other => panic!("Expected MatchConfirmed, got {:?}", other),
        };

        assert_eq!(id_a, id_b);
        assert!(id_a.starts_with("multi_"));
        // Queue order across two sockets is not observable here; the
        // coordinator unit tests pin down FIFO pairing exactly.
        let mut sorted = participants_a.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(participants_a, participants_b);
    }

    #[tokio::test]
    async fn invite_rejected_scenario() {
        let addr = start_server().await;

        let mut a = TestClient::connect(addr).await;
        let mut b = TestClient::connect(addr).await;
        a.register("A").await;
        b.register("B").await;

        // B never set friend-wait.
        a.send(&ClientEvent::InviteFriend {
            peer: "B".to_string(),
        })
        .await;

        match a.recv().await {
            ServerEvent::InviteRejected { reason } => {
                assert_eq!(reason, "peer not waiting");
            }
            other => panic!("Expected InviteRejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn friend_invite_full_handshake() {
        let addr = start_server().await;

        let mut inviter = TestClient::connect(addr).await;
        let mut target = TestClient::connect(addr).await;
        inviter.register("alice").await;
        target.register("bob").await;

        target.send(&ClientEvent::RequestFriendWait).await;
        // Friend-wait has no acknowledgement; let it land before the
        // invite races it on a different socket.
        tokio::time::sleep(Duration::from_millis(50)).await;
        inviter
            .send(&ClientEvent::InviteFriend {
                peer: "bob".to_string(),
            })
            .await;

        match target.recv().await {
            ServerEvent::InviteReceived { from } => assert_eq!(from, "alice"),
            other => panic!("Expected InviteReceived, got {:?}", other),
        }

        target
            .send(&ClientEvent::AcceptInvite {
                peer: "alice".to_string(),
            })
            .await;

        match inviter.recv().await {
            ServerEvent::InviteAccepted { peer } => assert_eq!(peer, "bob"),
            other => panic!("Expected InviteAccepted, got {:?}", other),
        }
        assert!(matches!(
            inviter.recv().await,
            ServerEvent::MatchConfirmed { .. }
        ));
        assert!(matches!(
            target.recv().await,
            ServerEvent::MatchConfirmed { .. }
        ));
    }

    #[tokio::test]
    async fn state_relay_between_opponents() {
        let addr = start_server().await;

        let mut a = TestClient::connect(addr).await;
        let mut b = TestClient::connect(addr).await;
        a.register("A").await;
        b.register("B").await;
        a.send(&ClientEvent::JoinRandomQueue).await;
        b.send(&ClientEvent::JoinRandomQueue).await;
        a.recv().await;
        b.recv().await;

        let snapshot = PlayerSnapshot {
            board: vec![vec![0; 10]; 20],
            lines: 3,
            score: 450,
            level: 1,
        };
        a.send(&ClientEvent::ReportState {
            snapshot: snapshot.clone(),
        })
        .await;

        // Both participants see the full session view.
        for client in [&mut a, &mut b] {
            match client.recv().await {
                ServerEvent::SessionStateUpdate {
                    participants,
                    snapshots,
                    ..
                } => {
                    assert_eq!(participants.len(), 2);
                    assert_eq!(snapshots.len(), 1);
                    assert_eq!(snapshots[0].0, "A");
                    assert_eq!(snapshots[0].1, snapshot);
                }
                other => panic!("Expected SessionStateUpdate, got {:?}", other),
            }
        }

        // The attack signal goes only to the opponent.
        a.send(&ClientEvent::ReportOpponentSignal { payload: 2 })
            .await;
        match b.recv().await {
            ServerEvent::OpponentSignal { payload } => assert_eq!(payload, 2),
            other => panic!("Expected OpponentSignal, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn oversized_aggregate_update_is_withheld() {
        let addr = start_server().await;

        let mut a = TestClient::connect(addr).await;
        let mut b = TestClient::connect(addr).await;
        a.register("A").await;
        b.register("B").await;
        a.send(&ClientEvent::JoinRandomQueue).await;
        b.send(&ClientEvent::JoinRandomQueue).await;
        a.recv().await;
        b.recv().await;

        // A legal report on its own, but two of them aggregated into
        // one session view overflow the frame cap.
        let big = PlayerSnapshot {
            board: vec![vec![1; 200]; 200],
            lines: 0,
            score: 0,
            level: 0,
        };

        a.send(&ClientEvent::ReportState {
            snapshot: big.clone(),
        })
        .await;
        for client in [&mut a, &mut b] {
            match client.recv().await {
                ServerEvent::SessionStateUpdate { snapshots, .. } => {
                    assert_eq!(snapshots.len(), 1);
                }
                other => panic!("Expected SessionStateUpdate, got {:?}", other),
            }
        }

        // This report pushes the aggregate view past the cap; the
        // server must withhold that update instead of emitting it.
        b.send(&ClientEvent::ReportState { snapshot: big }).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A small follow-up shrinks the view back under the cap. Both
        // participants decoding it cleanly proves no oversized frame
        // ever hit the stream.
        a.send(&ClientEvent::ReportState {
            snapshot: PlayerSnapshot::default(),
        })
        .await;
        for client in [&mut a, &mut b] {
            match client.recv().await {
                ServerEvent::SessionStateUpdate { snapshots, .. } => {
                    assert_eq!(snapshots.len(), 2);
                }
                other => panic!("Expected SessionStateUpdate, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn disconnect_ends_session_for_opponent() {
        let addr = start_server().await;

        let mut a = TestClient::connect(addr).await;
        let mut b = TestClient::connect(addr).await;
        a.register("A").await;
        b.register("B").await;
        a.send(&ClientEvent::JoinRandomQueue).await;
        b.send(&ClientEvent::JoinRandomQueue).await;
        a.recv().await;
        b.recv().await;

        drop(a);

        match b.recv().await {
            ServerEvent::SessionEnded { reason, loser } => {
                assert_eq!(reason, EndReason::OpponentDisconnected);
                assert_eq!(loser, None);
            }
            other => panic!("Expected SessionEnded, got {:?}", other),
        }
    }
}

/// LOBBY AND SPECTATOR FLOWS
mod lobby_tests {
    use super::*;

    #[tokio::test]
    async fn lobby_watcher_sees_session_lifecycle() {
        let addr = start_server().await;

        let mut watcher = TestClient::connect(addr).await;
        watcher.send(&ClientEvent::WatchLobby).await;
        match watcher.recv().await {
            ServerEvent::LobbySnapshot { sessions } => assert!(sessions.is_empty()),
            other => panic!("Expected LobbySnapshot, got {:?}", other),
        }

        let mut player = TestClient::connect(addr).await;
        player.register("alice").await;
        player.send(&ClientEvent::StartSolo).await;
        player.recv().await;

        match watcher.recv().await {
            ServerEvent::LobbySnapshot { sessions } => {
                assert_eq!(sessions.len(), 1);
                assert_eq!(sessions[0].mode, SessionMode::Solo);
                assert_eq!(sessions[0].participants, vec!["alice".to_string()]);
            }
            other => panic!("Expected LobbySnapshot, got {:?}", other),
        }

        player.send(&ClientEvent::EndSession).await;
        match watcher.recv().await {
            ServerEvent::LobbySnapshot { sessions } => assert!(sessions.is_empty()),
            other => panic!("Expected LobbySnapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn spectator_receives_session_updates() {
        let addr = start_server().await;

        let mut a = TestClient::connect(addr).await;
        let mut b = TestClient::connect(addr).await;
        a.register("A").await;
        b.register("B").await;
        a.send(&ClientEvent::JoinRandomQueue).await;
        b.send(&ClientEvent::JoinRandomQueue).await;
        let session_id = match a.recv().await {
            ServerEvent::MatchConfirmed { session_id, .. } => session_id,
            other => panic!("Expected MatchConfirmed, got {:?}", other),
        };
        b.recv().await;

        let mut spectator = TestClient::connect(addr).await;
        spectator
            .send(&ClientEvent::SpectateSession {
                session_id: session_id.clone(),
            })
            .await;

        // Give the spectate event time to be processed before the
        // update that should reach the spectator.
        tokio::time::sleep(Duration::from_millis(50)).await;

        a.send(&ClientEvent::ReportState {
            snapshot: PlayerSnapshot::default(),
        })
        .await;

        match spectator.recv().await {
            ServerEvent::SessionStateUpdate { session_id: sid, .. } => {
                assert_eq!(sid, session_id);
            }
            other => panic!("Expected SessionStateUpdate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn spectating_unknown_session_fails() {
        let addr = start_server().await;

        let mut client = TestClient::connect(addr).await;
        client
            .send(&ClientEvent::SpectateSession {
                session_id: "multi_missing".to_string(),
            })
            .await;

        match client.recv().await {
            ServerEvent::ProtocolError { message } => {
                assert!(message.contains("multi_missing"));
            }
            other => panic!("Expected ProtocolError, got {:?}", other),
        }
    }
}
