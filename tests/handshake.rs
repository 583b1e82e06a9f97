//! Integration tests for the START and END handshakes.
//!
//! Each test uses real `tokio::net::UdpSocket`s on loopback.  Where one side
//! must misbehave (stay silent, die mid-transfer, spoof a second peer) the
//! test drives a raw [`Socket`] by hand instead of a connection.

use std::net::SocketAddr;
use std::time::Duration;

use rtp_over_udp::{
    simulator::Simulator, state::SenderState, Config, ConnError, Datagram, Packet, PacketType,
    ReceiverConnection, SenderConnection, Socket,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn ephemeral() -> Socket {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Socket::bind(addr).await.expect("bind failed")
}

fn quick() -> Config {
    Config {
        ack_timeout: Duration::from_millis(100),
        ..Config::default()
    }
}

async fn recv_packet(sock: &Socket, wait: Duration) -> Option<(Packet, SocketAddr)> {
    let (bytes, from) = sock
        .recv_from(Some(wait))
        .await
        .expect("recv failed")?;
    Some((Packet::parse(&bytes).expect("peer sent a bad packet"), from))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lost_start_is_resent_until_acknowledged() {
    let receiver = ReceiverConnection::new(ephemeral().await, quick()).unwrap();
    let peer = receiver.local_addr();

    let sim = Simulator::transparent(ephemeral().await);
    sim.drop_next(PacketType::Start, 0, 2);
    let mut sender = SenderConnection::new(sim, peer, quick()).unwrap();

    let (received, stats) = tokio::join!(receiver.run(), sender.send_message(b"hi"));
    assert_eq!(received.unwrap(), b"hi");
    assert!(stats.unwrap().close_acknowledged);
    assert_eq!(sender.state(), SenderState::Done);
    assert_eq!(sender.into_socket().sent_count(PacketType::Start, 0), 3);
}

#[tokio::test]
async fn silent_peer_fails_connect_after_bounded_attempts() {
    // Bound but never read: datagrams vanish, no ACK ever comes back.
    let silent = ephemeral().await;
    let config = Config {
        connect_attempts: 3,
        ack_timeout: Duration::from_millis(50),
        ..Config::default()
    };
    let sim = Simulator::transparent(ephemeral().await);
    let mut sender = SenderConnection::new(sim, silent.local_addr(), config).unwrap();

    let err = sender.send_message(b"lost").await.unwrap_err();
    assert!(matches!(err, ConnError::ConnectTimeout(3)));
    assert_eq!(sender.into_socket().sent_count(PacketType::Start, 0), 3);
}

#[tokio::test]
async fn peer_dying_mid_transfer_is_reported() {
    let fake = ephemeral().await;
    let config = Config {
        max_consecutive_timeouts: 3,
        ack_timeout: Duration::from_millis(50),
        ..Config::default()
    };
    let mut sender = SenderConnection::new(ephemeral().await, fake.local_addr(), config).unwrap();

    // Acknowledge START, then go quiet.
    let fake_peer = async {
        let (pkt, from) = recv_packet(&fake, Duration::from_secs(2)).await.expect("START expected");
        assert_eq!(pkt, Packet::start());
        fake.send_to(&Packet::ack(1).encode(), from).await.unwrap();
    };

    let (result, ()) = tokio::join!(sender.send_message(b"never delivered"), fake_peer);
    assert!(matches!(result, Err(ConnError::PeerUnresponsive(3))));
    assert_eq!(sender.stats().timeouts, 3);
    assert_eq!(sender.state(), SenderState::Done);
}

#[tokio::test]
async fn unacknowledged_end_is_not_fatal() {
    let receiver_sim = Simulator::transparent(ephemeral().await);
    // "ok" is one chunk: END is seq 2, its ACK is 3.
    receiver_sim.drop_next(PacketType::Ack, 3, 1);
    let peer = receiver_sim.local_addr();
    let receiver = ReceiverConnection::new(receiver_sim, quick()).unwrap();

    let sim = Simulator::transparent(ephemeral().await);
    let mut sender = SenderConnection::new(sim, peer, quick()).unwrap();

    let (received, stats) = tokio::join!(receiver.run(), sender.send_message(b"ok"));
    let stats = stats.expect("close exhaustion must not be an error");
    assert_eq!(received.unwrap(), b"ok");
    assert!(!stats.close_acknowledged);
    assert_eq!(sender.into_socket().sent_count(PacketType::End, 2), 5);
}

#[tokio::test]
async fn lingering_receiver_reacks_end_without_duplicating_output() {
    let receiver_sim = Simulator::transparent(ephemeral().await);
    // "abc" in 1-byte chunks: END is seq 4, its ACK is 5.  Lose two of them.
    receiver_sim.drop_next(PacketType::Ack, 5, 2);
    let peer = receiver_sim.local_addr();
    let config = Config {
        max_payload: 1,
        linger: Duration::from_millis(800),
        ..quick()
    };
    let receiver = ReceiverConnection::new(receiver_sim, config.clone()).unwrap();
    let mut sender = SenderConnection::new(ephemeral().await, peer, config).unwrap();

    let (received, stats) = tokio::join!(receiver.run(), sender.send_message(b"abc"));
    assert_eq!(received.unwrap(), b"abc");
    assert!(stats.unwrap().close_acknowledged);
}

#[tokio::test]
async fn receiver_ignores_a_second_sender() {
    let receiver_sock = ephemeral().await;
    let addr = receiver_sock.local_addr();
    let receiver = ReceiverConnection::new(receiver_sock, Config::default()).unwrap();

    let real = ephemeral().await;
    let rogue = ephemeral().await;
    let script = [
        (&real, Packet::start()),
        (&rogue, Packet::start()),
        (&rogue, Packet::data(1, b"X".to_vec())),
        (&real, Packet::data(1, b"A".to_vec())),
        (&rogue, Packet::end(2)),
        (&real, Packet::data(2, b"B".to_vec())),
        (&real, Packet::end(3)),
    ];
    for (sock, pkt) in &script {
        sock.send_to(&pkt.encode(), addr).await.unwrap();
    }

    let received = tokio::time::timeout(Duration::from_secs(5), receiver.run())
        .await
        .expect("receiver did not close")
        .unwrap();
    assert_eq!(received, b"AB");

    // The rogue never hears back.
    let rogue_reply = rogue
        .recv_from(Some(Duration::from_millis(100)))
        .await
        .unwrap();
    assert!(rogue_reply.is_none());

    // The real sender saw ACK 1, 2, 3 and the final ACK 4.
    let mut acks = Vec::new();
    while let Some((pkt, from)) = recv_packet(&real, Duration::from_millis(100)).await {
        assert_eq!(from, addr);
        assert_eq!(pkt.kind, PacketType::Ack);
        acks.push(pkt.seq);
    }
    assert_eq!(acks, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn corrupt_and_malformed_datagrams_get_no_reply() {
    let receiver_sock = ephemeral().await;
    let addr = receiver_sock.local_addr();
    let receiver = ReceiverConnection::new(receiver_sock, Config::default()).unwrap();

    let peer = ephemeral().await;
    let mut corrupt = Packet::data(1, b"Z".to_vec()).encode();
    corrupt[4] ^= 0x80;
    for bytes in [
        b"short".to_vec(),
        corrupt,
        Packet::data(1, b"early".to_vec()).encode(),
        Packet::start().encode(),
        Packet::data(1, b"ok".to_vec()).encode(),
        Packet::end(2).encode(),
    ] {
        peer.send_to(&bytes, addr).await.unwrap();
    }

    let received = tokio::time::timeout(Duration::from_secs(5), receiver.run())
        .await
        .expect("receiver did not close")
        .unwrap();
    assert_eq!(received, b"ok");

    let mut acks = Vec::new();
    while let Some((pkt, _)) = recv_packet(&peer, Duration::from_millis(100)).await {
        acks.push(pkt.seq);
    }
    // Only START, the valid DATA and END were answered.
    assert_eq!(acks, vec![1, 2, 3]);
}

#[tokio::test]
async fn receiver_gives_up_when_every_end_is_lost() {
    let receiver_sock = ephemeral().await;
    let peer = receiver_sock.local_addr();
    let receiver_config = Config {
        idle_timeout: Duration::from_millis(800),
        ..quick()
    };
    let receiver = ReceiverConnection::new(receiver_sock, receiver_config).unwrap();

    // "ok" is one chunk: END is seq 2.  None of the five attempts arrive.
    let sim = Simulator::transparent(ephemeral().await);
    sim.drop_next(PacketType::End, 2, 5);
    let mut sender = SenderConnection::new(sim, peer, quick()).unwrap();

    let (received, stats) = tokio::time::timeout(
        Duration::from_secs(5),
        async { tokio::join!(receiver.run(), sender.send_message(b"ok")) },
    )
    .await
    .expect("receiver never closed");

    assert!(!stats.unwrap().close_acknowledged);
    assert_eq!(received.unwrap(), b"ok");
}

#[tokio::test]
async fn idle_deadline_resets_on_in_order_progress() {
    let receiver_sock = ephemeral().await;
    let addr = receiver_sock.local_addr();
    let config = Config {
        idle_timeout: Duration::from_millis(300),
        ..Config::default()
    };
    let receiver = ReceiverConnection::new(receiver_sock, config).unwrap();

    // Each DATA lands well inside the idle window, but the whole script
    // takes longer than one window.
    let peer = ephemeral().await;
    let script = async {
        peer.send_to(&Packet::start().encode(), addr).await.unwrap();
        for (seq, byte) in [(1, b'a'), (2, b'b'), (3, b'c')] {
            tokio::time::sleep(Duration::from_millis(150)).await;
            peer.send_to(&Packet::data(seq, vec![byte]).encode(), addr)
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        peer.send_to(&Packet::end(4).encode(), addr).await.unwrap();
    };

    let (received, ()) = tokio::join!(receiver.run(), script);
    assert_eq!(received.unwrap(), b"abc");

    let mut acks = Vec::new();
    while let Some((pkt, _)) = recv_packet(&peer, Duration::from_millis(100)).await {
        acks.push(pkt.seq);
    }
    assert_eq!(acks, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn stale_acks_hold_off_retransmission_and_reset_the_timeout_count() {
    let fake = ephemeral().await;
    let config = Config {
        max_payload: 1,
        ack_timeout: Duration::from_millis(200),
        max_consecutive_timeouts: 2,
        ..Config::default()
    };
    let mut sender = SenderConnection::new(ephemeral().await, fake.local_addr(), config).unwrap();

    let fake_peer = async {
        let expect_packet = |got: Option<(Packet, SocketAddr)>, want: Packet| {
            let (pkt, from) = got.unwrap_or_else(|| panic!("expected {want:?}"));
            assert_eq!(pkt, want);
            from
        };
        let wait = Duration::from_secs(2);
        let data = |seq: u32| Packet::data(seq, vec![b'A' + seq as u8 - 1]);

        let from = expect_packet(recv_packet(&fake, wait).await, Packet::start());
        fake.send_to(&Packet::ack(1).encode(), from).await.unwrap();
        for seq in 1..=4 {
            expect_packet(recv_packet(&fake, wait).await, data(seq));
        }

        // Duplicate ACK 1s, each well inside the ACK timeout, span several
        // timeouts' worth of time without provoking a resend.
        let mut during = Vec::new();
        for _ in 0..15 {
            fake.send_to(&Packet::ack(1).encode(), from).await.unwrap();
            if let Some((pkt, _)) = recv_packet(&fake, Duration::from_millis(40)).await {
                during.push(pkt);
            }
        }
        assert!(during.is_empty(), "resent while ACKs were flowing: {during:?}");

        // Silence: one timeout, go back N.
        for seq in 1..=4 {
            expect_packet(recv_packet(&fake, wait).await, data(seq));
        }
        // A stale ACK between two timeouts keeps the sender alive even
        // though it allows only two in a row.
        fake.send_to(&Packet::ack(1).encode(), from).await.unwrap();
        for seq in 1..=4 {
            expect_packet(recv_packet(&fake, wait).await, data(seq));
        }

        fake.send_to(&Packet::ack(5).encode(), from).await.unwrap();
        expect_packet(recv_packet(&fake, wait).await, data(5));
        fake.send_to(&Packet::ack(6).encode(), from).await.unwrap();
        expect_packet(recv_packet(&fake, wait).await, Packet::end(6));
        fake.send_to(&Packet::ack(7).encode(), from).await.unwrap();
    };

    let (result, ()) = tokio::join!(sender.send_message(b"ABCDE"), fake_peer);
    let stats = result.expect("stale ACKs must keep the transfer alive");
    assert_eq!(stats.timeouts, 2);
    assert_eq!(stats.retransmissions, 8);
    assert!(stats.close_acknowledged);
}
