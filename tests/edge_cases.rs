#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests: malformed datagrams, hostile names, empty and
//! boundary-sized files, and the server's replies to nonsense.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use udp_file_transfer::client::TransferClient;
use udp_file_transfer::config::{ClientConfig, ServerConfig, TransferConfig, TransportConfig};
use udp_file_transfer::core::codec::PacketCodec;
use udp_file_transfer::core::message::Message;
use udp_file_transfer::core::packet::{OpCode, Packet, PAYLOAD_CAPACITY, TRANSFER_UNIT, WIRE_SIZE};
use udp_file_transfer::error::{constants, ProtocolError};
use udp_file_transfer::server::FileServer;
use udp_file_transfer::utils::crypto::{CipherSuite, KeyMaterial};

struct TestServer {
    dir: tempfile::TempDir,
    addr: SocketAddr,
    _shutdown: mpsc::Sender<()>,
}

impl TestServer {
    fn root(&self) -> std::path::PathBuf {
        self.dir.path().join("files")
    }
}

async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        address: "127.0.0.1:0".into(),
        storage_root: dir.path().join("files"),
        backup_dir: dir.path().join("backup"),
        session_idle_timeout: Duration::from_secs(2),
        ..ServerConfig::default()
    };
    let server = FileServer::bind(&config, &TransportConfig::default())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(server.run_with_shutdown(rx));
    TestServer {
        dir,
        addr,
        _shutdown: tx,
    }
}

async fn client_for(server: &TestServer) -> TransferClient {
    let config = ClientConfig {
        server_address: server.addr.to_string(),
        bind_address: "127.0.0.1:0".into(),
        ack_timeout: Duration::from_millis(200),
        ..ClientConfig::default()
    };
    TransferClient::bind(&config, &TransportConfig::default())
        .await
        .unwrap()
}

async fn recv_packet(socket: &UdpSocket) -> Option<Packet> {
    let mut buf = [0u8; WIRE_SIZE];
    match tokio::time::timeout(Duration::from_millis(500), socket.recv_from(&mut buf)).await {
        Ok(Ok((n, _))) => Some(Packet::from_bytes(&buf[..n]).unwrap()),
        _ => None,
    }
}

// ============================================================================
// CODEC EDGE CASES
// ============================================================================

#[test]
fn test_empty_and_truncated_datagrams() {
    use bytes::BytesMut;
    use tokio_util::codec::Decoder;

    let mut codec = PacketCodec;
    let mut empty = BytesMut::new();
    assert!(codec.decode(&mut empty).unwrap().is_none());

    let full = Packet::new(OpCode::Ack, 1, 1).to_bytes();
    let mut truncated = BytesMut::from(&full[..100]);
    assert!(matches!(
        codec.decode(&mut truncated),
        Err(ProtocolError::MalformedPacket(_))
    ));
    assert!(truncated.is_empty(), "bad datagram must be consumed");
}

#[test]
fn test_max_payload_fits() {
    let packet = Packet::new(OpCode::Write, 1, 1)
        .with_payload(vec![0xAB; PAYLOAD_CAPACITY])
        .unwrap();
    let decoded = Packet::from_bytes(&packet.to_bytes()).unwrap();
    assert_eq!(decoded.payload.len(), PAYLOAD_CAPACITY);
    decoded.verify_integrity().unwrap();
}

#[test]
fn test_name_field_without_terminator() {
    let mut bytes = Packet::new(OpCode::Read, 1, 0).to_bytes();
    for b in &mut bytes[4..4 + 256] {
        *b = b'a';
    }
    let decoded = Packet::from_bytes(&bytes).unwrap();
    assert_eq!(decoded.target_name.len(), 255);
}

#[test]
fn test_key_material_truncated() {
    let keys = KeyMaterial::generate(CipherSuite::XChaCha20Poly1305).unwrap();
    let mut packet = Message::Read {
        name: "f".into(),
        keys,
    }
    .into_packet(1)
    .unwrap();
    let short = packet.payload[..10].to_vec();
    packet = packet.with_payload(short).unwrap();
    assert!(Message::from_packet(&packet).is_err());
}

// ============================================================================
// SERVER RESILIENCE
// ============================================================================

#[tokio::test]
async fn test_unknown_operation_answered_without_side_effects() {
    let server = start_server().await;
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut bytes = Message::Delete {
        name: "keep.txt".into(),
    }
    .into_packet(31)
    .unwrap()
    .to_bytes();
    tokio::fs::write(server.root().join("keep.txt"), b"still here")
        .await
        .unwrap();
    bytes[..4].copy_from_slice(&0xFFu32.to_be_bytes());
    socket.send_to(&bytes, server.addr).await.unwrap();

    let reply = recv_packet(&socket).await.expect("error reply");
    assert_eq!(reply.operation, OpCode::Error);
    assert_eq!(reply.payload, constants::MSG_UNKNOWN_OPERATION.as_bytes());
    assert!(server.root().join("keep.txt").exists());
}

#[tokio::test]
async fn test_garbage_does_not_stop_server() {
    let server = start_server().await;
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    socket.send_to(b"not a packet", server.addr).await.unwrap();
    let stray_ack = Packet::new(OpCode::Ack, 12, 0).to_bytes();
    socket.send_to(&stray_ack, server.addr).await.unwrap();
    assert!(recv_packet(&socket).await.is_none());

    let mut client = client_for(&server).await;
    let err = client.delete("nothing.txt").await.unwrap_err();
    assert!(matches!(err, ProtocolError::FileDeleteFailed { .. }));
}

#[tokio::test]
async fn test_corrupted_request_is_dropped() {
    let server = start_server().await;
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let mut packet = Message::Read {
        name: "x.txt".into(),
        keys: KeyMaterial::generate(CipherSuite::XChaCha20Poly1305).unwrap(),
    }
    .into_packet(4)
    .unwrap();
    packet.payload[5] ^= 0x10;
    socket.send_to(&packet.to_bytes(), server.addr).await.unwrap();

    assert!(recv_packet(&socket).await.is_none(), "sender must retransmit");
}

#[tokio::test]
async fn test_stray_chunk_without_session_is_ignored() {
    let server = start_server().await;
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let stray = Packet::new(OpCode::Write, 8, 3)
        .with_name("orphan.bin")
        .unwrap()
        .with_payload(vec![1; 32])
        .unwrap()
        .with_flags(udp_file_transfer::core::packet::flags::DATA);
    socket.send_to(&stray.to_bytes(), server.addr).await.unwrap();

    assert!(recv_packet(&socket).await.is_none());
    assert!(!server.root().join("orphan.bin").exists());
}

// ============================================================================
// PATH CONFINEMENT
// ============================================================================

#[tokio::test]
async fn test_traversal_names_rejected() {
    let server = start_server().await;
    let mut client = client_for(&server).await;
    let outside = server.dir.path().join("secret.txt");
    tokio::fs::write(&outside, b"top secret").await.unwrap();

    for name in ["../secret.txt", "..", "/etc/passwd", "sub/dir.txt", ".hidden"] {
        let err = client.delete(name).await.unwrap_err();
        match err {
            ProtocolError::FileDeleteFailed { reason, .. } => {
                assert_eq!(reason, constants::MSG_INVALID_NAME, "name {name:?}")
            }
            other => panic!("name {name:?}: unexpected {other:?}"),
        }
    }
    assert!(outside.exists());

    let dest = server.dir.path().join("leak.txt");
    let err = client.download("../secret.txt", &dest).await.unwrap_err();
    assert!(matches!(err, ProtocolError::Remote(_)));
}

// ============================================================================
// FILE SIZE BOUNDARIES
// ============================================================================

#[tokio::test]
async fn test_empty_file_roundtrip() {
    let server = start_server().await;
    let mut client = client_for(&server).await;
    let local = tempfile::tempdir().unwrap();

    let source = local.path().join("empty.txt");
    tokio::fs::write(&source, b"").await.unwrap();
    let report = client.upload(&source, "empty.txt").await.unwrap();
    assert_eq!(report.chunks, 1);
    assert_eq!(report.bytes, 0);

    let dest = local.path().join("back.txt");
    let report = client.download("empty.txt", &dest).await.unwrap();
    assert!(report.is_complete());
    assert!(tokio::fs::read(&dest).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_exact_unit_multiple_roundtrip() {
    let server = start_server().await;
    let mut client = client_for(&server).await;
    let local = tempfile::tempdir().unwrap();

    let data: Vec<u8> = (0..TRANSFER_UNIT * 2).map(|i| (i % 251) as u8).collect();
    let source = local.path().join("even.bin");
    tokio::fs::write(&source, &data).await.unwrap();

    let report = client.upload(&source, "even.bin").await.unwrap();
    assert_eq!(report.chunks, 2);

    let dest = local.path().join("even.out");
    client.download("even.bin", &dest).await.unwrap();
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
}

#[tokio::test]
async fn test_legacy_xor_refused_by_default_server() {
    let server = start_server().await;
    let config = TransferConfig::default_with_overrides(|c| {
        c.client.server_address = server.addr.to_string();
        c.client.bind_address = "127.0.0.1:0".into();
        c.transport.cipher_suite = CipherSuite::Xor;
    });
    let mut client = TransferClient::bind(&config.client, &config.transport)
        .await
        .unwrap();

    let dest = server.dir.path().join("out.txt");
    let err = client.download("any.txt", &dest).await.unwrap_err();
    match err {
        ProtocolError::Remote(reason) => assert_eq!(reason, constants::MSG_SUITE_REJECTED),
        other => panic!("unexpected {other:?}"),
    }
}
