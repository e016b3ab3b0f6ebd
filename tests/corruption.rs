//! A corrupted upload chunk is skipped, not fatal.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use udp_file_transfer::config::{ServerConfig, TransportConfig};
use udp_file_transfer::core::message::{Chunk, Message};
use udp_file_transfer::core::packet::{OpCode, Packet, WIRE_SIZE};
use udp_file_transfer::server::FileServer;
use udp_file_transfer::utils::crypto::{CipherSuite, KeyMaterial, SessionCipher};

async fn recv(socket: &UdpSocket) -> Option<Packet> {
    let mut buf = [0u8; WIRE_SIZE];
    match tokio::time::timeout(Duration::from_millis(300), socket.recv_from(&mut buf)).await {
        Ok(Ok((n, _))) => Some(Packet::from_bytes(&buf[..n]).unwrap()),
        _ => None,
    }
}

#[tokio::test]
async fn test_corrupted_middle_chunk_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        address: "127.0.0.1:0".into(),
        storage_root: dir.path().join("files"),
        backup_dir: dir.path().join("backup"),
        ..ServerConfig::default()
    };
    let server = FileServer::bind(&config, &TransportConfig::default())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let metrics = server.metrics();
    let (_shutdown, rx) = mpsc::channel(1);
    tokio::spawn(server.run_with_shutdown(rx));

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let keys = KeyMaterial::generate(CipherSuite::XChaCha20Poly1305).unwrap();
    let cipher = SessionCipher::new(&keys);
    let transfer_id = 0x5EED;

    let request = Message::Write {
        name: "three.bin".into(),
        keys,
    }
    .into_packet(transfer_id)
    .unwrap();
    socket.send_to(&request.to_bytes(), addr).await.unwrap();
    let ack = recv(&socket).await.expect("request acknowledged");
    assert_eq!((ack.operation, ack.sequence), (OpCode::Ack, 0));

    let chunks: [&[u8]; 3] = [&[b'A'; 512], &[b'B'; 512], &[b'C'; 476]];
    for (i, data) in chunks.iter().enumerate() {
        let sequence = i as u32 + 1;
        let mut packet = Message::WriteData {
            name: "three.bin".into(),
            chunk: Chunk {
                sequence,
                last: sequence == 3,
                sealed: cipher.seal(sequence, data).unwrap(),
            },
        }
        .into_packet(transfer_id)
        .unwrap();

        if sequence == 2 {
            packet.payload[100] ^= 0x04;
            socket.send_to(&packet.to_bytes(), addr).await.unwrap();
            assert!(recv(&socket).await.is_none(), "corrupt chunk must not be acked");
            continue;
        }

        socket.send_to(&packet.to_bytes(), addr).await.unwrap();
        let ack = recv(&socket).await.expect("chunk acknowledged");
        assert_eq!((ack.operation, ack.sequence), (OpCode::Ack, sequence));
    }

    let stored = tokio::fs::read(dir.path().join("files/three.bin"))
        .await
        .unwrap();
    let mut expected = vec![b'A'; 512];
    expected.extend_from_slice(&[b'C'; 476]);
    assert_eq!(stored, expected);
    assert_eq!(metrics.snapshot().integrity_failures, 1);
}
