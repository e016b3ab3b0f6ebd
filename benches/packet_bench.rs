use bytes::BytesMut;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tokio_util::codec::Encoder;
use udp_file_transfer::core::codec::PacketCodec;
use udp_file_transfer::core::packet::{OpCode, Packet, TRANSFER_UNIT, WIRE_SIZE};
use udp_file_transfer::utils::crypto::{CipherSuite, KeyMaterial, SessionCipher};

#[allow(clippy::unwrap_used)]
fn bench_packet_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet_encode_decode");
    let payload_sizes = [0usize, 64, 256, TRANSFER_UNIT];

    for &size in &payload_sizes {
        let payload = vec![0u8; size];
        group.throughput(Throughput::Bytes(WIRE_SIZE as u64));
        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter_batched(
                || {
                    Packet::new(OpCode::Write, 1, 1)
                        .with_name("bench.bin")
                        .unwrap()
                        .with_payload(vec![0u8; size])
                        .unwrap()
                },
                |p| {
                    let mut buf = BytesMut::with_capacity(WIRE_SIZE);
                    let mut codec = PacketCodec;
                    codec.encode(p, &mut buf).unwrap();
                },
                BatchSize::SmallInput,
            )
        });
        group.bench_function(format!("decode_{size}b"), |b| {
            let bytes = Packet::new(OpCode::Write, 1, 1)
                .with_payload(payload.clone())
                .unwrap()
                .to_bytes();
            b.iter(|| {
                let decoded = Packet::from_bytes(&bytes).unwrap();
                assert!(decoded.verify_integrity().is_ok());
            })
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_chunk_sealing(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_sealing");
    let keys = KeyMaterial::generate(CipherSuite::XChaCha20Poly1305).unwrap();
    let cipher = SessionCipher::new(&keys);
    let chunk = vec![0x5Au8; TRANSFER_UNIT];
    let sealed = cipher.seal(7, &chunk).unwrap();

    group.throughput(Throughput::Bytes(TRANSFER_UNIT as u64));
    group.bench_function("seal_chunk", |b| b.iter(|| cipher.seal(7, &chunk).unwrap()));
    group.bench_function("open_chunk", |b| b.iter(|| cipher.open(7, &sealed).unwrap()));
    group.finish();
}

criterion_group!(benches, bench_packet_encode_decode, bench_chunk_sealing);
criterion_main!(benches);
