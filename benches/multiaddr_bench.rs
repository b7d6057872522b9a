//! Multiaddress codec and peer id benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mquic::{Multiaddr, PeerId};

const TEXT: &str = "/ip4/192.0.2.7/udp/4001/quic-v1/p2p/QmYyQSo1c1Ym7orWxLYvCrM2EmxFTANf8wXmmE7DWjhx5N";

fn bench_multiaddr(c: &mut Criterion) {
    let mut group = c.benchmark_group("multiaddr");
    let addr: Multiaddr = TEXT.parse().unwrap();
    let bytes = addr.to_bytes();

    group.bench_function("parse_text", |b| {
        b.iter(|| black_box(TEXT).parse::<Multiaddr>().unwrap())
    });
    group.bench_function("to_text", |b| b.iter(|| black_box(&addr).to_string()));
    group.bench_function("from_bytes", |b| {
        b.iter(|| Multiaddr::from_bytes(black_box(&bytes)).unwrap())
    });
    group.finish();
}

fn bench_peer_id(c: &mut Criterion) {
    let mut group = c.benchmark_group("peer_id");
    let der = vec![0x30u8; 512];

    group.bench_function("from_certificate", |b| {
        b.iter(|| PeerId::from_certificate(black_box(&der)))
    });
    group.bench_function("base58_round_trip", |b| {
        let peer = PeerId::from_certificate(&der);
        b.iter(|| PeerId::from_base58(&black_box(&peer).to_base58()).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_multiaddr, bench_peer_id);
criterion_main!(benches);
