//! Benchmarks for TDS protocol encoding and decoding.

#![allow(clippy::unwrap_used, missing_docs)]

use bytes::{BufMut, BytesMut};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use tds_protocol::{
    EnvChange, EnvChangeType, FeatureRequests, LengthRule, Login7, PreLoginResponse,
    codec::write_b_varchar,
    packet::{PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType},
    prelogin::{EncryptionLevel, PreLogin},
};

fn bench_packet_header_encode(c: &mut Criterion) {
    let header = PacketHeader::new(PacketType::TabularResult, PacketStatus::END_OF_MESSAGE, 1000);

    c.bench_function("packet_header_encode", |b| {
        b.iter(|| {
            let mut buf = [0u8; PACKET_HEADER_SIZE];
            header.write_into(&mut buf);
            black_box(buf)
        })
    });
}

fn bench_packet_header_decode(c: &mut Criterion) {
    let header = PacketHeader::new(PacketType::TabularResult, PacketStatus::END_OF_MESSAGE, 1000);
    let encoded = header.encode_to_bytes();

    c.bench_function("packet_header_decode", |b| {
        b.iter(|| {
            let mut cursor = encoded.clone();
            black_box(PacketHeader::decode(&mut cursor).unwrap())
        })
    });
}

fn bench_prelogin(c: &mut Criterion) {
    let prelogin = PreLogin::new().with_encryption(EncryptionLevel::On);
    let encoded = prelogin.encode();

    c.bench_function("prelogin_encode", |b| b.iter(|| black_box(prelogin.encode())));
    c.bench_function("prelogin_decode", |b| {
        b.iter(|| black_box(PreLoginResponse::decode(&encoded).unwrap()))
    });
}

fn bench_login7_encode(c: &mut Criterion) {
    let login = Login7::new()
        .with_hostname("bench-host")
        .with_app_name("bench")
        .with_server_name("localhost")
        .with_database("master")
        .with_features(FeatureRequests::default().extensions());

    c.bench_function("login7_encode", |b| b.iter(|| black_box(login.encode().unwrap())));
}

fn bench_length_rule(c: &mut Criterion) {
    c.bench_function("length_rule_all_bytes", |b| {
        b.iter(|| {
            let mut known = 0usize;
            for byte in 0..=u8::MAX {
                if LengthRule::for_type_byte(black_box(byte)).is_ok() {
                    known += 1;
                }
            }
            black_box(known)
        })
    });
}

fn bench_env_change_decode(c: &mut Criterion) {
    let mut body = BytesMut::new();
    body.put_u8(EnvChangeType::Database as u8);
    write_b_varchar(&mut body, "AdventureWorks");
    write_b_varchar(&mut body, "master");
    let body = body.freeze();

    c.bench_function("env_change_decode", |b| {
        b.iter(|| {
            let mut cursor = body.clone();
            black_box(EnvChange::decode(&mut cursor).unwrap())
        })
    });
}

criterion_group!(
    benches,
    bench_packet_header_encode,
    bench_packet_header_decode,
    bench_prelogin,
    bench_login7_encode,
    bench_length_rule,
    bench_env_change_decode,
);

criterion_main!(benches);
