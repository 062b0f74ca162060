//! Criterion benchmarks for the CAT text codec and command framing.
//!
//! Every received chunk goes through `decode_ascii` on the receive path and
//! every reply through `encode_ascii`, so both must stay well below the
//! latency of a loopback round trip.
//!
//! Run with:
//! ```bash
//! cargo bench --package cat-relay-core --bench framing_bench
//! ```

use cat_relay_core::protocol::{decode_ascii, encode_ascii, CommandAssembler};
use cat_relay_core::RECEIVE_BUFFER_SIZE;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

// ── Fixtures ──────────────────────────────────────────────────────────────────

/// A realistic poll burst: frequency, mode and transceiver status queries.
fn poll_burst(commands: usize) -> String {
    let mut text = String::new();
    for n in 0..commands {
        match n % 3 {
            0 => text.push_str("FA00014074000;"),
            1 => text.push_str("MD2;"),
            _ => text.push_str("ZZIF00014074000000000000000200000000;"),
        }
    }
    text
}

/// One full receive buffer of bytes, including a few non-ASCII bytes.
fn full_buffer() -> Vec<u8> {
    let mut bytes = poll_burst(64).into_bytes();
    bytes.truncate(RECEIVE_BUFFER_SIZE);
    bytes[10] = 0xB0;
    bytes[500] = 0xFF;
    bytes
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    let buffer = full_buffer();
    group.bench_function("decode_full_buffer", |b| {
        b.iter(|| decode_ascii(black_box(&buffer)))
    });

    let reply = poll_burst(8);
    group.bench_function("encode_reply", |b| {
        b.iter(|| encode_ascii(black_box(&reply)))
    });

    group.finish();
}

fn bench_assembler(c: &mut Criterion) {
    let mut group = c.benchmark_group("assembler");

    for commands in [1usize, 16, 64] {
        let text = poll_burst(commands);
        group.bench_with_input(
            BenchmarkId::new("whole_commands", commands),
            &text,
            |b, text| {
                b.iter(|| {
                    let mut assembler = CommandAssembler::new();
                    assembler.push(black_box(text)).unwrap()
                })
            },
        );
    }

    // The same burst cut into 7-byte pieces, as a slow serial bridge delivers it.
    let text = poll_burst(64);
    let pieces: Vec<&str> = text
        .as_bytes()
        .chunks(7)
        .map(|chunk| std::str::from_utf8(chunk).unwrap())
        .collect();
    group.bench_function("split_commands", |b| {
        b.iter(|| {
            let mut assembler = CommandAssembler::new();
            let mut total = 0usize;
            for piece in &pieces {
                total += assembler.push(black_box(piece)).unwrap().len();
            }
            total
        })
    });

    group.finish();
}

criterion_group!(benches, bench_codec, bench_assembler);
criterion_main!(benches);
