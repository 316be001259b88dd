use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use xvc_protocol::{Message, Request};

fn shift_message(num_bytes: usize) -> Vec<u8> {
    let message = Message::Shift {
        num_bits: (num_bytes * 8) as u32,
        tms: vec![0x00; num_bytes].into_boxed_slice(),
        tdi: vec![0xA5; num_bytes].into_boxed_slice(),
    };
    let mut out = Vec::with_capacity(10 + 2 * num_bytes);
    message.write_to(&mut out).unwrap();
    out
}

fn decode_headers(c: &mut Criterion) {
    let shift = shift_message(4096);
    let mut settck = Vec::new();
    Message::SetTck { period_ns: 100 }
        .write_to(&mut settck)
        .unwrap();

    c.bench_function("decode shift header", |b| {
        b.iter(|| Request::decode(black_box(&shift), 32768))
    });
    c.bench_function("decode settck", |b| {
        b.iter(|| Request::decode(black_box(&settck), 32768))
    });
}

fn encode_shift(c: &mut Criterion) {
    let message = Message::Shift {
        num_bits: 32768 * 8,
        tms: vec![0x00; 32768].into_boxed_slice(),
        tdi: vec![0xA5; 32768].into_boxed_slice(),
    };
    let mut out = Vec::with_capacity(10 + 2 * 32768);
    c.bench_function("encode 32 KiB shift", |b| {
        b.iter(|| {
            out.clear();
            black_box(&message).write_to(&mut out).unwrap();
        })
    });
}

criterion_group!(benches, decode_headers, encode_shift);
criterion_main!(benches);
