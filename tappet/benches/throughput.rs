//! Throughput benchmarks: messages per second through PUSH/PULL
//!
//! Compares the in-process transport with TCP over loopback.
//! Measures: How many messages get from one socket to another?
//!
//! Tests the PUBLIC API from `tappet::zmq`

use criterion::{
    black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput,
};
use std::time::Duration;
use tappet::zmq::prelude::*;

const MESSAGE_SIZES: &[usize] = &[64, 1024, 16 * 1024];
const BATCH: usize = 10_000;
// Stays well below the default HWM so a window never blocks the sender
const WINDOW: usize = 250;

fn run_batch(push: &mut Socket, pull: &mut Socket, payload: &Bytes) {
    for _ in 0..BATCH / WINDOW {
        for _ in 0..WINDOW {
            push.send(black_box(payload.clone())).unwrap();
        }
        for _ in 0..WINDOW {
            black_box(pull.recv().unwrap());
        }
    }
}

fn push_pull_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("throughput/push_pull");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(10);

    let ctx = Context::new().unwrap();
    for transport in ["inproc", "tcp"] {
        let mut pull = ctx.socket(SocketType::Pull);
        let endpoint = match transport {
            "inproc" => pull.bind("inproc://throughput").unwrap(),
            _ => pull.bind("tcp://127.0.0.1:*").unwrap(),
        };
        let mut push = ctx.socket(SocketType::Push);
        push.connect(&endpoint).unwrap();

        for &size in MESSAGE_SIZES {
            let payload = Bytes::from(vec![0u8; size]);
            group.throughput(Throughput::Bytes((size * BATCH) as u64));
            group.bench_with_input(
                BenchmarkId::new(transport, format!("{size}B")),
                &size,
                |b, _| b.iter(|| run_batch(&mut push, &mut pull, &payload)),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, push_pull_throughput);
criterion_main!(benches);
