//! Benchmarks for the call boundary hot paths

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use telio_bridge::ffi::codec::{lift_from_bytes, lower_into_buffer, lower_to_vec, Json};
use telio_bridge::ffi::exports::{ffi_telio_rustbuffer_free, ffi_telio_rustbuffer_from_bytes};
use telio_bridge::ffi::{rust_call, ForeignBytes, RustCallStatus};
use telio_bridge::telio::{Features, PublicKey, SecretKey, TelioNode};

/// Copying host bytes into a buffer and freeing it again
fn bench_buffer_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("rustbuffer_from_bytes");

    for &size in &[16usize, 256, 4096, 65536] {
        let data = vec![0xa5u8; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("{}_bytes", size), |b| {
            b.iter(|| {
                let mut status = RustCallStatus::new();
                let span = ForeignBytes::from_slice(&data).unwrap();
                let buf = ffi_telio_rustbuffer_from_bytes(span, &mut status);
                ffi_telio_rustbuffer_free(black_box(buf), &mut status);
            })
        });
    }

    group.finish();
}

/// Overhead of the status wrapper around a trivial body
fn bench_rust_call(c: &mut Criterion) {
    c.bench_function("rust_call_success", |b| {
        b.iter(|| {
            let mut status = RustCallStatus::new();
            let value: u32 = rust_call(&mut status, || Ok(black_box(7u32)));
            black_box(value)
        })
    });
}

/// Record serialization for the payloads devices send most
fn bench_records(c: &mut Criterion) {
    let features = Json(Features::default());
    c.bench_function("lower_features", |b| {
        b.iter(|| {
            let buf = lower_into_buffer(black_box(&features)).unwrap();
            buf.destroy().unwrap();
        })
    });

    let key: PublicKey = SecretKey::generate().public();
    let nodes: Vec<Json<TelioNode>> = (0..64)
        .map(|i| Json(TelioNode::new(format!("peer-{i}"), key)))
        .collect();
    let bytes = lower_to_vec(&nodes);
    c.bench_function("lift_status_map_64", |b| {
        b.iter(|| {
            let nodes: Vec<Json<TelioNode>> = lift_from_bytes(black_box(&bytes)).unwrap();
            black_box(nodes)
        })
    });
}

criterion_group!(benches, bench_buffer_round_trip, bench_rust_call, bench_records);
criterion_main!(benches);
