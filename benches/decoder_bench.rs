// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Benchmarks for frame reassembly.
//!
//! Measures:
//! - Packet ingestion (decode + grid writes) per packet
//! - Full frame assembly including the point cloud build
//! - Point cloud build alone at varying grid occupancy
//! - Queue push/pop throughput
//!
//! Run with: cargo bench --bench decoder_bench

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use edgefirst_gridlidar::{
    BoundedQueue, FrameDecoder, FrameResult,
    config::{DecoderConfig, EchoFilter},
    packet::{PACKET_SIZE, PacketBuilder},
};

/// One full frame: 32 sub-frames × 52 column fragments, end marker last.
fn frame_packets(frame_id: u32) -> Vec<Vec<u8>> {
    let mut packets = Vec::with_capacity(32 * 52);
    for sub in 0..32u8 {
        for c in 0..52u16 {
            let col = (c * 5) as u8;
            packets.push(
                PacketBuilder::new(frame_id, sub, col)
                    .fill((1024 + c as i16, -512, 300 + sub as i16), 90)
                    .build(),
            );
        }
    }
    packets
}

fn bench_ingestion(c: &mut Criterion) {
    let frames: Vec<Vec<Vec<u8>>> = (0..4).map(frame_packets).collect();
    let packets: Vec<&Vec<u8>> = frames.iter().flatten().collect();
    let total_bytes = packets.len() * PACKET_SIZE;

    let mut group = c.benchmark_group("decoder");

    group.throughput(Throughput::Bytes(total_bytes as u64));
    group.bench_function("full_pipeline", |b| {
        b.iter_with_setup(FrameDecoder::default, |mut decoder| {
            let mut frames_completed = 0;
            for packet in &packets {
                if let FrameResult::Completed(cloud) = decoder.feed(packet) {
                    frames_completed += 1;
                    std::hint::black_box(cloud.len());
                }
            }
            frames_completed
        });
    });

    // Only the first frame's packets, never completing
    let partial: Vec<&Vec<u8>> = frames[0].iter().take(1000).collect();
    group.throughput(Throughput::Elements(partial.len() as u64));
    group.bench_function("per_packet", |b| {
        b.iter_with_setup(FrameDecoder::default, |mut decoder| {
            for packet in &partial {
                std::hint::black_box(decoder.feed(packet));
            }
        });
    });

    group.bench_function("per_packet_flagged", |b| {
        let config = DecoderConfig {
            echo_filter: EchoFilter::Flagged,
            ..Default::default()
        };
        b.iter_with_setup(
            || FrameDecoder::new(config.clone()).unwrap(),
            |mut decoder| {
                for packet in &partial {
                    std::hint::black_box(decoder.feed(packet));
                }
            },
        );
    });

    group.finish();
}

fn bench_build(c: &mut Criterion) {
    let packets = frame_packets(1);
    let mut group = c.benchmark_group("build_point_cloud");

    for fill in [100usize, 800, 1400] {
        let mut decoder = FrameDecoder::default();
        for packet in packets.iter().take(fill) {
            decoder.feed(packet);
        }

        group.throughput(Throughput::Elements((fill * 90) as u64));
        group.bench_with_input(BenchmarkId::new("packets", fill), &decoder, |b, decoder| {
            b.iter(|| std::hint::black_box(decoder.build_point_cloud().len()));
        });
    }

    group.finish();
}

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");
    let packet = vec![0u8; PACKET_SIZE];

    group.throughput(Throughput::Elements(1000));
    group.bench_function("push_pop", |b| {
        let queue = BoundedQueue::new(1000);
        b.iter(|| {
            for _ in 0..1000 {
                queue.push(packet.clone());
            }
            while let Some(item) = queue.try_pop() {
                std::hint::black_box(item.len());
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_ingestion, bench_build, bench_queue);
criterion_main!(benches);
