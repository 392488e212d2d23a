use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use remote_display_core::{StatefulBitstreamAssembler, wire};

fn synthetic_access_unit(keyframe: bool, payload_len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut push_nal = |out: &mut Vec<u8>, header: [u8; 2], len: usize| {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(&header);
        out.extend(std::iter::repeat(0xab).take(len));
    };

    push_nal(&mut out, [0x46, 0x01], 0); // AUD
    if keyframe {
        push_nal(&mut out, [0x40, 0x01], 10); // VPS
        push_nal(&mut out, [0x42, 0x01], 12); // SPS
        push_nal(&mut out, [0x44, 0x01], 4); // PPS
        push_nal(&mut out, [0x26, 0x01], payload_len); // IDR_W_RADL
    } else {
        push_nal(&mut out, [0x02, 0x01], payload_len); // TRAIL_N-ish
    }
    out
}

fn bitstream_assembly_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("bitstream_assembly");
    group.measurement_time(Duration::from_secs(5));

    for payload_len in [4 * 1024usize, 256 * 1024] {
        let frame = synthetic_access_unit(true, payload_len);
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("push_chunk_whole_frame", payload_len),
            &frame,
            |b, frame| {
                b.iter(|| {
                    let mut assembler = StatefulBitstreamAssembler::new();
                    let _ = assembler.push_chunk(frame).unwrap();
                    let _ = assembler.flush().unwrap();
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("push_chunk_4kb_chunks", payload_len),
            &frame,
            |b, frame| {
                b.iter(|| {
                    let mut assembler = StatefulBitstreamAssembler::new();
                    for chunk in frame.chunks(4096) {
                        let _ = assembler.push_chunk(chunk).unwrap();
                    }
                    let _ = assembler.flush().unwrap();
                });
            },
        );
    }

    group.finish();
}

fn to_annexb_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("to_annexb");
    for payload_len in [4 * 1024usize, 1024 * 1024] {
        let frame = synthetic_access_unit(true, payload_len);
        let mut assembler = StatefulBitstreamAssembler::new();
        let _ = assembler.push_chunk(&frame).unwrap();
        let (access_units, cache) = assembler.flush().unwrap();
        let keyframe = access_units.into_iter().find(|au| au.is_keyframe).unwrap();

        group.throughput(Throughput::Bytes(payload_len as u64));
        group.bench_with_input(BenchmarkId::new("prepend_parameter_sets", payload_len), &keyframe, |b, au| {
            b.iter(|| au.to_annexb(&cache));
        });
    }
    group.finish();
}

fn wire_roundtrip_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire_video_frame");
    for payload_len in [4 * 1024usize, 1024 * 1024] {
        let payload = vec![0xcdu8; payload_len];
        group.throughput(Throughput::Bytes(payload_len as u64));
        group.bench_with_input(BenchmarkId::new("write_video_frame", payload_len), &payload, |b, payload| {
            b.iter(|| {
                let mut sink = Vec::with_capacity(payload.len() + 5);
                wire::write_video_frame(&mut sink, payload).unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bitstream_assembly_benchmark,
    to_annexb_benchmark,
    wire_roundtrip_benchmark
);
criterion_main!(benches);
