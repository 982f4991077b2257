use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use live_stream_client::codec::{PcmDecoder, PcmEncoder};
use live_stream_client::protocol::Envelope;

const FRAME_LEN: usize = 512;

fn sine_frame() -> Vec<f32> {
    (0..FRAME_LEN)
        .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / 16000.0).sin() * 0.5)
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let frame = sine_frame();
    let mut encoder = PcmEncoder::new(FRAME_LEN);

    let mut group = c.benchmark_group("pcm");
    group.throughput(Throughput::Elements(FRAME_LEN as u64));
    group.bench_function("encode_frame", |b| {
        b.iter(|| encoder.encode(black_box(&frame)))
    });

    let data = match encoder.encode(&frame) {
        Envelope::Audio { data } => data,
        _ => unreachable!(),
    };
    let decoder = PcmDecoder::new();
    group.bench_function("decode_chunk", |b| {
        b.iter(|| decoder.decode(black_box(&data)).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_encode);
criterion_main!(benches);
