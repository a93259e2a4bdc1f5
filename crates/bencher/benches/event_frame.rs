use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ethweb::event_source::format_event;
use std::hint::black_box;

fn benchmark_format_event(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("format_event");

    let cases = [
        ("single_line", "{\"temperature\":21.5,\"humidity\":40}".to_owned()),
        ("multi_line", "line one\nline two\r\nline three\rline four".repeat(16)),
    ];
    for (name, message) in &cases {
        group.throughput(Throughput::Bytes(message.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), message, |b, message| {
            b.iter(|| format_event(black_box(message), Some("sensor"), Some(42), Some(1000)));
        });
    }

    group.finish();
}

criterion_group!(event_frame, benchmark_format_event);
criterion_main!(event_frame);
