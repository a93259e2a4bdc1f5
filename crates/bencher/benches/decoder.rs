use bencher::{TestCase, TestFile};
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ethweb_http::codec::RequestDecoder;
use ethweb_http::protocol::{Message, PayloadItem};
use std::hint::black_box;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::Decoder;

static SMALL_HEADER: TestFile = TestFile::new("get_small.txt", include_str!("../resources/request/get_small.txt"));
static LARGE_HEADER: TestFile = TestFile::new("get_large.txt", include_str!("../resources/request/get_large.txt"));
static FORM_BODY: TestFile = TestFile::new("post_form.txt", include_str!("../resources/request/post_form.txt"));
static CHUNKED_BODY: TestFile = TestFile::new("post_chunked.txt", include_str!("../resources/request/post_chunked.txt"));

fn create_test_cases() -> Vec<TestCase> {
    vec![
        TestCase::single("small_header_decoder", SMALL_HEADER),
        TestCase::single("large_header_decoder", LARGE_HEADER),
        TestCase::single("form_body_decoder", FORM_BODY),
        TestCase::single("chunked_body_decoder", CHUNKED_BODY),
        TestCase::pipelined("keep_alive_small_x8", SMALL_HEADER, 8),
        TestCase::pipelined("keep_alive_form_x8", FORM_BODY, 8),
    ]
}

/// Decodes the head and every body item up to the end of the request.
fn decode_request(decoder: &mut RequestDecoder, bytes: &mut BytesMut) -> usize {
    let mut items = 0;
    loop {
        let message = decoder.decode(bytes).expect("input should be a valid http request").expect("input should be complete");
        items += 1;
        if let Message::Payload(PayloadItem::Eof) = black_box(message) {
            return items;
        }
    }
}

fn benchmark_request_decoder(criterion: &mut Criterion) {
    let test_cases = create_test_cases();
    let mut group = criterion.benchmark_group("request_decoder");

    for case in test_cases {
        let wire = case.wire();
        group.throughput(Throughput::Bytes(wire.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(case.name()), &case, |b, case| {
            let mut request_decoder = RequestDecoder::new();
            b.iter_batched_ref(
                || BytesMut::from(wire.as_str()),
                |bytes_mut| {
                    for _ in 0..case.requests() {
                        black_box(decode_request(&mut request_decoder, bytes_mut));
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(decoder, benchmark_request_decoder);
criterion_main!(decoder);
