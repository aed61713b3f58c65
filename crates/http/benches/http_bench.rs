use std::hint::black_box;

use bytes::Bytes;
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ember_http::buf::RingBuf;
use ember_http::codec::{ChunkedDecoder, ChunkedEncoder, Decoder, Encoder, HeaderDecoder};
use ember_http::protocol::PayloadItem;

const SMALL_HEADER: &str = "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";

const LARGE_HEADER: &str = "GET /docs/index.html?lang=en&page=3 HTTP/1.1\r\n\
Host: device.local:8080\r\n\
User-Agent: Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0\r\n\
Accept: text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8\r\n\
Accept-Language: en-US,en;q=0.5\r\n\
Accept-Encoding: gzip, deflate\r\n\
Referer: http://device.local:8080/\r\n\
Cookie: ember-session=4f2a9c0e1b7d3a5f; theme=dark\r\n\
Cookie: lang=en\r\n\
Authorization: Basic YWRtaW46c2VjcmV0\r\n\
If-Modified-Since: Wed, 21 Oct 2015 07:28:00 GMT\r\n\
Connection: keep-alive\r\n\
Cache-Control: max-age=0\r\n\r\n";

fn ring_buf(content: &[u8]) -> RingBuf {
    let mut buf = RingBuf::unbounded(content.len());
    buf.put_slice(content);
    buf
}

fn benchmark_header_decoder(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("header_decoder");

    for (name, content) in [("small_header", SMALL_HEADER), ("large_header", LARGE_HEADER)] {
        group.throughput(Throughput::Bytes(content.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), content, |b, content| {
            let mut decoder = HeaderDecoder::default();
            b.iter_batched_ref(
                || ring_buf(content.as_bytes()),
                |buf| black_box(decoder.decode(buf).expect("input should be a valid request header")),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn encoded_chunks(chunk_size: usize, chunks: usize) -> Vec<u8> {
    let mut encoder = ChunkedEncoder::new();
    let mut dst = RingBuf::unbounded(chunk_size * chunks + 16 * chunks);
    let payload = Bytes::from(vec![b'x'; chunk_size]);
    for _ in 0..chunks {
        encoder.encode(PayloadItem::Chunk(payload.clone()), &mut dst).expect("chunk should encode");
    }
    encoder.encode(PayloadItem::<Bytes>::Eof, &mut dst).expect("eof should encode");
    dst.take_vec()
}

fn benchmark_chunked_decoder(criterion: &mut Criterion) {
    let mut group = criterion.benchmark_group("chunked_decoder");

    for (chunk_size, chunks) in [(64, 64), (8 * 1024, 8)] {
        let encoded = encoded_chunks(chunk_size, chunks);
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::new("chunks", format!("{chunks}x{chunk_size}")), &encoded, |b, encoded| {
            b.iter_batched_ref(
                || (ChunkedDecoder::new(), ring_buf(encoded)),
                |(decoder, buf)| {
                    while let Some(item) = decoder.decode(buf).expect("input should be a valid chunked body") {
                        if item.is_eof() {
                            break;
                        }
                        black_box(item);
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(codec, benchmark_header_decoder, benchmark_chunked_decoder);
criterion_main!(codec);
