//! Benchmark: compile a small record map, then decode a synthetic buffer of records with and
//! without trace output, plus the specialization probe on its own.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use structmap::walk::match_child;
use structmap::{compile, BitCursor, CompileOptions, DecodeOptions, Decoder, Endianness, ExprEvaluator};

const MAP: &str = r#"
#define MAX_RECORDS 4096
struct Record { uint8 tag; uint8 len; };
struct Point : inherits Record { uint8 tag = 1; uint8 len; int16 x; int16 y; };
struct Label : inherits Record { uint8 tag = 2; uint8 len; char text[len]; };
struct Main {
    char4 magic = "RECS";
    uint16 count;
    uint8 version:4;
    uint8 flags:4;
    if (flags & 1) { uint32 checksum; }
    Record records[count];
};
"#;

fn buffer(records: u16) -> Vec<u8> {
    let mut data = b"RECS".to_vec();
    data.extend_from_slice(&records.to_le_bytes());
    data.push(0x11);
    data.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
    for i in 0..records {
        if i % 2 == 0 {
            data.extend_from_slice(&[1, 4]);
            data.extend_from_slice(&(i as i16).to_le_bytes());
            data.extend_from_slice(&(-(i as i16)).to_le_bytes());
        } else {
            data.extend_from_slice(&[2, 5]);
            data.extend_from_slice(b"label");
        }
    }
    data
}

fn bench_decode(c: &mut Criterion) {
    let compiled = compile(MAP, &CompileOptions::default());
    assert!(compiled.success(), "{}", compiled.error_log());
    let map = compiled.map;
    let evaluator = ExprEvaluator::new();
    let decoder = Decoder::new(&map, &evaluator);
    let data = buffer(1000);
    let options = DecodeOptions::default();

    c.bench_function("compile_record_map", |b| {
        b.iter(|| black_box(compile(black_box(MAP), &CompileOptions::default()).map.len()))
    });

    c.bench_function("decode_1000_records_sink", |b| {
        b.iter(|| {
            let mut sink = std::io::sink();
            black_box(decoder.decode(black_box(&data), &options, &mut sink).ok())
        })
    });

    c.bench_function("decode_1000_records_trace", |b| {
        let mut out = Vec::with_capacity(64 * 1024);
        b.iter(|| {
            out.clear();
            let r = decoder.decode(black_box(&data), &options, &mut out).ok();
            black_box((r, out.len()))
        })
    });

    let record = map.find("Record").expect("Record");
    c.bench_function("match_child_label", |b| {
        let cursor = BitCursor::new(&data[17..]);
        b.iter(|| black_box(match_child(&map, record, black_box(cursor), Endianness::Little, &evaluator)))
    });
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
