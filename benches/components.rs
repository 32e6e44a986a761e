//! Component-level microbenchmarks for pngline.
//! Focuses on filtering, filter selection and whole-image encode/decode.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pngline::png::filter::{filter_row, unfilter_row, FilterType};
use pngline::png::strategy::FilterSelector;
use pngline::png::{FilterScore, FilterStrategy, PngReader, PngWriter, WriterOptions};
use pngline::ImageInfo;

fn make_random(len: usize, mut seed: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
        out.push((seed >> 16) as u8);
    }
    out
}

fn gradient_image(width: u32, height: u32) -> Vec<Vec<u8>> {
    (0..height)
        .map(|y| {
            let mut row = Vec::with_capacity((width * 3) as usize);
            for x in 0..width {
                let r = ((x * 255) / width) as u8;
                let g = ((y * 255) / height) as u8;
                let b = (((x + y) * 127) / (width + height)) as u8;
                row.extend_from_slice(&[r, g, b]);
            }
            row
        })
        .collect()
}

fn encode(info: ImageInfo, rows: &[Vec<u8>], opts: WriterOptions) -> Vec<u8> {
    let mut writer = PngWriter::with_options(Vec::new(), info, opts);
    for row in rows {
        writer.write_row_bytes(row).unwrap();
    }
    writer.finish().unwrap()
}

fn bench_filters(c: &mut Criterion) {
    let row = make_random(4096 * 3, 0x1234_5678);
    let prev = make_random(4096 * 3, 0x8765_4321);

    let mut group = c.benchmark_group("filter_row");
    group.throughput(Throughput::Bytes(row.len() as u64));
    for filter in FilterType::ALL {
        let id = BenchmarkId::new("filter", format!("{filter:?}"));
        group.bench_with_input(id, &filter, |b, &f| {
            let mut out = vec![0u8; row.len()];
            b.iter(|| filter_row(f, black_box(&row), black_box(&prev), 3, &mut out));
        });
        let id = BenchmarkId::new("unfilter", format!("{filter:?}"));
        group.bench_with_input(id, &filter, |b, &f| {
            let mut buf = row.clone();
            b.iter(|| unfilter_row(f, black_box(&mut buf), black_box(&prev), 3));
        });
    }
    group.finish();
}

fn bench_selector(c: &mut Criterion) {
    let info = ImageInfo::rgb(4096, 64, 8, false).unwrap();
    let row = make_random(info.bytes_per_row(), 7);
    let prev = make_random(info.bytes_per_row(), 11);

    let mut group = c.benchmark_group("filter_selector");
    group.throughput(Throughput::Bytes(row.len() as u64));
    for (name, score) in [("entropy", FilterScore::Entropy), ("sum_abs", FilterScore::SumAbs)] {
        group.bench_function(BenchmarkId::new("adaptive", name), |b| {
            let mut selector = FilterSelector::new(&info, FilterStrategy::Adaptive, score);
            let mut out = vec![0u8; row.len() + 1];
            let mut index = 0u64;
            b.iter(|| {
                index += 1;
                selector.filter_row(index, black_box(&row), black_box(&prev), 3, &mut out)
            });
        });
    }
    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let info = ImageInfo::rgb(512, 512, 8, false).unwrap();
    let rows = gradient_image(512, 512);
    let raw_len = (info.bytes_per_row() * rows.len()) as u64;

    let mut group = c.benchmark_group("codec_512x512_rgb");
    group.throughput(Throughput::Bytes(raw_len));
    group.sample_size(20);
    for (name, opts) in [
        ("fast", WriterOptions::fast()),
        ("balanced", WriterOptions::balanced()),
        ("max", WriterOptions::max_compression()),
        ("interlaced", WriterOptions::balanced().with_interlaced(true)),
    ] {
        group.bench_function(BenchmarkId::new("encode", name), |b| {
            b.iter(|| encode(info, black_box(&rows), opts.clone()));
        });
        let encoded = encode(info, &rows, opts.clone());
        group.bench_function(BenchmarkId::new("decode", name), |b| {
            b.iter(|| {
                let mut reader = PngReader::new(black_box(encoded.as_slice())).unwrap();
                let lines = reader.read_all().unwrap();
                reader.finish().unwrap();
                lines
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_filters, bench_selector, bench_codec);
criterion_main!(benches);
