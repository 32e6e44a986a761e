//! Property tests: whatever the writer emits the reader gives back.

use pngline::png::bit_depth::{pack_row, unpack_row};
use pngline::png::filter::{filter_row, unfilter_row, FilterType};
use pngline::png::interlace::InterlaceScheduler;
use pngline::png::{FilterStrategy, PngReader, PngWriter, WriterOptions};
use pngline::{ColorType, ImageInfo};
use proptest::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};

const LAYOUTS: [(ColorType, u8); 15] = [
    (ColorType::Gray, 1),
    (ColorType::Gray, 2),
    (ColorType::Gray, 4),
    (ColorType::Gray, 8),
    (ColorType::Gray, 16),
    (ColorType::GrayAlpha, 8),
    (ColorType::GrayAlpha, 16),
    (ColorType::Rgb, 8),
    (ColorType::Rgb, 16),
    (ColorType::Rgba, 8),
    (ColorType::Rgba, 16),
    (ColorType::Indexed, 1),
    (ColorType::Indexed, 2),
    (ColorType::Indexed, 4),
    (ColorType::Indexed, 8),
];

const STRATEGIES: [FilterStrategy; 9] = [
    FilterStrategy::None,
    FilterStrategy::Sub,
    FilterStrategy::Up,
    FilterStrategy::Average,
    FilterStrategy::Paeth,
    FilterStrategy::Default,
    FilterStrategy::Cyclic,
    FilterStrategy::Adaptive,
    FilterStrategy::AdaptiveSampled { interval: 3 },
];

fn random_image(info: &ImageInfo, seed: u64) -> Vec<Vec<u16>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let max = ((1u32 << info.bit_depth()) - 1) as u16;
    (0..info.rows())
        .map(|_| {
            (0..info.samples_per_row())
                .map(|_| rng.gen_range(0..=max))
                .collect()
        })
        .collect()
}

fn encode(info: ImageInfo, rows: &[Vec<u16>], opts: WriterOptions) -> Vec<u8> {
    let mut writer = PngWriter::with_options(Vec::new(), info, opts);
    if info.indexed() {
        let entries = 1usize << info.bit_depth().min(8);
        let palette: Vec<[u8; 3]> = (0..entries).map(|i| [i as u8, 0, 255 - i as u8]).collect();
        writer.metadata_mut().set_palette(&palette).unwrap();
    }
    for row in rows {
        writer.write_row(row).unwrap();
    }
    writer.finish().unwrap()
}

fn decode(bytes: &[u8]) -> Vec<Vec<u16>> {
    let mut reader = PngReader::new(bytes).unwrap();
    reader.set_unpacked(true);
    let rows = reader.info().rows();
    let out = (0..rows)
        .map(|y| reader.read_row(y).unwrap().samples().to_vec())
        .collect();
    reader.finish().unwrap();
    out
}

fn image_case() -> impl Strategy<Value = (usize, u32, u32, bool, usize, u64)> {
    (
        0..LAYOUTS.len(),
        1u32..24,
        1u32..24,
        any::<bool>(),
        0..STRATEGIES.len(),
        any::<u64>(),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_write_then_read_is_lossless(
        (layout, w, h, interlaced, strategy, seed) in image_case()
    ) {
        let (color, depth) = LAYOUTS[layout];
        let info = ImageInfo::with_color(w, h, depth, color).unwrap();
        let rows = random_image(&info, seed);
        let opts = WriterOptions::default()
            .with_interlaced(interlaced)
            .with_filter_strategy(STRATEGIES[strategy])
            .with_idat_max_size(64);
        let bytes = encode(info, &rows, opts);
        prop_assert_eq!(decode(&bytes), rows);
    }

    #[test]
    fn prop_unfilter_inverts_filter(
        row in proptest::collection::vec(any::<u8>(), 1..96),
        seed in any::<u64>(),
        bpp in 1usize..=8,
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let prev: Vec<u8> = (0..row.len()).map(|_| rng.gen()).collect();
        for filter in FilterType::ALL {
            let mut out = vec![0u8; row.len()];
            filter_row(filter, &row, &prev, bpp, &mut out);
            unfilter_row(filter, &mut out, &prev, bpp);
            prop_assert_eq!(&out, &row);
        }
    }

    #[test]
    fn prop_pack_inverts_unpack(
        depth in prop::sample::select(vec![1u8, 2, 4]),
        cols in 1u32..64,
        seed in any::<u64>(),
    ) {
        let info = ImageInfo::gray(cols, 1, depth, false).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut packed: Vec<u8> = (0..info.bytes_per_row()).map(|_| rng.gen()).collect();
        // Padding bits of the last byte are always written as zero.
        let used_bits = info.bits_per_pixel() * cols as usize;
        let spare = info.bytes_per_row() * 8 - used_bits;
        if let Some(last) = packed.last_mut() {
            *last &= !((1u16 << spare) - 1) as u8;
        }
        let mut samples = vec![0u8; info.samples_per_row()];
        unpack_row(&info, &packed, &mut samples, false);
        let mut repacked = vec![0u8; info.bytes_per_row()];
        pack_row(&info, &samples, &mut repacked, false);
        prop_assert_eq!(repacked, packed);
    }

    #[test]
    fn prop_interlace_covers_every_pixel_once(w in 1u32..48, h in 1u32..48) {
        let mut seen = vec![0u8; (w * h) as usize];
        let mut scheduler = InterlaceScheduler::new(w, h);
        while !scheduler.is_finished() {
            let geometry = *scheduler.geometry();
            let y = scheduler.image_row();
            for j in 0..geometry.cols {
                seen[(y * w + geometry.image_col(j)) as usize] += 1;
            }
            scheduler.advance();
        }
        prop_assert!(seen.iter().all(|&n| n == 1));
    }
}

#[test]
fn extreme_rows_survive_every_filter() {
    let info = ImageInfo::rgb(17, 4, 16, true).unwrap();
    let rows = vec![
        vec![0u16; info.samples_per_row()],
        vec![u16::MAX; info.samples_per_row()],
        vec![0u16; info.samples_per_row()],
        vec![u16::MAX; info.samples_per_row()],
    ];
    for strategy in STRATEGIES {
        let opts = WriterOptions::default().with_filter_strategy(strategy);
        let bytes = encode(info, &rows, opts);
        assert_eq!(decode(&bytes), rows, "{strategy:?}");
    }
}

#[test]
fn interlaced_and_progressive_decode_alike() {
    let info = ImageInfo::rgb(37, 29, 8, false).unwrap();
    let rows = random_image(&info, 7);
    let plain = encode(info, &rows, WriterOptions::default());
    let interlaced = encode(info, &rows, WriterOptions::default().with_interlaced(true));
    assert_ne!(plain, interlaced);
    assert_eq!(decode(&plain), decode(&interlaced));

    let mut reader = PngReader::new(interlaced.as_slice()).unwrap();
    assert!(reader.is_interlaced());
    // Rows of an interlaced image come in any order.
    assert_eq!(reader.read_row(20).unwrap().samples(), &rows[20][..]);
    assert_eq!(reader.read_row(3).unwrap().samples(), &rows[3][..]);
}
