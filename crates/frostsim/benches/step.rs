//! Explicit-array backend benchmarks
//!
//! Measures the per-tick cost of the CPU path at common grid sizes:
//! - wave step alone
//! - texture encode alone
//! - stimulus rasterization

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use frostsim::simulation::{rasterize, HeightBuffer, NormalHeightTexture, WaveParams};
use frostsim::{FrostConfig, GridSize, Point, StimulusEvent};

const SCREENS: [(u32, u32); 3] = [(1280, 720), (1920, 1080), (3840, 2160)];

fn seeded_field(size: GridSize) -> HeightBuffer {
    let mut field = HeightBuffer::new(size).unwrap();
    for i in 0..64 {
        let p = Point::new((i * 37) % size.width as i32, (i * 23) % size.height as i32);
        rasterize(&mut field, &StimulusEvent::point(p, 0.8).unwrap());
    }
    field
}

/// Benchmark one wave step
fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("frost/step");
    let config = FrostConfig::default();
    let params = WaveParams::new(&config, config.wave.tick_dt, 1.0);

    for (w, h) in SCREENS {
        let size = GridSize::for_screen(w, h, config.grid.short_edge).unwrap();
        group.throughput(Throughput::Elements(size.cells() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", size.width, size.height)),
            &size,
            |b, &size| {
                let mut field = seeded_field(size);
                b.iter(|| {
                    field.step(black_box(&params));
                });
            },
        );
    }

    group.finish();
}

/// Benchmark texture encoding
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frost/encode");
    let config = FrostConfig::default();

    for (w, h) in SCREENS {
        let size = GridSize::for_screen(w, h, config.grid.short_edge).unwrap();
        group.throughput(Throughput::Elements(size.cells() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", size.width, size.height)),
            &size,
            |b, &size| {
                let field = seeded_field(size);
                let mut texture = NormalHeightTexture::new(size).unwrap();
                b.iter(|| {
                    texture.encode_from(black_box(&field), config.encode.normal_gain);
                });
            },
        );
    }

    group.finish();
}

/// Benchmark stimulus rasterization
fn bench_rasterize(c: &mut Criterion) {
    let mut group = c.benchmark_group("frost/rasterize");
    let size = GridSize::new(455, 256).unwrap();

    let line = StimulusEvent::line(Point::new(10, 200), Point::new(440, 20), 0.2).unwrap();
    let wedge =
        StimulusEvent::triangle(Point::new(-2000, 0), Point::new(227, 256), Point::new(0, 256), 0.0)
            .unwrap();

    group.bench_function("line", |b| {
        let mut field = HeightBuffer::new(size).unwrap();
        b.iter(|| rasterize(&mut field, black_box(&line)));
    });

    group.bench_function("wiper_triangle", |b| {
        let mut field = HeightBuffer::new(size).unwrap();
        b.iter(|| rasterize(&mut field, black_box(&wedge)));
    });

    group.finish();
}

criterion_group!(benches, bench_step, bench_encode, bench_rasterize);
criterion_main!(benches);
