use std::hint::black_box;
use std::time::Instant;

use glam::Vec3;
use meridian_common::EntityId;
use meridian_stream::AoiGrid;

fn positions(entity_count: usize, spacing: f32) -> Vec<(EntityId, Vec3)> {
    let side = (entity_count as f32).sqrt().ceil() as usize;
    (0..entity_count)
        .map(|i| {
            let x = (i % side) as f32 * spacing;
            let z = (i / side) as f32 * spacing;
            (EntityId::new(i as u32, 0), Vec3::new(x, 0.0, z))
        })
        .collect()
}

fn bench_upsert(entity_count: usize, iterations: usize) {
    let placed = positions(entity_count, 4.0);
    let mut grid = AoiGrid::new(16.0).unwrap();

    let start = Instant::now();
    for i in 0..iterations {
        let shift = Vec3::new((i % 8) as f32 * 3.0, 0.0, 0.0);
        for (e, p) in &placed {
            black_box(grid.upsert(*e, black_box(*p + shift)));
        }
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  upsert ({entity_count} entities, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn bench_query(entity_count: usize, radius: f32, iterations: usize) {
    let mut grid = AoiGrid::new(16.0).unwrap();
    for (e, p) in positions(entity_count, 4.0) {
        grid.upsert(e, p);
    }

    let start = Instant::now();
    for _ in 0..iterations {
        let _ = black_box(grid.query_cells(black_box(Vec3::ZERO), black_box(radius)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  query ({entity_count} entities, r={radius}, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn main() {
    println!("=== AOI Grid Benchmarks ===\n");

    println!("Upsert (moving entities):");
    bench_upsert(100, 1000);
    bench_upsert(1000, 100);
    bench_upsert(10000, 10);

    println!("\nCandidate query:");
    bench_query(1000, 16.0, 10000);
    bench_query(1000, 50.0, 10000);
    bench_query(10000, 50.0, 1000);

    println!("\n=== Done ===");
}
