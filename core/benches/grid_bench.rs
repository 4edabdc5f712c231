//! Grid State Engine Benchmarks
//!
//! Measures the cost of building and rebalancing a grid, the hottest path
//! on every tick of the backtest/replay driver.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gridval_core::grid::{Grid, GridConfig};
use rust_decimal_macros::dec;

fn build_grid_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid/build_grid");
    group.significance_level(0.01).sample_size(1000);

    group.bench_function("50_levels", |b| {
        b.iter(|| {
            let mut grid = Grid::new(GridConfig::default());
            grid.build_grid(black_box(dec!(50000)));
            black_box(&grid);
        });
    });

    group.bench_function("500_levels", |b| {
        let config = GridConfig { grid_count: 500, ..GridConfig::default() };
        b.iter(|| {
            let mut grid = Grid::new(config.clone());
            grid.build_grid(black_box(dec!(50000)));
            black_box(&grid);
        });
    });

    group.finish();
}

fn update_grid_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("grid/update_grid");
    group.significance_level(0.01).sample_size(1000);

    group.bench_function("no_rebalance", |b| {
        let mut grid = Grid::new(GridConfig::default());
        grid.build_grid(dec!(50000));
        b.iter(|| {
            grid.update_grid(black_box(Some(dec!(50001))), black_box(None));
        });
    });

    group.bench_function("rebalance", |b| {
        let mut grid = Grid::new(GridConfig::default());
        grid.build_grid(dec!(50000));
        b.iter(|| {
            grid.update_grid(black_box(Some(dec!(50000))), black_box(Some(dec!(55000))));
        });
    });

    group.finish();
}

criterion_group!(benches, build_grid_bench, update_grid_bench);
criterion_main!(benches);
