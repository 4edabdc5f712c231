//! Fill Simulator Benchmarks
//!
//! Measures the cost of placing resting orders and scanning them for fills
//! against a tick price, the other hot path on every driver tick.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gridval_core::orderbook::{OrderBook, Side};
use gridval_core::position::Direction;
use rust_decimal_macros::dec;

fn place_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill_sim/place");
    group.significance_level(0.01).sample_size(1000);

    group.bench_function("single_order", |b| {
        let mut book = OrderBook::new(dec!(0.0002));
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            black_box(book.place(
                format!("bench-{n}"),
                "BTCUSDT".to_string(),
                Side::Buy,
                dec!(49000),
                dec!(0.01),
                Direction::Long,
                0,
                false,
                0,
            ));
        });
    });

    group.finish();
}

fn check_fills_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill_sim/check_fills");
    group.significance_level(0.01).sample_size(1000);

    group.bench_function("50_resting_orders", |b| {
        b.iter_batched(
            || {
                let mut book = OrderBook::new(dec!(0.0002));
                for i in 0..50 {
                    book.place(
                        format!("bench-{i}"),
                        "BTCUSDT".to_string(),
                        Side::Buy,
                        dec!(49000) - rust_decimal::Decimal::from(i),
                        dec!(0.01),
                        Direction::Long,
                        i as i32,
                        false,
                        0,
                    );
                }
                book
            },
            |mut book| black_box(book.check_fills(black_box(dec!(48000)), black_box(1), None)),
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, place_bench, check_fills_bench);
criterion_main!(benches);
