//! Benchmarks for `L2Book` operations using criterion.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use ds_core::types::{BookSide, Level};
use ds_market_data::orderbook::L2Book;

/// Build a book with `n` levels on each side around 50 000.
fn populated_book(depth: usize, n: usize) -> L2Book {
    let mut book = L2Book::new(depth);
    for i in 0..n {
        let bid = format!("{}.00", 50_000 - i as i64);
        let ask = format!("{}.00", 50_001 + i as i64);
        book.update(BookSide::Bid, Level::parse(&bid, "1.5").unwrap());
        book.update(BookSide::Ask, Level::parse(&ask, "1.5").unwrap());
    }
    book
}

fn bench_update_existing_level(c: &mut Criterion) {
    let mut book = populated_book(400, 400);
    let level = Level::parse("49900.00", "2.5").unwrap();

    c.bench_function("update_existing_level_depth400", |b| {
        b.iter(|| {
            book.update(BookSide::Bid, black_box(level.clone()));
        })
    });
}

fn bench_insert_and_truncate(c: &mut Criterion) {
    let mut book = populated_book(400, 400);

    c.bench_function("insert_best_full_book_depth400", |b| {
        let mut px = 50_001i64;
        b.iter(|| {
            // Always a fresh best bid, forcing insert-at-front + drop-worst.
            px += 1;
            let level = Level::parse(&format!("{px}.00"), "1.0").unwrap();
            book.update(BookSide::Bid, black_box(level));
        })
    });
}

fn bench_delete_and_reinsert(c: &mut Criterion) {
    let mut book = populated_book(400, 400);

    c.bench_function("delete_reinsert_mid_book_depth400", |b| {
        b.iter(|| {
            book.update(BookSide::Bid, Level::parse("49800.00", "0").unwrap());
            book.update(BookSide::Bid, Level::parse("49800.00", "1.0").unwrap());
        })
    });
}

fn bench_snapshot_rebuild(c: &mut Criterion) {
    let levels: Vec<Level> = (0..400)
        .map(|i| Level::parse(&format!("{}.00", 50_000 - i), "1.5").unwrap())
        .collect();

    c.bench_function("snapshot_rebuild_depth400", |b| {
        b.iter(|| {
            let mut book = L2Book::new(400);
            for lvl in &levels {
                book.update(BookSide::Bid, black_box(lvl.clone()));
            }
            book
        })
    });
}

criterion_group!(
    benches,
    bench_update_existing_level,
    bench_insert_and_truncate,
    bench_delete_and_reinsert,
    bench_snapshot_rebuild
);
criterion_main!(benches);
