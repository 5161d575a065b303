//! Fixed-depth L2 order book.
//!
//! Each side is a contiguous vector kept sorted by price: bids descending
//! (best bid at index 0), asks ascending (best ask at index 0). Lookups and
//! insertions use binary search with a side-dependent comparator; inserts
//! and deletes shift within the vector, so every operation is O(depth) with
//! no allocation after construction.
//!
//! The book applies a depth-truncation policy: when a side is full, a new
//! price is inserted only if it is strictly better than the current worst
//! level, which is then dropped.

use ds_core::types::{BookSide, Level};

/// Invariant violations reported by [`L2Book::validate`].
#[derive(Debug, thiserror::Error)]
pub enum BookInvariantError {
    /// Adjacent levels out of order (or equal) for the side's sort order.
    #[error("{side:?} side unsorted at index {index}: {prev} then {next}")]
    Unsorted {
        side: BookSide,
        index: usize,
        prev: i64,
        next: i64,
    },
    /// A level with zero quantity was retained.
    #[error("{side:?} side retains empty level at index {index} (price {price_ticks})")]
    EmptyLevel {
        side: BookSide,
        index: usize,
        price_ticks: i64,
    },
    /// A side grew beyond the configured depth.
    #[error("{side:?} side holds {len} levels, depth is {depth}")]
    DepthExceeded {
        side: BookSide,
        len: usize,
        depth: usize,
    },
}

/// Fixed-depth L2 order book with sorted-vector sides.
#[derive(Debug, Clone)]
pub struct L2Book {
    depth: usize,
    bids: Vec<Level>,
    asks: Vec<Level>,
}

impl L2Book {
    /// Create an empty book bounded at `depth` levels per side.
    ///
    /// Capacity is reserved at `depth + 1` so an insert-then-drop sequence
    /// on a full side never reallocates.
    pub fn new(depth: usize) -> Self {
        assert!(depth > 0, "L2Book depth must be > 0");
        Self {
            depth,
            bids: Vec::with_capacity(depth + 1),
            asks: Vec::with_capacity(depth + 1),
        }
    }

    /// Configured maximum levels per side.
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Bid levels, best (highest price) first.
    #[inline]
    pub fn bids(&self) -> &[Level] {
        &self.bids
    }

    /// Ask levels, best (lowest price) first.
    #[inline]
    pub fn asks(&self) -> &[Level] {
        &self.asks
    }

    /// The `i`-th best level on a side, if present.
    #[inline]
    pub fn level(&self, side: BookSide, i: usize) -> Option<&Level> {
        self.side(side).get(i)
    }

    /// Best bid, if any.
    #[inline]
    pub fn best_bid(&self) -> Option<&Level> {
        self.bids.first()
    }

    /// Best ask, if any.
    #[inline]
    pub fn best_ask(&self) -> Option<&Level> {
        self.asks.first()
    }

    /// `true` if best bid >= best ask. A crossed book after an apply means
    /// the lineage is corrupt and the feed must resynchronise.
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price_ticks >= ask.price_ticks,
            _ => false,
        }
    }

    /// Drop all levels on both sides.
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    /// Apply an absolute level state.
    ///
    /// - Quantity zero deletes the price (no-op if absent).
    /// - An existing price has its quantity (and string forms) overwritten.
    /// - A new price is inserted at its sorted position if the side has
    ///   room, or if it is strictly better than the current worst level,
    ///   which is then dropped. Otherwise the update is ignored.
    pub fn update(&mut self, side: BookSide, level: Level) {
        if level.qty_lots == 0 {
            self.remove(side, level.price_ticks);
            return;
        }

        let depth = self.depth;
        let price = level.price_ticks;
        let levels = self.side_mut(side);

        match Self::search(levels, side, price) {
            Ok(i) => levels[i] = level,
            Err(pos) => {
                if levels.len() < depth {
                    levels.insert(pos, level);
                } else if pos < depth {
                    // Strictly better than the worst level: insert, then
                    // drop the level pushed past the depth bound.
                    levels.insert(pos, level);
                    levels.pop();
                }
                // pos == depth: worse than everything on a full side.
            }
        }
    }

    /// Delete the level at `price_ticks` on a side. No-op if absent.
    pub fn remove(&mut self, side: BookSide, price_ticks: i64) {
        let levels = self.side_mut(side);
        if let Ok(i) = Self::search(levels, side, price_ticks) {
            levels.remove(i);
        }
    }

    /// Check the book's structural invariants.
    ///
    /// Used by tests and property checks: each side strictly sorted (which
    /// also gives price uniqueness), no retained zero-quantity level, and
    /// no side beyond the configured depth.
    pub fn validate(&self) -> Result<(), BookInvariantError> {
        for side in [BookSide::Bid, BookSide::Ask] {
            let levels = self.side(side);
            if levels.len() > self.depth {
                return Err(BookInvariantError::DepthExceeded {
                    side,
                    len: levels.len(),
                    depth: self.depth,
                });
            }
            for (i, lvl) in levels.iter().enumerate() {
                if lvl.qty_lots == 0 {
                    return Err(BookInvariantError::EmptyLevel {
                        side,
                        index: i,
                        price_ticks: lvl.price_ticks,
                    });
                }
                if i > 0 {
                    let prev = levels[i - 1].price_ticks;
                    let ordered = match side {
                        BookSide::Bid => prev > lvl.price_ticks,
                        BookSide::Ask => prev < lvl.price_ticks,
                    };
                    if !ordered {
                        return Err(BookInvariantError::Unsorted {
                            side,
                            index: i,
                            prev,
                            next: lvl.price_ticks,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    #[inline]
    fn side(&self, side: BookSide) -> &Vec<Level> {
        match side {
            BookSide::Bid => &self.bids,
            BookSide::Ask => &self.asks,
        }
    }

    #[inline]
    fn side_mut(&mut self, side: BookSide) -> &mut Vec<Level> {
        match side {
            BookSide::Bid => &mut self.bids,
            BookSide::Ask => &mut self.asks,
        }
    }

    /// Binary search for `price` with the side's sort order.
    ///
    /// Bids are descending, so the comparator is flipped for them.
    #[inline]
    fn search(levels: &[Level], side: BookSide, price: i64) -> Result<usize, usize> {
        match side {
            BookSide::Bid => levels.binary_search_by(|l| price.cmp(&l.price_ticks)),
            BookSide::Ask => levels.binary_search_by(|l| l.price_ticks.cmp(&price)),
        }
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    /// An arbitrary stream of update operations: price in a narrow band so
    /// collisions and truncation both happen, qty possibly zero (delete).
    fn arb_ops(max_ops: usize) -> impl Strategy<Value = Vec<(bool, u32, u32)>> {
        proptest::collection::vec(
            (any::<bool>(), 1u32..60u32, 0u32..5u32),
            1..max_ops,
        )
    }

    proptest! {
        // Invariants hold after any sequence of updates and deletes.
        #[test]
        fn invariants_hold_after_random_ops(ops in arb_ops(200), depth in 1usize..16) {
            let mut book = L2Book::new(depth);
            for (is_bid, price, qty) in ops {
                let side = if is_bid { BookSide::Bid } else { BookSide::Ask };
                let level = Level::parse(&price.to_string(), &qty.to_string()).unwrap();
                book.update(side, level);
                prop_assert!(book.validate().is_ok(), "violated: {:?}", book.validate());
            }
        }
    }

    proptest! {
        // A full side never exceeds depth and keeps the best prices.
        #[test]
        fn truncation_keeps_best_prices(prices in proptest::collection::btree_set(1u32..1000, 1..50)) {
            let depth = 5usize;
            let mut book = L2Book::new(depth);
            for p in &prices {
                book.update(BookSide::Bid, Level::parse(&p.to_string(), "1").unwrap());
            }
            let mut expected: Vec<u32> = prices.iter().copied().collect();
            expected.sort_unstable_by(|a, b| b.cmp(a));
            expected.truncate(depth);

            let got: Vec<i64> = book.bids().iter().map(|l| l.price_ticks).collect();
            let expected_ticks: Vec<i64> = expected.iter().map(|p| i64::from(*p) * 100).collect();
            prop_assert_eq!(got, expected_ticks);
        }
    }
}
