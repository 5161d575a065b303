//! Book controller: snapshot application, incremental reconciliation, and
//! checksum gating.
//!
//! The controller owns the [`L2Book`] and the sequence arithmetic that keeps
//! it consistent with the venue feed. It is deliberately I/O-free: the feed
//! handler decides *when* messages arrive (buffering, draining, reconnects),
//! the controller decides *whether* they fit the current lineage.

use ds_core::types::{BookSide, Incremental, Snapshot};

use crate::checksum::ChecksumFn;
use crate::orderbook::L2Book;

/// Controller synchronisation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSyncState {
    /// No baseline yet; incrementals cannot be applied.
    WaitingSnapshot,
    /// Baseline loaded from REST; the first incremental covering
    /// `last_seq + 1` promotes the book to `Synced`.
    WaitingBridge,
    /// Book mirrors the venue within protocol guarantees.
    Synced,
}

/// Where a snapshot baseline came from, which decides the post-apply state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineKind {
    /// REST snapshot that must be bridged to the WS stream.
    RestAnchored,
    /// WS snapshot that *is* the authoritative stream position.
    WsAuthoritative,
}

/// Outcome of feeding a message to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Message consumed (applied or legitimately ignored).
    None,
    /// Lineage broken: the caller must clear state and resynchronise.
    NeedResync,
}

/// Order book plus the sequencing state machine around it.
pub struct BookController {
    book: L2Book,
    state: BookSyncState,
    /// Highest venue sequence applied to the book.
    last_seq: u64,
    /// Next sequence the venue must cover: `last_seq + 1`.
    expected_seq: u64,
    checksum_fn: Option<ChecksumFn>,
    checksum_top_n: usize,
    allow_seq_gap: bool,
}

impl BookController {
    /// Create a controller with an empty book of the given depth.
    pub fn new(depth: usize) -> Self {
        Self {
            book: L2Book::new(depth),
            state: BookSyncState::WaitingSnapshot,
            last_seq: 0,
            expected_seq: 0,
            checksum_fn: None,
            checksum_top_n: 25,
            allow_seq_gap: false,
        }
    }

    /// Install the venue's checksum policy. `None` disables validation.
    pub fn configure_checksum(&mut self, f: Option<ChecksumFn>, top_n: usize) {
        self.checksum_fn = f;
        self.checksum_top_n = top_n;
    }

    /// Tolerate non-contiguous sequences by jumping `expected_seq` forward.
    ///
    /// Only for venues whose partial snapshot can legally trail the first
    /// incremental (KuCoin level-2); everywhere else a gap means data loss.
    pub fn set_allow_seq_gap(&mut self, allow: bool) {
        self.allow_seq_gap = allow;
    }

    /// Read access to the book.
    pub fn book(&self) -> &L2Book {
        &self.book
    }

    /// Current synchronisation state.
    pub fn state(&self) -> BookSyncState {
        self.state
    }

    /// `true` once the book is synced to the stream.
    pub fn is_synced(&self) -> bool {
        self.state == BookSyncState::Synced
    }

    /// Highest applied venue sequence.
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Drop the book and all sequencing state.
    pub fn reset(&mut self) {
        self.book.clear();
        self.state = BookSyncState::WaitingSnapshot;
        self.last_seq = 0;
        self.expected_seq = 0;
    }

    /// Apply a full snapshot as the new baseline.
    ///
    /// Clears the book, applies the snapshot's levels sorted best-first,
    /// and anchors the sequence counters at `snap.last_update_id`. With
    /// checksum support enabled the snapshot must carry a non-zero checksum
    /// that validates against the rebuilt book; otherwise the book is
    /// cleared again and the caller must resync.
    pub fn on_snapshot(&mut self, snap: &Snapshot, kind: BaselineKind) -> Action {
        self.book.clear();

        let mut bids = snap.bids.clone();
        let mut asks = snap.asks.clone();
        bids.sort_by(|x, y| y.price_ticks.cmp(&x.price_ticks));
        asks.sort_by(|x, y| x.price_ticks.cmp(&y.price_ticks));

        for lvl in bids {
            self.book.update(BookSide::Bid, lvl);
        }
        for lvl in asks {
            self.book.update(BookSide::Ask, lvl);
        }

        self.last_seq = snap.last_update_id;
        self.expected_seq = self.last_seq + 1;

        if self.book.is_crossed() {
            tracing::warn!(seq = snap.last_update_id, "snapshot produced a crossed book");
            self.book.clear();
            self.state = BookSyncState::WaitingSnapshot;
            return Action::NeedResync;
        }

        if let Some(f) = self.checksum_fn {
            if snap.checksum == 0 || !f(&self.book, snap.checksum, self.checksum_top_n) {
                tracing::warn!(
                    seq = snap.last_update_id,
                    checksum = snap.checksum,
                    "snapshot checksum validation failed"
                );
                self.book.clear();
                self.state = BookSyncState::WaitingSnapshot;
                return Action::NeedResync;
            }
        }

        self.state = match kind {
            BaselineKind::WsAuthoritative => BookSyncState::Synced,
            BaselineKind::RestAnchored => BookSyncState::WaitingBridge,
        };

        tracing::debug!(
            seq = snap.last_update_id,
            bids = self.book.bids().len(),
            asks = self.book.asks().len(),
            state = ?self.state,
            "snapshot applied"
        );

        Action::None
    }

    /// Apply an incremental update, enforcing the bridging rule.
    ///
    /// With sequence information present:
    /// - `last_seq < expected`: pre-baseline overlap, ignored;
    /// - `first_seq > expected`: a gap, so resync, unless the venue allows
    ///   sequence gaps, in which case `expected_seq` jumps forward;
    /// - otherwise the message covers `expected` and is applied.
    ///
    /// Without sequence information the message is applied only when a
    /// checksum guards integrity. After any application, an enabled
    /// checksum is validated; a mismatch clears the book and demands
    /// resync.
    pub fn on_increment(&mut self, inc: &Incremental) -> Action {
        if self.state == BookSyncState::WaitingSnapshot {
            // The handler buffers for us while a snapshot is in flight.
            return Action::None;
        }

        if inc.has_sequence() {
            let required = self.expected_seq;

            if inc.last_seq < required {
                tracing::trace!(
                    first = inc.first_seq,
                    last = inc.last_seq,
                    required,
                    "dropping pre-baseline incremental"
                );
                return Action::None;
            }

            if inc.first_seq > required {
                if !self.allow_seq_gap {
                    tracing::warn!(
                        first = inc.first_seq,
                        last = inc.last_seq,
                        required,
                        "sequence gap detected"
                    );
                    return Action::NeedResync;
                }
                tracing::debug!(
                    first = inc.first_seq,
                    required,
                    "tolerating sequence gap, jumping forward"
                );
            }

            self.apply_levels(inc);
            self.last_seq = inc.last_seq;
            self.expected_seq = self.last_seq + 1;
        } else if self.checksum_fn.is_some() {
            // No sequencing from this venue; the checksum below is the
            // only integrity guard.
            self.apply_levels(inc);
        } else {
            tracing::warn!("incremental carries neither sequence nor checksum");
            return Action::NeedResync;
        }

        if self.book.is_crossed() {
            tracing::warn!(last_seq = self.last_seq, "incremental crossed the book");
            self.book.clear();
            self.state = BookSyncState::WaitingSnapshot;
            return Action::NeedResync;
        }

        if let Some(f) = self.checksum_fn {
            let missing = inc.checksum == 0 && !inc.has_sequence();
            let valid =
                !missing && (inc.checksum == 0 || f(&self.book, inc.checksum, self.checksum_top_n));
            if !valid {
                tracing::warn!(
                    last_seq = self.last_seq,
                    checksum = inc.checksum,
                    "incremental checksum validation failed"
                );
                self.book.clear();
                self.state = BookSyncState::WaitingSnapshot;
                return Action::NeedResync;
            }
        }

        if self.state == BookSyncState::WaitingBridge {
            tracing::debug!(last_seq = self.last_seq, "bridged to stream");
            self.state = BookSyncState::Synced;
        }

        Action::None
    }

    fn apply_levels(&mut self, inc: &Incremental) {
        for lvl in &inc.bids {
            self.book.update(BookSide::Bid, lvl.clone());
        }
        for lvl in &inc.asks {
            self.book.update(BookSide::Ask, lvl.clone());
        }
    }
}
