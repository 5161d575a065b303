//! Generic snapshot and incremental formats.
//!
//! Venue adapters parse wire messages into these two structures; the book
//! controller consumes them without knowing which venue they came from.

use super::level::Level;
use super::timestamp::Timestamp;

/// A full book baseline at a venue sequence number.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Last venue sequence the snapshot includes.
    pub last_update_id: u64,
    /// Local receive time.
    pub ts_recv: Timestamp,
    /// Venue-supplied checksum, 0 when the venue has none.
    pub checksum: i64,
    /// Bid levels, order as received.
    pub bids: Vec<Level>,
    /// Ask levels, order as received.
    pub asks: Vec<Level>,
}

/// An incremental depth update covering a sequence range.
///
/// Each level entry is the *absolute* state at that price; `qty_lots == 0`
/// deletes the level. Venues with single-id sequencing set
/// `first_seq == last_seq` and `prev_last = first_seq - 1`.
#[derive(Debug, Clone, Default)]
pub struct Incremental {
    /// Lowest venue sequence covered (inclusive).
    pub first_seq: u64,
    /// Highest venue sequence covered (inclusive).
    pub last_seq: u64,
    /// Last sequence the venue applied before this message, for chained
    /// verification. Zero when the venue does not provide it.
    pub prev_last: u64,
    /// Local receive time.
    pub ts_recv: Timestamp,
    /// Venue-supplied checksum, 0 when the venue has none.
    pub checksum: i64,
    /// Bid level changes.
    pub bids: Vec<Level>,
    /// Ask level changes.
    pub asks: Vec<Level>,
}

impl Incremental {
    /// `true` when the venue attached sequence information.
    #[inline]
    pub fn has_sequence(&self) -> bool {
        self.last_seq != 0
    }
}
