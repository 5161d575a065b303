//! Core types for the depthstream engine.
//!
//! Everything here is hot-path friendly: prices and quantities are
//! exchange-normalised integers, timestamps are raw nanoseconds, and the
//! generic message formats carry pre-parsed levels so the controller never
//! touches JSON.

pub mod level;
pub mod message;
pub mod timestamp;
pub mod venue;

// Re-export primary types for convenient access via `ds_core::types::*`.
pub use level::{parse_price_ticks, parse_qty_lots, BookSide, Level};
pub use message::{Incremental, Snapshot};
pub use timestamp::Timestamp;
pub use venue::VenueId;
