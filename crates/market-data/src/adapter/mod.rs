//! Venue adapters: everything venue-specific behind one uniform surface.
//!
//! An adapter has a cold path, evaluated once at handler init (capability
//! flags, endpoints, the subscribe frame, the snapshot target) and a hot
//! path invoked per frame: cheap substring classifiers followed by full
//! JSON parsing into the generic formats. Parsers never fail loudly: a
//! malformed message yields `None` and a debug log, because venues
//! interleave control frames with data.
//!
//! Dispatch is a `match` over an enum of unit structs, so the hot parse
//! path is monomorphic.

pub mod binance;
pub mod bitget;
pub mod bybit;
pub mod kucoin;
pub mod okx;

use ds_core::config::FeedConfig;
use ds_core::types::{Incremental, Level, Snapshot, Timestamp, VenueId};

use crate::checksum::ChecksumFn;

pub use binance::Binance;
pub use bitget::Bitget;
pub use bybit::Bybit;
pub use kucoin::Kucoin;
pub use okx::Okx;

/// How a venue's book baseline is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// REST snapshot stitched onto the WS incremental stream.
    RestAnchored,
    /// The WS stream itself delivers the authoritative snapshot.
    WsAuthoritative,
}

/// Per-venue capability flags, resolved once at init.
#[derive(Clone, Copy)]
pub struct VenueCaps {
    pub sync_mode: SyncMode,
    /// The WS stream carries snapshot messages (possibly mid-stream).
    pub ws_sends_snapshot: bool,
    /// Messages carry a checksum to validate the book against.
    pub has_checksum: bool,
    /// A REST bootstrap call must precede the WS connection (KuCoin).
    pub requires_ws_bootstrap: bool,
    /// The controller may tolerate non-contiguous sequence numbers.
    pub allow_seq_gap: bool,
    /// Resolved checksum algorithm, when `has_checksum`.
    pub checksum_fn: Option<ChecksumFn>,
    /// Levels per side fed into the checksum.
    pub checksum_top_n: usize,
}

impl Default for VenueCaps {
    fn default() -> Self {
        Self {
            sync_mode: SyncMode::RestAnchored,
            ws_sends_snapshot: false,
            has_checksum: false,
            requires_ws_bootstrap: false,
            allow_seq_gap: false,
            checksum_fn: None,
            checksum_top_n: 25,
        }
    }
}

/// A resolved network endpoint; `target` is the WS path or REST request
/// target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: String,
    pub target: String,
}

/// WS endpoint override produced by a bootstrap call (KuCoin bullet).
#[derive(Debug, Clone, Default)]
pub struct WsBootstrapInfo {
    /// Endpoint to connect the WS to, token already baked into the target.
    pub ws: Endpoint,
    /// Server-advertised ping interval, 0 if absent.
    pub ping_interval_ms: u64,
    /// Server-advertised ping timeout, 0 if absent.
    pub ping_timeout_ms: u64,
}

/// The five venue adapters as one dispatchable value.
#[derive(Debug, Clone, Copy)]
pub enum VenueAdapter {
    Binance(Binance),
    Okx(Okx),
    Bitget(Bitget),
    Bybit(Bybit),
    Kucoin(Kucoin),
}

macro_rules! dispatch {
    ($self:ident, $a:ident => $body:expr) => {
        match $self {
            VenueAdapter::Binance($a) => $body,
            VenueAdapter::Okx($a) => $body,
            VenueAdapter::Bitget($a) => $body,
            VenueAdapter::Bybit($a) => $body,
            VenueAdapter::Kucoin($a) => $body,
        }
    };
}

impl VenueAdapter {
    /// Select the adapter for a venue.
    pub fn for_venue(venue: VenueId) -> Self {
        match venue {
            VenueId::Binance => VenueAdapter::Binance(Binance),
            VenueId::Okx => VenueAdapter::Okx(Okx),
            VenueId::Bitget => VenueAdapter::Bitget(Bitget),
            VenueId::Bybit => VenueAdapter::Bybit(Bybit),
            VenueId::Kucoin => VenueAdapter::Kucoin(Kucoin),
        }
    }

    // ── Cold path ──────────────────────────────────────────────────

    pub fn caps(&self) -> VenueCaps {
        dispatch!(self, a => a.caps())
    }

    pub fn ws_endpoint(&self, cfg: &FeedConfig) -> Endpoint {
        dispatch!(self, a => a.ws_endpoint(cfg))
    }

    pub fn rest_endpoint(&self, cfg: &FeedConfig) -> Endpoint {
        dispatch!(self, a => a.rest_endpoint(cfg))
    }

    /// Subscribe frame to send on WS open; empty when the stream path
    /// already encodes the subscription.
    pub fn ws_subscribe_frame(&self, cfg: &FeedConfig) -> String {
        dispatch!(self, a => a.ws_subscribe_frame(cfg))
    }

    /// REST request target for the depth snapshot; empty for venues that
    /// never take one.
    pub fn rest_snapshot_target(&self, cfg: &FeedConfig) -> String {
        dispatch!(self, a => a.rest_snapshot_target(cfg))
    }

    /// REST target of the pre-connect bootstrap call; empty when the venue
    /// needs none.
    pub fn ws_bootstrap_target(&self, cfg: &FeedConfig) -> String {
        dispatch!(self, a => a.ws_bootstrap_target(cfg))
    }

    /// Parse a bootstrap response into the WS endpoint override.
    pub fn parse_ws_bootstrap(&self, body: &str, connect_id: &str) -> Option<WsBootstrapInfo> {
        dispatch!(self, a => a.parse_ws_bootstrap(body, connect_id))
    }

    // ── Hot path ───────────────────────────────────────────────────

    pub fn is_incremental(&self, msg: &str) -> bool {
        dispatch!(self, a => a.is_incremental(msg))
    }

    /// Only meaningful for WS-authoritative venues; `false` elsewhere.
    pub fn is_snapshot(&self, msg: &str) -> bool {
        dispatch!(self, a => a.is_snapshot(msg))
    }

    pub fn parse_incremental(&self, msg: &str, ts_recv: Timestamp) -> Option<Incremental> {
        dispatch!(self, a => a.parse_incremental(msg, ts_recv))
    }

    pub fn parse_ws_snapshot(&self, msg: &str, ts_recv: Timestamp) -> Option<Snapshot> {
        dispatch!(self, a => a.parse_ws_snapshot(msg, ts_recv))
    }

    pub fn parse_rest_snapshot(&self, body: &str, ts_recv: Timestamp) -> Option<Snapshot> {
        dispatch!(self, a => a.parse_rest_snapshot(body, ts_recv))
    }
}

// ── Shared parsing helpers ─────────────────────────────────────────

/// Pick an override if set, else the venue default.
pub(crate) fn or_default(over: &str, default: &str) -> String {
    if over.is_empty() {
        default.to_string()
    } else {
        over.to_string()
    }
}

/// Parse `[["price","qty",...], ...]` rows into levels, skipping rows that
/// are short or not numeric. Extra columns (per-level sequence numbers,
/// order counts) are ignored.
pub(crate) fn parse_level_rows(rows: &[Vec<String>]) -> Vec<Level> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() < 2 {
            continue;
        }
        match Level::parse(&row[0], &row[1]) {
            Some(lvl) => out.push(lvl),
            None => {
                tracing::debug!(price = %row[0], qty = %row[1], "skipping unparseable level");
            }
        }
    }
    out
}

/// Lenient u64 extraction: venues flip between JSON numbers and strings
/// for sequence fields across API revisions.
pub(crate) fn value_to_u64(v: &serde_json::Value) -> Option<u64> {
    match v {
        serde_json::Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Some(u)
            } else {
                n.as_i64().and_then(|i| u64::try_from(i).ok())
            }
        }
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Lenient i64 extraction, same flexibility as [`value_to_u64`].
pub(crate) fn value_to_i64(v: &serde_json::Value) -> Option<i64> {
    match v {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
