//! Bybit spot orderbook adapter.
//!
//! WS-authoritative with no checksum: subscribing to `orderbook.<N>.<SYM>`
//! yields a `type: snapshot` message followed by `type: delta` updates
//! carrying a single `u` update id. Bybit re-sends a snapshot whenever its
//! own service resyncs, which the handler treats as a re-baseline.

use ds_core::config::FeedConfig;
use ds_core::types::{Incremental, Snapshot, Timestamp, VenueId};
use serde::Deserialize;

use super::{or_default, parse_level_rows, Endpoint, SyncMode, VenueCaps, WsBootstrapInfo};

/// Bybit adapter marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bybit;

#[derive(Debug, Deserialize)]
struct OrderbookMsg {
    #[serde(rename = "type", default)]
    msg_type: String,
    #[serde(default)]
    data: Option<OrderbookData>,
}

#[derive(Debug, Deserialize)]
struct OrderbookData {
    /// Update id; a single-step sequence.
    u: u64,
    #[serde(default)]
    b: Vec<Vec<String>>,
    #[serde(default)]
    a: Vec<Vec<String>>,
}

impl Bybit {
    pub fn caps(&self) -> VenueCaps {
        VenueCaps {
            sync_mode: SyncMode::WsAuthoritative,
            ws_sends_snapshot: true,
            ..Default::default()
        }
    }

    pub fn ws_endpoint(&self, cfg: &FeedConfig) -> Endpoint {
        Endpoint {
            host: or_default(&cfg.endpoints.ws_host, "stream.bybit.com"),
            port: or_default(&cfg.endpoints.ws_port, "443"),
            target: or_default(&cfg.endpoints.ws_path, "/v5/public/spot"),
        }
    }

    pub fn rest_endpoint(&self, cfg: &FeedConfig) -> Endpoint {
        Endpoint {
            host: or_default(&cfg.endpoints.rest_host, "api.bybit.com"),
            port: or_default(&cfg.endpoints.rest_port, "443"),
            target: String::new(),
        }
    }

    /// The stream only serves fixed depths; the subscription topic carries
    /// the configured one verbatim and the venue rejects unsupported sizes.
    pub fn ws_subscribe_frame(&self, cfg: &FeedConfig) -> String {
        let sym = VenueId::Bybit.ws_symbol(&cfg.feed.base, &cfg.feed.quote);
        serde_json::json!({
            "op": "subscribe",
            "args": [format!("orderbook.{}.{sym}", cfg.feed.depth_level)]
        })
        .to_string()
    }

    pub fn rest_snapshot_target(&self, _cfg: &FeedConfig) -> String {
        String::new()
    }

    pub fn ws_bootstrap_target(&self, _cfg: &FeedConfig) -> String {
        String::new()
    }

    pub fn parse_ws_bootstrap(&self, _body: &str, _connect_id: &str) -> Option<WsBootstrapInfo> {
        None
    }

    pub fn is_incremental(&self, msg: &str) -> bool {
        msg.contains("\"type\":\"delta\"")
    }

    pub fn is_snapshot(&self, msg: &str) -> bool {
        msg.contains("\"type\":\"snapshot\"")
    }

    pub fn parse_incremental(&self, msg: &str, ts_recv: Timestamp) -> Option<Incremental> {
        let raw: OrderbookMsg = match serde_json::from_str(msg) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "bybit delta parse failed");
                return None;
            }
        };
        if raw.msg_type != "delta" {
            return None;
        }
        let d = raw.data?;

        Some(Incremental {
            first_seq: d.u,
            last_seq: d.u,
            prev_last: d.u.saturating_sub(1),
            ts_recv,
            checksum: 0,
            bids: parse_level_rows(&d.b),
            asks: parse_level_rows(&d.a),
        })
    }

    pub fn parse_ws_snapshot(&self, msg: &str, ts_recv: Timestamp) -> Option<Snapshot> {
        let raw: OrderbookMsg = match serde_json::from_str(msg) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "bybit snapshot parse failed");
                return None;
            }
        };
        if raw.msg_type != "snapshot" {
            return None;
        }
        let d = raw.data?;

        Some(Snapshot {
            last_update_id: d.u,
            ts_recv,
            checksum: 0,
            bids: parse_level_rows(&d.b),
            asks: parse_level_rows(&d.a),
        })
    }

    pub fn parse_rest_snapshot(&self, _body: &str, _ts_recv: Timestamp) -> Option<Snapshot> {
        None
    }
}
