//! Bitget spot books adapter.
//!
//! WS-authoritative like OKX, with a single `seq` id per message and a
//! CRC32 checksum over the top-25 textual levels. Sequence and checksum
//! fields have flipped between numbers and strings across API revisions,
//! so both are extracted leniently.

use ds_core::config::FeedConfig;
use ds_core::types::{Incremental, Snapshot, Timestamp, VenueId};
use serde::Deserialize;

use super::{
    or_default, parse_level_rows, value_to_i64, value_to_u64, Endpoint, SyncMode, VenueCaps,
    WsBootstrapInfo,
};
use crate::checksum::crc32_interleaved;

/// Bitget adapter marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bitget;

#[derive(Debug, Deserialize)]
struct BooksMsg {
    #[serde(default)]
    action: String,
    #[serde(default)]
    data: Vec<BooksData>,
}

#[derive(Debug, Deserialize)]
struct BooksData {
    /// Number or string depending on API revision.
    #[serde(default)]
    seq: serde_json::Value,
    #[serde(default)]
    checksum: serde_json::Value,
    #[serde(default)]
    bids: Vec<Vec<String>>,
    #[serde(default)]
    asks: Vec<Vec<String>>,
}

fn looks_like_books(msg: &str) -> bool {
    msg.contains("\"channel\":\"books") && msg.contains("\"data\"")
}

impl Bitget {
    pub fn caps(&self) -> VenueCaps {
        VenueCaps {
            sync_mode: SyncMode::WsAuthoritative,
            ws_sends_snapshot: true,
            has_checksum: true,
            checksum_fn: Some(crc32_interleaved),
            checksum_top_n: 25,
            ..Default::default()
        }
    }

    pub fn ws_endpoint(&self, cfg: &FeedConfig) -> Endpoint {
        Endpoint {
            host: or_default(&cfg.endpoints.ws_host, "ws.bitget.com"),
            port: or_default(&cfg.endpoints.ws_port, "443"),
            target: or_default(&cfg.endpoints.ws_path, "/v2/ws/public"),
        }
    }

    pub fn rest_endpoint(&self, cfg: &FeedConfig) -> Endpoint {
        Endpoint {
            host: or_default(&cfg.endpoints.rest_host, "api.bitget.com"),
            port: or_default(&cfg.endpoints.rest_port, "443"),
            target: String::new(),
        }
    }

    pub fn ws_subscribe_frame(&self, cfg: &FeedConfig) -> String {
        let inst_id = VenueId::Bitget.ws_symbol(&cfg.feed.base, &cfg.feed.quote);
        serde_json::json!({
            "op": "subscribe",
            "args": [{"instType": "SPOT", "channel": "books", "instId": inst_id}]
        })
        .to_string()
    }

    /// No REST snapshot: the WS snapshot is the baseline.
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
        looks_like_books(msg) && msg.contains("\"action\":\"update\"")
    }

    pub fn is_snapshot(&self, msg: &str) -> bool {
        looks_like_books(msg) && msg.contains("\"action\":\"snapshot\"")
    }

    pub fn parse_incremental(&self, msg: &str, ts_recv: Timestamp) -> Option<Incremental> {
        let raw: BooksMsg = match serde_json::from_str(msg) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "bitget update parse failed");
                return None;
            }
        };
        if raw.action != "update" {
            return None;
        }
        let d0 = raw.data.first()?;

        let seq = value_to_u64(&d0.seq)?;
        Some(Incremental {
            first_seq: seq,
            last_seq: seq,
            prev_last: seq.saturating_sub(1),
            ts_recv,
            checksum: value_to_i64(&d0.checksum).unwrap_or(0),
            bids: parse_level_rows(&d0.bids),
            asks: parse_level_rows(&d0.asks),
        })
    }

    pub fn parse_ws_snapshot(&self, msg: &str, ts_recv: Timestamp) -> Option<Snapshot> {
        let raw: BooksMsg = match serde_json::from_str(msg) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "bitget snapshot parse failed");
                return None;
            }
        };
        if raw.action != "snapshot" {
            return None;
        }
        let d0 = raw.data.first()?;

        Some(Snapshot {
            // seq anchors the lineage; ts is ignored.
            last_update_id: value_to_u64(&d0.seq)?,
            ts_recv,
            checksum: value_to_i64(&d0.checksum).unwrap_or(0),
            bids: parse_level_rows(&d0.bids),
            asks: parse_level_rows(&d0.asks),
        })
    }

    pub fn parse_rest_snapshot(&self, _body: &str, _ts_recv: Timestamp) -> Option<Snapshot> {
        None
    }
}
