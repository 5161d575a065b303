//! OKX spot books adapter.
//!
//! WS-authoritative: subscribing to the `books` channel delivers a full
//! snapshot first, then updates chained by `prevSeqId`/`seqId`. Every
//! message carries a CRC32 checksum over the textual top-25 levels.

use ds_core::config::FeedConfig;
use ds_core::types::{Incremental, Snapshot, Timestamp, VenueId};
use serde::Deserialize;

use super::{or_default, parse_level_rows, Endpoint, SyncMode, VenueCaps, WsBootstrapInfo};
use crate::checksum::crc32_interleaved;

/// OKX adapter marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct Okx;

/// Envelope of a `books` channel push.
#[derive(Debug, Deserialize)]
struct BooksMsg {
    #[serde(default)]
    action: String,
    #[serde(default)]
    data: Vec<BooksData>,
}

/// One entry of `data`; OKX rows are `["px","sz","0","count"]`.
#[derive(Debug, Deserialize)]
struct BooksData {
    #[serde(rename = "seqId")]
    seq_id: u64,
    #[serde(rename = "prevSeqId", default)]
    prev_seq_id: Option<i64>,
    #[serde(default)]
    checksum: Option<i64>,
    #[serde(default)]
    bids: Vec<Vec<String>>,
    #[serde(default)]
    asks: Vec<Vec<String>>,
}

/// Cheap prefilter shared by both classifiers.
fn looks_like_books(msg: &str) -> bool {
    msg.contains("\"channel\":\"books") && msg.contains("\"data\"")
}

impl Okx {
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
            host: or_default(&cfg.endpoints.ws_host, "wseea.okx.com"),
            port: or_default(&cfg.endpoints.ws_port, "8443"),
            target: or_default(&cfg.endpoints.ws_path, "/ws/v5/public"),
        }
    }

    pub fn rest_endpoint(&self, cfg: &FeedConfig) -> Endpoint {
        Endpoint {
            host: or_default(&cfg.endpoints.rest_host, "eea.okx.com"),
            port: or_default(&cfg.endpoints.rest_port, "443"),
            target: String::new(),
        }
    }

    pub fn ws_subscribe_frame(&self, cfg: &FeedConfig) -> String {
        let inst_id = VenueId::Okx.ws_symbol(&cfg.feed.base, &cfg.feed.quote);
        serde_json::json!({
            "op": "subscribe",
            "args": [{"channel": "books", "instId": inst_id}]
        })
        .to_string()
    }

    /// Kept for debugging / fallback; the WS snapshot is the baseline.
    pub fn rest_snapshot_target(&self, cfg: &FeedConfig) -> String {
        if !cfg.endpoints.rest_path.is_empty() {
            return cfg.endpoints.rest_path.clone();
        }
        let inst_id = VenueId::Okx.rest_symbol(&cfg.feed.base, &cfg.feed.quote);
        let sz = cfg.feed.depth_level.min(400);
        format!("/api/v5/market/books?instId={inst_id}&sz={sz}")
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
                tracing::debug!(error = %e, "okx update parse failed");
                return None;
            }
        };
        if raw.action != "update" {
            return None;
        }
        let d0 = raw.data.first()?;

        let prev = d0.prev_seq_id?.max(0) as u64;
        Some(Incremental {
            first_seq: prev + 1,
            last_seq: d0.seq_id,
            prev_last: prev,
            ts_recv,
            checksum: d0.checksum.unwrap_or(0),
            bids: parse_level_rows(&d0.bids),
            asks: parse_level_rows(&d0.asks),
        })
    }

    pub fn parse_ws_snapshot(&self, msg: &str, ts_recv: Timestamp) -> Option<Snapshot> {
        let raw: BooksMsg = match serde_json::from_str(msg) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "okx snapshot parse failed");
                return None;
            }
        };
        if raw.action != "snapshot" {
            return None;
        }
        let d0 = raw.data.first()?;

        Some(Snapshot {
            last_update_id: d0.seq_id,
            ts_recv,
            checksum: d0.checksum.unwrap_or(0),
            bids: parse_level_rows(&d0.bids),
            asks: parse_level_rows(&d0.asks),
        })
    }

    /// OKX runs WS-authoritative; REST bodies are never parsed.
    pub fn parse_rest_snapshot(&self, _body: &str, _ts_recv: Timestamp) -> Option<Snapshot> {
        None
    }
}
