//! Binance spot depth adapter.
//!
//! REST-anchored: the book baseline comes from `/api/v3/depth` and is
//! bridged onto the `@depth@100ms` WebSocket stream using the `U`/`u`
//! sequence range of each diff event. No subscribe frame is needed; the
//! stream path encodes the subscription.

use ds_core::config::FeedConfig;
use ds_core::types::{Incremental, Snapshot, Timestamp, VenueId};
use serde::Deserialize;

use super::{or_default, parse_level_rows, Endpoint, SyncMode, VenueCaps, WsBootstrapInfo};

/// Binance adapter marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct Binance;

/// Diff-depth event from the `<symbol>@depth@100ms` stream.
#[derive(Debug, Deserialize)]
struct DepthUpdate {
    /// Event type, always `"depthUpdate"`.
    #[serde(rename = "e")]
    event_type: String,
    /// First update id in the event.
    #[serde(rename = "U")]
    first_update_id: u64,
    /// Final update id in the event.
    #[serde(rename = "u")]
    last_update_id: u64,
    /// Final update id of the previous event; only present on some
    /// markets.
    #[serde(rename = "pu", default)]
    prev_update_id: Option<u64>,
    #[serde(rename = "b")]
    bids: Vec<Vec<String>>,
    #[serde(rename = "a")]
    asks: Vec<Vec<String>>,
}

/// `/api/v3/depth` response.
#[derive(Debug, Deserialize)]
struct DepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    bids: Vec<Vec<String>>,
    asks: Vec<Vec<String>>,
}

impl Binance {
    pub fn caps(&self) -> VenueCaps {
        VenueCaps {
            sync_mode: SyncMode::RestAnchored,
            ..Default::default()
        }
    }

    pub fn ws_endpoint(&self, cfg: &FeedConfig) -> Endpoint {
        let sym = VenueId::Binance.ws_symbol(&cfg.feed.base, &cfg.feed.quote);
        Endpoint {
            host: or_default(&cfg.endpoints.ws_host, "stream.binance.com"),
            // The classic stream endpoint listens on 9443.
            port: or_default(&cfg.endpoints.ws_port, "9443"),
            target: or_default(
                &cfg.endpoints.ws_path,
                &format!("/ws/{sym}@depth@100ms"),
            ),
        }
    }

    pub fn rest_endpoint(&self, cfg: &FeedConfig) -> Endpoint {
        Endpoint {
            host: or_default(&cfg.endpoints.rest_host, "api.binance.com"),
            port: or_default(&cfg.endpoints.rest_port, "443"),
            target: String::new(),
        }
    }

    /// The stream path already subscribes; nothing to send.
    pub fn ws_subscribe_frame(&self, _cfg: &FeedConfig) -> String {
        String::new()
    }

    pub fn rest_snapshot_target(&self, cfg: &FeedConfig) -> String {
        if !cfg.endpoints.rest_path.is_empty() {
            return cfg.endpoints.rest_path.clone();
        }
        let sym = VenueId::Binance.rest_symbol(&cfg.feed.base, &cfg.feed.quote);
        format!(
            "/api/v3/depth?symbol={sym}&limit={}",
            cfg.feed.depth_level
        )
    }

    pub fn ws_bootstrap_target(&self, _cfg: &FeedConfig) -> String {
        String::new()
    }

    pub fn parse_ws_bootstrap(&self, _body: &str, _connect_id: &str) -> Option<WsBootstrapInfo> {
        None
    }

    pub fn is_incremental(&self, msg: &str) -> bool {
        msg.contains("depthUpdate")
    }

    /// Binance never pushes snapshots over the stream.
    pub fn is_snapshot(&self, _msg: &str) -> bool {
        false
    }

    pub fn parse_incremental(&self, msg: &str, ts_recv: Timestamp) -> Option<Incremental> {
        let raw: DepthUpdate = match serde_json::from_str(msg) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "binance depth update parse failed");
                return None;
            }
        };
        if raw.event_type != "depthUpdate" {
            return None;
        }

        Some(Incremental {
            first_seq: raw.first_update_id,
            last_seq: raw.last_update_id,
            prev_last: raw
                .prev_update_id
                .unwrap_or_else(|| raw.last_update_id.saturating_sub(1)),
            ts_recv,
            checksum: 0,
            bids: parse_level_rows(&raw.bids),
            asks: parse_level_rows(&raw.asks),
        })
    }

    pub fn parse_ws_snapshot(&self, _msg: &str, _ts_recv: Timestamp) -> Option<Snapshot> {
        None
    }

    pub fn parse_rest_snapshot(&self, body: &str, ts_recv: Timestamp) -> Option<Snapshot> {
        let raw: DepthSnapshot = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "binance snapshot parse failed");
                return None;
            }
        };

        Some(Snapshot {
            last_update_id: raw.last_update_id,
            ts_recv,
            checksum: 0,
            bids: parse_level_rows(&raw.bids),
            asks: parse_level_rows(&raw.asks),
        })
    }
}
