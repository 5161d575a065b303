//! KuCoin spot level-2 adapter.
//!
//! REST-anchored with a twist: connecting to the WS requires a prior
//! `bullet-public` POST that hands back a token and the actual WS endpoint,
//! and the public REST snapshot is partial (20 or 100 levels). The partial
//! snapshot can legally trail the first `trade.l2update`, so the adapter
//! opts into sequence-gap tolerance instead of resyncing forever.

use ds_core::config::FeedConfig;
use ds_core::types::{Incremental, Snapshot, Timestamp, VenueId};
use serde::Deserialize;

use super::{
    or_default, parse_level_rows, value_to_u64, Endpoint, SyncMode, VenueCaps, WsBootstrapInfo,
};

/// KuCoin adapter marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct Kucoin;

/// `bullet-public` response.
#[derive(Debug, Deserialize)]
struct BulletResponse {
    data: BulletData,
}

#[derive(Debug, Deserialize)]
struct BulletData {
    token: String,
    #[serde(rename = "instanceServers")]
    instance_servers: Vec<InstanceServer>,
}

#[derive(Debug, Deserialize)]
struct InstanceServer {
    /// e.g. `wss://ws-api-spot.kucoin.com/`.
    endpoint: String,
    #[serde(rename = "pingInterval", default)]
    ping_interval: u64,
    #[serde(rename = "pingTimeout", default)]
    ping_timeout: u64,
}

/// `/market/level2` stream message.
#[derive(Debug, Deserialize)]
struct L2Message {
    #[serde(rename = "type", default)]
    msg_type: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    data: Option<L2Data>,
}

#[derive(Debug, Deserialize)]
struct L2Data {
    /// Number or string depending on endpoint generation.
    #[serde(rename = "sequenceStart", default)]
    sequence_start: serde_json::Value,
    #[serde(rename = "sequenceEnd", default)]
    sequence_end: serde_json::Value,
    #[serde(default)]
    changes: Option<L2Changes>,
}

/// Change rows are `["price","size","sequence"]`; the per-row sequence is
/// ignored.
#[derive(Debug, Deserialize)]
struct L2Changes {
    #[serde(default)]
    bids: Vec<Vec<String>>,
    #[serde(default)]
    asks: Vec<Vec<String>>,
}

/// Envelope of the partial REST snapshot.
#[derive(Debug, Deserialize)]
struct RestSnapshot {
    data: RestSnapshotData,
}

#[derive(Debug, Deserialize)]
struct RestSnapshotData {
    /// Commonly a string.
    #[serde(default)]
    sequence: serde_json::Value,
    #[serde(default)]
    bids: Vec<Vec<String>>,
    #[serde(default)]
    asks: Vec<Vec<String>>,
}

/// Split `wss://host[:port]/path` into endpoint parts.
fn split_wss_endpoint(endpoint: &str) -> Option<(String, String, String)> {
    let rest = endpoint.strip_prefix("wss://")?;

    let (host_port, path) = match rest.find('/') {
        Some(slash) => (&rest[..slash], rest[slash..].to_string()),
        None => (rest, "/".to_string()),
    };

    let (host, port) = match host_port.find(':') {
        Some(colon) => {
            let port = &host_port[colon + 1..];
            (
                host_port[..colon].to_string(),
                if port.is_empty() { "443".to_string() } else { port.to_string() },
            )
        }
        None => (host_port.to_string(), "443".to_string()),
    };

    if host.is_empty() {
        return None;
    }
    Some((host, port, path))
}

impl Kucoin {
    pub fn caps(&self) -> VenueCaps {
        VenueCaps {
            sync_mode: SyncMode::RestAnchored,
            requires_ws_bootstrap: true,
            // Partial snapshots may leave a gap to the first l2update we
            // see; let the controller jump ahead instead of resyncing in a
            // loop.
            allow_seq_gap: true,
            ..Default::default()
        }
    }

    /// Placeholder until the bootstrap response overrides it.
    pub fn ws_endpoint(&self, cfg: &FeedConfig) -> Endpoint {
        Endpoint {
            host: or_default(&cfg.endpoints.ws_host, "ws-api-spot.kucoin.com"),
            port: or_default(&cfg.endpoints.ws_port, "443"),
            target: or_default(&cfg.endpoints.ws_path, "/"),
        }
    }

    pub fn rest_endpoint(&self, cfg: &FeedConfig) -> Endpoint {
        Endpoint {
            host: or_default(&cfg.endpoints.rest_host, "api.kucoin.com"),
            port: or_default(&cfg.endpoints.rest_port, "443"),
            target: String::new(),
        }
    }

    pub fn ws_subscribe_frame(&self, cfg: &FeedConfig) -> String {
        let sym = VenueId::Kucoin.ws_symbol(&cfg.feed.base, &cfg.feed.quote);
        serde_json::json!({
            "id": "1",
            "type": "subscribe",
            "topic": format!("/market/level2:{sym}"),
            "privateChannel": false,
            "response": true
        })
        .to_string()
    }

    /// Public REST only serves 20- or 100-level part books.
    pub fn rest_snapshot_target(&self, cfg: &FeedConfig) -> String {
        if !cfg.endpoints.rest_path.is_empty() {
            return cfg.endpoints.rest_path.clone();
        }
        let sym = VenueId::Kucoin.rest_symbol(&cfg.feed.base, &cfg.feed.quote);
        let size = if cfg.feed.depth_level <= 20 { 20 } else { 100 };
        format!("/api/v1/market/orderbook/level2_{size}?symbol={sym}")
    }

    pub fn ws_bootstrap_target(&self, _cfg: &FeedConfig) -> String {
        "/api/v1/bullet-public".to_string()
    }

    /// Turn the bullet response into the WS endpoint, appending the token
    /// and the caller's fresh connect id to the target's query string.
    pub fn parse_ws_bootstrap(&self, body: &str, connect_id: &str) -> Option<WsBootstrapInfo> {
        let raw: BulletResponse = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "kucoin bullet parse failed");
                return None;
            }
        };

        let server = raw.data.instance_servers.first()?;
        let (host, port, path) = split_wss_endpoint(&server.endpoint)?;

        let sep = if path.contains('?') { '&' } else { '?' };
        let target = format!("{path}{sep}token={}&connectId={connect_id}", raw.data.token);

        Some(WsBootstrapInfo {
            ws: Endpoint { host, port, target },
            ping_interval_ms: server.ping_interval,
            ping_timeout_ms: server.ping_timeout,
        })
    }

    pub fn is_incremental(&self, msg: &str) -> bool {
        msg.contains("\"type\":\"message\"")
            && msg.contains("\"subject\":\"trade.l2update\"")
            && msg.contains("\"/market/level2:")
    }

    pub fn is_snapshot(&self, _msg: &str) -> bool {
        false
    }

    pub fn parse_incremental(&self, msg: &str, ts_recv: Timestamp) -> Option<Incremental> {
        let raw: L2Message = match serde_json::from_str(msg) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "kucoin l2update parse failed");
                return None;
            }
        };
        if raw.msg_type != "message" || raw.subject != "trade.l2update" {
            return None;
        }
        let data = raw.data?;
        let changes = data.changes?;

        let first_seq = value_to_u64(&data.sequence_start)?;
        let last_seq = value_to_u64(&data.sequence_end)?;

        Some(Incremental {
            first_seq,
            last_seq,
            prev_last: first_seq.saturating_sub(1),
            ts_recv,
            checksum: 0,
            bids: parse_level_rows(&changes.bids),
            asks: parse_level_rows(&changes.asks),
        })
    }

    pub fn parse_ws_snapshot(&self, _msg: &str, _ts_recv: Timestamp) -> Option<Snapshot> {
        None
    }

    pub fn parse_rest_snapshot(&self, body: &str, ts_recv: Timestamp) -> Option<Snapshot> {
        let raw: RestSnapshot = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(error = %e, "kucoin snapshot parse failed");
                return None;
            }
        };

        Some(Snapshot {
            last_update_id: value_to_u64(&raw.data.sequence)?,
            ts_recv,
            checksum: 0,
            bids: parse_level_rows(&raw.data.bids),
            asks: parse_level_rows(&raw.data.asks),
        })
    }
}
