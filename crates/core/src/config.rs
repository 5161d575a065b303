//! Layered configuration for a depthstream feed.
//!
//! Configuration is loaded in layers with increasing priority:
//! 1. Compiled-in defaults (public endpoints, conservative buffer/backoff)
//! 2. TOML configuration file (if provided)
//! 3. Environment variable overrides (prefix `DEPTHSTREAM_`, nested with `__`)
//!
//! CLI flags are merged on top by the binary, after which [`FeedConfig::validate`]
//! must pass before a handler is constructed. The resolved config is read once
//! at handler init; the hot path never touches it.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::types::VenueId;

// ── Default value functions ────────────────────────────────────────────

/// Default order book depth: 400 levels.
fn default_depth_level() -> usize {
    400
}

/// Default REST request deadline: 5 000 ms.
fn default_rest_timeout_ms() -> u64 {
    5_000
}

/// Default delay before retrying a rate-limited (429/418) snapshot: 750 ms.
fn default_rate_limit_retry_ms() -> u64 {
    750
}

/// Default initial reconnect backoff: 200 ms.
fn default_initial_backoff_ms() -> u64 {
    200
}

/// Default maximum reconnect backoff: 5 000 ms.
fn default_max_backoff_ms() -> u64 {
    5_000
}

/// Default reconnect attempt budget before the feed reports `Down`: 10.
fn default_max_attempts() -> u32 {
    10
}

/// Default consecutive-failure count that triggers a warning log: 5.
fn default_alert_after() -> u32 {
    5
}

/// Default cap on incrementals buffered during snapshot sync: 10 000.
fn default_max_buffered() -> usize {
    10_000
}

/// Default heartbeat log interval: 10 000 ms.
fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

/// Default WebSocket connect deadline: 10 000 ms.
fn default_connect_timeout_ms() -> u64 {
    10_000
}

/// Default debug sampling factor: log 1 in 200 parsed messages.
fn default_debug_every() -> u32 {
    200
}

/// Default truncation for raw frame dumps: 512 bytes.
fn default_debug_raw_max() -> usize {
    512
}

/// Default top-of-book levels included in debug dumps: 3.
fn default_debug_top_levels() -> usize {
    3
}

// ── Configuration structs ──────────────────────────────────────────────

/// Top-level configuration for one feed instance.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Venue and pair selection.
    pub feed: FeedSection,
    /// Optional endpoint overrides, empty string = venue default.
    #[serde(default)]
    pub endpoints: EndpointOverrides,
    /// Reconnect backoff parameters.
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    /// Handler buffering and heartbeat parameters.
    #[serde(default)]
    pub handler: HandlerSettings,
    /// REST client parameters.
    #[serde(default)]
    pub rest: RestSettings,
    /// Debug/trace toggles.
    #[serde(default)]
    pub debug: DebugOptions,
    /// Persistence sink settings.
    #[serde(default)]
    pub persist: PersistSettings,
}

/// Venue and trading-pair selection.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedSection {
    /// Venue name (`binance, okx, bybit, bitget, kucoin`), case-insensitive.
    #[serde(default)]
    pub venue: String,
    /// Base asset ticker, e.g. `BTC`.
    #[serde(default)]
    pub base: String,
    /// Quote asset ticker, e.g. `USDT`.
    #[serde(default)]
    pub quote: String,
    /// Order book depth to maintain. Venues may cap the snapshot size they
    /// actually serve (KuCoin 20/100, OKX 400).
    #[serde(default = "default_depth_level")]
    pub depth_level: usize,
}

/// Endpoint overrides. Empty string means "use the venue default".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndpointOverrides {
    #[serde(default)]
    pub ws_host: String,
    #[serde(default)]
    pub ws_port: String,
    #[serde(default)]
    pub ws_path: String,
    #[serde(default)]
    pub rest_host: String,
    #[serde(default)]
    pub rest_port: String,
    #[serde(default)]
    pub rest_path: String,
}

/// Reconnect backoff: exponential with jitter, bounded attempt budget.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectSettings {
    /// Initial backoff delay in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Consecutive failed attempts before the feed goes `Down` (0 = unlimited).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Emit a warning log after this many consecutive failures.
    #[serde(default = "default_alert_after")]
    pub alert_after: u32,
}

/// Feed-handler buffering and heartbeat parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct HandlerSettings {
    /// Maximum raw incrementals buffered while waiting for a snapshot;
    /// overflow triggers a resync.
    #[serde(default = "default_max_buffered")]
    pub max_buffered: usize,
    /// Interval between heartbeat log lines in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// WebSocket connect deadline in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// REST client parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct RestSettings {
    /// Hard deadline covering the whole request, in milliseconds.
    #[serde(default = "default_rest_timeout_ms")]
    pub timeout_ms: u64,
    /// Fixed delay before retrying after HTTP 429/418, in milliseconds.
    #[serde(default = "default_rate_limit_retry_ms")]
    pub rate_limit_retry_ms: u64,
}

/// Debug/trace toggles for the hot path.
///
/// These control extra diagnostics on top of the normal `tracing` levels:
/// sampled raw-frame dumps and parsed top-of-book summaries.
#[derive(Debug, Clone, Deserialize)]
pub struct DebugOptions {
    /// Master switch.
    #[serde(default)]
    pub enabled: bool,
    /// Dump truncated raw frames alongside parsed summaries.
    #[serde(default)]
    pub raw: bool,
    /// Log one in `every` parsed incrementals (0 disables sampling output).
    #[serde(default = "default_debug_every")]
    pub every: u32,
    /// Truncate raw dumps to this many bytes.
    #[serde(default = "default_debug_raw_max")]
    pub raw_max: usize,
    /// Top-of-book levels included in dumps.
    #[serde(default = "default_debug_top_levels")]
    pub top_levels: usize,
}

/// Persistence sink settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersistSettings {
    /// Append-only NDJSON output path. Empty string disables persistence.
    #[serde(default)]
    pub path: String,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: default_max_attempts(),
            alert_after: default_alert_after(),
        }
    }
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            max_buffered: default_max_buffered(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_rest_timeout_ms(),
            rate_limit_retry_ms: default_rate_limit_retry_ms(),
        }
    }
}

impl Default for DebugOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            raw: false,
            every: default_debug_every(),
            raw_max: default_debug_raw_max(),
            top_levels: default_debug_top_levels(),
        }
    }
}

impl FeedConfig {
    /// Load configuration using layered sources.
    ///
    /// 1. Compiled-in defaults.
    /// 2. TOML file at `config_path` (if `Some`).
    /// 3. Environment variable overrides with prefix `DEPTHSTREAM_` and `__`
    ///    as the nesting separator (e.g. `DEPTHSTREAM_FEED__VENUE=okx`).
    ///
    /// Does **not** validate; the binary merges CLI flags first and then
    /// calls [`validate`](Self::validate).
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("feed.venue", "")?
            .set_default("feed.base", "")?
            .set_default("feed.quote", "")?
            .set_default("feed.depth_level", default_depth_level() as i64)?;

        if let Some(path) = config_path {
            let path_str = path.to_str().context("config path is not valid UTF-8")?;
            builder = builder.add_source(File::with_name(path_str).required(true));
        }

        // The prefix separator must be set explicitly to `_` because the
        // `config` crate defaults it to the nesting separator when one is
        // provided; without this, `DEPTHSTREAM_FEED__VENUE` would be matched
        // against prefix `depthstream__`.
        builder = builder.add_source(
            Environment::with_prefix("DEPTHSTREAM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")
    }

    /// Validate configuration invariants.
    ///
    /// A feed needs a known venue, a non-empty pair, and a positive depth.
    pub fn validate(&self) -> Result<()> {
        if VenueId::parse(&self.feed.venue).is_none() {
            bail!(
                "unknown venue '{}': expected one of binance, okx, bybit, bitget, kucoin",
                self.feed.venue
            );
        }
        if self.feed.base.is_empty() || self.feed.quote.is_empty() {
            bail!("base and quote assets are required");
        }
        if self.feed.depth_level == 0 {
            bail!("depth_level must be > 0");
        }
        if self.handler.max_buffered == 0 {
            bail!("handler.max_buffered must be > 0");
        }
        Ok(())
    }

    /// The parsed venue id. Call after [`validate`](Self::validate).
    pub fn venue_id(&self) -> Result<VenueId> {
        VenueId::parse(&self.feed.venue)
            .with_context(|| format!("unknown venue '{}'", self.feed.venue))
    }

    /// Persistence path, `None` when disabled.
    pub fn persist_path(&self) -> Option<PathBuf> {
        if self.persist.path.is_empty() {
            None
        } else {
            Some(PathBuf::from(&self.persist.path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    /// Global mutex to serialize tests that manipulate environment variables.
    /// Uses `unwrap_or_else` to recover from poisoned state so a panic in one
    /// test does not cascade to all others.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn clear_env() {
        std::env::remove_var("DEPTHSTREAM_FEED__VENUE");
        std::env::remove_var("DEPTHSTREAM_FEED__DEPTH_LEVEL");
        std::env::remove_var("DEPTHSTREAM_RECONNECT__MAX_ATTEMPTS");
    }

    /// Helper: create a temporary TOML config file and return its path.
    ///
    /// Uses a `.toml` suffix so the `config` crate auto-detects the format.
    fn write_temp_toml(content: &str) -> (tempfile::NamedTempFile, PathBuf) {
        let mut f = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("create temp file");
        write!(f, "{}", content).expect("write temp file");
        let path = f.path().to_path_buf();
        (f, path)
    }

    #[test]
    fn test_load_defaults_only() {
        let _lock = lock_env();
        clear_env();

        let cfg = FeedConfig::load(None).expect("load defaults");
        assert_eq!(cfg.feed.depth_level, 400);
        assert_eq!(cfg.reconnect.initial_backoff_ms, 200);
        assert_eq!(cfg.reconnect.max_backoff_ms, 5_000);
        assert_eq!(cfg.reconnect.max_attempts, 10);
        assert_eq!(cfg.handler.max_buffered, 10_000);
        assert_eq!(cfg.rest.timeout_ms, 5_000);
        assert_eq!(cfg.rest.rate_limit_retry_ms, 750);
        assert!(!cfg.debug.enabled);
        assert_eq!(cfg.debug.every, 200);
        assert!(cfg.persist_path().is_none());
    }

    #[test]
    fn test_defaults_fail_validation_without_venue() {
        let _lock = lock_env();
        clear_env();

        let cfg = FeedConfig::load(None).expect("load defaults");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_toml() {
        let _lock = lock_env();
        clear_env();

        let toml_content = r#"
[feed]
venue = "okx"
base = "BTC"
quote = "USDT"
depth_level = 50

[endpoints]
ws_host = "ws.example.com"
ws_port = "8443"

[reconnect]
initial_backoff_ms = 100
max_attempts = 3

[handler]
max_buffered = 5000

[persist]
path = "/tmp/okx-btcusdt.ndjson"
"#;
        let (_f, path) = write_temp_toml(toml_content);
        let cfg = FeedConfig::load(Some(path)).expect("load from toml");

        assert_eq!(cfg.feed.venue, "okx");
        assert_eq!(cfg.feed.depth_level, 50);
        assert_eq!(cfg.endpoints.ws_host, "ws.example.com");
        assert_eq!(cfg.endpoints.ws_port, "8443");
        assert!(cfg.endpoints.rest_host.is_empty());
        assert_eq!(cfg.reconnect.initial_backoff_ms, 100);
        assert_eq!(cfg.reconnect.max_attempts, 3);
        assert_eq!(cfg.handler.max_buffered, 5000);
        assert_eq!(
            cfg.persist_path().unwrap(),
            PathBuf::from("/tmp/okx-btcusdt.ndjson")
        );

        cfg.validate().expect("valid config");
        assert_eq!(cfg.venue_id().unwrap(), VenueId::Okx);
    }

    #[test]
    fn test_env_var_overrides() {
        let _lock = lock_env();
        clear_env();
        std::env::set_var("DEPTHSTREAM_FEED__VENUE", "bybit");
        std::env::set_var("DEPTHSTREAM_RECONNECT__MAX_ATTEMPTS", "7");

        let cfg = FeedConfig::load(None).expect("load with env override");
        assert_eq!(cfg.feed.venue, "bybit");
        assert_eq!(cfg.reconnect.max_attempts, 7);

        clear_env();
    }

    #[test]
    fn test_validate_rejects_bad_depth() {
        let _lock = lock_env();
        clear_env();

        let mut cfg = FeedConfig::load(None).expect("load defaults");
        cfg.feed.venue = "binance".to_string();
        cfg.feed.base = "BTC".to_string();
        cfg.feed.quote = "USDT".to_string();
        cfg.feed.depth_level = 0;
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err}").contains("depth_level"));
    }

    #[test]
    fn test_validate_rejects_unknown_venue() {
        let _lock = lock_env();
        clear_env();

        let mut cfg = FeedConfig::load(None).expect("load defaults");
        cfg.feed.venue = "mtgox".to_string();
        cfg.feed.base = "BTC".to_string();
        cfg.feed.quote = "USDT".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err}").contains("unknown venue"));
    }

    #[test]
    fn test_venue_parse_is_case_insensitive_via_config() {
        let _lock = lock_env();
        clear_env();

        let mut cfg = FeedConfig::load(None).expect("load defaults");
        cfg.feed.venue = "KuCoin".to_string();
        cfg.feed.base = "BTC".to_string();
        cfg.feed.quote = "USDT".to_string();
        cfg.validate().expect("case-insensitive venue");
        assert_eq!(cfg.venue_id().unwrap(), VenueId::Kucoin);
    }
}
