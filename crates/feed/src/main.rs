//! depthstream feed binary.
//!
//! Loads layered configuration, merges CLI flags on top, initializes
//! tracing, and drives a single [`FeedHandler`] on a current-thread
//! runtime until Ctrl-C. All book mutations happen on this one reactor
//! thread.
//!
//! Exit codes: 0 on clean shutdown, 1 for configuration or initialization
//! failures, 2 when the running feed fails (e.g. reconnect budget
//! exhausted).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use ds_core::config::FeedConfig;
use ds_market_data::handler::FeedHandler;

/// depthstream L2 market-data feed
#[derive(Parser, Debug)]
#[command(name = "ds-feed", about = "Multi-venue L2 order book feed")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Venue name: binance, okx, bybit, bitget, kucoin (case-insensitive).
    #[arg(short, long)]
    venue: Option<String>,

    /// Base asset, e.g. BTC.
    #[arg(long)]
    base: Option<String>,

    /// Quote asset, e.g. USDT.
    #[arg(long)]
    quote: Option<String>,

    /// Order book depth to maintain.
    #[arg(long)]
    depth_level: Option<usize>,

    /// WebSocket host override.
    #[arg(long)]
    ws_host: Option<String>,

    /// WebSocket port override.
    #[arg(long)]
    ws_port: Option<String>,

    /// WebSocket path override.
    #[arg(long)]
    ws_path: Option<String>,

    /// REST host override.
    #[arg(long)]
    rest_host: Option<String>,

    /// REST port override.
    #[arg(long)]
    rest_port: Option<String>,

    /// REST path override (replaces the snapshot target).
    #[arg(long)]
    rest_path: Option<String>,

    /// Append-only NDJSON persistence path.
    #[arg(long)]
    persist_path: Option<String>,

    /// Emit JSON logs instead of pretty ones.
    #[arg(long)]
    json_logs: bool,

    /// Master debug switch: sampled parse diagnostics.
    #[arg(long)]
    debug: bool,

    /// Include truncated raw frames in debug samples.
    #[arg(long)]
    debug_raw: bool,

    /// Sample one in N parsed messages.
    #[arg(long)]
    debug_every: Option<u32>,

    /// Truncate raw dumps to this many bytes.
    #[arg(long)]
    debug_raw_max: Option<usize>,

    /// Top-of-book levels in debug dumps.
    #[arg(long)]
    debug_top: Option<usize>,
}

/// CLI flags win over file and environment layers.
fn apply_cli_overrides(cfg: &mut FeedConfig, args: &Args) {
    if let Some(v) = &args.venue {
        cfg.feed.venue = v.clone();
    }
    if let Some(v) = &args.base {
        cfg.feed.base = v.clone();
    }
    if let Some(v) = &args.quote {
        cfg.feed.quote = v.clone();
    }
    if let Some(v) = args.depth_level {
        cfg.feed.depth_level = v;
    }
    if let Some(v) = &args.ws_host {
        cfg.endpoints.ws_host = v.clone();
    }
    if let Some(v) = &args.ws_port {
        cfg.endpoints.ws_port = v.clone();
    }
    if let Some(v) = &args.ws_path {
        cfg.endpoints.ws_path = v.clone();
    }
    if let Some(v) = &args.rest_host {
        cfg.endpoints.rest_host = v.clone();
    }
    if let Some(v) = &args.rest_port {
        cfg.endpoints.rest_port = v.clone();
    }
    if let Some(v) = &args.rest_path {
        cfg.endpoints.rest_path = v.clone();
    }
    if let Some(v) = &args.persist_path {
        cfg.persist.path = v.clone();
    }
    if args.debug {
        cfg.debug.enabled = true;
    }
    if args.debug_raw {
        cfg.debug.raw = true;
    }
    if let Some(v) = args.debug_every {
        cfg.debug.every = v;
    }
    if let Some(v) = args.debug_raw_max {
        cfg.debug.raw_max = v;
    }
    if let Some(v) = args.debug_top {
        cfg.debug.top_levels = v;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut cfg = match FeedConfig::load(args.config.clone()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return ExitCode::from(1);
        }
    };
    apply_cli_overrides(&mut cfg, &args);

    ds_core::logging::init_tracing(args.json_logs);

    tracing::info!(
        venue = %cfg.feed.venue,
        base = %cfg.feed.base,
        quote = %cfg.feed.quote,
        depth = cfg.feed.depth_level,
        persist = %cfg.persist.path,
        "starting ds-feed"
    );

    let mut handler = match FeedHandler::new(cfg) {
        Ok(handler) => handler,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "initialization failed");
            return ExitCode::from(1);
        }
    };

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, shutting down");
            signal_token.cancel();
        }
    });

    match handler.run(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "feed failed");
            ExitCode::from(2)
        }
    }
}
