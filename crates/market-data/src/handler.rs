//! Feed handler: one venue, one pair, one stream.
//!
//! Owns the whole lifecycle: (optional) bootstrap, WebSocket connect,
//! subscribe, snapshot acquisition, buffering during wait states,
//! bridging, steady-state apply, and the restart path with exponential
//! backoff. All state transitions and book mutations happen on the task
//! that runs [`FeedHandler::run`]; the WS and REST clients live in their
//! own tasks and communicate over channels, so nothing here ever blocks
//! on I/O while holding the book.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ds_core::config::FeedConfig;
use ds_core::types::{Snapshot, Timestamp, VenueId};
use ds_persist::FilePersistSink;

use crate::adapter::{Endpoint, SyncMode, VenueAdapter, VenueCaps};
use crate::controller::{Action, BaselineKind, BookController};
use crate::rest::{RestClient, RestResponse};
use crate::ws::{self, WsEvent, WsHandle, WsOptions};

/// Handler synchronisation states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Disconnected,
    Connecting,
    /// Venue requires a token handshake before the WS can be opened.
    Bootstrapping,
    /// WS open, buffering incrementals, REST snapshot in flight.
    WaitRestSnapshot,
    /// WS open, waiting for the stream's own snapshot.
    WaitWsSnapshot,
    /// Baseline loaded, draining the buffer until an update bridges it.
    WaitBridge,
    Synced,
}

/// Consumer-visible health of the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// Synced and streaming.
    Healthy,
    /// Between lineages: reconnecting or re-acquiring a baseline.
    Resyncing,
    /// Resyncing after bounded data loss (buffer overflow).
    Degraded,
    /// Stopped by the owner.
    Closed,
    /// Reconnect budget exhausted; no further attempts.
    Down,
}

/// Outcome of processing one input on the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    /// Lineage broken: tear the connection down and resync.
    Restart,
}

/// Directive produced by a completed snapshot request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SnapshotStep {
    Continue,
    Restart,
    /// Rate-limited: re-request after a fixed delay, no state change.
    Retry(Duration),
}

/// How one connection session ended.
enum SessionEnd {
    /// Owner cancelled; stop for good.
    Shutdown,
    /// Connection lost or lineage broken; `synced` says whether this
    /// session ever reached `Synced` (resets the backoff ladder).
    Restart { synced: bool },
}

/// Everything resolved from config + adapter at init. The hot path reads
/// only this, never `FeedConfig`.
struct ResolvedRuntime {
    venue: VenueId,
    symbol: String,
    depth: usize,
    ws: Endpoint,
    rest: Endpoint,
    ws_subscribe_frame: String,
    rest_snapshot_target: String,
    caps: VenueCaps,
    ws_ping_interval_ms: u64,
}

/// A raw frame parked while a snapshot is in flight.
struct BufferedFrame {
    payload: String,
    ts_recv: Timestamp,
}

/// Feed handler for a single (venue, pair).
pub struct FeedHandler {
    cfg: FeedConfig,
    rt: ResolvedRuntime,
    adapter: VenueAdapter,
    controller: BookController,
    buffer: VecDeque<BufferedFrame>,
    state: SyncState,
    stopped: bool,
    down: bool,
    /// Set when bounded drops occurred (buffer overflow); cleared on sync.
    degraded: bool,
    connect_id: String,
    rest: RestClient,
    persist: Option<FilePersistSink>,
    /// Generation tag for in-flight snapshot requests; stale completions
    /// are dropped.
    snapshot_gen: u64,
    /// Parsed-incremental counter for debug sampling.
    inc_count: u64,
}

impl FeedHandler {
    /// Validate the config and resolve the runtime: endpoints, frames,
    /// targets, capability flags, controller. No network I/O.
    pub fn new(cfg: FeedConfig) -> Result<Self> {
        cfg.validate()?;
        let venue = cfg.venue_id()?;
        let adapter = VenueAdapter::for_venue(venue);
        let caps = adapter.caps();

        let symbol = venue.rest_symbol(&cfg.feed.base, &cfg.feed.quote);
        let rt = ResolvedRuntime {
            venue,
            symbol: symbol.clone(),
            depth: cfg.feed.depth_level,
            ws: adapter.ws_endpoint(&cfg),
            rest: adapter.rest_endpoint(&cfg),
            ws_subscribe_frame: adapter.ws_subscribe_frame(&cfg),
            rest_snapshot_target: adapter.rest_snapshot_target(&cfg),
            caps,
            ws_ping_interval_ms: 0,
        };

        let mut controller = BookController::new(rt.depth);
        controller.configure_checksum(
            if caps.has_checksum { caps.checksum_fn } else { None },
            caps.checksum_top_n,
        );
        controller.set_allow_seq_gap(caps.allow_seq_gap);
        if caps.allow_seq_gap {
            tracing::info!(venue = %venue, "sequence-gap tolerance enabled");
        }

        let rest = RestClient::new(Duration::from_millis(cfg.rest.timeout_ms))?;

        let persist = match cfg.persist_path() {
            Some(path) => Some(FilePersistSink::new(&path, venue.as_str(), &symbol)?),
            None => None,
        };

        Ok(Self {
            cfg,
            rt,
            adapter,
            controller,
            buffer: VecDeque::new(),
            state: SyncState::Disconnected,
            stopped: false,
            down: false,
            degraded: false,
            connect_id: String::new(),
            rest,
            persist,
            snapshot_gen: 0,
            inc_count: 0,
        })
    }

    /// Current handler state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Consumer-visible status.
    pub fn status(&self) -> FeedStatus {
        if self.stopped {
            FeedStatus::Closed
        } else if self.down {
            FeedStatus::Down
        } else if self.state == SyncState::Synced {
            FeedStatus::Healthy
        } else if self.degraded {
            FeedStatus::Degraded
        } else {
            FeedStatus::Resyncing
        }
    }

    /// Read access to the reconstructed book (via the controller).
    pub fn controller(&self) -> &BookController {
        &self.controller
    }

    /// Drive the feed until `shutdown` is cancelled or the reconnect
    /// budget is exhausted.
    ///
    /// Cancelling `shutdown` is the `stop()` operation: outstanding
    /// requests are abandoned (their completions are dropped by
    /// generation), the WS is closed, and the handler reports `Closed`.
    /// Cancelling twice is harmless.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        let mut attempt: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            if attempt > 0 {
                let Some(backoff) = self.next_backoff(attempt) else {
                    self.down = true;
                    self.state = SyncState::Disconnected;
                    tracing::error!(
                        venue = %self.rt.venue,
                        attempts = attempt,
                        "reconnect budget exhausted, feed is down"
                    );
                    bail!("reconnect budget exhausted after {attempt} attempts");
                };
                tracing::info!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "scheduling resync"
                );
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.cancelled() => break,
                }
            }

            match self.run_session(&shutdown).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Restart { synced } => {
                    // A session that reached Synced restarts the ladder.
                    attempt = if synced { 1 } else { attempt + 1 };
                }
            }
        }

        self.buffer.clear();
        self.controller.reset();
        self.state = SyncState::Disconnected;
        self.stopped = true;
        tracing::info!(venue = %self.rt.venue, "feed stopped");
        Ok(())
    }

    /// Backoff before reconnect attempt `attempt` (1-based), or `None`
    /// when the budget is spent.
    fn next_backoff(&self, attempt: u32) -> Option<Duration> {
        let rc = &self.cfg.reconnect;
        if rc.max_attempts > 0 && attempt > rc.max_attempts {
            return None;
        }
        if attempt >= rc.alert_after {
            tracing::warn!(
                attempt,
                venue = %self.rt.venue,
                "consecutive reconnect attempts exceeded alert threshold"
            );
        }
        Some(calculate_backoff(
            Duration::from_millis(rc.initial_backoff_ms),
            Duration::from_millis(rc.max_backoff_ms),
            attempt - 1,
        ))
    }

    /// One connection session: bootstrap (if required), connect, and pump
    /// events until shutdown or a restart condition.
    async fn run_session(&mut self, shutdown: &CancellationToken) -> SessionEnd {
        self.buffer.clear();
        self.controller.reset();
        self.connect_id = Timestamp::now().to_millis().to_string();
        self.snapshot_gen += 1; // invalidate any in-flight request
        self.state = SyncState::Connecting;

        let (ws_endpoint, ping_ms) = if self.rt.caps.requires_ws_bootstrap {
            self.state = SyncState::Bootstrapping;
            match self.bootstrap(shutdown).await {
                BootstrapEnd::Ready(endpoint, ping_ms) => (endpoint, ping_ms),
                BootstrapEnd::Failed => return SessionEnd::Restart { synced: false },
                BootstrapEnd::Shutdown => return SessionEnd::Shutdown,
            }
        } else {
            (self.rt.ws.clone(), self.rt.ws_ping_interval_ms)
        };

        let opts = WsOptions {
            connect_timeout: Duration::from_millis(self.cfg.handler.connect_timeout_ms),
            ping_interval: (ping_ms > 0).then(|| Duration::from_millis(ping_ms)),
            ..Default::default()
        };
        let (ws, mut events) = ws::connect(&ws_endpoint, opts);

        let (snap_tx, mut snap_rx) = mpsc::channel::<(u64, Result<RestResponse>)>(4);

        let mut heartbeat =
            tokio::time::interval(Duration::from_millis(self.cfg.handler.heartbeat_interval_ms));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await; // immediate first tick

        let mut reached_synced = false;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    ws.cancel();
                    return SessionEnd::Shutdown;
                }
                ev = events.recv() => match ev {
                    Some(WsEvent::Opened) => {
                        if self.on_ws_open(&ws) {
                            self.request_snapshot(&snap_tx, None);
                        }
                    }
                    Some(WsEvent::Frame { payload, ts_recv }) => {
                        match self.on_ws_message(&payload, ts_recv) {
                            Step::Continue => {
                                reached_synced |= self.state == SyncState::Synced;
                            }
                            Step::Restart => {
                                ws.cancel();
                                return SessionEnd::Restart { synced: reached_synced };
                            }
                        }
                    }
                    Some(WsEvent::Closed { reason }) => {
                        tracing::warn!(reason = %reason, "WebSocket closed unexpectedly");
                        return SessionEnd::Restart { synced: reached_synced };
                    }
                    None => {
                        return SessionEnd::Restart { synced: reached_synced };
                    }
                },
                Some((gen, res)) = snap_rx.recv() => {
                    if gen != self.snapshot_gen {
                        tracing::trace!(gen, current = self.snapshot_gen, "dropping stale snapshot response");
                        continue;
                    }
                    match self.classify_snapshot_result(res) {
                        SnapshotStep::Continue => {
                            reached_synced |= self.state == SyncState::Synced;
                        }
                        SnapshotStep::Retry(delay) => {
                            self.request_snapshot(&snap_tx, Some(delay));
                        }
                        SnapshotStep::Restart => {
                            ws.cancel();
                            return SessionEnd::Restart { synced: reached_synced };
                        }
                    }
                },
                _ = heartbeat.tick() => {
                    tracing::info!(
                        venue = %self.rt.venue,
                        symbol = %self.rt.symbol,
                        state = ?self.state,
                        status = ?self.status(),
                        last_seq = self.controller.last_seq(),
                        buffered = self.buffer.len(),
                        "heartbeat"
                    );
                }
            }
        }
    }

    /// POST the bootstrap target and resolve the WS endpoint from the
    /// response (KuCoin bullet-public).
    async fn bootstrap(&mut self, shutdown: &CancellationToken) -> BootstrapEnd {
        let target = self.adapter.ws_bootstrap_target(&self.cfg);
        if target.is_empty() {
            // Caps demand a bootstrap the adapter cannot provide.
            tracing::error!(venue = %self.rt.venue, "bootstrap required but no target available");
            return BootstrapEnd::Failed;
        }

        let response = tokio::select! {
            _ = shutdown.cancelled() => return BootstrapEnd::Shutdown,
            res = self.rest.post(&self.rt.rest.host, &self.rt.rest.port, &target, "") => res,
        };

        let resp = match response {
            Ok(resp) if resp.is_success() => resp,
            Ok(resp) => {
                tracing::warn!(status = resp.status, "bootstrap request rejected");
                return BootstrapEnd::Failed;
            }
            Err(e) => {
                tracing::warn!(error = %e, "bootstrap request failed");
                return BootstrapEnd::Failed;
            }
        };

        match self.adapter.parse_ws_bootstrap(&resp.body, &self.connect_id) {
            Some(info) => {
                tracing::info!(
                    host = %info.ws.host,
                    port = %info.ws.port,
                    ping_interval_ms = info.ping_interval_ms,
                    "bootstrap resolved WS endpoint"
                );
                BootstrapEnd::Ready(info.ws, info.ping_interval_ms)
            }
            None => {
                tracing::warn!("bootstrap response unparseable");
                BootstrapEnd::Failed
            }
        }
    }

    /// Handle WS open: subscribe and pick the wait state. Returns `true`
    /// when a REST snapshot must be requested.
    fn on_ws_open(&mut self, ws: &WsHandle) -> bool {
        if !self.rt.ws_subscribe_frame.is_empty() {
            ws.send_text(self.rt.ws_subscribe_frame.clone());
        }
        self.on_open_transition()
    }

    /// The state transition half of WS open, separated for tests.
    fn on_open_transition(&mut self) -> bool {
        match self.rt.caps.sync_mode {
            SyncMode::RestAnchored => {
                self.state = SyncState::WaitRestSnapshot;
                tracing::info!("WS open (rest-anchored), requesting snapshot");
                true
            }
            SyncMode::WsAuthoritative => {
                self.state = SyncState::WaitWsSnapshot;
                tracing::info!("WS open (ws-authoritative), waiting for stream snapshot");
                false
            }
        }
    }

    /// Spawn the snapshot GET (optionally after `delay`), tagged with a
    /// fresh generation so a superseded response is ignored.
    fn request_snapshot(
        &mut self,
        snap_tx: &mpsc::Sender<(u64, Result<RestResponse>)>,
        delay: Option<Duration>,
    ) {
        self.state = SyncState::WaitRestSnapshot;
        self.snapshot_gen += 1;
        let gen = self.snapshot_gen;

        let rest = self.rest.clone();
        let host = self.rt.rest.host.clone();
        let port = self.rt.rest.port.clone();
        let target = self.rt.rest_snapshot_target.clone();
        let tx = snap_tx.clone();

        tokio::spawn(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            let res = rest.get(&host, &port, &target).await;
            let _ = tx.send((gen, res)).await;
        });
    }

    /// Turn a completed snapshot request into the next step.
    fn classify_snapshot_result(&mut self, res: Result<RestResponse>) -> SnapshotStep {
        let resp = match res {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(error = %e, "snapshot request failed");
                return SnapshotStep::Restart;
            }
        };

        if resp.is_rate_limited() {
            let delay = Duration::from_millis(self.cfg.rest.rate_limit_retry_ms);
            tracing::warn!(
                status = resp.status,
                retry_ms = delay.as_millis() as u64,
                "snapshot rate-limited, deferring retry"
            );
            return SnapshotStep::Retry(delay);
        }

        if !resp.is_success() {
            tracing::warn!(status = resp.status, "snapshot request rejected");
            return SnapshotStep::Restart;
        }

        match self.on_snapshot_body(&resp.body) {
            Step::Continue => SnapshotStep::Continue,
            Step::Restart => SnapshotStep::Restart,
        }
    }

    /// Parse and apply a REST snapshot body, then drain the buffer.
    fn on_snapshot_body(&mut self, body: &str) -> Step {
        let ts = Timestamp::now();
        let Some(snap) = self.adapter.parse_rest_snapshot(body, ts) else {
            tracing::warn!("snapshot body unparseable");
            return Step::Restart;
        };

        if let Some(sink) = self.persist.as_mut() {
            sink.write_snapshot(&snap, "rest");
        }

        let kind = match self.rt.caps.sync_mode {
            SyncMode::RestAnchored => BaselineKind::RestAnchored,
            SyncMode::WsAuthoritative => BaselineKind::WsAuthoritative,
        };
        if self.controller.on_snapshot(&snap, kind) == Action::NeedResync {
            return Step::Restart;
        }
        self.persist_book_state();

        self.state = SyncState::WaitBridge;
        if self.drain_buffered() == Step::Restart {
            return Step::Restart;
        }
        if self.controller.is_synced() {
            self.promote_synced("bridged after snapshot drain");
        }
        Step::Continue
    }

    /// Apply a WS snapshot (initial baseline or mid-stream re-baseline).
    fn apply_ws_snapshot(&mut self, snap: Snapshot) -> Step {
        if let Some(sink) = self.persist.as_mut() {
            sink.write_snapshot(&snap, "ws");
        }

        if self.controller.on_snapshot(&snap, BaselineKind::WsAuthoritative) == Action::NeedResync {
            return Step::Restart;
        }
        self.persist_book_state();

        self.state = SyncState::WaitBridge;
        if self.drain_buffered() == Step::Restart {
            return Step::Restart;
        }
        if self.controller.is_synced() {
            self.promote_synced("ws snapshot baseline");
        }
        Step::Continue
    }

    /// Re-classify, re-parse, and apply buffered frames in arrival order.
    fn drain_buffered(&mut self) -> Step {
        while let Some(frame) = self.buffer.pop_front() {
            if !self.adapter.is_incremental(&frame.payload) {
                continue;
            }
            let Some(inc) = self.adapter.parse_incremental(&frame.payload, frame.ts_recv) else {
                continue;
            };
            if let Some(sink) = self.persist.as_mut() {
                sink.write_incremental(&inc, "ws");
            }
            if self.controller.on_increment(&inc) == Action::NeedResync {
                return Step::Restart;
            }
        }
        Step::Continue
    }

    /// Route one raw WS frame according to the current state.
    fn on_ws_message(&mut self, payload: &str, ts_recv: Timestamp) -> Step {
        match self.state {
            SyncState::WaitRestSnapshot => {
                if self.adapter.is_incremental(payload) {
                    self.debug_sample(payload);
                    return self.buffer_frame(payload, ts_recv);
                }
                Step::Continue
            }

            SyncState::WaitWsSnapshot => {
                if self.adapter.is_snapshot(payload) {
                    if let Some(snap) = self.adapter.parse_ws_snapshot(payload, ts_recv) {
                        return self.apply_ws_snapshot(snap);
                    }
                }
                if self.adapter.is_incremental(payload) {
                    self.debug_sample(payload);
                    return self.buffer_frame(payload, ts_recv);
                }
                Step::Continue
            }

            SyncState::WaitBridge | SyncState::Synced => {
                // Venues occasionally push a fresh snapshot on internal
                // resyncs; re-baseline and drop anything parked.
                if self.rt.caps.ws_sends_snapshot && self.adapter.is_snapshot(payload) {
                    if let Some(snap) = self.adapter.parse_ws_snapshot(payload, ts_recv) {
                        self.buffer.clear();
                        return self.apply_ws_snapshot(snap);
                    }
                }

                // Rest-anchored bridging: keep buffering and re-attempt the
                // drain so ordering against the buffer is preserved.
                if self.rt.caps.sync_mode == SyncMode::RestAnchored
                    && self.state == SyncState::WaitBridge
                {
                    if !self.adapter.is_incremental(payload) {
                        return Step::Continue;
                    }
                    self.debug_sample(payload);
                    if self.buffer_frame(payload, ts_recv) == Step::Restart {
                        return Step::Restart;
                    }
                    if self.drain_buffered() == Step::Restart {
                        return Step::Restart;
                    }
                    if self.controller.is_synced() {
                        self.promote_synced("bridged on live stream");
                    }
                    return Step::Continue;
                }

                // Steady state.
                if !self.adapter.is_incremental(payload) {
                    return Step::Continue;
                }
                self.debug_sample(payload);
                let Some(inc) = self.adapter.parse_incremental(payload, ts_recv) else {
                    return Step::Continue;
                };
                if let Some(sink) = self.persist.as_mut() {
                    sink.write_incremental(&inc, "ws");
                }
                if self.controller.on_increment(&inc) == Action::NeedResync {
                    return Step::Restart;
                }
                if self.state == SyncState::WaitBridge && self.controller.is_synced() {
                    self.promote_synced("bridged on live stream");
                }
                Step::Continue
            }

            // Disconnected / Connecting / Bootstrapping: stray frames are
            // meaningless here.
            _ => Step::Continue,
        }
    }

    /// Park a raw frame; overflow means bounded data loss and a resync.
    fn buffer_frame(&mut self, payload: &str, ts_recv: Timestamp) -> Step {
        if self.buffer.len() >= self.cfg.handler.max_buffered {
            tracing::warn!(
                buffered = self.buffer.len(),
                "incremental buffer overflow, resyncing"
            );
            self.degraded = true;
            return Step::Restart;
        }
        self.buffer.push_back(BufferedFrame {
            payload: payload.to_string(),
            ts_recv,
        });
        Step::Continue
    }

    fn promote_synced(&mut self, how: &str) {
        self.state = SyncState::Synced;
        self.degraded = false;
        tracing::info!(
            venue = %self.rt.venue,
            symbol = %self.rt.symbol,
            last_seq = self.controller.last_seq(),
            "{how} -> synced"
        );
    }

    fn persist_book_state(&mut self) {
        let Some(sink) = self.persist.as_mut() else {
            return;
        };
        let book = self.controller.book();
        sink.write_book_state(
            book.bids(),
            book.asks(),
            self.controller.last_seq(),
            self.rt.caps.checksum_top_n,
            "book",
        );
    }

    /// Sampled raw-frame dump, gated on the debug toggles.
    fn debug_sample(&mut self, payload: &str) {
        let dbg = &self.cfg.debug;
        if !dbg.enabled || dbg.every == 0 {
            return;
        }
        self.inc_count += 1;
        if self.inc_count % u64::from(dbg.every) != 0 {
            return;
        }
        if dbg.raw {
            let mut cut = payload.len().min(dbg.raw_max);
            while !payload.is_char_boundary(cut) {
                cut -= 1;
            }
            tracing::debug!(n = self.inc_count, raw = &payload[..cut], "sampled frame");
        } else {
            tracing::debug!(n = self.inc_count, len = payload.len(), "sampled frame");
        }
    }
}

/// Bootstrap outcome, internal to the session loop.
enum BootstrapEnd {
    Ready(Endpoint, u64),
    Failed,
    Shutdown,
}

/// Exponential backoff with jitter.
///
/// `backoff = initial * 2^attempt`, capped at `max`; jitter adds a random
/// 0–50 % of the base on top.
pub(crate) fn calculate_backoff(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let base = initial.saturating_mul(2u32.saturating_pow(attempt)).min(max);

    let jitter_frac = rand::random::<f64>() * 0.5;
    let jitter = Duration::from_secs_f64(base.as_secs_f64() * jitter_frac);

    base + jitter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::crc32_signed;

    fn make_cfg(venue: &str) -> FeedConfig {
        let mut cfg = FeedConfig::load(None).expect("defaults");
        cfg.feed.venue = venue.to_string();
        cfg.feed.base = "BTC".to_string();
        cfg.feed.quote = "USDT".to_string();
        cfg.feed.depth_level = 400;
        cfg
    }

    fn make_handler(venue: &str) -> FeedHandler {
        FeedHandler::new(make_cfg(venue)).expect("handler")
    }

    fn ts() -> Timestamp {
        Timestamp::from_millis(1_706_000_000_000)
    }

    #[test]
    fn test_new_resolves_runtime() {
        let h = make_handler("binance");
        assert_eq!(h.rt.venue, VenueId::Binance);
        assert_eq!(h.rt.ws.host, "stream.binance.com");
        assert_eq!(h.rt.ws.target, "/ws/btcusdt@depth@100ms");
        assert_eq!(
            h.rt.rest_snapshot_target,
            "/api/v3/depth?symbol=BTCUSDT&limit=400"
        );
        assert!(h.rt.ws_subscribe_frame.is_empty());
        assert_eq!(h.rt.caps.sync_mode, SyncMode::RestAnchored);
        assert_eq!(h.state(), SyncState::Disconnected);
        assert_eq!(h.status(), FeedStatus::Resyncing);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut cfg = make_cfg("binance");
        cfg.feed.depth_level = 0;
        assert!(FeedHandler::new(cfg).is_err());

        let mut cfg = make_cfg("binance");
        cfg.feed.venue = "nope".to_string();
        assert!(FeedHandler::new(cfg).is_err());
    }

    #[test]
    fn test_open_transition_by_sync_mode() {
        let mut h = make_handler("binance");
        assert!(h.on_open_transition()); // wants a REST snapshot
        assert_eq!(h.state(), SyncState::WaitRestSnapshot);

        let mut h = make_handler("okx");
        assert!(!h.on_open_transition());
        assert_eq!(h.state(), SyncState::WaitWsSnapshot);
    }

    // Binance warm start: two incrementals buffered while waiting for the
    // snapshot; drain discards the stale one and bridges on the other.
    #[test]
    fn test_binance_warm_start() {
        let mut h = make_handler("binance");
        h.on_open_transition();

        let inc1 = r#"{"e":"depthUpdate","E":1,"s":"BTCUSDT","U":100,"u":105,"b":[["59990.00","5.0"]],"a":[]}"#;
        let inc2 = r#"{"e":"depthUpdate","E":1,"s":"BTCUSDT","U":106,"u":110,"b":[["60001.00","2.0"]],"a":[]}"#;
        assert_eq!(h.on_ws_message(inc1, ts()), Step::Continue);
        assert_eq!(h.on_ws_message(inc2, ts()), Step::Continue);
        assert_eq!(h.buffer.len(), 2);

        let body = r#"{"lastUpdateId":107,"bids":[["60000.00","1.0"]],"asks":[["60010.00","1.0"]]}"#;
        assert_eq!(h.on_snapshot_body(body), Step::Continue);

        assert_eq!(h.state(), SyncState::Synced);
        assert_eq!(h.status(), FeedStatus::Healthy);
        assert_eq!(h.controller.last_seq(), 110);
        // Stale inc1 must not have touched the book.
        let bids: Vec<i64> = h
            .controller
            .book()
            .bids()
            .iter()
            .map(|l| l.price_ticks)
            .collect();
        assert_eq!(bids, vec![6000100, 6000000]);
        assert!(h.buffer.is_empty());
    }

    #[test]
    fn test_rest_anchored_bridges_on_live_stream() {
        let mut h = make_handler("binance");
        h.on_open_transition();

        // Snapshot arrives with nothing buffered; live frames bridge later.
        let body = r#"{"lastUpdateId":107,"bids":[["60000.00","1.0"]],"asks":[]}"#;
        assert_eq!(h.on_snapshot_body(body), Step::Continue);
        assert_eq!(h.state(), SyncState::WaitBridge);

        // Pre-baseline frame: buffered, drained, discarded.
        let stale = r#"{"e":"depthUpdate","U":100,"u":105,"b":[["1.00","1"]],"a":[]}"#;
        assert_eq!(h.on_ws_message(stale, ts()), Step::Continue);
        assert_eq!(h.state(), SyncState::WaitBridge);

        let covering = r#"{"e":"depthUpdate","U":106,"u":110,"b":[["60001.00","2.0"]],"a":[]}"#;
        assert_eq!(h.on_ws_message(covering, ts()), Step::Continue);
        assert_eq!(h.state(), SyncState::Synced);
        assert_eq!(h.controller.last_seq(), 110);
    }

    #[test]
    fn test_buffer_overflow_restarts_degraded() {
        let mut cfg = make_cfg("binance");
        cfg.handler.max_buffered = 2;
        let mut h = FeedHandler::new(cfg).unwrap();
        h.on_open_transition();

        let inc = r#"{"e":"depthUpdate","U":1,"u":2,"b":[],"a":[]}"#;
        assert_eq!(h.on_ws_message(inc, ts()), Step::Continue);
        assert_eq!(h.on_ws_message(inc, ts()), Step::Continue);
        assert_eq!(h.on_ws_message(inc, ts()), Step::Restart);
        assert_eq!(h.status(), FeedStatus::Degraded);
    }

    #[test]
    fn test_ws_authoritative_snapshot_with_checksum() {
        let mut h = make_handler("okx");
        h.on_open_transition();
        assert_eq!(h.state(), SyncState::WaitWsSnapshot);

        let c1 = crc32_signed(b"50000:1.0:50010:1.0");
        let frame = format!(
            r#"{{"arg":{{"channel":"books","instId":"BTC-USDT"}},"action":"snapshot","data":[{{"bids":[["50000","1.0","0","1"]],"asks":[["50010","1.0","0","1"]],"seqId":1000,"prevSeqId":-1,"checksum":{c1}}}]}}"#
        );
        assert_eq!(h.on_ws_message(&frame, ts()), Step::Continue);
        assert_eq!(h.state(), SyncState::Synced);
        assert_eq!(h.controller.last_seq(), 1000);

        // Next update empties the bid side; checksum recomputed over the
        // remaining ask.
        let c2 = crc32_signed(b"50010:1.0");
        let update = format!(
            r#"{{"arg":{{"channel":"books","instId":"BTC-USDT"}},"action":"update","data":[{{"bids":[["50000","0","0","0"]],"asks":[],"seqId":1001,"prevSeqId":1000,"checksum":{c2}}}]}}"#
        );
        assert_eq!(h.on_ws_message(&update, ts()), Step::Continue);
        assert!(h.controller.book().bids().is_empty());
        assert_eq!(h.controller.last_seq(), 1001);
    }

    #[test]
    fn test_checksum_mismatch_restarts() {
        let mut h = make_handler("okx");
        h.on_open_transition();

        let frame = r#"{"arg":{"channel":"books","instId":"BTC-USDT"},"action":"snapshot","data":[{"bids":[["50000","1.0","0","1"]],"asks":[],"seqId":1000,"prevSeqId":-1,"checksum":42}]}"#;
        assert_eq!(h.on_ws_message(frame, ts()), Step::Restart);
        assert_ne!(h.state(), SyncState::Synced);
    }

    #[test]
    fn test_incrementals_buffered_while_waiting_ws_snapshot() {
        let mut h = make_handler("bybit");
        h.on_open_transition();
        assert_eq!(h.state(), SyncState::WaitWsSnapshot);

        let delta = r#"{"topic":"orderbook.400.BTCUSDT","type":"delta","data":{"s":"BTCUSDT","b":[["50001.00","1.0"]],"a":[],"u":101,"seq":9}}"#;
        assert_eq!(h.on_ws_message(delta, ts()), Step::Continue);
        assert_eq!(h.buffer.len(), 1);

        // Snapshot at u=100; buffered delta u=101 bridges right after.
        let snap = r#"{"topic":"orderbook.400.BTCUSDT","type":"snapshot","data":{"s":"BTCUSDT","b":[["50000.00","1.0"]],"a":[["50010.00","1.0"]],"u":100,"seq":8}}"#;
        assert_eq!(h.on_ws_message(snap, ts()), Step::Continue);
        assert_eq!(h.state(), SyncState::Synced);
        assert_eq!(h.controller.last_seq(), 101);
        assert_eq!(h.controller.book().bids().len(), 2);
    }

    #[test]
    fn test_mid_stream_snapshot_rebaselines() {
        let mut h = make_handler("bybit");
        h.on_open_transition();

        let snap = r#"{"type":"snapshot","data":{"s":"BTCUSDT","b":[["50000.00","1.0"]],"a":[],"u":100}}"#;
        assert_eq!(h.on_ws_message(snap, ts()), Step::Continue);
        assert_eq!(h.state(), SyncState::Synced);

        // Venue resyncs internally and pushes a fresh snapshot.
        let resnap = r#"{"type":"snapshot","data":{"s":"BTCUSDT","b":[["51000.00","2.0"]],"a":[],"u":500}}"#;
        assert_eq!(h.on_ws_message(resnap, ts()), Step::Continue);
        assert_eq!(h.state(), SyncState::Synced);
        assert_eq!(h.controller.last_seq(), 500);
        assert_eq!(h.controller.book().best_bid().unwrap().price_ticks, 5100000);
        assert!(h.buffer.is_empty());
    }

    // Gap resync: synced at 500, next delta starts at 510.
    #[test]
    fn test_gap_triggers_restart() {
        let mut h = make_handler("bybit");
        h.on_open_transition();

        let snap = r#"{"type":"snapshot","data":{"s":"BTCUSDT","b":[["50000.00","1.0"]],"a":[],"u":500}}"#;
        assert_eq!(h.on_ws_message(snap, ts()), Step::Continue);

        let gapped = r#"{"type":"delta","data":{"s":"BTCUSDT","b":[["50001.00","1.0"]],"a":[],"u":510}}"#;
        assert_eq!(h.on_ws_message(gapped, ts()), Step::Restart);
    }

    #[test]
    fn test_malformed_and_control_frames_ignored() {
        let mut h = make_handler("binance");
        h.on_open_transition();

        assert_eq!(h.on_ws_message(r#"{"result":null,"id":1}"#, ts()), Step::Continue);
        assert_eq!(h.on_ws_message("not json at all", ts()), Step::Continue);
        assert!(h.buffer.is_empty());

        // Classifier passes but the parser rejects: silently dropped at
        // drain time.
        let mut h = make_handler("bybit");
        h.on_open_transition();
        let snap = r#"{"type":"snapshot","data":{"s":"BTCUSDT","b":[["50000.00","1.0"]],"a":[],"u":500}}"#;
        h.on_ws_message(snap, ts());
        assert_eq!(
            h.on_ws_message(r#"{"type":"delta","data":{"b":[],"a":[]}}"#, ts()),
            Step::Continue
        );
        assert_eq!(h.controller.last_seq(), 500);
    }

    #[test]
    fn test_snapshot_rate_limit_defers_retry() {
        let mut h = make_handler("binance");
        h.on_open_transition();

        let step = h.classify_snapshot_result(Ok(RestResponse {
            status: 429,
            body: String::new(),
        }));
        assert_eq!(step, SnapshotStep::Retry(Duration::from_millis(750)));
        // No state change.
        assert_eq!(h.state(), SyncState::WaitRestSnapshot);

        let step = h.classify_snapshot_result(Ok(RestResponse {
            status: 418,
            body: String::new(),
        }));
        assert!(matches!(step, SnapshotStep::Retry(_)));
    }

    #[test]
    fn test_snapshot_http_error_restarts() {
        let mut h = make_handler("binance");
        h.on_open_transition();

        let step = h.classify_snapshot_result(Ok(RestResponse {
            status: 503,
            body: String::new(),
        }));
        assert_eq!(step, SnapshotStep::Restart);

        let step = h.classify_snapshot_result(Err(anyhow::anyhow!("timed out")));
        assert_eq!(step, SnapshotStep::Restart);
    }

    #[test]
    fn test_snapshot_body_unparseable_restarts() {
        let mut h = make_handler("binance");
        h.on_open_transition();
        assert_eq!(h.on_snapshot_body("<html>bad gateway</html>"), Step::Restart);
    }

    #[test]
    fn test_next_backoff_budget() {
        let mut cfg = make_cfg("binance");
        cfg.reconnect.max_attempts = 3;
        let h = FeedHandler::new(cfg).unwrap();

        assert!(h.next_backoff(1).is_some());
        assert!(h.next_backoff(3).is_some());
        assert!(h.next_backoff(4).is_none());
    }

    #[test]
    fn test_next_backoff_unlimited_when_zero() {
        let mut cfg = make_cfg("binance");
        cfg.reconnect.max_attempts = 0;
        let h = FeedHandler::new(cfg).unwrap();
        assert!(h.next_backoff(1_000).is_some());
    }

    #[test]
    fn test_backoff_base_doubles_and_caps() {
        let initial = Duration::from_millis(200);
        let max = Duration::from_secs(5);

        let expected_bases = [200u64, 400, 800, 1600, 3200, 5000, 5000];
        for (attempt, &expected_ms) in expected_bases.iter().enumerate() {
            let base = initial
                .saturating_mul(2u32.saturating_pow(attempt as u32))
                .min(max);
            assert_eq!(base.as_millis() as u64, expected_ms, "attempt {attempt}");

            // With jitter the result stays within [base, 1.5 * base].
            let b = calculate_backoff(initial, max, attempt as u32);
            assert!(b >= base, "attempt {attempt}: {b:?} < {base:?}");
            let upper = base + Duration::from_secs_f64(base.as_secs_f64() * 0.5);
            assert!(b <= upper, "attempt {attempt}: {b:?} > {upper:?}");
        }
    }

    #[test]
    fn test_status_reporting() {
        let mut h = make_handler("binance");
        assert_eq!(h.status(), FeedStatus::Resyncing);

        h.state = SyncState::Synced;
        assert_eq!(h.status(), FeedStatus::Healthy);

        h.state = SyncState::WaitBridge;
        h.degraded = true;
        assert_eq!(h.status(), FeedStatus::Degraded);

        h.down = true;
        assert_eq!(h.status(), FeedStatus::Down);

        h.stopped = true;
        assert_eq!(h.status(), FeedStatus::Closed);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        // Point the handler at a loopback endpoint that refuses
        // connections; cancel while it is in its backoff sleep.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut cfg = make_cfg("binance");
        cfg.endpoints.ws_host = "127.0.0.1".to_string();
        cfg.endpoints.ws_port = port.to_string();
        cfg.reconnect.initial_backoff_ms = 50;
        cfg.reconnect.max_attempts = 0;
        let mut h = FeedHandler::new(cfg).unwrap();

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });

        h.run(shutdown).await.unwrap();
        assert_eq!(h.status(), FeedStatus::Closed);
        assert_eq!(h.state(), SyncState::Disconnected);
    }

    #[tokio::test]
    async fn test_run_exhausts_reconnect_budget() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut cfg = make_cfg("binance");
        cfg.endpoints.ws_host = "127.0.0.1".to_string();
        cfg.endpoints.ws_port = port.to_string();
        cfg.reconnect.initial_backoff_ms = 10;
        cfg.reconnect.max_backoff_ms = 20;
        cfg.reconnect.max_attempts = 2;
        let mut h = FeedHandler::new(cfg).unwrap();

        let err = h.run(CancellationToken::new()).await.unwrap_err();
        assert!(format!("{err}").contains("budget"));
        assert_eq!(h.status(), FeedStatus::Down);
    }
}
