//! Append-only NDJSON sink.
//!
//! One record per line, `schema_version: 1`. Three event types share the
//! envelope: `snapshot` and `incremental` mirror the wire messages,
//! `book_state` captures the top-N of the reconstructed book after a
//! baseline is applied. Writes are best-effort: an I/O error logs a
//! warning and the sink goes quiet rather than disturbing the feed.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;

use ds_core::types::{Incremental, Level, Snapshot, Timestamp};

/// Append-only file sink for one (venue, symbol) feed.
pub struct FilePersistSink {
    out: Option<BufWriter<File>>,
    venue: String,
    symbol: String,
    persist_seq: u64,
}

impl FilePersistSink {
    /// Open (or create) the sink file in append mode, creating parent
    /// directories as needed.
    pub fn new(path: &Path, venue: &str, symbol: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening {}", path.display()))?;

        Ok(Self {
            out: Some(BufWriter::new(file)),
            venue: venue.to_string(),
            symbol: symbol.to_string(),
            persist_seq: 0,
        })
    }

    /// Records written so far.
    pub fn persist_seq(&self) -> u64 {
        self.persist_seq
    }

    /// Record a snapshot baseline.
    pub fn write_snapshot(&mut self, snap: &Snapshot, source: &str) {
        self.persist_seq += 1;
        let record = json!({
            "schema_version": 1,
            "event_type": "snapshot",
            "source": source,
            "venue": self.venue,
            "symbol": self.symbol,
            "persist_seq": self.persist_seq,
            "ts_recv_ns": snap.ts_recv.as_nanos(),
            "ts_persist_ns": Timestamp::now().as_nanos(),
            "seq_first": snap.last_update_id,
            "seq_last": snap.last_update_id,
            "checksum": snap.checksum,
            "bids": levels_json(&snap.bids),
            "asks": levels_json(&snap.asks),
        });
        self.write_line(&record);
    }

    /// Record an incremental update.
    pub fn write_incremental(&mut self, inc: &Incremental, source: &str) {
        self.persist_seq += 1;
        let record = json!({
            "schema_version": 1,
            "event_type": "incremental",
            "source": source,
            "venue": self.venue,
            "symbol": self.symbol,
            "persist_seq": self.persist_seq,
            "ts_recv_ns": inc.ts_recv.as_nanos(),
            "ts_persist_ns": Timestamp::now().as_nanos(),
            "seq_first": inc.first_seq,
            "seq_last": inc.last_seq,
            "prev_last": inc.prev_last,
            "checksum": inc.checksum,
            "bids": levels_json(&inc.bids),
            "asks": levels_json(&inc.asks),
        });
        self.write_line(&record);
    }

    /// Record the top-N of the reconstructed book.
    pub fn write_book_state(
        &mut self,
        bids: &[Level],
        asks: &[Level],
        applied_seq: u64,
        top_n: usize,
        source: &str,
    ) {
        self.persist_seq += 1;
        let record = json!({
            "schema_version": 1,
            "event_type": "book_state",
            "source": source,
            "venue": self.venue,
            "symbol": self.symbol,
            "persist_seq": self.persist_seq,
            "ts_recv_ns": 0,
            "ts_persist_ns": Timestamp::now().as_nanos(),
            "applied_seq": applied_seq,
            "top_n": top_n,
            "bids": levels_json(&bids[..bids.len().min(top_n)]),
            "asks": levels_json(&asks[..asks.len().min(top_n)]),
        });
        self.write_line(&record);
    }

    fn write_line(&mut self, record: &serde_json::Value) {
        let Some(out) = self.out.as_mut() else {
            return;
        };
        let result = writeln!(out, "{record}").and_then(|_| out.flush());
        if let Err(e) = result {
            tracing::warn!(error = %e, "persist write failed, disabling sink");
            self.out = None;
        }
    }
}

fn levels_json(levels: &[Level]) -> serde_json::Value {
    levels
        .iter()
        .map(|lvl| {
            json!({
                "price": lvl.price,
                "quantity": lvl.qty,
                "price_tick": lvl.price_ticks,
                "quantity_lot": lvl.qty_lots,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_core::types::Timestamp;

    fn level(p: &str, q: &str) -> Level {
        Level::parse(p, q).unwrap()
    }

    fn read_records(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_snapshot_record_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.ndjson");
        let mut sink = FilePersistSink::new(&path, "binance", "BTCUSDT").unwrap();

        let snap = Snapshot {
            last_update_id: 107,
            ts_recv: Timestamp::from_millis(1_706_000_000_000),
            checksum: 0,
            bids: vec![level("60000.00", "1.0")],
            asks: vec![level("60010.00", "1.0")],
        };
        sink.write_snapshot(&snap, "rest");

        let records = read_records(&path);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r["schema_version"], 1);
        assert_eq!(r["event_type"], "snapshot");
        assert_eq!(r["source"], "rest");
        assert_eq!(r["venue"], "binance");
        assert_eq!(r["symbol"], "BTCUSDT");
        assert_eq!(r["persist_seq"], 1);
        assert_eq!(r["seq_first"], 107);
        assert_eq!(r["seq_last"], 107);
        assert_eq!(r["ts_recv_ns"], 1_706_000_000_000_000_000u64);
        assert!(r["ts_persist_ns"].as_u64().unwrap() > 0);
        assert_eq!(r["bids"][0]["price"], "60000.00");
        assert_eq!(r["bids"][0]["price_tick"], 6000000);
        assert_eq!(r["bids"][0]["quantity_lot"], 1000);
    }

    #[test]
    fn test_incremental_record_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.ndjson");
        let mut sink = FilePersistSink::new(&path, "okx", "BTC-USDT").unwrap();

        let inc = Incremental {
            first_seq: 1001,
            last_seq: 1001,
            prev_last: 1000,
            ts_recv: Timestamp::from_millis(5),
            checksum: -855196043,
            bids: vec![level("50000", "0")],
            asks: vec![],
        };
        sink.write_incremental(&inc, "ws");

        let r = &read_records(&path)[0];
        assert_eq!(r["event_type"], "incremental");
        assert_eq!(r["seq_first"], 1001);
        assert_eq!(r["prev_last"], 1000);
        assert_eq!(r["checksum"], -855196043);
        assert_eq!(r["asks"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_book_state_record_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.ndjson");
        let mut sink = FilePersistSink::new(&path, "bybit", "BTCUSDT").unwrap();

        let bids = vec![level("100", "1"), level("99", "1"), level("98", "1")];
        let asks = vec![level("101", "2")];
        sink.write_book_state(&bids, &asks, 18521288, 2, "ws");

        let r = &read_records(&path)[0];
        assert_eq!(r["event_type"], "book_state");
        assert_eq!(r["applied_seq"], 18521288);
        assert_eq!(r["top_n"], 2);
        // Truncated to top_n on each side.
        assert_eq!(r["bids"].as_array().unwrap().len(), 2);
        assert_eq!(r["asks"].as_array().unwrap().len(), 1);
        assert!(r.get("seq_first").is_none());
        assert!(r.get("seq_last").is_none());
    }

    #[test]
    fn test_persist_seq_increments_across_types() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.ndjson");
        let mut sink = FilePersistSink::new(&path, "binance", "BTCUSDT").unwrap();

        sink.write_snapshot(&Snapshot::default(), "rest");
        sink.write_incremental(&Incremental::default(), "ws");
        sink.write_book_state(&[], &[], 1, 5, "ws");

        let records = read_records(&path);
        let seqs: Vec<u64> = records
            .iter()
            .map(|r| r["persist_seq"].as_u64().unwrap())
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(sink.persist_seq(), 3);
    }

    #[test]
    fn test_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.ndjson");

        let mut sink = FilePersistSink::new(&path, "binance", "BTCUSDT").unwrap();
        sink.write_snapshot(&Snapshot::default(), "rest");
        drop(sink);

        let mut sink = FilePersistSink::new(&path, "binance", "BTCUSDT").unwrap();
        sink.write_snapshot(&Snapshot::default(), "rest");

        assert_eq!(read_records(&path).len(), 2);
    }

    #[test]
    fn test_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/feed.ndjson");
        let sink = FilePersistSink::new(&path, "binance", "BTCUSDT");
        assert!(sink.is_ok());
        assert!(path.parent().unwrap().is_dir());
    }
}
