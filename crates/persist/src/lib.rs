//! # ds-persist
//!
//! Append-only persistence for depthstream: line-delimited JSON records of
//! snapshots, incrementals, and periodic book states, written best-effort
//! so a slow or broken disk never stalls the feed.

pub mod sink;

pub use sink::FilePersistSink;
