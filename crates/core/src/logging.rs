//! Logging and tracing initialization.
//!
//! [`init_tracing`] configures structured logging with two modes:
//! - **JSON mode** (`json = true`): machine-readable output with nanosecond
//!   timestamps for log aggregation.
//! - **Pretty mode** (`json = false`): human-readable colored output for
//!   local development.
//!
//! Both modes respect `RUST_LOG` for filtering (e.g.
//! `RUST_LOG=ds_market_data=debug`).
//!
//! A [`TokenSanitizer`] layer warns when a value that looks like a venue
//! bootstrap token (KuCoin bullet tokens are long high-entropy strings)
//! is about to be logged.

use std::fmt;

use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Initialize the global tracing subscriber.
///
/// # Panics
///
/// Panics if the global subscriber has already been set.
pub fn init_tracing(json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(TokenSanitizer);

    if json {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_timer(NanosecondTimer)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);

        registry.with(json_layer).init();
    } else {
        let pretty_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);

        registry.with(pretty_layer).init();
    }
}

/// Custom timer that emits nanosecond-precision timestamps for JSON logs.
#[derive(Debug, Clone)]
struct NanosecondTimer;

impl tracing_subscriber::fmt::time::FormatTime for NanosecondTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let now = chrono::Utc::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.9fZ"))
    }
}

/// A tracing layer that flags field values resembling connection tokens.
///
/// The KuCoin bootstrap flow hands out a session token that must not end up
/// in shipped logs. This layer inspects recorded fields and emits a warning
/// when a field is named like a credential or its value looks like one.
#[derive(Debug, Clone)]
pub struct TokenSanitizer;

impl<S> Layer<S> for TokenSanitizer
where
    S: tracing::Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_new_span(
        &self,
        attrs: &span::Attributes<'_>,
        _id: &span::Id,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = TokenCheckVisitor::default();
        attrs.record(&mut visitor);
        if visitor.found_token {
            tracing::warn!(
                "Potential credential detected in span fields; ensure tokens are not logged"
            );
        }
    }

    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = TokenCheckVisitor::default();
        event.record(&mut visitor);
        if visitor.found_token {
            tracing::warn!(
                "Potential credential detected in event fields; ensure tokens are not logged"
            );
        }
    }
}

/// Visitor that checks field names and values for token-like patterns.
#[derive(Default)]
struct TokenCheckVisitor {
    found_token: bool,
}

/// Field names that always indicate credentials regardless of value.
const SENSITIVE_FIELD_NAMES: &[&str] = &["token", "ws_token", "api_key", "secret", "signature"];

impl TokenCheckVisitor {
    /// Heuristic for bootstrap-token-shaped strings: long, high-entropy,
    /// base64-like.
    fn looks_like_token(value: &str) -> bool {
        if value.len() < 48 {
            return false;
        }
        value
            .chars()
            .all(|c| c.is_alphanumeric() || c == '+' || c == '/' || c == '=' || c == '-' || c == '_')
    }
}

impl Visit for TokenCheckVisitor {
    fn record_debug(&mut self, field: &Field, _value: &dyn fmt::Debug) {
        if SENSITIVE_FIELD_NAMES.contains(&field.name()) {
            self.found_token = true;
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if SENSITIVE_FIELD_NAMES.contains(&field.name()) || Self::looks_like_token(value) {
            self.found_token = true;
        }
    }
}
