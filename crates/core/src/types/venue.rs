//! Venue identifiers and per-venue symbol string formatting.
//!
//! Every venue spells the same trading pair differently, and several spell
//! it differently again between their WebSocket and REST surfaces. The
//! mapping lives here so adapters never concatenate symbol strings ad hoc.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Supported venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VenueId {
    /// Binance spot.
    Binance,
    /// OKX spot.
    Okx,
    /// Bybit spot.
    Bybit,
    /// Bitget spot.
    Bitget,
    /// KuCoin spot.
    Kucoin,
}

impl VenueId {
    /// Parse a venue name, case-insensitively.
    ///
    /// Returns `None` for anything that is not one of
    /// `binance, okx, bybit, bitget, kucoin`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "binance" => Some(VenueId::Binance),
            "okx" => Some(VenueId::Okx),
            "bybit" => Some(VenueId::Bybit),
            "bitget" => Some(VenueId::Bitget),
            "kucoin" => Some(VenueId::Kucoin),
            _ => None,
        }
    }

    /// Lowercase canonical name, as accepted by [`VenueId::parse`].
    pub fn as_str(&self) -> &'static str {
        match self {
            VenueId::Binance => "binance",
            VenueId::Okx => "okx",
            VenueId::Bybit => "bybit",
            VenueId::Bitget => "bitget",
            VenueId::Kucoin => "kucoin",
        }
    }

    /// Symbol form used in WebSocket topics / stream paths.
    ///
    /// | Venue | Form |
    /// |---|---|
    /// | Binance | lowercase concatenated (`btcusdt`) |
    /// | OKX | dashed uppercase (`BTC-USDT`) |
    /// | Bybit | concatenated uppercase (`BTCUSDT`) |
    /// | Bitget | concatenated uppercase |
    /// | KuCoin | dashed uppercase |
    pub fn ws_symbol(&self, base: &str, quote: &str) -> String {
        let base = base.to_ascii_uppercase();
        let quote = quote.to_ascii_uppercase();
        match self {
            VenueId::Binance => format!("{base}{quote}").to_ascii_lowercase(),
            VenueId::Okx | VenueId::Kucoin => format!("{base}-{quote}"),
            VenueId::Bybit | VenueId::Bitget => format!("{base}{quote}"),
        }
    }

    /// Symbol form used in REST query strings.
    ///
    /// Differs from [`ws_symbol`](Self::ws_symbol) for Binance (uppercase
    /// concatenated) and Bitget (dashed).
    pub fn rest_symbol(&self, base: &str, quote: &str) -> String {
        let base = base.to_ascii_uppercase();
        let quote = quote.to_ascii_uppercase();
        match self {
            VenueId::Binance | VenueId::Bybit => format!("{base}{quote}"),
            VenueId::Okx | VenueId::Bitget | VenueId::Kucoin => format!("{base}-{quote}"),
        }
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
