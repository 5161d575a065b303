//! Venue checksum validation.
//!
//! OKX-family venues attach a CRC32 over the textual top-N levels of the
//! book so consumers can detect silent divergence. The exact string encoding
//! is venue-specific, so adapters select a [`ChecksumFn`] in their
//! capability struct instead of the controller hard-coding one.

use ds_core::types::BookSide;

use crate::orderbook::L2Book;

/// Venue checksum validator: `(book, expected, top_n) -> matches`.
///
/// A plain function pointer keeps the hot path monomorphic and the
/// capability struct `Copy`.
pub type ChecksumFn = fn(&L2Book, i64, usize) -> bool;

/// CRC32 of `bytes`, reinterpreted as a signed 32-bit integer.
///
/// Venues transmit the checksum as a signed value; the bit pattern of the
/// unsigned CRC is preserved, so values with the high bit set come out
/// negative.
#[inline]
pub fn crc32_signed(bytes: &[u8]) -> i64 {
    i64::from(crc32fast::hash(bytes) as i32)
}

/// Bitget/OKX-style book checksum.
///
/// Interleaves the top-N bid and ask levels (`bid price, bid qty, ask
/// price, ask qty` per rank, skipping exhausted sides) using the venue's
/// original strings, joins the tokens with `:`, and compares the signed
/// CRC32 against `expected`.
pub fn crc32_interleaved(book: &L2Book, expected: i64, top_n: usize) -> bool {
    let mut s = String::with_capacity(top_n * 64);

    let mut append = |tok: &str| {
        if !s.is_empty() {
            s.push(':');
        }
        s.push_str(tok);
    };

    for i in 0..top_n {
        if let Some(b) = book.level(BookSide::Bid, i) {
            append(&b.price);
            append(&b.qty);
        }
        if let Some(a) = book.level(BookSide::Ask, i) {
            append(&a.price);
            append(&a.qty);
        }
    }

    crc32_signed(s.as_bytes()) == expected
}

#[cfg(test)]
mod tests {
    use super::*;
    use ds_core::types::Level;

    fn book(bids: &[(&str, &str)], asks: &[(&str, &str)]) -> L2Book {
        let mut book = L2Book::new(32);
        for (p, q) in bids {
            book.update(BookSide::Bid, Level::parse(p, q).unwrap());
        }
        for (p, q) in asks {
            book.update(BookSide::Ask, Level::parse(p, q).unwrap());
        }
        book
    }

    #[test]
    fn test_crc32_signed_known_vector() {
        // Standard CRC32 check value: crc32("123456789") = 0xCBF43926,
        // which is negative when reinterpreted as i32.
        assert_eq!(crc32_signed(b"123456789"), -873_187_034);
    }

    #[test]
    fn test_crc32_signed_empty() {
        assert_eq!(crc32_signed(b""), 0);
    }

    #[test]
    fn test_interleaved_encoding_matches_reference_string() {
        let book = book(&[("50000", "1.0"), ("49999", "2.0")], &[("50010", "1.5")]);
        // rank 0: bid 50000:1.0, ask 50010:1.5; rank 1: bid 49999:2.0
        let expected = crc32_signed(b"50000:1.0:50010:1.5:49999:2.0");
        assert!(crc32_interleaved(&book, expected, 25));
        assert!(!crc32_interleaved(&book, expected + 1, 25));
    }

    #[test]
    fn test_top_n_limits_levels() {
        let book = book(
            &[("100", "1"), ("99", "1"), ("98", "1")],
            &[("101", "1"), ("102", "1")],
        );
        // top_n = 1 only hashes the best bid and best ask.
        let expected = crc32_signed(b"100:1:101:1");
        assert!(crc32_interleaved(&book, expected, 1));
    }

    #[test]
    fn test_one_sided_book() {
        let book = book(&[], &[("101", "1.5")]);
        let expected = crc32_signed(b"101:1.5");
        assert!(crc32_interleaved(&book, expected, 25));
    }

    #[test]
    fn test_empty_book_checksum() {
        let book = L2Book::new(4);
        assert!(crc32_interleaved(&book, 0, 25));
        assert!(!crc32_interleaved(&book, 1, 25));
    }

    #[test]
    fn test_uses_original_strings_not_normalized_values() {
        // "1.50" and "1.5" are the same quantity but hash differently; the
        // venue hashes its own textual form.
        let a = book(&[("100", "1.50")], &[]);
        let b = book(&[("100", "1.5")], &[]);
        let expected_a = crc32_signed(b"100:1.50");
        assert!(crc32_interleaved(&a, expected_a, 25));
        assert!(!crc32_interleaved(&b, expected_a, 25));
    }
}
