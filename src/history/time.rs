//! # Timestamp Normalization
//!
//! Converts the vendors' native visit-time encodings into `DateTime<Utc>`.
//! Chromium-family browsers store microseconds since 1601-01-01T00:00:00Z;
//! Firefox stores microseconds since the Unix epoch. Every downstream
//! timestamp flows through these two functions, so they reject anything
//! out of range instead of guessing.

use chrono::{DateTime, TimeZone, Utc};

/// Seconds between 1601-01-01 and 1970-01-01, in microseconds.
pub const CHROMIUM_EPOCH_OFFSET_MICROS: i64 = 11_644_473_600_000_000;

/// Convert a Chromium visit time (microseconds since 1601) to UTC.
///
/// Values that predate the Unix epoch fail normalization and return `None`;
/// the affected row is dropped by the caller, never the whole read.
pub fn chromium_to_utc(raw: i64) -> Option<DateTime<Utc>> {
    let unix_micros = raw.checked_sub(CHROMIUM_EPOCH_OFFSET_MICROS)?;
    if unix_micros < 0 {
        return None;
    }
    Utc.timestamp_micros(unix_micros).single()
}

/// Convert a Firefox visit time (microseconds since 1970) to UTC.
pub fn firefox_to_utc(raw: i64) -> Option<DateTime<Utc>> {
    if raw < 0 {
        return None;
    }
    Utc.timestamp_micros(raw).single()
}

/// Inverse mapping used to build the server-side `WHERE` bound.
pub fn utc_to_chromium_raw(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
        .saturating_add(CHROMIUM_EPOCH_OFFSET_MICROS)
}

/// Inverse mapping for the Firefox `WHERE` bound.
pub fn utc_to_firefox_raw(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn chromium_offset_maps_to_unix_epoch() {
        let ts = chromium_to_utc(CHROMIUM_EPOCH_OFFSET_MICROS).expect("normalize");
        assert_eq!(ts, Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn chromium_values_below_offset_fail() {
        assert!(chromium_to_utc(CHROMIUM_EPOCH_OFFSET_MICROS - 1).is_none());
        assert!(chromium_to_utc(0).is_none());
        assert!(chromium_to_utc(-1).is_none());
    }

    #[test]
    fn chromium_known_value() {
        let ts = chromium_to_utc(13_331_865_600_000_000).expect("normalize");
        assert_eq!(ts, Utc.with_ymd_and_hms(2023, 6, 22, 0, 0, 0).unwrap());
    }

    #[test]
    fn firefox_is_identity_on_unix_micros() {
        let ts = firefox_to_utc(1_687_392_000_000_000).expect("normalize");
        assert_eq!(ts.timestamp_micros(), 1_687_392_000_000_000);
        assert_eq!(ts, Utc.with_ymd_and_hms(2023, 6, 22, 0, 0, 0).unwrap());
    }

    #[test]
    fn firefox_rejects_negative() {
        assert!(firefox_to_utc(-1).is_none());
    }

    #[test]
    fn where_bounds_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(chromium_to_utc(utc_to_chromium_raw(ts)), Some(ts));
        assert_eq!(firefox_to_utc(utc_to_firefox_raw(ts)), Some(ts));
    }
}
