//! Record key encoding.
//!
//! Every stored record is keyed by 24 bytes:
//!
//! ```text
//! bytes  0..6   ULID timestamp: span start time in big-endian milliseconds
//! bytes  6..16  ULID randomness
//! bytes 16..24  span id, zero-padded or truncated to 8 bytes
//! ```
//!
//! Bytewise key order therefore equals chronological order to millisecond
//! resolution, with the randomness breaking ties, and the suffix lets scans
//! match a span id against raw keys without decompressing the value.

use chrono::{DateTime, Utc};
use rand::Rng;
use ulid::Ulid;

/// Length of a stored record key.
pub const KEY_LEN: usize = 24;

/// Length of the span-id suffix.
pub const SPAN_ID_LEN: usize = 8;

const ULID_LEN: usize = 16;
const TIMESTAMP_LEN: usize = 6;

/// Build the record key for a span starting at `start`.
///
/// The RNG is injected so callers with deterministic requirements (tests)
/// can pin the randomness; production callers pass `rand::thread_rng()`.
pub fn span_key<R: Rng>(start: DateTime<Utc>, span_id: &[u8], rng: &mut R) -> [u8; KEY_LEN] {
    let ulid = Ulid::from_parts(start.timestamp_millis() as u64, rng.gen());
    let mut key = [0u8; KEY_LEN];
    key[..ULID_LEN].copy_from_slice(&ulid.to_bytes());
    let len = span_id.len().min(SPAN_ID_LEN);
    key[ULID_LEN..ULID_LEN + len].copy_from_slice(&span_id[..len]);
    key
}

/// Smallest possible key for the millisecond of `t`.
pub fn lower_bound_key(t: DateTime<Utc>) -> [u8; KEY_LEN] {
    time_bound_key(t, 0x00)
}

/// Largest possible key for the millisecond of `t`.
pub fn upper_bound_key(t: DateTime<Utc>) -> [u8; KEY_LEN] {
    time_bound_key(t, 0xFF)
}

fn time_bound_key(t: DateTime<Utc>, fill: u8) -> [u8; KEY_LEN] {
    let ms = t.timestamp_millis() as u64;
    let mut key = [fill; KEY_LEN];
    key[..TIMESTAMP_LEN].copy_from_slice(&ms.to_be_bytes()[8 - TIMESTAMP_LEN..]);
    key
}

/// Extract the millisecond timestamp from a stored key prefix.
///
/// Returns `None` for keys shorter than the timestamp prefix.
pub fn key_timestamp_ms(key: &[u8]) -> Option<i64> {
    if key.len() < TIMESTAMP_LEN {
        return None;
    }
    let mut buf = [0u8; 8];
    buf[8 - TIMESTAMP_LEN..].copy_from_slice(&key[..TIMESTAMP_LEN]);
    Some(i64::from_be_bytes(buf))
}

/// The span-id suffix of a well-formed record key, `None` otherwise.
pub fn key_span_id(key: &[u8]) -> Option<&[u8]> {
    (key.len() == KEY_LEN).then(|| &key[ULID_LEN..])
}
