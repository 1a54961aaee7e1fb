use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock seconds since the epoch. Object TTLs and publish-record
/// expiry are expressed on this scale.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
