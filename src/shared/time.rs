use chrono::{TimeZone, Utc};

pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// `Mon Jan 2 15:04:05 UTC 2006` style stamp used in step logs.
pub fn human_timestamp(unix_secs: i64) -> String {
    match Utc.timestamp_opt(unix_secs, 0).single() {
        Some(at) => at.format("%a %b %-d %H:%M:%S UTC %Y").to_string(),
        None => unix_secs.to_string(),
    }
}
