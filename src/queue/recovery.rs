use super::{EntryStatus, QueueEntry};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Entries left `running` by a previous process go back to `pending`; their
/// attempt count is kept. Returns the ids that were reset.
pub fn reset_interrupted(entries: &mut [QueueEntry], now: i64) -> Vec<String> {
    let mut reset = Vec::new();
    for entry in entries
        .iter_mut()
        .filter(|entry| entry.status == EntryStatus::Running)
    {
        entry.status = EntryStatus::Pending;
        entry.last_error = Some("interrupted by restart".to_string());
        entry.updated_at = now;
        reset.push(entry.id.clone());
    }
    reset
}

pub(crate) fn quarantine_name(index: usize, name: &str) -> String {
    let ext = Path::new(name)
        .extension()
        .and_then(|v| v.to_str())
        .unwrap_or("json");
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    let hash = digest[..8]
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    format!("recovered_{index}_{hash}.{ext}")
}
