//! Key layout in the coordination store
//!
//! - `<leader_key>`: identity of the current leader, bound to its lease
//! - `<hashes_key>/<batch_counter>`: comma-joined IDs of one committed batch

/// Key holding the digest of batch `counter`
pub fn batch_key(hashes_key: &str, counter: u64) -> String {
    format!("{}/{}", hashes_key.trim_end_matches('/'), counter)
}

/// Prefix to watch for newly published batches
pub fn batch_prefix(hashes_key: &str) -> String {
    format!("{}/", hashes_key.trim_end_matches('/'))
}

/// Extract the batch counter from a batch key, if it is one
pub fn parse_batch_counter(hashes_key: &str, key: &str) -> Option<u64> {
    key.strip_prefix(&batch_prefix(hashes_key))?.parse().ok()
}
