use sha2::{Digest, Sha256};

/// Normalize displayed text for fingerprinting and dedup signatures.
///
/// Rules:
/// - Convert to lowercase
/// - Remove all non-alphanumeric characters (except spaces)
/// - Collapse multiple spaces into single spaces
/// - Trim leading/trailing whitespace
///
/// This keeps fingerprints stable against minor rendering differences
/// while still detecting meaningful content changes.
pub fn normalize_display_text(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fingerprint of the currently displayed panel content.
///
/// SHA256 over the normalized text. Compared across selections to
/// detect that the UI has actually advanced to a new item.
pub fn panel_fingerprint(text: &str) -> String {
    let normalized = normalize_display_text(text);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// SHA256 of raw bytes, hex-encoded. Used for artifact change detection.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Stable dedup signature for a list item without an external id:
/// md5 over the account id plus the normalized display text.
pub fn dedup_signature(account_key: &str, display_text: &str) -> String {
    let normalized = normalize_display_text(display_text);
    let digest = md5::compute(format!("{account_key}|{normalized}").as_bytes());
    format!("{digest:x}")
}
