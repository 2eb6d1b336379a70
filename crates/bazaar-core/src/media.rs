//! Stored upload paths as exposed to clients.

/// Normalize a stored file path: forward slashes only, no leading `public/`.
#[must_use]
pub fn public_asset_path(raw: &str) -> String {
    let normalized = raw.trim().replace('\\', "/");
    let trimmed = normalized.trim_start_matches("./");
    trimmed
        .strip_prefix("public/")
        .unwrap_or(trimmed)
        .to_string()
}
