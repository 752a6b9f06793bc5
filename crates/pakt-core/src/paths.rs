use crate::version::SCHEMA_VERSION;
use std::path::PathBuf;

/// Default home directory for pakt.
///
/// Uses platform-appropriate locations with versioning:
/// - Linux: `$XDG_CACHE_HOME/pakt/v{N}` or `~/.cache/pakt/v{N}`
/// - macOS: `~/Library/Caches/pakt/v{N}`
/// - Windows: `%LOCALAPPDATA%\pakt\v{N}`
#[must_use]
pub fn default_home_dir() -> PathBuf {
    let base = dirs_next::cache_dir().map_or_else(
        || {
            dirs_next::home_dir().map_or_else(
                || PathBuf::from(".pakt"),
                |p| p.join(".cache").join("pakt"),
            )
        },
        |p| p.join("pakt"),
    );

    base.join(format!("v{SCHEMA_VERSION}"))
}
