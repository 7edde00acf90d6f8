use std::path::PathBuf;

use thiserror::Error;

/// Error taxonomy for the hot reload core (spec.md §7).
#[derive(Error, Debug)]
pub enum HotReloadError {
    /// Missing or unreadable files named in a spec; malformed spec text.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Credential file cannot be parsed with the declared format tag.
    #[error("failed to parse credentials (format={format_tag}): {reason}")]
    Parse { format_tag: String, reason: String },

    /// Spec valid but a subsequent reload failed (file transiently missing,
    /// password mismatch, truncated file). Previous credentials are preserved.
    #[error("reload failed for {path}: {reason}")]
    Reload { path: PathBuf, reason: String },

    /// Attempted write to a read-only credential store.
    #[error("credential store is read-only; writes must go through the filesystem")]
    ReadOnly,

    /// Engine-level failure during forced renegotiation or close-outbound.
    #[error("TLS reset failed: {0}")]
    TlsReset(String),

    /// Unsupported protocol or missing algorithm in the host provider.
    #[error("host stack error: {0}")]
    HostStack(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HotReloadError>;
