use std::path::PathBuf;

use thiserror::Error;

/// Error kinds surfaced by the watch registry, crawler, dispatcher, session
/// registry, command server, and client library.
///
/// Per-path and per-session errors are recovered in place by callers; only
/// [`GalaxyError::NotifyInitFailed`], [`GalaxyError::AlreadyRunning`], and a
/// daemon-wide [`GalaxyError::ListenBindFailed`] on the well-known control
/// socket abort startup.
#[derive(Error, Debug)]
pub enum GalaxyError {
    #[error("failed to initialize inotify: {0}")]
    NotifyInitFailed(#[source] std::io::Error),

    #[error("failed to install watch on {path}: {source}")]
    WatchInstallFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind listening socket at {path}: {source}")]
    ListenBindFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to compile rule regex {regex:?}: {source}")]
    RegexCompileFailed {
        regex: String,
        #[source]
        source: regex::Error,
    },

    #[error("write to client delivery socket failed: {0}")]
    ClientWriteFailed(#[source] std::io::Error),

    #[error("client protocol error: {0}")]
    ClientProtocolError(String),

    #[error("kernel event queue overflowed, events may have been lost")]
    KernelOverflow,

    #[error("galaxyd is already running (lockfile held)")]
    AlreadyRunning,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GalaxyError>;
