//! Error taxonomy for the engine (spec.md §7), composed on top of
//! `orbit_client::Error`/`orbit_core::Error` the way `kube_runtime::watcher::Error`
//! wraps `kube::Error`.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Client(#[from] orbit_client::Error),

    #[error(transparent)]
    Core(#[from] orbit_core::Error),

    /// A peer with strictly higher priority is live; the caller should not
    /// have reached here (freeze is checked before dispatch) but this gives
    /// call sites something to propagate if they do.
    #[error("operator instance is frozen by a higher-priority peer")]
    Frozen,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// What a handler callback returns (spec.md §7, handler-facing half of the
/// taxonomy: `TemporaryError`/`PermanentError`/`UnexpectedException`).
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("temporary error, retry after {delay:?}: {message}")]
    Temporary { delay: Duration, message: String },

    #[error("permanent error: {message}")]
    Permanent { message: String },

    /// Any other error a handler returns; dispatched per the handler's
    /// `errors` mode (spec.md §4.10 step 7).
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl HandlerError {
    pub fn temporary(delay: Duration, message: impl Into<String>) -> Self {
        Self::Temporary { delay, message: message.into() }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent { message: message.into() }
    }
}
