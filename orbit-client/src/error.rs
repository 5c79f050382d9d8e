use thiserror::Error;

/// Errors surfaced by `orbit-client` (spec.md §7 taxonomy, transport-facing
/// half).
#[derive(Debug, Error)]
pub enum Error {
    /// No valid entry in the [`Vault`](crate::vault::Vault); fatal at
    /// startup, retried on reconfiguration at runtime.
    #[error("no valid credentials available: {0}")]
    Login(String),

    /// Authenticated but the API is unreachable or forbidden at probe time;
    /// fatal at startup.
    #[error("cannot access cluster API: {0}")]
    Access(String),

    /// HTTP 401: escalates as a login failure, triggering re-authentication.
    #[error("401 unauthorized, credentials need refreshing")]
    Unauthorized,

    /// HTTP 403/404, surfaced so callers can swallow it when a default was
    /// supplied (spec.md §4.4).
    #[error("{status} from the API server: {message}")]
    Api { status: u16, message: String },

    /// HTTP 409, during PATCH: caller should refetch and replay the cycle.
    #[error("409 conflict, object was modified concurrently")]
    Conflict,

    /// HTTP 410, during WATCH: caller should re-LIST and resume.
    #[error("410 gone, resource version no longer valid")]
    Gone,

    /// Connection-level failure; bubbles up to the watcher for restart.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed JSON from API server: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] orbit_core::Error),
}

impl Error {
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 => Error::Unauthorized,
            409 => Error::Conflict,
            410 => Error::Gone,
            _ => Error::Api {
                status,
                message: message.into(),
            },
        }
    }

    /// HTTP 403/404, which callers may swallow when a default is supplied.
    pub fn is_not_found_or_forbidden(&self) -> bool {
        matches!(self, Error::Api { status: 403 | 404, .. })
    }

    /// HTTP 429/503/504, retried with backoff by `client.rs`'s `send`;
    /// grounded on `kube_client::client::retry::RetryPolicy`'s retryable
    /// status set.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Api { status: 429 | 503 | 504, .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
