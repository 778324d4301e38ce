use std::collections::TryReserveError;

/// Errors raised by the zone registry.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Zone not found")]
    ZoneNotFound,

    #[error("Zone already exists")]
    ZoneAlreadyExists,

    #[error("Zone limit exceeded")]
    ZoneLimitExceeded,

    #[error("The default zone cannot be removed")]
    DefaultZone,

    #[error("Cookie error: {0}")]
    Cookie(#[from] CookieError),
}

/// Errors raised by the cookie jar, its codec and its stores.
///
/// A cookie rejected by policy (global, per-site or by the user) is not an
/// error; it is reported through [`AcceptReport`](crate::cookies::AcceptReport).
#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    /// A header or file record could not be decoded; the item is dropped.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// An allocation failed while parsing or indexing; prior state is intact.
    #[error("Resource exhausted")]
    ResourceExhausted,

    /// The cookie file could not be written; the in-memory jar stays authoritative.
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(#[from] std::io::Error),

    /// The cookie file could not be read at all.
    #[error("Unreadable cookie file: {0}")]
    Format(String),
}

impl From<TryReserveError> for CookieError {
    fn from(_: TryReserveError) -> Self {
        CookieError::ResourceExhausted
    }
}

pub type CookieResult<T> = Result<T, CookieError>;
