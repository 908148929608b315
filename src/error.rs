use crate::Session;
use crate::config::ConfigError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Backend(String),

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("timed out waiting for a pooled connection")]
    PoolTimeout,

    #[error("invalid session cookie: {0}")]
    Cookie(String),

    #[error("session payload is {size} bytes, above the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Encoding failed with: {0}")]
    Encode(String),

    #[error("Decoding failed with: {0}")]
    Decode(String),
}

#[cfg(feature = "redis-store")]
impl From<fred::error::Error> for Error {
    fn from(err: fred::error::Error) -> Self {
        Error::Backend(err.to_string())
    }
}

/// A failed session lookup.
///
/// Lookups never leave the caller without a session: the fresh session
/// created for the request travels with the error and can be used as is.
#[derive(thiserror::Error, Debug)]
#[error("{source}")]
pub struct LoadError {
    pub session: Session,
    #[source]
    pub source: Error,
}

impl LoadError {
    pub fn into_session(self) -> Session {
        self.session
    }
}
