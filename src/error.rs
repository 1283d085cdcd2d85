//! Error types shared across the proxy, cache, backends, and crawler.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy per the proxy's error handling design: client errors render
/// a templated response immediately, upstream misses become 404s, transient
/// upstream failures are logged and downgraded to misses, and store failures
/// surface as 500s on the serving path (or a counted error on the crawler).
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request line/headers, missing Host, or CONNECT.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Blocked by the allowlist access mode.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Admin auth failed.
    #[error("unauthorized")]
    Unauthorized,

    /// Method/feature not supported (CONNECT).
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Backend chain produced no response.
    #[error("not found: {0}")]
    NotFound(String),

    /// The key-value store could not be reached or returned malformed data.
    #[error("store error: {0}")]
    Store(String),

    /// Config loading/parsing failure.
    #[error("config error: {0}")]
    Config(#[from] figment::Error),

    /// Anything unexpected that should surface as a best-effort 500.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<deadpool_redis::PoolError> for Error {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Store(format!("envelope decode failed: {e}"))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Internal(format!("upstream request failed: {e}"))
    }
}

impl Error {
    /// The HTTP status code this error should be rendered as on the client
    /// connection.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::BadRequest(_) => 400,
            Error::Forbidden(_) => 403,
            Error::Unauthorized => 401,
            Error::NotFound(_) => 404,
            Error::NotImplemented(_) => 501,
            Error::Store(_) | Error::Config(_) | Error::Internal(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(Error::BadRequest("x".into()).status_code(), 400);
        assert_eq!(Error::Forbidden("x".into()).status_code(), 403);
        assert_eq!(Error::NotFound("x".into()).status_code(), 404);
        assert_eq!(Error::NotImplemented("x".into()).status_code(), 501);
        assert_eq!(Error::Internal("x".into()).status_code(), 500);
    }
}
