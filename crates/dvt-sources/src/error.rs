use thiserror::Error;

/// Typed adapter failure. Every adapter call resolves to either observations
/// or one of these; nothing is retried inside an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Token or tunnel credentials rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Backend unreachable or answered with a server error.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Per-call bound exceeded.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Payload did not have the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl SourceError {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Unauthorized(_) => "unauthorized",
            SourceError::Unavailable(_) => "unavailable",
            SourceError::Timeout(_) => "timeout",
            SourceError::Malformed(_) => "malformed",
        }
    }

    /// Map a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            SourceError::Unauthorized(format!("{context}: http {}", status.as_u16()))
        } else if status == reqwest::StatusCode::GATEWAY_TIMEOUT
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
        {
            SourceError::Timeout(format!("{context}: http {}", status.as_u16()))
        } else {
            SourceError::Unavailable(format!("{context}: http {}", status.as_u16()))
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::Timeout(err.to_string())
        } else if err.is_decode() {
            SourceError::Malformed(err.to_string())
        } else {
            SourceError::Unavailable(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn status_mapping() {
        assert_eq!(
            SourceError::from_status(StatusCode::UNAUTHORIZED, "aggregated").kind(),
            "unauthorized"
        );
        assert_eq!(
            SourceError::from_status(StatusCode::GATEWAY_TIMEOUT, "tm").kind(),
            "timeout"
        );
        assert_eq!(
            SourceError::from_status(StatusCode::INTERNAL_SERVER_ERROR, "tm"),
            SourceError::Unavailable("tm: http 500".to_string())
        );
    }
}
