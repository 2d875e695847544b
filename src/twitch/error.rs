use thiserror::Error;

/// Errors from the clips API client.
///
/// `is_retryable()` separates transient failures (transport errors, rate
/// limits, server errors) from ones that will not improve on a second try.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The API rejected the bearer token even after one refresh.
    #[error("Access token rejected: {0}")]
    AuthExpired(String),

    /// The token endpoint refused the client-credentials grant.
    #[error("Token request failed (HTTP {status}): {body}")]
    TokenRequest { status: u16, body: String },

    #[error("Clips API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed API response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => *status == 429 || *status >= 500,
            ApiError::Http(_) => true,
            ApiError::AuthExpired(_)
            | ApiError::TokenRequest { .. }
            | ApiError::MalformedResponse(_) => false,
        }
    }
}
