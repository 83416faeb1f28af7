//! Error types for GitHub API access and the retry classifier.
//!
//! Every transport call funnels its failure into [`ApiError`], and
//! [`classify`] decides whether that failure is worth retrying.

use thiserror::Error;

/// Rate-limit headers captured from a failed response.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Value of `X-RateLimit-Remaining`, if present.
    pub remaining: Option<u64>,
    /// Value of `X-RateLimit-Reset` (unix seconds), if present.
    pub reset: Option<i64>,
}

impl RateLimitInfo {
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

/// Errors raised while talking to the GitHub REST and GraphQL APIs.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Connection, timeout or body-read failure below the HTTP layer.
    #[error("GitHub transport error: {0}")]
    Transport(#[from] octocrab::Error),

    /// The API answered with a non-2xx status.
    #[error("GitHub API returned {status}: {message}")]
    Status {
        status: u16,
        message: String,
        rate_limit: RateLimitInfo,
    },

    /// A well-formed GraphQL response carrying an `errors` array.
    #[error("GraphQL error: {0}")]
    GraphQl(String),

    /// The response body could not be decoded.
    #[error("Failed to decode GitHub response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// HTTP status code, for `Status` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// True for 429, and for 403 responses that report an exhausted quota.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            ApiError::Status {
                status: 429, ..
            } => true,
            ApiError::Status {
                status: 403,
                rate_limit,
                ..
            } => rate_limit.is_exhausted(),
            _ => false,
        }
    }

    pub fn rate_limit(&self) -> Option<&RateLimitInfo> {
        match self {
            ApiError::Status { rate_limit, .. } => Some(rate_limit),
            _ => None,
        }
    }
}

/// Retry eligibility of a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Fatal,
}

/// Maps a failure to [`ErrorClass::Transient`] or [`ErrorClass::Fatal`].
///
/// Permission, not-found and unprocessable responses are fatal. A 403 is
/// only transient when it is a rate limit. GraphQL errors describe a bad
/// query, not a flaky network, so they are fatal too. Everything else,
/// including unknown statuses and undecodable bodies, is retried.
pub fn classify(error: &ApiError) -> ErrorClass {
    match error {
        ApiError::Transport(_) => ErrorClass::Transient,
        ApiError::GraphQl(_) => ErrorClass::Fatal,
        ApiError::Decode(_) => ErrorClass::Transient,
        ApiError::Status { .. } if error.is_rate_limited() => ErrorClass::Transient,
        ApiError::Status { status, .. } => match status {
            401 | 403 | 404 | 422 => ErrorClass::Fatal,
            429 | 500 | 502 | 503 | 504 => ErrorClass::Transient,
            _ => ErrorClass::Transient,
        },
    }
}
