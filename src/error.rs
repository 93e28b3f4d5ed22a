use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PkgUriError {
    #[error("no uri in identifier")]
    NoUri,

    #[error("invalid host: {0}")]
    Host(String),

    #[error("invalid path: {0}")]
    Path(String),

    #[error("missing or invalid scheme in {0:?}")]
    Scheme(String),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("no usable token available")]
    NoToken,

    #[error("token reached its rate limit")]
    TokenReachLimit,

    #[error("invalid rate limit header: {0}")]
    InvalidHeader(String),
}

#[derive(Debug, Error)]
pub enum MonlerError {
    #[error("url not supported: {0}")]
    NotSupport(String),

    #[error("resource does not exist: {0}")]
    NotExist(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("token error: {0}")]
    Token(#[from] TokenError),

    #[error("end of report")]
    EndOfReport,

    #[error("cursor not started, call next() first")]
    CursorNotStarted,

    #[error("no latest tag")]
    NoLatestTag,

    #[error("invalid identifier: {0}")]
    Uri(#[from] PkgUriError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Rate limited: retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl MonlerError {
    pub fn not_support(url: impl Into<String>) -> Self {
        Self::NotSupport(url.into())
    }

    pub fn not_exist(what: impl Into<String>) -> Self {
        Self::NotExist(what.into())
    }

    pub fn is_not_support(&self) -> bool {
        matches!(self, Self::NotSupport(_) | Self::Uri(_))
    }

    pub fn is_not_exist(&self) -> bool {
        matches!(self, Self::NotExist(_))
    }

    /// True when retrying later may succeed (quota or rate limit).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Token(TokenError::NoToken | TokenError::TokenReachLimit)
                | Self::RateLimited { .. }
                | Self::DeadlineExceeded
        )
    }
}

pub type Result<T, E = MonlerError> = std::result::Result<T, E>;
