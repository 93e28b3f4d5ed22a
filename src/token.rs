//! Rotating pool of API credentials for rate-limited registries

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use tracing::debug;

use crate::error::{MonlerError, TokenError};

pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RateState {
    /// `None` until the first response reports a quota.
    remaining: Option<u64>,
    reset_at: DateTime<Utc>,
}

/// One credential with its last known quota.
#[derive(Debug)]
pub struct TokenInfo {
    token: String,
    state: Mutex<RateState>,
    in_use: AtomicBool,
}

impl TokenInfo {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            state: Mutex::new(RateState {
                remaining: None,
                reset_at: DateTime::UNIX_EPOCH,
            }),
            in_use: AtomicBool::new(false),
        }
    }

    fn state(&self) -> RateState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn remaining(&self) -> Option<u64> {
        self.state().remaining
    }

    pub fn reset_at(&self) -> DateTime<Utc> {
        self.state().reset_at
    }

    pub fn in_use(&self) -> bool {
        self.in_use.load(Ordering::Acquire)
    }

    pub fn set_rate(&self, remaining: u64, reset_at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.remaining = Some(remaining);
        state.reset_at = reset_at;
    }

    /// Fails with `TokenReachLimit` while the quota is spent and the reset
    /// time has not passed.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), TokenError> {
        let state = self.state();
        if state.remaining == Some(0) && now < state.reset_at {
            Err(TokenError::TokenReachLimit)
        } else {
            Ok(())
        }
    }

    /// Reads the rate-limit headers of a response. Missing or malformed
    /// headers leave the previous values untouched.
    pub fn update_from_headers(&self, headers: &HeaderMap) -> Result<(), TokenError> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .ok_or_else(|| TokenError::InvalidHeader(format!("missing {name}")))
        };

        let remaining: u64 = header(RATE_LIMIT_REMAINING)?
            .parse()
            .map_err(|e| TokenError::InvalidHeader(format!("{RATE_LIMIT_REMAINING}: {e}")))?;
        let reset: i64 = header(RATE_LIMIT_RESET)?
            .parse()
            .map_err(|e| TokenError::InvalidHeader(format!("{RATE_LIMIT_RESET}: {e}")))?;
        let reset_at = DateTime::from_timestamp(reset, 0)
            .ok_or_else(|| TokenError::InvalidHeader(format!("{RATE_LIMIT_RESET}: {reset}")))?;

        self.set_rate(remaining, reset_at);
        Ok(())
    }

    fn try_lock(&self) -> bool {
        self.in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn unlock(&self) {
        self.in_use.store(false, Ordering::Release);
    }
}

/// Exclusive use of one credential; released on drop.
#[derive(Debug)]
pub struct TokenLease {
    info: Arc<TokenInfo>,
}

impl TokenLease {
    pub fn token(&self) -> &str {
        &self.info.token
    }

    pub fn info(&self) -> &TokenInfo {
        &self.info
    }
}

impl Drop for TokenLease {
    fn drop(&mut self) {
        self.info.unlock();
    }
}

#[derive(Debug, Clone, Default)]
pub struct TokenPool {
    tokens: Vec<Arc<TokenInfo>>,
}

impl TokenPool {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(Into::into)
                .filter(|t: &String| !t.trim().is_empty())
                .map(|t| Arc::new(TokenInfo::new(t)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[Arc<TokenInfo>] {
        &self.tokens
    }

    /// First credential that is neither in use nor exhausted.
    pub fn acquire(&self) -> Result<TokenLease, TokenError> {
        self.acquire_at(Utc::now())
    }

    pub fn acquire_at(&self, now: DateTime<Utc>) -> Result<TokenLease, TokenError> {
        for info in &self.tokens {
            if !info.try_lock() {
                continue;
            }
            let lease = TokenLease {
                info: Arc::clone(info),
            };
            if info.validate(now).is_ok() {
                return Ok(lease);
            }
        }
        Err(TokenError::NoToken)
    }

    /// Earliest reset among exhausted credentials, for callers that want to
    /// delay instead of failing.
    pub fn next_reset(&self) -> Option<DateTime<Utc>> {
        let now = Utc::now();
        self.tokens
            .iter()
            .filter(|info| info.validate(now).is_err())
            .map(|info| info.reset_at())
            .min()
    }

    /// Sends the request with a bearer credential from the pool, holding the
    /// credential until the response headers are read.
    pub async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, MonlerError> {
        let lease = self.acquire()?;
        let response = request.bearer_auth(lease.token()).send().await?;
        if let Err(e) = lease.info().update_from_headers(response.headers()) {
            debug!("Keeping previous rate limit for token: {}", e);
        }
        Ok(response)
    }
}
