//! Shared HTTP plumbing for registry clients

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{MonlerError, Result};

pub const USER_AGENT: &str = concat!("monler/", env!("CARGO_PKG_VERSION"));

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|e| {
            warn!("Falling back to default HTTP client: {}", e);
            reqwest::Client::new()
        })
}

/// Maps non-success statuses to errors. `what` names the resource in
/// `NotExist` errors.
pub fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    debug!("{} {} -> {}", what, response.url(), status);

    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        return Err(MonlerError::not_exist(what));
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        return Err(MonlerError::RateLimited {
            retry_after_secs: retry_after,
        });
    }

    if !status.is_success() {
        warn!("{} returned status {}: {}", what, status, response.url());
        return Err(MonlerError::InvalidResponse(format!(
            "Unexpected status: {}",
            status
        )));
    }

    Ok(response)
}

/// Checks the status and decodes the body.
pub async fn read_json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
    let response = check_status(response, what)?;
    response.json().await.map_err(|e| {
        warn!("Failed to parse response for {}: {}", what, e);
        MonlerError::InvalidResponse(e.to_string())
    })
}

pub async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    what: &str,
) -> Result<T> {
    let response = client.get(url).send().await?;
    read_json(response, what).await
}

/// Existence check: any 4xx means the resource is not there.
pub async fn ping_url(client: &reqwest::Client, url: &str, what: &str) -> Result<()> {
    let response = client.get(url).send().await?;
    let status = response.status();
    debug!("ping {} -> {}", url, status);
    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        return Err(MonlerError::not_exist(what));
    }
    check_status(response, what).map(|_| ())
}
