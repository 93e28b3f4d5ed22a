//! Bitbucket Cloud: fork and watcher counts from the 2.0 API

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use crate::context::CrawlContext;
use crate::error::{MonlerError, Result};
use crate::http;
use crate::pkguri::{self, PkgUri};
use crate::provider::{Provider, Repo};
use crate::stat::{Stat, StatKind};

use super::hosted::{HostedApi, HostedRepo, HostedSite};

/// Default base URL for Bitbucket API
const DEFAULT_API_URL: &str = "https://api.bitbucket.org/2.0";

/// Paginated collection; only the total is read
#[derive(Debug, Deserialize)]
struct Page {
    size: u64,
}

pub struct BitbucketApi {
    client: reqwest::Client,
    api_url: String,
}

impl BitbucketApi {
    fn repository_url(&self, uri: &str) -> String {
        format!("{}/repositories/{}", self.api_url, uri)
    }

    async fn count(&self, uri: &str, collection: &str) -> Result<u64> {
        let url = format!("{}/{}?pagelen=0", self.repository_url(uri), collection);
        let page: Page = http::get_json(&self.client, &url, uri).await?;
        Ok(page.size)
    }
}

#[async_trait::async_trait]
impl HostedApi for BitbucketApi {
    async fn stats(&self, _ctx: &CrawlContext, uri: &PkgUri) -> Result<Vec<Stat>> {
        let forks = self.count(&uri.uri, "forks").await?;
        let watchers = self.count(&uri.uri, "watchers").await?;
        let now = Utc::now();
        Ok(vec![
            Stat::count(StatKind::Fork, forks, now),
            Stat::count(StatKind::Watcher, watchers, now),
        ])
    }
}

/// Bitbucket provider
pub struct BitbucketProvider {
    site: HostedSite,
    api: Arc<BitbucketApi>,
}

impl BitbucketProvider {
    pub fn new(web_url: &str, git_url: &str, api_url: &str) -> Self {
        Self {
            site: HostedSite::new(pkguri::BITBUCKET_HOST).with_urls(web_url, git_url),
            api: Arc::new(BitbucketApi {
                client: http::client(),
                api_url: api_url.trim_end_matches('/').to_string(),
            }),
        }
    }

    /// `workspace/repo` from the first two path segments.
    pub fn parse_url(&self, raw: &str) -> Result<PkgUri> {
        let (host, segments) = self.site.split(raw)?;
        let [workspace, repo, ..] = segments.as_slice() else {
            return Err(MonlerError::not_support(raw));
        };
        let repo = repo.strip_suffix(".git").unwrap_or(repo);
        Ok(PkgUri::new(pkguri::BITBUCKET, host, format!("{workspace}/{repo}"))?)
    }

    fn repo(&self, uri: PkgUri) -> Box<dyn Repo> {
        let remote = self.site.git_remote(&uri);
        Box::new(HostedRepo::new(uri, remote, self.api.clone()))
    }
}

impl Default for BitbucketProvider {
    fn default() -> Self {
        let web = format!("https://{}", pkguri::BITBUCKET_HOST);
        Self::new(&web, &web, DEFAULT_API_URL)
    }
}

#[async_trait::async_trait]
impl Provider for BitbucketProvider {
    fn provider_name(&self) -> &'static str {
        pkguri::BITBUCKET
    }

    fn open(&self, url: &str) -> Result<Box<dyn Repo>> {
        Ok(self.repo(self.parse_url(url)?))
    }

    fn parse(&self, uri: &PkgUri) -> Result<Box<dyn Repo>> {
        if uri.provider != pkguri::BITBUCKET || uri.segments().count() != 2 {
            return Err(MonlerError::not_support(uri.to_string()));
        }
        Ok(self.repo(uri.clone()))
    }

    async fn ping(&self, _ctx: &CrawlContext, url: &str) -> Result<()> {
        let uri = self.parse_url(url)?;
        http::ping_url(&self.api.client, &self.api.repository_url(&uri.uri), &uri.uri).await
    }
}
