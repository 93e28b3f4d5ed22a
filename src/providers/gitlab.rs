//! GitLab: project stats from the v4 API over the project's git tags

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use url::form_urlencoded;

use crate::context::CrawlContext;
use crate::error::{MonlerError, Result};
use crate::http;
use crate::pkguri::{self, PkgUri};
use crate::provider::{Provider, Repo};
use crate::stat::{Stat, StatKind};

use super::hosted::{HostedApi, HostedRepo, HostedSite};

/// Default base URL for GitLab API
const DEFAULT_API_URL: &str = "https://gitlab.com/api/v4";

#[derive(Debug, Deserialize)]
struct Project {
    star_count: u64,
    forks_count: u64,
}

pub struct GitLabApi {
    client: reqwest::Client,
    api_url: String,
}

impl GitLabApi {
    fn project_url(&self, path: &str) -> String {
        let encoded: String = form_urlencoded::byte_serialize(path.as_bytes()).collect();
        format!("{}/projects/{}", self.api_url, encoded)
    }
}

#[async_trait::async_trait]
impl HostedApi for GitLabApi {
    async fn stats(&self, _ctx: &CrawlContext, uri: &PkgUri) -> Result<Vec<Stat>> {
        let project: Project =
            http::get_json(&self.client, &self.project_url(&uri.uri), &uri.uri).await?;
        let now = Utc::now();
        Ok(vec![
            Stat::count(StatKind::Star, project.star_count, now),
            Stat::count(StatKind::Fork, project.forks_count, now),
        ])
    }
}

/// GitLab provider
pub struct GitLabProvider {
    site: HostedSite,
    api: Arc<GitLabApi>,
}

impl GitLabProvider {
    /// Creates a provider against custom web, git and API locations
    pub fn new(web_url: &str, git_url: &str, api_url: &str) -> Self {
        Self {
            site: HostedSite::new(pkguri::GITLAB_HOST).with_urls(web_url, git_url),
            api: Arc::new(GitLabApi {
                client: http::client(),
                api_url: api_url.trim_end_matches('/').to_string(),
            }),
        }
    }

    /// `group[/subgroup...]/project`: every segment before the `/-/` marker.
    pub fn parse_url(&self, raw: &str) -> Result<PkgUri> {
        let (host, segments) = self.site.split(raw)?;
        let mut path: Vec<&str> = segments
            .iter()
            .map(String::as_str)
            .take_while(|s| *s != "-")
            .collect();
        if path.len() < 2 {
            return Err(MonlerError::not_support(raw));
        }
        if let Some(last) = path.last_mut() {
            let name: &str = last;
            *last = name.strip_suffix(".git").unwrap_or(name);
        }
        Ok(PkgUri::new(pkguri::GITLAB, host, path.join("/"))?)
    }

    fn repo(&self, uri: PkgUri) -> Box<dyn Repo> {
        let remote = self.site.git_remote(&uri);
        Box::new(HostedRepo::new(uri, remote, self.api.clone()))
    }
}

impl Default for GitLabProvider {
    fn default() -> Self {
        let web = format!("https://{}", pkguri::GITLAB_HOST);
        Self::new(&web, &web, DEFAULT_API_URL)
    }
}

#[async_trait::async_trait]
impl Provider for GitLabProvider {
    fn provider_name(&self) -> &'static str {
        pkguri::GITLAB
    }

    fn open(&self, url: &str) -> Result<Box<dyn Repo>> {
        Ok(self.repo(self.parse_url(url)?))
    }

    fn parse(&self, uri: &PkgUri) -> Result<Box<dyn Repo>> {
        if uri.provider != pkguri::GITLAB || uri.segments().count() < 2 {
            return Err(MonlerError::not_support(uri.to_string()));
        }
        Ok(self.repo(uri.clone()))
    }

    async fn ping(&self, _ctx: &CrawlContext, url: &str) -> Result<()> {
        let uri = self.parse_url(url)?;
        http::ping_url(&self.api.client, &self.api.project_url(&uri.uri), &uri.uri).await
    }
}
