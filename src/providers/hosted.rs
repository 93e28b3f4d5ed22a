//! Git hosting services: registry popularity stats layered over git tags

use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::context::CrawlContext;
use crate::error::{MonlerError, Result};
use crate::pkguri::PkgUri;
use crate::provider::Repo;
use crate::report::{HostedReport, Report};
use crate::stat::Stat;

use super::git::GitRepo;

/// Registry-specific half of a hosted repository.
#[async_trait::async_trait]
pub trait HostedApi: Send + Sync {
    /// Popularity counters for the repository.
    async fn stats(&self, ctx: &CrawlContext, uri: &PkgUri) -> Result<Vec<Stat>>;

    /// Extra derived candidates beyond the README links.
    async fn derived(&self, _ctx: &CrawlContext, _uri: &PkgUri) -> Vec<String> {
        Vec::new()
    }
}

/// Web location of a hosting service and where its git remotes live.
#[derive(Debug, Clone)]
pub struct HostedSite {
    pub web_url: String,
    pub git_url: String,
    default_host: &'static str,
}

impl HostedSite {
    pub fn new(default_host: &'static str) -> Self {
        let web_url = format!("https://{default_host}");
        Self {
            git_url: web_url.clone(),
            web_url,
            default_host,
        }
    }

    /// Points web pages and git remotes somewhere else (self-hosted
    /// instances, tests).
    pub fn with_urls(mut self, web_url: &str, git_url: &str) -> Self {
        self.web_url = web_url.trim_end_matches('/').to_string();
        self.git_url = git_url.trim_end_matches('/').to_string();
        self
    }

    fn configured_host(&self) -> Option<String> {
        let url = Url::parse(&self.web_url).ok()?;
        let host = url.host_str()?;
        Some(match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }

    /// Host and path segments of a URL on this site. Anything else is
    /// `NotSupport`.
    pub fn split(&self, raw: &str) -> Result<(String, Vec<String>)> {
        let url = Url::parse(raw.trim()).map_err(|_| MonlerError::not_support(raw))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(MonlerError::not_support(raw));
        }
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host,
        };
        let known = host == self.default_host
            || host.strip_prefix("www.") == Some(self.default_host)
            || self.configured_host().as_deref() == Some(host.as_str());
        if !known {
            return Err(MonlerError::not_support(raw));
        }
        let segments = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();
        let host = if host.strip_prefix("www.") == Some(self.default_host) {
            self.default_host.to_string()
        } else {
            host
        };
        Ok((host, segments))
    }

    pub fn web_page(&self, uri: &PkgUri) -> String {
        format!("{}/{}", self.web_url, uri.uri)
    }

    pub fn git_remote(&self, uri: &PkgUri) -> String {
        format!("{}/{}.git", self.git_url, uri.uri)
    }
}

pub struct HostedRepo {
    uri: PkgUri,
    git: GitRepo,
    api: Arc<dyn HostedApi>,
}

impl HostedRepo {
    pub fn new(uri: PkgUri, remote: String, api: Arc<dyn HostedApi>) -> Self {
        let git = GitRepo::new(remote, uri.clone());
        Self { uri, git, api }
    }
}

#[async_trait::async_trait]
impl Repo for HostedRepo {
    fn uri(&self) -> &PkgUri {
        &self.uri
    }

    async fn analyze(&mut self, ctx: &CrawlContext) -> Result<Box<dyn Report>> {
        let stats = ctx.run(self.api.stats(ctx, &self.uri)).await?;
        let git = self.git.report(ctx, self.uri.clone()).await?;
        Ok(Box::new(HostedReport::new(self.uri.clone(), stats, git)))
    }

    async fn derived(&mut self, ctx: &CrawlContext) -> Result<Vec<String>> {
        let mut urls = self.git.derived_urls(ctx).await;
        for url in self.api.derived(ctx, &self.uri).await {
            if !urls.contains(&url) {
                urls.push(url);
            }
        }
        debug!("{} derived {} url(s)", self.uri, urls.len());
        Ok(urls)
    }

    fn close(&mut self) -> Result<()> {
        self.git.close_clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://github.com/o/r", "github.com", &["o", "r"])]
    #[case("https://www.github.com/o/r/tree/main/src", "github.com", &["o", "r", "tree", "main", "src"])]
    #[case("http://GitHub.com/o/", "github.com", &["o"])]
    #[case("http://127.0.0.1:4000/o/r", "127.0.0.1:4000", &["o", "r"])]
    fn split_accepts_site_hosts(#[case] input: &str, #[case] host: &str, #[case] segments: &[&str]) {
        let site = HostedSite::new("github.com").with_urls("http://127.0.0.1:4000", "file:///tmp");
        let (h, s) = site.split(input).unwrap();
        assert_eq!(h, host);
        assert_eq!(s, segments);
    }

    #[rstest]
    #[case("https://gitlab.com/o/r")]
    #[case("git:///github.com/o/r")]
    #[case("github.com/o/r")]
    fn split_rejects_other_sites(#[case] input: &str) {
        let site = HostedSite::new("github.com");
        assert!(site.split(input).unwrap_err().is_not_support());
    }

    #[test]
    fn remotes_follow_configured_urls() {
        let site = HostedSite::new("gitlab.com").with_urls("https://gitlab.com/", "file:///srv/git/");
        let uri = PkgUri::new("gitlab", "", "g/sub/p").unwrap();
        assert_eq!(site.web_page(&uri), "https://gitlab.com/g/sub/p");
        assert_eq!(site.git_remote(&uri), "file:///srv/git/g/sub/p.git");
    }
}
