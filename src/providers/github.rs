//! GitHub: GraphQL popularity stats over the repository's git tags

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::context::CrawlContext;
use crate::error::{MonlerError, Result};
use crate::http;
use crate::pkguri::{self, PkgUri};
use crate::provider::{Provider, Repo};
use crate::stat::{Stat, StatKind};
use crate::token::TokenPool;

use super::helm::HelmClient;
use super::hosted::{HostedApi, HostedRepo, HostedSite};

/// Default base URL for GitHub API
const DEFAULT_API_URL: &str = "https://api.github.com";

const REPOSITORY_QUERY: &str = r#"query($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) {
    forkCount
    stargazers { totalCount }
    watchers { totalCount }
    issues(states: OPEN) { totalCount }
  }
}"#;

#[derive(Debug, Deserialize)]
struct TotalCount {
    #[serde(rename = "totalCount")]
    total_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlRepository {
    fork_count: u64,
    stargazers: TotalCount,
    watchers: TotalCount,
    issues: TotalCount,
}

#[derive(Debug, Deserialize)]
struct GraphQlData {
    repository: Option<GraphQlRepository>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<GraphQlData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

/// Response from the REST repository endpoint, used without credentials
#[derive(Debug, Deserialize)]
struct RestRepository {
    forks_count: u64,
    stargazers_count: u64,
    subscribers_count: Option<u64>,
    open_issues_count: u64,
}

/// Repository statistics client
pub struct GitHubApi {
    client: reqwest::Client,
    api_url: String,
    tokens: TokenPool,
    charts: Option<HelmClient>,
}

impl GitHubApi {
    async fn graphql_stats(&self, owner: &str, name: &str) -> Result<Vec<Stat>> {
        let url = format!("{}/graphql", self.api_url);
        let body = json!({
            "query": REPOSITORY_QUERY,
            "variables": { "owner": owner, "name": name },
        });

        let response = self.tokens.send(self.client.post(&url).json(&body)).await?;
        let result: GraphQlResponse = http::read_json(response, "GitHub repository").await?;

        if let Some(error) = result.errors.first() {
            debug!("GitHub GraphQL error for {}/{}: {}", owner, name, error.message);
        }
        let repo = result
            .data
            .and_then(|d| d.repository)
            .ok_or_else(|| MonlerError::not_exist(format!("{owner}/{name}")))?;

        let now = Utc::now();
        Ok(vec![
            Stat::count(StatKind::Fork, repo.fork_count, now),
            Stat::count(StatKind::Star, repo.stargazers.total_count, now),
            Stat::count(StatKind::Watcher, repo.watchers.total_count, now),
            Stat::count(StatKind::OpenIssue, repo.issues.total_count, now),
        ])
    }

    async fn rest_stats(&self, owner: &str, name: &str) -> Result<Vec<Stat>> {
        let url = format!("{}/repos/{}/{}", self.api_url, owner, name);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;
        let repo: RestRepository = http::read_json(response, "GitHub repository").await?;

        let now = Utc::now();
        let mut stats = vec![
            Stat::count(StatKind::Fork, repo.forks_count, now),
            Stat::count(StatKind::Star, repo.stargazers_count, now),
        ];
        if let Some(watchers) = repo.subscribers_count {
            stats.push(Stat::count(StatKind::Watcher, watchers, now));
        }
        stats.push(Stat::count(StatKind::OpenIssue, repo.open_issues_count, now));
        Ok(stats)
    }
}

#[async_trait::async_trait]
impl HostedApi for GitHubApi {
    async fn stats(&self, _ctx: &CrawlContext, uri: &PkgUri) -> Result<Vec<Stat>> {
        let (owner, name) = (uri.namespace(), uri.name());
        if self.tokens.is_empty() {
            // GraphQL requires authentication.
            return self.rest_stats(owner, name).await;
        }
        self.graphql_stats(owner, name).await
    }

    async fn derived(&self, ctx: &CrawlContext, uri: &PkgUri) -> Vec<String> {
        let Some(charts) = &self.charts else {
            return Vec::new();
        };
        let query = format!("https://{}/{}", pkguri::GITHUB_HOST, uri.uri);
        match ctx.run(charts.search(&query)).await {
            Ok(ids) => ids.iter().map(|id| charts.chart_url(id)).collect(),
            Err(e) => {
                debug!("Chart search for {} failed: {}", query, e);
                Vec::new()
            }
        }
    }
}

/// GitHub provider
pub struct GitHubProvider {
    site: HostedSite,
    api: Arc<GitHubApi>,
}

impl GitHubProvider {
    /// Creates a provider against custom web, git and API locations
    pub fn new(web_url: &str, git_url: &str, api_url: &str, tokens: TokenPool) -> Self {
        Self {
            site: HostedSite::new(pkguri::GITHUB_HOST).with_urls(web_url, git_url),
            api: Arc::new(GitHubApi {
                client: http::client(),
                api_url: api_url.trim_end_matches('/').to_string(),
                tokens,
                charts: None,
            }),
        }
    }

    pub fn with_tokens(tokens: TokenPool) -> Self {
        let web = format!("https://{}", pkguri::GITHUB_HOST);
        Self::new(&web, &web, DEFAULT_API_URL, tokens)
    }

    /// Enables Helm chart lookups during derivation.
    pub fn with_chart_search(mut self, charts: HelmClient) -> Self {
        if let Some(api) = Arc::get_mut(&mut self.api) {
            api.charts = Some(charts);
        } else {
            warn!("GitHub API already shared, chart search not enabled");
        }
        self
    }

    /// `owner/repo` from the first two path segments; `.git` is dropped.
    pub fn parse_url(&self, raw: &str) -> Result<PkgUri> {
        let (host, segments) = self.site.split(raw)?;
        let [owner, repo, ..] = segments.as_slice() else {
            return Err(MonlerError::not_support(raw));
        };
        let repo = repo.strip_suffix(".git").unwrap_or(repo);
        Ok(PkgUri::new(pkguri::GITHUB, host, format!("{owner}/{repo}"))?)
    }

    fn repo(&self, uri: PkgUri) -> Box<dyn Repo> {
        let remote = self.site.git_remote(&uri);
        Box::new(HostedRepo::new(uri, remote, self.api.clone()))
    }
}

impl Default for GitHubProvider {
    fn default() -> Self {
        Self::with_tokens(TokenPool::default())
    }
}

#[async_trait::async_trait]
impl Provider for GitHubProvider {
    fn provider_name(&self) -> &'static str {
        pkguri::GITHUB
    }

    fn open(&self, url: &str) -> Result<Box<dyn Repo>> {
        Ok(self.repo(self.parse_url(url)?))
    }

    fn parse(&self, uri: &PkgUri) -> Result<Box<dyn Repo>> {
        if uri.provider != pkguri::GITHUB || uri.segments().count() != 2 {
            return Err(MonlerError::not_support(uri.to_string()));
        }
        Ok(self.repo(uri.clone()))
    }

    async fn ping(&self, _ctx: &CrawlContext, url: &str) -> Result<()> {
        let uri = self.parse_url(url)?;
        http::ping_url(&self.api.client, &self.site.web_page(&uri), &uri.uri).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use rstest::rstest;

    fn provider(server: &Server, tokens: &[&str]) -> GitHubProvider {
        GitHubProvider::new(
            &server.url(),
            "file:///nonexistent",
            &server.url(),
            TokenPool::new(tokens.iter().copied()),
        )
    }

    #[rstest]
    #[case("https://github.com/rust-lang/cargo", "github:///rust-lang/cargo")]
    #[case("https://github.com/rust-lang/cargo.git", "github:///rust-lang/cargo")]
    #[case("https://github.com/rust-lang/cargo/tree/master/src", "github:///rust-lang/cargo")]
    #[case("https://www.github.com/o/r/", "github:///o/r")]
    fn parse_url_keeps_owner_and_repo(#[case] input: &str, #[case] expected: &str) {
        let provider = GitHubProvider::default();
        assert_eq!(provider.parse_url(input).unwrap().to_string(), expected);
    }

    #[rstest]
    #[case("https://github.com/owner")]
    #[case("https://gitlab.com/o/r")]
    #[case("not a url")]
    fn open_rejects_unsupported_urls(#[case] input: &str) {
        let provider = GitHubProvider::default();
        assert!(provider.open(input).err().unwrap().is_not_support());
    }

    #[tokio::test]
    async fn graphql_stats_use_pooled_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/graphql")
            .match_header("authorization", "Bearer t1")
            .match_body(Matcher::PartialJson(json!({
                "variables": { "owner": "o", "name": "r" }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("x-ratelimit-remaining", "4999")
            .with_header("x-ratelimit-reset", "1700000000")
            .with_body(
                r#"{"data": {"repository": {
                    "forkCount": 3,
                    "stargazers": {"totalCount": 42},
                    "watchers": {"totalCount": 5},
                    "issues": {"totalCount": 7}
                }}}"#,
            )
            .create_async()
            .await;

        let provider = provider(&server, &["t1"]);
        let uri = PkgUri::new(pkguri::GITHUB, "", "o/r").unwrap();
        let stats = provider
            .api
            .stats(&CrawlContext::background(), &uri)
            .await
            .unwrap();

        mock.assert_async().await;
        let values: Vec<_> = stats.iter().map(|s| (s.kind, s.value.as_str())).collect();
        assert_eq!(
            values,
            vec![
                (StatKind::Fork, "3"),
                (StatKind::Star, "42"),
                (StatKind::Watcher, "5"),
                (StatKind::OpenIssue, "7"),
            ]
        );
        assert!(stats.iter().all(|s| s.is_latest));
        assert_eq!(provider.api.tokens.tokens()[0].remaining(), Some(4999));
    }

    #[tokio::test]
    async fn graphql_null_repository_is_not_exist() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_body(r#"{"data": {"repository": null}, "errors": [{"message": "Could not resolve"}]}"#)
            .create_async()
            .await;

        let provider = provider(&server, &["t1"]);
        let uri = PkgUri::new(pkguri::GITHUB, "", "o/missing").unwrap();
        let result = provider.api.stats(&CrawlContext::background(), &uri).await;

        assert!(matches!(result, Err(MonlerError::NotExist(_))));
    }

    #[tokio::test]
    async fn rest_stats_are_used_without_tokens() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/repos/o/r")
            .with_status(200)
            .with_body(
                r#"{"forks_count": 1, "stargazers_count": 2, "subscribers_count": 3, "open_issues_count": 4}"#,
            )
            .create_async()
            .await;

        let provider = provider(&server, &[]);
        let uri = PkgUri::new(pkguri::GITHUB, "", "o/r").unwrap();
        let stats = provider
            .api
            .stats(&CrawlContext::background(), &uri)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(stats.len(), 4);
        assert_eq!(stats[1].kind, StatKind::Star);
        assert_eq!(stats[1].value, "2");
    }

    #[tokio::test]
    async fn ping_maps_missing_page_to_not_exist() {
        let mut server = Server::new_async().await;
        let _found = server
            .mock("GET", "/o/r")
            .with_status(200)
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/o/gone")
            .with_status(404)
            .create_async()
            .await;

        let provider = provider(&server, &[]);
        let ctx = CrawlContext::background();
        let base = server.url();

        provider.ping(&ctx, &format!("{base}/o/r")).await.unwrap();
        assert!(
            provider
                .ping(&ctx, &format!("{base}/o/gone"))
                .await
                .unwrap_err()
                .is_not_exist()
        );
        assert!(
            provider
                .ping(&ctx, "https://example.org/o/r")
                .await
                .unwrap_err()
                .is_not_support()
        );
    }

    #[tokio::test]
    async fn derived_searches_charts_for_repository() {
        let mut server = Server::new_async().await;
        let _search = server
            .mock("GET", "/charts/search")
            .match_query(Matcher::UrlEncoded(
                "q".into(),
                "https://github.com/bitnami/charts".into(),
            ))
            .with_status(200)
            .with_body(r#"{"data": [{"id": "bitnami/redis"}, {"id": "bitnami/nginx"}]}"#)
            .create_async()
            .await;

        let provider = provider(&server, &[])
            .with_chart_search(HelmClient::new(&server.url(), "https://hub.helm.sh"));
        let uri = PkgUri::new(pkguri::GITHUB, "", "bitnami/charts").unwrap();
        let urls = provider.api.derived(&CrawlContext::background(), &uri).await;

        assert_eq!(
            urls,
            vec![
                "https://hub.helm.sh/charts/bitnami/redis",
                "https://hub.helm.sh/charts/bitnami/nginx",
            ]
        );
    }
}
