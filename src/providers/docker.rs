//! Docker Hub repositories: pull/star counts and digest-bucketed image tags

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::config::DEFAULT_MAX_TAG_PAGES;
use crate::context::CrawlContext;
use crate::derive;
use crate::error::{MonlerError, Result};
use crate::http;
use crate::pkguri::{self, PkgUri};
use crate::provider::{Provider, Repo};
use crate::report::{Report, StaticReport};
use crate::semver;
use crate::stat::{Stat, StatKind};
use crate::tag_bucket;

/// Default base URL for Docker Hub
const DEFAULT_BASE_URL: &str = "https://hub.docker.com";

const TAG_PAGE_SIZE: usize = 100;

/// Namespace of official images
const OFFICIAL_NAMESPACE: &str = "library";

#[derive(Debug, Clone, Default, Deserialize)]
struct Repository {
    #[serde(default)]
    pull_count: u64,
    #[serde(default)]
    star_count: u64,
    #[serde(default)]
    full_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagPage {
    next: Option<String>,
    #[serde(default)]
    results: Vec<RepositoryTag>,
}

#[derive(Debug, Deserialize)]
struct RepositoryTag {
    name: String,
    last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    images: Vec<Image>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Image {
    architecture: String,
    features: Option<String>,
    variant: Option<String>,
    digest: Option<String>,
    os: String,
    os_features: Option<String>,
    os_version: Option<String>,
    size: u64,
}

#[derive(Debug, Default, Deserialize)]
struct BuildSources {
    #[serde(default)]
    objects: Vec<BuildSource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BuildSource {
    provider: String,
    owner: String,
    repository: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct User {
    profile_url: String,
}

impl RepositoryTag {
    /// Tag stat with one manifest substat per image.
    fn into_stat(self) -> Stat {
        let at = self.last_updated.unwrap_or(DateTime::UNIX_EPOCH);
        self.images
            .into_iter()
            .fold(Stat::new(StatKind::Tag, self.name, at), |tag, image| {
                tag.with_substat(image.into_manifest(at))
            })
    }
}

impl Image {
    fn into_manifest(self, at: DateTime<Utc>) -> Stat {
        let platform = format!("{}/{}", self.os, self.architecture);
        Stat::new(StatKind::Manifest, platform, at)
            .with_digest(self.digest.unwrap_or_default())
            .with_label("architecture", self.architecture)
            .with_label("os", self.os)
            .with_label("variant", self.variant.unwrap_or_default())
            .with_label("os_version", self.os_version.unwrap_or_default())
            .with_label("features", self.features.unwrap_or_default())
            .with_label("os_features", self.os_features.unwrap_or_default())
            .with_substat(Stat::new(StatKind::Size, self.size.to_string(), at))
    }
}

/// Docker Hub API client
#[derive(Debug, Clone)]
pub struct DockerClient {
    client: reqwest::Client,
    base_url: String,
    max_tag_pages: usize,
}

impl DockerClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: http::client(),
            base_url: base_url.trim_end_matches('/').to_string(),
            max_tag_pages: DEFAULT_MAX_TAG_PAGES,
        }
    }

    pub fn with_max_tag_pages(mut self, pages: usize) -> Self {
        self.max_tag_pages = pages.max(1);
        self
    }

    fn repository_url(&self, name: &str) -> String {
        format!("{}/v2/repositories/{}", self.base_url, name)
    }

    async fn repository(&self, name: &str) -> Result<Repository> {
        http::get_json(&self.client, &self.repository_url(name), name).await
    }

    /// Every tag of the repository, following `next` up to the page limit.
    async fn tags(&self, name: &str) -> Result<Vec<Stat>> {
        let url = format!("{}/tags", self.repository_url(name));
        let mut tags = Vec::new();
        for page in 1..=self.max_tag_pages {
            let response = self
                .client
                .get(&url)
                .query(&[
                    ("page_size", TAG_PAGE_SIZE.to_string()),
                    ("page", page.to_string()),
                ])
                .send()
                .await?;
            let body: TagPage = http::read_json(response, name).await?;
            tags.extend(body.results.into_iter().map(RepositoryTag::into_stat));
            if body.next.as_deref().is_none_or(str::is_empty) {
                return Ok(tags);
            }
        }
        warn!(
            "Stopped listing tags of {} after {} pages",
            name, self.max_tag_pages
        );
        Ok(tags)
    }

    async fn build_source(&self, name: &str) -> Result<Option<String>> {
        let url = format!("{}/api/build/v1/source", self.base_url);
        let response = self.client.get(&url).query(&[("image", name)]).send().await?;
        let sources: BuildSources = http::read_json(response, name).await?;
        Ok(sources.objects.into_iter().next().and_then(|source| {
            (source.provider.eq_ignore_ascii_case("github")
                && !source.owner.is_empty()
                && !source.repository.is_empty())
            .then(|| {
                format!(
                    "https://{}/{}/{}",
                    pkguri::GITHUB_HOST,
                    source.owner,
                    source.repository
                )
            })
        }))
    }

    async fn profile_url(&self, namespace: &str) -> Result<Option<String>> {
        let url = format!("{}/v2/users/{}", self.base_url, namespace);
        let user: User = http::get_json(&self.client, &url, namespace).await?;
        Ok(Some(user.profile_url).filter(|u| !u.is_empty()))
    }
}

impl Default for DockerClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

/// Docker Hub provider
#[derive(Debug, Clone, Default)]
pub struct DockerProvider {
    client: DockerClient,
}

impl DockerProvider {
    pub fn new(client: DockerClient) -> Self {
        Self { client }
    }

    /// `namespace/name` from `/r/<ns>/<name>`, `/_/<name>` (official images)
    /// or `/repository/docker/<ns>/<name>`.
    pub fn parse_url(&self, raw: &str) -> Result<PkgUri> {
        let url = Url::parse(raw.trim()).map_err(|_| MonlerError::not_support(raw))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(MonlerError::not_support(raw));
        }
        let host = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.to_ascii_lowercase(),
            _ => return Err(MonlerError::not_support(raw)),
        };
        let configured = Url::parse(&self.client.base_url).ok().and_then(|u| {
            let h = u.host_str()?.to_string();
            Some(match u.port() {
                Some(p) => format!("{h}:{p}"),
                None => h,
            })
        });
        if host != pkguri::DOCKER_HOST && configured.as_deref() != Some(host.as_str()) {
            return Err(MonlerError::not_support(raw));
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        let name = match segments.as_slice() {
            ["_", name, ..] => format!("{OFFICIAL_NAMESPACE}/{name}"),
            ["r", namespace, name, ..] => format!("{namespace}/{name}"),
            ["repository", "docker", namespace, name, ..] => format!("{namespace}/{name}"),
            _ => return Err(MonlerError::not_support(raw)),
        };
        Ok(PkgUri::new(pkguri::DOCKER, host, name)?)
    }

    fn repo(&self, uri: PkgUri) -> Box<dyn Repo> {
        Box::new(DockerRepo {
            uri,
            client: self.client.clone(),
            repository: None,
        })
    }
}

#[async_trait::async_trait]
impl Provider for DockerProvider {
    fn provider_name(&self) -> &'static str {
        pkguri::DOCKER
    }

    fn open(&self, url: &str) -> Result<Box<dyn Repo>> {
        Ok(self.repo(self.parse_url(url)?))
    }

    fn parse(&self, uri: &PkgUri) -> Result<Box<dyn Repo>> {
        if uri.provider != pkguri::DOCKER || uri.segments().count() != 2 {
            return Err(MonlerError::not_support(uri.to_string()));
        }
        Ok(self.repo(uri.clone()))
    }

    async fn ping(&self, _ctx: &CrawlContext, url: &str) -> Result<()> {
        let uri = self.parse_url(url)?;
        http::ping_url(&self.client.client, &self.client.repository_url(&uri.uri), &uri.uri).await
    }
}

pub struct DockerRepo {
    uri: PkgUri,
    client: DockerClient,
    repository: Option<Repository>,
}

impl DockerRepo {
    /// Splits raw tags into report tags and channel stats.
    fn classify(&self, raw: Vec<Stat>) -> (Vec<Stat>, Vec<Stat>) {
        match tag_bucket::bucket_tags(raw.clone()) {
            Ok(buckets) => {
                let mut tags = buckets.semvers;
                tags.extend(buckets.orphans);
                semver::sort_desc(&mut tags);
                (tags, buckets.channels)
            }
            Err(e) => {
                debug!("{} tags left unbucketed: {}", self.uri, e);
                (semver::order_tags(raw), Vec::new())
            }
        }
    }
}

#[async_trait::async_trait]
impl Repo for DockerRepo {
    fn uri(&self) -> &PkgUri {
        &self.uri
    }

    async fn analyze(&mut self, ctx: &CrawlContext) -> Result<Box<dyn Report>> {
        let name = self.uri.uri.as_str();
        let repository = ctx.run(self.client.repository(name)).await?;
        let raw = ctx.run(self.client.tags(name)).await?;
        debug!("{} has {} tag(s)", self.uri, raw.len());

        let now = Utc::now();
        let mut stats = vec![
            Stat::count(StatKind::Pull, repository.pull_count, now),
            Stat::count(StatKind::Star, repository.star_count, now),
        ];
        let (tags, channels) = self.classify(raw);
        stats.extend(channels);

        self.repository = Some(repository);
        Ok(Box::new(StaticReport::new(self.uri.clone(), stats, tags)))
    }

    async fn derived(&mut self, ctx: &CrawlContext) -> Result<Vec<String>> {
        let name = self.uri.uri.clone();
        let mut urls: Vec<String> = Vec::new();
        let mut push = |url: String| {
            if !urls.contains(&url) {
                urls.push(url);
            }
        };

        match ctx.run(self.client.build_source(&name)).await {
            Ok(Some(url)) => push(url),
            Ok(None) => {}
            Err(e) => debug!("No build source for {}: {}", name, e),
        }
        if self.uri.namespace() != OFFICIAL_NAMESPACE {
            match ctx.run(self.client.profile_url(self.uri.namespace())).await {
                Ok(Some(url)) => push(url),
                Ok(None) => {}
                Err(e) => debug!("No profile for {}: {}", name, e),
            }
        }

        if self.repository.is_none() {
            match ctx.run(self.client.repository(&name)).await {
                Ok(repository) => self.repository = Some(repository),
                Err(e) => debug!("No repository page for {}: {}", name, e),
            }
        }
        if let Some(description) = self
            .repository
            .as_ref()
            .and_then(|r| r.full_description.as_deref())
        {
            derive::extract_urls(description).into_iter().for_each(&mut push);
        }
        Ok(urls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::drain_tags;
    use mockito::{Matcher, Server};
    use rstest::rstest;

    #[rstest]
    #[case("https://hub.docker.com/_/nginx", "docker:///library/nginx")]
    #[case("https://hub.docker.com/r/bitnami/redis", "docker:///bitnami/redis")]
    #[case("https://hub.docker.com/r/bitnami/redis/tags", "docker:///bitnami/redis")]
    #[case("https://hub.docker.com/repository/docker/me/app", "docker:///me/app")]
    fn parse_url_extracts_repository(#[case] input: &str, #[case] expected: &str) {
        let provider = DockerProvider::default();
        assert_eq!(provider.parse_url(input).unwrap().to_string(), expected);
    }

    #[rstest]
    #[case("https://hub.docker.com/search?q=redis")]
    #[case("https://hub.docker.com/r/onlyns")]
    #[case("https://quay.io/repository/coreos/etcd")]
    fn parse_url_rejects_other_pages(#[case] input: &str) {
        let provider = DockerProvider::default();
        assert!(provider.parse_url(input).unwrap_err().is_not_support());
    }

    #[test]
    fn official_images_render_with_underscore() {
        let provider = DockerProvider::default();
        let uri = provider.parse_url("https://hub.docker.com/_/nginx").unwrap();
        assert_eq!(uri.to_url(), "https://hub.docker.com/_/nginx");
    }

    fn image(digest: &str) -> String {
        format!(
            r#"{{"architecture": "amd64", "os": "linux", "digest": "{digest}", "size": 1024, "variant": null}}"#
        )
    }

    #[tokio::test]
    async fn analyze_buckets_paginated_tags() {
        let mut server = Server::new_async().await;
        let base = server.url();
        let _repository = server
            .mock("GET", "/v2/repositories/me/app")
            .with_status(200)
            .with_body(r#"{"pull_count": 5000, "star_count": 12, "full_description": "Source: https://github.com/me/app."}"#)
            .create_async()
            .await;
        let first = server
            .mock("GET", "/v2/repositories/me/app/tags")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page_size".into(), "100".into()),
                Matcher::UrlEncoded("page".into(), "1".into()),
            ]))
            .with_status(200)
            .with_body(format!(
                r#"{{"next": "{base}/v2/repositories/me/app/tags?page=2", "results": [
                    {{"name": "latest", "last_updated": "2024-03-01T00:00:00Z", "images": [{d1}]}},
                    {{"name": "1.0.0", "last_updated": "2024-03-01T00:00:00Z", "images": [{d1}]}}
                ]}}"#,
                d1 = image("sha256:d1")
            ))
            .create_async()
            .await;
        let second = server
            .mock("GET", "/v2/repositories/me/app/tags")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page_size".into(), "100".into()),
                Matcher::UrlEncoded("page".into(), "2".into()),
            ]))
            .with_status(200)
            .with_body(format!(
                r#"{{"next": null, "results": [
                    {{"name": "1.0", "last_updated": "2024-03-01T00:00:00Z", "images": [{d1}]}},
                    {{"name": "edge", "last_updated": "2024-03-02T00:00:00Z", "images": [{d2}]}}
                ]}}"#,
                d1 = image("sha256:d1"),
                d2 = image("sha256:d2")
            ))
            .create_async()
            .await;

        let provider = DockerProvider::new(DockerClient::new(&base));
        let ctx = CrawlContext::background();
        let mut repo = provider.open(&format!("{base}/r/me/app")).unwrap();
        let mut report = repo.analyze(&ctx).await.unwrap();

        first.assert_async().await;
        second.assert_async().await;

        let stats: Vec<_> = report
            .stats()
            .iter()
            .map(|s| (s.kind, s.value.clone()))
            .collect();
        assert_eq!(
            stats,
            vec![
                (StatKind::Pull, "5000".to_string()),
                (StatKind::Star, "12".to_string()),
                (StatKind::Channel, "edge".to_string()),
            ]
        );

        let tags = drain_tags(report.as_mut()).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].value, "1.0.0");
        assert!(tags[0].is_latest);
        let mut aliases: Vec<_> = tags[0].aliases().collect();
        aliases.sort();
        assert_eq!(aliases, vec!["1.0", "latest"]);

        let manifest = tags[0].substats_of(StatKind::Manifest).next().unwrap();
        assert_eq!(manifest.value, "linux/amd64");
        assert_eq!(manifest.digest, "sha256:d1");
        assert_eq!(manifest.labels.get("architecture").map(String::as_str), Some("amd64"));
        assert!(!manifest.labels.contains_key("variant"));
        assert_eq!(manifest.substats_of(StatKind::Size).next().unwrap().value, "1024");
    }

    #[tokio::test]
    async fn analyze_without_latest_orders_by_version() {
        let mut server = Server::new_async().await;
        let _repository = server
            .mock("GET", "/v2/repositories/me/app")
            .with_status(200)
            .with_body(r#"{"pull_count": 1, "star_count": 0}"#)
            .create_async()
            .await;
        let _tags = server
            .mock("GET", "/v2/repositories/me/app/tags")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"next": null, "results": [
                    {"name": "1.0.0", "last_updated": "2024-01-01T00:00:00Z", "images": []},
                    {"name": "2.0.0", "last_updated": "2024-02-01T00:00:00Z", "images": []}
                ]}"#,
            )
            .create_async()
            .await;

        let provider = DockerProvider::new(DockerClient::new(&server.url()));
        let mut repo = provider
            .open(&format!("{}/r/me/app", server.url()))
            .unwrap();
        let report = repo.analyze(&CrawlContext::background()).await.unwrap();

        assert_eq!(report.len(), 2);
        assert_eq!(report.latest_tag().unwrap().value, "2.0.0");
    }

    #[tokio::test]
    async fn derived_collects_build_source_profile_and_description_links() {
        let mut server = Server::new_async().await;
        let _source = server
            .mock("GET", "/api/build/v1/source")
            .match_query(Matcher::UrlEncoded("image".into(), "me/app".into()))
            .with_status(200)
            .with_body(r#"{"objects": [{"provider": "GitHub", "owner": "me", "repository": "app"}]}"#)
            .create_async()
            .await;
        let _user = server
            .mock("GET", "/v2/users/me")
            .with_status(200)
            .with_body(r#"{"username": "me", "profile_url": "https://me.example.com"}"#)
            .create_async()
            .await;
        let _repository = server
            .mock("GET", "/v2/repositories/me/app")
            .with_status(200)
            .with_body(
                r#"{"pull_count": 1, "star_count": 0, "full_description": "See https://github.com/me/app and https://docs.example.com/app?x=1."}"#,
            )
            .create_async()
            .await;

        let provider = DockerProvider::new(DockerClient::new(&server.url()));
        let mut repo = provider
            .open(&format!("{}/r/me/app", server.url()))
            .unwrap();
        let urls = repo.derived(&CrawlContext::background()).await.unwrap();

        assert_eq!(
            urls,
            vec![
                "https://github.com/me/app",
                "https://me.example.com",
                "https://docs.example.com/app",
            ]
        );
    }

    #[tokio::test]
    async fn derived_swallows_lookup_failures() {
        let mut server = Server::new_async().await;
        let _source = server
            .mock("GET", "/api/build/v1/source")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;
        let _user = server
            .mock("GET", "/v2/users/me")
            .with_status(404)
            .create_async()
            .await;
        let _repository = server
            .mock("GET", "/v2/repositories/me/app")
            .with_status(404)
            .create_async()
            .await;

        let provider = DockerProvider::new(DockerClient::new(&server.url()));
        let mut repo = provider
            .open(&format!("{}/r/me/app", server.url()))
            .unwrap();
        let urls = repo.derived(&CrawlContext::background()).await.unwrap();
        assert!(urls.is_empty());
    }
}
