//! Helm Hub charts through the chartsvc v1 API

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::context::CrawlContext;
use crate::error::{MonlerError, Result};
use crate::http;
use crate::pkguri::{self, PkgUri};
use crate::provider::{Provider, Repo};
use crate::report::{Report, StaticReport};
use crate::semver;
use crate::stat::{Stat, StatKind};

/// Default base URL for the chart service
const DEFAULT_API_URL: &str = "https://hub.helm.sh/api/chartsvc/v1";

static CHART_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^([a-z0-9-]+)/([a-z0-9-]+)$").expect("chart id pattern"));

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChartAttributes {
    #[serde(default)]
    pub home: Option<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    attributes: ChartAttributes,
}

#[derive(Debug, Deserialize)]
struct VersionAttributes {
    version: String,
    created: Option<DateTime<Utc>>,
    #[serde(default)]
    digest: String,
    #[serde(default)]
    app_version: String,
}

#[derive(Debug, Deserialize)]
struct ChartVersion {
    attributes: VersionAttributes,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: String,
}

/// Chart service client, also used by GitHub to find charts of a repository
#[derive(Debug, Clone)]
pub struct HelmClient {
    client: reqwest::Client,
    api_url: String,
    web_url: String,
}

impl HelmClient {
    pub fn new(api_url: &str, web_url: &str) -> Self {
        Self {
            client: http::client(),
            api_url: api_url.trim_end_matches('/').to_string(),
            web_url: web_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn chart_url(&self, id: &str) -> String {
        format!("{}/charts/{}", self.web_url, id)
    }

    pub async fn ping(&self, id: &str) -> Result<()> {
        http::ping_url(&self.client, &format!("{}/charts/{}", self.api_url, id), id).await
    }

    pub async fn chart(&self, id: &str) -> Result<ChartAttributes> {
        let url = format!("{}/charts/{}", self.api_url, id);
        let chart: Envelope<Chart> = http::get_json(&self.client, &url, id).await?;
        Ok(chart.data.attributes)
    }

    /// Chart versions as tag stats.
    pub async fn versions(&self, id: &str) -> Result<Vec<Stat>> {
        let url = format!("{}/charts/{}/versions", self.api_url, id);
        let versions: Envelope<Vec<ChartVersion>> = http::get_json(&self.client, &url, id).await?;
        Ok(versions
            .data
            .into_iter()
            .map(|v| {
                let attrs = v.attributes;
                Stat::new(
                    StatKind::Tag,
                    attrs.version,
                    attrs.created.unwrap_or(DateTime::UNIX_EPOCH),
                )
                .with_digest(attrs.digest)
                .with_label("app_version", attrs.app_version)
            })
            .collect())
    }

    /// Chart ids matching a free-text query.
    pub async fn search(&self, query: &str) -> Result<Vec<String>> {
        let url = format!("{}/charts/search", self.api_url);
        let response = self.client.get(&url).query(&[("q", query)]).send().await?;
        let hits: Envelope<Vec<SearchHit>> = http::read_json(response, "chart search").await?;
        Ok(hits.data.into_iter().map(|h| h.id).collect())
    }
}

impl Default for HelmClient {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL, &format!("https://{}", pkguri::HELM_HOST))
    }
}

/// Helm Hub provider
#[derive(Debug, Clone, Default)]
pub struct HelmProvider {
    client: HelmClient,
}

impl HelmProvider {
    pub fn new(client: HelmClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &HelmClient {
        &self.client
    }

    /// `repo/chart` from `/charts/<repo>/<chart>` on the hub, or a bare id.
    pub fn parse_url(&self, raw: &str) -> Result<PkgUri> {
        let raw = raw.trim();
        if let Some(caps) = CHART_ID.captures(raw) {
            return Ok(PkgUri::new(pkguri::HELM, "", format!("{}/{}", &caps[1], &caps[2]))?);
        }

        let url = Url::parse(raw).map_err(|_| MonlerError::not_support(raw))?;
        let web_host = Url::parse(&self.client.web_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));
        let host = url.host_str().unwrap_or_default();
        if host != pkguri::HELM_HOST && web_host.as_deref() != Some(host) {
            return Err(MonlerError::not_support(raw));
        }
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        match segments.as_slice() {
            ["charts", repo, chart, ..] => Ok(PkgUri::new(pkguri::HELM, "", format!("{repo}/{chart}"))?),
            _ => Err(MonlerError::not_support(raw)),
        }
    }
}

#[async_trait::async_trait]
impl Provider for HelmProvider {
    fn provider_name(&self) -> &'static str {
        pkguri::HELM
    }

    fn open(&self, url: &str) -> Result<Box<dyn Repo>> {
        let uri = self.parse_url(url)?;
        Ok(Box::new(HelmRepo::new(uri, self.client.clone())))
    }

    fn parse(&self, uri: &PkgUri) -> Result<Box<dyn Repo>> {
        if uri.provider != pkguri::HELM || uri.segments().count() != 2 {
            return Err(MonlerError::not_support(uri.to_string()));
        }
        Ok(Box::new(HelmRepo::new(uri.clone(), self.client.clone())))
    }

    async fn ping(&self, _ctx: &CrawlContext, url: &str) -> Result<()> {
        let uri = self.parse_url(url)?;
        self.client.ping(&uri.uri).await
    }
}

pub struct HelmRepo {
    uri: PkgUri,
    client: HelmClient,
    chart: Option<ChartAttributes>,
}

impl HelmRepo {
    fn new(uri: PkgUri, client: HelmClient) -> Self {
        Self {
            uri,
            client,
            chart: None,
        }
    }
}

#[async_trait::async_trait]
impl Repo for HelmRepo {
    fn uri(&self) -> &PkgUri {
        &self.uri
    }

    async fn analyze(&mut self, ctx: &CrawlContext) -> Result<Box<dyn Report>> {
        let chart = ctx.run(self.client.chart(&self.uri.uri)).await?;
        let versions = ctx.run(self.client.versions(&self.uri.uri)).await?;
        self.chart = Some(chart);
        Ok(Box::new(StaticReport::new(
            self.uri.clone(),
            Vec::new(),
            semver::order_tags(versions),
        )))
    }

    async fn derived(&mut self, ctx: &CrawlContext) -> Result<Vec<String>> {
        if self.chart.is_none() {
            match ctx.run(self.client.chart(&self.uri.uri)).await {
                Ok(chart) => self.chart = Some(chart),
                Err(e) => {
                    debug!("No chart metadata for {}: {}", self.uri, e);
                    return Ok(Vec::new());
                }
            }
        }
        let Some(chart) = &self.chart else {
            return Ok(Vec::new());
        };
        let mut urls: Vec<String> = Vec::new();
        for url in chart.home.iter().chain(&chart.sources) {
            if let Some(url) = crate::derive::normalize_url(url)
                && !urls.contains(&url)
            {
                urls.push(url);
            }
        }
        Ok(urls)
    }
}
