//! npm registry packages and download counts

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexSet;
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

/// Default base URL for npm registry
const DEFAULT_REGISTRY_URL: &str = "https://registry.npmjs.org";

/// Default base URL for the download-counts API
const DEFAULT_API_URL: &str = "https://api.npmjs.org";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Window of the download counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadPeriod {
    LastDay,
    LastWeek,
    #[default]
    LastMonth,
    Range {
        start: NaiveDate,
        end: Option<NaiveDate>,
    },
}

impl fmt::Display for DownloadPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadPeriod::LastDay => f.write_str("last-day"),
            DownloadPeriod::LastWeek => f.write_str("last-week"),
            DownloadPeriod::LastMonth => f.write_str("last-month"),
            DownloadPeriod::Range { start, end } => {
                write!(f, "{}", start.format(DATE_FORMAT))?;
                if let Some(end) = end {
                    write!(f, ":{}", end.format(DATE_FORMAT))?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for DownloadPeriod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let date = |d: &str| {
            NaiveDate::parse_from_str(d, DATE_FORMAT).map_err(|e| format!("invalid date {d}: {e}"))
        };
        match s {
            "last-day" => Ok(DownloadPeriod::LastDay),
            "last-week" => Ok(DownloadPeriod::LastWeek),
            "last-month" => Ok(DownloadPeriod::LastMonth),
            _ => match s.split_once(':') {
                Some((start, end)) => Ok(DownloadPeriod::Range {
                    start: date(start)?,
                    end: Some(date(end)?),
                }),
                None => Ok(DownloadPeriod::Range {
                    start: date(s)?,
                    end: None,
                }),
            },
        }
    }
}

/// `repository` is either a bare string or an object with a `url`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Repository {
    Url(String),
    Object {
        #[serde(default)]
        url: String,
    },
}

impl Repository {
    fn url(&self) -> &str {
        match self {
            Repository::Url(url) => url,
            Repository::Object { url } => url,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Dist {
    #[serde(default)]
    shasum: String,
    file_count: Option<u64>,
    unpacked_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct PackageVersion {
    #[serde(default)]
    dist: Dist,
}

/// Response from npm registry API
#[derive(Debug, Clone, Deserialize)]
struct Package {
    #[serde(rename = "dist-tags", default)]
    dist_tags: BTreeMap<String, String>,
    #[serde(default)]
    versions: HashMap<String, PackageVersion>,
    #[serde(default)]
    time: HashMap<String, String>,
    homepage: Option<String>,
    repository: Option<Repository>,
}

impl Package {
    fn released_at(&self, version: &str) -> Option<DateTime<Utc>> {
        let raw = self.time.get(version)?;
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .ok()
    }

    /// Version tags newest first.
    fn tags(&self) -> Vec<Stat> {
        let latest = self.dist_tags.get("latest");
        let mut tags: Vec<Stat> = self
            .versions
            .iter()
            .filter_map(|(version, pv)| {
                let released_at = self.released_at(version)?;
                Some(
                    Stat::new(StatKind::Tag, version.as_str(), released_at)
                        .with_digest(pv.dist.shasum.as_str())
                        .latest(latest == Some(version)),
                )
            })
            .collect();
        semver::sort_desc(&mut tags);
        tags
    }

    /// Dist-tags as channels aliasing the version they point at.
    fn channels(&self) -> Vec<Stat> {
        self.dist_tags
            .iter()
            .map(|(channel, version)| {
                let at = self.released_at(version).unwrap_or(DateTime::UNIX_EPOCH);
                Stat::new(StatKind::Channel, channel.as_str(), at)
                    .with_substat(Stat::alias(version.as_str(), at))
                    .latest(channel == "latest")
            })
            .collect()
    }

    fn derived(&self) -> Vec<String> {
        let mut urls = IndexSet::new();
        if let Some(homepage) = &self.homepage
            && let Ok(mut url) = Url::parse(homepage)
        {
            url.set_fragment(None);
            urls.insert(url.to_string());
        }
        if let Some(repository) = &self.repository {
            urls.extend(expand_repository_url(repository.url()));
        }
        urls.into_iter().collect()
    }
}

/// Splits a combined scheme (`git+https://...`) into one URL per scheme and
/// expands the `github:` / `owner/repo` shorthands.
fn expand_repository_url(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if let Some((scheme, rest)) = raw.split_once("://") {
        return scheme
            .split('+')
            .filter(|s| !s.is_empty())
            .map(|s| format!("{s}://{rest}"))
            .collect();
    }
    let shorthand = raw.strip_prefix("github:").unwrap_or(raw);
    let parts: Vec<&str> = shorthand.split('/').collect();
    match parts.as_slice() {
        [owner, repo] if !owner.is_empty() && !repo.is_empty() && !owner.contains(':') => {
            vec![format!("https://{}/{}/{}", pkguri::GITHUB_HOST, owner, repo)]
        }
        _ => Vec::new(),
    }
}

#[derive(Debug, Deserialize)]
struct DownloadCount {
    downloads: u64,
}

/// Client for the package document and download-count endpoints
#[derive(Debug, Clone)]
pub struct NpmClient {
    client: reqwest::Client,
    registry_url: String,
    api_url: String,
}

impl NpmClient {
    pub fn new(registry_url: &str, api_url: &str) -> Self {
        Self {
            client: http::client(),
            registry_url: registry_url.trim_end_matches('/').to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Encode package name for URL (handles scoped packages)
    fn encode_package_name(package_name: &str) -> String {
        if package_name.starts_with('@') {
            package_name.replace('/', "%2F")
        } else {
            package_name.to_string()
        }
    }

    fn package_url(&self, name: &str) -> String {
        format!("{}/{}", self.registry_url, Self::encode_package_name(name))
    }

    async fn package(&self, name: &str) -> Result<Package> {
        http::get_json(&self.client, &self.package_url(name), name).await
    }

    pub async fn downloads(&self, name: &str, period: DownloadPeriod) -> Result<u64> {
        let url = format!("{}/downloads/point/{}/{}", self.api_url, period, name);
        let count: DownloadCount = http::get_json(&self.client, &url, name).await?;
        Ok(count.downloads)
    }
}

impl Default for NpmClient {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_URL, DEFAULT_API_URL)
    }
}

/// npm provider
#[derive(Debug, Clone)]
pub struct NpmProvider {
    client: NpmClient,
    web_url: String,
    period: DownloadPeriod,
}

impl NpmProvider {
    pub fn new(web_url: &str, client: NpmClient) -> Self {
        Self {
            client,
            web_url: web_url.trim_end_matches('/').to_string(),
            period: DownloadPeriod::default(),
        }
    }

    pub fn with_period(mut self, period: DownloadPeriod) -> Self {
        self.period = period;
        self
    }

    fn is_web_host(&self, host: &str) -> bool {
        if host == pkguri::NPM_HOST || Some(host) == pkguri::NPM_HOST.strip_prefix("www.") {
            return true;
        }
        Url::parse(&self.web_url).is_ok_and(|u| {
            let configured = match (u.host_str(), u.port()) {
                (Some(h), Some(p)) => format!("{h}:{p}"),
                (Some(h), None) => h.to_string(),
                _ => return false,
            };
            configured == host
        })
    }

    /// Package name from `npmjs.com/package/<name>` or
    /// `registry.npmjs.org/<name>`; scoped names keep their `@scope/` part.
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
        let path = url.path().replace("%40", "@").replace("%2F", "/").replace("%2f", "/");
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let name_segments = if host == pkguri::NPM_REGISTRY_HOST {
            segments.as_slice()
        } else if self.is_web_host(&host) {
            match segments.as_slice() {
                ["package", rest @ ..] => rest,
                _ => return Err(MonlerError::not_support(raw)),
            }
        } else {
            return Err(MonlerError::not_support(raw));
        };

        let name = match name_segments {
            [scope, name, ..] if scope.starts_with('@') => format!("{scope}/{name}"),
            [name, ..] if !name.starts_with('@') => name.to_string(),
            _ => return Err(MonlerError::not_support(raw)),
        };
        let host = if host == pkguri::NPM_REGISTRY_HOST || !host.contains(':') {
            ""
        } else {
            host.as_str()
        };
        Ok(PkgUri::new(pkguri::NPM, host, name)?)
    }

    fn repo(&self, uri: PkgUri) -> Box<dyn Repo> {
        Box::new(NpmRepo {
            uri,
            client: self.client.clone(),
            period: self.period,
            package: None,
        })
    }
}

impl Default for NpmProvider {
    fn default() -> Self {
        Self::new(&format!("https://{}", pkguri::NPM_HOST), NpmClient::default())
    }
}

#[async_trait::async_trait]
impl Provider for NpmProvider {
    fn provider_name(&self) -> &'static str {
        pkguri::NPM
    }

    fn open(&self, url: &str) -> Result<Box<dyn Repo>> {
        Ok(self.repo(self.parse_url(url)?))
    }

    fn parse(&self, uri: &PkgUri) -> Result<Box<dyn Repo>> {
        if uri.provider != pkguri::NPM {
            return Err(MonlerError::not_support(uri.to_string()));
        }
        Ok(self.repo(uri.clone()))
    }

    async fn ping(&self, _ctx: &CrawlContext, url: &str) -> Result<()> {
        let uri = self.parse_url(url)?;
        http::ping_url(&self.client.client, &self.client.package_url(&uri.uri), &uri.uri).await
    }
}

pub struct NpmRepo {
    uri: PkgUri,
    client: NpmClient,
    period: DownloadPeriod,
    package: Option<Package>,
}

#[async_trait::async_trait]
impl Repo for NpmRepo {
    fn uri(&self) -> &PkgUri {
        &self.uri
    }

    async fn analyze(&mut self, ctx: &CrawlContext) -> Result<Box<dyn Report>> {
        let name = self.uri.uri.as_str();
        let package = ctx.run(self.client.package(name)).await?;
        let downloads = ctx.run(self.client.downloads(name, self.period)).await?;

        let now = Utc::now();
        let mut stats = vec![Stat::count(StatKind::Download, downloads, now)];
        let latest_dist = package
            .dist_tags
            .get("latest")
            .and_then(|v| package.versions.get(v))
            .map(|v| &v.dist);
        if let Some(dist) = latest_dist {
            if let Some(files) = dist.file_count {
                stats.push(Stat::count(StatKind::FileCount, files, now));
            }
            if let Some(size) = dist.unpacked_size {
                stats.push(Stat::count(StatKind::Size, size, now));
            }
        }

        stats.extend(package.channels());
        let tags = package.tags();
        self.package = Some(package);
        Ok(Box::new(StaticReport::new(self.uri.clone(), stats, tags)))
    }

    async fn derived(&mut self, ctx: &CrawlContext) -> Result<Vec<String>> {
        if self.package.is_none() {
            match ctx.run(self.client.package(&self.uri.uri)).await {
                Ok(package) => self.package = Some(package),
                Err(e) => {
                    debug!("No package document for {}: {}", self.uri, e);
                    return Ok(Vec::new());
                }
            }
        }
        Ok(self.package.as_ref().map(Package::derived).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use rstest::rstest;

    const PACKAGE: &str = r#"{
        "name": "left-pad",
        "dist-tags": {"latest": "1.3.0", "next": "2.0.0-beta.1"},
        "versions": {
            "1.2.0": {"dist": {"shasum": "aaa"}},
            "1.3.0": {"dist": {"shasum": "bbb", "fileCount": 6, "unpackedSize": 2048}},
            "2.0.0-beta.1": {"dist": {"shasum": "ccc"}},
            "0.0.1-unpublished": {"dist": {"shasum": "ddd"}}
        },
        "time": {
            "created": "2014-03-01T00:00:00.000Z",
            "1.2.0": "2016-01-01T00:00:00.000Z",
            "1.3.0": "2018-04-09T00:00:00.000Z",
            "2.0.0-beta.1": "2019-01-01T00:00:00.000Z"
        },
        "homepage": "https://github.com/left-pad/left-pad#readme",
        "repository": {"type": "git", "url": "git+https://github.com/left-pad/left-pad.git"}
    }"#;

    #[rstest]
    #[case("https://www.npmjs.com/package/left-pad", "npm:///left-pad")]
    #[case("https://npmjs.com/package/@types/node", "npm:///@types/node")]
    #[case("https://www.npmjs.com/package/%40babel/core/v/7.0.0", "npm:///@babel/core")]
    #[case("https://registry.npmjs.org/@scope%2Fname", "npm:///@scope/name")]
    #[case("https://registry.npmjs.org/express", "npm:///express")]
    fn parse_url_extracts_package_name(#[case] input: &str, #[case] expected: &str) {
        let provider = NpmProvider::default();
        assert_eq!(provider.parse_url(input).unwrap().to_string(), expected);
    }

    #[rstest]
    #[case("https://www.npmjs.com/search?q=x")]
    #[case("https://www.npmjs.com/package/@scope")]
    #[case("https://github.com/o/r")]
    #[case("npm:///left-pad")]
    fn parse_url_rejects_other_pages(#[case] input: &str) {
        let provider = NpmProvider::default();
        assert!(provider.parse_url(input).unwrap_err().is_not_support());
    }

    #[rstest]
    #[case("last-day", DownloadPeriod::LastDay)]
    #[case("last-month", DownloadPeriod::LastMonth)]
    #[case(
        "2024-01-01",
        DownloadPeriod::Range { start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), end: None }
    )]
    #[case(
        "2024-01-01:2024-01-31",
        DownloadPeriod::Range {
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 1, 31),
        }
    )]
    fn download_period_round_trips(#[case] input: &str, #[case] expected: DownloadPeriod) {
        let period: DownloadPeriod = input.parse().unwrap();
        assert_eq!(period, expected);
        assert_eq!(period.to_string(), input);
    }

    #[test]
    fn download_period_rejects_garbage() {
        assert!("yesterday".parse::<DownloadPeriod>().is_err());
    }

    #[rstest]
    #[case("git+https://github.com/o/r.git", &["git://github.com/o/r.git", "https://github.com/o/r.git"])]
    #[case("https://gitlab.com/g/p", &["https://gitlab.com/g/p"])]
    #[case("github:o/r", &["https://github.com/o/r"])]
    #[case("o/r", &["https://github.com/o/r"])]
    #[case("git@github.com:o/r.git", &[])]
    fn expand_repository_url_splits_schemes(#[case] input: &str, #[case] expected: &[&str]) {
        assert_eq!(expand_repository_url(input), expected);
    }

    #[test]
    fn derived_drops_repeated_urls_in_first_seen_order() {
        let package: Package = serde_json::from_str(
            r#"{
                "homepage": "https://github.com/o/r.git",
                "repository": {"type": "git", "url": "git+https://github.com/o/r.git"}
            }"#,
        )
        .unwrap();

        assert_eq!(
            package.derived(),
            vec!["https://github.com/o/r.git", "git://github.com/o/r.git"]
        );
    }

    #[tokio::test]
    async fn analyze_reports_downloads_and_dist_tags() {
        let mut server = Server::new_async().await;
        let package = server
            .mock("GET", "/left-pad")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(PACKAGE)
            .create_async()
            .await;
        let downloads = server
            .mock("GET", "/downloads/point/last-week/left-pad")
            .with_status(200)
            .with_body(r#"{"downloads": 1234, "package": "left-pad"}"#)
            .create_async()
            .await;

        let provider = NpmProvider::new(
            "https://www.npmjs.com",
            NpmClient::new(&server.url(), &server.url()),
        )
        .with_period(DownloadPeriod::LastWeek);
        let ctx = CrawlContext::background();
        let mut repo = provider.open("https://www.npmjs.com/package/left-pad").unwrap();
        let mut report = repo.analyze(&ctx).await.unwrap();

        package.assert_async().await;
        downloads.assert_async().await;

        let stats = report.stats();
        let values: Vec<_> = stats.iter().map(|s| (s.kind, s.value.as_str())).collect();
        assert_eq!(
            values,
            vec![
                (StatKind::Download, "1234"),
                (StatKind::FileCount, "6"),
                (StatKind::Size, "2048"),
                (StatKind::Channel, "latest"),
                (StatKind::Channel, "next"),
            ]
        );
        assert_eq!(stats[3].aliases().collect::<Vec<_>>(), vec!["1.3.0"]);
        assert!(stats[3].is_latest);
        assert_eq!(stats[4].aliases().collect::<Vec<_>>(), vec!["2.0.0-beta.1"]);

        let tags = crate::report::drain_tags(report.as_mut()).unwrap();
        let values: Vec<_> = tags.iter().map(|t| t.value.as_str()).collect();
        assert_eq!(values, vec!["2.0.0-beta.1", "1.3.0", "1.2.0"]);
        assert_eq!(tags[1].digest, "bbb");
        assert_eq!(report.latest_tag().unwrap().value, "1.3.0");

        let derived = repo.derived(&ctx).await.unwrap();
        assert_eq!(
            derived,
            vec![
                "https://github.com/left-pad/left-pad",
                "git://github.com/left-pad/left-pad.git",
                "https://github.com/left-pad/left-pad.git",
            ]
        );
    }

    #[tokio::test]
    async fn ping_hits_registry_with_encoded_scope() {
        let mut server = Server::new_async().await;
        let found = server
            .mock("GET", "/@types%2Fnode")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let provider = NpmProvider::new(
            "https://www.npmjs.com",
            NpmClient::new(&server.url(), &server.url()),
        );
        provider
            .ping(
                &CrawlContext::background(),
                "https://www.npmjs.com/package/@types/node",
            )
            .await
            .unwrap();
        found.assert_async().await;
    }
}
