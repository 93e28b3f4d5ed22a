//! YouTube channels through the Data API v3

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::config::DEFAULT_MAX_VIDEO_PAGES;
use crate::context::CrawlContext;
use crate::error::{MonlerError, Result};
use crate::http;
use crate::pkguri::{self, PkgUri};
use crate::provider::{Provider, Repo};
use crate::report::{Report, StaticReport};
use crate::stat::{Stat, StatKind};
use crate::token::TokenPool;

/// Default base URL for the Data API
const DEFAULT_API_URL: &str = "https://www.googleapis.com/youtube/v3";

const PLAYLIST_PAGE_SIZE: &str = "50";

#[derive(Debug, Deserialize)]
struct ChannelList {
    #[serde(default)]
    items: Vec<Channel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Channel {
    id: String,
    content_details: Option<ContentDetails>,
    #[serde(default)]
    statistics: Statistics,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentDetails {
    related_playlists: RelatedPlaylists,
}

#[derive(Debug, Deserialize)]
struct RelatedPlaylists {
    uploads: Option<String>,
}

/// Counters arrive as decimal strings
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Statistics {
    subscriber_count: Option<String>,
    video_count: Option<String>,
    view_count: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItems {
    next_page_token: Option<String>,
    #[serde(default)]
    items: Vec<PlaylistItem>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    published_at: DateTime<Utc>,
    #[serde(default)]
    position: u64,
    resource_id: ResourceId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: String,
}

impl Statistics {
    fn into_stats(self, at: DateTime<Utc>) -> Vec<Stat> {
        [
            (StatKind::SubscriberCount, self.subscriber_count),
            (StatKind::VideoCount, self.video_count),
            (StatKind::ViewCount, self.view_count),
        ]
        .into_iter()
        .filter_map(|(kind, raw)| {
            let n = raw?.parse().ok()?;
            Some(Stat::count(kind, n, at))
        })
        .collect()
    }
}

/// Which channel lookup parameter a stored identifier maps to.
fn channel_filter(id: &str) -> (&'static str, &str) {
    if pkguri::is_youtube_channel_id(id) {
        ("id", id)
    } else if id.starts_with('@') {
        ("forHandle", id)
    } else {
        ("forUsername", id)
    }
}

/// Data API client authenticated with pooled API keys
#[derive(Debug, Clone)]
pub struct YouTubeClient {
    client: reqwest::Client,
    api_url: String,
    keys: TokenPool,
    max_pages: usize,
}

impl YouTubeClient {
    pub fn new(api_url: &str, keys: TokenPool) -> Self {
        Self {
            client: http::client(),
            api_url: api_url.trim_end_matches('/').to_string(),
            keys,
            max_pages: DEFAULT_MAX_VIDEO_PAGES,
        }
    }

    pub fn with_max_pages(mut self, pages: usize) -> Self {
        self.max_pages = pages.max(1);
        self
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        what: &str,
    ) -> Result<T> {
        let lease = self.keys.acquire()?;
        let response = self
            .client
            .get(format!("{}/{}", self.api_url, path))
            .query(query)
            .query(&[("key", lease.token())])
            .send()
            .await?;
        http::read_json(response, what).await
    }

    async fn channel(&self, id: &str) -> Result<Channel> {
        let (filter, value) = channel_filter(id);
        let list: ChannelList = self
            .get(
                "channels",
                &[("part", "contentDetails,statistics"), (filter, value)],
                id,
            )
            .await?;
        list.items
            .into_iter()
            .next()
            .ok_or_else(|| MonlerError::not_exist(id))
    }

    /// Uploads newest first, bounded by the page limit.
    async fn videos(&self, playlist: &str) -> Result<Vec<Stat>> {
        let mut videos = Vec::new();
        let mut page_token: Option<String> = None;
        for _ in 0..self.max_pages {
            let mut query = vec![
                ("part", "snippet"),
                ("maxResults", PLAYLIST_PAGE_SIZE),
                ("playlistId", playlist),
            ];
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }
            let page: PlaylistItems = self.get("playlistItems", &query, playlist).await?;
            videos.extend(page.items.into_iter().map(|item| {
                let snippet = item.snippet;
                Stat::new(
                    StatKind::Video,
                    snippet.resource_id.video_id,
                    snippet.published_at,
                )
                .latest(snippet.position == 0)
            }));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(videos)
    }
}

impl Default for YouTubeClient {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL, TokenPool::default())
    }
}

/// YouTube provider
#[derive(Debug, Clone)]
pub struct YouTubeProvider {
    client: YouTubeClient,
    web_url: String,
}

impl YouTubeProvider {
    pub fn new(web_url: &str, client: YouTubeClient) -> Self {
        Self {
            client,
            web_url: web_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn with_keys(keys: TokenPool) -> Self {
        Self::new(
            &format!("https://{}", pkguri::YOUTUBE_HOST),
            YouTubeClient::new(DEFAULT_API_URL, keys),
        )
    }

    pub fn with_max_pages(mut self, pages: usize) -> Self {
        self.client = self.client.with_max_pages(pages);
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

    /// Channel id, handle or user name from `/channel/<id>`, `/@handle`,
    /// `/c/<name>` or `/user/<name>`.
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
        let known = matches!(host.as_str(), "youtube.com" | "www.youtube.com" | "m.youtube.com")
            || self.configured_host().as_deref() == Some(host.as_str());
        if !known {
            return Err(MonlerError::not_support(raw));
        }

        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();
        let id = match segments.as_slice() {
            ["channel", id, ..] | ["c", id, ..] | ["user", id, ..] => id.to_string(),
            [handle, ..] if handle.starts_with('@') && handle.len() > 1 => handle.to_string(),
            _ => return Err(MonlerError::not_support(raw)),
        };
        let host = if host.ends_with("youtube.com") { "" } else { host.as_str() };
        Ok(PkgUri::new(pkguri::YOUTUBE, host, id)?)
    }

    fn repo(&self, uri: PkgUri) -> Box<dyn Repo> {
        Box::new(YouTubeRepo {
            uri,
            client: self.client.clone(),
            channel_id: None,
        })
    }
}

impl Default for YouTubeProvider {
    fn default() -> Self {
        Self::with_keys(TokenPool::default())
    }
}

#[async_trait::async_trait]
impl Provider for YouTubeProvider {
    fn provider_name(&self) -> &'static str {
        pkguri::YOUTUBE
    }

    fn open(&self, url: &str) -> Result<Box<dyn Repo>> {
        Ok(self.repo(self.parse_url(url)?))
    }

    fn parse(&self, uri: &PkgUri) -> Result<Box<dyn Repo>> {
        if uri.provider != pkguri::YOUTUBE || uri.segments().count() != 1 {
            return Err(MonlerError::not_support(uri.to_string()));
        }
        Ok(self.repo(uri.clone()))
    }

    async fn ping(&self, _ctx: &CrawlContext, url: &str) -> Result<()> {
        let uri = self.parse_url(url)?;
        let page = format!("{}/{}", self.web_url, channel_path(&uri.uri));
        http::ping_url(&self.client.client, &page, &uri.uri).await
    }
}

/// Path of a channel page on the web site.
fn channel_path(id: &str) -> String {
    if pkguri::is_youtube_channel_id(id) {
        format!("channel/{id}")
    } else if id.starts_with('@') {
        id.to_string()
    } else {
        format!("user/{id}")
    }
}

pub struct YouTubeRepo {
    uri: PkgUri,
    client: YouTubeClient,
    channel_id: Option<String>,
}

impl YouTubeRepo {
    async fn resolve(&mut self, ctx: &CrawlContext) -> Result<Channel> {
        let channel = ctx.run(self.client.channel(&self.uri.uri)).await?;
        self.channel_id = Some(channel.id.clone());
        Ok(channel)
    }
}

#[async_trait::async_trait]
impl Repo for YouTubeRepo {
    fn uri(&self) -> &PkgUri {
        &self.uri
    }

    async fn analyze(&mut self, ctx: &CrawlContext) -> Result<Box<dyn Report>> {
        let channel = self.resolve(ctx).await?;
        let stats = channel.statistics.into_stats(Utc::now());

        let uploads = channel
            .content_details
            .and_then(|d| d.related_playlists.uploads);
        let videos = match uploads {
            Some(playlist) => ctx.run(self.client.videos(&playlist)).await?,
            None => {
                warn!("Channel {} has no uploads playlist", channel.id);
                Vec::new()
            }
        };

        let uri = PkgUri::new(pkguri::YOUTUBE, self.uri.host.as_str(), channel.id)?;
        Ok(Box::new(StaticReport::new(uri, stats, videos)))
    }

    async fn derived(&mut self, ctx: &CrawlContext) -> Result<Vec<String>> {
        if pkguri::is_youtube_channel_id(&self.uri.uri) {
            return Ok(Vec::new());
        }
        if self.channel_id.is_none()
            && let Err(e) = self.resolve(ctx).await
        {
            debug!("Could not resolve channel {}: {}", self.uri, e);
            return Ok(Vec::new());
        }
        let urls = self
            .channel_id
            .as_deref()
            .and_then(|id| PkgUri::new(pkguri::YOUTUBE, self.uri.host.as_str(), id).ok())
            .map(|uri| vec![uri.to_url()])
            .unwrap_or_default();
        Ok(urls)
    }
}
