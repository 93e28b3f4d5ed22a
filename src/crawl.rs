//! Breadth-first crawl: resolve a URL, analyze it, then follow derived links

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_MAX_DEPTH;
use crate::context::CrawlContext;
use crate::derive::{self, Discoverer};
use crate::error::{MonlerError, Result};
use crate::pkguri::PkgUri;
use crate::provider::Repo;
use crate::registry::ProviderRegistry;
use crate::report::drain_tags;
use crate::stat::Stat;

/// One analyzed repository, ready to be persisted or printed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawledReport {
    pub provider: String,
    pub uri: PkgUri,
    pub url: String,
    pub depth: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derived_from: Option<PkgUri>,
    pub stats: Vec<Stat>,
    pub tags: Vec<Stat>,
    pub latest: Option<String>,
}

struct Pending {
    repo: Box<dyn Repo>,
    depth: usize,
    derived_from: Option<PkgUri>,
}

/// Caller-side crawl loop over a shared registry.
#[derive(Debug, Clone)]
pub struct Crawler {
    registry: Arc<ProviderRegistry>,
    discoverer: Discoverer,
    max_depth: usize,
}

impl Crawler {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            discoverer: Discoverer::new(registry.clone()),
            registry,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Number of derived hops followed from the starting URL.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Repositories the URL resolves to: a canonical identifier is parsed
    /// directly, anything else is guessed across all providers.
    async fn resolve(&self, ctx: &CrawlContext, url: &str) -> Result<Vec<Box<dyn Repo>>> {
        if self.registry.is_monler(url) {
            return Ok(vec![self.registry.parse(url)?]);
        }
        let repos = self.registry.guess(ctx, url).await;
        if repos.is_empty() {
            return Err(MonlerError::not_support(url));
        }
        Ok(repos)
    }

    /// Analyzes everything reachable from `url` within the depth limit. Each
    /// identifier is analyzed once. Fails only when nothing at the start
    /// could be resolved or analyzed.
    pub async fn crawl(&self, ctx: &CrawlContext, url: &str) -> Result<Vec<CrawledReport>> {
        let mut seen_urls: HashSet<String> = HashSet::new();
        seen_urls.insert(derive::normalize_url(url).unwrap_or_else(|| url.to_string()));

        let mut queue: VecDeque<Pending> = self
            .resolve(ctx, url)
            .await?
            .into_iter()
            .map(|repo| Pending {
                repo,
                depth: 0,
                derived_from: None,
            })
            .collect();

        let mut visited: HashSet<String> = HashSet::new();
        let mut results = Vec::new();
        let mut root_error: Option<MonlerError> = None;

        while let Some(Pending {
            mut repo,
            depth,
            derived_from,
        }) = queue.pop_front()
        {
            if ctx.is_expired() {
                warn!("Crawl deadline reached with {} pending", queue.len() + 1);
                break;
            }
            let uri = repo.uri().clone();
            if !visited.insert(uri.to_string()) {
                close(repo.as_mut());
                continue;
            }

            match self.analyze(ctx, repo.as_mut(), depth, derived_from).await {
                Ok(report) => {
                    visited.insert(report.uri.to_string());
                    info!("Analyzed {} ({} tags)", report.uri, report.tags.len());
                    results.push(report);
                }
                Err(e) => {
                    warn!("Failed to analyze {}: {}", uri, e);
                    if depth == 0 && root_error.is_none() {
                        root_error = Some(e);
                    }
                    close(repo.as_mut());
                    continue;
                }
            }

            if depth < self.max_depth {
                let urls: Vec<String> = match repo.derived(ctx).await {
                    Ok(urls) => urls,
                    Err(e) => {
                        debug!("Derived lookup for {} failed: {}", uri, e);
                        Vec::new()
                    }
                };
                let fresh: Vec<String> = urls
                    .into_iter()
                    .filter(|u| seen_urls.insert(derive::normalize_url(u).unwrap_or_else(|| u.clone())))
                    .collect();
                let found = self
                    .discoverer
                    .discover_urls(ctx, fresh, &uri.provider)
                    .await;
                for next in found {
                    queue.push_back(Pending {
                        repo: next,
                        depth: depth + 1,
                        derived_from: Some(uri.clone()),
                    });
                }
            }
            close(repo.as_mut());
        }

        for mut pending in queue {
            close(pending.repo.as_mut());
        }

        match root_error {
            Some(e) if results.is_empty() => Err(e),
            _ => Ok(results),
        }
    }

    async fn analyze(
        &self,
        ctx: &CrawlContext,
        repo: &mut dyn Repo,
        depth: usize,
        derived_from: Option<PkgUri>,
    ) -> Result<CrawledReport> {
        let mut report = repo.analyze(ctx).await?;
        let tags = drain_tags(report.as_mut())?;
        let uri = report.uri().clone();
        let crawled = CrawledReport {
            provider: uri.provider.clone(),
            url: uri.to_url(),
            uri,
            depth,
            derived_from,
            stats: report.stats().to_vec(),
            tags,
            latest: report.latest_tag().map(|t| t.value.clone()),
        };
        if let Err(e) = report.close() {
            debug!("Failed to close report {}: {}", crawled.uri, e);
        }
        Ok(crawled)
    }
}

fn close(repo: &mut dyn Repo) {
    if let Err(e) = repo.close() {
        debug!("Failed to close {}: {}", repo.uri(), e);
    }
}
