//! Lookup table from provider name to provider
//!
//! Built once during startup and then shared read-only (behind an `Arc`) with
//! the discoverer and the crawler.

use std::sync::Arc;

use futures::future::join_all;
use indexmap::IndexMap;
use tracing::debug;
use url::Url;

use crate::context::CrawlContext;
use crate::error::{MonlerError, Result};
use crate::pkguri::PkgUri;
use crate::provider::{Provider, Repo};
use crate::report::Report;

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: IndexMap<String, Arc<dyn Provider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers under the provider's own name, replacing any previous entry.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> Option<Arc<dyn Provider>> {
        let name = provider.provider_name().to_string();
        self.register_as(name, provider)
    }

    pub fn register_as(
        &mut self,
        name: impl Into<String>,
        provider: Arc<dyn Provider>,
    ) -> Option<Arc<dyn Provider>> {
        self.providers.insert(name.into(), provider)
    }

    /// Registered names in registration order.
    pub fn providers(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn Provider>> {
        self.providers
            .get(name)
            .ok_or_else(|| MonlerError::UnknownProvider(name.to_string()))
    }

    pub fn open(&self, name: &str, url: &str) -> Result<Box<dyn Repo>> {
        self.get(name)?.open(url)
    }

    /// Re-opens a persisted identifier with the provider named by its scheme.
    pub fn parse(&self, uri: &str) -> Result<Box<dyn Repo>> {
        let uri: PkgUri = uri.parse()?;
        self.get(&uri.provider)?.parse(&uri)
    }

    pub async fn ping(&self, ctx: &CrawlContext, name: &str, url: &str) -> Result<()> {
        let provider = self.get(name)?;
        ctx.run(provider.ping(ctx, url)).await
    }

    /// Opens and analyzes in one step, closing the repository afterwards.
    pub async fn analyze(
        &self,
        ctx: &CrawlContext,
        name: &str,
        url: &str,
    ) -> Result<Box<dyn Report>> {
        let mut repo = self.open(name, url)?;
        let report = ctx.run(repo.analyze(ctx)).await;
        if let Err(e) = repo.close() {
            debug!("Failed to close {} repository: {}", name, e);
        }
        report
    }

    /// Pings every provider and opens the URL with each one that accepts it.
    pub async fn guess(&self, ctx: &CrawlContext, url: &str) -> Vec<Box<dyn Repo>> {
        self.guess_without(ctx, &[], url).await
    }

    /// [`ProviderRegistry::guess`] skipping the named providers.
    pub async fn guess_without(
        &self,
        ctx: &CrawlContext,
        excluded: &[&str],
        url: &str,
    ) -> Vec<Box<dyn Repo>> {
        let candidates: Vec<_> = self
            .providers
            .iter()
            .filter(|(name, _)| !excluded.contains(&name.as_str()))
            .collect();

        let pings = candidates.iter().map(|(name, provider)| async move {
            let result = ctx.run(provider.ping(ctx, url)).await;
            if let Err(e) = &result {
                debug!("{} rejected {}: {}", name, url, e);
            }
            result.is_ok()
        });
        let accepted = join_all(pings).await;

        candidates
            .into_iter()
            .zip(accepted)
            .filter(|(_, ok)| *ok)
            .filter_map(|((name, provider), _)| match provider.open(url) {
                Ok(repo) => Some(repo),
                Err(e) => {
                    debug!("{} failed to open {}: {}", name, url, e);
                    None
                }
            })
            .collect()
    }

    /// True when the URL is already a canonical identifier of a registered
    /// provider.
    pub fn is_monler(&self, url: &str) -> bool {
        Url::parse(url).is_ok_and(|u| self.has(u.scheme()))
    }
}
