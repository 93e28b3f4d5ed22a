//! In-memory provider test utilities

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use url::Url;

use monler::context::CrawlContext;
use monler::error::{MonlerError, Result};
use monler::pkguri::PkgUri;
use monler::provider::{Provider, Repo};
use monler::registry::ProviderRegistry;
use monler::report::{Report, StaticReport};
use monler::semver::order_tags;
use monler::stat::{Stat, StatKind};

#[derive(Debug, Clone, Default)]
struct Fixture {
    stars: u64,
    tags: Vec<String>,
    derived: Vec<String>,
}

/// Provider serving canned repositories on a single host
pub struct DummyProvider {
    name: &'static str,
    host: &'static str,
    repos: HashMap<String, Fixture>,
    analyzed: Arc<AtomicUsize>,
}

impl DummyProvider {
    pub fn new(name: &'static str, host: &'static str) -> Self {
        Self {
            name,
            host,
            repos: HashMap::new(),
            analyzed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_repo(mut self, path: &str, tags: Vec<&str>, derived: Vec<&str>) -> Self {
        self.repos.insert(
            path.to_string(),
            Fixture {
                stars: tags.len() as u64,
                tags: tags.into_iter().map(|t| t.to_string()).collect(),
                derived: derived.into_iter().map(|d| d.to_string()).collect(),
            },
        );
        self
    }

    /// Shared counter of completed analyses.
    pub fn analyzed(&self) -> Arc<AtomicUsize> {
        self.analyzed.clone()
    }

    fn uri_of(&self, url: &str) -> Result<PkgUri> {
        let parsed = Url::parse(url).map_err(|_| MonlerError::not_support(url))?;
        if parsed.host_str() != Some(self.host) {
            return Err(MonlerError::not_support(url));
        }
        let path = parsed.path().trim_matches('/');
        PkgUri::new(self.name, self.host, path).map_err(|_| MonlerError::not_support(url))
    }

    fn repo(&self, uri: PkgUri) -> DummyRepo {
        let fixture = self.repos.get(&uri.uri).cloned();
        DummyRepo {
            uri,
            fixture,
            analyzed: self.analyzed.clone(),
        }
    }
}

#[async_trait]
impl Provider for DummyProvider {
    fn provider_name(&self) -> &'static str {
        self.name
    }

    fn open(&self, url: &str) -> Result<Box<dyn Repo>> {
        let uri = self.uri_of(url)?;
        Ok(Box::new(self.repo(uri)))
    }

    fn parse(&self, uri: &PkgUri) -> Result<Box<dyn Repo>> {
        if uri.provider != self.name {
            return Err(MonlerError::not_support(uri.to_string()));
        }
        Ok(Box::new(self.repo(uri.clone())))
    }

    async fn ping(&self, _ctx: &CrawlContext, url: &str) -> Result<()> {
        let uri = self.uri_of(url)?;
        if self.repos.contains_key(&uri.uri) {
            Ok(())
        } else {
            Err(MonlerError::not_exist(url))
        }
    }
}

struct DummyRepo {
    uri: PkgUri,
    fixture: Option<Fixture>,
    analyzed: Arc<AtomicUsize>,
}

#[async_trait]
impl Repo for DummyRepo {
    fn uri(&self) -> &PkgUri {
        &self.uri
    }

    async fn analyze(&mut self, _ctx: &CrawlContext) -> Result<Box<dyn Report>> {
        let fixture = self
            .fixture
            .as_ref()
            .ok_or_else(|| MonlerError::not_exist(self.uri.to_string()))?;
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let stats = vec![Stat::count(StatKind::Star, fixture.stars, at)];
        let tags = fixture
            .tags
            .iter()
            .map(|t| Stat::new(StatKind::Tag, t.as_str(), at))
            .collect();
        self.analyzed.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StaticReport::new(
            self.uri.clone(),
            stats,
            order_tags(tags),
        )))
    }

    async fn derived(&mut self, _ctx: &CrawlContext) -> Result<Vec<String>> {
        Ok(self
            .fixture
            .as_ref()
            .map(|f| f.derived.clone())
            .unwrap_or_default())
    }
}

/// Registry holding the given providers in order.
pub fn create_test_registry(providers: Vec<DummyProvider>) -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    for provider in providers {
        registry.register(Arc::new(provider));
    }
    Arc::new(registry)
}
