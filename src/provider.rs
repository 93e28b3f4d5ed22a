//! Capability contract every registry implements

#[cfg(test)]
use mockall::automock;

use crate::context::CrawlContext;
use crate::error::Result;
use crate::pkguri::PkgUri;
use crate::report::Report;

/// A registry that can recognise, check and open repositories.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Stable name used as registry key and `PkgUri` scheme.
    fn provider_name(&self) -> &'static str;

    /// Resolves a web URL into a repository handle without touching the
    /// network. Fails with `NotSupport` when the URL shape is foreign.
    fn open(&self, url: &str) -> Result<Box<dyn Repo>>;

    /// Same as [`Provider::open`] for a previously resolved identifier.
    fn parse(&self, uri: &PkgUri) -> Result<Box<dyn Repo>>;

    /// Lightweight existence check. `NotSupport` for foreign shapes,
    /// `NotExist` when the registry has no such resource.
    async fn ping(&self, ctx: &CrawlContext, url: &str) -> Result<()>;
}

/// A provider-resolved handle on one repository or package.
#[async_trait::async_trait]
pub trait Repo: Send {
    fn uri(&self) -> &PkgUri;

    /// Fetches everything the registry knows. Failures are returned as-is.
    async fn analyze(&mut self, ctx: &CrawlContext) -> Result<Box<dyn Report>>;

    /// Candidate URLs for the same project on other registries. Lookup
    /// failures only shrink the list; implementations return `Ok`.
    async fn derived(&mut self, ctx: &CrawlContext) -> Result<Vec<String>>;

    /// Releases temporary resources such as clone directories.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
