//! Best-effort discovery of the same project on other registries

use std::sync::{Arc, LazyLock};

use indexmap::IndexSet;
use regex::Regex;
use tracing::debug;
use url::Url;

use crate::context::CrawlContext;
use crate::pkguri::GITHUB_HOST;
use crate::provider::Repo;
use crate::registry::ProviderRegistry;

static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"https?://(www\.)?[-a-zA-Z0-9@:%._\+~#=]{1,256}\.[a-zA-Z0-9]{1,6}\b([-a-zA-Z0-9@:%_\+.~#?&/=]*)",
    )
    .expect("url pattern")
});

/// Canonical form used for deduplication: credentials, query and fragment
/// removed, no trailing slash, and no `.git` suffix on GitHub.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    url.host_str()?;
    // Only fails for cannot-be-a-base urls, which have no host.
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.set_query(None);
    url.set_fragment(None);

    let is_github = url
        .host_str()
        .is_some_and(|h| h.eq_ignore_ascii_case(GITHUB_HOST) || h.eq_ignore_ascii_case("www.github.com"));
    let mut path = url.path().trim_end_matches('/').to_string();
    if is_github && let Some(stripped) = path.strip_suffix(".git") {
        path = stripped.to_string();
    }
    url.set_path(&path);

    Some(url.as_str().trim_end_matches('/').to_string())
}

/// All well-formed http(s) URLs in `text`, normalized, in first-seen order.
pub fn extract_urls(text: &str) -> Vec<String> {
    URL_PATTERN
        .find_iter(text)
        .filter_map(|m| normalize_url(m.as_str().trim_end_matches('.')))
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect()
}

/// Opens candidate URLs against every provider except the one that
/// produced them. Stateless per call; callers track visited identifiers.
#[derive(Debug, Clone)]
pub struct Discoverer {
    registry: Arc<ProviderRegistry>,
}

impl Discoverer {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Extracts URLs from `text` and opens them.
    pub async fn discover(
        &self,
        ctx: &CrawlContext,
        text: &str,
        producer: &str,
    ) -> Vec<Box<dyn Repo>> {
        self.discover_urls(ctx, extract_urls(text), producer).await
    }

    pub async fn discover_urls<I>(
        &self,
        ctx: &CrawlContext,
        urls: I,
        producer: &str,
    ) -> Vec<Box<dyn Repo>>
    where
        I: IntoIterator<Item = String>,
    {
        let mut repos = Vec::new();
        for url in urls {
            if ctx.is_expired() {
                debug!("Deadline reached, stopping discovery before {}", url);
                break;
            }
            let found = self.registry.guess_without(ctx, &[producer], &url).await;
            debug!("{} yielded {} candidate(s)", url, found.len());
            repos.extend(found);
        }
        repos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MonlerError, Result};
    use crate::pkguri::PkgUri;
    use crate::provider::MockProvider;
    use crate::report::Report;
    use rstest::rstest;

    struct NamedRepo(PkgUri);

    #[async_trait::async_trait]
    impl Repo for NamedRepo {
        fn uri(&self) -> &PkgUri {
            &self.0
        }

        async fn analyze(&mut self, _ctx: &CrawlContext) -> Result<Box<dyn Report>> {
            Err(MonlerError::not_exist(self.0.to_string()))
        }

        async fn derived(&mut self, _ctx: &CrawlContext) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[rstest]
    #[case("https://user:pw@github.com/o/r.git?tab=readme#top", "https://github.com/o/r")]
    #[case("https://example.org/docs/", "https://example.org/docs")]
    #[case("https://example.org/", "https://example.org")]
    #[case("https://gitlab.com/g/p.git", "https://gitlab.com/g/p.git")]
    #[case("git+https://github.com/o/r.git", "git+https://github.com/o/r")]
    fn normalize_url_strips_noise(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_url(input).as_deref(), Some(expected));
    }

    #[test]
    fn normalize_url_rejects_hostless_input() {
        assert_eq!(normalize_url("mailto:someone@example.org"), None);
        assert_eq!(normalize_url("not a url"), None);
    }

    #[test]
    fn extract_urls_dedupes_in_first_seen_order() {
        let readme = "\
# Tool
[![ci](https://github.com/o/r/actions)](https://github.com/o/r.git)
Docs at https://tool.dev/docs/. Mirror: https://github.com/o/r#readme
Install from https://www.npmjs.com/package/tool.
";
        assert_eq!(
            extract_urls(readme),
            vec![
                "https://github.com/o/r/actions",
                "https://github.com/o/r",
                "https://tool.dev/docs",
                "https://www.npmjs.com/package/tool",
            ]
        );
    }

    #[tokio::test]
    async fn discover_excludes_producer_and_collects_accepted() {
        let mut npm = MockProvider::new();
        npm.expect_provider_name().return_const("npm");
        npm.expect_ping()
            .withf(|_, url| url.starts_with("https://www.npmjs.com/"))
            .returning(|_, _| Ok(()));
        npm.expect_ping()
            .returning(|_, url| Err(MonlerError::not_support(url)));
        npm.expect_open().times(1).returning(|_| {
            Ok(Box::new(NamedRepo(PkgUri::new("npm", "", "tool").unwrap())) as Box<dyn Repo>)
        });

        let mut github = MockProvider::new();
        github.expect_provider_name().return_const("github");
        github.expect_ping().never();
        github.expect_open().never();

        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(npm));
        registry.register(Arc::new(github));
        let discoverer = Discoverer::new(Arc::new(registry));

        let repos = discoverer
            .discover(
                &CrawlContext::background(),
                "see https://www.npmjs.com/package/tool and https://github.com/o/r",
                "github",
            )
            .await;

        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].uri().to_string(), "npm:///tool");
    }
}
