//! Registry variants and the startup bootstrap that wires them together

pub mod bitbucket;
pub mod docker;
pub mod git;
pub mod github;
pub mod gitlab;
pub mod helm;
pub mod hosted;
pub mod npm;
pub mod youtube;

use std::sync::Arc;

use tracing::debug;

use crate::config::MonlerConfig;
use crate::registry::ProviderRegistry;
use crate::token::TokenPool;

use bitbucket::BitbucketProvider;
use docker::{DockerClient, DockerProvider};
use git::GitProvider;
use github::GitHubProvider;
use gitlab::GitLabProvider;
use helm::{HelmClient, HelmProvider};
use npm::NpmProvider;
use youtube::YouTubeProvider;

/// Registers every enabled provider. GitHub gains Helm chart lookups when the
/// Helm provider is enabled as well.
pub fn build_registry(config: &MonlerConfig) -> ProviderRegistry {
    let enabled = &config.providers;
    let mut registry = ProviderRegistry::new();

    if enabled.git.enabled {
        registry.register(Arc::new(GitProvider::new()));
    }
    if enabled.github.enabled {
        let tokens = TokenPool::new(config.github.tokens.iter());
        let mut github = GitHubProvider::with_tokens(tokens);
        if enabled.helm.enabled {
            github = github.with_chart_search(HelmClient::default());
        }
        registry.register(Arc::new(github));
    }
    if enabled.gitlab.enabled {
        registry.register(Arc::new(GitLabProvider::default()));
    }
    if enabled.bitbucket.enabled {
        registry.register(Arc::new(BitbucketProvider::default()));
    }
    if enabled.npm.enabled {
        registry.register(Arc::new(NpmProvider::default()));
    }
    if enabled.docker.enabled {
        let client = DockerClient::default().with_max_tag_pages(config.crawl.max_tag_pages);
        registry.register(Arc::new(DockerProvider::new(client)));
    }
    if enabled.helm.enabled {
        registry.register(Arc::new(HelmProvider::default()));
    }
    if enabled.youtube.enabled {
        let keys = TokenPool::new(config.youtube.tokens.iter());
        let youtube = YouTubeProvider::with_keys(keys);
        let youtube = youtube.with_max_pages(config.crawl.max_video_pages);
        registry.register(Arc::new(youtube));
    }

    debug!("Registered providers: {:?}", registry.providers());
    registry
}
