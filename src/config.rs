use serde::Deserialize;
use std::path::{Path, PathBuf};

// =============================================================================
// Crawl-related constants
// =============================================================================

/// Default time budget for one crawl in milliseconds (60 seconds)
pub const DEFAULT_CRAWL_TIMEOUT_MS: u64 = 60_000;

/// Default number of derived hops followed from the starting URL
pub const DEFAULT_MAX_DEPTH: usize = 1;

/// Docker Hub returns 100 tags per page; 20 pages covers most images
pub const DEFAULT_MAX_TAG_PAGES: usize = 20;

/// YouTube returns 50 uploads per page
pub const DEFAULT_MAX_VIDEO_PAGES: usize = 1;

/// Crawler configuration structure
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct MonlerConfig {
    pub providers: ProvidersConfig,
    pub github: CredentialsConfig,
    pub youtube: CredentialsConfig,
    pub crawl: CrawlConfig,
}

impl MonlerConfig {
    /// Reads a JSON configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Crawl limits
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CrawlConfig {
    /// Time budget for one crawl in milliseconds
    pub timeout_ms: u64,
    /// Derived hops followed from the starting URL
    pub max_depth: usize,
    pub max_tag_pages: usize,
    pub max_video_pages: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_CRAWL_TIMEOUT_MS,
            max_depth: DEFAULT_MAX_DEPTH,
            max_tag_pages: DEFAULT_MAX_TAG_PAGES,
            max_video_pages: DEFAULT_MAX_VIDEO_PAGES,
        }
    }
}

/// API credentials for a rate-limited provider
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CredentialsConfig {
    #[serde(alias = "apiKeys")]
    pub tokens: Vec<String>,
}

/// Provider-specific configuration
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ProvidersConfig {
    pub git: ProviderConfig,
    pub github: ProviderConfig,
    pub gitlab: ProviderConfig,
    pub bitbucket: ProviderConfig,
    pub npm: ProviderConfig,
    pub docker: ProviderConfig,
    pub helm: ProviderConfig,
    pub youtube: ProviderConfig,
}

/// Individual provider configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub enabled: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Returns the path to the data directory for monler.
/// Uses $XDG_DATA_HOME/monler if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/monler,
/// or ./monler if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the path to the log file.
pub fn log_path() -> PathBuf {
    data_dir().join("monler.log")
}

/// Returns the default configuration file location.
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("monler")
}
