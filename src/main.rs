use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use monler::config::{self, MonlerConfig};
use monler::context::CrawlContext;
use monler::crawl::Crawler;
use monler::pkguri::PkgUri;
use monler::providers::build_registry;

#[derive(Parser)]
#[command(name = "monler")]
#[command(version, about = "Repository and package statistics crawler")]
struct Cli {
    /// Configuration file (defaults to <data dir>/config.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write logs to a file instead of stderr (defaults to <data dir>/monler.log)
    #[arg(long, global = true, num_args = 0..=1)]
    log_file: Option<Option<PathBuf>>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// GitHub token, in addition to those in the config file (repeatable)
    #[arg(long = "github-token", global = true)]
    github_tokens: Vec<String>,

    /// YouTube Data API key, in addition to those in the config file (repeatable)
    #[arg(long = "youtube-key", global = true)]
    youtube_keys: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List registered providers
    Providers,
    /// Parse a canonical identifier and print it with its web URL
    Parse { uri: String },
    /// Check whether a provider recognizes a URL
    Ping { provider: String, url: String },
    /// Analyze a URL and the repositories derived from it
    Crawl {
        url: String,
        /// Derived hops to follow
        #[arg(long)]
        depth: Option<usize>,
        /// Time budget for the whole crawl
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<MonlerConfig> {
    match path {
        Some(path) => MonlerConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => {
            let default = config::config_path();
            if default.exists() {
                MonlerConfig::load(&default)
            } else {
                Ok(MonlerConfig::default())
            }
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = load_config(cli.config.as_ref())?;
    config.github.tokens.extend(cli.github_tokens);
    config.youtube.tokens.extend(cli.youtube_keys);
    let registry = Arc::new(build_registry(&config));

    match cli.command {
        Command::Providers => {
            for name in registry.providers() {
                println!("{name}");
            }
        }
        Command::Parse { uri } => {
            let parsed: PkgUri = uri.parse()?;
            registry.get(&parsed.provider)?;
            println!("{}\t{}", parsed, parsed.to_url());
        }
        Command::Ping { provider, url } => {
            let ctx = CrawlContext::with_timeout(Duration::from_millis(config.crawl.timeout_ms));
            registry.ping(&ctx, &provider, &url).await?;
            println!("ok");
        }
        Command::Crawl {
            url,
            depth,
            timeout_secs,
        } => {
            let timeout = timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_millis(config.crawl.timeout_ms));
            let ctx = CrawlContext::with_timeout(timeout);
            let crawler =
                Crawler::new(registry).with_max_depth(depth.unwrap_or(config.crawl.max_depth));
            let reports = crawler.crawl(&ctx, &url).await?;
            info!("Crawled {} repositories from {}", reports.len(), url);
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_file = cli
        .log_file
        .clone()
        .map(|path| path.unwrap_or_else(config::log_path));
    let _guard = monler::logging::init(log_file.as_deref(), cli.json_logs)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli))
}
