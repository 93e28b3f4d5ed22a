pub mod config;
pub mod context;
pub mod crawl;
pub mod derive;
pub mod error;
pub mod http;
pub mod logging;
pub mod pkguri;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod report;
pub mod semver;
pub mod stat;
pub mod tag_bucket;
pub mod token;
