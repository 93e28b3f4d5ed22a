//! Canonical provider-qualified identifiers
//!
//! Wire format: `<provider>://<host>/<uri>[?proto=<proto>]`. The host is left
//! empty when it equals the provider's default host, and the default protocol
//! (`https`) is never written out.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::error::PkgUriError;

pub const DEFAULT_PROTO: &str = "https";

pub const GIT: &str = "git";
pub const GITHUB: &str = "github";
pub const GITLAB: &str = "gitlab";
pub const BITBUCKET: &str = "bitbucket";
pub const NPM: &str = "npm";
pub const DOCKER: &str = "docker";
pub const HELM: &str = "helm";
pub const YOUTUBE: &str = "youtube";

pub const GITHUB_HOST: &str = "github.com";
pub const GITLAB_HOST: &str = "gitlab.com";
pub const BITBUCKET_HOST: &str = "bitbucket.org";
pub const NPM_HOST: &str = "www.npmjs.com";
pub const NPM_REGISTRY_HOST: &str = "registry.npmjs.org";
pub const DOCKER_HOST: &str = "hub.docker.com";
pub const HELM_HOST: &str = "hub.helm.sh";
pub const YOUTUBE_HOST: &str = "www.youtube.com";

/// Default web host for a provider, `None` for generic git.
pub fn default_host(provider: &str) -> Option<&'static str> {
    match provider {
        GITHUB => Some(GITHUB_HOST),
        GITLAB => Some(GITLAB_HOST),
        BITBUCKET => Some(BITBUCKET_HOST),
        NPM => Some(NPM_HOST),
        DOCKER => Some(DOCKER_HOST),
        HELM => Some(HELM_HOST),
        YOUTUBE => Some(YOUTUBE_HOST),
        _ => None,
    }
}

/// True for a YouTube channel id (`UC` followed by 22 url-safe characters).
pub fn is_youtube_channel_id(id: &str) -> bool {
    id.len() == 24
        && id.starts_with("UC")
        && id[2..]
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PkgUri {
    pub provider: String,
    pub host: String,
    pub uri: String,
    pub proto: String,
}

impl PkgUri {
    /// Builds a normalized identifier. Leading and trailing slashes are
    /// trimmed from `uri`.
    pub fn new(
        provider: impl Into<String>,
        host: impl Into<String>,
        uri: impl AsRef<str>,
    ) -> Result<Self, PkgUriError> {
        Self::with_proto(provider, host, uri, DEFAULT_PROTO)
    }

    pub fn with_proto(
        provider: impl Into<String>,
        host: impl Into<String>,
        uri: impl AsRef<str>,
        proto: impl Into<String>,
    ) -> Result<Self, PkgUriError> {
        let provider = provider.into();
        if provider.is_empty() {
            return Err(PkgUriError::Scheme(String::new()));
        }
        let mut host = host.into();
        let mut uri = uri.as_ref().trim_matches('/').to_string();
        if uri.is_empty() {
            return Err(PkgUriError::NoUri);
        }

        if provider == GIT {
            if !host.is_empty() {
                uri = format!("{host}/{uri}");
                host.clear();
            }
        } else if default_host(&provider).is_some_and(|d| d.eq_ignore_ascii_case(&host)) {
            host.clear();
        }

        let mut proto = proto.into();
        if proto.is_empty() {
            proto = DEFAULT_PROTO.to_string();
        }

        Ok(Self {
            provider,
            host,
            uri,
            proto,
        })
    }

    /// Host with the provider default filled in.
    pub fn web_host(&self) -> &str {
        if self.host.is_empty() {
            default_host(&self.provider).unwrap_or_default()
        } else {
            &self.host
        }
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.uri.split('/').filter(|s| !s.is_empty())
    }

    /// Everything before the last path segment (`owner`, `group/subgroup`).
    pub fn namespace(&self) -> &str {
        self.uri.rsplit_once('/').map(|(ns, _)| ns).unwrap_or_default()
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        self.uri.rsplit_once('/').map_or(self.uri.as_str(), |(_, n)| n)
    }

    /// Web URL a human would open for this identifier.
    pub fn to_url(&self) -> String {
        let host = self.web_host();
        match self.provider.as_str() {
            GIT => format!("{}://{}", self.proto, self.uri),
            NPM => format!("https://{host}/package/{}", self.uri),
            DOCKER => match self.uri.strip_prefix("library/") {
                Some(official) => format!("https://{host}/_/{official}"),
                None => format!("https://{host}/r/{}", self.uri),
            },
            HELM => format!("https://{host}/charts/{}", self.uri),
            YOUTUBE if is_youtube_channel_id(&self.uri) => {
                format!("https://{host}/channel/{}", self.uri)
            }
            YOUTUBE if self.uri.starts_with('@') => format!("https://{host}/{}", self.uri),
            YOUTUBE => format!("https://{host}/user/{}", self.uri),
            _ => format!("{}://{host}/{}", self.proto, self.uri),
        }
    }
}

impl fmt::Display for PkgUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.provider, self.host, self.uri)?;
        if self.proto != DEFAULT_PROTO {
            let proto: String = form_urlencoded::byte_serialize(self.proto.as_bytes()).collect();
            write!(f, "?proto={proto}")?;
        }
        Ok(())
    }
}

impl FromStr for PkgUri {
    type Err = PkgUriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, rest) = s
            .split_once("://")
            .ok_or_else(|| PkgUriError::Scheme(s.to_string()))?;
        if provider.is_empty()
            || !provider
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(PkgUriError::Scheme(s.to_string()));
        }

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };
        let (host, uri) = location.split_once('/').unwrap_or((location, ""));
        if host.contains(char::is_whitespace) {
            return Err(PkgUriError::Host(host.to_string()));
        }

        let proto = query
            .into_iter()
            .flat_map(|q| form_urlencoded::parse(q.as_bytes()))
            .find(|(key, _)| key == "proto")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_else(|| DEFAULT_PROTO.to_string());

        Self::with_proto(provider.to_ascii_lowercase(), host, uri, proto)
    }
}

impl TryFrom<String> for PkgUri {
    type Error = PkgUriError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PkgUri> for String {
    fn from(value: PkgUri) -> Self {
        value.to_string()
    }
}
