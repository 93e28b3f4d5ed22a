//! Observed facts about a repository, shaped as a tree

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatKind {
    Tag,
    Channel,
    Alias,
    Fork,
    Star,
    Watcher,
    OpenIssue,
    Download,
    Pull,
    Size,
    FileCount,
    Manifest,
    SubscriberCount,
    VideoCount,
    ViewCount,
    Video,
}

impl StatKind {
    pub const ALL: [StatKind; 16] = [
        StatKind::Tag,
        StatKind::Channel,
        StatKind::Alias,
        StatKind::Fork,
        StatKind::Star,
        StatKind::Watcher,
        StatKind::OpenIssue,
        StatKind::Download,
        StatKind::Pull,
        StatKind::Size,
        StatKind::FileCount,
        StatKind::Manifest,
        StatKind::SubscriberCount,
        StatKind::VideoCount,
        StatKind::ViewCount,
        StatKind::Video,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatKind::Tag => "tag",
            StatKind::Channel => "channel",
            StatKind::Alias => "alias",
            StatKind::Fork => "fork",
            StatKind::Star => "star",
            StatKind::Watcher => "watcher",
            StatKind::OpenIssue => "open_issue",
            StatKind::Download => "download",
            StatKind::Pull => "pull",
            StatKind::Size => "size",
            StatKind::FileCount => "file_count",
            StatKind::Manifest => "manifest",
            StatKind::SubscriberCount => "subscriber_count",
            StatKind::VideoCount => "video_count",
            StatKind::ViewCount => "view_count",
            StatKind::Video => "video",
        }
    }
}

impl fmt::Display for StatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StatKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown stat kind: {s}"))
    }
}

/// One observed fact. Tags carry manifests, manifests carry platform labels
/// and sizes, tags and channels carry aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub kind: StatKind,
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub is_latest: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub substats: Vec<Stat>,
}

impl Stat {
    pub fn new(kind: StatKind, value: impl Into<String>, recorded_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            value: value.into(),
            digest: String::new(),
            labels: BTreeMap::new(),
            recorded_at,
            is_latest: false,
            substats: Vec::new(),
        }
    }

    /// A popularity counter observed now, flagged as the current reading.
    pub fn count(kind: StatKind, n: u64, recorded_at: DateTime<Utc>) -> Self {
        Self::new(kind, n.to_string(), recorded_at).latest(true)
    }

    pub fn alias(value: impl Into<String>, recorded_at: DateTime<Utc>) -> Self {
        Self::new(StatKind::Alias, value, recorded_at)
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = digest.into();
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.labels.insert(key.into(), value);
        }
        self
    }

    pub fn with_substat(mut self, stat: Stat) -> Self {
        self.substats.push(stat);
        self
    }

    pub fn latest(mut self, is_latest: bool) -> Self {
        self.is_latest = is_latest;
        self
    }

    pub fn substats_of(&self, kind: StatKind) -> impl Iterator<Item = &Stat> {
        self.substats.iter().filter(move |s| s.kind == kind)
    }

    /// Distinct digests of this stat's manifests.
    pub fn manifest_digests(&self) -> impl Iterator<Item = &str> {
        self.substats_of(StatKind::Manifest)
            .map(|m| m.digest.as_str())
            .filter(|d| !d.is_empty())
            .collect::<IndexSet<_>>()
            .into_iter()
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.substats_of(StatKind::Alias).map(|a| a.value.as_str())
    }
}
