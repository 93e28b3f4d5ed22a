//! Analysis results: non-tag stats plus a forward-only tag cursor
//!
//! Reports are plain values handed to a single consumer. The cursor is
//! advanced through `&mut self` and is not meant to be shared across tasks.

use crate::error::{MonlerError, Result};
use crate::pkguri::PkgUri;
use crate::stat::Stat;

pub trait Report: Send + Sync {
    fn uri(&self) -> &PkgUri;

    /// Non-tag facts (popularity counters, channels, sizes).
    fn stats(&self) -> &[Stat];

    /// Advances the cursor, returning false once the tags are exhausted.
    fn next(&mut self) -> bool;

    /// Tag under the cursor. Fails with `CursorNotStarted` before the first
    /// `next()` and with `EndOfReport` after the last tag.
    fn tag(&self) -> Result<&Stat>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn latest_tag(&self) -> Option<&Stat>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Collects the remaining tags of a report.
pub fn drain_tags(report: &mut dyn Report) -> Result<Vec<Stat>> {
    let mut tags = Vec::with_capacity(report.len());
    while report.next() {
        tags.push(report.tag()?.clone());
    }
    Ok(tags)
}

/// Report over an in-memory, already ordered tag list.
#[derive(Debug, Clone)]
pub struct StaticReport {
    uri: PkgUri,
    stats: Vec<Stat>,
    tags: Vec<Stat>,
    cursor: Option<usize>,
}

impl StaticReport {
    pub fn new(uri: PkgUri, stats: Vec<Stat>, tags: Vec<Stat>) -> Self {
        Self {
            uri,
            stats,
            tags,
            cursor: None,
        }
    }

    pub fn tags(&self) -> &[Stat] {
        &self.tags
    }
}

impl Report for StaticReport {
    fn uri(&self) -> &PkgUri {
        &self.uri
    }

    fn stats(&self) -> &[Stat] {
        &self.stats
    }

    fn next(&mut self) -> bool {
        let next = self.cursor.map_or(0, |c| c + 1);
        if next < self.tags.len() {
            self.cursor = Some(next);
            true
        } else {
            self.cursor = Some(self.tags.len());
            false
        }
    }

    fn tag(&self) -> Result<&Stat> {
        let cursor = self.cursor.ok_or(MonlerError::CursorNotStarted)?;
        self.tags.get(cursor).ok_or(MonlerError::EndOfReport)
    }

    fn len(&self) -> usize {
        self.tags.len()
    }

    fn latest_tag(&self) -> Option<&Stat> {
        self.tags.iter().find(|t| t.is_latest)
    }
}

/// Hosting-service report: its own popularity stats layered over a git
/// report that owns the tag cursor.
#[derive(Debug, Clone)]
pub struct HostedReport {
    uri: PkgUri,
    stats: Vec<Stat>,
    git: StaticReport,
}

impl HostedReport {
    pub fn new(uri: PkgUri, stats: Vec<Stat>, git: StaticReport) -> Self {
        Self { uri, stats, git }
    }

    pub fn git(&self) -> &StaticReport {
        &self.git
    }
}

impl Report for HostedReport {
    fn uri(&self) -> &PkgUri {
        &self.uri
    }

    fn stats(&self) -> &[Stat] {
        &self.stats
    }

    fn next(&mut self) -> bool {
        self.git.next()
    }

    fn tag(&self) -> Result<&Stat> {
        self.git.tag()
    }

    fn len(&self) -> usize {
        self.git.len()
    }

    fn latest_tag(&self) -> Option<&Stat> {
        self.git.latest_tag()
    }

    fn close(&mut self) -> Result<()> {
        self.git.close()
    }
}
