//! Partition of image tags by the manifest digests they resolve to
//!
//! Tags resolving to the same digest set form an identical group with one
//! canonical representative; the other members become its aliases. A group
//! whose digests are strictly contained in another group's and which contains
//! no group itself is folded into its closest parent. Alphabetic tags are
//! moving channels and stay visible, except `latest`, which folds into the
//! representative of its own group when there is one. Tags without manifests
//! are orphans.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::hash::Hash;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{MonlerError, Result};
use crate::semver::{compare_versions, is_stable, is_strict, parse_version_lenient};
use crate::stat::{Stat, StatKind};

pub const LATEST: &str = "latest";

static CHANNEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z]+$").expect("channel pattern"));

pub fn is_channel(value: &str) -> bool {
    CHANNEL.is_match(value)
}

/// How one digest set relates to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestRelation {
    Identical,
    /// The left set strictly contains the right one.
    Superset,
    /// The left set is strictly contained in the right one.
    Subset,
    Undefined,
}

impl DigestRelation {
    pub fn mirror(self) -> Self {
        match self {
            DigestRelation::Superset => DigestRelation::Subset,
            DigestRelation::Subset => DigestRelation::Superset,
            other => other,
        }
    }
}

pub fn classify<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> DigestRelation {
    match (a.is_superset(b), b.is_superset(a)) {
        (true, true) => DigestRelation::Identical,
        (true, false) => DigestRelation::Superset,
        (false, true) => DigestRelation::Subset,
        (false, false) => DigestRelation::Undefined,
    }
}

/// Visible tags after classification. Every input tag is either one of these
/// entries or an alias substat of exactly one of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagBuckets {
    /// Canonical version tags, newest first.
    pub semvers: Vec<Stat>,
    /// Moving pointers, by name.
    pub channels: Vec<Stat>,
    /// Tags without manifests, newest first.
    pub orphans: Vec<Stat>,
}

impl TagBuckets {
    pub fn latest_tag(&self) -> Option<&Stat> {
        self.semvers
            .iter()
            .chain(&self.orphans)
            .filter(|s| s.is_latest)
            .min_by_key(|s| s.value == LATEST)
    }

    pub fn len(&self) -> usize {
        self.semvers.len() + self.channels.len() + self.orphans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_tags(self) -> Vec<Stat> {
        let mut tags = self.semvers;
        tags.extend(self.channels);
        tags.extend(self.orphans);
        tags
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Semver,
    Channel,
    Orphan,
    AliasOf(usize),
}

struct Group {
    key: String,
    members: Vec<usize>,
}

/// Orders two tag values so that the preferred one compares greater: strict
/// versions first, then the higher version, then the shorter spelling.
fn newest_preferred(a: &str, b: &str) -> Ordering {
    let (va, vb) = (parse_version_lenient(a), parse_version_lenient(b));
    (is_strict(a), va.is_some())
        .cmp(&(is_strict(b), vb.is_some()))
        .then_with(|| va.cmp(&vb))
        .then_with(|| b.len().cmp(&a.len()))
        .then_with(|| b.cmp(a))
}

/// Merges tags sharing a value and orders them by value.
fn merge_duplicates(tags: Vec<Stat>) -> Vec<Stat> {
    let mut by_value: BTreeMap<String, Stat> = BTreeMap::new();
    for mut tag in tags {
        tag.is_latest = false;
        match by_value.get_mut(&tag.value) {
            Some(existing) => existing.substats.extend(tag.substats),
            None => {
                by_value.insert(tag.value.clone(), tag);
            }
        }
    }
    by_value
        .into_values()
        .map(|mut tag| {
            tag.substats
                .sort_by(|a, b| (&a.value, &a.digest).cmp(&(&b.value, &b.digest)));
            tag.substats
                .dedup_by(|a, b| a.kind == b.kind && a.value == b.value && a.digest == b.digest);
            tag
        })
        .collect()
}

fn canonical_key(digests: &HashSet<&str>) -> String {
    let sorted: BTreeSet<&str> = digests.iter().copied().collect();
    sorted.into_iter().collect::<Vec<_>>().join(",")
}

/// Classifies image tags into semver, channel and orphan buckets. Fails with
/// `NoLatestTag` when no tag is named `latest`.
pub fn bucket_tags(tags: Vec<Stat>) -> Result<TagBuckets> {
    let entries = merge_duplicates(tags);
    let latest = entries
        .iter()
        .position(|t| t.value == LATEST)
        .ok_or(MonlerError::NoLatestTag)?;

    let digests: Vec<HashSet<&str>> = entries.iter().map(|t| t.manifest_digests().collect()).collect();

    let mut groups: Vec<Group> = Vec::new();
    let mut group_of: Vec<Option<usize>> = vec![None; entries.len()];
    let mut by_key: HashMap<String, usize> = HashMap::new();
    for (i, set) in digests.iter().enumerate() {
        if set.is_empty() {
            continue;
        }
        let key = canonical_key(set);
        let gi = *by_key.entry(key.clone()).or_insert_with(|| {
            groups.push(Group {
                key,
                members: Vec::new(),
            });
            groups.len() - 1
        });
        groups[gi].members.push(i);
        group_of[i] = Some(gi);
    }
    let group_set = |gi: usize| &digests[groups[gi].members[0]];

    // Only groups sharing a digest can be related.
    let mut by_digest: HashMap<&str, Vec<usize>> = HashMap::new();
    for gi in 0..groups.len() {
        for digest in group_set(gi) {
            by_digest.entry(*digest).or_default().push(gi);
        }
    }
    let mut parents: Vec<Vec<usize>> = vec![Vec::new(); groups.len()];
    let mut has_children = vec![false; groups.len()];
    for gi in 0..groups.len() {
        let related: BTreeSet<usize> = group_set(gi)
            .iter()
            .flat_map(|d| by_digest.get(d).into_iter().flatten().copied())
            .filter(|&other| other != gi)
            .collect();
        for other in related {
            if classify(group_set(other), group_set(gi)) == DigestRelation::Superset {
                parents[gi].push(other);
                has_children[other] = true;
            }
        }
    }

    let latest_group = group_of[latest];
    let reps: Vec<Option<usize>> = groups
        .iter()
        .enumerate()
        .map(|(gi, g)| {
            let candidates = g
                .members
                .iter()
                .copied()
                .filter(|&m| !is_channel(&entries[m].value));
            if latest_group == Some(gi) {
                // `latest` resolves to the newest version it shares manifests with.
                return candidates
                    .max_by(|&a, &b| newest_preferred(&entries[a].value, &entries[b].value));
            }
            candidates.min_by_key(|&m| {
                let value = entries[m].value.as_str();
                (
                    !is_strict(value),
                    parse_version_lenient(value).is_none(),
                    value.len(),
                    value,
                )
            })
        })
        .collect();

    let anchor = |gi: usize| {
        reps[gi].or_else(|| {
            groups[gi]
                .members
                .iter()
                .copied()
                .filter(|&m| is_channel(&entries[m].value))
                .min_by_key(|&m| entries[m].value.as_str())
        })
    };

    let mut placement = vec![Placement::Orphan; entries.len()];
    for (gi, group) in groups.iter().enumerate() {
        let hidden = !parents[gi].is_empty() && !has_children[gi];
        let parent_anchor = if hidden {
            parents[gi]
                .iter()
                .copied()
                .min_by_key(|&p| (group_set(p).len(), groups[p].key.as_str()))
                .and_then(anchor)
        } else {
            None
        };

        for &m in &group.members {
            let value = entries[m].value.as_str();
            let absorbed_latest = value == LATEST && reps[gi].is_some() && !hidden;
            placement[m] = if is_channel(value) && !absorbed_latest {
                Placement::Channel
            } else if let Some(target) = parent_anchor {
                Placement::AliasOf(target)
            } else if reps[gi] == Some(m) {
                Placement::Semver
            } else {
                reps[gi].map_or(Placement::Semver, Placement::AliasOf)
            };
        }
    }

    let latest_rep = group_of[latest]
        .and_then(|gi| reps[gi])
        .filter(|&r| placement[r] == Placement::Semver);
    let latest_tag = latest_rep.or_else(|| {
        (0..entries.len())
            .filter(|&i| matches!(placement[i], Placement::Semver | Placement::Orphan))
            .filter(|&i| is_stable(&entries[i].value))
            .max_by(|&a, &b| compare_versions(&entries[a].value, &entries[b].value))
    });

    let mut aliases: HashMap<usize, Vec<Stat>> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        if let Placement::AliasOf(target) = placement[i] {
            aliases
                .entry(target)
                .or_default()
                .push(Stat::alias(entry.value.clone(), entry.recorded_at));
        }
    }

    let mut buckets = TagBuckets::default();
    for (i, mut stat) in entries.into_iter().enumerate() {
        if let Some(mut extra) = aliases.remove(&i) {
            extra.sort_by(|a, b| compare_versions(&b.value, &a.value));
            stat.substats.extend(extra);
        }
        match placement[i] {
            Placement::Semver => {
                stat.is_latest = latest_tag == Some(i);
                buckets.semvers.push(stat);
            }
            Placement::Orphan => {
                stat.is_latest = latest_tag == Some(i) || i == latest;
                buckets.orphans.push(stat);
            }
            Placement::Channel => {
                stat.kind = StatKind::Channel;
                stat.is_latest = i == latest;
                buckets.channels.push(stat);
            }
            Placement::AliasOf(_) => {}
        }
    }

    buckets
        .semvers
        .sort_by(|a, b| compare_versions(&b.value, &a.value));
    buckets.orphans.sort_by(|a, b| compare_versions(&b.value, &a.value));
    buckets.channels.sort_by(|a, b| a.value.cmp(&b.value));
    Ok(buckets)
}
