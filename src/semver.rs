//! Version parsing and tag ordering shared by every provider
//!
//! Tags are parsed leniently: a leading `v` is dropped, partial versions are
//! padded (`1` -> `1.0.0`, `1.2` -> `1.2.0`), and when the whole string is not
//! a version the leading numeric part is retried with the remainder treated
//! as a prerelease. Anything that still fails ranks below every version.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;
use semver::Version;

use crate::stat::Stat;

static VERSION_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[vV]?(\d+)(?:\.(\d+))?(?:\.(\d+))?").expect("version prefix pattern")
});

static STRICT_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[vV]?\d+\.\d+\.\d+").expect("strict version pattern"));

fn strip_v(version: &str) -> &str {
    version
        .strip_prefix('v')
        .or_else(|| version.strip_prefix('V'))
        .unwrap_or(version)
}

/// Parse a version string, padding partial versions with zeros.
///
/// Examples:
/// - "1" -> Version(1, 0, 0)
/// - "v1.2" -> Version(1, 2, 0)
/// - "1.2.3-rc.1" -> Version(1, 2, 3, pre = "rc.1")
pub fn parse_version(version: &str) -> Option<Version> {
    let version = strip_v(version.trim());
    let parts: Vec<&str> = version.split('.').collect();
    let normalized = match parts.len() {
        1 => format!("{}.0.0", parts[0]),
        2 => format!("{}.{}.0", parts[0], parts[1]),
        _ => version.to_string(),
    };
    Version::parse(&normalized).ok()
}

/// Like [`parse_version`], retrying on the leading numeric part when the
/// full string does not parse (`1.25-alpine`, `2.0.1_beta`, `3.1.0.4`).
pub fn parse_version_lenient(version: &str) -> Option<Version> {
    if let Some(parsed) = parse_version(version) {
        return Some(parsed);
    }

    let caps = VERSION_PREFIX.captures(version.trim())?;
    let num = |i: usize| caps.get(i).map_or("0", |m| m.as_str());
    let base = format!("{}.{}.{}", num(1), num(2), num(3));
    let rest = &version.trim()[caps.get(0).map_or(0, |m| m.end())..];

    let suffix: String = rest
        .trim_start_matches(['-', '_', '.', '+'])
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '-' })
        .collect();
    let suffix = suffix.trim_matches(['-', '.']);

    if !suffix.is_empty()
        && let Ok(parsed) = Version::parse(&format!("{base}-{suffix}"))
    {
        return Some(parsed);
    }
    Version::parse(&base).ok()
}

/// True when the value has the strict `major.minor.patch` shape.
pub fn is_strict(version: &str) -> bool {
    STRICT_VERSION.is_match(version)
}

/// True when the value parses as a version without prerelease.
pub fn is_stable(version: &str) -> bool {
    parse_version_lenient(version).is_some_and(|v| v.pre.is_empty())
}

/// Ascending order over tag values: unparseable values first, then by version
/// precedence, ties broken by the raw string.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version_lenient(a), parse_version_lenient(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

/// Sorts tag stats newest version first.
pub fn sort_desc(tags: &mut [Stat]) {
    tags.sort_by(|a, b| compare_versions(&b.value, &a.value));
}

/// Greatest stable version among `values`.
pub fn latest_stable<'a, I>(values: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    values
        .into_iter()
        .filter(|v| is_stable(v))
        .max_by(|a, b| compare_versions(a, b))
}

/// Orders tags newest version first and flags the greatest stable version.
/// Without any stable version, tags are ordered by date and the most recent
/// one is flagged.
pub fn order_tags(mut tags: Vec<Stat>) -> Vec<Stat> {
    let latest = latest_stable(tags.iter().map(|t| t.value.as_str())).map(str::to_string);
    match latest {
        Some(latest) => {
            sort_desc(&mut tags);
            for tag in &mut tags {
                tag.is_latest = tag.value == latest;
            }
        }
        None => {
            tags.sort_by(|a, b| {
                b.recorded_at
                    .cmp(&a.recorded_at)
                    .then_with(|| compare_versions(&b.value, &a.value))
            });
            for (i, tag) in tags.iter_mut().enumerate() {
                tag.is_latest = i == 0;
            }
        }
    }
    tags
}
