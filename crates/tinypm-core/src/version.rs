//! Semver range matching over a set of published versions (npm range syntax).

use semver::{Version, VersionReq};

use crate::error::{ResolveError, Result};

/// A parsed npm range: any of `alternatives` may match. `None` means "any version".
#[derive(Clone, Debug)]
pub struct Range {
    alternatives: Option<Vec<VersionReq>>,
}

impl Range {
    /// Parse an npm-style range. Returns None when the range is malformed.
    pub fn parse(range: &str) -> Option<Range> {
        let range = range.trim();
        if is_any(range) {
            return Some(Range { alternatives: None });
        }
        let mut alternatives = Vec::new();
        for part in range.split("||") {
            let part = part.trim();
            if is_any(part) {
                return Some(Range { alternatives: None });
            }
            let normalized = normalize_comparators(part)?;
            alternatives.push(VersionReq::parse(&normalized).ok()?);
        }
        Some(Range {
            alternatives: Some(alternatives),
        })
    }

    pub fn is_any(&self) -> bool {
        self.alternatives.is_none()
    }

    pub fn matches(&self, version: &Version) -> bool {
        match &self.alternatives {
            None => true,
            Some(reqs) => reqs.iter().any(|r| r.matches(version)),
        }
    }
}

fn is_any(range: &str) -> bool {
    range.is_empty() || range == "latest" || is_wildcard(range)
}

/// `*`, `x`, `x.x`, `X.x.x`, `*.*`: every component of the core is a wildcard.
fn is_wildcard(version: &str) -> bool {
    let core = strip_v(version).split(['-', '+']).next().unwrap_or("");
    !core.is_empty() && core.split('.').all(|c| matches!(c, "x" | "X" | "*"))
}

/// Turn one `||` alternative into the comma-separated form the semver crate accepts.
/// Bare full versions become exact (`=`) as npm treats them.
fn normalize_comparators(part: &str) -> Option<String> {
    if let Some((lo, hi)) = part.split_once(" - ") {
        let lo = strip_v(lo.trim());
        let hi = strip_v(hi.trim());
        if lo.is_empty() || hi.is_empty() {
            return None;
        }
        return Some(format!(">={}, <={}", lo, hi));
    }

    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op: Option<&str> = None;
    let mut saw_wildcard = false;
    for token in part.split_whitespace() {
        let token = token.trim_end_matches(',');
        if token.is_empty() {
            continue;
        }
        if token.chars().all(|c| matches!(c, '>' | '<' | '=' | '^' | '~')) {
            pending_op = Some(canonical_op(token));
            continue;
        }
        let (op, rest) = split_op(token);
        let op = pending_op.take().unwrap_or(op);
        let rest = strip_v(rest);
        if rest.is_empty() {
            return None;
        }
        if is_wildcard(rest) {
            saw_wildcard = true;
            continue;
        }
        let core = rest.split(['-', '+']).next().unwrap_or(rest);
        let has_wildcard = core.contains(['x', 'X', '*']);
        let op = if op.is_empty() && !has_wildcard { "=" } else { op };
        comparators.push(format!("{}{}", op, rest));
    }
    if pending_op.is_some() {
        return None;
    }
    if comparators.is_empty() {
        return saw_wildcard.then(|| "*".to_string());
    }
    Some(comparators.join(", "))
}

fn canonical_op(op: &str) -> &str {
    if op == "~>" {
        "~"
    } else {
        op
    }
}

fn split_op(token: &str) -> (&str, &str) {
    for op in [">=", "<=", "~>", ">", "<", "=", "^", "~"] {
        if let Some(rest) = token.strip_prefix(op) {
            return (canonical_op(op), rest);
        }
    }
    ("", token)
}

fn strip_v(s: &str) -> &str {
    s.trim_start_matches(['v', 'V', '='])
}

/// Parse a concrete version, tolerating a leading `v` or `=`.
pub fn parse_version(version: &str) -> Option<Version> {
    Version::parse(strip_v(version.trim())).ok()
}

/// True if the concrete version satisfies the range. An empty range matches everything.
pub fn satisfies(version: &str, range: &str) -> bool {
    let Some(v) = parse_version(version) else {
        return false;
    };
    match Range::parse(range) {
        Some(r) => r.matches(&v),
        None => false,
    }
}

/// Highest version in `versions` satisfying `range`, returned as the original string.
/// With an empty range the maximum by semver ordering wins, stable releases first.
pub fn max_satisfying<'a, I>(range: &str, versions: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let range = Range::parse(range)?;
    let parsed: Vec<(Version, &str)> = versions
        .into_iter()
        .filter_map(|s| parse_version(s).map(|v| (v, s)))
        .collect();

    if range.is_any() {
        let stable = parsed
            .iter()
            .filter(|(v, _)| v.pre.is_empty())
            .max_by(|a, b| a.0.cmp(&b.0));
        return stable
            .or_else(|| parsed.iter().max_by(|a, b| a.0.cmp(&b.0)))
            .map(|(_, s)| *s);
    }

    parsed
        .iter()
        .filter(|(v, _)| range.matches(v))
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, s)| *s)
}

/// Resolve `range` for package `name` against its published versions.
pub fn match_version<'a, I>(name: &str, range: &str, versions: I) -> Result<String>
where
    I: IntoIterator<Item = &'a str>,
{
    max_satisfying(range, versions)
        .map(str::to_string)
        .ok_or_else(|| ResolveError::UnresolvableConstraint {
            name: name.to_string(),
            range: range.to_string(),
        })
}
