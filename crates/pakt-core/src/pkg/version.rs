//! Version resolution using semver.
//!
//! Constraints use npm range syntax, which is translated into one
//! [`VersionReq`] per `||` alternative. A constraint that is not a range is
//! treated as a dist-tag name.

use super::error::PkgError;
use super::model::{PackageInfo, PackageVersion};
use super::spec::DEFAULT_TAG;
use semver::VersionReq;
use std::sync::Arc;

/// Resolve a constraint against a package's published versions.
///
/// # Rules
/// - `None` or an empty constraint means the `latest` dist-tag
/// - A valid range (including an exact version) returns the highest satisfying version
/// - Anything else is looked up as a dist-tag
///
/// Returns `None` when nothing matches.
#[must_use]
pub fn resolve_in(info: &PackageInfo, constraint: Option<&str>) -> Option<Arc<PackageVersion>> {
    let constraint = constraint.map(str::trim).filter(|c| !c.is_empty());
    let constraint = constraint.unwrap_or(DEFAULT_TAG);

    match parse_range(constraint) {
        Ok(reqs) => best_match(info, &reqs),
        Err(_) => info.tagged(constraint).cloned(),
    }
}

/// All versions satisfying a range, ascending. A tag yields its single target.
#[must_use]
pub fn resolve_all_in(info: &PackageInfo, constraint: Option<&str>) -> Vec<Arc<PackageVersion>> {
    let constraint = constraint.map(str::trim).filter(|c| !c.is_empty());
    let constraint = constraint.unwrap_or(DEFAULT_TAG);

    match parse_range(constraint) {
        Ok(reqs) => satisfying(info, &reqs),
        Err(_) => info.tagged(constraint).cloned().into_iter().collect(),
    }
}

/// Highest version satisfying any of the requirements.
#[must_use]
pub fn best_match(info: &PackageInfo, reqs: &[VersionReq]) -> Option<Arc<PackageVersion>> {
    info.versions
        .values()
        .filter(|v| v.satisfies(reqs))
        .max()
        .cloned()
}

fn satisfying(info: &PackageInfo, reqs: &[VersionReq]) -> Vec<Arc<PackageVersion>> {
    let mut matches: Vec<Arc<PackageVersion>> = info
        .versions
        .values()
        .filter(|v| v.satisfies(reqs))
        .cloned()
        .collect();
    matches.sort();
    matches
}

/// Check whether a constraint is a version range rather than a tag.
#[must_use]
pub fn is_range(constraint: &str) -> bool {
    parse_range(constraint).is_ok()
}

/// Parse an npm version range into its `||` alternatives.
///
/// Handles:
/// - Standard semver ranges: ^1.0.0, ~1.0.0, >=1.0.0, etc.
/// - Bare versions: `1.2.3` is exact, `1.2` means `1.2.x`, `1` means `1.x`
/// - Hyphen ranges: 1.0.0 - 2.0.0
/// - X-ranges: 1.x, 1.0.x, *
/// - Space-separated comparators: >= 2.1.2 < 3.0.0
/// - OR ranges: ^1.0.0 || ^2.0.0
///
/// Invalid alternatives are skipped as long as one alternative parses.
///
/// # Errors
/// Returns an error if no alternative is a valid range.
pub fn parse_range(range: &str) -> Result<Vec<VersionReq>, PkgError> {
    let reqs: Vec<VersionReq> = range
        .split("||")
        .map(str::trim)
        .filter(|alt| !alt.is_empty())
        .filter_map(|alt| parse_alternative(alt).ok())
        .collect();

    if reqs.is_empty() {
        return Err(PkgError::spec_invalid(format!(
            "Invalid version range '{range}': no valid alternatives"
        )));
    }
    Ok(reqs)
}

/// Parse a single alternative (no `||`).
fn parse_alternative(range: &str) -> Result<VersionReq, PkgError> {
    let converted = if let Some((start, end)) = parse_hyphen_range(range) {
        // "1.0.0 - 2.0.0" -> ">=1.0.0, <=2.0.0"
        join_comparators(vec![
            normalize_comparator(&format!(">={start}"))?,
            normalize_comparator(&format!("<={end}"))?,
        ])
    } else {
        let comparators = split_comparators(range)?
            .iter()
            .map(|c| normalize_comparator(c))
            .collect::<Result<Vec<_>, _>>()?;
        join_comparators(comparators)
    };

    VersionReq::parse(&converted)
        .map_err(|e| PkgError::spec_invalid(format!("Invalid version range '{range}': {e}")))
}

/// Parse a hyphen range like "1.0.0 - 2.0.0".
fn parse_hyphen_range(range: &str) -> Option<(&str, &str)> {
    let (start, end) = range.split_once(" - ")?;
    let (start, end) = (start.trim(), end.trim());
    if start.is_empty() || end.is_empty() || end.contains(" - ") {
        return None;
    }
    Some((start, end))
}

/// Split space-separated comparators, reattaching detached operators.
///
/// npm allows ">= 2.1.2 < 3.0.0", which means ">=2.1.2 AND <3.0.0".
fn split_comparators(range: &str) -> Result<Vec<String>, PkgError> {
    let mut comparators = Vec::new();
    let mut pending_op = String::new();

    for token in range.split_whitespace() {
        if token.chars().all(is_operator_char) {
            pending_op.push_str(token);
        } else {
            comparators.push(format!("{pending_op}{token}"));
            pending_op.clear();
        }
    }

    if !pending_op.is_empty() {
        return Err(PkgError::spec_invalid(format!(
            "Invalid version range '{range}': dangling operator '{pending_op}'"
        )));
    }
    Ok(comparators)
}

fn is_operator_char(c: char) -> bool {
    matches!(c, '<' | '>' | '=' | '~' | '^')
}

/// Rewrite one npm comparator into Rust semver syntax.
fn normalize_comparator(comparator: &str) -> Result<String, PkgError> {
    let op_len = comparator
        .find(|c: char| !is_operator_char(c))
        .unwrap_or(comparator.len());
    let (op, version) = comparator.split_at(op_len);
    let version = version.strip_prefix(['v', 'V']).unwrap_or(version);

    if version.is_empty() {
        return Err(PkgError::spec_invalid(format!(
            "Invalid comparator '{comparator}': missing version"
        )));
    }

    // Only the release part may carry wildcards
    let release = version.split(['-', '+']).next().unwrap_or(version);
    let parts: Vec<&str> = release.split('.').collect();
    let fixed = parts
        .iter()
        .take_while(|p| !is_wildcard(p))
        .count();

    if fixed < parts.len() {
        let kept = &parts[..fixed];
        return Ok(if op.is_empty() || op == "=" {
            convert_x_range(kept)?
        } else if kept.is_empty() {
            "*".to_string()
        } else {
            format!("{op}{}", kept.join("."))
        });
    }

    if !op.is_empty() {
        return Ok(format!("{op}{version}"));
    }

    Ok(match parts.len() {
        // Exact version
        3 => format!("={version}"),
        // "1.2" -> 1.2.x
        2 => format!("~{version}"),
        _ => format!("^{version}"),
    })
}

fn is_wildcard(part: &str) -> bool {
    matches!(part, "x" | "X" | "*")
}

/// Convert the fixed leading parts of an x-range into a semver range.
fn convert_x_range(kept: &[&str]) -> Result<String, PkgError> {
    let bump = |part: u64| {
        part.checked_add(1).ok_or_else(|| {
            PkgError::spec_invalid(format!("Version part {part} is too large for an x-range"))
        })
    };
    Ok(match kept {
        [] => "*".to_string(),
        [major] => match major.parse::<u64>() {
            // "1.x" -> ">=1.0.0, <2.0.0"
            Ok(m) => format!(">={m}.0.0, <{}.0.0", bump(m)?),
            Err(_) => format!("^{major}"),
        },
        [major, minor, ..] => match (major.parse::<u64>(), minor.parse::<u64>()) {
            // "1.2.x" -> ">=1.2.0, <1.3.0"
            (Ok(m), Ok(n)) => format!(">={m}.{n}.0, <{m}.{}.0", bump(n)?),
            _ => format!("~{major}.{minor}"),
        },
    })
}

/// Join comparators; a wildcard is dropped when other bounds are present.
fn join_comparators(comparators: Vec<String>) -> String {
    let bounded: Vec<String> = comparators.into_iter().filter(|c| c != "*").collect();
    if bounded.is_empty() {
        "*".to_string()
    } else {
        bounded.join(", ")
    }
}
