//! Version range matching for package dependencies.
//!
//! Dependencies declare semver ranges (`^1.2.0`, `>=1.0.0 <2.0.0`,
//! `1.0.0 - 1.5.0`). The `semver` crate does the actual comparison; this
//! module normalizes the looser range syntax found in the wild into the
//! comma-separated comparator form the crate parses.

use semver::{Version, VersionReq};

/// Check whether a concrete `version` satisfies a `range` constraint.
///
/// Pure function; unparsable versions or ranges never satisfy anything and
/// never panic. An empty range matches any parsable version.
pub fn satisfies(version: &str, range: &str) -> bool {
    let Ok(version) = Version::parse(strip_v_prefix(version.trim())) else {
        return false;
    };
    let Some(req) = parse_range(range) else {
        return false;
    };
    req.matches(&version)
}

fn parse_range(range: &str) -> Option<VersionReq> {
    let range = range.trim();

    // An absent constraint accepts anything
    if range.is_empty() {
        return Some(VersionReq::STAR);
    }

    // Hyphen range: "1.2.3 - 2.0.0" -> ">=1.2.3, <=2.0.0"
    if let Some((low, high)) = range.split_once(" - ") {
        let normalized = format!(
            ">={}, <={}",
            strip_v_prefix(low.trim()),
            strip_v_prefix(high.trim())
        );
        return VersionReq::parse(&normalized).ok();
    }

    // Space-separated comparator list: ">=1.0.0 <1.3.0" -> ">=1.0.0, <1.3.0"
    if !range.contains(',') && range.contains(char::is_whitespace) {
        let comparators = join_operators(range);
        let normalized = comparators
            .iter()
            .map(|c| strip_v_after_operator(c))
            .collect::<Vec<_>>()
            .join(", ");
        return VersionReq::parse(&normalized).ok();
    }

    VersionReq::parse(&strip_v_after_operator(range)).ok()
}

/// Re-attach bare operator tokens (`>=` `1.0.0`) to their operands.
fn join_operators(range: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for token in range.split_whitespace() {
        match out.last_mut() {
            Some(last) if is_operator(last) => last.push_str(token),
            _ => out.push(token.to_string()),
        }
    }
    out
}

fn is_operator(token: &str) -> bool {
    matches!(token, "=" | ">" | "<" | ">=" | "<=" | "~" | "^")
}

fn strip_v_prefix(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

/// Strip a `v` prefix from the operand of a single comparator
/// (`">=v1.2.3"` -> `">=1.2.3"`).
fn strip_v_after_operator(comparator: &str) -> String {
    let split = comparator
        .find(|c: char| !matches!(c, '=' | '>' | '<' | '~' | '^' | ' '))
        .unwrap_or(0);
    let (op, operand) = comparator.split_at(split);
    format!("{}{}", op, strip_v_prefix(operand))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caret_range() {
        assert!(satisfies("1.2.3", "^1.0.0"));
        assert!(!satisfies("2.0.0", "^1.0.0"));
        assert!(!satisfies("0.9.9", "^1.0.0"));
    }

    #[test]
    fn test_tilde_range() {
        assert!(satisfies("1.2.9", "~1.2.0"));
        assert!(!satisfies("1.3.0", "~1.2.0"));
    }

    #[test]
    fn test_space_separated_comparators() {
        assert!(satisfies("1.2.3", ">=1.0.0 <1.3.0"));
        assert!(!satisfies("1.3.0", ">=1.0.0 <1.3.0"));
        assert!(satisfies("1.2.3", ">= 1.0.0 < 1.3.0"));
    }

    #[test]
    fn test_comma_separated_comparators() {
        assert!(satisfies("1.2.3", ">=1.0.0, <1.3.0"));
        assert!(!satisfies("0.9.0", ">=1.0.0, <1.3.0"));
    }

    #[test]
    fn test_hyphen_range() {
        assert!(satisfies("1.5.0", "1.0.0 - 2.0.0"));
        assert!(satisfies("1.0.0", "1.0.0 - 2.0.0"));
        assert!(satisfies("2.0.0", "1.0.0 - 2.0.0"));
        assert!(!satisfies("2.0.1", "1.0.0 - 2.0.0"));
    }

    #[test]
    fn test_wildcard_and_empty_range() {
        assert!(satisfies("3.1.4", "*"));
        assert!(satisfies("3.1.4", ""));
        assert!(satisfies("1.2.3", "1.x"));
        assert!(!satisfies("2.0.0", "1.x"));
    }

    #[test]
    fn test_exact_version() {
        assert!(satisfies("1.2.3", "=1.2.3"));
        assert!(satisfies("1.2.3", "1.2.3"));
        assert!(!satisfies("1.2.4", "=1.2.3"));
    }

    #[test]
    fn test_v_prefix_tolerance() {
        assert!(satisfies("v1.2.3", "^1.0.0"));
        assert!(satisfies("1.2.3", "^v1.0.0"));
        assert!(satisfies("v1.2.3", ">=v1.0.0 <v1.3.0"));
    }

    #[test]
    fn test_prerelease_versions() {
        assert!(satisfies("1.0.0-beta.2", ">=1.0.0-beta.1"));
        assert!(!satisfies("1.0.0-alpha", "^1.0.0"));
    }

    #[test]
    fn test_unparsable_input_never_satisfies() {
        assert!(!satisfies("not-a-version", "^1.0.0"));
        assert!(!satisfies("1.2.3", "not-a-range !"));
        assert!(!satisfies("", "^1.0.0"));
        assert!(!satisfies("1.2", "^1.0.0")); // partial versions are not valid semver
    }
}
