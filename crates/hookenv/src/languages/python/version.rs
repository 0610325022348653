use thiserror::Error;

use crate::version::compare_versions;

#[derive(Debug, Error)]
pub enum Error {
    #[error("No matching Python version found for `{0}`")]
    VersionNotFound(String),
}

/// A small curated list of recent stable CPython releases (spec.md §4.4.2:
/// "Version specs `latest`, `default`, and `\"\"` all resolve to the newest
/// curated stable version"). Unlike Node, there is no single upstream JSON
/// index suitable for this crate's extraction story, so the list is
/// maintained here and extended as new stable releases are curated in.
pub const CURATED_VERSIONS: &[&str] = &["3.13.1", "3.12.8", "3.11.11", "3.10.16", "3.9.21"];

/// Resolve `spec` against the curated list (exact match or dotted prefix,
/// e.g. `"3.12"` matches `"3.12.8"`), or the newest entry for
/// `{"", "latest", "default"}`.
pub fn find(spec: &str) -> Result<&'static str, Error> {
    let mut sorted: Vec<&str> = CURATED_VERSIONS.to_vec();
    sorted.sort_by(|a, b| compare_versions(b, a));

    if spec.is_empty() || spec == "latest" || spec == "default" {
        return sorted.first().copied().ok_or_else(|| Error::VersionNotFound(spec.to_string()));
    }

    if let Some(exact) = sorted.iter().find(|v| **v == spec) {
        return Ok(exact);
    }

    let prefix = format!("{spec}.");
    sorted
        .into_iter()
        .find(|v| v.starts_with(&prefix))
        .ok_or_else(|| Error::VersionNotFound(spec.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_resolves_latest_to_newest_curated() {
        assert_eq!(find("latest").unwrap(), "3.13.1");
        assert_eq!(find("").unwrap(), "3.13.1");
    }

    #[test]
    fn find_resolves_dotted_prefix() {
        assert_eq!(find("3.12").unwrap(), "3.12.8");
    }

    #[test]
    fn find_fails_on_unknown_version() {
        assert!(find("2.7").is_err());
    }
}
