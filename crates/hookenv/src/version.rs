use std::cmp::Ordering;
use std::str::FromStr;

use crate::hook::InstallInfo;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid `language_version` value: `{0}`")]
    InvalidVersion(String),
}

/// A hook's `language_version` request, resolved against an [`InstallInfo`]
/// (spec.md §3.2: `""`, `"default"`, `"system"`, and `"latest"` all resolve to
/// the same concrete installed version for a given language instance).
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LanguageRequest {
    Any { system_only: bool },
    Semver(SemverRequest),
}

impl LanguageRequest {
    pub fn is_any(&self) -> bool {
        matches!(self, LanguageRequest::Any { .. })
    }

    /// Returns true if this request allows downloading a version.
    pub fn allows_download(&self) -> bool {
        match self {
            LanguageRequest::Any { system_only } => !system_only,
            LanguageRequest::Semver(_) => true,
        }
    }

    pub fn parse(request: &str) -> Result<Self, Error> {
        if request.is_empty() || request == "default" || request == "latest" {
            return Ok(LanguageRequest::Any { system_only: false });
        }
        if request == "system" {
            return Ok(LanguageRequest::Any { system_only: true });
        }
        Ok(Self::Semver(request.parse()?))
    }

    pub fn satisfied_by(&self, install_info: &InstallInfo) -> bool {
        match self {
            LanguageRequest::Any { .. } => true,
            LanguageRequest::Semver(req) => req.satisfied_by(install_info),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SemverRequest(semver::VersionReq);

impl FromStr for SemverRequest {
    type Err = Error;

    fn from_str(request: &str) -> Result<Self, Self::Err> {
        semver::VersionReq::parse(request)
            .map(SemverRequest)
            .map_err(|_| Error::InvalidVersion(request.to_string()))
    }
}

impl SemverRequest {
    fn satisfied_by(&self, install_info: &InstallInfo) -> bool {
        self.0.matches(&install_info.language_version)
    }
}

pub fn try_into_u64_slice(version: &str) -> Result<Vec<u64>, std::num::ParseIntError> {
    version
        .split('.')
        .map(str::parse::<u64>)
        .collect::<Result<Vec<_>, _>>()
}

/// Split `version` on `.`, truncating the first component that contains a
/// non-digit (pre-release suffixes like `18.0.0-rc.1` compare as `18.0.0`).
fn numeric_components(version: &str) -> [u64; 3] {
    let mut out = [0u64; 3];
    for (i, part) in version.split('.').take(3).enumerate() {
        let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
        out[i] = digits.parse().unwrap_or(0);
        if digits.len() != part.len() {
            break;
        }
    }
    out
}

/// Total order over version-like strings (spec.md §4.4 "Version comparison",
/// §8 property 4): numeric, three components, descending-sort friendly.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    numeric_components(a).cmp(&numeric_components(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_versions_orders_numerically_not_lexicographically() {
        assert_eq!(compare_versions("9.0.0", "10.0.0"), Ordering::Less);
        assert_eq!(compare_versions("20.11.0", "20.2.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0", "1.0.0"), Ordering::Equal);
    }

    #[test]
    fn compare_versions_truncates_prerelease_suffix() {
        assert_eq!(compare_versions("18.0.0-rc.1", "18.0.0"), Ordering::Equal);
    }

    #[test]
    fn compare_versions_is_a_total_order() {
        let versions = ["1.0.0", "1.2.0", "2.0.0", "1.10.0", "1.2.3"];
        for a in versions {
            for b in versions {
                for c in versions {
                    let ab = compare_versions(a, b);
                    let ba = compare_versions(b, a);
                    assert_eq!(ab, ba.reverse(), "antisymmetry: {a} vs {b}");
                    if ab == Ordering::Equal {
                        assert_eq!(a, a); // reflexive trivially
                    }
                    if compare_versions(a, b) == Ordering::Less
                        && compare_versions(b, c) == Ordering::Less
                    {
                        assert_eq!(compare_versions(a, c), Ordering::Less, "transitivity");
                    }
                }
            }
        }
    }

    #[test]
    fn language_request_parses_well_known_literals() {
        assert_eq!(
            LanguageRequest::parse("default").unwrap(),
            LanguageRequest::Any { system_only: false }
        );
        assert_eq!(
            LanguageRequest::parse("system").unwrap(),
            LanguageRequest::Any { system_only: true }
        );
        assert!(!LanguageRequest::parse("system").unwrap().allows_download());
        assert!(LanguageRequest::parse("default").unwrap().allows_download());
    }

    #[test]
    fn try_into_u64_slice_rejects_non_numeric() {
        assert!(try_into_u64_slice("1.x.0").is_err());
        assert_eq!(try_into_u64_slice("1.2.3").unwrap(), vec![1, 2, 3]);
    }
}
