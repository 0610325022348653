use std::cmp::Ordering;
use std::time::Duration;

use hookenv_consts::env_vars::EnvVars;
use serde::Deserialize;
use thiserror::Error;

use crate::version::compare_versions;

pub const EXTRA_KEY_LTS: &str = "lts";

const INDEX_URL: &str = "https://nodejs.org/dist/index.json";
const INDEX_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum Error {
    #[error("No matching Node.js version found for `{0}`")]
    VersionNotFound(String),
    #[error("Failed to fetch Node.js release index")]
    IndexTransport(#[source] reqwest::Error),
    #[error("Failed to parse Node.js release index")]
    IndexParse(#[source] serde_json::Error),
}

/// One record from `https://nodejs.org/dist/index.json` (spec.md §4.4
/// "Version listing").
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseEntry {
    pub version: String,
    #[serde(deserialize_with = "deserialize_lts", default)]
    pub lts: Option<String>,
    pub date: String,
    #[serde(default)]
    pub v8: String,
    #[serde(default)]
    pub npm: Option<String>,
}

/// The index encodes "no LTS" as `false` and an LTS codename as a string;
/// normalize both into `Option<String>`.
fn deserialize_lts<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum LtsField {
        Name(String),
        Flag(bool),
    }

    Ok(match Option::<LtsField>::deserialize(deserializer)? {
        Some(LtsField::Name(name)) => Some(name),
        _ => None,
    })
}

impl ReleaseEntry {
    fn bare_version(&self) -> &str {
        self.version.trim_start_matches('v')
    }
}

/// Parse and sort the release index, descending by numeric version
/// (spec.md §4.4: "sorted descending by numeric-component comparison").
pub fn parse_index(body: &str) -> Result<Vec<ReleaseEntry>, Error> {
    let mut entries: Vec<ReleaseEntry> = serde_json::from_str(body).map_err(Error::IndexParse)?;
    entries.sort_by(|a, b| compare_versions(b.bare_version(), a.bare_version()));
    Ok(entries)
}

/// Fetch and parse the upstream release index, degrading gracefully to
/// `None` on any failure (spec.md §5 "failure degrades gracefully").
pub async fn fetch_index(client: &reqwest::Client) -> Option<Vec<ReleaseEntry>> {
    let url = EnvVars::var(EnvVars::HOOKENV_INTERNAL__NODE_BASE_URL)
        .map(|base| format!("{base}/index.json"))
        .unwrap_or_else(|_| INDEX_URL.to_string());

    let response = client.get(&url).timeout(INDEX_TIMEOUT).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    let body = response.text().await.ok()?;
    parse_index(&body).ok()
}

/// Resolve `spec` (`"latest"`, `"lts"`, an LTS codename, a dotted prefix like
/// `"18"`, or an exact version) against a descending-sorted entry list
/// (spec.md §4.4 `find(spec)`).
pub fn find<'a>(spec: &str, entries: &'a [ReleaseEntry]) -> Result<&'a ReleaseEntry, Error> {
    if entries.is_empty() {
        return Err(Error::VersionNotFound(spec.to_string()));
    }

    if spec.is_empty() || spec == "latest" || spec == "default" {
        return Ok(&entries[0]);
    }

    if spec.eq_ignore_ascii_case("lts") {
        return entries
            .iter()
            .find(|e| e.lts.is_some())
            .ok_or_else(|| Error::VersionNotFound(spec.to_string()));
    }

    if let Some(found) = entries
        .iter()
        .find(|e| e.lts.as_deref().is_some_and(|lts| lts.eq_ignore_ascii_case(spec)))
    {
        return Ok(found);
    }

    if let Some(found) = entries.iter().find(|e| e.bare_version() == spec) {
        return Ok(found);
    }

    let prefix = format!("{spec}.");
    entries
        .iter()
        .find(|e| e.bare_version().starts_with(&prefix))
        .ok_or_else(|| Error::VersionNotFound(spec.to_string()))
}

/// Sort directory-listed installed version strings descending (spec.md §4.4
/// `installed_versions()`).
pub fn sort_installed_descending(mut versions: Vec<String>) -> Vec<String> {
    versions.sort_by(|a, b| compare_versions(b, a));
    versions
}

pub fn is_newer_or_equal(a: &str, b: &str) -> bool {
    !matches!(compare_versions(a, b), Ordering::Less)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_INDEX: &str = r#"[
        {"version": "v20.11.0", "lts": "Iron", "date": "2024-01-01", "v8": "1.1", "npm": "10.2.4"},
        {"version": "v18.19.0", "lts": "Hydrogen", "date": "2023-12-01", "v8": "1.0", "npm": "10.2.3"},
        {"version": "v21.5.0", "lts": false, "date": "2024-01-09", "v8": "1.2", "npm": "10.2.5"}
    ]"#;

    #[test]
    fn parse_index_sorts_descending_numerically() {
        let entries = parse_index(SAMPLE_INDEX).unwrap();
        assert_eq!(entries[0].version, "v21.5.0");
        assert_eq!(entries[1].version, "v20.11.0");
        assert_eq!(entries[2].version, "v18.19.0");
    }

    #[test]
    fn find_resolves_latest_lts_and_prefix() {
        let entries = parse_index(SAMPLE_INDEX).unwrap();
        assert_eq!(find("latest", &entries).unwrap().version, "v21.5.0");
        assert_eq!(find("lts", &entries).unwrap().version, "v20.11.0");
        assert_eq!(find("iron", &entries).unwrap().version, "v20.11.0");
        assert_eq!(find("18", &entries).unwrap().version, "v18.19.0");
        assert_eq!(find("20.11.0", &entries).unwrap().version, "v20.11.0");
    }

    #[test]
    fn find_fails_on_unknown_spec() {
        let entries = parse_index(SAMPLE_INDEX).unwrap();
        assert!(find("99", &entries).is_err());
    }

    #[test]
    fn sort_installed_descending_is_numeric() {
        let versions = vec!["9.0.0".to_string(), "20.11.0".to_string(), "18.2.0".to_string()];
        assert_eq!(
            sort_installed_descending(versions),
            vec!["20.11.0", "18.2.0", "9.0.0"]
        );
    }
}
