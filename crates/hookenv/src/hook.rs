use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::languages::Language;

pub(crate) const HOOK_MARKER: &str = ".hookenv-install-info.json";

/// One hook to run, produced by an external config parser and read-only to
/// the core (spec.md §3.1). `name`/`always_run`/`pass_filenames`/
/// `minimum_pre_commit_version` are carried only so this struct is a
/// complete stand-in for what that parser actually produces; the core
/// itself never reads them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookDescriptor {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub language: Language,
    #[serde(default)]
    pub language_version: Option<String>,
    #[serde(default)]
    pub additional_dependencies: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub file_pattern: Option<String>,
    #[serde(default)]
    pub stages: Vec<String>,
    #[serde(default)]
    pub always_run: bool,
    #[serde(default = "default_pass_filenames")]
    pub pass_filenames: bool,
    #[serde(default)]
    pub minimum_pre_commit_version: Option<String>,
}

fn default_pass_filenames() -> bool {
    true
}

impl HookDescriptor {
    /// `hook.language_version or "default"` (spec.md §4.6 step 1).
    pub fn resolved_version_spec(&self) -> &str {
        self.language_version.as_deref().unwrap_or("default")
    }

    pub fn dependency_set(&self) -> FxHashSet<String> {
        self.additional_dependencies.iter().cloned().collect()
    }
}

/// A hook-bearing repository (spec.md §3.1). `url == "local"` means the
/// hook's source is the config file itself; `url == "meta"` marks pre-commit's
/// own built-in hooks. Both are opaque to this crate beyond that distinction.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RepoDescriptor {
    pub url: String,
    pub revision: String,
}

impl RepoDescriptor {
    pub const LOCAL: &'static str = "local";
    pub const META: &'static str = "meta";

    pub fn is_local(&self) -> bool {
        self.url == Self::LOCAL
    }

    pub fn is_meta(&self) -> bool {
        self.url == Self::META
    }
}

/// Identity of a materialized environment: stable for a given
/// `(language, version, repo, deps)` input (spec.md §3.1, §3.2).
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct EnvironmentKey {
    pub language: Language,
    pub resolved_version: String,
    pub repo_path: Option<PathBuf>,
    pub deps_fingerprint: u64,
}

impl EnvironmentKey {
    pub fn new(
        language: Language,
        resolved_version: impl Into<String>,
        repo_path: Option<&Path>,
        deps: &FxHashSet<String>,
    ) -> Self {
        Self {
            language,
            resolved_version: resolved_version.into(),
            repo_path: repo_path.map(Path::to_path_buf),
            deps_fingerprint: fingerprint_deps(deps),
        }
    }

    /// The state-manager coordination key `"{language}:{version}:{repoURL}"`
    /// (spec.md §3.2, §4.3).
    pub fn state_key(&self, repo_url: &str) -> String {
        crate::state::environment_key(self.language.as_str(), &self.resolved_version, repo_url)
    }

    /// A stable directory-name fragment for this key (spec.md §3.2 "stable
    /// across process runs").
    pub fn cache_fragment(&self) -> String {
        format!(
            "{}-{}-{:016x}",
            self.language.as_str(),
            self.resolved_version,
            self.deps_fingerprint
        )
    }
}

fn fingerprint_deps(deps: &FxHashSet<String>) -> u64 {
    let sorted: BTreeSet<&String> = deps.iter().collect();
    let mut hasher = rustc_hash::FxHasher::default();
    for dep in sorted {
        dep.hash(&mut hasher);
    }
    hasher.finish()
}

/// Metadata for one materialized environment, persisted to disk as JSON next
/// to the environment directory itself (spec.md §6.2, SPEC_FULL.md §6
/// "`[ADDED]`"). Mirrors the teacher's `InstallInfo`: constructed into a
/// scratch temp directory first, then [`Self::persist_env_path`] commits it
/// to its final location once install succeeds.
#[derive(Debug, Serialize, Deserialize)]
pub struct InstallInfo {
    pub language: Language,
    pub language_version: semver::Version,
    pub dependencies: FxHashSet<String>,
    pub env_path: PathBuf,
    pub toolchain: PathBuf,
    extra: FxHashMap<String, String>,
    #[serde(skip, default)]
    temp_dir: Option<TempDir>,
}

impl Clone for InstallInfo {
    fn clone(&self) -> Self {
        Self {
            language: self.language,
            language_version: self.language_version.clone(),
            dependencies: self.dependencies.clone(),
            env_path: self.env_path.clone(),
            toolchain: self.toolchain.clone(),
            extra: self.extra.clone(),
            temp_dir: None,
        }
    }
}

impl InstallInfo {
    pub fn new(language: Language, dependencies: FxHashSet<String>, base_dir: &Path) -> Result<Self> {
        fs_err::create_dir_all(base_dir)?;
        let env_path = tempfile::Builder::new()
            .prefix(&format!("{}-", language.as_str()))
            .rand_bytes(20)
            .tempdir_in(base_dir)?;

        Ok(Self {
            language,
            dependencies,
            env_path: env_path.path().to_path_buf(),
            language_version: semver::Version::new(0, 0, 0),
            toolchain: PathBuf::new(),
            extra: FxHashMap::default(),
            temp_dir: Some(env_path),
        })
    }

    /// Build an `InstallInfo` describing an environment directory that
    /// already exists on disk (e.g. one a Runtime Manager just finished
    /// populating), rather than allocating a fresh scratch directory.
    pub fn for_env_path(
        language: Language,
        dependencies: FxHashSet<String>,
        env_path: PathBuf,
    ) -> Self {
        Self {
            language,
            dependencies,
            env_path,
            language_version: semver::Version::new(0, 0, 0),
            toolchain: PathBuf::new(),
            extra: FxHashMap::default(),
            temp_dir: None,
        }
    }

    /// Commit the scratch temp directory to its final on-disk location,
    /// surviving the `InstallInfo` value being dropped.
    pub fn persist_env_path(&mut self) {
        if let Some(temp_dir) = self.temp_dir.take() {
            self.env_path = temp_dir.keep();
        }
    }

    pub async fn from_env_path(path: &Path) -> Result<Self> {
        let content = fs_err::tokio::read_to_string(path.join(HOOK_MARKER)).await?;
        let info: InstallInfo = serde_json::from_str(&content)?;
        Ok(info)
    }

    pub async fn write_marker(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to serialize install info")?;
        fs_err::tokio::write(self.env_path.join(HOOK_MARKER), content)
            .await
            .context("Failed to write install info")?;
        Ok(())
    }

    pub async fn check_health(&self) -> bool {
        self.language.check_health(&self.env_path).await
    }

    pub fn with_language_version(&mut self, version: semver::Version) -> &mut Self {
        self.language_version = version;
        self
    }

    pub fn with_toolchain(&mut self, toolchain: PathBuf) -> &mut Self {
        self.toolchain = toolchain;
        self
    }

    pub fn with_extra(&mut self, key: &str, value: &str) -> &mut Self {
        self.extra.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get_extra(&self, key: &str) -> Option<&String> {
        self.extra.get(key)
    }

    pub fn matches(&self, request: &crate::version::LanguageRequest, language: Language) -> bool {
        self.language == language && request.satisfied_by(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_descriptor_recognizes_local_and_meta() {
        let local = RepoDescriptor {
            url: "local".to_string(),
            revision: String::new(),
        };
        assert!(local.is_local());
        assert!(!local.is_meta());
    }

    #[test]
    fn environment_key_fingerprint_is_order_independent() {
        let deps_a: FxHashSet<String> = ["b".to_string(), "a".to_string()].into_iter().collect();
        let deps_b: FxHashSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
        let key_a = EnvironmentKey::new(Language::Node, "20.11.0", None, &deps_a);
        let key_b = EnvironmentKey::new(Language::Node, "20.11.0", None, &deps_b);
        assert_eq!(key_a.deps_fingerprint, key_b.deps_fingerprint);
    }

    #[test]
    fn environment_key_state_key_matches_convention() {
        let deps = FxHashSet::default();
        let key = EnvironmentKey::new(Language::Node, "20.11.0", None, &deps);
        assert_eq!(
            key.state_key("https://example.com/repo"),
            "node:20.11.0:https://example.com/repo"
        );
    }

    #[tokio::test]
    async fn install_info_round_trips_through_json() {
        let tmp = tempfile::tempdir().unwrap();
        let mut info = InstallInfo::new(Language::Node, FxHashSet::default(), tmp.path()).unwrap();
        info.with_language_version(semver::Version::new(20, 11, 0));
        info.with_extra("lts", "iron");
        info.persist_env_path();
        info.write_marker().await.unwrap();

        let loaded = InstallInfo::from_env_path(&info.env_path).await.unwrap();
        assert_eq!(loaded.language_version, semver::Version::new(20, 11, 0));
        assert_eq!(loaded.get_extra("lts"), Some(&"iron".to_string()));
    }

    #[test]
    fn hook_descriptor_resolved_version_spec_defaults() {
        let hook = HookDescriptor {
            id: "eslint".to_string(),
            name: None,
            language: Language::Node,
            language_version: None,
            additional_dependencies: vec![],
            args: vec![],
            file_pattern: None,
            stages: vec![],
            always_run: false,
            pass_filenames: true,
            minimum_pre_commit_version: None,
        };
        assert_eq!(hook.resolved_version_spec(), "default");
    }
}
