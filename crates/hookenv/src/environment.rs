use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::hook::{HookDescriptor, InstallInfo};
use crate::languages::Language;
use crate::state::{self, StateManager};
use crate::store::Store;

/// Upper bound on [`StateManager::wait_for`]'s 10ms polls: 180s, matching the
/// longest single-asset download timeout (`python/installer.rs`'s
/// `DOWNLOAD_TIMEOUT`), since a waiter can't usefully give up before the
/// installer it's waiting on would.
const WAIT_FOR_MAX_ATTEMPTS: usize = 18_000;

/// The single entry point used by the outer hook-runner layer (spec.md
/// §4.5). Owns a memoized `language -> env_path` map and a [`StateManager`]
/// that coordinates concurrent installs across threads.
pub struct EnvironmentManager {
    store: Store,
    state: StateManager,
    language_map: Mutex<HashMap<String, PathBuf>>,
}

impl EnvironmentManager {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            state: StateManager::new(),
            language_map: Mutex::new(HashMap::new()),
        }
    }

    /// `setup_environment(lang, version, deps, repo_path)` — spec.md §4.5.
    pub async fn setup_environment(
        &self,
        language: Language,
        version: &str,
        deps: &FxHashSet<String>,
        repo_path: Option<&Path>,
        repo_url: &str,
    ) -> Result<PathBuf> {
        let key = state::environment_key(language.as_str(), version, repo_url);

        if let Some(env_path) = self.cached(&key) {
            return Ok(env_path);
        }

        if let Err(state::Error::AlreadyInstalling(_)) = self.state.mark_installing(&key) {
            return match self.state.wait_for(&key, WAIT_FOR_MAX_ATTEMPTS).await {
                Ok(state::EnvironmentState::Initialized { .. }) => self
                    .cached(&key)
                    .context("environment reported initialized but missing from cache"),
                Ok(_) => anyhow::bail!("environment for `{language}` is neither initialized nor installing"),
                Err(err @ state::Error::FailedToInitialize(_)) => {
                    Err(err).with_context(|| format!("failed to initialize environment for `{language}`"))
                }
                Err(err @ state::Error::Timeout(_)) => Err(err).with_context(|| {
                    format!("timed out waiting for environment for `{language}` to initialize")
                }),
                Err(err @ state::Error::AlreadyInstalling(_)) => Err(err.into()),
            };
        }

        let cache_dir = self.store.tools_path(language);
        let deps_set: std::collections::HashSet<String> = deps.iter().cloned().collect();

        let result = match repo_path {
            Some(repo_path) if !repo_path.as_os_str().is_empty() => {
                language
                    .setup_with_repo(&cache_dir, version, repo_path, repo_url, &deps_set)
                    .await
            }
            _ => language.setup(&cache_dir, version, &deps_set).await,
        };

        match result {
            Ok(env_path) => {
                self.state.mark_initialized(&key, version);
                self.state.set_cached_version(&key, version);
                self.persist_install_info(language, deps, &env_path, version).await;
                self.language_map
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .insert(key, env_path.clone());
                Ok(env_path)
            }
            Err(err) => {
                self.state.clear_installing(&key);
                Err(err.context(format!("{language}")))
            }
        }
    }

    /// Write a `.hookenv-install-info.json` marker into `env_path` so a later
    /// `check_health` call can cheaply confirm the environment it's probing
    /// was actually produced by this subsystem (SPEC_FULL.md §6 `[ADDED]`).
    /// Best-effort: a failure to persist the marker doesn't fail the install,
    /// since the environment itself is already usable.
    async fn persist_install_info(
        &self,
        language: Language,
        deps: &FxHashSet<String>,
        env_path: &Path,
        version: &str,
    ) {
        let mut install_info =
            InstallInfo::for_env_path(language, deps.clone(), env_path.to_path_buf());
        if let Ok(resolved) = semver::Version::parse(version) {
            install_info.with_language_version(resolved);
        }
        if let Err(err) = install_info.write_marker().await {
            debug!(?err, %language, "failed to persist install-info marker");
        }
    }

    fn cached(&self, key: &str) -> Option<PathBuf> {
        self.language_map
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn get_bin_path(&self, language: Language, env_path: &Path) -> PathBuf {
        language.get_bin_path(env_path)
    }

    pub async fn is_runtime_available(&self, language: Language) -> bool {
        language.is_runtime_available().await
    }

    pub async fn install_dependencies(
        &self,
        language: Language,
        env_path: &Path,
        deps: &FxHashSet<String>,
    ) -> Result<()> {
        let deps_set: std::collections::HashSet<String> = deps.iter().cloned().collect();
        language
            .install_dependencies(env_path, &deps_set)
            .await
            .with_context(|| format!("{language}"))
    }

    /// Quick marker-presence check followed by the language's real
    /// `--version` probe (spec.md §4.5 `check_health`; SPEC_FULL.md §6
    /// `[ADDED]` install-info marker).
    pub async fn check_health(&self, language: Language, env_path: &Path) -> bool {
        match InstallInfo::from_env_path(env_path).await {
            Ok(install_info) if crate::languages::health_from_install_info(&install_info) => {
                language.check_health(env_path).await
            }
            _ => false,
        }
    }

    pub async fn pre_initialize(
        &self,
        language: Language,
        version: &str,
        repo_path: Option<&Path>,
        repo_url: &str,
        deps: &FxHashSet<String>,
    ) -> Result<()> {
        let deps_set: std::collections::HashSet<String> = deps.iter().cloned().collect();
        language
            .pre_initialize(&self.store.tools_path(language), version, repo_path, repo_url, &deps_set)
            .await
            .with_context(|| format!("{language}"))
    }

    /// `pre_initialize_all(hooks[])` — stops at the first failure (spec.md §7
    /// propagation policy).
    pub async fn pre_initialize_all(
        &self,
        hooks: &[(HookDescriptor, Option<PathBuf>, String)],
    ) -> Result<()> {
        for (hook, repo_path, repo_url) in hooks {
            self.pre_initialize(
                hook.language,
                hook.resolved_version_spec(),
                repo_path.as_deref(),
                repo_url,
                &hook.dependency_set(),
            )
            .await?;
        }
        Ok(())
    }

    /// `rebuild(lang, version, repo_path)` — equivalent to `setup_environment`
    /// with empty deps (spec.md §4.5).
    pub async fn rebuild(
        &self,
        language: Language,
        version: &str,
        repo_path: Option<&Path>,
        repo_url: &str,
    ) -> Result<PathBuf> {
        self.setup_environment(language, version, &FxHashSet::default(), repo_path, repo_url)
            .await
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Drop the language map (spec.md §4.5 `close()`).
    pub fn close(&self) {
        self.language_map
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
        debug!("Closed environment manager");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn setup_environment_caches_by_key() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::from_path(tmp.path()).init().unwrap();
        let manager = EnvironmentManager::new(store);

        let deps = FxHashSet::default();
        let first = manager
            .setup_environment(Language::System, "system", &deps, None, "local")
            .await
            .unwrap();
        let second = manager
            .setup_environment(Language::System, "system", &deps, None, "local")
            .await
            .unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn close_clears_the_language_map() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::from_path(tmp.path()).init().unwrap();
        let manager = EnvironmentManager::new(store);
        let deps = FxHashSet::default();
        manager
            .setup_environment(Language::System, "system", &deps, None, "local")
            .await
            .unwrap();
        manager.close();
        assert!(manager.cached("system:system:local").is_none());
    }

    #[tokio::test]
    async fn is_runtime_available_true_for_system_language() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::from_path(tmp.path()).init().unwrap();
        let manager = EnvironmentManager::new(store);
        assert!(manager.is_runtime_available(Language::System).await);
    }
}
