use std::collections::HashMap;
use std::ffi::OsString;
use std::path::Path;

use anyhow::{Context, Result};
use hookenv_consts::env_vars::EnvVars;
use hookenv_consts::prepend_paths_to;

use crate::environment::EnvironmentManager;
use crate::hook::{HookDescriptor, RepoDescriptor};
use crate::languages::Language;

/// An unordered mapping of variable name → value, merged into the inherited
/// process environment by the caller (spec.md §6.2 "Launch mapping").
pub type LaunchMapping = HashMap<String, OsString>;

/// Assembles the launch mapping for one hook invocation (spec.md §4.6).
pub struct HookEnvironmentBuilder<'a> {
    environment: &'a EnvironmentManager,
}

impl<'a> HookEnvironmentBuilder<'a> {
    pub fn new(environment: &'a EnvironmentManager) -> Self {
        Self { environment }
    }

    pub async fn build(
        &self,
        hook: &HookDescriptor,
        repo: &RepoDescriptor,
        repo_path: Option<&Path>,
    ) -> Result<LaunchMapping> {
        let version = hook.resolved_version_spec();
        let deps = hook.dependency_set();

        let env_path = self
            .environment
            .setup_environment(hook.language, version, &deps, repo_path, &repo.url)
            .await
            .with_context(|| format!("failed to build environment for hook `{}`", hook.id))?;

        let bin_path = self.environment.get_bin_path(hook.language, &env_path);

        let mut mapping = LaunchMapping::new();
        mapping.insert(
            EnvVars::PRE_COMMIT_ENV_PATH.to_string(),
            env_path.clone().into_os_string(),
        );
        mapping.insert(
            EnvVars::PRE_COMMIT_LANGUAGE.to_string(),
            hook.language.as_str().into(),
        );
        mapping.insert(EnvVars::PRE_COMMIT_VERSION.to_string(), version.into());

        self.add_language_specific(&mut mapping, hook.language, &env_path, &bin_path)?;

        Ok(mapping)
    }

    fn prepend_path(&self, mapping: &mut LaunchMapping, dirs: &[&Path]) -> Result<()> {
        let base = mapping.get(EnvVars::PATH).cloned();
        let joined = prepend_paths_to(dirs, base.as_deref()).context("failed to join PATH")?;
        mapping.insert(EnvVars::PATH.to_string(), joined);
        Ok(())
    }

    /// The per-language-tag variable table (spec.md §4.6 step 5).
    fn add_language_specific(
        &self,
        mapping: &mut LaunchMapping,
        language: Language,
        env_path: &Path,
        bin_path: &Path,
    ) -> Result<()> {
        match language {
            Language::Python => {
                mapping.insert(EnvVars::VIRTUAL_ENV.to_string(), env_path.to_path_buf().into_os_string());
                self.prepend_path(mapping, &[bin_path])?;
            }
            Language::Node => {
                mapping.insert(
                    EnvVars::NODE_VIRTUAL_ENV.to_string(),
                    env_path.to_path_buf().into_os_string(),
                );
                mapping.insert(
                    EnvVars::NPM_CONFIG_PREFIX.to_string(),
                    env_path.to_path_buf().into_os_string(),
                );
                self.prepend_path(mapping, &[bin_path])?;
            }
            Language::Ruby => {
                let gems = env_path.join("gems");
                mapping.insert(EnvVars::GEM_HOME.to_string(), gems.clone().into_os_string());
                mapping.insert(EnvVars::GEM_PATH.to_string(), OsString::new());
                mapping.insert(EnvVars::BUNDLE_IGNORE_CONFIG.to_string(), "1".into());
                self.prepend_path(mapping, &[&gems.join("bin")])?;
            }
            Language::Golang => {
                let gocache = env_path.join("gocache");
                let gopath = env_path.join("gopath");
                crate::fs::create_dir_all_mode(&gocache, 0o750)?;
                crate::fs::create_dir_all_mode(&gopath, 0o750)?;
                mapping.insert(EnvVars::GOCACHE.to_string(), gocache.into_os_string());
                mapping.insert(EnvVars::GOPATH.to_string(), gopath.into_os_string());
                self.prepend_path(mapping, &[&env_path.join("bin")])?;
            }
            Language::Rust => {
                mapping.insert(
                    EnvVars::CARGO_HOME.to_string(),
                    env_path.join("cargo").into_os_string(),
                );
            }
            Language::Conda => {
                mapping.insert(
                    EnvVars::CONDA_PREFIX.to_string(),
                    env_path.to_path_buf().into_os_string(),
                );
                self.prepend_path(mapping, &[bin_path])?;
            }
            Language::Coursier => {
                mapping.insert(
                    EnvVars::COURSIER_CACHE.to_string(),
                    env_path.join(".cs-cache").into_os_string(),
                );
                self.prepend_path(mapping, &[env_path])?;
            }
            Language::Swift => {
                mapping.insert(
                    EnvVars::SWIFT_ENV.to_string(),
                    env_path.to_path_buf().into_os_string(),
                );
            }
            Language::System
            | Language::Script
            | Language::Fail
            | Language::Pygrep
            | Language::Docker
            | Language::DockerImage => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::store::Store;

    fn test_hook(language: Language) -> HookDescriptor {
        HookDescriptor {
            id: "test-hook".to_string(),
            name: None,
            language,
            language_version: None,
            additional_dependencies: vec![],
            args: vec![],
            file_pattern: None,
            stages: vec![],
            always_run: false,
            pass_filenames: true,
            minimum_pre_commit_version: None,
        }
    }

    fn local_repo() -> RepoDescriptor {
        RepoDescriptor {
            url: RepoDescriptor::LOCAL.to_string(),
            revision: String::new(),
        }
    }

    #[tokio::test]
    async fn rust_hook_sets_cargo_home_only() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::from_path(tmp.path()).init().unwrap();
        let environment = EnvironmentManager::new(store);
        let builder = HookEnvironmentBuilder::new(&environment);

        let hook = test_hook(Language::Rust);
        let mapping = builder.build(&hook, &local_repo(), None).await.unwrap();

        assert!(mapping.contains_key(EnvVars::CARGO_HOME));
        assert!(!mapping.contains_key(EnvVars::PATH));
        assert_eq!(
            mapping.get(EnvVars::PRE_COMMIT_LANGUAGE).unwrap(),
            &OsString::from("rust")
        );
    }

    #[tokio::test]
    async fn golang_hook_creates_gocache_and_gopath() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::from_path(tmp.path()).init().unwrap();
        let environment = EnvironmentManager::new(store);
        let builder = HookEnvironmentBuilder::new(&environment);

        let hook = test_hook(Language::Golang);
        let mapping = builder.build(&hook, &local_repo(), None).await.unwrap();

        let gocache = Path::new(mapping.get(EnvVars::GOCACHE).unwrap());
        assert!(gocache.is_dir());
        assert!(mapping.contains_key(EnvVars::PATH));
    }

    #[tokio::test]
    async fn ruby_hook_sets_empty_gem_path() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::from_path(tmp.path()).init().unwrap();
        let environment = EnvironmentManager::new(store);
        let builder = HookEnvironmentBuilder::new(&environment);

        let hook = test_hook(Language::Ruby);
        let mapping = builder.build(&hook, &local_repo(), None).await.unwrap();

        assert_eq!(mapping.get(EnvVars::GEM_PATH).unwrap(), &OsString::new());
        assert_eq!(
            mapping.get(EnvVars::BUNDLE_IGNORE_CONFIG).unwrap(),
            &OsString::from("1")
        );
    }
}
