use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::languages::Language;

/// Backs every language tag that has no dedicated Runtime Manager: `ruby`,
/// `golang`, `rust`, `conda`, `coursier`, `swift`, `system`, `script`, `fail`,
/// `pygrep`, `docker`, and `docker_image` (SPEC_FULL.md §4.5 `[ADDED]`).
///
/// It never downloads anything; `setup()` only creates an environment
/// directory so the Hook Environment Builder has somewhere to point its
/// per-language variables (`gems/`, `cargo/`, `gocache/`, etc. are created
/// lazily by the builder itself, not here), and `is_runtime_available()`
/// delegates to a `which()` lookup for the language's canonical binary.
#[derive(Debug, Copy, Clone)]
pub struct GenericManager(pub Language);

impl GenericManager {
    fn canonical_binary(self) -> Option<&'static str> {
        match self.0 {
            Language::Ruby => Some("ruby"),
            Language::Golang => Some("go"),
            Language::Rust => Some("cargo"),
            Language::Conda => Some("conda"),
            Language::Coursier => Some("cs"),
            Language::Swift => Some("swift"),
            Language::Docker => Some("docker"),
            // system/script/fail/pygrep/docker_image have no runtime of their own.
            Language::System
            | Language::Script
            | Language::Fail
            | Language::Pygrep
            | Language::DockerImage => None,
            Language::Node | Language::Python => unreachable!("handled by dedicated managers"),
        }
    }

    pub async fn setup(
        &self,
        cache_dir: &Path,
        _version: &str,
        deps: &HashSet<String>,
    ) -> Result<PathBuf> {
        if !deps.is_empty() && !self.0.supports_dependency() {
            anyhow::bail!(
                "language `{}` does not support additional_dependencies",
                self.0
            );
        }

        let envs_dir = cache_dir.join("envs");
        fs_err::create_dir_all(&envs_dir)
            .with_context(|| format!("failed to setup {} environment", self.0))?;
        let env_path = tempfile::Builder::new()
            .prefix(&format!("{}-", self.0.as_str()))
            .rand_bytes(20)
            .tempdir_in(&envs_dir)?
            .keep();
        Ok(env_path)
    }

    pub async fn setup_with_repo(
        &self,
        cache_dir: &Path,
        version: &str,
        _repo_path: &Path,
        _repo_url: &str,
        deps: &HashSet<String>,
    ) -> Result<PathBuf> {
        self.setup(cache_dir, version, deps).await
    }

    pub fn get_bin_path(&self, env_path: &Path) -> PathBuf {
        env_path.join("bin")
    }

    pub async fn is_runtime_available(&self) -> bool {
        match self.canonical_binary() {
            Some(binary) => which::which(binary).is_ok(),
            None => true,
        }
    }

    pub async fn check_health(&self, env_path: &Path) -> bool {
        env_path.exists()
    }

    pub async fn install_dependencies(
        &self,
        _env_path: &Path,
        deps: &HashSet<String>,
    ) -> Result<()> {
        if !deps.is_empty() && !self.0.supports_dependency() {
            anyhow::bail!(
                "language `{}` does not support additional_dependencies",
                self.0
            );
        }
        Ok(())
    }

    pub async fn pre_initialize(
        &self,
        cache_dir: &Path,
        version: &str,
        repo_path: Option<&Path>,
        repo_url: &str,
        deps: &HashSet<String>,
    ) -> Result<()> {
        match repo_path {
            Some(repo_path) => {
                self.setup_with_repo(cache_dir, version, repo_path, repo_url, deps)
                    .await?;
            }
            None => {
                self.setup(cache_dir, version, deps).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn setup_creates_an_environment_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = GenericManager(Language::Rust);
        let env_path = manager.setup(tmp.path(), "system", &HashSet::new()).await.unwrap();
        assert!(env_path.is_dir());
    }

    #[tokio::test]
    async fn fail_rejects_additional_dependencies() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = GenericManager(Language::Fail);
        let deps: HashSet<String> = ["x".to_string()].into_iter().collect();
        assert!(manager.setup(tmp.path(), "system", &deps).await.is_err());
    }

    #[tokio::test]
    async fn system_and_script_are_always_available() {
        assert!(GenericManager(Language::System).is_runtime_available().await);
        assert!(GenericManager(Language::Script).is_runtime_available().await);
    }
}
