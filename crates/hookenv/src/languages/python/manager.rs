use std::collections::HashSet;
use std::env::consts::EXE_EXTENSION;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hookenv_consts::env_vars::EnvVars;
use hookenv_consts::prepend_paths;
use tracing::debug;

use crate::fs::create_symlink_or_copy;
use crate::languages::python::installer::PythonInstaller;
use crate::process::Cmd;

/// The Python Runtime Manager (spec.md §4.4.2). `cache_dir` is the store's
/// `tools_path(Language::Python)`.
#[derive(Debug, Copy, Clone, Default)]
pub struct PythonManager;

fn bin_dir(env_path: &Path) -> PathBuf {
    if cfg!(windows) {
        env_path.to_path_buf()
    } else {
        env_path.join("bin")
    }
}

impl PythonManager {
    pub async fn setup(
        &self,
        cache_dir: &Path,
        version: &str,
        deps: &HashSet<String>,
    ) -> Result<PathBuf> {
        self.setup_inner(cache_dir, version, deps).await
    }

    pub async fn setup_with_repo(
        &self,
        cache_dir: &Path,
        version: &str,
        _repo_path: &Path,
        _repo_url: &str,
        deps: &HashSet<String>,
    ) -> Result<PathBuf> {
        self.setup_inner(cache_dir, version, deps).await
    }

    async fn setup_inner(
        &self,
        cache_dir: &Path,
        version: &str,
        deps: &HashSet<String>,
    ) -> Result<PathBuf> {
        let installer = PythonInstaller::new(cache_dir.to_path_buf());
        let allows_download = version != "system";

        let python = installer
            .install(version, allows_download)
            .await
            .context("failed to setup python environment")?;

        let envs_dir = cache_dir.join("envs");
        fs_err::create_dir_all(&envs_dir)?;
        let env_path = tempfile::Builder::new()
            .prefix("python-")
            .rand_bytes(20)
            .tempdir_in(&envs_dir)?
            .keep();

        self.create_env(&env_path, python.python()).await?;

        if !deps.is_empty() {
            self.install_dependencies(&env_path, deps)
                .await
                .context("failed to setup python environment")?;
        }

        Ok(env_path)
    }

    async fn create_env(&self, env_path: &Path, python: &Path) -> Result<()> {
        let bin_dir = bin_dir(env_path);
        fs_err::tokio::create_dir_all(&bin_dir).await?;

        let python_link = bin_dir.join("python3").with_extension(EXE_EXTENSION);
        create_symlink_or_copy(python, &python_link).await?;

        Ok(())
    }

    pub fn get_bin_path(&self, env_path: &Path) -> PathBuf {
        bin_dir(env_path)
    }

    pub async fn is_runtime_available(&self) -> bool {
        which::which("python3").is_ok() || which::which("python").is_ok()
    }

    pub async fn check_health(&self, env_path: &Path) -> bool {
        let python = bin_dir(env_path)
            .join("python3")
            .with_extension(EXE_EXTENSION);
        Cmd::new(&python, "python --version")
            .arg("--version")
            .check(true)
            .output()
            .await
            .is_ok()
    }

    pub async fn install_dependencies(
        &self,
        env_path: &Path,
        deps: &HashSet<String>,
    ) -> Result<()> {
        if deps.is_empty() {
            debug!("No dependencies to install");
            return Ok(());
        }

        let python = bin_dir(env_path)
            .join("python3")
            .with_extension(EXE_EXTENSION);
        let new_path = prepend_paths(&[&bin_dir(env_path)]).context("Failed to join PATH")?;

        Cmd::new(&python, "pip install")
            .arg("-m")
            .arg("pip")
            .arg("install")
            .args(deps)
            .env(EnvVars::PATH, new_path)
            .env(EnvVars::VIRTUAL_ENV, env_path)
            .env_remove(EnvVars::PYTHONHOME)
            .check(true)
            .output()
            .await
            .context("failed to setup python environment")?;

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

    #[test]
    fn bin_dir_is_under_env_path_on_unix() {
        if cfg!(windows) {
            return;
        }
        let env_path = Path::new("/tmp/hookenv-python-env");
        assert_eq!(bin_dir(env_path), env_path.join("bin"));
    }

    #[tokio::test]
    async fn install_dependencies_is_noop_without_deps() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = PythonManager;
        manager
            .install_dependencies(tmp.path(), &HashSet::new())
            .await
            .unwrap();
    }
}
