use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hookenv_consts::env_vars::EnvVars;
use hookenv_consts::prepend_paths;
use tracing::debug;

use crate::fs::create_symlink_or_copy;
use crate::languages::node::installer::NodeInstaller;
use crate::languages::node::version::EXTRA_KEY_LTS;
use crate::process::Cmd;

/// The Node.js Runtime Manager (spec.md §4.4 reference design; §4.5 capability
/// surface). `cache_dir` passed into each method is the store's
/// `tools_path(Language::Node)` (`B` in spec.md §4.4).
#[derive(Debug, Copy, Clone, Default)]
pub struct NodeManager;

fn bin_dir(env_path: &Path) -> PathBuf {
    env_path.join("bin")
}

fn lib_dir(env_path: &Path) -> PathBuf {
    env_path.join("lib").join("node_modules")
}

impl NodeManager {
    pub async fn setup(
        &self,
        cache_dir: &Path,
        version: &str,
        deps: &HashSet<String>,
    ) -> Result<PathBuf> {
        self.setup_inner(cache_dir, version, None, deps).await
    }

    pub async fn setup_with_repo(
        &self,
        cache_dir: &Path,
        version: &str,
        repo_path: &Path,
        _repo_url: &str,
        deps: &HashSet<String>,
    ) -> Result<PathBuf> {
        self.setup_inner(cache_dir, version, Some(repo_path), deps)
            .await
    }

    async fn setup_inner(
        &self,
        cache_dir: &Path,
        version: &str,
        _repo_path: Option<&Path>,
        deps: &HashSet<String>,
    ) -> Result<PathBuf> {
        let installer = NodeInstaller::new(cache_dir.to_path_buf());
        let allows_download = version != "system";

        let node = installer
            .install(version, allows_download)
            .await
            .context("failed to setup node environment")?;

        let envs_dir = cache_dir.join("envs");
        fs_err::create_dir_all(&envs_dir)?;
        let env_path = tempfile::Builder::new()
            .prefix("node-")
            .rand_bytes(20)
            .tempdir_in(&envs_dir)?
            .keep();

        self.create_env(&env_path, node.node(), node.lts()).await?;

        if !deps.is_empty() {
            self.install_dependencies(&env_path, deps)
                .await
                .context("failed to setup node environment")?;
        }

        let _ = EXTRA_KEY_LTS;
        Ok(env_path)
    }

    /// `create_env(env_path, version)` — spec.md §4.4 steps 2-4.
    async fn create_env(&self, env_path: &Path, node: &Path, _lts: Option<&str>) -> Result<()> {
        let bin_dir = bin_dir(env_path);
        let lib_dir = lib_dir(env_path);
        fs_err::tokio::create_dir_all(&bin_dir).await?;
        fs_err::tokio::create_dir_all(&lib_dir).await?;

        let npm = node.parent().map(|dir| dir.join(npm_name()));

        if cfg!(windows) {
            write_bat_launcher(&bin_dir.join("node.bat"), node).await?;
            if let Some(npm) = npm.filter(|npm| npm.exists()) {
                write_bat_launcher(&bin_dir.join("npm.bat"), &npm).await?;
            }
        } else {
            create_symlink_or_copy(node, &bin_dir.join(node_launcher_name())).await?;
            if let Some(npm) = npm.filter(|npm| npm.exists()) {
                create_symlink_or_copy(&npm, &bin_dir.join(npm_launcher_name()))
                    .await
                    .ok();
            }
        }

        self.write_activation_script(env_path, node).await?;

        Ok(())
    }

    async fn write_activation_script(&self, env_path: &Path, node: &Path) -> Result<()> {
        let runtime_dir = node
            .parent()
            .and_then(Path::parent)
            .unwrap_or(env_path)
            .to_path_buf();
        let node_path = runtime_dir.join("lib").join("node_modules");

        if cfg!(windows) {
            let script = format!(
                "@echo off\r\nset NODE_VERSION=\r\nset NODE_HOME={}\r\nset PATH={}\\bin;%PATH%\r\nset NODE_PATH={}\r\n",
                env_path.display(),
                env_path.display(),
                node_path.display(),
            );
            fs_err::tokio::write(env_path.join("activate.bat"), script).await?;
        } else {
            let script = format!(
                "export NODE_VERSION=\nexport NODE_HOME=\"{}\"\nexport PATH=\"{}/bin:$PATH\"\nexport NODE_PATH=\"{}\"\n",
                env_path.display(),
                env_path.display(),
                node_path.display(),
            );
            let activate = env_path.join("activate");
            fs_err::tokio::write(&activate, script).await?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs_err::tokio::set_permissions(&activate, std::fs::Permissions::from_mode(0o700))
                    .await?;
            }
        }

        Ok(())
    }

    pub fn get_bin_path(&self, env_path: &Path) -> PathBuf {
        bin_dir(env_path)
    }

    pub async fn is_runtime_available(&self) -> bool {
        which::which("node").is_ok()
    }

    pub async fn check_health(&self, env_path: &Path) -> bool {
        let node = bin_dir(env_path).join(node_launcher_name());
        Cmd::new(&node, "node --version")
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

        let bin_dir = bin_dir(env_path);
        let npm = bin_dir.join(npm_launcher_name());
        let new_path = prepend_paths(&[&bin_dir]).context("Failed to join PATH")?;

        Cmd::new(&npm, "npm install")
            .arg("install")
            .arg("-g")
            .arg("--no-progress")
            .arg("--no-save")
            .arg("--no-fund")
            .arg("--no-audit")
            .args(deps)
            .env(EnvVars::PATH, new_path)
            .env(EnvVars::NPM_CONFIG_PREFIX, env_path)
            .env_remove(EnvVars::NPM_CONFIG_USERCONFIG)
            .env(EnvVars::NODE_PATH, lib_dir(env_path))
            .check(true)
            .output()
            .await
            .context("failed to setup node environment")?;

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

fn npm_name() -> &'static str {
    if cfg!(windows) { "npm.cmd" } else { "npm" }
}

/// Name of the `node` launcher `create_env` produces in `env_path/bin`.
fn node_launcher_name() -> &'static str {
    if cfg!(windows) { "node.bat" } else { "node" }
}

/// Name of the `npm` launcher `create_env` produces in `env_path/bin`.
fn npm_launcher_name() -> &'static str {
    if cfg!(windows) { "npm.bat" } else { "npm" }
}

/// Write a `.bat` wrapper that execs `runtime` with the caller's args
/// (spec.md §4.4 create_env step 3, Windows branch).
async fn write_bat_launcher(launcher: &Path, runtime: &Path) -> Result<()> {
    let script = format!("@echo off\r\n\"{}\" %*\r\n", runtime.display());
    fs_err::tokio::write(launcher, script).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_and_lib_dir_are_distinct_subpaths() {
        let env_path = Path::new("/tmp/hookenv-node-env");
        assert_eq!(bin_dir(env_path), env_path.join("bin"));
        assert_eq!(
            lib_dir(env_path),
            env_path.join("lib").join("node_modules")
        );
    }

    #[tokio::test]
    async fn install_dependencies_is_noop_without_deps() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = NodeManager;
        manager
            .install_dependencies(tmp.path(), &HashSet::new())
            .await
            .unwrap();
    }
}
