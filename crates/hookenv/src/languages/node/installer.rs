use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use hookenv_consts::env_vars::EnvVars;
use thiserror::Error;
use tracing::debug;

use crate::download;
use crate::languages::node::version::{self, ReleaseEntry};
use crate::process::Cmd;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum Error {
    #[error("Node.js runtime is not installed")]
    RuntimeMissing,
    #[error("Node.js launcher `{0}` is missing after extraction")]
    LauncherMissing(&'static str),
    #[error("Node.js payload for version `{0}` did not contain the expected launcher")]
    RuntimePayloadMissing(String),
    #[error("Launcher `{launcher}` did not run successfully")]
    LauncherNonFunctional {
        launcher: &'static str,
        #[source]
        cause: anyhow::Error,
    },
    #[error(transparent)]
    Version(#[from] version::Error),
    #[error(transparent)]
    Download(#[from] download::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Owns `B/versions/`, `B/cache/`, and `B/global` for the Node runtime
/// (spec.md §4.4 "Directory layout").
#[derive(Debug, Clone)]
pub struct NodeInstaller {
    base_dir: PathBuf,
}

/// The resolved launcher pair for one installed (or system) Node runtime.
#[derive(Debug, Clone)]
pub struct NodeResult {
    node: PathBuf,
    npm: PathBuf,
    version: String,
    lts: Option<String>,
}

impl NodeResult {
    pub fn node(&self) -> &Path {
        &self.node
    }

    pub fn npm(&self) -> &Path {
        &self.npm
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn lts(&self) -> Option<&str> {
        self.lts.as_deref()
    }
}

fn node_binary_name() -> String {
    EnvVars::var(EnvVars::HOOKENV_INTERNAL__NODE_BINARY_NAME).unwrap_or_else(|_| {
        if cfg!(windows) { "node.exe" } else { "node" }.to_string()
    })
}

fn npm_binary_name() -> &'static str {
    if cfg!(windows) { "npm.cmd" } else { "npm" }
}

fn release_filename(version: &str) -> String {
    let arch = download::normalized_arch();
    match download::normalized_os() {
        "osx" => format!("node-v{version}-darwin-{arch}.tar.gz"),
        "win" => format!("node-v{version}-win-{arch}.zip"),
        _ => format!("node-v{version}-linux-{arch}.tar.xz"),
    }
}

fn release_url(version: &str, filename: &str) -> String {
    let base = EnvVars::var(EnvVars::HOOKENV_INTERNAL__NODE_BASE_URL)
        .unwrap_or_else(|_| "https://nodejs.org/dist".to_string());
    format!("{base}/v{version}/{filename}")
}

impl NodeInstaller {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn versions_dir(&self) -> PathBuf {
        self.base_dir.join("versions")
    }

    fn cache_dir(&self) -> PathBuf {
        self.base_dir.join("cache")
    }

    fn global_file(&self) -> PathBuf {
        self.base_dir.join("global")
    }

    fn version_dir(&self, version: &str) -> PathBuf {
        self.versions_dir().join(version)
    }

    fn launcher_paths(&self, version: &str) -> (PathBuf, PathBuf) {
        let dir = self.version_dir(version);
        if cfg!(windows) {
            (dir.join("node.exe"), dir.join("npm.cmd"))
        } else {
            (dir.join("bin").join("node"), dir.join("bin").join("npm"))
        }
    }

    /// `installed_versions()` — spec.md §4.4.
    pub fn installed_versions(&self) -> Vec<String> {
        let Ok(entries) = fs_err::read_dir(self.versions_dir()) else {
            return Vec::new();
        };
        let versions = entries
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        version::sort_installed_descending(versions)
    }

    /// Search already-installed versions for one satisfying `spec`.
    pub fn find_installed(&self, spec: &str) -> Option<String> {
        let installed = self.installed_versions();
        if spec.is_empty() || spec == "default" || spec == "latest" {
            return installed.into_iter().next();
        }
        installed.into_iter().find(|v| v == spec || v.starts_with(&format!("{spec}.")))
    }

    /// Search `PATH` for a system-installed Node satisfying `spec` (spec.md
    /// §4.4 `[ADDED]` `find_system()`).
    pub async fn find_system(&self, spec: &str) -> Option<NodeResult> {
        let binary = node_binary_name();
        let candidates = which::which_all(&binary).ok()?.collect::<Vec<_>>();

        for node in candidates {
            let Ok(result) = self.probe(&node).await else {
                continue;
            };
            if spec.is_empty()
                || spec == "default"
                || spec == "latest"
                || spec == "system"
                || result.version == spec
                || result.version.starts_with(&format!("{spec}."))
            {
                return Some(result);
            }
        }
        None
    }

    async fn probe(&self, node: &Path) -> Result<NodeResult> {
        let output = Cmd::new(node, "node --version")
            .arg("--version")
            .check(true)
            .output()
            .await
            .context("Failed to run node --version")?;
        let version = String::from_utf8_lossy(&output.stdout)
            .trim()
            .trim_start_matches('v')
            .to_string();

        let npm = node
            .parent()
            .map(|dir| dir.join(npm_binary_name()))
            .filter(|p| p.exists())
            .unwrap_or_else(|| PathBuf::from(npm_binary_name()));

        Ok(NodeResult {
            node: node.to_path_buf(),
            npm,
            version,
            lts: None,
        })
    }

    /// `install(version)` — spec.md §4.4 steps 1-6.
    pub async fn install(&self, spec: &str, allows_download: bool) -> Result<NodeResult, Error> {
        if let Some(version) = self.find_installed(spec) {
            debug!(version, "Using already-installed Node runtime");
            return self.validate(&version).await;
        }

        if let Some(system) = self.find_system(spec).await {
            debug!(version = %system.version, "Using system Node runtime");
            return Ok(system);
        }

        if !allows_download {
            return Err(Error::RuntimeMissing);
        }

        let client = reqwest::Client::new();
        let resolved = self.resolve_remote(spec, &client).await?;

        let (node_launcher, npm_launcher) = self.launcher_paths(&resolved.version);
        if node_launcher.exists() {
            return self.validate(&resolved.version).await;
        }

        let filename = release_filename(&resolved.version);
        let url = release_url(&resolved.version, &filename);
        let dest_dir = self.version_dir(&resolved.version);
        fs_err::create_dir_all(self.versions_dir())?;

        download::download_and_extract(
            &url,
            &filename,
            &self.cache_dir(),
            DOWNLOAD_TIMEOUT,
            async |extracted: &Path| {
                fs_err::tokio::remove_dir_all(&dest_dir).await.ok();
                fs_err::tokio::rename(extracted, &dest_dir).await?;
                Ok(())
            },
        )
        .await
        .with_context(|| format!("Failed to install node {}", resolved.version))?;

        if !node_launcher.exists() {
            fs_err::remove_dir_all(&dest_dir).ok();
            return Err(Error::RuntimePayloadMissing(resolved.version.clone()));
        }
        let _ = npm_launcher;

        let result = self.validate(&resolved.version).await?;
        Ok(NodeResult {
            lts: resolved.lts.clone(),
            ..result
        })
    }

    async fn resolve_remote(
        &self,
        spec: &str,
        client: &reqwest::Client,
    ) -> Result<ReleaseEntry, Error> {
        let entries = version::fetch_index(client)
            .await
            .ok_or(version::Error::VersionNotFound(spec.to_string()))?;
        version::find(spec, &entries).cloned().map_err(Error::from)
    }

    /// `set_global(version)` — spec.md §4.4.
    pub fn set_global(&self, version: &str) -> Result<(), Error> {
        if self.find_installed(version).as_deref() != Some(version) {
            return Err(Error::RuntimeMissing);
        }
        fs_err::write(self.global_file(), version)?;
        Ok(())
    }

    /// `get_global()` — spec.md §4.4.
    pub fn get_global(&self) -> Option<String> {
        fs_err::read_to_string(self.global_file())
            .ok()
            .map(|s| s.trim().to_string())
            .or_else(|| self.installed_versions().into_iter().next())
    }

    pub fn uninstall(&self, version: &str) -> Result<(), Error> {
        let dir = self.version_dir(version);
        if !dir.exists() {
            return Err(Error::RuntimeMissing);
        }
        fs_err::remove_dir_all(dir)?;
        Ok(())
    }

    /// `validate(version)` — spec.md §4.4.1.
    pub async fn validate(&self, version: &str) -> Result<NodeResult, Error> {
        let dir = self.version_dir(version);
        if !dir.exists() {
            return Err(Error::RuntimeMissing);
        }

        let (node, npm) = self.launcher_paths(version);
        if !node.exists() {
            return Err(Error::LauncherMissing("node"));
        }
        if !npm.exists() {
            return Err(Error::LauncherMissing("npm"));
        }

        Cmd::new(&node, "node --version")
            .arg("--version")
            .check(true)
            .output()
            .await
            .map_err(|err| Error::LauncherNonFunctional {
                launcher: "node",
                cause: err.into(),
            })?;

        Cmd::new(&npm, "npm --version")
            .arg("--version")
            .check(true)
            .output()
            .await
            .map_err(|err| Error::LauncherNonFunctional {
                launcher: "npm",
                cause: err.into(),
            })?;

        Ok(NodeResult {
            node,
            npm,
            version: version.to_string(),
            lts: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_filename_matches_host_platform_shape() {
        let filename = release_filename("20.11.0");
        assert!(filename.starts_with("node-v20.11.0-"));
        #[cfg(target_os = "linux")]
        assert!(filename.ends_with(".tar.xz"));
        #[cfg(target_os = "macos")]
        assert!(filename.ends_with(".tar.gz"));
        #[cfg(target_os = "windows")]
        assert!(filename.ends_with(".zip"));
    }

    #[test]
    fn release_url_defaults_to_upstream() {
        // SAFETY: test runs single-threaded with respect to this var.
        unsafe { std::env::remove_var(EnvVars::HOOKENV_INTERNAL__NODE_BASE_URL) };
        let url = release_url("20.11.0", "node-v20.11.0-linux-x64.tar.xz");
        assert_eq!(
            url,
            "https://nodejs.org/dist/v20.11.0/node-v20.11.0-linux-x64.tar.xz"
        );
    }

    #[test]
    fn installed_versions_empty_when_dir_missing() {
        let installer = NodeInstaller::new(PathBuf::from("/nonexistent/hookenv-node-test"));
        assert!(installer.installed_versions().is_empty());
    }

    #[test]
    fn find_installed_matches_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let versions_dir = tmp.path().join("versions");
        fs_err::create_dir_all(versions_dir.join("18.19.0")).unwrap();
        fs_err::create_dir_all(versions_dir.join("20.11.0")).unwrap();

        let installer = NodeInstaller::new(tmp.path().to_path_buf());
        assert_eq!(installer.find_installed("18").as_deref(), Some("18.19.0"));
        assert_eq!(
            installer.find_installed("default").as_deref(),
            Some("20.11.0")
        );
    }
}
