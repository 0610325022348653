use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use hookenv_consts::env_vars::EnvVars;
use thiserror::Error;
use tracing::{debug, warn};

use crate::download;
use crate::languages::python::version;
use crate::process::Cmd;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(180);
/// `python-build-standalone` releases, consulted first on macOS for a faster
/// install than the official framework installer (spec.md §4.4.2).
const STANDALONE_BASE_URL: &str =
    "https://github.com/astral-sh/python-build-standalone/releases/download";

#[derive(Debug, Error)]
pub enum Error {
    #[error("Python runtime is not installed")]
    RuntimeMissing,
    #[error("Python launcher is missing after extraction")]
    LauncherMissing,
    #[error("Python payload for version `{0}` did not contain the expected launcher")]
    RuntimePayloadMissing(String),
    #[error("`{0}` is required to relocate the extracted Python framework but was not found")]
    ExternalToolMissing(&'static str),
    #[error(transparent)]
    Version(#[from] version::Error),
    #[error(transparent)]
    Download(#[from] download::Error),
    #[error(transparent)]
    Process(#[from] crate::process::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct PythonResult {
    python: PathBuf,
    version: String,
}

impl PythonResult {
    pub fn python(&self) -> &Path {
        &self.python
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

fn python_binary_name() -> String {
    EnvVars::var(EnvVars::HOOKENV_INTERNAL__PYTHON_BINARY_NAME).unwrap_or_else(|_| {
        if cfg!(windows) {
            "python.exe".to_string()
        } else {
            "python3".to_string()
        }
    })
}

/// Owns `B/versions/` for the Python runtime, mirroring the Node layout
/// (spec.md §4.4: "Python and others follow the same pattern").
#[derive(Debug, Clone)]
pub struct PythonInstaller {
    base_dir: PathBuf,
}

impl PythonInstaller {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn versions_dir(&self) -> PathBuf {
        self.base_dir.join("versions")
    }

    fn cache_dir(&self) -> PathBuf {
        self.base_dir.join("cache")
    }

    fn version_dir(&self, version: &str) -> PathBuf {
        self.versions_dir().join(version)
    }

    fn launcher_path(&self, version: &str) -> PathBuf {
        let dir = self.version_dir(version);
        if cfg!(windows) {
            dir.join("python.exe")
        } else {
            dir.join("bin").join("python3")
        }
    }

    pub fn installed_versions(&self) -> Vec<String> {
        let Ok(entries) = fs_err::read_dir(self.versions_dir()) else {
            return Vec::new();
        };
        let mut versions: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        versions.sort_by(|a, b| crate::version::compare_versions(b, a));
        versions
    }

    pub fn find_installed(&self, spec: &str) -> Option<String> {
        let installed = self.installed_versions();
        if spec.is_empty() || spec == "default" || spec == "latest" {
            return installed.into_iter().next();
        }
        installed
            .into_iter()
            .find(|v| v == spec || v.starts_with(&format!("{spec}.")))
    }

    /// `[ADDED]` `find_system()` — search `PATH` for a system Python
    /// satisfying `spec` (spec.md §4.4 `[ADDED]`, mirroring Node's).
    pub async fn find_system(&self, spec: &str) -> Option<PythonResult> {
        let binary = python_binary_name();
        let candidates = which::which_all(&binary).ok()?.collect::<Vec<_>>();

        for python in candidates {
            let Ok(output) = Cmd::new(&python, "python --version")
                .arg("--version")
                .check(true)
                .output()
                .await
            else {
                continue;
            };
            let raw = String::from_utf8_lossy(&output.stdout);
            let raw = if raw.trim().is_empty() {
                String::from_utf8_lossy(&output.stderr).to_string()
            } else {
                raw.to_string()
            };
            let Some(version) = raw.trim().strip_prefix("Python ").map(str::to_string) else {
                continue;
            };

            if spec.is_empty()
                || spec == "default"
                || spec == "latest"
                || spec == "system"
                || version == spec
                || version.starts_with(&format!("{spec}."))
            {
                return Some(PythonResult { python, version });
            }
        }
        None
    }

    /// `install(version)`, Python-specific deviations per spec.md §4.4.2.
    pub async fn install(&self, spec: &str, allows_download: bool) -> Result<PythonResult, Error> {
        if let Some(version) = self.find_installed(spec) {
            debug!(version, "Using already-installed Python runtime");
            return self.validate(&version).await;
        }

        if let Some(system) = self.find_system(spec).await {
            debug!(version = %system.version, "Using system Python runtime");
            return Ok(system);
        }

        if !allows_download {
            return Err(Error::RuntimeMissing);
        }

        let resolved = version::find(spec)?.to_string();
        let dest_dir = self.version_dir(&resolved);
        fs_err::create_dir_all(self.versions_dir())?;

        self.download_one(&resolved, &dest_dir).await?;

        let launcher = self.launcher_path(&resolved);
        if !launcher.exists() {
            fs_err::remove_dir_all(&dest_dir).ok();
            return Err(Error::RuntimePayloadMissing(resolved));
        }

        if cfg!(target_os = "macos") {
            self.relocate_macos_framework(&dest_dir).await?;
        }

        self.upgrade_pip(&launcher).await;

        self.validate(&resolved).await
    }

    async fn download_one(&self, version: &str, dest_dir: &Path) -> Result<(), Error> {
        let (url, filename) = self.release_asset(version);

        if cfg!(windows) {
            return self.download_and_run_windows_installer(&url, &filename, dest_dir).await;
        }

        download::download_and_extract(
            &url,
            &filename,
            &self.cache_dir(),
            DOWNLOAD_TIMEOUT,
            async |extracted: &Path| {
                fs_err::tokio::remove_dir_all(dest_dir).await.ok();
                fs_err::tokio::rename(extracted, dest_dir).await?;
                Ok(())
            },
        )
        .await
        .with_context(|| format!("Failed to install python {version}"))?;
        Ok(())
    }

    /// Windows releases ship an `.exe` installer rather than an archive
    /// (spec.md §4.4.2 "exe installer on Windows"); run it silently against
    /// `dest_dir` instead of routing it through the Archive Engine, which
    /// only understands tar/zip payloads.
    async fn download_and_run_windows_installer(
        &self,
        url: &str,
        filename: &str,
        dest_dir: &Path,
    ) -> Result<(), Error> {
        fs_err::create_dir_all(self.cache_dir())?;
        let scratch = tempfile::tempdir_in(self.cache_dir())?;
        let installer_path = scratch.path().join(filename);

        download::download(url, &installer_path, DOWNLOAD_TIMEOUT).await?;

        fs_err::create_dir_all(dest_dir)?;
        Cmd::new(&installer_path, "python installer")
            .arg("/quiet")
            .arg("InstallAllUsers=0")
            .arg("PrependPath=0")
            .arg("Include_launcher=0")
            .arg(format!("TargetDir={}", dest_dir.display()))
            .check(true)
            .output()
            .await?;

        Ok(())
    }

    /// Standalone-build first on macOS, otherwise the official CPython
    /// distribution (spec.md §4.4.2 "Archive locations vary").
    fn release_asset(&self, version: &str) -> (String, String) {
        let arch = download::normalized_arch();
        match download::normalized_os() {
            "osx" => {
                let filename = format!("cpython-{version}-{arch}-apple-darwin-install_only.tar.gz");
                (format!("{STANDALONE_BASE_URL}/{version}/{filename}"), filename)
            }
            "win" => {
                let filename = format!("python-{version}-{arch}.exe");
                (
                    format!("https://www.python.org/ftp/python/{version}/{filename}"),
                    filename,
                )
            }
            _ => {
                let filename = format!("Python-{version}.tgz");
                (
                    format!("https://www.python.org/ftp/python/{version}/{filename}"),
                    filename,
                )
            }
        }
    }

    /// Rewrite the hardcoded `@executable_path/../..` framework references
    /// python-build-standalone ships with so they point at the extracted
    /// location instead of the build machine's path (spec.md §4.4.2).
    async fn relocate_macos_framework(&self, dest_dir: &Path) -> Result<(), Error> {
        if which::which("install_name_tool").is_err() {
            return Err(Error::ExternalToolMissing("install_name_tool"));
        }

        let binary = dest_dir.join("bin").join("python3");
        if !binary.exists() {
            return Ok(());
        }

        let old_prefix = "@executable_path/../..";
        let new_prefix = dest_dir.display().to_string();

        let listing = Cmd::new("otool", "otool -L")
            .arg("-L")
            .arg(&binary)
            .check(true)
            .output()
            .await?;
        let listing = String::from_utf8_lossy(&listing.stdout);

        for dependency in listing.lines().skip(1).filter_map(|line| line.split_whitespace().next())
        {
            let Some(suffix) = dependency.strip_prefix(old_prefix) else {
                continue;
            };
            let new_path = format!("{new_prefix}{suffix}");
            Cmd::new("install_name_tool", "install_name_tool -change")
                .arg("-change")
                .arg(dependency)
                .arg(&new_path)
                .arg(&binary)
                .check(true)
                .output()
                .await?;
        }

        Ok(())
    }

    async fn upgrade_pip(&self, launcher: &Path) {
        let result = Cmd::new(launcher, "pip upgrade")
            .arg("-m")
            .arg("pip")
            .arg("install")
            .arg("--upgrade")
            .arg("pip")
            .check(true)
            .output()
            .await;
        if let Err(err) = result {
            warn!(?err, "Failed to upgrade pip, continuing anyway");
        }

        for pkg in ["setuptools", "wheel"] {
            let result = Cmd::new(launcher, format!("pip install {pkg}"))
                .arg("-m")
                .arg("pip")
                .arg("install")
                .arg(pkg)
                .check(false)
                .output()
                .await;
            if let Err(err) = result {
                warn!(?err, pkg, "Failed best-effort install of optional package");
            }
        }
    }

    pub async fn validate(&self, version: &str) -> Result<PythonResult, Error> {
        let dir = self.version_dir(version);
        if !dir.exists() {
            return Err(Error::RuntimeMissing);
        }
        let launcher = self.launcher_path(version);
        if !launcher.exists() {
            return Err(Error::LauncherMissing);
        }
        Cmd::new(&launcher, "python --version")
            .arg("--version")
            .check(true)
            .output()
            .await
            .map_err(|err| {
                warn!(?err, "python --version smoke test failed");
                Error::LauncherMissing
            })?;

        Ok(PythonResult {
            python: launcher,
            version: version.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_asset_varies_by_host_os() {
        let installer = PythonInstaller::new(PathBuf::from("/tmp/hookenv-python-test"));
        let (url, filename) = installer.release_asset("3.12.8");
        #[cfg(target_os = "macos")]
        {
            assert!(url.contains("python-build-standalone"));
            assert!(filename.ends_with(".tar.gz"));
        }
        #[cfg(target_os = "linux")]
        {
            assert!(url.starts_with("https://www.python.org/ftp/python/"));
            assert_eq!(filename, "Python-3.12.8.tgz");
        }
    }

    #[test]
    fn installed_versions_empty_when_dir_missing() {
        let installer = PythonInstaller::new(PathBuf::from("/nonexistent/hookenv-python-test"));
        assert!(installer.installed_versions().is_empty());
    }
}
