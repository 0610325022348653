use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::hook::InstallInfo;

pub mod generic;
pub mod node;
pub mod python;

use generic::GenericManager;
use node::manager::NodeManager;
use python::manager::PythonManager;

/// The closed set of language tags the subsystem understands (spec.md §3.1,
/// §4.5; `[ADDED]` tag list per SPEC_FULL.md §4.5).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Language {
    Node,
    Python,
    Ruby,
    Golang,
    Rust,
    Conda,
    Coursier,
    Swift,
    System,
    Script,
    Fail,
    Pygrep,
    Docker,
    DockerImage,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Python => "python",
            Self::Ruby => "ruby",
            Self::Golang => "golang",
            Self::Rust => "rust",
            Self::Conda => "conda",
            Self::Coursier => "coursier",
            Self::Swift => "swift",
            Self::System => "system",
            Self::Script => "script",
            Self::Fail => "fail",
            Self::Pygrep => "pygrep",
            Self::Docker => "docker",
            Self::DockerImage => "docker_image",
        }
    }

    /// Parse a hook's `language:` tag, accepting the aliases pre-commit itself
    /// accepts (`python3` for `python`, `go` for `golang`).
    pub fn parse_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "node" => Self::Node,
            "python" | "python3" => Self::Python,
            "ruby" => Self::Ruby,
            "golang" | "go" => Self::Golang,
            "rust" => Self::Rust,
            "conda" => Self::Conda,
            "coursier" => Self::Coursier,
            "swift" => Self::Swift,
            "system" => Self::System,
            "script" => Self::Script,
            "fail" => Self::Fail,
            "pygrep" => Self::Pygrep,
            "docker" => Self::Docker,
            "docker_image" => Self::DockerImage,
            _ => return None,
        })
    }

    /// Whether this language downloads and manages its own runtime versions,
    /// as opposed to only ever using whatever is already on `PATH`.
    pub fn has_runtime_manager(self) -> bool {
        matches!(self, Self::Node | Self::Python)
    }

    /// Whether a hook may request a specific toolchain version for this
    /// language (<https://pre-commit.com/#overriding-language-version>).
    pub fn supports_language_version(self) -> bool {
        matches!(self, Self::Python | Self::Node)
    }

    /// Whether `additional_dependencies` is meaningful for this language.
    pub fn supports_dependency(self) -> bool {
        !matches!(
            self,
            Self::DockerImage
                | Self::Fail
                | Self::Pygrep
                | Self::Script
                | Self::System
                | Self::Docker
                | Self::Swift
        )
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Language {
    /// Obtain or create an environment for `version`/`deps`, without a repo-local
    /// dependency manifest to read (spec.md §4.5 `setup`).
    pub async fn setup(
        self,
        cache_dir: &Path,
        version: &str,
        deps: &HashSet<String>,
    ) -> Result<PathBuf> {
        match self {
            Self::Node => NodeManager.setup(cache_dir, version, deps).await,
            Self::Python => PythonManager.setup(cache_dir, version, deps).await,
            _ => GenericManager(self).setup(cache_dir, version, deps).await,
        }
    }

    /// Like [`Self::setup`], but additionally hands the language manager a
    /// checked-out repository so it can read a manifest file (e.g. `package.json`,
    /// `pyproject.toml`) alongside `additional_dependencies` (spec.md §4.5
    /// `setup_with_repo`).
    pub async fn setup_with_repo(
        self,
        cache_dir: &Path,
        version: &str,
        repo_path: &Path,
        repo_url: &str,
        deps: &HashSet<String>,
    ) -> Result<PathBuf> {
        match self {
            Self::Node => {
                NodeManager
                    .setup_with_repo(cache_dir, version, repo_path, repo_url, deps)
                    .await
            }
            Self::Python => {
                PythonManager
                    .setup_with_repo(cache_dir, version, repo_path, repo_url, deps)
                    .await
            }
            _ => {
                GenericManager(self)
                    .setup_with_repo(cache_dir, version, repo_path, repo_url, deps)
                    .await
            }
        }
    }

    pub fn get_bin_path(self, env_path: &Path) -> PathBuf {
        match self {
            Self::Node => NodeManager.get_bin_path(env_path),
            Self::Python => PythonManager.get_bin_path(env_path),
            _ => GenericManager(self).get_bin_path(env_path),
        }
    }

    pub async fn is_runtime_available(self) -> bool {
        match self {
            Self::Node => NodeManager.is_runtime_available().await,
            Self::Python => PythonManager.is_runtime_available().await,
            _ => GenericManager(self).is_runtime_available().await,
        }
    }

    pub async fn check_health(self, env_path: &Path) -> bool {
        match self {
            Self::Node => NodeManager.check_health(env_path).await,
            Self::Python => PythonManager.check_health(env_path).await,
            _ => GenericManager(self).check_health(env_path).await,
        }
    }

    pub async fn install_dependencies(
        self,
        env_path: &Path,
        deps: &HashSet<String>,
    ) -> Result<()> {
        match self {
            Self::Node => NodeManager.install_dependencies(env_path, deps).await,
            Self::Python => PythonManager.install_dependencies(env_path, deps).await,
            _ => GenericManager(self).install_dependencies(env_path, deps).await,
        }
    }

    pub async fn pre_initialize(
        self,
        cache_dir: &Path,
        version: &str,
        repo_path: Option<&Path>,
        repo_url: &str,
        deps: &HashSet<String>,
    ) -> Result<()> {
        match self {
            Self::Node => {
                NodeManager
                    .pre_initialize(cache_dir, version, repo_path, repo_url, deps)
                    .await
            }
            Self::Python => {
                PythonManager
                    .pre_initialize(cache_dir, version, repo_path, repo_url, deps)
                    .await
            }
            _ => {
                GenericManager(self)
                    .pre_initialize(cache_dir, version, repo_path, repo_url, deps)
                    .await
            }
        }
    }
}

pub(crate) fn health_from_install_info(install_info: &InstallInfo) -> bool {
    install_info.env_path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tag_accepts_pre_commit_aliases() {
        assert_eq!(Language::parse_tag("python3"), Some(Language::Python));
        assert_eq!(Language::parse_tag("go"), Some(Language::Golang));
        assert_eq!(Language::parse_tag("nonsense"), None);
    }

    #[test]
    fn display_matches_as_str() {
        assert_eq!(Language::DockerImage.to_string(), "docker_image");
    }

    #[test]
    fn only_node_and_python_have_runtime_manager() {
        assert!(Language::Node.has_runtime_manager());
        assert!(Language::Python.has_runtime_manager());
        assert!(!Language::Rust.has_runtime_manager());
        assert!(!Language::System.has_runtime_manager());
    }
}
