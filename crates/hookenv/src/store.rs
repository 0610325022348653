use std::path::{Path, PathBuf};

use etcetera::BaseStrategy;
use thiserror::Error;

use hookenv_consts::env_vars::EnvVars;

use crate::fs::LockedFile;
use crate::languages::Language;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Home directory not found")]
    HomeNotFound,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Expand a path starting with `~` to the user's home directory.
fn expand_tilde(path: PathBuf) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~")
        && let Some(home) = std::env::home_dir()
    {
        return home.join(stripped);
    }
    path
}

/// Cache-directory layout for installed runtimes and downloads (spec.md
/// §4.4 "base directory `B`"; `B` here is [`Store::tools_path`]).
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolve `HOOKENV_HOME`, or a platform cache directory, and create the
    /// store's directory tree.
    pub fn from_settings() -> Result<Self, Error> {
        let path = if let Some(path) = EnvVars::var_os(EnvVars::HOOKENV_HOME) {
            Some(expand_tilde(PathBuf::from(path)))
        } else {
            etcetera::choose_base_strategy()
                .map(|path| path.cache_dir().join("hookenv"))
                .ok()
        };

        let Some(path) = path else {
            return Err(Error::HomeNotFound);
        };
        Store::from_path(path).init()
    }

    pub fn path(&self) -> &Path {
        self.path.as_ref()
    }

    pub fn init(self) -> Result<Self, Error> {
        crate::fs::create_dir_all_mode(&self.path, 0o750)?;
        crate::fs::create_dir_all_mode(&self.tools_dir(), 0o750)?;
        crate::fs::create_dir_all_mode(&self.cache_dir(), 0o750)?;
        crate::fs::create_dir_all_mode(&self.scratch_path(), 0o750)?;
        Ok(self)
    }

    pub async fn lock_async(&self) -> Result<LockedFile, std::io::Error> {
        LockedFile::acquire(self.path.join(".lock"), "store").await
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.path.join("tools")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.path.join("cache")
    }

    /// Base directory for one language's installed runtimes (spec.md §4.4:
    /// `B/versions/<v>/`, `B/cache/`, `B/global` all live under this).
    pub fn tools_path(&self, language: Language) -> PathBuf {
        self.tools_dir().join(language.as_str())
    }

    /// Scratch path for temporary files (download staging, extraction).
    pub fn scratch_path(&self) -> PathBuf {
        self.path.join("scratch")
    }

    pub fn log_file(&self) -> PathBuf {
        self.path.join("hookenv.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_expected_subdirectories() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::from_path(tmp.path()).init().unwrap();
        assert!(store.tools_dir().is_dir());
        assert!(store.cache_dir().is_dir());
        assert!(store.scratch_path().is_dir());
    }

    #[test]
    fn tools_path_is_scoped_per_language() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::from_path(tmp.path());
        assert_eq!(store.tools_path(Language::Node), store.tools_dir().join("node"));
        assert_ne!(
            store.tools_path(Language::Node),
            store.tools_path(Language::Python)
        );
    }

    #[test]
    fn expand_tilde_substitutes_home() {
        // SAFETY: test runs single-threaded with respect to this var.
        unsafe { std::env::set_var("HOME", "/home/tester") };
        let expanded = expand_tilde(PathBuf::from("~/cache"));
        assert_eq!(expanded, PathBuf::from("/home/tester/cache"));
    }
}
