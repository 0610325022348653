use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use thiserror::Error;
use tracing::trace;

/// Poll interval for [`StateManager::wait_for`] (spec.md §4.3, §5).
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error, Eq, PartialEq)]
pub enum Error {
    #[error("`{0}` is already installing")]
    AlreadyInstalling(String),
    #[error("`{0}` failed to initialize")]
    FailedToInitialize(String),
    #[error("timed out waiting for `{0}` to initialize")]
    Timeout(String),
}

/// The lifecycle of a single `{language}:{version}:{repoURL}` environment
/// (spec.md §3.2, §4.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentState {
    Absent,
    Installing,
    Initialized { resolved_version: String },
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Statistics {
    pub absent: usize,
    pub installing: usize,
    pub initialized: usize,
    pub cached: usize,
}

/// In-process coordination so that two hooks racing to install the same
/// `{language}:{version}:{repoURL}` environment don't both run the installer
/// (spec.md §4.3). Cross-process coordination is handled separately by
/// [`crate::fs::LockedFile`].
///
/// Owns the three tables spec.md §4.3 names: the installing/initialized
/// states above, plus a separate `vkey -> resolved version` cache consulted
/// by `get_cached_version`/`set_cached_version`.
#[derive(Debug, Default)]
pub struct StateManager {
    states: RwLock<HashMap<String, EnvironmentState>>,
    cached_versions: RwLock<HashMap<String, String>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state for `key`, defaulting to [`EnvironmentState::Absent`] if unknown.
    pub fn state(&self, key: &str) -> EnvironmentState {
        self.states
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
            .unwrap_or(EnvironmentState::Absent)
    }

    pub fn is_initialized(&self, key: &str) -> bool {
        matches!(self.state(key), EnvironmentState::Initialized { .. })
    }

    pub fn is_installing(&self, key: &str) -> bool {
        matches!(self.state(key), EnvironmentState::Installing)
    }

    /// Transition `key` to [`EnvironmentState::Installing`] (spec.md §4.3
    /// `mark_installing`). Fails with [`Error::AlreadyInstalling`] if `key`
    /// is already installing or initialized — callers that want to reuse an
    /// initialized environment should check [`Self::is_initialized`] first.
    pub fn mark_installing(&self, key: &str) -> Result<(), Error> {
        let mut states = self
            .states
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match states.get(key) {
            Some(EnvironmentState::Installing | EnvironmentState::Initialized { .. }) => {
                Err(Error::AlreadyInstalling(key.to_string()))
            }
            _ => {
                states.insert(key.to_string(), EnvironmentState::Installing);
                Ok(())
            }
        }
    }

    pub fn mark_initialized(&self, key: &str, resolved_version: impl Into<String>) {
        let mut states = self
            .states
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        states.insert(
            key.to_string(),
            EnvironmentState::Initialized {
                resolved_version: resolved_version.into(),
            },
        );
    }

    /// Remove an *installing* flag, reverting `key` to *absent* (spec.md
    /// §4.3 `clear_installing`, used on a failed install so a later caller
    /// can retry rather than waiting forever).
    pub fn clear_installing(&self, key: &str) {
        let mut states = self
            .states
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        states.remove(key);
    }

    /// Most-recently-observed resolved version for `vkey` (spec.md §4.3
    /// `get_cached_version`).
    pub fn get_cached_version(&self, vkey: &str) -> Option<String> {
        self.cached_versions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(vkey)
            .cloned()
    }

    /// Record the most-recently-observed resolved version for `vkey`
    /// (spec.md §4.3 `set_cached_version`).
    pub fn set_cached_version(&self, vkey: &str, version: impl Into<String>) {
        self.cached_versions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(vkey.to_string(), version.into());
    }

    /// Poll `key`'s state every 10ms until it leaves [`EnvironmentState::Installing`],
    /// up to `max_attempts` polls (spec.md §4.3 `wait_for(key, max_attempts)`).
    pub async fn wait_for(
        &self,
        key: &str,
        max_attempts: usize,
    ) -> Result<EnvironmentState, Error> {
        for _ in 0..max_attempts {
            let state = self.state(key);
            match state {
                EnvironmentState::Installing => {
                    trace!(key, "Waiting for environment install to finish");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                EnvironmentState::Initialized { .. } => return Ok(state),
                EnvironmentState::Absent => {
                    return Err(Error::FailedToInitialize(key.to_string()));
                }
            }
        }
        Err(Error::Timeout(key.to_string()))
    }

    pub fn statistics(&self) -> Statistics {
        let states = self
            .states
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut stats = Statistics::default();
        for state in states.values() {
            match state {
                EnvironmentState::Absent => stats.absent += 1,
                EnvironmentState::Installing => stats.installing += 1,
                EnvironmentState::Initialized { .. } => stats.initialized += 1,
            }
        }
        stats.cached = self
            .cached_versions
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len();
        stats
    }

    /// Clear all three tables. Intended for test isolation.
    pub fn reset(&self) {
        self.states
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
        self.cached_versions
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }
}

/// Build the state-manager key for a given language/version/repo triple
/// (spec.md §3.2: `"{language}:{version}:{repoURL}"`).
pub fn environment_key(language: &str, version: &str, repo_url: &str) -> String {
    format!("{language}:{version}:{repo_url}")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn mark_installing_is_exclusive() {
        let manager = StateManager::new();
        assert!(manager.mark_installing("node:20.11.0:repo").is_ok());
        assert_eq!(
            manager.mark_installing("node:20.11.0:repo").unwrap_err(),
            Error::AlreadyInstalling("node:20.11.0:repo".to_string())
        );
    }

    #[test]
    fn mark_initialized_then_mark_installing_fails() {
        let manager = StateManager::new();
        manager.mark_installing("node:20.11.0:repo").unwrap();
        manager.mark_initialized("node:20.11.0:repo", "20.11.0");
        assert!(manager.mark_installing("node:20.11.0:repo").is_err());
        assert!(manager.is_initialized("node:20.11.0:repo"));
        assert_eq!(
            manager.state("node:20.11.0:repo"),
            EnvironmentState::Initialized {
                resolved_version: "20.11.0".to_string()
            }
        );
    }

    #[test]
    fn clear_installing_resets_to_absent() {
        let manager = StateManager::new();
        manager.mark_installing("node:20.11.0:repo").unwrap();
        manager.clear_installing("node:20.11.0:repo");
        assert_eq!(manager.state("node:20.11.0:repo"), EnvironmentState::Absent);
        assert!(manager.mark_installing("node:20.11.0:repo").is_ok());
    }

    #[tokio::test]
    async fn wait_for_resolves_once_initialized() {
        let manager = Arc::new(StateManager::new());
        manager.mark_installing("node:20.11.0:repo").unwrap();

        let waiter = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.wait_for("node:20.11.0:repo", 1000).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        manager.mark_initialized("node:20.11.0:repo", "20.11.0");

        let result = waiter.await.unwrap().unwrap();
        assert_eq!(
            result,
            EnvironmentState::Initialized {
                resolved_version: "20.11.0".to_string()
            }
        );
    }

    #[tokio::test]
    async fn wait_for_reports_failure_when_installing_clears() {
        let manager = Arc::new(StateManager::new());
        manager.mark_installing("node:20.11.0:repo").unwrap();

        let waiter = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.wait_for("node:20.11.0:repo", 1000).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        manager.clear_installing("node:20.11.0:repo");

        let result = waiter.await.unwrap();
        assert_eq!(
            result,
            Err(Error::FailedToInitialize("node:20.11.0:repo".to_string()))
        );
    }

    #[tokio::test]
    async fn wait_for_times_out_after_max_attempts() {
        let manager = StateManager::new();
        manager.mark_installing("node:20.11.0:repo").unwrap();

        let result = manager.wait_for("node:20.11.0:repo", 3).await;
        assert_eq!(
            result,
            Err(Error::Timeout("node:20.11.0:repo".to_string()))
        );
    }

    #[test]
    fn cached_version_round_trips() {
        let manager = StateManager::new();
        assert_eq!(manager.get_cached_version("node:default:repo"), None);
        manager.set_cached_version("node:default:repo", "20.11.0");
        assert_eq!(
            manager.get_cached_version("node:default:repo"),
            Some("20.11.0".to_string())
        );
    }

    #[test]
    fn statistics_count_by_state_and_cache() {
        let manager = StateManager::new();
        manager.mark_installing("a").unwrap();
        manager.mark_installing("b").unwrap();
        manager.mark_initialized("b", "1.0.0");
        manager.set_cached_version("b", "1.0.0");

        let stats = manager.statistics();
        assert_eq!(stats.installing, 1);
        assert_eq!(stats.initialized, 1);
        assert_eq!(stats.absent, 0);
        assert_eq!(stats.cached, 1);
    }

    #[test]
    fn reset_clears_states_and_cache() {
        let manager = StateManager::new();
        manager.mark_installing("a").unwrap();
        manager.set_cached_version("a", "1.0.0");
        manager.reset();
        assert_eq!(manager.state("a"), EnvironmentState::Absent);
        assert_eq!(manager.get_cached_version("a"), None);
    }

    #[test]
    fn environment_key_formats_as_documented() {
        assert_eq!(
            environment_key("node", "20.11.0", "https://example.com/repo"),
            "node:20.11.0:https://example.com/repo"
        );
    }
}
