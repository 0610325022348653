use std::ffi::OsString;

use tracing::info;

pub struct EnvVars;

impl EnvVars {
    pub const PATH: &'static str = "PATH";
    pub const HOME: &'static str = "HOME";
    pub const CI: &'static str = "CI";

    pub const SSL_CERT_FILE: &'static str = "SSL_CERT_FILE";

    // HOOKENV specific environment variables, public for users.
    pub const HOOKENV_HOME: &'static str = "HOOKENV_HOME";
    pub const HOOKENV_NATIVE_TLS: &'static str = "HOOKENV_NATIVE_TLS";
    pub const HOOKENV_NO_CONCURRENCY: &'static str = "HOOKENV_NO_CONCURRENCY";

    // HOOKENV internal environment variables, used to make tests deterministic
    // without touching the real system PATH.
    pub const HOOKENV_INTERNAL__NODE_BINARY_NAME: &'static str =
        "HOOKENV_INTERNAL__NODE_BINARY_NAME";
    pub const HOOKENV_INTERNAL__PYTHON_BINARY_NAME: &'static str =
        "HOOKENV_INTERNAL__PYTHON_BINARY_NAME";
    pub const HOOKENV_INTERNAL__NODE_BASE_URL: &'static str = "HOOKENV_INTERNAL__NODE_BASE_URL";
    pub const HOOKENV_INTERNAL__PYTHON_BASE_URL: &'static str =
        "HOOKENV_INTERNAL__PYTHON_BASE_URL";

    // Python & virtualenv related
    pub const VIRTUAL_ENV: &'static str = "VIRTUAL_ENV";
    pub const PYTHONHOME: &'static str = "PYTHONHOME";

    // Node/Npm related
    pub const NODE_VIRTUAL_ENV: &'static str = "NODE_VIRTUAL_ENV";
    pub const NPM_CONFIG_PREFIX: &'static str = "NPM_CONFIG_PREFIX";
    pub const NPM_CONFIG_USERCONFIG: &'static str = "NPM_CONFIG_USERCONFIG";
    pub const NODE_PATH: &'static str = "NODE_PATH";

    // Go related
    pub const GOCACHE: &'static str = "GOCACHE";
    pub const GOPATH: &'static str = "GOPATH";

    // Ruby related
    pub const GEM_HOME: &'static str = "GEM_HOME";
    pub const GEM_PATH: &'static str = "GEM_PATH";
    pub const BUNDLE_IGNORE_CONFIG: &'static str = "BUNDLE_IGNORE_CONFIG";

    // Rust related
    pub const CARGO_HOME: &'static str = "CARGO_HOME";

    // Conda related
    pub const CONDA_PREFIX: &'static str = "CONDA_PREFIX";

    // Coursier related
    pub const COURSIER_CACHE: &'static str = "COURSIER_CACHE";

    // Swift related
    pub const SWIFT_ENV: &'static str = "SWIFT_ENV";

    // pre-commit-compatible variables exposed on the launch mapping (spec.md §4.6).
    pub const PRE_COMMIT_ENV_PATH: &'static str = "PRE_COMMIT_ENV_PATH";
    pub const PRE_COMMIT_LANGUAGE: &'static str = "PRE_COMMIT_LANGUAGE";
    pub const PRE_COMMIT_VERSION: &'static str = "PRE_COMMIT_VERSION";
}

impl EnvVars {
    // Pre-commit environment variables that we support for compatibility.
    pub const PRE_COMMIT_HOME: &'static str = "PRE_COMMIT_HOME";
    const PRE_COMMIT_NO_CONCURRENCY: &'static str = "PRE_COMMIT_NO_CONCURRENCY";
}

impl EnvVars {
    /// Read an environment variable, falling back to the pre-commit corresponding
    /// variable if not found.
    pub fn var_os(name: &str) -> Option<OsString> {
        #[allow(clippy::disallowed_methods)]
        std::env::var_os(name).or_else(|| {
            let fallback = Self::pre_commit_name(name)?;
            let val = std::env::var_os(fallback)?;
            info!("Falling back to pre-commit environment variable for {name}");
            Some(val)
        })
    }

    pub fn is_set(name: &str) -> bool {
        Self::var_os(name).is_some()
    }

    /// Read an environment variable, falling back to pre-commit corresponding variable if not found.
    pub fn var(name: &str) -> Result<String, std::env::VarError> {
        match Self::var_os(name) {
            Some(s) => s.into_string().map_err(std::env::VarError::NotUnicode),
            None => Err(std::env::VarError::NotPresent),
        }
    }

    /// Read an environment var and parse as bool.
    pub fn var_as_bool(name: &str) -> Option<bool> {
        if let Some(val) = EnvVars::var_os(name)
            && let Some(val) = val.to_str()
            && let Some(val) = EnvVars::parse_boolish(val)
        {
            Some(val)
        } else {
            None
        }
    }

    /// Parse a boolean from a string.
    ///
    /// True values are `y`, `yes`, `t`, `true`, `on`, and `1`.
    /// False values are `n`, `no`, `f`, `false`, `off`, and `0`.
    fn parse_boolish(val: &str) -> Option<bool> {
        const TRUE_LITERALS: [&str; 6] = ["y", "yes", "t", "true", "on", "1"];
        const FALSE_LITERALS: [&str; 6] = ["n", "no", "f", "false", "off", "0"];

        let val = val.to_lowercase();
        let pat = val.as_str();
        if TRUE_LITERALS.contains(&pat) {
            Some(true)
        } else if FALSE_LITERALS.contains(&pat) {
            Some(false)
        } else {
            None
        }
    }

    fn pre_commit_name(name: &str) -> Option<&str> {
        match name {
            Self::HOOKENV_HOME => Some(Self::PRE_COMMIT_HOME),
            Self::HOOKENV_NO_CONCURRENCY => Some(Self::PRE_COMMIT_NO_CONCURRENCY),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EnvVars;

    #[test]
    fn test_parse_boolish() {
        let true_values = ["y", "yes", "t", "true", "on", "1"];
        let false_values = ["n", "no", "f", "false", "off", "0"];
        for val in true_values {
            assert_eq!(EnvVars::parse_boolish(val), Some(true));
            assert_eq!(EnvVars::parse_boolish(&val.to_uppercase()), Some(true));
        }
        for val in false_values {
            assert_eq!(EnvVars::parse_boolish(val), Some(false));
            assert_eq!(EnvVars::parse_boolish(&val.to_uppercase()), Some(false));
        }
        assert_eq!(EnvVars::parse_boolish("maybe"), None);
        assert_eq!(EnvVars::parse_boolish(""), None);
        assert_eq!(EnvVars::parse_boolish("123"), None);
    }
}
