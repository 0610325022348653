pub mod env_vars;

use std::ffi::OsString;
use std::path::Path;

use env_vars::EnvVars;

/// Prepend paths to the current $PATH, returning the joined result.
///
/// The resulting `OsString` can be used to set the `PATH` environment variable.
pub fn prepend_paths(paths: &[&Path]) -> Result<OsString, std::env::JoinPathsError> {
    prepend_paths_to(paths, EnvVars::var_os(EnvVars::PATH).as_deref())
}

/// Like [`prepend_paths`], but joins against an explicit base `PATH` value instead
/// of reading the process environment. Passing `None` falls back to the
/// process-inherited `PATH`, matching the rule in spec.md §4.6.
pub fn prepend_paths_to(
    paths: &[&Path],
    base: Option<&std::ffi::OsStr>,
) -> Result<OsString, std::env::JoinPathsError> {
    let base = base
        .map(OsString::from)
        .or_else(|| EnvVars::var_os(EnvVars::PATH));

    std::env::join_paths(
        paths
            .iter()
            .map(|p| p.to_path_buf())
            .chain(base.iter().flat_map(std::env::split_paths)),
    )
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn test_prepend_paths_to_explicit_base() {
        let sep = if cfg!(windows) { ";" } else { ":" };
        let base = std::ffi::OsString::from(format!("/existing/bin{sep}/usr/bin"));
        let joined = prepend_paths_to(&[Path::new("/env/bin")], Some(&base)).unwrap();
        let joined = joined.to_string_lossy();
        assert!(joined.starts_with("/env/bin"));
        assert!(joined.contains("/existing/bin"));
        assert!(joined.contains("/usr/bin"));
    }

    #[test]
    fn test_prepend_paths_to_no_base_falls_back_to_process_path() {
        // SAFETY: test runs single-threaded with respect to this var.
        unsafe { std::env::set_var("PATH", "/from/process") };
        let joined = prepend_paths_to(&[Path::new("/env/bin")], None).unwrap();
        let joined = joined.to_string_lossy();
        assert!(joined.starts_with("/env/bin"));
        assert!(joined.contains("/from/process"));
    }
}
