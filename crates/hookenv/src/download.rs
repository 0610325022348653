use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use futures::TryStreamExt;
use target_lexicon::{Architecture, HOST, OperatingSystem};
use thiserror::Error;
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{debug, error, trace, warn};

use hookenv_consts::env_vars::EnvVars;

use crate::archive::{self, ArchiveExtension};
use crate::fs::Simplified;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to create directory `{0}`")]
    DirectoryCreateFailed(PathBuf, #[source] std::io::Error),
    #[error("Failed to create file `{0}`")]
    FileCreateFailed(PathBuf, #[source] std::io::Error),
    #[error("Download of `{0}` failed with HTTP status {1}")]
    DownloadHTTPStatus(String, u16),
    #[error("Download of `{0}` failed")]
    DownloadTransport(String, #[source] reqwest::Error),
    #[error(transparent)]
    Archive(#[from] archive::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub(crate) static REQWEST_CLIENT: LazyLock<reqwest::Client> =
    LazyLock::new(|| create_reqwest_client(use_native_tls()));

fn create_reqwest_client(native_tls: bool) -> reqwest::Client {
    let builder = reqwest::ClientBuilder::new()
        .user_agent(concat!("hookenv/", env!("CARGO_PKG_VERSION")))
        .tls_built_in_root_certs(false);
    let builder = if native_tls {
        debug!("Using native TLS for reqwest client");
        builder.tls_built_in_native_certs(true)
    } else {
        builder.tls_built_in_webpki_certs(true)
    };
    builder.build().unwrap_or_else(|err| {
        error!(?err, "Unable to build reqwest client, falling back to default");
        reqwest::Client::new()
    })
}

fn use_native_tls() -> bool {
    if let Some(val) = EnvVars::var_as_bool(EnvVars::HOOKENV_NATIVE_TLS) {
        return val;
    }

    EnvVars::var_os(EnvVars::SSL_CERT_FILE).is_some_and(|path| {
        let exists = Path::new(&path).exists();
        if !exists {
            warn!(
                path = %path.to_string_lossy(),
                "Ignoring invalid SSL_CERT_FILE: file does not exist"
            );
        }
        exists
    })
}

/// Download `url` to `dest`, streaming the response body directly to disk.
///
/// Non-2xx responses fail with [`Error::DownloadHTTPStatus`]; transport/DNS/timeout
/// failures fail with [`Error::DownloadTransport`] (spec.md §4.1).
pub async fn download(url: &str, dest: &Path, timeout: Duration) -> Result<(), Error> {
    if let Some(parent) = dest.parent() {
        archive::create_dir_all_mode(parent, 0o750)
            .await
            .map_err(|err| Error::DirectoryCreateFailed(parent.to_path_buf(), err))?;
    }

    let response = REQWEST_CLIENT
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|err| Error::DownloadTransport(url.to_string(), err))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::DownloadHTTPStatus(url.to_string(), status.as_u16()));
    }

    let mut body = response
        .bytes_stream()
        .map_err(std::io::Error::other)
        .into_async_read()
        .compat();

    let mut file = fs_err::tokio::File::create(dest)
        .await
        .map_err(|err| Error::FileCreateFailed(dest.to_path_buf(), err))?;

    let result = tokio::io::copy(&mut body, file.file_mut()).await;

    drop(body);
    if let Err(err) = file.file_mut().sync_all().await {
        trace!(?err, dest = %dest.simplified_display(), "Failed to sync downloaded file");
    }

    result?;
    Ok(())
}

/// Maps the host OS to the token used in upstream release filenames (spec.md §4.1).
pub fn normalized_os() -> &'static str {
    match HOST.operating_system {
        OperatingSystem::Darwin(_) => "osx",
        OperatingSystem::Windows => "win",
        OperatingSystem::Linux => "linux",
        _ => "unknown",
    }
}

/// Maps the host architecture to the token used in upstream release filenames.
pub fn normalized_arch() -> &'static str {
    match HOST.architecture {
        Architecture::X86_64 => "x64",
        Architecture::Aarch64(_) => "arm64",
        Architecture::X86_32(_) => "x86",
        _ => "unknown",
    }
}

/// Download `url` (named `filename`, used to pick the archive format) into a scratch
/// file under `scratch_dir`, extract it, hand the extracted (prefix-stripped) directory
/// to `callback`, then remove the scratch file and temp extraction directory on all exits.
pub async fn download_and_extract(
    url: &str,
    filename: &str,
    scratch_dir: &Path,
    timeout: Duration,
    callback: impl AsyncFnOnce(&Path) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    archive::create_dir_all_mode(scratch_dir, 0o750).await?;
    let temp_dir = tempfile::tempdir_in(scratch_dir)?;
    let archive_path = temp_dir.path().join(filename);

    download(url, &archive_path, timeout).await?;

    let extract_dir = temp_dir.path().join("extracted");
    archive::create_dir_all_mode(&extract_dir, 0o750).await?;

    let ext = ArchiveExtension::from_path(filename)?;
    let is_linux_xz = filename.ends_with(".tar.xz");

    let reader = fs_err::tokio::File::open(&archive_path).await?;
    if is_linux_xz {
        archive::unpack_xz_tar(tokio::io::BufReader::new(reader.into_parts().0), &extract_dir)
            .await?;
    } else {
        archive::unpack(
            tokio::io::BufReader::new(reader.into_parts().0),
            ext,
            &extract_dir,
        )
        .await?;
    }

    let extracted = match archive::strip_component(&extract_dir) {
        Ok(top_level) => top_level,
        Err(archive::Error::NonSingularArchive(_)) => extract_dir.clone(),
        Err(err) => return Err(err.into()),
    };

    callback(&extracted).await?;

    drop(temp_dir);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn download_writes_response_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/archive.tar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello-archive".to_vec()))
            .mount(&server)
            .await;

        let dest_dir = tempfile::tempdir().unwrap();
        let dest = dest_dir.path().join("out.tar");

        download(
            &format!("{}/archive.tar", server.uri()),
            &dest,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let content = fs_err::tokio::read(&dest).await.unwrap();
        assert_eq!(content, b"hello-archive");
    }

    #[tokio::test]
    async fn download_maps_404_to_http_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.tar"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dest_dir = tempfile::tempdir().unwrap();
        let dest = dest_dir.path().join("out.tar");

        let err = download(
            &format!("{}/missing.tar", server.uri()),
            &dest,
            Duration::from_secs(5),
        )
        .await
        .expect_err("404 should fail");

        assert!(matches!(err, Error::DownloadHTTPStatus(_, 404)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn download_transport_failure_on_unreachable_host() {
        let dest_dir = tempfile::tempdir().unwrap();
        let dest = dest_dir.path().join("out.tar");

        let err = download(
            "http://127.0.0.1:1/unreachable.tar",
            &dest,
            Duration::from_millis(200),
        )
        .await
        .expect_err("unreachable host should fail");

        assert!(matches!(err, Error::DownloadTransport(..)));
    }

    #[tokio::test]
    async fn download_creates_missing_parent_directory() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.tar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
            .mount(&server)
            .await;

        let dest_dir = tempfile::tempdir().unwrap();
        let dest = dest_dir.path().join("nested").join("a.tar");

        download(
            &format!("{}/a.tar", server.uri()),
            &dest,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert!(dest.exists());
    }
}
