use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{trace, warn};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unsupported archive format: `{0}`")]
    UnsupportedFormat(String),
    #[error("Archive entry `{0}` would escape the destination directory")]
    PathTraversal(String),
    #[error("Archive does not have a single top-level directory: `{0}`")]
    NonSingularArchive(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to read zip archive: {0}")]
    Zip(#[from] async_zip::error::ZipError),
}

/// Recognized archive suffixes (spec.md §4.2).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ArchiveExtension {
    TarGz,
    Tar,
    Zip,
}

impl ArchiveExtension {
    /// Dispatch by filename suffix, lower-cased.
    pub fn from_path(filename: &str) -> Result<Self, Error> {
        let lower = filename.to_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Ok(Self::TarGz)
        } else if lower.ends_with(".zip") {
            Ok(Self::Zip)
        } else if lower.ends_with(".tar") {
            Ok(Self::Tar)
        } else {
            Err(Error::UnsupportedFormat(filename.to_string()))
        }
    }
}

/// Unpack `reader` (formatted as `ext`) into `dest_dir`, guarding against path traversal.
///
/// `.tar.xz` is handled by the caller selecting [`ArchiveExtension::Tar`] over an
/// xz-decoding reader; this function itself only distinguishes gzip-tar, plain tar,
/// and zip, matching the formats named in spec.md §4.2 (xz decompression is layered
/// on top by [`crate::download::download_and_extract`] for the Linux Node archive).
pub async fn unpack(
    reader: impl AsyncRead + Unpin + Send,
    ext: ArchiveExtension,
    dest_dir: &Path,
) -> Result<(), Error> {
    create_dir_all_mode(dest_dir, 0o750).await?;
    let dest_dir = fs_err::tokio::canonicalize(dest_dir).await?;

    match ext {
        ArchiveExtension::TarGz => {
            let decoder = async_compression::tokio::bufread::GzipDecoder::new(
                tokio::io::BufReader::new(reader),
            );
            unpack_tar(decoder, &dest_dir).await
        }
        ArchiveExtension::Tar => unpack_tar(reader, &dest_dir).await,
        ArchiveExtension::Zip => unpack_zip(reader, &dest_dir).await,
    }
}

/// Like [`unpack`], but for `.tar.xz` payloads (Linux Node archives, spec.md §4.4).
pub async fn unpack_xz_tar(
    reader: impl AsyncRead + Unpin + Send,
    dest_dir: &Path,
) -> Result<(), Error> {
    create_dir_all_mode(dest_dir, 0o750).await?;
    let dest_dir = fs_err::tokio::canonicalize(dest_dir).await?;
    let decoder =
        async_compression::tokio::bufread::XzDecoder::new(tokio::io::BufReader::new(reader));
    unpack_tar(decoder, &dest_dir).await
}

async fn unpack_tar(
    reader: impl AsyncRead + Unpin + Send,
    dest_dir: &Path,
) -> Result<(), Error> {
    let mut archive = tokio_tar::Archive::new(reader);
    let mut entries = archive.entries()?;

    while let Some(entry) = futures::TryStreamExt::try_next(&mut entries).await? {
        let mut entry = entry;
        let name = entry.path()?.to_path_buf();
        let name_str = name.to_string_lossy().to_string();

        let candidate = guarded_join(dest_dir, &name, &name_str)?;

        let header = entry.header();
        match header.entry_type() {
            tokio_tar::EntryType::Directory => {
                create_dir_all_mode(&candidate, 0o750).await?;
            }
            tokio_tar::EntryType::Regular => {
                if let Some(parent) = candidate.parent() {
                    create_dir_all_mode(parent, 0o750).await?;
                }
                let mode = header.mode().unwrap_or(0o644);
                let mut file = fs_err::tokio::File::create(&candidate).await?;
                tokio::io::copy(&mut entry, &mut file.file_mut()).await?;
                set_unix_mode(&candidate, mode).await;
            }
            _ => {
                trace!(entry = %name_str, "Skipping unsupported tar entry type");
            }
        }
    }

    Ok(())
}

async fn unpack_zip(
    reader: impl AsyncRead + Unpin + Send,
    dest_dir: &Path,
) -> Result<(), Error> {
    let mut reader = async_zip::tokio::read::stream::ZipFileReader::new(reader.compat());

    while let Some(mut entry_reader) = reader.next_with_entry().await? {
        let entry = entry_reader.reader().entry();
        let name_str = entry.filename().as_str().unwrap_or_default().to_string();
        let is_dir = entry.dir().unwrap_or(false);
        let mode = entry.unix_permissions();

        let name = PathBuf::from(&name_str);
        let candidate = guarded_join(dest_dir, &name, &name_str)?;

        if is_dir {
            create_dir_all_mode(&candidate, mode.map(u32::from).unwrap_or(0o750)).await?;
        } else {
            if let Some(parent) = candidate.parent() {
                create_dir_all_mode(parent, 0o750).await?;
            }
            let mut file = fs_err::tokio::File::create(&candidate).await?;
            let mut buf = Vec::new();
            entry_reader.reader_mut().read_to_end(&mut buf).await?;
            tokio::io::AsyncWriteExt::write_all(file.file_mut(), &buf).await?;
            if let Some(mode) = mode {
                set_unix_mode(&candidate, u32::from(mode)).await;
            }
        }

        reader = entry_reader.done().await?;
    }

    Ok(())
}

/// `mkdir -p` with `mode` applied to the created leaf directory (spec.md
/// §4.1/§4.2: directories this subsystem creates get mode 0o750 unless the
/// archive records a different mode for the entry).
pub(crate) async fn create_dir_all_mode(path: &Path, mode: u32) -> Result<(), std::io::Error> {
    fs_err::tokio::create_dir_all(path).await?;
    set_unix_mode(path, mode).await;
    Ok(())
}

#[cfg(unix)]
async fn set_unix_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(mode & 0o777 | 0o600);
    if let Err(err) = fs_err::tokio::set_permissions(path, perms).await {
        warn!(?err, path = %path.display(), "Failed to set extracted file permissions");
    }
}

#[cfg(not(unix))]
async fn set_unix_mode(_path: &Path, _mode: u32) {}

/// Join `name` onto `dest_dir`, rejecting any path that would escape it once canonicalized.
///
/// The check compares cleaned, absolute paths rather than relying on a naive string
/// prefix, since symlinks and `..` segments can defeat a string comparison.
fn guarded_join(dest_dir: &Path, name: &Path, name_str: &str) -> Result<PathBuf, Error> {
    let joined = dest_dir.join(name);
    let cleaned = path_clean::clean(&joined);

    if cleaned != dest_dir && !cleaned.starts_with(dest_dir) {
        return Err(Error::PathTraversal(name_str.to_string()));
    }

    // A cleaned path equal to `dest_dir` itself (e.g. entry name `.` or `../dest_dir`)
    // is not a traversal per se, but it is also not a valid destination file.
    if cleaned == dest_dir {
        return Err(Error::PathTraversal(name_str.to_string()));
    }

    Ok(cleaned)
}

/// Locate the single top-level child of `dir` and return its path, for archives
/// laid out as `<prefix>/...` that should have their prefix stripped (spec.md §4.4
/// step 4, `--strip-components=1` semantics).
pub fn strip_component(dir: &Path) -> Result<PathBuf, Error> {
    let mut entries = fs_err::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;

    if entries.len() != 1 {
        return Err(Error::NonSingularArchive(dir.display().to_string()));
    }

    let only = entries.remove(0);
    if !only.file_type()?.is_dir() {
        return Err(Error::NonSingularArchive(dir.display().to_string()));
    }

    Ok(only.path())
}

use tokio_util::compat::TokioAsyncReadCompatExt;

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn guarded_join_rejects_parent_escape() {
        let dest = Path::new("/tmp/hookenv-dest");
        let err = guarded_join(dest, Path::new("../../etc/passwd"), "../../etc/passwd")
            .expect_err("escape should be rejected");
        assert!(matches!(err, Error::PathTraversal(_)));
    }

    #[test]
    fn guarded_join_accepts_nested_entry() {
        let dest = Path::new("/tmp/hookenv-dest");
        let joined = guarded_join(dest, Path::new("bin/node"), "bin/node").unwrap();
        assert_eq!(joined, Path::new("/tmp/hookenv-dest/bin/node"));
    }

    #[test]
    fn from_path_dispatches_known_suffixes() {
        assert_eq!(
            ArchiveExtension::from_path("node-v20.11.0-linux-x64.tar.gz").unwrap(),
            ArchiveExtension::TarGz
        );
        assert_eq!(
            ArchiveExtension::from_path("a.TGZ").unwrap(),
            ArchiveExtension::TarGz
        );
        assert_eq!(
            ArchiveExtension::from_path("a.zip").unwrap(),
            ArchiveExtension::Zip
        );
        assert_eq!(
            ArchiveExtension::from_path("a.tar").unwrap(),
            ArchiveExtension::Tar
        );
        assert!(ArchiveExtension::from_path("a.rar").is_err());
    }

    #[tokio::test]
    async fn unpack_empty_tar_creates_no_files() {
        let dest = tempfile::tempdir().unwrap();
        let empty_tar = tokio::io::empty();
        unpack(empty_tar, ArchiveExtension::Tar, dest.path())
            .await
            .unwrap();
        let entries: Vec<_> = fs_err::read_dir(dest.path()).unwrap().collect();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn strip_component_rejects_multi_entry_dir() {
        let dest = tempfile::tempdir().unwrap();
        fs_err::tokio::create_dir_all(dest.path().join("a"))
            .await
            .unwrap();
        fs_err::tokio::create_dir_all(dest.path().join("b"))
            .await
            .unwrap();
        let err = strip_component(dest.path()).unwrap_err();
        assert!(matches!(err, Error::NonSingularArchive(_)));
    }
}
