//! Streaming extraction of `.ipa` packages.
//!
//! An `.ipa` is a zip archive whose `Payload/` directory holds a single
//! `<Name>.app` bundle. [`extract_app`] unpacks every entry into a destination
//! directory, one entry at a time, and reports where the bundle landed.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace};
use zip::ZipArchive;

/// Directory-name suffix identifying an application bundle.
pub const APP_SUFFIX: &str = ".app";

/// File extension of a compressed application package.
pub const PACKAGE_EXTENSION: &str = "ipa";

/// Errors that can occur while extracting a package.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The package could not be opened or an entry could not be decoded.
    #[error("Unable to read package {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// An entry name points outside the destination directory.
    #[error("Package entry {0:?} escapes the extraction directory")]
    UnsafeEntry(String),

    /// Writing an extracted entry failed.
    #[error("Failed to extract {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// No `.app` directory entry was found.
    #[error("Unable to determine .app directory from .ipa")]
    NoAppDirectory,
}

/// Returns true if `path` names a compressed package rather than a bundle directory.
pub fn is_app_archive(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(PACKAGE_EXTENSION))
}

/// Extracts `package` into `dest` and returns the path of the `.app`
/// directory relative to `dest`.
///
/// Entries are processed serially. Each file is streamed to disk and flushed
/// before the next entry is opened, so memory use and open descriptors stay
/// bounded regardless of bundle size. When the archive contains nested
/// bundles (app extensions, watch apps) the shallowest `.app` wins.
///
/// This is blocking I/O; async callers should use `spawn_blocking`.
pub fn extract_app(package: &Path, dest: &Path) -> Result<PathBuf, ArchiveError> {
    let decode = |source: zip::result::ZipError| ArchiveError::Decode {
        path: package.to_path_buf(),
        source,
    };

    let file = File::open(package).map_err(|e| decode(e.into()))?;
    let mut archive = ZipArchive::new(file).map_err(decode)?;
    let mut app_dir: Option<PathBuf> = None;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(decode)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ArchiveError::UnsafeEntry(entry.name().to_string()))?;
        let out_path = dest.join(&relative);
        trace!(entry = entry.name(), "unzip");

        if entry.is_dir() {
            create_dir_all(&out_path)?;
            if is_app_dir(&relative) {
                let shallower = app_dir
                    .as_ref()
                    .map_or(true, |found| depth(&relative) < depth(found));
                if shallower {
                    // Rebuilt from components to drop the entry's trailing slash.
                    app_dir = Some(relative.components().collect());
                }
            }
            continue;
        }

        if let Some(parent) = out_path.parent() {
            create_dir_all(parent)?;
        }
        let write_err = |source: io::Error| ArchiveError::Write {
            path: out_path.clone(),
            source,
        };
        let mut writer = BufWriter::new(File::create(&out_path).map_err(write_err)?);
        io::copy(&mut entry, &mut writer).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData => decode(e.into()),
            _ => write_err(e),
        })?;
        writer.flush().map_err(write_err)?;
        drop(writer);

        if let Some(mode) = entry.unix_mode() {
            set_mode(&out_path, mode).map_err(write_err)?;
        }
    }

    let app_dir = app_dir.ok_or(ArchiveError::NoAppDirectory)?;
    debug!(app_dir = %app_dir.display(), "found app bundle in package");
    Ok(app_dir)
}

fn create_dir_all(path: &Path) -> Result<(), ArchiveError> {
    fs::create_dir_all(path).map_err(|source| ArchiveError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Applies the archived permission bits, keeping the file readable and
/// writable by its owner.
#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode((mode & 0o777) | 0o600))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

fn is_app_dir(relative: &Path) -> bool {
    relative
        .file_name()
        .is_some_and(|name| name.to_string_lossy().ends_with(APP_SUFFIX))
}

fn depth(path: &Path) -> usize {
    path.components().count()
}
