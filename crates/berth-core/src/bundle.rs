//! Application bundle metadata.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Name of the metadata file at the root of an `.app` bundle.
pub const INFO_PLIST: &str = "Info.plist";

/// Key holding the bundle's unique identifier.
pub const BUNDLE_ID_KEY: &str = "CFBundleIdentifier";

/// Errors reading a bundle's identifier.
#[derive(Error, Debug)]
pub enum BundleIdError {
    /// `Info.plist` is missing or could not be parsed.
    #[error("Unable to read {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: plist::Error,
    },

    /// The plist has no usable `CFBundleIdentifier` string.
    #[error("Unable to get app bundle identifier from {}", path.display())]
    MissingIdentifier { path: PathBuf },
}

/// An `.app` directory together with its bundle identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppBundle {
    pub path: PathBuf,
    pub bundle_id: String,
}

impl AppBundle {
    /// Reads the bundle identifier once and pairs it with `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, BundleIdError> {
        let path = path.into();
        let bundle_id = read_bundle_id(&path)?;
        Ok(Self { path, bundle_id })
    }

    /// The bundle's directory name, e.g. `MyApp.app`.
    pub fn dir_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Reads `CFBundleIdentifier` from `<bundle_dir>/Info.plist`.
///
/// Both XML and binary plists are accepted.
pub fn read_bundle_id(bundle_dir: &Path) -> Result<String, BundleIdError> {
    let path = bundle_dir.join(INFO_PLIST);
    let value = plist::Value::from_file(&path).map_err(|source| BundleIdError::Unreadable {
        path: path.clone(),
        source,
    })?;

    value
        .as_dictionary()
        .and_then(|dict| dict.get(BUNDLE_ID_KEY))
        .and_then(plist::Value::as_string)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .ok_or(BundleIdError::MissingIdentifier { path })
}
