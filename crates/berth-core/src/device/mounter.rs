//! Developer disk image mounting.
//!
//! Launching through debugserver needs Xcode's developer disk image mounted
//! on the device. Xcode ships one image per iOS version under
//! `DeviceSupport/<version> (<build>)/DeveloperDiskImage.dmg`, next to a
//! `.signature` file the image mounter checks before mounting.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info};

use super::pipeline::DeviceDeployError;
use super::{DeviceError, DeviceSession};
use crate::command::CommandRunner;
use crate::xcode;

pub const DISK_IMAGE_NAME: &str = "DeveloperDiskImage.dmg";
pub const SIGNATURE_EXTENSION: &str = "signature";

/// Lockdown key holding the device's iOS version, e.g. `17.2.1`.
pub const PRODUCT_VERSION_KEY: &str = "ProductVersion";

static VERSION_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\d+\.\d+").expect("valid regex")
});

/// A disk image located on the host, with its signature loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskImage {
    pub path: PathBuf,
    pub signature: Vec<u8>,
}

/// Result of [`ensure_image_mounted`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountStatus {
    /// An image was already mounted; nothing was done.
    AlreadyMounted,
    /// The given image was uploaded and mounted.
    Mounted(PathBuf),
}

/// The `major.minor` part of an iOS version string (`"17.2.1"` -> `"17.2"`).
pub fn version_prefix(version: &str) -> Option<&str> {
    VERSION_PREFIX_RE.find(version).map(|m| m.as_str())
}

/// Find the disk image for `version` in an Xcode `DeviceSupport` directory.
///
/// Directory names look like `17.2` or `11.2 (15C107)`; the first (sorted)
/// name containing the version's `major.minor` prefix is used.
pub fn find_disk_image(device_support: &Path, version: &str) -> Result<PathBuf, DeviceDeployError> {
    let not_found = || DeviceDeployError::ImageNotFound(version.to_string());
    let prefix = version_prefix(version).ok_or_else(not_found)?;

    let mut names: Vec<String> = std::fs::read_dir(device_support)
        .map_err(|e| {
            debug!(dir = %device_support.display(), error = %e, "cannot read DeviceSupport");
            not_found()
        })?
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    let dir = names
        .iter()
        .find(|name| name.contains(prefix))
        .ok_or_else(not_found)?;
    let image = device_support.join(dir).join(DISK_IMAGE_NAME);
    if !image.is_file() {
        return Err(not_found());
    }
    Ok(image)
}

/// Path of the signature file that accompanies `image`.
pub fn signature_path(image: &Path) -> PathBuf {
    let mut name = image.as_os_str().to_owned();
    name.push(".");
    name.push(SIGNATURE_EXTENSION);
    PathBuf::from(name)
}

/// Locates developer disk images inside the active Xcode.
#[derive(Clone)]
pub struct DiskImageLocator {
    runner: Arc<dyn CommandRunner>,
    developer_dir: Option<PathBuf>,
}

impl DiskImageLocator {
    /// `developer_dir` overrides `xcode-select` when set.
    pub fn new(runner: Arc<dyn CommandRunner>, developer_dir: Option<PathBuf>) -> Self {
        Self { runner, developer_dir }
    }

    /// Find the image for `version` and read its signature.
    pub async fn locate(&self, version: &str) -> Result<DiskImage, DeviceDeployError> {
        let runner = self.runner.as_ref();
        let configured = self.developer_dir.as_deref();
        let developer_dir = xcode::developer_dir(runner, configured).await?;
        let path = find_disk_image(&xcode::device_support_dir(&developer_dir), version)?;

        let signature_file = signature_path(&path);
        let signature = tokio::fs::read(&signature_file)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    DeviceDeployError::ImageNotFound(version.to_string())
                }
                _ => DeviceDeployError::Mount(DeviceError::from(e)),
            })?;
        Ok(DiskImage { path, signature })
    }
}

/// Make sure a developer disk image is mounted, mounting one if needed.
///
/// Safe to call on a device that already has an image mounted.
pub async fn ensure_image_mounted(
    session: &mut dyn DeviceSession,
    locator: &DiskImageLocator,
) -> Result<MountStatus, DeviceDeployError> {
    let mounted = session
        .image_mounted()
        .await
        .map_err(DeviceDeployError::Mount)?;
    if mounted {
        debug!("developer disk image already mounted");
        return Ok(MountStatus::AlreadyMounted);
    }

    let version = session
        .value(PRODUCT_VERSION_KEY)
        .await
        .map_err(DeviceDeployError::Mount)?;
    let image = locator.locate(&version).await?;
    info!(version = %version, image = %image.path.display(), "mounting developer disk image");

    session
        .upload_image(&image.path, &image.signature)
        .await
        .map_err(DeviceDeployError::Mount)?;
    session
        .mount_image(&image.path, &image.signature)
        .await
        .map_err(DeviceDeployError::Mount)?;
    Ok(MountStatus::Mounted(image.path))
}
