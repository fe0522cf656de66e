//! Uploading a bundle into the device's staging area.

use std::path::Path;

use tracing::{debug, info};

use super::pipeline::DeviceDeployError;
use super::{DeviceError, FileTransfer};

/// AFC directory the installation proxy installs from.
pub const STAGING_DIR: &str = "PublicStaging";

/// Remote path a bundle directory named `bundle_name` is staged to.
pub fn staged_path(bundle_name: &str) -> String {
    format!("{STAGING_DIR}/{bundle_name}")
}

/// Create the staging directory unless it already exists.
///
/// Only a "not found" stat result leads to creation; any other stat error
/// is returned as is.
pub async fn ensure_staging_dir(afc: &mut dyn FileTransfer) -> Result<(), DeviceError> {
    match afc.stat(STAGING_DIR).await {
        Ok(()) => Ok(()),
        Err(DeviceError::NotFound(_)) => {
            debug!(dir = STAGING_DIR, "creating staging directory");
            afc.make_dir(STAGING_DIR).await
        }
        Err(e) => Err(e),
    }
}

/// Upload the bundle at `bundle` and return its staged remote path.
pub async fn upload_bundle(
    afc: &mut dyn FileTransfer,
    bundle: &Path,
) -> Result<String, DeviceDeployError> {
    let bundle_name = bundle
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            DeviceDeployError::Staging(DeviceError::Io(format!(
                "not a bundle directory: {}",
                bundle.display()
            )))
        })?;

    ensure_staging_dir(afc)
        .await
        .map_err(DeviceDeployError::Staging)?;

    let remote = staged_path(&bundle_name);
    info!(bundle = %bundle.display(), remote = %remote, "uploading app");
    afc.upload_dir(bundle, &remote)
        .await
        .map_err(DeviceDeployError::Staging)?;
    Ok(remote)
}
