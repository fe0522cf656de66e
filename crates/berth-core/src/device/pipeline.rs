//! The physical device deployment sequence.
//!
//! [`DevicePipeline::deploy`] runs four strictly ordered steps over a single
//! device session:
//!
//! 1. **Mount** the developer disk image if none is mounted
//! 2. **Upload** the bundle into `PublicStaging`
//! 3. **Install** it and look up where it was installed
//! 4. **Launch** it through debugserver, retrying transient failures
//!
//! The session is closed exactly once after the steps finish, whether they
//! succeeded or not. Partial state on the device (an uploaded but not
//! installed bundle, say) is left as is.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, info_span, Instrument};

use super::launch::{launch_with_retry, LaunchPolicy};
use super::mounter::{ensure_image_mounted, DiskImageLocator};
use super::staging::upload_bundle;
use super::{DeviceConnector, DeviceError, DeviceSession};
use crate::xcode::XcodeError;

/// Errors from the device deployment pipeline.
#[derive(Error, Debug)]
pub enum DeviceDeployError {
    /// A session with the device could not be established.
    #[error("Unable to connect to device {udid}: {source}")]
    Connect {
        udid: String,
        #[source]
        source: DeviceError,
    },

    /// No developer disk image matches the device's iOS version.
    #[error(
        "Unable to find Developer Disk Image for iOS {0}. Do you have the right version of Xcode?"
    )]
    ImageNotFound(String),

    /// Querying, uploading or mounting the disk image failed.
    #[error("Failed to mount Developer Disk Image: {0}")]
    Mount(#[source] DeviceError),

    /// Preparing the staging directory or uploading the bundle failed.
    #[error("Failed to upload app: {0}")]
    Staging(#[source] DeviceError),

    /// The installation proxy rejected the bundle or could not find it afterwards.
    #[error("Failed to install app: {0}")]
    Install(#[source] DeviceError),

    /// debugserver refused the launch.
    #[error("There was an error launching app: {0}")]
    Launch(String),

    /// Every launch attempt reported a transient failure.
    #[error("Unable to launch app, number of tries exceeded ({attempts})")]
    RetriesExceeded { attempts: u32 },

    /// Xcode could not be located while looking for the disk image.
    #[error(transparent)]
    Xcode(#[from] XcodeError),
}

/// Deploys bundles to physical devices.
pub struct DevicePipeline {
    connector: Arc<dyn DeviceConnector>,
    images: DiskImageLocator,
    policy: LaunchPolicy,
}

impl DevicePipeline {
    pub fn new(connector: Arc<dyn DeviceConnector>, images: DiskImageLocator) -> Self {
        Self {
            connector,
            images,
            policy: LaunchPolicy::default(),
        }
    }

    /// Replace the default launch retry policy.
    pub fn with_policy(mut self, policy: LaunchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Mount, upload, install and launch `bundle` on the device `udid`.
    pub async fn deploy(
        &self,
        udid: &str,
        bundle: &Path,
        bundle_id: &str,
    ) -> Result<(), DeviceDeployError> {
        let mut session = self
            .connector
            .open(udid)
            .await
            .map_err(|source| DeviceDeployError::Connect {
                udid: udid.to_string(),
                source,
            })?;

        let result = self
            .run(session.as_mut(), bundle, bundle_id)
            .instrument(info_span!("device_deploy", udid))
            .await;
        session.close().await;
        result
    }

    async fn run(
        &self,
        session: &mut dyn DeviceSession,
        bundle: &Path,
        bundle_id: &str,
    ) -> Result<(), DeviceDeployError> {
        ensure_image_mounted(session, &self.images).await?;

        let staged = {
            let mut afc = session
                .file_transfer()
                .await
                .map_err(DeviceDeployError::Staging)?;
            upload_bundle(afc.as_mut(), bundle).await?
        };

        let app = {
            let mut installer = session
                .installer()
                .await
                .map_err(DeviceDeployError::Install)?;
            info!(staged = %staged, bundle_id, "installing app");
            installer
                .install(&staged, bundle_id)
                .await
                .map_err(DeviceDeployError::Install)?;
            installer
                .lookup(bundle_id)
                .await
                .map_err(DeviceDeployError::Install)?
        };

        // Launching straight after install races the device finishing it.
        tokio::time::sleep(self.policy.settle_delay).await;
        let mut channel = launch_with_retry(session, &app, &self.policy).await?;
        channel.close().await;
        Ok(())
    }
}
