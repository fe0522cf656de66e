//! Physical device deployment.
//!
//! The device protocol stack (lockdown, AFC, installation proxy, image
//! mounter, debugserver) is reached through the capability traits defined
//! here. The orchestration in [`pipeline`] only talks to these traits, so it
//! runs unchanged against the `idevice`-backed implementation in [`backend`]
//! or against in-memory fakes in tests.
//!
//! # Modules
//!
//! - [`discovery`] - usbmuxd device listing
//! - [`mounter`] - developer disk image lookup and mounting
//! - [`staging`] - bundle upload into `PublicStaging`
//! - [`launch`] - debugserver launch with bounded retry
//! - [`pipeline`] - the full mount / upload / install / launch sequence

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

pub mod backend;
pub mod discovery;
pub mod launch;
pub mod mounter;
pub mod pipeline;
pub mod staging;

pub use launch::{LaunchOutcome, LaunchPolicy};
pub use pipeline::{DeviceDeployError, DevicePipeline};

/// Errors reported by the device protocol collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The requested remote object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The protocol stack reported a failure.
    #[error("device protocol error: {0}")]
    Protocol(String),

    /// Reading a local file for transfer failed.
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for DeviceError {
    fn from(err: std::io::Error) -> Self {
        DeviceError::Io(err.to_string())
    }
}

/// Where an installed app lives on the device, as reported by the installer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppLaunchInfo {
    /// The app's data container; used as the process working directory.
    pub container_path: String,
    /// Absolute path of the installed `.app` directory.
    pub executable_path: String,
    /// `CFBundleExecutable` of the installed app.
    pub executable_name: String,
}

/// Opens sessions to physical devices.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Connect to the device with the given UDID.
    async fn open(&self, udid: &str) -> Result<Box<dyn DeviceSession>, DeviceError>;
}

/// A live connection to one device's protocol stack.
///
/// A session is owned by a single pipeline run. [`close`](Self::close) must
/// be called exactly once, whatever the outcome of the run.
#[async_trait]
pub trait DeviceSession: Send {
    /// Whether a developer disk image is currently mounted.
    async fn image_mounted(&mut self) -> Result<bool, DeviceError>;

    /// Look up a lockdown value such as `ProductVersion`.
    async fn value(&mut self, key: &str) -> Result<String, DeviceError>;

    /// Upload a disk image and its signature to the image mounter.
    async fn upload_image(&mut self, image: &Path, signature: &[u8]) -> Result<(), DeviceError>;

    /// Mount a previously uploaded disk image.
    async fn mount_image(&mut self, image: &Path, signature: &[u8]) -> Result<(), DeviceError>;

    /// Start a file transfer (AFC) client.
    async fn file_transfer(&mut self) -> Result<Box<dyn FileTransfer>, DeviceError>;

    /// Start an installation proxy client.
    async fn installer(&mut self) -> Result<Box<dyn Installer>, DeviceError>;

    /// Start a debugserver process control channel.
    async fn process_control(&mut self) -> Result<Box<dyn ProcessControl>, DeviceError>;

    /// Release the connection.
    async fn close(&mut self);
}

/// Device file system access rooted at the media directory.
#[async_trait]
pub trait FileTransfer: Send {
    /// Check that `path` exists. A missing path is reported as
    /// [`DeviceError::NotFound`].
    async fn stat(&mut self, path: &str) -> Result<(), DeviceError>;

    /// Create a directory.
    async fn make_dir(&mut self, path: &str) -> Result<(), DeviceError>;

    /// Upload the local directory tree `local` to `remote`.
    async fn upload_dir(&mut self, local: &Path, remote: &str) -> Result<(), DeviceError>;
}

/// Installation proxy operations.
#[async_trait]
pub trait Installer: Send {
    /// Install the staged bundle at `staged_path`.
    async fn install(&mut self, staged_path: &str, bundle_id: &str) -> Result<(), DeviceError>;

    /// Find the installed app with `bundle_id`.
    async fn lookup(&mut self, bundle_id: &str) -> Result<AppLaunchInfo, DeviceError>;
}

/// A debugserver channel used to start the app.
#[async_trait]
pub trait ProcessControl: Send {
    async fn set_max_packet_size(&mut self, size: usize) -> Result<(), DeviceError>;

    async fn set_working_dir(&mut self, dir: &str) -> Result<(), DeviceError>;

    /// Ask debugserver to launch `executable_name` from `executable_path`.
    async fn launch(
        &mut self,
        executable_path: &str,
        executable_name: &str,
    ) -> Result<(), DeviceError>;

    /// The raw launch status code (`OK`, `EBusy`, `ENotFound`, ...).
    async fn launch_status(&mut self) -> Result<String, DeviceError>;

    /// Close the channel, leaving a launched app running.
    async fn close(&mut self);
}
