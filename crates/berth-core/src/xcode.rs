//! Locating the active Xcode developer directory.
//!
//! Both pipelines need files that ship inside Xcode: the simulator pipeline
//! opens `Simulator.app` from it and the device pipeline looks for the
//! developer disk image under `Platforms/iPhoneOS.platform/DeviceSupport`.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::command::{stream_text, CommandRunner};

/// Environment variable Apple's tools honor to select an Xcode install.
pub const DEVELOPER_DIR_ENV: &str = "DEVELOPER_DIR";

/// Errors that can occur while locating Xcode.
#[derive(Error, Debug)]
pub enum XcodeError {
    /// `xcode-select -p` failed or printed nothing.
    #[error("Unable to get Xcode location. Is Xcode installed? {0}")]
    NotFound(String),

    /// An I/O error occurred while executing `xcode-select`.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolve the developer directory.
///
/// Precedence: `configured` (from [`BerthConfig`](crate::config::BerthConfig)),
/// then the `DEVELOPER_DIR` environment variable, then `xcode-select -p`.
pub async fn developer_dir(
    runner: &dyn CommandRunner,
    configured: Option<&Path>,
) -> Result<PathBuf, XcodeError> {
    if let Some(dir) = configured {
        return Ok(dir.to_path_buf());
    }
    let from_env = std::env::var_os(DEVELOPER_DIR_ENV).filter(|v| !v.is_empty());
    if let Some(dir) = from_env {
        debug!(dir = ?dir, "using DEVELOPER_DIR");
        return Ok(PathBuf::from(dir));
    }

    let output = runner.run("xcode-select", &["-p"]).await?;
    let stdout = stream_text(&output.stdout);
    if !output.status.success() || stdout.is_empty() {
        return Err(XcodeError::NotFound(stream_text(&output.stderr)));
    }
    Ok(PathBuf::from(stdout.trim()))
}

/// Path of `Simulator.app` inside a developer directory.
pub fn simulator_app(developer_dir: &Path) -> PathBuf {
    developer_dir.join("Applications").join("Simulator.app")
}

/// Directory holding one subdirectory per supported iOS version.
pub fn device_support_dir(developer_dir: &Path) -> PathBuf {
    developer_dir
        .join("Platforms")
        .join("iPhoneOS.platform")
        .join("DeviceSupport")
}
